use std::fmt;
use std::str::FromStr;

use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Stored format: `v1$<salt>$<sha256 hex>`. The version prefix leaves
/// room for rehashing with a different scheme later.
const PWHASH_VERSION: &str = "v1";

pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = sha256::digest(format!("{salt}{password}"));

    format!("{PWHASH_VERSION}${salt}${digest}")
}

/// Case-sensitive, byte-exact: the attempt is hashed with the stored
/// salt and compared in constant time.
pub fn verify_password(stored: &str, attempt: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(version), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    if version != PWHASH_VERSION {
        return false;
    }

    let computed = sha256::digest(format!("{salt}{attempt}"));

    computed.as_bytes().ct_eq(digest.as_bytes()).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(fmt)
    }
}
