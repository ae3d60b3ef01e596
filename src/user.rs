/// A username/pwhash row in one of the two credential partitions.
/// Rows are immutable once created and are never deleted.
#[derive(Debug)]
#[derive(sqlx::FromRow)]
pub struct Credential {
    pub username: String,
    pub pwhash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// The credential table backing this partition.
    pub fn table(self) -> &'static str {
        match self {
            Role::User => "users",
            Role::Admin => "admins",
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}
