use std::result;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use warp::http;

use crate::auth::{self, SessionId};
use crate::backend::{Backend, FindError, StoreError};
use crate::saved::SavedList;
use crate::session::{Session, Sessions};
use crate::user::Role;

pub struct RecipeSync {
    backend: Backend,
    sessions: Sessions,
    // serialises account provisioning so two racing sign-ups resolve
    // as one success and one UsernameTaken
    provision: Mutex<()>,
}

#[derive(Debug, Deserialize)]
pub struct SignUp {
    pub username: String,
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Deserialize)]
pub struct SignIn {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignedIn {
    pub username: String,
    pub is_admin: bool,
    pub saved: SavedList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Internal,
    InvalidCredentials,
    InvalidCharacters,
    PasswordMismatch,
    UsernameTaken,
    NotFound,
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn message(self) -> &'static str {
        match self {
            Self::Internal => "store unavailable",
            Self::InvalidCredentials => "Invalid Credentials",
            Self::InvalidCharacters => {
                "Username and password can only contain ASCII letters, digits, '_' and '-'"
            }
            Self::PasswordMismatch => "Passwords don't match",
            Self::UsernameTaken => "Username already in use",
            Self::NotFound => "not found",
        }
    }
}

impl Into<http::StatusCode> for Error {
    fn into(self) -> http::StatusCode {
        match self {
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidCredentials => http::StatusCode::UNAUTHORIZED,
            Self::InvalidCharacters | Self::PasswordMismatch => http::StatusCode::BAD_REQUEST,
            Self::UsernameTaken => http::StatusCode::CONFLICT,
            Self::NotFound => http::StatusCode::NOT_FOUND,
        }
    }
}

impl warp::reject::Reject for Error {}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => Self::UsernameTaken,
            StoreError::Unavailable => Self::Internal,
        }
    }
}

fn charset_ok(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl RecipeSync {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            sessions: Sessions::default(),
            provision: Mutex::new(()),
        }
    }

    /// Validation order matches the sign-up form: username charset,
    /// confirmation, password charset, then uniqueness across both
    /// partitions. First failure wins.
    pub async fn sign_up(&self, role: Role, signup: &SignUp) -> Result<()> {
        let SignUp {
            username,
            password,
            password_confirm,
        } = signup;

        if !charset_ok(username) {
            info!("rejecting sign-up: bad characters in username");
            return Err(Error::InvalidCharacters);
        }

        if password != password_confirm {
            info!("rejecting sign-up for {username}: passwords don't match");
            return Err(Error::PasswordMismatch);
        }

        if !charset_ok(password) {
            info!("rejecting sign-up for {username}: bad characters in password");
            return Err(Error::InvalidCharacters);
        }

        let _provisioning = self.provision.lock().await;

        let pwhash = auth::hash_password(password);

        match self.backend.create_account(role, username, &pwhash).await {
            Ok(()) => {
                info!("created account {username} in {}", role.table());
                Ok(())
            }
            Err(StoreError::Duplicate) => {
                info!("rejecting sign-up for {username}: already in use");
                Err(Error::UsernameTaken)
            }
            Err(e @ StoreError::Unavailable) => Err(e.into()),
        }
    }

    /// Tries the `users` partition first, then `admins`; the first
    /// verifying match decides the role. On success a fresh session is
    /// created around a snapshot of the user's saved list.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<(SessionId, Session)> {
        let role = self.verify(username, password).await?;

        let saved = self
            .backend
            .saved_for_user(username)
            .await
            .map_err(Error::from)?
            .unwrap_or_else(|| {
                // provisioning guarantees a row; tolerate its absence
                error!("{username} has no saved list row");
                SavedList::empty()
            });

        let session = Session {
            username: username.to_string(),
            is_admin: role.is_admin(),
            saved,
        };

        let session_id = SessionId::new();
        self.sessions.insert(session_id, session.clone());

        info!("{username} signed in (admin: {})", session.is_admin);

        Ok((session_id, session))
    }

    async fn verify(&self, username: &str, password: &str) -> Result<Role> {
        for role in [Role::User, Role::Admin] {
            match self.backend.find_credential(role, username).await {
                Ok(cred) => {
                    if auth::verify_password(&cred.pwhash, password) {
                        return Ok(role);
                    }
                    debug!("wrong password for {username} in {}", role.table());
                }
                Err(FindError::NotFound) => {}
                Err(FindError::Internal) => return Err(Error::Internal),
            }
        }

        info!("rejecting sign-in for {username}");
        Err(Error::InvalidCredentials)
    }

    /// Idempotent: an unknown or already-cleared session id is a no-op.
    pub fn sign_out(&self, session_id: Option<SessionId>) {
        if let Some(ref id) = session_id {
            self.sessions.remove(id);
            info!("session {id} signed out");
        }
    }

    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.get(session_id)
    }

    pub async fn saved_items(&self, username: &str) -> Result<SavedList> {
        self.backend
            .saved_for_user(username)
            .await
            .map_err(Error::from)?
            .ok_or(Error::NotFound)
    }

    pub async fn save_items(&self, username: &str, items: SavedList) -> Result<()> {
        self.backend
            .replace_saved(username, &items)
            .await
            .map_err(Error::from)?;

        info!("{username} saved {} items", items.len());

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Arc;

    use crate::backend;

    async fn create_sync() -> Arc<RecipeSync> {
        let db = backend::test::create_db().await;
        Arc::new(RecipeSync::new(Backend(db)))
    }

    fn signup(username: &str, password: &str, confirm: &str) -> SignUp {
        SignUp {
            username: username.into(),
            password: password.into(),
            password_confirm: confirm.into(),
        }
    }

    fn list(items: &[&str]) -> SavedList {
        SavedList(items.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn signup_rejects_bad_username_characters() {
        let sync = create_sync().await;

        for username in ["al ice", "alice!", "ali/ce", "café"] {
            let err = sync
                .sign_up(Role::User, &signup(username, "pw1", "pw1"))
                .await
                .unwrap_err();
            assert_eq!(err, Error::InvalidCharacters);

            // nothing written
            assert_eq!(sync.saved_items(username).await.unwrap_err(), Error::NotFound);
            assert_eq!(
                sync.sign_in(username, "pw1").await.unwrap_err(),
                Error::InvalidCredentials,
            );
        }
    }

    #[tokio::test]
    async fn signup_mismatch_beats_password_charset() {
        let sync = create_sync().await;

        // mismatch wins regardless of the password's character validity
        let err = sync
            .sign_up(Role::User, &signup("alice", "p w!", "other"))
            .await
            .unwrap_err();
        assert_eq!(err, Error::PasswordMismatch);

        let err = sync
            .sign_up(Role::User, &signup("alice", "pw1", "pw2"))
            .await
            .unwrap_err();
        assert_eq!(err, Error::PasswordMismatch);

        // matching but invalid password is still rejected
        let err = sync
            .sign_up(Role::User, &signup("alice", "p w!", "p w!"))
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidCharacters);

        assert_eq!(sync.saved_items("alice").await.unwrap_err(), Error::NotFound);
    }

    #[tokio::test]
    async fn signup_username_unique_across_partitions() {
        let sync = create_sync().await;

        sync.sign_up(Role::User, &signup("alice", "pw1", "pw1"))
            .await
            .unwrap();

        let err = sync
            .sign_up(Role::Admin, &signup("alice", "pw2", "pw2"))
            .await
            .unwrap_err();
        assert_eq!(err, Error::UsernameTaken);

        // alice keeps her original role and password
        let (_, session) = sync.sign_in("alice", "pw1").await.unwrap();
        assert!(!session.is_admin);
    }

    #[tokio::test]
    async fn signup_initialises_empty_saved_list() {
        let sync = create_sync().await;

        sync.sign_up(Role::User, &signup("bob", "x1", "x1"))
            .await
            .unwrap();

        assert_eq!(sync.saved_items("bob").await.unwrap(), SavedList::empty());
    }

    #[tokio::test]
    async fn save_replaces_not_merges() {
        let sync = create_sync().await;

        sync.sign_up(Role::User, &signup("bob", "x1", "x1"))
            .await
            .unwrap();

        sync.save_items("bob", list(&["old-stew"])).await.unwrap();
        sync.save_items("bob", list(&["pasta-1", "pasta-2", "dal-3"]))
            .await
            .unwrap();

        assert_eq!(
            sync.saved_items("bob").await.unwrap(),
            list(&["pasta-1", "pasta-2", "dal-3"]),
        );
    }

    #[tokio::test]
    async fn signin_snapshots_saved_list() {
        let sync = create_sync().await;

        sync.sign_up(Role::User, &signup("bob", "x1", "x1"))
            .await
            .unwrap();
        sync.save_items("bob", list(&["pasta-1"])).await.unwrap();

        let (session_id, session) = sync.sign_in("bob", "x1").await.unwrap();
        assert_eq!(session.username, "bob");
        assert!(!session.is_admin);
        assert_eq!(session.saved, list(&["pasta-1"]));

        // the snapshot is readable back through the registry
        let held = sync.session(&session_id).unwrap();
        assert_eq!(held.saved, list(&["pasta-1"]));
    }

    #[tokio::test]
    async fn signin_wrong_password_leaves_no_session() {
        let sync = create_sync().await;

        sync.sign_up(Role::User, &signup("bob", "x1", "x1"))
            .await
            .unwrap();

        let err = sync.sign_in("bob", "x2").await.unwrap_err();
        assert_eq!(err, Error::InvalidCredentials);

        let err = sync.sign_in("nobody", "x1").await.unwrap_err();
        assert_eq!(err, Error::InvalidCredentials);

        assert_eq!(sync.sessions.len(), 0);
    }

    #[tokio::test]
    async fn admin_signin_sets_role() {
        let sync = create_sync().await;

        sync.sign_up(Role::Admin, &signup("carol", "pw", "pw"))
            .await
            .unwrap();

        let (_, session) = sync.sign_in("carol", "pw").await.unwrap();
        assert!(session.is_admin);
    }

    #[tokio::test]
    async fn signout_is_idempotent() {
        let sync = create_sync().await;

        sync.sign_up(Role::User, &signup("bob", "x1", "x1"))
            .await
            .unwrap();

        let (session_id, _) = sync.sign_in("bob", "x1").await.unwrap();

        sync.sign_out(Some(session_id));
        assert!(sync.session(&session_id).is_none());

        // already signed out, and no cookie at all: both no-ops
        sync.sign_out(Some(session_id));
        sync.sign_out(None);
    }

    #[tokio::test]
    async fn concurrent_signup_has_one_winner() {
        let sync = create_sync().await;

        let attempt = |sync: Arc<RecipeSync>| {
            tokio::spawn(async move {
                sync.sign_up(Role::User, &signup("dave", "pw", "pw")).await
            })
        };

        let a = attempt(Arc::clone(&sync));
        let b = attempt(Arc::clone(&sync));

        let a = a.await.unwrap();
        let b = b.await.unwrap();

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(a.err().or(b.err()), Some(Error::UsernameTaken));

        // exactly one credential row, in the right partition
        let (_, session) = sync.sign_in("dave", "pw").await.unwrap();
        assert!(!session.is_admin);
    }
}
