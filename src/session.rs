use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::auth::SessionId;
use crate::saved::SavedList;

/// One signed-in caller: identity, role and the saved-list snapshot
/// taken at sign-in time. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub username: String,
    pub is_admin: bool,
    pub saved: SavedList,
}

/// In-process session registry, keyed by the id handed to the caller
/// as a cookie. Each caller gets its own entry; there is no notion of
/// a "current" user at process scope.
#[derive(Debug, Default)]
pub struct Sessions(Mutex<HashMap<SessionId, Session>>);

impl Sessions {
    pub fn insert(&self, id: SessionId, session: Session) {
        self.lock().insert(id, session);
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    /// No-op if the session is already gone.
    pub fn remove(&self, id: &SessionId) {
        self.lock().remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Session>> {
        self.0.lock().expect("session registry poisoned")
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
