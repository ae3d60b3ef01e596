use log::error;
use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Ordered recipe identifiers for one user, stored serialized in a
/// single text column and always replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedList(pub Vec<String>);

#[derive(Debug)]
#[derive(sqlx::FromRow)]
pub struct SavedRow {
    pub username: String,
    pub items: String,
    pub modified: Timestamp,
}

impl SavedList {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_column(&self) -> Result<String, ()> {
        serde_json::to_string(&self.0).map_err(|e| {
            error!("couldn't serialise saved list: {e:?}");
        })
    }

    pub fn from_column(items: &str) -> Result<Self, ()> {
        serde_json::from_str(items).map(Self).map_err(|e| {
            error!("couldn't parse saved list column: {e:?}");
        })
    }
}
