use std::future::Future;
use std::path::{Path, PathBuf};

use log::{error, info};
use sqlx::{
    migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Pool, Sqlite, Transaction,
};

use crate::saved::{SavedList, SavedRow};
use crate::time::Timestamp;
use crate::user::{Credential, Role};

#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum StoreError {
    /// A row for that username already exists.
    Duplicate,
    /// Connectivity or transaction failure; nothing was applied.
    Unavailable,
}

type Result<T> = std::result::Result<T, StoreError>;

pub struct Backend(pub Pool<Sqlite>);

fn into_sql(path: &Path) -> PathBuf {
    path.join("recipes.db")
}

pub async fn init(data_dir: &Path) {
    let final_path = format!(
        "sqlite://{}",
        into_sql(data_dir).to_str().expect("non utf-8 data")
    );
    match Sqlite::create_database(&final_path).await {
        Ok(()) => {
            info!("Using {}", &final_path);
        }
        Err(e) => {
            let sqlx::Error::Database(db_err) = e else {
                panic!("error creating database: {e}");
            };

            panic!("sql db error: {db_err:?}");
        }
    }
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Self {
        let db_pathbuf = into_sql(data_dir);
        let db_path = db_pathbuf.to_str().expect("non utf-8 data");

        // sqlite has a single writer anyway; one pooled connection
        // keeps concurrent transactions from tripping SQLITE_BUSY
        let connect = || {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(db_path)
        };

        let pool = match connect().await {
            Ok(pool) => pool,
            Err(_err) => {
                init(data_dir).await;
                connect().await.expect("db connection")
            }
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migration");

        Self(pool)
    }
}

impl Backend {
    async fn transact<'t, T, R, F>(&self, transaction: T) -> Result<R>
    where
        T: FnOnce(Transaction<'t, Sqlite>) -> F,
        F: Future<Output = Result<(Transaction<'t, Sqlite>, R)>>,
    {
        let tx = self.0.begin().await.map_err(|e| {
            error!("error beginning transaction: {:?}", e);
            StoreError::Unavailable
        })?;

        let (tx, r) = transaction(tx).await?;

        tx.commit().await.map_err(|e| {
            error!("error committing transaction: {:?}", e);
            StoreError::Unavailable
        })?;

        Ok(r)
    }
}

impl Backend {
    pub async fn find_credential(
        &self,
        role: Role,
        username: &str,
    ) -> std::result::Result<Credential, FindError> {
        let select = format!(
            "SELECT username, pwhash FROM {} WHERE username = ?",
            role.table()
        );

        sqlx::query_as::<_, Credential>(&select)
            .bind(username)
            .fetch_one(&self.0)
            .await
            .map_err(|e| {
                if matches!(e, sqlx::Error::RowNotFound) {
                    FindError::NotFound
                } else {
                    error!("error selecting credential: {e:?}");
                    FindError::Internal
                }
            })
    }

    /// Creates the credential row and the empty saved-list row as one
    /// unit: the cross-partition uniqueness check, both inserts and
    /// the rollback on failure all happen inside a single transaction.
    pub async fn create_account(&self, role: Role, username: &str, pwhash: &str) -> Result<()> {
        let now = Timestamp::now().map_err(|()| StoreError::Unavailable)?;
        let empty = SavedList::empty()
            .to_column()
            .map_err(|()| StoreError::Unavailable)?;

        self.transact(|mut tx| async move {
            if username_taken(&mut tx, username).await? {
                return Err(StoreError::Duplicate);
            }

            let insert = format!(
                "INSERT INTO {} (username, pwhash) VALUES (?, ?)",
                role.table()
            );
            sqlx::query(&insert)
                .bind(username)
                .bind(pwhash)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::Duplicate
                    } else {
                        error!("error inserting credential: {e:?}");
                        StoreError::Unavailable
                    }
                })?;

            sqlx::query("INSERT INTO saved (username, items, modified) VALUES (?, ?, ?)")
                .bind(username)
                .bind(&empty)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("error initialising saved list: {e:?}");
                    StoreError::Unavailable
                })?;

            Ok((tx, ()))
        })
        .await
    }
}

impl Backend {
    pub async fn saved_for_user(&self, username: &str) -> Result<Option<SavedList>> {
        let row = sqlx::query_as::<_, SavedRow>(
            "SELECT username, items, modified FROM saved WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting saved list: {e:?}");
            StoreError::Unavailable
        })?;

        match row {
            Some(row) => SavedList::from_column(&row.items)
                .map(Some)
                .map_err(|()| StoreError::Unavailable),
            None => Ok(None),
        }
    }

    /// Replace-not-merge: any existing row goes, the new value lands,
    /// both inside one transaction.
    pub async fn replace_saved(&self, username: &str, list: &SavedList) -> Result<()> {
        let items = list.to_column().map_err(|()| StoreError::Unavailable)?;
        let now = Timestamp::now().map_err(|()| StoreError::Unavailable)?;

        self.transact(|mut tx| async move {
            sqlx::query("DELETE FROM saved WHERE username = ?")
                .bind(username)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("error deleting saved list: {e:?}");
                    StoreError::Unavailable
                })?;

            sqlx::query("INSERT INTO saved (username, items, modified) VALUES (?, ?, ?)")
                .bind(username)
                .bind(&items)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("error inserting saved list: {e:?}");
                    StoreError::Unavailable
                })?;

            Ok((tx, ()))
        })
        .await?;

        info!("{username} saved list replaced, timestamp {now}");

        Ok(())
    }
}

/// Existence in EITHER partition counts: one identity, one role.
async fn username_taken(tx: &mut Transaction<'_, Sqlite>, username: &str) -> Result<bool> {
    for role in [Role::User, Role::Admin] {
        let select = format!("SELECT username FROM {} WHERE username = ?", role.table());

        let found = sqlx::query(&select)
            .bind(username)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                error!("error checking username: {e:?}");
                StoreError::Unavailable
            })?;

        if found.is_some() {
            return Ok(true);
        }
    }

    Ok(false)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}
