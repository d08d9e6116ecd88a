//! Async-safe SQLite access.
//!
//! `rusqlite::Connection` is not `Sync`, so the store wraps it in
//! `Arc<Mutex<>>` and runs every operation on the blocking pool. One store
//! handle means one writer; readers clone the same handle.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::task::spawn_blocking;

use crate::error::EngineError;
use crate::error::Result;

/// Shared SQLite connection with async `query`/`transaction` helpers.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database and apply the standard pragmas.
    pub fn open(path: &Path) -> Result<Self> {
        let path_buf = path.to_path_buf();
        let conn = Connection::open(path).map_err(|e| EngineError::Sqlite {
            path: path_buf.clone(),
            cause: e.to_string(),
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| EngineError::Sqlite {
            path: path_buf.clone(),
            cause: format!("pragma init failed: {e}"),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_buf,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a closure on the connection synchronously.
    ///
    /// For construction-time work (schema setup, version checks) where no
    /// runtime is involved and the mutex is uncontended.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.conn.lock().map_err(|_| EngineError::Sqlite {
            path: self.path.clone(),
            cause: "mutex poisoned".to_string(),
        })?;
        f(&guard)
    }

    /// Run a read/write closure on the blocking pool.
    pub async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "Mutex poisoned, recovering");
                let inner = poisoned.into_inner();
                if !inner.is_autocommit() {
                    if let Err(e) = inner.execute_batch("ROLLBACK") {
                        tracing::error!(path = %path.display(), error = %e,
                            "Rollback after poisoning recovery failed");
                    }
                }
                inner
            });
            f(&guard)
        })
        .await
        .map_err(|e| EngineError::Sqlite {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    /// Run a closure inside a transaction; commit on `Ok`, roll back on
    /// `Err` or panic.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "Mutex poisoned in transaction, recovering");
                let inner = poisoned.into_inner();
                if !inner.is_autocommit() {
                    if let Err(e) = inner.execute_batch("ROLLBACK") {
                        tracing::error!(path = %path.display(), error = %e,
                            "Rollback after poisoning recovery failed");
                    }
                }
                inner
            });

            let tx = guard.transaction().map_err(|e| EngineError::Sqlite {
                path: path.clone(),
                cause: format!("transaction start failed: {e}"),
            })?;
            let result = f(&tx)?;
            tx.commit().map_err(|e| EngineError::Sqlite {
                path: path.clone(),
                cause: format!("transaction commit failed: {e}"),
            })?;
            Ok(result)
        })
        .await
        .map_err(|e| EngineError::Sqlite {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }
}

/// Extension trait mapping `QueryReturnedNoRows` to `None`.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
