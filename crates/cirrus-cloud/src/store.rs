//! Persistent infrastructure store
//!
//! Small SQL store used by the owning layer to persist infrastructure and VM
//! records. Connectors never touch it.
//!
//! A locked database is not waited on inside SQLite: the connection is
//! dropped, the store sleeps through its [`Sleeper`], reconnects and runs the
//! statement again, up to a bounded number of attempts.

use crate::retry::{Sleeper, TokioSleeper};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params_from_iter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store is not connected")]
    NotConnected,

    #[error("Database still locked after {0} attempts")]
    Locked(u32),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Unsupported store backend: {0}")]
    UnsupportedBackend(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Row as returned by [`Store::select`]
pub type Row = Vec<Value>;

enum Attempt<T> {
    Done(T),
    Busy,
}

pub struct Store {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
    max_retries: u32,
    retry_sleep: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl Store {
    /// Opens the store named by `url`
    ///
    /// Accepts `sqlite://<path>`, `file://<path>` or a bare path.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Self::connect_with(url, &cirrus_config::StoreSettings::default(), Arc::new(TokioSleeper)).await
    }

    pub async fn from_settings(settings: &cirrus_config::StoreSettings) -> StoreResult<Self> {
        Self::connect_with(&settings.url, settings, Arc::new(TokioSleeper)).await
    }

    pub async fn connect_with(
        url: &str,
        settings: &cirrus_config::StoreSettings,
        sleeper: Arc<dyn Sleeper>,
    ) -> StoreResult<Self> {
        let path = parse_url(url)?;
        let store = Self {
            path,
            conn: Arc::new(Mutex::new(None)),
            max_retries: settings.max_retries.max(1),
            retry_sleep: settings.retry_sleep(),
            sleeper,
        };
        store.reconnect().await?;
        tracing::debug!("Opened store at {}", store.path.display());
        Ok(store)
    }

    /// Runs a statement that returns no rows
    pub async fn execute(&self, sql: &str, args: Vec<Value>) -> StoreResult<usize> {
        let sql = translate(sql);
        self.with_retry(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            Ok(stmt.execute(params_from_iter(args.iter()))?)
        })
        .await
    }

    /// Runs a query and fetches every row
    pub async fn select(&self, sql: &str, args: Vec<Value>) -> StoreResult<Vec<Row>> {
        let sql = translate(sql);
        self.with_retry(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns = stmt.column_count();
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                (0..columns).map(|i| row.get::<_, Value>(i)).collect()
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<Row>>>()?)
        })
        .await
    }

    pub async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        let rows = self
            .select(
                "select name from sqlite_master where type='table' and name = %s",
                vec![Value::Text(table.to_string())],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Closes the connection; returns false when it was not open
    pub fn close(&self) -> bool {
        match self.conn.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(_) => false,
        }
    }

    async fn reconnect(&self) -> StoreResult<()> {
        let path = self.path.clone();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let connection = Connection::open(&path)?;
            connection.busy_timeout(Duration::ZERO)?;
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Task(e.to_string()))?;
            *guard = Some(connection);
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn with_retry<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> StoreResult<T> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        for attempt in 1..=self.max_retries {
            let conn = self.conn.clone();
            let op = op.clone();
            let outcome = tokio::task::spawn_blocking(move || -> StoreResult<Attempt<T>> {
                let guard = conn
                    .lock()
                    .map_err(|e| StoreError::Task(e.to_string()))?;
                let connection = guard.as_ref().ok_or(StoreError::NotConnected)?;
                match op(connection) {
                    Ok(value) => Ok(Attempt::Done(value)),
                    Err(StoreError::Sqlite(e)) if is_locked(&e) => Ok(Attempt::Busy),
                    Err(StoreError::Sqlite(e)) if is_constraint(&e) => {
                        Err(StoreError::Integrity(e.to_string()))
                    }
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

            match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Busy if attempt < self.max_retries => {
                    tracing::warn!(
                        attempt = attempt,
                        "Database is locked, reconnecting in {:?}",
                        self.retry_sleep
                    );
                    self.close();
                    self.sleeper.sleep(self.retry_sleep).await;
                    self.reconnect().await?;
                }
                Attempt::Busy => break,
            }
        }
        Err(StoreError::Locked(self.max_retries))
    }
}

fn parse_url(url: &str) -> StoreResult<PathBuf> {
    match url.split_once("://") {
        Some(("sqlite", path)) | Some(("file", path)) => Ok(PathBuf::from(path)),
        Some((scheme, _)) => Err(StoreError::UnsupportedBackend(scheme.to_string())),
        None => Ok(PathBuf::from(url)),
    }
}

/// Rewrites MySQL-flavored placeholders and functions for SQLite
fn translate(sql: &str) -> String {
    sql.replace("%s", "?").replace("now()", "date('now')")
}

fn is_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}
