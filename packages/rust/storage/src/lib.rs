//! Document store for ingested records.
//!
//! [`DocumentStore`] is the narrow interface the ingestion core depends on:
//! list the distinct values of a field in a collection, and bulk-insert
//! records. Two implementations ship here:
//! - [`Storage`]: libSQL, either a local file or a hosted database
//! - [`MemoryStore`]: in-process, for tests

mod memory;
mod migrations;

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use cryptfeed_shared::{
    CollectionName, CryptfeedError, ID_FIELD, Record, RecordId, Result, StoreTarget,
};
use libsql::{Connection, Database, params};

pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Collection-oriented document store used by the ingestion core.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Distinct values of `field` across all records in `collection`.
    ///
    /// Records lacking the field, or holding a non-scalar value in it,
    /// contribute nothing. An unknown collection yields an empty set.
    async fn distinct(&self, collection: &CollectionName, field: &str) -> Result<HashSet<RecordId>>;

    /// Insert all `records` into `collection`, returning how many were written.
    async fn insert_many(&self, collection: &CollectionName, records: &[Record]) -> Result<usize>;

    /// Number of records stored in `collection`.
    async fn count(&self, collection: &CollectionName) -> Result<u64>;

    /// Every collection holding at least one record.
    async fn collections(&self) -> Result<Vec<CollectionName>>;
}

/// Field names usable in a JSON path: ASCII alphanumerics and `_`.
fn check_field_name(field: &str) -> Result<()> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CryptfeedError::validation(format!(
            "invalid field name '{field}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Storage (libSQL)
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

/// One row of the ingestion run history.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub summary_json: Option<String>,
}

impl Storage {
    /// Open whichever store `target` points at.
    pub async fn connect(target: &StoreTarget) -> Result<Self> {
        match target {
            StoreTarget::Local(path) => Self::open(path).await,
            StoreTarget::Remote { url, auth_token } => Self::open_remote(url, auth_token).await,
        }
    }

    /// Open or create a local database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CryptfeedError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        Self::from_database(db).await
    }

    /// Open a hosted libSQL database.
    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| CryptfeedError::Storage(format!("{url}: {e}")))?;

        Self::from_database(db).await
    }

    /// Open a throwaway in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CryptfeedError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Document lookups
    // -----------------------------------------------------------------------

    /// Fetch one stored record by identifier.
    #[cfg(test)]
    async fn get_document(
        &self,
        collection: &CollectionName,
        id: &RecordId,
    ) -> Result<Option<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body_json FROM documents
                 WHERE collection = ?1 AND article_id = ?2
                 ORDER BY id LIMIT 1",
                params![collection.as_str(), id.as_str()],
            )
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let body: String = row
                    .get(0)
                    .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
                let record = serde_json::from_str(&body)
                    .map_err(|e| CryptfeedError::Storage(format!("corrupt document {id}: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(CryptfeedError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of an ingestion run. Returns the run ID.
    pub async fn begin_run(&self) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO ingest_runs (started_at) VALUES (?1)",
                params![now.as_str()],
            )
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Mark a run finished and attach its summary.
    pub async fn finish_run(&self, run_id: i64, summary_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE ingest_runs SET finished_at = ?1, summary_json = ?2 WHERE id = ?3",
                params![now.as_str(), summary_json, run_id],
            )
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
        Ok(())
    }

    /// The most recently started run, if any.
    pub async fn last_run(&self) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, summary_json
                 FROM ingest_runs ORDER BY id DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(RunRecord {
                id: row
                    .get::<i64>(0)
                    .map_err(|e| CryptfeedError::Storage(e.to_string()))?,
                started_at: row
                    .get::<String>(1)
                    .map_err(|e| CryptfeedError::Storage(e.to_string()))?,
                finished_at: row.get::<String>(2).ok(),
                summary_json: row.get::<String>(3).ok(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(CryptfeedError::Storage(e.to_string())),
        }
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn distinct(&self, collection: &CollectionName, field: &str) -> Result<HashSet<RecordId>> {
        let mut rows = if field == ID_FIELD {
            self.conn
                .query(
                    "SELECT DISTINCT article_id FROM documents WHERE collection = ?1",
                    params![collection.as_str()],
                )
                .await
        } else {
            check_field_name(field)?;
            let path = format!("$.{field}");
            self.conn
                .query(
                    "SELECT DISTINCT json_extract(body_json, ?2) FROM documents
                     WHERE collection = ?1",
                    params![collection.as_str(), path.as_str()],
                )
                .await
        }
        .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        let mut ids = HashSet::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?
        {
            let value = row
                .get_value(0)
                .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
            if let Some(id) = sql_value_to_id(value) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    async fn insert_many(&self, collection: &CollectionName, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();

        // Dropping the transaction on an early return rolls it back.
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        for record in records {
            let body = serde_json::to_string(record)
                .map_err(|e| CryptfeedError::Storage(format!("serialize {}: {e}", record.id())))?;
            tx.execute(
                "INSERT INTO documents (collection, article_id, body_json, inserted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    collection.as_str(),
                    record.id().as_str(),
                    body.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
        Ok(records.len())
    }

    async fn count(&self, collection: &CollectionName) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection.as_str()],
            )
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let n: i64 = row
                    .get(0)
                    .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
                Ok(n.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(CryptfeedError::Storage(e.to_string())),
        }
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT collection FROM documents ORDER BY collection",
                params![],
            )
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CryptfeedError::Storage(e.to_string()))?
        {
            let name: String = row
                .get(0)
                .map_err(|e| CryptfeedError::Storage(e.to_string()))?;
            match CollectionName::new(name) {
                Ok(name) => results.push(name),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable collection name"),
            }
        }
        Ok(results)
    }
}

/// Map a SQL scalar onto the canonical identifier form.
fn sql_value_to_id(value: libsql::Value) -> Option<RecordId> {
    match value {
        libsql::Value::Text(s) => RecordId::from_value(&serde_json::Value::String(s)),
        libsql::Value::Integer(n) => Some(RecordId::from(n)),
        libsql::Value::Real(f) => serde_json::Number::from_f64(f)
            .and_then(|n| RecordId::from_value(&serde_json::Value::Number(n))),
        libsql::Value::Null | libsql::Value::Blob(_) => None,
    }
}
