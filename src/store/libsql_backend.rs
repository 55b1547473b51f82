//! libSQL backend for the assignment store. Supports local file and
//! in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::TaskId;
use crate::store::migrations;
use crate::store::traits::{AssignmentRecord, AssignmentStore};

/// libSQL assignment store.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlAssignmentStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlAssignmentStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Assignment store opened");
        Ok(store)
    }

    /// In-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Parse an RFC 3339 or SQLite datetime string.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_record(row: &libsql::Row) -> Result<AssignmentRecord, libsql::Error> {
    let task_id: i64 = row.get(0)?;
    let assigned_user: String = row.get(1)?;
    let index: i64 = row.get(2)?;
    let visible: i64 = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(AssignmentRecord {
        task_id: TaskId(task_id),
        assigned_user,
        index: i32::try_from(index).unwrap_or(-1),
        visible: visible != 0,
        updated_at: parse_datetime(&updated_at),
    })
}

#[async_trait]
impl AssignmentStore for LibSqlAssignmentStore {
    async fn read_last_known(
        &self,
        task_id: TaskId,
    ) -> Result<Option<AssignmentRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT task_id, assigned_user, sequence_index, visible, updated_at
                 FROM assignments WHERE task_id = ?1",
                params![task_id.0],
            )
            .await
            .map_err(|e| StoreError::Query(format!("read_last_known: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_record(&row).map_err(|e| {
                    StoreError::Serialization(format!("read_last_known row parse: {e}"))
                })?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("read_last_known: {e}"))),
        }
    }

    async fn upsert(&self, record: &AssignmentRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO assignments (task_id, assigned_user, sequence_index, visible, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task_id) DO UPDATE SET
                    assigned_user = excluded.assigned_user,
                    sequence_index = excluded.sequence_index,
                    visible = excluded.visible,
                    updated_at = excluded.updated_at",
                params![
                    record.task_id.0,
                    record.assigned_user.clone(),
                    i64::from(record.index),
                    i64::from(record.visible),
                    record.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert: {e}")))?;

        debug!(task_id = %record.task_id, user = %record.assigned_user, "Assignment stored");
        Ok(())
    }

    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM assignments WHERE task_id = ?1",
                params![task_id.0],
            )
            .await
            .map_err(|e| StoreError::Query(format!("delete: {e}")))?;
        Ok(())
    }
}
