use std::fmt;

use rusqlite::{OptionalExtension, params};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::domain::tar_index;
use crate::error::{Result, TarxError};
use crate::index::store::IndexStore;
use crate::util::timestamp;

const TABLE: &str = "checkpoints";

/// Operations that record progress checkpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Update,
    Check,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Update => "update",
            Operation::Check => "check",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    InProgress,
    Completed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            other => Err(TarxError::Format(format!("unknown checkpoint status {other:?}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: i64,
    pub operation: String,
    pub last_tar: Option<String>,
    pub last_tar_index: Option<u64>,
    pub timestamp: OffsetDateTime,
    pub files_processed: u64,
    pub total_files: u64,
    pub status: Status,
}

/// Append-only progress log in the `checkpoints` table.
///
/// Archives created before checkpoints existed have no such table; every
/// read or update is then a no-op and only `save` creates it.
pub struct CheckpointManager<'a> {
    store: &'a IndexStore,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self { store }
    }

    fn table_exists(&self) -> Result<bool> {
        let exists = self.store.has_table(TABLE)?;
        if !exists {
            debug!("checkpoints table does not exist; this is normal for older archives");
        }
        Ok(exists)
    }

    fn create_table(&self) -> Result<()> {
        self.store.connection().execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 operation TEXT NOT NULL,
                 last_tar TEXT,
                 last_tar_index INTEGER,
                 timestamp DATETIME NOT NULL,
                 files_processed INTEGER,
                 total_files INTEGER,
                 status TEXT
             );",
        )?;
        Ok(())
    }

    pub fn save(
        &self,
        op: Operation,
        last_tar: &str,
        files_processed: u64,
        total_files: u64,
        status: Status,
    ) -> Result<()> {
        self.create_table()?;
        let index = tar_index(last_tar);
        if index.is_none() {
            warn!("could not parse container index from {last_tar}");
        }
        let index = index.and_then(|i| i64::try_from(i).ok());
        self.store.connection().execute(
            "INSERT INTO checkpoints
                 (operation, last_tar, last_tar_index, timestamp, files_processed, total_files, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                op.as_str(),
                last_tar,
                index,
                timestamp::format_micros(OffsetDateTime::now_utc())?,
                files_processed as i64,
                total_files as i64,
                status.as_str(),
            ],
        )?;
        debug!(
            "checkpoint saved: {op} - {last_tar} ({files_processed}/{total_files}) - {}",
            status.as_str()
        );
        Ok(())
    }

    /// Most recent checkpoint for `op`, ties going to the later row.
    pub fn load_latest(&self, op: Operation) -> Result<Option<Checkpoint>> {
        if !self.table_exists()? {
            return Ok(None);
        }
        let raw = self
            .store
            .connection()
            .query_row(
                "SELECT id, operation, last_tar, last_tar_index, timestamp,
                        files_processed, total_files, status
                 FROM checkpoints
                 WHERE operation = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT 1",
                params![op.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, operation, last_tar, index, ts, processed, total, status)) = raw else {
            debug!("no checkpoint found for operation {op}");
            return Ok(None);
        };
        let ckpt = Checkpoint {
            id,
            operation,
            last_tar,
            last_tar_index: index.and_then(|i| u64::try_from(i).ok()),
            timestamp: timestamp::parse(&ts)?,
            files_processed: processed.and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
            total_files: total.and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
            status: Status::parse(status.as_deref().unwrap_or("in_progress"))?,
        };
        info!(
            "loaded checkpoint: {op} from {ts} - last container: {}",
            ckpt.last_tar.as_deref().unwrap_or("none")
        );
        Ok(Some(ckpt))
    }

    /// Mark only the latest row for `op` completed.
    pub fn complete(&self, op: Operation) -> Result<()> {
        if !self.table_exists()? {
            return Ok(());
        }
        let changed = self.store.connection().execute(
            "UPDATE checkpoints
             SET status = 'completed', timestamp = ?1
             WHERE id = (
                 SELECT id FROM checkpoints
                 WHERE operation = ?2
                 ORDER BY timestamp DESC, id DESC
                 LIMIT 1
             )",
            params![timestamp::format_micros(OffsetDateTime::now_utc())?, op.as_str()],
        )?;
        if changed > 0 {
            info!("checkpoint completed for operation: {op}");
        }
        Ok(())
    }

    pub fn clear(&self, op: Operation) -> Result<()> {
        if !self.table_exists()? {
            return Ok(());
        }
        let removed = self.store.connection().execute(
            "DELETE FROM checkpoints WHERE operation = ?1",
            params![op.as_str()],
        )?;
        info!("cleared {removed} checkpoint(s) for {op}");
        Ok(())
    }
}

/// Per-container progress recorder handed to the packing and checking loops.
/// Failures to record are logged, never propagated.
pub struct CheckpointWriter<'a> {
    manager: CheckpointManager<'a>,
    op: Operation,
    total_files: u64,
}

impl<'a> CheckpointWriter<'a> {
    pub fn new(store: &'a IndexStore, op: Operation, total_files: u64) -> Self {
        Self {
            manager: CheckpointManager::new(store),
            op,
            total_files,
        }
    }

    pub fn record(&self, last_tar: &str, files_processed: u64) {
        if let Err(e) = self.manager.save(
            self.op,
            last_tar,
            files_processed,
            self.total_files,
            Status::InProgress,
        ) {
            warn!("failed to save {} checkpoint after {last_tar}: {e}", self.op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_is_tolerated() {
        let store = IndexStore::open_in_memory().unwrap();
        let mgr = CheckpointManager::new(&store);
        assert_eq!(mgr.load_latest(Operation::Check).unwrap(), None);
        mgr.complete(Operation::Check).unwrap();
        mgr.clear(Operation::Check).unwrap();
        assert!(!store.has_table(TABLE).unwrap());
    }

    #[test]
    fn latest_row_wins_and_operations_are_separate() {
        let store = IndexStore::open_in_memory().unwrap();
        let mgr = CheckpointManager::new(&store);
        mgr.save(Operation::Check, "000000.tar", 3, 9, Status::InProgress).unwrap();
        mgr.save(Operation::Check, "00000a.tar", 6, 9, Status::InProgress).unwrap();
        mgr.save(Operation::Update, "000001.tar", 1, 1, Status::InProgress).unwrap();

        let latest = mgr.load_latest(Operation::Check).unwrap().unwrap();
        assert_eq!(latest.last_tar.as_deref(), Some("00000a.tar"));
        assert_eq!(latest.last_tar_index, Some(10));
        assert_eq!((latest.files_processed, latest.total_files), (6, 9));
        assert_eq!(latest.status, Status::InProgress);
    }

    #[test]
    fn complete_touches_only_the_latest_row() {
        let store = IndexStore::open_in_memory().unwrap();
        let mgr = CheckpointManager::new(&store);
        mgr.save(Operation::Check, "000000.tar", 1, 2, Status::InProgress).unwrap();
        mgr.save(Operation::Check, "000001.tar", 2, 2, Status::InProgress).unwrap();
        mgr.complete(Operation::Check).unwrap();

        let completed: i64 = store
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE status = 'completed'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(completed, 1);
        let latest = mgr.load_latest(Operation::Check).unwrap().unwrap();
        assert_eq!(latest.status, Status::Completed);
        assert_eq!(latest.last_tar.as_deref(), Some("000001.tar"));
    }

    #[test]
    fn unparsable_container_stores_null_index() {
        let store = IndexStore::open_in_memory().unwrap();
        let mgr = CheckpointManager::new(&store);
        mgr.save(Operation::Update, "bogus", 0, 0, Status::InProgress).unwrap();
        let latest = mgr.load_latest(Operation::Update).unwrap().unwrap();
        assert_eq!(latest.last_tar_index, None);
    }

    #[test]
    fn clear_removes_one_operation_only() {
        let store = IndexStore::open_in_memory().unwrap();
        let mgr = CheckpointManager::new(&store);
        mgr.save(Operation::Check, "000000.tar", 1, 1, Status::InProgress).unwrap();
        mgr.save(Operation::Update, "000000.tar", 1, 1, Status::InProgress).unwrap();
        mgr.clear(Operation::Check).unwrap();
        assert!(mgr.load_latest(Operation::Check).unwrap().is_none());
        assert!(mgr.load_latest(Operation::Update).unwrap().is_some());
    }
}
