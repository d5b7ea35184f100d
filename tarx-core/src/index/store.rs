use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;

use crate::config::ArchiveConfig;
use crate::domain::{FileRecord, PackedFile, TarRow, tar_index};
use crate::error::{Result, TarxError};
use crate::util::timestamp;

/// Recorded container sizes by name, most recent row first.
pub type TarSizes = HashMap<String, Vec<u64>>;

const FILE_COLUMNS: &str = "id, name, size, mtime, md5, tar, offset";

/// The per-archive SQLite index.
pub struct IndexStore {
    conn: Connection,
    path: PathBuf,
}

struct RawFileRow {
    id: i64,
    name: String,
    size: i64,
    mtime: String,
    md5: Option<String>,
    tar: String,
    offset: i64,
}

impl RawFileRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            size: row.get(2)?,
            mtime: row.get(3)?,
            md5: row.get(4)?,
            tar: row.get(5)?,
            offset: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<FileRecord> {
        Ok(FileRecord {
            id: self.id,
            size: non_negative(self.size, "size", &self.name)?,
            offset: non_negative(self.offset, "offset", &self.name)?,
            mtime: timestamp::parse(&self.mtime)?,
            name: self.name,
            md5: self.md5,
            tar: self.tar,
        })
    }
}

fn non_negative(v: i64, column: &str, name: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| TarxError::Format(format!("negative {column} {v} for {name}")))
}

fn to_sql_int(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| TarxError::Format(format!("value {v} does not fit the index")))
}

impl IndexStore {
    /// Create a fresh index with the `config` and `files` tables.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an existing index; never creates the file.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(TarxError::Config(format!(
                "index database {} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (arg TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE IF NOT EXISTS files (
                 id INTEGER PRIMARY KEY,
                 name TEXT,
                 size INTEGER,
                 mtime TIMESTAMP,
                 md5 TEXT,
                 tar TEXT,
                 offset INTEGER
             );",
        )?;
        Ok(())
    }

    pub fn create_tars_table(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tars (
                 id INTEGER PRIMARY KEY,
                 name TEXT,
                 size INTEGER,
                 md5 TEXT
             );",
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn has_table(&self, table: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ---- config ----

    pub fn write_config(&self, cfg: &ArchiveConfig) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, value) in cfg.to_rows() {
            tx.execute(
                "INSERT OR REPLACE INTO config (arg, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn read_config(&self) -> Result<ArchiveConfig> {
        let mut stmt = self.conn.prepare("SELECT arg, value FROM config")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ArchiveConfig::from_rows(rows)
    }

    // ---- files ----

    /// Append one container's rows in a single transaction.
    pub fn insert_files(&self, rows: &[PackedFile]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO files (name, size, mtime, md5, tar, offset)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in rows {
                stmt.execute(params![
                    r.name,
                    to_sql_int(r.size)?,
                    timestamp::format_seconds(r.mtime)?,
                    r.md5,
                    r.tar,
                    to_sql_int(r.offset)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query_files(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(args, RawFileRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(RawFileRow::into_record).collect()
    }

    pub fn all_files(&self) -> Result<Vec<FileRecord>> {
        self.query_files(&format!("SELECT {FILE_COLUMNS} FROM files ORDER BY id"), params![])
    }

    /// Rows whose name or container matches any of the glob patterns.
    pub fn select_glob(&self, patterns: &[String]) -> Result<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE name GLOB ?1 OR tar GLOB ?1 ORDER BY id"
        );
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for pattern in patterns {
            for rec in self.query_files(&sql, params![pattern])? {
                if seen.insert(rec.id) {
                    out.push(rec);
                }
            }
        }
        Ok(out)
    }

    pub fn select_by_tars(&self, tars: &[String]) -> Result<Vec<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE tar = ?1 ORDER BY id");
        let mut out = Vec::new();
        for tar in tars {
            out.extend(self.query_files(&sql, params![tar])?);
        }
        Ok(out)
    }

    pub fn distinct_tars(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT tar FROM files")?;
        let mut tars = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tars.sort_by_key(|t| (tar_index(t), t.clone()));
        Ok(tars)
    }

    /// Highest container index referenced by any row.
    pub fn max_tar_index(&self) -> Result<Option<u64>> {
        let mut max = None;
        for tar in self.distinct_tars()? {
            match tar_index(&tar) {
                Some(i) => max = max.max(Some(i)),
                None => debug!("ignoring unparsable container name {tar}"),
            }
        }
        Ok(max)
    }

    // ---- tars ----

    /// No-op when the archive was created without the `tars` table.
    pub fn insert_tar(&self, name: &str, size: u64, md5: Option<&str>) -> Result<()> {
        if !self.has_table("tars")? {
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO tars (name, size, md5) VALUES (?1, ?2, ?3)",
            params![name, to_sql_int(size)?, md5],
        )?;
        Ok(())
    }

    pub fn tar_rows(&self) -> Result<Vec<TarRow>> {
        if !self.has_table("tars")? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, size, md5 FROM tars ORDER BY id")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(id, name, size, md5)| {
                Ok(TarRow {
                    id,
                    size: non_negative(size, "size", &name)?,
                    name,
                    md5,
                })
            })
            .collect()
    }

    pub fn tar_sizes(&self) -> Result<TarSizes> {
        let mut sizes = TarSizes::new();
        // tar_rows is ascending by id; newest ends up first
        for row in self.tar_rows()?.into_iter().rev() {
            sizes.entry(row.name).or_default().push(row.size);
        }
        Ok(sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn packed(name: &str, tar: &str, offset: u64) -> PackedFile {
        PackedFile {
            name: name.to_string(),
            size: 11,
            mtime: datetime!(2024-03-01 12:30:05 UTC),
            md5: Some("0".repeat(32)),
            tar: tar.to_string(),
            offset,
        }
    }

    #[test]
    fn inserted_rows_come_back_with_ids() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .insert_files(&[packed("a.txt", "000000.tar", 0), packed("b.txt", "000000.tar", 1024)])
            .unwrap();
        let rows = store.all_files().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[1].offset, 1024);
        assert_eq!(rows[1].mtime, datetime!(2024-03-01 12:30:05 UTC));
    }

    #[test]
    fn glob_matches_names_or_containers_once() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .insert_files(&[
                packed("dir/a.txt", "000000.tar", 0),
                packed("dir/b.nc", "000000.tar", 1024),
                packed("c.txt", "000001.tar", 0),
            ])
            .unwrap();
        let hits = store
            .select_glob(&["*.txt".to_string(), "dir/*".to_string()])
            .unwrap();
        assert_eq!(hits.len(), 3);
        let by_tar = store.select_glob(&["000001*".to_string()]).unwrap();
        assert_eq!(by_tar.len(), 1);
        assert_eq!(by_tar[0].name, "c.txt");
    }

    #[test]
    fn max_index_is_numeric_not_lexical() {
        let store = IndexStore::open_in_memory().unwrap();
        assert_eq!(store.max_tar_index().unwrap(), None);
        store
            .insert_files(&[packed("a", "000009.tar", 0), packed("b", "00000a.tar", 0)])
            .unwrap();
        assert_eq!(store.max_tar_index().unwrap(), Some(10));
        assert_eq!(store.distinct_tars().unwrap(), vec!["000009.tar", "00000a.tar"]);
    }

    #[test]
    fn tars_table_is_optional() {
        let store = IndexStore::open_in_memory().unwrap();
        store.insert_tar("000000.tar", 10240, None).unwrap();
        assert!(store.tar_sizes().unwrap().is_empty());

        store.create_tars_table().unwrap();
        store.insert_tar("000000.tar", 10240, None).unwrap();
        store.insert_tar("000000.tar", 20480, None).unwrap();
        assert_eq!(store.tar_sizes().unwrap()["000000.tar"], vec![20480, 10240]);
    }

    #[test]
    fn config_survives_a_round_trip() {
        let store = IndexStore::open_in_memory().unwrap();
        let cfg = ArchiveConfig {
            path: Some("/data".into()),
            hpss: Some("none".into()),
            maxsize: Some(4096),
            keep: Some(false),
        };
        store.write_config(&cfg).unwrap();
        assert_eq!(store.read_config().unwrap(), cfg);
    }
}
