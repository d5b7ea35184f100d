use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;
use tracing::{Level, debug, error, info, trace, warn};

use crate::config::BLOCK_SIZE;
use crate::domain::FileRecord;
use crate::error::{Result, TarxError};
use crate::index::checkpoint::CheckpointWriter;
use crate::index::store::TarSizes;
use crate::transfer::{RetryPolicy, Transfer};
use crate::util::hash_forward::copy_hashed;
use crate::util::timestamp;

#[derive(Clone, Debug)]
pub struct RetrieveOptions {
    /// Materialize files (extract) or only verify them (check).
    pub keep_files: bool,
    /// Where extracted names are rooted.
    pub dest: PathBuf,
    /// Where containers are looked for and fetched to.
    pub cache: PathBuf,
    /// Keep fetched containers once processed.
    pub keep_tars: bool,
    pub retry: RetryPolicy,
    pub error_on_duplicate_tar: bool,
}

/// Sink for per-container output lines.
pub trait Reporter {
    fn emit(&mut self, tar: &str, level: Level, msg: String);

    /// No more output will follow for `tar`.
    fn container_done(&mut self, _tar: &str) {}
}

/// Logs straight through `tracing`.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn emit(&mut self, _tar: &str, level: Level, msg: String) {
        log_at(level, &msg);
    }
}

/// Emit `msg` at a level chosen at run time.
pub fn log_at(level: Level, msg: &str) {
    if level == Level::ERROR {
        error!("{msg}");
    } else if level == Level::WARN {
        warn!("{msg}");
    } else if level == Level::INFO {
        info!("{msg}");
    } else if level == Level::DEBUG {
        debug!("{msg}");
    } else {
        trace!("{msg}");
    }
}

/// Extract or verify `records`, which must be deduplicated and sorted by
/// container and offset. Returns the records that failed.
///
/// Each container is opened once for its run of records. Per-record
/// problems (fetch failures, corrupt headers, hash mismatches) are
/// reported and collected; only a duplicated `tars` row under
/// `error_on_duplicate_tar` aborts.
pub fn extract_files(
    records: &[FileRecord],
    opts: &RetrieveOptions,
    transfer: &dyn Transfer,
    tar_sizes: &TarSizes,
    reporter: &mut dyn Reporter,
    checkpoint: Option<&CheckpointWriter<'_>>,
) -> Result<Vec<FileRecord>> {
    let tars: BTreeSet<&str> = records.iter().map(|r| r.tar.as_str()).collect();
    for tar in tars {
        if tar_sizes.get(tar).is_some_and(|s| s.len() > 1) {
            let msg = format!("multiple tars table entries for {tar}; using the most recent");
            if opts.error_on_duplicate_tar {
                return Err(TarxError::Format(msg));
            }
            reporter.emit(tar, Level::WARN, msg);
        }
    }

    let mut failures = Vec::new();
    let mut processed = 0u64;
    for group in records.chunk_by(|a, b| a.tar == b.tar) {
        let tar = group[0].tar.as_str();
        let path = opts.cache.join(tar);

        match open_container(&path, tar, opts, transfer, tar_sizes) {
            Ok(file) => {
                reporter.emit(tar, Level::INFO, format!("Opening tar archive {}", path.display()));
                for rec in group {
                    match process_record(&file, rec, opts, reporter) {
                        Ok(true) => {}
                        Ok(false) => failures.push(rec.clone()),
                        Err(e) => {
                            reporter.emit(tar, Level::ERROR, format!("Retrieving {}: {e}", rec.name));
                            failures.push(rec.clone());
                        }
                    }
                }
                reporter.emit(tar, Level::DEBUG, format!("Closing tar archive {}", path.display()));
            }
            Err(e) => {
                reporter.emit(tar, Level::ERROR, format!("Could not retrieve {tar}: {e}"));
                failures.extend(group.iter().cloned());
            }
        }

        processed += group.len() as u64;
        if let Some(ck) = checkpoint {
            ck.record(tar, processed);
        }
        reporter.container_done(tar);

        if !opts.keep_tars && path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                reporter.emit(tar, Level::WARN, format!("could not remove {}: {e}", path.display()));
            }
        }
    }
    Ok(failures)
}

/// Recorded size of `tar` matches the local copy (or nothing is recorded).
fn size_matches(path: &Path, tar: &str, tar_sizes: &TarSizes) -> bool {
    let Some(expected) = tar_sizes.get(tar).and_then(|s| s.first()) else {
        return true;
    };
    fs::metadata(path).is_ok_and(|md| md.len() == *expected)
}

fn open_container(
    path: &Path,
    tar: &str,
    opts: &RetrieveOptions,
    transfer: &dyn Transfer,
    tar_sizes: &TarSizes,
) -> Result<File> {
    opts.retry.run(&format!("retrieving {tar}"), || {
        let present = path.is_file();
        if !present || !size_matches(path, tar, tar_sizes) {
            if present {
                debug!("{tar} differs from its recorded size; fetching again");
            }
            transfer.get(path)?;
            if !size_matches(path, tar, tar_sizes) {
                return Err(TarxError::Transfer(format!(
                    "{} size does not match expected size",
                    path.display()
                )));
            }
        }
        Ok(File::open(path)?)
    })
}

/// Ok(false) means the content hash did not match.
fn process_record(
    file: &File,
    rec: &FileRecord,
    opts: &RetrieveOptions,
    reporter: &mut dyn Reporter,
) -> Result<bool> {
    let tar = rec.tar.as_str();
    let target = safe_join(&opts.dest, &rec.name)?;
    let extract_this = opts.keep_files && should_extract(&target, rec);

    let verb = if opts.keep_files { "Extracting" } else { "Checking" };
    reporter.emit(tar, Level::INFO, format!("{verb} {}", rec.name));
    if opts.keep_files && !extract_this {
        reporter.emit(
            tar,
            Level::INFO,
            format!(
                "Not extracting {}, because it already exists on disk with the same size and modification date.",
                rec.name
            ),
        );
    }

    let mut handle = file;
    handle.seek(SeekFrom::Start(rec.offset))?;
    let mut archive = tar::Archive::new(handle);
    let mut entry = archive.entries()?.next().ok_or_else(|| {
        TarxError::Format(format!("no tar header at offset {} in {tar}", rec.offset))
    })??;
    let kind = entry.header().entry_type();

    if kind.is_file() || kind.is_hard_link() {
        let md5 = if extract_this {
            prepare_target(&target)?;
            let out = File::create(&target)?;
            let (_, md5) = copy_hashed(&mut entry, BufWriter::with_capacity(BLOCK_SIZE, out))?;
            restore_metadata(&target, entry.header())?;
            let on_disk = fs::metadata(&target)?.len();
            if on_disk != rec.size {
                reporter.emit(tar, Level::ERROR, format!("size mismatch for: {}", rec.name));
            }
            md5
        } else {
            copy_hashed(&mut entry, io::sink())?.1
        };

        if rec.md5.as_deref() == Some(md5.as_str()) {
            reporter.emit(tar, Level::DEBUG, format!("Valid md5: {md5} {}", rec.name));
            return Ok(true);
        }
        reporter.emit(tar, Level::ERROR, format!("md5 mismatch for: {}", rec.name));
        reporter.emit(tar, Level::ERROR, format!("md5 of extracted file: {md5}"));
        reporter.emit(
            tar,
            Level::ERROR,
            format!("md5 of original file:  {}", rec.md5.as_deref().unwrap_or("None")),
        );
        return Ok(false);
    }

    if extract_this {
        prepare_target(&target)?;
        entry.unpack(&target)?;
        // unpack leaves symlink (and directory) times alone
        let mtime = FileTime::from_unix_time(i64::try_from(entry.header().mtime()?).unwrap_or(0), 0);
        filetime::set_symlink_file_times(&target, mtime, mtime)?;
    }
    Ok(true)
}

/// Create parent directories and clear a non-directory in the way.
fn prepare_target(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Ok(md) = fs::symlink_metadata(target) {
        if !md.is_dir() {
            fs::remove_file(target)?;
        }
    }
    Ok(())
}

fn restore_metadata(target: &Path, header: &tar::Header) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let (Ok(uid), Ok(gid)) = (header.uid(), header.gid()) {
            let ids = (u32::try_from(uid).ok(), u32::try_from(gid).ok());
            if let Err(e) = std::os::unix::fs::chown(target, ids.0, ids.1) {
                debug!("could not restore owner of {}: {e}", target.display());
            }
        }
        let mode = header.mode()?;
        fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    let mtime = FileTime::from_unix_time(i64::try_from(header.mtime()?).unwrap_or(0), 0);
    filetime::set_file_times(target, mtime, mtime)?;
    Ok(())
}

/// False when `target` already has the record's size and mtime, compared
/// to the second.
pub fn should_extract(target: &Path, rec: &FileRecord) -> bool {
    match fs::symlink_metadata(target) {
        Err(_) => true,
        Ok(md) => {
            let size = if md.is_dir() || md.file_type().is_symlink() {
                0
            } else {
                md.len()
            };
            size != rec.size
                || timestamp::mtime_of(&md).unix_timestamp() != rec.mtime.unix_timestamp()
        }
    }
}

pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if p.is_absolute() || escapes {
        return Err(TarxError::Format(format!("unsafe path: {rel}")));
    }
    Ok(root.join(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(name: &str, size: u64) -> FileRecord {
        FileRecord {
            id: 1,
            name: name.to_string(),
            size,
            mtime: datetime!(2023-06-01 08:00:00 UTC),
            md5: None,
            tar: "000000.tar".to_string(),
            offset: 0,
        }
    }

    #[test]
    fn unsafe_names_are_rejected() {
        let root = Path::new("/dest");
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, "a/../../b").is_err());
        assert_eq!(safe_join(root, "a/b.txt").unwrap(), PathBuf::from("/dest/a/b.txt"));
    }

    #[test]
    fn matching_file_on_disk_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("f.txt");
        let rec = record("f.txt", 3);
        assert!(should_extract(&target, &rec));

        fs::write(&target, b"abc").unwrap();
        let t = FileTime::from_unix_time(rec.mtime.unix_timestamp(), 0);
        filetime::set_file_times(&target, t, t).unwrap();
        assert!(!should_extract(&target, &rec));

        let later = FileTime::from_unix_time(rec.mtime.unix_timestamp() + 1, 0);
        filetime::set_file_times(&target, later, later).unwrap();
        assert!(should_extract(&target, &rec));
    }

    #[test]
    fn fractional_index_mtime_matches_within_the_second() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("f.txt");
        let mut rec = record("f.txt", 3);
        rec.mtime = timestamp::parse("2023-06-01 08:00:00.250000").unwrap();

        fs::write(&target, b"abc").unwrap();
        let t = FileTime::from_unix_time(rec.mtime.unix_timestamp(), 250_000_000);
        filetime::set_file_times(&target, t, t).unwrap();
        assert!(!should_extract(&target, &rec));
    }

    #[test]
    fn empty_directory_counts_as_size_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("empty");
        fs::create_dir(&dir).unwrap();
        let rec = record("empty", 0);
        let t = FileTime::from_unix_time(rec.mtime.unix_timestamp(), 0);
        filetime::set_file_times(&dir, t, t).unwrap();
        assert!(!should_extract(&dir, &rec));
    }
}
