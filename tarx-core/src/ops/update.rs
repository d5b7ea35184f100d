use std::path::PathBuf;

use tracing::info;

use crate::config::{ArchiveConfig, scale_maxsize};
use crate::error::{Result, TarxError};
use crate::index::checkpoint::{CheckpointManager, CheckpointWriter, Operation};
use crate::index::inmem::Snapshot;
use crate::ops::Session;
use crate::pack::changes::detect_changes;
use crate::pack::walker::{resolve_links, scan};
use crate::pack::writer::{PackOptions, add_files};
use crate::policy::SelectionPolicy;
use crate::transfer_factory::TransferOptions;

#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    /// Directory the cache path is resolved against.
    pub base: PathBuf,
    pub cache: Option<PathBuf>,
    pub hpss: Option<String>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub maxsize_gib: Option<f64>,
    pub keep: Option<bool>,
    pub follow_symlinks: bool,
    pub dry_run: bool,
    pub resume: bool,
    pub clear_checkpoint: bool,
    /// Skip recording container sizes and hashes.
    pub no_tars_md5: bool,
    pub transfer: TransferOptions,
}

/// Archive new and changed files of an existing archive into fresh
/// containers. Returns the names that could not be archived.
pub fn update(opts: &UpdateOptions) -> Result<Vec<String>> {
    let overrides = ArchiveConfig {
        path: None,
        hpss: opts.hpss.clone(),
        maxsize: opts.maxsize_gib.map(scale_maxsize).transpose()?,
        keep: opts.keep,
    };
    let session = Session::open(&opts.base, opts.cache.as_deref(), &overrides, &opts.transfer)?;
    let root = session
        .config
        .path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| TarxError::Config("archive has no recorded path".into()))?;
    let maxsize = session.config.require_maxsize()?;

    let checkpoints = CheckpointManager::new(&session.store);
    if opts.clear_checkpoint {
        checkpoints.clear(Operation::Update)?;
        info!("Cleared checkpoints for update");
    }
    if opts.resume {
        match checkpoints.load_latest(Operation::Update)? {
            Some(ck) => info!(
                "Resuming update: last container {} ({} of {} files processed, {})",
                ck.last_tar.as_deref().unwrap_or("unknown"),
                ck.files_processed,
                ck.total_files,
                ck.status.as_str()
            ),
            None => info!("No checkpoint found. Starting from beginning."),
        }
    }

    info!("Gathering list of files to archive");
    let policy = SelectionPolicy::from_lists(opts.include.as_deref(), opts.exclude.as_deref())?;
    let (mut scanned, _stats) = scan(&root, &session.cache, &policy)?;
    if opts.follow_symlinks {
        resolve_links(&root, &mut scanned);
    }
    let snapshot = Snapshot::from_records(session.store.all_files()?);
    let changed = detect_changes(&scanned, &snapshot);

    if changed.is_empty() {
        info!("Nothing to update");
        return Ok(Vec::new());
    }
    if opts.dry_run {
        info!("List of files to be updated");
        for name in &changed {
            println!("{name}");
        }
        return Ok(Vec::new());
    }

    let first_index = session.store.max_tar_index()?.map_or(0, |m| m + 1);
    let tars_md5 = !opts.no_tars_md5;
    if tars_md5 {
        // archives created with --no-tars-md5 gain the table here
        session.store.create_tars_table()?;
    }
    let pack = PackOptions {
        maxsize,
        keep: session.config.keep_containers(),
        follow_symlinks: opts.follow_symlinks,
        tars_md5,
    };
    let writer = CheckpointWriter::new(&session.store, Operation::Update, changed.len() as u64);
    let outcome = add_files(
        &session.store,
        &root,
        &session.cache,
        &changed,
        first_index,
        session.transfer.as_ref(),
        &pack,
        Some(&writer),
    )?;
    info!(
        "Archived {} entries into {} new container(s)",
        outcome.rows,
        outcome.containers.len()
    );

    session.push_index()?;
    if outcome.failures.is_empty() {
        checkpoints.complete(Operation::Update)?;
    }
    Ok(outcome.failures)
}
