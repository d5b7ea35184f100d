use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::ArchiveConfig;
use crate::domain::{FileRecord, tar_index};
use crate::error::{Result, TarxError};
use crate::index::checkpoint::{CheckpointManager, CheckpointWriter, Operation};
use crate::index::inmem::dedup_latest;
use crate::ops::Session;
use crate::policy::SelectionPolicy;
use crate::read::extract::{LogReporter, RetrieveOptions, extract_files};
use crate::read::parallel::extract_parallel;
use crate::read::select::{Selection, parse_tars_option, resume_range, tar_names};
use crate::transfer::RetryPolicy;
use crate::transfer_factory::TransferOptions;

#[derive(Clone, Debug, Default)]
pub struct RetrieveRequest {
    /// `true` for extract, `false` for check.
    pub keep_files: bool,
    /// Directory the cache path (and the default destination) resolve against.
    pub base: PathBuf,
    /// Globs over names and container names; empty selects everything.
    pub patterns: Vec<String>,
    pub cache: Option<PathBuf>,
    pub dest: Option<PathBuf>,
    pub hpss: Option<String>,
    pub keep: Option<bool>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub workers: usize,
    pub resume: bool,
    pub clear_checkpoint: bool,
    pub retries: u32,
    pub retry_delay: Duration,
    /// `--tars` selection, e.g. `000000-000003,00000a`.
    pub tars: Option<String>,
    pub error_on_duplicate_tar: bool,
    pub transfer: TransferOptions,
}

impl RetrieveRequest {
    fn verb(&self) -> &'static str {
        if self.keep_files { "extracting" } else { "checking" }
    }
}

/// Extract or check the selected records. Returns the records that failed;
/// they have already been summarized in the log.
pub fn retrieve(req: &RetrieveRequest) -> Result<Vec<FileRecord>> {
    if req.tars.is_some() && !req.patterns.is_empty() {
        return Err(TarxError::Config(
            "--tars selects containers; file patterns cannot be given with it".into(),
        ));
    }
    let overrides = ArchiveConfig {
        hpss: req.hpss.clone(),
        keep: req.keep,
        ..ArchiveConfig::default()
    };
    let session = Session::open(&req.base, req.cache.as_deref(), &overrides, &req.transfer)?;
    let store = &session.store;
    let operation = (!req.keep_files).then_some(Operation::Check);
    let checkpoints = CheckpointManager::new(store);

    let known = store.distinct_tars()?;
    let first = known.first().and_then(|t| tar_index(t)).unwrap_or(0);
    let max = store.max_tar_index()?.unwrap_or(0);

    let mut selection = match &req.tars {
        Some(arg) => Selection::Tars(tar_names(&parse_tars_option(arg, first, max)?)),
        None => Selection::Patterns(req.patterns.clone()),
    };
    let mut resumed = false;

    match operation {
        Some(op) => {
            if req.clear_checkpoint {
                checkpoints.clear(op)?;
                info!("Cleared checkpoints for {op}");
            }
            if req.resume {
                let last = checkpoints
                    .load_latest(op)?
                    .and_then(|ck| ck.last_tar_index);
                match last {
                    Some(n) => {
                        info!("Resuming from checkpoint: last verified tar index = {n:06x}");
                        if req.tars.is_none() && req.patterns.is_empty() {
                            let range = resume_range(n, max);
                            info!("Resuming with containers {:06x}-{max:06x}", n + 1);
                            selection = Selection::Tars(tar_names(&range));
                            resumed = true;
                        }
                    }
                    None => {
                        info!("No checkpoint found or checkpoint incomplete. Starting from beginning.")
                    }
                }
            }
        }
        None if req.resume || req.clear_checkpoint => {
            info!("Checkpoints are only kept for check; ignoring checkpoint options");
        }
        None => {}
    }

    let mut records = match &selection {
        Selection::Tars(tars) => store.select_by_tars(tars)?,
        Selection::Patterns(p) if p.is_empty() => store.select_glob(&["*".to_string()])?,
        Selection::Patterns(p) => store.select_glob(p)?,
    };
    let policy = SelectionPolicy::from_lists(req.include.as_deref(), req.exclude.as_deref())?;
    if !policy.is_empty() {
        records.retain(|r| policy.allows(&r.name));
    }
    if records.is_empty() {
        if resumed {
            info!("Every container was already verified; nothing left to resume");
            return Ok(Vec::new());
        }
        return Err(TarxError::NothingToExtract);
    }
    let records = dedup_latest(records);
    let tar_sizes = store.tar_sizes()?;

    let dest = req.dest.clone().unwrap_or_else(|| req.base.clone());
    if req.keep_files {
        fs::create_dir_all(&dest)?;
    }
    let opts = RetrieveOptions {
        keep_files: req.keep_files,
        dest,
        cache: session.cache.clone(),
        keep_tars: session.config.keep_containers(),
        retry: RetryPolicy {
            retries: req.retries,
            delay: req.retry_delay,
        },
        error_on_duplicate_tar: req.error_on_duplicate_tar,
    };
    debug!("Keep local tar files : {}", opts.keep_tars);

    let failures = if req.workers > 1 {
        if operation.is_some() {
            info!("Checkpoints are not saved with multiple workers; use --workers 1 to make the run resumable");
        }
        extract_parallel(&records, req.workers, &opts, session.transfer.as_ref(), &tar_sizes)?
    } else {
        let writer = operation.map(|op| CheckpointWriter::new(store, op, records.len() as u64));
        extract_files(
            &records,
            &opts,
            session.transfer.as_ref(),
            &tar_sizes,
            &mut LogReporter,
            writer.as_ref(),
        )?
    };

    if let Some(op) = operation {
        if failures.is_empty() {
            checkpoints.complete(op)?;
        }
    }
    summarize(&failures, req.verb());
    Ok(failures)
}

fn summarize(failures: &[FileRecord], verb: &str) {
    if failures.is_empty() {
        info!("No failures detected when {verb} the files.");
        return;
    }
    error!("Encountered an error for files:");
    for f in failures {
        error!("{} in {}", f.name, f.tar);
    }
    let broken: BTreeSet<&str> = failures.iter().map(|f| f.tar.as_str()).collect();
    error!("The following tar archives had errors:");
    for tar in broken {
        error!("{tar}");
    }
}
