use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::{ArchiveConfig, NO_BACKEND, cache_dir, db_path, scale_maxsize};
use crate::error::{Result, TarxError};
use crate::index::store::IndexStore;
use crate::pack::walker::scan;
use crate::pack::writer::{PackOptions, add_files};
use crate::policy::SelectionPolicy;
use crate::transfer_factory::{Backend, TransferOptions, open_transfer};

#[derive(Clone, Debug)]
pub struct CreateOptions {
    pub root: PathBuf,
    pub hpss: Option<String>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    /// Container budget in GiB.
    pub maxsize_gib: f64,
    pub keep: bool,
    pub cache: Option<PathBuf>,
    pub follow_symlinks: bool,
    pub tars_md5: bool,
    pub transfer: TransferOptions,
}

/// Archive everything under `opts.root` into a new index and containers
/// numbered from zero. Returns the names that could not be archived.
pub fn create(opts: &CreateOptions) -> Result<Vec<String>> {
    if !opts.root.is_dir() {
        return Err(TarxError::NotADirectory(opts.root.clone()));
    }
    let root = opts.root.canonicalize()?;
    let cache = cache_dir(&root, opts.cache.as_deref());
    fs::create_dir_all(&cache)?;
    let cache = cache.canonicalize()?;
    let db = db_path(&cache);
    if db.exists() {
        return Err(TarxError::Config(format!(
            "{} already exists; use update to add to an existing archive",
            db.display()
        )));
    }

    let config = ArchiveConfig {
        path: Some(root.to_string_lossy().into_owned()),
        hpss: Some(opts.hpss.clone().unwrap_or_else(|| NO_BACKEND.to_string())),
        maxsize: Some(scale_maxsize(opts.maxsize_gib)?),
        keep: Some(opts.keep),
    };
    let maxsize = config.require_maxsize()?;
    let transfer = open_transfer(Backend::from_config(&config), &opts.transfer);
    debug!("Backend: {}", transfer.describe());

    let store = IndexStore::create(&db)?;
    store.write_config(&config)?;
    if opts.tars_md5 {
        store.create_tars_table()?;
    }

    info!("Gathering list of files to archive");
    let policy = SelectionPolicy::from_lists(opts.include.as_deref(), opts.exclude.as_deref())?;
    let (scanned, _stats) = scan(&root, &cache, &policy)?;
    let files: Vec<String> = scanned.into_iter().map(|(name, _)| name).collect();

    let pack = PackOptions {
        maxsize,
        keep: config.keep_containers(),
        follow_symlinks: opts.follow_symlinks,
        tars_md5: opts.tars_md5,
    };
    let outcome = add_files(&store, &root, &cache, &files, 0, transfer.as_ref(), &pack, None)?;
    info!(
        "Archived {} entries into {} container(s)",
        outcome.rows,
        outcome.containers.len()
    );

    transfer.put(store.path(), true)?;
    Ok(outcome.failures)
}
