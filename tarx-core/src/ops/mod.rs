//! Command drivers: each wires the scanner, packer, index and retrieval
//! engine together for one invocation.

pub mod create;
pub mod retrieve;
pub mod update;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{ArchiveConfig, cache_dir, db_path};
use crate::error::{Result, TarxError};
use crate::index::store::IndexStore;
use crate::transfer::Transfer;
use crate::transfer_factory::{Backend, TransferOptions, open_transfer};

/// An opened archive: its index, effective configuration and backend.
pub struct Session {
    pub store: IndexStore,
    pub config: ArchiveConfig,
    /// Absolute cache directory holding the index and containers.
    pub cache: PathBuf,
    pub transfer: Box<dyn Transfer>,
}

impl Session {
    /// Open the index under `cache` (relative names resolve against
    /// `base`). A missing index is fetched from the backend named in
    /// `overrides`; without one this is a setup error.
    pub fn open(
        base: &Path,
        cache: Option<&Path>,
        overrides: &ArchiveConfig,
        transfer_opts: &TransferOptions,
    ) -> Result<Self> {
        let cache = cache_dir(base, cache);
        let db = db_path(&cache);
        if !db.is_file() {
            let backend = Backend::from_config(overrides);
            if matches!(backend, Backend::LocalOnly) {
                return Err(TarxError::Config(format!(
                    "{} is not available locally; a backend is required to fetch it",
                    db.display()
                )));
            }
            fs::create_dir_all(&cache)?;
            open_transfer(backend, transfer_opts).get(&db)?;
        }
        let cache = cache.canonicalize()?;

        debug!("Opening index database");
        let store = IndexStore::open(&db_path(&cache))?;
        let mut config = store.read_config()?;
        config.merge_overrides(overrides);
        debug!("Local path : {}", config.path.as_deref().unwrap_or(""));
        debug!("Backend    : {}", config.hpss.as_deref().unwrap_or("none"));
        debug!("Max size   : {:?}", config.maxsize);

        let transfer = open_transfer(Backend::from_config(&config), transfer_opts);
        Ok(Self {
            store,
            config,
            cache,
            transfer,
        })
    }

    /// Push the index file to the backend; the local copy always stays.
    pub fn push_index(&self) -> Result<()> {
        self.transfer.put(self.store.path(), true)
    }
}
