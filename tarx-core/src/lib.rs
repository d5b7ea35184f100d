#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod policy;
pub mod stats;

pub mod util {
    pub mod hash_forward;
    pub mod timestamp;
}

pub mod index {
    pub mod checkpoint;
    pub mod inmem;
    pub mod store;
}

pub mod pack {
    pub mod changes;
    pub mod walker;
    pub mod writer;
}

pub mod read {
    pub mod extract;
    pub mod parallel;
    pub mod select;
}

pub mod transfer;
pub mod transfer_cmd;
pub mod transfer_factory;

pub mod list;
pub mod ops;

// Re-exports: stable API surface
pub use config::ArchiveConfig;
pub use domain::FileRecord;
pub use error::{Result, TarxError};
pub use list::{ListOptions, list};
pub use ops::create::{CreateOptions, create};
pub use ops::retrieve::{RetrieveRequest, retrieve};
pub use ops::update::{UpdateOptions, update};
pub use transfer_factory::TransferOptions;
