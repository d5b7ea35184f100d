use std::time::Duration;

use crate::config::ArchiveConfig;
use crate::transfer::{LocalOnly, Transfer};
use crate::transfer_cmd::CommandTransfer;

pub enum Backend {
    LocalOnly,
    Command { dest: String },
}

impl Backend {
    pub fn from_config(cfg: &ArchiveConfig) -> Self {
        match cfg.backend() {
            None => Backend::LocalOnly,
            Some(dest) => Backend::Command {
                dest: dest.to_string(),
            },
        }
    }
}

/// Overrides for the command backend.
#[derive(Clone, Debug, Default)]
pub struct TransferOptions {
    pub put_template: Option<String>,
    pub get_template: Option<String>,
    pub timeout: Option<Duration>,
}

pub fn open_transfer(backend: Backend, opts: &TransferOptions) -> Box<dyn Transfer> {
    match backend {
        Backend::LocalOnly => Box::new(LocalOnly),
        Backend::Command { dest } => {
            let mut t = CommandTransfer::new(dest);
            if let Some(p) = &opts.put_template {
                t.put_template = p.clone();
            }
            if let Some(g) = &opts.get_template {
                t.get_template = g.clone();
            }
            t.timeout = opts.timeout;
            Box::new(t)
        }
    }
}
