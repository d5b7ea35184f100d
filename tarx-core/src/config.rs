use std::path::{Path, PathBuf};

use crate::error::{Result, TarxError};

/// Modification-time tolerance, in seconds.
pub const TIME_TOL: i64 = 1;
/// Streaming buffer size for hashing and copying member content.
pub const BLOCK_SIZE: usize = 1024 * 1014;
pub const DEFAULT_CACHE: &str = "tarx";
pub const DB_FILENAME: &str = "index.db";
pub const DEFAULT_MAXSIZE_GIB: f64 = 256.0;
pub const GIB: f64 = (1u64 << 30) as f64;

/// Backend value meaning "no remote storage".
pub const NO_BACKEND: &str = "none";

pub const KEY_PATH: &str = "path";
pub const KEY_HPSS: &str = "hpss";
pub const KEY_MAXSIZE: &str = "maxsize";
pub const KEY_KEEP: &str = "keep";

/// Every key persisted in the `config` table.
pub const CONFIG_KEYS: [&str; 4] = [KEY_PATH, KEY_HPSS, KEY_MAXSIZE, KEY_KEEP];

/// Per-archive settings. Stored once at creation and re-read by later
/// commands; command-line values override them for a single invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Absolute path of the archived root directory.
    pub path: Option<String>,
    /// Backend location, or `none`.
    pub hpss: Option<String>,
    /// Container byte budget.
    pub maxsize: Option<u64>,
    /// Keep local copies of containers after transfer.
    pub keep: Option<bool>,
}

impl ArchiveConfig {
    pub fn to_rows(&self) -> Vec<(&'static str, Option<String>)> {
        CONFIG_KEYS
            .iter()
            .map(|&key| {
                let value = match key {
                    KEY_PATH => self.path.clone(),
                    KEY_HPSS => self.hpss.clone(),
                    KEY_MAXSIZE => self.maxsize.map(|m| m.to_string()),
                    _ => self.keep.map(|k| k.to_string()),
                };
                (key, value)
            })
            .collect()
    }

    pub fn from_rows<I>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut cfg = ArchiveConfig::default();
        for (key, value) in rows {
            let Some(value) = value else { continue };
            match key.as_str() {
                KEY_PATH => cfg.path = Some(value),
                KEY_HPSS => cfg.hpss = Some(value),
                KEY_MAXSIZE => cfg.maxsize = Some(parse_maxsize(&value)?),
                KEY_KEEP => cfg.keep = Some(parse_bool(&value)?),
                _ => {}
            }
        }
        Ok(cfg)
    }

    /// Overwrite stored values with every value set in `overrides`.
    pub fn merge_overrides(&mut self, overrides: &ArchiveConfig) {
        if overrides.path.is_some() {
            self.path = overrides.path.clone();
        }
        if overrides.hpss.is_some() {
            self.hpss = overrides.hpss.clone();
        }
        if overrides.maxsize.is_some() {
            self.maxsize = overrides.maxsize;
        }
        if overrides.keep.is_some() {
            self.keep = overrides.keep;
        }
    }

    /// Remote location, or `None` for local-only archives.
    pub fn backend(&self) -> Option<&str> {
        match self.hpss.as_deref() {
            None => None,
            Some(h) if h.eq_ignore_ascii_case(NO_BACKEND) || h.is_empty() => None,
            Some(h) => Some(h),
        }
    }

    /// Local-only archives always keep their containers.
    pub fn keep_containers(&self) -> bool {
        self.backend().is_none() || self.keep.unwrap_or(false)
    }

    pub fn require_maxsize(&self) -> Result<u64> {
        match self.maxsize {
            Some(m) if m > 0 => Ok(m),
            other => Err(TarxError::Config(format!("invalid maxsize={other:?}"))),
        }
    }
}

/// Convert a size in GiB (as given on the command line) to bytes.
pub fn scale_maxsize(gib: f64) -> Result<u64> {
    if !gib.is_finite() || gib <= 0.0 {
        return Err(TarxError::Config(format!("maxsize must be positive, got {gib}")));
    }
    Ok((gib * GIB) as u64)
}

fn parse_maxsize(value: &str) -> Result<u64> {
    let v = value.trim();
    if let Ok(n) = v.parse::<u64>() {
        return Ok(n);
    }
    match v.parse::<f64>() {
        Ok(f) if f.is_finite() && f > 0.0 => Ok(f as u64),
        _ => Err(TarxError::Config(format!("invalid maxsize value {value:?}"))),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(TarxError::Config(format!("invalid boolean value {value:?}"))),
    }
}

/// Resolve the cache directory; relative names live under `base`.
pub fn cache_dir(base: &Path, cache: Option<&Path>) -> PathBuf {
    let cache = cache.unwrap_or_else(|| Path::new(DEFAULT_CACHE));
    if cache.is_absolute() {
        cache.to_path_buf()
    } else {
        base.join(cache)
    }
}

pub fn db_path(cache: &Path) -> PathBuf {
    cache.join(DB_FILENAME)
}
