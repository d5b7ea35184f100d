use std::collections::BTreeSet;

use crate::domain::tar_name;
use crate::error::{Result, TarxError};

/// Which rows a retrieval run starts from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Globs matched against names and container names.
    Patterns(Vec<String>),
    /// Explicit container names.
    Tars(Vec<String>),
}

fn parse_index(s: &str) -> Result<u64> {
    let stem = s.trim().trim_end_matches(".tar");
    u64::from_str_radix(stem, 16)
        .map_err(|_| TarxError::Config(format!("invalid container index {s:?}")))
}

/// Expand a `--tars` value such as `"000000-000003,00000a.tar,1f-"`.
///
/// Ranges are inclusive; `-b` starts at `first` and `a-` ends at `last`.
/// The result is sorted and free of duplicates.
pub fn parse_tars_option(arg: &str, first: u64, last: u64) -> Result<Vec<u64>> {
    let mut out = BTreeSet::new();
    for part in arg.split(',') {
        let part = part.trim().trim_matches('"');
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((a, b)) => {
                let start = if a.is_empty() { first } else { parse_index(a)? };
                let end = if b.is_empty() { last } else { parse_index(b)? };
                out.extend(start..=end);
            }
            None => {
                out.insert(parse_index(part)?);
            }
        }
    }
    Ok(out.into_iter().collect())
}

pub fn tar_names(indices: &[u64]) -> Vec<String> {
    indices.iter().map(|&i| tar_name(i)).collect()
}

/// Containers still to process after `last_done`, through `max`.
pub fn resume_range(last_done: u64, max: u64) -> Vec<u64> {
    (last_done.saturating_add(1)..=max).collect()
}
