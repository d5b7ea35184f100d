use crate::config::TIME_TOL;
use crate::domain::FileStat;
use crate::index::inmem::{Latest, Snapshot};

/// True when `current` must be archived again.
pub fn is_changed(current: &FileStat, archived: Option<&Latest>) -> bool {
    match archived {
        None => true,
        Some(a) => {
            let drift = (current.mtime - a.mtime).whole_seconds().abs();
            current.size != a.size || drift > TIME_TOL
        }
    }
}

/// Names from `scanned` that are new or changed, in scan order.
pub fn detect_changes(scanned: &[(String, FileStat)], snapshot: &Snapshot) -> Vec<String> {
    scanned
        .iter()
        .filter(|(name, stat)| is_changed(stat, snapshot.get(name)))
        .map(|(name, _)| name.clone())
        .collect()
}
