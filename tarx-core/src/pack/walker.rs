use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::FileStat;
use crate::error::{Result, TarxError};
use crate::policy::SelectionPolicy;
use crate::stats::ScanStats;
use crate::util::timestamp;

/// One scanned path with its sort key.
struct Scanned {
    key: (String, String),
    name: String,
    stat: FileStat,
}

/// Walk `root` and return every file, symlink and empty directory as a
/// relative `/`-separated name with its size and mtime.
///
/// Output is sorted by `(parent directory, file name)`; an empty directory
/// sorts as `(itself, "")`. `cache` is pruned wherever it sits under `root`.
pub fn scan(
    root: &Path,
    cache: &Path,
    policy: &SelectionPolicy,
) -> Result<(Vec<(String, FileStat)>, ScanStats)> {
    if !root.is_dir() {
        return Err(TarxError::NotADirectory(root.to_path_buf()));
    }
    let mut stats = ScanStats::default();
    let mut found: Vec<Scanned> = Vec::new();
    let mut dirs: Vec<(PathBuf, FileStat)> = Vec::new();
    let mut has_children: HashSet<PathBuf> = HashSet::new();
    let mut unreadable: HashSet<PathBuf> = HashSet::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.path().starts_with(cache));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                warn!("cannot read {}: {e}; skipping", path.display());
                unreadable.insert(path);
                stats.skipped += 1;
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        if let Some(parent) = entry.path().parent() {
            has_children.insert(parent.to_path_buf());
        }
        let md = match entry.metadata() {
            Ok(md) => md,
            Err(e) => {
                warn!("cannot stat {}: {e}; skipping", entry.path().display());
                continue;
            }
        };
        let mtime = timestamp::mtime_of(&md);
        let ft = entry.file_type();
        if ft.is_dir() {
            stats.dirs += 1;
            dirs.push((entry.path().to_path_buf(), FileStat { size: 0, mtime }));
            continue;
        }
        let size = if ft.is_symlink() {
            stats.symlinks += 1;
            0
        } else {
            stats.files += 1;
            md.len()
        };
        stats.bytes += size;
        let name = relative_name(root, entry.path())?;
        // broken links and links to directories sort like empty directories
        let key = if size == 0 && !entry.path().is_file() {
            (name.clone(), String::new())
        } else {
            split_name(&name)
        };
        found.push(Scanned {
            key,
            name,
            stat: FileStat { size, mtime },
        });
    }

    for (dir, stat) in dirs {
        if has_children.contains(&dir) || unreadable.contains(&dir) {
            continue;
        }
        stats.empty_dirs += 1;
        let name = relative_name(root, &dir)?;
        found.push(Scanned {
            key: (name.clone(), String::new()),
            name,
            stat,
        });
    }

    found.sort_by(|a, b| a.key.cmp(&b.key));
    let out: Vec<(String, FileStat)> = found
        .into_iter()
        .filter(|s| policy.allows(&s.name))
        .map(|s| (s.name, s.stat))
        .collect();

    debug!(
        "scanned {}: {} dirs, {} files, {} symlinks, {} empty dirs, {} unreadable; {} selected",
        root.display(),
        stats.dirs,
        stats.files,
        stats.symlinks,
        stats.empty_dirs,
        stats.skipped,
        out.len()
    );
    Ok((out, stats))
}

/// `path` relative to `root`, joined with `/`.
pub fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        TarxError::Format(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// Replace the stats of symbolic links with their targets', matching what
/// the packer records when following links. Broken links keep size 0.
pub fn resolve_links(root: &Path, scanned: &mut [(String, FileStat)]) {
    for (name, stat) in scanned.iter_mut() {
        let path = root.join(name.as_str());
        let is_link = std::fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink());
        if !is_link {
            continue;
        }
        if let Ok(md) = std::fs::metadata(&path) {
            stat.size = if md.is_file() { md.len() } else { 0 };
            stat.mtime = timestamp::mtime_of(&md);
        }
    }
}

fn split_name(name: &str) -> (String, String) {
    match name.rsplit_once('/') {
        Some((parent, base)) => (parent.to_string(), base.to_string()),
        None => (String::new(), name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(root: &Path, cache: &Path) -> Vec<String> {
        let (out, _) = scan(root, cache, &SelectionPolicy::default()).unwrap();
        out.into_iter().map(|(n, _)| n).collect()
    }

    #[test]
    fn files_in_a_directory_precede_its_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/deep.txt"), b"x").unwrap();
        fs::write(root.join("a/z.txt"), b"x").unwrap();
        fs::write(root.join("b.txt"), b"x").unwrap();
        fs::write(root.join("a.txt"), b"x").unwrap();

        assert_eq!(
            names(root, &root.join("tarx")),
            vec!["a.txt", "b.txt", "a/z.txt", "a/b/deep.txt"]
        );
    }

    #[test]
    fn empty_dirs_are_entries_and_cache_is_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join("tarx")).unwrap();
        fs::write(root.join("tarx/index.db"), b"db").unwrap();
        fs::write(root.join("f.txt"), b"hello").unwrap();

        let (out, stats) = scan(root, &root.join("tarx"), &SelectionPolicy::default()).unwrap();
        let names: Vec<_> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["f.txt", "empty"]);
        assert_eq!(out[0].1.size, 5);
        assert_eq!(out[1].1.size, 0);
        assert_eq!(stats.empty_dirs, 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_have_size_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("data"), b"0123456789").unwrap();
        std::os::unix::fs::symlink("data", root.join("link")).unwrap();

        let (out, stats) = scan(root, &root.join("tarx"), &SelectionPolicy::default()).unwrap();
        assert_eq!(out[1].0, "link");
        assert_eq!(out[1].1.size, 0);
        assert_eq!(stats.symlinks, 1);
    }

    #[cfg(unix)]
    #[test]
    fn links_without_a_file_target_sort_as_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.txt"), b"x").unwrap();
        fs::write(root.join("z.txt"), b"x").unwrap();
        fs::create_dir_all(root.join("d")).unwrap();
        fs::write(root.join("d/in.txt"), b"x").unwrap();
        std::os::unix::fs::symlink("nowhere", root.join("broken")).unwrap();
        std::os::unix::fs::symlink("d", root.join("dlink")).unwrap();
        std::os::unix::fs::symlink("a.txt", root.join("flink")).unwrap();

        assert_eq!(
            names(root, &root.join("tarx")),
            vec!["a.txt", "flink", "z.txt", "broken", "d/in.txt", "dlink"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let locked = root.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("hidden.txt"), b"x").unwrap();
        fs::write(root.join("sibling.txt"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // permission bits do not bind a privileged user
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        let result = scan(root, &root.join("tarx"), &SelectionPolicy::default());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let (out, stats) = result.unwrap();
        let names: Vec<_> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["sibling.txt"]);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn policy_filters_names() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join("skip/x.txt"), b"x").unwrap();
        fs::write(root.join("keep.txt"), b"x").unwrap();
        let policy = SelectionPolicy::from_lists(None, Some("skip/")).unwrap();
        let (out, _) = scan(root, &root.join("tarx"), &policy).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "keep.txt");
    }

    #[test]
    fn non_directory_root_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            scan(&file, &tmp.path().join("tarx"), &SelectionPolicy::default()),
            Err(TarxError::NotADirectory(_))
        ));
    }
}
