#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use filetime::{FileTime, set_file_times, set_symlink_file_times};
use rusqlite::Connection;
use tarx_core::{CreateOptions, RetrieveRequest, TransferOptions, UpdateOptions};

/// 2023-11-14 22:13:20 UTC
pub const PINNED: i64 = 1_700_000_000;

pub fn pin(path: &Path, secs: i64) {
    let t = FileTime::from_unix_time(secs, 0);
    set_file_times(path, t, t).unwrap();
}

/// file0.txt, a hard and a soft link to it, an empty file, dir/file1.txt
/// and an empty directory.
pub fn scenario_tree(root: &Path) {
    fs::create_dir_all(root.join("dir")).unwrap();
    fs::create_dir_all(root.join("empty_dir")).unwrap();
    fs::write(root.join("file0.txt"), "file0 stuff").unwrap();
    fs::write(root.join("file_empty.txt"), "").unwrap();
    fs::write(root.join("dir/file1.txt"), "file1 stuff").unwrap();
    fs::hard_link(root.join("file0.txt"), root.join("file_hard.txt")).unwrap();
    std::os::unix::fs::symlink("file0.txt", root.join("file_soft.txt")).unwrap();

    for f in ["file0.txt", "file_empty.txt", "dir/file1.txt"] {
        pin(&root.join(f), PINNED);
    }
    let t = FileTime::from_unix_time(PINNED, 0);
    set_symlink_file_times(root.join("file_soft.txt"), t, t).unwrap();
    pin(&root.join("empty_dir"), PINNED);
}

/// `count` files of `size` bytes each, named f0.bin, f1.bin, ...
pub fn sized_tree(root: &Path, count: usize, size: usize) {
    fs::create_dir_all(root).unwrap();
    for i in 0..count {
        let path = root.join(format!("f{i}.bin"));
        let byte = b'a' + i as u8;
        fs::write(&path, vec![byte; size]).unwrap();
        pin(&path, PINNED);
    }
}

pub fn create_opts(root: &Path) -> CreateOptions {
    CreateOptions {
        root: root.to_path_buf(),
        hpss: Some("none".into()),
        include: None,
        exclude: None,
        maxsize_gib: 1.0,
        keep: false,
        cache: None,
        follow_symlinks: false,
        tars_md5: true,
        transfer: TransferOptions::default(),
    }
}

/// Budget of exactly `bytes`, expressed in GiB.
pub fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1u64 << 30) as f64
}

pub fn update_opts(root: &Path) -> UpdateOptions {
    UpdateOptions {
        base: root.to_path_buf(),
        ..UpdateOptions::default()
    }
}

pub fn check_req(root: &Path) -> RetrieveRequest {
    RetrieveRequest {
        keep_files: false,
        base: root.to_path_buf(),
        workers: 1,
        retries: 0,
        ..RetrieveRequest::default()
    }
}

pub fn extract_req(root: &Path, dest: &Path) -> RetrieveRequest {
    RetrieveRequest {
        keep_files: true,
        dest: Some(dest.to_path_buf()),
        ..check_req(root)
    }
}

pub fn cache(root: &Path) -> PathBuf {
    root.join("tarx")
}

pub fn index(root: &Path) -> Connection {
    Connection::open(cache(root).join("index.db")).unwrap()
}

/// (id, name, size, md5, tar, offset) in id order.
pub fn rows(conn: &Connection) -> Vec<(i64, String, i64, Option<String>, String, i64)> {
    let mut stmt = conn
        .prepare("SELECT id, name, size, md5, tar, offset FROM files ORDER BY id")
        .unwrap();
    stmt.query_map([], |r| {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
    })
    .unwrap()
    .collect::<rusqlite::Result<Vec<_>>>()
    .unwrap()
}
