use std::collections::HashMap;
use std::fs::{self, File, Metadata};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::{debug, error, info};

use crate::config::BLOCK_SIZE;
use crate::domain::{PackedFile, tar_name};
use crate::error::{Result, TarxError};
use crate::index::checkpoint::CheckpointWriter;
use crate::index::store::IndexStore;
use crate::transfer::Transfer;
use crate::util::hash_forward::{HashingReader, hex_digest, md5_file};
use crate::util::timestamp;

#[derive(Clone, Debug)]
pub struct PackOptions {
    /// Advisory container budget in bytes.
    pub maxsize: u64,
    /// Keep local container copies after transfer.
    pub keep: bool,
    /// Archive symlink targets' content under the link name.
    pub follow_symlinks: bool,
    /// Hash whole containers for the `tars` table.
    pub tars_md5: bool,
}

#[derive(Clone, Debug, Default)]
pub struct PackOutcome {
    /// Names that could not be archived.
    pub failures: Vec<String>,
    /// Containers closed, in order.
    pub containers: Vec<String>,
    /// Rows added to the index.
    pub rows: usize,
}

/// Write adapter that tracks the logical position and can drop a
/// half-written member.
struct ContainerWriter {
    out: BufWriter<File>,
    pos: u64,
    hasher: Option<Md5>,
    rewound: bool,
}

impl ContainerWriter {
    fn new(file: File, hash: bool) -> Self {
        Self {
            out: BufWriter::with_capacity(BLOCK_SIZE, file),
            pos: 0,
            hasher: hash.then(Md5::new),
            rewound: false,
        }
    }

    fn rewind(&mut self, to: u64) -> io::Result<()> {
        self.out.flush()?;
        let f = self.out.get_mut();
        f.set_len(to)?;
        f.seek(SeekFrom::Start(to))?;
        self.pos = to;
        self.rewound = true;
        Ok(())
    }
}

impl Write for ContainerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        if let Some(h) = self.hasher.as_mut() {
            h.update(&buf[..n]);
        }
        self.pos += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

struct OpenContainer {
    name: String,
    path: PathBuf,
    builder: Builder<ContainerWriter>,
    rows: Vec<PackedFile>,
    // (dev, ino) -> first name packed in this container
    inodes: HashMap<(u64, u64), String>,
}

impl OpenContainer {
    fn create(cache: &Path, index: u64, hash: bool) -> Result<Self> {
        let name = tar_name(index);
        let path = cache.join(&name);
        info!("Creating new tar archive {name}");
        let file = File::create(&path)?;
        Ok(Self {
            name,
            path,
            builder: Builder::new(ContainerWriter::new(file, hash)),
            rows: Vec::new(),
            inodes: HashMap::new(),
        })
    }

    fn position(&mut self) -> u64 {
        self.builder.get_mut().pos
    }

    #[cfg(unix)]
    fn hard_link_target(&mut self, md: &Metadata, name: &str) -> Option<String> {
        use std::collections::hash_map::Entry;
        use std::os::unix::fs::MetadataExt;

        if md.nlink() < 2 {
            return None;
        }
        match self.inodes.entry((md.dev(), md.ino())) {
            Entry::Occupied(o) => Some(o.get().clone()),
            Entry::Vacant(v) => {
                v.insert(name.to_string());
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn hard_link_target(&mut self, _md: &Metadata, _name: &str) -> Option<String> {
        None
    }

    /// Append one path as a tar member and describe it.
    fn add(&mut self, root: &Path, name: &str, follow_symlinks: bool) -> Result<PackedFile> {
        let path = root.join(name);
        let lmd = fs::symlink_metadata(&path)?;
        let md = if follow_symlinks && lmd.file_type().is_symlink() {
            fs::metadata(&path).map_err(|e| {
                io::Error::new(e.kind(), format!("broken symbolic link {name}: {e}"))
            })?
        } else {
            lmd
        };
        let mtime = timestamp::mtime_of(&md);
        let offset = self.position();
        let tar = self.name.clone();
        let packed = |size: u64, md5: Option<String>| PackedFile {
            name: name.to_string(),
            size,
            mtime,
            md5,
            tar: tar.clone(),
            offset,
        };

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&md, HeaderMode::Complete);
        header.set_mtime(u64::try_from(mtime.unix_timestamp()).unwrap_or(0));

        let ft = md.file_type();
        if ft.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            self.builder
                .append_data(&mut header, format!("{name}/"), io::empty())?;
            return Ok(packed(0, None));
        }
        if ft.is_symlink() {
            let target = fs::read_link(&path)?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            self.builder.append_link(&mut header, name, &target)?;
            return Ok(packed(0, None));
        }
        if !ft.is_file() {
            return Err(TarxError::Format(format!("{name}: unsupported file type")));
        }

        // Hard links keep their content so they extract without the target.
        let size = md.len();
        header.set_entry_type(EntryType::Regular);
        if let Some(target) = self.hard_link_target(&md, name) {
            header.set_entry_type(EntryType::Link);
            if header.set_link_name(&target).is_err() {
                debug!("link name {target} too long for a header; storing {name} as a file");
                header.as_old_mut().linkname = [0; 100];
                header.set_entry_type(EntryType::Regular);
            }
        }
        header.set_size(size);

        let file = File::open(&path)?;
        let mut hasher = Md5::new();
        let padded = {
            let mut reader = HashingReader::new(file, &mut hasher, size);
            if let Err(e) = self.builder.append_data(&mut header, name, &mut reader) {
                self.builder.get_mut().rewind(offset)?;
                return Err(e.into());
            }
            reader.padded
        };
        if padded > 0 {
            return Err(TarxError::Format(format!(
                "{name} shrank by {padded} bytes while being archived"
            )));
        }
        Ok(packed(size, Some(hex_digest(hasher))))
    }

    /// Finish the tar stream and return (size, container md5).
    fn finish(self) -> Result<(String, PathBuf, Vec<PackedFile>, u64, Option<String>)> {
        let mut w = self.builder.into_inner()?;
        w.flush()?;
        let size = w.pos;
        let md5 = match w.hasher.take() {
            Some(h) if !w.rewound => Some(hex_digest(h)),
            Some(_) => {
                drop(w);
                Some(md5_file(&self.path)?)
            }
            None => None,
        };
        Ok((self.name, self.path, self.rows, size, md5))
    }
}

/// Size a path will contribute to its container.
fn member_size(path: &Path, follow_symlinks: bool) -> u64 {
    let md = if follow_symlinks {
        fs::metadata(path).or_else(|_| fs::symlink_metadata(path))
    } else {
        fs::symlink_metadata(path)
    };
    match md {
        Ok(m) if m.is_file() => m.len(),
        _ => 0,
    }
}

/// Pack `files` (relative to `root`) into containers under `cache`,
/// numbering them from `first_index`.
///
/// A container closes when the next file would push it past
/// `opts.maxsize` or the list ends; each closed container is transferred
/// and its rows inserted in one transaction. Per-file failures are
/// collected; transfer and index errors abort.
pub fn add_files(
    store: &IndexStore,
    root: &Path,
    cache: &Path,
    files: &[String],
    first_index: u64,
    transfer: &dyn Transfer,
    opts: &PackOptions,
    checkpoint: Option<&CheckpointWriter<'_>>,
) -> Result<PackOutcome> {
    let mut outcome = PackOutcome::default();
    let mut next_index = first_index;
    let mut open: Option<OpenContainer> = None;

    for (i, name) in files.iter().enumerate() {
        let mut container = match open.take() {
            Some(c) => c,
            None => {
                let c = OpenContainer::create(cache, next_index, opts.tars_md5)?;
                next_index += 1;
                c
            }
        };

        info!("Archiving {name}");
        match container.add(root, name, opts.follow_symlinks) {
            Ok(row) => container.rows.push(row),
            Err(e) => {
                error!("Archiving {name}: {e}");
                outcome.failures.push(name.clone());
            }
        }

        let last = i + 1 == files.len();
        let next_size = if last {
            0
        } else {
            member_size(&root.join(&files[i + 1]), opts.follow_symlinks)
        };
        if last || container.position().saturating_add(next_size) > opts.maxsize {
            let tar = close_container(container, store, transfer, opts, &mut outcome)?;
            if let Some(ck) = checkpoint {
                ck.record(&tar, (i + 1) as u64);
            }
        } else {
            open = Some(container);
        }
    }
    Ok(outcome)
}

fn close_container(
    c: OpenContainer,
    store: &IndexStore,
    transfer: &dyn Transfer,
    opts: &PackOptions,
    outcome: &mut PackOutcome,
) -> Result<String> {
    let (name, path, rows, size, md5) = c.finish()?;
    info!("Closing tar archive {name}");
    store.insert_tar(&name, size, md5.as_deref())?;
    transfer.put(&path, opts.keep)?;
    store.insert_files(&rows)?;
    debug!("{name}: {} rows, {size} bytes", rows.len());
    outcome.rows += rows.len();
    outcome.containers.push(name.clone());
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::LocalOnly;
    use std::io::{Read, Seek};

    fn opts(maxsize: u64) -> PackOptions {
        PackOptions {
            maxsize,
            keep: true,
            follow_symlinks: false,
            tars_md5: true,
        }
    }

    #[test]
    fn offsets_point_at_member_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("src");
        let cache = tmp.path().join("cache");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&cache).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("b.txt"), vec![7u8; 700]).unwrap();

        let store = IndexStore::open_in_memory().unwrap();
        store.create_tars_table().unwrap();
        let files = vec!["a.txt".to_string(), "b.txt".to_string()];
        let out = add_files(&store, &root, &cache, &files, 0, &LocalOnly, &opts(1 << 20), None)
            .unwrap();
        assert!(out.failures.is_empty());
        assert_eq!(out.containers, vec!["000000.tar"]);

        let rows = store.all_files().unwrap();
        assert_eq!(rows[0].offset, 0);
        // 512 header + 5 bytes padded to 512
        assert_eq!(rows[1].offset, 1024);

        let mut f = File::open(cache.join("000000.tar")).unwrap();
        f.seek(SeekFrom::Start(rows[1].offset)).unwrap();
        let mut ar = tar::Archive::new(&f);
        let mut entry = ar.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some("b.txt"));
        let mut body = Vec::new();
        entry.read_to_end(&mut body).unwrap();
        assert_eq!(body.len(), 700);

        let tar_row = &store.tar_rows().unwrap()[0];
        assert_eq!(tar_row.size, f.metadata().unwrap().len());
        assert_eq!(
            tar_row.md5.as_deref(),
            Some(md5_file(&cache.join("000000.tar")).unwrap().as_str())
        );
    }

    #[test]
    fn missing_file_fails_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("src");
        let cache = tmp.path().join("cache");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&cache).unwrap();
        fs::write(root.join("present"), b"x").unwrap();

        let store = IndexStore::open_in_memory().unwrap();
        let files = vec!["gone".to_string(), "present".to_string()];
        let out = add_files(&store, &root, &cache, &files, 3, &LocalOnly, &opts(1 << 20), None)
            .unwrap();
        assert_eq!(out.failures, vec!["gone"]);
        let rows = store.all_files().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tar, "000003.tar");
    }
}
