use time::OffsetDateTime;

/// Width of the hexadecimal container index.
pub const TAR_INDEX_WIDTH: usize = 6;
pub const TAR_EXT: &str = ".tar";

/// One row of the `files` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub size: u64,
    pub mtime: OffsetDateTime,
    /// `None` for directories and symbolic links.
    pub md5: Option<String>,
    pub tar: String,
    /// Byte offset of the member's first header block inside `tar`.
    pub offset: u64,
}

impl FileRecord {
    /// Ordering key for "latest wins" resolution.
    pub fn recency(&self) -> (OffsetDateTime, i64) {
        (self.mtime, self.id)
    }
}

/// A file packed into a container, not yet assigned a row id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedFile {
    pub name: String,
    pub size: u64,
    pub mtime: OffsetDateTime,
    pub md5: Option<String>,
    pub tar: String,
    pub offset: u64,
}

/// Size and whole-second mtime of a path, as seen by the scanner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: OffsetDateTime,
}

/// One row of the `tars` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TarRow {
    pub id: i64,
    pub name: String,
    pub size: u64,
    pub md5: Option<String>,
}

pub fn tar_name(index: u64) -> String {
    format!("{index:0width$x}{TAR_EXT}", width = TAR_INDEX_WIDTH)
}

/// Numeric index of a container name such as `00002a.tar`.
pub fn tar_index(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(TAR_EXT).unwrap_or(name);
    if stem.is_empty() {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}
