/// Counters collected while scanning a source tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub dirs: u64,
    pub files: u64,
    pub symlinks: u64,
    pub empty_dirs: u64,
    /// Directories that could not be read.
    pub skipped: u64,
    pub bytes: u64,
}
