use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::index::inmem::sort_for_retrieval;
use crate::index::store::IndexStore;
use crate::ops::Session;
use crate::transfer_factory::TransferOptions;
use crate::util::timestamp;

const FILE_HEADER: &str = "id\tname\tsize\tmtime\tmd5\ttar\toffset";
const TARS_HEADER: &str = "id\tname\tsize\tmd5";

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub base: PathBuf,
    pub cache: Option<PathBuf>,
    pub hpss: Option<String>,
    pub patterns: Vec<String>,
    /// Print every column.
    pub long: bool,
    /// Also list the `tars` table.
    pub tars: bool,
    pub transfer: TransferOptions,
}

/// Print matching index rows to stdout.
pub fn list(opts: &ListOptions) -> Result<()> {
    let overrides = ArchiveConfig {
        hpss: opts.hpss.clone(),
        ..ArchiveConfig::default()
    };
    let session = Session::open(&opts.base, opts.cache.as_deref(), &overrides, &opts.transfer)?;
    let stdout = std::io::stdout();
    list_to(&session.store, &opts.patterns, opts.long, opts.tars, &mut stdout.lock())
}

/// Write records whose name or container matches any pattern (all when
/// empty), in container order. Every row is listed, including older
/// versions of a name.
pub fn list_to(
    store: &IndexStore,
    patterns: &[String],
    long: bool,
    tars: bool,
    out: &mut impl Write,
) -> Result<()> {
    debug!("Running ls");
    let mut records = if patterns.is_empty() {
        store.select_glob(&["*".to_string()])?
    } else {
        store.select_glob(patterns)?
    };
    sort_for_retrieval(&mut records);

    if long {
        writeln!(out, "{FILE_HEADER}")?;
    }
    for r in &records {
        if long {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.id,
                r.name,
                r.size,
                timestamp::format_seconds(r.mtime)?,
                r.md5.as_deref().unwrap_or("None"),
                r.tar,
                r.offset
            )?;
        } else {
            writeln!(out, "{}", r.name)?;
        }
    }

    if tars {
        if !store.has_table("tars")? {
            writeln!(out, "\ntars table does not exist")?;
            return Ok(());
        }
        let mut rows = store.tar_rows()?;
        rows.sort_by(|a, b| (&a.name, a.id).cmp(&(&b.name, b.id)));
        if !rows.is_empty() {
            writeln!(out, "\nTars:")?;
            if long {
                writeln!(out, "{TARS_HEADER}")?;
            }
        }
        for t in &rows {
            if long {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    t.id,
                    t.name,
                    t.size,
                    t.md5.as_deref().unwrap_or("None")
                )?;
            } else {
                writeln!(out, "{}", t.name)?;
            }
        }
    }
    Ok(())
}
