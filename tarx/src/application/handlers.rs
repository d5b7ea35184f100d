use std::path::PathBuf;
use std::time::Duration;

use tarx_core::error::Result;
use tarx_core::{
    CreateOptions, ListOptions, RetrieveRequest, TransferOptions, UpdateOptions, create, list,
    retrieve, update,
};
use tracing::error;

use crate::presentation::cli::{RetrieveArgs, TransferArgs};

fn transfer_options(args: TransferArgs) -> TransferOptions {
    TransferOptions {
        put_template: args.put_cmd,
        get_template: args.get_cmd,
        timeout: args.transfer_timeout.map(Duration::from_secs),
    }
}

fn current_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

fn report_failed_names(failures: &[String], what: &str) {
    if failures.is_empty() {
        return;
    }
    error!("Failed to {what} {} file(s):", failures.len());
    for name in failures {
        error!("{name}");
    }
}

#[allow(clippy::too_many_arguments)]
pub fn handle_create(
    path: PathBuf,
    hpss: Option<String>,
    include: Option<String>,
    exclude: Option<String>,
    maxsize: f64,
    keep: bool,
    cache: Option<PathBuf>,
    follow_symlinks: bool,
    no_tars_md5: bool,
    transfer: TransferArgs,
) -> Result<usize> {
    let opts = CreateOptions {
        root: path,
        hpss,
        include,
        exclude,
        maxsize_gib: maxsize,
        keep,
        cache,
        follow_symlinks,
        tars_md5: !no_tars_md5,
        transfer: transfer_options(transfer),
    };
    let failures = create(&opts)?;
    report_failed_names(&failures, "archive");
    Ok(failures.len())
}

#[allow(clippy::too_many_arguments)]
pub fn handle_update(
    hpss: Option<String>,
    include: Option<String>,
    exclude: Option<String>,
    maxsize: Option<f64>,
    keep: bool,
    cache: Option<PathBuf>,
    follow_symlinks: bool,
    dry_run: bool,
    resume: bool,
    clear_checkpoint: bool,
    no_tars_md5: bool,
    transfer: TransferArgs,
) -> Result<usize> {
    let opts = UpdateOptions {
        base: current_dir()?,
        cache,
        hpss,
        include,
        exclude,
        maxsize_gib: maxsize,
        keep: keep.then_some(true),
        follow_symlinks,
        dry_run,
        resume,
        clear_checkpoint,
        no_tars_md5,
        transfer: transfer_options(transfer),
    };
    let failures = update(&opts)?;
    report_failed_names(&failures, "archive");
    Ok(failures.len())
}

pub fn handle_retrieve(args: RetrieveArgs, keep_files: bool) -> Result<usize> {
    // "*" is what an empty selection means anyway
    let patterns: Vec<String> = args.files.into_iter().filter(|f| f != "*").collect();
    let req = RetrieveRequest {
        keep_files,
        base: current_dir()?,
        patterns,
        cache: args.cache,
        dest: args.dest,
        hpss: args.hpss,
        keep: args.keep.then_some(true),
        include: args.include,
        exclude: args.exclude,
        workers: args.workers,
        resume: args.resume,
        clear_checkpoint: args.clear_checkpoint,
        retries: args.retries,
        retry_delay: Duration::from_secs(1),
        tars: args.tars,
        error_on_duplicate_tar: args.error_on_duplicate_tar,
        transfer: transfer_options(args.transfer),
    };
    Ok(retrieve(&req)?.len())
}

pub fn handle_ls(
    files: Vec<String>,
    hpss: Option<String>,
    cache: Option<PathBuf>,
    long: bool,
    tars: bool,
    transfer: TransferArgs,
) -> Result<()> {
    let opts = ListOptions {
        base: current_dir()?,
        cache,
        hpss,
        patterns: files,
        long,
        tars,
        transfer: transfer_options(transfer),
    };
    list(&opts)
}
