pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use tarx_core::error::Result;

/// Dispatch a parsed command line. Returns the number of entries that
/// failed to archive, extract or verify.
pub fn run(cli: Cli) -> Result<usize> {
    match cli.command {
        Commands::Create {
            path,
            hpss,
            include,
            exclude,
            maxsize,
            keep,
            cache,
            follow_symlinks,
            no_tars_md5,
            transfer,
        } => handlers::handle_create(
            path,
            hpss,
            include,
            exclude,
            maxsize,
            keep,
            cache,
            follow_symlinks,
            no_tars_md5,
            transfer,
        ),
        Commands::Update {
            hpss,
            include,
            exclude,
            maxsize,
            keep,
            cache,
            follow_symlinks,
            dry_run,
            resume,
            clear_checkpoint,
            no_tars_md5,
            transfer,
        } => handlers::handle_update(
            hpss,
            include,
            exclude,
            maxsize,
            keep,
            cache,
            follow_symlinks,
            dry_run,
            resume,
            clear_checkpoint,
            no_tars_md5,
            transfer,
        ),
        Commands::Extract(args) => handlers::handle_retrieve(args, true),
        Commands::Check(args) => handlers::handle_retrieve(args, false),
        Commands::Ls {
            files,
            hpss,
            cache,
            long,
            tars,
            transfer,
        } => handlers::handle_ls(files, hpss, cache, long, tars, transfer).map(|_| 0),
    }
}
