use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "tarx: archive directory trees into indexed tar containers", long_about = None)]
pub struct Cli {
    /// Increase output verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for the external transfer command.
#[derive(Args, Clone, Debug, Default)]
pub struct TransferArgs {
    /// Shell command pushing a file; `{dest}` and `{name}` are expanded
    #[arg(long = "put-cmd")]
    pub put_cmd: Option<String>,

    /// Shell command fetching a file; `{dest}` and `{name}` are expanded
    #[arg(long = "get-cmd")]
    pub get_cmd: Option<String>,

    /// Seconds before a transfer command is abandoned
    #[arg(long = "transfer-timeout")]
    pub transfer_timeout: Option<u64>,
}

/// Shared by `extract` and `check`.
#[derive(Args, Clone, Debug)]
pub struct RetrieveArgs {
    /// Globs over file or container names (default: everything)
    pub files: Vec<String>,

    /// Backend location; `none` for local-only archives
    #[arg(long)]
    pub hpss: Option<String>,

    /// Comma-separated globs of names to keep
    #[arg(long)]
    pub include: Option<String>,

    /// Comma-separated globs of names to skip
    #[arg(long)]
    pub exclude: Option<String>,

    /// Keep fetched containers in the cache
    #[arg(long)]
    pub keep: bool,

    /// Cache directory holding the index and containers
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Continue from the last recorded checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Drop existing checkpoints before starting
    #[arg(long = "clear-checkpoint")]
    pub clear_checkpoint: bool,

    /// Extra attempts for each container fetch
    #[arg(long, default_value_t = 1)]
    pub retries: u32,

    /// Containers to process, e.g. `000000-000003,00000a`
    #[arg(long)]
    pub tars: Option<String>,

    /// Abort when a container has several `tars` rows
    #[arg(long = "error-on-duplicate-tar")]
    pub error_on_duplicate_tar: bool,

    /// Where extracted files are written (default: current directory)
    #[arg(long)]
    pub dest: Option<PathBuf>,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Archive a directory into a new set of tar containers
    Create {
        /// Directory to archive
        path: PathBuf,

        /// Backend location; `none` keeps everything local
        #[arg(long)]
        hpss: Option<String>,

        /// Comma-separated globs of names to archive
        #[arg(long)]
        include: Option<String>,

        /// Comma-separated globs of names to skip; `dir/` skips a subtree
        #[arg(long)]
        exclude: Option<String>,

        /// Container size budget in GiB
        #[arg(long, default_value_t = 256.0)]
        maxsize: f64,

        /// Keep containers locally after transfer
        #[arg(long)]
        keep: bool,

        /// Cache directory (relative names live under the archived directory)
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Archive symlink targets instead of the links
        #[arg(long = "follow-symlinks")]
        follow_symlinks: bool,

        /// Do not record container sizes and checksums
        #[arg(long = "no-tars-md5")]
        no_tars_md5: bool,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Archive new and changed files of an existing archive
    Update {
        #[arg(long)]
        hpss: Option<String>,

        #[arg(long)]
        include: Option<String>,

        #[arg(long)]
        exclude: Option<String>,

        /// Container size budget in GiB (default: the stored value)
        #[arg(long)]
        maxsize: Option<f64>,

        #[arg(long)]
        keep: bool,

        #[arg(long)]
        cache: Option<PathBuf>,

        #[arg(long = "follow-symlinks")]
        follow_symlinks: bool,

        /// List what would be archived and stop
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Report the last update checkpoint before scanning
        #[arg(long)]
        resume: bool,

        #[arg(long = "clear-checkpoint")]
        clear_checkpoint: bool,

        /// Do not record container sizes and hashes
        #[arg(long = "no-tars-md5")]
        no_tars_md5: bool,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Restore files from the archive
    Extract(RetrieveArgs),

    /// Verify archived files without writing them
    Check(RetrieveArgs),

    /// List archived files
    Ls {
        /// Globs over file or container names (default: everything)
        files: Vec<String>,

        #[arg(long)]
        hpss: Option<String>,

        #[arg(long)]
        cache: Option<PathBuf>,

        /// Print every column
        #[arg(short = 'l', long = "long")]
        long: bool,

        /// Also list the container table
        #[arg(long)]
        tars: bool,

        #[command(flatten)]
        transfer: TransferArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_flags_parse() {
        let cli = Cli::try_parse_from([
            "tarx", "check", "-v", "--workers", "3", "--tars", "000000-000002", "--retries", "2",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Check(args) => {
                assert_eq!(args.workers, 3);
                assert_eq!(args.retries, 2);
                assert_eq!(args.tars.as_deref(), Some("000000-000002"));
                assert!(args.files.is_empty());
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn create_defaults() {
        let cli = Cli::try_parse_from(["tarx", "create", "/data", "--hpss", "none"]).unwrap();
        match cli.command {
            Commands::Create {
                path,
                maxsize,
                no_tars_md5,
                ..
            } => {
                assert_eq!(path, PathBuf::from("/data"));
                assert_eq!(maxsize, 256.0);
                assert!(!no_tars_md5);
            }
            _ => panic!("expected create"),
        }
    }
}
