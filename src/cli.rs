//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Download and track Humble Bundle purchases.
///
/// Wraps the external `humble-cli` tool with concurrent downloads,
/// duplicate suppression, and a durable record of what has already been
/// fetched.
#[derive(Parser, Debug)]
#[command(name = "humble-sync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to config file (default: ~/.humblebundle/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List purchased bundles
    Bundles,

    /// Show items and keys in one bundle
    Details {
        /// Bundle key (may be a unique prefix)
        bundle_key: String,
    },

    /// Download items from a bundle
    Download {
        /// Bundle key (may be a unique prefix)
        bundle_key: String,

        /// Format to download (e.g. epub, pdf, mobi)
        #[arg(short, long, default_value = "epub")]
        format: String,

        /// Item numbers to download (default: every item offering the format)
        #[arg(short, long, value_delimiter = ',')]
        items: Vec<u32>,

        /// Maximum concurrent downloads (1-10, overrides config)
        #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=10))]
        concurrency: Option<u8>,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Re-download items already recorded as completed
        #[arg(long)]
        force: bool,
    },

    /// Show completed-download statistics from the ledger
    Stats {
        /// Restrict to one bundle
        bundle_key: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_bundles_subcommand_parses() {
        let args = Args::try_parse_from(["humble-sync", "bundles"]).unwrap();
        assert!(matches!(args.command, Command::Bundles));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_download_defaults() {
        let args = Args::try_parse_from(["humble-sync", "download", "mybundle"]).unwrap();
        match args.command {
            Command::Download {
                bundle_key,
                format,
                items,
                concurrency,
                force,
                ..
            } => {
                assert_eq!(bundle_key, "mybundle");
                assert_eq!(format, "epub");
                assert!(items.is_empty());
                assert!(concurrency.is_none());
                assert!(!force);
            }
            other => panic!("expected Download, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_download_item_list_parses_commas() {
        let args =
            Args::try_parse_from(["humble-sync", "download", "mybundle", "-i", "1,3,5"]).unwrap();
        match args.command {
            Command::Download { items, .. } => assert_eq!(items, vec![1, 3, 5]),
            other => panic!("expected Download, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_concurrency_out_of_range_rejected() {
        let result =
            Args::try_parse_from(["humble-sync", "download", "mybundle", "-c", "11"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_verbose_flag_works_after_subcommand() {
        let args = Args::try_parse_from(["humble-sync", "bundles", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_stats_optional_bundle_key() {
        let args = Args::try_parse_from(["humble-sync", "stats"]).unwrap();
        assert!(matches!(args.command, Command::Stats { bundle_key: None }));

        let args = Args::try_parse_from(["humble-sync", "stats", "mybundle"]).unwrap();
        match args.command {
            Command::Stats { bundle_key } => assert_eq!(bundle_key.as_deref(), Some("mybundle")),
            other => panic!("expected Stats, got {other:?}"),
        }
    }
}
