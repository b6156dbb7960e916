//! Command-line interface definitions.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Paths and run limits live here; everything else is tuned through the YAML
//! config file (see [`crate::config`]).

use clap::Parser;

/// Command-line arguments for one pipeline run.
///
/// # Examples
///
/// ```sh
/// # Basic usage with the default site list and config
/// news_digest -o ./digest
///
/// # Explicit source list and config, bounded run
/// news_digest -s site-list.txt -c config.yaml -o ./digest --run-timeout-secs 600
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the pipe-delimited source list
    #[arg(short, long, default_value = "site-list.txt")]
    pub source_list: String,

    /// Optional path to config.yaml
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output directory for the Markdown digest
    #[arg(short = 'o', long, default_value = "digest")]
    pub digest_output_dir: String,

    /// History store path (overrides the config file)
    #[arg(long)]
    pub store_path: Option<String>,

    /// Overall wall-clock budget for the run, in seconds (overrides the
    /// config file)
    #[arg(long, env = "RUN_TIMEOUT_SECS")]
    pub run_timeout_secs: Option<u64>,

    /// Print the N most recent history records and exit without crawling
    #[arg(long, value_name = "N")]
    pub show_recent: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["news_digest"]);
        assert_eq!(cli.source_list, "site-list.txt");
        assert_eq!(cli.digest_output_dir, "digest");
        assert!(cli.config.is_none());
        assert!(cli.run_timeout_secs.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "news_digest",
            "-s",
            "/tmp/sources.txt",
            "-o",
            "/tmp/digest",
            "--run-timeout-secs",
            "120",
        ]);
        assert_eq!(cli.source_list, "/tmp/sources.txt");
        assert_eq!(cli.digest_output_dir, "/tmp/digest");
        assert_eq!(cli.run_timeout_secs, Some(120));
    }
}
