//! CLI arguments
//!
//! The torrent document itself always arrives on standard input; the
//! flags only tune where files land and how chatty the logs are.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the leeching client
#[derive(Debug, Parser)]
#[command(name = "minnow")]
#[command(about = "A single-torrent BitTorrent leeching client", long_about = None)]
pub struct CliArgs {
    /// Directory to download into
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Port announced to trackers
    #[arg(short, long, default_value_t = 50000)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from the command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Map the verbosity flags to a log level
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["minnow"]);
        assert_eq!(args.output_dir, PathBuf::from("."));
        assert_eq!(args.port, 50000);
        assert!(!args.verbose);
        assert!(!args.quiet);
    }

    #[test]
    fn test_log_level() {
        let args = CliArgs::parse_from(["minnow", "--verbose"]);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        let args = CliArgs::parse_from(["minnow", "--quiet"]);
        assert_eq!(args.log_level(), tracing::Level::ERROR);
        let args = CliArgs::parse_from(["minnow"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }
}
