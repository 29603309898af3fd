//! Command-line entry options.
//!
//! The engine runs headless; the full interactive front-end is a separate
//! consumer of the UI event channel. Only the data-directory override lives
//! here.

use std::path::PathBuf;

use clap::Parser;

/// Multi-queue download manager engine.
#[derive(Debug, Parser)]
#[command(name = "fetchq", version, about)]
pub struct Cli {
    /// Override the platform data directory (database and log file).
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}
