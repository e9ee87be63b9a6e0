use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tapeimgr")]
#[command(about = "Image tape sessions to disk files with SHA-512 checksums")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Specify configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract tape sessions to files in an output directory
    Extract {
        /// Output directory (must exist and be writable)
        #[arg(value_name = "DIR_OUT")]
        dir_out: PathBuf,

        /// Tape device path (non-rewinding, e.g. /dev/nst0)
        #[arg(short, long)]
        device: Option<String>,

        /// Initial block size in bytes
        #[arg(short, long)]
        block_size: Option<String>,

        /// Comma-separated session numbers to extract (default: all)
        #[arg(short, long, default_value = "")]
        sessions: String,

        /// Output file name prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Output file extension
        #[arg(long)]
        extension: Option<String>,

        /// Pad unreadable blocks with zeros instead of stopping the session
        #[arg(short, long)]
        fill_blocks: bool,

        /// Skip confirmation prompt when output files exist
        #[arg(long)]
        force: bool,

        /// Read from a simulated tape described by a JSON layout file
        #[arg(long, value_name = "LAYOUT")]
        simulate: Option<PathBuf>,

        /// Write the run outcome as JSON to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Verify output files against checksums.sha512
    Verify {
        /// Directory containing checksums.sha512
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Check tape device status
    Status {
        /// Tape device path
        #[arg(short, long)]
        device: Option<String>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
