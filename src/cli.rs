use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "scanlog", version, about = "Barcode scan history")]
pub struct Cli {
    /// Settings file (JSON). The database lives next to it unless configured.
    #[arg(long, global = true, default_value = "scanlog.json")]
    pub config: PathBuf,

    /// Database file, overriding settings and SCANLOG_DB.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Feed a recorded detection log through the scanner.
    Replay { log: PathBuf },

    /// Show the latest scans, newest first.
    History {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print export rows for an inclusive date range.
    Export {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },

    /// Set or clear (empty text) the note of a scan.
    Note {
        id: i64,
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
}
