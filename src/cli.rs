use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Task and attendance settlement console.
/// State lives in <data dir>/company.json; payouts are journaled in <data dir>/settlements.json.
#[derive(Parser)]
#[command(name = "tpay", version, about = "Task rewards, attendance wages and their on-chain settlement")]
pub struct Cli {
    /// Data directory (default: $TASKPAY_HOME or ~/.taskpay).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Settings file (default: <data dir>/settings.json).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level: error | warn | info | debug | trace.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}
