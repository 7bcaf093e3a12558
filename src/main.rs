//! # tpay - Task & Attendance Settlement Engine
//!
//! Rules, state machines and payouts behind a company-management console that pays task rewards and
//! attendance wages on-chain.
//!
//! ## What it does
//!
//! - **Task lifecycle**: tasks move NotStarted → InProgress → PendingReview → Completed (or Paused /
//!   Cancelled) along an explicit transition table. Department tasks are claimed first-come.
//! - **Reward tiers**: approval pays 5 / 15 / 20 for Easy / Medium / Hard work, halved when the
//!   completion instant is past the deadline instant.
//! - **Attendance ledger**: one record per employee per day, wage = hours × rate, leave overrides
//!   the hours-based status.
//! - **Missed-checkout adjudication**: approved reports pay half the effective hours; rejected ones
//!   become unpaid leave.
//! - **Idempotent settlement**: every payout carries a content-hash idempotency key and is submitted
//!   at most once; references must be `0x` + 64 hex characters to count.
//!
//! ## Quick Start
//!
//! ```bash
//! tpay employee add E1 --name "Lan" --department ops --wallet 0x...
//! tpay task add "Reconcile vendor ledger" --department ops --difficulty medium --deadline 2024-06-01
//! tpay task claim 1 E1
//! tpay task submit 1 --progress 100 --attach proof.pdf
//! tpay task approve 1
//! tpay attendance check-in E1
//! tpay attendance check-out 1
//! ```
//!
//! Data is stored in `~/.taskpay/` (override with `--data-dir` or `TASKPAY_HOME`).

use std::sync::Arc;

use clap::Parser;
use tracing::{error, warn};

pub mod adjudication;
pub mod amount;
pub mod attendance;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod fields;
pub mod files;
pub mod ledger;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod reward;
pub mod settlement;
pub mod stats;
pub mod store;
pub mod task;

use cli::Cli;
use cmd::*;
use config::{resolve_data_dir, Settings, DATABASE_FILE, SETTINGS_FILE};
use engine::Engine;
use error::Result;
use settlement::JournalGateway;
use store::Store;

fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return;
    }

    let data_dir = resolve_data_dir(cli.data_dir.as_deref());
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("Failed to create data directory {}: {}", data_dir.display(), e);
        std::process::exit(1);
    }

    let settings_path = cli.config.clone().unwrap_or_else(|| data_dir.join(SETTINGS_FILE));
    let settings = match Settings::load(&settings_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = logging::init_logging(&settings, cli.log_level.as_deref()) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli.command, &data_dir, settings) {
        if e.is_contention() {
            warn!(error = %e, "command refused, another operation holds the entity");
        } else {
            error!(error = %e, "command failed");
        }
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Commands, data_dir: &std::path::Path, settings: Settings) -> Result<()> {
    let store = Arc::new(Store::open(&data_dir.join(DATABASE_FILE))?);
    let journal = Arc::new(JournalGateway::open(&settings.journal_path(data_dir), settings.token_decimals)?);
    let explorer_host = settings.explorer_host.clone();
    let engine = Engine::new(store, Arc::clone(&journal), settings);

    match command {
        Commands::Employee { action } => cmd_employee(&engine, action),
        Commands::Task { action } => cmd_task(&engine, action),
        Commands::Attendance { action } => cmd_attendance(&engine, action),
        Commands::Settlements => {
            cmd_settlements(&journal, &explorer_host);
            Ok(())
        }
        Commands::Stats { from, to } => cmd_stats(&engine, from, to),
        Commands::Completions { .. } => unreachable!("completions handled before setup"),
    }
}
