//! Command implementations for the CLI interface.
//!
//! Each subcommand maps to one `cmd_*` handler. Handlers print human-readable output to stdout and
//! return errors to `main`, which logs them and sets the exit status.

use std::path::PathBuf;

use chrono::{Local, NaiveDate, NaiveTime, Utc};
use clap::{CommandFactory, Subcommand};
use clap_complete::{generate, Shell};

use crate::adjudication::MissedCheckoutReport;
use crate::attendance::AttendanceRecord;
use crate::cli::Cli;
use crate::db::{parse_day, truncate, Employee};
use crate::engine::{Engine, SettlementOutcome};
use crate::error::{EngineError, Result};
use crate::fields::*;
use crate::files::{FileStore, LocalFileStore};
use crate::ledger::AttendanceFilter;
use crate::lifecycle::{NewTask, TaskFilter};
use crate::settlement::{JournalGateway, TxHash};
use crate::stats::{attendance_stats, task_stats};
use crate::task::{combine_deadline, Task};

#[derive(Subcommand)]
pub enum Commands {
    /// Manage employees.
    Employee {
        #[command(subcommand)]
        action: EmployeeAction,
    },

    /// Create, move and pay tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Check-in, check-out, leave and missed-checkout reports.
    Attendance {
        #[command(subcommand)]
        action: AttendanceAction,
    },

    /// List journaled settlements.
    Settlements,

    /// Task and attendance statistics.
    Stats {
        /// First day for attendance figures (default: 30 days ago).
        #[arg(long)]
        from: Option<String>,
        /// Last day for attendance figures (default: today).
        #[arg(long)]
        to: Option<String>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum EmployeeAction {
    /// Register an employee.
    Add {
        /// Employee id, e.g. EMP001.
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        department: String,
        /// Wallet address payouts are sent to.
        #[arg(long)]
        wallet: Option<String>,
    },
    /// List employees.
    List,
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a task. Leave out --assignee to post it to the whole department.
    Add {
        title: String,
        #[arg(long)]
        department: String,
        #[arg(long)]
        assignee: Option<String>,
        /// Difficulty tier: easy | medium | hard.
        #[arg(long, default_value = "medium")]
        difficulty: String,
        #[arg(long, value_enum, default_value_t = Priority::Normal)]
        priority: Priority,
        /// Deadline date, YYYY-MM-DD.
        #[arg(long)]
        deadline: String,
        /// Deadline time of day in local time, HH:MM.
        #[arg(long, default_value = "17:00")]
        deadline_time: String,
        #[arg(long)]
        desc: Option<String>,
    },
    /// List tasks.
    List {
        #[arg(long, value_enum)]
        status: Option<TaskStatus>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Only unassigned department tasks.
        #[arg(long)]
        claimable: bool,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one task.
    View { id: u64 },
    /// Claim a department task.
    Claim { id: u64, employee: String },
    /// Start an assigned task.
    Start { id: u64 },
    /// Report progress, optionally attaching evidence files.
    Submit {
        id: u64,
        #[arg(long)]
        progress: u8,
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// Approve reviewed work and pay the reward.
    Approve { id: u64 },
    /// Send reviewed work back.
    Reject {
        id: u64,
        #[arg(long)]
        reason: String,
        /// Progress to reset to.
        #[arg(long, default_value_t = 0)]
        progress: u8,
    },
    Pause {
        id: u64,
        #[arg(long)]
        note: Option<String>,
    },
    Resume { id: u64 },
    Cancel {
        id: u64,
        #[arg(long)]
        note: Option<String>,
    },
    /// Re-submit a failed reward payment.
    RetryPayment { id: u64 },
}

#[derive(Subcommand)]
pub enum AttendanceAction {
    /// Check in now.
    CheckIn {
        employee: String,
        /// Day to record (default: today).
        #[arg(long)]
        day: Option<String>,
    },
    /// Check out now and pay the day's wage.
    CheckOut { record: u64 },
    /// Report a missed checkout.
    Report {
        record: u64,
        #[arg(long)]
        hours: f64,
        #[arg(long)]
        desc: String,
        #[arg(long = "evidence")]
        evidence: Vec<String>,
    },
    /// Approve or reject a missed-checkout report.
    Decide {
        record: u64,
        #[arg(value_enum)]
        action: DecisionAction,
        #[arg(long)]
        note: Option<String>,
        /// Hours the admin confirms; defaults to the declared hours.
        #[arg(long)]
        hours: Option<f64>,
    },
    /// Record leave for a day.
    Leave {
        employee: String,
        day: String,
        #[arg(value_enum)]
        kind: LeaveKind,
    },
    /// Show what a day counts as.
    Day { employee: String, day: String },
    /// List records in a date range.
    List {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        employee: Option<String>,
        #[arg(long, value_enum)]
        status: Option<AttendanceStatus>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Missed-checkout reports awaiting a decision.
    Pending,
    /// Re-submit a failed wage payment.
    RetryPayment { record: u64 },
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn explorer_link(reference: Option<TxHash>, host: &str) -> String {
    reference.map(|r| r.explorer_url(host)).unwrap_or_else(|| "-".into())
}

fn print_settlement(outcome: &SettlementOutcome, host: &str) {
    match outcome {
        SettlementOutcome::Settled(record) => {
            println!("Paid {} to {}: {}", record.amount, record.recipient, record.tx_ref.explorer_url(host))
        }
        SettlementOutcome::Skipped => println!("Nothing to pay."),
        SettlementOutcome::Failed(reason) => {
            println!("Payment FAILED ({reason}). Retry with `retry-payment` once the gateway is reachable.")
        }
    }
}

pub fn cmd_employee(engine: &Engine, action: EmployeeAction) -> Result<()> {
    match action {
        EmployeeAction::Add { id, name, department, wallet } => {
            let id = id.trim().to_string();
            if id.is_empty() || department.trim().is_empty() {
                return Err(EngineError::InvalidArgument("employee id and department are required".into()));
            }
            engine.store().mutate(|db| {
                if db.employee(&id).is_some() {
                    return Err(EngineError::InvalidArgument(format!("employee {id} already exists")));
                }
                db.employees.push(Employee {
                    id: id.clone(),
                    name: name.trim().to_string(),
                    department: department.trim().to_string(),
                    wallet: wallet.filter(|w| !w.trim().is_empty()),
                });
                Ok(())
            })?;
            println!("Added employee {id}");
        }
        EmployeeAction::List => {
            let snapshot = engine.store().snapshot();
            println!("{:<10} {:<20} {:<14} {}", "ID", "Name", "Department", "Wallet");
            for e in &snapshot.employees {
                println!(
                    "{:<10} {:<20} {:<14} {}",
                    e.id,
                    truncate(&e.name, 20),
                    truncate(&e.department, 14),
                    e.wallet.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

/// Print tasks in a formatted table.
pub fn print_task_table(tasks: &[Task]) {
    println!(
        "{:<5} {:<15} {:<7} {:<4} {:<17} {:<10} {:<12} {:<9} {}",
        "ID", "Status", "Tier", "%", "Deadline", "Assignee", "Department", "Payment", "Title"
    );
    for t in tasks {
        println!(
            "{:<5} {:<15} {:<7} {:<4} {:<17} {:<10} {:<12} {:<9} {}",
            t.id,
            format_task_status(t.status),
            format_difficulty(t.difficulty),
            t.progress,
            t.deadline.format("%Y-%m-%d %H:%M"),
            t.assignee.as_deref().unwrap_or("(open)"),
            truncate(&t.department, 12),
            format_payment_status(t.payment_status),
            t.title
        );
    }
}

fn print_task(t: &Task, explorer_host: &str) {
    println!("ID:           {}", t.id);
    println!("Title:        {}", t.title);
    println!("Status:       {}", format_task_status(t.status));
    println!("Department:   {}", t.department);
    println!("Assignee:     {}", t.assignee.as_deref().unwrap_or("(unclaimed)"));
    println!("Difficulty:   {}", format_difficulty(t.difficulty));
    println!("Priority:     {:?}", t.priority);
    println!("Progress:     {}%", t.progress);
    println!("Start:        {}", t.start.to_rfc3339());
    println!("Deadline:     {}", t.deadline.to_rfc3339());
    println!("Completed:    {}", t.completed_at.map(|c| c.to_rfc3339()).unwrap_or_else(|| "-".into()));
    println!("Reward:       {}", t.reward);
    println!("Penalty:      {}", t.penalty);
    println!("Payment:      {}", format_payment_status(t.payment_status));
    println!("Transaction:  {}", explorer_link(t.settlement_ref(), explorer_host));
    println!("Description:\n{}\n", t.description.as_deref().unwrap_or("-"));
    if !t.attachments.is_empty() {
        println!("Attachments:");
        for a in &t.attachments {
            println!("  - {} ({} bytes, {:?}) {}", a.name, a.size_bytes, a.uploaded_by, a.url);
        }
    }
    if !t.history.is_empty() {
        println!("History:");
        for h in &t.history {
            println!(
                "  {} {} -> {}{}",
                h.at.format("%Y-%m-%d %H:%M"),
                format_task_status(h.from),
                format_task_status(h.to),
                h.note.as_ref().map(|n| format!(" ({n})")).unwrap_or_default()
            );
        }
    }
}

pub fn cmd_task(engine: &Engine, action: TaskAction) -> Result<()> {
    let host = engine.settings().explorer_host.clone();
    let now = Utc::now();
    match action {
        TaskAction::Add { title, department, assignee, difficulty, priority, deadline, deadline_time, desc } => {
            let difficulty: Difficulty = difficulty.parse()?;
            let date = parse_day(&deadline, today())?;
            let time = NaiveTime::parse_from_str(&deadline_time, "%H:%M")
                .map_err(|_| EngineError::InvalidArgument(format!("unrecognised time '{deadline_time}', use HH:MM")))?;
            let id = engine.create_task(
                NewTask {
                    title,
                    description: desc,
                    department,
                    assignee,
                    priority,
                    difficulty,
                    start: now,
                    deadline: combine_deadline(date, time, &Local)?,
                },
                now,
            )?;
            println!("Added task {id}");
        }
        TaskAction::List { status, department, assignee, claimable, offset, limit } => {
            let filter = TaskFilter { status, department, assignee, claimable_only: claimable, offset, limit };
            print_task_table(&engine.list_tasks(&filter));
        }
        TaskAction::View { id } => print_task(&engine.task(id)?, &host),
        TaskAction::Claim { id, employee } => {
            engine.claim(id, &employee, now)?;
            println!("Task {id} claimed by {employee}");
        }
        TaskAction::Start { id } => {
            engine.start_task(id, now)?;
            println!("Started task {id}");
        }
        TaskAction::Submit { id, progress, attachments } => {
            let files = LocalFileStore.upload(&attachments, UploaderRole::Worker)?;
            let status = engine.submit_for_review(id, progress, files, now)?;
            println!("Task {id} at {progress}%: {}", format_task_status(status));
        }
        TaskAction::Approve { id } => {
            let receipt = engine.approve(id)?;
            println!(
                "Approved task {id} ({}): reward {}, penalty {}",
                if receipt.on_time { "on time" } else { "late" },
                receipt.reward,
                receipt.penalty
            );
            print_settlement(&receipt.settlement, &host);
        }
        TaskAction::Reject { id, reason, progress } => {
            engine.reject(id, &reason, progress, now)?;
            println!("Rejected task {id}, back to In progress at {progress}%");
        }
        TaskAction::Pause { id, note } => {
            engine.pause(id, note, now)?;
            println!("Paused task {id}");
        }
        TaskAction::Resume { id } => {
            engine.resume(id, now)?;
            println!("Resumed task {id}");
        }
        TaskAction::Cancel { id, note } => {
            engine.cancel(id, note, now)?;
            println!("Cancelled task {id}");
        }
        TaskAction::RetryPayment { id } => print_settlement(&engine.retry_task_settlement(id)?, &host),
    }
    Ok(())
}

fn print_attendance_table(rows: &[AttendanceRecord]) {
    println!(
        "{:<5} {:<10} {:<11} {:<6} {:<6} {:<7} {:<16} {:<17} {}",
        "ID", "Employee", "Day", "In", "Out", "Hours", "Status", "Missed checkout", "Wage"
    );
    for r in rows {
        println!(
            "{:<5} {:<10} {:<11} {:<6} {:<6} {:<7} {:<16} {:<17} {}",
            r.id,
            r.employee_id,
            r.day,
            r.check_in.map(|t| t.format("%H:%M").to_string()).unwrap_or_else(|| "-".into()),
            r.check_out.map(|t| t.format("%H:%M").to_string()).unwrap_or_else(|| "-".into()),
            format!("{:.2}", r.total_hours),
            r.display().label(),
            format_adjudication(r.missed_checkout.status),
            r.wage
        );
    }
}

pub fn cmd_attendance(engine: &Engine, action: AttendanceAction) -> Result<()> {
    let host = engine.settings().explorer_host.clone();
    let now = Utc::now();
    match action {
        AttendanceAction::CheckIn { employee, day } => {
            let day = match day {
                Some(d) => parse_day(&d, today())?,
                None => today(),
            };
            let id = engine.check_in(&employee, day, now)?;
            println!("Checked in {employee} for {day} (record {id})");
        }
        AttendanceAction::CheckOut { record } => {
            let receipt = engine.check_out(record, now)?;
            println!("Checked out record {record}: {:.2}h, wage {}", receipt.hours, receipt.wage);
            print_settlement(&receipt.settlement, &host);
        }
        AttendanceAction::Report { record, hours, desc, evidence } => {
            let report = MissedCheckoutReport { declared_hours: hours, description: desc, evidence_urls: evidence };
            engine.report_missed_checkout(record, report, now)?;
            println!("Missed checkout reported for record {record}; awaiting approval");
        }
        AttendanceAction::Decide { record, action, note, hours } => {
            let receipt = engine.decide(record, action, note, hours, now)?;
            println!("Record {record}: {}, wage {}", format_adjudication(receipt.status), receipt.wage);
            print_settlement(&receipt.settlement, &host);
        }
        AttendanceAction::Leave { employee, day, kind } => {
            let day = parse_day(&day, today())?;
            let id = engine.set_leave(&employee, day, kind)?;
            println!("{employee} on {} for {day} (record {id})", format_leave(kind));
        }
        AttendanceAction::Day { employee, day } => {
            let day = parse_day(&day, today())?;
            println!("{employee} {day}: {}", engine.day_status(&employee, day).label());
        }
        AttendanceAction::List { from, to, employee, status, offset, limit } => {
            let to = match to {
                Some(d) => parse_day(&d, today())?,
                None => today(),
            };
            let from = match from {
                Some(d) => parse_day(&d, today())?,
                None => to - chrono::Duration::days(6),
            };
            let filter = AttendanceFilter { employee_id: employee, status, offset, limit };
            print_attendance_table(&engine.list_attendance(from, to, &filter));
        }
        AttendanceAction::Pending => {
            for r in engine.pending_reports() {
                println!(
                    "Record {} {} {}: declared {:.2}h - {}{}",
                    r.id,
                    r.employee_id,
                    r.day,
                    r.missed_checkout.declared_hours.unwrap_or_default(),
                    r.missed_checkout.description.as_deref().unwrap_or("-"),
                    if r.missed_checkout.evidence_urls.is_empty() {
                        String::new()
                    } else {
                        format!(" [evidence: {}]", r.missed_checkout.evidence_urls.join(", "))
                    }
                );
            }
        }
        AttendanceAction::RetryPayment { record } => print_settlement(&engine.retry_record_settlement(record)?, &host),
    }
    Ok(())
}

pub fn cmd_settlements(journal: &JournalGateway, explorer_host: &str) {
    let records = journal.records();
    if records.is_empty() {
        println!("No settlements recorded.");
        return;
    }
    println!("{:<20} {:<10} {:<12} {:<24} {}", "Submitted", "Amount", "Status", "Recipient", "Transaction");
    for r in records {
        println!(
            "{:<20} {:<10} {:<12} {:<24} {}",
            r.submitted_at.format("%Y-%m-%d %H:%M:%S"),
            r.amount,
            format!("{:?}", r.status).to_lowercase(),
            truncate(&r.recipient, 24),
            r.tx_ref.explorer_url(explorer_host)
        );
    }
}

pub fn cmd_stats(engine: &Engine, from: Option<String>, to: Option<String>) -> Result<()> {
    let to = match to {
        Some(d) => parse_day(&d, today())?,
        None => today(),
    };
    let from = match from {
        Some(d) => parse_day(&d, today())?,
        None => to - chrono::Duration::days(30),
    };
    let snapshot = engine.store().reload()?;
    let tasks = task_stats(&snapshot);
    println!("Tasks");
    for status in TaskStatus::ALL {
        println!("  {:<16} {}", format_task_status(status), tasks.by_status.get(&status).copied().unwrap_or(0));
    }
    println!("  Rewards booked   {}", tasks.rewards_booked);
    println!("  Rewards paid     {}", tasks.rewards_paid);
    println!("  Penalties        {}", tasks.penalties_booked);
    println!("  Payments pending {}", tasks.payments_pending);
    println!("  Payments failed  {}", tasks.payments_failed);
    for (dept, n) in &tasks.by_department {
        println!("  [{dept}] {n} task(s)");
    }

    let att = attendance_stats(&snapshot, from, to);
    println!("Attendance {from} .. {to}");
    println!("  Records          {}", att.records);
    println!("  Hours            {:.2}", att.total_hours);
    println!("  Wages            {}", att.total_wages);
    println!("  Wages paid       {}", att.wages_paid);
    println!("  Leave days       {}", att.leave_days);
    println!("  Pending reports  {}", att.pending_reports);
    println!("  Hourly rate      {}", engine.settings().hourly_rate);
    Ok(())
}

/// Generate shell completion scripts.
pub fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
