//! Enumerations and field types for tasks, attendance and payments.
//!
//! Status values are closed enumerations. Task transitions are checked against the explicit table
//! in [`TaskStatus::can_transition_to`]; anything not listed there is rejected.

use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Difficulty tier, which selects the reward row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    #[serde(alias = "Easy")]
    Easy,
    #[serde(alias = "Medium")]
    Medium,
    #[serde(alias = "Hard")]
    Hard,
}

impl FromStr for Difficulty {
    type Err = EngineError;

    /// Unknown tiers are a configuration problem, not bad user input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(EngineError::Configuration(format!("unrecognised difficulty tier '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    PendingReview,
    Completed,
    Paused,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::NotStarted,
        TaskStatus::InProgress,
        TaskStatus::PendingReview,
        TaskStatus::Completed,
        TaskStatus::Paused,
        TaskStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// The transition table.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (NotStarted, Cancelled)
                | (InProgress, PendingReview)
                | (InProgress, Paused)
                | (InProgress, Cancelled)
                | (PendingReview, Completed)
                | (PendingReview, InProgress)
                | (PendingReview, Paused)
                | (PendingReview, Cancelled)
                | (Paused, InProgress)
                | (Paused, Cancelled)
        )
    }
}

/// Payment status of a settled entity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    #[default]
    None,
    Pending,
    Completed,
    Failed,
}

/// Hours-based status of an attendance day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceStatus {
    Completed,
    Suspended,
    NoCheckIn,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveKind {
    Annual,
    Sick,
    Maternity,
    Unpaid,
    Personal,
}

/// Missed-checkout adjudication state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AdjudicationStatus {
    #[default]
    NotApplicable,
    PendingApproval,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionAction {
    Approve,
    Reject,
}

/// Who uploaded an attachment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UploaderRole {
    Admin,
    Worker,
}

pub fn format_task_status(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::NotStarted => "Not started",
        TaskStatus::InProgress => "In progress",
        TaskStatus::PendingReview => "Pending review",
        TaskStatus::Completed => "Completed",
        TaskStatus::Paused => "Paused",
        TaskStatus::Cancelled => "Cancelled",
    }
}

pub fn format_payment_status(s: PaymentStatus) -> &'static str {
    match s {
        PaymentStatus::None => "-",
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
    }
}

pub fn format_difficulty(d: Difficulty) -> &'static str {
    match d {
        Difficulty::Easy => "Easy",
        Difficulty::Medium => "Medium",
        Difficulty::Hard => "Hard",
    }
}

pub fn format_leave(k: LeaveKind) -> &'static str {
    match k {
        LeaveKind::Annual => "Annual leave",
        LeaveKind::Sick => "Sick leave",
        LeaveKind::Maternity => "Maternity leave",
        LeaveKind::Unpaid => "Unpaid leave",
        LeaveKind::Personal => "Personal leave",
    }
}

pub fn format_attendance_status(s: AttendanceStatus) -> &'static str {
    match s {
        AttendanceStatus::Completed => "Completed",
        AttendanceStatus::Suspended => "Suspended",
        AttendanceStatus::NoCheckIn => "No check-in",
    }
}

pub fn format_adjudication(s: AdjudicationStatus) -> &'static str {
    match s {
        AdjudicationStatus::NotApplicable => "-",
        AdjudicationStatus::PendingApproval => "Pending approval",
        AdjudicationStatus::Approved => "Approved",
        AdjudicationStatus::Rejected => "Rejected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(NotStarted.can_transition_to(InProgress));
        assert!(PendingReview.can_transition_to(Completed));
        assert!(PendingReview.can_transition_to(Paused));
        assert!(!NotStarted.can_transition_to(PendingReview));
        assert!(!InProgress.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(PendingReview));
        for next in TaskStatus::ALL {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_cancel_reachable_from_every_open_state() {
        for s in TaskStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(s.can_transition_to(TaskStatus::Cancelled), "{s:?}");
        }
    }

    #[test]
    fn test_difficulty_parse() {
        assert_eq!("Hard".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert_eq!(" medium ".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert!(matches!("legendary".parse::<Difficulty>(), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(serde_json::to_string(&TaskStatus::PendingReview).unwrap(), "\"pending-review\"");
        let d: Difficulty = serde_json::from_str("\"Easy\"").unwrap();
        assert_eq!(d, Difficulty::Easy);
    }
}
