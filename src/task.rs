//! Task data structure and related functionality.
//!
//! A `Task` is one unit of rewarded work. Lifecycle rules live in [`crate::lifecycle`]; this module
//! holds the record itself plus the small invariants that belong to the data (claimability, the
//! write-once payment reference).

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::amount::Amount;
use crate::error::{EngineError, Result};
use crate::fields::*;
use crate::settlement::{SettlementRecord, TxHash};

/// Metadata of an uploaded file. The engine never sees the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub url: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub uploaded_by: UploaderRole,
    pub uploaded_at: DateTime<Utc>,
}

/// One status change, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    /// `None` for an unclaimed department task.
    pub assignee: Option<String>,
    pub department: String,
    pub priority: Priority,
    pub difficulty: Difficulty,
    pub status: TaskStatus,
    pub progress: u8,
    pub start: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<FileDescriptor>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reward: Amount,
    #[serde(default)]
    pub penalty: Amount,
    /// Raw reference as recorded. Read it through [`Task::settlement_ref`].
    pub payment_tx: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub history: Vec<AuditEntry>,
    pub created_at_utc: i64,
    pub updated_at_utc: i64,
}

impl Task {
    /// Unassigned tasks that have not finished can be claimed by their department.
    pub fn is_claimable(&self) -> bool {
        self.assignee.is_none() && matches!(self.status, TaskStatus::NotStarted | TaskStatus::InProgress)
    }

    pub fn has_worker_evidence(&self) -> bool {
        self.attachments.iter().any(|a| a.uploaded_by == UploaderRole::Worker)
    }

    /// The payment reference, if it is a well-formed transaction hash.
    pub fn settlement_ref(&self) -> Option<TxHash> {
        TxHash::from_stored(self.payment_tx.as_deref())
    }

    /// Move to `to`, recording the change. Callers check the transition table first.
    pub(crate) fn set_status(&mut self, to: TaskStatus, at: DateTime<Utc>, note: Option<String>) {
        self.history.push(AuditEntry { at, from: self.status, to, note });
        self.status = to;
        self.updated_at_utc = at.timestamp();
    }

    /// Apply a gateway result. An existing reference is never overwritten.
    pub(crate) fn record_settlement(&mut self, record: &SettlementRecord) -> bool {
        if let Some(existing) = &self.payment_tx {
            if existing != record.tx_ref.as_str() {
                warn!(task_id = self.id, existing = %existing, late = %record.tx_ref, "ignoring second settlement reference");
            }
            if self.payment_status == PaymentStatus::Failed || self.payment_status == PaymentStatus::Pending {
                self.payment_status = record.status.into();
            }
            return false;
        }
        self.payment_tx = Some(record.tx_ref.to_string());
        self.payment_status = record.status.into();
        true
    }
}

/// Combine a calendar date and a wall-clock time in `tz` into the single instant deadlines are
/// compared at. Times skipped or repeated by a clock change are refused.
pub fn combine_deadline<Tz: TimeZone>(date: NaiveDate, time: NaiveTime, tz: &Tz) -> Result<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            EngineError::InvalidArgument(format!("{date} {time} does not name a single instant in the local timezone"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::settlement::{IdempotencyKey, SettlementStatus};

    fn sample_task() -> Task {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap();
        Task {
            id: 1,
            title: "Audit Q2 invoices".into(),
            description: None,
            assignee: None,
            department: "finance".into(),
            priority: Priority::Normal,
            difficulty: Difficulty::Medium,
            status: TaskStatus::NotStarted,
            progress: 0,
            start: now,
            deadline: combine_deadline(
                NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                &Utc,
            )
            .unwrap(),
            attachments: vec![],
            completed_at: None,
            reward: Amount::ZERO,
            penalty: Amount::ZERO,
            payment_tx: None,
            payment_status: PaymentStatus::None,
            history: vec![],
            created_at_utc: now.timestamp(),
            updated_at_utc: now.timestamp(),
        }
    }

    fn record(tx_byte: &str) -> SettlementRecord {
        SettlementRecord {
            idempotency_key: IdempotencyKey::for_task(1),
            tx_ref: TxHash::parse(&format!("0x{}", tx_byte.repeat(32))).unwrap(),
            status: SettlementStatus::Confirmed,
            amount: Amount::from_units(15),
            recipient: "E1".into(),
            base_units: "0".into(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_combined_deadline() {
        let task = sample_task();
        assert_eq!(task.deadline, Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap());
    }

    #[test]
    fn test_deadline_is_read_in_the_given_timezone() {
        use chrono::FixedOffset;

        use crate::reward::is_on_time;

        let plus_seven = FixedOffset::east_opt(7 * 3600).unwrap();
        let deadline = combine_deadline(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            &plus_seven,
        )
        .unwrap();
        assert_eq!(deadline, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        // 17:00 UTC is seven hours late for a 17:00 deadline at +07:00.
        assert!(is_on_time(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(), deadline));
        assert!(!is_on_time(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 1).unwrap(), deadline));
        assert!(!is_on_time(Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap(), deadline));
    }

    #[test]
    fn test_claimable() {
        let mut task = sample_task();
        assert!(task.is_claimable());
        task.assignee = Some("E1".into());
        assert!(!task.is_claimable());
        task.assignee = None;
        task.status = TaskStatus::PendingReview;
        assert!(!task.is_claimable());
    }

    #[test]
    fn test_settlement_reference_written_once() {
        let mut task = sample_task();
        assert!(task.record_settlement(&record("aa")));
        assert!(!task.record_settlement(&record("bb")));
        assert_eq!(task.settlement_ref().unwrap().as_str(), format!("0x{}", "aa".repeat(32)));
        assert_eq!(task.payment_status, PaymentStatus::Completed);
    }

    #[test]
    fn test_malformed_stored_reference_is_absent() {
        let mut task = sample_task();
        task.payment_tx = Some("0x1234".into());
        assert!(task.settlement_ref().is_none());
    }
}
