//! Attendance records: one per employee per calendar day.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::amount::Amount;
use crate::fields::*;
use crate::settlement::{SettlementRecord, TxHash};

/// Employee-filed report of a day they forgot to check out of, and its adjudication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissedCheckout {
    pub reported: bool,
    pub status: AdjudicationStatus,
    pub declared_hours: Option<f64>,
    pub description: Option<String>,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
    pub confirmed_hours: Option<f64>,
    pub admin_note: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: u64,
    pub employee_id: String,
    pub day: NaiveDate,
    /// `None` only for leave placeholders.
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_hours: f64,
    #[serde(default)]
    pub wage: Amount,
    pub status: AttendanceStatus,
    pub leave: Option<LeaveKind>,
    #[serde(default)]
    pub missed_checkout: MissedCheckout,
    pub payment_tx: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
}

/// What a day shows as: leave wins over the hours-based status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayDisplay {
    Leave(LeaveKind),
    Status(AttendanceStatus),
}

impl DayDisplay {
    pub fn label(self) -> &'static str {
        match self {
            DayDisplay::Leave(kind) => format_leave(kind),
            DayDisplay::Status(status) => format_attendance_status(status),
        }
    }
}

impl AttendanceRecord {
    pub fn open(id: u64, employee_id: &str, day: NaiveDate, at: DateTime<Utc>) -> Self {
        AttendanceRecord {
            id,
            employee_id: employee_id.to_string(),
            day,
            check_in: Some(at),
            check_out: None,
            total_hours: 0.0,
            wage: Amount::ZERO,
            status: AttendanceStatus::Suspended,
            leave: None,
            missed_checkout: MissedCheckout::default(),
            payment_tx: None,
            payment_status: PaymentStatus::None,
        }
    }

    pub fn leave_placeholder(id: u64, employee_id: &str, day: NaiveDate, kind: LeaveKind) -> Self {
        AttendanceRecord {
            check_in: None,
            status: AttendanceStatus::NoCheckIn,
            leave: Some(kind),
            ..AttendanceRecord::open(id, employee_id, day, Utc::now())
        }
    }

    pub fn display(&self) -> DayDisplay {
        match self.leave {
            Some(kind) => DayDisplay::Leave(kind),
            None => DayDisplay::Status(self.status),
        }
    }

    /// Checked in, not checked out, and nothing reported yet.
    pub fn is_open(&self) -> bool {
        self.check_in.is_some()
            && self.check_out.is_none()
            && self.missed_checkout.status == AdjudicationStatus::NotApplicable
    }

    pub fn settlement_ref(&self) -> Option<TxHash> {
        TxHash::from_stored(self.payment_tx.as_deref())
    }

    pub(crate) fn record_settlement(&mut self, record: &SettlementRecord) -> bool {
        if let Some(existing) = &self.payment_tx {
            if existing != record.tx_ref.as_str() {
                warn!(record_id = self.id, existing = %existing, late = %record.tx_ref, "ignoring second settlement reference");
            }
            if matches!(self.payment_status, PaymentStatus::Failed | PaymentStatus::Pending) {
                self.payment_status = record.status.into();
            }
            return false;
        }
        self.payment_tx = Some(record.tx_ref.to_string());
        self.payment_status = record.status.into();
        true
    }
}
