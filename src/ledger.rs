//! Attendance ledger: check-in, check-out, leave and day status.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::amount::{round_hours, Amount};
use crate::attendance::{AttendanceRecord, DayDisplay};
use crate::engine::{Engine, SettlementOutcome};
use crate::error::{EngineError, Entity, Result};
use crate::fields::*;
use crate::settlement::{IdempotencyKey, SettlementRequest};

#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub record_id: u64,
    pub hours: f64,
    pub wage: Amount,
    pub settlement: SettlementOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub employee_id: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AttendanceFilter {
    fn matches(&self, r: &AttendanceRecord) -> bool {
        if let Some(ref e) = self.employee_id {
            if &r.employee_id != e {
                return false;
            }
        }
        self.status.map_or(true, |s| r.status == s)
    }
}

fn invalid_record(id: u64, operation: &'static str, r: &AttendanceRecord) -> EngineError {
    let state = if r.check_in.is_none() {
        "on leave without check-in".to_string()
    } else if r.check_out.is_some() {
        "already checked out".to_string()
    } else {
        format!("missed checkout {}", format_adjudication(r.missed_checkout.status).to_lowercase())
    };
    EngineError::InvalidTransition { entity: Entity::Attendance, id: id.to_string(), operation, state }
}

/// Wage settlement request for a record, or `None` when nothing is owed.
pub(crate) fn wage_request(record: &AttendanceRecord, recipient: String) -> Option<SettlementRequest> {
    if record.wage.is_zero() {
        return None;
    }
    Some(SettlementRequest { key: IdempotencyKey::for_attendance(record.id), amount: record.wage, recipient })
}

impl Engine {
    pub fn check_in(&self, employee_id: &str, day: NaiveDate, at: DateTime<Utc>) -> Result<u64> {
        let id = self.store.mutate(|db| {
            if db.employee(employee_id).is_none() {
                return Err(EngineError::employee_not_found(employee_id));
            }
            if let Some(existing) = db.record_for_day(employee_id, day) {
                return Err(EngineError::InvalidArgument(format!(
                    "{employee_id} already has record {} for {day}",
                    existing.id
                )));
            }
            let id = db.next_record_id();
            db.attendance.push(AttendanceRecord::open(id, employee_id, day, at));
            Ok(id)
        })?;
        info!(record_id = id, employee_id, %day, "checked in");
        Ok(id)
    }

    /// Close the day: hours are the wall-clock delta, wage is hours × rate, and the wage is paid.
    pub fn check_out(&self, record_id: u64, at: DateTime<Utc>) -> Result<CheckoutReceipt> {
        let rate = self.settings.hourly_rate;
        let guard = self.locks.try_acquire(Entity::Attendance, record_id)?;
        let (hours, wage, request) = self.store.mutate(|db| {
            let record = db.record_mut(record_id)?;
            if !record.is_open() {
                return Err(invalid_record(record_id, "check out", record));
            }
            let check_in = record.check_in.unwrap_or(at);
            if at < check_in {
                return Err(EngineError::InvalidArgument(format!(
                    "checkout {at} precedes check-in {check_in}"
                )));
            }
            let hours = round_hours((at - check_in).num_seconds() as f64 / 3600.0);
            record.check_out = Some(at);
            record.total_hours = hours;
            record.wage = rate.for_hours(hours)?;
            record.status = AttendanceStatus::Completed;
            let wage = record.wage;
            let employee = record.employee_id.clone();
            let request = db.record(record_id).and_then(|r| wage_request(r, db.recipient_for(&employee)));
            if request.is_some() {
                db.record_mut(record_id)?.payment_status = PaymentStatus::Pending;
            }
            Ok((hours, wage, request))
        })?;
        drop(guard);
        info!(record_id, hours, wage = %wage, "checked out");

        let settlement = match request {
            Some(request) => self.settle_record(record_id, request)?,
            None => SettlementOutcome::Skipped,
        };
        Ok(CheckoutReceipt { record_id, hours, wage, settlement })
    }

    pub(crate) fn settle_record(&self, record_id: u64, request: SettlementRequest) -> Result<SettlementOutcome> {
        self.settle_and_apply(request, |db, result| {
            let record = db.record_mut(record_id)?;
            match result {
                Ok(settled) => {
                    record.record_settlement(settled);
                }
                Err(_) if record.payment_tx.is_none() => record.payment_status = PaymentStatus::Failed,
                Err(_) => {}
            }
            Ok(())
        })
    }

    pub fn retry_record_settlement(&self, record_id: u64) -> Result<SettlementOutcome> {
        let guard = self.locks.try_acquire(Entity::Attendance, record_id)?;
        let request = self.store.mutate(|db| {
            let record = db.record(record_id).ok_or_else(|| EngineError::record_not_found(record_id))?;
            let retryable = record.settlement_ref().is_none()
                && matches!(record.payment_status, PaymentStatus::Failed | PaymentStatus::Pending);
            let request = match wage_request(record, db.recipient_for(&record.employee_id)) {
                Some(request) if retryable => request,
                _ => {
                    return Err(EngineError::InvalidTransition {
                        entity: Entity::Attendance,
                        id: record_id.to_string(),
                        operation: "retry payment for",
                        state: format!("payment {}", format_payment_status(record.payment_status)),
                    })
                }
            };
            db.record_mut(record_id)?.payment_status = PaymentStatus::Pending;
            Ok(request)
        })?;
        drop(guard);
        info!(record_id, "retrying wage settlement");
        self.settle_record(record_id, request)
    }

    /// Classify a day as leave, creating a placeholder record when the employee never checked in.
    pub fn set_leave(&self, employee_id: &str, day: NaiveDate, kind: LeaveKind) -> Result<u64> {
        let id = self.store.mutate(|db| {
            if db.employee(employee_id).is_none() {
                return Err(EngineError::employee_not_found(employee_id));
            }
            if let Some(id) = db.record_for_day(employee_id, day).map(|r| r.id) {
                let record = db.record_mut(id)?;
                // A rejected report already classified the day as unpaid, for good.
                if record.missed_checkout.status == AdjudicationStatus::Rejected {
                    return Err(EngineError::InvalidTransition {
                        entity: Entity::Attendance,
                        id: id.to_string(),
                        operation: "set leave on",
                        state: "missed checkout rejected".into(),
                    });
                }
                record.leave = Some(kind);
                return Ok(id);
            }
            let id = db.next_record_id();
            db.attendance.push(AttendanceRecord::leave_placeholder(id, employee_id, day, kind));
            Ok(id)
        })?;
        info!(record_id = id, employee_id, %day, leave = ?kind, "leave recorded");
        Ok(id)
    }

    /// Leave first, then the record's status, then `NoCheckIn` for a day with no record.
    pub fn day_status(&self, employee_id: &str, day: NaiveDate) -> DayDisplay {
        self.store
            .snapshot()
            .record_for_day(employee_id, day)
            .map(AttendanceRecord::display)
            .unwrap_or(DayDisplay::Status(AttendanceStatus::NoCheckIn))
    }

    pub fn attendance_record(&self, record_id: u64) -> Result<AttendanceRecord> {
        self.store
            .snapshot()
            .record(record_id)
            .cloned()
            .ok_or_else(|| EngineError::record_not_found(record_id))
    }

    /// Records with `from <= day <= to`, ordered by day then id.
    pub fn list_attendance(&self, from: NaiveDate, to: NaiveDate, filter: &AttendanceFilter) -> Vec<AttendanceRecord> {
        let snapshot = self.store.snapshot();
        let mut rows: Vec<&AttendanceRecord> = snapshot
            .attendance
            .iter()
            .filter(|r| r.day >= from && r.day <= to && filter.matches(r))
            .collect();
        rows.sort_by_key(|r| (r.day, r.id));
        let page = rows.into_iter().skip(filter.offset);
        match filter.limit {
            Some(n) => page.take(n).cloned().collect(),
            None => page.cloned().collect(),
        }
    }
}
