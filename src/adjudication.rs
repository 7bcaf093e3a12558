//! Missed-checkout reports and their one-time admin decision.
//!
//! Approve pays half of the effective hours (admin-confirmed if given, else employee-declared) at the
//! hourly rate. Reject turns the day into unpaid leave with no wage. Either way the decision is final.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::amount::{round_hours, Amount};
use crate::engine::{Engine, SettlementOutcome};
use crate::error::{EngineError, Entity, Result};
use crate::events::Event;
use crate::fields::*;
use crate::ledger::wage_request;

/// Share of the effective hours paid on an approved report.
pub const APPROVED_WAGE_FACTOR: f64 = 0.5;

/// Longest shift an employee can declare.
pub const MAX_DECLARED_HOURS: f64 = 24.0;

#[derive(Debug, Clone)]
pub struct MissedCheckoutReport {
    pub declared_hours: f64,
    pub description: String,
    pub evidence_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DecisionReceipt {
    pub record_id: u64,
    pub status: AdjudicationStatus,
    pub wage: Amount,
    pub settlement: SettlementOutcome,
}

fn check_declared_hours(hours: f64) -> Result<()> {
    if !hours.is_finite() || !(0.0..=MAX_DECLARED_HOURS).contains(&hours) {
        return Err(EngineError::InvalidArgument(format!(
            "declared hours must be between 0 and {MAX_DECLARED_HOURS}, got {hours}"
        )));
    }
    Ok(())
}

/// Admins may confirm any non-negative figure, including multi-day shifts.
fn check_confirmed_hours(hours: f64) -> Result<()> {
    if !hours.is_finite() || hours < 0.0 {
        return Err(EngineError::InvalidArgument(format!(
            "confirmed hours must be a non-negative number, got {hours}"
        )));
    }
    Ok(())
}

fn not_pending(record_id: u64, operation: &'static str, status: AdjudicationStatus) -> EngineError {
    EngineError::InvalidTransition {
        entity: Entity::Attendance,
        id: record_id.to_string(),
        operation,
        state: format!("adjudication {}", format_adjudication(status)),
    }
}

impl Engine {
    /// File a report for a day with no checkout. Only one report per record.
    pub fn report_missed_checkout(
        &self,
        record_id: u64,
        report: MissedCheckoutReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        check_declared_hours(report.declared_hours)?;
        if report.description.trim().is_empty() {
            return Err(EngineError::InvalidArgument("a description of the missed checkout is required".into()));
        }
        self.store.mutate(|db| {
            let record = db.record_mut(record_id)?;
            if record.check_in.is_none() || record.check_out.is_some() {
                return Err(EngineError::InvalidTransition {
                    entity: Entity::Attendance,
                    id: record_id.to_string(),
                    operation: "report missed checkout for",
                    state: if record.check_out.is_some() { "checked out".into() } else { "not checked in".into() },
                });
            }
            if record.missed_checkout.status != AdjudicationStatus::NotApplicable {
                return Err(not_pending(record_id, "report missed checkout for", record.missed_checkout.status));
            }
            let mc = &mut record.missed_checkout;
            mc.reported = true;
            mc.status = AdjudicationStatus::PendingApproval;
            mc.declared_hours = Some(round_hours(report.declared_hours));
            mc.description = Some(report.description.trim().to_string());
            mc.evidence_urls = report.evidence_urls;
            mc.reported_at = Some(now);
            Ok(())
        })?;
        info!(record_id, declared_hours = report.declared_hours, "missed checkout reported");
        Ok(())
    }

    /// Settle a pending report. `confirmed_hours` is validated before anything is touched.
    pub fn decide(
        &self,
        record_id: u64,
        action: DecisionAction,
        admin_note: Option<String>,
        confirmed_hours: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<DecisionReceipt> {
        if let Some(hours) = confirmed_hours {
            check_confirmed_hours(hours)?;
        }
        let rate = self.settings.hourly_rate;
        let guard = self.locks.try_acquire(Entity::Attendance, record_id)?;
        let (status, wage, request) = self.store.mutate(|db| {
            let record = db.record_mut(record_id)?;
            if record.missed_checkout.status != AdjudicationStatus::PendingApproval {
                return Err(not_pending(record_id, "decide", record.missed_checkout.status));
            }
            record.missed_checkout.admin_note = admin_note.filter(|n| !n.trim().is_empty());
            record.missed_checkout.decided_at = Some(now);
            match action {
                DecisionAction::Approve => {
                    let hours = confirmed_hours
                        .or(record.missed_checkout.declared_hours)
                        .unwrap_or_default();
                    record.missed_checkout.confirmed_hours = confirmed_hours.map(round_hours);
                    record.missed_checkout.status = AdjudicationStatus::Approved;
                    record.total_hours = round_hours(hours);
                    record.wage = rate.for_hours(APPROVED_WAGE_FACTOR * hours)?;
                    record.status = AttendanceStatus::Completed;
                }
                DecisionAction::Reject => {
                    record.missed_checkout.status = AdjudicationStatus::Rejected;
                    record.leave = Some(LeaveKind::Unpaid);
                    record.wage = Amount::ZERO;
                }
            }
            let status = record.missed_checkout.status;
            let wage = record.wage;
            let employee = record.employee_id.clone();
            let request = db.record(record_id).and_then(|r| wage_request(r, db.recipient_for(&employee)));
            if request.is_some() {
                db.record_mut(record_id)?.payment_status = PaymentStatus::Pending;
            }
            Ok((status, wage, request))
        })?;
        drop(guard);

        info!(record_id, status = ?status, wage = %wage, "missed checkout adjudicated");
        self.emit(Event::AttendanceAdjudicated { record_id, status, wage });

        let settlement = match request {
            Some(request) => self.settle_record(record_id, request)?,
            None => SettlementOutcome::Skipped,
        };
        Ok(DecisionReceipt { record_id, status, wage, settlement })
    }

    /// Reports waiting for a decision, oldest first.
    pub fn pending_reports(&self) -> Vec<crate::attendance::AttendanceRecord> {
        let snapshot = self.store.snapshot();
        let mut rows: Vec<_> = snapshot
            .attendance
            .iter()
            .filter(|r| r.missed_checkout.status == AdjudicationStatus::PendingApproval)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.missed_checkout.reported_at, r.id));
        rows
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use chrono::NaiveDate;

    use super::*;
    use crate::attendance::DayDisplay;
    use crate::engine::testing::*;
    use crate::settlement::testing::CountingGateway;

    fn reported_record(engine: &Engine, declared: f64) -> u64 {
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let id = engine.check_in("E1", day, at(2024, 6, 3, 8, 0, 0)).unwrap();
        let report = MissedCheckoutReport {
            declared_hours: declared,
            description: "badge reader was offline at 18:00".into(),
            evidence_urls: vec!["https://files.example/gate-log.png".into()],
        };
        engine.report_missed_checkout(id, report, at(2024, 6, 4, 9, 0, 0)).unwrap();
        id
    }

    #[test]
    fn test_approve_with_confirmed_hours_pays_half() {
        let (engine, sink) = engine_with(CountingGateway::default());
        let id = reported_record(&engine, 8.0);
        assert_eq!(engine.pending_reports().len(), 1);

        let receipt = engine
            .decide(id, DecisionAction::Approve, Some("gate log confirms".into()), Some(10.0), at(2024, 6, 4, 10, 0, 0))
            .unwrap();
        // 0.5 × 10h × 2/h
        assert_eq!(receipt.wage, Amount::from_units(10));
        assert_eq!(receipt.status, AdjudicationStatus::Approved);

        let record = engine.attendance_record(id).unwrap();
        assert_eq!(record.wage, Amount::from_units(10));
        assert_eq!(record.total_hours, 10.0);
        assert_eq!(record.missed_checkout.confirmed_hours, Some(10.0));
        assert_eq!(record.payment_status, PaymentStatus::Completed);
        assert!(engine.pending_reports().is_empty());
        assert_eq!(
            sink.events(),
            vec![Event::AttendanceAdjudicated {
                record_id: id,
                status: AdjudicationStatus::Approved,
                wage: Amount::from_units(10)
            }]
        );
    }

    #[test]
    fn test_approve_without_confirmation_uses_declared_hours() {
        let (engine, _) = engine_with(CountingGateway::default());
        let id = reported_record(&engine, 7.0);
        let receipt = engine.decide(id, DecisionAction::Approve, None, None, at(2024, 6, 4, 10, 0, 0)).unwrap();
        assert_eq!(receipt.wage, Amount::from_units(7));
    }

    #[test]
    fn test_reject_forces_unpaid_leave() {
        let gateway = Arc::new(CountingGateway::default());
        let (engine, _) = engine_with(Arc::clone(&gateway));
        let id = reported_record(&engine, 10.0);
        let receipt = engine
            .decide(id, DecisionAction::Reject, Some("no evidence".into()), Some(10.0), at(2024, 6, 4, 10, 0, 0))
            .unwrap();
        assert_eq!(receipt.wage, Amount::ZERO);
        assert!(matches!(receipt.settlement, SettlementOutcome::Skipped));

        let record = engine.attendance_record(id).unwrap();
        assert_eq!(record.leave, Some(LeaveKind::Unpaid));
        assert_eq!(record.wage, Amount::ZERO);
        assert_eq!(record.missed_checkout.status, AdjudicationStatus::Rejected);
        assert_eq!(engine.day_status("E1", record.day), DayDisplay::Leave(LeaveKind::Unpaid));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_decision_is_final() {
        let (engine, _) = engine_with(CountingGateway::default());
        let id = reported_record(&engine, 6.0);
        engine.decide(id, DecisionAction::Reject, None, None, at(2024, 6, 4, 10, 0, 0)).unwrap();
        assert!(matches!(
            engine.decide(id, DecisionAction::Approve, None, None, at(2024, 6, 4, 11, 0, 0)),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert_eq!(engine.attendance_record(id).unwrap().wage, Amount::ZERO);
    }

    #[test]
    fn test_confirmed_hours_are_not_capped_at_a_day() {
        let (engine, _) = engine_with(CountingGateway::default());
        let id = reported_record(&engine, 12.0);
        let receipt = engine
            .decide(id, DecisionAction::Approve, Some("overnight stocktake".into()), Some(30.0), at(2024, 6, 4, 10, 0, 0))
            .unwrap();
        // 0.5 × 30h × 2/h
        assert_eq!(receipt.wage, Amount::from_units(30));
        assert_eq!(engine.attendance_record(id).unwrap().total_hours, 30.0);
    }

    #[test]
    fn test_negative_confirmed_hours_rejected_before_mutation() {
        let (engine, sink) = engine_with(CountingGateway::default());
        let id = reported_record(&engine, 6.0);
        assert!(matches!(
            engine.decide(id, DecisionAction::Approve, None, Some(-1.0), at(2024, 6, 4, 10, 0, 0)),
            Err(EngineError::InvalidArgument(_))
        ));
        let record = engine.attendance_record(id).unwrap();
        assert_eq!(record.missed_checkout.status, AdjudicationStatus::PendingApproval);
        assert!(record.missed_checkout.decided_at.is_none());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_report_preconditions() {
        let (engine, _) = engine_with(CountingGateway::default());
        let day = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let id = engine.check_in("E2", day, at(2024, 6, 5, 8, 0, 0)).unwrap();
        let report = |hours: f64| MissedCheckoutReport {
            declared_hours: hours,
            description: "forgot".into(),
            evidence_urls: vec![],
        };
        assert!(matches!(engine.report_missed_checkout(id, report(-2.0), at(2024, 6, 6, 9, 0, 0)), Err(EngineError::InvalidArgument(_))));
        assert!(matches!(engine.report_missed_checkout(id, report(30.0), at(2024, 6, 6, 9, 0, 0)), Err(EngineError::InvalidArgument(_))));
        engine.report_missed_checkout(id, report(8.0), at(2024, 6, 6, 9, 0, 0)).unwrap();
        assert!(matches!(engine.report_missed_checkout(id, report(8.0), at(2024, 6, 6, 9, 0, 0)), Err(EngineError::InvalidTransition { .. })));
        // A reported day can no longer be checked out normally.
        assert!(matches!(engine.check_out(id, at(2024, 6, 6, 10, 0, 0)), Err(EngineError::InvalidTransition { .. })));

        let closed = engine.check_in("E3", day, at(2024, 6, 5, 8, 0, 0)).unwrap();
        engine.check_out(closed, at(2024, 6, 5, 17, 0, 0)).unwrap();
        assert!(matches!(engine.report_missed_checkout(closed, report(8.0), at(2024, 6, 6, 9, 0, 0)), Err(EngineError::InvalidTransition { .. })));
    }

    #[test]
    fn test_concurrent_decisions_apply_once() {
        let (engine, sink) = engine_with(CountingGateway::default());
        let engine = Arc::new(engine);
        let id = reported_record(&engine, 8.0);
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [DecisionAction::Approve, DecisionAction::Reject]
            .into_iter()
            .map(|action| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.decide(id, action, None, None, at(2024, 6, 4, 10, 0, 0))
                })
            })
            .collect();
        let ok = handles.into_iter().map(|h| h.join().unwrap()).filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert_eq!(sink.events().len(), 1);
    }
}
