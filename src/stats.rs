//! Read-only statistics over the published snapshot.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::amount::{round_hours, Amount};
use crate::db::Database;
use crate::fields::*;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStats {
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub rewards_booked: Amount,
    pub penalties_booked: Amount,
    pub rewards_paid: Amount,
    pub payments_failed: usize,
    pub payments_pending: usize,
    pub by_department: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendanceStats {
    pub records: usize,
    pub total_hours: f64,
    pub total_wages: Amount,
    pub wages_paid: Amount,
    pub leave_days: usize,
    pub pending_reports: usize,
}

pub fn task_stats(db: &Database) -> TaskStats {
    let mut stats = TaskStats::default();
    for t in &db.tasks {
        *stats.by_status.entry(t.status).or_insert(0) += 1;
        if t.status == TaskStatus::Completed {
            stats.rewards_booked = stats.rewards_booked.saturating_add(t.reward);
            stats.penalties_booked = stats.penalties_booked.saturating_add(t.penalty);
        }
        match t.payment_status {
            PaymentStatus::Completed if t.settlement_ref().is_some() => {
                stats.rewards_paid = stats.rewards_paid.saturating_add(t.reward)
            }
            PaymentStatus::Failed => stats.payments_failed += 1,
            PaymentStatus::Pending => stats.payments_pending += 1,
            _ => {}
        }
    }
    stats.by_department = db
        .tasks_per_department()
        .into_iter()
        .map(|(d, n)| (d.to_string(), n))
        .collect();
    stats
}

pub fn attendance_stats(db: &Database, from: NaiveDate, to: NaiveDate) -> AttendanceStats {
    let mut stats = AttendanceStats::default();
    for r in db.attendance.iter().filter(|r| r.day >= from && r.day <= to) {
        stats.records += 1;
        stats.total_hours += r.total_hours;
        stats.total_wages = stats.total_wages.saturating_add(r.wage);
        if r.settlement_ref().is_some() {
            stats.wages_paid = stats.wages_paid.saturating_add(r.wage);
        }
        if r.leave.is_some() {
            stats.leave_days += 1;
        }
        if r.missed_checkout.status == AdjudicationStatus::PendingApproval {
            stats.pending_reports += 1;
        }
    }
    stats.total_hours = round_hours(stats.total_hours);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::*;
    use crate::lifecycle::NewTask;
    use crate::settlement::testing::CountingGateway;

    #[test]
    fn test_stats_follow_engine_activity() {
        let (engine, _) = engine_with(CountingGateway::default());
        let now = at(2024, 5, 21, 9, 0, 0);
        let new = |dept: &str| NewTask {
            title: "Inventory count".into(),
            description: None,
            department: dept.into(),
            assignee: Some("E1".into()),
            priority: Priority::High,
            difficulty: Difficulty::Hard,
            start: now,
            deadline: at(2024, 5, 22, 9, 0, 0),
        };
        let late = engine.create_task(new("ops"), now).unwrap();
        engine.create_task(new("finance"), now).unwrap();
        engine.start_task(late, now).unwrap();
        engine.submit_for_review(late, 100, vec![crate::task::FileDescriptor {
            name: "count.csv".into(),
            url: "file:///count.csv".into(),
            size_bytes: 1,
            content_type: "text/csv".into(),
            uploaded_by: UploaderRole::Worker,
            uploaded_at: now,
        }], now).unwrap();
        engine.approve_at(late, at(2024, 5, 23, 9, 0, 0)).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 5, 21).unwrap();
        let rec = engine.check_in("E2", day, at(2024, 5, 21, 8, 0, 0)).unwrap();
        engine.check_out(rec, at(2024, 5, 21, 12, 15, 0)).unwrap();
        engine.set_leave("E3", day, LeaveKind::Annual).unwrap();

        let snapshot = engine.store().snapshot();
        let ts = task_stats(&snapshot);
        assert_eq!(ts.by_status.get(&TaskStatus::Completed), Some(&1));
        assert_eq!(ts.by_status.get(&TaskStatus::NotStarted), Some(&1));
        assert_eq!(ts.rewards_booked, Amount::from_units(10));
        assert_eq!(ts.penalties_booked, Amount::from_units(10));
        assert_eq!(ts.rewards_paid, Amount::from_units(10));
        assert_eq!(ts.by_department.get("finance"), Some(&1));

        let ats = attendance_stats(&snapshot, day, day);
        assert_eq!(ats.records, 2);
        assert_eq!(ats.total_hours, 4.25);
        assert_eq!(ats.total_wages, Amount::from_cents(850));
        assert_eq!(ats.wages_paid, Amount::from_cents(850));
        assert_eq!(ats.leave_days, 1);
    }
}
