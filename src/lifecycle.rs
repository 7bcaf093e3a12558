//! Task lifecycle state machine.
//!
//! ```text
//! NotStarted --start/claim--> InProgress --submit--> PendingReview --approve--> Completed
//!                                 ^   |                  |    |
//!                                 |   +----pause---+     |    +--pause--> Paused
//!                                 +----reject------------+               |
//!                                 +----------------resume----------------+
//! any non-terminal --cancel--> Cancelled
//! ```
//!
//! `approve` is single-flight per task: the entity guard covers the decision, and while the payout is
//! in flight (Completed, payment pending, no reference yet) further approvals get `AlreadyProcessing`.
//! The guard is released before the gateway is called.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::amount::Amount;
use crate::engine::{Engine, SettlementOutcome};
use crate::error::{EngineError, Entity, Result};
use crate::events::Event;
use crate::fields::*;
use crate::reward;
use crate::settlement::{IdempotencyKey, SettlementRequest};
use crate::task::{FileDescriptor, Task};

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub department: String,
    pub assignee: Option<String>,
    pub priority: Priority,
    pub difficulty: Difficulty,
    pub start: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ApprovalReceipt {
    pub task_id: u64,
    pub on_time: bool,
    pub reward: Amount,
    pub penalty: Amount,
    pub settlement: SettlementOutcome,
}

/// Read-side task filter. Pagination is offset/limit.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub department: Option<String>,
    pub assignee: Option<String>,
    pub claimable_only: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl TaskFilter {
    fn matches(&self, t: &Task) -> bool {
        if let Some(s) = self.status {
            if t.status != s {
                return false;
            }
        }
        if let Some(ref d) = self.department {
            if &t.department != d {
                return false;
            }
        }
        if let Some(ref a) = self.assignee {
            if t.assignee.as_deref() != Some(a.as_str()) {
                return false;
            }
        }
        !self.claimable_only || t.is_claimable()
    }
}

fn invalid(id: u64, operation: &'static str, status: TaskStatus) -> EngineError {
    EngineError::InvalidTransition {
        entity: Entity::Task,
        id: id.to_string(),
        operation,
        state: format_task_status(status).to_string(),
    }
}

fn check_progress(progress: u8) -> Result<()> {
    if progress > 100 {
        return Err(EngineError::InvalidArgument(format!("progress must be 0-100, got {progress}")));
    }
    Ok(())
}

impl Engine {
    pub fn create_task(&self, new: NewTask, now: DateTime<Utc>) -> Result<u64> {
        if new.title.trim().is_empty() {
            return Err(EngineError::InvalidArgument("title must not be empty".into()));
        }
        if new.department.trim().is_empty() {
            return Err(EngineError::InvalidArgument("department must not be empty".into()));
        }
        if new.deadline <= new.start {
            return Err(EngineError::InvalidArgument(format!(
                "deadline {} must be after start {}",
                new.deadline, new.start
            )));
        }
        let id = self.store.mutate(|db| {
            if let Some(ref a) = new.assignee {
                if db.employee(a).is_none() {
                    return Err(EngineError::employee_not_found(a));
                }
            }
            let id = db.next_task_id();
            db.tasks.push(Task {
                id,
                title: new.title.trim().to_string(),
                description: new.description.clone().filter(|d| !d.trim().is_empty()),
                assignee: new.assignee.clone(),
                department: new.department.trim().to_string(),
                priority: new.priority,
                difficulty: new.difficulty,
                status: TaskStatus::NotStarted,
                progress: 0,
                start: new.start,
                deadline: new.deadline,
                attachments: Vec::new(),
                completed_at: None,
                reward: Amount::ZERO,
                penalty: Amount::ZERO,
                payment_tx: None,
                payment_status: PaymentStatus::None,
                history: Vec::new(),
                created_at_utc: now.timestamp(),
                updated_at_utc: now.timestamp(),
            });
            Ok(id)
        })?;
        info!(task_id = id, department = %new.department, difficulty = ?new.difficulty, "task created");
        Ok(id)
    }

    /// Move between states with no side effects beyond the audit trail.
    fn transition(
        &self,
        task_id: u64,
        operation: &'static str,
        allowed_from: &[TaskStatus],
        to: TaskStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store.mutate(|db| {
            let task = db.task_mut(task_id)?;
            if !allowed_from.contains(&task.status) || !task.status.can_transition_to(to) {
                return Err(invalid(task_id, operation, task.status));
            }
            task.set_status(to, now, note);
            Ok(())
        })?;
        info!(task_id, operation, to = ?to, "task transition");
        Ok(())
    }

    pub fn start_task(&self, task_id: u64, now: DateTime<Utc>) -> Result<()> {
        if let Some(task) = self.store.snapshot().task(task_id) {
            if task.assignee.is_none() {
                return Err(EngineError::InvalidArgument(format!(
                    "task {task_id} has no assignee; department tasks must be claimed"
                )));
            }
        }
        self.transition(task_id, "start", &[TaskStatus::NotStarted], TaskStatus::InProgress, None, now)
    }

    /// First claim wins. The check and the write happen in one store mutation, so concurrent claims
    /// resolve to a single assignee.
    pub fn claim(&self, task_id: u64, employee_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.store.mutate(|db| {
            let department = db
                .employee(employee_id)
                .map(|e| e.department.clone())
                .ok_or_else(|| EngineError::employee_not_found(employee_id))?;
            let task = db.task_mut(task_id)?;
            if let Some(ref holder) = task.assignee {
                return Err(EngineError::AlreadyClaimed { task_id, claimed_by: holder.clone() });
            }
            if !matches!(task.status, TaskStatus::NotStarted | TaskStatus::InProgress) {
                return Err(invalid(task_id, "claim", task.status));
            }
            if task.department != department {
                return Err(EngineError::InvalidArgument(format!(
                    "{employee_id} is in {department}, task {task_id} belongs to {}",
                    task.department
                )));
            }
            task.assignee = Some(employee_id.to_string());
            let note = Some(format!("claimed by {employee_id}"));
            if task.status == TaskStatus::NotStarted {
                task.set_status(TaskStatus::InProgress, now, note);
            } else {
                task.updated_at_utc = now.timestamp();
            }
            Ok(())
        })?;
        info!(task_id, employee_id, "task claimed");
        Ok(())
    }

    /// Record worker progress. Reaching the completion threshold with evidence attached sends the
    /// task to review; otherwise it stays in progress. Returns the resulting status.
    pub fn submit_for_review(
        &self,
        task_id: u64,
        progress: u8,
        attachments: Vec<FileDescriptor>,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus> {
        check_progress(progress)?;
        let threshold = self.settings.completion_threshold;
        let status = self.store.mutate(|db| {
            let task = db.task_mut(task_id)?;
            if task.status != TaskStatus::InProgress {
                return Err(invalid(task_id, "submit", task.status));
            }
            task.progress = progress;
            task.attachments.extend(attachments);
            task.updated_at_utc = now.timestamp();
            if progress >= threshold && task.has_worker_evidence() {
                task.set_status(TaskStatus::PendingReview, now, None);
            }
            Ok(task.status)
        })?;
        info!(task_id, progress, status = ?status, "progress submitted");
        Ok(status)
    }

    pub fn approve(&self, task_id: u64) -> Result<ApprovalReceipt> {
        self.approve_at(task_id, Utc::now())
    }

    /// Accept the work, book the reward and pay it. A gateway failure leaves the task Completed with
    /// payment status `failed`.
    pub fn approve_at(&self, task_id: u64, now: DateTime<Utc>) -> Result<ApprovalReceipt> {
        let guard = self.locks.try_acquire(Entity::Task, task_id)?;
        let (request, on_time, reward, penalty) = self.store.mutate(|db| {
            let task = db.task(task_id).ok_or_else(|| EngineError::task_not_found(task_id))?;
            Engine::ensure_not_settling(Entity::Task, task_id, task.payment_status, task.payment_tx.is_some())?;
            if task.status != TaskStatus::PendingReview {
                return Err(invalid(task_id, "approve", task.status));
            }
            let assignee = task
                .assignee
                .clone()
                .ok_or_else(|| EngineError::InvalidArgument(format!("task {task_id} has no assignee to pay")))?;
            let recipient = db.recipient_for(&assignee);

            let task = db.task_mut(task_id)?;
            let on_time = reward::is_on_time(now, task.deadline);
            let reward = reward::payout(task.difficulty, on_time);
            let penalty = reward::penalty(task.difficulty, on_time);
            task.set_status(TaskStatus::Completed, now, None);
            task.completed_at = Some(now);
            task.reward = reward;
            task.penalty = penalty;
            task.payment_status = PaymentStatus::Pending;
            let request = SettlementRequest { key: IdempotencyKey::for_task(task_id), amount: reward, recipient };
            Ok((request, on_time, reward, penalty))
        })?;
        drop(guard);

        info!(task_id, on_time, reward = %reward, "task approved");
        self.emit(Event::TaskApproved { task_id, status: TaskStatus::Completed, payout: reward });

        let settlement = self.settle_task(task_id, request)?;
        Ok(ApprovalReceipt { task_id, on_time, reward, penalty, settlement })
    }

    fn settle_task(&self, task_id: u64, request: SettlementRequest) -> Result<SettlementOutcome> {
        self.settle_and_apply(request, |db, result| {
            let task = db.task_mut(task_id)?;
            match result {
                Ok(record) => {
                    task.record_settlement(record);
                }
                Err(_) if task.payment_tx.is_none() => task.payment_status = PaymentStatus::Failed,
                Err(_) => {}
            }
            Ok(())
        })
    }

    /// Re-submit a failed (or interrupted) payout under the same idempotency key.
    pub fn retry_task_settlement(&self, task_id: u64) -> Result<SettlementOutcome> {
        let guard = self.locks.try_acquire(Entity::Task, task_id)?;
        let request = self.store.mutate(|db| {
            let task = db.task(task_id).ok_or_else(|| EngineError::task_not_found(task_id))?;
            let retryable = task.status == TaskStatus::Completed
                && task.settlement_ref().is_none()
                && matches!(task.payment_status, PaymentStatus::Failed | PaymentStatus::Pending);
            if !retryable {
                return Err(EngineError::InvalidTransition {
                    entity: Entity::Task,
                    id: task_id.to_string(),
                    operation: "retry payment for",
                    state: format!(
                        "{} with payment {}",
                        format_task_status(task.status),
                        format_payment_status(task.payment_status)
                    ),
                });
            }
            let assignee = task.assignee.clone().unwrap_or_default();
            let request = SettlementRequest {
                key: IdempotencyKey::for_task(task_id),
                amount: task.reward,
                recipient: db.recipient_for(&assignee),
            };
            db.task_mut(task_id)?.payment_status = PaymentStatus::Pending;
            Ok(request)
        })?;
        drop(guard);
        info!(task_id, "retrying task settlement");
        self.settle_task(task_id, request)
    }

    /// Send the work back. Progress is reset to the caller's value and the reason is kept in history.
    pub fn reject(&self, task_id: u64, reason: &str, progress: u8, now: DateTime<Utc>) -> Result<()> {
        check_progress(progress)?;
        if reason.trim().is_empty() {
            return Err(EngineError::InvalidArgument("a rejection reason is required".into()));
        }
        let _guard = self.locks.try_acquire(Entity::Task, task_id)?;
        self.store.mutate(|db| {
            let task = db.task_mut(task_id)?;
            if task.status != TaskStatus::PendingReview {
                return Err(invalid(task_id, "reject", task.status));
            }
            task.progress = progress;
            task.set_status(TaskStatus::InProgress, now, Some(reason.trim().to_string()));
            Ok(())
        })?;
        info!(task_id, reason, "task rejected");
        self.emit(Event::TaskRejected { task_id, status: TaskStatus::InProgress, payout: Amount::ZERO });
        Ok(())
    }

    pub fn pause(&self, task_id: u64, note: Option<String>, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.locks.try_acquire(Entity::Task, task_id)?;
        self.transition(
            task_id,
            "pause",
            &[TaskStatus::InProgress, TaskStatus::PendingReview],
            TaskStatus::Paused,
            note,
            now,
        )
    }

    pub fn resume(&self, task_id: u64, now: DateTime<Utc>) -> Result<()> {
        self.transition(task_id, "resume", &[TaskStatus::Paused], TaskStatus::InProgress, None, now)
    }

    pub fn cancel(&self, task_id: u64, note: Option<String>, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.locks.try_acquire(Entity::Task, task_id)?;
        let open: Vec<TaskStatus> = TaskStatus::ALL.into_iter().filter(|s| !s.is_terminal()).collect();
        self.transition(task_id, "cancel", &open, TaskStatus::Cancelled, note, now)
    }

    pub fn task(&self, task_id: u64) -> Result<Task> {
        self.store.snapshot().task(task_id).cloned().ok_or_else(|| EngineError::task_not_found(task_id))
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let snapshot = self.store.snapshot();
        let matching = snapshot.tasks.iter().filter(|t| filter.matches(t)).skip(filter.offset);
        match filter.limit {
            Some(n) => matching.take(n).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }
}
