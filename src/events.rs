//! Notifications emitted to observers after a decision commits.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::amount::Amount;
use crate::fields::{AdjudicationStatus, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    TaskApproved { task_id: u64, status: TaskStatus, payout: Amount },
    TaskRejected { task_id: u64, status: TaskStatus, payout: Amount },
    AttendanceAdjudicated { record_id: u64, status: AdjudicationStatus, wage: Amount },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes events to the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(json) => info!(target: "taskpay::events", "{json}"),
            Err(_) => info!(target: "taskpay::events", ?event),
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}
