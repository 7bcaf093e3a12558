//! Engine wiring.
//!
//! The engine owns the store, the per-entity locks, the settlement gateway and the event sink.
//! Task operations are in [`crate::lifecycle`], attendance in [`crate::ledger`] and missed-checkout
//! decisions in [`crate::adjudication`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventSink, LogSink};
use crate::fields::PaymentStatus;
use crate::lock::EntityLocks;
use crate::settlement::{IdempotentGateway, SettlementGateway, SettlementRecord, SettlementRequest};
use crate::store::Store;

pub struct Engine {
    pub(crate) store: Arc<Store>,
    pub(crate) locks: EntityLocks,
    pub(crate) gateway: Box<dyn SettlementGateway>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) settings: Settings,
}

/// What a settlement attempt ended in.
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Settled(SettlementRecord),
    /// Nothing owed.
    Skipped,
    /// The gateway failed; the entity's payment status is now `failed`.
    Failed(String),
}

impl SettlementOutcome {
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            SettlementOutcome::Settled(record) => record.status.into(),
            SettlementOutcome::Skipped => PaymentStatus::None,
            SettlementOutcome::Failed(_) => PaymentStatus::Failed,
        }
    }
}

impl Engine {
    /// Build an engine. The gateway is wrapped so each idempotency key is submitted at most once.
    pub fn new<G: SettlementGateway + 'static>(store: Arc<Store>, gateway: G, settings: Settings) -> Self {
        Engine {
            store,
            locks: EntityLocks::new(),
            gateway: Box::new(IdempotentGateway::new(gateway)),
            events: Arc::new(LogSink),
            settings,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn emit(&self, event: Event) {
        self.events.emit(&event);
    }

    /// Submit a payment with no locks held, then hand the gateway's answer to `apply`.
    pub(crate) fn settle_and_apply(
        &self,
        request: SettlementRequest,
        apply: impl FnOnce(&mut crate::db::Database, std::result::Result<&SettlementRecord, &str>) -> Result<()>,
    ) -> Result<SettlementOutcome> {
        match self.gateway.settle(&request) {
            Ok(record) => {
                self.store.mutate(|db| apply(db, Ok(&record)))?;
                info!(key = %request.key, tx = %record.tx_ref, amount = %request.amount, "settlement recorded");
                Ok(SettlementOutcome::Settled(record))
            }
            // Another submission for this key is still running; its result will be applied by that caller.
            Err(e @ EngineError::AlreadyProcessing { .. }) => Err(e),
            Err(e) => {
                let reason = e.to_string();
                warn!(key = %request.key, error = %reason, "settlement failed, marking payment failed");
                self.store.mutate(|db| apply(db, Err(&reason)))?;
                Ok(SettlementOutcome::Failed(reason))
            }
        }
    }

    /// Fail a call whose entity is mid-settlement.
    pub(crate) fn ensure_not_settling(
        entity: crate::error::Entity,
        id: u64,
        payment: PaymentStatus,
        has_ref: bool,
    ) -> Result<()> {
        if payment == PaymentStatus::Pending && !has_ref {
            return Err(EngineError::AlreadyProcessing { entity, id: id.to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::db::{Database, Employee};
    use crate::events::MemorySink;

    pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    pub fn seeded_db() -> Database {
        let mut db = Database::default();
        for (id, dept) in [("E1", "ops"), ("E2", "ops"), ("E3", "finance")] {
            db.employees.push(Employee {
                id: id.into(),
                name: format!("Employee {id}"),
                department: dept.into(),
                wallet: Some(format!("0x{}", id.to_lowercase().repeat(20))),
            });
        }
        db
    }

    pub fn engine_with<G: SettlementGateway + 'static>(gateway: G) -> (Engine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let store = Arc::new(Store::in_memory(seeded_db()));
        let engine = Engine::new(store, gateway, Settings::default()).with_events(sink.clone());
        (engine, sink)
    }
}
