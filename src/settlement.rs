//! Settlement gateway adapter.
//!
//! Money leaves the engine through a [`SettlementGateway`]. Callers always go through
//! [`IdempotentGateway`], which guarantees at most one submission per idempotency key: a key with a
//! non-failed record is answered from that record, and a key already in flight is refused.
//!
//! [`JournalGateway`] is the gateway the CLI ships with. It anchors each settlement into a JSON journal
//! and derives a Keccak-256 transaction hash, standing in for the contract call. The journal file is
//! re-read under a [`FileLock`] before every lookup and append, so it is also the idempotency record
//! shared by separate processes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::error::{EngineError, Entity, Result};
use crate::fields::PaymentStatus;
use crate::lock::FileLock;

/// A validated on-chain transaction reference: `0x` followed by 64 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<TxHash> {
        let valid = raw.len() == 66
            && raw.starts_with("0x")
            && raw[2..].chars().all(|c| c.is_ascii_hexdigit());
        if valid {
            Ok(TxHash(raw.to_lowercase()))
        } else {
            Err(EngineError::InvalidArgument(format!("'{raw}' is not a transaction hash")))
        }
    }

    /// Stored references that fail validation are treated as absent.
    pub fn from_stored(raw: Option<&str>) -> Option<TxHash> {
        raw.and_then(|r| TxHash::parse(r).ok())
    }

    pub fn from_digest(digest: &[u8]) -> TxHash {
        TxHash(format!("0x{}", hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn explorer_url(&self, host: &str) -> String {
        format!("https://{}/tx/{}", host.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TxHash {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        TxHash::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.0
    }
}

/// Content-hash key identifying one logical settlement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    fn derive(scope: &str, id: u64) -> Self {
        let digest = Keccak256::digest(format!("{scope}:{id}").as_bytes());
        IdempotencyKey(hex::encode(digest))
    }

    pub fn for_task(task_id: u64) -> Self {
        Self::derive("task-reward", task_id)
    }

    pub fn for_attendance(record_id: u64) -> Self {
        Self::derive("attendance-wage", record_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    pub key: IdempotencyKey,
    pub amount: Amount,
    pub recipient: String,
}

/// Gateway-side status of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementStatus {
    Submitted,
    Confirmed,
}

impl From<SettlementStatus> for PaymentStatus {
    fn from(value: SettlementStatus) -> Self {
        match value {
            SettlementStatus::Submitted => PaymentStatus::Pending,
            SettlementStatus::Confirmed => PaymentStatus::Completed,
        }
    }
}

/// The one normalized shape every gateway returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub idempotency_key: IdempotencyKey,
    pub tx_ref: TxHash,
    pub status: SettlementStatus,
    pub amount: Amount,
    pub recipient: String,
    /// Amount in the chain's smallest unit, as a decimal string.
    pub base_units: String,
    pub submitted_at: DateTime<Utc>,
}

pub trait SettlementGateway: Send + Sync {
    /// Submit a payment. Implementations must not submit twice for a key they already settled.
    fn settle(&self, request: &SettlementRequest) -> Result<SettlementRecord>;

    /// Look up a previously recorded settlement.
    fn lookup(&self, key: &IdempotencyKey) -> Option<SettlementRecord>;
}

impl<G: SettlementGateway + ?Sized> SettlementGateway for std::sync::Arc<G> {
    fn settle(&self, request: &SettlementRequest) -> Result<SettlementRecord> {
        (**self).settle(request)
    }

    fn lookup(&self, key: &IdempotencyKey) -> Option<SettlementRecord> {
        (**self).lookup(key)
    }
}

#[derive(Default)]
struct Ledger {
    settled: HashMap<IdempotencyKey, SettlementRecord>,
    in_flight: HashSet<IdempotencyKey>,
}

/// At-most-once wrapper around any gateway.
pub struct IdempotentGateway<G> {
    inner: G,
    ledger: Mutex<Ledger>,
}

impl<G: SettlementGateway> IdempotentGateway<G> {
    pub fn new(inner: G) -> Self {
        IdempotentGateway { inner, ledger: Mutex::new(Ledger::default()) }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: SettlementGateway> SettlementGateway for IdempotentGateway<G> {
    fn settle(&self, request: &SettlementRequest) -> Result<SettlementRecord> {
        {
            let mut ledger = self.ledger.lock();
            if let Some(existing) = ledger.settled.get(&request.key) {
                debug!(key = %request.key, tx = %existing.tx_ref, "settlement already recorded, not resubmitting");
                return Ok(existing.clone());
            }
            if let Some(existing) = self.inner.lookup(&request.key) {
                ledger.settled.insert(request.key.clone(), existing.clone());
                return Ok(existing);
            }
            if !ledger.in_flight.insert(request.key.clone()) {
                return Err(EngineError::AlreadyProcessing {
                    entity: Entity::Settlement,
                    id: request.key.to_string(),
                });
            }
        }

        // The ledger lock is not held across the submission.
        let outcome = self.inner.settle(request);

        let mut ledger = self.ledger.lock();
        ledger.in_flight.remove(&request.key);
        match outcome {
            Ok(record) => {
                ledger.settled.insert(request.key.clone(), record.clone());
                Ok(record)
            }
            Err(e) => {
                warn!(key = %request.key, error = %e, "settlement submission failed");
                Err(e)
            }
        }
    }

    fn lookup(&self, key: &IdempotencyKey) -> Option<SettlementRecord> {
        if let Some(record) = self.ledger.lock().settled.get(key) {
            return Some(record.clone());
        }
        self.inner.lookup(key)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    settlements: Vec<SettlementRecord>,
}

impl Journal {
    fn read(path: &Path) -> Result<Journal> {
        if !path.exists() {
            return Ok(Journal::default());
        }
        let mut buf = String::new();
        File::open(path)?.read_to_string(&mut buf)?;
        serde_json::from_str(&buf).map_err(|e| {
            EngineError::UpstreamUnavailable(format!("settlement journal {} is unreadable: {e}", path.display()))
        })
    }
}

/// Anchors settlements into a JSON journal file.
pub struct JournalGateway {
    path: PathBuf,
    token_decimals: u32,
    journal: Mutex<Journal>,
}

impl JournalGateway {
    pub fn open(path: &Path, token_decimals: u32) -> Result<Self> {
        let journal = Journal::read(path)?;
        Ok(JournalGateway { path: path.to_path_buf(), token_decimals, journal: Mutex::new(journal) })
    }

    pub fn records(&self) -> Vec<SettlementRecord> {
        self.journal.lock().settlements.clone()
    }

    fn persist(&self, journal: &Journal) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        f.write_all(serde_json::to_string_pretty(journal)?.as_bytes())?;
        f.flush()?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

impl SettlementGateway for JournalGateway {
    fn settle(&self, request: &SettlementRequest) -> Result<SettlementRecord> {
        if request.amount.is_zero() {
            return Err(EngineError::InvalidArgument("refusing to settle a zero amount".into()));
        }
        let mut journal = self.journal.lock();
        // Another process may have appended since this one last looked.
        let _file_lock = FileLock::exclusive(&FileLock::path_for(&self.path))?;
        *journal = Journal::read(&self.path)?;
        if let Some(existing) = journal.settlements.iter().find(|r| r.idempotency_key == request.key) {
            debug!(key = %request.key, tx = %existing.tx_ref, "settlement found in journal");
            return Ok(existing.clone());
        }

        let base_units = request.amount.to_base_units(self.token_decimals)?;
        let submitted_at = Utc::now();
        let mut hasher = Keccak256::new();
        hasher.update(request.key.as_str().as_bytes());
        hasher.update(base_units.to_be_bytes());
        hasher.update(request.recipient.as_bytes());
        hasher.update(submitted_at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());

        let record = SettlementRecord {
            idempotency_key: request.key.clone(),
            tx_ref: TxHash::from_digest(&hasher.finalize()),
            status: SettlementStatus::Confirmed,
            amount: request.amount,
            recipient: request.recipient.clone(),
            base_units: base_units.to_string(),
            submitted_at,
        };
        journal.settlements.push(record.clone());
        if let Err(e) = self.persist(&journal) {
            journal.settlements.pop();
            return Err(EngineError::SettlementFailure { key: request.key.to_string(), reason: e.to_string() });
        }
        info!(key = %request.key, tx = %record.tx_ref, amount = %record.amount, recipient = %record.recipient, "settlement anchored");
        Ok(record)
    }

    fn lookup(&self, key: &IdempotencyKey) -> Option<SettlementRecord> {
        let mut journal = self.journal.lock();
        match Journal::read(&self.path) {
            Ok(fresh) => *journal = fresh,
            Err(e) => warn!(error = %e, "settlement journal reread failed, using the loaded copy"),
        }
        journal.settlements.iter().find(|r| &r.idempotency_key == key).cloned()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted gateways shared by the engine tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::Receiver;

    use super::*;

    pub fn record_for(request: &SettlementRequest) -> SettlementRecord {
        let digest = Keccak256::digest(request.key.as_str().as_bytes());
        SettlementRecord {
            idempotency_key: request.key.clone(),
            tx_ref: TxHash::from_digest(&digest),
            status: SettlementStatus::Confirmed,
            amount: request.amount,
            recipient: request.recipient.clone(),
            base_units: request.amount.to_base_units(18).unwrap().to_string(),
            submitted_at: Utc::now(),
        }
    }

    /// Counts submissions and fails while `failing` is set.
    #[derive(Default)]
    pub struct CountingGateway {
        pub calls: AtomicUsize,
        pub failing: std::sync::atomic::AtomicBool,
    }

    impl SettlementGateway for CountingGateway {
        fn settle(&self, request: &SettlementRequest) -> Result<SettlementRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(EngineError::SettlementFailure {
                    key: request.key.to_string(),
                    reason: "rpc timeout".into(),
                });
            }
            Ok(record_for(request))
        }

        fn lookup(&self, _key: &IdempotencyKey) -> Option<SettlementRecord> {
            None
        }
    }

    /// Blocks every submission until the test releases it.
    pub struct BlockingGateway {
        pub calls: AtomicUsize,
        pub release: std::sync::Mutex<Receiver<()>>,
    }

    impl SettlementGateway for BlockingGateway {
        fn settle(&self, request: &SettlementRequest) -> Result<SettlementRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.release.lock().unwrap().recv();
            Ok(record_for(request))
        }

        fn lookup(&self, _key: &IdempotencyKey) -> Option<SettlementRecord> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;
    use std::sync::Arc;

    use super::testing::*;
    use super::*;

    fn request(id: u64) -> SettlementRequest {
        SettlementRequest {
            key: IdempotencyKey::for_task(id),
            amount: Amount::from_units(15),
            recipient: "0xabc".into(),
        }
    }

    #[test]
    fn test_tx_hash_validation() {
        let good = format!("0x{}", "a1".repeat(32));
        assert!(TxHash::parse(&good).is_ok());
        assert!(TxHash::parse(&format!("0X{}", "a1".repeat(32))).is_err());
        assert!(TxHash::parse(&format!("0x{}", "a1".repeat(31))).is_err());
        assert!(TxHash::parse(&format!("0x{}", "zz".repeat(32))).is_err());
        assert!(TxHash::parse(&format!("{}", "a1".repeat(33))).is_err());
        assert!(TxHash::parse("").is_err());
        assert_eq!(TxHash::from_stored(Some("0xdeadbeef")), None);
        assert_eq!(TxHash::from_stored(None), None);
        assert!(TxHash::from_stored(Some(&good)).is_some());
    }

    #[test]
    fn test_tx_hash_rejected_on_deserialize() {
        let truncated = "\"0x1234\"";
        assert!(serde_json::from_str::<TxHash>(truncated).is_err());
    }

    #[test]
    fn test_explorer_url() {
        let hash = TxHash::parse(&format!("0x{}", "0f".repeat(32))).unwrap();
        assert_eq!(
            hash.explorer_url("sepolia.etherscan.io/"),
            format!("https://sepolia.etherscan.io/tx/0x{}", "0f".repeat(32))
        );
    }

    #[test]
    fn test_idempotency_keys_are_deterministic_and_scoped() {
        assert_eq!(IdempotencyKey::for_task(4), IdempotencyKey::for_task(4));
        assert_ne!(IdempotencyKey::for_task(4), IdempotencyKey::for_task(5));
        assert_ne!(IdempotencyKey::for_task(4), IdempotencyKey::for_attendance(4));
        assert_eq!(IdempotencyKey::for_task(4).as_str().len(), 64);
    }

    #[test]
    fn test_retry_after_success_does_not_resubmit() {
        let gateway = IdempotentGateway::new(CountingGateway::default());
        let first = gateway.settle(&request(1)).unwrap();
        let second = gateway.settle(&request(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let gateway = IdempotentGateway::new(CountingGateway::default());
        gateway.inner().failing.store(true, Ordering::SeqCst);
        assert!(matches!(gateway.settle(&request(2)), Err(EngineError::SettlementFailure { .. })));
        gateway.inner().failing.store(false, Ordering::SeqCst);
        assert!(gateway.settle(&request(2)).is_ok());
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_same_key_is_refused_while_in_flight() {
        let (tx, rx) = mpsc::channel();
        let gateway = Arc::new(IdempotentGateway::new(BlockingGateway {
            calls: Default::default(),
            release: std::sync::Mutex::new(rx),
        }));
        let g = Arc::clone(&gateway);
        let first = std::thread::spawn(move || g.settle(&request(3)));
        while gateway.inner().calls.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        assert!(matches!(gateway.settle(&request(3)), Err(EngineError::AlreadyProcessing { .. })));
        tx.send(()).unwrap();
        let settled = first.join().unwrap().unwrap();
        // A late retry gets the recorded result instead of a second submission.
        assert_eq!(gateway.settle(&request(3)).unwrap(), settled);
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_journal_gateway_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settlements.json");
        let gateway = JournalGateway::open(&path, 18).unwrap();
        let record = gateway.settle(&request(9)).unwrap();
        assert!(TxHash::parse(record.tx_ref.as_str()).is_ok());
        assert_eq!(record.base_units, "15000000000000000000");

        let reopened = IdempotentGateway::new(JournalGateway::open(&path, 18).unwrap());
        assert_eq!(reopened.settle(&request(9)).unwrap().tx_ref, record.tx_ref);
        assert_eq!(reopened.inner().records().len(), 1);
    }

    #[test]
    fn test_journal_gateway_refuses_zero() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = JournalGateway::open(&dir.path().join("j.json"), 18).unwrap();
        let mut req = request(1);
        req.amount = Amount::ZERO;
        assert!(matches!(gateway.settle(&req), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn test_two_journals_on_one_file_share_keys_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settlements.json");
        let first = JournalGateway::open(&path, 18).unwrap();
        let second = JournalGateway::open(&path, 18).unwrap();

        let paid = first.settle(&request(21)).unwrap();
        // Same key through a gateway that loaded the journal before the payment: no second entry.
        assert_eq!(second.settle(&request(21)).unwrap(), paid);
        assert_eq!(second.lookup(&IdempotencyKey::for_task(21)), Some(paid));

        second.settle(&request(22)).unwrap();
        first.settle(&request(23)).unwrap();
        assert_eq!(JournalGateway::open(&path, 18).unwrap().records().len(), 3);
    }
}
