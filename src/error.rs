//! Error taxonomy for the settlement engine.

use thiserror::Error;

/// Engine operation result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Entity kinds that errors and locks refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Task,
    Attendance,
    Employee,
    Settlement,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Task => write!(f, "task"),
            Entity::Attendance => write!(f, "attendance record"),
            Entity::Employee => write!(f, "employee"),
            Entity::Settlement => write!(f, "settlement"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation attempted from a state that does not permit it. Never retried automatically.
    #[error("Invalid transition: cannot {operation} {entity} {id} while {state}")]
    InvalidTransition {
        entity: Entity,
        id: String,
        operation: &'static str,
        state: String,
    },

    #[error("{entity} {id} is already being processed")]
    AlreadyProcessing { entity: Entity, id: String },

    #[error("Task {task_id} was already claimed by {claimed_by}")]
    AlreadyClaimed { task_id: u64, claimed_by: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The gateway could not complete payment. The lifecycle transition that triggered it stands.
    #[error("Settlement failed for key {key}: {reason}")]
    SettlementFailure { key: String, reason: String },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn task_not_found(id: u64) -> Self {
        EngineError::NotFound { entity: Entity::Task, id: id.to_string() }
    }

    pub fn employee_not_found(id: &str) -> Self {
        EngineError::NotFound { entity: Entity::Employee, id: id.to_string() }
    }

    pub fn record_not_found(id: u64) -> Self {
        EngineError::NotFound { entity: Entity::Attendance, id: id.to_string() }
    }

    /// True for contention errors the caller should report rather than blindly retry.
    pub fn is_contention(&self) -> bool {
        matches!(self, EngineError::AlreadyProcessing { .. } | EngineError::AlreadyClaimed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_classification() {
        let busy = EngineError::AlreadyProcessing { entity: Entity::Task, id: "7".into() };
        let claimed = EngineError::AlreadyClaimed { task_id: 7, claimed_by: "E1".into() };
        assert!(busy.is_contention());
        assert!(claimed.is_contention());
        assert!(!EngineError::InvalidArgument("x".into()).is_contention());
        assert_eq!(busy.to_string(), "task 7 is already being processed");
    }
}
