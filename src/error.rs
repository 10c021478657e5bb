use crate::money::{Currency, Money};
use crate::state_machine::{Action, Role};
use crate::task::TaskStatus;
use crate::timestamp::TimeStamp;

/// Problems found while validating a task draft or a stored record.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task description is empty")]
    EmptyDescription,
    #[error("Location '{0}' has an empty address")]
    EmptyAddress(String),
    #[error("Coordinates out of range: lat {latitude}, lng {longitude} (micro-degrees)")]
    InvalidCoordinates { latitude: i32, longitude: i32 },
    #[error("Task is missing a primary location")]
    MissingPrimaryLocation,
    #[error("Exactly one contact phone must be primary, found {0}")]
    PrimaryContact(usize),
    #[error("Contact phone '{0}' is not a valid number")]
    InvalidPhone(String),
    #[error("Scheduled time {0} is outside the storable range")]
    ScheduleOutOfRange(TimeStamp),
    #[error("Cost fields do not match status {0:?}")]
    CostFields(TaskStatus),
    #[error("Counter-offer fields do not match status {0:?}")]
    CounterFields(TaskStatus),
    #[error("Assigned agent does not match status {0:?}")]
    AssignmentFields(TaskStatus),
}

/// Domain failures returned by the state machine and the engine.
///
/// None of these leave a record partially updated: the caller still holds the
/// record it passed in, untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Illegal transition: {action:?} is not permitted from {from:?}")]
    IllegalTransition { from: TaskStatus, action: Action },
    #[error("Role {role:?} may not perform {action:?}")]
    UnauthorizedRole { action: Action, role: Role },
    #[error("User {0} does not own this task")]
    NotTaskOwner(String),
    #[error("User {0} is not the agent handling this task")]
    AgentMismatch(String),
    #[error("Invalid cost {cost}: {reason}")]
    InvalidCost { cost: Money, reason: &'static str },
    #[error("Counter-offer currency {found:?} does not match proposal currency {expected:?}")]
    CurrencyMismatch { expected: Currency, found: Currency },
    #[error("No prior cost proposal to fall back to")]
    NoPriorProposal,
    #[error("Task has no scheduled time")]
    NotScheduled,
    #[error("Task scheduled at {scheduled_at} is not due at {now}")]
    NotYetDue {
        scheduled_at: TimeStamp,
        now: TimeStamp,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency mismatch: {0:?} vs {1:?}")]
    CurrencyMismatch(Currency, Currency),
    #[error("Amount overflow")]
    Overflow,
    #[error("Amount underflow")]
    Underflow,
    #[error("Could not parse amount '{0}'")]
    Parse(String),
    #[error("Unknown currency '{0}'")]
    UnknownCurrency(String),
}

/// Errors surfaced by [`crate::repository::TaskRepository`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("Task {0} was not found")]
    NotFound(String),
    #[error("Version conflict on task {task_id}: expected {expected}, found {found}")]
    VersionConflict {
        task_id: String,
        expected: u64,
        found: u64,
    },
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    Closed,
    #[error("Failed to record event: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode event: {0}")]
    Encode(String),
}

/// Everything [`crate::service::TaskService`] can fail with.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// True when the caller may re-fetch and retry the same operation.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            ServiceError::Repository(RepositoryError::VersionConflict { .. })
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("Event for task {found} does not belong to trail {expected}")]
    ForeignEvent { expected: String, found: String },
    #[error("Event {index} starts from {found:?} but the trail was at {expected:?}")]
    BrokenChain {
        index: usize,
        expected: Option<TaskStatus>,
        found: Option<TaskStatus>,
    },
    #[error("Event {index} kind does not match its transition")]
    KindMismatch { index: usize },
}
