//! Audit events emitted by every accepted transition
use super::money::Money;
use super::state_machine::Role;
use super::task::TaskStatus;
use super::timestamp::TimeStamp;

/// Who performed an action.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Actor {
    #[n(0)]
    pub role: Role,
    #[n(1)]
    pub user_id: String,
}

impl Actor {
    pub fn requester(user_id: impl Into<String>) -> Self {
        Self {
            role: Role::Requester,
            user_id: user_id.into(),
        }
    }
    pub fn agent(user_id: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            user_id: user_id.into(),
        }
    }
    pub fn system() -> Self {
        Self {
            role: Role::System,
            user_id: "system".to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy, Hash)]
pub enum EventKind {
    #[n(0)]
    TaskCreated,
    #[n(1)]
    ReviewStarted,
    #[n(2)]
    CostProposed,
    #[n(3)]
    CostAccepted,
    #[n(4)]
    CostRejected,
    #[n(5)]
    CounterProposed,
    #[n(6)]
    CounterCancelled,
    #[n(7)]
    DeliveryCounterProposed,
    #[n(8)]
    NegotiationFinalized,
    #[n(9)]
    TaskAssigned,
    #[n(10)]
    TaskCompleted,
    #[n(11)]
    TaskExpired,
}

impl EventKind {
    /// Whether an event of this kind may record a move from `from` to `to`.
    pub fn matches_transition(&self, from: Option<TaskStatus>, to: TaskStatus) -> bool {
        use TaskStatus::*;

        match self {
            EventKind::TaskCreated => from.is_none() && matches!(to, Pending | Scheduled),
            EventKind::ReviewStarted => to == CostReview,
            EventKind::CostProposed => to == CostProposed && from == Some(CostReview),
            EventKind::CostAccepted => to == CostAccepted,
            EventKind::CostRejected => from == Some(CostProposed),
            EventKind::CounterProposed => to == UserCounterProposed,
            EventKind::CounterCancelled => {
                to == CostProposed && from == Some(UserCounterProposed)
            }
            EventKind::DeliveryCounterProposed => to == DeliveryCounterProposed,
            EventKind::NegotiationFinalized => to == NegotiationFinalized,
            EventKind::TaskAssigned => to == Assigned,
            EventKind::TaskCompleted => to == Completed,
            EventKind::TaskExpired => to == Expired,
        }
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct EventPayload {
    #[n(0)]
    pub from: Option<TaskStatus>, // None only for TaskCreated
    #[n(1)]
    pub to: TaskStatus,
    #[n(2)]
    pub cost: Option<Money>,
    #[n(3)]
    pub notes: Option<String>,
    #[n(4)]
    pub agent_id: Option<String>,
}

impl EventPayload {
    pub fn transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self {
            from: Some(from),
            to,
            cost: None,
            notes: None,
            agent_id: None,
        }
    }
    pub fn with_cost(mut self, cost: Option<Money>) -> Self {
        self.cost = cost;
        self
    }
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
    pub fn with_agent(mut self, agent_id: Option<String>) -> Self {
        self.agent_id = agent_id;
        self
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct NegotiationEvent {
    #[n(0)]
    pub kind: EventKind,
    #[n(1)]
    pub task_id: String,
    #[n(2)]
    pub actor: Actor,
    #[n(3)]
    pub timestamp: TimeStamp,
    #[n(4)]
    pub payload: EventPayload,
}

impl NegotiationEvent {
    pub fn new(
        kind: EventKind,
        task_id: String,
        actor: Actor,
        timestamp: TimeStamp,
        payload: EventPayload,
    ) -> Self {
        Self {
            kind,
            task_id,
            actor,
            timestamp,
            payload,
        }
    }

    /// CBOR encoding and its sha256, which doubles as the event's address.
    pub fn build(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}
