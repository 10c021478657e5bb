//! Pure negotiation operations.
//!
//! Every operation borrows the current record and returns either a new record
//! plus exactly one [`NegotiationEvent`], or an error. Nothing here performs
//! I/O or reads a clock; persisting the record and broadcasting the events is
//! left to the caller (see [`crate::service::TaskService`]).
use super::config::NegotiationPolicy;
use super::error::NegotiationError;
use super::event::{Actor, EventKind, EventPayload, NegotiationEvent};
use super::money::Money;
use super::state_machine::{Action, NegotiationStateMachine, Role};
use super::task::{TaskDraft, TaskRecord, TaskStatus};
use super::timestamp::TimeStamp;

/// Result of an accepted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub task: TaskRecord,
    pub events: Vec<NegotiationEvent>,
}

/// An engine operation in data form, for callers that dispatch dynamically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BeginReview,
    ProposeCost { cost: Money, notes: Option<String> },
    AcceptCost,
    RejectCost,
    ProposeCounterOffer { cost: Money, notes: Option<String> },
    CancelCounterOffer,
    ProposeDeliveryCounter { cost: Money, notes: Option<String> },
    FinalizeNegotiation,
    FinalizeAssignment { agent_id: String },
    MarkCompleted,
    Expire,
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::BeginReview => Action::BeginReview,
            Command::ProposeCost { .. } => Action::ProposeCost,
            Command::AcceptCost => Action::AcceptCost,
            Command::RejectCost => Action::RejectCost,
            Command::ProposeCounterOffer { .. } => Action::ProposeCounterOffer,
            Command::CancelCounterOffer => Action::CancelCounterOffer,
            Command::ProposeDeliveryCounter { .. } => Action::ProposeDeliveryCounter,
            Command::FinalizeNegotiation => Action::FinalizeNegotiation,
            Command::FinalizeAssignment { .. } => Action::Assign,
            Command::MarkCompleted => Action::Complete,
            Command::Expire => Action::Expire,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NegotiationEngine {
    machine: NegotiationStateMachine,
}

impl NegotiationEngine {
    pub fn new(policy: NegotiationPolicy) -> Self {
        Self {
            machine: NegotiationStateMachine::new(policy),
        }
    }

    pub fn execute(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
        command: Command,
    ) -> Result<Outcome, NegotiationError> {
        match command {
            Command::BeginReview => self.begin_review(task, actor, at),
            Command::ProposeCost { cost, notes } => self.propose_cost(task, actor, at, cost, notes),
            Command::AcceptCost => self.accept_cost(task, actor, at),
            Command::RejectCost => self.reject_cost(task, actor, at),
            Command::ProposeCounterOffer { cost, notes } => {
                self.propose_counter_offer(task, actor, at, cost, notes)
            }
            Command::CancelCounterOffer => self.cancel_counter_offer(task, actor, at),
            Command::ProposeDeliveryCounter { cost, notes } => {
                self.propose_delivery_counter(task, actor, at, cost, notes)
            }
            Command::FinalizeNegotiation => self.finalize_negotiation(task, actor, at),
            Command::FinalizeAssignment { agent_id } => {
                self.finalize_assignment(task, actor, at, agent_id)
            }
            Command::MarkCompleted => self.mark_completed(task, actor, at),
            Command::Expire => self.expire(task, actor, at),
        }
    }

    /// Validates a requester's draft and opens the task.
    pub fn create_task(
        &self,
        draft: TaskDraft,
        id: String,
        owner_id: String,
        now: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let task = draft.submit(id, owner_id.clone(), now)?;
        let payload = EventPayload {
            from: None,
            to: task.status,
            cost: None,
            notes: None,
            agent_id: None,
        };
        let event = NegotiationEvent::new(
            EventKind::TaskCreated,
            task.id.clone(),
            Actor::requester(owner_id),
            now,
            payload,
        );

        Ok(Outcome {
            task,
            events: vec![event],
        })
    }

    pub fn begin_review(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::BeginReview, actor)?;

        let mut next = task.clone();
        next.status = to;
        next.reviewer_id = Some(actor.user_id.clone());

        let payload = EventPayload::transition(task.status, to).with_agent(next.reviewer_id.clone());
        Ok(emit(next, EventKind::ReviewStarted, actor, at, payload))
    }

    pub fn propose_cost(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
        cost: Money,
        notes: Option<String>,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::ProposeCost, actor)?;
        ensure_reviewer(task, actor)?;
        self.check_cost(cost)?;

        let mut next = task.clone();
        next.status = to;
        next.proposed_cost = Some(cost);
        next.cost_notes = notes.clone();
        clear_counter(&mut next);

        let payload = EventPayload::transition(task.status, to)
            .with_cost(Some(cost))
            .with_notes(notes);
        Ok(emit(next, EventKind::CostProposed, actor, at, payload))
    }

    /// Accepts the agent's current proposal. A requester's own counter is
    /// never what gets accepted here, even from `UserCounterProposed`.
    pub fn accept_cost(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::AcceptCost, actor)?;
        ensure_owner(task, actor)?;
        let cost = task.proposed_cost.ok_or(NegotiationError::NoPriorProposal)?;

        let mut next = task.clone();
        next.status = to;
        clear_counter(&mut next);

        let payload = EventPayload::transition(task.status, to).with_cost(Some(cost));
        Ok(emit(next, EventKind::CostAccepted, actor, at, payload))
    }

    /// Turns the agent's proposal down. Under the `Pending` reject target a
    /// task whose schedule is still ahead returns to `Scheduled` instead.
    pub fn reject_cost(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let mut to = self.step(task, Action::RejectCost, actor)?;
        ensure_owner(task, actor)?;
        // back to the pool the task came from, same rule as submission
        if to == TaskStatus::Pending && task.scheduled_at.is_some_and(|s| s > at) {
            to = TaskStatus::Scheduled;
        }

        let mut next = task.clone();
        next.status = to;
        next.proposed_cost = None;
        next.cost_notes = None;
        if to == TaskStatus::Pending {
            next.reviewer_id = None;
        }

        let payload = EventPayload::transition(task.status, to).with_cost(task.proposed_cost);
        Ok(emit(next, EventKind::CostRejected, actor, at, payload))
    }

    pub fn propose_counter_offer(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
        cost: Money,
        notes: Option<String>,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::ProposeCounterOffer, actor)?;
        ensure_owner(task, actor)?;
        let proposed = task.proposed_cost.ok_or(NegotiationError::NoPriorProposal)?;
        same_currency(proposed, cost)?;
        self.check_cost(cost)?;

        let mut next = task.clone();
        next.status = to;
        next.user_counter_cost = Some(cost);
        next.user_counter_notes = notes.clone();

        let payload = EventPayload::transition(task.status, to)
            .with_cost(Some(cost))
            .with_notes(notes);
        Ok(emit(next, EventKind::CounterProposed, actor, at, payload))
    }

    /// Withdraws the requester's counter, leaving the agent's proposal standing.
    pub fn cancel_counter_offer(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::CancelCounterOffer, actor)?;
        ensure_owner(task, actor)?;
        let proposed = task.proposed_cost.ok_or(NegotiationError::NoPriorProposal)?;

        let mut next = task.clone();
        next.status = to;
        clear_counter(&mut next);

        let payload = EventPayload::transition(task.status, to).with_cost(Some(proposed));
        Ok(emit(next, EventKind::CounterCancelled, actor, at, payload))
    }

    /// The agent answers a counter-offer with a new price of their own, which
    /// replaces the standing proposal.
    pub fn propose_delivery_counter(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
        cost: Money,
        notes: Option<String>,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::ProposeDeliveryCounter, actor)?;
        ensure_reviewer(task, actor)?;
        let reference = task
            .user_counter_cost
            .or(task.proposed_cost)
            .ok_or(NegotiationError::NoPriorProposal)?;
        same_currency(reference, cost)?;
        self.check_cost(cost)?;

        let mut next = task.clone();
        next.status = to;
        next.proposed_cost = Some(cost);
        next.cost_notes = notes.clone();
        clear_counter(&mut next);

        let payload = EventPayload::transition(task.status, to)
            .with_cost(Some(cost))
            .with_notes(notes);
        Ok(emit(next, EventKind::DeliveryCounterProposed, actor, at, payload))
    }

    pub fn finalize_negotiation(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::FinalizeNegotiation, actor)?;
        ensure_owner(task, actor)?;

        let mut next = task.clone();
        next.status = to;

        let payload = EventPayload::transition(task.status, to).with_cost(task.proposed_cost);
        Ok(emit(next, EventKind::NegotiationFinalized, actor, at, payload))
    }

    /// Hands the task to `agent_id`. An agent may only assign themselves, and
    /// only if they are the one who reviewed the task.
    pub fn finalize_assignment(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
        agent_id: String,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::Assign, actor)?;
        if actor.role == Role::Agent {
            ensure_reviewer(task, actor)?;
            if actor.user_id != agent_id {
                return Err(NegotiationError::AgentMismatch(actor.user_id.clone()));
            }
        }

        let mut next = task.clone();
        next.status = to;
        next.assigned_agent_id = Some(agent_id.clone());

        let payload = EventPayload::transition(task.status, to)
            .with_cost(task.proposed_cost)
            .with_agent(Some(agent_id));
        Ok(emit(next, EventKind::TaskAssigned, actor, at, payload))
    }

    /// Closes the task. The agreed price moves from the record into the
    /// `TaskCompleted` event.
    pub fn mark_completed(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        at: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::Complete, actor)?;
        ensure_owner(task, actor)?;
        if actor.role == Role::Agent && task.assigned_agent_id.as_deref() != Some(actor.user_id.as_str()) {
            return Err(NegotiationError::AgentMismatch(actor.user_id.clone()));
        }

        let mut next = task.clone();
        next.status = to;
        next.proposed_cost = None;
        next.cost_notes = None;

        let payload = EventPayload::transition(task.status, to)
            .with_cost(task.proposed_cost)
            .with_agent(task.assigned_agent_id.clone());
        Ok(emit(next, EventKind::TaskCompleted, actor, at, payload))
    }

    /// Expires a task whose scheduled time has passed. `now` comes from the
    /// caller's clock and must be strictly after `scheduled_at`.
    pub fn expire(
        &self,
        task: &TaskRecord,
        actor: &Actor,
        now: TimeStamp,
    ) -> Result<Outcome, NegotiationError> {
        let to = self.step(task, Action::Expire, actor)?;
        let scheduled_at = task.scheduled_at.ok_or(NegotiationError::NotScheduled)?;
        if now <= scheduled_at {
            return Err(NegotiationError::NotYetDue { scheduled_at, now });
        }

        let mut next = task.clone();
        next.status = to;
        next.proposed_cost = None;
        next.cost_notes = None;
        clear_counter(&mut next);

        let payload = EventPayload::transition(task.status, to);
        Ok(emit(next, EventKind::TaskExpired, actor, now, payload))
    }

    fn step(
        &self,
        task: &TaskRecord,
        action: Action,
        actor: &Actor,
    ) -> Result<TaskStatus, NegotiationError> {
        self.machine.transition(task.status, action, actor.role)
    }

    fn check_cost(&self, cost: Money) -> Result<(), NegotiationError> {
        if !cost.is_positive() {
            return Err(NegotiationError::InvalidCost {
                cost,
                reason: "amount must be greater than zero",
            });
        }
        if let Some(max) = self.machine.policy().max_cost {
            if max.currency() == cost.currency() && cost.amount() > max.amount() {
                return Err(NegotiationError::InvalidCost {
                    cost,
                    reason: "amount exceeds the configured maximum",
                });
            }
        }
        Ok(())
    }
}

fn emit(
    task: TaskRecord,
    kind: EventKind,
    actor: &Actor,
    at: TimeStamp,
    payload: EventPayload,
) -> Outcome {
    let event = NegotiationEvent::new(kind, task.id.clone(), actor.clone(), at, payload);
    Outcome {
        task,
        events: vec![event],
    }
}

fn clear_counter(task: &mut TaskRecord) {
    task.user_counter_cost = None;
    task.user_counter_notes = None;
}

// only the requester who created the task may speak for it
fn ensure_owner(task: &TaskRecord, actor: &Actor) -> Result<(), NegotiationError> {
    if actor.role == Role::Requester && actor.user_id != task.owner_id {
        return Err(NegotiationError::NotTaskOwner(actor.user_id.clone()));
    }
    Ok(())
}

fn ensure_reviewer(task: &TaskRecord, actor: &Actor) -> Result<(), NegotiationError> {
    match &task.reviewer_id {
        Some(reviewer) if actor.role == Role::Agent && *reviewer != actor.user_id => {
            Err(NegotiationError::AgentMismatch(actor.user_id.clone()))
        }
        _ => Ok(()),
    }
}

fn same_currency(expected: Money, found: Money) -> Result<(), NegotiationError> {
    if expected.currency() != found.currency() {
        return Err(NegotiationError::CurrencyMismatch {
            expected: expected.currency(),
            found: found.currency(),
        });
    }
    Ok(())
}
