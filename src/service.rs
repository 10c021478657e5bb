//! Service layer API for task negotiation.
//!
//! Each call loads the current record, runs the pure engine operation, saves
//! the result with an optimistic version check and then publishes the
//! emitted events. Calls for the same task id are serialised in-process; a
//! concurrent writer elsewhere surfaces as a version conflict.
use super::engine::{Command, NegotiationEngine, Outcome};
use super::error::{NegotiationError, RepositoryError, ServiceError};
use super::event::Actor;
use super::money::Money;
use super::notify::NotificationSink;
use super::repository::{TaskRepository, TaskSubscription};
use super::task::{TaskDraft, TaskRecord};
use super::timestamp::{Clock, TimeStamp};
use super::utils;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const TASK_HRP: &str = "task_";

/// Negotiation operations over a repository, a notification sink and a clock.
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    notifications: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    engine: NegotiationEngine,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskService {
    /// Builds a service; `engine` carries the negotiation policy.
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        notifications: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        engine: NegotiationEngine,
    ) -> Self {
        Self {
            repository,
            notifications,
            clock,
            engine,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Latest stored version of the task.
    pub fn load(&self, task_id: &str) -> Result<TaskRecord, ServiceError> {
        Ok(self.repository.load(task_id)?)
    }

    /// Stored versions of the task from now on, as they are saved.
    pub fn subscribe(&self, task_id: &str) -> Result<TaskSubscription, ServiceError> {
        Ok(self.repository.subscribe(task_id)?)
    }

    /// Creates a new task owned by `requester_id`.
    pub fn submit_task(
        &self,
        draft: TaskDraft,
        requester_id: &str,
    ) -> Result<TaskRecord, ServiceError> {
        let task_id = utils::new_uuid_to_bech32(TASK_HRP)?;
        let outcome =
            self.engine
                .create_task(draft, task_id, requester_id.to_string(), self.clock.now())?;

        tracing::info!(task_id = %outcome.task.id, status = ?outcome.task.status, "task submitted");
        self.commit(outcome, 0)
    }

    /// `agent_id` picks the task up for pricing and becomes its reviewer.
    pub fn begin_review(&self, task_id: &str, agent_id: &str) -> Result<TaskRecord, ServiceError> {
        self.run(task_id, &Actor::agent(agent_id), Command::BeginReview)
    }

    /// The reviewing agent quotes a price, replacing any earlier proposal.
    pub fn propose_cost(
        &self,
        task_id: &str,
        agent_id: &str,
        cost: Money,
        notes: Option<String>,
    ) -> Result<TaskRecord, ServiceError> {
        self.run(
            task_id,
            &Actor::agent(agent_id),
            Command::ProposeCost { cost, notes },
        )
    }

    /// The owner accepts the agent's standing proposal.
    pub fn accept_cost(&self, task_id: &str, requester_id: &str) -> Result<TaskRecord, ServiceError> {
        self.run(task_id, &Actor::requester(requester_id), Command::AcceptCost)
    }

    /// The owner turns the proposal down. Where the task goes next is set by
    /// the `reject_target` policy.
    pub fn reject_cost(&self, task_id: &str, requester_id: &str) -> Result<TaskRecord, ServiceError> {
        self.run(task_id, &Actor::requester(requester_id), Command::RejectCost)
    }

    /// The owner answers the proposal with a price of their own.
    pub fn propose_counter_offer(
        &self,
        task_id: &str,
        requester_id: &str,
        cost: Money,
        notes: Option<String>,
    ) -> Result<TaskRecord, ServiceError> {
        self.run(
            task_id,
            &Actor::requester(requester_id),
            Command::ProposeCounterOffer { cost, notes },
        )
    }

    /// The owner withdraws their counter; the agent's proposal stands again.
    pub fn cancel_counter_offer(
        &self,
        task_id: &str,
        requester_id: &str,
    ) -> Result<TaskRecord, ServiceError> {
        self.run(
            task_id,
            &Actor::requester(requester_id),
            Command::CancelCounterOffer,
        )
    }

    /// The reviewing agent answers a counter-offer with a new price.
    pub fn propose_delivery_counter(
        &self,
        task_id: &str,
        agent_id: &str,
        cost: Money,
        notes: Option<String>,
    ) -> Result<TaskRecord, ServiceError> {
        self.run(
            task_id,
            &Actor::agent(agent_id),
            Command::ProposeDeliveryCounter { cost, notes },
        )
    }

    /// Locks in the accepted price. `actor` is the owner or the system.
    pub fn finalize_negotiation(
        &self,
        task_id: &str,
        actor: &Actor,
    ) -> Result<TaskRecord, ServiceError> {
        self.run(task_id, actor, Command::FinalizeNegotiation)
    }

    /// Hands the task to `agent_id`. An agent may only assign themselves.
    pub fn finalize_assignment(
        &self,
        task_id: &str,
        actor: &Actor,
        agent_id: &str,
    ) -> Result<TaskRecord, ServiceError> {
        self.run(
            task_id,
            actor,
            Command::FinalizeAssignment {
                agent_id: agent_id.to_string(),
            },
        )
    }

    /// Closes an assigned task. `actor` is the owner or the assigned agent.
    pub fn mark_completed(&self, task_id: &str, actor: &Actor) -> Result<TaskRecord, ServiceError> {
        self.run(task_id, actor, Command::MarkCompleted)
    }

    /// Expires the task if its scheduled time has passed by the service clock.
    pub fn expire_if_due(&self, task_id: &str) -> Result<TaskRecord, ServiceError> {
        self.run(task_id, &Actor::system(), Command::Expire)
    }

    /// Runs `command` against the latest stored record while holding the
    /// task's lock. Ids that are not `task_` bech32 strings are reported as
    /// not found without touching the store.
    pub fn run(
        &self,
        task_id: &str,
        actor: &Actor,
        command: Command,
    ) -> Result<TaskRecord, ServiceError> {
        if !utils::has_prefix(task_id, TASK_HRP) {
            return Err(RepositoryError::NotFound(task_id.to_string()).into());
        }

        let lock = self.lock_for(task_id);
        let res = {
            let _guard = lock.lock();
            self.run_locked(task_id, actor, command)
        };
        self.release(task_id, lock);
        res
    }

    fn run_locked(
        &self,
        task_id: &str,
        actor: &Actor,
        command: Command,
    ) -> Result<TaskRecord, ServiceError> {
        let current = self.repository.load(task_id)?;
        let action = command.action();
        let outcome = self
            .engine
            .execute(&current, actor, self.clock.now(), command)
            .inspect_err(|e| log_rejection(task_id, actor, e))?;

        tracing::info!(
            task_id,
            ?action,
            from = ?current.status,
            to = ?outcome.task.status,
            "transition applied"
        );
        self.commit(outcome, current.version)
    }

    /// Applies an engine operation the caller already ran, e.g. one computed
    /// against a record read earlier. Fails on a version conflict if the
    /// stored record has moved on since `outcome` was produced.
    pub fn commit(&self, outcome: Outcome, expected_version: u64) -> Result<TaskRecord, ServiceError> {
        let stored = self.repository.save(outcome.task, expected_version)?;

        for event in &outcome.events {
            if let Err(e) = self.notifications.publish(event) {
                // the transition is already durable; delivery is best effort
                tracing::warn!(task_id = %event.task_id, kind = ?event.kind, error = %e, "failed to publish event");
            }
        }

        Ok(stored)
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> TimeStamp {
        self.clock.now()
    }

    fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    // drops the map entry once no other call is waiting on it
    fn release(&self, task_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(task_id);
        }
    }
}

fn log_rejection(task_id: &str, actor: &Actor, error: &NegotiationError) {
    tracing::debug!(
        task_id,
        actor = %actor.user_id,
        role = ?actor.role,
        %error,
        "operation rejected"
    );
}
