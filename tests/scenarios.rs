use chrono::Duration;
use sled::open;
use std::sync::Arc;
use task_negotiation::{
    config::{NegotiationPolicy, RejectTarget},
    engine::NegotiationEngine,
    error::{NegotiationError, NotifyError, ServiceError},
    event::{Actor, EventKind, NegotiationEvent},
    money::{Currency, Money},
    notify::{FanoutSink, MemorySink, NotificationSink},
    repository::{InMemoryTaskRepository, TaskRepository},
    service::TaskService,
    storage::{SledEventLog, SledTaskRepository},
    task::{ContactPhone, Coordinates, Location, LocationPurpose, TaskDraft, TaskStatus},
    timestamp::{FixedClock, TimeStamp},
    utils,
};

use tempfile::tempdir; // Use for test db cleanup.

struct Harness {
    service: TaskService,
    log: Arc<SledEventLog>,
    sink: Arc<MemorySink>,
    clock: Arc<FixedClock>,
    _dir: tempfile::TempDir,
}

// Each test gets its own sled database under a temp dir; sled holds a file
// lock so sharing one between tests would serialise or fail them.
fn harness(policy: NegotiationPolicy) -> anyhow::Result<Harness> {
    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join("tasks.db"))?);

    let repository = Arc::new(SledTaskRepository::new(db.clone())?);
    let log = Arc::new(SledEventLog::new(db)?);
    let sink = Arc::new(MemorySink::new());
    let clock = Arc::new(FixedClock::new(start()));

    let notifications = Arc::new(
        FanoutSink::new()
            .with(log.clone())
            .with(sink.clone()),
    );
    let service = TaskService::new(
        repository,
        notifications,
        clock.clone(),
        NegotiationEngine::new(policy),
    );

    Ok(Harness {
        service,
        log,
        sink,
        clock,
        _dir: dir,
    })
}

fn start() -> TimeStamp {
    TimeStamp::new_with(2025, 9, 1, 8, 0, 0).unwrap()
}

fn egp(amount: u64) -> Money {
    Money::new(amount, Currency::EGP)
}

fn draft() -> TaskDraft {
    TaskDraft::new()
        .set_description("Two koshari boxes from Abou Tarek")
        .set_primary_location(Location::new(
            LocationPurpose::Pickup,
            "Abou Tarek, Downtown",
            Coordinates::from_degrees(30.0511, 31.2437).unwrap(),
        ))
        .add_location(Location::new(
            LocationPurpose::DropOff,
            "Garden City, building 7",
            Coordinates::from_degrees(30.0364, 31.2317).unwrap(),
        ))
        .add_contact(ContactPhone::new("+20 111 222 3333", true))
        .add_contact(ContactPhone::new("+20 100 000 0000", false))
}

#[test]
fn counter_offer_then_accepting_the_original_proposal() -> anyhow::Result<()> {
    let h = harness(NegotiationPolicy::default())?;
    let requester = utils::new_uuid_to_bech32("user_")?;
    let agent = utils::new_uuid_to_bech32("user_")?;

    let task = h.service.submit_task(draft(), &requester)?;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.version, 1);

    let task = h.service.begin_review(&task.id, &agent)?;
    assert_eq!(task.status, TaskStatus::CostReview);

    let task = h.service.propose_cost(&task.id, &agent, egp(1500), None)?;
    assert_eq!(task.status, TaskStatus::CostProposed);
    assert_eq!(task.proposed_cost, Some(egp(1500)));

    let task = h
        .service
        .propose_counter_offer(&task.id, &requester, egp(1200), Some("Too far?".into()))?;
    assert_eq!(task.status, TaskStatus::UserCounterProposed);
    assert_eq!(task.user_counter_cost, Some(egp(1200)));

    let task = h.service.accept_cost(&task.id, &requester)?;
    assert_eq!(task.status, TaskStatus::CostAccepted);
    assert_eq!(task.effective_cost(), Some(egp(1500)));
    assert_eq!(task.user_counter_cost, None);

    let trail = h.log.load_trail(&task.id)?;
    assert_eq!(trail.len(), 5);
    trail.verify_chain()?;
    assert_eq!(trail.replay_status(), Some(TaskStatus::CostAccepted));
    assert_eq!(trail.agreed_cost(), Some(egp(1500)));

    Ok(())
}

#[test]
fn full_lifecycle_to_completion() -> anyhow::Result<()> {
    let h = harness(NegotiationPolicy::default())?;
    let requester = utils::new_uuid_to_bech32("user_")?;
    let agent = utils::new_uuid_to_bech32("user_")?;

    let task = h.service.submit_task(draft(), &requester)?;
    let id = task.id;
    h.service.begin_review(&id, &agent)?;
    h.service.propose_cost(&id, &agent, egp(2000), Some("Rush hour".into()))?;
    h.service.propose_counter_offer(&id, &requester, egp(1500), None)?;
    let task = h.service.propose_delivery_counter(&id, &agent, egp(1800), None)?;
    assert_eq!(task.status, TaskStatus::DeliveryCounterProposed);

    h.service.accept_cost(&id, &requester)?;
    h.service.finalize_negotiation(&id, &Actor::requester(requester.clone()))?;
    let task = h
        .service
        .finalize_assignment(&id, &Actor::agent(agent.clone()), &agent)?;
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_agent_id.as_deref(), Some(agent.as_str()));

    let task = h.service.mark_completed(&id, &Actor::requester(requester))?;
    assert_eq!(task.status, TaskStatus::Completed);
    task.check_invariants()?;

    let trail = h.log.load_trail(&id)?;
    trail.verify_chain()?;
    assert_eq!(trail.agreed_cost(), Some(egp(1800)));
    trail.view_history();

    let kinds: Vec<_> = h.sink.events().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::TaskCreated,
            EventKind::ReviewStarted,
            EventKind::CostProposed,
            EventKind::CounterProposed,
            EventKind::DeliveryCounterProposed,
            EventKind::CostAccepted,
            EventKind::NegotiationFinalized,
            EventKind::TaskAssigned,
            EventKind::TaskCompleted,
        ]
    );

    Ok(())
}

#[test]
fn scheduled_task_expires_once() -> anyhow::Result<()> {
    let h = harness(NegotiationPolicy::default())?;
    let requester = utils::new_uuid_to_bech32("user_")?;
    let due = start().checked_add(Duration::hours(2)).unwrap();

    let task = h
        .service
        .submit_task(draft().set_scheduled_at(due), &requester)?;
    assert_eq!(task.status, TaskStatus::Scheduled);

    // not yet due
    let err = h.service.expire_if_due(&task.id).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Negotiation(NegotiationError::NotYetDue { .. })
    ));

    h.clock.set(due.checked_add(Duration::seconds(1)).unwrap());
    let task = h.service.expire_if_due(&task.id)?;
    assert_eq!(task.status, TaskStatus::Expired);

    let err = h.service.expire_if_due(&task.id).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Negotiation(NegotiationError::IllegalTransition {
            from: TaskStatus::Expired,
            ..
        })
    ));

    Ok(())
}

#[test]
fn rejected_proposal_follows_policy() -> anyhow::Result<()> {
    for (target, expected) in [
        (RejectTarget::CostReview, TaskStatus::CostReview),
        (RejectTarget::Pending, TaskStatus::Pending),
    ] {
        let h = harness(NegotiationPolicy {
            reject_target: target,
            ..Default::default()
        })?;
        let requester = utils::new_uuid_to_bech32("user_")?;
        let agent = utils::new_uuid_to_bech32("user_")?;

        let task = h.service.submit_task(draft(), &requester)?;
        h.service.begin_review(&task.id, &agent)?;
        h.service.propose_cost(&task.id, &agent, egp(900), None)?;
        let task = h.service.reject_cost(&task.id, &requester)?;

        assert_eq!(task.status, expected);
        assert_eq!(task.proposed_cost, None);
        task.check_invariants()?;
    }

    Ok(())
}

#[test]
fn failed_operation_leaves_stored_record_alone() -> anyhow::Result<()> {
    let h = harness(NegotiationPolicy::default())?;
    let requester = utils::new_uuid_to_bech32("user_")?;
    let agent = utils::new_uuid_to_bech32("user_")?;

    let task = h.service.submit_task(draft(), &requester)?;
    h.service.begin_review(&task.id, &agent)?;
    let before = h.service.load(&task.id)?;
    let published = h.sink.events().len();

    let err = h.service.propose_cost(&task.id, &agent, egp(0), None).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Negotiation(NegotiationError::InvalidCost { .. })
    ));

    assert_eq!(h.service.load(&task.id)?, before);
    assert_eq!(h.sink.events().len(), published);

    Ok(())
}

#[test]
fn stale_commit_is_a_version_conflict() -> anyhow::Result<()> {
    let h = harness(NegotiationPolicy::default())?;
    let requester = utils::new_uuid_to_bech32("user_")?;
    let agent = utils::new_uuid_to_bech32("user_")?;
    let engine = NegotiationEngine::default();

    let task = h.service.submit_task(draft(), &requester)?;
    let task = h.service.begin_review(&task.id, &agent)?;
    let task = h.service.propose_cost(&task.id, &agent, egp(1500), None)?;

    // the requester computes an accept against the version they read...
    let stale = engine.accept_cost(&task, &Actor::requester(requester.clone()), h.service.now())?;
    // ...but rejects from another device first
    h.service.reject_cost(&task.id, &requester)?;

    let err = h.service.commit(stale, task.version).unwrap_err();
    assert!(err.is_version_conflict());
    assert_eq!(h.service.load(&task.id)?.status, TaskStatus::CostReview);

    Ok(())
}

struct BrokenSink;

impl NotificationSink for BrokenSink {
    fn publish(&self, _: &NegotiationEvent) -> Result<(), NotifyError> {
        Err(NotifyError::Closed)
    }
}

#[test]
fn notification_failure_does_not_roll_back() -> anyhow::Result<()> {
    let repository = Arc::new(InMemoryTaskRepository::new());
    let service = TaskService::new(
        repository.clone(),
        Arc::new(BrokenSink),
        Arc::new(FixedClock::new(start())),
        NegotiationEngine::default(),
    );

    let task = service.submit_task(draft(), "user_requester")?;
    let task = service.begin_review(&task.id, "user_agent")?;

    assert_eq!(repository.load(&task.id)?.status, TaskStatus::CostReview);

    Ok(())
}

#[test]
fn subscribers_follow_the_negotiation() -> anyhow::Result<()> {
    let repository = Arc::new(InMemoryTaskRepository::new());
    let service = TaskService::new(
        repository,
        Arc::new(MemorySink::new()),
        Arc::new(FixedClock::new(start())),
        NegotiationEngine::default(),
    );

    let task = service.submit_task(draft(), "user_requester")?;
    let updates = service.subscribe(&task.id)?;

    service.begin_review(&task.id, "user_agent")?;
    service.propose_cost(&task.id, "user_agent", egp(600), None)?;

    let seen: Vec<_> = updates.take(2).map(|t| t.status).collect();
    assert_eq!(seen, vec![TaskStatus::CostReview, TaskStatus::CostProposed]);

    Ok(())
}

#[test]
fn concurrent_accept_and_reject_apply_exactly_one() -> anyhow::Result<()> {
    let repository = Arc::new(InMemoryTaskRepository::new());
    let service = Arc::new(TaskService::new(
        repository,
        Arc::new(MemorySink::new()),
        Arc::new(FixedClock::new(start())),
        NegotiationEngine::default(),
    ));

    let task = service.submit_task(draft(), "user_requester")?;
    service.begin_review(&task.id, "user_agent")?;
    service.propose_cost(&task.id, "user_agent", egp(600), None)?;

    let accept = {
        let service = service.clone();
        let id = task.id.clone();
        std::thread::spawn(move || service.accept_cost(&id, "user_requester").is_ok())
    };
    let reject = {
        let service = service.clone();
        let id = task.id.clone();
        std::thread::spawn(move || service.reject_cost(&id, "user_requester").is_ok())
    };

    let accepted = accept.join().unwrap_or(false);
    let rejected = reject.join().unwrap_or(false);
    assert!(accepted ^ rejected, "exactly one of accept/reject must win");

    let stored = service.load(&task.id)?;
    let expected = if accepted {
        TaskStatus::CostAccepted
    } else {
        TaskStatus::CostReview
    };
    assert_eq!(stored.status, expected);
    assert_eq!(stored.version, 4);

    Ok(())
}
