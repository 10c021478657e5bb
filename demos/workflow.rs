//! Walks one delivery task through a full negotiation against a sled store.
//!
//! ```text
//! cargo run --example workflow -- [config.toml]
//! ```
//!
//! Without a config file the defaults apply (database in `./tasks.db`,
//! `info` logging). `RUST_LOG` overrides the configured filter.
use std::path::PathBuf;
use std::sync::Arc;
use task_negotiation::{
    config::EngineConfig,
    engine::NegotiationEngine,
    event::Actor,
    logging,
    money::{Currency, Money},
    notify::{FanoutSink, TracingSink},
    service::TaskService,
    storage::{SledEventLog, SledTaskRepository},
    task::{ContactPhone, Coordinates, Location, LocationPurpose, TaskDraft},
    timestamp::SystemClock,
    utils,
};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("negotiation.toml"));
    let config = EngineConfig::load_or_default(&config_path)?;
    logging::init(&config.log_filter);
    tracing::info!(path = %config.db_path.display(), "opening task store");

    let db = Arc::new(sled::open(&config.db_path)?);
    let log = Arc::new(SledEventLog::new(db.clone())?);
    let service = TaskService::new(
        Arc::new(SledTaskRepository::new(db)?),
        Arc::new(FanoutSink::new().with(log.clone()).with(TracingSink)),
        Arc::new(SystemClock),
        NegotiationEngine::new(config.policy.clone()),
    );

    let requester = utils::new_uuid_to_bech32("user_")?;
    let agent = utils::new_uuid_to_bech32("user_")?;

    let draft = TaskDraft::new()
        .set_description("Pick up a birthday cake and deliver it before 6pm")
        .set_primary_location(Location::new(
            LocationPurpose::Pickup,
            "Cake shop, 26th of July St, Zamalek",
            Coordinates::from_degrees(30.0626, 31.2197)
                .ok_or_else(|| anyhow::anyhow!("bad pickup coordinates"))?,
        ))
        .add_location(Location::new(
            LocationPurpose::DropOff,
            "Apartment 12, Road 9, Maadi",
            Coordinates::from_degrees(29.9602, 31.2569)
                .ok_or_else(|| anyhow::anyhow!("bad drop-off coordinates"))?,
        ))
        .add_contact(ContactPhone::new("+20 100 555 0101", true));

    let task = service.submit_task(draft, &requester)?;
    let id = task.id.clone();

    service.begin_review(&id, &agent)?;
    service.propose_cost(
        &id,
        &agent,
        Money::new(12_000, Currency::EGP),
        Some("Cross-city trip at rush hour".into()),
    )?;
    service.propose_counter_offer(
        &id,
        &requester,
        Money::new(9_000, Currency::EGP),
        Some("It's a short drive on the ring road".into()),
    )?;
    service.propose_delivery_counter(&id, &agent, Money::new(10_500, Currency::EGP), None)?;
    let accepted = service.accept_cost(&id, &requester)?;
    tracing::info!(task_id = %id, cost = ?accepted.effective_cost().map(|c| c.to_string()), "price agreed");

    service.finalize_negotiation(&id, &Actor::requester(&requester))?;
    service.finalize_assignment(&id, &Actor::system(), &agent)?;
    let done = service.mark_completed(&id, &Actor::agent(&agent))?;
    tracing::info!(task_id = %id, status = ?done.status, version = done.version, "task closed");

    let trail = log.load_trail(&id)?;
    trail.verify_chain()?;
    trail.view_history();
    if let Some(cost) = trail.agreed_cost() {
        tracing::info!(task_id = %id, %cost, events = trail.len(), "audit trail verified");
    }

    Ok(())
}
