//! Delivery of negotiation events to whoever needs to hear about them
use super::error::NotifyError;
use super::event::NegotiationEvent;
use parking_lot::Mutex;
use std::sync::Arc;

/// Fire-and-forget publication. A failed publish never undoes the transition
/// that produced the event; the caller logs it and moves on.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &NegotiationEvent) -> Result<(), NotifyError>;
}

impl<S: NotificationSink + ?Sized> NotificationSink for Arc<S> {
    fn publish(&self, event: &NegotiationEvent) -> Result<(), NotifyError> {
        (**self).publish(event)
    }
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, event: &NegotiationEvent) -> Result<(), NotifyError> {
        tracing::info!(
            task_id = %event.task_id,
            kind = ?event.kind,
            actor = %event.actor.user_id,
            to = ?event.payload.to,
            "published negotiation event"
        );
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<NegotiationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NegotiationEvent> {
        self.events.lock().clone()
    }

    pub fn drain(&self) -> Vec<NegotiationEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl NotificationSink for MemorySink {
    fn publish(&self, event: &NegotiationEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Publishes to several sinks in order. Every sink is tried; the first error
/// is returned after all have run.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl NotificationSink for FanoutSink {
    fn publish(&self, event: &NegotiationEvent) -> Result<(), NotifyError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
