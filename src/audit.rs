//! Append-only audit trail of a task's negotiation events
use super::error::AuditError;
use super::event::{EventKind, NegotiationEvent};
use super::money::Money;
use super::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AuditTrail {
    #[n(0)]
    pub task_id: String,
    #[n(1)]
    events: Vec<NegotiationEvent>,
}

impl AuditTrail {
    pub fn new(task_id: String) -> Self {
        Self {
            task_id,
            events: vec![],
        }
    }

    pub fn events(&self) -> &[NegotiationEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn append(&mut self, event: NegotiationEvent) -> Result<(), AuditError> {
        if event.task_id != self.task_id {
            return Err(AuditError::ForeignEvent {
                expected: self.task_id.clone(),
                found: event.task_id,
            });
        }
        self.events.push(event);
        Ok(())
    }

    pub fn extend(
        &mut self,
        events: impl IntoIterator<Item = NegotiationEvent>,
    ) -> Result<(), AuditError> {
        for event in events {
            self.append(event)?;
        }
        Ok(())
    }

    /// Status the task is in according to the trail alone.
    pub fn replay_status(&self) -> Option<TaskStatus> {
        self.events.last().map(|e| e.payload.to)
    }

    /// Price of the most recent acceptance. Survives completion, which clears
    /// the cost fields on the record itself.
    pub fn agreed_cost(&self) -> Option<Money> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::CostAccepted)
            .and_then(|e| e.payload.cost)
    }

    /// Every event must start where the previous one ended and carry a kind
    /// that fits its transition.
    pub fn verify_chain(&self) -> Result<(), AuditError> {
        let mut at: Option<TaskStatus> = None;

        for (index, event) in self.events.iter().enumerate() {
            if event.payload.from != at {
                return Err(AuditError::BrokenChain {
                    index,
                    expected: at,
                    found: event.payload.from,
                });
            }
            if !event.kind.matches_transition(event.payload.from, event.payload.to) {
                return Err(AuditError::KindMismatch { index });
            }
            at = Some(event.payload.to);
        }

        Ok(())
    }

    pub fn serialize_with_hash(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }

    pub fn view_history(&self) {
        for (i, event) in self.events.iter().enumerate() {
            tracing::info!(
                task_id = %self.task_id,
                seq = i,
                kind = ?event.kind,
                actor = %event.actor.user_id,
                role = ?event.actor.role,
                at = %event.timestamp,
                from = ?event.payload.from,
                to = ?event.payload.to,
                cost = ?event.payload.cost.map(|c| c.to_string()),
                "negotiation event"
            );
        }
    }
}
