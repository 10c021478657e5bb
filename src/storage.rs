//! sled-backed task repository and event log.
//!
//! Records and events are stored CBOR-encoded. Events are content addressed:
//! `evt/<sha256>` holds the encoding and `idx/<task_id>/<seq>` points at it in
//! publication order.
use super::audit::AuditTrail;
use super::error::{NotifyError, RepositoryError};
use super::event::NegotiationEvent;
use super::notify::NotificationSink;
use super::repository::{TaskRepository, TaskSubscription};
use super::task::TaskRecord;
use anyhow::Context;
use sled::{Batch, Db, Tree};
use std::path::Path;
use std::sync::Arc;

const TASKS_TREE: &str = "tasks";
const EVENTS_TREE: &str = "events";

pub struct SledTaskRepository {
    tasks: Tree,
}

impl SledTaskRepository {
    pub fn new(instance: Arc<Db>) -> Result<Self, RepositoryError> {
        Ok(Self {
            tasks: instance.open_tree(TASKS_TREE)?,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        Self::new(Arc::new(sled::open(path)?))
    }
}

fn stored_version(bytes: Option<&[u8]>) -> Result<u64, RepositoryError> {
    match bytes {
        Some(bytes) => Ok(minicbor::decode::<TaskRecord>(bytes)?.version),
        None => Ok(0),
    }
}

impl TaskRepository for SledTaskRepository {
    fn load(&self, task_id: &str) -> Result<TaskRecord, RepositoryError> {
        let bytes = self
            .tasks
            .get(task_id.as_bytes())?
            .ok_or_else(|| RepositoryError::NotFound(task_id.to_string()))?;

        Ok(minicbor::decode(&bytes)?)
    }

    fn save(&self, mut task: TaskRecord, expected_version: u64) -> Result<TaskRecord, RepositoryError> {
        let key = task.id.as_bytes().to_vec();
        let current = self.tasks.get(&key)?;

        let found = stored_version(current.as_deref())?;
        if found != expected_version {
            return Err(RepositoryError::VersionConflict {
                task_id: task.id,
                expected: expected_version,
                found,
            });
        }

        task.version = expected_version + 1;
        let encoded = minicbor::to_vec(&task).map_err(|e| RepositoryError::Encode(e.to_string()))?;

        // another writer may have slipped in between the read and the swap
        if let Err(cas) = self.tasks.compare_and_swap(&key, current, Some(encoded))? {
            let found = stored_version(cas.current.as_deref())?;
            tracing::warn!(task_id = %task.id, expected = expected_version, found, "lost write race");
            return Err(RepositoryError::VersionConflict {
                task_id: task.id,
                expected: expected_version,
                found,
            });
        }

        tracing::debug!(task_id = %task.id, version = task.version, status = ?task.status, "task saved");
        Ok(task)
    }

    fn subscribe(&self, task_id: &str) -> Result<TaskSubscription, RepositoryError> {
        let id = task_id.to_string();
        let subscriber = self.tasks.watch_prefix(task_id.as_bytes());

        Ok(Box::new(subscriber.filter_map(move |event| match event {
            sled::Event::Insert { key, value } if key.as_ref() == id.as_bytes() => {
                match minicbor::decode::<TaskRecord>(&value) {
                    Ok(task) => Some(task),
                    Err(e) => {
                        tracing::warn!(task_id = %id, error = %e, "undecodable task update");
                        None
                    }
                }
            }
            _ => None,
        })))
    }
}

/// Persists every published event so a task's audit trail can be rebuilt.
pub struct SledEventLog {
    instance: Arc<Db>,
    events: Tree,
}

impl SledEventLog {
    pub fn new(instance: Arc<Db>) -> Result<Self, sled::Error> {
        let events = instance.open_tree(EVENTS_TREE)?;
        Ok(Self { instance, events })
    }

    pub fn load_trail(&self, task_id: &str) -> anyhow::Result<AuditTrail> {
        let mut trail = AuditTrail::new(task_id.to_string());

        for entry in self.events.scan_prefix(format!("idx/{task_id}/")) {
            let (_, hash) = entry?;
            let mut evt_key = b"evt/".to_vec();
            evt_key.extend_from_slice(&hash);

            let cbor = self
                .events
                .get(&evt_key)?
                .with_context(|| format!("event {} missing", String::from_utf8_lossy(&hash)))?;
            let event: NegotiationEvent = minicbor::decode(&cbor)?;
            trail.append(event)?;
        }

        Ok(trail)
    }
}

impl NotificationSink for SledEventLog {
    fn publish(&self, event: &NegotiationEvent) -> Result<(), NotifyError> {
        let (hash, cbor) = event.build().map_err(|e| NotifyError::Encode(e.to_string()))?;
        // zero padded so lexical order is publication order
        let seq = self.instance.generate_id()?;

        let mut batch = Batch::default();
        batch.insert(format!("evt/{hash}").as_bytes(), cbor);
        batch.insert(
            format!("idx/{}/{seq:020}", event.task_id).as_bytes(),
            hash.as_bytes(),
        );
        self.events.apply_batch(batch)?;

        tracing::debug!(task_id = %event.task_id, kind = ?event.kind, %hash, "event recorded");
        Ok(())
    }
}
