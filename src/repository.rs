//! Persistence seam for task records
use super::error::RepositoryError;
use super::task::TaskRecord;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::mpsc;

/// Stream of a task's stored versions, newest last. Ends when the repository
/// is dropped.
pub type TaskSubscription = Box<dyn Iterator<Item = TaskRecord> + Send>;

pub trait TaskRepository: Send + Sync {
    fn load(&self, task_id: &str) -> Result<TaskRecord, RepositoryError>;

    /// Stores `task` if the stored version still equals `expected_version`
    /// (0 for a record that was never saved). Returns the record as stored,
    /// with its version bumped to `expected_version + 1`.
    fn save(&self, task: TaskRecord, expected_version: u64) -> Result<TaskRecord, RepositoryError>;

    fn subscribe(&self, task_id: &str) -> Result<TaskSubscription, RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    records: RwLock<HashMap<String, TaskRecord>>,
    watchers: Mutex<HashMap<String, Vec<mpsc::Sender<TaskRecord>>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn notify(&self, task: &TaskRecord) {
        let mut watchers = self.watchers.lock();
        if let Some(senders) = watchers.get_mut(&task.id) {
            // drop subscribers that hung up
            senders.retain(|tx| tx.send(task.clone()).is_ok());
        }
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn load(&self, task_id: &str) -> Result<TaskRecord, RepositoryError> {
        self.records
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(task_id.to_string()))
    }

    fn save(&self, mut task: TaskRecord, expected_version: u64) -> Result<TaskRecord, RepositoryError> {
        let mut records = self.records.write();
        let found = records.get(&task.id).map_or(0, |r| r.version);
        if found != expected_version {
            return Err(RepositoryError::VersionConflict {
                task_id: task.id,
                expected: expected_version,
                found,
            });
        }
        task.version = expected_version + 1;
        records.insert(task.id.clone(), task.clone());

        // still under the write lock so watchers see versions in order
        self.notify(&task);
        Ok(task)
    }

    fn subscribe(&self, task_id: &str) -> Result<TaskSubscription, RepositoryError> {
        let (tx, rx) = mpsc::channel();
        self.watchers
            .lock()
            .entry(task_id.to_string())
            .or_default()
            .push(tx);

        Ok(Box::new(rx.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Coordinates, Location, LocationPurpose, TaskDraft};
    use crate::timestamp::TimeStamp;

    fn record(id: &str) -> TaskRecord {
        TaskDraft::new()
            .set_description("Deliver flowers")
            .set_primary_location(Location::new(
                LocationPurpose::DropOff,
                "Maadi",
                Coordinates::new(29_960_000, 31_250_000),
            ))
            .submit(id.into(), "user_1".into(), TimeStamp::new())
            .unwrap()
    }

    #[test]
    fn save_bumps_version_and_load_returns_it() {
        let repo = InMemoryTaskRepository::new();
        let stored = repo.save(record("task_a"), 0).unwrap();
        assert_eq!(stored.version, 1);

        let loaded = repo.load("task_a").unwrap();
        assert_eq!(loaded, stored);
    }

    #[test]
    fn stale_save_is_a_conflict() {
        let repo = InMemoryTaskRepository::new();
        let stored = repo.save(record("task_a"), 0).unwrap();
        repo.save(stored.clone(), 1).unwrap();

        let res = repo.save(stored, 1);
        assert!(matches!(
            res,
            Err(RepositoryError::VersionConflict {
                expected: 1,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn missing_record_is_not_found() {
        let repo = InMemoryTaskRepository::new();
        assert!(matches!(repo.load("task_x"), Err(RepositoryError::NotFound(_))));
    }

    #[test]
    fn subscribers_see_every_save() {
        let repo = InMemoryTaskRepository::new();
        let mut updates = repo.subscribe("task_a").unwrap();

        let stored = repo.save(record("task_a"), 0).unwrap();
        repo.save(stored, 1).unwrap();
        repo.save(record("task_b"), 0).unwrap();

        assert_eq!(updates.next().map(|t| t.version), Some(1));
        assert_eq!(updates.next().map(|t| t.version), Some(2));
    }

    #[test]
    fn racing_writers_notify_in_version_order() {
        let repo = std::sync::Arc::new(InMemoryTaskRepository::new());
        let updates = repo.subscribe("task_a").unwrap();
        repo.save(record("task_a"), 0).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                std::thread::spawn(move || {
                    let mut saved = 0;
                    while saved < 25 {
                        let current = repo.load("task_a").unwrap();
                        let version = current.version;
                        if repo.save(current, version).is_ok() {
                            saved += 1;
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let seen: Vec<u64> = updates.take(101).map(|t| t.version).collect();
        assert_eq!(seen, (1..=101).collect::<Vec<_>>());
    }
}
