//! Progress Manager: aggregates per-sub-task progress and delivers debounced
//! snapshots to a single listener.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
struct SubTask {
    name: String,
    total: u64,
    processed: u64,
}

/// Aggregate progress across all registered sub-tasks.
#[derive(Clone, Debug, Default)]
pub struct ProgressSnapshot {
    /// `Σ processed / Σ total` across every registered sub-task
    pub fraction: f64,
    /// Per-sub-task name -> (processed, total)
    pub tasks: Vec<(String, u64, u64)>,
}

struct Inner {
    tasks: HashMap<Uuid, SubTask>,
    last_published: Instant,
}

/// Single-listener progress aggregator.
pub struct ProgressManager {
    inner: Mutex<Inner>,
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressManager {
    /// Create a new manager; the returned receiver is the single listener.
    pub fn new() -> (std::sync::Arc<Self>, watch::Receiver<ProgressSnapshot>) {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        let manager = std::sync::Arc::new(Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                last_published: Instant::now() - DEBOUNCE,
            }),
            tx,
        });
        (manager, rx)
    }

    /// Register a new sub-task with a total unit count and human name.
    pub fn register(&self, id: Uuid, name: impl Into<String>, total: u64) {
        let mut inner = self.inner.lock().expect("progress manager mutex poisoned");
        inner.tasks.insert(
            id,
            SubTask {
                name: name.into(),
                total,
                processed: 0,
            },
        );
        drop(inner);
        self.publish(true);
    }

    /// Update how many units of `id` have been processed.
    pub fn update(&self, id: Uuid, processed: u64) {
        {
            let mut inner = self.inner.lock().expect("progress manager mutex poisoned");
            if let Some(task) = inner.tasks.get_mut(&id) {
                task.processed = processed;
            }
        }
        self.publish(false);
    }

    /// Remove a sub-task, e.g. once it completes.
    pub fn finish(&self, id: Uuid) {
        {
            let mut inner = self.inner.lock().expect("progress manager mutex poisoned");
            inner.tasks.remove(&id);
        }
        self.publish(true);
    }

    fn publish(&self, force: bool) {
        let mut inner = self.inner.lock().expect("progress manager mutex poisoned");
        let now = Instant::now();
        if !force && now.duration_since(inner.last_published) < DEBOUNCE {
            return;
        }
        inner.last_published = now;

        let mut total = 0u64;
        let mut processed = 0u64;
        let mut tasks = Vec::with_capacity(inner.tasks.len());
        for task in inner.tasks.values() {
            total += task.total;
            processed += task.processed;
            tasks.push((task.name.clone(), task.processed, task.total));
        }
        drop(inner);

        let fraction = if total == 0 { 0.0 } else { processed as f64 / total as f64 };
        let _ = self.tx.send(ProgressSnapshot { fraction, tasks });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aggregate_fraction_sums_across_tasks() {
        let (manager, rx) = ProgressManager::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        manager.register(a, "file-a", 100);
        manager.register(b, "file-b", 100);
        // register() force-publishes immediately; update() is debounced, so
        // clear the 100ms window before asserting on the published snapshot.
        tokio::time::sleep(DEBOUNCE * 2).await;
        manager.update(a, 50);
        tokio::time::sleep(DEBOUNCE * 2).await;
        manager.update(b, 50);

        let snapshot = rx.borrow().clone();
        assert!((snapshot.fraction - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn finish_removes_task_from_aggregate() {
        let (manager, rx) = ProgressManager::new();
        let a = Uuid::new_v4();
        manager.register(a, "file-a", 100);
        tokio::time::sleep(DEBOUNCE * 2).await;
        manager.update(a, 100);
        // finish() force-publishes regardless of the debounce window.
        manager.finish(a);

        let snapshot = rx.borrow().clone();
        assert!(snapshot.tasks.is_empty());
    }
}
