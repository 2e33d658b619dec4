//! Folder watching for the `postie watch` CLI subcommand.
//!
//! Grounded on `usenet-dl::folder_watcher::FolderWatcher` (a `notify`-backed,
//! non-recursive directory watcher with a channel of filesystem events) but
//! adapted from NZB-ingestion to source-file-ingestion: instead of parsing a
//! `.nzb` and adding a download, we push a [`JobRequest`](crate::config::JobRequest)
//! naming the file once it looks finished, via the durable queue (§4.8).
//!
//! A file is considered ready to queue once either:
//! - its size has not changed between two consecutive `check_interval` scans
//!   (quiescence), or
//! - it is already at or above `size_threshold_bytes` (queued eagerly,
//!   without waiting for quiescence, per §6's `watcher` config).

use crate::config::{JobRequest, WatcherConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::pausable::PausableContext;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

struct Candidate {
    size: u64,
    seen_at: Instant,
    /// Whether this candidate has survived at least one `scan()` poll since
    /// it was first noticed, so quiescence requires two consecutive polls
    /// at the same size rather than matching the seeding read itself.
    polled: bool,
}

/// Watches a directory for new source files and pushes a job per stabilized
/// file onto the durable queue.
pub struct FolderWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    queue: Arc<Database>,
    config: WatcherConfig,
    /// Paths already pushed, so a lingering fs event can't double-queue them.
    queued: HashSet<PathBuf>,
}

impl FolderWatcher {
    /// Build a watcher over `config.dir`, wiring up the underlying `notify`
    /// instance. Does not start watching yet -- call [`start`](Self::start).
    pub fn new(queue: Arc<Database>, config: WatcherConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                if let Err(e) = tx.send(res) {
                    error!("failed to send filesystem event: {e}");
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::Fatal(format!("failed to initialize folder watcher: {e}")))?;

        Ok(Self {
            watcher,
            rx,
            queue,
            config,
            queued: HashSet::new(),
        })
    }

    /// Create the watch directory if missing and register it with `notify`.
    pub fn start(&mut self) -> Result<()> {
        if !self.config.dir.exists() {
            std::fs::create_dir_all(&self.config.dir)
                .map_err(|e| Error::Fatal(format!("failed to create watch directory: {e}")))?;
            info!(dir = %self.config.dir.display(), "created watch directory");
        }

        self.watcher
            .watch(&self.config.dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Fatal(format!("failed to watch {}: {e}", self.config.dir.display())))?;

        info!(dir = %self.config.dir.display(), "watching directory for new files");
        Ok(())
    }

    /// Run the watch loop until `ctx` is cancelled: merges live filesystem
    /// events with a periodic quiescence scan, pushing a job per file once
    /// it settles.
    pub async fn run(mut self, ctx: PausableContext) {
        let mut candidates: HashMap<PathBuf, Candidate> = HashMap::new();
        self.seed_existing(&mut candidates);

        let mut ticker = interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = ctx.wait_cancelled() => break,
                _ = ticker.tick() => {
                    self.scan(&mut candidates).await;
                }
                event = self.rx.recv() => {
                    match event {
                        Some(Ok(event)) => self.note_event(event, &mut candidates),
                        Some(Err(e)) => warn!(error = %e, "filesystem watcher error"),
                        None => break,
                    }
                }
            }
        }

        info!("folder watcher stopped");
    }

    fn seed_existing(&self, candidates: &mut HashMap<PathBuf, Candidate>) {
        let Ok(entries) = std::fs::read_dir(&self.config.dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if let Ok(meta) = entry.metadata()
                && meta.is_file()
                && !self.queued.contains(&path)
            {
                candidates.insert(path, Candidate { size: meta.len(), seen_at: Instant::now(), polled: false });
            }
        }
    }

    fn note_event(&self, event: Event, candidates: &mut HashMap<PathBuf, Candidate>) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            if self.queued.contains(&path) {
                continue;
            }
            if let Ok(meta) = std::fs::metadata(&path)
                && meta.is_file()
            {
                candidates
                    .entry(path)
                    .or_insert_with(|| Candidate { size: meta.len(), seen_at: Instant::now(), polled: false });
            }
        }
    }

    async fn scan(&mut self, candidates: &mut HashMap<PathBuf, Candidate>) {
        let mut settled = Vec::new();

        for (path, candidate) in candidates.iter_mut() {
            let Ok(meta) = std::fs::metadata(path) else {
                continue; // vanished before it settled; drop it on the next pass
            };
            if !meta.is_file() || meta.len() < self.config.min_file_size_bytes {
                continue;
            }

            let eager = self.config.size_threshold_bytes > 0 && meta.len() >= self.config.size_threshold_bytes;
            let stable = meta.len() == candidate.size && candidate.polled;

            if eager || stable {
                settled.push(path.clone());
            } else {
                candidate.size = meta.len();
                candidate.seen_at = Instant::now();
                candidate.polled = true;
            }
        }

        for path in settled {
            candidates.remove(&path);
            self.enqueue(path).await;
        }
    }

    async fn enqueue(&mut self, path: PathBuf) {
        let request = JobRequest {
            paths: vec![path.clone()],
            priority: 0,
        };

        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to serialize watched job");
                return;
            }
        };

        match self.queue.push(&body, request.priority).await {
            Ok(id) => {
                info!(job_id = %id, path = %path.display(), "queued watched file");
                self.queued.insert(path);
            }
            Err(e) => error!(path = %path.display(), error = %e, "failed to push queued job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn test_queue() -> (Arc<Database>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("queue.db")).await.unwrap();
        (Arc::new(db), dir)
    }

    fn watcher_config(dir: PathBuf) -> WatcherConfig {
        WatcherConfig {
            enabled: true,
            dir,
            min_file_size_bytes: 0,
            size_threshold_bytes: 0,
            check_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn eager_threshold_queues_without_waiting_for_quiescence() {
        let (queue, _queue_dir) = test_queue().await;
        let watch_dir = tempfile::tempdir().unwrap();
        let file_path = watch_dir.path().join("big.bin");
        std::fs::write(&file_path, vec![0u8; 1000]).unwrap();

        let mut config = watcher_config(watch_dir.path().to_path_buf());
        config.size_threshold_bytes = 500;

        let mut watcher = FolderWatcher::new(queue.clone(), config).unwrap();
        watcher.start().unwrap();

        let mut candidates = HashMap::new();
        watcher.seed_existing(&mut candidates);
        watcher.scan(&mut candidates).await;

        assert!(candidates.is_empty());
        assert_eq!(queue.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn small_growing_file_waits_for_quiescence() {
        let (queue, _queue_dir) = test_queue().await;
        let watch_dir = tempfile::tempdir().unwrap();
        let file_path = watch_dir.path().join("small.bin");
        std::fs::write(&file_path, vec![0u8; 10]).unwrap();

        let config = watcher_config(watch_dir.path().to_path_buf());
        let mut watcher = FolderWatcher::new(queue.clone(), config).unwrap();
        watcher.start().unwrap();

        let mut candidates = HashMap::new();
        watcher.seed_existing(&mut candidates);

        // First scan just records the size; file hasn't proven stable yet.
        watcher.scan(&mut candidates).await;
        assert_eq!(queue.queue_depth().await.unwrap(), 0);

        // Second scan over an unchanged file settles it.
        watcher.scan(&mut candidates).await;
        assert_eq!(queue.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn files_below_min_size_are_ignored() {
        let (queue, _queue_dir) = test_queue().await;
        let watch_dir = tempfile::tempdir().unwrap();
        std::fs::write(watch_dir.path().join("tiny.bin"), vec![0u8; 5]).unwrap();

        let mut config = watcher_config(watch_dir.path().to_path_buf());
        config.min_file_size_bytes = 100;

        let mut watcher = FolderWatcher::new(queue.clone(), config).unwrap();
        watcher.start().unwrap();

        let mut candidates = HashMap::new();
        watcher.seed_existing(&mut candidates);
        watcher.scan(&mut candidates).await;
        watcher.scan(&mut candidates).await;

        assert_eq!(queue.queue_depth().await.unwrap(), 0);
    }
}
