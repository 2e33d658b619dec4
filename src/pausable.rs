//! Pausable Context: a cancellation-propagating handle carrying a single
//! pause flag and a condition signal, checked at well-defined suspension
//! points between whole units of work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Shared pause/cancel handle passed down into every long-running worker.
#[derive(Clone)]
pub struct PausableContext {
    paused: Arc<AtomicBool>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl PausableContext {
    /// Create a fresh, unpaused context with its own cancellation token.
    pub fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child context that is cancelled whenever this one is, but
    /// has its own pause flag -- used per-job so pausing one job never
    /// blocks others sharing the same cancellation root.
    pub fn child(&self) -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(self.paused.load(Ordering::SeqCst))),
            notify: Arc::new(Notify::new()),
            cancel: self.cancel.child_token(),
        }
    }

    /// Request cancellation; propagates to every clone and child.
    pub fn cancel(&self) {
        self.cancel.cancel();
        // Wake anything blocked in `checkpoint` so it observes cancellation promptly.
        self.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested; for selecting against
    /// an otherwise-unbounded wait (e.g. a channel `recv`) in a loop that has
    /// no other way to observe this context's cancellation.
    pub async fn wait_cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Pause: new work stops being handed to downstream suspension points.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resume: wakes everything blocked in `checkpoint`.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns immediately if not paused or if cancelled; otherwise blocks
    /// until `resume` or cancellation. Call only between whole units of
    /// work -- never mid-NNTP-command.
    pub async fn checkpoint(&self) -> crate::Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(crate::Error::Cancelled);
            }
            if !self.paused.load(Ordering::SeqCst) {
                return Ok(());
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.cancel.cancelled() => return Err(crate::Error::Cancelled),
            }
        }
    }
}

impl Default for PausableContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn checkpoint_passes_through_when_not_paused() {
        let ctx = PausableContext::new();
        assert!(ctx.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_blocks_until_resume() {
        let ctx = PausableContext::new();
        ctx.pause();

        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.checkpoint().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        ctx.resume();
        let result = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("checkpoint did not resume in time")
            .expect("task panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_errors_on_cancel_even_while_paused() {
        let ctx = PausableContext::new();
        ctx.pause();
        ctx.cancel();
        assert!(matches!(ctx.checkpoint().await, Err(crate::Error::Cancelled)));
    }
}
