//! Per-attempt activity context: cancellation, deadline and heartbeats.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hubdeploy_state::TaskId;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

/// Handed to each activity attempt. Cloning shares the cancel signal and
/// the heartbeat counter.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    cancel: watch::Receiver<bool>,
    deadline: Option<Instant>,
    heartbeats: Arc<AtomicU64>,
    last_detail: Arc<AtomicU64>,
}

impl ActivityContext {
    pub fn new(cancel: watch::Receiver<bool>) -> Self {
        Self {
            cancel,
            deadline: None,
            heartbeats: Arc::new(AtomicU64::new(0)),
            last_detail: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A context that is never cancelled. The sender is returned so the
    /// caller can still cancel it.
    pub fn detached() -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self::new(rx), tx)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the context is cancelled. Never resolves if the
    /// cancelling side is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Record liveness for the task being driven.
    pub fn heartbeat(&self, task_id: TaskId) {
        let n = self.heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_detail.store(task_id, Ordering::Relaxed);
        trace!(task_id, heartbeats = n, "activity heartbeat");
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Task id carried by the most recent heartbeat.
    pub fn last_heartbeat_detail(&self) -> TaskId {
        self.last_detail.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_resolves_waiters() {
        let (ctx, tx) = ActivityContext::detached();
        assert!(!ctx.is_cancelled());
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_sender_never_cancels() {
        let (ctx, tx) = ActivityContext::detached();
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn deadline_and_heartbeats() {
        let (ctx, _tx) = ActivityContext::detached();
        assert!(!ctx.deadline_exceeded());
        let ctx = ctx.with_timeout(Duration::ZERO);
        assert!(ctx.deadline_exceeded());

        ctx.heartbeat(7);
        ctx.clone().heartbeat(8);
        assert_eq!(ctx.heartbeat_count(), 2);
        assert_eq!(ctx.last_heartbeat_detail(), 8);
    }
}
