//! Lifetime tracking for fire-and-forget work.
//!
//! Background revalidations, outbox appends triggered from notification
//! actions, and snoozed re-notifications all run detached from their caller.
//! The host must keep the execution context alive until that work settles, so
//! spawning through a [`TaskGroup`] is a first-class contract here, not a
//! side effect: the host awaits [`TaskGroup::idle`] before letting the
//! process wind down.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Counts in-flight detached tasks and wakes waiters when the count
/// reaches zero.
#[derive(Clone)]
pub struct TaskGroup {
  active: Arc<watch::Sender<usize>>,
}

impl TaskGroup {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(0);
    Self {
      active: Arc::new(tx),
    }
  }

  /// Spawn detached work, extending the group's lifetime until it settles.
  /// The count is released even if the task panics.
  pub fn spawn<F>(&self, fut: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.active.send_modify(|n| *n += 1);
    let guard = CountGuard(Arc::clone(&self.active));
    tokio::spawn(async move {
      let _guard = guard;
      fut.await;
    });
  }

  /// Number of tasks still in flight.
  pub fn active(&self) -> usize {
    *self.active.borrow()
  }

  /// Wait until every spawned task has settled.
  pub async fn idle(&self) {
    let mut rx = self.active.subscribe();
    // wait_for checks the current value first, so a group that is already
    // idle returns immediately. Err means the sender dropped, which cannot
    // happen while &self is alive.
    let _ = rx.wait_for(|n| *n == 0).await;
  }
}

impl Default for TaskGroup {
  fn default() -> Self {
    Self::new()
  }
}

struct CountGuard(Arc<watch::Sender<usize>>);

impl Drop for CountGuard {
  fn drop(&mut self) {
    self.0.send_modify(|n| *n = n.saturating_sub(1));
  }
}
