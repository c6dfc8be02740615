//! Engine events delivered to the hosting application.
//!
//! The UI renders these: a "synced" toast after a drain completes, an
//! offline affordance when a fallback was served, navigation requested by a
//! notification action.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::outbox::EntityType;

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
  /// A partition drained successfully.
  SyncCompleted {
    entity_type: EntityType,
    count: usize,
  },
  /// A drain failed and was scheduled for retry.
  SyncDeferred {
    entity_type: EntityType,
    attempt: u32,
    retry_at: DateTime<Utc>,
  },
  /// A request was answered with an offline fallback.
  ServedOffline { url: String },
  /// A notification action asked the application to navigate.
  Navigate { url: String },
  /// Activation finished garbage-collecting stale partitions.
  VersionActivated {
    version: String,
    deleted_partitions: Vec<String>,
  },
}

pub(crate) type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// Receiving half of the engine event stream, handed to the host at
/// construction.
pub struct EngineEvents {
  rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineEvents {
  pub(crate) fn channel() -> (EventSender, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  /// Receive the next event.
  pub async fn next(&mut self) -> Option<EngineEvent> {
    self.rx.recv().await
  }

  /// Take the next event if one is already queued.
  pub fn try_next(&mut self) -> Option<EngineEvent> {
    self.rx.try_recv().ok()
  }

  /// Drain everything currently queued.
  pub fn drain(&mut self) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}
