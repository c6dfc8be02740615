//! Background reconciliation of the outbox against the remote endpoints.
//!
//! Each entity type is its own partition with its own state machine
//! (`Idle → Draining → {Idle | BackingOff} → Draining …`), so a failing
//! journal endpoint never delays crisis interactions. Delivery is
//! at-least-once: a crash after the POST but before the synced flip causes a
//! duplicate retry with the same record ids, never a loss, and the remote
//! side deduplicates by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::event::{EngineEvent, EventSender};
use crate::http::{Fetcher, Method, Request};
use crate::outbox::{EntityType, OutboxStore};

/// Per-partition drain state. Attempts and retry deadlines live only in
/// memory; a process restart simply starts the partition back at `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
  Idle,
  Draining,
  BackingOff {
    attempt: u32,
    next_retry_at: DateTime<Utc>,
  },
}

/// What one drain pass did for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
  /// The whole batch was acknowledged.
  Synced { count: usize },
  /// Nothing was pending.
  Empty,
  /// The attempt failed; a retry is scheduled.
  Deferred {
    attempt: u32,
    retry_at: DateTime<Utc>,
  },
  /// Another drain of this partition is already in flight, or the partition
  /// is still inside its backoff window.
  Skipped,
}

#[derive(Debug, Clone)]
pub struct DrainReport {
  pub entity_type: EntityType,
  pub outcome: DrainOutcome,
}

/// Retry schedule: exponential from a base delay, capped.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
  base: Duration,
  cap: Duration,
}

impl RetryPolicy {
  fn delay(&self, attempt: u32) -> Duration {
    // attempt 1 waits the base delay, each following attempt doubles it
    let shift = attempt.saturating_sub(1).min(16);
    let secs = self
      .base
      .num_seconds()
      .saturating_mul(1i64 << shift)
      .min(self.cap.num_seconds());
    Duration::seconds(secs)
  }
}

/// Bookkeeping for one partition. The attempt counter survives the
/// `Draining` state so consecutive failures keep widening the backoff.
#[derive(Debug, Clone, Copy)]
struct Partition {
  state: PartitionState,
  attempts: u32,
}

impl Default for Partition {
  fn default() -> Self {
    Self {
      state: PartitionState::Idle,
      attempts: 0,
    }
  }
}

pub struct SyncCoordinator {
  outbox: Arc<dyn OutboxStore>,
  fetcher: Arc<dyn Fetcher>,
  base_url: Url,
  retry: RetryPolicy,
  partitions: Mutex<HashMap<EntityType, Partition>>,
  events: EventSender,
}

impl SyncCoordinator {
  pub fn new(
    outbox: Arc<dyn OutboxStore>,
    fetcher: Arc<dyn Fetcher>,
    base_url: Url,
    retry_base_secs: u64,
    retry_cap_secs: u64,
    events: EventSender,
  ) -> Self {
    Self {
      outbox,
      fetcher,
      base_url,
      retry: RetryPolicy {
        base: Duration::seconds(retry_base_secs as i64),
        cap: Duration::seconds(retry_cap_secs.max(retry_base_secs) as i64),
      },
      partitions: Mutex::new(HashMap::new()),
      events,
    }
  }

  /// One reconciliation pass over every partition, run on a
  /// connectivity-restored signal or a periodic wake. Partitions drain
  /// concurrently and independently.
  pub async fn run(&self) -> Vec<DrainReport> {
    join_all(EntityType::ALL.iter().map(|t| self.drain(*t))).await
  }

  /// Current state of one partition.
  pub fn state(&self, entity_type: EntityType) -> PartitionState {
    self
      .partitions
      .lock()
      .ok()
      .and_then(|p| p.get(&entity_type).map(|partition| partition.state))
      .unwrap_or(PartitionState::Idle)
  }

  /// Drain one partition. Re-entrant: a second trigger while a drain is in
  /// flight, or before the backoff window has elapsed, is a no-op.
  pub async fn drain(&self, entity_type: EntityType) -> DrainReport {
    if !self.begin_drain(entity_type) {
      return DrainReport {
        entity_type,
        outcome: DrainOutcome::Skipped,
      };
    }

    let pending = match self.outbox.pending(entity_type) {
      Ok(pending) => pending,
      Err(err) => {
        warn!(%entity_type, %err, "could not read pending records");
        return self.defer(entity_type);
      }
    };

    if pending.is_empty() {
      self.settle(entity_type);
      return DrainReport {
        entity_type,
        outcome: DrainOutcome::Empty,
      };
    }

    let ids: Vec<Uuid> = pending.iter().map(|r| r.id).collect();
    debug!(%entity_type, count = ids.len(), "draining partition");

    match self.post_batch(entity_type, &pending).await {
      Ok(()) => {
        let now = Utc::now();
        // The synced flip happens strictly after the 2xx; a crash before
        // this point re-sends the same ids on the next trigger
        match self.outbox.mark_synced(&ids, now) {
          Ok(count) => {
            self.settle(entity_type);
            info!(%entity_type, count, "partition drained");
            let _ = self.events.send(EngineEvent::SyncCompleted { entity_type, count });
            DrainReport {
              entity_type,
              outcome: DrainOutcome::Synced { count },
            }
          }
          Err(err) => {
            warn!(%entity_type, %err, "batch acknowledged but synced flip failed");
            self.defer(entity_type)
          }
        }
      }
      Err(err) => {
        warn!(%entity_type, %err, "drain attempt failed");
        self.defer(entity_type)
      }
    }
  }

  /// Try to move the partition into `Draining`. Returns false when the
  /// partition is already draining or still backing off.
  fn begin_drain(&self, entity_type: EntityType) -> bool {
    let Ok(mut partitions) = self.partitions.lock() else {
      return false;
    };
    let partition = partitions.entry(entity_type).or_default();
    match partition.state {
      PartitionState::Draining => false,
      PartitionState::BackingOff { next_retry_at, .. } if Utc::now() < next_retry_at => false,
      _ => {
        partition.state = PartitionState::Draining;
        true
      }
    }
  }

  /// Return the partition to `Idle` and reset its attempt counter.
  fn settle(&self, entity_type: EntityType) {
    if let Ok(mut partitions) = self.partitions.lock() {
      let partition = partitions.entry(entity_type).or_default();
      partition.state = PartitionState::Idle;
      partition.attempts = 0;
    }
  }

  /// Schedule the next retry for a failed partition.
  fn defer(&self, entity_type: EntityType) -> DrainReport {
    let (attempt, retry_at) = match self.partitions.lock() {
      Ok(mut partitions) => {
        let partition = partitions.entry(entity_type).or_default();
        partition.attempts += 1;
        let attempt = partition.attempts;
        let retry_at = Utc::now() + self.retry.delay(attempt);
        partition.state = PartitionState::BackingOff {
          attempt,
          next_retry_at: retry_at,
        };
        (attempt, retry_at)
      }
      Err(_) => (1, Utc::now() + self.retry.delay(1)),
    };
    let _ = self.events.send(EngineEvent::SyncDeferred {
      entity_type,
      attempt,
      retry_at,
    });
    DrainReport {
      entity_type,
      outcome: DrainOutcome::Deferred { attempt, retry_at },
    }
  }

  async fn post_batch(
    &self,
    entity_type: EntityType,
    records: &[crate::outbox::OutboxRecord],
  ) -> Result<()> {
    let url = self.base_url.join(&entity_type.sync_path())?;
    let body = serde_json::to_vec(&json!({ "entries": records }))?;
    let request = Request::new(Method::Post, url)
      .with_header("content-type", "application/json")
      .with_body(body);

    let response = self.fetcher.fetch(&request).await?;
    if response.is_success() {
      Ok(())
    } else {
      Err(EngineError::SyncRejected {
        status: response.status,
      })
    }
  }
}
