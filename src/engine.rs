//! The engine facade.
//!
//! One [`OfflineEngine`] value is constructed per process with injected
//! storage, network, and presentation collaborators, replacing the ambient
//! process-wide state the platform grew up with. The host wires it to its
//! interception boundary, its connectivity signals, and its control channel.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{
  CacheRouter, CacheStore, LifecycleManager, MemoryCacheStore, SqliteCacheStore, StrategyRules,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::event::{EngineEvent, EngineEvents, EventSender};
use crate::http::{Fetcher, Request, Response};
use crate::notify::{
  Notification, NotificationAction, NotificationPresenter, NotificationRouter,
};
use crate::outbox::{
  EntityType, MemoryOutboxStore, OutboxRecord, OutboxStore, SqliteOutboxStore,
};
use crate::sync::{DrainReport, PartitionState, SyncCoordinator};
use crate::tasks::TaskGroup;

/// Lifecycle phase of this engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
  /// Installed and serving, but the previous build's partitions may still
  /// exist.
  Installed,
  /// Activation swept stale partitions; this build owns the caches.
  Active,
}

/// Control channel messages from the hosting page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Pre-warm arbitrary URLs.
  CacheUrls(Vec<String>),
  /// Stop waiting behind the previous build and activate now.
  SkipWaiting,
}

/// Replies sent back over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAck {
  UrlsCached { cached: usize },
  Activated { version: String },
}

pub struct OfflineEngine {
  config: EngineConfig,
  outbox: Arc<dyn OutboxStore>,
  router: CacheRouter,
  lifecycle: LifecycleManager,
  sync: SyncCoordinator,
  notifications: NotificationRouter,
  tasks: TaskGroup,
  events: EventSender,
  phase: Mutex<EnginePhase>,
}

impl OfflineEngine {
  /// Build an engine from explicit collaborators. Returns the engine and
  /// the receiving half of its event stream.
  pub fn new(
    config: EngineConfig,
    cache: Arc<dyn CacheStore>,
    outbox: Arc<dyn OutboxStore>,
    fetcher: Arc<dyn Fetcher>,
    presenter: Arc<dyn NotificationPresenter>,
  ) -> Result<(Self, EngineEvents)> {
    let origin = config.origin_url()?;
    let sync_base = config.sync_base_url()?;
    let tasks = TaskGroup::new();
    let (events_tx, events_rx) = EngineEvents::channel();

    let router = CacheRouter::new(
      Arc::clone(&cache),
      Arc::clone(&fetcher),
      StrategyRules::from_config(&config.cache),
      config.cache_version.clone(),
      origin.clone(),
      config.cache.offline_page.clone(),
      tasks.clone(),
      events_tx.clone(),
    );

    let lifecycle = LifecycleManager::new(
      Arc::clone(&cache),
      Arc::clone(&fetcher),
      config.cache.clone(),
      config.cache_version.clone(),
      origin,
    );

    let sync = SyncCoordinator::new(
      Arc::clone(&outbox),
      Arc::clone(&fetcher),
      sync_base,
      config.sync.retry_base_secs,
      config.sync.retry_cap_secs,
      events_tx.clone(),
    );

    let notifications = NotificationRouter::new(
      presenter,
      Arc::clone(&outbox),
      tasks.clone(),
      events_tx.clone(),
    );

    let engine = Self {
      config,
      outbox,
      router,
      lifecycle,
      sync,
      notifications,
      tasks,
      events: events_tx,
      phase: Mutex::new(EnginePhase::Installed),
    };
    Ok((engine, events_rx))
  }

  /// Build an engine on the default SQLite stores. If persistent storage
  /// cannot be opened the engine degrades to in-memory stores (no offline
  /// support across restarts) rather than failing.
  pub fn with_default_storage(
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    presenter: Arc<dyn NotificationPresenter>,
  ) -> Result<(Self, EngineEvents)> {
    let cache: Arc<dyn CacheStore> = match SqliteCacheStore::open_default() {
      Ok(store) => Arc::new(store),
      Err(err) => {
        warn!(%err, "cache storage unavailable, degrading to in-memory");
        Arc::new(MemoryCacheStore::new())
      }
    };
    let outbox: Arc<dyn OutboxStore> = match SqliteOutboxStore::open_default() {
      Ok(store) => Arc::new(store),
      Err(err) => {
        warn!(%err, "outbox storage unavailable, degrading to in-memory");
        Arc::new(MemoryOutboxStore::new())
      }
    };
    Self::new(config, cache, outbox, fetcher, presenter)
  }

  /// Pre-warm the caches. Fails only when a crisis resource could not be
  /// cached; the host retries install in that case.
  pub async fn install(&self) -> Result<()> {
    self.lifecycle.install().await
  }

  /// Sweep partitions left behind by other builds and take ownership.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let deleted = self.lifecycle.activate()?;
    if let Ok(mut phase) = self.phase.lock() {
      *phase = EnginePhase::Active;
    }
    info!(version = %self.config.cache_version, swept = deleted.len(), "engine activated");
    let _ = self.events.send(EngineEvent::VersionActivated {
      version: self.config.cache_version.clone(),
      deleted_partitions: deleted.clone(),
    });
    Ok(deleted)
  }

  pub fn phase(&self) -> EnginePhase {
    self
      .phase
      .lock()
      .map(|phase| *phase)
      .unwrap_or(EnginePhase::Installed)
  }

  /// The interception boundary. Infallible: offline callers get a cached
  /// resource or an explicit offline affordance, never a transport error.
  pub async fn handle_request(&self, request: &Request) -> Response {
    self.router.handle(request).await
  }

  /// Persist a user-authored record locally. No network involved; the sync
  /// coordinator reconciles it later.
  pub fn append(&self, entity_type: EntityType, payload: serde_json::Value) -> Result<Uuid> {
    let record = OutboxRecord::new(entity_type, payload);
    self.outbox.append(&record)?;
    Ok(record.id)
  }

  /// Unsynced records across all entity types.
  pub fn pending_count(&self) -> Result<u64> {
    self.outbox.pending_count()
  }

  /// Local audit trail for one entity type.
  pub fn records(&self, entity_type: EntityType) -> Result<Vec<OutboxRecord>> {
    self.outbox.records(entity_type)
  }

  /// One reconciliation pass, run on connectivity restoration or a periodic
  /// wake.
  pub async fn sync_now(&self) -> Vec<DrainReport> {
    self.sync.run().await
  }

  pub fn sync_state(&self, entity_type: EntityType) -> PartitionState {
    self.sync.state(entity_type)
  }

  /// Explicit scheduled refresh of the crisis tier.
  pub async fn refresh_crisis(&self) -> usize {
    self.lifecycle.refresh_crisis().await
  }

  /// Handle a control channel message and produce its acknowledgment.
  pub async fn handle_message(&self, message: ControlMessage) -> ControlAck {
    match message {
      ControlMessage::CacheUrls(urls) => {
        let cached = self.lifecycle.warm_urls(&urls).await;
        ControlAck::UrlsCached { cached }
      }
      ControlMessage::SkipWaiting => {
        if let Err(err) = self.activate().await {
          warn!(%err, "skip-waiting activation failed");
        }
        ControlAck::Activated {
          version: self.config.cache_version.clone(),
        }
      }
    }
  }

  /// Interpret and present an inbound notification payload.
  pub fn show_notification(&self, raw: &[u8]) -> Notification {
    self.notifications.present_raw(raw)
  }

  /// Route a user's notification action.
  pub fn notification_action(&self, action: NotificationAction, notification: &Notification) {
    self.notifications.handle_action(action, notification);
  }

  /// Wait until all fire-and-forget work (background refreshes, action
  /// appends, snoozes) has settled. Hosts call this before letting the
  /// execution context terminate.
  pub async fn settle(&self) {
    self.tasks.idle().await
  }
}
