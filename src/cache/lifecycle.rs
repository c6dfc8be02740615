//! Install pre-warming, activation garbage collection, and the scheduled
//! crisis refresh.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};
use url::Url;

use crate::config::CacheConfig;
use crate::error::{EngineError, Result};
use crate::http::{Fetcher, Method, Request};

use super::store::{request_key, CacheStore, CachedResponse};
use super::tier::CacheTier;

pub struct LifecycleManager {
  store: Arc<dyn CacheStore>,
  fetcher: Arc<dyn Fetcher>,
  config: CacheConfig,
  version: String,
  origin: Url,
}

impl LifecycleManager {
  pub fn new(
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    config: CacheConfig,
    version: String,
    origin: Url,
  ) -> Self {
    Self {
      store,
      fetcher,
      config,
      version,
      origin,
    }
  }

  /// Pre-warm the caches.
  ///
  /// Crisis resources are strict: install fails unless every one of them is
  /// cached, because the platform guarantees they are servable offline from
  /// the moment install completes. The application shell and offline page
  /// are best-effort.
  pub async fn install(&self) -> Result<()> {
    let crisis = join_all(
      self
        .config
        .crisis_paths
        .iter()
        .map(|path| self.warm_path(CacheTier::Crisis, path)),
    )
    .await;

    for result in crisis {
      // Any crisis failure aborts install; the host retries the whole pass
      result?;
    }

    let mut shell: Vec<String> = self.config.static_shell.clone();
    shell.push(self.config.offline_page.clone());
    for path in &shell {
      if let Err(err) = self.warm_path(CacheTier::Static, path).await {
        warn!(%path, %err, "shell pre-cache failed");
      }
    }

    info!(
      crisis = self.config.crisis_paths.len(),
      shell = shell.len(),
      "install pre-warm complete"
    );
    Ok(())
  }

  /// Delete every partition stamped with a version other than the current
  /// build. Crisis partitions are swept only when their own suffix is stale;
  /// nothing else ever removes them.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.store.partitions()? {
      if let Some((tier, version)) = CacheTier::parse_partition(&name) {
        if version != self.version {
          self.store.delete_partition(&name)?;
          info!(partition = %name, %tier, "deleted stale partition");
          deleted.push(name);
        }
      }
    }
    Ok(deleted)
  }

  /// Explicit scheduled refresh of the crisis tier. Failures keep the
  /// existing entries; a stale crisis resource beats a missing one.
  pub async fn refresh_crisis(&self) -> usize {
    let results = join_all(
      self
        .config
        .crisis_paths
        .iter()
        .map(|path| self.warm_path(CacheTier::Crisis, path)),
    )
    .await;

    let refreshed = results.iter().filter(|r| r.is_ok()).count();
    if refreshed < self.config.crisis_paths.len() {
      warn!(
        refreshed,
        total = self.config.crisis_paths.len(),
        "crisis refresh incomplete, stale entries retained"
      );
    }
    refreshed
  }

  /// Warm arbitrary URLs on request of the control channel. Stored in the
  /// dynamic tier, where the default read strategy looks first.
  pub async fn warm_urls(&self, urls: &[String]) -> usize {
    let mut cached = 0;
    for raw in urls {
      let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(err) => {
          warn!(url = %raw, %err, "skipping unparseable warm url");
          continue;
        }
      };
      match self.warm_url(CacheTier::Dynamic, url).await {
        Ok(()) => cached += 1,
        Err(err) => warn!(url = %raw, %err, "warm fetch failed"),
      }
    }
    cached
  }

  async fn warm_path(&self, tier: CacheTier, path: &str) -> Result<()> {
    let url = self.origin.join(path)?;
    self.warm_url(tier, url).await
  }

  async fn warm_url(&self, tier: CacheTier, url: Url) -> Result<()> {
    let request = Request::new(Method::Get, url.clone());
    let response = self.fetcher.fetch(&request).await?;
    if !response.is_success() {
      return Err(EngineError::Network(format!(
        "pre-cache fetch for {} returned HTTP {}",
        url, response.status
      )));
    }

    let entry = CachedResponse::snapshot(&url, &response);
    self
      .store
      .put(&tier.partition(&self.version), &request_key(&request), &entry)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::MemoryCacheStore;
  use crate::config::EngineConfig;
  use crate::http::Response;
  use crate::testing::ScriptedFetcher;

  fn manager(
    store: Arc<dyn CacheStore>,
    fetcher: Arc<ScriptedFetcher>,
    version: &str,
  ) -> LifecycleManager {
    let config = EngineConfig::default();
    LifecycleManager::new(
      store,
      fetcher,
      config.cache.clone(),
      version.to_string(),
      config.origin_url().unwrap(),
    )
  }

  fn script_defaults(fetcher: &ScriptedFetcher) {
    let config = EngineConfig::default();
    let mut paths = config.cache.crisis_paths.clone();
    paths.extend(config.cache.static_shell.clone());
    paths.push(config.cache.offline_page.clone());
    for path in paths {
      fetcher.respond(
        "GET",
        &format!("https://app.haven.example{}", path),
        Response::new(200).with_body(format!("content:{}", path).into_bytes()),
      );
    }
  }

  #[tokio::test]
  async fn test_install_precaches_crisis_resources() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    script_defaults(&fetcher);

    let manager = manager(store.clone(), fetcher, "v3");
    manager.install().await.unwrap();

    let request = Request::get("https://app.haven.example/safety-plan").unwrap();
    let entry = store
      .get("haven-crisis-v3", &request_key(&request))
      .unwrap()
      .unwrap();
    assert_eq!(entry.body, b"content:/safety-plan");

    // Offline page landed in the static tier
    let offline = Request::get("https://app.haven.example/offline.html").unwrap();
    assert!(store
      .get("haven-static-v3", &request_key(&offline))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_install_fails_when_a_crisis_fetch_fails() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    // Nothing scripted: every fetch fails
    let manager = manager(store, fetcher, "v3");
    assert!(manager.install().await.is_err());
  }

  #[tokio::test]
  async fn test_activate_sweeps_stale_versions_only() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    script_defaults(&fetcher);

    // Populate the previous build's partitions, then the current build's
    let old = manager(store.clone(), fetcher.clone(), "v2");
    old.install().await.unwrap();
    let current = manager(store.clone(), fetcher.clone(), "v3");
    script_defaults(&fetcher);
    current.install().await.unwrap();

    let mut deleted = current.activate().unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["haven-crisis-v2", "haven-static-v2"]);

    // Current crisis partition untouched and still populated
    let request = Request::get("https://app.haven.example/safety-plan").unwrap();
    assert!(store
      .get("haven-crisis-v3", &request_key(&request))
      .unwrap()
      .is_some());
    assert!(store
      .get("haven-crisis-v2", &request_key(&request))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_activate_ignores_foreign_partitions() {
    let store = Arc::new(MemoryCacheStore::new());
    let url = Url::parse("https://other.example/x").unwrap();
    let entry = CachedResponse::snapshot(&url, &Response::new(200));
    store.put("other-app-data", "k", &entry).unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let manager = manager(store.clone(), fetcher, "v3");
    assert!(manager.activate().unwrap().is_empty());
    assert!(store.get("other-app-data", "k").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_refresh_crisis_keeps_entries_on_failure() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    script_defaults(&fetcher);

    let manager = manager(store.clone(), fetcher.clone(), "v3");
    manager.install().await.unwrap();

    // Network down: refresh achieves nothing but deletes nothing
    fetcher.set_offline(true);
    assert_eq!(manager.refresh_crisis().await, 0);

    let request = Request::get("https://app.haven.example/safety-plan").unwrap();
    assert!(store
      .get("haven-crisis-v3", &request_key(&request))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_warm_urls_counts_successes() {
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(
      "GET",
      "https://app.haven.example/articles/coping",
      Response::new(200).with_body(b"article".to_vec()),
    );

    let manager = manager(store.clone(), fetcher, "v3");
    let cached = manager
      .warm_urls(&[
        "https://app.haven.example/articles/coping".to_string(),
        "not a url".to_string(),
        "https://app.haven.example/unreachable".to_string(),
      ])
      .await;

    assert_eq!(cached, 1);
    let request = Request::get("https://app.haven.example/articles/coping").unwrap();
    assert!(store
      .get("haven-dynamic-v3", &request_key(&request))
      .unwrap()
      .is_some());
  }
}
