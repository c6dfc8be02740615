//! Strategy execution.
//!
//! [`CacheRouter::handle`] is the interception entrypoint: it classifies the
//! request, runs the matching strategy against the store and the network, and
//! always resolves to a response. Failures never escape this module; an
//! offline user sees a cached resource or an explicit offline affordance,
//! never a raw transport error.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::error::Result;
use crate::event::{EngineEvent, EventSender};
use crate::http::{Fetcher, Request, Response};
use crate::tasks::TaskGroup;

use super::store::{request_key, CacheStore, CachedResponse};
use super::strategy::{Strategy, StrategyRules};
use super::tier::CacheTier;

/// Tier lookup order when any cached copy will do.
const FALLBACK_ORDER: [CacheTier; 4] = [
  CacheTier::Dynamic,
  CacheTier::Crisis,
  CacheTier::Static,
  CacheTier::Media,
];

/// Inline placeholder served to image requests while offline.
const IMAGE_PLACEHOLDER: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="64" height="64" viewBox="0 0 64 64"><rect width="64" height="64" fill="#e5e7eb"/><path d="M20 44l8-10 6 7 5-6 9 9z" fill="#9ca3af"/></svg>"##;

pub struct CacheRouter {
  store: Arc<dyn CacheStore>,
  fetcher: Arc<dyn Fetcher>,
  rules: StrategyRules,
  version: String,
  origin: Url,
  offline_page: String,
  tasks: TaskGroup,
  events: EventSender,
}

impl CacheRouter {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    rules: StrategyRules,
    version: String,
    origin: Url,
    offline_page: String,
    tasks: TaskGroup,
    events: EventSender,
  ) -> Self {
    Self {
      store,
      fetcher,
      rules,
      version,
      origin,
      offline_page,
      tasks,
      events,
    }
  }

  /// Handle an intercepted request. Infallible: every failure path resolves
  /// to a fallback response.
  pub async fn handle(&self, request: &Request) -> Response {
    match self.rules.classify(request) {
      None => self.passthrough(request).await,
      Some(Strategy::CacheFirst(tier)) => self.cache_first(request, tier).await,
      Some(Strategy::NetworkFirst) => self.network_first(request, true).await,
      Some(Strategy::NetworkWithCacheFallback) => {
        let store_allowed = self.rules.is_cacheable_api(request.path());
        self.network_first(request, store_allowed).await
      }
      Some(Strategy::StaleWhileRevalidate) => self.stale_while_revalidate(request).await,
    }
  }

  /// Non-GET requests go to the network untouched and never write a tier.
  async fn passthrough(&self, request: &Request) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => response,
      Err(err) => {
        warn!(url = %request.url, %err, "passthrough request failed");
        self.offline_fallback(request).await
      }
    }
  }

  async fn cache_first(&self, request: &Request, tier: CacheTier) -> Response {
    let partition = tier.partition(&self.version);
    let key = request_key(request);

    match self.store.get(&partition, &key) {
      Ok(Some(entry)) => {
        // Serve immediately, refresh behind the caller's back
        self.spawn_refresh(request.clone(), partition, key);
        entry.replay()
      }
      Ok(None) => self.fetch_and_store(request, &partition, &key).await,
      Err(err) => {
        // Storage down: degrade to network-only
        warn!(%partition, %err, "cache read failed");
        match self.fetcher.fetch(request).await {
          Ok(response) => response,
          Err(_) => self.offline_fallback(request).await,
        }
      }
    }
  }

  async fn network_first(&self, request: &Request, store_allowed: bool) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() && store_allowed {
          let partition = CacheTier::Dynamic.partition(&self.version);
          let key = request_key(request);
          self.store_response(&partition, &key, request, &response);
        }
        response
      }
      Err(err) => {
        debug!(url = %request.url, %err, "network-first fetch failed, trying cache");
        match self.any_cached(request) {
          Some(entry) => entry.replay_tagged(),
          None => self.offline_fallback(request).await,
        }
      }
    }
  }

  async fn stale_while_revalidate(&self, request: &Request) -> Response {
    let partition = CacheTier::Dynamic.partition(&self.version);
    let key = request_key(request);

    match self.store.get(&partition, &key) {
      Ok(Some(entry)) => {
        self.spawn_refresh(request.clone(), partition, key);
        entry.replay()
      }
      Ok(None) => self.fetch_and_store(request, &partition, &key).await,
      Err(err) => {
        warn!(%partition, %err, "cache read failed");
        match self.fetcher.fetch(request).await {
          Ok(response) => response,
          Err(_) => self.offline_fallback(request).await,
        }
      }
    }
  }

  /// Blocking fetch for a cache miss: store on success, fall back on
  /// transport failure.
  async fn fetch_and_store(&self, request: &Request, partition: &str, key: &str) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store_response(partition, key, request, &response);
        }
        response
      }
      Err(err) => {
        debug!(url = %request.url, %err, "fetch failed on cache miss");
        self.offline_fallback(request).await
      }
    }
  }

  fn store_response(&self, partition: &str, key: &str, request: &Request, response: &Response) {
    let entry = CachedResponse::snapshot(&request.url, response);
    if let Err(err) = self.store.put(partition, key, &entry) {
      warn!(%partition, %err, "cache write failed");
    }
  }

  /// Re-fetch in the background and replace the entry on success. The task
  /// group keeps the execution context alive until the refresh settles.
  fn spawn_refresh(&self, request: Request, partition: String, key: String) {
    let fetcher = Arc::clone(&self.fetcher);
    let store = Arc::clone(&self.store);
    self.tasks.spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          let entry = CachedResponse::snapshot(&request.url, &response);
          if let Err(err) = store.put(&partition, &key, &entry) {
            warn!(%partition, %err, "background refresh write failed");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "background refresh skipped");
        }
        Err(err) => {
          debug!(url = %request.url, %err, "background refresh failed, keeping cached entry");
        }
      }
    });
  }

  /// Look for a cached copy of this request in any tier.
  fn any_cached(&self, request: &Request) -> Option<CachedResponse> {
    let key = request_key(request);
    for tier in FALLBACK_ORDER {
      let partition = tier.partition(&self.version);
      if let Ok(Some(entry)) = self.store.get(&partition, &key) {
        return Some(entry);
      }
    }
    None
  }

  /// The per-kind offline affordance: pre-cached offline page for
  /// navigations, inline placeholder for images, structured JSON otherwise.
  async fn offline_fallback(&self, request: &Request) -> Response {
    let _ = self.events.send(EngineEvent::ServedOffline {
      url: request.url.to_string(),
    });

    if request.is_navigation() {
      if let Ok(Some(entry)) = self.offline_page_entry() {
        return entry.replay();
      }
    }

    if request.is_image() {
      return Response::new(200)
        .with_header("content-type", "image/svg+xml")
        .with_body(IMAGE_PLACEHOLDER.as_bytes().to_vec());
    }

    Response::json(
      503,
      &json!({
        "error": "offline",
        "message": "You appear to be offline. Cached resources remain available.",
        "offline": true,
        "crisisLine": "988",
      }),
    )
  }

  fn offline_page_entry(&self) -> Result<Option<CachedResponse>> {
    let url = self.origin.join(&self.offline_page)?;
    let key = request_key(&Request::new(crate::http::Method::Get, url));
    self
      .store
      .get(&CacheTier::Static.partition(&self.version), &key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::EngineConfig;
  use crate::event::EngineEvents;
  use crate::testing::ScriptedFetcher;

  fn router(
    store: Arc<dyn CacheStore>,
    fetcher: Arc<ScriptedFetcher>,
  ) -> (CacheRouter, EngineEvents) {
    let config = EngineConfig::default();
    let (tx, events) = EngineEvents::channel();
    let router = CacheRouter::new(
      store,
      fetcher,
      StrategyRules::from_config(&config.cache),
      config.cache_version.clone(),
      config.origin_url().unwrap(),
      config.cache.offline_page.clone(),
      TaskGroup::new(),
      tx,
    );
    (router, events)
  }

  fn memory_store() -> Arc<super::super::store::MemoryCacheStore> {
    Arc::new(super::super::store::MemoryCacheStore::new())
  }

  #[tokio::test]
  async fn test_crisis_path_served_from_cache_when_network_down() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, _events) = router(store.clone(), fetcher.clone());

    // Warm the crisis tier, then cut the network
    fetcher.respond(
      "GET",
      "https://app.haven.example/safety-plan",
      Response::new(200).with_body(b"<html>plan</html>".to_vec()),
    );
    let request = Request::get("https://app.haven.example/safety-plan").unwrap();
    let warmed = router.handle(&request).await;
    assert_eq!(warmed.status, 200);

    fetcher.set_offline(true);
    let served = router.handle(&request).await;
    assert_eq!(served.status, 200);
    assert_eq!(served.body, b"<html>plan</html>");
  }

  #[tokio::test]
  async fn test_non_get_never_writes_any_tier() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, _events) = router(store.clone(), fetcher.clone());

    fetcher.respond(
      "POST",
      "https://app.haven.example/api/mood",
      Response::new(201),
    );
    let request = Request::new(
      crate::http::Method::Post,
      Url::parse("https://app.haven.example/api/mood").unwrap(),
    );
    let response = router.handle(&request).await;
    assert_eq!(response.status, 201);
    assert!(store.partitions().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_tagged_cache_copy() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, _events) = router(store.clone(), fetcher.clone());

    fetcher.respond(
      "GET",
      "https://app.haven.example/api/profile",
      Response::new(200).with_body(b"{\"name\":\"a\"}".to_vec()),
    );
    let request = Request::get("https://app.haven.example/api/profile").unwrap();
    let fresh = router.handle(&request).await;
    assert_eq!(fresh.status, 200);
    assert!(fresh.header("x-from-cache").is_none());

    fetcher.set_offline(true);
    let stale = router.handle(&request).await;
    assert_eq!(stale.status, 200);
    assert_eq!(stale.header("x-from-cache"), Some("true"));
    assert!(stale.header("x-cache-date").is_some());
  }

  #[tokio::test]
  async fn test_cache_fallback_strategy_skips_storage_off_allow_list() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, _events) = router(store.clone(), fetcher.clone());

    // /api/journal is not on the cacheable-API allow-list
    fetcher.respond(
      "GET",
      "https://app.haven.example/api/journal/entries",
      Response::new(200).with_body(b"[]".to_vec()),
    );
    let request = Request::get("https://app.haven.example/api/journal/entries").unwrap();
    let response = router.handle(&request).await;
    assert_eq!(response.status, 200);
    assert!(store.partitions().unwrap().is_empty());

    // /api/resources is allow-listed and does get stored
    fetcher.respond(
      "GET",
      "https://app.haven.example/api/resources/grounding",
      Response::new(200).with_body(b"{}".to_vec()),
    );
    let cacheable = Request::get("https://app.haven.example/api/resources/grounding").unwrap();
    router.handle(&cacheable).await;
    assert_eq!(store.partitions().unwrap(), vec!["haven-dynamic-v3"]);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_blocks_only_on_miss() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, _events) = router(store.clone(), fetcher.clone());

    fetcher.respond(
      "GET",
      "https://app.haven.example/journal",
      Response::new(200).with_body(b"v1".to_vec()),
    );
    let request = Request::get("https://app.haven.example/journal").unwrap();

    // Miss: blocks on the network
    let first = router.handle(&request).await;
    assert_eq!(first.body, b"v1");

    // Hit: serves the cached copy even though the network now fails
    fetcher.set_offline(true);
    let second = router.handle(&request).await;
    assert_eq!(second.body, b"v1");
  }

  #[tokio::test]
  async fn test_offline_api_request_gets_structured_payload() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, mut events) = router(store, fetcher.clone());

    fetcher.set_offline(true);
    let request = Request::get("https://app.haven.example/api/resources/grounding").unwrap();
    let response = router.handle(&request).await;

    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("application/json"));
    let payload: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(payload["offline"], true);
    assert_eq!(payload["crisisLine"], "988");

    assert!(matches!(
      events.try_next(),
      Some(EngineEvent::ServedOffline { .. })
    ));
  }

  #[tokio::test]
  async fn test_offline_image_gets_placeholder() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, _events) = router(store, fetcher.clone());

    fetcher.set_offline(true);
    let request = Request::get("https://app.haven.example/icons/mood.png").unwrap();
    let response = router.handle(&request).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("image/svg+xml"));
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_precached_page() {
    let store = memory_store();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let (router, _events) = router(store.clone(), fetcher.clone());

    // Warm the offline page the way install does
    let offline_url = Url::parse("https://app.haven.example/offline.html").unwrap();
    let offline_request = Request::new(crate::http::Method::Get, offline_url.clone());
    let entry = CachedResponse::snapshot(
      &offline_url,
      &Response::new(200).with_body(b"<html>offline</html>".to_vec()),
    );
    store
      .put("haven-static-v3", &request_key(&offline_request), &entry)
      .unwrap();

    fetcher.set_offline(true);
    let request = Request::get("https://app.haven.example/journal")
      .unwrap()
      .with_header("accept", "text/html");
    let response = router.handle(&request).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"<html>offline</html>");
  }
}
