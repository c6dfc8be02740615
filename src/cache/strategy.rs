//! Request classification.
//!
//! Every intercepted GET is matched against an ordered rule list,
//! first-match-wins. Non-GET requests are never classified and never cached.

use std::collections::BTreeSet;

use crate::config::CacheConfig;
use crate::http::{path_extension, Request};

use super::tier::CacheTier;

/// The caching policy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from the tier if present, refresh in the background; fetch and
  /// store on miss.
  CacheFirst(CacheTier),
  /// Try the network, store to the dynamic tier on success, fall back to
  /// any cached copy.
  NetworkFirst,
  /// Like NetworkFirst, but storage is gated on the cacheable-API
  /// allow-list.
  NetworkWithCacheFallback,
  /// Serve the cached copy immediately while refreshing it concurrently;
  /// block on the network only when there is no cached copy.
  StaleWhileRevalidate,
}

/// Ordered classification rules, built from config once at engine startup.
#[derive(Debug, Clone)]
pub struct StrategyRules {
  crisis_paths: BTreeSet<String>,
  network_first_prefixes: Vec<String>,
  api_namespace: String,
  cacheable_api_prefixes: Vec<String>,
  static_extensions: BTreeSet<String>,
  media_extensions: BTreeSet<String>,
}

impl StrategyRules {
  pub fn from_config(config: &CacheConfig) -> Self {
    Self {
      crisis_paths: config.crisis_paths.iter().cloned().collect(),
      network_first_prefixes: config.network_first_prefixes.clone(),
      api_namespace: config.api_namespace.clone(),
      cacheable_api_prefixes: config.cacheable_api_prefixes.clone(),
      static_extensions: config.static_extensions.clone(),
      media_extensions: config.media_extensions.clone(),
    }
  }

  /// Classify a request. `None` means passthrough: the request goes to the
  /// network untouched and no tier is ever written.
  pub fn classify(&self, request: &Request) -> Option<Strategy> {
    if !request.method.is_get() {
      return None;
    }

    let path = request.path();

    // 1. Crisis allow-list beats everything, including API rules
    if self.crisis_paths.contains(path) {
      return Some(Strategy::CacheFirst(CacheTier::Crisis));
    }

    // 2. Auth, profile, sync, notifications: always freshest-first
    if self
      .network_first_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
    {
      return Some(Strategy::NetworkFirst);
    }

    // 3. Remaining API traffic; the cacheable allow-list gates storage, not
    // routing, so sensitive API endpoints never reach a cache-writing
    // strategy further down the list
    if path.starts_with(self.api_namespace.as_str()) {
      return Some(Strategy::NetworkWithCacheFallback);
    }

    // 4. Static assets by extension
    if let Some(ext) = path_extension(path) {
      if self.media_extensions.contains(ext) {
        return Some(Strategy::CacheFirst(CacheTier::Media));
      }
      if self.static_extensions.contains(ext) {
        return Some(Strategy::CacheFirst(CacheTier::Static));
      }
    }

    // 5. Everything else
    Some(Strategy::StaleWhileRevalidate)
  }

  /// Whether a path's responses may be stored by the
  /// NetworkWithCacheFallback strategy.
  pub fn is_cacheable_api(&self, path: &str) -> bool {
    self
      .cacheable_api_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
  }
}
