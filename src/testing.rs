//! Shared test doubles for the injected collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::http::{Fetcher, Request, Response};
use crate::notify::{Notification, NotificationPresenter};

/// Fetcher that replays scripted responses keyed by `METHOD url`, in order.
/// Unscripted requests, and every request while `set_offline(true)`, fail
/// with a network error.
pub(crate) struct ScriptedFetcher {
  responses: Mutex<HashMap<String, VecDeque<Response>>>,
  calls: Mutex<Vec<(String, Vec<u8>)>>,
  offline: AtomicBool,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      offline: AtomicBool::new(false),
    }
  }

  fn key(method: &str, url: &str) -> String {
    format!("{} {}", method, url)
  }

  /// Queue one response for the next request to this method + url.
  pub fn respond(&self, method: &str, url: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .entry(Self::key(method, url))
      .or_default()
      .push_back(response);
  }

  /// Simulate losing (or regaining) connectivity.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Every call seen so far, as `METHOD url` keys.
  pub fn calls(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|(key, _)| key.clone())
      .collect()
  }

  /// How many requests hit this url, any method.
  pub fn call_count(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(key, _)| key.ends_with(url))
      .count()
  }

  /// Request bodies sent to this url, in order.
  pub fn bodies(&self, url: &str) -> Vec<Vec<u8>> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(key, _)| key.ends_with(url))
      .map(|(_, body)| body.clone())
      .collect()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let key = Self::key(request.method.as_str(), request.url.as_ref());
    self
      .calls
      .lock()
      .unwrap()
      .push((key.clone(), request.body.clone().unwrap_or_default()));

    if self.offline.load(Ordering::SeqCst) {
      return Err(EngineError::Network("connection refused".to_string()));
    }

    self
      .responses
      .lock()
      .unwrap()
      .get_mut(&key)
      .and_then(VecDeque::pop_front)
      .ok_or_else(|| EngineError::Network(format!("no scripted response for {}", key)))
  }
}

/// Presenter that records everything it is asked to show.
pub(crate) struct RecordingPresenter {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingPresenter {
  pub fn new() -> Self {
    Self {
      shown: Mutex::new(Vec::new()),
    }
  }

  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl NotificationPresenter for RecordingPresenter {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}
