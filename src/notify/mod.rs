//! Notification payload interpretation and action routing.
//!
//! Inbound push payloads are merged over a static per-kind style table and
//! handed to an injected presenter. User actions dispatch over a closed enum
//! back into the outbox, into navigation, or into a snoozed re-notification.
//! Handlers never block notification dismissal: everything asynchronous runs
//! through the engine task group so the host keeps the execution context
//! alive until it settles.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::event::{EngineEvent, EventSender};
use crate::outbox::{EntityType, OutboxRecord, OutboxStore};
use crate::tasks::TaskGroup;

/// The notification types the platform sends. Unknown inbound type strings
/// map to `Generic`, so a new server-side type degrades instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
  MoodCheckIn,
  MedicationReminder,
  CrisisFollowUp,
  SafetyPlanReview,
  Generic,
}

impl NotificationKind {
  pub fn from_type(s: &str) -> Self {
    match s {
      "mood-check-in" => Self::MoodCheckIn,
      "medication-reminder" => Self::MedicationReminder,
      "crisis-follow-up" => Self::CrisisFollowUp,
      "safety-plan-review" => Self::SafetyPlanReview,
      _ => Self::Generic,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::MoodCheckIn => "mood-check-in",
      Self::MedicationReminder => "medication-reminder",
      Self::CrisisFollowUp => "crisis-follow-up",
      Self::SafetyPlanReview => "safety-plan-review",
      Self::Generic => "generic",
    }
  }
}

/// Actions a notification can offer. Closed set: an unknown inbound action
/// id decodes to `Open`, which routes to the application root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
  LogMood,
  MedicationTaken,
  ImSafe,
  ViewResources,
  ViewSafetyPlan,
  Snooze,
  Open,
}

impl NotificationAction {
  pub fn from_id(id: &str) -> Self {
    match id {
      "log-mood" => Self::LogMood,
      "medication-taken" => Self::MedicationTaken,
      "im-safe" => Self::ImSafe,
      "view-resources" => Self::ViewResources,
      "view-safety-plan" => Self::ViewSafetyPlan,
      "snooze" => Self::Snooze,
      _ => Self::Open,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::LogMood => "log-mood",
      Self::MedicationTaken => "medication-taken",
      Self::ImSafe => "im-safe",
      Self::ViewResources => "view-resources",
      Self::ViewSafetyPlan => "view-safety-plan",
      Self::Snooze => "snooze",
      Self::Open => "open",
    }
  }
}

/// Per-kind presentation defaults.
struct Style {
  title: &'static str,
  body: &'static str,
  icon: &'static str,
  vibration: &'static [u64],
  require_interaction: bool,
  actions: &'static [(NotificationAction, &'static str)],
}

/// The static type→config table. Payload fields override these defaults at
/// dispatch time.
fn style(kind: NotificationKind) -> Style {
  match kind {
    NotificationKind::MoodCheckIn => Style {
      title: "How are you feeling?",
      body: "Take a moment to check in with yourself.",
      icon: "/icons/mood.png",
      vibration: &[100, 50, 100],
      require_interaction: false,
      actions: &[
        (NotificationAction::LogMood, "Log mood"),
        (NotificationAction::Snooze, "Remind me later"),
      ],
    },
    NotificationKind::MedicationReminder => Style {
      title: "Medication reminder",
      body: "It's time for your medication.",
      icon: "/icons/medication.png",
      vibration: &[100, 50, 100],
      require_interaction: true,
      actions: &[
        (NotificationAction::MedicationTaken, "Taken"),
        (NotificationAction::Snooze, "Snooze"),
      ],
    },
    NotificationKind::CrisisFollowUp => Style {
      title: "Checking in",
      body: "We wanted to check how you're doing.",
      icon: "/icons/support.png",
      vibration: &[200, 100, 200, 100, 200],
      require_interaction: true,
      actions: &[
        (NotificationAction::ImSafe, "I'm safe"),
        (NotificationAction::ViewResources, "View resources"),
      ],
    },
    NotificationKind::SafetyPlanReview => Style {
      title: "Safety plan review",
      body: "Your safety plan may need a refresh.",
      icon: "/icons/safety-plan.png",
      vibration: &[100, 50, 100],
      require_interaction: false,
      actions: &[
        (NotificationAction::ViewSafetyPlan, "Review plan"),
        (NotificationAction::Snooze, "Later"),
      ],
    },
    NotificationKind::Generic => Style {
      title: "Haven",
      body: "You have a new notification.",
      icon: "/icons/icon-192.png",
      vibration: &[100],
      require_interaction: false,
      actions: &[(NotificationAction::Open, "Open")],
    },
  }
}

/// Inbound push payload. Every field is optional; whatever is missing comes
/// from the style table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPayload {
  #[serde(rename = "type")]
  pub kind: Option<String>,
  pub title: Option<String>,
  pub body: Option<String>,
  pub tag: Option<String>,
  pub require_interaction: Option<bool>,
  pub actions: Option<Vec<PayloadAction>>,
  pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadAction {
  pub action: String,
  pub title: String,
}

impl NotificationPayload {
  /// Parse raw payload bytes. Malformed input degrades to the generic
  /// defaults; it never errors.
  pub fn parse(raw: &[u8]) -> Self {
    match serde_json::from_slice(raw) {
      Ok(payload) => payload,
      Err(err) => {
        warn!(%err, "malformed notification payload, using generic defaults");
        Self::default()
      }
    }
  }
}

/// A fully merged notification, ready for presentation.
#[derive(Debug, Clone)]
pub struct Notification {
  pub kind: NotificationKind,
  pub title: String,
  pub body: String,
  pub tag: String,
  pub icon: String,
  pub vibration: Vec<u64>,
  pub require_interaction: bool,
  pub actions: Vec<(NotificationAction, String)>,
  pub url: String,
}

/// Presentation capability, injected by the host.
pub trait NotificationPresenter: Send + Sync {
  fn show(&self, notification: &Notification) -> crate::error::Result<()>;
}

pub struct NotificationRouter {
  presenter: Arc<dyn NotificationPresenter>,
  outbox: Arc<dyn OutboxStore>,
  tasks: TaskGroup,
  events: EventSender,
  snooze_delay: Duration,
}

impl NotificationRouter {
  pub fn new(
    presenter: Arc<dyn NotificationPresenter>,
    outbox: Arc<dyn OutboxStore>,
    tasks: TaskGroup,
    events: EventSender,
  ) -> Self {
    Self {
      presenter,
      outbox,
      tasks,
      events,
      snooze_delay: Duration::from_secs(15 * 60),
    }
  }

  /// Override how long a snoozed notification waits before re-presenting.
  pub fn with_snooze_delay(mut self, snooze_delay: Duration) -> Self {
    self.snooze_delay = snooze_delay;
    self
  }

  /// Merge a payload over the style table and present it. Returns the
  /// merged notification so the host can hand it back on a user action.
  pub fn present(&self, payload: NotificationPayload) -> Notification {
    let kind = NotificationKind::from_type(payload.kind.as_deref().unwrap_or_default());
    let style = style(kind);

    let actions = match payload.actions {
      Some(actions) if !actions.is_empty() => actions
        .into_iter()
        .map(|a| (NotificationAction::from_id(&a.action), a.title))
        .collect(),
      _ => style
        .actions
        .iter()
        .map(|(action, title)| (*action, title.to_string()))
        .collect(),
    };

    let notification = Notification {
      kind,
      title: payload.title.unwrap_or_else(|| style.title.to_string()),
      body: payload.body.unwrap_or_else(|| style.body.to_string()),
      tag: payload.tag.unwrap_or_else(|| kind.as_str().to_string()),
      icon: style.icon.to_string(),
      vibration: style.vibration.to_vec(),
      require_interaction: payload
        .require_interaction
        .unwrap_or(style.require_interaction),
      actions,
      url: payload.url.unwrap_or_else(|| "/".to_string()),
    };

    if let Err(err) = self.presenter.show(&notification) {
      warn!(%err, "presenter rejected notification");
    }
    notification
  }

  /// Parse and present raw payload bytes.
  pub fn present_raw(&self, raw: &[u8]) -> Notification {
    self.present(NotificationPayload::parse(raw))
  }

  /// Route a user action. Returns immediately; anything asynchronous is
  /// fire-and-forget relative to the notification UI, registered with the
  /// task group so the execution context stays alive until it settles.
  pub fn handle_action(&self, action: NotificationAction, notification: &Notification) {
    debug!(action = action.as_str(), tag = %notification.tag, "notification action");
    match action {
      NotificationAction::LogMood => self.navigate("/mood/new"),
      NotificationAction::ViewResources => self.navigate("/crisis-resources"),
      NotificationAction::ViewSafetyPlan => self.navigate("/safety-plan"),
      NotificationAction::Open => {
        let url = notification.url.clone();
        let _ = self.events.send(EngineEvent::Navigate { url });
      }
      NotificationAction::MedicationTaken => self.append_in_background(
        EntityType::Journal,
        json!({
          "event": "medication-taken",
          "tag": notification.tag,
        }),
      ),
      NotificationAction::ImSafe => self.append_in_background(
        EntityType::CrisisInteraction,
        json!({
          "event": "follow-up-safe",
          "tag": notification.tag,
        }),
      ),
      NotificationAction::Snooze => {
        let presenter = Arc::clone(&self.presenter);
        let delay = self.snooze_delay;
        let mut snoozed = notification.clone();
        // A snoozed copy must not demand interaction again on re-display
        snoozed.require_interaction = false;
        self.tasks.spawn(async move {
          tokio::time::sleep(delay).await;
          if let Err(err) = presenter.show(&snoozed) {
            warn!(%err, "snoozed re-notification failed");
          }
        });
      }
    }
  }

  fn navigate(&self, url: &str) {
    let _ = self.events.send(EngineEvent::Navigate {
      url: url.to_string(),
    });
  }

  fn append_in_background(&self, entity_type: EntityType, payload: serde_json::Value) {
    let outbox = Arc::clone(&self.outbox);
    self.tasks.spawn(async move {
      let record = OutboxRecord::new(entity_type, payload);
      if let Err(err) = outbox.append(&record) {
        warn!(%entity_type, %err, "outbox append from notification action failed");
      }
    });
  }
}
