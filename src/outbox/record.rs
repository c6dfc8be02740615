//! Locally authored records awaiting server acknowledgment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The record types users author while offline. Each type syncs against its
/// own remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
  Mood,
  Journal,
  CrisisInteraction,
  SafetyPlan,
}

impl EntityType {
  pub const ALL: [EntityType; 4] = [
    Self::Mood,
    Self::Journal,
    Self::CrisisInteraction,
    Self::SafetyPlan,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Mood => "mood",
      Self::Journal => "journal",
      Self::CrisisInteraction => "crisis-interaction",
      Self::SafetyPlan => "safety-plan",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "mood" => Some(Self::Mood),
      "journal" => Some(Self::Journal),
      "crisis-interaction" => Some(Self::CrisisInteraction),
      "safety-plan" => Some(Self::SafetyPlan),
      _ => None,
    }
  }

  /// Path of this type's sync endpoint on the API origin.
  pub fn sync_path(&self) -> String {
    format!("/api/{}-sync", self.as_str())
  }
}

impl std::fmt::Display for EntityType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One pending (or acknowledged) local write.
///
/// The id is client-generated once at creation and never regenerated, so the
/// remote endpoint can deduplicate at-least-once deliveries. Only the sync
/// coordinator flips `synced`; records are never auto-deleted and double as a
/// local audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
  pub id: Uuid,
  pub entity_type: EntityType,
  pub payload: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub synced: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub synced_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
  pub fn new(entity_type: EntityType, payload: serde_json::Value) -> Self {
    Self {
      id: Uuid::new_v4(),
      entity_type,
      payload,
      created_at: Utc::now(),
      synced: false,
      synced_at: None,
    }
  }
}
