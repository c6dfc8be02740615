//! Cache tiers and versioned partition naming.

use serde::{Deserialize, Serialize};

/// The four cache partitions.
///
/// Crisis entries survive every eviction policy except an explicit refresh
/// or a version rollover; the other tiers are disposable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
  Crisis,
  Static,
  Dynamic,
  Media,
}

impl CacheTier {
  pub const ALL: [CacheTier; 4] = [Self::Crisis, Self::Static, Self::Dynamic, Self::Media];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Crisis => "crisis",
      Self::Static => "static",
      Self::Dynamic => "dynamic",
      Self::Media => "media",
    }
  }

  /// Partition name for this tier under the given build version.
  pub fn partition(&self, version: &str) -> String {
    format!("haven-{}-{}", self.as_str(), version)
  }

  /// Parse a partition name back into (tier, version). Returns `None` for
  /// partitions the engine does not own.
  pub fn parse_partition(name: &str) -> Option<(CacheTier, &str)> {
    let rest = name.strip_prefix("haven-")?;
    for tier in Self::ALL {
      if let Some(version) = rest
        .strip_prefix(tier.as_str())
        .and_then(|r| r.strip_prefix('-'))
      {
        if !version.is_empty() {
          return Some((tier, version));
        }
      }
    }
    None
  }
}

impl std::fmt::Display for CacheTier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
