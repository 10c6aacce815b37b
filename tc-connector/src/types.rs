use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROVENANCE_TAG: &str = "Netskope CE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
  Sha256,
  Md5,
  Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Unknown,
  Low,
  Medium,
  High,
  Critical,
}

impl Severity {
  pub fn from_rating(rating: u8) -> Option<Self> {
    match rating {
      0 => Some(Self::Unknown),
      1 | 2 => Some(Self::Low),
      3 => Some(Self::Medium),
      4 => Some(Self::High),
      5 => Some(Self::Critical),
      _ => None,
    }
  }

  // Not the exact inverse of `from_rating`: rating 2 is never produced.
  pub fn to_rating(self) -> u8 {
    match self {
      Self::Unknown => 0,
      Self::Low => 1,
      Self::Medium => 3,
      Self::High => 4,
      Self::Critical => 5,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
  pub value: String,
  #[serde(rename = "type")]
  pub kind: IndicatorKind,
  #[serde(default = "default_true")]
  pub active: bool,
  pub severity: Severity,
  pub reputation: u8,
  #[serde(default)]
  pub comments: String,
  #[serde(default)]
  pub first_seen: Option<DateTime<Utc>>,
  #[serde(default)]
  pub last_seen: Option<DateTime<Utc>>,
  #[serde(default)]
  pub tags: Vec<String>,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreatType {
  #[serde(rename = "File", alias = "file")]
  File,
  #[serde(rename = "URL", alias = "url")]
  Url,
  #[serde(rename = "Both", alias = "both")]
  Both,
}

impl ThreatType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::File => "File",
      Self::Url => "URL",
      Self::Both => "Both",
    }
  }
}

pub fn now_unix_s() -> i64 {
  Utc::now().timestamp()
}
