use crate::config::ConnectorConfig;
use crate::paths;
use crate::types::ThreatType;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFingerprint {
  #[serde(default)]
  pub base_url: String,
  #[serde(default)]
  pub access_id: String,
  #[serde(default)]
  pub secret_key: String,
  #[serde(default)]
  pub threat_type: String,
}

impl ConfigFingerprint {
  pub fn capture(cfg: &ConnectorConfig, threat_type: ThreatType) -> Self {
    Self {
      base_url: cfg.base_url.clone(),
      access_id: cfg.access_id.clone(),
      secret_key: cfg.secret_key.clone(),
      threat_type: threat_type.as_str().to_string(),
    }
  }

  pub fn matches(&self, other: &ConfigFingerprint) -> bool {
    self.base_url.trim_end_matches('/') == other.base_url.trim_end_matches('/')
      && self.access_id == other.access_id
      && self.secret_key == other.secret_key
      && self.threat_type == other.threat_type
  }
}

impl std::fmt::Debug for ConfigFingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConfigFingerprint")
      .field("base_url", &self.base_url)
      .field("access_id", &"<redacted>")
      .field("secret_key", &"<redacted>")
      .field("threat_type", &self.threat_type)
      .finish()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
  pub cursor: Option<String>,
  pub fingerprint: ConfigFingerprint,
}

impl Checkpoint {
  pub fn resume_cursor(&self, current: &ConfigFingerprint) -> Option<&str> {
    let cursor = self.cursor.as_deref().filter(|c| !c.is_empty())?;
    self.fingerprint.matches(current).then_some(cursor)
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointFile {
  #[serde(default)]
  next_uri: String,
  #[serde(default)]
  configuration_details: Option<ConfigFingerprint>,
}

impl CheckpointFile {
  fn from_checkpoint(cp: &Checkpoint) -> Self {
    Self {
      next_uri: cp.cursor.clone().unwrap_or_default(),
      configuration_details: Some(cp.fingerprint.clone()),
    }
  }

  fn into_checkpoint(self) -> Option<Checkpoint> {
    let fingerprint = self.configuration_details?;
    let cursor = (!self.next_uri.is_empty()).then_some(self.next_uri);
    Some(Checkpoint { cursor, fingerprint })
  }
}

pub fn encode(cp: &Checkpoint) -> anyhow::Result<Vec<u8>> {
  Ok(serde_json::to_vec_pretty(&CheckpointFile::from_checkpoint(cp))?)
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<Option<Checkpoint>> {
  let file: CheckpointFile = serde_json::from_slice(bytes).context("parse checkpoint JSON")?;
  Ok(file.into_checkpoint())
}

pub trait CheckpointStore {
  fn load(&self) -> anyhow::Result<Option<Checkpoint>>;
  fn save(&self, cp: &Checkpoint) -> anyhow::Result<()>;
  fn clear(&self) -> anyhow::Result<()>;
}

pub struct FileCheckpointStore {
  path: PathBuf,
}

impl FileCheckpointStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl CheckpointStore for FileCheckpointStore {
  fn load(&self) -> anyhow::Result<Option<Checkpoint>> {
    if !self.path.exists() {
      return Ok(None);
    }
    let bytes = fs::read(&self.path).with_context(|| format!("read {}", self.path.display()))?;
    match decode(&bytes) {
      Ok(cp) => Ok(cp),
      Err(e) => {
        tracing::warn!(
          path = %self.path.display(),
          error = %e,
          "checkpoint unreadable; starting from lookback window"
        );
        Ok(None)
      }
    }
  }

  fn save(&self, cp: &Checkpoint) -> anyhow::Result<()> {
    paths::write_atomic(&self.path, &encode(cp)?)
  }

  fn clear(&self) -> anyhow::Result<()> {
    match fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
    }
  }
}
