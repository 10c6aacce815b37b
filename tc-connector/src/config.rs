use crate::paths;
use crate::types::ThreatType;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub connector: ConnectorConfig,
  pub http: HttpConfig,
  pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
  #[serde(default = "default_name")]
  pub name: String,

  #[serde(default = "default_base_url")]
  pub base_url: String,

  #[serde(default)]
  pub access_id: String,

  #[serde(default)]
  pub secret_key: String,

  #[serde(default = "default_days")]
  pub days: u32,

  #[serde(default = "default_true")]
  pub enable_tagging: bool,

  #[serde(default = "default_true")]
  pub is_pull_required: bool,

  #[serde(default = "default_threat_type")]
  pub threat_type: ThreatType,
}

impl Default for ConnectorConfig {
  fn default() -> Self {
    Self {
      name: default_name(),
      base_url: default_base_url(),
      access_id: String::new(),
      secret_key: String::new(),
      days: default_days(),
      enable_tagging: true,
      is_pull_required: true,
      threat_type: default_threat_type(),
    }
  }
}

impl std::fmt::Debug for ConnectorConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectorConfig")
      .field("name", &self.name)
      .field("base_url", &self.base_url)
      .field("access_id", &"<redacted>")
      .field("secret_key", &"<redacted>")
      .field("days", &self.days)
      .field("enable_tagging", &self.enable_tagging)
      .field("is_pull_required", &self.is_pull_required)
      .field("threat_type", &self.threat_type)
      .finish()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default)]
  pub proxy: Option<String>,

  #[serde(default = "default_true")]
  pub verify_tls: bool,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_seconds: default_timeout_seconds(),
      proxy: None,
      verify_tls: true,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_name() -> String {
  "threatconnect".to_string()
}

fn default_base_url() -> String {
  "https://app.threatconnect.com".to_string()
}

fn default_days() -> u32 {
  7
}

fn default_threat_type() -> ThreatType {
  ThreatType::Both
}

fn default_timeout_seconds() -> u64 {
  60
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub threatconnect: Option<ConnectorConfig>,

  #[serde(default)]
  pub http: Option<HttpConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(c) = self.threatconnect {
      cfg.connector = c;
    }
    if let Some(h) = self.http {
      cfg.http = h;
    }
    if let Some(l) = self.logging {
      cfg.logging = l;
    }

    if cfg.http.timeout_seconds == 0 {
      tracing::warn!("http.timeout_seconds must be > 0; using default");
      cfg.http.timeout_seconds = default_timeout_seconds();
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.threatconnect.is_none() || self.http.is_none() || self.logging.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;

  if !path.exists() {
    let cfg = Config::default();
    paths::write_atomic(path, toml::to_string_pretty(&to_config_file(&cfg))?.as_bytes())?;
    eprintln!(
      "tc-connector: wrote default config to {}; fill in access_id and secret_key.",
      path.display()
    );
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", unix_now()));
        let _ = fs::copy(path, &backup);
        let _ = paths::write_atomic(path, toml::to_string_pretty(&to_config_file(&cfg))?.as_bytes());
        eprintln!(
          "tc-connector: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      let backup = parent.join(format!("config.toml.bad-{}", unix_now()));
      let _ = fs::rename(path, &backup);
      paths::write_atomic(path, toml::to_string_pretty(&to_config_file(&cfg))?.as_bytes())?;
      eprintln!(
        "tc-connector: invalid config at {} (backed up to {}): {e}",
        path.display(),
        backup.display()
      );
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    threatconnect: Some(cfg.connector.clone()),
    http: Some(cfg.http.clone()),
    logging: Some(cfg.logging.clone()),
  }
}

fn unix_now() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

pub fn validate_connector_config(cfg: &ConnectorConfig) -> Option<String> {
  if !is_valid_base_url(&cfg.base_url) {
    return Some("Invalid Base URL provided.".to_string());
  }
  if cfg.access_id.trim().is_empty() {
    return Some("Invalid Access ID provided.".to_string());
  }
  if cfg.secret_key.trim().is_empty() {
    return Some("Invalid Secret key provided.".to_string());
  }
  None
}

pub const MAX_DAYS: u32 = 365;

pub fn validate_days(days: u32) -> Option<String> {
  if days == 0 || days > MAX_DAYS {
    return Some("Invalid Initial Range provided.".to_string());
  }
  None
}

fn is_valid_base_url(raw: &str) -> bool {
  let raw = raw.trim();
  if raw.is_empty() {
    return false;
  }
  let Ok(url) = reqwest::Url::parse(raw) else {
    return false;
  };
  let Some(host) = url.host_str() else {
    return false;
  };
  if url.scheme().is_empty() || host.is_empty() {
    return false;
  }
  if url.path() != "/" && !url.path().is_empty() {
    return false;
  }
  host.split('.').any(|label| label == "threatconnect")
}
