use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "TC_CONNECTOR_HOME";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var(HOME_ENV) {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  Ok(std::env::current_dir()?.join(".tc-connector"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn checkpoint_path(base: &Path) -> PathBuf {
  base.join("checkpoint.json")
}

pub fn tags_path(base: &Path) -> PathBuf {
  base.join("tags.json")
}

pub fn write_atomic(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
  let dir = dst
    .parent()
    .ok_or_else(|| anyhow::anyhow!("destination has no parent directory"))?;
  fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

  let name = dst.file_name().and_then(|s| s.to_str()).unwrap_or("tmp");
  let tmp = dst.with_file_name(format!(".{name}.tmp"));
  fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
  fs::rename(&tmp, dst).with_context(|| format!("rename {} -> {}", tmp.display(), dst.display()))?;
  Ok(())
}
