use crate::checkpoint::{CheckpointStore, ConfigFingerprint, FileCheckpointStore};
use crate::config::{validate_days, Config};
use crate::connector::{Action, Connector, ThreatConnectConnector};
use crate::groups::{GroupRef, CREATE_GROUP_VALUE, DEFAULT_GROUP_TYPE};
use crate::paths;
use crate::tags::FileTagStore;
use crate::transport::{ReqwestTransport, ThreadSleeper};
use crate::types::Indicator;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

struct Host {
  transport: ReqwestTransport,
  sleeper: ThreadSleeper,
  checkpoints: FileCheckpointStore,
  tags: FileTagStore,
}

impl Host {
  fn open(cfg: &Config, base: &Path) -> anyhow::Result<Self> {
    Ok(Self {
      transport: ReqwestTransport::new(&cfg.http)?,
      sleeper: ThreadSleeper,
      checkpoints: FileCheckpointStore::new(paths::checkpoint_path(base)),
      tags: FileTagStore::open(paths::tags_path(base)).context("open tag store")?,
    })
  }

  fn connector<'a>(&'a self, cfg: &'a Config) -> ThreatConnectConnector<'a> {
    ThreatConnectConnector::new(
      &cfg.connector,
      &self.transport,
      &self.sleeper,
      &self.checkpoints,
      &self.tags,
    )
  }
}

pub fn run_console_command(cfg: &Config, base: &Path, args: &[String]) -> anyhow::Result<()> {
  if args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(());
  }

  if args.iter().any(|a| a == "--validate") {
    return run_validate(cfg, base);
  }

  if let Some(i) = args.iter().position(|a| a == "--pull") {
    return run_pull(cfg, base, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--push") {
    return run_push(cfg, base, &args[i + 1..]);
  }

  if args.iter().any(|a| a == "--actions") {
    return run_actions(cfg, base);
  }

  if let Some(i) = args.iter().position(|a| a == "--checkpoint") {
    return run_checkpoint(cfg, base, &args[i + 1..]);
  }

  print_help();
  Ok(())
}

fn run_validate(cfg: &Config, base: &Path) -> anyhow::Result<()> {
  let host = Host::open(cfg, base)?;
  let res = host.connector(cfg).validate();
  if !res.success {
    anyhow::bail!("{}", res.message);
  }
  println!("{}", res.message);
  Ok(())
}

fn run_pull(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  if let Some(msg) = validate_days(cfg.connector.days) {
    anyhow::bail!("{msg}");
  }

  let since = match flag_value(tail, "--since") {
    Some(raw) => Some(
      DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid --since timestamp: {raw}"))?
        .with_timezone(&Utc),
    ),
    None => None,
  };

  let host = Host::open(cfg, base)?;
  let indicators = host.connector(cfg).pull(since).context("pull indicators")?;
  let json = serde_json::to_string_pretty(&indicators)?;

  match flag_value(tail, "--out") {
    Some(out) => {
      fs::write(out, json).with_context(|| format!("write {out}"))?;
      eprintln!("Wrote {} indicator(s) to {out}.", indicators.len());
    }
    None => println!("{json}"),
  }
  Ok(())
}

fn run_push(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let input = tail
    .first()
    .filter(|s| !s.starts_with("--"))
    .ok_or_else(|| anyhow::anyhow!("expected: --push <indicators.json> (--group <id> | --new-group <name> [--group-type <type>])"))?;

  let group = match (flag_value(tail, "--group"), flag_value(tail, "--new-group")) {
    (Some(id), None) => GroupRef::Existing(id.to_string()),
    (None, Some(name)) => GroupRef::from_params(
      CREATE_GROUP_VALUE,
      name,
      flag_value(tail, "--group-type").unwrap_or(DEFAULT_GROUP_TYPE),
    ),
    _ => anyhow::bail!("expected exactly one of --group <id> or --new-group <name>"),
  };

  let bytes = fs::read(input).with_context(|| format!("read {input}"))?;
  let indicators: Vec<Indicator> =
    serde_json::from_slice(&bytes).with_context(|| format!("parse indicators from {input}"))?;

  let host = Host::open(cfg, base)?;
  let result = host.connector(cfg).push(&indicators, &Action::add_to_group(&group));
  println!("{}", serde_json::to_string_pretty(&result)?);
  if !result.success {
    anyhow::bail!("{}", result.message);
  }
  Ok(())
}

fn run_actions(cfg: &Config, base: &Path) -> anyhow::Result<()> {
  let host = Host::open(cfg, base)?;
  let connector = host.connector(cfg);

  for descriptor in connector.describe_actions() {
    println!("Action: {} ({})", descriptor.label, descriptor.value);
    let action = Action {
      value: descriptor.value.clone(),
      ..Action::default()
    };
    let fields = connector
      .action_fields(&action)
      .with_context(|| format!("load fields for {}", descriptor.value))?;
    println!("{}", serde_json::to_string_pretty(&fields)?);
  }
  Ok(())
}

fn run_checkpoint(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let store = FileCheckpointStore::new(paths::checkpoint_path(base));

  let sub = tail.first().map(|s| s.as_str()).unwrap_or("");
  match sub {
    "status" => {
      let Some(cp) = store.load()? else {
        println!("Checkpoint: none");
        return Ok(());
      };
      println!("Checkpoint: {}", store.path().display());
      match cp.cursor.as_deref() {
        Some(cursor) => println!("Cursor: {cursor}"),
        None => println!("Cursor: none (next pull starts from the lookback window)"),
      }
      println!("Captured for: {} ({})", cp.fingerprint.base_url, cp.fingerprint.threat_type);
      let current = ConfigFingerprint::capture(&cfg.connector, cfg.connector.threat_type);
      println!(
        "Matches current configuration: {}",
        if cp.fingerprint.matches(&current) { "yes" } else { "no" }
      );
      Ok(())
    }
    "clear" => {
      store.clear()?;
      tracing::info!(path = %store.path().display(), "checkpoint cleared");
      println!("Checkpoint cleared.");
      Ok(())
    }
    _ => {
      eprintln!("Unknown `--checkpoint` subcommand. Expected: status|clear");
      print_help();
      Ok(())
    }
  }
}

fn flag_value<'a>(tail: &'a [String], flag: &str) -> Option<&'a str> {
  let i = tail.iter().position(|a| a == flag)?;
  tail
    .get(i + 1)
    .map(|s| s.as_str())
    .filter(|v| !v.starts_with("--"))
}

const HELP: &str = "tc-connector

Usage:
  tc-connector --validate
  tc-connector --pull [--since <rfc3339>] [--out <file>]
  tc-connector --push <indicators.json> --group <id>
  tc-connector --push <indicators.json> --new-group <name> [--group-type <type>]
  tc-connector --actions
  tc-connector --checkpoint status|clear
  tc-connector --version

Configuration is read from $TC_CONNECTOR_HOME/config.toml (default ./.tc-connector).";

fn print_help() {
  println!("{HELP}");
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn flag_values_are_read_after_their_flag() {
    let tail = args(&["in.json", "--group", "12", "--out"]);
    assert_eq!(flag_value(&tail, "--group"), Some("12"));
    assert_eq!(flag_value(&tail, "--out"), None);
    assert_eq!(flag_value(&tail, "--since"), None);

    let tail = args(&["--new-group", "--group-type", "Malware"]);
    assert_eq!(flag_value(&tail, "--new-group"), None);
  }

  #[test]
  fn checkpoint_clear_removes_file() {
    let base = std::env::temp_dir().join(format!("tc-console-{}", uuid::Uuid::new_v4()));
    let store = FileCheckpointStore::new(paths::checkpoint_path(&base));
    let cfg = Config::default();
    store
      .save(&crate::checkpoint::Checkpoint {
        cursor: Some("/api/v3/indicators?resultStart=1000".to_string()),
        fingerprint: ConfigFingerprint::capture(&cfg.connector, cfg.connector.threat_type),
      })
      .unwrap();

    run_console_command(&cfg, &base, &args(&["tc-connector", "--checkpoint", "clear"])).unwrap();
    assert_eq!(store.load().unwrap(), None);
    let _ = fs::remove_dir_all(&base);
  }

  #[test]
  fn pull_rejects_out_of_range_days() {
    let base = std::env::temp_dir().join(format!("tc-console-{}", uuid::Uuid::new_v4()));
    let mut cfg = Config::default();
    cfg.connector.days = u32::MAX;
    let err = run_console_command(&cfg, &base, &args(&["tc-connector", "--pull"])).unwrap_err();
    assert!(err.to_string().contains("Invalid Initial Range"));
  }

  #[test]
  fn push_requires_a_single_group_choice() {
    let base = std::env::temp_dir().join(format!("tc-console-{}", uuid::Uuid::new_v4()));
    let cfg = Config::default();
    let err = run_console_command(
      &cfg,
      &base,
      &args(&["tc-connector", "--push", "in.json", "--group", "1", "--new-group", "x"]),
    )
    .unwrap_err();
    assert!(err.to_string().contains("exactly one"));
  }
}
