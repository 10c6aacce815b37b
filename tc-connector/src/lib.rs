pub mod api;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod connector;
pub mod console;
pub mod error;
pub mod groups;
pub mod logging;
pub mod paths;
pub mod pull;
pub mod push;
pub mod schema;
pub mod signer;
pub mod tags;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let cfg = config::load_or_create_default(&config_path)?;

  logging::init(&cfg.logging, &paths::logs_dir(&base), logging::LogSink::FileAndStderr)?;
  tracing::debug!(connector = ?cfg.connector, "configuration loaded");

  console::run_console_command(&cfg, &base, args)
}
