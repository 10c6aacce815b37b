use crate::api::{decode_envelope, ApiClient, FetchOutcome, PAGE_SIZE};
use crate::checkpoint::{Checkpoint, CheckpointStore, ConfigFingerprint};
use crate::classifier::{self, ClassifyStats};
use crate::config::{ConnectorConfig, MAX_DAYS};
use crate::error::ApiError;
use crate::schema::Envelope;
use crate::tags::TagStore;
use crate::types::{Indicator, ThreatType};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

pub const PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullTerminal {
  Done,
  Suspended,
  Truncated,
}

#[derive(Debug)]
pub struct PullOutcome {
  pub indicators: Vec<Indicator>,
  pub terminal: PullTerminal,
  pub pages: usize,
  pub resumed: bool,
  pub stats: ClassifyStats,
}

pub struct PullEngine<'a> {
  api: &'a ApiClient<'a>,
  checkpoints: &'a dyn CheckpointStore,
  tags: &'a dyn TagStore,
  cfg: &'a ConnectorConfig,
}

pub fn initial_query(api_path: &str, threat_type: ThreatType, since: DateTime<Utc>) -> String {
  let mut tql = match threat_type {
    ThreatType::Both => r#"typeName IN ("File","URL")"#.to_string(),
    other => format!(r#"typeName == "{}""#, other.as_str()),
  };
  tql.push_str(&format!(
    " AND lastModified >= '{}'",
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
  ));

  format!(
    "{api_path}?sorting=lastModified%20asc&fields=tags&tql={}&resultStart=0&resultLimit={PAGE_SIZE}",
    urlencoding::encode(&tql)
  )
}

// Clamped to MAX_DAYS; chrono panics on durations past its range.
pub fn lookback_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
  now - Duration::days(i64::from(days.min(MAX_DAYS)))
}

impl<'a> PullEngine<'a> {
  pub fn new(
    api: &'a ApiClient<'a>,
    checkpoints: &'a dyn CheckpointStore,
    tags: &'a dyn TagStore,
    cfg: &'a ConnectorConfig,
  ) -> Self {
    Self {
      api,
      checkpoints,
      tags,
      cfg,
    }
  }

  pub fn pull(
    &self,
    api_path: &str,
    threat_type: ThreatType,
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> Result<PullOutcome, ApiError> {
    let fingerprint = ConfigFingerprint::capture(self.cfg, threat_type);
    let stored = match self.checkpoints.load() {
      Ok(cp) => cp,
      Err(e) => {
        tracing::warn!(error = ?e, "failed to load checkpoint; starting from lookback window");
        None
      }
    };

    let resume = stored.as_ref().and_then(|cp| cp.resume_cursor(&fingerprint));
    tracing::debug!(
      stored_cursor = stored.as_ref().and_then(|cp| cp.cursor.as_deref()).unwrap_or(""),
      resume = resume.is_some(),
      "compared stored checkpoint with current configuration"
    );

    let resumed = resume.is_some();
    let mut url = match resume {
      Some(cursor) => cursor.to_string(),
      None => {
        let since = last_run_at.unwrap_or_else(|| lookback_start(now, self.cfg.days));
        initial_query(api_path, threat_type, since)
      }
    };

    let mut indicators = Vec::new();
    let mut stats = ClassifyStats::default();
    let mut pages = 0usize;

    loop {
      tracing::debug!(url = %url, page = pages + 1, "fetching indicators");

      let resp = match self.api.get_with_retry(&url) {
        Ok(FetchOutcome::Ok(resp)) => resp,
        Ok(FetchOutcome::RetriesExhausted(resp)) => {
          tracing::error!(
            status = resp.status,
            "server kept failing; pull will resume from this page next cycle"
          );
          return Ok(self.finish(Some(url), fingerprint, PullTerminal::Suspended, indicators, pages, resumed, stats));
        }
        Ok(FetchOutcome::Failed(resp)) => {
          let err = ApiError::from_status(resp.status, resp.body_text());
          tracing::error!(error = %err, "indicator listing rejected");
          return Err(err);
        }
        Err(e) => {
          tracing::error!(
            error = %e,
            "error while executing the pull cycle; pull will resume from this page next cycle"
          );
          return Ok(self.finish(Some(url), fingerprint, PullTerminal::Suspended, indicators, pages, resumed, stats));
        }
      };

      let page: Envelope<Vec<serde_json::Value>> = decode_envelope(&resp)?;
      if !page.is_success() {
        return Err(ApiError::Schema(format!(
          "unable to fetch indicators: {}",
          page.message()
        )));
      }

      let records = page.data.unwrap_or_default();
      if records.is_empty() {
        return Ok(self.finish(None, fingerprint, PullTerminal::Done, indicators, pages, resumed, stats));
      }

      stats.merge(classifier::classify_page(
        &records,
        self.tags,
        self.cfg.enable_tagging,
        &mut indicators,
      ));
      pages += 1;

      match page.next.as_deref().filter(|n| !n.is_empty()) {
        Some(next) => url = self.api.relative_path(next),
        None => {
          return Ok(self.finish(None, fingerprint, PullTerminal::Done, indicators, pages, resumed, stats));
        }
      }

      if pages >= PAGE_LIMIT {
        tracing::info!(
          page_limit = PAGE_LIMIT,
          indicators = indicators.len(),
          "page limit reached; remaining pages are left for the next cycle"
        );
        return Ok(self.finish(Some(url), fingerprint, PullTerminal::Truncated, indicators, pages, resumed, stats));
      }
    }
  }

  // The only checkpoint write of an invocation.
  #[allow(clippy::too_many_arguments)]
  fn finish(
    &self,
    cursor: Option<String>,
    fingerprint: ConfigFingerprint,
    terminal: PullTerminal,
    indicators: Vec<Indicator>,
    pages: usize,
    resumed: bool,
    stats: ClassifyStats,
  ) -> PullOutcome {
    let cp = Checkpoint { cursor, fingerprint };
    if let Err(e) = self.checkpoints.save(&cp) {
      tracing::error!(error = ?e, "failed to persist checkpoint");
    }

    if !stats.skipped_tags.is_empty() {
      let names: Vec<&str> = stats.skipped_tags.iter().map(String::as_str).collect();
      tracing::warn!(
        "skipping following tag(s) because they could not be created: {}",
        names.join(", ")
      );
    }
    tracing::debug!(
      terminal = ?terminal,
      pages,
      file_records = stats.file_records,
      md5 = stats.md5,
      sha256 = stats.sha256,
      url = stats.url,
      own_records = stats.own_records,
      skipped_md5 = stats.skipped_md5,
      skipped_sha256 = stats.skipped_sha256,
      skipped_url = stats.skipped_url,
      malformed_records = stats.malformed_records,
      "pull stats"
    );

    PullOutcome {
      indicators,
      terminal,
      pages,
      resumed,
      stats,
    }
  }
}
