use crate::error::RecordError;
use crate::schema::RawRecord;
use crate::tags::{self, TagStore};
use crate::types::{Indicator, IndicatorKind, Severity, PROVENANCE_TAG};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

const DEFAULT_REPUTATION: u8 = 5;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifyStats {
  pub file_records: usize,
  pub md5: usize,
  pub sha256: usize,
  pub url: usize,
  pub own_records: usize,
  pub skipped_md5: usize,
  pub skipped_sha256: usize,
  pub skipped_url: usize,
  pub malformed_records: usize,
  pub skipped_tags: BTreeSet<String>,
}

impl ClassifyStats {
  pub fn merge(&mut self, other: ClassifyStats) {
    self.file_records += other.file_records;
    self.md5 += other.md5;
    self.sha256 += other.sha256;
    self.url += other.url;
    self.own_records += other.own_records;
    self.skipped_md5 += other.skipped_md5;
    self.skipped_sha256 += other.skipped_sha256;
    self.skipped_url += other.skipped_url;
    self.malformed_records += other.malformed_records;
    self.skipped_tags.extend(other.skipped_tags);
  }
}

pub fn classify_page(
  records: &[serde_json::Value],
  tag_store: &dyn TagStore,
  tagging: bool,
  out: &mut Vec<Indicator>,
) -> ClassifyStats {
  let mut stats = ClassifyStats::default();

  for value in records {
    let record: RawRecord = match serde_json::from_value(value.clone()) {
      Ok(r) => r,
      Err(e) => {
        tracing::debug!(error = %e, "skipping record with unexpected shape");
        stats.malformed_records += 1;
        continue;
      }
    };
    classify_record(&record, tag_store, tagging, out, &mut stats);
  }

  stats
}

fn classify_record(
  record: &RawRecord,
  tag_store: &dyn TagStore,
  tagging: bool,
  out: &mut Vec<Indicator>,
  stats: &mut ClassifyStats,
) {
  if is_own_record(record) {
    stats.own_records += 1;
    return;
  }

  let mut tags = Vec::new();
  if tagging && record.tags.is_some() {
    let reconciled = tags::reconcile(tag_store, record.tag_names(), true);
    stats.skipped_tags.extend(reconciled.skipped);
    tags = reconciled.accepted;
  }

  let common = common_fields(record);

  if record.is_file() {
    stats.file_records += 1;
    if let Some(md5) = &record.md5 {
      match build(&common, md5, IndicatorKind::Md5, &tags) {
        Ok(i) => {
          out.push(i);
          stats.md5 += 1;
        }
        Err(e) => {
          tracing::debug!(error = %e, "skipping md5 indicator");
          stats.skipped_md5 += 1;
        }
      }
    }
    if let Some(sha256) = &record.sha256 {
      match build(&common, sha256, IndicatorKind::Sha256, &tags) {
        Ok(i) => {
          out.push(i);
          stats.sha256 += 1;
        }
        Err(e) => {
          tracing::debug!(error = %e, "skipping sha256 indicator");
          stats.skipped_sha256 += 1;
        }
      }
    }
    return;
  }

  let Some(text) = record.text.as_deref() else {
    stats.skipped_url += 1;
    return;
  };
  for segment in text.split(',') {
    match build(&common, segment, IndicatorKind::Url, &tags) {
      Ok(i) => {
        out.push(i);
        stats.url += 1;
      }
      Err(e) => {
        tracing::debug!(error = %e, "skipping url indicator");
        stats.skipped_url += 1;
      }
    }
  }
}

fn is_own_record(record: &RawRecord) -> bool {
  record.tag_names().any(|n| n == PROVENANCE_TAG)
}

struct Common {
  active: bool,
  severity: Result<Severity, RecordError>,
  reputation: u8,
  comments: String,
  first_seen: Result<Option<DateTime<Utc>>, RecordError>,
  last_seen: Result<Option<DateTime<Utc>>, RecordError>,
}

fn common_fields(record: &RawRecord) -> Common {
  Common {
    active: record.active.unwrap_or(true),
    severity: severity_from(record.rating),
    reputation: reputation_from(record.confidence),
    comments: record.description.clone().unwrap_or_default(),
    first_seen: parse_time("dateAdded", record.date_added.as_deref()),
    last_seen: parse_time("lastModified", record.last_modified.as_deref()),
  }
}

fn build(common: &Common, raw_value: &str, kind: IndicatorKind, tags: &[String]) -> Result<Indicator, RecordError> {
  Ok(Indicator {
    value: normalize_value(raw_value, kind)?,
    kind,
    active: common.active,
    severity: common.severity.clone()?,
    reputation: common.reputation,
    comments: common.comments.clone(),
    first_seen: common.first_seen.clone()?,
    last_seen: common.last_seen.clone()?,
    tags: tags.to_vec(),
  })
}

// Absent rating is unknown; anything not an integer 0..=5 is malformed.
pub fn severity_from(rating: Option<f64>) -> Result<Severity, RecordError> {
  let Some(r) = rating else {
    return Ok(Severity::Unknown);
  };
  if r.fract() != 0.0 || !(0.0..=5.0).contains(&r) {
    return Err(RecordError::RatingOutOfRange(r.to_string()));
  }
  Severity::from_rating(r as u8).ok_or_else(|| RecordError::RatingOutOfRange(r.to_string()))
}

pub fn reputation_from(confidence: Option<Option<i64>>) -> u8 {
  match confidence {
    None => DEFAULT_REPUTATION,
    Some(Some(c)) if c > 10 => (c / 10).min(10) as u8,
    Some(_) => 1,
  }
}

fn normalize_value(raw: &str, kind: IndicatorKind) -> Result<String, RecordError> {
  match kind {
    IndicatorKind::Md5 => hex_digest(raw, 32, "md5"),
    IndicatorKind::Sha256 => hex_digest(raw, 64, "sha256"),
    IndicatorKind::Url => {
      let url = raw.trim();
      if url.is_empty() {
        return Err(RecordError::invalid("text", "empty url"));
      }
      Ok(url.to_string())
    }
  }
}

fn hex_digest(raw: &str, len: usize, field: &'static str) -> Result<String, RecordError> {
  let v = raw.trim().to_ascii_lowercase();
  if v.len() != len || !v.bytes().all(|b| b.is_ascii_hexdigit()) {
    return Err(RecordError::invalid(field, format!("expected {len} hex digits")));
  }
  Ok(v)
}

fn parse_time(field: &'static str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, RecordError> {
  let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
    return Ok(None);
  };
  DateTime::parse_from_rfc3339(raw.trim())
    .map(|t| Some(t.with_timezone(&Utc)))
    .map_err(|e| RecordError::invalid(field, e.to_string()))
}
