use crate::api::{decode_envelope, ApiClient, INDICATORS_PATH};
use crate::groups::{GroupRef, GroupResolver};
use crate::schema::{CreateIndicatorBody, GroupAssociation, GroupIdRef, TagList, UpdateIndicatorBody};
use crate::transport::HttpResponse;
use crate::types::{Indicator, IndicatorKind, PROVENANCE_TAG};
use serde::Serialize;

pub const MAX_URL_LEN: usize = 500;

pub const PUSH_SUCCESS_MESSAGE: &str = "Indicators pushed successfully to ThreatConnect.";
pub const PUSH_FAILURE_MESSAGE: &str = "Error while pushing IoCs to ThreatConnect.";
pub const GROUP_FAILURE_MESSAGE: &str = "Error while resolving ThreatConnect group.";

const EXCLUSION_MESSAGE: &str = "This Indicator is contained on a system-wide exclusion list.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
  Created,
  AlreadyExists,
  Rejected(String),
  Unrecognized(String),
}

impl CreateOutcome {
  pub fn from_response(resp: &HttpResponse) -> Self {
    let env = match decode_envelope::<serde_json::Value>(resp) {
      Ok(env) => env,
      Err(e) => return Self::Unrecognized(e.to_string()),
    };
    let message = env.message();
    if env.is_success() && message == "Created" {
      Self::Created
    } else if message.ends_with("already exists") {
      Self::AlreadyExists
    } else if message.starts_with("Please enter a valid") || message == EXCLUSION_MESSAGE {
      Self::Rejected(message.to_string())
    } else {
      Self::Unrecognized(format!("HTTP {}: {message}", resp.status))
    }
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PushStats {
  pub created: usize,
  pub updated: usize,
  pub invalid: usize,
  pub update_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushResult {
  pub success: bool,
  pub message: String,
  pub stats: PushStats,
}

impl PushResult {
  fn failed(message: &str, stats: PushStats) -> Self {
    Self {
      success: false,
      message: message.to_string(),
      stats,
    }
  }
}

pub fn build_payload(indicator: &Indicator, group_id: &str) -> Option<CreateIndicatorBody> {
  let (kind, text, md5, sha256) = match indicator.kind {
    IndicatorKind::Url => {
      let len = indicator.value.chars().count();
      if len == 0 || len > MAX_URL_LEN {
        return None;
      }
      ("url", Some(indicator.value.clone()), None, None)
    }
    IndicatorKind::Md5 => ("File", None, Some(indicator.value.clone()), None),
    IndicatorKind::Sha256 => ("File", None, None, Some(indicator.value.clone())),
  };

  Some(CreateIndicatorBody {
    kind,
    text,
    md5,
    sha256,
    associated_groups: association(group_id, None),
    tags: TagList::single(PROVENANCE_TAG),
    rating: indicator.severity.to_rating(),
    confidence: u32::from(indicator.reputation) * 10,
  })
}

// Hashes are looked up in upper case.
pub fn update_path(indicator: &Indicator) -> String {
  let key = match indicator.kind {
    IndicatorKind::Md5 | IndicatorKind::Sha256 => indicator.value.to_ascii_uppercase(),
    IndicatorKind::Url => urlencoding::encode(&indicator.value).into_owned(),
  };
  format!("{INDICATORS_PATH}/{key}")
}

fn association(group_id: &str, mode: Option<&'static str>) -> GroupAssociation {
  // Numeric ids go out as numbers, matching what the listing returns.
  let id = match group_id.parse::<u64>() {
    Ok(n) => serde_json::Value::from(n),
    Err(_) => serde_json::Value::from(group_id),
  };
  GroupAssociation {
    data: vec![GroupIdRef { id }],
    mode,
  }
}

pub struct PushEngine<'a> {
  api: &'a ApiClient<'a>,
}

impl<'a> PushEngine<'a> {
  pub fn new(api: &'a ApiClient<'a>) -> Self {
    Self { api }
  }

  pub fn push(&self, indicators: &[Indicator], group: &mut GroupRef) -> PushResult {
    let mut stats = PushStats::default();

    let group_id = match GroupResolver::new(self.api).resolve(group) {
      Ok(id) => id,
      Err(e) => {
        tracing::error!(error = %e, "unable to resolve target group; nothing pushed");
        return PushResult::failed(GROUP_FAILURE_MESSAGE, stats);
      }
    };

    for indicator in indicators {
      let Some(payload) = build_payload(indicator, &group_id) else {
        stats.invalid += 1;
        continue;
      };

      let resp = match self.api.post_json(INDICATORS_PATH, &payload) {
        Ok(resp) => resp,
        Err(e) => {
          tracing::error!(error = %e, "error while pushing IoCs to ThreatConnect");
          return PushResult::failed(PUSH_FAILURE_MESSAGE, stats);
        }
      };

      match CreateOutcome::from_response(&resp) {
        CreateOutcome::Created => stats.created += 1,
        CreateOutcome::AlreadyExists => {
          if self.attach_group(indicator, &group_id) {
            stats.updated += 1;
          } else {
            stats.update_failures += 1;
          }
        }
        CreateOutcome::Rejected(reason) => {
          tracing::debug!(value = %indicator.value, reason = %reason, "indicator rejected");
          stats.invalid += 1;
        }
        CreateOutcome::Unrecognized(reason) => {
          tracing::error!(error = %reason, "error while pushing IoCs to ThreatConnect");
          return PushResult::failed(PUSH_FAILURE_MESSAGE, stats);
        }
      }
    }

    if stats.invalid > 0 {
      tracing::error!(invalid = stats.invalid, "skipped invalid IoCs while pushing to ThreatConnect");
    }
    if stats.updated > 0 {
      tracing::warn!(updated = stats.updated, "updated existing IoCs on ThreatConnect");
    }
    tracing::info!(
      created = stats.created,
      updated = stats.updated,
      invalid = stats.invalid,
      update_failures = stats.update_failures,
      "push finished"
    );

    PushResult {
      success: true,
      message: PUSH_SUCCESS_MESSAGE.to_string(),
      stats,
    }
  }

  fn attach_group(&self, indicator: &Indicator, group_id: &str) -> bool {
    let body = UpdateIndicatorBody {
      associated_groups: association(group_id, Some("append")),
    };
    let resp = match self.api.put_json(&update_path(indicator), &body) {
      Ok(resp) => resp,
      Err(e) => {
        tracing::error!(error = %e, "error while updating indicator metadata");
        return false;
      }
    };
    match decode_envelope::<serde_json::Value>(&resp) {
      Ok(env) if env.is_success() => true,
      Ok(env) => {
        tracing::error!(status = resp.status, error = %env.message(), "error while updating indicator metadata");
        false
      }
      Err(e) => {
        tracing::error!(error = %e, "error while updating indicator metadata");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TransportError;
  use crate::groups::CREATE_GROUP_VALUE;
  use crate::testing::{connect_error, json_response, RecordingSleeper, ScriptedTransport};
  use crate::transport::Method;
  use crate::types::Severity;
  use serde_json::json;

  const BASE: &str = "https://api.threatconnect.com";
  const SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

  fn indicator(value: &str, kind: IndicatorKind) -> Indicator {
    Indicator {
      value: value.to_string(),
      kind,
      active: true,
      severity: Severity::Medium,
      reputation: 7,
      comments: String::new(),
      first_seen: None,
      last_seen: None,
      tags: vec![],
    }
  }

  fn created() -> Result<HttpResponse, TransportError> {
    Ok(json_response(201, json!({"status": "Success", "message": "Created", "data": {}})))
  }

  fn exists() -> Result<HttpResponse, TransportError> {
    Ok(json_response(
      400,
      json!({"status": "Failure", "message": "An indicator with this value already exists"}),
    ))
  }

  fn updated() -> Result<HttpResponse, TransportError> {
    Ok(json_response(200, json!({"status": "Success", "message": "Updated"})))
  }

  fn run(
    script: Vec<Result<HttpResponse, TransportError>>,
    indicators: &[Indicator],
    group: &mut GroupRef,
  ) -> (PushResult, ScriptedTransport) {
    let t = ScriptedTransport::new(script);
    let s = RecordingSleeper::default();
    let result = {
      let api = ApiClient::with_credentials(&t, &s, BASE, "id", "key");
      PushEngine::new(&api).push(indicators, group)
    };
    (result, t)
  }

  fn body(req: &crate::transport::HttpRequest) -> serde_json::Value {
    serde_json::from_slice(req.body.as_deref().unwrap()).unwrap()
  }

  #[test]
  fn payload_carries_provenance_rating_and_confidence() {
    let p = build_payload(&indicator(SHA, IndicatorKind::Sha256), "12").unwrap();
    assert_eq!(
      serde_json::to_value(&p).unwrap(),
      json!({
        "type": "File",
        "sha256": SHA,
        "associatedGroups": {"data": [{"id": 12}]},
        "tags": {"data": [{"name": PROVENANCE_TAG}]},
        "rating": 3,
        "confidence": 70,
      })
    );

    let url = build_payload(&indicator("http://x.test/a", IndicatorKind::Url), "abc").unwrap();
    let v = serde_json::to_value(&url).unwrap();
    assert_eq!(v["type"], "url");
    assert_eq!(v["text"], "http://x.test/a");
    assert_eq!(v["associatedGroups"]["data"][0]["id"], "abc");
  }

  #[test]
  fn oversized_url_has_no_payload() {
    let long = format!("http://x.test/{}", "a".repeat(MAX_URL_LEN));
    assert!(build_payload(&indicator(&long, IndicatorKind::Url), "1").is_none());
  }

  #[test]
  fn update_path_uppercases_hashes_and_escapes_urls() {
    assert_eq!(
      update_path(&indicator("abcdef", IndicatorKind::Md5)),
      "/api/v3/indicators/ABCDEF"
    );
    assert_eq!(
      update_path(&indicator("http://x.test/a?b=1", IndicatorKind::Url)),
      "/api/v3/indicators/http%3A%2F%2Fx.test%2Fa%3Fb%3D1"
    );
  }

  #[test]
  fn create_outcomes_follow_response_message() {
    let outcome = |status, body| CreateOutcome::from_response(&json_response(status, body));
    assert_eq!(
      outcome(201, json!({"status": "Success", "message": "Created"})),
      CreateOutcome::Created
    );
    assert_eq!(
      outcome(400, json!({"status": "Failure", "message": "File already exists"})),
      CreateOutcome::AlreadyExists
    );
    assert!(matches!(
      outcome(400, json!({"status": "Failure", "message": "Please enter a valid Url"})),
      CreateOutcome::Rejected(_)
    ));
    assert!(matches!(
      outcome(400, json!({"status": "Failure", "message": EXCLUSION_MESSAGE})),
      CreateOutcome::Rejected(_)
    ));
    assert!(matches!(
      outcome(401, json!({"status": "Failure", "message": "Unauthorized"})),
      CreateOutcome::Unrecognized(_)
    ));
    assert!(matches!(
      CreateOutcome::from_response(&HttpResponse {
        status: 502,
        body: b"gateway".to_vec(),
      }),
      CreateOutcome::Unrecognized(_)
    ));
  }

  #[test]
  fn duplicate_triggers_exactly_one_update() {
    let mut group = GroupRef::Existing("12".to_string());
    let (result, t) = run(
      vec![exists(), updated()],
      &[indicator(SHA, IndicatorKind::Sha256)],
      &mut group,
    );

    assert!(result.success);
    assert_eq!(
      result.stats,
      PushStats {
        updated: 1,
        ..PushStats::default()
      }
    );
    let reqs = t.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs.iter().filter(|r| r.method == Method::Post).count(), 1);
    assert_eq!(reqs[1].method, Method::Put);
    assert_eq!(reqs[1].url, format!("{BASE}/api/v3/indicators/{}", SHA.to_ascii_uppercase()));
    assert_eq!(
      body(&reqs[1]),
      json!({"associatedGroups": {"data": [{"id": 12}], "mode": "append"}})
    );
  }

  #[test]
  fn unrecognized_response_aborts_remaining_batch() {
    let mut group = GroupRef::Existing("12".to_string());
    let batch = [
      indicator("http://one.test", IndicatorKind::Url),
      indicator("http://two.test", IndicatorKind::Url),
      indicator("http://three.test", IndicatorKind::Url),
    ];
    let (result, t) = run(
      vec![
        created(),
        Ok(json_response(500, json!({"status": "Failure", "message": "Internal error"}))),
      ],
      &batch,
      &mut group,
    );

    assert!(!result.success);
    assert_eq!(result.message, PUSH_FAILURE_MESSAGE);
    assert_eq!(result.stats.created, 1);
    assert_eq!(t.requests().len(), 2);
    assert_eq!(t.remaining(), 0);
  }

  #[test]
  fn invalid_and_oversized_indicators_are_counted_not_fatal() {
    let mut group = GroupRef::Existing("12".to_string());
    let long = format!("http://x.test/{}", "a".repeat(MAX_URL_LEN));
    let batch = [
      indicator(&long, IndicatorKind::Url),
      indicator("not a url", IndicatorKind::Url),
      indicator("http://ok.test", IndicatorKind::Url),
    ];
    let (result, t) = run(
      vec![
        Ok(json_response(400, json!({"status": "Failure", "message": "Please enter a valid Url"}))),
        created(),
      ],
      &batch,
      &mut group,
    );

    assert!(result.success);
    assert_eq!(result.message, PUSH_SUCCESS_MESSAGE);
    assert_eq!(result.stats.invalid, 2);
    assert_eq!(result.stats.created, 1);
    assert_eq!(t.requests().len(), 2);
  }

  #[test]
  fn failed_update_is_counted_and_run_continues() {
    let mut group = GroupRef::Existing("12".to_string());
    let batch = [
      indicator("http://a.test", IndicatorKind::Url),
      indicator("http://b.test", IndicatorKind::Url),
    ];
    let (result, _) = run(
      vec![
        exists(),
        Ok(json_response(400, json!({"status": "Failure", "message": "nope"}))),
        exists(),
        Err(connect_error()),
      ],
      &batch,
      &mut group,
    );

    assert!(result.success);
    assert_eq!(result.stats.update_failures, 2);
    assert_eq!(result.stats.updated, 0);
  }

  #[test]
  fn second_run_over_same_batch_resolves_through_updates() {
    let batch = [
      indicator(SHA, IndicatorKind::Sha256),
      indicator("http://a.test", IndicatorKind::Url),
    ];
    let mut group = GroupRef::Existing("12".to_string());

    let (first, _) = run(vec![created(), created()], &batch, &mut group);
    let (second, t) = run(vec![exists(), updated(), exists(), updated()], &batch, &mut group);

    assert_eq!(first.stats.created, 2);
    assert!(second.success);
    assert_eq!(second.stats.created, 0);
    assert_eq!(second.stats.updated, 2);
    let posts = t.requests().into_iter().filter(|r| r.method == Method::Post).count();
    assert_eq!(posts, 2);
  }

  #[test]
  fn group_failure_fails_run_before_any_create() {
    let mut group = GroupRef::from_params(CREATE_GROUP_VALUE, "New", "Incident");
    let (result, t) = run(
      vec![Ok(json_response(401, json!({"status": "Failure", "message": "denied"})))],
      &[indicator(SHA, IndicatorKind::Sha256)],
      &mut group,
    );

    assert!(!result.success);
    assert_eq!(result.message, GROUP_FAILURE_MESSAGE);
    assert_eq!(t.requests().len(), 1);
  }

  #[test]
  fn created_group_is_reused_for_every_indicator() {
    let mut group = GroupRef::from_params(CREATE_GROUP_VALUE, "Wave", "Incident");
    let (result, t) = run(
      vec![
        Ok(json_response(200, json!({"status": "Success", "data": {"owner": {"name": "Acme"}}}))),
        Ok(json_response(200, json!({"status": "Success", "data": []}))),
        Ok(json_response(201, json!({"status": "Success", "data": {"id": 31, "name": "Wave"}}))),
        created(),
        created(),
      ],
      &[
        indicator("http://a.test", IndicatorKind::Url),
        indicator("http://b.test", IndicatorKind::Url),
      ],
      &mut group,
    );

    assert!(result.success);
    assert_eq!(group, GroupRef::Existing("31".to_string()));
    let reqs = t.requests();
    assert_eq!(body(&reqs[3])["associatedGroups"]["data"][0]["id"], 31);
    assert_eq!(body(&reqs[4])["associatedGroups"]["data"][0]["id"], 31);
  }

  #[test]
  fn transport_failure_on_create_aborts() {
    let mut group = GroupRef::Existing("12".to_string());
    let (result, _) = run(
      vec![Err(connect_error())],
      &[indicator(SHA, IndicatorKind::Sha256)],
      &mut group,
    );
    assert!(!result.success);
    assert_eq!(result.message, PUSH_FAILURE_MESSAGE);
  }
}
