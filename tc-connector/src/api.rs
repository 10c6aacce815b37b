use crate::config::ConnectorConfig;
use crate::error::{ApiError, TransportError, TransportErrorKind};
use crate::schema::Envelope;
use crate::signer;
use crate::transport::{classify, retry_delay, CallOutcome, HttpRequest, HttpResponse, Method, Sleeper, Transport};
use crate::types::now_unix_s;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const INDICATORS_PATH: &str = "/api/v3/indicators";
pub const GROUPS_PATH: &str = "/api/v3/groups";
pub const CREATE_GROUP_PATH: &str = "/api/v3/groups/";
pub const OWNERS_MINE_PATH: &str = "/api/v2/owners/mine";
pub const SECURITY_OWNERS_PATH: &str = "/api/v3/security/owners";

pub const PAGE_SIZE: usize = 1000;

#[derive(Debug)]
pub enum FetchOutcome {
  Ok(HttpResponse),
  RetriesExhausted(HttpResponse),
  Failed(HttpResponse),
}

pub struct ApiClient<'a> {
  transport: &'a dyn Transport,
  sleeper: &'a dyn Sleeper,
  base_url: String,
  access_id: String,
  secret_key: String,
}

impl<'a> ApiClient<'a> {
  pub fn new(transport: &'a dyn Transport, sleeper: &'a dyn Sleeper, cfg: &ConnectorConfig) -> Self {
    Self::with_credentials(transport, sleeper, &cfg.base_url, &cfg.access_id, &cfg.secret_key)
  }

  pub fn with_credentials(
    transport: &'a dyn Transport,
    sleeper: &'a dyn Sleeper,
    base_url: &str,
    access_id: &str,
    secret_key: &str,
  ) -> Self {
    Self {
      transport,
      sleeper,
      base_url: base_url.trim().trim_end_matches('/').to_string(),
      access_id: access_id.to_string(),
      secret_key: secret_key.to_string(),
    }
  }

  pub fn relative_path(&self, next: &str) -> String {
    if let Some(rest) = next.strip_prefix(&self.base_url) {
      return rest.to_string();
    }
    match reqwest::Url::parse(next) {
      Ok(url) => match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
      },
      Err(_) => next.to_string(),
    }
  }

  pub fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<HttpResponse, TransportError> {
    let headers = signer::sign(path, method, &self.access_id, &self.secret_key, now_unix_s())
      .map_err(|e| TransportError::new(TransportErrorKind::Request, format!("sign request: {e}")))?;
    let req = HttpRequest {
      method,
      url: format!("{}{path}", self.base_url),
      headers: headers.into_pairs(),
      body,
    };
    self.transport.execute(&req)
  }

  pub fn get(&self, path: &str) -> Result<HttpResponse, TransportError> {
    self.send(Method::Get, path, None)
  }

  pub fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpResponse, ApiError> {
    let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Schema(format!("encode request: {e}")))?;
    Ok(self.send(Method::Post, path, Some(bytes))?)
  }

  pub fn put_json<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpResponse, ApiError> {
    let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Schema(format!("encode request: {e}")))?;
    Ok(self.send(Method::Put, path, Some(bytes))?)
  }

  pub fn get_with_retry(&self, path: &str) -> Result<FetchOutcome, TransportError> {
    let mut attempt = 0;
    loop {
      let resp = self.get(path)?;
      match classify(resp) {
        CallOutcome::Ok(resp) => return Ok(FetchOutcome::Ok(resp)),
        CallOutcome::Fatal(resp) => return Ok(FetchOutcome::Failed(resp)),
        CallOutcome::Retryable(resp) => match retry_delay(attempt) {
          Some(wait) => {
            tracing::warn!(
              status = resp.status,
              retry_after_secs = wait.as_secs(),
              "server error; retrying"
            );
            self.sleeper.sleep(wait);
            attempt += 1;
          }
          None => return Ok(FetchOutcome::RetriesExhausted(resp)),
        },
      }
    }
  }

  pub fn get_envelope<T: DeserializeOwned>(&self, path: &str) -> Result<Envelope<T>, ApiError> {
    match self.get_with_retry(path)? {
      FetchOutcome::Ok(resp) => parse_envelope(&resp),
      FetchOutcome::RetriesExhausted(resp) | FetchOutcome::Failed(resp) => {
        Err(ApiError::from_status(resp.status, short_body(&resp)))
      }
    }
  }
}

pub fn parse_envelope<T: DeserializeOwned>(resp: &HttpResponse) -> Result<Envelope<T>, ApiError> {
  if !resp.is_success() {
    return Err(ApiError::from_status(resp.status, short_body(resp)));
  }
  decode_envelope(resp)
}

// Parses regardless of HTTP status: create/update carry their verdict in
// the message of 4xx bodies.
pub fn decode_envelope<T: DeserializeOwned>(resp: &HttpResponse) -> Result<Envelope<T>, ApiError> {
  serde_json::from_slice(&resp.body)
    .map_err(|e| ApiError::Schema(format!("HTTP {} with unparsable body: {e}", resp.status)))
}

fn short_body(resp: &HttpResponse) -> String {
  let text = resp.body_text();
  if text.chars().count() <= 300 {
    return text;
  }
  let prefix: String = text.chars().take(300).collect();
  format!("{prefix}...")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{json_response, RecordingSleeper, ScriptedTransport};
  use std::time::Duration;

  fn client<'a>(t: &'a ScriptedTransport, s: &'a RecordingSleeper) -> ApiClient<'a> {
    ApiClient::with_credentials(t, s, "https://api.threatconnect.com/", "id", "key")
  }

  #[test]
  fn requests_are_signed_against_the_relative_path() {
    let t = ScriptedTransport::new(vec![Ok(json_response(200, serde_json::json!({"status":"Success"})))]);
    let s = RecordingSleeper::default();
    client(&t, &s).get("/api/v3/indicators?resultStart=0").unwrap();

    let reqs = t.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].url, "https://api.threatconnect.com/api/v3/indicators?resultStart=0");
    let ts: i64 = header(&reqs[0], "Timestamp").parse().unwrap();
    let expected = signer::sign("/api/v3/indicators?resultStart=0", Method::Get, "id", "key", ts).unwrap();
    assert_eq!(header(&reqs[0], "Authorization"), expected.authorization);
  }

  #[test]
  fn retry_waits_30_then_60_and_reports_exhaustion() {
    let t = ScriptedTransport::new(vec![
      Ok(json_response(503, serde_json::json!({}))),
      Ok(json_response(500, serde_json::json!({}))),
      Ok(json_response(500, serde_json::json!({}))),
    ]);
    let s = RecordingSleeper::default();
    let out = client(&t, &s).get_with_retry("/x").unwrap();
    assert!(matches!(out, FetchOutcome::RetriesExhausted(r) if r.status == 500));
    assert_eq!(t.requests().len(), 3);
    assert_eq!(s.sleeps(), vec![Duration::from_secs(30), Duration::from_secs(60)]);
  }

  #[test]
  fn retry_stops_on_first_success() {
    let t = ScriptedTransport::new(vec![
      Ok(json_response(503, serde_json::json!({}))),
      Ok(json_response(200, serde_json::json!({"status":"Success"}))),
    ]);
    let s = RecordingSleeper::default();
    let out = client(&t, &s).get_with_retry("/x").unwrap();
    assert!(matches!(out, FetchOutcome::Ok(_)));
    assert_eq!(s.sleeps().len(), 1);
  }

  #[test]
  fn non_retryable_status_is_not_retried() {
    let t = ScriptedTransport::new(vec![Ok(json_response(401, serde_json::json!({})))]);
    let s = RecordingSleeper::default();
    let out = client(&t, &s).get_with_retry("/x").unwrap();
    assert!(matches!(out, FetchOutcome::Failed(r) if r.status == 401));
    assert!(s.sleeps().is_empty());
  }

  #[test]
  fn next_links_become_relative() {
    let t = ScriptedTransport::new(vec![]);
    let s = RecordingSleeper::default();
    let c = client(&t, &s);
    assert_eq!(
      c.relative_path("https://api.threatconnect.com/api/v3/indicators?resultStart=1000"),
      "/api/v3/indicators?resultStart=1000"
    );
    assert_eq!(
      c.relative_path("https://other.threatconnect.com/api/v3/groups?resultStart=5"),
      "/api/v3/groups?resultStart=5"
    );
  }

  #[test]
  fn envelope_parsing_maps_status_and_garbage() {
    let ok = json_response(200, serde_json::json!({"status":"Success","data":[1,2]}));
    let env: Envelope<Vec<u32>> = parse_envelope(&ok).unwrap();
    assert_eq!(env.data, Some(vec![1, 2]));

    let denied = json_response(403, serde_json::json!({"status":"Failure"}));
    assert!(matches!(
      parse_envelope::<Vec<u32>>(&denied),
      Err(ApiError::Forbidden { .. })
    ));

    let garbage = HttpResponse {
      status: 200,
      body: b"<html>".to_vec(),
    };
    assert!(matches!(parse_envelope::<Vec<u32>>(&garbage), Err(ApiError::Schema(_))));
  }

  fn header<'r>(req: &'r HttpRequest, name: &str) -> &'r str {
    req
      .headers
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
      .unwrap()
  }
}
