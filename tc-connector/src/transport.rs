use crate::config::HttpConfig;
use crate::error::{TransportError, TransportErrorKind};
use anyhow::Context;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use std::io::Read;
use std::time::Duration;

const MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

pub const MAX_RETRY: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
    }
  }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    self.status == 200 || self.status == 201
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

pub trait Transport {
  fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub trait Sleeper {
  fn sleep(&self, d: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
  fn sleep(&self, d: Duration) {
    std::thread::sleep(d);
  }
}

#[derive(Debug)]
pub enum CallOutcome {
  Ok(HttpResponse),
  Retryable(HttpResponse),
  Fatal(HttpResponse),
}

pub fn classify(resp: HttpResponse) -> CallOutcome {
  match resp.status {
    200 | 201 => CallOutcome::Ok(resp),
    500 | 503 => CallOutcome::Retryable(resp),
    _ => CallOutcome::Fatal(resp),
  }
}

// 30s, 60s, then give up.
pub fn retry_delay(attempt: u32) -> Option<Duration> {
  if attempt + 1 >= MAX_RETRY {
    return None;
  }
  Some(Duration::from_secs(30 * u64::from(attempt + 1)))
}

pub struct ReqwestTransport {
  client: Client,
}

impl ReqwestTransport {
  pub fn new(cfg: &HttpConfig) -> anyhow::Result<Self> {
    let mut builder = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds))
      .redirect(Policy::none())
      .danger_accept_invalid_certs(!cfg.verify_tls);

    if let Some(proxy) = cfg.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
      let proxy = reqwest::Proxy::all(proxy).with_context(|| format!("invalid proxy URL: {proxy}"))?;
      builder = builder.proxy(proxy);
    }

    let client = builder.build().context("build HTTP client")?;
    Ok(Self { client })
  }
}

impl Transport for ReqwestTransport {
  fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let mut rb = match req.method {
      Method::Get => self.client.get(&req.url),
      Method::Post => self.client.post(&req.url),
      Method::Put => self.client.put(&req.url),
    };
    rb = rb.header(USER_AGENT, format!("tc-connector/{}", env!("CARGO_PKG_VERSION")));
    for (k, v) in &req.headers {
      rb = rb.header(k.as_str(), v.as_str());
    }
    if let Some(body) = &req.body {
      rb = rb.header(CONTENT_TYPE, "application/json").body(body.clone());
    }

    let response = rb.send().map_err(|e| map_reqwest_error(&e, &req.url))?;
    let status = response.status().as_u16();
    let body = read_response_with_limit(response, MAX_RESPONSE_BYTES)?;
    Ok(HttpResponse { status, body })
  }
}

fn map_reqwest_error(e: &reqwest::Error, url: &str) -> TransportError {
  let kind = if e.is_timeout() {
    TransportErrorKind::Timeout
  } else if e.is_connect() {
    if is_proxy_error(e) {
      TransportErrorKind::Proxy
    } else {
      TransportErrorKind::Connect
    }
  } else if e.is_body() || e.is_decode() {
    TransportErrorKind::Body
  } else {
    TransportErrorKind::Request
  };
  TransportError::new(kind, format!("{} ({e})", safe_url_label(url)))
}

fn is_proxy_error(e: &reqwest::Error) -> bool {
  let text = format!("{e:?}").to_ascii_lowercase();
  text.contains("proxy")
}

fn read_response_with_limit(response: Response, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited
    .read_to_end(&mut out)
    .map_err(|e| TransportError::new(TransportErrorKind::Body, format!("read response body: {e}")))?;

  if out.len() > max_bytes {
    return Err(TransportError::new(
      TransportErrorKind::Body,
      format!("response exceeds max size {max_bytes} bytes"),
    ));
  }

  Ok(out)
}

pub fn safe_url_label(url: &str) -> String {
  let Ok(parsed) = reqwest::Url::parse(url) else {
    return "<invalid-url>".to_string();
  };
  let host = parsed.host_str().unwrap_or("<no-host>");
  let mut path = parsed.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}
