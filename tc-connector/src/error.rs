use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("authentication failed (HTTP 401)")]
  Auth { body: String },

  #[error("forbidden (HTTP 403)")]
  Forbidden { body: String },

  #[error("HTTP client error {status}")]
  Client { status: u16, body: String },

  #[error("HTTP server error {status}")]
  Server { status: u16, body: String },

  #[error("transport error: {0}")]
  Transport(#[from] TransportError),

  #[error("unexpected response: {0}")]
  Schema(String),
}

impl ApiError {
  pub fn from_status(status: u16, body: String) -> Self {
    match status {
      401 => Self::Auth { body },
      403 => Self::Forbidden { body },
      500..=599 => Self::Server { status, body },
      _ => Self::Client { status, body },
    }
  }
}

#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
  pub kind: TransportErrorKind,
  pub message: String,
}

impl TransportError {
  pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
  Connect,
  Proxy,
  Timeout,
  Body,
  Request,
}

impl std::fmt::Display for TransportErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Connect => "connection error",
      Self::Proxy => "proxy error",
      Self::Timeout => "timeout",
      Self::Body => "response body error",
      Self::Request => "request error",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
  #[error("malformed {field}: {reason}")]
  InvalidField { field: &'static str, reason: String },

  #[error("rating {0} outside 0..=5")]
  RatingOutOfRange(String),
}

impl RecordError {
  pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    Self::InvalidField {
      field,
      reason: reason.into(),
    }
  }
}
