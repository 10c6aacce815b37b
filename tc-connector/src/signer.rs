use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::transport::Method;

type HmacSha256 = Hmac<Sha256>;

pub const AUTHORIZATION: &str = "Authorization";
pub const TIMESTAMP: &str = "Timestamp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
  pub authorization: String,
  pub timestamp: String,
}

impl AuthHeaders {
  pub fn into_pairs(self) -> Vec<(String, String)> {
    vec![
      (AUTHORIZATION.to_string(), self.authorization),
      (TIMESTAMP.to_string(), self.timestamp),
    ]
  }
}

// `path` must carry the query string exactly as sent; the server rejects stale
// timestamps, so sign per request.
pub fn sign(
  path: &str,
  method: Method,
  access_id: &str,
  secret_key: &str,
  unix_ts: i64,
) -> Result<AuthHeaders, InvalidLength> {
  let message = format!("{path}:{}:{unix_ts}", method.as_str());
  let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())?;
  mac.update(message.as_bytes());
  let digest = STANDARD.encode(mac.finalize().into_bytes());

  Ok(AuthHeaders {
    authorization: format!("TC {access_id}:{digest}"),
    timestamp: unix_ts.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signature_covers_path_method_and_timestamp() {
    let h = sign("/api/v3/indicators", Method::Get, "12345", "secret", 1_700_000_000).unwrap();
    assert_eq!(h.timestamp, "1700000000");
    assert!(h.authorization.starts_with("TC 12345:"));

    assert_eq!(
      h.authorization,
      "TC 12345:0VwtnP11ZrWe+SH9d5Nj+nuGnqZ64MZ0EcL/A/NmwNU="
    );
  }

  #[test]
  fn method_and_timestamp_are_part_of_signed_material() {
    let get = sign("/api/v3/groups/", Method::Get, "id", "k", 100).unwrap();
    let post = sign("/api/v3/groups/", Method::Post, "id", "k", 100).unwrap();
    let later = sign("/api/v3/groups/", Method::Get, "id", "k", 101).unwrap();
    assert_ne!(get.authorization, post.authorization);
    assert_ne!(get.authorization, later.authorization);
  }

  #[test]
  fn empty_secret_still_signs() {
    let h = sign("/api/v3/indicators", Method::Get, "id", "", 5).unwrap();
    assert!(h.authorization.starts_with("TC id:"));
  }

  #[test]
  fn digest_is_standard_base64_of_32_bytes() {
    let h = sign("/p?q=1", Method::Put, "id", "k", 1).unwrap();
    let b64 = h.authorization.trim_start_matches("TC id:");
    let raw = STANDARD.decode(b64).unwrap();
    assert_eq!(raw.len(), 32);
  }
}
