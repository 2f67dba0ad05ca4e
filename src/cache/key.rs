//! Cache key derivation from a normalized request descriptor.

use sha2::{Digest, Sha256};
use url::Url;

use crate::fetch::FetchRequest;

/// Derive the stable cache key for a request.
///
/// The descriptor is the uppercased method, the normalized URL (fragment
/// stripped), and the `accept` header when present, hashed with SHA-256 for
/// fixed-length keys.
pub fn request_key(request: &FetchRequest) -> String {
  let accept = request.headers.get("accept").map(String::as_str).unwrap_or("");
  let input = format!(
    "{}:{}:{}",
    request.method.to_uppercase(),
    normalize_url(&request.url),
    accept
  );

  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Normalize a URL for consistent hashing: parse, drop the fragment, and
/// re-serialize (which also lowercases the host and strips default ports).
/// Unparsable URLs fall back to the trimmed raw string.
pub fn normalize_url(raw: &str) -> String {
  match Url::parse(raw) {
    Ok(mut url) => {
      url.set_fragment(None);
      url.to_string()
    }
    Err(_) => raw.trim().to_string(),
  }
}
