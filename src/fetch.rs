//! Request/response types and the network client wrapper.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Platform hint describing what the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Image,
  Script,
  Style,
  #[default]
  Other,
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: String,
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  pub destination: Destination,
}

impl FetchRequest {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
      headers: BTreeMap::new(),
      body: None,
      destination: Destination::default(),
    }
  }

  /// Convenience constructor for a plain GET.
  pub fn get(url: &str) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: &str) -> Self {
    self.body = Some(body.to_string());
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  /// Whether this request mutates server state and must be queued when offline.
  pub fn is_mutating(&self) -> bool {
    matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
  }
}

/// A response snapshot: status, flattened headers, raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  pub fn new(status: u16, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Acknowledgment returned for a mutating request accepted into the
  /// offline queue: 202 with `{"offline": true, "message": ...}`.
  pub fn offline_queued(message: &str) -> Self {
    let body = serde_json::json!({ "offline": true, "message": message });
    Self::json(202, &body)
  }

  /// Synthesized failure for a read with no network and no cached data:
  /// 503 with `{"error": ...}`.
  pub fn unavailable(error: &str) -> Self {
    let body = serde_json::json!({ "error": error });
    Self::json(503, &body)
  }

  fn json(status: u16, body: &serde_json::Value) -> Self {
    Self::new(status, body.to_string().into_bytes())
      .with_header("content-type", "application/json")
  }

  /// Body as UTF-8 text, lossy. Used for display and tests.
  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Seam for issuing network requests. `NetworkClient` is the real
/// implementation; tests substitute stubs to simulate connectivity loss.
pub trait Fetch: Send + Sync + 'static {
  fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<FetchResponse>> + Send;
}

/// Thin reqwest wrapper with an explicit per-request timeout.
#[derive(Clone)]
pub struct NetworkClient {
  client: reqwest::Client,
}

impl NetworkClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetch for NetworkClient {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, &request.url);

    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();

    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(FetchResponse {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mutating_methods() {
    for method in ["POST", "PUT", "PATCH", "DELETE"] {
      assert!(FetchRequest::new(method, "https://x.test/api/orders").is_mutating());
    }
    assert!(!FetchRequest::get("https://x.test/api/orders").is_mutating());
    assert!(!FetchRequest::new("HEAD", "https://x.test/").is_mutating());
  }

  #[test]
  fn test_method_uppercased() {
    let req = FetchRequest::new("post", "https://x.test/api/orders");
    assert_eq!(req.method, "POST");
    assert!(req.is_mutating());
  }

  #[test]
  fn test_offline_queued_shape() {
    let resp = FetchResponse::offline_queued("Saved locally");
    assert_eq!(resp.status, 202);

    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["offline"], true);
    assert_eq!(body["message"], "Saved locally");
  }

  #[test]
  fn test_unavailable_shape() {
    let resp = FetchResponse::unavailable("no network");
    assert_eq!(resp.status, 503);
    assert!(!resp.is_ok());

    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["error"], "no network");
  }
}
