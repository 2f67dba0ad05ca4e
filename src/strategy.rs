//! The four request-fulfillment strategies.
//!
//! Each handler is an independent state machine per request: it takes the
//! intercepted request plus a fetcher closure for the single network
//! attempt, reads/writes its cache tier, and converts connectivity failures
//! into cache fallbacks, queue-and-acknowledge, or synthesized errors. A
//! connectivity failure never escapes as an error except from the asset
//! strategy, where a hard failure is deliberate.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::{request_key, CachedResponse, Tier, TierManager, TierStore};
use crate::fetch::{FetchRequest, FetchResponse};
use crate::queue::{OfflineQueue, QueuedRequest};

/// Message body for the 202 offline acknowledgment.
pub const QUEUED_MESSAGE: &str = "Request saved offline and will sync when connectivity returns";
/// Message body for the 503 no-network error.
pub const UNAVAILABLE_MESSAGE: &str = "Network unavailable and no cached data";

/// Freshness windows for the cache-first tiers. The network-first tiers
/// always try the network, so they carry no TTL.
///
/// An entry older than its tier's TTL is treated as a miss on the fresh
/// path but remains the last-resort fallback when the network is down.
#[derive(Debug, Clone, Copy)]
pub struct TierTtls {
  pub images: Duration,
  pub assets: Duration,
}

impl Default for TierTtls {
  fn default() -> Self {
    Self {
      images: Duration::days(30),
      assets: Duration::days(7),
    }
  }
}

/// Strategy layer binding the cache tiers and the offline queue.
pub struct StrategyLayer<S: TierStore> {
  tiers: TierManager<S>,
  queue: Arc<OfflineQueue>,
  ttls: TierTtls,
  /// Absolute URL of the root document (precached app shell)
  root_url: String,
  /// Absolute URL of the placeholder icon served for unreachable images
  placeholder_url: String,
}

impl<S: TierStore> StrategyLayer<S> {
  pub fn new(
    tiers: TierManager<S>,
    queue: Arc<OfflineQueue>,
    ttls: TierTtls,
    root_url: &str,
    placeholder_url: &str,
  ) -> Self {
    Self {
      tiers,
      queue,
      ttls,
      root_url: root_url.to_string(),
      placeholder_url: placeholder_url.to_string(),
    }
  }

  fn is_fresh(&self, stored_at: DateTime<Utc>, ttl: Duration) -> bool {
    Utc::now() - stored_at <= ttl
  }

  /// Network-first for the API namespace. Only read responses go into the
  /// cache; mutation responses are never stored or served from it.
  ///
  /// 1. Network OK: for reads, cache a copy; return it
  /// 2. Network non-OK: reads prefer any cached entry, else the non-OK
  ///    response; mutations pass it through
  /// 3. Connectivity failure: mutating requests are queued and
  ///    acknowledged with 202; reads get the cached entry if any, else a
  ///    synthesized 503
  pub async fn handle_api<F, Fut>(&self, request: &FetchRequest, fetcher: F) -> Result<FetchResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    let partition = self.tiers.partition(Tier::Api);
    let key = request_key(request);

    match fetcher().await {
      Ok(response) if response.is_ok() => {
        // Only reads land in the cache. A stored mutation response would
        // later answer an identical offline mutation instead of queueing
        // it.
        if !request.is_mutating() {
          self.tiers.store().put(&partition, &key, &request.url, &response)?;
        }
        Ok(response)
      }
      Ok(response) if request.is_mutating() => Ok(response),
      Ok(response) => match self.tiers.store().get(&partition, &key)? {
        Some(cached) => {
          debug!(url = %request.url, status = response.status, "serving cached API response over non-OK network answer");
          Ok(cached.response)
        }
        None => Ok(response),
      },
      Err(e) => {
        debug!(url = %request.url, error = %e, "API network fetch failed");

        if request.is_mutating() {
          return match self.queue.append(&QueuedRequest::capture(request)) {
            Ok(id) => {
              info!(id, url = %request.url, method = %request.method, "queued offline mutation");
              Ok(FetchResponse::offline_queued(QUEUED_MESSAGE))
            }
            Err(e) => {
              error!(url = %request.url, error = %e, "failed to persist offline mutation");
              Ok(FetchResponse::unavailable(UNAVAILABLE_MESSAGE))
            }
          };
        }

        if let Some(cached) = self.tiers.store().get(&partition, &key)? {
          Ok(cached.response)
        } else {
          Ok(FetchResponse::unavailable(UNAVAILABLE_MESSAGE))
        }
      }
    }
  }

  /// Cache-first for images, with the precached placeholder icon as the
  /// offline fallback.
  pub async fn handle_image<F, Fut>(
    &self,
    request: &FetchRequest,
    fetcher: F,
  ) -> Result<FetchResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    let partition = self.tiers.partition(Tier::Images);
    let key = request_key(request);

    let cached = self.tiers.store().get(&partition, &key)?;
    if let Some(entry) = &cached {
      if self.is_fresh(entry.stored_at, self.ttls.images) {
        return Ok(entry.response.clone());
      }
    }

    match fetcher().await {
      Ok(response) => {
        if response.is_ok() {
          self.tiers.store().put(&partition, &key, &request.url, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "image fetch failed");

        // An expired copy still beats the placeholder.
        if let Some(entry) = cached {
          return Ok(entry.response);
        }

        match self.placeholder()? {
          Some(placeholder) => Ok(placeholder.response),
          None => Ok(FetchResponse::unavailable(UNAVAILABLE_MESSAGE)),
        }
      }
    }
  }

  fn placeholder(&self) -> Result<Option<CachedResponse>> {
    let store = self.tiers.store();
    if let Some(entry) = store.get_by_url(&self.tiers.partition(Tier::Static), &self.placeholder_url)? {
      return Ok(Some(entry));
    }
    store.get_by_url(&self.tiers.partition(Tier::Images), &self.placeholder_url)
  }

  /// Cache-first for scripts and styles. A connectivity failure with
  /// nothing cached propagates: there is no safe placeholder for JS/CSS.
  pub async fn handle_asset<F, Fut>(
    &self,
    request: &FetchRequest,
    fetcher: F,
  ) -> Result<FetchResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    let partition = self.tiers.partition(Tier::Runtime);
    let key = request_key(request);

    let cached = self.tiers.store().get(&partition, &key)?;
    if let Some(entry) = &cached {
      if self.is_fresh(entry.stored_at, self.ttls.assets) {
        return Ok(entry.response.clone());
      }
    }

    match fetcher().await {
      Ok(response) => {
        if response.is_ok() {
          self.tiers.store().put(&partition, &key, &request.url, &response)?;
        }
        Ok(response)
      }
      Err(e) => match cached {
        Some(entry) => Ok(entry.response),
        None => Err(e),
      },
    }
  }

  /// Network-first for documents, falling back to the exact cached match
  /// and finally to the cached root document, so the app shell always
  /// loads offline.
  pub async fn handle_document<F, Fut>(
    &self,
    request: &FetchRequest,
    fetcher: F,
  ) -> Result<FetchResponse>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    let runtime = self.tiers.partition(Tier::Runtime);

    match fetcher().await {
      Ok(response) => {
        if response.is_ok() {
          let key = request_key(request);
          self.tiers.store().put(&runtime, &key, &request.url, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "document fetch failed, falling back to cache");

        if let Some(entry) = self.lookup_document(&request.url)? {
          return Ok(entry.response);
        }

        match self.lookup_document(&self.root_url)? {
          Some(shell) => Ok(shell.response),
          None => Ok(FetchResponse::unavailable(UNAVAILABLE_MESSAGE)),
        }
      }
    }
  }

  fn lookup_document(&self, url: &str) -> Result<Option<CachedResponse>> {
    let store = self.tiers.store();
    if let Some(entry) = store.get_by_url(&self.tiers.partition(Tier::Runtime), url)? {
      return Ok(Some(entry));
    }
    store.get_by_url(&self.tiers.partition(Tier::Static), url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::fetch::Destination;
  use color_eyre::eyre::eyre;
  use std::sync::Arc;

  const ROOT: &str = "https://dash.test/";
  const PLACEHOLDER: &str = "https://dash.test/icons/icon-192.png";

  struct Fixture {
    layer: StrategyLayer<SqliteStore>,
    store: Arc<SqliteStore>,
    queue: Arc<OfflineQueue>,
  }

  fn fixture() -> Fixture {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let queue = Arc::new(OfflineQueue::open_in_memory().unwrap());
    let tiers = TierManager::new(Arc::clone(&store), "fieldsales", 1);
    let layer = StrategyLayer::new(
      tiers,
      Arc::clone(&queue),
      TierTtls::default(),
      ROOT,
      PLACEHOLDER,
    );
    Fixture { layer, store, queue }
  }

  fn ok(body: &str) -> FetchResponse {
    FetchResponse::new(200, body.as_bytes().to_vec())
  }

  async fn offline() -> Result<FetchResponse> {
    Err(eyre!("connection refused"))
  }

  #[tokio::test]
  async fn test_api_ok_is_returned_and_cached() {
    let f = fixture();
    let request = FetchRequest::get("https://dash.test/api/outlets");

    let response = f
      .layer
      .handle_api(&request, || async { Ok(ok("[1,2,3]")) })
      .await
      .unwrap();
    assert_eq!(response.body, b"[1,2,3]");

    // Offline now: the cached copy comes back byte-identical.
    let cached = f.layer.handle_api(&request, offline).await.unwrap();
    assert_eq!(cached.body, response.body);
  }

  #[tokio::test]
  async fn test_api_non_ok_prefers_cache() {
    let f = fixture();
    let request = FetchRequest::get("https://dash.test/api/outlets");

    f.layer
      .handle_api(&request, || async { Ok(ok("good")) })
      .await
      .unwrap();

    let response = f
      .layer
      .handle_api(&request, || async { Ok(FetchResponse::new(500, b"boom".to_vec())) })
      .await
      .unwrap();
    assert_eq!(response.body, b"good");
  }

  #[tokio::test]
  async fn test_api_non_ok_without_cache_is_passed_through() {
    let f = fixture();
    let request = FetchRequest::get("https://dash.test/api/stats");

    let response = f
      .layer
      .handle_api(&request, || async { Ok(FetchResponse::new(500, b"boom".to_vec())) })
      .await
      .unwrap();
    assert_eq!(response.status, 500);
    assert_eq!(response.body, b"boom");
  }

  #[tokio::test]
  async fn test_offline_mutation_is_queued_with_202() {
    let f = fixture();
    let request = FetchRequest::new("POST", "https://dash.test/api/outlets")
      .with_header("content-type", "application/json")
      .with_body(r#"{"name":"Corner Store"}"#);

    let response = f.layer.handle_api(&request, offline).await.unwrap();
    assert_eq!(response.status, 202);

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["offline"], true);

    let queued = f.queue.list_all().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].url, "https://dash.test/api/outlets");
    assert_eq!(queued[0].method, "POST");
    assert_eq!(queued[0].body.as_deref(), Some(r#"{"name":"Corner Store"}"#));
  }

  #[tokio::test]
  async fn test_offline_mutation_queued_despite_prior_online_success() {
    let f = fixture();
    let request = FetchRequest::new("POST", "https://dash.test/api/visits")
      .with_header("content-type", "application/json")
      .with_body(r#"{"outlet":7}"#);

    // Same mutation succeeded online earlier; its response must not be
    // cached and must never answer the offline retry.
    let online = f
      .layer
      .handle_api(&request, || async { Ok(ok("created")) })
      .await
      .unwrap();
    assert_eq!(online.status, 200);

    let offline_retry = f.layer.handle_api(&request, offline).await.unwrap();
    assert_eq!(offline_retry.status, 202);
    assert_eq!(f.queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_offline_duplicate_mutations_queue_twice() {
    let f = fixture();
    let request = FetchRequest::new("DELETE", "https://dash.test/api/products/7");

    f.layer.handle_api(&request, offline).await.unwrap();
    f.layer.handle_api(&request, offline).await.unwrap();

    assert_eq!(f.queue.len().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_offline_get_without_cache_is_503() {
    let f = fixture();
    let request = FetchRequest::get("https://dash.test/api/routes");

    let response = f.layer.handle_api(&request, offline).await.unwrap();
    assert_eq!(response.status, 503);

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert!(body["error"].is_string());
    assert!(f.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_image_cache_first() {
    let f = fixture();
    let request =
      FetchRequest::get("https://dash.test/photos/outlet.jpg").with_destination(Destination::Image);

    f.layer
      .handle_image(&request, || async { Ok(ok("jpeg-bytes")) })
      .await
      .unwrap();

    // Second call must not touch the network at all.
    let fetched = std::sync::atomic::AtomicUsize::new(0);
    let response = f
      .layer
      .handle_image(&request, || {
        fetched.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        offline()
      })
      .await
      .unwrap();
    assert_eq!(response.body, b"jpeg-bytes");
    assert_eq!(fetched.load(std::sync::atomic::Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_image_offline_falls_back_to_placeholder() {
    let f = fixture();

    // Placeholder lands in the static partition at install time.
    f.store
      .put(
        "fieldsales-static-v1",
        "placeholder-key",
        PLACEHOLDER,
        &ok("placeholder-png"),
      )
      .unwrap();

    let request =
      FetchRequest::get("https://dash.test/photos/missing.jpg").with_destination(Destination::Image);
    let response = f.layer.handle_image(&request, offline).await.unwrap();
    assert_eq!(response.body, b"placeholder-png");
  }

  #[tokio::test]
  async fn test_expired_image_served_when_offline() {
    let f = fixture();
    let request =
      FetchRequest::get("https://dash.test/photos/outlet.jpg").with_destination(Destination::Image);

    f.layer
      .handle_image(&request, || async { Ok(ok("stale-jpeg")) })
      .await
      .unwrap();
    f.store.backdate_entries(Duration::days(90)).unwrap();

    // Expired, so the fresh path refetches...
    let refreshed = f
      .layer
      .handle_image(&request, || async { Ok(ok("fresh-jpeg")) })
      .await
      .unwrap();
    assert_eq!(refreshed.body, b"fresh-jpeg");

    // ...and with the network down the expired copy is still served.
    f.store.backdate_entries(Duration::days(90)).unwrap();
    let fallback = f.layer.handle_image(&request, offline).await.unwrap();
    assert_eq!(fallback.body, b"fresh-jpeg");
  }

  #[tokio::test]
  async fn test_asset_offline_without_cache_is_hard_failure() {
    let f = fixture();
    let request =
      FetchRequest::get("https://dash.test/assets/app.js").with_destination(Destination::Script);

    assert!(f.layer.handle_asset(&request, offline).await.is_err());
  }

  #[tokio::test]
  async fn test_asset_cache_first_with_refill() {
    let f = fixture();
    let request =
      FetchRequest::get("https://dash.test/assets/app.css").with_destination(Destination::Style);

    f.layer
      .handle_asset(&request, || async { Ok(ok("body{}")) })
      .await
      .unwrap();

    let response = f.layer.handle_asset(&request, offline).await.unwrap();
    assert_eq!(response.body, b"body{}");
  }

  #[tokio::test]
  async fn test_document_network_first_caches_runtime() {
    let f = fixture();
    let request =
      FetchRequest::get("https://dash.test/outlets").with_destination(Destination::Document);

    f.layer
      .handle_document(&request, || async { Ok(ok("<html>outlets</html>")) })
      .await
      .unwrap();

    let offline_copy = f.layer.handle_document(&request, offline).await.unwrap();
    assert_eq!(offline_copy.body, b"<html>outlets</html>");
  }

  #[tokio::test]
  async fn test_document_falls_back_to_root_shell() {
    let f = fixture();

    // Root document precached into the static partition.
    f.store
      .put("fieldsales-static-v1", "root-key", ROOT, &ok("<html>shell</html>"))
      .unwrap();

    let request =
      FetchRequest::get("https://dash.test/routes/north").with_destination(Destination::Document);
    let response = f.layer.handle_document(&request, offline).await.unwrap();
    assert_eq!(response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_document_offline_with_nothing_cached_is_503() {
    let f = fixture();
    let request =
      FetchRequest::get("https://dash.test/anywhere").with_destination(Destination::Document);

    let response = f.layer.handle_document(&request, offline).await.unwrap();
    assert_eq!(response.status, 503);
  }
}
