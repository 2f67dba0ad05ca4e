//! Cache tier manager: partition naming and lifecycle (install/activate).

use color_eyre::Result;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::fetch::{FetchRequest, FetchResponse};

use super::key::request_key;
use super::store::TierStore;

/// The four cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
  /// Precached app shell and icons
  Static,
  /// Scripts, styles, and documents picked up at runtime
  Runtime,
  /// API responses
  Api,
  /// Images
  Images,
}

impl Tier {
  pub const ALL: [Tier; 4] = [Tier::Static, Tier::Runtime, Tier::Api, Tier::Images];

  pub fn as_str(&self) -> &'static str {
    match self {
      Tier::Static => "static",
      Tier::Runtime => "runtime",
      Tier::Api => "api",
      Tier::Images => "images",
    }
  }
}

/// Owns the four versioned partitions and their lifecycle.
///
/// Partition names are `<app>-<tier>-v<version>`; bumping the version is the
/// supported invalidation mechanism for whole tiers.
pub struct TierManager<S: TierStore> {
  store: Arc<S>,
  app: String,
  version: u32,
}

impl<S: TierStore> TierManager<S> {
  pub fn new(store: Arc<S>, app: &str, version: u32) -> Self {
    Self {
      store,
      app: app.to_string(),
      version,
    }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Current partition name for a tier.
  pub fn partition(&self, tier: Tier) -> String {
    format!("{}-{}-v{}", self.app, tier.as_str(), self.version)
  }

  /// The full current partition set.
  pub fn current_partitions(&self) -> Vec<String> {
    Tier::ALL.iter().map(|t| self.partition(*t)).collect()
  }

  /// Populate the static partition with the configured critical resources.
  ///
  /// Paths are resolved against the base URL and fetched concurrently.
  /// Failure to fetch any individual resource is logged and skipped; one
  /// bad resource never aborts the install. Returns the number of
  /// resources actually cached.
  pub async fn install<F, Fut>(&self, base: &Url, paths: &[String], fetcher: F) -> usize
  where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    let partition = self.partition(Tier::Static);

    let urls: Vec<String> = paths
      .iter()
      .filter_map(|path| match base.join(path) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
          warn!(path = %path, error = %e, "skipping unresolvable precache path");
          None
        }
      })
      .collect();

    let fetches = join_all(urls.iter().map(|url| fetcher(url.clone()))).await;

    let mut cached = 0;
    for (url, outcome) in urls.iter().zip(fetches) {
      match outcome {
        Ok(response) if response.is_ok() => {
          let key = request_key(&FetchRequest::get(url));
          match self.store.put(&partition, &key, url, &response) {
            Ok(()) => cached += 1,
            Err(e) => warn!(url = %url, error = %e, "failed to store precache resource"),
          }
        }
        Ok(response) => {
          warn!(url = %url, status = response.status, "precache resource returned non-OK status")
        }
        Err(e) => warn!(url = %url, error = %e, "failed to fetch precache resource"),
      }
    }

    info!(partition = %partition, cached, total = paths.len(), "precache install complete");
    cached
  }

  /// Delete every partition whose name is not among the four current ones.
  /// Returns the names that were dropped.
  pub fn activate(&self) -> Result<Vec<String>> {
    let current = self.current_partitions();

    let stale: Vec<String> = self
      .store
      .partitions()?
      .into_iter()
      .filter(|name| !current.contains(name))
      .collect();

    for name in &stale {
      self.store.drop_partition(name)?;
      info!(partition = %name, "dropped stale partition");
    }

    Ok(stale)
  }
}

impl<S: TierStore> Clone for TierManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      app: self.app.clone(),
      version: self.version,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::SqliteStore;
  use color_eyre::eyre::eyre;

  fn manager(version: u32) -> TierManager<SqliteStore> {
    TierManager::new(Arc::new(SqliteStore::open_in_memory().unwrap()), "fieldsales", version)
  }

  fn precache_paths() -> Vec<String> {
    ["/", "/dashboard", "/manifest.json", "/icons/icon-192.png", "/icons/icon-512.png"]
      .iter()
      .map(|s| s.to_string())
      .collect()
  }

  #[test]
  fn test_partition_naming() {
    let tiers = manager(3);
    assert_eq!(tiers.partition(Tier::Api), "fieldsales-api-v3");
    assert_eq!(
      tiers.current_partitions(),
      vec![
        "fieldsales-static-v3",
        "fieldsales-runtime-v3",
        "fieldsales-api-v3",
        "fieldsales-images-v3"
      ]
    );
  }

  #[tokio::test]
  async fn test_install_precaches_resources() {
    let tiers = manager(1);
    let base = Url::parse("https://dash.test").unwrap();

    let cached = tiers
      .install(&base, &precache_paths(), |url| async move {
        Ok(FetchResponse::new(200, url.into_bytes()))
      })
      .await;

    assert_eq!(cached, 5);
    assert_eq!(tiers.store().count("fieldsales-static-v1").unwrap(), 5);

    let shell = tiers
      .store()
      .get_by_url("fieldsales-static-v1", "https://dash.test/")
      .unwrap();
    assert!(shell.is_some());
  }

  #[tokio::test]
  async fn test_install_continues_past_failures() {
    let tiers = manager(1);
    let base = Url::parse("https://dash.test").unwrap();

    // The manifest fetch fails and one icon 404s; everything else lands.
    let cached = tiers
      .install(&base, &precache_paths(), |url| async move {
        if url.ends_with("manifest.json") {
          Err(eyre!("connection refused"))
        } else if url.ends_with("icon-512.png") {
          Ok(FetchResponse::new(404, Vec::new()))
        } else {
          Ok(FetchResponse::new(200, b"ok".to_vec()))
        }
      })
      .await;

    assert_eq!(cached, 3);
    assert!(tiers
      .store()
      .get_by_url("fieldsales-static-v1", "https://dash.test/manifest.json")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_activate_drops_stale_partitions() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let old = TierManager::new(Arc::clone(&store), "fieldsales", 1);
    let new = TierManager::new(Arc::clone(&store), "fieldsales", 2);
    let base = Url::parse("https://dash.test").unwrap();

    old
      .install(&base, &precache_paths(), |url| async move {
        Ok(FetchResponse::new(200, url.into_bytes()))
      })
      .await;
    new
      .install(&base, &precache_paths(), |url| async move {
        Ok(FetchResponse::new(200, url.into_bytes()))
      })
      .await;

    let dropped = new.activate().unwrap();
    assert_eq!(dropped, vec!["fieldsales-static-v1".to_string()]);

    // Exhaustive cleanup: only current partitions remain.
    for name in store.partitions().unwrap() {
      assert!(new.current_partitions().contains(&name));
    }
  }
}
