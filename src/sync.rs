//! Sync coordinator: replays the offline queue when connectivity returns.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fetch::FetchResponse;
use crate::queue::{OfflineQueue, QueuedRequest};

/// Tag of the platform background-sync event that triggers replay.
pub const SYNC_TAG: &str = "sync-offline-queue";

/// Why a replay attempt failed: an HTTP status or an exception message.
/// Serializes untagged, matching the `string|number` error field on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncError {
  Status(u16),
  Message(String),
}

/// Outcome of one replay attempt. Ephemeral: broadcast, then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
  pub success: bool,
  pub url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<SyncError>,
}

/// Drains the offline queue through direct network calls.
///
/// The whole queue is attempted on every trigger; there is no backoff and
/// no checkpointing. Outcomes are correlated with queue rows by their
/// durable id, never by position, so a successful item is removed exactly
/// once regardless of completion order.
pub struct SyncCoordinator {
  queue: Arc<OfflineQueue>,
}

impl SyncCoordinator {
  pub fn new(queue: Arc<OfflineQueue>) -> Self {
    Self { queue }
  }

  /// Replay every queued request via the given closure.
  ///
  /// Per-item outcomes are independent: an OK response removes the row, a
  /// non-OK response records its status and keeps the row for the next
  /// sync, and a network exception records its message and keeps the row.
  pub async fn replay<F, Fut>(&self, replayer: F) -> Result<Vec<SyncOutcome>>
  where
    F: Fn(QueuedRequest) -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    let items = self.queue.list_all()?;
    if items.is_empty() {
      debug!("offline queue empty, nothing to sync");
      return Ok(Vec::new());
    }

    info!(pending = items.len(), "replaying offline queue");

    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
      let url = item.url.clone();
      let id = item.id;

      let outcome = match replayer(item).await {
        Ok(response) if response.is_ok() => {
          if let Some(id) = id {
            if let Err(e) = self.queue.remove(id) {
              warn!(id, error = %e, "replayed request could not be removed from queue");
            }
          }
          SyncOutcome {
            success: true,
            url,
            error: None,
          }
        }
        Ok(response) => {
          debug!(url = %url, status = response.status, "replay rejected by server, keeping queued");
          SyncOutcome {
            success: false,
            url,
            error: Some(SyncError::Status(response.status)),
          }
        }
        Err(e) => {
          debug!(url = %url, error = %e, "replay failed, keeping queued");
          SyncOutcome {
            success: false,
            url,
            error: Some(SyncError::Message(e.to_string())),
          }
        }
      };

      outcomes.push(outcome);
    }

    let succeeded = outcomes.iter().filter(|o| o.success).count();
    info!(succeeded, failed = outcomes.len() - succeeded, "offline queue replay complete");

    Ok(outcomes)
  }
}
