//! Platform events consumed by the worker and messages posted back to
//! page clients.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::fetch::{FetchRequest, FetchResponse};
use crate::sync::SyncOutcome;

/// Platform events, one variant per callback the worker handles.
#[derive(Debug)]
pub enum WorkerEvent {
  /// Precache the critical resources
  Install,
  /// Purge stale partitions and claim open clients
  Activate,
  /// An intercepted request; the handled response travels back on `reply`
  Fetch {
    request: FetchRequest,
    reply: oneshot::Sender<Result<FetchResponse>>,
  },
  /// Background sync opportunity
  Sync { tag: String },
  /// Incoming push payload
  Push { payload: Vec<u8> },
  /// A displayed notification was clicked
  NotificationClick { url: String },
}

/// Structured message posted to page clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// One summary per sync attempt, carrying every per-item outcome
  #[serde(rename = "SYNC_COMPLETE")]
  SyncComplete { results: Vec<SyncOutcome> },
  /// The page is now controlled by the freshly activated worker
  #[serde(rename = "CLAIMED")]
  Claimed,
  /// Navigate in response to a notification click
  #[serde(rename = "NAVIGATE")]
  Navigate { url: String },
}

/// Registry of open page clients.
///
/// Broadcasts are best-effort: a message goes to every live client whether
/// or not anyone is listening, and clients that have gone away are dropped
/// on the next broadcast.
#[derive(Default)]
pub struct ClientHub {
  clients: Mutex<Vec<mpsc::UnboundedSender<ClientMessage>>>,
}

impl ClientHub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a page client; the receiver sees every later broadcast.
  pub fn register(&self) -> mpsc::UnboundedReceiver<ClientMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Ok(mut clients) = self.clients.lock() {
      clients.push(tx);
    }
    rx
  }

  /// Send a message to every live client. Returns how many received it.
  pub fn broadcast(&self, message: ClientMessage) -> usize {
    let Ok(mut clients) = self.clients.lock() else {
      return 0;
    };

    clients.retain(|tx| tx.send(message.clone()).is_ok());
    clients.len()
  }

  /// Claim all open clients immediately after activation, so the new
  /// worker logic governs in-flight pages without a reload.
  pub fn claim(&self) {
    let claimed = self.broadcast(ClientMessage::Claimed);
    info!(claimed, "claimed open clients");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::SyncError;

  #[test]
  fn test_broadcast_reaches_all_clients() {
    let hub = ClientHub::new();
    let mut a = hub.register();
    let mut b = hub.register();

    let delivered = hub.broadcast(ClientMessage::Claimed);
    assert_eq!(delivered, 2);
    assert_eq!(a.try_recv().unwrap(), ClientMessage::Claimed);
    assert_eq!(b.try_recv().unwrap(), ClientMessage::Claimed);
  }

  #[test]
  fn test_gone_clients_are_dropped() {
    let hub = ClientHub::new();
    let a = hub.register();
    let mut b = hub.register();
    drop(a);

    let delivered = hub.broadcast(ClientMessage::Navigate {
      url: "/dashboard".to_string(),
    });
    assert_eq!(delivered, 1);
    assert!(b.try_recv().is_ok());
  }

  #[test]
  fn test_broadcast_without_listeners_is_fine() {
    let hub = ClientHub::new();
    assert_eq!(hub.broadcast(ClientMessage::Claimed), 0);
  }

  #[test]
  fn test_sync_complete_wire_shape() {
    let message = ClientMessage::SyncComplete {
      results: vec![
        SyncOutcome {
          success: true,
          url: "https://dash.test/api/visits".to_string(),
          error: None,
        },
        SyncOutcome {
          success: false,
          url: "https://dash.test/api/orders".to_string(),
          error: Some(SyncError::Status(500)),
        },
      ],
    };

    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["type"], "SYNC_COMPLETE");
    assert_eq!(value["results"][0]["success"], true);
    assert!(value["results"][0].get("error").is_none());
    assert_eq!(value["results"][1]["error"], 500);
  }
}
