//! Notification gateway: push display and click routing.

use serde::Deserialize;
use tracing::debug;

use crate::event::ClientMessage;

/// Push payload as sent by the backend. Every field is optional on the
/// wire; malformed payloads degrade to a generic notification.
#[derive(Debug, Clone, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  url: Option<String>,
}

/// A notification ready for display by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  /// Where a click should take the user
  pub url: String,
}

/// Builds notifications from push payloads and routes clicks.
pub struct NotificationGateway {
  app_title: String,
  default_icon: String,
}

impl NotificationGateway {
  pub fn new(app_title: &str, default_icon: &str) -> Self {
    Self {
      app_title: app_title.to_string(),
      default_icon: default_icon.to_string(),
    }
  }

  /// Turn a raw push payload into a displayable notification, filling in
  /// defaults for anything missing or unparsable.
  pub fn notification_for(&self, payload: &[u8]) -> Notification {
    let parsed: PushPayload = match serde_json::from_slice(payload) {
      Ok(parsed) => parsed,
      Err(e) => {
        debug!(error = %e, "unparsable push payload, using generic notification");
        PushPayload {
          title: None,
          body: None,
          icon: None,
          url: None,
        }
      }
    };

    Notification {
      title: parsed.title.unwrap_or_else(|| self.app_title.clone()),
      body: parsed.body.unwrap_or_else(|| "You have a new update".to_string()),
      icon: parsed.icon.unwrap_or_else(|| self.default_icon.clone()),
      url: parsed.url.unwrap_or_else(|| "/".to_string()),
    }
  }

  /// A click navigates the focused (or newly opened) client to the
  /// notification's target.
  pub fn click_message(&self, url: &str) -> ClientMessage {
    ClientMessage::Navigate {
      url: url.to_string(),
    }
  }
}
