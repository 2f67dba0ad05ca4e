//! The offline worker: explicit lifecycle state machine and event dispatch.
//!
//! One owning task drains the platform event channel, so every cache and
//! queue mutation is serialized through a single place. Page clients talk
//! to the worker only via `WorkerEvent`s in and `ClientMessage`s out.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::{SqliteStore, TierManager};
use crate::config::Config;
use crate::event::{ClientHub, WorkerEvent};
use crate::fetch::{Fetch, FetchRequest, FetchResponse, NetworkClient};
use crate::notify::{Notification, NotificationGateway};
use crate::queue::OfflineQueue;
use crate::router::{classify, RouteClass};
use crate::strategy::StrategyLayer;
use crate::sync::{SyncCoordinator, SYNC_TAG};

/// Worker lifecycle, advanced explicitly by the dispatch functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Installing,
  Active,
  Redundant,
}

/// The offline worker. Owns the cache tiers, the offline queue, and the
/// client hub; generic over the network seam so tests can cut the wire.
pub struct Worker<N: Fetch> {
  config: Config,
  lifecycle: Lifecycle,
  net: Arc<N>,
  tiers: TierManager<SqliteStore>,
  strategies: StrategyLayer<SqliteStore>,
  coordinator: SyncCoordinator,
  notifier: NotificationGateway,
  hub: Arc<ClientHub>,
  /// Most recently displayed notification
  last_notification: Option<Notification>,
}

impl Worker<NetworkClient> {
  /// Build a worker over the configured durable stores and a real network
  /// client.
  pub fn new(config: Config) -> Result<Self> {
    let net = Arc::new(NetworkClient::new(config.request_timeout())?);
    let store = Arc::new(SqliteStore::open_at(&config.tiers_db_path()?)?);
    let queue = Arc::new(OfflineQueue::open_at(&config.queue_db_path()?)?);

    Self::with_parts(config, net, store, queue)
  }
}

impl<N: Fetch> Worker<N> {
  /// Build a worker from explicit parts. Tests inject in-memory stores and
  /// stub network clients here.
  pub fn with_parts(
    config: Config,
    net: Arc<N>,
    store: Arc<SqliteStore>,
    queue: Arc<OfflineQueue>,
  ) -> Result<Self> {
    let tiers = TierManager::new(store, &config.app, config.cache_version);
    let strategies = StrategyLayer::new(
      tiers.clone(),
      Arc::clone(&queue),
      config.ttls(),
      &config.root_url()?,
      &config.placeholder_url()?,
    );
    let coordinator = SyncCoordinator::new(queue);
    let notifier = NotificationGateway::new(&config.app, &config.placeholder_url()?);

    Ok(Self {
      config,
      lifecycle: Lifecycle::Installing,
      net,
      tiers,
      strategies,
      coordinator,
      notifier,
      hub: Arc::new(ClientHub::new()),
      last_notification: None,
    })
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  /// The hub page clients register with.
  pub fn clients(&self) -> Arc<ClientHub> {
    Arc::clone(&self.hub)
  }

  /// The most recently displayed notification, if any.
  pub fn last_notification(&self) -> Option<&Notification> {
    self.last_notification.as_ref()
  }

  /// Drain the platform event channel until it closes, then retire.
  pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
      self.dispatch(event).await;
    }

    self.lifecycle = Lifecycle::Redundant;
    info!("event channel closed, worker retired");
  }

  /// Handle one platform event. Errors are logged, never fatal to the
  /// worker loop.
  pub async fn dispatch(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Install => self.on_install().await,
      WorkerEvent::Activate => {
        if let Err(e) = self.on_activate() {
          error!(error = %e, "activate failed");
        }
      }
      WorkerEvent::Fetch { request, reply } => {
        let outcome = self.on_fetch(&request).await;
        // Receiver is gone if the page navigated away mid-request.
        let _ = reply.send(outcome);
      }
      WorkerEvent::Sync { tag } => {
        if let Err(e) = self.on_sync(&tag).await {
          error!(tag = %tag, error = %e, "sync replay failed");
        }
      }
      WorkerEvent::Push { payload } => self.on_push(&payload),
      WorkerEvent::NotificationClick { url } => self.on_notification_click(&url),
    }
  }

  async fn on_install(&mut self) {
    self.lifecycle = Lifecycle::Installing;
    let base = match self.config.base_url() {
      Ok(base) => base,
      Err(e) => {
        error!(error = %e, "install skipped");
        return;
      }
    };

    let net = Arc::clone(&self.net);
    self
      .tiers
      .install(&base, &self.config.precache, move |url| {
        let net = Arc::clone(&net);
        async move { net.fetch(&FetchRequest::get(&url)).await }
      })
      .await;
  }

  fn on_activate(&mut self) -> Result<()> {
    let dropped = self.tiers.activate()?;
    if !dropped.is_empty() {
      info!(dropped = dropped.len(), "purged stale cache partitions");
    }

    self.hub.claim();
    self.lifecycle = Lifecycle::Active;
    Ok(())
  }

  async fn on_fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let net = Arc::clone(&self.net);
    let outgoing = request.clone();
    let fetcher = move || async move { net.fetch(&outgoing).await };

    match classify(request, &self.config.api_prefix) {
      // Not ours (chrome-extension:, data:, ...): straight to the network,
      // uncached.
      None => {
        debug!(url = %request.url, "passing through unclassified request");
        self.net.fetch(request).await
      }
      Some(RouteClass::Api) => self.strategies.handle_api(request, fetcher).await,
      Some(RouteClass::Image) => self.strategies.handle_image(request, fetcher).await,
      Some(RouteClass::Asset) => self.strategies.handle_asset(request, fetcher).await,
      Some(RouteClass::Document) => self.strategies.handle_document(request, fetcher).await,
    }
  }

  async fn on_sync(&self, tag: &str) -> Result<()> {
    if tag != SYNC_TAG {
      debug!(tag, "ignoring unrelated sync event");
      return Ok(());
    }

    let net = Arc::clone(&self.net);
    let results = self
      .coordinator
      .replay(move |item| {
        let net = Arc::clone(&net);
        async move { net.fetch(&item.to_request()).await }
      })
      .await?;

    // Broadcast regardless of whether anyone is listening.
    self
      .hub
      .broadcast(crate::event::ClientMessage::SyncComplete { results });
    Ok(())
  }

  fn on_push(&mut self, payload: &[u8]) {
    let notification = self.notifier.notification_for(payload);
    info!(title = %notification.title, url = %notification.url, "displaying push notification");
    self.last_notification = Some(notification);
  }

  fn on_notification_click(&self, url: &str) {
    let delivered = self.hub.broadcast(self.notifier.click_message(url));
    if delivered == 0 {
      warn!(url, "notification click with no open clients");
    }
  }
}
