//! Sync service wiring
//!
//! Explicitly constructed root object holding the circuit registry, request
//! client, mutation queue, and bulk sync for the process lifetime. Hosts
//! build one at startup and pass it by reference to collaborators; there is
//! no ambient global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::bulk::ChunkedBulkSync;
use crate::circuit::{CircuitBreaker, CircuitSnapshot, CircuitState};
use crate::client::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::client::{RequestClient, RequestOptions};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{NoopEvents, SyncEvents};
use crate::notify::{NoopNotifier, Notifier};
use crate::queue::types::{MutationItem, QueueStatus};
use crate::queue::MutationQueue;
use crate::resolver::{ConflictResolver, Resolved};
use crate::storage::KvStore;
use crate::types::{Record, SyncResult};

/// Circuit guarding full-snapshot fetches.
const FETCH_CIRCUIT: &str = "fetch_full_data";

pub struct SyncService {
    config: SyncConfig,
    breaker: Arc<CircuitBreaker>,
    client: Arc<RequestClient>,
    queue: MutationQueue,
    bulk: ChunkedBulkSync,
    resolver: ConflictResolver,
    auto_sync: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Collaborators injected at construction. Defaults are no-ops so tests and
/// headless hosts only wire what they need.
pub struct SyncServiceBuilder {
    config: SyncConfig,
    store: Arc<dyn KvStore>,
    transport: Option<Arc<dyn Transport>>,
    events: Arc<dyn SyncEvents>,
    notifier: Arc<dyn Notifier>,
}

impl SyncServiceBuilder {
    pub fn new(config: SyncConfig, store: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            store,
            transport: None,
            events: Arc::new(NoopEvents),
            notifier: Arc::new(NoopNotifier),
        }
    }

    /// Override the default HTTP transport, e.g. with a test double.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn events(mut self, events: Arc<dyn SyncEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> SyncService {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(&self.config.endpoint)));
        let breaker = Arc::new(CircuitBreaker::new(self.config.circuit.clone()));
        let client = Arc::new(RequestClient::new(
            transport,
            breaker.clone(),
            self.notifier,
            self.config.request.clone(),
        ));
        let queue = MutationQueue::new(
            self.store,
            client.clone(),
            self.events.clone(),
            self.config.queue.clone(),
            self.config.api_key.clone(),
        );
        let bulk = ChunkedBulkSync::new(
            client.clone(),
            self.events,
            self.config.bulk.clone(),
            self.config.api_key.clone(),
        );

        SyncService {
            config: self.config,
            breaker,
            client,
            queue,
            bulk,
            resolver: ConflictResolver::default(),
            auto_sync: parking_lot::Mutex::new(None),
        }
    }
}

impl SyncService {
    pub fn builder(config: SyncConfig, store: Arc<dyn KvStore>) -> SyncServiceBuilder {
        SyncServiceBuilder::new(config, store)
    }

    /// Restore persisted state. Call once at startup, before first use.
    pub async fn init(&self) -> Result<(), SyncError> {
        self.queue.load().await?;
        tracing::info!(endpoint = %self.config.endpoint, "sync service initialized");
        Ok(())
    }

    // ----- optimistic queue -----

    /// Queue a locally-applied mutation for background delivery.
    pub async fn enqueue(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<MutationItem, SyncError> {
        self.queue.enqueue(action, payload).await
    }

    /// Deliver pending mutations now.
    pub async fn flush(&self) -> Result<SyncResult, SyncError> {
        self.queue.flush().await
    }

    pub async fn queue_status(&self) -> QueueStatus {
        self.queue.status().await
    }

    pub async fn clear_queue(&self) -> Result<(), SyncError> {
        self.queue.clear().await
    }

    // ----- bulk sync -----

    /// Push a large keyed dataset in backend-safe chunks.
    pub async fn sync_chunked(
        &self,
        records: &[(String, Value)],
    ) -> Result<SyncResult, SyncError> {
        self.bulk.sync_chunked(records).await
    }

    // ----- snapshot fetch & reconciliation -----

    /// Pull the full dataset from the backend and record the last-sync
    /// marker on success.
    pub async fn fetch_from_server(&self) -> Result<ApiResponse, SyncError> {
        let request =
            ApiRequest::new("getFullData").with_api_key(self.config.api_key.as_deref());
        let response = self
            .client
            .execute(FETCH_CIRCUIT, &request, &RequestOptions::default())
            .await?;

        self.queue.set_last_sync(&Utc::now().to_rfc3339()).await?;
        Ok(response)
    }

    /// Merge a local snapshot with a server snapshot, last-writer-wins.
    pub fn resolve(
        &self,
        local: &HashMap<String, Record>,
        server: &HashMap<String, Record>,
    ) -> Resolved {
        self.resolver.resolve(local, server)
    }

    // ----- auto-sync timer -----

    /// Start the background flush timer. Idempotent; a second call while
    /// running does nothing.
    pub fn start_auto_sync(self: &Arc<Self>) {
        let mut slot = self.auto_sync.lock();
        if slot.is_some() {
            return;
        }

        let service = self.clone();
        // tokio::time::interval panics on a zero period; a zero config means
        // "as often as possible", not "crash the timer task".
        let interval = self
            .config
            .queue
            .sync_interval
            .max(Duration::from_millis(1));
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the initial flush
            // happens one full interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = service.flush().await {
                    tracing::warn!(error = %e, "auto-sync flush failed");
                }
            }
        }));
        tracing::info!(interval_ms = interval.as_millis() as u64, "auto-sync started");
    }

    /// Stop the background flush timer, if running.
    pub fn stop_auto_sync(&self) {
        if let Some(handle) = self.auto_sync.lock().take() {
            handle.abort();
            tracing::info!("auto-sync stopped");
        }
    }

    // ----- circuit inspection -----

    pub fn circuit_state(&self, name: &str) -> CircuitState {
        self.breaker.state(name)
    }

    pub fn circuit_states(&self) -> HashMap<String, CircuitSnapshot> {
        self.breaker.all_states()
    }

    pub fn reset_circuit(&self, name: &str) {
        self.breaker.reset(name)
    }

    pub fn reset_all_circuits(&self) {
        self.breaker.reset_all()
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_sync.lock().take() {
            handle.abort();
        }
    }
}
