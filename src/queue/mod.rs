//! Optimistic mutation queue
//!
//! A UI edit is applied to local state immediately, then enqueued here for
//! background delivery. The queue is persisted to the KV store after every
//! mutating operation, so pending edits survive a restart; delivery is
//! strict FIFO by enqueue time and items are never reordered, even across
//! retries.

pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::client::transport::{ApiRequest, ApiResponse};
use crate::client::{RequestClient, RequestOptions};
use crate::config::QueueConfig;
use crate::error::SyncError;
use crate::events::SyncEvents;
use crate::storage::KvStore;
use crate::types::{ConflictEntry, Resolution, SyncResult};

use types::{MutationItem, MutationStatus, QueueStatus};

pub struct MutationQueue {
    items: tokio::sync::Mutex<Vec<MutationItem>>,
    store: Arc<dyn KvStore>,
    client: Arc<RequestClient>,
    events: Arc<dyn SyncEvents>,
    flushing: AtomicBool,
    config: QueueConfig,
    api_key: Option<String>,
}

/// Clears the in-flight flag even if a flush errors out partway.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MutationQueue {
    pub fn new(
        store: Arc<dyn KvStore>,
        client: Arc<RequestClient>,
        events: Arc<dyn SyncEvents>,
        config: QueueConfig,
        api_key: Option<String>,
    ) -> Self {
        Self {
            items: tokio::sync::Mutex::new(Vec::new()),
            store,
            client,
            events,
            flushing: AtomicBool::new(false),
            config,
            api_key,
        }
    }

    /// Load the persisted queue. Items that were in flight when the process
    /// died are reset to pending, so a crash mid-delivery neither drops nor
    /// silently double-marks a mutation.
    pub async fn load(&self) -> Result<(), SyncError> {
        let saved = self
            .store
            .get(&self.config.queue_key)
            .await
            .map_err(SyncError::Storage)?;

        let Some(saved) = saved else {
            return Ok(());
        };

        let mut loaded: Vec<MutationItem> = match serde_json::from_str(&saved) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted queue");
                Vec::new()
            }
        };

        for item in &mut loaded {
            if item.status == MutationStatus::InFlight {
                item.status = MutationStatus::Pending;
            }
        }

        let count = loaded.len();
        *self.items.lock().await = loaded;
        if count > 0 {
            tracing::info!(items = count, "restored persisted mutation queue");
        }
        Ok(())
    }

    /// Append a mutation and persist the queue before returning.
    pub async fn enqueue(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<MutationItem, SyncError> {
        let item = MutationItem::new(action, payload);

        {
            let mut items = self.items.lock().await;
            items.push(item.clone());
        }
        self.persist().await?;

        tracing::debug!(action, id = %item.id, "mutation queued");
        Ok(item)
    }

    /// Deliver every pending item, strictly in enqueue order.
    ///
    /// Re-entrant-safe: a call arriving while a flush is in progress returns
    /// immediately with a zero result rather than queueing behind it.
    pub async fn flush(&self) -> Result<SyncResult, SyncError> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("flush already in progress, skipping");
            return Ok(SyncResult::empty());
        }
        let _guard = FlushGuard(&self.flushing);

        let pending_ids: Vec<String> = {
            let items = self.items.lock().await;
            items
                .iter()
                .filter(|i| i.status == MutationStatus::Pending)
                .map(|i| i.id.clone())
                .collect()
        };

        if pending_ids.is_empty() {
            return Ok(SyncResult::empty());
        }

        let start_time = Utc::now();
        let started = Instant::now();
        let mut result = SyncResult {
            total_items: pending_ids.len(),
            ..SyncResult::empty()
        };
        result.start_time = start_time;

        tracing::info!(items = pending_ids.len(), "flushing mutation queue");

        for id in pending_ids {
            // Mark in flight and persist so a crash here is visible on load.
            let Some((action, payload)) = self.mark_in_flight(&id).await? else {
                continue;
            };

            let request = self.build_request(&action, &payload);
            let options = RequestOptions {
                // The queue owns retry bookkeeping across flushes; each
                // delivery attempt is a single call.
                max_retries: Some(0),
                ..RequestOptions::default()
            };

            match self.client.execute(&action, &request, &options).await {
                Ok(_) => {
                    self.update_item(&id, |item| item.status = MutationStatus::Completed)
                        .await;
                    result.processed_count += 1;
                }
                Err(SyncError::Conflict(response)) => {
                    let item = self
                        .update_item(&id, |item| item.status = MutationStatus::Conflict)
                        .await;
                    result
                        .conflicts
                        .extend(conflict_entries(&id, &payload, &response));
                    if let Some(item) = item {
                        self.events.on_conflict(&item, &response);
                    }
                }
                Err(err) => {
                    let max_retries = self.config.max_retries;
                    let item = self
                        .update_item(&id, |item| {
                            item.retries += 1;
                            item.status = if item.retries >= max_retries {
                                MutationStatus::Failed
                            } else {
                                MutationStatus::Pending
                            };
                        })
                        .await;

                    if let Some(item) = item {
                        if item.status == MutationStatus::Failed {
                            result.failed_count += 1;
                            tracing::error!(
                                id = %item.id,
                                action = %item.action,
                                retries = item.retries,
                                "mutation failed permanently"
                            );
                            self.events.on_sync_error(&item, &err);
                        } else {
                            tracing::warn!(
                                id = %item.id,
                                retries = item.retries,
                                error = %err,
                                "mutation delivery failed, will retry next flush"
                            );
                        }
                    }
                }
            }
        }

        // Completed items leave the queue; everything else is retained.
        {
            let mut items = self.items.lock().await;
            items.retain(|i| i.status != MutationStatus::Completed);
        }
        let persisted = self.persist().await;

        result.end_time = Utc::now();
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            processed = result.processed_count,
            failed = result.failed_count,
            conflicts = result.conflicts.len(),
            "flush complete"
        );
        // The deliveries above already happened; report the completed flush
        // before surfacing a trailing persistence failure.
        self.events.on_sync_complete(&result);
        persisted?;

        Ok(result)
    }

    /// Queue counters plus the last-sync marker.
    pub async fn status(&self) -> QueueStatus {
        let last_sync = self
            .store
            .get(&self.config.last_sync_key)
            .await
            .unwrap_or_default();

        let items = self.items.lock().await;
        QueueStatus {
            pending: count(&items, MutationStatus::Pending),
            failed: count(&items, MutationStatus::Failed),
            conflicts: count(&items, MutationStatus::Conflict),
            total: items.len(),
            is_flushing: self.flushing.load(Ordering::SeqCst),
            last_sync,
        }
    }

    /// Drop every item, including failed and conflicted ones.
    pub async fn clear(&self) -> Result<(), SyncError> {
        self.items.lock().await.clear();
        self.persist().await?;
        tracing::info!("mutation queue cleared");
        Ok(())
    }

    /// Record the last successful sync marker.
    pub async fn set_last_sync(&self, marker: &str) -> Result<(), SyncError> {
        self.store
            .set(&self.config.last_sync_key, marker)
            .await
            .map_err(SyncError::Storage)
    }

    fn build_request(&self, action: &str, payload: &serde_json::Value) -> ApiRequest {
        let mut request = ApiRequest::new(action).with_api_key(self.api_key.as_deref());
        match payload {
            serde_json::Value::Object(map) => request.fields = map.clone(),
            other => {
                request.fields.insert("payload".to_string(), other.clone());
            }
        }
        request
    }

    /// Flip an item to in-flight and return its action and payload. Returns
    /// None if the item vanished (cleared mid-flush).
    async fn mark_in_flight(
        &self,
        id: &str,
    ) -> Result<Option<(String, serde_json::Value)>, SyncError> {
        let snapshot = {
            let mut items = self.items.lock().await;
            match items.iter_mut().find(|i| i.id == id) {
                Some(item) if item.status == MutationStatus::Pending => {
                    item.status = MutationStatus::InFlight;
                    Some((item.action.clone(), item.payload.clone()))
                }
                _ => None,
            }
        };

        if snapshot.is_some() {
            self.persist().await?;
        }
        Ok(snapshot)
    }

    /// Apply `update` to an item and return the updated copy.
    async fn update_item(
        &self,
        id: &str,
        update: impl FnOnce(&mut MutationItem),
    ) -> Option<MutationItem> {
        let mut items = self.items.lock().await;
        items.iter_mut().find(|i| i.id == id).map(|item| {
            update(item);
            item.clone()
        })
    }

    /// Serialize the whole queue to the KV store.
    async fn persist(&self) -> Result<(), SyncError> {
        let serialized = {
            let items = self.items.lock().await;
            serde_json::to_string(&*items)
                .map_err(|e| SyncError::Storage(anyhow::Error::new(e)))?
        };
        self.store
            .set(&self.config.queue_key, &serialized)
            .await
            .map_err(SyncError::Storage)
    }
}

fn count(items: &[MutationItem], status: MutationStatus) -> usize {
    items.iter().filter(|i| i.status == status).count()
}

/// Conflict rows for the flush result. The server may name specific keys;
/// a bare lock falls back to the item id.
fn conflict_entries(
    item_id: &str,
    payload: &serde_json::Value,
    response: &ApiResponse,
) -> Vec<ConflictEntry> {
    if response.conflicts.is_empty() {
        return vec![ConflictEntry {
            key: item_id.to_string(),
            resolution: Resolution::Manual,
            local_value: Some(payload.clone()),
            server_value: None,
            reason: "record locked on server".to_string(),
        }];
    }

    response
        .conflicts
        .iter()
        .map(|c| ConflictEntry {
            key: c.key.clone(),
            resolution: Resolution::Manual,
            local_value: Some(payload.clone()),
            server_value: None,
            reason: c
                .reason
                .clone()
                .unwrap_or_else(|| "server reported conflict".to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;

    use super::*;
    use crate::circuit::CircuitBreaker;
    use crate::client::transport::{RawResponse, ServerConflict, Transport, TransportError};
    use crate::config::RequestConfig;
    use crate::events::NoopEvents;
    use crate::notify::NoopNotifier;
    use crate::storage::MemoryStore;

    /// Backend stub driven by a list of canned outcomes, one per call.
    struct StubBackend {
        outcomes: PlMutex<Vec<Outcome>>,
        seen_actions: PlMutex<Vec<String>>,
        calls: AtomicUsize,
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    #[derive(Clone)]
    enum Outcome {
        Success,
        Locked,
        ServerError,
    }

    impl StubBackend {
        fn new(outcomes: Vec<Outcome>) -> Self {
            Self {
                outcomes: PlMutex::new(outcomes),
                seen_actions: PlMutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(outcomes: Vec<Outcome>, gate: Arc<tokio::sync::Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(outcomes)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for StubBackend {
        async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.unwrap();
                permit.forget();
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_actions.lock().push(request.action.clone());

            let outcome = {
                let mut outcomes = self.outcomes.lock();
                if outcomes.is_empty() {
                    Outcome::Success
                } else {
                    outcomes.remove(0)
                }
            };

            match outcome {
                Outcome::Success => Ok(RawResponse {
                    status: 200,
                    retry_after_secs: None,
                    body: Some(ApiResponse {
                        success: true,
                        ..ApiResponse::default()
                    }),
                }),
                Outcome::Locked => Ok(RawResponse {
                    status: 200,
                    retry_after_secs: None,
                    body: Some(ApiResponse {
                        success: false,
                        is_locked: true,
                        conflicts: vec![ServerConflict {
                            key: "A-X1".into(),
                            reason: Some("locked by admin".into()),
                        }],
                        ..ApiResponse::default()
                    }),
                }),
                Outcome::ServerError => Ok(RawResponse {
                    status: 500,
                    retry_after_secs: None,
                    body: None,
                }),
            }
        }
    }

    /// KV store that starts rejecting writes after a set number of successes.
    struct FailingStore {
        inner: MemoryStore,
        writes_left: AtomicUsize,
    }

    impl FailingStore {
        fn after(successful_writes: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                writes_left: AtomicUsize::new(successful_writes),
            }
        }
    }

    #[async_trait]
    impl KvStore for FailingStore {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            let remaining = self.writes_left.load(Ordering::SeqCst);
            if remaining == 0 {
                anyhow::bail!("disk full");
            }
            self.writes_left.store(remaining - 1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key).await
        }
    }

    /// Counts each callback so tests can assert exactly-once semantics.
    #[derive(Default)]
    struct CountingEvents {
        conflicts: AtomicUsize,
        completions: AtomicUsize,
        errors: AtomicUsize,
    }

    impl SyncEvents for CountingEvents {
        fn on_conflict(&self, _item: &MutationItem, _response: &ApiResponse) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_sync_complete(&self, _result: &SyncResult) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
        fn on_sync_error(&self, _item: &MutationItem, _error: &SyncError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue_with(
        transport: Arc<dyn Transport>,
        store: Arc<dyn KvStore>,
        events: Arc<dyn SyncEvents>,
    ) -> MutationQueue {
        let client = Arc::new(RequestClient::new(
            transport,
            Arc::new(CircuitBreaker::default()),
            Arc::new(NoopNotifier),
            RequestConfig {
                timeout: Duration::from_secs(5),
                max_retries: 0,
                retry_delay: Duration::from_millis(1),
            },
        ));
        MutationQueue::new(store, client, events, QueueConfig::default(), None)
    }

    #[tokio::test]
    async fn enqueue_persists_and_flush_delivers_fifo() {
        let backend = Arc::new(StubBackend::new(vec![]));
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(backend.clone(), store.clone(), Arc::new(NoopEvents));

        queue
            .enqueue("updateRecord", serde_json::json!({"key": "A-X1"}))
            .await
            .unwrap();
        queue
            .enqueue("bulkUpdate", serde_json::json!({"keys": ["A-X2"]}))
            .await
            .unwrap();

        // Persisted before flush.
        let saved = store.get("sync_queue").await.unwrap().unwrap();
        assert!(saved.contains("updateRecord"));

        let result = queue.flush().await.unwrap();
        assert_eq!(result.total_items, 2);
        assert_eq!(result.processed_count, 2);
        assert_eq!(result.failed_count, 0);
        assert_eq!(
            *backend.seen_actions.lock(),
            vec!["updateRecord".to_string(), "bulkUpdate".to_string()]
        );

        // Completed items are dropped from the queue and from storage.
        let status = queue.status().await;
        assert_eq!(status.total, 0);
        let saved = store.get("sync_queue").await.unwrap().unwrap();
        assert_eq!(saved, "[]");
    }

    #[tokio::test]
    async fn failures_retry_across_flushes_then_go_terminal() {
        // Every delivery attempt fails.
        let backend = Arc::new(StubBackend::new(vec![
            Outcome::ServerError,
            Outcome::ServerError,
            Outcome::ServerError,
        ]));
        let events = Arc::new(CountingEvents::default());
        let queue = queue_with(
            backend.clone(),
            Arc::new(MemoryStore::new()),
            events.clone(),
        );

        queue
            .enqueue("updateRecord", serde_json::json!({"key": "A-X1"}))
            .await
            .unwrap();

        // Default max_retries = 3: two failing flushes leave it pending.
        queue.flush().await.unwrap();
        queue.flush().await.unwrap();
        assert_eq!(queue.status().await.pending, 1);
        assert_eq!(events.errors.load(Ordering::SeqCst), 0);

        // Third failure is terminal.
        let result = queue.flush().await.unwrap();
        assert_eq!(result.failed_count, 1);
        let status = queue.status().await;
        assert_eq!(status.pending, 0);
        assert_eq!(status.failed, 1);
        assert_eq!(events.errors.load(Ordering::SeqCst), 1);

        // Failed items are excluded from subsequent flushes.
        let calls_before = backend.calls();
        let result = queue.flush().await.unwrap();
        assert_eq!(result.total_items, 0);
        assert_eq!(backend.calls(), calls_before);
    }

    #[tokio::test]
    async fn conflicts_are_terminal_and_fire_callback_once() {
        let backend = Arc::new(StubBackend::new(vec![Outcome::Locked]));
        let events = Arc::new(CountingEvents::default());
        let queue = queue_with(
            backend.clone(),
            Arc::new(MemoryStore::new()),
            events.clone(),
        );

        queue
            .enqueue("updateRecord", serde_json::json!({"key": "A-X1"}))
            .await
            .unwrap();

        let result = queue.flush().await.unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].key, "A-X1");
        assert_eq!(result.conflicts[0].resolution, Resolution::Manual);
        assert_eq!(events.conflicts.load(Ordering::SeqCst), 1);

        // Never auto-retried.
        let calls_before = backend.calls();
        queue.flush().await.unwrap();
        assert_eq!(backend.calls(), calls_before);
        assert_eq!(queue.status().await.conflicts, 1);
        assert_eq!(events.conflicts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_callback_fires_even_when_final_persist_fails() {
        let backend = Arc::new(StubBackend::new(vec![]));
        let events = Arc::new(CountingEvents::default());
        // Budget covers the enqueue persist and the in-flight persist; the
        // trailing persist at the end of the flush fails.
        let store = Arc::new(FailingStore::after(2));
        let queue = queue_with(backend.clone(), store, events.clone());

        queue
            .enqueue("updateRecord", serde_json::json!({"key": "A-X1"}))
            .await
            .unwrap();

        let err = queue.flush().await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));

        // The mutation was delivered and the completed flush was reported.
        assert_eq!(backend.calls(), 1);
        assert_eq!(events.completions.load(Ordering::SeqCst), 1);
        assert_eq!(queue.status().await.total, 0);
    }

    #[tokio::test]
    async fn overlapping_flush_returns_zero_without_double_delivery() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let backend = Arc::new(StubBackend::gated(vec![], gate.clone()));
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(queue_with(backend.clone(), store, Arc::new(NoopEvents)));

        queue
            .enqueue("updateRecord", serde_json::json!({"key": "A-X1"}))
            .await
            .unwrap();

        // First flush blocks inside the transport on the gate.
        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.flush().await.unwrap() })
        };
        tokio::task::yield_now().await;
        while !queue.status().await.is_flushing {
            tokio::task::yield_now().await;
        }

        // Second flush must bail out immediately.
        let second = queue.flush().await.unwrap();
        assert_eq!(second.total_items, 0);
        assert_eq!(second.processed_count, 0);

        gate.add_permits(1);
        let first = first.await.unwrap();
        assert_eq!(first.processed_count, 1);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn load_resets_in_flight_items_to_pending() {
        let store = Arc::new(MemoryStore::new());

        let mut stuck = MutationItem::new("updateRecord", serde_json::json!({"key": "A-X1"}));
        stuck.status = MutationStatus::InFlight;
        let completed_later = MutationItem::new("bulkUpdate", serde_json::json!({}));
        store
            .set(
                "sync_queue",
                &serde_json::to_string(&vec![stuck, completed_later]).unwrap(),
            )
            .await
            .unwrap();

        let backend = Arc::new(StubBackend::new(vec![]));
        let queue = queue_with(backend, store, Arc::new(NoopEvents));
        queue.load().await.unwrap();

        let status = queue.status().await;
        assert_eq!(status.pending, 2);
        assert_eq!(status.total, 2);
    }

    #[tokio::test]
    async fn clear_empties_queue_and_storage() {
        let backend = Arc::new(StubBackend::new(vec![]));
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(backend, store.clone(), Arc::new(NoopEvents));

        queue
            .enqueue("updateRecord", serde_json::json!({"key": "A-X1"}))
            .await
            .unwrap();
        queue.clear().await.unwrap();

        assert_eq!(queue.status().await.total, 0);
        assert_eq!(
            store.get("sync_queue").await.unwrap().as_deref(),
            Some("[]")
        );
    }
}
