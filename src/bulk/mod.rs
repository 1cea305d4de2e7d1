//! Chunked bulk synchronization
//!
//! Re-syncing the whole dataset can mean tens of thousands of records, far
//! past the backend's per-invocation execution-time budget. The dataset is
//! partitioned into insertion-order chunks and sent strictly sequentially:
//! the backend enforces one time budget and rate ceiling per logical
//! transaction, and sequential sends keep partial-failure accounting
//! unambiguous.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;

use crate::client::transport::ApiRequest;
use crate::client::{RequestClient, RequestOptions};
use crate::config::BulkConfig;
use crate::error::SyncError;
use crate::events::SyncEvents;
use crate::types::{ChunkProgress, ConflictEntry, Resolution, SyncResult};

pub struct ChunkedBulkSync {
    client: Arc<RequestClient>,
    events: Arc<dyn SyncEvents>,
    config: BulkConfig,
    api_key: Option<String>,
}

impl ChunkedBulkSync {
    pub fn new(
        client: Arc<RequestClient>,
        events: Arc<dyn SyncEvents>,
        config: BulkConfig,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            events,
            config,
            api_key,
        }
    }

    /// Push `records` to the backend in chunks.
    ///
    /// A chunk-level failure marks that whole chunk failed and the loop
    /// continues, so partial progress is always preserved and reported.
    /// Duration is end-to-end, inclusive of inter-chunk delays.
    pub async fn sync_chunked(&self, records: &[(String, Value)]) -> Result<SyncResult, SyncError> {
        if self.config.chunk_size < 1 {
            return Err(SyncError::Validation(format!(
                "chunk size must be at least 1, got {}",
                self.config.chunk_size
            )));
        }

        if records.is_empty() {
            return Ok(SyncResult::empty());
        }

        let start_time = Utc::now();
        let started = Instant::now();
        let timestamp = start_time.to_rfc3339();

        let chunks: Vec<&[(String, Value)]> = records.chunks(self.config.chunk_size).collect();
        let total_chunks = chunks.len();

        let mut result = SyncResult::empty();
        result.start_time = start_time;
        result.total_items = records.len();
        result.total_chunks = total_chunks;

        tracing::info!(
            records = records.len(),
            chunks = total_chunks,
            chunk_size = self.config.chunk_size,
            "starting chunked sync"
        );

        for (index, chunk) in chunks.iter().enumerate() {
            let chunk_index = index + 1;

            match self.send_chunk(chunk, chunk_index, total_chunks, &timestamp).await {
                Ok(()) => {
                    result.processed_count += chunk.len();
                }
                Err(SyncError::Conflict(response)) => {
                    for conflict in &response.conflicts {
                        result.conflicts.push(ConflictEntry {
                            key: conflict.key.clone(),
                            resolution: Resolution::Manual,
                            local_value: None,
                            server_value: None,
                            reason: conflict
                                .reason
                                .clone()
                                .unwrap_or_else(|| "server reported conflict".to_string()),
                        });
                    }
                }
                Err(err) => {
                    result.failed_count += chunk.len();
                    tracing::error!(
                        chunk = chunk_index,
                        total = total_chunks,
                        error = %err,
                        "chunk failed, continuing with remaining chunks"
                    );
                }
            }

            let percent = ((chunk_index * 100) / total_chunks) as u8;
            self.events.on_progress(&ChunkProgress {
                chunk_index,
                total_chunks,
                percent,
                cumulative_processed: result.processed_count,
            });
            tracing::debug!(chunk = chunk_index, total = total_chunks, percent, "chunk done");

            // Rate spacing between chunks, skipped after the final one.
            if chunk_index < total_chunks {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
        }

        result.end_time = Utc::now();
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            processed = result.processed_count,
            failed = result.failed_count,
            conflicts = result.conflicts.len(),
            duration_ms = result.duration_ms,
            "chunked sync complete"
        );
        self.events.on_sync_complete(&result);

        Ok(result)
    }

    async fn send_chunk(
        &self,
        chunk: &[(String, Value)],
        chunk_index: usize,
        total_chunks: usize,
        timestamp: &str,
    ) -> Result<(), SyncError> {
        let chunk_object: serde_json::Map<String, Value> =
            chunk.iter().cloned().collect();

        let request = ApiRequest::new("syncChunk")
            .field("chunk", Value::Object(chunk_object))
            .field("chunkIndex", serde_json::json!(chunk_index))
            .field("totalChunks", serde_json::json!(total_chunks))
            .field("timestamp", serde_json::json!(timestamp))
            .with_api_key(self.api_key.as_deref());

        self.client
            .execute(&self.config.circuit_name, &request, &RequestOptions::default())
            .await
            .map(|_| ())
    }
}
