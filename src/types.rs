//! Shared sync data model
//!
//! Defines the record shape exchanged with the backend, the per-run result
//! summary, and conflict reporting. Wire fields use camelCase to match the
//! backend's JSON contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A synced entity. The shape is symmetric on the client and server sides;
/// the client owns its copy until the backend acknowledges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: serde_json::Value,
    /// Missing on legacy rows; treated as timestamp zero during conflict
    /// resolution, so it always loses to a timestamped counterpart.
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(key: &str, value: serde_json::Value, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.to_string(),
            value,
            updated_at,
        }
    }

    /// Timestamp in epoch milliseconds, zero when absent.
    pub fn updated_at_millis(&self) -> i64 {
        self.updated_at.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

/// Which side of a conflict won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ServerWins,
    LocalWins,
    /// Reported by the backend and left for a human-facing step; never
    /// auto-resolved by this layer.
    Manual,
}

/// One reconciled key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub key: String,
    pub resolution: Resolution,
    #[serde(rename = "localValue", skip_serializing_if = "Option::is_none")]
    pub local_value: Option<serde_json::Value>,
    #[serde(rename = "serverValue", skip_serializing_if = "Option::is_none")]
    pub server_value: Option<serde_json::Value>,
    pub reason: String,
}

/// Summary of one flush or bulk sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    #[serde(rename = "totalItems")]
    pub total_items: usize,
    #[serde(rename = "totalChunks")]
    pub total_chunks: usize,
    #[serde(rename = "processedCount")]
    pub processed_count: usize,
    #[serde(rename = "failedCount")]
    pub failed_count: usize,
    pub conflicts: Vec<ConflictEntry>,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    /// End-to-end duration, inclusive of inter-chunk delays.
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

impl SyncResult {
    /// A zero-valued result starting and ending now. Used for empty inputs
    /// and for a flush that found another flush already in progress.
    pub fn empty() -> Self {
        let now = Utc::now();
        SyncResult {
            total_items: 0,
            total_chunks: 0,
            processed_count: 0,
            failed_count: 0,
            conflicts: Vec::new(),
            start_time: now,
            end_time: now,
            duration_ms: 0,
        }
    }
}

/// Progress report fired after each chunk of a bulk sync
#[derive(Debug, Clone, Serialize)]
pub struct ChunkProgress {
    #[serde(rename = "chunkIndex")]
    pub chunk_index: usize,
    #[serde(rename = "totalChunks")]
    pub total_chunks: usize,
    pub percent: u8,
    /// Records delivered so far across all completed chunks.
    #[serde(rename = "cumulativeProcessed")]
    pub cumulative_processed: usize,
}
