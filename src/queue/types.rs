//! Mutation queue data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a queued mutation.
///
/// Status is monotone: pending may loop back to pending with an extra retry,
/// otherwise it only moves forward to completed, conflict, or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    /// Delivery attempt underway. Persisted so a crash mid-delivery is
    /// visible on reload; never survives a load, which resets it to pending.
    InFlight,
    Completed,
    /// Terminal. The server holds a lock or reported a conflict; resolution
    /// is an external, human-facing step.
    Conflict,
    /// Terminal after max retries.
    Failed,
}

/// One optimistic local edit awaiting delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationItem {
    pub id: String,
    /// Backend action tag; also names the circuit guarding its delivery.
    pub action: String,
    pub payload: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub retries: u32,
    pub status: MutationStatus,
}

impl MutationItem {
    pub fn new(action: &str, payload: serde_json::Value) -> Self {
        Self {
            id: format!("sync_{}", Uuid::new_v4()),
            action: action.to_string(),
            payload,
            created_at: Utc::now(),
            retries: 0,
            status: MutationStatus::Pending,
        }
    }
}

/// Queue counters for the host UI
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub total: usize,
    #[serde(rename = "isFlushing")]
    pub is_flushing: bool,
    /// Last successful sync marker, as stored.
    #[serde(rename = "lastSync", skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}
