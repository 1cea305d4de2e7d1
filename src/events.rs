//! Sync lifecycle callbacks
//!
//! Hooks for the host UI: each fires exactly once per logical outcome and
//! must never itself trigger a retry. Defaults are no-ops so hosts override
//! only what they care about.

use crate::client::transport::ApiResponse;
use crate::error::SyncError;
use crate::queue::types::MutationItem;
use crate::types::{ChunkProgress, SyncResult};

pub trait SyncEvents: Send + Sync {
    /// The server reported a lock or conflict for a queued mutation. The
    /// item is terminal; resolution is a human-facing step.
    fn on_conflict(&self, _item: &MutationItem, _response: &ApiResponse) {}

    /// A flush or bulk sync finished, successfully or not.
    fn on_sync_complete(&self, _result: &SyncResult) {}

    /// A queued mutation exhausted its retries.
    fn on_sync_error(&self, _item: &MutationItem, _error: &SyncError) {}

    /// One bulk-sync chunk finished.
    fn on_progress(&self, _progress: &ChunkProgress) {}
}

/// Default: no callbacks.
pub struct NoopEvents;

impl SyncEvents for NoopEvents {}
