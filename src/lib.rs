//! sitesync - resilience and synchronization layer for the site status
//! dashboard
//!
//! The dashboard applies edits to local state immediately and relies on this
//! crate to make them durable on a flaky backend: a per-operation circuit
//! breaker, a timed retrying request client, an optimistic mutation queue
//! that survives restarts, a chunked bulk sync that respects the backend's
//! execution-time budget, and a deterministic last-writer-wins conflict
//! resolver.
//!
//! Hosts construct one [`SyncService`] at startup and pass it by reference;
//! rendering, parsing, and auth live elsewhere and talk to this layer
//! through the [`KvStore`], [`Notifier`], and [`SyncEvents`] seams.

pub mod bulk;
pub mod circuit;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod notify;
pub mod queue;
pub mod resolver;
pub mod service;
pub mod storage;
pub mod types;

pub use circuit::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use client::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use client::{RequestClient, RequestOptions};
pub use config::{ClosedSuccessPolicy, SyncConfig};
pub use error::{Result, SyncError};
pub use events::{NoopEvents, SyncEvents};
pub use notify::{LogNotifier, NoopNotifier, Notifier, Severity};
pub use queue::types::{MutationItem, MutationStatus, QueueStatus};
pub use queue::MutationQueue;
pub use resolver::{ConflictResolver, Resolved};
pub use service::{SyncService, SyncServiceBuilder};
pub use storage::{KvStore, MemoryStore, SqliteStore};
pub use types::{ChunkProgress, ConflictEntry, Record, Resolution, SyncResult};
