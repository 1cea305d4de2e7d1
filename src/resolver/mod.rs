//! Conflict resolution
//!
//! Deterministically reconciles two snapshots of the same keyspace using
//! last-writer-wins at the granularity of a single record. Pure: inputs are
//! never mutated, so it is safe to call speculatively for a dry-run diff.

use std::collections::HashMap;

use crate::types::{ConflictEntry, Record, Resolution};

/// Outcome of reconciling a keyspace
#[derive(Debug, Clone)]
pub struct Resolved {
    pub resolved: HashMap<String, Record>,
    pub conflicts: Vec<ConflictEntry>,
}

/// Timestamp-based resolver.
///
/// Edits whose timestamps fall within `same_edit_window_ms` of each other
/// are treated as the same edit, with the server copy taken as canonical.
pub struct ConflictResolver {
    same_edit_window_ms: i64,
}

impl ConflictResolver {
    pub fn new(same_edit_window_ms: i64) -> Self {
        Self {
            same_edit_window_ms,
        }
    }

    /// Reconcile local and server snapshots.
    ///
    /// Per key: local-only records are kept (new, server not yet aware);
    /// server-only records are kept (discovered from elsewhere); records in
    /// both compare `updated_at`, and the newer side wins with a conflict
    /// entry recorded. A record without `updated_at` reads as timestamp
    /// zero, so it always loses to a timestamped counterpart; fresher
    /// metadata is preferred over missing metadata.
    pub fn resolve(
        &self,
        local: &HashMap<String, Record>,
        server: &HashMap<String, Record>,
    ) -> Resolved {
        let mut resolved = HashMap::with_capacity(local.len().max(server.len()));
        let mut conflicts = Vec::new();

        for (key, local_record) in local {
            let Some(server_record) = server.get(key) else {
                resolved.insert(key.clone(), local_record.clone());
                continue;
            };

            let local_time = local_record.updated_at_millis();
            let server_time = server_record.updated_at_millis();

            if (local_time - server_time).abs() < self.same_edit_window_ms {
                // Same edit seen from both sides; server copy is canonical.
                resolved.insert(key.clone(), server_record.clone());
            } else if server_time > local_time {
                conflicts.push(ConflictEntry {
                    key: key.clone(),
                    resolution: Resolution::ServerWins,
                    local_value: Some(local_record.value.clone()),
                    server_value: Some(server_record.value.clone()),
                    reason: "server data is newer".to_string(),
                });
                resolved.insert(key.clone(), server_record.clone());
            } else {
                conflicts.push(ConflictEntry {
                    key: key.clone(),
                    resolution: Resolution::LocalWins,
                    local_value: Some(local_record.value.clone()),
                    server_value: Some(server_record.value.clone()),
                    reason: "local data is newer".to_string(),
                });
                resolved.insert(key.clone(), local_record.clone());
            }
        }

        for (key, server_record) in server {
            if !local.contains_key(key) {
                resolved.insert(key.clone(), server_record.clone());
            }
        }

        Resolved { resolved, conflicts }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(key: &str, value: i64, millis: Option<i64>) -> Record {
        Record::new(
            key,
            serde_json::json!({"v": value}),
            millis.map(|ms| Utc.timestamp_millis_opt(ms).unwrap()),
        )
    }

    fn snapshot(records: Vec<Record>) -> HashMap<String, Record> {
        records.into_iter().map(|r| (r.key.clone(), r)).collect()
    }

    #[test]
    fn local_only_and_server_only_keys_pass_through() {
        let resolver = ConflictResolver::default();
        let local = snapshot(vec![record("A-X1", 1, Some(5_000))]);
        let server = snapshot(vec![record("B-Y2", 2, Some(6_000))]);

        let out = resolver.resolve(&local, &server);

        assert_eq!(out.resolved.len(), 2);
        assert_eq!(out.resolved["A-X1"].value["v"], 1);
        assert_eq!(out.resolved["B-Y2"].value["v"], 2);
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn server_newer_wins_with_reason() {
        let resolver = ConflictResolver::default();
        let t = 1_700_000_000_000;
        let local = snapshot(vec![record("A-X1", 1, Some(t))]);
        let server = snapshot(vec![record("A-X1", 2, Some(t + 2_000))]);

        let out = resolver.resolve(&local, &server);

        assert_eq!(out.resolved["A-X1"].value["v"], 2);
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].resolution, Resolution::ServerWins);
        assert_eq!(out.conflicts[0].reason, "server data is newer");
    }

    #[test]
    fn local_newer_wins_with_reason() {
        let resolver = ConflictResolver::default();
        let t = 1_700_000_000_000;
        let local = snapshot(vec![record("A-X1", 1, Some(t + 5_000))]);
        let server = snapshot(vec![record("A-X1", 2, Some(t))]);

        let out = resolver.resolve(&local, &server);

        assert_eq!(out.resolved["A-X1"].value["v"], 1);
        assert_eq!(out.conflicts[0].resolution, Resolution::LocalWins);
        assert_eq!(out.conflicts[0].reason, "local data is newer");
    }

    #[test]
    fn near_simultaneous_edits_take_server_without_conflict() {
        let resolver = ConflictResolver::default();
        let t = 1_700_000_000_000;
        let local = snapshot(vec![record("A-X1", 1, Some(t))]);
        let server = snapshot(vec![record("A-X1", 2, Some(t + 999))]);

        let out = resolver.resolve(&local, &server);

        assert_eq!(out.resolved["A-X1"].value["v"], 2);
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn missing_timestamp_always_loses() {
        let resolver = ConflictResolver::default();
        let local = snapshot(vec![record("A-X1", 1, None)]);
        let server = snapshot(vec![record("A-X1", 2, Some(1_700_000_000_000))]);

        let out = resolver.resolve(&local, &server);

        assert_eq!(out.resolved["A-X1"].value["v"], 2);
        assert_eq!(out.conflicts[0].resolution, Resolution::ServerWins);
    }

    #[test]
    fn every_input_key_appears_in_output() {
        let resolver = ConflictResolver::default();
        let local = snapshot(vec![
            record("A-X1", 1, Some(1_000)),
            record("A-X2", 1, Some(2_000)),
            record("A-X3", 1, None),
        ]);
        let server = snapshot(vec![
            record("A-X2", 2, Some(9_000)),
            record("A-X4", 2, Some(3_000)),
        ]);

        let out = resolver.resolve(&local, &server);

        for key in ["A-X1", "A-X2", "A-X3", "A-X4"] {
            assert!(out.resolved.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn resolve_is_idempotent_against_unchanged_server() {
        let resolver = ConflictResolver::default();
        let local = snapshot(vec![
            record("A-X1", 1, Some(10_000)),
            record("A-X2", 1, Some(1_000)),
        ]);
        let server = snapshot(vec![
            record("A-X1", 2, Some(1_000)),
            record("A-X2", 2, Some(10_000)),
            record("A-X3", 2, Some(5_000)),
        ]);

        let first = resolver.resolve(&local, &server);
        let second = resolver.resolve(&first.resolved, &server);

        assert_eq!(first.resolved, second.resolved);
    }

    #[test]
    fn inputs_are_never_mutated() {
        let resolver = ConflictResolver::default();
        let local = snapshot(vec![record("A-X1", 1, Some(1_000))]);
        let server = snapshot(vec![record("A-X1", 2, Some(9_000))]);
        let local_before = local.clone();
        let server_before = server.clone();

        resolver.resolve(&local, &server);

        assert_eq!(local, local_before);
        assert_eq!(server, server_before);
    }
}
