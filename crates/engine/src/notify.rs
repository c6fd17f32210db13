//! Commit notification.
//!
//! After an append is durable per its partition's policy and the local
//! highwater has advanced, every registered [`CommitSink`] hears about it.
//! Sink failures are logged and counted; they never undo the append. A
//! highwater that failed to advance is reported the same way.

use parking_lot::RwLock;
use std::sync::Arc;
use tideline_core::{PartitionStatus, VersionedPartitionName};
use tracing::warn;

/// Error reported by a commit sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Commit sink failed: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    /// Build from any message
    pub fn new(msg: impl Into<String>) -> Self {
        SinkError(msg.into())
    }
}

/// Listener for committed transactions (replication fan-out, change feeds).
pub trait CommitSink: Send + Sync {
    /// Called once per committed batch.
    fn on_commit(
        &self,
        partition: &VersionedPartitionName,
        status: PartitionStatus,
        tx_id: u64,
    ) -> Result<(), SinkError>;
}

/// Result of a commit, including how notification went.
///
/// The batch is in the WAL whenever an outcome exists; the other fields
/// report what happened after the append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Transaction id assigned to the batch
    pub tx_id: u64,
    /// Sinks that accepted the notification
    pub notified: usize,
    /// Sinks that failed
    pub failed: usize,
    /// Why the local highwater did not advance to `tx_id`, if it didn't
    pub highwater_error: Option<String>,
}

impl CommitOutcome {
    /// True when every sink accepted the notification
    pub fn fully_notified(&self) -> bool {
        self.failed == 0
    }

    /// True when the local highwater advanced to `tx_id`
    pub fn highwater_advanced(&self) -> bool {
        self.highwater_error.is_none()
    }
}

/// Registered commit sinks.
#[derive(Default)]
pub struct CommitNotifier {
    sinks: RwLock<Vec<Arc<dyn CommitSink>>>,
}

impl CommitNotifier {
    /// No sinks
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn register(&self, sink: Arc<dyn CommitSink>) {
        self.sinks.write().push(sink);
    }

    /// Number of registered sinks
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// True when no sink is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every sink. Returns the outcome for `tx_id`.
    pub fn notify(
        &self,
        partition: &VersionedPartitionName,
        status: PartitionStatus,
        tx_id: u64,
    ) -> CommitOutcome {
        let sinks: Vec<Arc<dyn CommitSink>> = self.sinks.read().clone();
        let mut outcome = CommitOutcome {
            tx_id,
            notified: 0,
            failed: 0,
            highwater_error: None,
        };
        for sink in sinks {
            match sink.on_commit(partition, status, tx_id) {
                Ok(()) => outcome.notified += 1,
                Err(e) => {
                    warn!(partition = %partition, tx_id, error = %e, "Commit sink failed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for CommitNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitNotifier")
            .field("sinks", &self.len())
            .finish()
    }
}
