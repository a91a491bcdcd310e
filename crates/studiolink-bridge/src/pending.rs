//! Pending call table.
//!
//! One entry per in-flight command id. Whoever removes the entry first (the
//! result path or the deadline path) owns the resolution; the other side finds
//! nothing and backs off.

use std::collections::HashMap;
use studiolink_core::CommandResult;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How a pending call was resolved from the outside.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed(CommandResult),
    /// The last ready peer went away under `DisconnectPolicy::FailPending`.
    Disconnected,
}

#[derive(Debug)]
pub(crate) struct PendingEntry {
    pub method: String,
    pub started_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

impl PendingEntry {
    pub fn elapsed_ms(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }

    /// Wake the caller. Returns false if it stopped waiting.
    pub fn resolve(self, outcome: Outcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    entries: HashMap<String, PendingEntry>,
}

impl PendingCalls {
    /// Register a call and return the receiver its caller waits on.
    pub fn insert(&mut self, id: &str, method: &str) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            method: method.to_string(),
            started_at: Instant::now(),
            tx,
        };
        if self.entries.insert(id.to_string(), entry).is_some() {
            tracing::error!(id, "pending call id reused");
        }
        rx
    }

    pub fn take(&mut self, id: &str) -> Option<PendingEntry> {
        self.entries.remove(id)
    }

    pub fn drain(&mut self) -> Vec<(String, PendingEntry)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn take_resolves_exactly_once() {
        let mut calls = PendingCalls::default();
        let rx = calls.insert("c1", "GetProperty");
        assert_eq!(calls.len(), 1);

        let entry = calls.take("c1").unwrap();
        assert_eq!(entry.method, "GetProperty");
        assert!(calls.take("c1").is_none());
        assert!(entry.resolve(Outcome::Completed(CommandResult::ok("c1", json!("Workspace")))));

        match rx.await.unwrap() {
            Outcome::Completed(result) => assert_eq!(result.data, json!("Workspace")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(calls.len(), 0);
    }

    #[tokio::test]
    async fn dropped_entries_close_the_receiver() {
        let mut calls = PendingCalls::default();
        let rx = calls.insert("c1", "GetProperty");
        drop(calls.drain());
        assert!(rx.await.is_err());
    }
}
