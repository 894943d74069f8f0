//! Pending-call table.
//!
//! Each outstanding call owns one entry keyed by its [`CallId`]. An entry is
//! removed exactly once: by a matching result or error, by the caller giving
//! up (timeout or cancellation), or by [`Correlator::reject_all`]. Whatever
//! arrives for a removed id afterwards is dropped.

use std::collections::HashMap;
use std::time::Instant;

use metrics::histogram;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use tether_core::{CallId, FunctionError, FunctionResult, Result, TetherError};

type Settlement = Result<Value>;

struct PendingEntry {
    function: String,
    tx: oneshot::Sender<Settlement>,
    issued_at: Instant,
}

/// Table of calls awaiting a response.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<CallId, PendingEntry>>,
}

impl Correlator {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call about to be sent.
    ///
    /// The returned handle removes the entry when dropped unsettled.
    pub fn register(&self, call_id: CallId, function: &str) -> PendingCall<'_> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            function: function.to_owned(),
            tx,
            issued_at: Instant::now(),
        };
        let _ = self.pending.lock().insert(call_id.clone(), entry);
        PendingCall {
            correlator: self,
            call_id,
            rx,
        }
    }

    /// Settle a call successfully. Returns `false` for unknown ids.
    pub fn resolve(&self, result: FunctionResult) -> bool {
        let Some(entry) = self.take(&result.call_id) else {
            debug!(call_id = %result.call_id, function = %result.function, "dropping result for unknown call");
            return false;
        };
        let _ = entry.tx.send(Ok(result.data));
        true
    }

    /// Settle a call with a remote error. Returns `false` for unknown ids.
    pub fn reject(&self, error: FunctionError) -> bool {
        let Some(entry) = self.take(&error.call_id) else {
            debug!(call_id = %error.call_id, "dropping error for unknown call");
            return false;
        };
        let err = TetherError::from_remote(&entry.function, error);
        let _ = entry.tx.send(Err(err));
        true
    }

    /// Reject every outstanding call. Returns how many were rejected.
    pub fn reject_all(&self, make_error: impl Fn() -> TetherError) -> usize {
        let drained: Vec<PendingEntry> = self.pending.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(make_error()));
        }
        count
    }

    /// Remove an entry without settling it.
    pub fn forget(&self, call_id: &CallId) -> bool {
        self.pending.lock().remove(call_id).is_some()
    }

    /// Whether `call_id` is outstanding.
    pub fn contains(&self, call_id: &CallId) -> bool {
        self.pending.lock().contains_key(call_id)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no calls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn take(&self, call_id: &CallId) -> Option<PendingEntry> {
        let entry = self.pending.lock().remove(call_id)?;
        histogram!("rpc_call_duration_seconds", "function" => entry.function.clone())
            .record(entry.issued_at.elapsed().as_secs_f64());
        Some(entry)
    }
}

/// Handle to one registered call.
pub struct PendingCall<'a> {
    correlator: &'a Correlator,
    call_id: CallId,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingCall<'_> {
    /// The call's id.
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Wait for settlement.
    ///
    /// A dropped sender means the table discarded the entry without settling
    /// it, which only happens when the owning connection goes away.
    pub async fn settled(mut self) -> Result<Value> {
        (&mut self.rx)
            .await
            .unwrap_or(Err(TetherError::ConnectionClosed))
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        let _ = self.correlator.forget(&self.call_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tether_core::errors::NO_HANDLER;

    fn result(id: &CallId, data: Value) -> FunctionResult {
        FunctionResult {
            function: "f".into(),
            call_id: id.clone(),
            data,
        }
    }

    #[tokio::test]
    async fn resolve_settles_and_removes() {
        let table = Correlator::new();
        let id = CallId::new();
        let pending = table.register(id.clone(), "f");
        assert!(table.contains(&id));
        assert!(table.resolve(result(&id, json!(42))));
        assert_eq!(pending.settled().await.unwrap(), json!(42));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn reject_reconstructs_remote_error() {
        let table = Correlator::new();
        let id = CallId::new();
        let pending = table.register(id.clone(), "missing");
        assert!(table.reject(FunctionError {
            call_id: id,
            message: "no handler".into(),
            code: Some(NO_HANDLER.into()),
            data: None,
        }));
        let err = pending.settled().await.unwrap_err();
        assert_matches!(err, TetherError::NoHandler { function } if function == "missing");
    }

    #[test]
    fn unknown_id_is_dropped() {
        let table = Correlator::new();
        assert!(!table.resolve(result(&CallId::new(), Value::Null)));
    }

    #[test]
    fn second_settlement_is_dropped() {
        let table = Correlator::new();
        let id = CallId::new();
        let _pending = table.register(id.clone(), "f");
        assert!(table.resolve(result(&id, json!(1))));
        assert!(!table.resolve(result(&id, json!(2))));
    }

    #[test]
    fn dropping_handle_removes_entry() {
        let table = Correlator::new();
        let id = CallId::new();
        let pending = table.register(id.clone(), "f");
        assert_eq!(table.len(), 1);
        drop(pending);
        assert!(!table.contains(&id));
        assert!(!table.resolve(result(&id, json!(1))));
    }

    #[tokio::test]
    async fn reject_all_settles_everything() {
        let table = Correlator::new();
        let a = table.register(CallId::new(), "a");
        let b = table.register(CallId::new(), "b");
        assert_eq!(table.reject_all(|| TetherError::ConnectionClosed), 2);
        assert_matches!(a.settled().await, Err(TetherError::ConnectionClosed));
        assert_matches!(b.settled().await, Err(TetherError::ConnectionClosed));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn concurrent_calls_match_by_id() {
        let table = Correlator::new();
        let ids: Vec<CallId> = (0..5).map(|_| CallId::new()).collect();
        let handles: Vec<_> = ids.iter().map(|id| table.register(id.clone(), "f")).collect();
        for (n, id) in ids.iter().enumerate().rev() {
            assert!(table.resolve(result(id, json!(n))));
        }
        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.settled().await.unwrap(), json!(n));
        }
    }
}
