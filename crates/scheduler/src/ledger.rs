//! Request ledger — tracks outstanding caller-facing requests.
//!
//! Every submitted request registers a completion pair (success/failure
//! callbacks) and a deadline timer. Whatever happens first — explicit
//! settle, explicit failure, or timeout — removes the entry and fires the
//! matching callback; the other paths then find nothing and do nothing.
//!
//! All entry-table mutation happens under one lock, so the three settlement
//! paths race safely: only the path that wins the removal performs the
//! callback, and it does so after releasing the lock.

use quillvault_core::{FailureCode, RequestId, ScheduleError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Invoked with the final text on success.
pub type SuccessFn = Box<dyn FnOnce(String) + Send>;
/// Invoked with a failure code and message on any failure path.
pub type FailureFn = Box<dyn FnOnce(FailureCode, String) + Send>;

struct LedgerEntry {
    on_success: SuccessFn,
    on_failure: FailureFn,
    timer: JoinHandle<()>,
}

/// The table of outstanding requests awaiting settlement.
pub struct RequestLedger {
    entries: Mutex<HashMap<RequestId, LedgerEntry>>,
}

impl RequestLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new request and start its deadline timer.
    ///
    /// A duplicate `request_id` replaces the previous entry; the displaced
    /// entry's timer is stopped and its callbacks are dropped unfired.
    pub fn submit(
        self: &Arc<Self>,
        request_id: RequestId,
        on_success: SuccessFn,
        on_failure: FailureFn,
        timeout: Duration,
    ) {
        let timer = tokio::spawn({
            let ledger = Arc::clone(self);
            let request_id = request_id.clone();
            async move {
                tokio::time::sleep(timeout).await;
                ledger.expire(&request_id, timeout);
            }
        });

        let entry = LedgerEntry {
            on_success,
            on_failure,
            timer,
        };

        let displaced = self.entries.lock().unwrap().insert(request_id.clone(), entry);
        if let Some(old) = displaced {
            warn!(request_id = %request_id, "Replacing existing ledger entry");
            old.timer.abort();
        }
        debug!(request_id = %request_id, timeout_secs = timeout.as_secs(), "Request registered");
    }

    /// Settle a request successfully. A second settlement attempt for the
    /// same id is a no-op; returns whether this call performed it.
    pub fn settle(&self, request_id: &RequestId, text: String) -> bool {
        let entry = self.entries.lock().unwrap().remove(request_id);
        match entry {
            Some(e) => {
                e.timer.abort();
                debug!(request_id = %request_id, chars = text.len(), "Request settled");
                (e.on_success)(text);
                true
            }
            None => false,
        }
    }

    /// Settle a request with a failure. A second settlement attempt for the
    /// same id is a no-op; returns whether this call performed it.
    pub fn fail(&self, request_id: &RequestId, code: FailureCode, message: impl Into<String>) -> bool {
        let entry = self.entries.lock().unwrap().remove(request_id);
        match entry {
            Some(e) => {
                e.timer.abort();
                let message = message.into();
                debug!(request_id = %request_id, code = %code, message = %message, "Request failed");
                (e.on_failure)(code, message);
                true
            }
            None => false,
        }
    }

    /// Deadline path: fires only if the entry is still present.
    fn expire(&self, request_id: &RequestId, timeout: Duration) {
        let entry = self.entries.lock().unwrap().remove(request_id);
        if let Some(e) = entry {
            warn!(request_id = %request_id, timeout_secs = timeout.as_secs(), "Request timed out");
            let err = ScheduleError::Timeout {
                request_id: request_id.to_string(),
                timeout_secs: timeout.as_secs(),
            };
            (e.on_failure)(FailureCode::Timeout, err.to_string());
        }
    }

    /// Whether a request is still awaiting settlement.
    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.entries.lock().unwrap().contains_key(request_id)
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Drop for RequestLedger {
    fn drop(&mut self) {
        for (_, entry) in self.entries.lock().unwrap().drain() {
            entry.timer.abort();
        }
    }
}
