//! Transaction-scoped query auditing
//!
//! A [`QueryTracker`] is a shared handle: clones observe and append to the
//! same log, which is how nested scopes see one history.

use super::value::DatabaseValue;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One recorded statement
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLog {
    pub query: String,
    pub params: Vec<DatabaseValue>,
    /// Submission time, taken before the statement runs
    pub timestamp: DateTime<Utc>,
}

impl QueryLog {
    pub fn new(query: impl Into<String>, params: Vec<DatabaseValue>) -> Self {
        Self {
            query: query.into(),
            params,
            timestamp: Utc::now(),
        }
    }

    /// `{query, params, timestamp}` with an ISO-8601 UTC timestamp
    pub fn to_dict(&self) -> Value {
        json!({
            "query": self.query,
            "params": self.params.iter().map(DatabaseValue::to_json).collect::<Vec<_>>(),
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

#[derive(Debug)]
struct TrackerInner {
    logs: Mutex<Vec<QueryLog>>,
    enabled: AtomicBool,
}

/// Append-only statement log with an enabled flag
#[derive(Debug, Clone)]
pub struct QueryTracker {
    inner: Arc<TrackerInner>,
}

impl Default for QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryTracker {
    /// Create an empty, enabled tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                logs: Mutex::new(Vec::new()),
                enabled: AtomicBool::new(true),
            }),
        }
    }

    /// Append a statement if tracking is enabled
    pub(crate) fn record(&self, query: &str, params: &[DatabaseValue]) {
        if self.is_enabled() {
            self.inner
                .logs
                .lock()
                .push(QueryLog::new(query, params.to_vec()));
        }
    }

    /// Independent copy of the log
    pub fn get_queries(&self) -> Vec<QueryLog> {
        self.inner.logs.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.inner.logs.lock().len()
    }

    /// Empty the log; the enabled flag is left alone
    pub fn clear(&self) {
        self.inner.logs.lock().clear();
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::SeqCst);
    }

    /// Stop recording; existing history is kept
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// True when both handles refer to the same tracker
    pub fn same_as(&self, other: &QueryTracker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Serialize every log entry as a JSON array
    pub fn to_dict(&self) -> Value {
        Value::Array(self.inner.logs.lock().iter().map(QueryLog::to_dict).collect())
    }
}
