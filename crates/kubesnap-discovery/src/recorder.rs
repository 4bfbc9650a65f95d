use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use kubesnap_types::{QueryOutcome, QueryRecord, Result};

use crate::sink::SnapshotSink;

/// File the recorder is dumped to under the meta directory
pub const QUERY_TIME_FILE: &str = "query-time.json";

/// Thread-safe, append-only ledger of every query attempted during a run
#[derive(Clone, Default)]
pub struct QueryRecorder {
    records: Arc<RwLock<Vec<QueryRecord>>>,
}

impl QueryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record. Never fails and never deduplicates.
    pub fn record_query(
        &self,
        name: &str,
        namespace: &str,
        duration: Duration,
        outcome: QueryOutcome,
    ) {
        let record = QueryRecord::new(name, namespace, duration, outcome);
        self.records.write().push(record);
    }

    /// All records in append order (cloned)
    pub fn records(&self) -> Vec<QueryRecord> {
        self.records.read().clone()
    }

    /// Records whose outcome is anything but success
    pub fn failures(&self) -> Vec<QueryRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| !r.outcome.is_success())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Total time spent inside recorded queries
    pub fn total_duration(&self) -> Duration {
        self.records.read().iter().map(|r| r.duration).sum()
    }

    /// Write every record to `<dir>/query-time.json`
    pub fn dump_query_data<S: SnapshotSink>(&self, sink: &S, dir: &Path) -> Result<()> {
        let records = self.records.read();
        sink.serialize(&*records, dir, QUERY_TIME_FILE)
    }
}
