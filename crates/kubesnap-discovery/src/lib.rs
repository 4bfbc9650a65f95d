//! Resource discovery and query orchestration for kubesnap
//!
//! This crate selects the resources a scope pass should list, runs the list
//! queries, records every attempt, and writes results into a snapshot layout.

mod peers;
mod query;
mod recorder;
mod run;
mod selector;
mod sink;

#[cfg(test)]
mod testing;

pub use peers::{HOST_DATA_QUERY, POD_LOGS_QUERY, query_host_data, query_pod_logs};
pub use query::{
    QueryOptions, label_selector, list_and_store, list_options, query_names, query_object,
    query_resources, timed_query,
};
pub use recorder::{QUERY_TIME_FILE, QueryRecorder};
pub use run::{Collector, RunPlan, RunSummary};
pub use selector::{select_from, select_resources};
pub use sink::{
    CLUSTER_RESOURCE_LOCATION, HOSTS_LOCATION, JsonFileSink, META_LOCATION, NS_RESOURCE_LOCATION,
    POD_LOGS_LOCATION, SnapshotLayout, SnapshotSink,
};

// Re-export types used in our public API
pub use kubesnap_types::{FilterConfig, FilterOptions, QueryOutcome, QueryRecord, Scope};
