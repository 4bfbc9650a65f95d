//! One complete collection run across the cluster

use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{error, info, warn};

use kubesnap_k8s::{DiscoverySource, DynamicQuerySource, HostDataSource, PodLogSource};
use kubesnap_types::{FilterOptions, QueryRecord, Result, Scope};

use crate::peers::{query_host_data, query_pod_logs};
use crate::query::{QueryOptions, query_resources};
use crate::recorder::QueryRecorder;
use crate::sink::{SnapshotLayout, SnapshotSink};

/// What a run gathers beyond the resource passes
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub filters: FilterOptions,

    /// Namespaces whose name matches get a namespace pass
    pub namespaces: Regex,

    pub pod_logs: bool,
    pub host_data: bool,
}

impl RunPlan {
    pub fn new(filters: FilterOptions, namespaces: Regex) -> Self {
        Self {
            filters,
            namespaces,
            pod_logs: true,
            host_data: true,
        }
    }

    /// Namespaces selected by the pattern, in the given order
    pub fn select_namespaces<'a>(&self, namespaces: &'a [String]) -> Vec<&'a str> {
        namespaces
            .iter()
            .map(String::as_str)
            .filter(|ns| self.namespaces.is_match(ns))
            .collect()
    }
}

/// Outcome of a run, derived from the recorder
#[derive(Debug, Default)]
pub struct RunSummary {
    pub records: usize,
    pub failures: Vec<QueryRecord>,

    /// Passes aborted before querying anything, with the reason
    pub failed_passes: Vec<(Scope, String)>,

    pub elapsed: Duration,

    /// The run was cancelled before every pass had started
    pub cancelled: bool,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.failed_passes.is_empty() && !self.cancelled
    }
}

/// Drives every pass of a snapshot and dumps the query ledger at the end
pub struct Collector<'a, C, S> {
    client: &'a C,
    sink: &'a S,
    layout: &'a SnapshotLayout,
    options: QueryOptions,
    recorder: QueryRecorder,
}

impl<'a, C, S> Collector<'a, C, S>
where
    C: DiscoverySource + DynamicQuerySource + PodLogSource + HostDataSource,
    S: SnapshotSink,
{
    pub fn new(client: &'a C, sink: &'a S, layout: &'a SnapshotLayout, options: QueryOptions) -> Self {
        Self {
            client,
            sink,
            layout,
            options,
            recorder: QueryRecorder::new(),
        }
    }

    pub fn recorder(&self) -> &QueryRecorder {
        &self.recorder
    }

    /// Cluster pass, host data, then one pass plus pod logs per selected
    /// namespace. Failed passes are logged and the run moves on.
    ///
    /// Once the cancellation token fires no further pass or peer operation
    /// is started; the ledger is still dumped.
    pub async fn run(&self, plan: &RunPlan, namespaces: &[String]) -> Result<RunSummary> {
        let start = Instant::now();
        let cancel = &self.options.cancel;
        let mut failed_passes = Vec::new();

        'passes: {
            if cancel.is_cancelled() {
                break 'passes;
            }
            if let Err(e) = self.pass(plan, Scope::Cluster).await {
                failed_passes.push((Scope::Cluster, e));
            }

            if plan.host_data && !cancel.is_cancelled() {
                query_host_data(self.client, &self.recorder, self.sink, self.layout, &self.options)
                    .await;
            }

            let selected = plan.select_namespaces(namespaces);
            info!(
                selected = selected.len(),
                total = namespaces.len(),
                "Querying namespaces"
            );

            for ns in selected {
                if cancel.is_cancelled() {
                    break 'passes;
                }
                let scope = Scope::Namespace(ns.to_string());
                if let Err(e) = self.pass(plan, scope.clone()).await {
                    failed_passes.push((scope, e));
                }

                if plan.pod_logs && !cancel.is_cancelled() {
                    query_pod_logs(
                        self.client,
                        &self.recorder,
                        self.sink,
                        self.layout,
                        ns,
                        &plan.filters.label_selector,
                        &self.options,
                    )
                    .await;
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("Run cancelled, remaining passes skipped");
        }

        self.recorder
            .dump_query_data(self.sink, &self.layout.meta_dir())?;

        let summary = RunSummary {
            records: self.recorder.len(),
            failures: self.recorder.failures(),
            failed_passes,
            elapsed: start.elapsed(),
            cancelled,
        };
        info!(
            records = summary.records,
            failures = summary.failures.len(),
            failed_passes = summary.failed_passes.len(),
            elapsed = ?summary.elapsed,
            "Collection finished"
        );
        Ok(summary)
    }

    async fn pass(&self, plan: &RunPlan, scope: Scope) -> std::result::Result<(), String> {
        let filter = plan.filters.for_scope(scope);
        query_resources(
            self.client,
            &self.recorder,
            self.sink,
            self.layout,
            &filter,
            &self.options,
        )
        .await
        .map_err(|e| {
            let reason = e.chain();
            error!(scope = %filter.scope, error = %reason, "Scope pass failed");
            reason
        })
    }
}
