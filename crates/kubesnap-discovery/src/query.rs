//! Query executor: one generic list call per selected resource

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubesnap_k8s::{DiscoverySource, DynamicQuerySource, ListOptions};
use kubesnap_types::{Error, FilterConfig, Gvr, LabelSelector, QueryOutcome, Result, Scope};

use crate::recorder::QueryRecorder;
use crate::selector::select_resources;
use crate::sink::{SnapshotLayout, SnapshotSink};

/// How queries of one pass are executed
#[derive(Clone, Debug)]
pub struct QueryOptions {
    /// Maximum queries in flight at once (1 = sequential)
    pub parallelism: usize,

    /// Per-query deadline; `None` waits indefinitely
    pub timeout: Option<Duration>,

    /// Cancels every query still running or not yet started
    pub cancel: CancellationToken,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl QueryOptions {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Label selector to send, or `None` when it is empty or does not parse.
///
/// A selector that fails to parse is logged and dropped rather than failing
/// the pass.
pub fn label_selector(selector: &str) -> Option<String> {
    if selector.trim().is_empty() {
        return None;
    }
    match LabelSelector::parse(selector) {
        Ok(_) => Some(selector.to_string()),
        Err(e) => {
            warn!(selector = %selector, error = %e, "Label selector failed to parse, ignoring it");
            None
        }
    }
}

/// List options for one pass: label selector plus a namespace field selector
pub fn list_options(filter: &FilterConfig) -> ListOptions {
    ListOptions {
        label_selector: label_selector(&filter.label_selector),
        field_selector: filter.scope.field_selector(),
    }
}

/// Run `f`, time it, and record exactly one outcome for it.
///
/// Cancellation and the deadline in `options` are applied to the call; both
/// still produce a record.
pub async fn timed_query<F, Fut>(
    recorder: &QueryRecorder,
    name: &str,
    namespace: &str,
    options: &QueryOptions,
    f: F,
) -> QueryOutcome
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => QueryOutcome::Cancelled,
        result = with_deadline(options.timeout, f()) => match result {
            Some(result) => QueryOutcome::from(result),
            None => QueryOutcome::TimedOut,
        },
    };
    let duration = start.elapsed();

    match &outcome {
        QueryOutcome::Success => {
            debug!(query = %name, namespace = %namespace, ?duration, "Query finished");
        }
        QueryOutcome::Failed(error) => {
            warn!(query = %name, namespace = %namespace, error = %error, "Query failed");
        }
        QueryOutcome::Cancelled | QueryOutcome::TimedOut => {
            warn!(query = %name, namespace = %namespace, status = outcome.status(), "Query did not complete");
        }
    }

    recorder.record_query(name, namespace, duration, outcome.clone());
    outcome
}

async fn with_deadline<Fut: Future>(timeout: Option<Duration>, fut: Fut) -> Option<Fut::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Name each resource is recorded and stored under within one pass.
///
/// The plural alone in the common case. A plural served by more than one
/// group is qualified with its group (`events.events.k8s.io`); the core
/// group keeps the bare plural.
pub fn query_names(resources: &[Gvr]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for gvr in resources {
        *counts.entry(gvr.resource.as_str()).or_default() += 1;
    }

    resources
        .iter()
        .map(|gvr| {
            let shared = counts.get(gvr.resource.as_str()).copied().unwrap_or(0) > 1;
            if shared && !gvr.group.is_empty() {
                format!("{}.{}", gvr.resource, gvr.group)
            } else {
                gvr.resource.clone()
            }
        })
        .collect()
}

/// List one resource and persist the items to `<name>.json` if there are any
pub async fn list_and_store<C, S>(
    client: &C,
    sink: &S,
    gvr: &Gvr,
    name: &str,
    options: &ListOptions,
    layout: &SnapshotLayout,
    scope: &Scope,
) -> Result<usize>
where
    C: DynamicQuerySource,
    S: SnapshotSink,
{
    let items = client
        .list(gvr, options)
        .await
        .map_err(|source| Error::Query {
            gvr: gvr.clone(),
            source,
        })?;

    // Resource types with no live instances leave no file behind
    if items.is_empty() {
        return Ok(0);
    }

    sink.serialize(
        &items,
        &layout.resource_dir(scope),
        &format!("{}.json", name),
    )?;
    Ok(items.len())
}

/// Fetch one object and persist it, timed and recorded like a list query
#[allow(clippy::too_many_arguments)]
pub async fn query_object<C, S>(
    client: &C,
    recorder: &QueryRecorder,
    sink: &S,
    gvr: &Gvr,
    namespace: Option<&str>,
    name: &str,
    dir: &std::path::Path,
    options: &QueryOptions,
) -> QueryOutcome
where
    C: DynamicQuerySource,
    S: SnapshotSink,
{
    timed_query(recorder, &gvr.resource, namespace.unwrap_or(""), options, || async move {
        let object = client
            .get(gvr, namespace, name)
            .await
            .map_err(|source| Error::Query {
                gvr: gvr.clone(),
                source,
            })?;
        sink.serialize(&object, dir, &format!("{}.json", name))
    })
    .await
}

/// Selection raced against cancellation and the per-query deadline
async fn select_interruptible<D>(
    client: &D,
    filter: &FilterConfig,
    options: &QueryOptions,
) -> Result<Vec<Gvr>>
where
    D: DiscoverySource,
{
    tokio::select! {
        biased;
        _ = options.cancel.cancelled() => Err(Error::Cancelled),
        selected = with_deadline(options.timeout, select_resources(client, filter)) => match selected {
            Some(selected) => selected,
            None => Err(Error::Discovery(
                format!("no response within {:?}", options.timeout.unwrap_or_default()).into(),
            )),
        },
    }
}

/// Run one scope pass: select resources, then list and store each one.
///
/// Only discovery failures and cancellation before selection completes are
/// returned. Every selected resource produces exactly one record, whatever
/// happens to its query.
pub async fn query_resources<C, S>(
    client: &C,
    recorder: &QueryRecorder,
    sink: &S,
    layout: &SnapshotLayout,
    filter: &FilterConfig,
    options: &QueryOptions,
) -> Result<()>
where
    C: DiscoverySource + DynamicQuerySource,
    S: SnapshotSink,
{
    match &filter.scope {
        Scope::Namespace(ns) => info!(namespace = %ns, "Running namespace query"),
        Scope::Cluster => info!("Running cluster queries"),
    }

    let list_opts = list_options(filter);
    let resources = select_interruptible(client, filter, options).await?;
    let names = query_names(&resources);

    stream::iter(resources.iter().zip(names.iter()))
        .map(|(gvr, name)| {
            let list_opts = &list_opts;
            async move {
                timed_query(
                    recorder,
                    name,
                    filter.scope.label(),
                    options,
                    || async move {
                        list_and_store(client, sink, gvr, name, list_opts, layout, &filter.scope)
                            .await
                            .map(|_| ())
                    },
                )
                .await
            }
        })
        .buffer_unordered(options.parallelism.max(1))
        .for_each(|_| async {})
        .await;

    debug!(scope = %filter.scope, queried = resources.len(), "Pass complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, RecordingSink};
    use kubesnap_types::{DiscoveredResource, ResourceList, Scope};

    fn default_ns() -> FilterConfig {
        FilterConfig::new(Scope::Namespace("default".to_string()))
    }

    #[test]
    fn test_list_options_for_namespace_pass() {
        let opts = list_options(&default_ns().with_label_selector("app=web"));
        assert_eq!(opts.label_selector.as_deref(), Some("app=web"));
        assert_eq!(opts.field_selector.as_deref(), Some("metadata.namespace=default"));

        let opts = list_options(&FilterConfig::new(Scope::Cluster));
        assert_eq!(opts, ListOptions::default());
    }

    #[test]
    fn test_invalid_label_selector_is_dropped() {
        let opts = list_options(&default_ns().with_label_selector("app in (web"));
        assert_eq!(opts.label_selector, None);
        assert!(opts.field_selector.is_some());
    }

    #[tokio::test]
    async fn test_empty_result_is_recorded_but_not_stored() {
        let cluster = FakeCluster::scenario().with_items("pods", 0);
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::default();
        let layout = SnapshotLayout::new("/snap");

        query_resources(&cluster, &recorder, &sink, &layout, &default_ns(), &QueryOptions::default())
            .await
            .unwrap();

        let records = recorder.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "pods");
        assert_eq!(records[0].namespace, "default");
        assert!(records[0].outcome.is_success());
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_items_are_stored_under_namespace_dir() {
        let cluster = FakeCluster::scenario().with_items("pods", 2);
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::default();
        let layout = SnapshotLayout::new("/snap");

        query_resources(&cluster, &recorder, &sink, &layout, &default_ns(), &QueryOptions::default())
            .await
            .unwrap();

        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, layout.resource_dir(&Scope::Namespace("default".to_string())));
        assert_eq!(calls[0].1, "pods.json");
        assert_eq!(calls[0].2.as_array().map(Vec::len), Some(2));

        // The namespace restriction and label selector reach the list call
        let seen = cluster.list_calls();
        assert_eq!(
            seen[0].1.field_selector.as_deref(),
            Some("metadata.namespace=default")
        );
    }

    #[tokio::test]
    async fn test_query_failure_is_recorded_and_isolated() {
        let cluster = FakeCluster::wide()
            .with_items("pods", 1)
            .with_items("services", 1)
            .failing("deployments");
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::default();
        let layout = SnapshotLayout::new("/snap");

        let result = query_resources(
            &cluster,
            &recorder,
            &sink,
            &layout,
            &default_ns(),
            &QueryOptions::default(),
        )
        .await;
        assert!(result.is_ok());

        let records = recorder.records();
        assert_eq!(records.len(), 3);
        let failed: Vec<_> = records.iter().filter(|r| !r.outcome.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "deployments");
        assert!(failed[0].outcome.error().unwrap().contains("deployments"));

        // Resources after the failing one were still stored
        let files: Vec<_> = sink.calls().into_iter().map(|c| c.1).collect();
        assert_eq!(files, vec!["pods.json", "services.json"]);
    }

    #[tokio::test]
    async fn test_sink_failure_is_recorded_against_resource() {
        let cluster = FakeCluster::scenario().with_items("pods", 1);
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::failing();

        query_resources(
            &cluster,
            &recorder,
            &sink,
            &SnapshotLayout::new("/snap"),
            &default_ns(),
            &QueryOptions::default(),
        )
        .await
        .unwrap();

        let records = recorder.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].outcome.error().unwrap().contains("pods.json"));
    }

    #[tokio::test]
    async fn test_discovery_failure_aborts_pass_without_records() {
        let cluster = FakeCluster::unreachable();
        let recorder = QueryRecorder::new();

        let err = query_resources(
            &cluster,
            &recorder,
            &RecordingSink::default(),
            &SnapshotLayout::new("/snap"),
            &FilterConfig::new(Scope::Cluster),
            &QueryOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(err.is_pass_fatal());
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_pass_records_every_resource() {
        let cluster = FakeCluster::wide()
            .with_items("pods", 3)
            .with_items("services", 1)
            .failing("deployments");
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::default();

        query_resources(
            &cluster,
            &recorder,
            &sink,
            &SnapshotLayout::new("/snap"),
            &default_ns(),
            &QueryOptions::default().with_parallelism(4),
        )
        .await
        .unwrap();

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.failures().len(), 1);
        assert_eq!(sink.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_query_times_out() {
        let cluster = FakeCluster::wide()
            .with_items("pods", 1)
            .with_items("services", 1)
            .hanging("deployments");
        let recorder = QueryRecorder::new();

        query_resources(
            &cluster,
            &recorder,
            &RecordingSink::default(),
            &SnapshotLayout::new("/snap"),
            &default_ns(),
            &QueryOptions::default().with_timeout(Some(Duration::from_secs(5))),
        )
        .await
        .unwrap();

        let records = recorder.records();
        assert_eq!(records.len(), 3);
        let timed_out: Vec<_> = records
            .iter()
            .filter(|r| r.outcome == QueryOutcome::TimedOut)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(timed_out, vec!["deployments"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_pass_still_records_every_resource() {
        let cluster = FakeCluster::wide().hanging("pods");
        let recorder = QueryRecorder::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        query_resources(
            &cluster,
            &recorder,
            &RecordingSink::default(),
            &SnapshotLayout::new("/snap"),
            &default_ns(),
            &QueryOptions::default().with_cancel(cancel),
        )
        .await
        .unwrap();

        let records = recorder.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.outcome == QueryOutcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_interrupts_hung_discovery() {
        let cluster = FakeCluster::hanging_discovery();
        let recorder = QueryRecorder::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = QueryOptions::default()
            .with_cancel(cancel)
            .with_timeout(Some(Duration::from_secs(5)));

        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            query_resources(
                &cluster,
                &recorder,
                &RecordingSink::default(),
                &SnapshotLayout::new("/snap"),
                &default_ns(),
                &options,
            ),
        )
        .await
        .expect("pass must return once cancelled");

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(err.is_pass_fatal());
        assert!(recorder.is_empty());
        assert!(cluster.list_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_discovery_times_out() {
        let cluster = FakeCluster::hanging_discovery();
        let recorder = QueryRecorder::new();

        let err = query_resources(
            &cluster,
            &recorder,
            &RecordingSink::default(),
            &SnapshotLayout::new("/snap"),
            &FilterConfig::new(Scope::Cluster),
            &QueryOptions::default().with_timeout(Some(Duration::from_secs(5))),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Discovery(_)));
        assert!(err.chain().contains("no response within 5s"));
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_label_selector_pass_runs_unfiltered() {
        let cluster = FakeCluster::scenario().with_items("pods", 1);
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::default();

        let result = query_resources(
            &cluster,
            &recorder,
            &sink,
            &SnapshotLayout::new("/snap"),
            &default_ns().with_label_selector("app in (web"),
            &QueryOptions::default(),
        )
        .await;
        assert!(result.is_ok());

        let calls = cluster.list_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.label_selector, None);
        assert_eq!(
            calls[0].1.field_selector.as_deref(),
            Some("metadata.namespace=default")
        );
        assert!(recorder.records()[0].outcome.is_success());
        assert_eq!(sink.calls().len(), 1);
    }

    fn shared_plural_catalog() -> Vec<ResourceList> {
        vec![
            ResourceList::new(
                "v1",
                vec![
                    DiscoveredResource::new("events", "Event", true).with_verbs(&["list"]),
                    DiscoveredResource::new("pods", "Pod", true).with_verbs(&["list"]),
                ],
            ),
            ResourceList::new(
                "events.k8s.io/v1",
                vec![DiscoveredResource::new("events", "Event", true).with_verbs(&["list"])],
            ),
        ]
    }

    #[test]
    fn test_query_names_qualify_shared_plurals() {
        let names = query_names(&[
            Gvr::new("", "v1", "events"),
            Gvr::new("", "v1", "pods"),
            Gvr::new("events.k8s.io", "v1", "events"),
        ]);
        assert_eq!(names, vec!["events", "pods", "events.events.k8s.io"]);
    }

    #[tokio::test]
    async fn test_shared_plural_in_two_groups_is_kept_apart() {
        let cluster = FakeCluster::with_catalog(shared_plural_catalog())
            .with_items("events", 1)
            .with_items("pods", 1);
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::default();
        let layout = SnapshotLayout::new("/snap");

        query_resources(
            &cluster,
            &recorder,
            &sink,
            &layout,
            &default_ns(),
            &QueryOptions::default().with_parallelism(3),
        )
        .await
        .unwrap();

        let mut files: Vec<_> = sink.calls().into_iter().map(|c| c.1).collect();
        files.sort();
        assert_eq!(files, vec!["events.events.k8s.io.json", "events.json", "pods.json"]);

        let mut names: Vec<_> = recorder.records().into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, vec!["events", "events.events.k8s.io", "pods"]);
    }

    #[tokio::test]
    async fn test_query_object_records_one_entry() {
        let cluster = FakeCluster::scenario();
        let recorder = QueryRecorder::new();
        let sink = RecordingSink::default();
        let gvr = Gvr::new("", "v1", "nodes");

        let outcome = query_object(
            &cluster,
            &recorder,
            &sink,
            &gvr,
            None,
            "node-1",
            std::path::Path::new("/snap/hosts"),
            &QueryOptions::default(),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(recorder.len(), 1);
        assert_eq!(sink.calls()[0].1, "node-1.json");
    }
}
