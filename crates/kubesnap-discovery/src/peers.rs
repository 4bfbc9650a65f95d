//! Gathering that is not a plain resource list: pod logs and node host data
//!
//! Each operation covers many calls but is recorded as a single query.

use serde_json::{Value, json};
use tracing::debug;

use kubesnap_k8s::{HostDataSource, ListOptions, PodLogSource};
use kubesnap_types::{Error, QueryOutcome, Result};

use crate::query::{QueryOptions, label_selector, timed_query};
use crate::recorder::QueryRecorder;
use crate::sink::{SnapshotLayout, SnapshotSink};

/// Record name used for a namespace's pod logs
pub const POD_LOGS_QUERY: &str = "PodLogs";
/// Record name used for host data across all nodes
pub const HOST_DATA_QUERY: &str = "Nodes";

const CONFIGZ: &str = "configz";
const HEALTHZ: &str = "healthz";

/// Fetch the logs of every container of every pod in `namespace`.
///
/// A failing container does not stop the others; the first failure becomes
/// the outcome of the record.
pub async fn query_pod_logs<C, S>(
    client: &C,
    recorder: &QueryRecorder,
    sink: &S,
    layout: &SnapshotLayout,
    namespace: &str,
    selector: &str,
    options: &QueryOptions,
) -> QueryOutcome
where
    C: PodLogSource,
    S: SnapshotSink,
{
    timed_query(recorder, POD_LOGS_QUERY, namespace, options, || async move {
        gather_pod_logs(client, sink, layout, namespace, selector).await
    })
    .await
}

async fn gather_pod_logs<C, S>(
    client: &C,
    sink: &S,
    layout: &SnapshotLayout,
    namespace: &str,
    selector: &str,
) -> Result<()>
where
    C: PodLogSource,
    S: SnapshotSink,
{
    let opts = ListOptions {
        label_selector: label_selector(selector),
        field_selector: None,
    };
    let pods = client
        .list_pods(namespace, &opts)
        .await
        .map_err(|source| Error::Gather {
            target: format!("pods in namespace {}", namespace),
            source,
        })?;

    let mut first_error = None;
    for pod in &pods {
        let dir = layout.pod_log_dir(namespace, &pod.name);
        for container in &pod.containers {
            let result = match client.container_logs(namespace, &pod.name, container).await {
                Ok(text) => sink.write_text(&text, &dir, &format!("{}.txt", container)),
                Err(source) => Err(Error::Gather {
                    target: format!("logs of {}/{} container {}", namespace, pod.name, container),
                    source,
                }),
            };
            if let Err(e) = result {
                debug!(namespace = %namespace, pod = %pod.name, container = %container, error = %e.chain(), "Pod log gathering failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    debug!(namespace = %namespace, pods = pods.len(), "Gathered pod logs");
    first_error.map_or(Ok(()), Err)
}

/// Fetch `configz` and `healthz` from every node through the API server proxy.
///
/// Recorded once for the whole cluster with an empty namespace.
pub async fn query_host_data<C, S>(
    client: &C,
    recorder: &QueryRecorder,
    sink: &S,
    layout: &SnapshotLayout,
    options: &QueryOptions,
) -> QueryOutcome
where
    C: HostDataSource,
    S: SnapshotSink,
{
    timed_query(recorder, HOST_DATA_QUERY, "", options, || async move {
        gather_host_data(client, sink, layout).await
    })
    .await
}

async fn gather_host_data<C, S>(client: &C, sink: &S, layout: &SnapshotLayout) -> Result<()>
where
    C: HostDataSource,
    S: SnapshotSink,
{
    let nodes = client.list_nodes().await.map_err(|source| Error::Gather {
        target: "node list".to_string(),
        source,
    })?;

    let mut first_error = None;
    for node in &nodes {
        let dir = layout.host_dir(node);
        for endpoint in [CONFIGZ, HEALTHZ] {
            let result = match client.node_proxy(node, endpoint).await {
                Ok(body) => sink.serialize(
                    &endpoint_document(endpoint, body),
                    &dir,
                    &format!("{}.json", endpoint),
                ),
                Err(source) => Err(Error::Gather {
                    target: format!("{} of node {}", endpoint, node),
                    source,
                }),
            };
            if let Err(e) = result {
                debug!(node = %node, endpoint, error = %e.chain(), "Host data gathering failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    debug!(nodes = nodes.len(), "Gathered host data");
    first_error.map_or(Ok(()), Err)
}

/// `configz` is kept as JSON when it parses; `healthz` is plain text
fn endpoint_document(endpoint: &str, body: String) -> Value {
    match endpoint {
        HEALTHZ => json!({ "status": body.trim() }),
        _ => serde_json::from_str(&body).unwrap_or(Value::String(body)),
    }
}
