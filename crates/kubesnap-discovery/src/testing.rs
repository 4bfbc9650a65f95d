//! In-memory collaborators shared by the unit tests of this crate

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use kube::api::DynamicObject;
use kube::core::ApiResource;
use parking_lot::Mutex;
use serde::Serialize;

use kubesnap_k8s::{
    DiscoverySource, DynamicQuerySource, HostDataSource, ListOptions, PodLogSource, PodRef,
};
use kubesnap_types::{BoxError, DiscoveredResource, Error, Gvr, ResourceList, Result};

use crate::sink::SnapshotSink;

#[derive(Default)]
pub struct FakeCluster {
    catalog: Vec<ResourceList>,
    unreachable: bool,
    discovery_hangs: bool,
    items: HashMap<String, usize>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    list_calls: Mutex<Vec<(Gvr, ListOptions)>>,
    pods: HashMap<String, Vec<PodRef>>,
    failing_logs: HashSet<String>,
    nodes: Vec<String>,
    failing_proxy: HashSet<String>,
}

impl FakeCluster {
    /// pods (namespaced, list+get), nodes (cluster, list+get), configmaps (get only)
    pub fn scenario() -> Self {
        Self {
            catalog: vec![ResourceList::new(
                "v1",
                vec![
                    DiscoveredResource::new("pods", "Pod", true).with_verbs(&["list", "get"]),
                    DiscoveredResource::new("nodes", "Node", false).with_verbs(&["list", "get"]),
                    DiscoveredResource::new("configmaps", "ConfigMap", true)
                        .with_verbs(&["get"]),
                ],
            )],
            ..Default::default()
        }
    }

    /// Three namespaced and two cluster-scoped listable resources
    pub fn wide() -> Self {
        Self {
            catalog: vec![
                ResourceList::new(
                    "v1",
                    vec![
                        DiscoveredResource::new("pods", "Pod", true).with_verbs(&["list"]),
                        DiscoveredResource::new("services", "Service", true)
                            .with_verbs(&["list"]),
                        DiscoveredResource::new("nodes", "Node", false).with_verbs(&["list"]),
                        DiscoveredResource::new("namespaces", "Namespace", false)
                            .with_verbs(&["list"]),
                    ],
                ),
                ResourceList::new(
                    "apps/v1",
                    vec![
                        DiscoveredResource::new("deployments", "Deployment", true)
                            .with_verbs(&["list", "watch"]),
                    ],
                ),
            ],
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }

    pub fn with_catalog(catalog: Vec<ResourceList>) -> Self {
        Self {
            catalog,
            ..Default::default()
        }
    }

    /// Discovery that never answers
    pub fn hanging_discovery() -> Self {
        Self {
            discovery_hangs: true,
            ..Self::wide()
        }
    }

    pub fn with_items(mut self, resource: &str, count: usize) -> Self {
        self.items.insert(resource.to_string(), count);
        self
    }

    pub fn failing(mut self, resource: &str) -> Self {
        self.failing.insert(resource.to_string());
        self
    }

    pub fn hanging(mut self, resource: &str) -> Self {
        self.hanging.insert(resource.to_string());
        self
    }

    pub fn with_pod(mut self, namespace: &str, pod: &str, containers: &[&str]) -> Self {
        self.pods.entry(namespace.to_string()).or_default().push(PodRef {
            name: pod.to_string(),
            containers: containers.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn failing_logs(mut self, container: &str) -> Self {
        self.failing_logs.insert(container.to_string());
        self
    }

    pub fn with_nodes(mut self, nodes: &[&str]) -> Self {
        self.nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Make `<node>/<path>` fail on the node proxy
    pub fn failing_proxy(mut self, node: &str, path: &str) -> Self {
        self.failing_proxy.insert(format!("{}/{}", node, path));
        self
    }

    pub fn list_calls(&self) -> Vec<(Gvr, ListOptions)> {
        self.list_calls.lock().clone()
    }

    fn object(gvr: &Gvr, name: &str) -> DynamicObject {
        let ar = ApiResource {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            api_version: gvr.api_version(),
            kind: "Object".to_string(),
            plural: gvr.resource.clone(),
        };
        DynamicObject::new(name, &ar)
    }
}

impl DiscoverySource for FakeCluster {
    async fn server_preferred_resources(&self) -> Result<Vec<ResourceList>, BoxError> {
        if self.discovery_hangs {
            std::future::pending::<()>().await;
        }
        if self.unreachable {
            return Err("dial tcp 10.0.0.1:6443: connection refused".into());
        }
        Ok(self.catalog.clone())
    }
}

impl DynamicQuerySource for FakeCluster {
    async fn list(&self, gvr: &Gvr, options: &ListOptions) -> Result<Vec<DynamicObject>, BoxError> {
        self.list_calls.lock().push((gvr.clone(), options.clone()));

        if self.hanging.contains(&gvr.resource) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&gvr.resource) {
            return Err(format!("{} is forbidden", gvr.resource).into());
        }

        let count = self.items.get(&gvr.resource).copied().unwrap_or(0);
        Ok((0..count)
            .map(|i| Self::object(gvr, &format!("{}-{}", gvr.resource, i)))
            .collect())
    }

    async fn get(
        &self,
        gvr: &Gvr,
        _namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, BoxError> {
        if self.failing.contains(&gvr.resource) {
            return Err(format!("{} {} not found", gvr.resource, name).into());
        }
        Ok(Self::object(gvr, name))
    }

    async fn create(
        &self,
        _gvr: &Gvr,
        _namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, BoxError> {
        Ok(object.clone())
    }
}

impl PodLogSource for FakeCluster {
    async fn list_pods(
        &self,
        namespace: &str,
        _options: &ListOptions,
    ) -> Result<Vec<PodRef>, BoxError> {
        if self.unreachable {
            return Err("connection refused".into());
        }
        Ok(self.pods.get(namespace).cloned().unwrap_or_default())
    }

    async fn container_logs(
        &self,
        _namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, BoxError> {
        if self.failing_logs.contains(container) {
            return Err(format!("container {} is waiting to start", container).into());
        }
        Ok(format!("{}/{} started\n", pod, container))
    }
}

impl HostDataSource for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<String>, BoxError> {
        if self.unreachable {
            return Err("connection refused".into());
        }
        Ok(self.nodes.clone())
    }

    async fn node_proxy(&self, node: &str, path: &str) -> Result<String, BoxError> {
        if self.failing_proxy.contains(&format!("{}/{}", node, path)) {
            return Err(format!("proxy to {} failed", node).into());
        }
        match path {
            "configz" => Ok(format!(r#"{{"kubeletconfig":{{"nodeName":"{}"}}}}"#, node)),
            _ => Ok("ok".to_string()),
        }
    }
}

/// Sink that keeps everything in memory
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(PathBuf, String, serde_json::Value)>>,
    texts: Mutex<Vec<(PathBuf, String, String)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Serialized values as `(dir, file, json)`
    pub fn calls(&self) -> Vec<(PathBuf, String, serde_json::Value)> {
        self.calls.lock().clone()
    }

    /// Text writes as `(dir, file, text)`
    pub fn texts(&self) -> Vec<(PathBuf, String, String)> {
        self.texts.lock().clone()
    }

    fn check(&self, dir: &Path, file: &str) -> Result<()> {
        if self.fail {
            return Err(Error::Serialization {
                path: dir.join(file),
                source: "no space left on device".into(),
            });
        }
        Ok(())
    }
}

impl SnapshotSink for RecordingSink {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T, dir: &Path, file: &str) -> Result<()> {
        self.check(dir, file)?;
        let value = serde_json::to_value(value).unwrap();
        self.calls
            .lock()
            .push((dir.to_path_buf(), file.to_string(), value));
        Ok(())
    }

    fn write_text(&self, text: &str, dir: &Path, file: &str) -> Result<()> {
        self.check(dir, file)?;
        self.texts
            .lock()
            .push((dir.to_path_buf(), file.to_string(), text.to_string()));
        Ok(())
    }
}
