//! Collaborator interfaces consumed by the collection engine
//!
//! Every method is generic over [`Gvr`]; no method knows the schema of the
//! objects it moves around.

use std::future::Future;

use kube::api::DynamicObject;
use kubesnap_types::{BoxError, Gvr, ResourceList};

/// Options for a dynamic list call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

/// Server-side resource catalog
pub trait DiscoverySource {
    /// Resources in the preferred version of every group
    fn server_preferred_resources(
        &self,
    ) -> impl Future<Output = Result<Vec<ResourceList>, BoxError>> + Send;

    /// Resources in every served version of every group
    fn server_resources(&self) -> impl Future<Output = Result<Vec<ResourceList>, BoxError>> + Send {
        self.server_preferred_resources()
    }
}

/// Schema-agnostic reads and writes against any resource identifier
pub trait DynamicQuerySource {
    /// List across all namespaces, narrowed only by the options' selectors
    fn list(
        &self,
        gvr: &Gvr,
        options: &ListOptions,
    ) -> impl Future<Output = Result<Vec<DynamicObject>, BoxError>> + Send;

    fn get(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
    ) -> impl Future<Output = Result<DynamicObject, BoxError>> + Send;

    fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> impl Future<Output = Result<DynamicObject, BoxError>> + Send;
}

/// A pod and the containers whose logs can be fetched
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub containers: Vec<String>,
}

pub trait PodLogSource {
    fn list_pods(
        &self,
        namespace: &str,
        options: &ListOptions,
    ) -> impl Future<Output = Result<Vec<PodRef>, BoxError>> + Send;

    fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> impl Future<Output = Result<String, BoxError>> + Send;
}

/// Per-node endpoints reached through the API server's node proxy
pub trait HostDataSource {
    fn list_nodes(&self) -> impl Future<Output = Result<Vec<String>, BoxError>> + Send;

    /// Fetch `path` (e.g. `configz`) from a node's proxy endpoint
    fn node_proxy(
        &self,
        node: &str,
        path: &str,
    ) -> impl Future<Output = Result<String, BoxError>> + Send;
}
