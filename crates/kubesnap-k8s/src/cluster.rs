//! kube-backed implementations of the collaborator interfaces

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::Api;
use kube::api::{DynamicObject, GetParams, ListParams, LogParams, PostParams};
use kube::core::{ApiResource, Request};
use kubesnap_types::{BoxError, DiscoveredResource, Gvr, ResourceList};
use tracing::{debug, trace};

use crate::source::{
    DiscoverySource, DynamicQuerySource, HostDataSource, ListOptions, PodLogSource, PodRef,
};

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

/// A live cluster reached through one `kube::Client`
#[derive(Clone)]
pub struct ClusterApi {
    client: kube::Client,
}

impl ClusterApi {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, gvr: &Gvr, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(gvr);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    /// Walk `/api` and `/apis`, taking either the preferred or every version
    async fn discover(&self, all_versions: bool) -> Result<Vec<ResourceList>, kube::Error> {
        let mut lists = Vec::new();

        // The legacy core group is served separately from named groups
        let core = self.client.list_core_api_versions().await?;
        let core_versions: Vec<&String> = if all_versions {
            core.versions.iter().collect()
        } else {
            core.versions.first().into_iter().collect()
        };
        for version in core_versions {
            let resources = self.client.list_core_api_resources(version).await?;
            lists.push(to_resource_list(resources));
        }

        let groups = self.client.list_api_groups().await?;
        for group in groups.groups {
            let versions: Vec<_> = if all_versions {
                group.versions.iter().collect()
            } else {
                group
                    .preferred_version
                    .as_ref()
                    .or_else(|| group.versions.first())
                    .into_iter()
                    .collect()
            };
            for version in versions {
                let resources = self
                    .client
                    .list_api_group_resources(&version.group_version)
                    .await?;
                lists.push(to_resource_list(resources));
            }
        }

        debug!(
            group_versions = lists.len(),
            all_versions, "Fetched discovery document"
        );
        Ok(lists)
    }
}

fn api_resource(gvr: &Gvr) -> ApiResource {
    // Kind is not part of the request path; list items carry their own
    ApiResource {
        group: gvr.group.clone(),
        version: gvr.version.clone(),
        api_version: gvr.api_version(),
        kind: String::new(),
        plural: gvr.resource.clone(),
    }
}

fn to_resource_list(list: APIResourceList) -> ResourceList {
    let resources = list
        .resources
        .into_iter()
        .map(|r| DiscoveredResource {
            name: r.name,
            kind: r.kind,
            namespaced: r.namespaced,
            verbs: r.verbs,
        })
        .collect();
    ResourceList::new(list.group_version, resources)
}

fn list_params(options: &ListOptions) -> ListParams {
    let mut params = ListParams::default();
    if let Some(labels) = &options.label_selector {
        params = params.labels(labels);
    }
    if let Some(fields) = &options.field_selector {
        params = params.fields(fields);
    }
    trace!(
        label_selector = ?options.label_selector,
        field_selector = ?options.field_selector,
        "Built ListParams"
    );
    params
}

impl DiscoverySource for ClusterApi {
    async fn server_preferred_resources(&self) -> Result<Vec<ResourceList>, BoxError> {
        Ok(self.discover(false).await?)
    }

    async fn server_resources(&self) -> Result<Vec<ResourceList>, BoxError> {
        Ok(self.discover(true).await?)
    }
}

impl DynamicQuerySource for ClusterApi {
    /// Follows continue tokens until the server reports no more pages
    async fn list(&self, gvr: &Gvr, options: &ListOptions) -> Result<Vec<DynamicObject>, BoxError> {
        let api = self.dynamic_api(gvr, None);
        let base = list_params(options);
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = base.clone().limit(PAGE_SIZE);
            if let Some(token) = &continue_token {
                params = params.continue_token(token);
            }

            let page = api.list(&params).await?;
            items.extend(page.items);

            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn get(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, BoxError> {
        Ok(self.dynamic_api(gvr, namespace).get(name).await?)
    }

    async fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, BoxError> {
        Ok(self
            .dynamic_api(gvr, namespace)
            .create(&PostParams::default(), object)
            .await?)
    }
}

impl PodLogSource for ClusterApi {
    async fn list_pods(
        &self,
        namespace: &str,
        options: &ListOptions,
    ) -> Result<Vec<PodRef>, BoxError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&list_params(options)).await?;

        Ok(list
            .items
            .into_iter()
            .map(|pod| PodRef {
                name: pod.metadata.name.unwrap_or_default(),
                containers: pod
                    .spec
                    .map(|spec| spec.containers.into_iter().map(|c| c.name).collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, BoxError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            timestamps: true,
            ..Default::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }
}

impl HostDataSource for ClusterApi {
    async fn list_nodes(&self) -> Result<Vec<String>, BoxError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    async fn node_proxy(&self, node: &str, path: &str) -> Result<String, BoxError> {
        let request = Request::new(format!("/api/v1/nodes/{}/proxy", node))
            .get(path, &GetParams::default())?;
        Ok(self.client.request_text(request).await?)
    }
}
