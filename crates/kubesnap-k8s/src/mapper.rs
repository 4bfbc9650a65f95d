use std::collections::HashMap;

use kube::api::DynamicObject;
use kubesnap_types::{
    Error, GroupKind, GroupVersion, GroupVersionKind, Gvr, ResourceList, Result,
};
use tracing::debug;

use crate::source::{DiscoverySource, DynamicQuerySource};

/// Where a kind lives on the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestMapping {
    pub gvr: Gvr,
    pub namespaced: bool,
}

/// Kind to resource mapping built from a discovery document
#[derive(Clone, Debug, Default)]
pub struct RestMapper {
    /// Keyed by group and lowercased kind; versions kept in discovery order
    mappings: HashMap<(String, String), Vec<(String, RestMapping)>>,
}

impl RestMapper {
    /// Build from discovery output. Unparseable group versions are fatal.
    pub fn from_resource_lists(lists: &[ResourceList]) -> Result<Self> {
        let mut mapper = Self::default();

        for list in lists {
            let gv = GroupVersion::parse(&list.group_version)?;
            for resource in &list.resources {
                // Subresources (pods/log, deployments/scale) share their parent's kind
                if resource.name.contains('/') || resource.kind.is_empty() {
                    continue;
                }
                let key = (gv.group.clone(), resource.kind.to_lowercase());
                let versions = mapper.mappings.entry(key).or_default();
                if versions.iter().any(|(v, _)| *v == gv.version) {
                    continue;
                }
                versions.push((
                    gv.version.clone(),
                    RestMapping {
                        gvr: gv.with_resource(resource.name.clone()),
                        namespaced: resource.namespaced,
                    },
                ));
            }
        }

        Ok(mapper)
    }

    /// Resolve a kind at `version`, or at its first discovered version when
    /// `version` is empty
    pub fn mapping(&self, group_kind: &GroupKind, version: &str) -> Result<&RestMapping> {
        let not_found = || Error::Mapping {
            group_kind: group_kind.clone(),
            version: version.to_string(),
        };

        let versions = self
            .mappings
            .get(&(group_kind.group.clone(), group_kind.kind.to_lowercase()))
            .ok_or_else(not_found)?;

        let found = if version.is_empty() {
            versions.first()
        } else {
            versions.iter().find(|(v, _)| v == version)
        };
        found.map(|(_, mapping)| mapping).ok_or_else(not_found)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// Identity fields of a schema-agnostic object
pub trait MetadataAccessor {
    fn name(&self) -> Result<&str>;

    /// Empty for cluster-scoped objects
    fn namespace(&self) -> Result<&str>;

    fn resource_version(&self) -> Result<&str>;

    fn group_version_kind(&self) -> Result<GroupVersionKind>;
}

impl MetadataAccessor for DynamicObject {
    fn name(&self) -> Result<&str> {
        self.metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| accessor_error(self, "metadata.name"))
    }

    fn namespace(&self) -> Result<&str> {
        Ok(self.metadata.namespace.as_deref().unwrap_or(""))
    }

    fn resource_version(&self) -> Result<&str> {
        self.metadata
            .resource_version
            .as_deref()
            .ok_or_else(|| accessor_error(self, "metadata.resourceVersion"))
    }

    fn group_version_kind(&self) -> Result<GroupVersionKind> {
        let types = self
            .types
            .as_ref()
            .ok_or_else(|| accessor_error(self, "apiVersion/kind"))?;
        GroupVersionKind::from_api_version(&types.api_version, &types.kind)
    }
}

fn accessor_error(obj: &DynamicObject, field: &'static str) -> Error {
    let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("object");
    let object = match &obj.metadata.name {
        Some(name) => format!("{}/{}", kind, name),
        None => format!("{} (unnamed)", kind),
    };
    Error::Accessor { field, object }
}

/// Resource mapper bound to a live cluster
pub struct ApiHelper<C> {
    client: C,
    mapper: RestMapper,
}

impl<C> ApiHelper<C>
where
    C: DiscoverySource + DynamicQuerySource,
{
    /// Build a helper whose mapper reflects the cluster's current catalog
    pub async fn new(client: C) -> Result<Self> {
        let mapper = Self::discover_mapper(&client).await?;
        Ok(Self { client, mapper })
    }

    pub fn with_mapper(client: C, mapper: RestMapper) -> Self {
        Self { client, mapper }
    }

    /// Rebuild the mapper, e.g. after CRDs were installed or removed
    pub async fn refresh(&mut self) -> Result<()> {
        self.mapper = Self::discover_mapper(&self.client).await?;
        Ok(())
    }

    async fn discover_mapper(client: &C) -> Result<RestMapper> {
        let lists = client
            .server_resources()
            .await
            .map_err(Error::Discovery)?;
        let mapper = RestMapper::from_resource_lists(&lists)?;
        debug!(kinds = mapper.len(), "Built resource mapper");
        Ok(mapper)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn resolve_identifier(&self, group_kind: &GroupKind, version: &str) -> Result<Gvr> {
        Ok(self.mapper.mapping(group_kind, version)?.gvr.clone())
    }

    /// Create any object, in the namespace its metadata names
    pub async fn create_object(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let gvk = obj.group_version_kind()?;
        let mapping = self.mapper.mapping(&gvk.group_kind(), &gvk.version)?;
        let name = obj.name()?;
        let namespace = obj.namespace()?;

        let target = (mapping.namespaced && !namespace.is_empty()).then_some(namespace);
        self.client
            .create(&mapping.gvr, target, obj)
            .await
            .map_err(|source| Error::Api {
                action: "creating",
                object: name.to_string(),
                gvr: mapping.gvr.clone(),
                source,
            })
    }
}
