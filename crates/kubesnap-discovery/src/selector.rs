//! Turns the server's discovery document into the list of resources to query

use std::collections::HashSet;

use kubesnap_k8s::DiscoverySource;
use kubesnap_types::{Error, FilterConfig, GroupVersion, Gvr, ResourceList, Result};
use tracing::debug;

/// Fetch discovery fresh and pick the resources one scope pass should list.
///
/// Discovery and group-version parse failures are fatal to the pass.
pub async fn select_resources<D>(source: &D, filter: &FilterConfig) -> Result<Vec<Gvr>>
where
    D: DiscoverySource,
{
    let lists = source
        .server_preferred_resources()
        .await
        .map_err(Error::Discovery)?;

    let selected = select_from(&lists, filter)?;
    debug!(
        scope = %filter.scope,
        discovered = lists.iter().map(|l| l.resources.len()).sum::<usize>(),
        selected = selected.len(),
        "Selected resources to gather"
    );
    Ok(selected)
}

/// Pure selection over an already fetched discovery document.
///
/// Keeps a resource when it is allow-listed (or no allow-list is set), its
/// scope matches the pass, and it supports `list`. Output is deduplicated and
/// keeps discovery order.
pub fn select_from(lists: &[ResourceList], filter: &FilterConfig) -> Result<Vec<Gvr>> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for list in lists {
        let gv = GroupVersion::parse(&list.group_version)?;

        for resource in &list.resources {
            if !filter.allows(&resource.name) {
                continue;
            }

            // Only look at either namespaced objects or cluster objects
            if !filter.scope.admits(resource.namespaced) {
                continue;
            }

            if !resource.is_listable() {
                continue;
            }

            let gvr = gv.with_resource(resource.name.clone());
            if seen.insert(gvr.clone()) {
                selected.push(gvr);
            }
        }
    }

    Ok(selected)
}
