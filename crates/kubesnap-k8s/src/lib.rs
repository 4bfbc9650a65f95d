//! Kubernetes client for kubesnap
//!
//! This crate provides the collaborator interfaces the collection engine
//! talks to (discovery, dynamic queries, pod logs, node proxy), their
//! kube-backed implementations, and the resource mapper that turns kinds into
//! queryable resource identifiers.

mod client;
mod cluster;
mod mapper;
mod source;

pub use client::KubeClient;
pub use cluster::ClusterApi;
pub use mapper::{ApiHelper, MetadataAccessor, RestMapper, RestMapping};
pub use source::{
    DiscoverySource, DynamicQuerySource, HostDataSource, ListOptions, PodLogSource, PodRef,
};

// Re-export types that are used in our public API
pub use kube::api::DynamicObject;
pub use kubesnap_types::{
    DiscoveredResource, Error, GroupKind, GroupVersion, GroupVersionKind, Gvr, ResourceList,
};
