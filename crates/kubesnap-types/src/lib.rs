//! Shared types for kubesnap
//!
//! This crate contains the resource identifiers, discovery descriptors, filter
//! configuration and query records used across the kubesnap crates.

mod error;
mod label_selector;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

pub use error::{BoxError, Error, Result};
pub use label_selector::{LabelSelector, Operator, Requirement};

// ============================================================================
// Resource Identity
// ============================================================================

/// A parsed `group/version` pair. The core group has an empty group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Parse a discovery `groupVersion` string.
    ///
    /// `"v1"` is the core group, `"apps/v1"` a named group, and the empty
    /// string the empty group version. More than one `/` is rejected.
    pub fn parse(group_version: &str) -> Result<Self> {
        if group_version.is_empty() || group_version == "/" {
            return Ok(Self::default());
        }

        match group_version.split_once('/') {
            None => Ok(Self::new("", group_version)),
            Some((group, version)) => {
                if version.contains('/') {
                    return Err(Error::DiscoveryParse {
                        group_version: group_version.to_string(),
                        reason: "unexpected '/' in version".to_string(),
                    });
                }
                Ok(Self::new(group, version))
            }
        }
    }

    /// The `apiVersion` form: `"v1"` for core, `"group/version"` otherwise
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn with_resource(&self, resource: impl Into<String>) -> Gvr {
        Gvr {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: resource.into(),
        }
    }

    pub fn with_kind(&self, kind: impl Into<String>) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_version())
    }
}

/// Resource identifier: a queryable collection endpoint.
///
/// Compared triple-wise and hashable, so it can key the selector's
/// deduplication set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `pods`
    pub resource: String,
}

impl Gvr {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(self.group.clone(), self.version.clone())
    }

    pub fn api_version(&self) -> String {
        self.group_version().api_version()
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Resource={}", self.api_version(), self.resource)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Build from an object's `apiVersion` and `kind`
    pub fn from_api_version(api_version: &str, kind: &str) -> Result<Self> {
        Ok(GroupVersion::parse(api_version)?.with_kind(kind))
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }
}

// ============================================================================
// Discovery Types
// ============================================================================

/// Server-reported metadata for one resource type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredResource {
    /// Plural name, e.g. `deployments`
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

impl DiscoveredResource {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, namespaced: bool) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            namespaced,
            verbs: Vec::new(),
        }
    }

    pub fn with_verbs(mut self, verbs: &[&str]) -> Self {
        self.verbs = verbs.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn supports(&self, verb: &str) -> bool {
        self.verbs.iter().any(|v| v == verb)
    }

    pub fn is_listable(&self) -> bool {
        self.supports("list")
    }
}

/// All resources the server prefers for one group version
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceList {
    /// Raw `groupVersion` string as reported by the server
    pub group_version: String,
    pub resources: Vec<DiscoveredResource>,
}

impl ResourceList {
    pub fn new(group_version: impl Into<String>, resources: Vec<DiscoveredResource>) -> Self {
        Self {
            group_version: group_version.into(),
            resources,
        }
    }
}

// ============================================================================
// Filter Configuration
// ============================================================================

/// Which half of the resource catalog a pass collects
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Cluster-scoped (non-namespaced) resources
    Cluster,
    /// Namespaced resources within one namespace
    Namespace(String),
}

impl Scope {
    pub fn from_namespace(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) => Self::Namespace(ns.to_string()),
            None => Self::Cluster,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Cluster => None,
            Self::Namespace(ns) => Some(ns),
        }
    }

    /// Whether resources with the given namespaced flag belong to this scope
    pub fn admits(&self, namespaced: bool) -> bool {
        match self {
            Self::Cluster => !namespaced,
            Self::Namespace(_) => namespaced,
        }
    }

    /// Scope string stored on query records (empty for cluster scope)
    pub fn label(&self) -> &str {
        self.namespace().unwrap_or("")
    }

    /// Field selector restricting a list to this scope's namespace
    pub fn field_selector(&self) -> Option<String> {
        self.namespace()
            .filter(|ns| !ns.is_empty())
            .map(|ns| format!("metadata.namespace={}", ns))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str("cluster"),
            Self::Namespace(ns) => write!(f, "namespace {}", ns),
        }
    }
}

/// User-facing filters, shared by every pass of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Label selector passed verbatim to list calls
    pub label_selector: String,

    /// Resource plural names to collect (empty = all)
    pub resources: Vec<String>,
}

impl FilterOptions {
    /// Freeze these filters for one scope pass
    pub fn for_scope(&self, scope: Scope) -> FilterConfig {
        FilterConfig {
            scope,
            resources: self.resources.clone(),
            label_selector: self.label_selector.clone(),
        }
    }
}

/// Filters for a single scope pass; immutable once built
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterConfig {
    pub scope: Scope,
    pub resources: Vec<String>,
    pub label_selector: String,
}

impl FilterConfig {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            resources: Vec::new(),
            label_selector: String::new(),
        }
    }

    pub fn with_resources(mut self, resources: &[&str]) -> Self {
        self.resources = resources.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = selector.into();
        self
    }

    /// Empty allow-list admits every resource
    pub fn allows(&self, resource: &str) -> bool {
        self.resources.is_empty() || self.resources.iter().any(|r| r == resource)
    }
}

// ============================================================================
// Query Records
// ============================================================================

/// How a recorded query ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryOutcome {
    Success,
    Failed(String),
    Cancelled,
    TimedOut,
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl From<Result<()>> for QueryOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::Failed(e.chain()),
        }
    }
}

/// One ledger entry for an attempted query
#[derive(Clone, Debug)]
pub struct QueryRecord {
    pub name: String,

    /// Namespace the query ran in (empty for cluster scope)
    pub namespace: String,

    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: QueryOutcome,
}

impl QueryRecord {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        duration: Duration,
        outcome: QueryOutcome,
    ) -> Self {
        let started_at = Utc::now()
            - chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            name: name.into(),
            namespace: namespace.into(),
            started_at,
            duration,
            outcome,
        }
    }
}

impl Serialize for QueryRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("QueryRecord", 6)?;
        state.serialize_field("queryobj", &self.name)?;
        state.serialize_field("namespace", &self.namespace)?;
        state.serialize_field("started_at", &self.started_at)?;
        state.serialize_field("time", &format!("{:?}", self.duration))?;
        state.serialize_field("status", self.outcome.status())?;
        state.serialize_field("error", &self.outcome.error())?;
        state.end()
    }
}
