//! Snapshot output: where results go and how they are written

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use kubesnap_types::{Error, Result, Scope};

/// Namespaced API resources (pods, etc)
pub const NS_RESOURCE_LOCATION: &str = "resources/ns";
/// Non-namespaced API resources (nodes, etc)
pub const CLUSTER_RESOURCE_LOCATION: &str = "resources/cluster";
/// Host information (configz, healthz)
pub const HOSTS_LOCATION: &str = "hosts";
/// Pod logs
pub const POD_LOGS_LOCATION: &str = "podlogs";
/// Snapshot metadata (query times, config)
pub const META_LOCATION: &str = "meta";

/// Directory scheme of one snapshot
#[derive(Clone, Debug)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `resources/ns/<ns>` for namespace passes, `resources/cluster` otherwise
    pub fn resource_dir(&self, scope: &Scope) -> PathBuf {
        match scope {
            Scope::Cluster => self.root.join(CLUSTER_RESOURCE_LOCATION),
            Scope::Namespace(ns) => self.root.join(NS_RESOURCE_LOCATION).join(ns),
        }
    }

    pub fn host_dir(&self, node: &str) -> PathBuf {
        self.root.join(HOSTS_LOCATION).join(node)
    }

    pub fn pod_log_dir(&self, namespace: &str, pod: &str) -> PathBuf {
        self.root
            .join(POD_LOGS_LOCATION)
            .join(namespace)
            .join(pod)
            .join("logs")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_LOCATION)
    }
}

/// Persists query results
pub trait SnapshotSink: Sync {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T, dir: &Path, file: &str) -> Result<()>;

    fn write_text(&self, text: &str, dir: &Path, file: &str) -> Result<()>;
}

/// Writes pretty-printed JSON files, creating directories as needed
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFileSink;

impl JsonFileSink {
    fn write(dir: &Path, file: &str, content: &[u8]) -> Result<()> {
        let path = dir.join(file);
        let err = |source: std::io::Error| Error::Serialization {
            path: path.clone(),
            source: source.into(),
        };
        fs::create_dir_all(dir).map_err(err)?;
        fs::write(&path, content).map_err(err)
    }
}

impl SnapshotSink for JsonFileSink {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T, dir: &Path, file: &str) -> Result<()> {
        let content = serde_json::to_vec_pretty(value).map_err(|e| Error::Serialization {
            path: dir.join(file),
            source: e.into(),
        })?;
        Self::write(dir, file, &content)
    }

    fn write_text(&self, text: &str, dir: &Path, file: &str) -> Result<()> {
        Self::write(dir, file, text.as_bytes())
    }
}
