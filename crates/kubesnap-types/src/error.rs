use std::path::PathBuf;

use thiserror::Error;

use crate::{GroupKind, Gvr};

/// Boxed source error from a transport or serializer
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the discovery and query engine.
///
/// `Discovery` and `DiscoveryParse` abort a scope pass. Everything else is
/// confined to the single operation that produced it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("discovering server resources")]
    Discovery(#[source] BoxError),

    #[error("parsing group version {group_version:?}: {reason}")]
    DiscoveryParse {
        group_version: String,
        reason: String,
    },

    #[error("no resource mapping for {group_kind} at version {version:?}")]
    Mapping { group_kind: GroupKind, version: String },

    #[error("object {object} has no {field}")]
    Accessor { field: &'static str, object: String },

    #[error("invalid label selector {selector:?}: {reason}")]
    LabelSelectorParse { selector: String, reason: String },

    #[error("listing resource {gvr}")]
    Query {
        gvr: Gvr,
        #[source]
        source: BoxError,
    },

    #[error("{action} {object} as {gvr}")]
    Api {
        action: &'static str,
        object: String,
        gvr: Gvr,
        #[source]
        source: BoxError,
    },

    /// Host-data and pod-log gathering
    #[error("gathering {target}")]
    Gather {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("writing {}", .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("pass cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error aborts the whole scope pass
    pub fn is_pass_fatal(&self) -> bool {
        matches!(
            self,
            Self::Discovery(_) | Self::DiscoveryParse { .. } | Self::Cancelled
        )
    }

    /// This error followed by each of its sources, separated by `: `
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}
