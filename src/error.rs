//! The error type shared by every client in this crate.
//!
//! Direct, cached and blocking clients all return [`Error`], so a failure
//! produced by one layer can be handed back by the layer above it without
//! being rewrapped.

use std::time::Duration;

use kube::error::ErrorResponse;
use thiserror::Error;

use crate::object::ObjectKey;

/// Convenience alias for results produced by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the kiosk clients.
#[derive(Debug, Error)]
pub enum Error {
    /// The Kubernetes API rejected or failed a request.
    #[error(transparent)]
    Api(#[from] kube::Error),
    /// The object is not present in the local cache.
    #[error("{kind} {key} not found in cache")]
    NotFound {
        /// Kind of the requested object.
        kind: String,
        /// Namespace and name of the requested object.
        key: ObjectKey,
    },
    /// No type is registered for the requested group, version and kind.
    #[error("no kind {kind} is registered for version {}", api_version(.group, .version))]
    NotRegistered {
        /// API group, empty for the core group.
        group: String,
        /// API version.
        version: String,
        /// Kind.
        kind: String,
    },
    /// The kind is watched but its first listing has not reached the cache.
    #[error("cache for kind {kind} in version {} has not synced", api_version(.group, .version))]
    NotSynced {
        /// API group, empty for the core group.
        group: String,
        /// API version.
        version: String,
        /// Kind.
        kind: String,
    },
    /// The cache did not observe a write before the deadline.
    #[error("timed out after {timeout:?} waiting for the cache to observe {kind} {key}")]
    Timeout {
        /// Kind of the written object.
        kind: String,
        /// Namespace and name of the written object.
        key: ObjectKey,
        /// How long the barrier waited.
        timeout: Duration,
    },
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// The object does not carry `apiVersion` and `kind`.
    #[error("object has no apiVersion or kind")]
    MissingTypeMeta,
    /// The object does not carry `metadata.name`.
    #[error("object has no name")]
    MissingName,
    /// A list selector could not be evaluated against the cache.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    /// An object could not be converted between its typed and wire forms.
    #[error("could not convert object: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for cache misses and for API `404 NotFound` responses.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::Api(kube::Error::Api(ErrorResponse { code: 404, .. }))
        )
    }

    /// Returns true when the kind is unknown to the scheme or the cache.
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Error::NotRegistered { .. })
    }

    /// Returns true when the cache has not loaded the kind yet.
    pub fn is_not_synced(&self) -> bool {
        matches!(self, Error::NotSynced { .. })
    }

    /// Returns true when a barrier gave up waiting on the cache.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns true when the caller's context was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{}/{}", group, version)
    }
}
