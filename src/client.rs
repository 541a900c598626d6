//! The client surface shared by the direct, cached and blocking clients.
//!
//! Every operation takes the caller's cancellation token first and passes
//! the `kube::api` parameter types through untouched, so one implementation
//! can stand in for another without changing call sites.

use std::fmt::Debug;

use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::object::{Object, ObjectKey};

/// Reads objects.
#[async_trait::async_trait]
pub trait Reader: Send + Sync {
    /// Fetch the object stored under `key` into `object`.
    ///
    /// The kind is taken from `object`, which must carry its type metadata.
    async fn get<K: Object>(
        &self,
        ctx: &CancellationToken,
        key: &ObjectKey,
        object: &mut K,
    ) -> Result<()>;

    /// List objects of kind `gvk`, optionally restricted to `namespace`.
    async fn list<K: Object>(
        &self,
        ctx: &CancellationToken,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<K>>;
}

/// Writes objects.
///
/// `create`, `update` and `patch` overwrite `object` with the server's
/// response, so server-assigned fields are visible to the caller.
#[async_trait::async_trait]
pub trait Writer: Send + Sync {
    /// Create `object`.
    async fn create<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()>;

    /// Replace `object`.
    async fn update<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()>;

    /// Apply `patch` to the object identified by `object`.
    async fn patch<K, P>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        patch: &Patch<P>,
        params: &PatchParams,
    ) -> Result<()>
    where
        K: Object,
        P: Serialize + Debug + Send + Sync;

    /// Delete the object identified by `object`.
    async fn delete<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &K,
        params: &DeleteParams,
    ) -> Result<()>;

    /// Delete every object of kind `gvk` matching `list_params`.
    async fn delete_all_of(
        &self,
        ctx: &CancellationToken,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        list_params: &ListParams,
        params: &DeleteParams,
    ) -> Result<()>;
}

/// Writes the status subresource.
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace the status of `object`.
    async fn update<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()>;

    /// Apply `patch` to the status of `object`.
    async fn patch<K, P>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        patch: &Patch<P>,
        params: &PatchParams,
    ) -> Result<()>
    where
        K: Object,
        P: Serialize + Debug + Send + Sync;
}

/// Hands out a writer for the status subresource.
pub trait StatusClient {
    /// The status writer type.
    type Status: StatusWriter;

    /// Writer for the status subresource.
    fn status(&self) -> Self::Status;
}

/// The full client surface.
pub trait Client: Reader + Writer + StatusClient {}

impl<T> Client for T where T: Reader + Writer + StatusClient {}
