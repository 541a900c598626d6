//! Direct client: every call is a round trip to the Kubernetes API.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::client::{Reader, StatusClient, StatusWriter, Writer};
use crate::error::{Error, Result};
use crate::object::{gvk_of, Object, ObjectKey};
use crate::scheme::Scheme;

/// Client that talks to the API server for every operation.
///
/// Objects are sent and received as [`DynamicObject`]s and converted to the
/// caller's type with `serde_json`. Request URLs come from the resource
/// registered in the [`Scheme`], falling back to a guessed plural for kinds
/// it does not know.
#[derive(Clone)]
pub struct ApiClient {
    client: kube::Client,
    scheme: Arc<Scheme>,
}

impl ApiClient {
    /// Create a direct client.
    pub fn new(client: kube::Client, scheme: Arc<Scheme>) -> Self {
        ApiClient { client, scheme }
    }

    fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = self
            .scheme
            .api_resource(gvk)
            .cloned()
            .unwrap_or_else(|| ApiResource::from_gvk(gvk));
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn api_for<K: Object>(&self, object: &K) -> Result<(Api<DynamicObject>, ObjectKey)> {
        let gvk = gvk_of(object)?;
        let key = ObjectKey::from_meta(object.meta())?;
        Ok((self.api(&gvk, key.namespace()), key))
    }
}

/// Race `request` against the caller's cancellation.
async fn cancellable<T, F>(ctx: &CancellationToken, request: F) -> Result<T>
where
    F: Future<Output = kube::Result<T>>,
{
    tokio::select! {
        _ = ctx.cancelled() => Err(Error::Cancelled),
        result = request => result.map_err(Error::from),
    }
}

fn to_dynamic<K: Object>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn from_dynamic<K: Object>(dynamic_object: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(dynamic_object)?)?)
}

#[async_trait]
impl Reader for ApiClient {
    async fn get<K: Object>(
        &self,
        ctx: &CancellationToken,
        key: &ObjectKey,
        object: &mut K,
    ) -> Result<()> {
        let gvk = gvk_of(&*object)?;
        let api = self.api(&gvk, key.namespace());
        let fetched = cancellable(ctx, api.get(key.name())).await?;
        *object = from_dynamic(fetched)?;
        Ok(())
    }

    async fn list<K: Object>(
        &self,
        ctx: &CancellationToken,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<K>> {
        let api = self.api(gvk, namespace);
        let list = cancellable(ctx, api.list(params)).await?;
        list.items.into_iter().map(from_dynamic).collect()
    }
}

#[async_trait]
impl Writer for ApiClient {
    async fn create<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()> {
        let gvk = gvk_of(&*object)?;
        let api = self.api(&gvk, object.meta().namespace.as_deref());
        let request = to_dynamic(&*object)?;
        let created = cancellable(ctx, api.create(params, &request)).await?;
        trace!(kind = %gvk.kind, uid = ?created.metadata.uid, "Created object.");
        *object = from_dynamic(created)?;
        Ok(())
    }

    async fn update<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()> {
        let (api, key) = self.api_for(&*object)?;
        let request = to_dynamic(&*object)?;
        let replaced = cancellable(ctx, api.replace(key.name(), params, &request)).await?;
        *object = from_dynamic(replaced)?;
        Ok(())
    }

    async fn patch<K, P>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        patch: &Patch<P>,
        params: &PatchParams,
    ) -> Result<()>
    where
        K: Object,
        P: Serialize + Debug + Send + Sync,
    {
        let (api, key) = self.api_for(&*object)?;
        let patched = cancellable(ctx, api.patch(key.name(), params, patch)).await?;
        *object = from_dynamic(patched)?;
        Ok(())
    }

    async fn delete<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &K,
        params: &DeleteParams,
    ) -> Result<()> {
        let (api, key) = self.api_for(object)?;
        cancellable(ctx, api.delete(key.name(), params)).await?;
        Ok(())
    }

    async fn delete_all_of(
        &self,
        ctx: &CancellationToken,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        list_params: &ListParams,
        params: &DeleteParams,
    ) -> Result<()> {
        let api = self.api(gvk, namespace);
        cancellable(ctx, api.delete_collection(params, list_params)).await?;
        Ok(())
    }
}

impl StatusClient for ApiClient {
    type Status = ApiStatusWriter;

    fn status(&self) -> ApiStatusWriter {
        ApiStatusWriter {
            client: self.clone(),
        }
    }
}

/// Writes the status subresource through the API server.
#[derive(Clone)]
pub struct ApiStatusWriter {
    client: ApiClient,
}

#[async_trait]
impl StatusWriter for ApiStatusWriter {
    async fn update<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()> {
        let (api, key) = self.client.api_for(&*object)?;
        let data = serde_json::to_vec(&*object)?;
        let replaced = cancellable(ctx, api.replace_status(key.name(), params, data)).await?;
        *object = from_dynamic(replaced)?;
        Ok(())
    }

    async fn patch<K, P>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        patch: &Patch<P>,
        params: &PatchParams,
    ) -> Result<()>
    where
        K: Object,
        P: Serialize + Debug + Send + Sync,
    {
        let (api, key) = self.client.api_for(&*object)?;
        let patched = cancellable(ctx, api.patch_status(key.name(), params, patch)).await?;
        *object = from_dynamic(patched)?;
        Ok(())
    }
}
