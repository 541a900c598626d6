//! A client whose writes are visible to its own cached reads.
//!
//! Controllers usually read from an informer cache and write straight to the
//! API server. Right after a write the cache can still hold the old object,
//! so the next reconcile acts on stale state. [`BlockingClient`] closes that
//! window: every successful write is followed by a barrier that polls the
//! cache until it reflects the write.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::barrier::{Barrier, Predicate};
use crate::client::{Client, Reader, StatusClient, StatusWriter, Writer};
use crate::config::Config;
use crate::error::Result;
use crate::object::{is_unstructured, is_unstructured_type, Object, ObjectKey};
use crate::scheme::ObjectFactory;

/// Read-your-writes client built from a direct client, a cache reader and an
/// object factory.
///
/// * Reads are served by the cache. Unstructured objects, kinds the cache
///   does not hold and kinds whose first listing has not reached the cache
///   are read from the direct client instead.
/// * Writes go to the direct client. When the write fails its error is
///   returned as is and the cache is not consulted.
/// * After a successful write the cache is polled until it shows the write:
///
/// | Operation | Returns once the cache shows the object |
/// |---|---|
/// | `create` | present |
/// | `update`, `patch`, `status().update`, `status().patch` | at the written version, replaced or gone |
/// | `delete` | gone, replaced or marked for deletion |
///
/// The caller's object keeps the fields the direct write populated; cache
/// reads made by the barrier go into a scratch object. Unstructured objects
/// and kinds unknown to the factory skip the barrier. `delete_all_of` is
/// passed to the direct client without one.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use k8s_openapi::api::core::v1::ConfigMap;
/// use kiosk::{ApiClient, BlockingClient, Cache, Scheme, Writer};
/// use kube::api::{ListParams, PostParams};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let kubeconfig = kube::Client::try_default().await?;
///
/// let mut scheme = Scheme::new();
/// scheme.register::<ConfigMap>();
/// let scheme = Arc::new(scheme);
///
/// let mut cache = Cache::new();
/// cache.watch::<ConfigMap>(None, ListParams::default());
/// let store = cache.store();
/// tokio::spawn(cache.start(kubeconfig.clone()));
///
/// let direct = ApiClient::new(kubeconfig, Arc::clone(&scheme));
/// let client = BlockingClient::new(Arc::new(direct), store, scheme);
///
/// let mut config_map = ConfigMap::default();
/// config_map.metadata.name = Some("settings".to_string());
/// config_map.metadata.namespace = Some("default".to_string());
/// client
///     .create(&CancellationToken::new(), &mut config_map, &PostParams::default())
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct BlockingClient<D, C, F> {
    direct: Arc<D>,
    cache: Arc<C>,
    factory: Arc<F>,
    config: Config,
}

impl<D, C, F> Clone for BlockingClient<D, C, F> {
    fn clone(&self) -> Self {
        BlockingClient {
            direct: Arc::clone(&self.direct),
            cache: Arc::clone(&self.cache),
            factory: Arc::clone(&self.factory),
            config: self.config,
        }
    }
}

impl<D, C, F> BlockingClient<D, C, F> {
    /// Wrap a direct client and a cache reader, using default barrier timing.
    pub fn new(direct: Arc<D>, cache: Arc<C>, factory: Arc<F>) -> Self {
        BlockingClient {
            direct,
            cache,
            factory,
            config: Config::default(),
        }
    }

    /// Use `config` for barrier timing.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Barrier timing in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn barrier(&self) -> Barrier<'_, C, F> {
        Barrier {
            cache: &self.cache,
            factory: &self.factory,
            config: &self.config,
        }
    }
}

#[async_trait]
impl<D, C, F> Reader for BlockingClient<D, C, F>
where
    D: Reader,
    C: Reader,
    F: ObjectFactory,
{
    async fn get<K: Object>(
        &self,
        ctx: &CancellationToken,
        key: &ObjectKey,
        object: &mut K,
    ) -> Result<()> {
        if is_unstructured(&*object) {
            return self.direct.get(ctx, key, object).await;
        }
        let cached = self.cache.get(ctx, key, object).await;
        match cached {
            Err(e) if e.is_not_registered() || e.is_not_synced() => {
                trace!(%key, error = %e, "Cache cannot answer, reading from API.");
                self.direct.get(ctx, key, object).await
            }
            result => result,
        }
    }

    async fn list<K: Object>(
        &self,
        ctx: &CancellationToken,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<K>> {
        if is_unstructured_type::<K>() {
            return self.direct.list(ctx, gvk, namespace, params).await;
        }
        match self.cache.list(ctx, gvk, namespace, params).await {
            Err(e) if e.is_not_registered() || e.is_not_synced() => {
                trace!(kind = %gvk.kind, error = %e, "Cache cannot answer, listing from API.");
                self.direct.list(ctx, gvk, namespace, params).await
            }
            result => result,
        }
    }
}

#[async_trait]
impl<D, C, F> Writer for BlockingClient<D, C, F>
where
    D: Writer,
    C: Reader,
    F: ObjectFactory,
{
    async fn create<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()> {
        self.direct.create(ctx, object, params).await?;
        self.barrier().wait(ctx, &*object, Predicate::Present).await
    }

    async fn update<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()> {
        self.direct.update(ctx, object, params).await?;
        self.barrier()
            .wait(ctx, &*object, Predicate::UpdatedOrGone)
            .await
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
        self.direct.patch(ctx, object, patch, params).await?;
        self.barrier()
            .wait(ctx, &*object, Predicate::UpdatedOrGone)
            .await
    }

    async fn delete<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &K,
        params: &DeleteParams,
    ) -> Result<()> {
        self.direct.delete(ctx, object, params).await?;
        self.barrier()
            .wait(ctx, object, Predicate::DeletedOrTombstoned)
            .await
    }

    async fn delete_all_of(
        &self,
        ctx: &CancellationToken,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        list_params: &ListParams,
        params: &DeleteParams,
    ) -> Result<()> {
        self.direct
            .delete_all_of(ctx, gvk, namespace, list_params, params)
            .await
    }
}

impl<D, C, F> StatusClient for BlockingClient<D, C, F>
where
    D: Client,
    C: Reader,
    F: ObjectFactory,
{
    type Status = BlockingStatusWriter<D, C, F>;

    fn status(&self) -> Self::Status {
        BlockingStatusWriter {
            client: self.clone(),
        }
    }
}

/// Status writer of a [`BlockingClient`].
///
/// Writes go to the direct client's status writer and are followed by the
/// same barrier as `update`.
pub struct BlockingStatusWriter<D, C, F> {
    client: BlockingClient<D, C, F>,
}

#[async_trait]
impl<D, C, F> StatusWriter for BlockingStatusWriter<D, C, F>
where
    D: Client,
    C: Reader,
    F: ObjectFactory,
{
    async fn update<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &mut K,
        params: &PostParams,
    ) -> Result<()> {
        self.client.direct.status().update(ctx, object, params).await?;
        self.client
            .barrier()
            .wait(ctx, &*object, Predicate::UpdatedOrGone)
            .await
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
        self.client
            .direct
            .status()
            .patch(ctx, object, patch, params)
            .await?;
        self.client
            .barrier()
            .wait(ctx, &*object, Predicate::UpdatedOrGone)
            .await
    }
}
