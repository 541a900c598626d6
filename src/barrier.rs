//! Waits for the local cache to reflect a write that has already committed.
//!
//! After a successful write the barrier repeatedly reads the object back from
//! the cache into a scratch object and asks a [`Predicate`] whether the cache
//! has caught up. It stops when the predicate holds, when a read fails with
//! an unexpected error, when the deadline passes or when the caller cancels.

use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::client::Reader;
use crate::config::{Config, MIN_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::object::{compare_resource_versions, gvk_of, is_unstructured, Object, Snapshot};
use crate::scheme::ObjectFactory;

/// What the cache must show before a write is considered visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// The object exists. Used after create.
    Present,
    /// The object is at least at the written version, was replaced, or is
    /// gone. Used after update, patch and status writes.
    UpdatedOrGone,
    /// The object is gone, was replaced, or is marked for deletion. Used
    /// after delete.
    DeletedOrTombstoned,
}

impl Predicate {
    /// Evaluate a cache read against the snapshot taken after the write.
    ///
    /// Returns `Ok(true)` once converged, `Ok(false)` to keep polling and an
    /// error to stop polling.
    pub fn evaluate(self, observed: Result<&ObjectMeta>, snapshot: &Snapshot) -> Result<bool> {
        let meta = match observed {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(self != Predicate::Present),
            // The cache cannot hold this kind, so there is nothing to wait for.
            Err(e) if e.is_not_registered() => return Ok(true),
            Err(e) if e.is_not_synced() => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(match self {
            Predicate::Present => true,
            Predicate::UpdatedOrGone => {
                snapshot.uid_differs(meta) || at_least_written(meta, snapshot)
            }
            Predicate::DeletedOrTombstoned => {
                snapshot.uid_differs(meta) || meta.deletion_timestamp.is_some()
            }
        })
    }
}

fn at_least_written(meta: &ObjectMeta, snapshot: &Snapshot) -> bool {
    match (&meta.resource_version, &snapshot.resource_version) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(observed), Some(written)) => {
            compare_resource_versions(observed, written) != Ordering::Less
        }
    }
}

/// Polls a cache until it reflects a write.
pub(crate) struct Barrier<'a, C, F> {
    pub(crate) cache: &'a C,
    pub(crate) factory: &'a F,
    pub(crate) config: &'a Config,
}

impl<'a, C: Reader, F: ObjectFactory> Barrier<'a, C, F> {
    /// Block until the cache shows `object` in the state `predicate` expects.
    ///
    /// `object` is the caller's object as populated by the direct write. It is
    /// only read; cache reads go into a separate scratch object.
    #[tracing::instrument(
        level = "trace",
        skip(self, ctx, object),
        fields(name = ?object.meta().name, namespace = ?object.meta().namespace)
    )]
    pub(crate) async fn wait<K: Object>(
        &self,
        ctx: &CancellationToken,
        object: &K,
        predicate: Predicate,
    ) -> Result<()> {
        if is_unstructured(object) {
            trace!("Unstructured object, skipping cache barrier.");
            return Ok(());
        }
        let snapshot = Snapshot::capture(object.meta())?;
        let gvk = gvk_of(object)?;
        let template = match self.factory.new_object(&gvk) {
            Ok(template) => template,
            Err(e) if e.is_not_registered() => {
                trace!(kind = %gvk.kind, "Kind not registered, skipping cache barrier.");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let polling = tokio::time::timeout(
            self.config.poll_timeout,
            self.poll::<K>(ctx, &template, &snapshot, predicate),
        );
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::Cancelled),
            result = polling => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    kind: gvk.kind.clone(),
                    key: snapshot.key.clone(),
                    timeout: self.config.poll_timeout,
                }),
            },
        }
    }

    async fn poll<K: Object>(
        &self,
        ctx: &CancellationToken,
        template: &serde_json::Value,
        snapshot: &Snapshot,
        predicate: Predicate,
    ) -> Result<()> {
        let interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let mut scratch: K = serde_json::from_value(template.clone())?;
            let observed = self
                .cache
                .get(ctx, &snapshot.key, &mut scratch)
                .await
                .map(|_| scratch.meta());
            if predicate.evaluate(observed, snapshot)? {
                trace!(attempts, "Cache reflects write.");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
    }
}
