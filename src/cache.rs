//! Keeps a [`Store`] current by watching the cluster.

use std::sync::Arc;

use futures::{FutureExt, StreamExt, TryStreamExt};
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Resource;
use kube_runtime::watcher::{watcher, Event};
use tracing::{debug, info, warn};
use tracing_futures::Instrument;

use crate::error::Result;
use crate::object::ObjectKey;
use crate::store::Store;

/// Captures configuration needed to configure a watcher.
#[derive(Clone, Debug)]
pub struct Watch {
    /// The API resource to be watched.
    pub resource: ApiResource,
    /// Optionally restrict watching to namespace.
    pub namespace: Option<String>,
    /// Restrict to objects matching list params (default watches everything).
    pub list_params: ListParams,
}

impl Watch {
    /// Watch a statically typed resource.
    pub fn new<K: Resource<DynamicType = ()>>(
        namespace: Option<String>,
        list_params: ListParams,
    ) -> Self {
        Watch {
            resource: ApiResource::erase::<K>(&()),
            namespace,
            list_params,
        }
    }

    /// The (group, version, kind) tuple of the watched resource.
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind {
            group: self.resource.group.clone(),
            version: self.resource.version.clone(),
            kind: self.resource.kind.clone(),
        }
    }
}

/// A set of watches feeding one shared [`Store`].
///
/// Register every kind the controller reads before calling
/// [`Cache::start`]; the store only answers for watched kinds.
pub struct Cache {
    store: Arc<Store>,
    watches: Vec<Watch>,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new()
    }
}

impl Cache {
    /// Create a cache with an empty store.
    pub fn new() -> Self {
        Cache {
            store: Arc::new(Store::new()),
            watches: vec![],
        }
    }

    /// Watch objects of type `K`.
    pub fn watch<K: Resource<DynamicType = ()>>(
        &mut self,
        namespace: Option<String>,
        list_params: ListParams,
    ) -> &mut Self {
        self.watches.push(Watch::new::<K>(namespace, list_params));
        self
    }

    /// Register a prepared watch, e.g. for a kind only known at runtime.
    pub fn watch_with(&mut self, watch: Watch) -> &mut Self {
        self.watches.push(watch);
        self
    }

    /// The store read by clients.
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Run all watches, blocking until every watch stream ends.
    pub async fn start(self, client: kube::Client) {
        let mut tasks = Vec::with_capacity(self.watches.len());
        for watch in self.watches {
            self.store.track(&watch.gvk()).await;
            let span = tracing::info_span!("watch", kind = %watch.resource.kind);
            tasks.push(
                launch_watcher(client.clone(), watch, Arc::clone(&self.store))
                    .instrument(span)
                    .boxed(),
            );
        }
        futures::future::join_all(tasks).await;
    }
}

#[derive(Debug)]
#[allow(dead_code)]
/// Summary of a watch event for log output.
enum PrettyEvent {
    Applied {
        name: Option<String>,
        namespace: Option<String>,
    },
    Deleted {
        name: Option<String>,
        namespace: Option<String>,
    },
    Restarted {
        count: usize,
    },
}

impl From<&Event<DynamicObject>> for PrettyEvent {
    fn from(event: &Event<DynamicObject>) -> Self {
        match event {
            Event::Applied(object) => PrettyEvent::Applied {
                name: object.metadata.name.clone(),
                namespace: object.metadata.namespace.clone(),
            },
            Event::Deleted(object) => PrettyEvent::Deleted {
                name: object.metadata.name.clone(),
                namespace: object.metadata.namespace.clone(),
            },
            Event::Restarted(objects) => PrettyEvent::Restarted {
                count: objects.len(),
            },
        }
    }
}

async fn launch_watcher(client: kube::Client, watch: Watch, store: Arc<Store>) {
    info!(?watch, "Starting watcher.");
    let gvk = watch.gvk();
    let api: Api<DynamicObject> = match &watch.namespace {
        Some(namespace) => Api::namespaced_with(client, namespace, &watch.resource),
        None => Api::all_with(client, &watch.resource),
    };
    let mut events = watcher(api, watch.list_params).boxed();
    loop {
        match events.try_next().await {
            Ok(Some(event)) => {
                if let Err(error) = apply_event(&store, &gvk, event).await {
                    warn!(?error, "Could not apply watch event to store.");
                }
            }
            Ok(None) => break,
            Err(error) => warn!(?error, "Error streaming object events."),
        }
    }
    warn!(kind = %gvk.kind, "Watch stream ended.");
}

/// Apply one watch event to the store.
pub(crate) async fn apply_event(
    store: &Store,
    gvk: &GroupVersionKind,
    event: Event<DynamicObject>,
) -> Result<()> {
    debug!(event = ?PrettyEvent::from(&event), "Handling watch event.");
    match event {
        Event::Applied(dynamic_object) => {
            if dynamic_object.metadata.name.is_none() {
                warn!(kind = %gvk.kind, "Object without name.");
                return Ok(());
            }
            store.insert_any(gvk, &dynamic_object).await?;
        }
        Event::Deleted(dynamic_object) => match ObjectKey::from_meta(&dynamic_object.metadata) {
            Ok(key) => store.delete_any(gvk, &key).await,
            Err(_) => warn!(kind = %gvk.kind, "Object without name."),
        },
        Event::Restarted(dynamic_objects) => {
            let nameless = store.replace(gvk, dynamic_objects).await?;
            if !nameless.is_empty() {
                warn!(kind = %gvk.kind, count = nameless.len(), "Objects without name.");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::Reader;
    use crate::object::gvk_for;
    use futures::pin_mut;
    use http::{Request as HttpRequest, Response as HttpResponse};
    use hyper::Body;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::TypeMeta;
    use tokio_util::sync::CancellationToken;
    use tower_test::mock;

    fn secret(name: Option<&str>, resource_version: &str) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "Secret".to_string(),
            }),
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: Some("kiosk".to_string()),
                resource_version: Some(resource_version.to_string()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    async fn cached_version(store: &Store, name: &str) -> Result<Option<String>> {
        let mut object = Secret::default();
        store
            .get(
                &CancellationToken::new(),
                &ObjectKey::namespaced("kiosk", name),
                &mut object,
            )
            .await?;
        Ok(object.metadata.resource_version)
    }

    #[test]
    fn typed_watch_reports_gvk() {
        let watch = Watch::new::<Secret>(Some("kiosk".to_string()), ListParams::default());
        assert_eq!(watch.gvk(), gvk_for::<Secret>());
        assert_eq!(watch.resource.plural, "secrets");
    }

    #[tokio::test]
    async fn events_update_the_store() {
        let store = Store::new();
        let gvk = gvk_for::<Secret>();

        apply_event(&store, &gvk, Event::Restarted(vec![secret(Some("a"), "1")]))
            .await
            .unwrap();
        assert!(store.has_synced(&gvk).await);
        assert_eq!(cached_version(&store, "a").await.unwrap().as_deref(), Some("1"));

        apply_event(&store, &gvk, Event::Applied(secret(Some("a"), "2")))
            .await
            .unwrap();
        assert_eq!(cached_version(&store, "a").await.unwrap().as_deref(), Some("2"));

        apply_event(&store, &gvk, Event::Deleted(secret(Some("a"), "3")))
            .await
            .unwrap();
        assert!(cached_version(&store, "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn nameless_objects_are_skipped() {
        let store = Store::new();
        let gvk = gvk_for::<Secret>();
        store.track(&gvk).await;

        apply_event(&store, &gvk, Event::Applied(secret(None, "1")))
            .await
            .unwrap();
        apply_event(&store, &gvk, Event::Deleted(secret(None, "1")))
            .await
            .unwrap();
        let skipped = apply_event(
            &store,
            &gvk,
            Event::Restarted(vec![secret(None, "1"), secret(Some("b"), "4")]),
        )
        .await;
        assert!(skipped.is_ok());
        assert_eq!(cached_version(&store, "b").await.unwrap().as_deref(), Some("4"));
    }

    fn config_map_list(resource_version: &str, names: &[&str]) -> serde_json::Value {
        let items: Vec<serde_json::Value> = names
            .iter()
            .map(|name| {
                serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {
                        "name": name,
                        "namespace": "kiosk",
                        "resourceVersion": resource_version,
                    },
                })
            })
            .collect();
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMapList",
            "metadata": { "resourceVersion": resource_version },
            "items": items,
        })
    }

    fn json_response(status: u16, body: serde_json::Value) -> HttpResponse<Body> {
        HttpResponse::builder()
            .status(status)
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn watch_survives_stream_errors() {
        let (mock_service, handle) = mock::pair::<HttpRequest<Body>, HttpResponse<Body>>();
        pin_mut!(handle);
        let client = kube::Client::new(mock_service, "default");

        let mut cache = Cache::new();
        cache.watch::<ConfigMap>(Some("kiosk".to_string()), ListParams::default());
        let store = cache.store();
        let gvk = gvk_for::<ConfigMap>();
        let running = tokio::spawn(cache.start(client));

        let (request, send) = handle.next_request().await.expect("no list request");
        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri().path(), "/api/v1/namespaces/kiosk/configmaps");
        assert!(store.is_tracked(&gvk).await);
        assert!(!store.has_synced(&gvk).await);
        assert!(cached_config_map(&store, "settings")
            .await
            .unwrap_err()
            .is_not_synced());
        send.send_response(json_response(
            500,
            serde_json::json!({
                "apiVersion": "v1",
                "kind": "Status",
                "status": "Failure",
                "message": "etcdserver: request timed out",
                "reason": "InternalError",
                "code": 500,
            }),
        ));

        // The failed listing is retried.
        let (request, send) = handle.next_request().await.expect("no list retry");
        assert_eq!(request.uri().path(), "/api/v1/namespaces/kiosk/configmaps");
        send.send_response(json_response(200, config_map_list("10", &["settings"])));

        // The watch call only follows once the listing has been applied.
        let (request, _send) = handle.next_request().await.expect("no watch request");
        assert!(request.uri().query().unwrap_or_default().contains("watch"));
        assert!(store.has_synced(&gvk).await);
        let cached = cached_config_map(&store, "settings").await.unwrap();
        assert_eq!(cached.metadata.resource_version.as_deref(), Some("10"));

        running.abort();
    }

    async fn cached_config_map(store: &Store, name: &str) -> Result<ConfigMap> {
        let mut object = ConfigMap::default();
        store
            .get(
                &CancellationToken::new(),
                &ObjectKey::namespaced("kiosk", name),
                &mut object,
            )
            .await?;
        Ok(object)
    }

    #[test]
    fn cache_hands_out_its_store() {
        let mut cache = Cache::new();
        cache.watch::<Secret>(None, ListParams::default());
        assert!(Arc::ptr_eq(&cache.store(), &cache.store()));
        assert_eq!(cache.watches.len(), 1);
    }
}
