//! In-memory cache of watched objects.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use kube::api::ListParams;
use kube::core::{DynamicObject, GroupVersionKind};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::client::Reader;
use crate::error::{Error, Result};
use crate::object::{gvk_of, not_registered, not_synced, Object, ObjectKey};

type ResourceMap = HashMap<GroupVersionKind, HashMap<ObjectKey, serde_json::Value>>;

/// Local cache of Kubernetes objects, usually kept current by a
/// [`Cache`](crate::Cache).
///
/// * Collections are scoped by {group, version, kind, namespace, name}.
/// * Objects are held in their JSON wire form and deserialized on read.
/// * A kind must be tracked before it can be read. Reads of untracked kinds
///   fail with [`Error::NotRegistered`], reads of missing objects with
///   [`Error::NotFound`].
/// * A kind tracked with [`Store::track`] answers reads only after its first
///   full listing arrived through [`Store::replace`]. Until then reads fail
///   with [`Error::NotSynced`]. Kinds first seen by [`Store::insert`] have no
///   listing to wait for and are readable at once.
///
/// ```
/// # use kiosk::{ObjectKey, Reader, Store};
/// # use k8s_openapi::api::core::v1::ConfigMap;
/// # use tokio_util::sync::CancellationToken;
/// #
/// # #[tokio::main]
/// # async fn main() -> kiosk::Result<()> {
/// let store = Store::new();
///
/// let mut config_map = ConfigMap::default();
/// config_map.metadata.name = Some("settings".to_string());
/// config_map.metadata.namespace = Some("kiosk".to_string());
/// store.insert(&config_map).await?;
///
/// // Elsewhere
/// let mut cached = ConfigMap::default();
/// let key = ObjectKey::namespaced("kiosk", "settings");
/// store.get(&CancellationToken::new(), &key, &mut cached).await?;
/// # Ok(())
/// # }
/// ```
pub struct Store {
    objects: RwLock<ResourceMap>,
    synced: RwLock<HashSet<GroupVersionKind>>,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    /// Initialize empty store.
    pub fn new() -> Self {
        Store {
            objects: RwLock::new(HashMap::new()),
            synced: RwLock::new(HashSet::new()),
        }
    }

    /// Start tracking a kind whose objects will arrive with a full listing.
    pub async fn track(&self, gvk: &GroupVersionKind) {
        let mut objects = self.objects.write().await;
        objects.entry(gvk.clone()).or_insert_with(HashMap::new);
    }

    /// Whether `gvk` is tracked.
    pub async fn is_tracked(&self, gvk: &GroupVersionKind) -> bool {
        self.objects.read().await.contains_key(gvk)
    }

    /// Whether a full listing of `gvk` has been applied.
    pub async fn has_synced(&self, gvk: &GroupVersionKind) -> bool {
        self.synced.read().await.contains(gvk)
    }

    /// Insert a typed object, tracking its kind.
    pub async fn insert<K: Object>(&self, object: &K) -> Result<()> {
        let gvk = gvk_of(object)?;
        let key = ObjectKey::from_meta(object.meta())?;
        let value = serde_json::to_value(object)?;
        self.insert_value(&gvk, key, value).await;
        Ok(())
    }

    /// Insert an object that has already been type erased.
    pub async fn insert_any(
        &self,
        gvk: &GroupVersionKind,
        dynamic_object: &DynamicObject,
    ) -> Result<()> {
        let key = ObjectKey::from_meta(&dynamic_object.metadata)?;
        let value = serde_json::to_value(dynamic_object)?;
        self.insert_value(gvk, key, value).await;
        Ok(())
    }

    async fn insert_value(
        &self,
        gvk: &GroupVersionKind,
        key: ObjectKey,
        value: serde_json::Value,
    ) {
        let first_seen = {
            let mut objects = self.objects.write().await;
            let first_seen = !objects.contains_key(gvk);
            objects
                .entry(gvk.clone())
                .or_insert_with(HashMap::new)
                .insert(key, value);
            first_seen
        };
        if first_seen {
            self.synced.write().await.insert(gvk.clone());
        }
    }

    /// Fail unless `gvk` is tracked and has synced.
    async fn ensure_readable(&self, gvk: &GroupVersionKind) -> Result<()> {
        if !self.is_tracked(gvk).await {
            return Err(not_registered(gvk));
        }
        if !self.has_synced(gvk).await {
            return Err(not_synced(gvk));
        }
        Ok(())
    }

    /// Delete a cached object.
    pub async fn delete_any(&self, gvk: &GroupVersionKind, key: &ObjectKey) {
        let mut objects = self.objects.write().await;
        if let Some(resource_objects) = objects.get_mut(gvk) {
            resource_objects.remove(key);
        }
    }

    /// Replace the contents of a kind with a full listing and mark it synced.
    ///
    /// Objects without a name are skipped and returned.
    pub async fn replace(
        &self,
        gvk: &GroupVersionKind,
        dynamic_objects: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>> {
        let mut resource_objects = HashMap::with_capacity(dynamic_objects.len());
        let mut nameless = Vec::new();
        for dynamic_object in dynamic_objects {
            match ObjectKey::from_meta(&dynamic_object.metadata) {
                Ok(key) => {
                    resource_objects.insert(key, serde_json::to_value(&dynamic_object)?);
                }
                Err(_) => nameless.push(dynamic_object),
            }
        }
        self.objects
            .write()
            .await
            .insert(gvk.clone(), resource_objects);
        self.synced.write().await.insert(gvk.clone());
        Ok(nameless)
    }

    /// Clear cache for specified object kind. The kind stays tracked.
    pub async fn reset(&self, gvk: &GroupVersionKind) {
        let mut objects = self.objects.write().await;
        objects
            .entry(gvk.clone())
            .or_insert_with(HashMap::new)
            .clear();
        self.synced.write().await.remove(gvk);
    }
}

#[async_trait]
impl Reader for Store {
    async fn get<K: Object>(
        &self,
        _ctx: &CancellationToken,
        key: &ObjectKey,
        object: &mut K,
    ) -> Result<()> {
        let gvk = gvk_of(&*object)?;
        self.ensure_readable(&gvk).await?;
        let value = {
            let objects = self.objects.read().await;
            let resource_objects = objects.get(&gvk).ok_or_else(|| not_registered(&gvk))?;
            resource_objects
                .get(key)
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    kind: gvk.kind.clone(),
                    key: key.clone(),
                })?
        };
        trace!(kind = %gvk.kind, %key, "Read object from store.");
        *object = serde_json::from_value(value)?;
        Ok(())
    }

    async fn list<K: Object>(
        &self,
        _ctx: &CancellationToken,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<K>> {
        if params.field_selector.is_some() {
            return Err(Error::InvalidSelector(
                "field selectors are not supported by the cache".to_string(),
            ));
        }
        let selector = match &params.label_selector {
            Some(selector) => LabelSelector::parse(selector)?,
            None => LabelSelector::default(),
        };

        self.ensure_readable(gvk).await?;
        let objects = self.objects.read().await;
        let resource_objects = objects.get(gvk).ok_or_else(|| not_registered(gvk))?;
        let mut matched = Vec::new();
        for (key, value) in resource_objects {
            if namespace.is_some() && key.namespace() != namespace {
                continue;
            }
            if !selector.matches(value.pointer("/metadata/labels")) {
                continue;
            }
            matched.push(serde_json::from_value(value.clone())?);
        }
        Ok(matched)
    }
}

#[derive(Debug, PartialEq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

/// Equality-based label selector.
#[derive(Debug, Default, PartialEq)]
struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if term.contains(" in ") || term.contains(" notin ") || term.contains('(') {
                return Err(Error::InvalidSelector(format!(
                    "set-based requirement {:?} is not supported by the cache",
                    term
                )));
            }
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::DoesNotExist(key.trim().to_string())
            } else {
                Requirement::Exists(term.to_string())
            };
            requirements.push(requirement);
        }
        Ok(LabelSelector { requirements })
    }

    fn matches(&self, labels: Option<&serde_json::Value>) -> bool {
        let label = |key: &str| labels.and_then(|l| l.get(key)).and_then(|v| v.as_str());
        self.requirements.iter().all(|requirement| match requirement {
            Requirement::Equals(key, value) => label(key) == Some(value.as_str()),
            Requirement::NotEquals(key, value) => label(key) != Some(value.as_str()),
            Requirement::Exists(key) => label(key).is_some(),
            Requirement::DoesNotExist(key) => label(key).is_none(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::{gvk_for, parse_gvk};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::TypeMeta;
    use std::collections::BTreeMap;

    fn config_map(namespace: &str, name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn untracked_kinds_are_not_registered() {
        let store = Store::new();
        let mut object = ConfigMap::default();
        let err = store
            .get(
                &CancellationToken::new(),
                &ObjectKey::namespaced("kiosk", "missing"),
                &mut object,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_registered());
    }

    #[tokio::test]
    async fn tracked_kinds_report_missing_objects() {
        let store = Store::new();
        store.track(&gvk_for::<ConfigMap>()).await;
        store.replace(&gvk_for::<ConfigMap>(), vec![]).await.unwrap();
        let mut object = ConfigMap::default();
        let err = store
            .get(
                &CancellationToken::new(),
                &ObjectKey::namespaced("kiosk", "missing"),
                &mut object,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn tracked_kinds_wait_for_their_first_listing() {
        let store = Store::new();
        let gvk = gvk_for::<ConfigMap>();
        let ctx = CancellationToken::new();
        let key = ObjectKey::namespaced("kiosk", "settings");
        store.track(&gvk).await;

        let err = store
            .get(&ctx, &key, &mut ConfigMap::default())
            .await
            .unwrap_err();
        assert!(err.is_not_synced(), "unexpected error: {}", err);
        let err = store
            .list::<ConfigMap>(&ctx, &gvk, None, &ListParams::default())
            .await
            .unwrap_err();
        assert!(err.is_not_synced());

        // A single applied object does not make the kind complete.
        store
            .insert_any(
                &gvk,
                &DynamicObject {
                    types: Some(TypeMeta {
                        api_version: "v1".to_string(),
                        kind: "ConfigMap".to_string(),
                    }),
                    metadata: ObjectMeta {
                        name: Some("settings".to_string()),
                        namespace: Some("kiosk".to_string()),
                        ..Default::default()
                    },
                    data: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        assert!(store
            .get(&ctx, &key, &mut ConfigMap::default())
            .await
            .unwrap_err()
            .is_not_synced());

        store.replace(&gvk, vec![]).await.unwrap();
        assert!(store
            .get(&ctx, &key, &mut ConfigMap::default())
            .await
            .unwrap_err()
            .is_not_found());

        store.reset(&gvk).await;
        assert!(store
            .get(&ctx, &key, &mut ConfigMap::default())
            .await
            .unwrap_err()
            .is_not_synced());
    }

    #[tokio::test]
    async fn reads_back_inserted_objects() {
        let store = Store::new();
        store
            .insert(&config_map("kiosk", "settings", &[("tier", "gold")]))
            .await
            .unwrap();

        let mut object = ConfigMap::default();
        store
            .get(
                &CancellationToken::new(),
                &ObjectKey::namespaced("kiosk", "settings"),
                &mut object,
            )
            .await
            .unwrap();
        assert_eq!(object.metadata.name.as_deref(), Some("settings"));

        store
            .delete_any(
                &gvk_for::<ConfigMap>(),
                &ObjectKey::namespaced("kiosk", "settings"),
            )
            .await;
        let err = store
            .get(
                &CancellationToken::new(),
                &ObjectKey::namespaced("kiosk", "settings"),
                &mut object,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn replace_marks_kind_synced() {
        let store = Store::new();
        let gvk = parse_gvk("tenancy.kiosk.sh/v1alpha1", "Space");
        assert!(!store.has_synced(&gvk).await);

        let named = DynamicObject {
            types: Some(TypeMeta {
                api_version: "tenancy.kiosk.sh/v1alpha1".to_string(),
                kind: "Space".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("team-a".to_string()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        };
        let nameless = DynamicObject {
            metadata: ObjectMeta::default(),
            ..named.clone()
        };
        let skipped = store.replace(&gvk, vec![named, nameless]).await.unwrap();
        assert_eq!(skipped.len(), 1);
        assert!(store.has_synced(&gvk).await);

        let spaces: Vec<DynamicObject> = store
            .list(&CancellationToken::new(), &gvk, None, &ListParams::default())
            .await
            .unwrap();
        assert_eq!(spaces.len(), 1);

        store.reset(&gvk).await;
        assert!(!store.has_synced(&gvk).await);
        assert!(store.is_tracked(&gvk).await);
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = Store::new();
        store
            .insert(&config_map("team-a", "one", &[("tier", "gold")]))
            .await
            .unwrap();
        store
            .insert(&config_map("team-a", "two", &[("tier", "silver")]))
            .await
            .unwrap();
        store
            .insert(&config_map("team-b", "three", &[("tier", "gold")]))
            .await
            .unwrap();
        let ctx = CancellationToken::new();
        let gvk = gvk_for::<ConfigMap>();

        let in_namespace: Vec<ConfigMap> = store
            .list(&ctx, &gvk, Some("team-a"), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(in_namespace.len(), 2);

        let gold: Vec<ConfigMap> = store
            .list(&ctx, &gvk, None, &ListParams::default().labels("tier=gold"))
            .await
            .unwrap();
        assert_eq!(gold.len(), 2);

        let not_gold: Vec<ConfigMap> = store
            .list(&ctx, &gvk, Some("team-a"), &ListParams::default().labels("tier!=gold"))
            .await
            .unwrap();
        assert_eq!(not_gold.len(), 1);
        assert_eq!(not_gold[0].metadata.name.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn list_rejects_unsupported_selectors() {
        let store = Store::new();
        store.track(&gvk_for::<ConfigMap>()).await;
        let ctx = CancellationToken::new();
        let gvk = gvk_for::<ConfigMap>();

        let set_based = store
            .list::<ConfigMap>(&ctx, &gvk, None, &ListParams::default().labels("tier in (gold)"))
            .await;
        assert!(matches!(set_based, Err(Error::InvalidSelector(_))));

        let field = store
            .list::<ConfigMap>(&ctx, &gvk, None, &ListParams::default().fields("metadata.name=x"))
            .await;
        assert!(matches!(field, Err(Error::InvalidSelector(_))));
    }

    #[test]
    fn parses_equality_selectors() {
        let selector = LabelSelector::parse("a=b, c==d,e!=f,g,!h").unwrap();
        assert_eq!(
            selector.requirements,
            vec![
                Requirement::Equals("a".to_string(), "b".to_string()),
                Requirement::Equals("c".to_string(), "d".to_string()),
                Requirement::NotEquals("e".to_string(), "f".to_string()),
                Requirement::Exists("g".to_string()),
                Requirement::DoesNotExist("h".to_string()),
            ]
        );
    }
}
