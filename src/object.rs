//! Object identity helpers: keys, metadata snapshots and type metadata.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Trait alias for types the kiosk clients can read and write.
///
/// Typed `k8s-openapi` resources and derived custom resources implement it,
/// as does [`DynamicObject`], which the clients treat as unstructured.
pub trait Object:
    Resource + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Object for T where
    T: Resource + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Namespace and name of an object.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    /// Build a key from its parts. Cluster scoped objects have no namespace.
    pub fn new(namespace: Option<String>, name: String) -> Self {
        ObjectKey { namespace, name }
    }

    /// Key of a namespaced object.
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        ObjectKey::new(Some(namespace.to_string()), name.to_string())
    }

    /// Key of a cluster scoped object.
    pub fn cluster(name: &str) -> Self {
        ObjectKey::new(None, name.to_string())
    }

    /// Read the key from object metadata.
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self> {
        let name = meta.name.clone().ok_or(Error::MissingName)?;
        Ok(ObjectKey::new(meta.namespace.clone(), name))
    }

    /// Name of the object.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace of the object, if it is namespaced.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Identity of an object as the server reported it after a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Server-assigned UID.
    pub uid: Option<String>,
    /// Server-assigned resource version.
    pub resource_version: Option<String>,
    /// Namespace and name.
    pub key: ObjectKey,
}

impl Snapshot {
    /// Capture the snapshot from metadata the direct client populated.
    pub fn capture(meta: &ObjectMeta) -> Result<Self> {
        Ok(Snapshot {
            uid: meta.uid.clone(),
            resource_version: meta.resource_version.clone(),
            key: ObjectKey::from_meta(meta)?,
        })
    }

    /// Whether `meta` describes a different incarnation of the object.
    ///
    /// UIDs are compared as strings, so an unset UID on either side only
    /// matches another unset UID.
    pub fn uid_differs(&self, meta: &ObjectMeta) -> bool {
        self.uid.as_deref().unwrap_or_default() != meta.uid.as_deref().unwrap_or_default()
    }
}

/// Returns true when `object` is an unstructured [`DynamicObject`].
pub fn is_unstructured<K: Object>(object: &K) -> bool {
    (object as &dyn Any).is::<DynamicObject>()
}

/// Returns true when `K` is the unstructured [`DynamicObject`] type.
pub fn is_unstructured_type<K: Object>() -> bool {
    TypeId::of::<K>() == TypeId::of::<DynamicObject>()
}

/// Group, version and kind of a statically typed resource.
pub fn gvk_for<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind {
        group: K::group(&()).into_owned(),
        version: K::version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
    }
}

/// Group, version and kind an object declares in its `apiVersion` and `kind`.
///
/// Typed resources always serialize these; a [`DynamicObject`] must have its
/// `types` set.
pub fn gvk_of<K: Object>(object: &K) -> Result<GroupVersionKind> {
    let value = serde_json::to_value(object)?;
    let api_version = value.get("apiVersion").and_then(|v| v.as_str());
    let kind = value.get("kind").and_then(|v| v.as_str());
    match (api_version, kind) {
        (Some(api_version), Some(kind)) if !api_version.is_empty() && !kind.is_empty() => {
            Ok(parse_gvk(api_version, kind))
        }
        _ => Err(Error::MissingTypeMeta),
    }
}

/// Split an `apiVersion` such as `apps/v1` or `v1` into group and version.
pub fn parse_gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    GroupVersionKind {
        group: group.to_string(),
        version: version.to_string(),
        kind: kind.to_string(),
    }
}

/// Error for a kind unknown to a scheme or cache.
pub(crate) fn not_registered(gvk: &GroupVersionKind) -> Error {
    Error::NotRegistered {
        group: gvk.group.clone(),
        version: gvk.version.clone(),
        kind: gvk.kind.clone(),
    }
}

/// Error for a watched kind whose first listing has not arrived.
pub(crate) fn not_synced(gvk: &GroupVersionKind) -> Error {
    Error::NotSynced {
        group: gvk.group.clone(),
        version: gvk.version.clone(),
        kind: gvk.kind.clone(),
    }
}

/// Order two resource versions of the same object.
///
/// Versions are opaque tokens. The API server issues decimal integers, which
/// are compared numerically so that `"99" < "100"`; anything else falls back
/// to string comparison.
pub fn compare_resource_versions(observed: &str, written: &str) -> Ordering {
    match (observed.parse::<u64>(), written.parse::<u64>()) {
        (Ok(observed), Ok(written)) => observed.cmp(&written),
        _ => observed.cmp(written),
    }
}
