//! Registry of the kinds a controller works with.

use std::collections::HashMap;

use kube::core::{ApiResource, GroupVersionKind};
use kube::Resource;
use serde::Serialize;

use crate::error::Result;
use crate::object::{gvk_for, not_registered};

/// Produces empty objects for registered kinds.
pub trait ObjectFactory: Send + Sync {
    /// Wire form of an empty object of kind `gvk`.
    ///
    /// # Errors
    ///
    /// [`Error::NotRegistered`](crate::Error::NotRegistered) when nothing is
    /// registered for `gvk`.
    fn new_object(&self, gvk: &GroupVersionKind) -> Result<serde_json::Value>;
}

struct Registration {
    resource: ApiResource,
    template: serde_json::Value,
}

/// Maps kinds to their API resource and an empty template object.
///
/// ```
/// # use kiosk::Scheme;
/// # use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
/// let mut scheme = Scheme::new();
/// scheme.register::<Namespace>().register::<ConfigMap>();
/// ```
#[derive(Default)]
pub struct Scheme {
    kinds: HashMap<GroupVersionKind, Registration>,
}

impl Scheme {
    /// Create an empty scheme.
    pub fn new() -> Self {
        Scheme {
            kinds: HashMap::new(),
        }
    }

    /// Register a statically typed resource, using its default value as template.
    pub fn register<K>(&mut self) -> &mut Self
    where
        K: Resource<DynamicType = ()> + Default + Serialize,
    {
        let resource = ApiResource::erase::<K>(&());
        // Typed resources always serialize.
        let template = serde_json::to_value(K::default()).unwrap_or_default();
        self.kinds.insert(
            gvk_for::<K>(),
            Registration { resource, template },
        );
        self
    }

    /// Register a kind by its API resource and template object.
    pub fn register_with(
        &mut self,
        resource: ApiResource,
        template: serde_json::Value,
    ) -> &mut Self {
        let gvk = GroupVersionKind {
            group: resource.group.clone(),
            version: resource.version.clone(),
            kind: resource.kind.clone(),
        };
        self.kinds.insert(gvk, Registration { resource, template });
        self
    }

    /// Whether `gvk` is registered.
    pub fn is_registered(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains_key(gvk)
    }

    /// API resource used to build request URLs for `gvk`.
    pub fn api_resource(&self, gvk: &GroupVersionKind) -> Option<&ApiResource> {
        self.kinds.get(gvk).map(|registration| &registration.resource)
    }
}

impl ObjectFactory for Scheme {
    fn new_object(&self, gvk: &GroupVersionKind) -> Result<serde_json::Value> {
        self.kinds
            .get(gvk)
            .map(|registration| registration.template.clone())
            .ok_or_else(|| not_registered(gvk))
    }
}
