//! Orchestration API access.
//!
//! The reconcilers only ever need five verbs against namespaced objects, so
//! they talk to a [`ClusterClient`] rather than to `kube` directly. The
//! production implementation is [`KubeClusterClient`]; tests use
//! [`InMemoryCluster`](crate::memory::InMemoryCluster).

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{OperatorError, Result};
use crate::identity::ObjectKey;

/// A namespaced object the operator reads or writes.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kind name of `K`, for logs and errors.
#[must_use]
pub fn kind_of<K: Object>() -> String {
    K::kind(&()).into_owned()
}

/// Key of an object from its own metadata.
///
/// # Errors
///
/// Returns an error if the object has no name or namespace.
pub fn key_of<K: Object>(object: &K) -> Result<ObjectKey> {
    match (object.namespace(), object.meta().name.as_ref()) {
        (Some(namespace), Some(name)) => Ok(ObjectKey::new(namespace, name.as_str())),
        _ => Err(OperatorError::api(
            "identify",
            kind_of::<K>(),
            object.name_any(),
            "object has no name or namespace",
        )),
    }
}

/// Typed CRUD over namespaced objects.
pub trait ClusterClient: Send + Sync {
    /// Fetches an object. A missing object is `Ok(None)`.
    fn get<K: Object>(&self, key: &ObjectKey) -> impl Future<Output = Result<Option<K>>> + Send;

    /// Lists objects in `namespace`, optionally filtered by an equality
    /// label selector such as `app=prometheus`.
    fn list<K: Object>(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> impl Future<Output = Result<Vec<K>>> + Send;

    /// Creates an object. Fails with [`OperatorError::AlreadyExists`] on a
    /// name clash.
    fn create<K: Object>(&self, object: &K) -> impl Future<Output = Result<K>> + Send;

    /// Replaces an existing object. Fails with [`OperatorError::NotFound`]
    /// if it is gone.
    fn replace<K: Object>(&self, object: &K) -> impl Future<Output = Result<K>> + Send;

    /// Deletes an object. Fails with [`OperatorError::NotFound`] if it is
    /// already gone.
    fn delete<K: Object>(&self, key: &ObjectKey) -> impl Future<Output = Result<()>> + Send;
}

impl<C: ClusterClient> ClusterClient for Arc<C> {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<Option<K>> {
        (**self).get::<K>(key).await
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<K>> {
        (**self).list::<K>(namespace, selector).await
    }

    async fn create<K: Object>(&self, object: &K) -> Result<K> {
        (**self).create::<K>(object).await
    }

    async fn replace<K: Object>(&self, object: &K) -> Result<K> {
        (**self).replace::<K>(object).await
    }

    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<()> {
        (**self).delete::<K>(key).await
    }
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub const fn inner(&self) -> &Client {
        &self.client
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

/// Maps a `kube` failure onto the operator's taxonomy.
fn classify<K: Object>(
    verb: &'static str,
    key: impl std::fmt::Display,
    error: kube::Error,
) -> OperatorError {
    match &error {
        kube::Error::Api(response) if response.code == 404 => {
            OperatorError::not_found(kind_of::<K>(), key)
        }
        kube::Error::Api(response) if response.code == 409 && verb == "create" => {
            OperatorError::AlreadyExists {
                kind: kind_of::<K>(),
                key: key.to_string(),
            }
        }
        _ => OperatorError::api(verb, kind_of::<K>(), key, &error),
    }
}

impl ClusterClient for KubeClusterClient {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.api::<K>(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| classify::<K>("get", key, e))
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<K>> {
        let params = match selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        self.api::<K>(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| classify::<K>("list", namespace, e))
    }

    async fn create<K: Object>(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        self.api::<K>(&key.namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>("create", &key, e))
    }

    async fn replace<K: Object>(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        self.api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>("update", &key, e))
    }

    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<()> {
        self.api::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify::<K>("delete", key, e))
    }
}
