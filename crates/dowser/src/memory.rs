//! In-memory stand-ins for the orchestration API and the HTTP fetcher.
//!
//! These back the unit and integration tests, and are small enough to drive
//! the reconcilers without a cluster.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::client::{ClusterClient, Object, key_of, kind_of};
use crate::config::SourceConfig;
use crate::error::{OperatorError, Result};
use crate::identity::ObjectKey;
use crate::resolver::Fetcher;
use crate::resolver::listing::{ARCHIVE_FILE_NAME, listing_root, metadata_url};

type StoreKey = (String, String, String);

/// A write accepted by [`InMemoryCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    /// `create`, `update` or `delete`.
    pub verb: &'static str,
    /// Kind of the written object.
    pub kind: String,
    /// Key of the written object.
    pub key: ObjectKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    verb: &'static str,
    kind: String,
    name: Option<String>,
}

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<StoreKey, Value>,
    resource_version: u64,
    journal: Vec<Write>,
    failures: Vec<Failure>,
}

impl ClusterState {
    fn check_failure(&self, verb: &'static str, kind: &str, key: &ObjectKey) -> Result<()> {
        let injected = self.failures.iter().any(|f| {
            f.verb == verb && f.kind == kind && f.name.as_deref().is_none_or(|n| n == key.name)
        });
        if injected {
            return Err(OperatorError::api(verb, kind, key, "injected failure"));
        }
        Ok(())
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn record(&mut self, verb: &'static str, kind: &str, key: &ObjectKey) {
        self.journal.push(Write {
            verb,
            kind: kind.to_string(),
            key: key.clone(),
        });
    }
}

/// Namespaced object store with API-server-like semantics.
///
/// Objects are held as JSON, so anything the real API would round-trip is
/// round-tripped here too. Each write bumps `metadata.resourceVersion`, and
/// a replace carrying a stale version is rejected as a conflict.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `verb` on `kind` fail, or only those on `name` if given.
    ///
    /// `verb` is one of `get`, `list`, `create`, `update` or `delete`.
    pub fn fail_on(&self, verb: &'static str, kind: &str, name: Option<&str>) {
        self.state.lock().failures.push(Failure {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
        });
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Accepted writes, oldest first.
    pub fn journal(&self) -> Vec<Write> {
        self.state.lock().journal.clone()
    }

    /// Number of accepted writes.
    pub fn writes(&self) -> usize {
        self.state.lock().journal.len()
    }

    /// Forgets the write journal.
    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Number of stored objects of kind `K`.
    pub fn count<K: Object>(&self) -> usize {
        let kind = kind_of::<K>();
        self.state
            .lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    fn store_key<K: Object>(key: &ObjectKey) -> StoreKey {
        (kind_of::<K>(), key.namespace.clone(), key.name.clone())
    }
}

fn decode<K: Object>(value: &Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

fn set_resource_version(value: &mut Value, version: String) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert("resourceVersion".to_string(), Value::String(version));
    }
}

/// Whether the labels of `value` satisfy every `key=value` term of `selector`.
fn matches_selector(value: &Value, selector: &str) -> bool {
    let labels = value.pointer("/metadata/labels");
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let (key, expected) = term.split_once('=').unwrap_or((term, ""));
            let expected = expected.trim_start_matches('=');
            labels
                .and_then(|labels| labels.get(key.trim()))
                .and_then(Value::as_str)
                .is_some_and(|actual| actual == expected.trim())
        })
}

impl ClusterClient for InMemoryCluster {
    async fn get<K: Object>(&self, key: &ObjectKey) -> Result<Option<K>> {
        let state = self.state.lock();
        state.check_failure("get", &kind_of::<K>(), key)?;
        state
            .objects
            .get(&Self::store_key::<K>(key))
            .map(decode)
            .transpose()
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<K>> {
        let kind = kind_of::<K>();
        let state = self.state.lock();
        state.check_failure("list", &kind, &ObjectKey::new(namespace, ""))?;
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter(|(_, value)| selector.is_none_or(|s| matches_selector(value, s)))
            .map(|(_, value)| decode(value))
            .collect()
    }

    async fn create<K: Object>(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let kind = kind_of::<K>();
        let mut state = self.state.lock();
        state.check_failure("create", &kind, &key)?;

        let store_key = Self::store_key::<K>(&key);
        if state.objects.contains_key(&store_key) {
            return Err(OperatorError::AlreadyExists {
                kind,
                key: key.to_string(),
            });
        }

        let mut value = serde_json::to_value(object)?;
        let version = state.next_version();
        set_resource_version(&mut value, version);
        let created = decode(&value)?;
        state.objects.insert(store_key, value);
        state.record("create", &kind, &key);
        Ok(created)
    }

    async fn replace<K: Object>(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let kind = kind_of::<K>();
        let mut state = self.state.lock();
        state.check_failure("update", &kind, &key)?;

        let store_key = Self::store_key::<K>(&key);
        let Some(current) = state.objects.get(&store_key) else {
            return Err(OperatorError::not_found(kind, &key));
        };

        let stored_version = current
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        let sent_version = object.meta().resource_version.clone();
        if sent_version.is_some() && sent_version != stored_version {
            return Err(OperatorError::api(
                "update",
                kind,
                &key,
                "the object has been modified; please apply your changes to the latest version",
            ));
        }

        let mut value = serde_json::to_value(object)?;
        let version = state.next_version();
        set_resource_version(&mut value, version);
        let replaced = decode(&value)?;
        state.objects.insert(store_key, value);
        state.record("update", &kind, &key);
        Ok(replaced)
    }

    async fn delete<K: Object>(&self, key: &ObjectKey) -> Result<()> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock();
        state.check_failure("delete", &kind, key)?;

        if state.objects.remove(&Self::store_key::<K>(key)).is_none() {
            return Err(OperatorError::not_found(kind, key));
        }
        state.record("delete", &kind, key);
        Ok(())
    }
}

/// [`Fetcher`] answering from a fixed URL → body table.
///
/// Unknown URLs fail the way a 404 would.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    responses: Mutex<HashMap<String, String>>,
    requests: AtomicUsize,
}

impl StaticFetcher {
    /// Creates a fetcher that knows no URLs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` for `url`.
    pub fn respond(&self, url: &str, body: &str) {
        self.responses.lock().insert(url.to_string(), body.to_string());
    }

    /// Stops serving `url`.
    pub fn forget(&self, url: &str) {
        self.responses.lock().remove(url);
    }

    /// Publishes a job: serves `record` as its job record and an artifact
    /// index with the archive at the top level. Returns the archive URL.
    ///
    /// # Errors
    ///
    /// Returns an error if `job_url` is not under the source base URL.
    pub fn publish_job(
        &self,
        sources: &SourceConfig,
        job_url: &str,
        record: &str,
    ) -> Result<String> {
        let root = listing_root(sources, job_url)?;
        let archive = format!("{root}{ARCHIVE_FILE_NAME}");
        self.respond(&metadata_url(sources, job_url), record);
        self.respond(
            root.as_str(),
            &format!(r#"<a href="../">..</a><a href="{ARCHIVE_FILE_NAME}">{ARCHIVE_FILE_NAME}</a>"#),
        );
        Ok(archive)
    }

    /// Number of fetches made so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.responses
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| OperatorError::fetch(url, "HTTP status client error (404 Not Found)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dowser_api::MetricsCluster;
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::ResourceExt;

    fn service(name: &str, labels: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("dowser".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..Service::default()
        }
    }

    mod objects {
        use super::*;

        #[tokio::test]
        async fn create_then_get() {
            let cluster = InMemoryCluster::new();
            let created = cluster.create(&service("a", &[])).await.expect("created");
            assert_eq!(created.resource_version().as_deref(), Some("1"));

            let fetched: Option<Service> =
                cluster.get(&ObjectKey::new("dowser", "a")).await.expect("get");
            assert_eq!(fetched, Some(created));
            assert_eq!(cluster.writes(), 1);
        }

        #[tokio::test]
        async fn kinds_do_not_collide() {
            let cluster = InMemoryCluster::new();
            cluster.create(&service("a", &[])).await.expect("created");

            let other: Option<MetricsCluster> =
                cluster.get(&ObjectKey::new("dowser", "a")).await.expect("get");
            assert!(other.is_none());
        }

        #[tokio::test]
        async fn duplicate_create_is_rejected() {
            let cluster = InMemoryCluster::new();
            cluster.create(&service("a", &[])).await.expect("created");
            let result = cluster.create(&service("a", &[])).await;
            assert!(matches!(result, Err(OperatorError::AlreadyExists { .. })));
        }

        #[tokio::test]
        async fn stale_replace_is_a_conflict() {
            let cluster = InMemoryCluster::new();
            let first = cluster.create(&service("a", &[])).await.expect("created");
            cluster.replace(&first).await.expect("replaced");

            let result = cluster.replace(&first).await;
            assert!(matches!(result, Err(OperatorError::Api { verb: "update", .. })));
        }

        #[tokio::test]
        async fn missing_objects_are_not_found() {
            let cluster = InMemoryCluster::new();
            let replace = cluster.replace(&service("a", &[])).await;
            let delete = cluster.delete::<Service>(&ObjectKey::new("dowser", "a")).await;
            assert!(replace.is_err_and(|e| e.is_not_found()));
            assert!(delete.is_err_and(|e| e.is_not_found()));
        }

        #[tokio::test]
        async fn list_filters_by_namespace_and_selector() {
            let cluster = InMemoryCluster::new();
            cluster.create(&service("a", &[("app", "prometheus")])).await.expect("a");
            cluster.create(&service("b", &[("app", "thanos-query")])).await.expect("b");
            let mut elsewhere = service("c", &[("app", "prometheus")]);
            elsewhere.metadata.namespace = Some("other".to_string());
            cluster.create(&elsewhere).await.expect("c");

            let all: Vec<Service> = cluster.list("dowser", None).await.expect("list");
            let selected: Vec<Service> =
                cluster.list("dowser", Some("app=prometheus")).await.expect("list");

            assert_eq!(all.len(), 2);
            assert_eq!(selected.len(), 1);
            assert_eq!(selected[0].name_any(), "a");
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn injected_failure_targets_one_name() {
            let cluster = InMemoryCluster::new();
            cluster.fail_on("create", "Service", Some("b"));

            assert!(cluster.create(&service("a", &[])).await.is_ok());
            assert!(cluster.create(&service("b", &[])).await.is_err());
            assert_eq!(cluster.writes(), 1);

            cluster.clear_failures();
            assert!(cluster.create(&service("b", &[])).await.is_ok());
        }
    }

    mod fetcher {
        use super::*;

        #[tokio::test]
        async fn serves_known_urls_and_counts_requests() {
            let fetcher = StaticFetcher::new();
            fetcher.respond("https://example.com/a", "body");

            assert_eq!(fetcher.fetch("https://example.com/a").await.expect("body"), "body");
            assert!(fetcher.fetch("https://example.com/b").await.is_err());
            assert_eq!(fetcher.requests(), 2);

            fetcher.forget("https://example.com/a");
            assert!(fetcher.fetch("https://example.com/a").await.is_err());
        }

        #[tokio::test]
        async fn published_jobs_have_record_and_index() {
            let sources = SourceConfig::default();
            let fetcher = StaticFetcher::new();
            let job = "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/e2e-aws/1";
            let archive = fetcher.publish_job(&sources, job, "{}").expect("published");

            assert_eq!(
                archive,
                "https://gcsweb-ci.apps.ci.l2s4.p1.openshiftapps.com/gcs/origin-ci-test/logs/e2e-aws/1/artifacts/prometheus.tar"
            );
            assert_eq!(fetcher.fetch(&metadata_url(&sources, job)).await.expect("record"), "{}");
        }
    }
}
