//! The `MetricsCluster` custom resource.
//!
//! A metrics cluster names a set of CI job URLs whose metric archives should
//! be ingested and made queryable behind one endpoint. Job URLs may overlap
//! between clusters; overlapping clusters share the same storage workload.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a [`MetricsCluster`].
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "dowser.io",
    version = "v1",
    kind = "MetricsCluster",
    namespaced,
    status = "MetricsClusterStatus",
    shortname = "mc",
    derive = "PartialEq"
)]
pub struct MetricsClusterSpec {
    /// Job URLs (one CI run each) whose metrics should be ingested.
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Observed state of a [`MetricsCluster`]. Currently carries nothing.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct MetricsClusterStatus {}

impl MetricsCluster {
    /// Creates a cluster in `namespace` declaring the given job URLs.
    #[must_use]
    pub fn with_urls<I, S>(name: &str, namespace: &str, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cluster = Self::new(
            name,
            MetricsClusterSpec {
                urls: urls.into_iter().map(Into::into).collect(),
            },
        );
        cluster.metadata.namespace = Some(namespace.to_string());
        cluster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource, ResourceExt};

    #[test]
    fn with_urls_sets_identity_and_spec() {
        let cluster = MetricsCluster::with_urls("team-a", "dowser", ["https://ci/1", "https://ci/2"]);
        assert_eq!(cluster.name_any(), "team-a");
        assert_eq!(cluster.namespace().as_deref(), Some("dowser"));
        assert_eq!(cluster.spec.urls.len(), 2);
    }

    #[test]
    fn missing_urls_deserialize_as_empty() {
        let json = serde_json::json!({
            "apiVersion": "dowser.io/v1",
            "kind": "MetricsCluster",
            "metadata": { "name": "empty", "namespace": "dowser" },
            "spec": {}
        });
        let cluster: MetricsCluster = serde_json::from_value(json).expect("valid cluster");
        assert!(cluster.spec.urls.is_empty());
    }

    #[test]
    fn crd_is_namespaced_under_dowser_group() {
        let crd = MetricsCluster::crd();
        assert_eq!(crd.spec.group, "dowser.io");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(MetricsCluster::kind(&()), "MetricsCluster");
    }
}
