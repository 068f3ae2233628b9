//! Reference tracking between metrics clusters and storage workloads.
//!
//! A storage workload may be shared by many clusters, which owner references
//! cannot express. Instead each referencing cluster puts a `<cluster>: "true"`
//! label on the workload's pod template. The store service of a cluster
//! selects on the same label, so the label doubles as service discovery.

use std::collections::BTreeMap;

use dowser_api::MetricsCluster;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

/// Label carrying the workload kind.
pub const APP_LABEL: &str = "app";

/// `app` value of storage workloads.
pub const STORAGE_APP: &str = "prometheus";

/// Label carrying a storage workload's own name, used by its selector.
pub const STORAGE_NAME_LABEL: &str = "prometheus";

/// `app` value of query deployments.
pub const QUERY_APP: &str = "thanos-query";

/// Label carrying the owning cluster on query deployments.
pub const CLUSTER_LABEL: &str = "cluster";

/// Value of a referencing label.
pub const REFERENCE_VALUE: &str = "true";

/// Template labels that are not cluster references.
pub const RESERVED_TEMPLATE_LABELS: &[&str] = &[APP_LABEL, STORAGE_NAME_LABEL];

/// Label selector matching every storage workload.
#[must_use]
pub fn storage_selector() -> String {
    format!("{APP_LABEL}={STORAGE_APP}")
}

fn template_labels(deployment: &Deployment) -> Option<&BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .labels
        .as_ref()
}

fn template_labels_mut(deployment: &mut Deployment) -> &mut BTreeMap<String, String> {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
}

/// Whether `deployment` is a storage workload.
#[must_use]
pub fn is_storage_workload(deployment: &Deployment) -> bool {
    deployment.labels().get(APP_LABEL).map(String::as_str) == Some(STORAGE_APP)
}

/// Whether the cluster called `cluster` references `deployment`.
#[must_use]
pub fn is_referenced_by(deployment: &Deployment, cluster: &str) -> bool {
    !RESERVED_TEMPLATE_LABELS.contains(&cluster)
        && template_labels(deployment).is_some_and(|labels| labels.contains_key(cluster))
}

/// Whether any of `clusters` references `deployment`.
#[must_use]
pub fn is_referenced(deployment: &Deployment, clusters: &[MetricsCluster]) -> bool {
    clusters
        .iter()
        .any(|cluster| is_referenced_by(deployment, &cluster.name_any()))
}

/// Names of every cluster referencing `deployment`, sorted.
#[must_use]
pub fn referencing_clusters(deployment: &Deployment) -> Vec<String> {
    template_labels(deployment)
        .map(|labels| {
            labels
                .iter()
                .filter(|(key, value)| {
                    !RESERVED_TEMPLATE_LABELS.contains(&key.as_str()) && *value == REFERENCE_VALUE
                })
                .map(|(key, _)| key.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Records that `cluster` references `deployment`.
pub fn add_reference(deployment: &mut Deployment, cluster: &str) {
    template_labels_mut(deployment).insert(cluster.to_string(), REFERENCE_VALUE.to_string());
}

/// Drops the reference of `cluster`. Returns whether one was present.
pub fn remove_reference(deployment: &mut Deployment, cluster: &str) -> bool {
    if RESERVED_TEMPLATE_LABELS.contains(&cluster) {
        return false;
    }
    template_labels_mut(deployment).remove(cluster).is_some()
}

/// Copies every reference on `observed` onto `desired`.
///
/// After this, `desired` carries the union of its own references and those
/// already present, so reconciling one cluster never erases another's.
pub fn carry_references(observed: &Deployment, desired: &mut Deployment) {
    for cluster in referencing_clusters(observed) {
        add_reference(desired, &cluster);
    }
}
