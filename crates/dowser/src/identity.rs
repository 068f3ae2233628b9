//! Deterministic naming of derived objects.
//!
//! Storage workloads are named after the job they ingest, not after the
//! cluster that asked for them, so clusters declaring the same job converge
//! on one shared workload. Everything else is named after its cluster.
//! All functions here are pure.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{OperatorError, Result};
use crate::references::RESERVED_TEMPLATE_LABELS;

/// Prefix of storage workload names.
pub const STORAGE_PREFIX: &str = "prometheus-";

/// Number of SHA-256 bytes kept in a storage workload name.
///
/// Six bytes become twelve hex characters. Changing this renames every
/// storage workload, orphaning the old ones.
pub const STORAGE_HASH_BYTES: usize = 6;

/// Prefix of store service names.
pub const STORE_SERVICE_PREFIX: &str = "store-";

/// Prefix shared by the query deployment, service and route.
pub const QUERY_PREFIX: &str = "query-";

/// Longest cluster name whose derived names still fit a 63-character DNS label.
pub const MAX_CLUSTER_NAME_LEN: usize = 63 - STORE_SERVICE_PREFIX.len();

/// Namespaced identity of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the object.
    pub namespace: String,
    /// Name of the object.
    pub name: String,
}

impl ObjectKey {
    /// Creates a key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Storage workload for the job whose canonical status URL is `status_url`.
#[must_use]
pub fn storage_workload_key(namespace: &str, status_url: &str) -> ObjectKey {
    let digest = Sha256::digest(status_url.as_bytes());
    let name = format!("{STORAGE_PREFIX}{}", hex::encode(&digest[..STORAGE_HASH_BYTES]));
    ObjectKey::new(namespace, name)
}

/// Headless service fronting a cluster's storage workloads.
#[must_use]
pub fn store_service_key(namespace: &str, cluster: &str) -> ObjectKey {
    ObjectKey::new(namespace, format!("{STORE_SERVICE_PREFIX}{cluster}"))
}

/// Thanos query deployment of a cluster.
#[must_use]
pub fn query_deployment_key(namespace: &str, cluster: &str) -> ObjectKey {
    ObjectKey::new(namespace, format!("{QUERY_PREFIX}{cluster}"))
}

/// Service in front of a cluster's query deployment.
#[must_use]
pub fn query_service_key(namespace: &str, cluster: &str) -> ObjectKey {
    ObjectKey::new(namespace, format!("{QUERY_PREFIX}{cluster}"))
}

/// External route to a cluster's query service.
#[must_use]
pub fn query_route_key(namespace: &str, cluster: &str) -> ObjectKey {
    ObjectKey::new(namespace, format!("{QUERY_PREFIX}{cluster}"))
}

/// Checks that a cluster name can be used as a referencing label and as the
/// suffix of derived object names.
///
/// # Errors
///
/// Returns [`OperatorError::InvalidCluster`] for names that collide with a
/// reserved template label, are too long, or are not DNS labels.
pub fn validate_cluster_name(name: &str) -> Result<()> {
    let invalid = |reason: String| OperatorError::InvalidCluster {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name cannot be empty".to_string()));
    }
    if name.len() > MAX_CLUSTER_NAME_LEN {
        return Err(invalid(format!(
            "name cannot exceed {MAX_CLUSTER_NAME_LEN} characters"
        )));
    }
    if RESERVED_TEMPLATE_LABELS.contains(&name) {
        return Err(invalid(format!("'{name}' is a reserved label")));
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(invalid(
            "name must be lowercase alphanumeric characters or '-', starting and ending with an alphanumeric"
                .to_string(),
        ));
    }

    Ok(())
}
