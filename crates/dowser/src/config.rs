//! Operator configuration.
//!
//! Configuration for the Dowser operator, including:
//! - The single namespace every derived object lives in
//! - Container images for the fetcher, Prometheus and Thanos
//! - Base URLs used to locate job metadata and metric archives
//! - Resolver cache sizing and HTTP timeouts
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OperatorError, Result};

/// Container images for derived workloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImageConfig {
    /// Image of the init step that downloads and unpacks the archive.
    pub fetcher: String,
    /// Prometheus image serving the ingested metrics.
    pub prometheus: String,
    /// Thanos image used for the sidecar and the query layer.
    pub thanos: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            fetcher: "quay.io/fedora/fedora:31-x86_64".to_string(),
            prometheus: "quay.io/prometheus/prometheus:v2.17.2".to_string(),
            thanos: "quay.io/thanos/thanos:v0.14.0".to_string(),
        }
    }
}

/// Where job metadata and metric archives are looked up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    /// Raw storage base URL; replaces `source_base_url` to reach `prowjob.json`.
    pub storage_base_url: String,
    /// Base URL job URLs are declared under.
    pub source_base_url: String,
    /// Prefix of the browsable artifact index.
    pub artifact_index_prefix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            storage_base_url: "https://storage.googleapis.com/origin-ci-test".to_string(),
            source_base_url: "https://prow.ci.openshift.org/view/gs/origin-ci-test".to_string(),
            artifact_index_prefix: "https://gcsweb-ci.apps.ci.l2s4.p1.openshiftapps.com"
                .to_string(),
        }
    }
}

/// Resolver cache sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resolved jobs kept.
    pub capacity: usize,
    /// Lifetime of a resolved job in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: 6 * 60 * 60,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a [`Duration`].
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// How per-cluster objects (store service, query deployment, query service,
/// route) react to drift from their desired state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DriftPolicy {
    /// Update drifted objects in place, like storage workloads.
    #[default]
    UpdateInPlace,
    /// Only create missing objects; never touch existing ones.
    CreateOnly,
}

/// Main operator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperatorConfig {
    /// Namespace watched and written to.
    pub namespace: String,
    /// Container images.
    pub images: ImageConfig,
    /// Metadata and archive locations.
    pub sources: SourceConfig,
    /// Memory request of the Prometheus container (a Kubernetes quantity).
    pub prometheus_memory: String,
    /// Secret holding a Thanos object-store config (`objstore.yml`) for the sidecar.
    pub objstore_secret: Option<String>,
    /// Resolver cache sizing.
    pub cache: CacheConfig,
    /// Timeout for each metadata or listing request, in seconds.
    pub http_timeout_secs: u64,
    /// Delay before a failed reconciliation is retried, in seconds.
    pub requeue_secs: u64,
    /// Drift handling of per-cluster objects.
    pub drift_policy: DriftPolicy,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "dowser".to_string(),
            images: ImageConfig::default(),
            sources: SourceConfig::default(),
            prometheus_memory: "350Mi".to_string(),
            objstore_secret: None,
            cache: CacheConfig::default(),
            http_timeout_secs: 30,
            requeue_secs: 60,
            drift_policy: DriftPolicy::default(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OperatorError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OperatorError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(OperatorError::Config("namespace cannot be empty".to_string()));
        }

        for (field, image) in [
            ("images.fetcher", &self.images.fetcher),
            ("images.prometheus", &self.images.prometheus),
            ("images.thanos", &self.images.thanos),
        ] {
            if image.trim().is_empty() {
                return Err(OperatorError::Config(format!("{field} cannot be empty")));
            }
        }

        for (field, url) in [
            ("sources.storage_base_url", &self.sources.storage_base_url),
            ("sources.source_base_url", &self.sources.source_base_url),
            ("sources.artifact_index_prefix", &self.sources.artifact_index_prefix),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(OperatorError::Config(format!(
                    "{field} must start with http:// or https://"
                )));
            }
        }

        if !is_quantity(&self.prometheus_memory) {
            return Err(OperatorError::Config(format!(
                "prometheus_memory '{}' is not a valid quantity",
                self.prometheus_memory
            )));
        }

        if self.cache.capacity == 0 {
            return Err(OperatorError::Config("cache.capacity must be > 0".to_string()));
        }

        if self.http_timeout_secs == 0 {
            return Err(OperatorError::Config("http_timeout_secs must be > 0".to_string()));
        }

        if self.requeue_secs == 0 {
            return Err(OperatorError::Config("requeue_secs must be > 0".to_string()));
        }

        Ok(())
    }

    /// HTTP request timeout as a [`Duration`].
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Retry delay as a [`Duration`].
    #[must_use]
    pub const fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}

static QUANTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+(\.[0-9]+)?(m|k|M|G|T|P|E|Ki|Mi|Gi|Ti|Pi|Ei)?$")
        .unwrap_or_else(|_| unreachable!())
});

fn is_quantity(value: &str) -> bool {
    QUANTITY_REGEX.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.namespace, "dowser");
        assert_eq!(config.prometheus_memory, "350Mi");
        assert_eq!(config.drift_policy, DriftPolicy::UpdateInPlace);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = OperatorConfig::from_toml("").expect("empty config is valid");
        assert_eq!(config, OperatorConfig::default());
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = OperatorConfig::from_toml(
            r#"
            namespace = "metrics"
            prometheus_memory = "1Gi"
            drift_policy = "create-only"

            [images]
            thanos = "quay.io/thanos/thanos:v0.15.0"

            [cache]
            capacity = 16
            "#,
        )
        .expect("valid config");

        assert_eq!(config.namespace, "metrics");
        assert_eq!(config.prometheus_memory, "1Gi");
        assert_eq!(config.drift_policy, DriftPolicy::CreateOnly);
        assert_eq!(config.images.thanos, "quay.io/thanos/thanos:v0.15.0");
        assert_eq!(config.images.prometheus, ImageConfig::default().prometheus);
        assert_eq!(config.cache.capacity, 16);
        assert_eq!(config.cache.ttl_secs, CacheConfig::default().ttl_secs);
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let result = OperatorConfig::from_toml("namespace = [");
        assert!(matches!(result, Err(OperatorError::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = OperatorConfig::from_file("/nonexistent/dowser.toml");
        assert!(matches!(result, Err(OperatorError::Config(_))));
    }

    mod validation {
        use super::*;
        use test_case::test_case;

        #[test]
        fn rejects_empty_namespace() {
            let config = OperatorConfig {
                namespace: String::new(),
                ..OperatorConfig::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn rejects_blank_image() {
            let mut config = OperatorConfig::default();
            config.images.fetcher = "  ".to_string();
            assert!(config.validate().is_err());
        }

        #[test]
        fn rejects_non_http_base_url() {
            let mut config = OperatorConfig::default();
            config.sources.artifact_index_prefix = "gs://bucket".to_string();
            assert!(config.validate().is_err());
        }

        #[test]
        fn rejects_zero_cache_capacity() {
            let mut config = OperatorConfig::default();
            config.cache.capacity = 0;
            assert!(config.validate().is_err());
        }

        #[test_case("350Mi", true ; "binary suffix")]
        #[test_case("2G", true ; "decimal suffix")]
        #[test_case("1.5Gi", true ; "fractional")]
        #[test_case("500", true ; "bare bytes")]
        #[test_case("lots", false ; "word")]
        #[test_case("", false ; "empty")]
        #[test_case("10 Mi", false ; "space")]
        fn memory_quantity(value: &str, valid: bool) {
            let config = OperatorConfig {
                prometheus_memory: value.to_string(),
                ..OperatorConfig::default()
            };
            assert_eq!(config.validate().is_ok(), valid);
        }
    }
}
