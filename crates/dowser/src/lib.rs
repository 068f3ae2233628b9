//! Dowser operator.
//!
//! Turns `MetricsCluster` objects, each a list of CI job URLs, into a
//! queryable metrics stack:
//!
//! - one Prometheus storage workload per job, ingesting the job's metric
//!   archive and shipping it through a Thanos sidecar, shared by every
//!   cluster that declares the job;
//! - per cluster, a headless store service over its storage workloads and a
//!   Thanos query deployment, service and route in front of them.
//!
//! Storage workloads record which clusters use them with pod-template labels
//! (see [`references`]) and are deleted once none is left.
//!
//! # Modules
//!
//! - [`identity`]: deterministic names of derived objects
//! - [`references`]: cluster → workload reference labels
//! - [`resolver`]: job metadata and archive discovery, with a bounded cache
//! - [`manifests`]: pure builders of desired objects
//! - [`client`]: the orchestration API seam
//! - [`reconciler`]: the convergence engine
//! - [`controller`]: runtime wiring for the binary

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod manifests;
pub mod memory;
pub mod reconciler;
pub mod references;
pub mod resolver;

pub use client::{ClusterClient, KubeClusterClient, Object};
pub use config::{CacheConfig, DriftPolicy, ImageConfig, OperatorConfig, SourceConfig};
pub use error::{OperatorError, Result};
pub use identity::ObjectKey;
pub use memory::{InMemoryCluster, StaticFetcher};
pub use reconciler::{Applied, Reconciler, Step, Transition};
pub use resolver::{ArchiveCache, Fetcher, HttpFetcher, MetadataResolver, ResolvedJob};
