//! # dowser-api
//!
//! Resource definitions shared by the Dowser operator.
//!
//! - [`cluster`]: the `MetricsCluster` custom resource users author
//! - [`route`]: the subset of the OpenShift `Route` resource the operator writes
//! - [`job`]: CI job metadata consumed while deriving storage workloads

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod job;
pub mod route;

pub use cluster::{MetricsCluster, MetricsClusterSpec, MetricsClusterStatus};
pub use job::{format_timestamp, normalize_job_url, JobMetadata};
pub use route::{
    InsecureEdgeTerminationPolicy, Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig,
    TlsTermination,
};
