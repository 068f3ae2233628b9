//! Convergence of metrics clusters and storage workloads.
//!
//! Two entry points, each driven by the controller with a namespaced key:
//!
//! - [`Reconciler::reconcile_metrics_cluster`] brings every object derived
//!   from a cluster to its desired state, or releases the cluster's
//!   references once it is gone.
//! - [`Reconciler::reconcile_deployment`] deletes storage workloads no
//!   remaining cluster references.
//!
//! A cluster converges through an ordered list of [`Step`]s. Every step is
//! idempotent and independent, so a failing step never blocks the ones after
//! it; failures are collected and returned together, and the controller
//! re-delivers the key to retry from the top.

pub mod drift;

use std::fmt;

use dowser_api::MetricsCluster;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::client::{ClusterClient, Object, key_of, kind_of};
use crate::config::{DriftPolicy, OperatorConfig};
use crate::error::{OperatorError, Result};
use crate::identity::{ObjectKey, validate_cluster_name};
use crate::manifests::{
    query_deployment, query_route, query_service, storage_deployment, store_service,
};
use crate::references::{
    add_reference, carry_references, is_referenced, is_storage_workload, remove_reference,
    storage_selector,
};
use crate::resolver::{Fetcher, MetadataResolver};

/// Outcome of converging one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The object did not exist and was created.
    Created,
    /// The object had drifted and was replaced.
    Updated,
    /// The object was deleted.
    Deleted,
    /// Nothing to do.
    Unchanged,
    /// The object could not be converged and was left alone.
    Skipped,
}

impl Transition {
    /// Whether the transition wrote to the API.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// One unit of cluster convergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Storage workload for a job URL, shared with other clusters.
    StorageWorkload(String),
    /// Headless service over the cluster's storage workloads.
    StoreService,
    /// Thanos query deployment.
    QueryDeployment,
    /// Service in front of the query deployment.
    QueryService,
    /// External route to the query service.
    QueryRoute,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageWorkload(url) => write!(f, "storage workload for {url}"),
            Self::StoreService => f.write_str("store service"),
            Self::QueryDeployment => f.write_str("query deployment"),
            Self::QueryService => f.write_str("query service"),
            Self::QueryRoute => f.write_str("query route"),
        }
    }
}

/// Steps converging `cluster`, in order.
///
/// Storage workloads come first so the store service has something to
/// select once it exists. Repeated job URLs are planned once.
#[must_use]
pub fn plan(cluster: &MetricsCluster) -> Vec<Step> {
    let mut steps: Vec<Step> = Vec::with_capacity(cluster.spec.urls.len() + 4);
    for url in &cluster.spec.urls {
        let step = Step::StorageWorkload(url.clone());
        if !steps.contains(&step) {
            steps.push(step);
        }
    }
    steps.extend([
        Step::StoreService,
        Step::QueryDeployment,
        Step::QueryService,
        Step::QueryRoute,
    ]);
    steps
}

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Kind of the object the step converges.
    pub kind: String,
    /// The object; `None` if the step was skipped before it could be named.
    pub key: Option<ObjectKey>,
    /// What happened to it.
    pub transition: Transition,
}

impl Applied {
    fn new<K: Object>(key: ObjectKey, transition: Transition) -> Self {
        Self {
            kind: kind_of::<K>(),
            key: Some(key),
            transition,
        }
    }
}

/// Converges derived objects against the orchestration API.
pub struct Reconciler<C, F> {
    client: C,
    resolver: MetadataResolver<F>,
    config: OperatorConfig,
}

impl<C: ClusterClient, F: Fetcher> Reconciler<C, F> {
    /// Creates a reconciler.
    #[must_use]
    pub const fn new(client: C, resolver: MetadataResolver<F>, config: OperatorConfig) -> Self {
        Self {
            client,
            resolver,
            config,
        }
    }

    /// The orchestration client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// The metadata resolver.
    pub const fn resolver(&self) -> &MetadataResolver<F> {
        &self.resolver
    }

    /// The operator configuration.
    pub const fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Converges everything derived from the cluster at `key`.
    ///
    /// A cluster that no longer exists, or is being deleted, has its
    /// references removed from every storage workload. Workloads themselves
    /// are left to [`Self::reconcile_deployment`].
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Steps`] if any step failed, or the API error
    /// if the cluster itself could not be read.
    pub async fn reconcile_metrics_cluster(&self, key: &ObjectKey) -> Result<Vec<Applied>> {
        match self.client.get::<MetricsCluster>(key).await? {
            Some(cluster) if cluster.meta().deletion_timestamp.is_none() => {
                self.converge_metrics_cluster(key, &cluster).await
            }
            _ => {
                info!(key = %key, "metrics cluster is gone, releasing its storage workloads");
                self.release_cluster(&key.name).await
            }
        }
    }

    /// Converges the objects derived from a live `cluster`.
    ///
    /// Once every declared job has a known workload, the cluster's reference
    /// is also dropped from workloads it no longer declares.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Steps`] if any step failed.
    pub async fn converge_metrics_cluster(
        &self,
        key: &ObjectKey,
        cluster: &MetricsCluster,
    ) -> Result<Vec<Applied>> {
        if let Err(e) = validate_cluster_name(&key.name) {
            warn!(key = %key, error = %e, "not converging metrics cluster");
            return Ok(Vec::new());
        }

        let mut applied = Vec::new();
        let mut failures = Vec::new();
        let mut declared = Vec::new();
        let mut all_declared_known = true;
        for step in plan(cluster) {
            let is_storage = matches!(step, Step::StorageWorkload(_));
            match self.apply(&key.name, &step).await {
                Ok(outcome) => {
                    if is_storage {
                        match &outcome.key {
                            Some(workload) => declared.push(workload.name.clone()),
                            None => all_declared_known = false,
                        }
                    }
                    applied.push(outcome);
                }
                Err(e) => {
                    all_declared_known &= !is_storage;
                    warn!(key = %key, step = %step, error = %e, "convergence step failed");
                    failures.push(e);
                }
            }
        }

        if all_declared_known {
            match self.release_workloads(&key.name, &declared).await {
                Ok(released) => applied.extend(released),
                Err(OperatorError::Steps(errors)) => failures.extend(errors),
                Err(e) => failures.push(e),
            }
        } else {
            debug!(key = %key, "keeping undeclared references until every job resolves");
        }

        if failures.is_empty() {
            Ok(applied)
        } else {
            Err(OperatorError::Steps(failures))
        }
    }

    /// Removes the reference of `cluster` from every storage workload.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Steps`] if any workload could not be
    /// updated, or the API error if they could not be listed.
    pub async fn release_cluster(&self, cluster: &str) -> Result<Vec<Applied>> {
        self.release_workloads(cluster, &[]).await
    }

    /// Deletes the storage workload at `key` if no cluster references it.
    ///
    /// # Errors
    ///
    /// Returns an error if the workload or clusters cannot be read, or the
    /// delete fails for any reason other than the workload being gone.
    pub async fn reconcile_deployment(&self, key: &ObjectKey) -> Result<Transition> {
        let Some(workload) = self.client.get::<Deployment>(key).await? else {
            debug!(key = %key, "storage workload already deleted");
            return Ok(Transition::Skipped);
        };

        if !is_storage_workload(&workload) {
            debug!(key = %key, "not a storage workload");
            return Ok(Transition::Skipped);
        }

        let clusters: Vec<MetricsCluster> = self.client.list(&key.namespace, None).await?;
        if is_referenced(&workload, &clusters) {
            debug!(key = %key, "storage workload is still referenced");
            return Ok(Transition::Unchanged);
        }

        match self.client.delete::<Deployment>(key).await {
            Ok(()) => {
                info!(
                    kind = "Deployment",
                    key = %key,
                    transition = %Transition::Deleted,
                    "deleted unreferenced storage workload"
                );
                Ok(Transition::Deleted)
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "storage workload vanished before delete");
                Ok(Transition::Unchanged)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, cluster: &str, step: &Step) -> Result<Applied> {
        let policy = self.config.drift_policy;
        match step {
            Step::StorageWorkload(url) => self.converge_storage_workload(cluster, url).await,
            Step::StoreService => {
                self.ensure(cluster, store_service(&self.config, cluster), policy)
                    .await
            }
            Step::QueryDeployment => {
                self.ensure(cluster, query_deployment(&self.config, cluster), policy)
                    .await
            }
            Step::QueryService => {
                self.ensure(cluster, query_service(&self.config, cluster), policy)
                    .await
            }
            Step::QueryRoute => {
                self.ensure(cluster, query_route(&self.config, cluster), policy)
                    .await
            }
        }
    }

    async fn converge_storage_workload(&self, cluster: &str, url: &str) -> Result<Applied> {
        let job = match self.resolver.resolve(url).await {
            Ok(job) => job,
            Err(e) => {
                warn!(cluster, url, error = %e, "skipping job url");
                return Ok(Applied {
                    kind: kind_of::<Deployment>(),
                    key: None,
                    transition: Transition::Skipped,
                });
            }
        };

        let mut desired = storage_deployment(&self.config, &job);
        let key = key_of(&desired)?;
        let observed = self.client.get::<Deployment>(&key).await?;
        if let Some(observed) = &observed {
            carry_references(observed, &mut desired);
        }
        add_reference(&mut desired, cluster);

        let transition = self
            .write(cluster, &key, observed, desired, DriftPolicy::UpdateInPlace)
            .await?;
        Ok(Applied::new::<Deployment>(key, transition))
    }

    async fn ensure<K: Object>(
        &self,
        cluster: &str,
        desired: K,
        policy: DriftPolicy,
    ) -> Result<Applied> {
        let key = key_of(&desired)?;
        let observed = self.client.get::<K>(&key).await?;
        let transition = self.write(cluster, &key, observed, desired, policy).await?;
        Ok(Applied::new::<K>(key, transition))
    }

    /// Creates `desired` if `observed` is absent, or replaces `observed` if
    /// it drifted and `policy` allows updates.
    async fn write<K: Object>(
        &self,
        cluster: &str,
        key: &ObjectKey,
        observed: Option<K>,
        desired: K,
        policy: DriftPolicy,
    ) -> Result<Transition> {
        let kind = kind_of::<K>();

        let Some(observed) = observed else {
            self.client.create(&desired).await?;
            info!(kind = %kind, key = %key, cluster, transition = %Transition::Created, "created");
            return Ok(Transition::Created);
        };

        if policy == DriftPolicy::CreateOnly {
            debug!(kind = %kind, key = %key, cluster, "exists, leaving as is");
            return Ok(Transition::Unchanged);
        }

        let mut merged = serde_json::to_value(&observed)?;
        let desired = serde_json::to_value(&desired)?;
        if drift::is_converged(&merged, &desired) {
            debug!(kind = %kind, key = %key, cluster, "up to date");
            return Ok(Transition::Unchanged);
        }

        drift::overlay(&mut merged, &desired);
        let updated: K = serde_json::from_value(merged)?;
        self.client.replace(&updated).await?;
        info!(kind = %kind, key = %key, cluster, transition = %Transition::Updated, "updated");
        Ok(Transition::Updated)
    }

    /// Removes the reference of `cluster` from every storage workload not
    /// named in `keep`.
    async fn release_workloads(&self, cluster: &str, keep: &[String]) -> Result<Vec<Applied>> {
        let workloads: Vec<Deployment> = self
            .client
            .list(&self.config.namespace, Some(&storage_selector()))
            .await?;

        let mut applied = Vec::new();
        let mut failures = Vec::new();
        for mut workload in workloads {
            if keep.contains(&workload.name_any()) || !remove_reference(&mut workload, cluster) {
                continue;
            }
            let key = match key_of(&workload) {
                Ok(key) => key,
                Err(e) => {
                    failures.push(e);
                    continue;
                }
            };
            match self.client.replace(&workload).await {
                Ok(_) => {
                    info!(
                        kind = "Deployment",
                        key = %key,
                        cluster,
                        transition = %Transition::Updated,
                        "released storage workload"
                    );
                    applied.push(Applied::new::<Deployment>(key, Transition::Updated));
                }
                Err(e) if e.is_not_found() => {
                    debug!(key = %key, cluster, "storage workload vanished before release");
                }
                Err(e) => {
                    warn!(key = %key, cluster, error = %e, "couldn't release storage workload");
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            Ok(applied)
        } else {
            Err(OperatorError::Steps(failures))
        }
    }
}
