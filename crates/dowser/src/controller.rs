//! Controller wiring.
//!
//! Two controllers drive the reconcilers:
//!
//! - one over `MetricsCluster` objects, converging each on change. Every
//!   cluster carries [`CLUSTER_FINALIZER`], so a deleted cluster is seen one
//!   last time and its references are released before it disappears;
//! - one over storage workloads (`app=prometheus`), collecting the
//!   unreferenced ones.
//!
//! The runtime serializes reconciliation per object and re-delivers failed
//! keys after [`OperatorConfig::requeue_interval`](crate::config::OperatorConfig::requeue_interval).

use std::sync::Arc;

use dowser_api::MetricsCluster;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{Event as Finalizer, finalizer};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::client::KubeClusterClient;
use crate::error::{OperatorError, Result};
use crate::identity::ObjectKey;
use crate::reconciler::Reconciler;
use crate::references::storage_selector;
use crate::resolver::Fetcher;

/// Finalizer holding a metrics cluster until its references are released.
pub const CLUSTER_FINALIZER: &str = "metricsclusters.dowser.io/release";

type Shared<F> = Arc<Reconciler<KubeClusterClient, F>>;

fn object_key<K: Resource>(object: &K) -> ObjectKey {
    ObjectKey::new(object.namespace().unwrap_or_default(), object.name_any())
}

async fn reconcile_cluster<F: Fetcher + 'static>(
    cluster: Arc<MetricsCluster>,
    reconciler: Shared<F>,
) -> Result<Action> {
    let key = object_key(cluster.as_ref());
    let api: Api<MetricsCluster> =
        Api::namespaced(reconciler.client().inner().clone(), &key.namespace);

    finalizer(&api, CLUSTER_FINALIZER, cluster, |event| {
        cluster_event(event, &key, &reconciler)
    })
    .await
    .map_err(|e| OperatorError::Finalizer(Box::new(e)))
}

async fn cluster_event<F: Fetcher + 'static>(
    event: Finalizer<MetricsCluster>,
    key: &ObjectKey,
    reconciler: &Reconciler<KubeClusterClient, F>,
) -> Result<Action> {
    match event {
        Finalizer::Apply(cluster) => {
            reconciler.converge_metrics_cluster(key, &cluster).await?;
        }
        Finalizer::Cleanup(_) => {
            let released = reconciler.release_cluster(&key.name).await?;
            info!(key = %key, released = released.len(), "released deleted metrics cluster");
        }
    }
    Ok(Action::await_change())
}

async fn reconcile_workload<F: Fetcher + 'static>(
    workload: Arc<Deployment>,
    reconciler: Shared<F>,
) -> Result<Action> {
    let key = object_key(workload.as_ref());
    reconciler.reconcile_deployment(&key).await?;
    Ok(Action::await_change())
}

fn error_policy<K: Resource, F: Fetcher + 'static>(
    object: Arc<K>,
    error: &OperatorError,
    reconciler: Shared<F>,
) -> Action {
    let key = object_key(object.as_ref());
    if error.is_retryable() {
        let delay = reconciler.config().requeue_interval();
        warn!(key = %key, error = %error, retry_in = ?delay, "reconcile failed");
        Action::requeue(delay)
    } else {
        warn!(key = %key, error = %error, "reconcile failed, waiting for a change");
        Action::await_change()
    }
}

/// Runs the operator until SIGINT or SIGTERM.
pub async fn run<F: Fetcher + 'static>(client: Client, reconciler: Shared<F>) {
    let namespace = reconciler.config().namespace.clone();
    let clusters: Api<MetricsCluster> = Api::namespaced(client.clone(), &namespace);
    let workloads: Api<Deployment> = Api::namespaced(client, &namespace);

    info!(namespace = %namespace, drift_policy = ?reconciler.config().drift_policy, "starting controllers");

    let cluster_controller = Controller::new(clusters, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_cluster, error_policy, Arc::clone(&reconciler))
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(object = %object, "reconciled metrics cluster"),
                Err(e) => debug!(error = %e, "metrics cluster controller error"),
            }
        });

    let workload_controller = Controller::new(
        workloads,
        watcher::Config::default().labels(&storage_selector()),
    )
    .shutdown_on_signal()
    .run(reconcile_workload, error_policy, Arc::clone(&reconciler))
    .for_each(|result| async move {
        match result {
            Ok((object, _)) => debug!(object = %object, "reconciled storage workload"),
            Err(e) => debug!(error = %e, "storage workload controller error"),
        }
    });

    futures::future::join(cluster_controller, workload_controller).await;
    info!("controllers stopped");
}
