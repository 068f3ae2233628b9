//! Desired-state manifests for every derived object.
//!
//! Builders are pure: the same configuration and inputs always produce the
//! same object. Drift detection relies on this, so nothing here may read the
//! clock, generate identifiers, or iterate a hash map.

use std::collections::BTreeMap;

use dowser_api::{
    format_timestamp, InsecureEdgeTerminationPolicy, Route, RoutePort, RouteSpec,
    RouteTargetReference, TlsConfig, TlsTermination,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::OperatorConfig;
use crate::identity::{
    query_deployment_key, query_route_key, query_service_key, storage_workload_key,
    store_service_key, ObjectKey,
};
use crate::references::{
    APP_LABEL, CLUSTER_LABEL, QUERY_APP, REFERENCE_VALUE, STORAGE_APP, STORAGE_NAME_LABEL,
};
use crate::resolver::ResolvedJob;

/// Port Prometheus serves on inside a storage workload.
pub const PROMETHEUS_PORT: i32 = 9090;

/// Store API (gRPC) port of the sidecar and the query layer.
pub const GRPC_PORT: i32 = 10901;

/// HTTP diagnostics port of the sidecar.
pub const SIDECAR_HTTP_PORT: i32 = 10902;

/// HTTP port of the query layer.
pub const QUERY_HTTP_PORT: i32 = 19192;

/// Volume shared by the init step, Prometheus and the sidecar.
pub const STORAGE_VOLUME: &str = "prometheus-storage-volume";

const STORAGE_MOUNT_PATH: &str = "/prometheus/";
const OBJSTORE_VOLUME: &str = "objstore-config";
const OBJSTORE_MOUNT_PATH: &str = "/etc/thanos/";
const OBJSTORE_FILE: &str = "objstore.yml";

/// Annotation holding the job's canonical status URL.
pub const URL_ANNOTATION: &str = "url";
/// Annotation holding the job start time.
pub const STARTED_ANNOTATION: &str = "started";
/// Annotation holding the job completion time.
pub const COMPLETED_ANNOTATION: &str = "completed";

/// Script run by the init step: fetch and unpack the archive, make it
/// writable by Prometheus (uid 65534), and write a config whose external
/// labels identify the job.
const INIT_SCRIPT: &str = r"set -uxo pipefail
umask 0000
curl -sL ${PROMTAR} | tar xvz -m
chown -R 65534:65534 /prometheus

cat >/prometheus/prometheus.yml <<EOL
# my global config
global:
  external_labels:
    cluster_name: '${DEPLOYMENT_NAME}'
    cluster_url: '${PROW_URL}'
    cluster_job: '${PROW_JOB}'

scrape_configs:
  - job_name: 'prometheus'
    static_configs:
    - targets: ['localhost:9090']
EOL
";

fn labels<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn metadata(key: &ObjectKey) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(key.namespace.clone()),
        name: Some(key.name.clone()),
        ..ObjectMeta::default()
    }
}

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.into_iter().map(str::to_string).collect()
}

fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        ..ServicePort::default()
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn storage_mount() -> VolumeMount {
    VolumeMount {
        name: STORAGE_VOLUME.to_string(),
        mount_path: STORAGE_MOUNT_PATH.to_string(),
        ..VolumeMount::default()
    }
}

/// Readiness probe shared by every serving container: `GET /` on `port`.
fn readiness_probe(port: i32) -> Probe {
    Probe {
        timeout_seconds: Some(1),
        period_seconds: Some(10),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        http_get: Some(HTTPGetAction {
            path: Some("/".to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".to_string()),
            ..HTTPGetAction::default()
        }),
        ..Probe::default()
    }
}

/// Storage workload ingesting the archive of `job`.
///
/// References are not set here; the reconciler adds the referencing
/// cluster's label and carries over existing ones.
#[must_use]
pub fn storage_deployment(config: &OperatorConfig, job: &ResolvedJob) -> Deployment {
    let key = storage_workload_key(&config.namespace, job.canonical_url());
    let annotations = BTreeMap::from([
        (URL_ANNOTATION.to_string(), job.canonical_url().to_string()),
        (
            STARTED_ANNOTATION.to_string(),
            format_timestamp(job.metadata.started.as_ref()),
        ),
        (
            COMPLETED_ANNOTATION.to_string(),
            format_timestamp(job.metadata.completed.as_ref()),
        ),
    ]);
    let selector = labels([(APP_LABEL, STORAGE_APP), (STORAGE_NAME_LABEL, key.name.as_str())]);

    let mut volumes = vec![Volume {
        name: STORAGE_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Volume::default()
    }];

    let mut sidecar_command = strings([
        "/bin/thanos",
        "sidecar",
        "--tsdb.path=/prometheus",
        "--prometheus.url=http://localhost:9090",
        "--shipper.upload-compacted",
    ]);
    let mut sidecar_mounts = vec![storage_mount()];

    if let Some(secret) = &config.objstore_secret {
        volumes.push(Volume {
            name: OBJSTORE_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        });
        sidecar_command.push(format!(
            "--objstore.config-file={OBJSTORE_MOUNT_PATH}{OBJSTORE_FILE}"
        ));
        sidecar_mounts.push(VolumeMount {
            name: OBJSTORE_VOLUME.to_string(),
            mount_path: OBJSTORE_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        });
    }

    let setup = Container {
        name: "setup".to_string(),
        image: Some(config.images.fetcher.clone()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            INIT_SCRIPT.to_string(),
        ]),
        working_dir: Some(STORAGE_MOUNT_PATH.to_string()),
        env: Some(vec![
            env("PROMTAR", &job.archive_url),
            env("DEPLOYMENT_NAME", &key.name),
            env("PROW_URL", job.canonical_url()),
            env("PROW_JOB", job.metadata.job.as_deref().unwrap_or_default()),
        ]),
        volume_mounts: Some(vec![storage_mount()]),
        ..Container::default()
    };

    let prometheus = Container {
        name: "prometheus".to_string(),
        image: Some(config.images.prometheus.clone()),
        command: Some(strings([
            "/bin/prometheus",
            "--storage.tsdb.max-block-duration=2h",
            "--storage.tsdb.min-block-duration=2h",
            "--web.enable-lifecycle",
            "--storage.tsdb.path=/prometheus",
            "--config.file=/prometheus/prometheus.yml",
        ])),
        ports: Some(vec![tcp_port("webui", PROMETHEUS_PORT)]),
        volume_mounts: Some(vec![storage_mount()]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".to_string())),
                (
                    "memory".to_string(),
                    Quantity(config.prometheus_memory.clone()),
                ),
            ])),
            ..ResourceRequirements::default()
        }),
        readiness_probe: Some(readiness_probe(PROMETHEUS_PORT)),
        ..Container::default()
    };

    let sidecar = Container {
        name: "thanos-sidecar".to_string(),
        image: Some(config.images.thanos.clone()),
        command: Some(sidecar_command),
        ports: Some(vec![
            tcp_port("grpc", GRPC_PORT),
            tcp_port("http", SIDECAR_HTTP_PORT),
        ]),
        volume_mounts: Some(sidecar_mounts),
        readiness_probe: Some(readiness_probe(SIDECAR_HTTP_PORT)),
        ..Container::default()
    };

    Deployment {
        metadata: ObjectMeta {
            labels: Some(labels([(APP_LABEL, STORAGE_APP)])),
            annotations: Some(annotations.clone()),
            ..metadata(&key)
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    annotations: Some(annotations),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    share_process_namespace: Some(true),
                    volumes: Some(volumes),
                    init_containers: Some(vec![setup]),
                    containers: vec![prometheus, sidecar],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        status: None,
    }
}

/// Headless service over every storage workload referenced by `cluster`.
#[must_use]
pub fn store_service(config: &OperatorConfig, cluster: &str) -> Service {
    let key = store_service_key(&config.namespace, cluster);
    Service {
        metadata: metadata(&key),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![
                service_port("grpc", GRPC_PORT),
                service_port("http", SIDECAR_HTTP_PORT),
            ]),
            selector: Some(labels([(APP_LABEL, STORAGE_APP), (cluster, REFERENCE_VALUE)])),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

/// Thanos query deployment discovering the cluster's store service via DNS.
#[must_use]
pub fn query_deployment(config: &OperatorConfig, cluster: &str) -> Deployment {
    let key = query_deployment_key(&config.namespace, cluster);
    let store = store_service_key(&config.namespace, cluster);
    let selector = labels([(APP_LABEL, QUERY_APP), (CLUSTER_LABEL, cluster)]);

    let query = Container {
        name: "query".to_string(),
        image: Some(config.images.thanos.clone()),
        command: Some(vec![
            "/bin/thanos".to_string(),
            "query".to_string(),
            format!("--http-address=0.0.0.0:{QUERY_HTTP_PORT}"),
            "--store.sd-dns-interval=10s".to_string(),
            format!("--store=dnssrv+_grpc._tcp.{}.{}.svc", store.name, store.namespace),
        ]),
        ports: Some(vec![
            tcp_port("http", QUERY_HTTP_PORT),
            tcp_port("grpc", GRPC_PORT),
        ]),
        readiness_probe: Some(readiness_probe(QUERY_HTTP_PORT)),
        ..Container::default()
    };

    Deployment {
        metadata: ObjectMeta {
            labels: Some(labels([(APP_LABEL, QUERY_APP)])),
            ..metadata(&key)
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![query],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        status: None,
    }
}

/// Service in front of the cluster's query deployment.
#[must_use]
pub fn query_service(config: &OperatorConfig, cluster: &str) -> Service {
    let key = query_service_key(&config.namespace, cluster);
    Service {
        metadata: metadata(&key),
        spec: Some(ServiceSpec {
            ports: Some(vec![
                service_port("http", QUERY_HTTP_PORT),
                service_port("grpc", GRPC_PORT),
            ]),
            selector: Some(labels([(APP_LABEL, QUERY_APP), (CLUSTER_LABEL, cluster)])),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

/// Edge-terminated route exposing the cluster's query service.
#[must_use]
pub fn query_route(config: &OperatorConfig, cluster: &str) -> Route {
    let key = query_route_key(&config.namespace, cluster);
    let service = query_service_key(&config.namespace, cluster);
    let mut route = Route::new(
        &key.name,
        RouteSpec {
            host: None,
            to: RouteTargetReference::service(service.name),
            port: Some(RoutePort {
                target_port: IntOrString::String("http".to_string()),
            }),
            tls: Some(TlsConfig {
                termination: TlsTermination::Edge,
                insecure_edge_termination_policy: Some(InsecureEdgeTerminationPolicy::Redirect),
            }),
        },
    );
    route.metadata.namespace = Some(key.namespace);
    route
}
