//! OpenShift `Route` resource.
//!
//! Only the fields the operator reads or writes are modelled; the API server
//! owns everything else.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a [`Route`].
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Externally visible host name. Assigned by the router when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Backend the route forwards to.
    pub to: RouteTargetReference,
    /// Backend port to target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,
    /// Transport security settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// Reference to the object a route forwards to.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    /// Referenced kind, normally `Service`.
    pub kind: String,
    /// Referenced object name.
    pub name: String,
    /// Relative weight among backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

impl RouteTargetReference {
    /// References the service called `name`.
    #[must_use]
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            kind: "Service".to_string(),
            name: name.into(),
            weight: None,
        }
    }
}

/// Port selection for a route backend.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    /// Port name or number on the backend service.
    pub target_port: IntOrString,
}

/// TLS settings of a route.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Where TLS is terminated.
    pub termination: TlsTermination,
    /// What to do with plain-HTTP traffic on an edge route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<InsecureEdgeTerminationPolicy>,
}

/// TLS termination mode.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TlsTermination {
    /// Terminated at the router.
    Edge,
    /// Passed through to the backend untouched.
    Passthrough,
    /// Terminated at the router and re-encrypted to the backend.
    Reencrypt,
}

/// Handling of insecure traffic for edge-terminated routes.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum InsecureEdgeTerminationPolicy {
    /// Serve plain HTTP as well.
    Allow,
    /// Redirect plain HTTP to HTTPS.
    Redirect,
    /// Refuse plain HTTP.
    #[serde(rename = "None")]
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_redirect_serializes_with_openshift_names() {
        let tls = TlsConfig {
            termination: TlsTermination::Edge,
            insecure_edge_termination_policy: Some(InsecureEdgeTerminationPolicy::Redirect),
        };
        let value = serde_json::to_value(&tls).expect("serializable");
        assert_eq!(
            value,
            serde_json::json!({"termination": "edge", "insecureEdgeTerminationPolicy": "Redirect"})
        );
    }

    #[test]
    fn route_with_server_assigned_host_deserializes() {
        let json = serde_json::json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": { "name": "query-a", "namespace": "dowser" },
            "spec": {
                "host": "query-a-dowser.apps.example.com",
                "to": { "kind": "Service", "name": "query-a", "weight": 100 },
                "port": { "targetPort": "http" },
                "wildcardPolicy": "None"
            }
        });
        let route: Route = serde_json::from_value(json).expect("valid route");
        assert_eq!(route.spec.host.as_deref(), Some("query-a-dowser.apps.example.com"));
        assert_eq!(route.spec.to.weight, Some(100));
        assert_eq!(
            route.spec.port.map(|p| p.target_port),
            Some(IntOrString::String("http".to_string()))
        );
    }

    #[test]
    fn disabled_policy_uses_none_literal() {
        let value = serde_json::to_value(InsecureEdgeTerminationPolicy::Disabled).expect("serializable");
        assert_eq!(value, serde_json::json!("None"));
    }
}
