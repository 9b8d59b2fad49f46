//! Overlay switch-over safety gate.
//!
//! Turning the overlay off removes the encapsulation path before native
//! routes necessarily exist, which can blackhole all pod traffic. The gate
//! therefore only lets an enabled→disabled transition through once every
//! node reports that its pod routes have been created.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::{client::Client, Api};
use serde::Deserialize;
use tracing::debug;

use crate::network::NetworkConfig;

/// Env var carrying the IPIP pool mode in the calico-node daemonset.
const ENV_IPV4POOL_IPIP: &str = "CALICO_IPV4POOL_IPIP";
/// Env var carrying the VXLAN pool mode in the calico-node daemonset.
const ENV_IPV4POOL_VXLAN: &str = "CALICO_IPV4POOL_VXLAN";

/// The desired overlay state of a config. Without an overlay block the
/// default pool modes encapsulate, so absence means enabled.
pub fn desired_overlay_enabled(config: Option<&NetworkConfig>) -> bool {
    config
        .and_then(|c| c.overlay.as_ref())
        .map(|o| o.enabled)
        .unwrap_or(true)
}

/// Whether moving to the desired state disables a currently running overlay.
///
/// `current` is the best-effort probe result; `None` means the running state
/// could not be determined. The fail-safe reading of an unknown state
/// depends on the direction: when the overlay stays enabled nothing needs
/// gating, when it is being disabled an unknown state is treated as a switch
/// in progress so that routes are verified before encapsulation goes away.
pub fn switch_in_progress(desired_enabled: bool, current: Option<bool>) -> bool {
    if desired_enabled {
        return false;
    }
    current.unwrap_or(true)
}

/// Force the overlay back on for this pass.
pub fn force_overlay_enabled(mut config: NetworkConfig) -> NetworkConfig {
    if let Some(overlay) = config.overlay.as_mut() {
        overlay.enabled = true;
    }
    config
}

/// Extract the running overlay state out of a rendered manifest.
///
/// Scans the multi-document YAML for the calico-node DaemonSet and reads the
/// pool mode env vars of its calico-node container. Returns `None` when the
/// manifest holds no readable answer; the caller decides what that means.
pub fn overlay_enabled_in_manifest(manifest: &str) -> Option<bool> {
    // Only sniff the fields needed for the decision, everything else in the
    // rendered chart is free to change shape.
    #[derive(Deserialize)]
    struct Doc {
        kind: Option<String>,
        metadata: Option<Meta>,
        spec: Option<DocSpec>,
    }
    #[derive(Deserialize)]
    struct Meta {
        name: Option<String>,
    }
    #[derive(Deserialize)]
    struct DocSpec {
        template: Option<Template>,
    }
    #[derive(Deserialize)]
    struct Template {
        spec: Option<PodSpec>,
    }
    #[derive(Deserialize)]
    struct PodSpec {
        containers: Option<Vec<Container>>,
    }
    #[derive(Deserialize)]
    struct Container {
        name: Option<String>,
        env: Option<Vec<EnvVar>>,
    }
    #[derive(Deserialize)]
    struct EnvVar {
        name: String,
        value: Option<String>,
    }

    for document in serde_yaml::Deserializer::from_str(manifest) {
        let Ok(doc) = Doc::deserialize(document) else {
            continue;
        };
        if doc.kind.as_deref() != Some("DaemonSet")
            || doc.metadata.and_then(|m| m.name).as_deref() != Some("calico-node")
        {
            continue;
        }
        let containers = doc
            .spec
            .and_then(|s| s.template)
            .and_then(|t| t.spec)
            .and_then(|p| p.containers)
            .unwrap_or_default();
        let env = containers
            .into_iter()
            .find(|c| c.name.as_deref() == Some("calico-node"))
            .and_then(|c| c.env)
            .unwrap_or_default();

        let mode = |name: &str| {
            env.iter()
                .find(|e| e.name == name)
                .and_then(|e| e.value.clone())
        };
        let ipip = mode(ENV_IPV4POOL_IPIP);
        let vxlan = mode(ENV_IPV4POOL_VXLAN);
        if ipip.is_none() && vxlan.is_none() {
            return None;
        }
        let encapsulates = |value: Option<String>| value.is_some_and(|v| v != "Never");
        return Some(encapsulates(ipip) || encapsulates(vxlan));
    }
    None
}

/// Whether a node finished creating its pod routes.
pub fn node_routes_created(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == "NetworkUnavailable"
                    && c.status == "False"
                    && c.reason.as_deref() == Some("RouteCreated")
            })
        })
        .unwrap_or(false)
}

/// Source of node route-readiness, injected so the gate stays testable.
#[async_trait]
pub trait NodeRoutes {
    /// Whether every node of the target cluster reports created routes.
    async fn all_routes_created(&self) -> anyhow::Result<bool>;
}

/// Node listing against the target cluster.
#[derive(Clone)]
pub struct ClusterNodeRoutes {
    client: Client,
}

impl ClusterNodeRoutes {
    /// Check routes through the given target-cluster client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeRoutes for ClusterNodeRoutes {
    async fn all_routes_created(&self) -> anyhow::Result<bool> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&Default::default()).await?;
        Ok(list.items.iter().all(node_routes_created))
    }
}

/// Read the currently applied overlay state out of the published managed
/// resource secret. Any failure along the way reads as "unknown".
pub async fn probe_current_overlay(
    client: &Client,
    namespace: &str,
    secret_name: &str,
    config_key: &str,
) -> Option<bool> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match secrets.get_opt(secret_name).await {
        Ok(secret) => secret?,
        Err(err) => {
            debug!(?err, secret_name, "could not read managed resource secret");
            return None;
        }
    };
    let data = secret.data.unwrap_or_default();
    let bytes = data.get(config_key)?;
    let manifest = std::str::from_utf8(&bytes.0).ok()?;
    overlay_enabled_in_manifest(manifest)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};

    use super::*;
    use crate::network::Overlay;

    fn config_with_overlay(enabled: bool) -> NetworkConfig {
        NetworkConfig {
            overlay: Some(Overlay {
                enabled,
                create_pod_routes: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn desired_state_defaults_to_enabled() {
        assert!(desired_overlay_enabled(None));
        assert!(desired_overlay_enabled(Some(&NetworkConfig::default())));
        assert!(desired_overlay_enabled(Some(&config_with_overlay(true))));
        assert!(!desired_overlay_enabled(Some(&config_with_overlay(false))));
    }

    #[test]
    fn switch_detection_is_fail_safe() {
        // keeping the overlay on never gates
        assert!(!switch_in_progress(true, Some(true)));
        assert!(!switch_in_progress(true, None));
        // disabling gates when the overlay runs or its state is unknown
        assert!(switch_in_progress(false, Some(true)));
        assert!(switch_in_progress(false, None));
        assert!(!switch_in_progress(false, Some(false)));
    }

    #[test]
    fn forcing_overlay_back_on() {
        let forced = force_overlay_enabled(config_with_overlay(false));
        assert!(forced.overlay.unwrap().enabled);
    }

    const MANIFEST_OVERLAY_ON: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: calico-config
---
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: calico-node
  namespace: kube-system
spec:
  template:
    spec:
      containers:
        - name: install-cni
          env:
            - name: CNI_NETWORK_CONFIG
              value: "{}"
        - name: calico-node
          env:
            - name: CALICO_IPV4POOL_IPIP
              value: "Always"
            - name: CALICO_IPV4POOL_VXLAN
              value: "Never"
"#;

    #[test]
    fn reads_overlay_state_from_daemonset_env() {
        assert_eq!(overlay_enabled_in_manifest(MANIFEST_OVERLAY_ON), Some(true));

        let off = MANIFEST_OVERLAY_ON.replace("\"Always\"", "\"Never\"");
        assert_eq!(overlay_enabled_in_manifest(&off), Some(false));

        let vxlan = MANIFEST_OVERLAY_ON
            .replace(
                "- name: CALICO_IPV4POOL_IPIP\n              value: \"Always\"",
                "- name: CALICO_IPV4POOL_IPIP\n              value: \"Never\"",
            )
            .replace(
                "- name: CALICO_IPV4POOL_VXLAN\n              value: \"Never\"",
                "- name: CALICO_IPV4POOL_VXLAN\n              value: \"Always\"",
            );
        assert_eq!(overlay_enabled_in_manifest(&vxlan), Some(true));
    }

    #[test]
    fn unreadable_manifests_are_unknown() {
        assert_eq!(overlay_enabled_in_manifest(""), None);
        assert_eq!(overlay_enabled_in_manifest("kind: ConfigMap\n"), None);
        // daemonset present but env vars missing
        let stripped = "
kind: DaemonSet
metadata:
  name: calico-node
spec:
  template:
    spec:
      containers:
        - name: calico-node
";
        assert_eq!(overlay_enabled_in_manifest(stripped), None);
    }

    fn node(conditions: Vec<NodeCondition>) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(conditions),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn node_route_condition_must_match_exactly() {
        let ready = node(vec![NodeCondition {
            type_: "NetworkUnavailable".to_owned(),
            status: "False".to_owned(),
            reason: Some("RouteCreated".to_owned()),
            ..Default::default()
        }]);
        assert!(node_routes_created(&ready));

        let unavailable = node(vec![NodeCondition {
            type_: "NetworkUnavailable".to_owned(),
            status: "True".to_owned(),
            reason: Some("NoRouteCreated".to_owned()),
            ..Default::default()
        }]);
        assert!(!node_routes_created(&unavailable));

        let missing = node(vec![]);
        assert!(!node_routes_created(&missing));
        assert!(!node_routes_created(&Node::default()));
    }
}
