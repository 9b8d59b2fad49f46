//! Shoot validation predicate.
//!
//! Runs the same grammar the reconciler enforces, before the shoot spec is
//! persisted, so that invalid configs never reach a cluster.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::network::validation::{validate_network_config, FieldError};
use crate::network::{KubeProxyConfig, NetworkConfig};

/// Networking type this provider is responsible for.
pub const NETWORKING_TYPE: &str = "calico";
/// Label selecting the shoots this webhook inspects.
pub const RELEVANT_LABEL: &str = "networking.extensions.gardener.cloud/calico";

/// The parts of a shoot spec the validator looks at.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShootDocument {
    /// The shoot spec.
    #[serde(default)]
    pub spec: ShootDocumentSpec,
}

/// Relevant spec sections of a shoot document.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShootDocumentSpec {
    /// Networking section.
    pub networking: Option<ShootDocumentNetworking>,
    /// Kubernetes section.
    pub kubernetes: Option<ShootDocumentKubernetes>,
}

/// Networking section of a shoot document.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShootDocumentNetworking {
    /// Networking provider type.
    #[serde(rename = "type")]
    pub networking_type: Option<String>,
    /// Provider specific configuration.
    pub provider_config: Option<serde_json::Value>,
}

/// Kubernetes section of a shoot document.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShootDocumentKubernetes {
    /// kube-proxy settings.
    pub kube_proxy: Option<KubeProxyConfig>,
}

/// Whether this webhook is responsible for the labeled object.
pub fn is_relevant(labels: Option<&BTreeMap<String, String>>) -> bool {
    labels
        .and_then(|labels| labels.get(RELEVANT_LABEL))
        .map(String::as_str)
        == Some("true")
}

/// Validate a shoot document. An empty list allows the write.
pub fn validate_shoot(shoot: &ShootDocument) -> Vec<FieldError> {
    let networking = shoot.spec.networking.as_ref();

    if let Some(networking_type) = networking.and_then(|n| n.networking_type.as_deref()) {
        if networking_type != NETWORKING_TYPE {
            return Vec::new();
        }
    }

    let config: Option<NetworkConfig> =
        match networking.and_then(|n| n.provider_config.as_ref()) {
            Some(raw) => match serde_json::from_value(raw.clone()) {
                Ok(config) => Some(config),
                Err(err) => {
                    return vec![FieldError::new(
                        "spec.networking.providerConfig",
                        format!("could not decode network config: {err}"),
                    )]
                }
            },
            None => None,
        };

    let mut errors = Vec::new();
    if let Some(config) = &config {
        errors.extend(validate_network_config(
            config,
            "spec.networking.providerConfig",
        ));
    }

    let kube_proxy_enabled = shoot
        .spec
        .kubernetes
        .as_ref()
        .and_then(|k| k.kube_proxy.as_ref())
        .and_then(|p| p.enabled)
        .unwrap_or(true);
    let ebpf_enabled = config
        .as_ref()
        .and_then(|c| c.ebpf_dataplane.as_ref())
        .map(|e| e.enabled)
        == Some(true);
    if !kube_proxy_enabled && !ebpf_enabled {
        errors.push(FieldError::new(
            "spec.kubernetes.kubeProxy.enabled",
            "disabling kube-proxy is forbidden in conjunction with calico without running in ebpf dataplane",
        ));
    }

    errors
}
