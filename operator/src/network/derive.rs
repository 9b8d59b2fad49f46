//! Cluster-driven derivation of the network config.
//!
//! Each stage takes an owned config snapshot and returns a new one; nothing
//! here mutates shared state, so the stages compose into a pipeline whose
//! output is a pure function of the watched resources.

use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::network::cluster::ClusterFacts;
use crate::network::validation::FieldError;
use crate::network::{Backend, IpFamily, NetworkConfig, PoolMode, IPv4, IPv6};

fn split_by_family(cidrs: &[String]) -> (Vec<String>, Vec<String>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for cidr in cidrs {
        match IpNetwork::from_str(cidr) {
            Ok(IpNetwork::V4(_)) => v4.push(cidr.clone()),
            Ok(IpNetwork::V6(_)) => v6.push(cidr.clone()),
            Err(_) => {}
        }
    }
    (v4, v6)
}

fn cidr_method(cidrs: &[String]) -> Option<String> {
    if cidrs.is_empty() {
        None
    } else {
        Some(format!("cidr={}", cidrs.join(",")))
    }
}

/// Synthesize `cidr=` autodetection from the cluster's node networks.
///
/// The declared node CIDR seeds the method; once per-node CIDRs are observed
/// in the shoot status they replace it with their union, split by family.
pub fn with_node_autodetection(
    config: Option<NetworkConfig>,
    facts: &ClusterFacts,
) -> Option<NetworkConfig> {
    let source: &[String] = if facts.observed_node_cidrs.is_empty() {
        match &facts.node_cidr {
            Some(cidr) if !cidr.is_empty() => std::slice::from_ref(cidr),
            _ => return config,
        }
    } else {
        &facts.observed_node_cidrs
    };

    let (v4, v6) = split_by_family(source);
    let v4_method = cidr_method(&v4).filter(|_| facts.has_family(IpFamily::IPv4));
    let v6_method = cidr_method(&v6).filter(|_| facts.has_family(IpFamily::IPv6));
    if v4_method.is_none() && v6_method.is_none() {
        return config;
    }

    let mut config = config.unwrap_or_default();
    if let Some(method) = v4_method {
        let ipv4 = config.ipv4.get_or_insert_with(IPv4::default);
        ipv4.auto_detection_method = Some(method);
    }
    if let Some(method) = v6_method {
        let ipv6 = config.ipv6.get_or_insert_with(IPv6::default);
        ipv6.auto_detection_method = Some(method);
    }
    Some(config)
}

/// Restrict the family list to the primary family until every node finished
/// the dual-stack migration.
pub fn gate_dual_stack(mut facts: ClusterFacts) -> ClusterFacts {
    if facts.ip_families.len() > 1 && !facts.dual_stack_migration_ready {
        facts.ip_families.truncate(1);
    }
    facts
}

/// Derive backend and pool modes from the declared overlay state.
pub fn with_overlay_settings(
    config: Option<NetworkConfig>,
    facts: &ClusterFacts,
) -> Option<NetworkConfig> {
    let mut config = config?;
    let Some(overlay) = config.overlay.clone() else {
        return Some(config);
    };

    let mode = if overlay.enabled {
        PoolMode::ALWAYS
    } else {
        PoolMode::NEVER
    };
    if facts.has_family(IpFamily::IPv4) {
        let ipv4 = config.ipv4.get_or_insert_with(IPv4::default);
        ipv4.mode = Some(PoolMode::from(mode));
    }
    if facts.has_family(IpFamily::IPv6) {
        let ipv6 = config.ipv6.get_or_insert_with(IPv6::default);
        ipv6.mode = Some(PoolMode::from(mode));
    }

    let backend = if overlay.enabled {
        if config.vxlan.as_ref().map(|v| v.enabled) == Some(true) {
            Backend::VXLAN
        } else {
            Backend::BIRD
        }
    } else if overlay.create_pod_routes == Some(true) {
        // routes to pods keep working without encapsulation on one L2 segment
        Backend::BIRD
    } else {
        Backend::NONE
    };
    config.backend = Some(Backend::from(backend));

    Some(config)
}

/// Disabling kube-proxy is only allowed when felix takes over service routing.
pub fn check_kube_proxy_dataplane(
    config: Option<&NetworkConfig>,
    facts: &ClusterFacts,
) -> Result<(), FieldError> {
    let ebpf_enabled = config
        .and_then(|c| c.ebpf_dataplane.as_ref())
        .map(|e| e.enabled)
        == Some(true);
    if !facts.kube_proxy_enabled && !ebpf_enabled {
        return Err(FieldError::new(
            "spec.kubernetes.kubeProxy.enabled",
            "disabling kube-proxy is forbidden in conjunction with calico without running in ebpf dataplane",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::cluster::test_support::{dual_stack_facts, ipv4_facts, ipv6_facts};
    use crate::network::{EbpfDataplane, Overlay};

    #[test]
    fn synthesizes_node_cidr_autodetection() {
        let mut facts = ipv4_facts();
        facts.node_cidr = Some("10.250.0.0/16".to_owned());
        let config = with_node_autodetection(None, &facts).unwrap();
        assert_eq!(
            config.ipv4.unwrap().auto_detection_method.as_deref(),
            Some("cidr=10.250.0.0/16")
        );
        assert!(config.ipv6.is_none());
    }

    #[test]
    fn observed_cidrs_replace_declared_node_cidr() {
        let mut facts = dual_stack_facts();
        facts.node_cidr = Some("10.250.0.0/16".to_owned());
        facts.observed_node_cidrs = vec![
            "10.250.0.0/24".to_owned(),
            "10.250.1.0/24".to_owned(),
            "2001:db8:2::/64".to_owned(),
        ];
        let config = with_node_autodetection(None, &facts).unwrap();
        assert_eq!(
            config.ipv4.unwrap().auto_detection_method.as_deref(),
            Some("cidr=10.250.0.0/24,10.250.1.0/24")
        );
        assert_eq!(
            config.ipv6.unwrap().auto_detection_method.as_deref(),
            Some("cidr=2001:db8:2::/64")
        );
    }

    #[test]
    fn skips_families_the_cluster_does_not_use() {
        let mut facts = ipv6_facts();
        facts.node_cidr = Some("10.250.0.0/16".to_owned());
        // the v4 node CIDR must not create an ipv4 section on a v6-only shoot
        assert!(with_node_autodetection(None, &facts).is_none());
    }

    #[test]
    fn leaves_config_alone_without_node_cidrs() {
        assert!(with_node_autodetection(None, &ipv4_facts()).is_none());
        let config = NetworkConfig::default();
        assert_eq!(
            with_node_autodetection(Some(config.clone()), &ipv4_facts()),
            Some(config)
        );
    }

    #[test]
    fn truncates_families_until_migration_is_ready() {
        let mut facts = dual_stack_facts();
        facts.dual_stack_migration_ready = false;
        let facts = gate_dual_stack(facts);
        assert_eq!(facts.ip_families, vec![IpFamily::IPv4]);

        let ready = gate_dual_stack(dual_stack_facts());
        assert_eq!(ready.ip_families, vec![IpFamily::IPv4, IpFamily::IPv6]);
    }

    #[test]
    fn overlay_enabled_forces_always_and_bird() {
        let config = NetworkConfig {
            overlay: Some(Overlay {
                enabled: true,
                create_pod_routes: None,
            }),
            ..Default::default()
        };
        let derived = with_overlay_settings(Some(config), &ipv4_facts()).unwrap();
        assert_eq!(derived.backend.unwrap().as_str(), "bird");
        assert_eq!(derived.ipv4.unwrap().mode.unwrap().as_str(), "Always");
    }

    #[test]
    fn overlay_enabled_with_vxlan_forces_vxlan_backend() {
        let config = NetworkConfig {
            overlay: Some(Overlay {
                enabled: true,
                create_pod_routes: None,
            }),
            vxlan: Some(crate::network::Vxlan { enabled: true }),
            ..Default::default()
        };
        let derived = with_overlay_settings(Some(config), &ipv4_facts()).unwrap();
        assert_eq!(derived.backend.unwrap().as_str(), "vxlan");
    }

    #[test]
    fn overlay_disabled_backend_depends_on_pod_routes() {
        for (create_pod_routes, backend) in
            [(Some(true), "bird"), (Some(false), "none"), (None, "none")]
        {
            let config = NetworkConfig {
                overlay: Some(Overlay {
                    enabled: false,
                    create_pod_routes,
                }),
                ..Default::default()
            };
            let derived = with_overlay_settings(Some(config), &ipv4_facts()).unwrap();
            assert_eq!(
                derived.backend.as_ref().unwrap().as_str(),
                backend,
                "createPodRoutes {create_pod_routes:?}"
            );
            assert_eq!(derived.ipv4.unwrap().mode.unwrap().as_str(), "Never");
        }
    }

    #[test]
    fn overlay_applies_to_both_families() {
        let config = NetworkConfig {
            overlay: Some(Overlay {
                enabled: false,
                create_pod_routes: None,
            }),
            ..Default::default()
        };
        let derived = with_overlay_settings(Some(config), &dual_stack_facts()).unwrap();
        assert_eq!(derived.ipv4.unwrap().mode.unwrap().as_str(), "Never");
        assert_eq!(derived.ipv6.unwrap().mode.unwrap().as_str(), "Never");
    }

    #[test]
    fn no_overlay_block_leaves_modes_untouched() {
        let derived = with_overlay_settings(Some(NetworkConfig::default()), &ipv6_facts()).unwrap();
        assert!(derived.ipv6.is_none());
        assert!(derived.backend.is_none());
    }

    #[test]
    fn kube_proxy_off_requires_ebpf() {
        let mut facts = ipv4_facts();
        facts.kube_proxy_enabled = false;

        let err = check_kube_proxy_dataplane(None, &facts).unwrap_err();
        assert_eq!(err.path, "spec.kubernetes.kubeProxy.enabled");

        let config = NetworkConfig {
            ebpf_dataplane: Some(EbpfDataplane { enabled: true }),
            ..Default::default()
        };
        assert!(check_kube_proxy_dataplane(Some(&config), &facts).is_ok());
        assert!(check_kube_proxy_dataplane(None, &ipv4_facts()).is_ok());
    }
}
