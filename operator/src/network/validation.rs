//! Validation of the user supplied [`NetworkConfig`] grammar.
//!
//! All rules are independent and their errors accumulate; callers decide
//! whether to surface them at admission time or at reconcile time.
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

use crate::network::{
    AutoScaling, AutoscalingMode, Backend, Ipam, NetworkConfig, Pool, PoolMode, IPv4, IPv6,
};

/// A single validation failure, scoped to a dot-separated field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dot-separated path of the offending field, e.g. `config.ipv4.mode`.
    pub path: String,
    /// Human readable description of the violation.
    pub detail: String,
}

impl FieldError {
    /// Create an error for the given field path.
    pub fn new(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.detail)
    }
}

/// Join all errors of a list into a single human readable message.
pub fn aggregate(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn child(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}.{name}")
    }
}

const SUBNET_SENTINELS: [&str; 2] = ["usePodCidr", "usePodCIDR"];
const ALLOWED_BACKENDS: [&str; 3] = [Backend::BIRD, Backend::NONE, Backend::VXLAN];
const ALLOWED_IPAM_TYPES: [&str; 2] = ["calico-ipam", "host-local"];
const ALLOWED_POOLS: [&str; 2] = [Pool::IPIP, Pool::VXLAN];
const ALLOWED_MODES: [&str; 4] = [
    PoolMode::ALWAYS,
    PoolMode::NEVER,
    PoolMode::CROSS_SUBNET,
    PoolMode::OFF,
];
const VXLAN_POOL_MODES: [&str; 2] = [PoolMode::ALWAYS, PoolMode::NEVER];
const ALLOWED_AUTOSCALING_MODES: [&str; 3] = [
    AutoscalingMode::CLUSTER_PROPORTIONAL,
    AutoscalingMode::VPA,
    AutoscalingMode::STATIC,
];
const AUTODETECTION_OPTIONS: [&str; 6] = [
    "first-found",
    "kubernetes-internal-ip",
    "can-reach",
    "interface",
    "skip-interface",
    "cidr",
];

/// Validate the network config against the allowed value grammar.
///
/// Returns every violation found; an empty list means the config is valid.
pub fn validate_network_config(config: &NetworkConfig, fld_path: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Some(backend) = &config.backend {
        if !ALLOWED_BACKENDS.contains(&backend.as_str()) {
            errors.push(FieldError::new(
                child(fld_path, "backend"),
                format!(
                    "unsupported value {:?} for backend, supported values are {ALLOWED_BACKENDS:?}",
                    backend.as_str()
                ),
            ));
        }
    }

    if let Some(ipam) = &config.ipam {
        errors.extend(validate_ipam(ipam, &child(fld_path, "ipam")));
    }
    if let Some(ipv4) = &config.ipv4 {
        errors.extend(validate_ipv4(ipv4, &child(fld_path, "ipv4")));
    }
    if let Some(ipv6) = &config.ipv6 {
        errors.extend(validate_ipv6(ipv6, &child(fld_path, "ipv6")));
    }

    if let Some(mtu) = &config.veth_mtu {
        if !is_valid_mtu(mtu) {
            errors.push(FieldError::new(
                child(fld_path, "vethMTU"),
                format!("invalid MTU {mtu:?}, must be a non-negative integer"),
            ));
        }
    }

    if let Some(auto_scaling) = &config.auto_scaling {
        errors.extend(validate_autoscaling(
            auto_scaling,
            &child(fld_path, "autoScaling"),
        ));
    }

    if let Some(ipip) = &config.ipip {
        if !ALLOWED_MODES.contains(&ipip.as_str()) {
            errors.push(FieldError::new(
                child(fld_path, "ipip"),
                format!(
                    "unsupported value {:?} for ipip, supported values are {ALLOWED_MODES:?}",
                    ipip.as_str()
                ),
            ));
        }
    }
    if let Some(method) = &config.ip_auto_detection_method {
        errors.extend(validate_autodetection_method(
            method,
            &child(fld_path, "ipAutoDetectionMethod"),
        ));
    }

    errors
}

fn validate_ipam(ipam: &Ipam, fld_path: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !ipam.ipam_type.is_empty() && !ALLOWED_IPAM_TYPES.contains(&ipam.ipam_type.as_str()) {
        errors.push(FieldError::new(
            child(fld_path, "type"),
            format!(
                "unsupported value {:?} for type, supported values are {ALLOWED_IPAM_TYPES:?}",
                ipam.ipam_type
            ),
        ));
    }

    if let Some(cidr) = &ipam.cidr {
        let value = cidr.as_str();
        if !value.is_empty() && !SUBNET_SENTINELS.contains(&value) && !is_valid_cidr(value) {
            errors.push(FieldError::new(
                child(fld_path, "cidr"),
                format!("invalid CIDR {value:?}"),
            ));
        }
    }

    errors
}

fn validate_pool_and_mode(
    pool: Option<&Pool>,
    mode: Option<&PoolMode>,
    fld_path: &str,
) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if let Some(pool) = pool {
        if !pool.as_str().is_empty() && !ALLOWED_POOLS.contains(&pool.as_str()) {
            errors.push(FieldError::new(
                child(fld_path, "pool"),
                format!(
                    "unsupported value {:?} for pool, supported values are {ALLOWED_POOLS:?}",
                    pool.as_str()
                ),
            ));
        }
    }

    if let Some(mode) = mode {
        if !ALLOWED_MODES.contains(&mode.as_str()) {
            errors.push(FieldError::new(
                child(fld_path, "mode"),
                format!(
                    "unsupported value {:?} for mode, supported values are {ALLOWED_MODES:?}",
                    mode.as_str()
                ),
            ));
        } else if pool.map(Pool::as_str) == Some(Pool::VXLAN)
            && !VXLAN_POOL_MODES.contains(&mode.as_str())
        {
            errors.push(FieldError::new(
                child(fld_path, "mode"),
                format!(
                    "mode {:?} is not supported with a vxlan pool, supported values are {VXLAN_POOL_MODES:?}",
                    mode.as_str()
                ),
            ));
        }
    }

    errors
}

fn validate_ipv4(ipv4: &IPv4, fld_path: &str) -> Vec<FieldError> {
    let mut errors = validate_pool_and_mode(ipv4.pool.as_ref(), ipv4.mode.as_ref(), fld_path);
    if let Some(method) = &ipv4.auto_detection_method {
        if !method.is_empty() {
            errors.extend(validate_autodetection_method(
                method,
                &child(fld_path, "autoDetectionMethod"),
            ));
        }
    }
    errors
}

fn validate_ipv6(ipv6: &IPv6, fld_path: &str) -> Vec<FieldError> {
    let mut errors = validate_pool_and_mode(ipv6.pool.as_ref(), ipv6.mode.as_ref(), fld_path);
    if let Some(method) = &ipv6.auto_detection_method {
        if !method.is_empty() {
            errors.extend(validate_autodetection_method(
                method,
                &child(fld_path, "autoDetectionMethod"),
            ));
        }
    }
    errors
}

/// Validate an interface autodetection method against the
/// `option` / `option=param` grammar.
pub fn validate_autodetection_method(method: &str, fld_path: &str) -> Vec<FieldError> {
    if method.is_empty() {
        return vec![FieldError::new(fld_path, "method must not be empty")];
    }

    let (option, param) = match method.split_once('=') {
        Some((option, param)) => (option, Some(param)),
        None => (method, None),
    };

    if !AUTODETECTION_OPTIONS.contains(&option) {
        return vec![FieldError::new(
            fld_path,
            format!(
                "invalid option {option:?}, supported options are {AUTODETECTION_OPTIONS:?}"
            ),
        )];
    }

    match option {
        "first-found" | "kubernetes-internal-ip" => {
            if param.is_some() {
                return vec![FieldError::new(
                    fld_path,
                    format!("option {option} does not accept a parameter"),
                )];
            }
        }
        _ => {
            let Some(param) = param.filter(|p| !p.is_empty()) else {
                return vec![FieldError::new(
                    fld_path,
                    format!("option {option} requires a parameter"),
                )];
            };
            match option {
                "can-reach" => {
                    if IpAddr::from_str(param).is_err() && !is_dns_name(param) {
                        return vec![FieldError::new(
                            fld_path,
                            format!("option can-reach requires an IP address or DNS name, got {param:?}"),
                        )];
                    }
                }
                "interface" | "skip-interface" => {
                    if let Err(err) = Regex::new(param) {
                        return vec![FieldError::new(
                            fld_path,
                            format!("invalid regex for option {option}: {err}"),
                        )];
                    }
                }
                "cidr" => {
                    if !is_valid_cidr(param) {
                        return vec![FieldError::new(
                            fld_path,
                            format!("option cidr requires a valid CIDR, got {param:?}"),
                        )];
                    }
                }
                _ => unreachable!("option is a member of AUTODETECTION_OPTIONS"),
            }
        }
    }

    Vec::new()
}

fn validate_autoscaling(auto_scaling: &AutoScaling, fld_path: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !ALLOWED_AUTOSCALING_MODES.contains(&auto_scaling.mode.as_str()) {
        errors.push(FieldError::new(
            child(fld_path, "mode"),
            format!(
                "unsupported value {:?} for mode, supported values are {ALLOWED_AUTOSCALING_MODES:?}",
                auto_scaling.mode.as_str()
            ),
        ));
    }

    if let Some(resources) = &auto_scaling.resources {
        let resources_path = child(fld_path, "resources");
        for (component, list) in [
            ("node", resources.node.as_ref()),
            ("typha", resources.typha.as_ref()),
        ] {
            let Some(list) = list else { continue };
            let component_path = child(&resources_path, component);
            for (name, quantity) in list {
                match name.as_str() {
                    "cpu" | "memory" => {
                        if !quantity_is_positive(quantity) {
                            errors.push(FieldError::new(
                                child(&component_path, name),
                                format!(
                                    "{:?} must be a positive quantity",
                                    quantity.0
                                ),
                            ));
                        }
                    }
                    _ => errors.push(FieldError::new(
                        child(&component_path, name),
                        format!("unsupported resource {name:?}, supported resources are [\"cpu\", \"memory\"]"),
                    )),
                }
            }
        }
    }

    errors
}

/// Check whether the given value parses as a CIDR block.
pub fn is_valid_cidr(value: &str) -> bool {
    value.contains('/') && IpNetwork::from_str(value).is_ok()
}

fn is_valid_mtu(mtu: &str) -> bool {
    mtu.parse::<u32>().is_ok()
}

// RFC 1123 subdomain check, enough for the can-reach parameter.
fn is_dns_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config_with_ipv4(ipv4: IPv4) -> NetworkConfig {
        NetworkConfig {
            ipv4: Some(ipv4),
            ..Default::default()
        }
    }

    #[test]
    fn empty_config_is_valid() {
        assert!(validate_network_config(&NetworkConfig::default(), "config").is_empty());
    }

    #[test]
    fn rejects_unknown_backend() {
        let config = NetworkConfig {
            backend: Some(Backend::from("geneve")),
            ..Default::default()
        };
        let errors = validate_network_config(&config, "config");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "config.backend");
        assert!(errors[0].detail.contains("geneve"));
    }

    #[test]
    fn vxlan_pool_restricts_mode() {
        for (mode, valid) in [
            (PoolMode::ALWAYS, true),
            (PoolMode::NEVER, true),
            (PoolMode::CROSS_SUBNET, false),
            (PoolMode::OFF, false),
        ] {
            let config = config_with_ipv4(IPv4 {
                pool: Some(Pool::from(Pool::VXLAN)),
                mode: Some(PoolMode::from(mode)),
                auto_detection_method: None,
            });
            let errors = validate_network_config(&config, "config");
            assert_eq!(errors.is_empty(), valid, "mode {mode}");
            if !valid {
                assert_eq!(errors[0].path, "config.ipv4.mode");
            }
        }
    }

    #[test]
    fn ipip_pool_accepts_all_modes() {
        for mode in ALLOWED_MODES {
            let config = config_with_ipv4(IPv4 {
                pool: Some(Pool::from(Pool::IPIP)),
                mode: Some(PoolMode::from(mode)),
                auto_detection_method: None,
            });
            assert!(validate_network_config(&config, "config").is_empty());
        }
    }

    #[test]
    fn rejects_invalid_interface_regex() {
        let config = NetworkConfig {
            ip_auto_detection_method: Some("interface=invalid[regex".to_owned()),
            ..Default::default()
        };
        let errors = validate_network_config(&config, "config");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "config.ipAutoDetectionMethod");
        assert!(errors[0].detail.contains("invalid regex"));
    }

    #[test]
    fn autodetection_grammar() {
        for (method, valid) in [
            ("first-found", true),
            ("kubernetes-internal-ip", true),
            ("kubernetes-internal-ip=eth0", false),
            ("can-reach=8.8.8.8", true),
            ("can-reach=www.example.com", true),
            ("can-reach=-bad-.example", false),
            ("can-reach", false),
            ("interface=eth.*", true),
            ("skip-interface=docker0", true),
            ("cidr=10.250.0.0/16", true),
            ("cidr=10.250.0.0", false),
            ("cidr", false),
            ("", false),
            ("magnetometer", false),
        ] {
            let errors = validate_autodetection_method(method, "m");
            assert_eq!(errors.is_empty(), valid, "method {method:?}: {errors:?}");
        }
    }

    #[test]
    fn rejects_bad_mtu() {
        for (mtu, valid) in [("1440", true), ("0", true), ("-10", false), ("peach", false)] {
            let config = NetworkConfig {
                veth_mtu: Some(mtu.to_owned()),
                ..Default::default()
            };
            let errors = validate_network_config(&config, "config");
            assert_eq!(errors.is_empty(), valid, "mtu {mtu:?}");
        }
    }

    #[test]
    fn rejects_bad_ipam() {
        let config = NetworkConfig {
            ipam: Some(Ipam {
                ipam_type: "dhcp".to_owned(),
                cidr: Some(crate::network::Cidr("not-a-cidr".to_owned())),
            }),
            ..Default::default()
        };
        let errors = validate_network_config(&config, "config");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].path, "config.ipam.type");
        assert_eq!(errors[1].path, "config.ipam.cidr");
    }

    #[test]
    fn accepts_ipam_subnet_sentinel() {
        for sentinel in SUBNET_SENTINELS {
            let config = NetworkConfig {
                ipam: Some(Ipam {
                    ipam_type: "host-local".to_owned(),
                    cidr: Some(crate::network::Cidr(sentinel.to_owned())),
                }),
                ..Default::default()
            };
            assert!(validate_network_config(&config, "config").is_empty());
        }
    }

    #[test]
    fn autoscaling_resources_must_be_positive() {
        let config = NetworkConfig {
            auto_scaling: Some(AutoScaling {
                mode: AutoscalingMode::from(AutoscalingMode::STATIC),
                resources: Some(crate::network::StaticResources {
                    node: Some(BTreeMap::from_iter([
                        ("cpu".to_owned(), Quantity("-250m".to_owned())),
                        ("memory".to_owned(), Quantity("0".to_owned())),
                        ("ephemeral-storage".to_owned(), Quantity("1Gi".to_owned())),
                    ])),
                    typha: None,
                }),
            }),
            ..Default::default()
        };
        let errors = validate_network_config(&config, "config");
        // One consolidated error per offending quantity plus the unknown key.
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].path, "config.autoScaling.resources.node.cpu");
        assert!(errors[0].detail.contains("positive"));
        assert_eq!(errors[1].path, "config.autoScaling.resources.node.ephemeral-storage");
        assert!(errors[1].detail.contains("unsupported resource"));
        assert_eq!(errors[2].path, "config.autoScaling.resources.node.memory");
    }

    #[test]
    fn autoscaling_mode_must_be_known() {
        let config = NetworkConfig {
            auto_scaling: Some(AutoScaling {
                mode: AutoscalingMode::from("horizontal"),
                resources: None,
            }),
            ..Default::default()
        };
        let errors = validate_network_config(&config, "config");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "config.autoScaling.mode");
    }

    #[test]
    fn errors_accumulate() {
        let config = NetworkConfig {
            backend: Some(Backend::from("geneve")),
            veth_mtu: Some("x".to_owned()),
            ipip: Some(PoolMode::from("Sometimes")),
            ..Default::default()
        };
        let errors = validate_network_config(&config, "config");
        assert_eq!(errors.len(), 3);
        let message = aggregate(&errors);
        assert!(message.contains("config.backend"));
        assert!(message.contains("config.vethMTU"));
        assert!(message.contains("config.ipip"));
    }
}
