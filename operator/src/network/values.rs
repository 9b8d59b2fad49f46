//! Chart value compilation.
//!
//! Translates a decoded [`NetworkConfig`] plus [`ClusterFacts`] into the
//! fully resolved value tree consumed by the chart renderer. Pure and
//! deterministic: the same config and facts always compile to the same tree,
//! which is what makes retried reconciliations safe.

use std::collections::BTreeMap;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

use crate::network::cluster::ClusterFacts;
use crate::network::images::{
    ImageVector, BIRD_EXPORTER_IMAGE, CNI_IMAGE, CNI_PLUGINS_IMAGE, CPA_IMAGE, CPVA_IMAGE,
    KUBE_CONTROLLERS_IMAGE, MULTUS_IMAGE, NODE_IMAGE, TYPHA_IMAGE,
};
use crate::network::{AutoscalingMode, Backend, IpFamily, NetworkConfig, Pool, PoolMode};

/// Key of the rendered manifest inside the managed resource secret.
pub const CALICO_CONFIG_KEY: &str = "config.yaml";
/// Release name used when rendering the chart.
pub const RELEASE_NAME: &str = "calico";

const HOST_LOCAL: &str = "host-local";
const CALICO_IPAM: &str = "calico-ipam";
const USE_POD_CIDR: &str = "usePodCidr";
const USE_POD_CIDR_IPV6: &str = "usePodCidrIPv6";
// 0 lets calico pick the MTU from the host interface.
const DEFAULT_VETH_MTU: &str = "0";
const FELIX_METRICS_PORT: &str = "9091";
const TYPHA_METRICS_PORT: &str = "9093";

/// Errors produced while compiling chart values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValuesError {
    /// A config override is outside its closed value set.
    #[error("unsupported value for {field}: {value}")]
    Unsupported {
        /// The offending field.
        field: String,
        /// The rejected value.
        value: String,
    },
    /// A family section is set although the cluster does not use the family.
    #[error("{family} configuration must not be specified if Shoot doesn't use {family} networking")]
    FamilyNotConfigured {
        /// The family whose section was rejected.
        family: IpFamily,
    },
    /// The image vector has no entry for a required component.
    #[error("no image found for {name} (kubernetes {version})")]
    MissingImage {
        /// The component name.
        name: String,
        /// The cluster's Kubernetes version.
        version: String,
    },
}

fn unsupported(field: &str, value: impl ToString) -> ValuesError {
    ValuesError::Unsupported {
        field: field.to_owned(),
        value: value.to_string(),
    }
}

/// An enabled/disabled switch in the value tree.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Toggle {
    /// Whether the component or behavior is on.
    pub enabled: bool,
}

impl Toggle {
    fn off() -> Self {
        Self { enabled: false }
    }
    fn on() -> Self {
        Self { enabled: true }
    }
}

/// Felix agent flags.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FelixValues {
    /// IP-in-IP device programming.
    pub ipinip: Toggle,
    /// eBPF dataplane.
    pub bpf: Toggle,
    /// Cleanup of kube-proxy iptables rules when felix replaces kube-proxy.
    #[serde(rename = "bpfKubeProxyIPTablesCleanup")]
    pub bpf_kube_proxy_iptables_cleanup: Toggle,
}

/// Compiled IPv4 section.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Values {
    /// Whether the cluster uses IPv4 pod networking.
    pub enabled: bool,
    /// Pool type of the tunnel interface.
    pub pool: String,
    /// Encapsulation mode of the pool.
    pub mode: String,
    /// Host address autodetection method.
    #[serde(rename = "autoDetectionMethod")]
    pub auto_detection_method: Option<String>,
    /// Node-to-node wireguard encryption.
    pub wireguard: bool,
}

/// Compiled IPv6 section.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Values {
    /// Whether the cluster uses IPv6 pod networking.
    pub enabled: bool,
    /// Pool type of the tunnel interface.
    pub pool: String,
    /// Encapsulation mode of the pool.
    pub mode: String,
    /// Host address autodetection method.
    #[serde(rename = "autoDetectionMethod")]
    pub auto_detection_method: Option<String>,
    /// NAT for outgoing IPv6 pod traffic.
    #[serde(rename = "natOutgoing")]
    pub nat_outgoing: bool,
    /// Node-to-node wireguard encryption.
    pub wireguard: bool,
}

/// Compiled IPAM section.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IpamValues {
    /// IPAM plugin type.
    #[serde(rename = "type")]
    pub ipam_type: String,
    /// Pod subnet source for single-family clusters.
    pub subnet: String,
    /// Pod subnet sources for dual-stack clusters, IPv6 first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<String>>,
    /// Assign IPv4 addresses to pods.
    pub assign_ipv4: bool,
    /// Assign IPv6 addresses to pods.
    pub assign_ipv6: bool,
}

/// Monitoring ports exposed by the node and typha pods.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MonitoringValues {
    /// Whether metrics are scraped at all.
    pub enabled: bool,
    /// Port exposing typha metrics.
    #[serde(rename = "typhaMetricsPort")]
    pub typha_metrics_port: String,
    /// Port exposing felix metrics.
    #[serde(rename = "felixMetricsPort")]
    pub felix_metrics_port: String,
}

/// Compiled Multus section.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MultusValues {
    /// Deploy Multus in front of Calico.
    pub enabled: bool,
    /// Additionally install the reference CNI plugins.
    #[serde(rename = "installCNIPlugins")]
    pub install_cni_plugins: bool,
}

/// The `config` subtree of the chart values.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CalicoConfig {
    /// Data-plane control mechanism.
    pub backend: String,
    /// Felix agent flags.
    pub felix: FelixValues,
    /// IPv4 section.
    pub ipv4: Ipv4Values,
    /// IPv6 section.
    pub ipv6: Ipv6Values,
    /// IPAM section.
    pub ipam: IpamValues,
    /// Typha fan-out proxy.
    pub typha: Toggle,
    /// kube-controllers deployment.
    #[serde(rename = "kubeControllers")]
    pub kube_controllers: Toggle,
    /// MTU of the veth devices, "0" selects it from the host interface.
    #[serde(rename = "veth_mtu")]
    pub veth_mtu: String,
    /// Metrics ports.
    pub monitoring: MonitoringValues,
    /// Run calico-node without privileges.
    #[serde(rename = "nonPrivileged")]
    pub non_privileged: bool,
    /// Bird metrics exporter sidecar.
    #[serde(rename = "birdExporter")]
    pub bird_exporter: Toggle,
    /// Multus meta plugin.
    pub multus: MultusValues,
}

/// The `global` subtree of the chart values.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GlobalValues {
    /// Primary pod CIDR.
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,
    /// Node CIDR, when declared.
    #[serde(rename = "nodeCIDR", skip_serializing_if = "Option::is_none")]
    pub node_cidr: Option<String>,
    /// First IPv6 pod CIDR, when present.
    #[serde(rename = "podCIDRv6", skip_serializing_if = "Option::is_none")]
    pub pod_cidr_v6: Option<String>,
    /// Desired overlay state, when the config declares one.
    #[serde(rename = "overlayEnabled", skip_serializing_if = "Option::is_none")]
    pub overlay_enabled: Option<bool>,
    /// Desired vxlan overlay state, when the config declares one.
    #[serde(rename = "vxlanEnabled", skip_serializing_if = "Option::is_none")]
    pub vxlan_enabled: Option<bool>,
    /// Masquerade packets to the upstream DNS server.
    #[serde(
        rename = "snatToUpstreamDNSEnabled",
        skip_serializing_if = "Option::is_none"
    )]
    pub snat_to_upstream_dns_enabled: Option<bool>,
}

/// Vertical pod autoscaler targets.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VpaValues {
    /// Whether the shoot wants a VPA at all.
    pub enabled: bool,
    /// Manage calico-node through the VPA.
    pub node: bool,
    /// Manage calico-typha through the VPA.
    pub typha: bool,
}

/// Static resource requests per component.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ResourceValues {
    /// Requests of the calico-node daemonset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<BTreeMap<String, Quantity>>,
    /// Requests of the calico-typha deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typha: Option<BTreeMap<String, Quantity>>,
}

/// The `autoscaling` subtree of the chart values.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AutoscalingValues {
    /// Selected autoscaling mode.
    pub mode: String,
    /// Whether resource requests are statically allocated.
    #[serde(rename = "staticRequests")]
    pub static_requests: bool,
    /// Resource floors or static requests.
    pub resources: ResourceValues,
}

/// The complete value tree handed to the chart renderer.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChartValues {
    /// Calico configuration subtree.
    pub config: CalicoConfig,
    /// Component image references.
    pub images: BTreeMap<String, String>,
    /// Cluster-global values.
    pub global: GlobalValues,
    /// VPA targets.
    pub vpa: VpaValues,
    /// Autoscaling selection.
    pub autoscaling: AutoscalingValues,
}

impl ChartValues {
    /// Serialize the tree for the renderer.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("chart values serialize to json")
    }
}

fn default_config() -> CalicoConfig {
    CalicoConfig {
        backend: Backend::BIRD.to_owned(),
        felix: FelixValues {
            ipinip: Toggle::on(),
            bpf: Toggle::off(),
            bpf_kube_proxy_iptables_cleanup: Toggle::off(),
        },
        ipv4: Ipv4Values {
            enabled: false,
            pool: Pool::IPIP.to_owned(),
            mode: PoolMode::ALWAYS.to_owned(),
            auto_detection_method: None,
            wireguard: false,
        },
        ipv6: Ipv6Values {
            enabled: false,
            pool: Pool::VXLAN.to_owned(),
            mode: PoolMode::NEVER.to_owned(),
            auto_detection_method: None,
            nat_outgoing: false,
            wireguard: false,
        },
        ipam: IpamValues {
            ipam_type: HOST_LOCAL.to_owned(),
            subnet: USE_POD_CIDR.to_owned(),
            ranges: None,
            assign_ipv4: false,
            assign_ipv6: false,
        },
        typha: Toggle::on(),
        kube_controllers: Toggle::on(),
        veth_mtu: DEFAULT_VETH_MTU.to_owned(),
        monitoring: MonitoringValues {
            enabled: true,
            typha_metrics_port: TYPHA_METRICS_PORT.to_owned(),
            felix_metrics_port: FELIX_METRICS_PORT.to_owned(),
        },
        non_privileged: false,
        bird_exporter: Toggle::off(),
        multus: MultusValues {
            enabled: false,
            install_cni_plugins: false,
        },
    }
}

fn enable_families(c: &mut CalicoConfig, facts: &ClusterFacts) {
    if facts.has_family(IpFamily::IPv4) {
        c.ipv4.enabled = true;
        c.ipam.subnet = USE_POD_CIDR.to_owned();
        c.ipam.assign_ipv4 = true;
    }
    if facts.has_family(IpFamily::IPv6) {
        c.ipv6.enabled = true;
        c.felix.ipinip.enabled = false;
        c.ipam.ipam_type = CALICO_IPAM.to_owned();
        c.ipam.assign_ipv6 = true;
        if !facts.has_family(IpFamily::IPv4) {
            c.ipam.subnet = USE_POD_CIDR_IPV6.to_owned();
        }
    }
    if facts.dual_stack() {
        // Dual-stack pools are listed, not a single subnet. IPv6 first.
        c.ipam.subnet = String::new();
        c.ipam.ranges = Some(vec![
            USE_POD_CIDR_IPV6.to_owned(),
            USE_POD_CIDR.to_owned(),
        ]);
    }
}

fn generate_config(
    config: Option<&NetworkConfig>,
    facts: &ClusterFacts,
) -> Result<CalicoConfig, ValuesError> {
    let mut c = default_config();
    enable_families(&mut c, facts);

    if !facts.kube_proxy_enabled {
        c.felix.bpf_kube_proxy_iptables_cleanup.enabled = true;
    }
    c.non_privileged = facts.non_privileged;

    let Some(config) = config else { return Ok(c) };

    c.ipv4.wireguard = config.wireguard_encryption;
    c.ipv6.wireguard = config.wireguard_encryption;

    if let Some(backend) = &config.backend {
        match backend.as_str() {
            Backend::BIRD | Backend::VXLAN | Backend::NONE => {
                c.backend = backend.as_str().to_owned();
            }
            other => return Err(unsupported("backend", other)),
        }
    }
    if c.backend == Backend::NONE {
        c.kube_controllers.enabled = false;
        c.felix.ipinip.enabled = false;
        c.ipv4.mode = PoolMode::NEVER.to_owned();
    }

    if let Some(ebpf) = &config.ebpf_dataplane {
        if ebpf.enabled {
            c.felix.bpf.enabled = true;
        }
    }

    if let Some(ipam) = &config.ipam {
        if !ipam.ipam_type.is_empty() {
            c.ipam.ipam_type = ipam.ipam_type.clone();
        }
        if let Some(cidr) = &ipam.cidr {
            // A fixed subnet can only replace the sentinel when a single
            // family owns the assignment.
            if !facts.dual_stack() {
                c.ipam.subnet = cidr.as_str().to_owned();
            }
        }
    }

    if let Some(ipv4) = &config.ipv4 {
        if !facts.has_family(IpFamily::IPv4) {
            return Err(ValuesError::FamilyNotConfigured {
                family: IpFamily::IPv4,
            });
        }
        if let Some(pool) = &ipv4.pool {
            match pool.as_str() {
                Pool::IPIP | Pool::VXLAN => c.ipv4.pool = pool.as_str().to_owned(),
                other => return Err(unsupported("ipv4 pool", other)),
            }
        }
        if let Some(mode) = &ipv4.mode {
            match mode.as_str() {
                PoolMode::ALWAYS | PoolMode::NEVER | PoolMode::CROSS_SUBNET | PoolMode::OFF => {
                    c.ipv4.mode = mode.as_str().to_owned();
                }
                other => return Err(unsupported("ipv4 mode", other)),
            }
        }
        if let Some(method) = &ipv4.auto_detection_method {
            c.ipv4.auto_detection_method = Some(method.clone());
        }
    } else {
        // fallback to deprecated configuration fields
        if let Some(ipip) = &config.ipip {
            match ipip.as_str() {
                PoolMode::ALWAYS | PoolMode::NEVER | PoolMode::CROSS_SUBNET | PoolMode::OFF => {
                    c.ipv4.mode = ipip.as_str().to_owned();
                }
                other => return Err(unsupported("ipip", other)),
            }
        }
        if let Some(method) = &config.ip_auto_detection_method {
            c.ipv4.auto_detection_method = Some(method.clone());
        }
    }

    if let Some(ipv6) = &config.ipv6 {
        if !facts.has_family(IpFamily::IPv6) {
            return Err(ValuesError::FamilyNotConfigured {
                family: IpFamily::IPv6,
            });
        }
        if let Some(pool) = &ipv6.pool {
            match pool.as_str() {
                Pool::IPIP | Pool::VXLAN => c.ipv6.pool = pool.as_str().to_owned(),
                other => return Err(unsupported("ipv6 pool", other)),
            }
        }
        if let Some(mode) = &ipv6.mode {
            match mode.as_str() {
                PoolMode::ALWAYS | PoolMode::NEVER | PoolMode::CROSS_SUBNET | PoolMode::OFF => {
                    c.ipv6.mode = mode.as_str().to_owned();
                }
                other => return Err(unsupported("ipv6 mode", other)),
            }
        }
        if let Some(method) = &ipv6.auto_detection_method {
            c.ipv6.auto_detection_method = Some(method.clone());
        }
        if let Some(source_nat) = ipv6.source_nat_enabled {
            c.ipv6.nat_outgoing = source_nat;
        }
    }

    if let Some(vxlan) = &config.vxlan {
        if vxlan.enabled {
            c.ipv4.pool = Pool::VXLAN.to_owned();
            c.ipv4.mode = PoolMode::ALWAYS.to_owned();
            c.ipam.ipam_type = CALICO_IPAM.to_owned();
        }
    }

    if let Some(typha) = &config.typha {
        c.typha.enabled = typha.enabled;
    }
    if let Some(mtu) = &config.veth_mtu {
        c.veth_mtu = mtu.clone();
    }
    if let Some(bird_exporter) = &config.bird_exporter {
        c.bird_exporter.enabled = bird_exporter.enabled;
    }
    if let Some(multus) = &config.multus {
        c.multus.enabled = multus.enabled;
        c.multus.install_cni_plugins = multus.install_cni_plugins.unwrap_or(false);
    }

    // Wireguard tunnels carry the pod address; returning traffic needs NAT.
    if config.wireguard_encryption {
        c.ipv6.nat_outgoing = true;
    }
    // The eBPF dataplane needs privileged calico-node pods.
    if config.ebpf_dataplane.as_ref().map(|e| e.enabled) == Some(true) {
        c.non_privileged = false;
    }

    Ok(c)
}

fn compile_images(
    config: Option<&NetworkConfig>,
    facts: &ClusterFacts,
    images: &ImageVector,
) -> Result<BTreeMap<String, String>, ValuesError> {
    let mut names = vec![
        CNI_IMAGE,
        NODE_IMAGE,
        TYPHA_IMAGE,
        KUBE_CONTROLLERS_IMAGE,
        CPA_IMAGE,
        CPVA_IMAGE,
    ];
    if config.and_then(|c| c.bird_exporter.as_ref()).map(|b| b.enabled) == Some(true) {
        names.push(BIRD_EXPORTER_IMAGE);
    }
    if let Some(multus) = config.and_then(|c| c.multus.as_ref()) {
        if multus.enabled {
            names.push(MULTUS_IMAGE);
            if multus.install_cni_plugins == Some(true) {
                names.push(CNI_PLUGINS_IMAGE);
            }
        }
    }

    let mut refs = BTreeMap::new();
    for name in names {
        let image = images.find(name, &facts.kubernetes_version).ok_or_else(|| {
            ValuesError::MissingImage {
                name: name.to_owned(),
                version: facts.kubernetes_version.clone(),
            }
        })?;
        refs.insert(name.to_owned(), image);
    }
    Ok(refs)
}

fn first_ipv6_cidr(pod_cidrs: &[String]) -> Option<String> {
    pod_cidrs
        .iter()
        .find(|cidr| matches!(IpNetwork::from_str(cidr), Ok(IpNetwork::V6(_))))
        .cloned()
}

fn compile_global(config: Option<&NetworkConfig>, facts: &ClusterFacts) -> GlobalValues {
    let overlay = config.and_then(|c| c.overlay.as_ref());
    let snat_to_upstream_dns_enabled = match overlay {
        // Overlay off means pod addresses leave the node; masquerade towards
        // the upstream DNS unless explicitly disabled.
        Some(overlay) if !overlay.enabled => Some(
            config
                .and_then(|c| c.snat_to_upstream_dns.as_ref())
                .map(|snat| snat.enabled)
                .unwrap_or(true),
        ),
        _ => None,
    };

    GlobalValues {
        pod_cidr: facts.pod_cidr.clone(),
        node_cidr: facts.node_cidr.clone(),
        pod_cidr_v6: first_ipv6_cidr(&facts.pod_cidrs),
        overlay_enabled: overlay.map(|o| o.enabled),
        vxlan_enabled: config.and_then(|c| c.vxlan.as_ref()).map(|v| v.enabled),
        snat_to_upstream_dns_enabled,
    }
}

fn compile_autoscaling(
    config: Option<&NetworkConfig>,
    facts: &ClusterFacts,
    typha_enabled: bool,
) -> Result<(AutoscalingValues, VpaValues), ValuesError> {
    let mut vpa = VpaValues {
        enabled: facts.wants_vpa,
        node: false,
        typha: false,
    };
    let mut autoscaling = AutoscalingValues {
        mode: AutoscalingMode::CLUSTER_PROPORTIONAL.to_owned(),
        static_requests: false,
        resources: ResourceValues::default(),
    };

    let Some(auto_scaling) = config.and_then(|c| c.auto_scaling.as_ref()) else {
        return Ok((autoscaling, vpa));
    };

    match auto_scaling.mode.as_str() {
        "" | AutoscalingMode::CLUSTER_PROPORTIONAL => {}
        AutoscalingMode::VPA => {
            autoscaling.mode = AutoscalingMode::VPA.to_owned();
            if facts.wants_vpa {
                vpa.node = true;
                vpa.typha = typha_enabled;
            }
        }
        AutoscalingMode::STATIC => {
            autoscaling.mode = AutoscalingMode::STATIC.to_owned();
            autoscaling.static_requests = true;
        }
        other => return Err(unsupported("autoscaling mode", other)),
    }

    if matches!(
        autoscaling.mode.as_str(),
        AutoscalingMode::VPA | AutoscalingMode::STATIC
    ) {
        if let Some(resources) = &auto_scaling.resources {
            autoscaling.resources = ResourceValues {
                node: resources.node.clone(),
                typha: resources.typha.clone(),
            };
        }
    }

    Ok((autoscaling, vpa))
}

/// Compute the complete chart value tree for one reconcile pass.
///
/// The image lookup is injected so the compiler stays a pure function of its
/// inputs. Any override outside its closed value set aborts the compilation;
/// no partial tree is ever returned.
pub fn compute_chart_values(
    config: Option<&NetworkConfig>,
    facts: &ClusterFacts,
    images: &ImageVector,
) -> Result<ChartValues, ValuesError> {
    let calico_config = generate_config(config, facts)?;
    let images = compile_images(config, facts, images)?;
    let global = compile_global(config, facts);
    let (autoscaling, vpa) = compile_autoscaling(config, facts, calico_config.typha.enabled)?;

    Ok(ChartValues {
        config: calico_config,
        images,
        global,
        vpa,
        autoscaling,
    })
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;
    use crate::network::cluster::test_support::{dual_stack_facts, ipv4_facts, ipv6_facts};
    use crate::network::{
        AutoScaling, Backend, BirdExporter, Cidr, EbpfDataplane, Ipam, Multus, NetworkConfig,
        Overlay, SnatToUpstreamDns, StaticResources, Typha, Vxlan, IPv4, IPv6,
    };

    fn compile(config: Option<&NetworkConfig>, facts: &ClusterFacts) -> ChartValues {
        compute_chart_values(config, facts, &ImageVector::default()).unwrap()
    }

    #[test]
    fn is_deterministic() {
        let config = NetworkConfig {
            backend: Some(Backend::from(Backend::VXLAN)),
            wireguard_encryption: true,
            overlay: Some(Overlay {
                enabled: true,
                create_pod_routes: None,
            }),
            ..Default::default()
        };
        let facts = dual_stack_facts();
        let first = compile(Some(&config), &facts).to_value();
        let second = compile(Some(&config), &facts).to_value();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn empty_config_ipv4_defaults() {
        let values = compile(None, &ipv4_facts());
        let c = &values.config;
        assert_eq!(c.backend, "bird");
        assert!(c.ipv4.enabled);
        assert_eq!(c.ipv4.pool, "ipip");
        assert_eq!(c.ipv4.mode, "Always");
        assert!(!c.ipv4.wireguard);
        assert!(!c.ipv6.enabled);
        assert_eq!(c.ipam.ipam_type, "host-local");
        assert_eq!(c.ipam.subnet, "usePodCidr");
        assert!(c.ipam.assign_ipv4);
        assert!(!c.ipam.assign_ipv6);
        assert!(c.ipam.ranges.is_none());
        assert!(c.felix.ipinip.enabled);
        assert!(!c.felix.bpf.enabled);
        assert!(!c.felix.bpf_kube_proxy_iptables_cleanup.enabled);
        assert!(c.typha.enabled);
        assert!(c.kube_controllers.enabled);
        assert_eq!(c.veth_mtu, "0");
        assert_eq!(values.global.pod_cidr, "100.96.0.0/11");
        assert!(values.global.pod_cidr_v6.is_none());
        assert!(values.global.overlay_enabled.is_none());
    }

    #[test]
    fn empty_config_ipv6_defaults() {
        let values = compile(None, &ipv6_facts());
        let c = &values.config;
        assert!(!c.ipv4.enabled);
        assert!(c.ipv6.enabled);
        assert_eq!(c.ipv6.pool, "vxlan");
        assert_eq!(c.ipv6.mode, "Never");
        assert!(!c.ipv6.nat_outgoing);
        assert_eq!(c.ipam.ipam_type, "calico-ipam");
        assert_eq!(c.ipam.subnet, "usePodCidrIPv6");
        assert!(!c.felix.ipinip.enabled);
        assert_eq!(
            values.global.pod_cidr_v6.as_deref(),
            Some("2001:db8:1::/48")
        );
    }

    #[test]
    fn dual_stack_clears_subnet_and_sets_ranges() {
        let values = compile(None, &dual_stack_facts());
        let ipam = &values.config.ipam;
        assert_eq!(ipam.subnet, "");
        assert_eq!(
            ipam.ranges.as_deref(),
            Some(&["usePodCidrIPv6".to_owned(), "usePodCidr".to_owned()][..])
        );
        assert!(ipam.assign_ipv4);
        assert!(ipam.assign_ipv6);
        assert_eq!(ipam.ipam_type, "calico-ipam");
    }

    #[test]
    fn ipam_cidr_override_is_single_family_only() {
        let config = NetworkConfig {
            ipam: Some(Ipam {
                ipam_type: "host-local".to_owned(),
                cidr: Some(Cidr("10.10.0.0/16".to_owned())),
            }),
            ..Default::default()
        };
        let single = compile(Some(&config), &ipv4_facts());
        assert_eq!(single.config.ipam.subnet, "10.10.0.0/16");
        let dual = compile(Some(&config), &dual_stack_facts());
        assert_eq!(dual.config.ipam.subnet, "");
    }

    #[test]
    fn backend_none_invariant() {
        let config = NetworkConfig {
            backend: Some(Backend::from(Backend::NONE)),
            ipv4: Some(IPv4 {
                pool: Some(Pool::from(Pool::IPIP)),
                mode: None,
                auto_detection_method: None,
            }),
            ..Default::default()
        };
        let values = compile(Some(&config), &ipv4_facts());
        assert!(!values.config.kube_controllers.enabled);
        assert!(!values.config.felix.ipinip.enabled);
        assert_eq!(values.config.ipv4.mode, "Never");
    }

    #[test]
    fn rejects_unknown_backend() {
        let config = NetworkConfig {
            backend: Some(Backend::from("geneve")),
            ..Default::default()
        };
        let err = compute_chart_values(Some(&config), &ipv4_facts(), &ImageVector::default())
            .unwrap_err();
        expect!["unsupported value for backend: geneve"].assert_eq(&err.to_string());
    }

    #[test]
    fn rejects_family_config_without_family() {
        let config = NetworkConfig {
            ipv6: Some(IPv6::default()),
            ..Default::default()
        };
        let err = compute_chart_values(Some(&config), &ipv4_facts(), &ImageVector::default())
            .unwrap_err();
        expect!["IPv6 configuration must not be specified if Shoot doesn't use IPv6 networking"]
            .assert_eq(&err.to_string());

        let config = NetworkConfig {
            ipv4: Some(IPv4::default()),
            ..Default::default()
        };
        let err = compute_chart_values(Some(&config), &ipv6_facts(), &ImageVector::default())
            .unwrap_err();
        expect!["IPv4 configuration must not be specified if Shoot doesn't use IPv4 networking"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn deprecated_fields_apply_only_without_ipv4_block() {
        let deprecated_only = NetworkConfig {
            ipip: Some(PoolMode::from(PoolMode::CROSS_SUBNET)),
            ip_auto_detection_method: Some("interface=eth1".to_owned()),
            ..Default::default()
        };
        let values = compile(Some(&deprecated_only), &ipv4_facts());
        assert_eq!(values.config.ipv4.mode, "CrossSubnet");
        assert_eq!(
            values.config.ipv4.auto_detection_method.as_deref(),
            Some("interface=eth1")
        );

        let both = NetworkConfig {
            ipv4: Some(IPv4 {
                pool: None,
                mode: Some(PoolMode::from(PoolMode::NEVER)),
                auto_detection_method: None,
            }),
            ..deprecated_only
        };
        let values = compile(Some(&both), &ipv4_facts());
        assert_eq!(values.config.ipv4.mode, "Never");
        assert_eq!(values.config.ipv4.auto_detection_method, None);
    }

    #[test]
    fn rejects_unknown_deprecated_ipip_mode() {
        let config = NetworkConfig {
            ipip: Some(PoolMode::from("Sometimes")),
            ..Default::default()
        };
        let err = compute_chart_values(Some(&config), &ipv4_facts(), &ImageVector::default())
            .unwrap_err();
        expect!["unsupported value for ipip: Sometimes"].assert_eq(&err.to_string());
    }

    #[test]
    fn ebpf_forces_privileged_and_bpf() {
        let config = NetworkConfig {
            ebpf_dataplane: Some(EbpfDataplane { enabled: true }),
            ..Default::default()
        };
        let mut facts = ipv4_facts();
        facts.non_privileged = true;
        let values = compile(Some(&config), &facts);
        assert!(values.config.felix.bpf.enabled);
        assert!(!values.config.non_privileged);
    }

    #[test]
    fn non_privileged_passes_through_without_ebpf() {
        let mut facts = ipv4_facts();
        facts.non_privileged = true;
        let values = compile(Some(&NetworkConfig::default()), &facts);
        assert!(values.config.non_privileged);
    }

    #[test]
    fn kube_proxy_disabled_enables_iptables_cleanup() {
        let mut facts = ipv4_facts();
        facts.kube_proxy_enabled = false;
        let values = compile(None, &facts);
        assert!(values.config.felix.bpf_kube_proxy_iptables_cleanup.enabled);
    }

    #[test]
    fn wireguard_sets_both_families_and_nat() {
        let config = NetworkConfig {
            wireguard_encryption: true,
            ipv6: Some(IPv6 {
                source_nat_enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let values = compile(Some(&config), &dual_stack_facts());
        assert!(values.config.ipv4.wireguard);
        assert!(values.config.ipv6.wireguard);
        // wireguard wins over an explicit sourceNATEnabled=false
        assert!(values.config.ipv6.nat_outgoing);
    }

    #[test]
    fn vxlan_forces_pool_mode_and_ipam() {
        let config = NetworkConfig {
            vxlan: Some(Vxlan { enabled: true }),
            ..Default::default()
        };
        let values = compile(Some(&config), &ipv4_facts());
        assert_eq!(values.config.ipv4.pool, "vxlan");
        assert_eq!(values.config.ipv4.mode, "Always");
        assert_eq!(values.config.ipam.ipam_type, "calico-ipam");
    }

    #[test]
    fn passthrough_overrides() {
        let config = NetworkConfig {
            typha: Some(Typha { enabled: false }),
            veth_mtu: Some("1430".to_owned()),
            bird_exporter: Some(BirdExporter { enabled: true }),
            multus: Some(Multus {
                enabled: true,
                install_cni_plugins: Some(true),
            }),
            ..Default::default()
        };
        let values = compile(Some(&config), &ipv4_facts());
        assert!(!values.config.typha.enabled);
        assert_eq!(values.config.veth_mtu, "1430");
        assert!(values.config.bird_exporter.enabled);
        assert!(values.config.multus.enabled);
        assert!(values.config.multus.install_cni_plugins);
        assert!(values.images.contains_key("bird-exporter"));
        assert!(values.images.contains_key("multus"));
        assert!(values.images.contains_key("cni-plugins"));
    }

    #[test]
    fn base_images_are_always_attached() {
        let values = compile(None, &ipv4_facts());
        for name in [
            "calico-cni",
            "calico-node",
            "calico-typha",
            "calico-kube-controllers",
            "calico-cpa",
            "calico-cpva",
        ] {
            assert!(values.images.contains_key(name), "missing image {name}");
        }
        assert!(!values.images.contains_key("bird-exporter"));
    }

    #[test]
    fn overlay_globals_and_snat_default() {
        let disabled = NetworkConfig {
            overlay: Some(Overlay {
                enabled: false,
                create_pod_routes: None,
            }),
            ..Default::default()
        };
        let values = compile(Some(&disabled), &ipv4_facts());
        assert_eq!(values.global.overlay_enabled, Some(false));
        assert_eq!(values.global.snat_to_upstream_dns_enabled, Some(true));

        let opted_out = NetworkConfig {
            snat_to_upstream_dns: Some(SnatToUpstreamDns { enabled: false }),
            ..disabled
        };
        let values = compile(Some(&opted_out), &ipv4_facts());
        assert_eq!(values.global.snat_to_upstream_dns_enabled, Some(false));

        let enabled = NetworkConfig {
            overlay: Some(Overlay {
                enabled: true,
                create_pod_routes: None,
            }),
            ..Default::default()
        };
        let values = compile(Some(&enabled), &ipv4_facts());
        assert_eq!(values.global.overlay_enabled, Some(true));
        assert_eq!(values.global.snat_to_upstream_dns_enabled, None);
    }

    #[test]
    fn autoscaling_vpa_marks_components() {
        let config = NetworkConfig {
            auto_scaling: Some(AutoScaling {
                mode: AutoscalingMode::from(AutoscalingMode::VPA),
                resources: Some(StaticResources {
                    node: Some(BTreeMap::from_iter([(
                        "cpu".to_owned(),
                        Quantity("250m".to_owned()),
                    )])),
                    typha: None,
                }),
            }),
            ..Default::default()
        };
        let mut facts = ipv4_facts();
        facts.wants_vpa = true;
        let values = compile(Some(&config), &facts);
        assert!(values.vpa.enabled);
        assert!(values.vpa.node);
        assert!(values.vpa.typha);
        assert_eq!(values.autoscaling.mode, "vpa");
        assert!(!values.autoscaling.static_requests);
        assert_eq!(
            values.autoscaling.resources.node.as_ref().unwrap()["cpu"],
            Quantity("250m".to_owned())
        );

        // without the shoot wanting VPA nothing is marked
        let values = compile(Some(&config), &ipv4_facts());
        assert!(!values.vpa.enabled);
        assert!(!values.vpa.node);
        assert!(!values.vpa.typha);
    }

    #[test]
    fn autoscaling_static_attaches_requests() {
        let config = NetworkConfig {
            auto_scaling: Some(AutoScaling {
                mode: AutoscalingMode::from(AutoscalingMode::STATIC),
                resources: Some(StaticResources {
                    node: Some(BTreeMap::from_iter([
                        ("cpu".to_owned(), Quantity("250m".to_owned())),
                        ("memory".to_owned(), Quantity("512Mi".to_owned())),
                    ])),
                    typha: Some(BTreeMap::from_iter([(
                        "memory".to_owned(),
                        Quantity("128Mi".to_owned()),
                    )])),
                }),
            }),
            ..Default::default()
        };
        let values = compile(Some(&config), &ipv4_facts());
        assert_eq!(values.autoscaling.mode, "static");
        assert!(values.autoscaling.static_requests);
        assert_eq!(
            values.autoscaling.resources.typha.as_ref().unwrap()["memory"],
            Quantity("128Mi".to_owned())
        );
    }

    #[test]
    fn rejects_unknown_autoscaling_mode() {
        let config = NetworkConfig {
            auto_scaling: Some(AutoScaling {
                mode: AutoscalingMode::from("horizontal"),
                resources: None,
            }),
            ..Default::default()
        };
        let err = compute_chart_values(Some(&config), &ipv4_facts(), &ImageVector::default())
            .unwrap_err();
        expect!["unsupported value for autoscaling mode: horizontal"].assert_eq(&err.to_string());
    }
}
