//! Place all spec types into a single module so they can be used as a lightweight dependency
use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Primary CRD describing the network stack of a single shoot cluster.
///
/// The spec carries the cluster networking facts declared by the garden
/// control plane together with an opaque provider config holding the
/// Calico-specific [`NetworkConfig`].
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    kind = "Network",
    plural = "networks",
    namespaced,
    status = "NetworkStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// CIDR block for the pod network.
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,
    /// CIDR block for the service network.
    #[serde(rename = "serviceCIDR")]
    pub service_cidr: String,
    /// Ordered list of IP families the cluster uses. Defaults to IPv4 only.
    pub ip_families: Option<Vec<IpFamily>>,
    /// Calico-specific configuration, decoded into [`NetworkConfig`].
    /// Absence is valid and means all defaults.
    pub provider_config: Option<serde_json::Value>,
}

/// Current status of the network stack.
#[derive(Default, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// IP families actually configured by the last successful reconciliation.
    pub ip_families: Option<Vec<IpFamily>>,
    /// Outcome of the last reconcile or delete operation.
    pub last_operation: Option<LastOperation>,
    /// Provider-specific status, serialized from [`ProviderStatus`].
    pub provider_status: Option<serde_json::Value>,
}

/// Record of the most recent operation on the network resource.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    /// Operation type, e.g. Reconcile or Delete.
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// Terminal state of the operation.
    pub state: OperationState,
    /// Completion percentage.
    pub progress: i32,
    /// Human readable description of the outcome.
    pub description: String,
    /// Time the record was written.
    pub last_update_time: Option<Time>,
}

/// The kind of operation recorded in a [`LastOperation`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum OperationType {
    /// A reconcile pass.
    Reconcile,
    /// A deletion pass.
    Delete,
}

/// Terminal state of a [`LastOperation`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum OperationState {
    /// The operation completed successfully.
    Succeeded,
    /// The operation failed and will be retried.
    Error,
}

/// Provider-specific status written into `status.providerStatus`.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    /// API version of this status object.
    pub api_version: String,
    /// Kind of this status object.
    pub kind: String,
    /// IP families configured by the applied network config.
    pub ip_families: Vec<IpFamily>,
}

impl ProviderStatus {
    /// API version written into the status type meta.
    pub const API_VERSION: &'static str = "calico.networking.extensions.gardener.cloud/v1alpha1";
    /// Kind written into the status type meta.
    pub const KIND: &'static str = "NetworkStatus";

    /// Construct a status for the given resolved families.
    pub fn new(ip_families: Vec<IpFamily>) -> Self {
        Self {
            api_version: Self::API_VERSION.to_owned(),
            kind: Self::KIND.to_owned(),
            ip_families,
        }
    }
}

/// IP family of a pod or node network.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum IpFamily {
    /// IPv4 networking.
    #[serde(rename = "IPv4")]
    IPv4,
    /// IPv6 networking.
    #[serde(rename = "IPv6")]
    IPv6,
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::IPv4 => write!(f, "IPv4"),
            IpFamily::IPv6 => write!(f, "IPv6"),
        }
    }
}

/// Companion CRD mirroring the shoot cluster this network belongs to.
///
/// The resource is named after the shoot namespace and read-only from the
/// perspective of this operator; it provides the cluster facts consumed
/// during reconciliation.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Summary of the shoot cluster spec and observed state.
    pub shoot: ShootSummary,
}

/// Relevant parts of the shoot cluster object.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootSummary {
    /// Declared shoot networking.
    pub networking: Option<ShootNetworking>,
    /// Declared shoot Kubernetes settings.
    pub kubernetes: ShootKubernetes,
    /// Set when the shoot is being force-deleted; skips deletion waits.
    pub force_deletion: Option<bool>,
    /// Observed shoot state.
    pub status: Option<ShootStatus>,
}

/// Declared networking section of the shoot spec.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootNetworking {
    /// CIDR of the node network, if declared.
    pub nodes: Option<String>,
    /// CIDR of the pod network, if declared.
    pub pods: Option<String>,
    /// Ordered IP families of the shoot.
    pub ip_families: Option<Vec<IpFamily>>,
}

/// Kubernetes section of the shoot spec.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootKubernetes {
    /// Kubernetes version of the shoot.
    pub version: String,
    /// kube-proxy settings of the shoot.
    pub kube_proxy: Option<KubeProxyConfig>,
    /// Vertical pod autoscaler settings of the shoot.
    pub vertical_pod_autoscaler: Option<VerticalPodAutoscaler>,
}

/// kube-proxy settings of the shoot.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeProxyConfig {
    /// Whether kube-proxy is deployed. Defaults to true.
    pub enabled: Option<bool>,
}

/// Vertical pod autoscaler settings of the shoot.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscaler {
    /// Whether the shoot wants a vertical pod autoscaler.
    pub enabled: bool,
}

/// Observed state of the shoot.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    /// Observed networking state.
    pub networking: Option<ObservedNetworking>,
    /// Constraint conditions reported for the shoot.
    pub constraints: Option<Vec<ShootCondition>>,
}

/// Networking state observed on the running shoot.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservedNetworking {
    /// CIDRs actually assigned to nodes.
    pub nodes: Option<Vec<String>>,
    /// CIDRs actually assigned to the pod network.
    pub pods: Option<Vec<String>>,
}

/// A single shoot constraint condition.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootCondition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Condition status, True/False/Unknown.
    pub status: String,
}

/// Condition type reported once every node of a dual-stack migration has
/// both address families assigned.
pub const DUAL_STACK_MIGRATION_READY: &str = "DualStackNodesMigrationReady";

/// Configuration for the Calico networking plugin.
///
/// All fields are optional; absent fields resolve to the compiled-in
/// defaults. Enum-like fields are open strings so that unsupported values
/// survive decoding and are rejected with a precise error by the chart
/// value compiler.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Backend defines whether a backend should be used or not (e.g., bird or none)
    pub backend: Option<Backend>,
    /// IPAM to use for the Calico plugin (e.g., host-local or calico-ipam)
    pub ipam: Option<Ipam>,
    /// IPv4 contains configuration for calico ipv4 specific settings
    pub ipv4: Option<IPv4>,
    /// IPv6 contains configuration for calico ipv6 specific settings
    pub ipv6: Option<IPv6>,
    /// Typha settings to use for the calico-typha component
    pub typha: Option<Typha>,
    /// VethMTU settings used to configure calico port mtu
    #[serde(rename = "vethMTU")]
    pub veth_mtu: Option<String>,
    /// EbpfDataplane enables the eBPF dataplane mode.
    pub ebpf_dataplane: Option<EbpfDataplane>,
    /// Overlay enables the network overlay
    pub overlay: Option<Overlay>,
    /// VXLAN enables vxlan as overlay network
    pub vxlan: Option<Vxlan>,
    /// SnatToUpstreamDNS enables the masquerading of packets to the upstream dns server (default: enabled)
    #[serde(rename = "snatToUpstreamDNS")]
    pub snat_to_upstream_dns: Option<SnatToUpstreamDns>,
    /// AutoScaling defines how the calico components are automatically scaled (default: cluster-proportional).
    pub auto_scaling: Option<AutoScaling>,
    /// WireguardEncryption is the option to enable node to node wireguard encryption
    #[serde(default)]
    pub wireguard_encryption: bool,
    /// BirdExporter deploys the bird metrics exporter alongside calico-node.
    pub bird_exporter: Option<BirdExporter>,
    /// Multus deploys the Multus meta CNI plugin in front of Calico.
    pub multus: Option<Multus>,

    /// DEPRECATED.
    /// IPIP is the IPIP mode for the IPv4 pool (e.g. Always, Never, CrossSubnet).
    /// It was moved into the IPv4 struct, kept for backwards compatibility.
    pub ipip: Option<PoolMode>,
    /// DEPRECATED.
    /// IPAutoDetectionMethod is the method to use to autodetect the IPv4 address for this host.
    /// It was moved into the IPv4 struct, kept for backwards compatibility.
    pub ip_auto_detection_method: Option<String>,
}

/// The Calico data-plane control mechanism.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(transparent)]
pub struct Backend(pub String);

impl Backend {
    /// BGP control plane via bird.
    pub const BIRD: &'static str = "bird";
    /// No control plane.
    pub const NONE: &'static str = "none";
    /// VXLAN overlay control.
    pub const VXLAN: &'static str = "vxlan";

    /// The raw backend value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Backend {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The type of ip pool for a tunnel interface.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(transparent)]
pub struct Pool(pub String);

impl Pool {
    /// IP-in-IP encapsulation pool.
    pub const IPIP: &'static str = "ipip";
    /// VXLAN encapsulation pool.
    pub const VXLAN: &'static str = "vxlan";

    /// The raw pool value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Pool {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encapsulation mode of an ip pool.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(transparent)]
pub struct PoolMode(pub String);

impl PoolMode {
    /// Always encapsulate.
    pub const ALWAYS: &'static str = "Always";
    /// Never encapsulate.
    pub const NEVER: &'static str = "Never";
    /// Encapsulate only across subnet boundaries.
    pub const CROSS_SUBNET: &'static str = "CrossSubnet";
    /// Encapsulation switched off.
    pub const OFF: &'static str = "Off";

    /// The raw mode value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PoolMode {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for PoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A CIDR block in string form.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(transparent)]
pub struct Cidr(pub String);

impl Cidr {
    /// The raw CIDR value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// IPv4 contains configuration for calico ipv4 specific settings.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPv4 {
    /// Pool configures the type of ip pool for the tunnel interface.
    pub pool: Option<Pool>,
    /// Mode is the mode for the IPv4 pool (e.g. Always, Never, CrossSubnet).
    /// ipip pools accept all mode values, vxlan pools accept only Always and Never.
    pub mode: Option<PoolMode>,
    /// AutoDetectionMethod is the method to use to autodetect the IPv4 address for this host.
    pub auto_detection_method: Option<String>,
}

/// IPv6 contains configuration for calico ipv6 specific settings.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPv6 {
    /// Pool configures the type of ip pool for the tunnel interface.
    pub pool: Option<Pool>,
    /// Mode is the mode for the IPv6 pool (e.g. Always, Never, CrossSubnet).
    /// vxlan pools accept only Always and Never.
    pub mode: Option<PoolMode>,
    /// AutoDetectionMethod is the method to use to autodetect the IPv6 address for this host.
    pub auto_detection_method: Option<String>,
    /// SourceNATEnabled turns on NAT for outgoing IPv6 pod traffic.
    #[serde(rename = "sourceNATEnabled")]
    pub source_nat_enabled: Option<bool>,
}

/// IPAM defines the ip assignment plugin to be used.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ipam {
    /// Type defines the IPAM plugin type.
    #[serde(rename = "type")]
    pub ipam_type: String,
    /// CIDR defines the CIDR block to be used.
    pub cidr: Option<Cidr>,
}

/// Typha defines the block with configurations for calico typha.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Typha {
    /// Enabled is used to define whether calico-typha is required or not.
    /// Note, typha is used to offload the kubernetes API server,
    /// thus consider not to disable it for large clusters in terms of node count.
    pub enabled: bool,
}

/// EbpfDataplane enables the eBPF dataplane mode.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EbpfDataplane {
    /// Enabled enables the eBPF dataplane mode.
    pub enabled: bool,
}

/// Overlay settings for pod-to-pod traffic.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    /// Enabled enables the network overlay.
    pub enabled: bool,
    /// CreatePodRoutes installs routes to pods on all cluster nodes.
    /// This will only work if the cluster nodes share a single L2 network.
    pub create_pod_routes: Option<bool>,
}

/// Vxlan enables vxlan as the overlay network.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Vxlan {
    /// Enabled enables vxlan as overlay network.
    pub enabled: bool,
}

/// SnatToUpstreamDns enables the masquerading of packets to the upstream dns server.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnatToUpstreamDns {
    /// Enabled turns the masquerading on.
    pub enabled: bool,
}

/// BirdExporter deploys the bird metrics exporter.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BirdExporter {
    /// Enabled deploys the exporter container.
    pub enabled: bool,
}

/// Multus deploys the Multus meta CNI plugin.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Multus {
    /// Enabled deploys Multus in front of Calico.
    pub enabled: bool,
    /// InstallCNIPlugins additionally installs the reference CNI plugins.
    #[serde(rename = "installCNIPlugins")]
    pub install_cni_plugins: Option<bool>,
}

/// How the calico components are automatically scaled.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
#[serde(transparent)]
pub struct AutoscalingMode(pub String);

impl AutoscalingMode {
    /// Scale requests proportionally to the cluster size.
    pub const CLUSTER_PROPORTIONAL: &'static str = "cluster-proportional";
    /// Scale requests through the vertical pod autoscaler.
    pub const VPA: &'static str = "vpa";
    /// Statically allocated resource requests.
    pub const STATIC: &'static str = "static";

    /// The raw mode value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AutoscalingMode {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for AutoscalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// AutoScaling defines how the calico components are automatically scaled.
/// It allows to use static configuration, vertical pod or cluster-proportional autoscaler.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoScaling {
    /// Mode selects the autoscaler, defaults to cluster-proportional.
    #[serde(default)]
    pub mode: AutoscalingMode,
    /// Resources optionally defines the amount of resources to statically allocate
    /// for the calico components.
    pub resources: Option<StaticResources>,
}

/// Resource floors for the statically scaled calico components.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticResources {
    /// Resources for the calico-node component.
    pub node: Option<BTreeMap<String, Quantity>>,
    /// Resources for the calico-typha component.
    pub typha: Option<BTreeMap<String, Quantity>>,
}
