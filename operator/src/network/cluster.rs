//! Cluster facts extracted from the watched Network and its companion Cluster.
//!
//! Facts are a read-only snapshot taken at the start of a reconcile pass; the
//! validator and compiler never look at the API objects directly.

use crate::features::FeatureGates;
use crate::network::{Cluster, IpFamily, Network, DUAL_STACK_MIGRATION_READY};

/// Snapshot of all cluster-level inputs of one reconcile pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterFacts {
    /// Kubernetes version of the shoot.
    pub kubernetes_version: String,
    /// Ordered IP families the cluster uses.
    pub ip_families: Vec<IpFamily>,
    /// Primary pod CIDR of the cluster.
    pub pod_cidr: String,
    /// All known pod CIDRs, declared and observed.
    pub pod_cidrs: Vec<String>,
    /// Declared node CIDR, if any.
    pub node_cidr: Option<String>,
    /// Node CIDRs observed in the shoot status, if any.
    pub observed_node_cidrs: Vec<String>,
    /// Whether kube-proxy is deployed in the shoot.
    pub kube_proxy_enabled: bool,
    /// Whether the shoot wants a vertical pod autoscaler.
    pub wants_vpa: bool,
    /// Whether calico-node runs non-privileged.
    pub non_privileged: bool,
    /// Whether every node finished the dual-stack migration.
    pub dual_stack_migration_ready: bool,
    /// Whether the shoot is being force-deleted.
    pub force_deletion: bool,
}

impl ClusterFacts {
    /// Collect the facts for one reconcile pass.
    pub fn gather(network: &Network, cluster: &Cluster, gates: &FeatureGates) -> Self {
        let shoot = &cluster.spec.shoot;
        let networking = shoot.networking.as_ref();
        let status = shoot.status.as_ref();
        let observed = status.and_then(|s| s.networking.as_ref());

        let ip_families = network
            .spec
            .ip_families
            .clone()
            .or_else(|| networking.and_then(|n| n.ip_families.clone()))
            .filter(|families| !families.is_empty())
            .unwrap_or_else(|| vec![IpFamily::IPv4]);

        let mut pod_cidrs = vec![network.spec.pod_cidr.clone()];
        if let Some(pods) = networking.and_then(|n| n.pods.as_ref()) {
            if !pod_cidrs.contains(pods) {
                pod_cidrs.push(pods.clone());
            }
        }
        for cidr in observed.and_then(|o| o.pods.clone()).unwrap_or_default() {
            if !pod_cidrs.contains(&cidr) {
                pod_cidrs.push(cidr);
            }
        }

        let dual_stack_migration_ready = status
            .and_then(|s| s.constraints.as_ref())
            .map(|constraints| {
                constraints
                    .iter()
                    .any(|c| c.condition_type == DUAL_STACK_MIGRATION_READY && c.status == "True")
            })
            .unwrap_or(false);

        Self {
            kubernetes_version: shoot.kubernetes.version.clone(),
            ip_families,
            pod_cidr: network.spec.pod_cidr.clone(),
            pod_cidrs,
            node_cidr: networking.and_then(|n| n.nodes.clone()),
            observed_node_cidrs: observed.and_then(|o| o.nodes.clone()).unwrap_or_default(),
            kube_proxy_enabled: shoot
                .kubernetes
                .kube_proxy
                .as_ref()
                .and_then(|p| p.enabled)
                .unwrap_or(true),
            wants_vpa: shoot
                .kubernetes
                .vertical_pod_autoscaler
                .as_ref()
                .map(|vpa| vpa.enabled)
                .unwrap_or(false),
            non_privileged: gates.non_privileged_calico_node,
            dual_stack_migration_ready,
            force_deletion: shoot.force_deletion.unwrap_or(false),
        }
    }

    /// Whether the given family is active.
    pub fn has_family(&self, family: IpFamily) -> bool {
        self.ip_families.contains(&family)
    }

    /// Whether both IPv4 and IPv6 are active.
    pub fn dual_stack(&self) -> bool {
        self.has_family(IpFamily::IPv4) && self.has_family(IpFamily::IPv6)
    }

    /// The first declared family.
    pub fn primary_family(&self) -> IpFamily {
        self.ip_families.first().copied().unwrap_or(IpFamily::IPv4)
    }
}
