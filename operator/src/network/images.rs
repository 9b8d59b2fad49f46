//! Image vector resolving component images by name and Kubernetes version.

use serde::Deserialize;

/// Image name of the Calico CNI install container.
pub const CNI_IMAGE: &str = "calico-cni";
/// Image name of the calico-node agent.
pub const NODE_IMAGE: &str = "calico-node";
/// Image name of the typha fan-out proxy.
pub const TYPHA_IMAGE: &str = "calico-typha";
/// Image name of the kube-controllers deployment.
pub const KUBE_CONTROLLERS_IMAGE: &str = "calico-kube-controllers";
/// Image name of the cluster-proportional autoscaler.
pub const CPA_IMAGE: &str = "calico-cpa";
/// Image name of the cluster-proportional vertical autoscaler.
pub const CPVA_IMAGE: &str = "calico-cpva";
/// Image name of the bird metrics exporter.
pub const BIRD_EXPORTER_IMAGE: &str = "bird-exporter";
/// Image name of the Multus meta plugin.
pub const MULTUS_IMAGE: &str = "multus";
/// Image name of the reference CNI plugins bundle.
pub const CNI_PLUGINS_IMAGE: &str = "cni-plugins";

/// One entry of the image vector.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ImageEntry {
    /// Component name the entry is registered under.
    pub name: String,
    /// Image repository.
    pub repository: String,
    /// Image tag.
    pub tag: String,
    /// Optional Kubernetes minor-version constraint, `>= 1.x` or `< 1.x`.
    #[serde(default)]
    pub target_version: Option<String>,
}

impl ImageEntry {
    fn matches(&self, kubernetes_version: &str) -> bool {
        let Some(constraint) = &self.target_version else {
            return true;
        };
        let Some(version) = minor_version(kubernetes_version) else {
            return false;
        };
        match constraint.split_once(' ') {
            Some((">=", bound)) => minor_version(bound).is_some_and(|b| version >= b),
            Some(("<", bound)) => minor_version(bound).is_some_and(|b| version < b),
            _ => false,
        }
    }

    fn image_ref(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

// (major, minor) prefix of a version string, ignoring any patch level.
fn minor_version(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim_start_matches('v').splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Static lookup table from component name to image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageVector {
    entries: Vec<ImageEntry>,
}

impl ImageVector {
    /// Build a vector from explicit entries.
    pub fn new(entries: Vec<ImageEntry>) -> Self {
        Self { entries }
    }

    /// Parse a vector override from YAML, `images:` top-level key.
    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct File {
            images: Vec<ImageEntry>,
        }
        let file: File = serde_yaml::from_str(data)?;
        Ok(Self::new(file.images))
    }

    /// Resolve the image reference for a component, preferring entries whose
    /// version constraint matches the cluster's Kubernetes version.
    pub fn find(&self, name: &str, kubernetes_version: &str) -> Option<String> {
        let mut fallback = None;
        for entry in self.entries.iter().filter(|e| e.name == name) {
            if entry.target_version.is_some() {
                if entry.matches(kubernetes_version) {
                    return Some(entry.image_ref());
                }
            } else if fallback.is_none() {
                fallback = Some(entry.image_ref());
            }
        }
        fallback
    }
}

impl Default for ImageVector {
    fn default() -> Self {
        let plain = |name: &str, repository: &str, tag: &str| ImageEntry {
            name: name.to_owned(),
            repository: repository.to_owned(),
            tag: tag.to_owned(),
            target_version: None,
        };
        Self::new(vec![
            plain(CNI_IMAGE, "quay.io/calico/cni", "v3.29.1"),
            plain(NODE_IMAGE, "quay.io/calico/node", "v3.29.1"),
            plain(TYPHA_IMAGE, "quay.io/calico/typha", "v3.29.1"),
            plain(
                KUBE_CONTROLLERS_IMAGE,
                "quay.io/calico/kube-controllers",
                "v3.29.1",
            ),
            plain(
                CPA_IMAGE,
                "registry.k8s.io/cpa/cluster-proportional-autoscaler",
                "v1.9.0",
            ),
            plain(
                CPVA_IMAGE,
                "registry.k8s.io/cpa/cpvpa",
                "v0.8.4",
            ),
            plain(
                BIRD_EXPORTER_IMAGE,
                "ghcr.io/czerwonk/bird_exporter",
                "1.4.3",
            ),
            plain(MULTUS_IMAGE, "ghcr.io/k8snetworkplumbingwg/multus-cni", "v4.1.4"),
            plain(
                CNI_PLUGINS_IMAGE,
                "ghcr.io/containernetworking/plugins",
                "v1.6.2",
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_default_images() {
        let vector = ImageVector::default();
        let image = vector.find(NODE_IMAGE, "1.28.4").unwrap();
        assert_eq!(image, "quay.io/calico/node:v3.29.1");
        assert!(vector.find("unknown", "1.28.4").is_none());
    }

    #[test]
    fn prefers_matching_version_constraint() {
        let vector = ImageVector::new(vec![
            ImageEntry {
                name: NODE_IMAGE.to_owned(),
                repository: "example.org/node".to_owned(),
                tag: "old".to_owned(),
                target_version: Some("< 1.27".to_owned()),
            },
            ImageEntry {
                name: NODE_IMAGE.to_owned(),
                repository: "example.org/node".to_owned(),
                tag: "new".to_owned(),
                target_version: Some(">= 1.27".to_owned()),
            },
        ]);
        assert_eq!(
            vector.find(NODE_IMAGE, "1.26.9").unwrap(),
            "example.org/node:old"
        );
        assert_eq!(
            vector.find(NODE_IMAGE, "1.28.0").unwrap(),
            "example.org/node:new"
        );
        assert_eq!(vector.find(NODE_IMAGE, "nonsense"), None);
    }

    #[test]
    fn parses_override_file() {
        let vector = ImageVector::from_yaml(
            r#"
images:
  - name: calico-node
    repository: mirror.example.org/calico/node
    tag: v3.29.1
"#,
        )
        .unwrap();
        assert_eq!(
            vector.find(NODE_IMAGE, "1.28.0").unwrap(),
            "mirror.example.org/calico/node:v3.29.1"
        );
    }
}
