//! Monitoring configuration for the control plane namespace.
//!
//! A single ConfigMap carrying the scrape configuration for the felix and
//! typha metrics endpoints, applied next to the managed resource and removed
//! with it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{DeleteParams, Patch, PatchParams},
    client::Client,
    core::ObjectMeta,
    Api,
};

use crate::labels::managed_labels;
use crate::CONTROLLER_NAME;

/// Name of the monitoring config map.
pub const MONITORING_CONFIG_NAME: &str = "calico-monitoring-config";

fn scrape_config() -> String {
    r#"scrape_configs:
- job_name: calico-felix
  kubernetes_sd_configs:
  - role: pod
  relabel_configs:
  - source_labels: [__meta_kubernetes_pod_label_k8s_app]
    regex: calico-node
    action: keep
  - source_labels: [__address__]
    regex: (.+):\d+
    replacement: ${1}:9091
    target_label: __address__
- job_name: calico-typha
  kubernetes_sd_configs:
  - role: pod
  relabel_configs:
  - source_labels: [__meta_kubernetes_pod_label_k8s_app]
    regex: calico-typha
    action: keep
  - source_labels: [__address__]
    regex: (.+):\d+
    replacement: ${1}:9093
    target_label: __address__
"#
    .to_owned()
}

fn config_map(namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(MONITORING_CONFIG_NAME.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: managed_labels(),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from_iter([(
            "scrape_config".to_owned(),
            scrape_config(),
        )])),
        ..Default::default()
    }
}

/// Apply the monitoring config map into the control plane namespace.
pub async fn apply(client: &Client, namespace: &str) -> Result<(), kube::error::Error> {
    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    config_maps
        .patch(
            MONITORING_CONFIG_NAME,
            &serverside,
            &Patch::Apply(config_map(namespace)),
        )
        .await?;
    Ok(())
}

/// Delete the monitoring config map. Absence is not an error.
pub async fn delete(client: &Client, namespace: &str) -> Result<(), kube::error::Error> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    match config_maps
        .delete(MONITORING_CONFIG_NAME, &DeleteParams::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::error::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}
