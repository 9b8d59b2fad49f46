//! Managed resource sink.
//!
//! Rendered manifests are not applied into the shoot directly; they are
//! wrapped into a ManagedResource plus data secret which the gardener
//! resource-manager inside the seed picks up and applies.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{LocalObjectReference, Secret};
use k8s_openapi::ByteString;
use kube::{
    api::{DeleteParams, Patch, PatchParams},
    client::Client,
    core::ObjectMeta,
    Api, CustomResource,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::managed_labels;
use crate::CONTROLLER_NAME;

/// Interval between polls while waiting on a managed resource.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A set of manifests applied into the shoot by the resource-manager.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "resources.gardener.cloud",
    version = "v1alpha1",
    kind = "ManagedResource",
    plural = "managedresources",
    namespaced,
    status = "ManagedResourceStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    /// Resource class picked up by the responsible resource-manager.
    pub class: Option<String>,
    /// Secrets holding the manifests to apply.
    pub secret_refs: Vec<LocalObjectReference>,
    /// Keep the applied objects when the managed resource is deleted.
    pub keep_objects: Option<bool>,
}

/// Observed state of a managed resource.
#[derive(Default, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceStatus {
    /// Apply/health conditions reported by the resource-manager.
    pub conditions: Option<Vec<ResourceCondition>>,
    /// Generation the conditions refer to.
    pub observed_generation: Option<i64>,
}

/// A single managed resource condition.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCondition {
    /// Condition type, e.g. ResourcesApplied.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Condition status, True/False/Unknown.
    pub status: String,
}

/// Name of the secret backing a managed resource.
pub fn secret_name(name: &str) -> String {
    format!("managedresource-{name}")
}

/// Whether the resource-manager reports the resource applied and healthy.
pub fn is_healthy(resource: &ManagedResource) -> bool {
    let Some(conditions) = resource
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
    else {
        return false;
    };
    let condition_true = |condition_type: &str| {
        conditions
            .iter()
            .any(|c| c.condition_type == condition_type && c.status == "True")
    };
    condition_true("ResourcesApplied") && condition_true("ResourcesHealthy")
}

/// Create or update a managed resource holding the given manifests.
pub async fn create_for_shoot(
    client: &Client,
    namespace: &str,
    name: &str,
    data: BTreeMap<String, Vec<u8>>,
) -> Result<(), kube::error::Error> {
    let serverside = PatchParams::apply(CONTROLLER_NAME);
    let secret_name = secret_name(name);

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(namespace.to_owned()),
            labels: managed_labels(),
            ..ObjectMeta::default()
        },
        data: Some(
            data.into_iter()
                .map(|(key, bytes)| (key, ByteString(bytes)))
                .collect(),
        ),
        ..Default::default()
    };
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    secrets
        .patch(&secret_name, &serverside, &Patch::Apply(secret))
        .await?;

    let mut resource = ManagedResource::new(
        name,
        ManagedResourceSpec {
            class: None,
            secret_refs: vec![LocalObjectReference {
                name: Some(secret_name),
            }],
            keep_objects: Some(false),
        },
    );
    resource.metadata.namespace = Some(namespace.to_owned());
    resource.metadata.labels = managed_labels();
    let resources: Api<ManagedResource> = Api::namespaced(client.clone(), namespace);
    resources
        .patch(name, &serverside, &Patch::Apply(resource))
        .await?;

    Ok(())
}

/// Delete the managed resource and its data secret. Absence is not an error.
pub async fn delete(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<(), kube::error::Error> {
    let resources: Api<ManagedResource> = Api::namespaced(client.clone(), namespace);
    ignore_not_found(resources.delete(name, &DeleteParams::default()).await)?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    ignore_not_found(
        secrets
            .delete(&secret_name(name), &DeleteParams::default())
            .await,
    )?;
    Ok(())
}

fn ignore_not_found<T>(result: Result<T, kube::error::Error>) -> Result<(), kube::error::Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::error::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

/// Wait until the resource-manager reports the resource healthy.
pub async fn wait_until_healthy(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let resources: Api<ManagedResource> = Api::namespaced(client.clone(), namespace);
    let wait = async {
        loop {
            if let Some(resource) = resources.get_opt(name).await? {
                if is_healthy(&resource) {
                    return Ok::<_, kube::error::Error>(());
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(anyhow::anyhow!(
            "managed resource {namespace}/{name} did not get healthy"
        )),
    }
}

/// Wait until the managed resource is gone.
pub async fn wait_until_deleted(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let resources: Api<ManagedResource> = Api::namespaced(client.clone(), namespace);
    let wait = async {
        loop {
            if resources.get_opt(name).await?.is_none() {
                return Ok::<_, kube::error::Error>(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(anyhow::anyhow!(
            "managed resource {namespace}/{name} was not deleted"
        )),
    }
}
