//! Status reporting for the watched network resource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::{
    api::{Patch, PatchParams},
    client::Client,
    Api, ResourceExt,
};

use crate::network::{
    IpFamily, LastOperation, Network, NetworkStatus, OperationState, OperationType, ProviderStatus,
};

fn last_operation(
    operation_type: OperationType,
    state: OperationState,
    progress: i32,
    description: &str,
) -> LastOperation {
    LastOperation {
        operation_type,
        state,
        progress,
        description: description.to_owned(),
        last_update_time: Some(Time(Utc::now())),
    }
}

/// The status written after a successful reconciliation.
///
/// Families reflect what was actually compiled into the applied config, not
/// the raw cluster declaration; a gated dual-stack cluster reports only its
/// primary family until the migration finished.
pub fn success_status(ip_families: &[IpFamily]) -> NetworkStatus {
    let provider_status = ProviderStatus::new(ip_families.to_vec());
    NetworkStatus {
        ip_families: Some(ip_families.to_vec()),
        last_operation: Some(last_operation(
            OperationType::Reconcile,
            OperationState::Succeeded,
            100,
            "Calico was configured successfully",
        )),
        provider_status: Some(
            serde_json::to_value(provider_status).expect("provider status serializes"),
        ),
    }
}

/// The status written when an operation failed.
pub fn error_status(operation_type: OperationType, description: &str) -> NetworkStatus {
    NetworkStatus {
        ip_families: None,
        last_operation: Some(last_operation(
            operation_type,
            OperationState::Error,
            50,
            description,
        )),
        provider_status: None,
    }
}

async fn patch_status(
    client: &Client,
    network: &Network,
    status: NetworkStatus,
) -> Result<(), kube::error::Error> {
    let namespace = network.namespace().unwrap_or_default();
    let networks: Api<Network> = Api::namespaced(client.clone(), &namespace);
    let mut patch = serde_json::json!({ "status": &status });
    if status_keeps_families(&status) {
        // merge patches drop absent keys, keep the previously reported
        // families on error statuses
        patch["status"]
            .as_object_mut()
            .expect("status is an object")
            .remove("ipFamilies");
        patch["status"]
            .as_object_mut()
            .expect("status is an object")
            .remove("providerStatus");
    }
    networks
        .patch_status(
            &network.name_any(),
            &PatchParams::default(),
            &Patch::Merge(patch),
        )
        .await?;
    Ok(())
}

fn status_keeps_families(status: &NetworkStatus) -> bool {
    status.ip_families.is_none()
}

/// Report a successful reconciliation.
pub async fn report_success(
    client: &Client,
    network: &Network,
    ip_families: &[IpFamily],
) -> Result<(), kube::error::Error> {
    patch_status(client, network, success_status(ip_families)).await
}

/// Report a failed operation.
pub async fn report_error(
    client: &Client,
    network: &Network,
    operation_type: OperationType,
    description: &str,
) -> Result<(), kube::error::Error> {
    patch_status(client, network, error_status(operation_type, description)).await
}
