//! Reconciliation of the Network CRD.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::stream::StreamExt;
use kube::{
    client::Client,
    runtime::{
        controller::Action,
        finalizer::{self, finalizer},
        watcher, Controller,
    },
    Api, ResourceExt,
};
use tracing::{debug, error, warn};

use crate::features::FeatureGates;
use crate::network::{
    charts::ChartRenderer,
    cluster::ClusterFacts,
    derive, managed_resource, monitoring,
    overlay::{self, NodeRoutes},
    status, validation,
    values::{self, ValuesError, CALICO_CONFIG_KEY, RELEASE_NAME},
    Cluster, IpFamily, Network, NetworkConfig, OperationType,
};

/// Name of the managed resource carrying the rendered calico chart.
pub const MANAGED_RESOURCE_NAME: &str = "extension-networking-calico-config";

const FINALIZER_NAME: &str = "extensions.gardener.cloud/networking-calico";
// namespace the chart release targets inside the shoot
const SHOOT_SYSTEM_NAMESPACE: &str = "kube-system";
const WAIT_TIMEOUT: Duration = Duration::from_secs(120);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(300);
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Operator context handed to every reconcile pass.
///
/// The renderer and the node route source are injected so the reconcile
/// logic stays independent of the chart location and the target cluster.
pub struct Context<R, N> {
    /// Kube client of the seed cluster.
    pub client: Client,
    /// Renderer for the calico chart.
    pub renderer: R,
    /// Route-readiness source for the overlay switch gate.
    pub node_routes: N,
    /// Component image lookup.
    pub images: crate::network::images::ImageVector,
    /// Feature gates resolved at startup.
    pub gates: FeatureGates,
}

impl<R, N> Context<R, N> {
    /// Create a new context.
    pub fn new(
        client: Client,
        renderer: R,
        node_routes: N,
        images: crate::network::images::ImageVector,
        gates: FeatureGates,
    ) -> Self {
        Self {
            client,
            renderer,
            node_routes,
            images,
            gates,
        }
    }
}

/// Errors produced by the reconcile function.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Application error.
    #[error("App error: {source}")]
    App {
        /// The underlying error.
        #[from]
        source: anyhow::Error,
    },
    /// API server error.
    #[error("Kube error: {source}")]
    Kube {
        /// The underlying error.
        #[from]
        source: kube::Error,
    },
    /// The provider config bytes did not decode.
    #[error("could not decode network config: {0}")]
    Decode(String),
    /// The provider config violates the value grammar.
    #[error("invalid network config: {0}")]
    InvalidConfig(String),
    /// The cluster declares a forbidden combination.
    #[error("{0}")]
    Forbidden(validation::FieldError),
    /// Chart value compilation failed.
    #[error("error when generating calico config: {0}")]
    Values(#[from] ValuesError),
    /// The overlay switch gate is waiting on node routes.
    #[error("waiting for all nodes to report created pod routes before disabling the overlay")]
    RoutesNotReady,
    /// Finalizer handling failed.
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<Error>>),
}

fn on_error<R, N>(_network: Arc<Network>, error: &Error, _context: Arc<Context<R, N>>) -> Action {
    error!(?error, "reconcile error");
    Action::requeue(ERROR_REQUEUE)
}

/// Start the controller for the Network CRD. Runs until the process stops.
pub async fn run<R, N>(context: Arc<Context<R, N>>)
where
    R: ChartRenderer + 'static,
    N: NodeRoutes + Send + Sync + 'static,
{
    let networks: Api<Network> = Api::all(context.client.clone());

    Controller::new(networks, watcher::Config::default())
        .run(reconcile, on_error, context)
        .for_each(|rec_res| async move {
            match rec_res {
                Ok((network, _)) => {
                    debug!(network.name, "reconcile success");
                }
                Err(err) => {
                    error!(?err, "reconcile error")
                }
            }
        })
        .await;
}

/// Perform a reconcile pass for the Network CRD.
async fn reconcile<R, N>(
    network: Arc<Network>,
    ctx: Arc<Context<R, N>>,
) -> Result<Action, Error>
where
    R: ChartRenderer + 'static,
    N: NodeRoutes + Send + Sync + 'static,
{
    let namespace = network.namespace().unwrap_or_default();
    let api: Api<Network> = Api::namespaced(ctx.client.clone(), &namespace);
    let ctx = ctx.clone();
    finalizer(&api, FINALIZER_NAME, network, |event| async move {
        match event {
            finalizer::Event::Apply(network) => apply_network(network, ctx).await,
            finalizer::Event::Cleanup(network) => cleanup_network(network, ctx).await,
        }
    })
    .await
    .map_err(|err| Error::Finalizer(Box::new(err)))
}

async fn apply_network<R, N>(
    network: Arc<Network>,
    ctx: Arc<Context<R, N>>,
) -> Result<Action, Error>
where
    R: ChartRenderer,
    N: NodeRoutes + Send + Sync,
{
    let namespace = network.namespace().unwrap_or_default();
    debug!(%namespace, "reconcile network");

    let clusters: Api<Cluster> = Api::all(ctx.client.clone());
    let cluster = clusters.get(&namespace).await?;
    let facts = ClusterFacts::gather(&network, &cluster, &ctx.gates);

    match build_and_publish(&network, facts, &namespace, &ctx).await {
        Ok(ip_families) => {
            status::report_success(&ctx.client, &network, &ip_families).await?;
            Ok(Action::requeue(RECONCILE_INTERVAL))
        }
        Err(err) => {
            if let Err(status_err) = status::report_error(
                &ctx.client,
                &network,
                OperationType::Reconcile,
                &err.to_string(),
            )
            .await
            {
                warn!(?status_err, "could not write error status");
            }
            Err(err)
        }
    }
}

/// Compile the chart values, publish the rendered manifest and apply the
/// monitoring config. Returns the IP families that were configured.
async fn build_and_publish<R, N>(
    network: &Network,
    facts: ClusterFacts,
    namespace: &str,
    ctx: &Context<R, N>,
) -> Result<Vec<IpFamily>, Error>
where
    R: ChartRenderer,
    N: NodeRoutes + Send + Sync,
{
    let config = decode_network_config(network)?;
    if let Some(config) = &config {
        let errors = validation::validate_network_config(config, "config");
        if !errors.is_empty() {
            return Err(Error::InvalidConfig(validation::aggregate(&errors)));
        }
    }

    let facts = derive::gate_dual_stack(facts);
    let config = derive::with_node_autodetection(config, &facts);

    let desired_overlay = overlay::desired_overlay_enabled(config.as_ref());
    let mut routes_pending = false;
    let config = if ctx.gates.seamless_overlay_switch && !desired_overlay {
        let current = overlay::probe_current_overlay(
            &ctx.client,
            namespace,
            &managed_resource::secret_name(MANAGED_RESOURCE_NAME),
            CALICO_CONFIG_KEY,
        )
        .await;
        if overlay::switch_in_progress(desired_overlay, current)
            && !ctx.node_routes.all_routes_created().await?
        {
            // keep encapsulating until every node has its routes
            routes_pending = true;
            config.map(overlay::force_overlay_enabled)
        } else {
            config
        }
    } else {
        config
    };

    let config = derive::with_overlay_settings(config, &facts);
    derive::check_kube_proxy_dataplane(config.as_ref(), &facts).map_err(Error::Forbidden)?;

    let chart_values = values::compute_chart_values(config.as_ref(), &facts, &ctx.images)?;
    let manifest = ctx
        .renderer
        .render(RELEASE_NAME, SHOOT_SYSTEM_NAMESPACE, &chart_values.to_value())?;

    let data = BTreeMap::from_iter([(CALICO_CONFIG_KEY.to_owned(), manifest)]);
    managed_resource::create_for_shoot(&ctx.client, namespace, MANAGED_RESOURCE_NAME, data)
        .await?;
    managed_resource::wait_until_healthy(
        &ctx.client,
        namespace,
        MANAGED_RESOURCE_NAME,
        WAIT_TIMEOUT,
    )
    .await?;

    monitoring::apply(&ctx.client, namespace).await?;

    if routes_pending {
        return Err(Error::RoutesNotReady);
    }
    Ok(facts.ip_families)
}

async fn cleanup_network<R, N>(
    network: Arc<Network>,
    ctx: Arc<Context<R, N>>,
) -> Result<Action, Error> {
    let namespace = network.namespace().unwrap_or_default();
    debug!(%namespace, "delete network");

    // monitoring first, it has no finalizer protection of its own
    monitoring::delete(&ctx.client, &namespace).await?;
    managed_resource::delete(&ctx.client, &namespace, MANAGED_RESOURCE_NAME).await?;

    let clusters: Api<Cluster> = Api::all(ctx.client.clone());
    let force_deletion = clusters
        .get_opt(&namespace)
        .await?
        .map(|cluster| cluster.spec.shoot.force_deletion.unwrap_or(false));
    if force_deletion == Some(false) {
        managed_resource::wait_until_deleted(
            &ctx.client,
            &namespace,
            MANAGED_RESOURCE_NAME,
            WAIT_TIMEOUT,
        )
        .await?;
    }

    Ok(Action::await_change())
}

fn decode_network_config(network: &Network) -> Result<Option<NetworkConfig>, Error> {
    let Some(raw) = &network.spec.provider_config else {
        return Ok(None);
    };
    serde_json::from_value(raw.clone())
        .map(Some)
        .map_err(|err| Error::Decode(err.to_string()))
}
