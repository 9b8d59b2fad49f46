//! Daemon entry point of the calico networking operator.
#![deny(missing_docs)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kube::client::Client;
use opentelemetry::global::shutdown_tracer_provider;
use tracing::info;

use calico_operator::features::FeatureGates;
use calico_operator::network::{
    self, charts::TeraRenderer, images::ImageVector, overlay::ClusterNodeRoutes, Context,
};
use calico_operator::webhook;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(
        long,
        env = "OPERATOR_OTLP_ENDPOINT",
        default_value = "http://localhost:4317"
    )]
    otlp_endpoint: String,

    /// Directory holding the calico chart templates.
    #[arg(long, env = "OPERATOR_CHARTS_DIR", default_value = "/charts/calico")]
    charts_dir: PathBuf,

    /// Optional image vector override file.
    #[arg(long, env = "OPERATOR_IMAGE_VECTOR")]
    image_vector: Option<PathBuf>,

    /// Listen address of the validating admission webhook.
    #[arg(long, env = "OPERATOR_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// Run the calico-node container non-privileged.
    #[arg(long, env = "OPERATOR_NON_PRIVILEGED_CALICO_NODE")]
    non_privileged_calico_node: bool,

    /// Validate node routes before disabling overlay networking.
    #[arg(long, env = "OPERATOR_SEAMLESS_OVERLAY_SWITCH")]
    seamless_overlay_switch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let _meter_provider = calico_common::telemetry::init(args.otlp_endpoint.clone()).await?;

    let client = Client::try_default().await?;
    let images = match &args.image_vector {
        Some(path) => ImageVector::from_yaml(&std::fs::read_to_string(path)?)?,
        None => ImageVector::default(),
    };
    let gates = FeatureGates {
        non_privileged_calico_node: args.non_privileged_calico_node,
        seamless_overlay_switch: args.seamless_overlay_switch,
    };
    let renderer = TeraRenderer::from_dir(&args.charts_dir)?;
    let node_routes = ClusterNodeRoutes::new(client.clone());
    let context = Arc::new(Context::new(
        client,
        renderer,
        node_routes,
        images,
        gates,
    ));

    info!(?gates, "starting network controller");
    let webhook_server = tokio::spawn(webhook::serve(args.webhook_addr));
    network::run(context).await;
    webhook_server.abort();

    shutdown_tracer_provider();
    Ok(())
}
