//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Feature gates of the operator.
#[cfg(feature = "controller")]
pub mod features;
/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// Network module for managing the Calico stack of shoot clusters.
pub mod network;
/// Webhook module validating shoot specs before they are persisted.
#[cfg(feature = "controller")]
pub mod webhook;

/// A list of constants used in various K8s resources
#[cfg(feature = "controller")]
const CONTROLLER_NAME: &str = "calico-operator";
