//! Network is the k8s custom resource describing the Calico stack of a shoot cluster.

// Export all spec types
mod spec;
pub use spec::*;

// All other mods are behind the controller flag to keep the deps to a minimum
#[cfg(feature = "controller")]
pub mod charts;
#[cfg(feature = "controller")]
pub mod cluster;
#[cfg(feature = "controller")]
pub(crate) mod controller;
#[cfg(feature = "controller")]
pub mod derive;
#[cfg(feature = "controller")]
pub mod images;
#[cfg(feature = "controller")]
pub mod managed_resource;
#[cfg(feature = "controller")]
pub(crate) mod monitoring;
#[cfg(feature = "controller")]
pub mod overlay;
#[cfg(feature = "controller")]
pub(crate) mod status;
#[cfg(feature = "controller")]
pub mod validation;
#[cfg(feature = "controller")]
pub mod values;

#[cfg(feature = "controller")]
pub use controller::{run, Context, Error, MANAGED_RESOURCE_NAME};
