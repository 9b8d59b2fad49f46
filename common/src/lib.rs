//! Provides functions common to the operator binaries.
#![deny(missing_docs)]
#[cfg(feature = "telemetry")]
pub mod telemetry;
