//! Feature gates of the operator.
//!
//! Gates are plain configuration resolved once at startup and handed to the
//! controller context; there is no global registry.

/// Optional behavior toggles, wired up from CLI flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGates {
    /// Run the long-lived calico-node container in non-privileged and non-root mode.
    pub non_privileged_calico_node: bool,
    /// Validate node routes before disabling overlay networking.
    pub seamless_overlay_switch: bool,
}
