// ABOUTME: Remote change detection through the device's modification marker
// ABOUTME: Probe failures never count as a change, so errors can't trigger refetch storms

use super::{ChangeMarker, DeviceBridge};
use crate::error::ReplicatorError;

/// Result of one probe.
#[derive(Debug)]
pub enum ChangeCheck {
    /// Marker differs from the caller's (or the caller had none).
    Changed(ChangeMarker),
    Unchanged(ChangeMarker),
    /// Transient failure; treated as "not changed".
    ProbeFailed(ReplicatorError),
}

impl ChangeCheck {
    pub fn changed(&self) -> bool {
        matches!(self, ChangeCheck::Changed(_))
    }

    /// Marker observed by the probe, if it succeeded.
    pub fn marker(&self) -> Option<&ChangeMarker> {
        match self {
            ChangeCheck::Changed(m) | ChangeCheck::Unchanged(m) => Some(m),
            ChangeCheck::ProbeFailed(_) => None,
        }
    }
}

pub struct ChangeDetector<'a, B: DeviceBridge> {
    bridge: &'a B,
    remote_path: String,
}

impl<'a, B: DeviceBridge> ChangeDetector<'a, B> {
    pub fn new(bridge: &'a B, remote_path: impl Into<String>) -> Self {
        Self {
            bridge,
            remote_path: remote_path.into(),
        }
    }

    /// Compare the device's current marker with `current`.
    ///
    /// Stateless: the caller adopts the returned marker once it has fetched
    /// successfully, so a change keeps reporting `Changed` until it has been
    /// picked up and then never again.
    pub async fn has_changed(&self, current: Option<&ChangeMarker>) -> ChangeCheck {
        match self.bridge.modification_marker(&self.remote_path).await {
            Ok(marker) => {
                if current == Some(&marker) {
                    tracing::debug!("Remote marker unchanged ({})", marker);
                    ChangeCheck::Unchanged(marker)
                } else {
                    tracing::info!(
                        "Remote database changed (marker {} -> {})",
                        current.map_or("<none>", |m| m.as_str()),
                        marker
                    );
                    ChangeCheck::Changed(marker)
                }
            }
            Err(e) => {
                tracing::warn!("Change probe for {} failed: {}", self.remote_path, e);
                ChangeCheck::ProbeFailed(e)
            }
        }
    }
}
