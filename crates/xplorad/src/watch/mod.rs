mod state;
mod telemetry;

use serde::Serialize;

pub use state::ChangeSet;
pub use state::CommandField;
pub use state::Field;
pub use state::Position;
pub use state::WatchId;
pub use state::WatchState;
pub use telemetry::HomeFix;
pub use telemetry::Observation;
pub use telemetry::RawTelemetry;

#[cfg(test)]
pub(crate) use state::sample_state;

/// Whether entities for a watch may show data at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    /// A persistent failure stopped polling; stale data must not be shown.
    Unavailable,
}

/// Read-only view of one watch handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchSnapshot {
    pub id: WatchId,
    /// `None` until the first successful poll.
    pub state: Option<WatchState>,
    pub availability: Availability,
}

impl WatchSnapshot {
    pub fn revision(&self) -> u64 {
        self.state.as_ref().map(|s| s.revision).unwrap_or(0)
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}

/// Receiver of per-watch change notifications.
///
/// Called by the coordinator when the watch's revision advances or its
/// availability changes, while the coordinator still holds the watch. Must
/// not block.
pub trait WatchObserver: Send + Sync {
    fn on_state_change(&self, snapshot: &WatchSnapshot);
}
