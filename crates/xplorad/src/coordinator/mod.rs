mod alert;
mod backoff;
#[allow(clippy::module_inception)]
mod coordinator;

pub use alert::Alert;
pub use alert::AlertKind;
pub use alert::AlertSink;
pub use alert::LogAlertSink;
#[cfg(test)]
pub(crate) use alert::RecordingAlertSink;
pub use backoff::Backoff;
pub use coordinator::CommandRelay;
pub use coordinator::Coordinator;
pub use coordinator::CoordinatorSettings;
pub use coordinator::RefreshOutcome;
pub use coordinator::WatchHealth;

use crate::remote::RemoteError;
use crate::watch::CommandField;
use crate::watch::WatchId;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no watches configured")]
    NoWatches,

    #[error("watch {0} is not configured")]
    UnknownWatch(WatchId),
}

/// Why a switch command did not take effect.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("watch {0} is not configured")]
    UnknownWatch(WatchId),

    #[error("watch {0} has not reported any state yet")]
    NotReady(WatchId),

    #[error("watch {watch} is unavailable: {reason}")]
    Unavailable { watch: WatchId, reason: String },

    #[error("{field} command for watch {watch} was rejected")]
    Rejected {
        watch: WatchId,
        field: CommandField,
        #[source]
        source: RemoteError,
    },

    #[error("coordinator has shut down")]
    CoordinatorGone,
}
