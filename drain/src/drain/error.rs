use super::PodIdentity;
use crate::client::ClientError;

use snafu::Snafu;
use tokio::time::Duration;

/// The drain result type.
pub type Result<T> = std::result::Result<T, DrainError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DrainError {
    #[snafu(display("Node '{}' does not exist.", node_name))]
    NodeNotFound { node_name: String },

    #[snafu(display("Unable to look up Node '{}': '{}'", node_name, source))]
    GetNode {
        source: ClientError,
        node_name: String,
    },

    #[snafu(display("Node '{}' is already unschedulable; refusing to drain it again.", node_name))]
    AlreadyDrained { node_name: String },

    #[snafu(display("Unable to cordon Node '{}': '{}'", node_name, source))]
    Cordon {
        source: ClientError,
        node_name: String,
    },

    #[snafu(display("Unable to uncordon Node '{}': '{}'", node_name, source))]
    Uncordon {
        source: ClientError,
        node_name: String,
    },

    #[snafu(display(
        "Unable to find drainable Pods for Node '{}' while listing {}: '{}'",
        node_name,
        listing,
        source
    ))]
    ClassificationFailed {
        source: ClientError,
        node_name: String,
        listing: &'static str,
    },

    #[snafu(display("Drain of Node '{}' failed: {}", node_name, source))]
    Eviction {
        source: EvictionError,
        node_name: String,
    },

    #[snafu(display(
        "Node '{}' was not drained within the {:.2}s deadline ({:.2}s elapsed).",
        node_name,
        deadline.as_secs_f64(),
        elapsed.as_secs_f64()
    ))]
    DrainTimeout {
        node_name: String,
        deadline: Duration,
        elapsed: Duration,
    },

    #[snafu(display("Drain of Node '{}' was cancelled.", node_name))]
    Cancelled { node_name: String },
}

/// Terminal failures of a single Pod's eviction.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EvictionError {
    #[snafu(display("Eviction of Pod '{}' was rejected: '{}'", pod, source))]
    /// The API server refused the eviction with an error that will not go away by retrying.
    EvictionRejected {
        source: ClientError,
        pod: PodIdentity,
    },

    #[snafu(display(
        "Eviction of Pod '{}' was still rate limited after {} retries. Check the Pod's PodDisruptionBudgets.",
        pod,
        retries
    ))]
    RetriesExhausted { pod: PodIdentity, retries: u32 },

    #[snafu(display("Could not determine whether Pod '{}' has been deleted: '{}'", pod, source))]
    ConfirmRemoval {
        source: ClientError,
        pod: PodIdentity,
    },

    #[snafu(display(
        "Pod '{}' was not deleted in the time allocated ({:.2}s).",
        pod,
        max_wait.as_secs_f64()
    ))]
    WaitForDeletion { pod: PodIdentity, max_wait: Duration },

    #[snafu(display("Eviction of Pod '{}' was cancelled.", pod))]
    AttemptCancelled { pod: PodIdentity },
}

impl EvictionError {
    /// The Pod this failure belongs to.
    pub fn pod(&self) -> &PodIdentity {
        match self {
            Self::EvictionRejected { pod, .. }
            | Self::RetriesExhausted { pod, .. }
            | Self::ConfirmRemoval { pod, .. }
            | Self::WaitForDeletion { pod, .. }
            | Self::AttemptCancelled { pod } => pod,
        }
    }
}
