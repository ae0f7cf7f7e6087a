use snafu::Snafu;

/// The client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type representing issues talking to the Kubernetes API during a drain.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    #[snafu(display("Unable to get Node '{}': '{}'", node_name, source))]
    GetNode {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display(
        "Unable to set schedulability of Node '{}' to '{}': '{}'",
        node_name,
        schedulable,
        source
    ))]
    PatchNodeSchedulability {
        source: kube::Error,
        node_name: String,
        schedulable: bool,
    },

    #[snafu(display("Unable to list Pods bound to Node '{}': '{}'", node_name, source))]
    ListPods {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display("Unable to list DaemonSets: '{}'", source))]
    ListDaemonSets { source: kube::Error },

    #[snafu(display("Unable to create eviction for Pod '{}': '{}'", pod_name, source))]
    CreateEviction {
        source: kube::Error,
        pod_name: String,
    },

    #[snafu(display("Unable to get Pod '{}': '{}'", pod_name, source))]
    GetPod {
        source: kube::Error,
        pod_name: String,
    },
}

impl ClientError {
    fn source_error(&self) -> &kube::Error {
        match self {
            Self::GetNode { source, .. }
            | Self::PatchNodeSchedulability { source, .. }
            | Self::ListPods { source, .. }
            | Self::ListDaemonSets { source }
            | Self::CreateEviction { source, .. }
            | Self::GetPod { source, .. } => source,
        }
    }

    /// The HTTP status code returned by the API server, if the request got that far.
    pub fn status_code(&self) -> Option<u16> {
        match self.source_error() {
            kube::Error::Api(response) => Some(response.code),
            _ => None,
        }
    }
}
