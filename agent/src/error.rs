use crate::telemetry::TelemetryConfigError;
use node_drain::config::config_error;
use node_drain::DrainError;
use snafu::Snafu;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to create client: '{}'", source))]
    ClientCreate { source: kube::Error },

    #[snafu(display("Invalid drain configuration: '{}'", source))]
    DrainConfig { source: config_error::Error },

    #[snafu(display(
        "Unable to get associated node name: pass '--node' or set 'MY_NODE_NAME': {}",
        source
    ))]
    GetNodeName { source: std::env::VarError },

    #[snafu(display("Unable to drain Node '{}': '{}'", node_name, source))]
    Drain {
        source: DrainError,
        node_name: String,
    },

    #[snafu(display("Unable to uncordon Node '{}': '{}'", node_name, source))]
    Uncordon {
        source: DrainError,
        node_name: String,
    },

    #[snafu(display("Error configuring tracing: '{}'", source))]
    TelemetryInit { source: TelemetryConfigError },
}
