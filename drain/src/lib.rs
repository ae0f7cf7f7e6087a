//! Cordons a Kubernetes node and evicts its workloads ahead of maintenance.
//!
//! [`NodeDrainer`] is the entry point. It talks to the cluster through a [`client::ClusterClient`], which is
//! implemented for a real cluster by [`client::K8SClusterClient`] and can be mocked in tests with the `mockall`
//! feature.
pub mod client;
pub mod config;
pub mod constants;
pub mod drain;

pub use config::DrainConfig;
pub use drain::{
    DrainError, DrainSummary, EvictionError, EvictionOutcome, NodeDrainer, PodIdentity, SkipReason,
};
