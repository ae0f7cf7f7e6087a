pub mod error;
mod kubeclient;
mod ratelimited;

pub use error::{ClientError, Result};
pub use kubeclient::K8SClusterClient;
pub use ratelimited::RateLimitedClusterClient;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::{Node, Pod},
};
use std::sync::Arc;

#[cfg(any(feature = "mockall", test))]
use mockall::mock;

/// How the API server answered a request to evict a Pod.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EvictionResponse {
    /// The eviction was admitted.
    Accepted,
    /// The Pod no longer exists.
    NotFound,
    /// The eviction was refused for now, usually while waiting on a PodDisruptionBudget.
    RateLimited,
}

#[async_trait]
/// The cluster operations needed to drain a node. This is provided as a trait in order to allow mocks
/// to be used for testing purposes.
pub trait ClusterClient: Send + Sync {
    /// Fetch a Node, returning `None` if it does not exist.
    async fn get_node(&self, node_name: &str) -> Result<Option<Node>>;
    /// Mark a Node schedulable or unschedulable.
    async fn patch_node_schedulability(&self, node_name: &str, schedulable: bool) -> Result<()>;
    /// List every Pod bound to the given Node, across all namespaces.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
    /// List every DaemonSet in the cluster.
    async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>>;
    /// Ask the API server to evict a Pod. Evictions respect PodDisruptionBudgets, unlike deletes.
    async fn request_eviction(&self, namespace: &str, pod_name: &str)
        -> Result<EvictionResponse>;
    /// Fetch a Pod, returning `None` if it does not exist.
    async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>>;
}

#[cfg(any(feature = "mockall", test))]
mock! {
    /// A Mock ClusterClient for use in tests.
    pub ClusterClient {}
    #[async_trait]
    impl ClusterClient for ClusterClient {
        async fn get_node(&self, node_name: &str) -> Result<Option<Node>>;
        async fn patch_node_schedulability(&self, node_name: &str, schedulable: bool) -> Result<()>;
        async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
        async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>>;
        async fn request_eviction(&self, namespace: &str, pod_name: &str)
            -> Result<EvictionResponse>;
        async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>>;
    }
}

#[async_trait]
impl<T> ClusterClient for Arc<T>
where
    T: ClusterClient,
{
    async fn get_node(&self, node_name: &str) -> Result<Option<Node>> {
        (**self).get_node(node_name).await
    }

    async fn patch_node_schedulability(&self, node_name: &str, schedulable: bool) -> Result<()> {
        (**self)
            .patch_node_schedulability(node_name, schedulable)
            .await
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        (**self).list_pods_on_node(node_name).await
    }

    async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>> {
        (**self).list_daemon_sets().await
    }

    async fn request_eviction(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<EvictionResponse> {
        (**self).request_eviction(namespace, pod_name).await
    }

    async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>> {
        (**self).get_pod(namespace, pod_name).await
    }
}
