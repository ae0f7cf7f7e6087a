use super::{error, ClusterClient, EvictionResponse, Result};

use async_trait::async_trait;
use http::StatusCode;
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::{Node, Pod},
};
use kube::api::{Api, EvictParams, ListParams};
use snafu::ResultExt;
use tracing::{event, instrument, Level};

#[derive(Clone)]
/// Concrete implementation of the `ClusterClient` trait backed by the Kubernetes API. This implementation
/// will almost certainly be used in any case that isn't a unit test.
pub struct K8SClusterClient {
    k8s_client: kube::Client,
}

impl K8SClusterClient {
    pub fn new(k8s_client: kube::Client) -> Self {
        K8SClusterClient { k8s_client }
    }

    fn pod_api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.k8s_client.clone(), namespace)
    }
}

fn status_of(err: &kube::Error) -> Option<StatusCode> {
    match err {
        kube::Error::Api(response) => StatusCode::from_u16(response.code).ok(),
        _ => None,
    }
}

#[async_trait]
impl ClusterClient for K8SClusterClient {
    #[instrument(skip(self), err)]
    async fn get_node(&self, node_name: &str) -> Result<Option<Node>> {
        let nodes: Api<Node> = Api::all(self.k8s_client.clone());
        nodes
            .get_opt(node_name)
            .await
            .context(error::GetNodeSnafu { node_name })
    }

    /// Kubernetes has no server-side drain, but `kube-rs` does provide cordon and uncordon patches.
    #[instrument(skip(self), err)]
    async fn patch_node_schedulability(&self, node_name: &str, schedulable: bool) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.k8s_client.clone());
        let patched = if schedulable {
            nodes.uncordon(node_name).await
        } else {
            nodes.cordon(node_name).await
        };
        patched.context(error::PatchNodeSchedulabilitySnafu {
            node_name,
            schedulable,
        })?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.k8s_client.clone());
        let node_pods = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", node_name)))
            .await
            .context(error::ListPodsSnafu { node_name })?;

        Ok(node_pods.items)
    }

    #[instrument(skip(self), err)]
    async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>> {
        let daemon_sets: Api<DaemonSet> = Api::all(self.k8s_client.clone());
        let daemon_sets = daemon_sets
            .list(&ListParams::default())
            .await
            .context(error::ListDaemonSetsSnafu)?;

        Ok(daemon_sets.items)
    }

    /// When evicting a Pod, a 429 (TOO_MANY_REQUESTS) response code is used to indicate that we must wait to allow a
    /// PodDisruptionBudget (PDB) to be satisfied. A 404 means the Pod is already gone. Every other failure is handed
    /// back to the caller, which decides whether it is fatal.
    #[instrument(skip(self), err)]
    async fn request_eviction(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<EvictionResponse> {
        match self
            .pod_api(namespace)
            .evict(pod_name, &EvictParams::default())
            .await
        {
            Ok(_) => Ok(EvictionResponse::Accepted),
            Err(e) => match status_of(&e) {
                Some(StatusCode::NOT_FOUND) => Ok(EvictionResponse::NotFound),
                Some(StatusCode::TOO_MANY_REQUESTS) => {
                    event!(
                        Level::DEBUG,
                        "Eviction of Pod '{}/{}' refused for now: '{}'",
                        namespace,
                        pod_name,
                        e
                    );
                    Ok(EvictionResponse::RateLimited)
                }
                _ => Err(e).context(error::CreateEvictionSnafu {
                    pod_name: format!("{}/{}", namespace, pod_name),
                }),
            },
        }
    }

    #[instrument(skip(self), err)]
    async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>> {
        self.pod_api(namespace)
            .get_opt(pod_name)
            .await
            .context(error::GetPodSnafu {
                pod_name: format!("{}/{}", namespace, pod_name),
            })
    }
}
