//! This module defines a ClusterClient implementation that wraps another and rate-limits API calls.
//!
//! A drain fans out evictions and deletion checks for every Pod on a Node at once, which can add up to a burst of
//! requests against the Kubernetes API server. Wrapping the client keeps that burst under a fixed budget.
use super::{ClusterClient, EvictionResponse, Result};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use k8s_openapi::api::{
    apps::v1::DaemonSet,
    core::v1::{Node, Pod},
};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{event, Level};

#[derive(Clone)]
pub struct RateLimitedClusterClient<C: ClusterClient> {
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    wrapped_client: C,
}

impl<C: ClusterClient> RateLimitedClusterClient<C> {
    pub fn new(wrapped_client: C, requests_per_second: NonZeroU32) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second))),
            wrapped_client,
        }
    }

    async fn rate_limit(&self) {
        if let Err(not_until) = self.rate_limiter.check() {
            event!(
                Level::DEBUG,
                "Rate limited while calling the Kubernetes API: {}.",
                not_until
            );
            self.rate_limiter.until_ready().await;
        }
    }
}

#[async_trait]
impl<C: ClusterClient> ClusterClient for RateLimitedClusterClient<C> {
    async fn get_node(&self, node_name: &str) -> Result<Option<Node>> {
        self.rate_limit().await;
        self.wrapped_client.get_node(node_name).await
    }

    async fn patch_node_schedulability(&self, node_name: &str, schedulable: bool) -> Result<()> {
        self.rate_limit().await;
        self.wrapped_client
            .patch_node_schedulability(node_name, schedulable)
            .await
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        self.rate_limit().await;
        self.wrapped_client.list_pods_on_node(node_name).await
    }

    async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>> {
        self.rate_limit().await;
        self.wrapped_client.list_daemon_sets().await
    }

    async fn request_eviction(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<EvictionResponse> {
        self.rate_limit().await;
        self.wrapped_client
            .request_eviction(namespace, pod_name)
            .await
    }

    async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>> {
        self.rate_limit().await;
        self.wrapped_client.get_pod(namespace, pod_name).await
    }
}
