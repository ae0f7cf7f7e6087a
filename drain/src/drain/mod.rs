//! Safely removes workloads from a node ahead of maintenance.
//!
//! A drain cordons the node, works out which of its Pods should be evicted, and then evicts them concurrently,
//! waiting for each to actually be deleted. See [`NodeDrainer::drain_node`].
mod classify;
mod coordinator;
mod cordon;
pub mod error;
mod evict;
mod pod;

pub use classify::{Classification, SkipReason};
pub use error::{DrainError, EvictionError};
pub use evict::EvictionOutcome;
pub use pod::PodIdentity;

use crate::client::ClusterClient;
use crate::config::{config_error, DrainConfig};

use snafu::ensure;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// What a successful drain did to each Pod on the node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub node_name: String,
    /// Pods left on the node, and why.
    pub skipped: BTreeMap<PodIdentity, SkipReason>,
    /// Every evicted Pod, and how it left.
    pub outcomes: BTreeMap<PodIdentity, EvictionOutcome>,
}

/// Drains nodes through a [`ClusterClient`] according to a [`DrainConfig`].
#[derive(Clone, Debug)]
pub struct NodeDrainer<C> {
    client: C,
    config: DrainConfig,
}

impl<C: ClusterClient> NodeDrainer<C> {
    /// Creates a drainer, rejecting configs that could never drain a node.
    pub fn new(client: C, config: DrainConfig) -> Result<Self, config_error::Error> {
        config.validate()?;
        Ok(NodeDrainer { client, config })
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Cordons `node_name` and evicts every Pod on it that is not static, mirror, or DaemonSet-managed.
    ///
    /// Returns once every evicted Pod has been observed to be deleted. The node is left cordoned whether or not the
    /// drain succeeds.
    pub async fn drain_node(&self, node_name: &str) -> error::Result<DrainSummary> {
        self.drain_node_with_cancellation(node_name, CancellationToken::new())
            .await
    }

    /// Like [`NodeDrainer::drain_node`], but gives up with [`DrainError::Cancelled`] once `cancel` fires.
    ///
    /// A token that is already cancelled leaves the node untouched. Cancellation during cordoning takes effect once
    /// the cordon patch has been sent, so the node is never left half-patched.
    #[instrument(skip(self, cancel), err)]
    pub async fn drain_node_with_cancellation(
        &self,
        node_name: &str,
        cancel: CancellationToken,
    ) -> error::Result<DrainSummary> {
        ensure!(
            !cancel.is_cancelled(),
            error::CancelledSnafu { node_name }
        );

        cordon::cordon_node(&self.client, node_name).await?;

        let Classification { evict, skipped } = tokio::select! {
            biased;
            _ = cancel.cancelled() => return error::CancelledSnafu { node_name }.fail(),
            classification = classify::find_target_pods(&self.client, node_name) => classification?,
        };
        event!(
            Level::INFO,
            "Found {} Pods to evict from Node '{}' ({} left in place).",
            evict.len(),
            node_name,
            skipped.len()
        );

        let outcomes = coordinator::evict_all(
            &self.client,
            &self.config,
            node_name,
            evict.into_iter().collect(),
            &cancel,
        )
        .await?;

        Ok(DrainSummary {
            node_name: node_name.to_string(),
            skipped,
            outcomes,
        })
    }

    /// Marks `node_name` schedulable again.
    pub async fn uncordon_node(&self, node_name: &str) -> error::Result<()> {
        cordon::uncordon_node(&self.client, node_name).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::{EvictionResponse, MockClusterClient};
    use crate::constants::CONFIG_SOURCE_ANNOTATION;
    use crate::drain::cordon::test::fake_node;
    use crate::drain::pod::test::{fake_pod, owned_by, with_annotations};

    use k8s_openapi::api::apps::v1::DaemonSet;
    use kube::api::ObjectMeta;
    use maplit::btreemap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{Duration, Instant};

    fn node_with_mixed_pods() -> MockClusterClient {
        let mut client = MockClusterClient::new();
        client
            .expect_get_node()
            .returning(|_| Ok(Some(fake_node("n1", None))));
        client
            .expect_patch_node_schedulability()
            .withf(|node_name, schedulable| node_name == "n1" && !*schedulable)
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_list_pods_on_node().returning(|_| {
            Ok(vec![
                with_annotations(
                    fake_pod("w1", "uid-w1"),
                    btreemap! { CONFIG_SOURCE_ANNOTATION.to_string() => "file".to_string() },
                ),
                owned_by(fake_pod("ds-x-abcde", "uid-w2"), "DaemonSet", "ds-x", "uid-ds-x"),
                fake_pod("w3", "uid-w3"),
            ])
        });
        client.expect_list_daemon_sets().returning(|| {
            Ok(vec![DaemonSet {
                metadata: ObjectMeta {
                    name: Some("ds-x".to_string()),
                    uid: Some("uid-ds-x".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }])
        });
        client
    }

    #[tokio::test(start_paused = true)]
    async fn only_ordinary_pods_are_evicted() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let polls = Arc::new(AtomicUsize::new(0));

        let mut client = node_with_mixed_pods();
        let eviction_count = evictions.clone();
        client
            .expect_request_eviction()
            .withf(|namespace, pod_name| namespace == "default" && pod_name == "w3")
            .returning(move |_, _| {
                eviction_count.fetch_add(1, Ordering::SeqCst);
                Ok(EvictionResponse::Accepted)
            });
        let poll_count = polls.clone();
        client.expect_get_pod().returning(move |_, pod_name| {
            if poll_count.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(fake_pod(pod_name, "uid-w3")))
            } else {
                Ok(None)
            }
        });

        let drainer = NodeDrainer::new(client, DrainConfig::new(Duration::from_secs(60))).unwrap();
        let start = Instant::now();
        let summary = drainer.drain_node("n1").await.unwrap();

        assert_eq!(evictions.load(Ordering::SeqCst), 3);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        assert_eq!(summary.node_name, "n1");
        assert_eq!(
            summary
                .outcomes
                .iter()
                .map(|(pod, outcome)| (pod.name.as_str(), *outcome))
                .collect::<Vec<_>>(),
            vec![("w3", EvictionOutcome::Removed)]
        );
        assert_eq!(
            summary
                .skipped
                .iter()
                .map(|(pod, reason)| (pod.name.as_str(), *reason))
                .collect::<Vec<_>>(),
            vec![("ds-x-abcde", SkipReason::DaemonSet), ("w1", SkipReason::Static)]
        );
    }

    #[tokio::test]
    async fn cancelled_drain_leaves_node_untouched() {
        let mut client = MockClusterClient::new();
        client.expect_get_node().never();
        client.expect_patch_node_schedulability().never();
        client.expect_list_pods_on_node().never();
        client.expect_list_daemon_sets().never();
        client.expect_request_eviction().never();

        let drainer = NodeDrainer::new(client, DrainConfig::new(Duration::from_secs(60))).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = drainer.drain_node_with_cancellation("n1", cancel).await;
        match result {
            Err(DrainError::Cancelled { node_name }) => assert_eq!(node_name, "n1"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cordoned_node_is_not_drained_again() {
        let mut client = MockClusterClient::new();
        client
            .expect_get_node()
            .returning(|_| Ok(Some(fake_node("n1", Some(true)))));
        client.expect_patch_node_schedulability().never();
        client.expect_list_pods_on_node().never();
        client.expect_list_daemon_sets().never();
        client.expect_request_eviction().never();

        let drainer = NodeDrainer::new(client, DrainConfig::new(Duration::from_secs(60))).unwrap();
        let result = drainer.drain_node("n1").await;
        assert!(matches!(result, Err(DrainError::AlreadyDrained { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_pod_times_out_the_drain() {
        let mut client = node_with_mixed_pods();
        client
            .expect_request_eviction()
            .returning(|_, _| Ok(EvictionResponse::RateLimited));
        client.expect_get_pod().never();

        let drainer = NodeDrainer::new(client, DrainConfig::new(Duration::from_secs(30))).unwrap();
        let result = drainer.drain_node("n1").await;
        assert!(matches!(result, Err(DrainError::DrainTimeout { .. })));
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let result = NodeDrainer::new(MockClusterClient::new(), DrainConfig::new(Duration::ZERO));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn uncordon_restores_scheduling() {
        let mut client = MockClusterClient::new();
        client
            .expect_patch_node_schedulability()
            .withf(|node_name, schedulable| node_name == "n1" && *schedulable)
            .times(1)
            .returning(|_, _| Ok(()));

        let drainer = NodeDrainer::new(client, DrainConfig::new(Duration::from_secs(60))).unwrap();
        drainer.uncordon_node("n1").await.unwrap();
    }
}
