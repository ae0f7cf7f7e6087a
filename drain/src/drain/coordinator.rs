//! Evicts a set of Pods concurrently under one global deadline.
use super::error::{self, Result};
use super::evict::{EvictionAttempt, EvictionOutcome};
use super::PodIdentity;
use crate::client::ClusterClient;
use crate::config::DrainConfig;

use futures::{stream, StreamExt, TryStreamExt};
use snafu::ResultExt;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// Runs one [`EvictionAttempt`] per target, at most `config.max_concurrent_evictions` at a time.
///
/// The first attempt to fail ends the whole evacuation: attempts still in flight are dropped and never report.
/// The evacuation is also abandoned once `config.deadline` passes or `cancel` fires.
#[instrument(skip(client, config, targets, cancel), fields(pods = targets.len()), err)]
pub(crate) async fn evict_all<C: ClusterClient + ?Sized>(
    client: &C,
    config: &DrainConfig,
    node_name: &str,
    targets: Vec<PodIdentity>,
    cancel: &CancellationToken,
) -> Result<BTreeMap<PodIdentity, EvictionOutcome>> {
    let start = Instant::now();
    event!(
        Level::INFO,
        "Evicting {} Pods from Node '{}'.",
        targets.len(),
        node_name
    );

    // Attempts are cancelled on every way out of this function, including fail-fast and timeout.
    let attempts_token = cancel.child_token();
    let _cancel_attempts = attempts_token.clone().drop_guard();

    let evacuation = stream::iter(targets)
        .map(|pod| {
            let attempt =
                EvictionAttempt::new(client, config, pod.clone(), attempts_token.clone());
            async move { attempt.run().await.map(|outcome| (pod, outcome)) }
        })
        .buffer_unordered(config.max_concurrent_evictions.get())
        .try_collect::<BTreeMap<_, _>>();

    let outcomes = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return error::CancelledSnafu { node_name }.fail();
        }
        result = tokio::time::timeout(config.deadline, evacuation) => match result {
            Ok(outcomes) => outcomes.context(error::EvictionSnafu { node_name })?,
            Err(_) => {
                return error::DrainTimeoutSnafu {
                    node_name,
                    deadline: config.deadline,
                    elapsed: start.elapsed(),
                }
                .fail();
            }
        },
    };

    event!(
        Level::INFO,
        "Evicted {} Pods from Node '{}' in {:.2}s.",
        outcomes.len(),
        node_name,
        start.elapsed().as_secs_f64()
    );
    Ok(outcomes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::{ClientError, EvictionResponse, MockClusterClient};
    use crate::drain::error::{DrainError, EvictionError};
    use crate::drain::evict::test::api_error;
    use crate::drain::pod::test::fake_pod;

    use std::collections::HashMap;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::{sleep, Duration};

    fn targets(count: usize) -> Vec<PodIdentity> {
        (0..count)
            .map(|i| {
                let name = format!("p{}", i);
                PodIdentity::of(&fake_pod(&name, &format!("uid-{}", name)))
            })
            .collect()
    }

    fn config(deadline_secs: u64, max_concurrent: usize) -> DrainConfig {
        DrainConfig::new(Duration::from_secs(deadline_secs))
            .with_max_concurrent_evictions(NonZeroUsize::new(max_concurrent).unwrap())
    }

    /// A client whose Pods accept every eviction and disappear after being polled `lingers` times.
    fn lingering_pods_client(
        lingers: usize,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> MockClusterClient {
        let polls: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut client = MockClusterClient::new();
        client
            .expect_request_eviction()
            .returning(|_, _| Ok(EvictionResponse::Accepted));
        client.expect_get_pod().returning(move |_, pod_name| {
            let mut polls = polls.lock().unwrap();
            let count = polls.entry(pod_name.to_string()).or_insert(0);
            if *count == 0 {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
            }
            *count += 1;
            if *count > lingers {
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            } else {
                Ok(Some(fake_pod(pod_name, &format!("uid-{}", pod_name))))
            }
        });
        client
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let client = lingering_pods_client(2, in_flight.clone(), peak.clone());

        let cancel = CancellationToken::new();
        let outcomes = evict_all(&client, &config(600, 3), "n1", targets(12), &cancel)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.values().all(|outcome| *outcome == EvictionOutcome::Removed));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_targets_is_an_empty_drain() {
        let mut client = MockClusterClient::new();
        client.expect_request_eviction().never();
        client.expect_get_pod().never();

        let cancel = CancellationToken::new();
        let outcomes = evict_all(&client, &config(60, 5), "n1", vec![], &cancel)
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_ends_the_drain() {
        let mut client = MockClusterClient::new();
        client.expect_request_eviction().returning(|_, pod_name| {
            if pod_name == "p3" {
                Err(ClientError::CreateEviction {
                    source: api_error(403, "Forbidden"),
                    pod_name: pod_name.to_string(),
                })
            } else {
                Ok(EvictionResponse::Accepted)
            }
        });
        // Every other Pod lingers until the drain gives up on it.
        client.expect_get_pod().returning(|_, pod_name| {
            Ok(Some(fake_pod(pod_name, &format!("uid-{}", pod_name))))
        });

        let start = Instant::now();
        let cancel = CancellationToken::new();
        let result = evict_all(&client, &config(600, 4), "n1", targets(10), &cancel).await;

        match result {
            Err(DrainError::Eviction { source, node_name }) => {
                assert!(matches!(source, EvictionError::EvictionRejected { .. }));
                assert_eq!(source.pod().name, "p3");
                assert_eq!(node_name, "n1");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_drain() {
        let mut client = MockClusterClient::new();
        client
            .expect_request_eviction()
            .returning(|_, _| Ok(EvictionResponse::Accepted));
        client.expect_get_pod().returning(|_, pod_name| {
            Ok(Some(fake_pod(pod_name, &format!("uid-{}", pod_name))))
        });

        let cancel = CancellationToken::new();
        let result = evict_all(&client, &config(10, 5), "n1", targets(2), &cancel).await;
        match result {
            Err(DrainError::DrainTimeout {
                deadline, elapsed, ..
            }) => {
                assert_eq!(deadline, Duration::from_secs(10));
                assert!(elapsed >= deadline);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_drain() {
        let mut client = MockClusterClient::new();
        client
            .expect_request_eviction()
            .returning(|_, _| Ok(EvictionResponse::RateLimited));
        client.expect_get_pod().never();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });

        let result = evict_all(&client, &config(600, 5), "n1", targets(3), &cancel).await;
        assert!(matches!(result, Err(DrainError::Cancelled { .. })));
    }
}
