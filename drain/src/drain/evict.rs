//! Drives a single Pod through eviction.
//!
//! An attempt moves through `Requesting -> Confirming -> Done`, or stops early with an [`EvictionError`]:
//!
//! * `Requesting` creates evictions until the API server has accepted `acceptance_threshold` of them in a row. The
//!   eviction API accepts asynchronously and repeated requests are idempotent, so several consecutive acceptances are
//!   taken as a firm answer. A 404 means the Pod is already gone. A 429 means a PodDisruptionBudget is not yet
//!   satisfied and we back off before trying again, up to `max_rate_limit_retries` times. Anything else is terminal.
//! * `Confirming` polls the Pod until it is gone, or until a Pod with the same name but a different UID shows up
//!   (the original was deleted and then recreated by its controller).
//!
//! Every wait and API call races the attempt's cancellation token, so a drain that gives up stops its attempts
//! promptly.
use super::error::{self, EvictionError};
use super::PodIdentity;
use crate::client::{ClusterClient, EvictionResponse};
use crate::config::DrainConfig;

use snafu::ResultExt;
use std::future::Future;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

type Result<T> = std::result::Result<T, EvictionError>;

/// How a Pod left the node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EvictionOutcome {
    /// The eviction was accepted and the Pod was then observed to be deleted.
    Removed,
    /// The Pod was gone before we managed to evict it.
    AlreadyGone,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum AttemptState {
    Requesting { accepted: u32 },
    Confirming { since: Instant },
    Done(EvictionOutcome),
}

pub(crate) struct EvictionAttempt<'a, C: ?Sized> {
    client: &'a C,
    config: &'a DrainConfig,
    pod: PodIdentity,
    cancel: CancellationToken,
    backoff: Box<dyn Iterator<Item = Duration> + Send + Sync>,
    rate_limited: u32,
}

impl<'a, C: ClusterClient + ?Sized> EvictionAttempt<'a, C> {
    pub(crate) fn new(
        client: &'a C,
        config: &'a DrainConfig,
        pod: PodIdentity,
        cancel: CancellationToken,
    ) -> Self {
        EvictionAttempt {
            client,
            config,
            pod,
            cancel,
            backoff: Box::new(config.rate_limit_backoff()),
            rate_limited: 0,
        }
    }

    /// Runs the attempt to completion, reporting its outcome exactly once.
    #[instrument(skip(self), fields(pod = %self.pod), err)]
    pub(crate) async fn run(mut self) -> Result<EvictionOutcome> {
        let mut state = AttemptState::Requesting { accepted: 0 };
        loop {
            state = match state {
                AttemptState::Requesting { accepted } => self.request(accepted).await?,
                AttemptState::Confirming { since } => self.confirm(since).await?,
                AttemptState::Done(outcome) => return Ok(outcome),
            };
        }
    }

    async fn request(&mut self, accepted: u32) -> Result<AttemptState> {
        event!(Level::DEBUG, "Attempting to evict Pod '{}'.", self.pod);
        let response = self
            .cancellable(
                self.client
                    .request_eviction(&self.pod.namespace, &self.pod.name),
            )
            .await?;

        match response {
            Ok(EvictionResponse::Accepted) => {
                let accepted = accepted + 1;
                if accepted >= self.config.acceptance_threshold {
                    event!(Level::INFO, "Successfully evicted Pod '{}'.", self.pod);
                    Ok(AttemptState::Confirming {
                        since: Instant::now(),
                    })
                } else {
                    Ok(AttemptState::Requesting { accepted })
                }
            }
            Ok(EvictionResponse::NotFound) => {
                event!(
                    Level::INFO,
                    "Pod '{}' no longer exists; nothing to evict.",
                    self.pod
                );
                Ok(AttemptState::Done(EvictionOutcome::AlreadyGone))
            }
            Ok(EvictionResponse::RateLimited) => {
                let delay = match self.backoff.next() {
                    Some(delay) => delay,
                    None => {
                        return error::RetriesExhaustedSnafu {
                            pod: self.pod.clone(),
                            retries: self.rate_limited,
                        }
                        .fail()
                    }
                };
                self.rate_limited += 1;
                event!(
                    Level::WARN,
                    "Too many requests when creating Eviction for Pod '{}'. This is likely due to respecting a Pod Disruption Budget. Retrying in {:.2}s.",
                    self.pod,
                    delay.as_secs_f64()
                );
                self.cancellable(sleep(delay)).await?;
                Ok(AttemptState::Requesting { accepted: 0 })
            }
            Err(e) => {
                event!(
                    Level::ERROR,
                    "Error when evicting Pod '{}': '{}'.",
                    self.pod,
                    e
                );
                Err(e).context(error::EvictionRejectedSnafu {
                    pod: self.pod.clone(),
                })
            }
        }
    }

    async fn confirm(&self, since: Instant) -> Result<AttemptState> {
        let current = self
            .cancellable(self.client.get_pod(&self.pod.namespace, &self.pod.name))
            .await?
            .context(error::ConfirmRemovalSnafu {
                pod: self.pod.clone(),
            })?;

        match current {
            None => {
                event!(Level::INFO, "Pod '{}' deleted.", self.pod);
                return Ok(AttemptState::Done(EvictionOutcome::Removed));
            }
            Some(pod) if !self.pod.is_same_instance(&pod) => {
                event!(
                    Level::INFO,
                    "Pod '{}' deleted and replaced by a new instance.",
                    self.pod
                );
                return Ok(AttemptState::Done(EvictionOutcome::Removed));
            }
            Some(_) => {}
        }

        if let Some(max_wait) = self.config.confirm_timeout {
            if since.elapsed() > max_wait {
                return error::WaitForDeletionSnafu {
                    pod: self.pod.clone(),
                    max_wait,
                }
                .fail();
            }
        }

        event!(
            Level::DEBUG,
            "Pod '{}' not yet deleted. Waiting {}s.",
            self.pod,
            self.config.confirm_interval.as_secs_f64()
        );
        self.cancellable(sleep(self.config.confirm_interval))
            .await?;
        Ok(AttemptState::Confirming { since })
    }

    /// Awaits `fut` unless the attempt is cancelled first.
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => error::AttemptCancelledSnafu {
                pod: self.pod.clone(),
            }
            .fail(),
            output = fut => Ok(output),
        }
    }
}
