//! Restarts a [`SubscriptionRunner`] after retryable failures.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::FeedError;
use crate::logging::Logger;
use crate::redis::{BackoffConfig, Dialer, ExponentialBackoff};

use super::{PayloadSink, SubscriptionRunner, Termination};

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub backoff: BackoffConfig,
    /// Give up after this many failed runs in a row; `None` retries forever
    pub max_consecutive_failures: Option<u32>,
}

pub struct Supervisor<D: Dialer, S: PayloadSink> {
    runner: SubscriptionRunner<D, S>,
    policy: RetryPolicy,
    logger: Arc<dyn Logger>,
}

impl<D: Dialer, S: PayloadSink> Supervisor<D, S> {
    pub fn new(
        runner: SubscriptionRunner<D, S>,
        policy: RetryPolicy,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            runner,
            policy,
            logger,
        }
    }

    pub fn runner(&self) -> &SubscriptionRunner<D, S> {
        &self.runner
    }

    /// Keep the subscription alive until cancelled, the sink closes, or
    /// the failure budget runs out.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Termination, FeedError> {
        let mut backoff = ExponentialBackoff::with_config(self.policy.backoff.clone());
        let mut failures: u32 = 0;

        loop {
            let error = match self.runner.run(&cancel).await {
                Ok(termination) => return Ok(termination),
                Err(e) => e,
            };

            if !error.is_retryable() {
                self.logger.error(
                    "Subscription failed permanently",
                    &[("channel", &self.runner.channel()), ("cause", &error)],
                );
                return Err(error);
            }

            // The previous run was subscribed; start the budget over.
            if matches!(error, FeedError::ConnectionLost { .. }) {
                backoff.reset();
                failures = 0;
            }
            failures += 1;

            if self
                .policy
                .max_consecutive_failures
                .is_some_and(|max| failures >= max)
            {
                self.logger.error(
                    "Giving up on subscription",
                    &[
                        ("channel", &self.runner.channel()),
                        ("failures", &failures),
                        ("cause", &error),
                    ],
                );
                return Err(error);
            }

            let delay = backoff.next_delay();
            self.logger.warn(
                "Subscription failed, retrying",
                &[
                    ("channel", &self.runner.channel()),
                    ("kind", &error.kind()),
                    ("attempt", &failures),
                    ("delay_ms", &delay.as_millis()),
                    ("cause", &error),
                ],
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Termination::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
