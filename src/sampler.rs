//! Periodic numeric publishing bound to a connection's cancellation scope.
//!
//! The loop checks the scope before every sample and while sleeping, so a
//! `disconnect` stops it without one more network call.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mqtt::{IgniteClient, PublishError};

/// Produces one batch of channel values per tick
pub trait SampleSource: Send {
    fn sample(&mut self) -> Vec<f32>;
}

/// Two-channel random source, `1 + 5 * r` with `r` in `0..=i32::MAX`
#[derive(Debug, Default)]
pub struct RandomSource;

impl SampleSource for RandomSource {
    fn sample(&mut self) -> Vec<f32> {
        let mut rng = rand::thread_rng();
        (0..2)
            .map(|_| 1.0 + 5.0 * rng.gen_range(0..=i32::MAX) as f32)
            .collect()
    }
}

pub struct Sampler<S> {
    client: IgniteClient,
    topic: String,
    interval: Duration,
    source: S,
}

impl<S: SampleSource> Sampler<S> {
    pub fn new(client: IgniteClient, topic: impl Into<String>, interval: Duration, source: S) -> Self {
        Self {
            client,
            topic: topic.into(),
            interval,
            source,
        }
    }

    /// Runs on the client's current scope until it is cancelled.
    pub async fn run(self) -> Result<(), PublishError> {
        let scope = self.client.cancellation_token();
        self.run_until(scope).await
    }

    /// Publishes a sample every interval until `scope` is cancelled.
    ///
    /// The first failed publish ends the loop and is returned; retrying is up
    /// to the caller.
    pub async fn run_until(mut self, scope: CancellationToken) -> Result<(), PublishError> {
        info!(topic = %self.topic, interval = ?self.interval, "Starting sampler");
        let mut published = 0usize;

        loop {
            if scope.is_cancelled() {
                break;
            }

            let values = self.source.sample();
            let now = chrono::Utc::now();
            if let Err(e) = self.client.publish_numeric(&self.topic, &now, &values).await {
                if scope.is_cancelled() {
                    debug!(error = %e, "Publish interrupted by cancellation");
                    break;
                }
                warn!(topic = %self.topic, error = %e, "Sampler publish failed, stopping");
                return Err(e);
            }
            published += 1;

            tokio::select! {
                _ = scope.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(topic = %self.topic, published, "Sampler stopped");
        Ok(())
    }
}
