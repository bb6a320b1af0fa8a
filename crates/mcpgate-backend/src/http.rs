//! HTTP backend connector
//!
//! One shared keep-alive client across all HTTP targets, a per-target
//! semaphore for the in-flight cap, and retrying with jittered backoff on
//! transient statuses (429 and the transient 5xx family), capped by the
//! request deadline.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};
use crate::health::{HealthThresholds, HealthTracker};
use crate::retry::RetryPolicy;
use crate::target::BackendTarget;

/// Connector for one HTTP target
pub struct HttpConnector {
    target: BackendTarget,
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    health: Arc<HealthTracker>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector")
            .field("target", &self.target.id)
            .field("health", &self.health.state())
            .finish()
    }
}

impl HttpConnector {
    /// Build a connector; the client is shared so targets pool connections
    pub fn new(target: BackendTarget, client: reqwest::Client) -> BackendResult<Self> {
        target.validate()?;
        let retry = RetryPolicy {
            max_retries: target.max_retries,
            ..RetryPolicy::default()
        };
        let health = Arc::new(HealthTracker::new(
            target.id.clone(),
            HealthThresholds::default(),
        ));
        let in_flight = Arc::new(Semaphore::new(target.max_in_flight));
        Ok(Self {
            target,
            client,
            in_flight,
            health,
            retry,
        })
    }

    /// Health tracker for this target
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Invoke the backend with a JSON-RPC payload
    ///
    /// `deadline` is the overall request deadline; retries never extend past
    /// it. Cancellation aborts between attempts and mid-request.
    pub async fn invoke(
        &self,
        payload: Value,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BackendResult<Value> {
        let url = self
            .target
            .url
            .as_deref()
            .ok_or_else(|| BackendError::Configuration("missing url".to_string()))?;

        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| BackendError::unavailable(&self.target.id, "pool closed"))?;

        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.health.record_failure();
                return Err(BackendError::Timeout {
                    target: self.target.id.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }

            let request = self
                .client
                .post(url)
                .timeout(remaining.min(self.target.timeout()))
                .json(&payload)
                .send();

            let outcome = tokio::select! {
                result = request => result,
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            };

            let error = match outcome {
                Ok(response) if response.status().is_success() => {
                    self.health.record_success();
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| BackendError::Protocol(e.to_string()));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    BackendError::Status {
                        target: self.target.id.clone(),
                        status,
                    }
                }
                Err(e) if e.is_timeout() => BackendError::Timeout {
                    target: self.target.id.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
                Err(e) => BackendError::Connection(e.to_string()),
            };

            self.health.record_failure();
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !error.is_retryable() || !self.retry.should_retry(attempts, remaining) {
                return Err(error);
            }

            let backoff = self.retry.delay_for(attempts);
            debug!(target_id = %self.target.id, attempt = attempts, ?backoff, error = %error,
                   "retrying backend call");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            }
        }
    }

    /// Health ping: a JSON-RPC `ping` with a short budget
    pub async fn ping(&self) -> bool {
        let url = match self.target.url.as_deref() {
            Some(url) => url,
            None => return false,
        };
        let payload = serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": "health"});
        let result = self
            .client
            .post(url)
            .timeout(std::time::Duration::from_secs(5))
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                self.health.record_success();
                true
            }
            Ok(response) => {
                warn!(target_id = %self.target.id, status = %response.status(), "health ping failed");
                self.health.record_failure();
                false
            }
            Err(e) => {
                warn!(target_id = %self.target.id, error = %e, "health ping failed");
                self.health.record_failure();
                false
            }
        }
    }
}
