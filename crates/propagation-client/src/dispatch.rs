//! Batch dispatch to the flight dynamics service.
//!
//! Sub-requests are independent, so up to `max_in_flight` of them run
//! concurrently. Every call carries a timeout and a bounded retry budget
//! with exponential backoff; a batch that exhausts it is reported in the
//! outcome's failure list together with the satellites it carried, never
//! silently dropped from the merge.

use crate::{
    merge_indexed, split_into_batches, validate_batch_result, ClientError, PropagationData,
    PropagationRequest, Result, MAX_BATCH_SIZE, PROPAGATION_ENDPOINT,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service reported status {status}: {message}")]
    Service { status: u16, message: String },
    #[error("malformed service payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// How propagation requests reach the service. HTTP in production; tests
/// inject in-memory impls to drive the retry path.
pub trait PropagationTransport: Sync {
    fn submit(
        &self,
        request: &PropagationRequest,
    ) -> impl Future<Output = TransportResult<PropagationData>> + Send;
}

/// JSON-over-HTTP transport against the flight dynamics provider.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        let base = base_url.strip_suffix('/').unwrap_or(base_url);
        Self {
            client: reqwest::Client::new(),
            url: format!("{base}{PROPAGATION_ENDPOINT}"),
        }
    }
}

impl PropagationTransport for HttpTransport {
    async fn submit(&self, request: &PropagationRequest) -> TransportResult<PropagationData> {
        let response: serde_json::Value = self
            .client
            .post(&self.url)
            .query(&[("format", "FULL")])
            .json(request)
            .send()
            .await?
            .json()
            .await?;
        // Error payloads carry a status field instead of result data.
        if let Some(status) = response.get("status") {
            let status = status.as_u64().unwrap_or(0) as u16;
            let message = response
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unspecified service error")
                .to_string();
            return Err(TransportError::Service { status, message });
        }
        Ok(serde_json::from_value(response)?)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Propagating satellites per batch.
    pub max_batch_size: usize,
    /// Concurrent batches in flight.
    pub max_in_flight: usize,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub initial_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            max_in_flight: 4,
            request_timeout: Duration::from_secs(120),
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// A batch that could not be propagated.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    /// Propagating satellites the batch carried.
    pub satellites: Vec<String>,
    pub error: String,
}

/// Merged data from the batches that succeeded, plus the ones that did
/// not. Callers decide whether partial coverage is acceptable.
#[derive(Debug)]
pub struct PropagationOutcome {
    pub data: PropagationData,
    pub failures: Vec<BatchFailure>,
    pub total_batches: usize,
}

impl PropagationOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Strict view: any failed batch turns the whole run into an error.
    pub fn into_result(self) -> Result<PropagationData> {
        if self.failures.is_empty() {
            return Ok(self.data);
        }
        Err(ClientError::BatchesFailed {
            failed: self.failures.len(),
            total: self.total_batches,
            failures: self.failures,
        })
    }
}

/// Split the request, dispatch every batch and merge what comes back.
pub async fn propagate(
    transport: &impl PropagationTransport,
    request: &PropagationRequest,
    config: &DispatchConfig,
) -> Result<PropagationOutcome> {
    let batches = split_into_batches(request, config.max_batch_size)?;
    let total = batches.len();
    info!(
        batches = total,
        max_in_flight = config.max_in_flight,
        "dispatching propagation request"
    );

    let mut completed = stream::iter(batches.iter().enumerate().map(|(index, batch)| async move {
        (index, submit_with_retries(transport, batch, config).await)
    }))
    .buffer_unordered(config.max_in_flight.max(1));

    let mut slots: Vec<Option<PropagationData>> = vec![None; total];
    let mut failures: Vec<BatchFailure> = Vec::new();
    while let Some((index, outcome)) = completed.next().await {
        match outcome {
            Ok(data) => {
                // A mismatching batch is fatal for the batch, not the run.
                match validate_batch_result(index, &batches[index], &data) {
                    Ok(()) => slots[index] = Some(data),
                    Err(err) => {
                        error!(batch = index, %err, "propagation result rejected");
                        failures.push(make_failure(index, &batches[index], err.to_string()));
                    }
                }
            }
            Err(message) => {
                error!(batch = index, message, "propagation batch failed");
                failures.push(make_failure(index, &batches[index], message));
            }
        }
    }

    let data = merge_indexed(
        batches
            .iter()
            .zip(slots.iter())
            .enumerate()
            .filter_map(|(index, (batch, slot))| slot.as_ref().map(|data| (index, batch, data))),
    )?;

    failures.sort_by_key(|f| f.batch_index);
    Ok(PropagationOutcome {
        data,
        failures,
        total_batches: total,
    })
}

fn make_failure(index: usize, batch: &PropagationRequest, error: String) -> BatchFailure {
    BatchFailure {
        batch_index: index,
        satellites: batch
            .propagating_ids()
            .into_iter()
            .map(str::to_string)
            .collect(),
        error,
    }
}

async fn submit_with_retries(
    transport: &impl PropagationTransport,
    batch: &PropagationRequest,
    config: &DispatchConfig,
) -> std::result::Result<PropagationData, String> {
    let mut backoff = config.initial_backoff;
    let mut last_error = String::new();
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            warn!(?backoff, attempt, "retrying propagation batch");
            sleep(backoff).await;
            backoff *= 2;
        }
        match timeout(config.request_timeout, transport.submit(batch)).await {
            Ok(Ok(data)) => return Ok(data),
            Ok(Err(err)) => last_error = err.to_string(),
            Err(_) => last_error = format!("timed out after {:?}", config.request_timeout),
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{make_asset, make_data, make_request};
    use std::sync::Mutex;

    /// Transport that fails the first `failures_per_batch` submissions of
    /// every batch, keyed by the batch's first propagating satellite.
    struct FlakyTransport {
        failures_per_batch: u32,
        attempts: Mutex<std::collections::HashMap<String, u32>>,
    }

    impl FlakyTransport {
        fn new(failures_per_batch: u32) -> Self {
            Self {
                failures_per_batch,
                attempts: Mutex::new(std::collections::HashMap::new()),
            }
        }

        fn attempts_for(&self, key: &str) -> u32 {
            *self.attempts.lock().unwrap().get(key).unwrap_or(&0)
        }
    }

    impl PropagationTransport for FlakyTransport {
        async fn submit(&self, request: &PropagationRequest) -> TransportResult<PropagationData> {
            let key = request
                .propagating_ids()
                .first()
                .map(|s| s.to_string())
                .unwrap_or_default();
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let entry = attempts.entry(key).or_insert(0);
                *entry += 1;
                *entry
            };
            if attempt <= self.failures_per_batch {
                return Err(TransportError::Service {
                    status: 503,
                    message: "propagator busy".to_string(),
                });
            }
            let ids: Vec<&str> = request.assets.iter().map(|a| a.id.as_str()).collect();
            Ok(make_data(&ids))
        }
    }

    /// Transport that drops entries from one batch's response.
    struct LossyTransport {
        drop_from: String,
    }

    impl PropagationTransport for LossyTransport {
        async fn submit(&self, request: &PropagationRequest) -> TransportResult<PropagationData> {
            let ids: Vec<&str> = request
                .assets
                .iter()
                .map(|a| a.id.as_str())
                .filter(|id| *id != self.drop_from)
                .collect();
            Ok(make_data(&ids))
        }
    }

    fn small_config() -> DispatchConfig {
        DispatchConfig {
            max_batch_size: 2,
            max_in_flight: 2,
            request_timeout: Duration::from_secs(5),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_to_success() {
        let transport = FlakyTransport::new(2);
        let request = make_request(vec![
            make_asset("sat-a", &[]),
            make_asset("sat-b", &[]),
            make_asset("sat-c", &[]),
        ]);
        let outcome = propagate(&transport, &request, &small_config())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.data.len(), 3);
        // Two failures then success: three attempts per batch.
        assert_eq!(transport.attempts_for("sat-a"), 3);
        assert_eq!(transport.attempts_for("sat-c"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_mark_the_batch_failed() {
        let transport = FlakyTransport::new(10);
        let request = make_request(vec![make_asset("sat-a", &[]), make_asset("sat-b", &[])]);
        let mut config = small_config();
        config.max_batch_size = 1;
        let outcome = propagate(&transport, &request, &config).await.unwrap();

        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.data.is_empty());
        let failure = &outcome.failures[0];
        assert_eq!(failure.batch_index, 0);
        assert_eq!(failure.satellites, vec!["sat-a".to_string()]);
        assert!(failure.error.contains("propagator busy"));
        // Bounded attempts: 1 initial + 2 retries.
        assert_eq!(transport.attempts_for("sat-a"), 3);

        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, ClientError::BatchesFailed { failed: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_success_keeps_good_batches() {
        let transport = LossyTransport {
            drop_from: "sat-c".to_string(),
        };
        let request = make_request(vec![
            make_asset("sat-a", &[]),
            make_asset("sat-b", &[]),
            make_asset("sat-c", &[]),
            make_asset("sat-d", &[]),
        ]);
        let outcome = propagate(&transport, &request, &small_config())
            .await
            .unwrap();

        // Batch [c, d] is rejected for the missing satellite, batch [a, b]
        // survives.
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].batch_index, 1);
        assert!(outcome.failures[0].error.contains("sat-c"));
        let ids: Vec<&String> = outcome.data.keys().collect();
        assert_eq!(ids, vec!["sat-a", "sat-b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_success_makes_single_attempt() {
        let transport = FlakyTransport::new(0);
        let request = make_request(vec![make_asset("sat-a", &[])]);
        let outcome = propagate(&transport, &request, &small_config())
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert_eq!(transport.attempts_for("sat-a"), 1);
    }
}
