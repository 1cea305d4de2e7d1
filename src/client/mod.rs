//! Timed, retrying request client
//!
//! Executes one backend operation under a named circuit: the breaker is
//! consulted before any network attempt, every attempt races a deadline, and
//! transient failures retry with linear backoff. Outcomes are classified
//! into the [`SyncError`] taxonomy.

pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::circuit::CircuitBreaker;
use crate::config::RequestConfig;
use crate::error::SyncError;
use crate::notify::{Notifier, Severity};

use transport::{ApiRequest, ApiResponse, RawResponse, Transport};

/// Per-call overrides for the client defaults
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    /// Whether an application-level `success: false` body may be retried.
    pub retry_app_errors: bool,
}

pub struct RequestClient {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    notifier: Arc<dyn Notifier>,
    config: RequestConfig,
}

impl RequestClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        notifier: Arc<dyn Notifier>,
        config: RequestConfig,
    ) -> Self {
        Self {
            transport,
            breaker,
            notifier,
            config,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Execute `request` under the circuit named `circuit`.
    ///
    /// The notifier hears about the final outcome at most once per call,
    /// never once per retry. A conflict response counts as a successful
    /// delivery for the breaker; the backend answered, it just said no.
    pub async fn execute(
        &self,
        circuit: &str,
        request: &ApiRequest,
        options: &RequestOptions,
    ) -> Result<ApiResponse, SyncError> {
        if !self.breaker.can_execute(circuit) {
            let err = SyncError::CircuitOpen(circuit.to_string());
            tracing::warn!(circuit, "request rejected, circuit open");
            self.notifier.notify(err.user_message(), Severity::Warning);
            return Err(err);
        }

        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);
        let retry_delay = options.retry_delay.unwrap_or(self.config.retry_delay);

        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let outcome = self.attempt(request, timeout).await;

            match outcome {
                Ok(response) => {
                    self.breaker.record_success(circuit);
                    tracing::debug!(
                        circuit,
                        action = %request.action,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        attempts = attempt + 1,
                        "request succeeded"
                    );
                    return Ok(response);
                }
                Err(err @ SyncError::Conflict(_)) => {
                    // Delivered and answered; the breaker sees a healthy
                    // backend even though the caller sees a conflict.
                    self.breaker.record_success(circuit);
                    tracing::info!(circuit, action = %request.action, "server reported conflict");
                    return Err(err);
                }
                Err(err) => {
                    if err.is_retryable(options.retry_app_errors) && attempt < max_retries {
                        attempt += 1;
                        let backoff = retry_delay * attempt;
                        tracing::debug!(
                            circuit,
                            action = %request.action,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "retrying request"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    self.breaker.record_failure(circuit);
                    tracing::error!(
                        circuit,
                        action = %request.action,
                        attempts = attempt + 1,
                        error = %err,
                        "request failed"
                    );
                    self.notifier.notify(err.user_message(), Severity::Error);
                    return Err(err);
                }
            }
        }
    }

    /// One attempt: send, race the deadline, classify.
    async fn attempt(
        &self,
        request: &ApiRequest,
        timeout: Duration,
    ) -> Result<ApiResponse, SyncError> {
        let send = self.transport.send(request);

        let raw = match tokio::time::timeout(timeout, send).await {
            Err(_) => return Err(SyncError::Timeout(timeout)),
            Ok(Err(transport_err)) => return Err(SyncError::Network(transport_err.to_string())),
            Ok(Ok(raw)) => raw,
        };

        classify(raw)
    }
}

/// Map an HTTP-level outcome onto the error taxonomy.
fn classify(raw: RawResponse) -> Result<ApiResponse, SyncError> {
    match raw.status {
        429 => Err(SyncError::RateLimited {
            retry_after_secs: raw.retry_after_secs.unwrap_or(60),
        }),
        401 => Err(SyncError::AuthRequired),
        403 => Err(SyncError::AccessDenied),
        status if status >= 500 => Err(SyncError::HttpStatus { status }),
        status if (200..300).contains(&status) => {
            let body = raw.body.unwrap_or_default();
            if body.success {
                Ok(body)
            } else if body.is_conflict() {
                Err(SyncError::Conflict(Box::new(body)))
            } else {
                Err(SyncError::Application {
                    message: body.error.unwrap_or_else(|| "unknown error".to_string()),
                })
            }
        }
        status => Err(SyncError::HttpStatus { status }),
    }
}
