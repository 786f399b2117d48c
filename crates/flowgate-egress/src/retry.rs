//! Bounded retry loop
//!
//! A response with status below 500 ends the loop, whether success or client
//! error. Server errors and transport failures are retried after the backoff
//! delay, except after the final attempt. Only the final outcome is returned.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::transport::{UpstreamRequest, UpstreamResponse, UpstreamTransport};
use crate::{EgressError, Result};

/// Delay inserted before the next attempt
pub trait Backoff: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed
    fn delay(&self, attempt: u32) -> Duration;
}

/// `step * attempt`: 100ms, 200ms, ... with the default step
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    step: Duration,
}

impl LinearBackoff {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl Backoff for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// Retry immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Final response and how many attempts it took
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    pub response: UpstreamResponse,
    pub attempts: u32,
}

impl ForwardOutcome {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Clone)]
pub struct Forwarder {
    transport: Arc<dyn UpstreamTransport>,
    backoff: Arc<dyn Backoff>,
}

impl Forwarder {
    /// Forwarder with [`LinearBackoff`] at its default step
    pub fn new(transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            transport,
            backoff: Arc::new(LinearBackoff::default()),
        }
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deliver `request`, making at most `max_attempts` attempts (minimum 1)
    pub async fn forward(
        &self,
        request: &UpstreamRequest,
        max_attempts: u32,
    ) -> Result<ForwardOutcome> {
        let attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.transport.send(request).await {
                Ok(response) if !response.is_retryable() => {
                    debug!(
                        url = %request.url,
                        status = response.status.as_u16(),
                        attempt,
                        "Upstream attempt finished"
                    );
                    return Ok(ForwardOutcome {
                        response,
                        attempts: attempt,
                    });
                }
                Ok(response) => {
                    last_error = format!("upstream returned status {}", response.status.as_u16());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                let delay = self.backoff.delay(attempt);
                warn!(
                    url = %request.url,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Upstream attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(EgressError::Exhausted {
            attempts,
            last_error,
        })
    }
}
