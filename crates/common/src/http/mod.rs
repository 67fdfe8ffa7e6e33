//! Rate-limited, retrying client for outbound service calls
//!
//! One pooled connection pool is shared by every endpoint. Each call runs
//! its own retry state machine; callers only see the final outcome.

mod retry;
mod transport;

pub use retry::{AttemptOutcome, RetryMachine, RetryPolicy, RetryState};
pub use transport::{
    parse_retry_after, Clock, RawResponse, ReqwestTransport, TokioClock, Transport,
    TransportError,
};

use crate::config::HttpConfig;
use crate::errors::NetworkError;
use crate::metrics::{record_retry, CallTimer};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub use reqwest::Method;

/// Named remote endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Label used in logs and metrics
    pub name: String,
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method,
            headers: Vec::new(),
        }
    }

    pub fn post(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::POST, url)
    }

    pub fn put(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::PUT, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach an API key header when a key is configured
    pub fn with_api_key(self, header: &str, key: Option<&str>) -> Self {
        match key {
            Some(key) if !key.is_empty() => self.with_header(header, key),
            _ => self,
        }
    }
}

/// Successful response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        serde_json::from_str(&self.body).map_err(|e| NetworkError::Decode {
            message: e.to_string(),
        })
    }
}

/// Retrying client with optional request throttling
#[derive(Clone)]
pub struct RateLimitedClient {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("policy", &self.policy)
            .field("throttled", &self.limiter.is_some())
            .finish()
    }
}

impl RateLimitedClient {
    /// Client over a pooled reqwest transport
    pub fn new(config: &HttpConfig) -> Result<Self, NetworkError> {
        let transport = ReqwestTransport::new(config)?;
        let client = Self::with_transport(
            Arc::new(transport),
            Arc::new(TokioClock),
            RetryPolicy::from_config(config),
        );

        Ok(match config.requests_per_second {
            Some(rps) => client.with_rate_limit(rps),
            None => client,
        })
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            clock,
            policy,
            limiter: None,
        }
    }

    /// Throttle every attempt to `rps` requests per second. Zero disables.
    pub fn with_rate_limit(mut self, rps: u32) -> Self {
        self.limiter = NonZeroU32::new(rps)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `payload`, retrying transient failures per the retry policy.
    ///
    /// Returns the first 2xx response, `Rejected` on a non-retriable status,
    /// or `Exhausted` once the attempt cap is reached.
    #[instrument(skip(self, payload), fields(endpoint = %endpoint.name))]
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        payload: &Value,
    ) -> Result<HttpResponse, NetworkError> {
        let timer = CallTimer::start(&endpoint.name);
        let mut machine = RetryMachine::new(self.policy.clone());
        let mut response = None;

        while let Some(attempt) = machine.begin_attempt() {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let outcome = match self.transport.execute(endpoint, payload).await {
                Ok(raw) if raw.is_success() => {
                    response = Some(HttpResponse {
                        status: raw.status,
                        body: raw.body,
                    });
                    AttemptOutcome::Success
                }
                Ok(raw) => classify_status(raw),
                Err(err) => classify_transport(err),
            };

            let jitter: f64 = rand::thread_rng().gen();
            match machine.record(outcome, jitter) {
                RetryState::Retrying { delay, .. } => {
                    let delay = *delay;
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    record_retry(&endpoint.name);
                    self.clock.sleep(delay).await;
                }
                RetryState::Succeeded => {
                    debug!(attempts = attempt + 1, "Call succeeded");
                }
                _ => {}
            }
        }

        match (machine.state(), response) {
            (RetryState::Succeeded, Some(response)) => {
                timer.finish("success");
                Ok(response)
            }
            (RetryState::Failed(err), _) => {
                let outcome = match err {
                    NetworkError::Rejected { .. } => "rejected",
                    _ => "exhausted",
                };
                warn!(error = %err, "Call failed");
                timer.finish(outcome);
                Err(err.clone())
            }
            (state, _) => {
                timer.finish("error");
                Err(NetworkError::Transient {
                    message: format!("retry machine stopped in state {state:?}"),
                })
            }
        }
    }

    /// Serialize `payload`, send it, and decode the JSON response
    pub async fn send_json<P, R>(&self, endpoint: &Endpoint, payload: &P) -> Result<R, NetworkError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload).map_err(|e| NetworkError::Decode {
            message: format!("failed to encode request: {e}"),
        })?;
        self.send(endpoint, &payload).await?.json()
    }
}

/// 429 and 5xx are transient; every other non-2xx status is final
fn classify_status(raw: RawResponse) -> AttemptOutcome {
    if raw.status == 429 || raw.status >= 500 {
        AttemptOutcome::Transient {
            message: format!("HTTP {}: {}", raw.status, truncate(&raw.body, 200)),
            retry_after: raw.retry_after,
        }
    } else {
        AttemptOutcome::Rejected {
            status: raw.status,
            body: raw.body,
        }
    }
}

fn classify_transport(err: TransportError) -> AttemptOutcome {
    match err {
        TransportError::Timeout(_) | TransportError::Connection(_) => AttemptOutcome::Transient {
            message: err.to_string(),
            retry_after: None,
        },
        // Status 0: the request never reached the server
        TransportError::Invalid(message) => AttemptOutcome::Rejected {
            status: 0,
            body: message,
        },
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Scripted transport and recording clock for unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    type Reply = Result<RawResponse, TransportError>;

    /// Replays scripted replies in order; repeats the last one when drained
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        last: Mutex<Option<Reply>>,
        pub requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn payloads(&self) -> Vec<Value> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, endpoint: &Endpoint, payload: &Value) -> Reply {
            self.requests
                .lock()
                .unwrap()
                .push((endpoint.url.clone(), payload.clone()));

            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(reply) => {
                    *self.last.lock().unwrap() = Some(reply.clone());
                    reply
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err(TransportError::Connection("no script".into()))),
            }
        }
    }

    /// Records requested sleeps without waiting
    #[derive(Default)]
    pub struct RecordingClock {
        pub sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    pub fn no_jitter_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter_ratio: 0.0,
        }
    }

    pub fn client(transport: Arc<ScriptedTransport>) -> RateLimitedClient {
        RateLimitedClient::with_transport(
            transport,
            Arc::new(RecordingClock::default()),
            no_jitter_policy(3),
        )
    }
}
