//! Single-round-trip HTTP execution.
//!
//! # Design
//! `Transport` is the seam between the request-execution core and the
//! network. An implementation performs exactly one round-trip per call and
//! reports either the raw response or a transport-level failure; it never
//! interprets status codes. `UreqTransport` is the production implementation,
//! tests plug in scripted transports that record every descriptor they see.
//!
//! # Cancellation
//! A blocking `ureq` call cannot be interrupted from outside. When a call
//! carries a cancellation token, the round-trip runs on a worker thread and
//! `execute` returns `Cancelled` as soon as the token fires. The worker is
//! abandoned, not stopped: it keeps its thread and socket until the request
//! finishes or hits the per-attempt timeout, and its result is discarded.
//! A deadline on the context shortens that timeout, so pair long-running
//! cancellable calls with a deadline to bound the leftover work.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::context::CallContext;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// How often a cancellable call checks its token while a request is in flight.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Failures that happen before a complete HTTP response is available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("transport error: {0}")]
    Other(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

impl TransportError {
    /// Network-level failures are worth another attempt. Cancellation and
    /// deadline expiry are decisions made by the caller and are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Io(_)
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled | TransportError::DeadlineExceeded)
    }
}

/// Executes one HTTP round-trip.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport backed by a shared `ureq::Agent` connection pool.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    timeout: Duration,
}

impl UreqTransport {
    /// `timeout` bounds each attempt; a call context deadline can shorten it.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent, timeout }
    }

    fn attempt_timeout(&self, ctx: &CallContext) -> Duration {
        ctx.remaining()
            .map_or(self.timeout, |remaining| remaining.min(self.timeout))
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse, TransportError> {
        ctx.check()?;
        let timeout = self.attempt_timeout(ctx);

        let Some(token) = ctx.cancellation() else {
            return round_trip(&self.agent, request, timeout).map_err(|err| settle(err, ctx));
        };

        // The blocking call cannot be interrupted, so it runs on a worker and
        // is abandoned if the token fires first.
        let (tx, rx) = mpsc::channel();
        let agent = self.agent.clone();
        let owned = request.clone();
        thread::spawn(move || {
            let _ = tx.send(round_trip(&agent, &owned, timeout));
        });

        loop {
            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => return result.map_err(|err| settle(err, ctx)),
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        tracing::debug!(url = %request.url, "abandoning in-flight request after cancellation");
                        return Err(TransportError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Other("transport worker exited without a result".into()));
                }
            }
        }
    }
}

/// A timeout that fires because the call's deadline ran out is a deadline
/// failure, not a retryable network timeout.
fn settle(err: TransportError, ctx: &CallContext) -> TransportError {
    match err {
        TransportError::Timeout(_) if ctx.deadline_passed() => TransportError::DeadlineExceeded,
        other => other,
    }
}

fn round_trip(agent: &ureq::Agent, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError> {
    let url = request.url.as_str();
    let result = match (request.method, request.body.as_deref()) {
        (HttpMethod::Get, _) => prepare(agent.get(url), request, timeout).call(),
        (HttpMethod::Delete, _) => prepare(agent.delete(url), request, timeout).call(),
        (HttpMethod::Post, Some(body)) => prepare(agent.post(url), request, timeout).send(body.as_bytes()),
        (HttpMethod::Post, None) => prepare(agent.post(url), request, timeout).send_empty(),
        (HttpMethod::Put, Some(body)) => prepare(agent.put(url), request, timeout).send(body.as_bytes()),
        (HttpMethod::Put, None) => prepare(agent.put(url), request, timeout).send_empty(),
    };
    let mut response = result.map_err(classify)?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    // The body is drained here so the connection is released before returning.
    let body = response.body_mut().read_to_vec().map_err(classify)?;

    Ok(HttpResponse { status, headers, body })
}

fn prepare<B>(builder: ureq::RequestBuilder<B>, request: &HttpRequest, timeout: Duration) -> ureq::RequestBuilder<B> {
    let mut builder = builder.config().timeout_global(Some(timeout)).build();
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn classify(err: ureq::Error) -> TransportError {
    let message = err.to_string();
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout(message),
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => TransportError::Connect(message),
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => TransportError::Timeout(message),
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            TransportError::Connect(message)
        }
        ureq::Error::Io(_) => TransportError::Io(message),
        _ => TransportError::Other(message),
    }
}
