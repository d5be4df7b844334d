//! Blocking client core for the payments REST API.
//!
//! # Overview
//! Every resource operation (list, get, create, update, action) runs through
//! one generic pipeline: build an immutable request descriptor, execute it
//! through a bounded retry loop, and classify each attempt's response into a
//! typed payload or a structured error. List endpoints are walked lazily with
//! a cursor paginator.
//!
//! # Design
//! - `Client` shares an immutable `ClientConfig` and a `Transport` across
//!   calls; everything per-call lives in `RequestOptions`.
//! - Create and action calls carry an `Idempotency-Key` that is generated
//!   once per call and replayed on every retry.
//! - `RetryPolicy::max_attempts` counts total attempts (default 3); retries
//!   are immediate and only follow retryable errors.
//! - `Transport` is the I/O seam: `UreqTransport` in production, scripted
//!   transports in tests.
//! - Resources are declared with the `Resource` trait and used through
//!   `Service<R>`; field schemas live with the caller.

pub mod client;
pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod http;
pub mod idempotency;
pub mod pagination;
pub mod query;
pub mod resource;
pub mod retry;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{Client, RequestOptions};
pub use config::{ClientConfig, ClientConfigBuilder, Environment};
pub use context::CallContext;
pub use error::{ApiError, ApiErrorType, Error, ErrorCode, FieldError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use idempotency::{IdempotencyKey, OperationKind};
pub use pagination::{Items, Paginator};
pub use resource::{Resource, Service};
pub use retry::RetryPolicy;
pub use transport::{Transport, TransportError, UreqTransport};
pub use types::{Cursors, ListMeta, Page};

/// Re-exported so callers can build cancellation signals without a direct
/// `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
