//! In-memory stand-in for the payments API.
//!
//! # Design
//! Serves one resource (`payments`) with the same envelopes, cursor metadata,
//! error objects and idempotency semantics as the real API. Tests drive
//! failure scenarios through `AppState`: queued faults are consumed one per
//! request before routing, and every request is recorded so assertions can
//! inspect what the client actually sent.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePayment {
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePayment {
    pub reference: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct CreateEnvelope {
    payments: CreatePayment,
}

#[derive(Deserialize)]
struct UpdateEnvelope {
    payments: UpdatePayment,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub after: Option<String>,
}

/// A canned failure served instead of the next request's real response.
#[derive(Clone, Debug)]
pub enum Fault {
    /// Respond with `status` and a JSON `error` object of `error_type`.
    Error { status: u16, error_type: String, message: String },
    /// Respond with `status` and a body that is not JSON.
    Malformed { status: u16 },
    /// Wait before handling the request normally.
    Delay(Duration),
}

impl Fault {
    pub fn error(status: u16, error_type: &str, message: &str) -> Self {
        Fault::Error {
            status,
            error_type: error_type.to_string(),
            message: message.to_string(),
        }
    }
}

/// What the server saw for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub idempotency_key: Option<String>,
}

/// Shared server state; clones refer to the same data.
#[derive(Clone, Default)]
pub struct AppState {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    payments: RwLock<Vec<Payment>>,
    idempotency_keys: RwLock<HashMap<String, String>>,
    faults: Mutex<VecDeque<Fault>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for an upcoming request.
    pub fn inject(&self, fault: Fault) {
        lock(&self.inner.faults).push_back(fault);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.inner.requests).clone()
    }

    fn next_fault(&self) -> Option<Fault> {
        lock(&self.inner.faults).pop_front()
    }

    fn record(&self, request: &Request) {
        let recorded = RecordedRequest {
            method: request.method().to_string(),
            path: request
                .uri()
                .path_and_query()
                .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string()),
            idempotency_key: request
                .headers()
                .get("idempotency-key")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        };
        lock(&self.inner.requests).push(recorded);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn app() -> Router {
    app_with_state(AppState::new())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/payments", get(list_payments).post(create_payment))
        .route("/payments/{id}", get(get_payment).put(update_payment))
        .route("/payments/{id}/actions/cancel", post(cancel_payment))
        .layer(middleware::from_fn_with_state(state.clone(), gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, AppState::new()).await
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

/// Records the request, serves any queued fault, then checks authorization.
async fn gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.record(&request);

    match state.next_fault() {
        Some(Fault::Error { status, error_type, message }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return api_error(status, &error_type, &message, Vec::new());
        }
        Some(Fault::Malformed { status }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            return (status, [(header::CONTENT_TYPE, "text/html")], "<html>Bad Gateway</html>").into_response();
        }
        Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
        None => {}
    }

    if !authorized(request.headers()) {
        return api_error(
            StatusCode::UNAUTHORIZED,
            "invalid_api_usage",
            "Authentication failed",
            vec![json!({"reason": "missing_authorization_header", "message": "Provide a bearer token"})],
        );
    }
    next.run(request).await
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty())
}

fn api_error(status: StatusCode, error_type: &str, message: &str, errors: Vec<Value>) -> Response {
    let body = json!({
        "error": {
            "type": error_type,
            "code": status.as_u16(),
            "message": message,
            "request_id": Uuid::new_v4().to_string(),
            "documentation_url": format!("https://developer.payments.example.com/#{error_type}"),
            "errors": errors,
        }
    });
    (status, Json(body)).into_response()
}

fn not_found() -> Response {
    api_error(
        StatusCode::NOT_FOUND,
        "invalid_api_usage",
        "Resource not found",
        vec![json!({"reason": "resource_not_found", "message": "Resource not found"})],
    )
}

fn payment_envelope(status: StatusCode, payment: Payment) -> Response {
    (status, Json(json!({ "payments": payment }))).into_response()
}

async fn list_payments(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return api_error(
            StatusCode::BAD_REQUEST,
            "invalid_api_usage",
            "Invalid limit",
            vec![json!({"reason": "invalid_limit", "message": format!("limit must be between 1 and {MAX_PAGE_LIMIT}")})],
        );
    }

    let payments = state.inner.payments.read().await;
    let start = match params.after.as_deref().filter(|after| !after.is_empty()) {
        None => 0,
        Some(after) => match payments.iter().position(|payment| payment.id == after) {
            Some(index) => index + 1,
            None => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_api_usage",
                    "Cursor not recognised",
                    vec![json!({"reason": "invalid_cursor", "message": "after cursor does not match a resource"})],
                )
            }
        },
    };

    let end = (start + limit).min(payments.len());
    let items = &payments[start..end];
    let after = (end < payments.len()).then(|| payments[end - 1].id.clone());
    let before = items.first().filter(|_| start > 0).map(|payment| payment.id.clone());

    Json(json!({
        "payments": items,
        "meta": {
            "cursors": { "after": after, "before": before },
            "limit": limit,
        }
    }))
    .into_response()
}

async fn create_payment(State(state): State<AppState>, headers: HeaderMap, Json(input): Json<CreateEnvelope>) -> Response {
    let input = input.payments;
    if input.amount == 0 {
        return api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_failed",
            "Validation failed",
            vec![json!({"field": "amount", "message": "must be greater than 0", "request_pointer": "/payments/amount"})],
        );
    }

    let key = headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut keys = state.inner.idempotency_keys.write().await;
    if let Some(existing) = key.as_ref().and_then(|key| keys.get(key)) {
        return api_error(
            StatusCode::CONFLICT,
            "invalid_state",
            "A resource has already been created with this idempotency key",
            vec![json!({
                "reason": "idempotent_creation_conflict",
                "message": "A resource has already been created with this idempotency key",
                "links": { "conflicting_resource_id": existing },
            })],
        );
    }

    let payment = Payment {
        id: format!("PM{}", Uuid::new_v4().simple()),
        amount: input.amount,
        currency: input.currency,
        status: "pending_submission".to_string(),
        reference: input.reference,
        metadata: input.metadata,
    };
    if let Some(key) = key {
        keys.insert(key, payment.id.clone());
    }
    state.inner.payments.write().await.push(payment.clone());
    tracing::info!(id = %payment.id, "created payment");
    payment_envelope(StatusCode::CREATED, payment)
}

async fn get_payment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let payments = state.inner.payments.read().await;
    match payments.iter().find(|payment| payment.id == id) {
        Some(payment) => payment_envelope(StatusCode::OK, payment.clone()),
        None => not_found(),
    }
}

async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateEnvelope>,
) -> Response {
    let input = input.payments;
    let mut payments = state.inner.payments.write().await;
    let Some(payment) = payments.iter_mut().find(|payment| payment.id == id) else {
        return not_found();
    };
    if let Some(reference) = input.reference {
        payment.reference = Some(reference);
    }
    if let Some(metadata) = input.metadata {
        payment.metadata = metadata;
    }
    payment_envelope(StatusCode::OK, payment.clone())
}

async fn cancel_payment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut payments = state.inner.payments.write().await;
    let Some(payment) = payments.iter_mut().find(|payment| payment.id == id) else {
        return not_found();
    };
    if payment.status == "cancelled" {
        return api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_state",
            "Payment is already cancelled",
            vec![json!({"reason": "cancellation_failed", "message": "Payment is already cancelled"})],
        );
    }
    payment.status = "cancelled".to_string();
    payment_envelope(StatusCode::OK, payment.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_serializes_to_json() {
        let payment = Payment {
            id: "PM1".to_string(),
            amount: 1000,
            currency: "GBP".to_string(),
            status: "pending_submission".to_string(),
            reference: None,
            metadata: BTreeMap::new(),
        };
        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["id"], "PM1");
        assert_eq!(json["amount"], 1000);
        assert_eq!(json["reference"], Value::Null);
    }

    #[test]
    fn create_envelope_defaults_optional_fields() {
        let input: CreateEnvelope =
            serde_json::from_str(r#"{"payments":{"amount":100,"currency":"EUR"}}"#).unwrap();
        assert_eq!(input.payments.amount, 100);
        assert!(input.payments.reference.is_none());
        assert!(input.payments.metadata.is_empty());
    }

    #[test]
    fn create_envelope_requires_the_resource_key() {
        let result: Result<CreateEnvelope, _> = serde_json::from_str(r#"{"amount":100,"currency":"EUR"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn update_fields_are_optional() {
        let input: UpdateEnvelope = serde_json::from_str(r#"{"payments":{}}"#).unwrap();
        assert!(input.payments.reference.is_none());
        assert!(input.payments.metadata.is_none());
    }

    #[test]
    fn bearer_token_is_required() {
        let mut headers = HeaderMap::new();
        assert!(!authorized(&headers));
        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(!authorized(&headers));
        headers.insert(header::AUTHORIZATION, "Bearer sk_test".parse().unwrap());
        assert!(authorized(&headers));
    }

    #[test]
    fn faults_are_served_in_order() {
        let state = AppState::new();
        state.inject(Fault::error(503, "internal_error", "busy"));
        state.inject(Fault::Malformed { status: 502 });
        assert!(matches!(state.next_fault(), Some(Fault::Error { status: 503, .. })));
        assert!(matches!(state.next_fault(), Some(Fault::Malformed { status: 502 })));
        assert!(state.next_fault().is_none());
    }
}
