//! Generic request execution for every API resource.
//!
//! # Design
//! Each resource operation reduces to the same pipeline, parameterized by
//! method, path, parameter encoding and the key the payload lives under:
//!
//! 1. `build_request` assembles one immutable `HttpRequest`, resolving the
//!    idempotency key for unsafe operations.
//! 2. `retry` replays that exact descriptor through the `Transport`.
//! 3. The decoder classifies every attempt's response, so retryability is
//!    decided per attempt.
//!
//! `Client` is cheap to clone. Configuration and the transport (with its
//! connection pool) are shared; everything per-call lives in
//! `RequestOptions` and on the stack of the call.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::decode::{decode_page, decode_payload};
use crate::error::Error;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::idempotency::{IdempotencyKey, OperationKind, IDEMPOTENCY_KEY_HEADER};
use crate::pagination::Paginator;
use crate::query;
use crate::resource::{Resource, Service};
use crate::retry::{retry, RetryPolicy};
use crate::transport::{Transport, UreqTransport};
use crate::types::Page;

pub const API_VERSION_HEADER: &str = "Api-Version";
pub const CLIENT_LIBRARY_HEADER: &str = "Client-Library";
pub const CLIENT_VERSION_HEADER: &str = "Client-Library-Version";
pub const CLIENT_LIBRARY: &str = "payments-client-rust";

/// Body key wrapping the parameters of action endpoints.
pub const ACTION_BODY_KEY: &str = "data";

/// Settings that apply to a single call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Key to send instead of a generated one.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Overrides the client's retry policy for this call.
    pub retry_policy: Option<RetryPolicy>,
    /// Extra headers, applied last.
    pub headers: Vec<(String, String)>,
    pub context: CallContext,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn idempotency_key(mut self, key: impl Into<IdempotencyKey>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    /// Same options for a follow-up read: the idempotency key belongs to the
    /// original operation only.
    pub(crate) fn for_read(&self) -> Self {
        Self {
            idempotency_key: None,
            ..self.clone()
        }
    }
}

/// Client for the payments API.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Client using the default `ureq` transport.
    pub fn new(config: ClientConfig) -> Self {
        let transport = UreqTransport::new(config.timeout());
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self, Error> {
        ClientConfig::from_env().map(Self::new)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Typed operations for one resource.
    pub fn service<R: Resource>(&self) -> Service<R> {
        Service::new(self.clone())
    }

    /// Assemble the descriptor for one logical call.
    ///
    /// # Errors
    ///
    /// `Encode` if `path` does not form a valid URL with the base URL.
    pub fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(String, String)],
        body: Option<String>,
        kind: OperationKind,
        options: &RequestOptions,
    ) -> Result<HttpRequest, Error> {
        let url = self.url(path, query)?;
        let mut request = HttpRequest::new(method, url);
        request.set_header("Authorization", format!("Bearer {}", self.config.access_token()));
        request.set_header(API_VERSION_HEADER, self.config.api_version());
        request.set_header(CLIENT_LIBRARY_HEADER, CLIENT_LIBRARY);
        request.set_header(CLIENT_VERSION_HEADER, env!("CARGO_PKG_VERSION"));
        request.set_header("User-Agent", self.config.user_agent());
        request.set_header("Accept", "application/json");
        if body.is_some() {
            request.set_header("Content-Type", "application/json");
        }
        if let Some(key) = IdempotencyKey::resolve(options.idempotency_key.as_ref(), kind) {
            request.set_header(IDEMPOTENCY_KEY_HEADER, key.as_str());
        }
        for (name, value) in self.config.default_headers().iter().chain(&options.headers) {
            request.set_header(name.as_str(), value.as_str());
        }
        request.body = body;
        Ok(request)
    }

    /// Fetch a single resource.
    ///
    /// # Errors
    ///
    /// The terminal error of the call, classification preserved.
    pub fn get<T: DeserializeOwned>(&self, path: &str, key: &str, options: &RequestOptions) -> Result<T, Error> {
        let request = self.build_request(HttpMethod::Get, path, &[], None, OperationKind::Read, options)?;
        self.send(&request, options, |response| decode_payload(response, key))
    }

    /// Fetch one page of a list endpoint.
    ///
    /// # Errors
    ///
    /// `Encode` for unencodable filters, otherwise as [`Client::get`].
    pub fn list<P, T>(&self, path: &str, params: &P, key: &str, options: &RequestOptions) -> Result<Page<T>, Error>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let query = query::encode(params)?;
        self.fetch_page(path, &query, key, options)
    }

    /// Lazily walk every page of a list endpoint, starting from the `after`
    /// filter in `params` if it has one.
    ///
    /// # Errors
    ///
    /// `Encode` for unencodable filters. Fetch errors surface on iteration.
    pub fn paginate<P, T>(
        &self,
        path: &str,
        params: &P,
        key: &str,
        options: RequestOptions,
    ) -> Result<Paginator<T>, Error>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let query = query::encode(params)?;
        Ok(Paginator::new(self.clone(), path, query, key, options))
    }

    /// `POST` a new resource, sending `{ key: params }` under an idempotency key.
    ///
    /// # Errors
    ///
    /// As [`Client::get`].
    pub fn create<P, T>(&self, path: &str, key: &str, params: &P, options: &RequestOptions) -> Result<T, Error>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = envelope(key, params)?;
        self.mutate(HttpMethod::Post, path, key, body, OperationKind::Create, options)
    }

    /// `PUT` changes to an identified resource.
    ///
    /// # Errors
    ///
    /// As [`Client::get`].
    pub fn update<P, T>(&self, path: &str, key: &str, params: &P, options: &RequestOptions) -> Result<T, Error>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = envelope(key, params)?;
        self.mutate(HttpMethod::Put, path, key, body, OperationKind::Update, options)
    }

    /// `POST` to an action endpoint, sending `{ "data": params }`.
    ///
    /// # Errors
    ///
    /// As [`Client::get`].
    pub fn action<P, T>(&self, path: &str, key: &str, params: &P, options: &RequestOptions) -> Result<T, Error>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = envelope(ACTION_BODY_KEY, params)?;
        self.mutate(HttpMethod::Post, path, key, body, OperationKind::Action, options)
    }

    pub(crate) fn fetch_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
        key: &str,
        options: &RequestOptions,
    ) -> Result<Page<T>, Error> {
        let request = self.build_request(HttpMethod::Get, path, query, None, OperationKind::Read, options)?;
        self.send(&request, options, |response| decode_page(response, key))
    }

    fn mutate<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        key: &str,
        body: String,
        kind: OperationKind,
        options: &RequestOptions,
    ) -> Result<T, Error> {
        let request = self.build_request(method, path, &[], Some(body), kind, options)?;
        self.send(&request, options, |response| decode_payload(response, key))
    }

    fn send<T, D>(&self, request: &HttpRequest, options: &RequestOptions, decode: D) -> Result<T, Error>
    where
        D: Fn(&HttpResponse) -> Result<T, Error>,
    {
        let policy = options
            .retry_policy
            .unwrap_or_else(|| self.config.retry_policy());
        retry(&policy, &options.context, |attempt| {
            tracing::debug!(method = %request.method, url = %request.url, attempt, "sending request");
            let response = self.transport.execute(request, &options.context)?;
            decode(&response)
        })
    }

    fn url(&self, path: &str, query: &[(String, String)]) -> Result<String, Error> {
        let base = self.config.base_url().as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}{path}"))
            .map_err(|err| Error::Encode(format!("invalid request path `{path}`: {err}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url.into())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Serialize `{ key: params }`.
fn envelope<P: Serialize + ?Sized>(key: &str, params: &P) -> Result<String, Error> {
    let value = serde_json::to_value(params).map_err(|err| Error::Encode(err.to_string()))?;
    let mut body = Map::new();
    body.insert(key.to_string(), value);
    serde_json::to_string(&Value::Object(body)).map_err(|err| Error::Encode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::testing::{error_body, json_response, ScriptedTransport};
    use crate::transport::TransportError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payment {
        id: String,
        amount: u64,
        currency: String,
    }

    #[derive(Serialize)]
    struct CreatePayment {
        amount: u64,
        currency: &'static str,
    }

    const PAYMENT: &str = r#"{"payments":{"id":"PM1","amount":500,"currency":"GBP"}}"#;

    fn client(transport: &Arc<ScriptedTransport>) -> Client {
        let config = ClientConfig::builder("sk_test_123")
            .base_url("http://localhost:3000/")
            .header("X-Tenant", "acme")
            .build()
            .unwrap();
        Client::with_transport(config, transport.clone())
    }

    fn create_params() -> CreatePayment {
        CreatePayment {
            amount: 500,
            currency: "GBP",
        }
    }

    #[test]
    fn build_request_sets_standard_headers() {
        let transport = ScriptedTransport::new(Vec::new());
        let req = client(&transport)
            .build_request(HttpMethod::Get, "/payments/PM1", &[], None, OperationKind::Read, &RequestOptions::new())
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/payments/PM1");
        assert_eq!(req.header("authorization"), Some("Bearer sk_test_123"));
        assert_eq!(req.header(API_VERSION_HEADER), Some(crate::config::DEFAULT_API_VERSION));
        assert_eq!(req.header(CLIENT_LIBRARY_HEADER), Some(CLIENT_LIBRARY));
        assert_eq!(req.header("X-Tenant"), Some("acme"));
        assert!(req.header("User-Agent").is_some());
        assert!(req.header("Content-Type").is_none());
        assert!(req.header(IDEMPOTENCY_KEY_HEADER).is_none());
    }

    #[test]
    fn per_request_headers_win() {
        let transport = ScriptedTransport::new(Vec::new());
        let options = RequestOptions::new().header("x-tenant", "other");
        let req = client(&transport)
            .build_request(HttpMethod::Get, "/payments", &[], None, OperationKind::Read, &options)
            .unwrap();
        assert_eq!(req.header("X-Tenant"), Some("other"));
    }

    #[test]
    fn query_pairs_are_url_encoded() {
        let transport = ScriptedTransport::new(Vec::new());
        let query = vec![
            ("created_at[gt]".to_string(), "2024-01-01T00:00:00Z".to_string()),
            ("limit".to_string(), "2".to_string()),
        ];
        let req = client(&transport)
            .build_request(HttpMethod::Get, "/payments", &query, None, OperationKind::Read, &RequestOptions::new())
            .unwrap();
        let url = Url::parse(&req.url).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, query);
    }

    #[test]
    fn create_wraps_params_and_sends_idempotency_key() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(201, PAYMENT))]);
        let payment: Payment = client(&transport)
            .create("/payments", "payments", &create_params(), &RequestOptions::new())
            .unwrap();
        assert_eq!(payment.id, "PM1");

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(sent[0].header("Content-Type"), Some("application/json"));
        assert!(sent[0].header(IDEMPOTENCY_KEY_HEADER).is_some());
        let body: Value = serde_json::from_str(sent[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"payments": {"amount": 500, "currency": "GBP"}}));
    }

    #[test]
    fn idempotency_key_is_replayed_on_every_attempt() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout("read".into())),
            Ok(json_response(503, &error_body("internal_error", "busy"))),
            Ok(json_response(201, PAYMENT)),
        ]);
        let _: Payment = client(&transport)
            .create("/payments", "payments", &create_params(), &RequestOptions::new())
            .unwrap();

        let keys: Vec<String> = transport
            .requests()
            .iter()
            .map(|req| req.header(IDEMPOTENCY_KEY_HEADER).unwrap().to_string())
            .collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|key| key == &keys[0]));
    }

    #[test]
    fn separate_operations_get_separate_keys() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(201, PAYMENT)), Ok(json_response(201, PAYMENT))]);
        let client = client(&transport);
        for _ in 0..2 {
            let _: Payment = client
                .create("/payments", "payments", &create_params(), &RequestOptions::new())
                .unwrap();
        }
        let sent = transport.requests();
        assert_ne!(sent[0].header(IDEMPOTENCY_KEY_HEADER), sent[1].header(IDEMPOTENCY_KEY_HEADER));
    }

    #[test]
    fn caller_supplied_key_is_used_verbatim() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(201, PAYMENT))]);
        let options = RequestOptions::new().idempotency_key("order-42");
        let _: Payment = client(&transport)
            .create("/payments", "payments", &create_params(), &options)
            .unwrap();
        assert_eq!(transport.requests()[0].header(IDEMPOTENCY_KEY_HEADER), Some("order-42"));
    }

    #[test]
    fn update_sends_no_generated_key() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, PAYMENT))]);
        let _: Payment = client(&transport)
            .update("/payments/PM1", "payments", &serde_json::json!({"metadata": {"a": "b"}}), &RequestOptions::new())
            .unwrap();
        let sent = transport.requests();
        assert_eq!(sent[0].method, HttpMethod::Put);
        assert!(sent[0].header(IDEMPOTENCY_KEY_HEADER).is_none());
    }

    #[test]
    fn action_wraps_params_in_data() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, PAYMENT))]);
        let _: Payment = client(&transport)
            .action("/payments/PM1/actions/cancel", "payments", &serde_json::json!({}), &RequestOptions::new())
            .unwrap();
        let sent = transport.requests();
        assert_eq!(sent[0].body.as_deref(), Some(r#"{"data":{}}"#));
        assert!(sent[0].header(IDEMPOTENCY_KEY_HEADER).is_some());
    }

    #[test]
    fn validation_error_is_returned_without_retry() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(400, &error_body("invalid_api_usage", "x"))),
            Ok(json_response(201, PAYMENT)),
        ]);
        let err = client(&transport)
            .create::<_, Payment>("/payments", "payments", &create_params(), &RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.api_error().unwrap().message, "x");
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn three_failures_exhaust_the_budget_before_a_success() {
        let busy = || Ok(json_response(503, &error_body("internal_error", "busy")));
        let transport = ScriptedTransport::new(vec![busy(), busy(), busy(), Ok(json_response(200, PAYMENT))]);
        let err = client(&transport)
            .get::<Payment>("/payments/PM1", "payments", &RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.api_error().unwrap().status, 503);
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn per_call_retry_policy_overrides_config() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Connect("refused".into())),
            Ok(json_response(200, PAYMENT)),
        ]);
        let options = RequestOptions::new().retry_policy(RetryPolicy::no_retries());
        let err = client(&transport)
            .get::<Payment>("/payments/PM1", "payments", &options)
            .unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Connect(_))));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn missing_payload_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, r#"{"mandates":{}}"#))]);
        let err = client(&transport)
            .get::<Payment>("/payments/PM1", "payments", &RequestOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::MissingResult { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn cancelled_call_never_reaches_the_transport() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, PAYMENT))]);
        let token = CancellationToken::new();
        token.cancel();
        let options = RequestOptions::new().context(CallContext::new().with_cancellation(token));
        let err = client(&transport)
            .get::<Payment>("/payments/PM1", "payments", &options)
            .unwrap_err();
        assert!(err.is_cancellation());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn create_round_trips_every_field() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Mandate {
            scheme: String,
            reference: String,
            metadata: std::collections::BTreeMap<String, String>,
        }
        let params = Mandate {
            scheme: "bacs".to_string(),
            reference: "REF-1".to_string(),
            metadata: [("order".to_string(), "42".to_string())].into(),
        };
        // The scripted server mirrors the request body back.
        let transport = ScriptedTransport::echo();
        let created: Mandate = client(&transport)
            .create("/mandates", "mandates", &params, &RequestOptions::new())
            .unwrap();
        assert_eq!(created, params);
    }
}
