//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::context::CallContext;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, TransportError};

type Outcome = Result<HttpResponse, TransportError>;

/// Replays queued outcomes in order and records every request it receives.
pub(crate) struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Outcome>>,
    requests: Mutex<Vec<HttpRequest>>,
    echo: bool,
}

impl ScriptedTransport {
    pub(crate) fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
            echo: false,
        })
    }

    /// Answers every request with its own body and status 201.
    pub(crate) fn echo() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            echo: true,
        })
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &HttpRequest, ctx: &CallContext) -> Result<HttpResponse, TransportError> {
        ctx.check()?;
        self.requests.lock().unwrap().push(request.clone());
        if self.echo {
            return Ok(json_response(201, request.body.as_deref().unwrap_or("{}")));
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("no scripted response left".into())))
    }
}

pub(crate) fn json_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: body.as_bytes().to_vec(),
    }
}

pub(crate) fn error_body(error_type: &str, message: &str) -> String {
    serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "code": 0,
            "errors": [],
        }
    })
    .to_string()
}

/// A list response for `key` with the given item ids and `after` cursor.
pub(crate) fn page_body(key: &str, ids: &[&str], after: Option<&str>) -> String {
    let items: Vec<_> = ids.iter().map(|id| serde_json::json!({ "id": id })).collect();
    serde_json::json!({
        key: items,
        "meta": { "cursors": { "after": after, "before": null }, "limit": ids.len() },
    })
    .to_string()
}
