//! Response classification.
//!
//! Runs once per attempt, inside the retry loop, so every response is turned
//! into a typed payload or a classified `Error` before the loop decides
//! whether to go again.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, Error};
use crate::http::HttpResponse;
use crate::types::{ListMeta, Page};

/// Longest body prefix kept in a `Decode` error.
pub const SNIPPET_LIMIT: usize = 512;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

/// Decode the payload stored under `key` in a successful response.
///
/// # Errors
///
/// `Api` or `Decode` for non-2xx responses, `MissingResult` when `key` is
/// absent or null, `Decode` when the body or the payload is malformed.
pub fn decode_payload<T: DeserializeOwned>(response: &HttpResponse, key: &str) -> Result<T, Error> {
    let mut envelope = success_envelope(response)?;
    let payload = take_key(&mut envelope, key)?;
    from_payload(response, payload)
}

/// Decode one page of a list endpoint: items under `key` plus `meta`.
///
/// A missing `meta` object is read as "no further pages".
///
/// # Errors
///
/// Same as [`decode_payload`].
pub fn decode_page<T: DeserializeOwned>(response: &HttpResponse, key: &str) -> Result<Page<T>, Error> {
    let mut envelope = success_envelope(response)?;
    let items = from_payload(response, take_key(&mut envelope, key)?)?;
    let meta: ListMeta = match envelope.remove("meta") {
        Some(Value::Null) | None => ListMeta::default(),
        Some(meta) => from_payload(response, meta)?,
    };
    Ok(Page { items, meta })
}

/// Turn a non-2xx response into the matching `Error`.
pub fn decode_error(response: &HttpResponse) -> Error {
    match serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        Ok(ErrorEnvelope { mut error }) => {
            error.status = response.status;
            Error::Api(error)
        }
        Err(err) => decode_failure(response, err.to_string()),
    }
}

fn success_envelope(response: &HttpResponse) -> Result<Map<String, Value>, Error> {
    if !response.is_success() {
        return Err(decode_error(response));
    }
    match serde_json::from_slice::<Value>(&response.body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(decode_failure(response, "response body is not a JSON object".to_string())),
        Err(err) => Err(decode_failure(response, err.to_string())),
    }
}

fn take_key(envelope: &mut Map<String, Value>, key: &str) -> Result<Value, Error> {
    match envelope.remove(key) {
        Some(Value::Null) | None => Err(Error::MissingResult { key: key.to_string() }),
        Some(value) => Ok(value),
    }
}

fn from_payload<T: DeserializeOwned>(response: &HttpResponse, value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|err| decode_failure(response, err.to_string()))
}

fn decode_failure(response: &HttpResponse, reason: String) -> Error {
    Error::Decode {
        status: response.status,
        reason,
        snippet: snippet(&response.body),
    }
}

/// At most `SNIPPET_LIMIT` bytes of `body`, cut on a char boundary. Invalid
/// UTF-8 is replaced, not rejected.
fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= SNIPPET_LIMIT {
        return text.into_owned();
    }
    let mut end = SNIPPET_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::error::ApiErrorType;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payment {
        id: String,
        amount: u64,
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn payload_is_read_from_the_key() {
        let payment: Payment =
            decode_payload(&response(200, r#"{"payments":{"id":"PM1","amount":500}}"#), "payments").unwrap();
        assert_eq!(payment, Payment { id: "PM1".to_string(), amount: 500 });
    }

    #[test]
    fn absent_key_is_a_missing_result() {
        let err = decode_payload::<Payment>(&response(201, r#"{"mandates":{}}"#), "payments").unwrap_err();
        assert!(matches!(err, Error::MissingResult { key } if key == "payments"));

        let err = decode_payload::<Payment>(&response(200, r#"{"payments":null}"#), "payments").unwrap_err();
        assert!(matches!(err, Error::MissingResult { .. }));
    }

    #[test]
    fn malformed_success_body_is_a_decode_error() {
        let err = decode_payload::<Payment>(&response(200, "not json"), "payments").unwrap_err();
        assert!(matches!(err, Error::Decode { status: 200, .. }));

        let err = decode_payload::<Payment>(&response(200, "[1,2]"), "payments").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));

        let err =
            decode_payload::<Payment>(&response(200, r#"{"payments":{"id":"PM1"}}"#), "payments").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn invalid_utf8_body_is_a_decode_error() {
        let http = HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: b"{\"payments\":\"\xff\xfe\"}".to_vec(),
        };
        match decode_payload::<String>(&http, "payments").unwrap_err() {
            Error::Decode { status, snippet, .. } => {
                assert_eq!(status, 200);
                assert!(snippet.starts_with(r#"{"payments":""#));
                assert!(snippet.contains('\u{fffd}'));
            }
            other => panic!("expected decode error, got {other:?}"),
        }

        let http = HttpResponse { status: 502, ..http };
        assert!(matches!(decode_error(&http), Error::Decode { status: 502, .. }));
    }

    #[test]
    fn error_object_becomes_an_api_error_with_status() {
        let body = r#"{"error":{"message":"x","type":"validation_failed","code":422,
            "errors":[{"field":"amount","message":"must be positive"}]}}"#;
        let err = decode_payload::<Payment>(&response(422, body), "payments").unwrap_err();
        let api = err.api_error().unwrap();
        assert_eq!(api.status, 422);
        assert_eq!(api.message, "x");
        assert_eq!(api.error_type, ApiErrorType::ValidationFailed);
        assert_eq!(api.errors[0].field.as_deref(), Some("amount"));
    }

    #[test]
    fn non_json_error_body_keeps_status_and_snippet() {
        let body = format!("<html>{}</html>", "x".repeat(2000));
        let err = decode_error(&response(502, &body));
        match err {
            Error::Decode { status, snippet, .. } => {
                assert_eq!(status, 502);
                assert_eq!(snippet.len(), SNIPPET_LIMIT);
                assert!(snippet.starts_with("<html>"));
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let body = "é".repeat(SNIPPET_LIMIT);
        let cut = snippet(body.as_bytes());
        assert!(cut.len() <= SNIPPET_LIMIT);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn page_reads_items_and_cursors() {
        let body = r#"{"payments":[{"id":"PM1","amount":1},{"id":"PM2","amount":2}],
            "meta":{"cursors":{"after":"PM2","before":null},"limit":2}}"#;
        let page: Page<Payment> = decode_page(&response(200, body), "payments").unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.after(), Some("PM2"));
        assert_eq!(page.before(), None);
        assert_eq!(page.meta.limit, Some(2));
    }

    #[test]
    fn page_without_meta_has_no_cursor() {
        let page: Page<Payment> = decode_page(&response(200, r#"{"payments":[]}"#), "payments").unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.after(), None);
    }
}
