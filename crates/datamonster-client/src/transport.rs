//! The transport seam and response payload classification.
//!
//! Higher layers (pagination, the facade) are written against [`Transport`] rather
//! than a concrete HTTP session, so the full request flow can be exercised against
//! a scripted in-memory transport in tests.

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use datamonster_core::{DmError, Result};

/// Content type of JSON responses.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type of binary table responses.
pub const CONTENT_TYPE_AVRO: &str = "avro/binary";

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A parsed JSON document.
    Json(Value),
    /// Raw bytes of a binary table payload.
    Binary(Vec<u8>),
}

impl Payload {
    /// Unwraps a JSON payload, failing if the response was binary.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Binary(_) => Err(DmError::UnsupportedContentType(
                CONTENT_TYPE_AVRO.to_string(),
            )),
        }
    }

    /// Unwraps a binary payload, failing if the response was JSON.
    pub fn into_binary(self) -> Result<Vec<u8>> {
        match self {
            Self::Binary(bytes) => Ok(bytes),
            Self::Json(_) => Err(DmError::UnsupportedContentType(
                CONTENT_TYPE_JSON.to_string(),
            )),
        }
    }
}

/// Authenticated access to the DataMonster service.
///
/// Implementations issue a single request per call and classify the response;
/// they do not follow pagination links or interpret payload contents.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Issues a GET for `path`, with optional extra headers.
    async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Result<Payload>;

    /// Issues a POST for `path` with a JSON body, with optional extra headers.
    async fn post(&self, path: &str, body: &Value, headers: &[(&str, &str)]) -> Result<Payload>;
}

/// Classifies a complete response into a [`Payload`].
///
/// Non-200 statuses fail with [`DmError::Api`]; recognized content types are
/// `application/json` and `avro/binary`, anything else fails with
/// [`DmError::UnsupportedContentType`].
pub fn classify_response(
    status: u16,
    reason: &str,
    content_type: &str,
    body: Vec<u8>,
) -> Result<Payload> {
    if status != 200 {
        return Err(DmError::Api {
            status,
            reason: reason.to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    // Parameters like "; charset=utf-8" are not significant here.
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();

    match media_type {
        CONTENT_TYPE_JSON => {
            let value = serde_json::from_slice(&body).map_err(|e| DmError::Parse(e.to_string()))?;
            Ok(Payload::Json(value))
        }
        CONTENT_TYPE_AVRO => Ok(Payload::Binary(body)),
        other => Err(DmError::UnsupportedContentType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_responses_are_parsed() {
        let body = br#"{"results": []}"#.to_vec();
        let payload = classify_response(200, "OK", "application/json", body).unwrap();
        assert_eq!(payload, Payload::Json(json!({"results": []})));
    }

    #[test]
    fn avro_responses_stay_raw() {
        let payload = classify_response(200, "OK", "avro/binary", vec![1, 2, 3]).unwrap();
        assert_eq!(payload, Payload::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn charset_parameter_is_ignored() {
        let payload =
            classify_response(200, "OK", "application/json; charset=utf-8", b"{}".to_vec());
        assert!(matches!(payload, Ok(Payload::Json(_))));
    }

    #[test]
    fn non_200_carries_reason_and_body() {
        let err = classify_response(403, "FORBIDDEN", "application/json", b"denied".to_vec())
            .unwrap_err();
        match err {
            DmError::Api {
                status,
                reason,
                body,
            } => {
                assert_eq!(status, 403);
                assert_eq!(reason, "FORBIDDEN");
                assert_eq!(body, "denied");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_content_type_is_rejected() {
        let err = classify_response(200, "OK", "text/html", b"<html>".to_vec()).unwrap_err();
        assert!(matches!(err, DmError::UnsupportedContentType(t) if t == "text/html"));
    }
}
