// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RPC Replies
//!
//! `ResponseEnvelope` is the wire shape of an RPC reply; `RpcResponse` is what
//! an RPC caller gets back once the reply went through its handler.

use crate::handler::{HandlerError, HandlerOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a successful reply
pub const STATUS_OK: u16 = 200;
/// Status of a reply whose handler failed with a non-RPC error
pub const STATUS_INTERNAL_ERROR: u16 = 500;

pub(crate) const HANDLE_ERROR_PREFIX: &str = "error handle message content: ";

/// Error details carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: u16,
    #[serde(default)]
    pub info: Value,
}

/// Reply wire shape: `{status, response, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    #[serde(default)]
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    /// Normalizes a handler outcome.
    ///
    /// Success maps to 200, an `RpcError` to its own code, anything else to
    /// 500 with error code 0. The handler result is always kept as `response`.
    pub fn from_outcome(outcome: &HandlerOutcome) -> ResponseEnvelope {
        let Some(err) = &outcome.error else {
            return ResponseEnvelope {
                status: STATUS_OK,
                response: outcome.result.clone(),
                error: None,
            };
        };

        let status = match err {
            HandlerError::Rpc(rpc) => rpc.code,
            HandlerError::Internal(_) => STATUS_INTERNAL_ERROR,
        };

        ResponseEnvelope {
            status,
            response: outcome.result.clone(),
            error: Some(ErrorBody {
                message: format!("{HANDLE_ERROR_PREFIX}{err}"),
                code: err.code(),
                info: Value::Null,
            }),
        }
    }
}

/// The result of an RPC call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    code: Option<u16>,
    data: Value,
    error: Option<ErrorBody>,
}

impl RpcResponse {
    pub fn from_outcome(outcome: HandlerOutcome) -> RpcResponse {
        let error = outcome.error.map(|err| ErrorBody {
            message: err.to_string(),
            code: err.code(),
            info: Value::Null,
        });

        RpcResponse {
            code: outcome.code,
            data: outcome.result,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code() == STATUS_OK
    }

    /// The reply status; 500 when the handler did not report one.
    pub fn code(&self) -> u16 {
        self.code.unwrap_or(STATUS_INTERNAL_ERROR)
    }

    pub fn response_data(&self) -> &Value {
        &self.data
    }

    pub fn into_response_data(self) -> Value {
        self.data
    }

    pub fn error(&self) -> Option<&ErrorBody> {
        self.error.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|err| err.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RpcError;
    use serde_json::json;

    #[test]
    fn success_maps_to_200_without_error() {
        let envelope = ResponseEnvelope::from_outcome(&HandlerOutcome::ok(json!("test")));

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({ "status": 200, "response": "test" })
        );
    }

    #[test]
    fn rpc_error_keeps_its_code() {
        let outcome = HandlerOutcome::failed(
            json!("test"),
            RpcError::new("user not found", 404).into(),
        );

        let envelope = ResponseEnvelope::from_outcome(&outcome);

        assert_eq!(envelope.status, 404);
        assert_eq!(envelope.response, json!("test"));
        let error = envelope.error.unwrap();
        assert_eq!(error.code, 404);
        assert_eq!(error.message, "error handle message content: user not found");
        assert_eq!(error.info, Value::Null);
    }

    #[test]
    fn other_errors_map_to_500_with_code_zero() {
        let outcome = HandlerOutcome::failed(Value::Null, HandlerError::internal("boom"));

        let envelope = ResponseEnvelope::from_outcome(&outcome);

        assert_eq!(envelope.status, 500);
        assert_eq!(envelope.error.as_ref().map(|e| e.code), Some(0));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap()["error"]["info"],
            Value::Null
        );
    }

    #[test]
    fn rpc_response_defaults_to_500_without_code() {
        let response = RpcResponse::from_outcome(HandlerOutcome::ok(json!(1)));

        assert_eq!(response.code(), 500);
        assert!(!response.is_success());
        assert_eq!(response.error_message(), None);
    }

    #[test]
    fn rpc_response_exposes_code_data_and_error() {
        let ok = RpcResponse::from_outcome(HandlerOutcome::ok(json!({"id": 1})).with_code(200));
        assert!(ok.is_success());
        assert_eq!(ok.response_data(), &json!({"id": 1}));

        let failed = RpcResponse::from_outcome(
            HandlerOutcome::failed(Value::Null, RpcError::new("denied", 403).into()).with_code(403),
        );
        assert!(!failed.is_success());
        assert_eq!(failed.code(), 403);
        assert_eq!(failed.error_message(), Some("denied"));
        assert_eq!(failed.error().map(|e| e.code), Some(403));
    }
}
