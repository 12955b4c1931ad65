//! JSON-RPC 2.0 envelope parsing, validation, and serialization (§4.2).
//!
//! Parameter shape is intentionally NOT validated here: callers decode
//! `params`/`result` into concrete types via [`decode_params`], which raises
//! `InvalidParams` on failure. This module only enforces the structural
//! envelope invariants from §3/§4.2.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorObject, RichError};

/// A JSON-RPC 2.0 request/response identifier: a string, a finite number, or
/// null (§3 "Envelope", `id` invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    String(String),
    Number(serde_json::Number),
    Null,
}

impl Id {
    fn from_value(value: &Value) -> Result<Self, RichError> {
        match value {
            Value::String(s) => Ok(Id::String(s.clone())),
            Value::Number(n) => {
                if n.as_f64().is_some_and(f64::is_finite) {
                    Ok(Id::Number(n.clone()))
                } else {
                    Err(RichError::invalid_request(
                        "`id` must be a finite number, string, or null",
                    ))
                }
            }
            Value::Null => Ok(Id::Null),
            other => Err(RichError::invalid_request(format!(
                "`id` must be a string, finite number, or null; got {other}"
            ))),
        }
    }
}

/// A parsed, structurally valid JSON-RPC 2.0 message (§3 "Envelope").
///
/// Exactly one of the three variants is ever produced by [`Envelope::parse`]:
/// a request carries both `method` and `id`, a notification carries `method`
/// with no `id`, and a response carries `id` plus exactly one of
/// `result`/`error`.
#[derive(Debug, Clone)]
pub enum Envelope {
    Request {
        id: Id,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Id,
        outcome: Outcome,
    },
}

/// The success/failure payload of a [`Envelope::Response`].
#[derive(Debug, Clone)]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

impl Envelope {
    /// Parse and structurally validate a single JSON-RPC message (§4.2
    /// "Validation rules"). Does not perform any framing; callers pass in
    /// the bytes of exactly one complete message as produced by the
    /// transport layer.
    pub fn parse(bytes: &[u8]) -> Result<Self, RichError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| RichError::parse_error(format!("invalid JSON: {e}")))?;

        let Value::Object(map) = value else {
            return Err(RichError::parse_error("envelope must be a JSON object"));
        };

        let jsonrpc = map.get("jsonrpc").and_then(Value::as_str);
        if jsonrpc != Some("2.0") {
            return Err(RichError::invalid_request(
                "missing or incorrect `jsonrpc` field; expected \"2.0\"",
            ));
        }

        let method = map.get("method").and_then(Value::as_str).map(str::to_string);
        let has_id = map.contains_key("id");
        let id_value = map.get("id");
        let params = map.get("params").cloned();

        if let Some(method) = method {
            if has_id {
                let id = Id::from_value(id_value.expect("has_id implies Some"))?;
                Ok(Envelope::Request { id, method, params })
            } else {
                Ok(Envelope::Notification { method, params })
            }
        } else {
            let Some(id_value) = id_value else {
                return Err(RichError::invalid_request(
                    "a response without `method` must carry an `id`",
                ));
            };
            let id = Id::from_value(id_value)?;

            let result = map.get("result").cloned();
            let error = map.get("error").cloned();
            match (result, error) {
                (Some(result), None) => Ok(Envelope::Response {
                    id,
                    outcome: Outcome::Result(result),
                }),
                (None, Some(error)) => {
                    let error_object: ErrorObject = serde_json::from_value(error).map_err(|e| {
                        RichError::invalid_request(format!("malformed error object: {e}"))
                    })?;
                    Ok(Envelope::Response {
                        id,
                        outcome: Outcome::Error(error_object),
                    })
                }
                (None, None) => Err(RichError::invalid_request(
                    "a response must carry exactly one of `result`/`error`",
                )),
                (Some(_), Some(_)) => Err(RichError::invalid_request(
                    "a response must carry exactly one of `result`/`error`, not both",
                )),
            }
        }
    }

    /// Serialize this envelope to its wire JSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_wire()).expect("envelope always serializes")
    }

    fn to_wire(&self) -> Value {
        match self {
            Envelope::Request { id, method, params } => {
                let mut obj = serde_json::Map::new();
                obj.insert("jsonrpc".into(), Value::String("2.0".into()));
                obj.insert("id".into(), serde_json::to_value(id).unwrap());
                obj.insert("method".into(), Value::String(method.clone()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
                Value::Object(obj)
            }
            Envelope::Notification { method, params } => {
                let mut obj = serde_json::Map::new();
                obj.insert("jsonrpc".into(), Value::String("2.0".into()));
                obj.insert("method".into(), Value::String(method.clone()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
                Value::Object(obj)
            }
            Envelope::Response { id, outcome } => {
                let mut obj = serde_json::Map::new();
                obj.insert("jsonrpc".into(), Value::String("2.0".into()));
                obj.insert("id".into(), serde_json::to_value(id).unwrap());
                match outcome {
                    Outcome::Result(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    Outcome::Error(error) => {
                        obj.insert("error".into(), serde_json::to_value(error).unwrap());
                    }
                }
                Value::Object(obj)
            }
        }
    }

    /// Build a success response envelope for the given request id.
    pub fn response_result(id: Id, result: Value) -> Self {
        Envelope::Response {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// Build an error response envelope for the given request id.
    pub fn response_error(id: Id, error: ErrorObject) -> Self {
        Envelope::Response {
            id,
            outcome: Outcome::Error(error),
        }
    }
}

/// Decode a handler's raw `params` value into a concrete typed shape,
/// raising `InvalidParams` on failure (§4.2, §9 "Dynamic parameter typing").
pub fn decode_params<T: for<'de> Deserialize<'de>>(params: Option<&Value>) -> Result<T, RichError> {
    let value = params.cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| RichError::invalid_params(format!("failed to decode params: {e}")))
}
