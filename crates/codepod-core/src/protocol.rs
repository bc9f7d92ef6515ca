//! JSON-RPC 2.0 wire types for the sandbox runtime.
//!
//! Every message is one JSON object on one line. Requests flow host → runtime
//! and carry numeric ids; the runtime may answer with a response or, while a
//! request is pending, issue a callback request whose id is a string starting
//! with [`CALLBACK_ID_PREFIX`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 standard error codes.
pub mod error_codes {
    /// Parse error - Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// Method not found - The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid params - Invalid method parameter(s).
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error - Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Prefix that marks a string id as belonging to a runtime-initiated callback.
pub const CALLBACK_ID_PREFIX: &str = "cb_";

/// The only callback method the runtime issues.
pub const EXTENSION_INVOKE: &str = "extension.invoke";

const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC 2.0 request.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    /// Protocol version, always "2.0".
    pub jsonrpc: &'static str,
    /// Request identifier.
    pub id: u64,
    /// Method name to invoke.
    pub method: &'a str,
    /// Method parameters (always an object for this runtime).
    pub params: Value,
}

impl<'a> Request<'a> {
    /// Build a request; `null` params are sent as an empty object.
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC 2.0 response to one of our requests.
#[derive(Debug, Deserialize)]
pub struct Response {
    /// Request identifier (matches request).
    #[serde(default)]
    pub id: Value,
    /// Result on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
    /// Additional error data (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request issued by the runtime back to the host mid-call.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackRequest {
    /// Opaque id, always prefixed with [`CALLBACK_ID_PREFIX`].
    pub id: String,
    /// Callback method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Host reply to a [`CallbackRequest`]. Exactly one is written per callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackResponse {
    /// Protocol version, always "2.0".
    pub jsonrpc: &'static str,
    /// The callback's id.
    pub id: String,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl CallbackResponse {
    /// Create a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: id.into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// True if this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One decoded line from the runtime.
#[derive(Debug)]
pub enum Incoming {
    /// The runtime wants the host to do something before it answers.
    Callback(CallbackRequest),
    /// The answer to the pending request.
    Response(Response),
}

impl Incoming {
    /// Decode and classify a line.
    ///
    /// A message is a callback iff it has a `method` field and a string id
    /// starting with [`CALLBACK_ID_PREFIX`]. Anything else is a response.
    ///
    /// A line classified as a callback always decodes; a `method` that is not
    /// a string is kept as its JSON text.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(line)?;
        let callback_id = value
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| id.starts_with(CALLBACK_ID_PREFIX))
            .map(str::to_string);

        let Some(id) = callback_id.filter(|_| value.get("method").is_some()) else {
            return serde_json::from_value(value).map(Self::Response);
        };

        let method = match value["method"].take() {
            Value::String(name) => name,
            other => other.to_string(),
        };
        let params = value.get_mut("params").map(Value::take).unwrap_or_default();
        Ok(Self::Callback(CallbackRequest { id, method, params }))
    }
}
