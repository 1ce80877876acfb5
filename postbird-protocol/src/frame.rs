//! Call frames and transport selection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One call request: a function name plus its ordered parameters.
///
/// Field names are kept as they appear on the wire so a receiver needs no
/// schema beyond this shape:
///
/// ```json
/// {"FunctionName":"add","Params":[1,2]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    /// Name the receiving side resolves against its function registry.
    #[serde(rename = "FunctionName")]
    pub function_name: String,

    /// Loosely-typed positional parameters.
    #[serde(rename = "Params", default)]
    pub params: Vec<Value>,
}

impl CallFrame {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Appends one parameter.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Renders parameters as strings, the way push-channel calls carry them.
    pub fn string_params(&self) -> Vec<String> {
        self.params
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Transport binding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Back-to-back JSON records on a plain TCP stream.
    RawTcp,
    /// Named connect/call/disconnect events, one JSON object per line.
    #[default]
    PushChannel,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::RawTcp => write!(f, "raw_tcp"),
            TransportKind::PushChannel => write!(f, "push_channel"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw_tcp" | "rawtcp" | "tcp" => Ok(TransportKind::RawTcp),
            "push_channel" | "pushchannel" | "push" => Ok(TransportKind::PushChannel),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}
