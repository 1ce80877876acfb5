//! Push-channel events.

use crate::frame::CallFrame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named event on the push channel.
///
/// Each event is one JSON object on its own line, tagged by `event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PushEvent {
    /// Sent by the server once the session is registered.
    Connect { id: String },

    /// A call with string-typed arguments.
    Call {
        function: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Sent by a client that is leaving.
    Disconnect,
}

impl PushEvent {
    pub fn call(function: impl Into<String>, args: Vec<String>) -> Self {
        PushEvent::Call {
            function: function.into(),
            args,
        }
    }

    /// Converts a call event into a frame with string parameters.
    pub fn into_call_frame(self) -> Option<CallFrame> {
        match self {
            PushEvent::Call { function, args } => Some(
                CallFrame::new(function).with_params(args.into_iter().map(Value::String).collect()),
            ),
            _ => None,
        }
    }
}

impl From<&CallFrame> for PushEvent {
    fn from(frame: &CallFrame) -> Self {
        PushEvent::Call {
            function: frame.function_name.clone(),
            args: frame.string_params(),
        }
    }
}
