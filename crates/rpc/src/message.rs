//! Wire messages.
//!
//! Each message is one JSON object on its own line, discriminated by a
//! `type` field:
//!
//! | type            | fields                      | direction          |
//! |-----------------|-----------------------------|--------------------|
//! | `control`       | `state`                     | controller → worker |
//! | `function_call` | `function`, `params`        | controller → worker |
//! | `log`           | `fields`                    | worker → controller |
//! | `return`        | `value`, `error`, `fatal`   | worker → controller |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::sanitize;

/// Session state requested by a control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Orderly shutdown
    Exit,
}

/// One framed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Session control
    Control { state: State },
    /// Invoke a named executor
    FunctionCall {
        function: String,
        #[serde(default)]
        params: Value,
    },
    /// A serialized log record forwarded from the worker
    Log { fields: String },
    /// The result of exactly one prior function call
    Return(Return),
}

impl Message {
    /// The wire tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Control { .. } => "control",
            Self::FunctionCall { .. } => "function_call",
            Self::Log { .. } => "log",
            Self::Return(_) => "return",
        }
    }

    /// Serialize to a sanitized, newline-terminated frame.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        let mut line = sanitize::escape_json(&json);
        line.push('\n');
        Ok(line)
    }

    /// Parse one received line (without its newline).
    ///
    /// `side` names the receiving end for error messages.
    pub fn decode(line: &[u8], side: &'static str) -> Result<Self> {
        if !sanitize::is_sanitized(line) {
            return Err(Error::Unsanitized {
                side,
                preview: sanitize::preview(line),
            });
        }
        Ok(serde_json::from_slice(line)?)
    }
}

/// The result of a function call.
///
/// On the wire `error` is always a string; the empty string means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Return {
    #[serde(default)]
    pub value: Value,
    #[serde(default, with = "error_string")]
    pub error: Option<String>,
    #[serde(default)]
    pub fatal: bool,
}

impl Return {
    /// A successful return carrying a value
    pub fn value(value: Value) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    /// A failed call; the session continues
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// An unrecoverable failure; the worker exits after sending it
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            fatal: true,
            ..Default::default()
        }
    }

    /// Reconstruct the call result on the receiving side.
    pub fn into_result(self) -> Result<Value> {
        match (self.error, self.fatal) {
            (Some(message), true) => Err(Error::Fatal(message)),
            (None, true) => Err(Error::Fatal("worker terminated".into())),
            (Some(message), false) => Err(Error::Remote(message)),
            (None, false) => Ok(self.value),
        }
    }
}

mod error_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(error: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(error.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<String>::deserialize(d)?.filter(|s| !s.is_empty()))
    }
}
