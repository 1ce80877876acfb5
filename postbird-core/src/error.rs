//! Core error types.

use thiserror::Error;

/// Per-call dispatch failures.
///
/// None of these are fatal to the connection that carried the call.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("arity mismatch calling '{function}': expected {expected} params, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch for param {index}: expected {expected_type}: {message}")]
    TypeMismatch {
        index: usize,
        expected_type: &'static str,
        message: String,
    },

    #[error("return value could not be serialized: {0}")]
    InvalidReturn(String),
}

impl DispatchError {
    /// Fills in the function name on errors raised below the dispatcher.
    pub(crate) fn for_function(self, name: &str) -> Self {
        match self {
            DispatchError::ArityMismatch {
                expected, actual, ..
            } => DispatchError::ArityMismatch {
                function: name.to_string(),
                expected,
                actual,
            },
            other => other,
        }
    }

    /// Stable short code, used in logs and statistics.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::UnknownFunction(_) => "UNKNOWN_FUNCTION",
            DispatchError::ArityMismatch { .. } => "ARITY_MISMATCH",
            DispatchError::TypeMismatch { .. } => "TYPE_MISMATCH",
            DispatchError::InvalidReturn(_) => "INVALID_RETURN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            DispatchError::UnknownFunction("x".into()).code(),
            "UNKNOWN_FUNCTION"
        );
        assert_eq!(
            DispatchError::ArityMismatch {
                function: "f".into(),
                expected: 1,
                actual: 2
            }
            .code(),
            "ARITY_MISMATCH"
        );
        assert_eq!(
            DispatchError::InvalidReturn("nan".into()).code(),
            "INVALID_RETURN"
        );
    }

    #[test]
    fn test_for_function_names_arity_errors() {
        let err = DispatchError::ArityMismatch {
            function: String::new(),
            expected: 2,
            actual: 3,
        }
        .for_function("add");
        let msg = err.to_string();
        assert!(msg.contains("'add'"));
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("got 3"));
    }
}
