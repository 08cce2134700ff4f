//! Error types for the runtime engine

use thiserror::Error;

use crate::value::{Kind, Value};

/// Source location information for error messages
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}:{}:{}", file, self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// Stack frame for error traces and diagnostics.
///
/// Frames are informational only; control flow never consults them.
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub function_name: Option<String>,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.function_name.as_deref().unwrap_or("<anonymous>");
        match &self.file {
            Some(file) => write!(f, "    at {} ({}:{}:{})", name, file, self.line, self.column),
            None => write!(f, "    at {} (<eval>:{}:{})", name, self.line, self.column),
        }
    }
}

/// Main error type for the engine.
///
/// Every fallible operation returns `Result<_, JsError>`. A JavaScript `throw`
/// travels as [`JsError::Thrown`]; the native variants are materialized into
/// error objects of the matching constructor when JavaScript code catches them.
/// [`JsError::Internal`] marks a broken engine invariant and is never catchable
/// from JavaScript.
#[derive(Debug, Clone, Error)]
pub enum JsError {
    #[error("SyntaxError: {message} at {location}")]
    SyntaxError {
        message: String,
        location: SourceLocation,
    },

    #[error("TypeError: {message}")]
    TypeError { message: String },

    #[error("ReferenceError: {message}")]
    ReferenceError { message: String },

    #[error("RangeError: {message}")]
    RangeError { message: String },

    #[error("ModuleError: {message}")]
    ModuleError { message: String },

    /// A JavaScript value propagating as an exception
    #[error("Uncaught {value:?}")]
    Thrown { value: Value },

    /// A rejected promise was reclaimed without ever getting a handler
    #[error("Uncaught (in promise) {reason}")]
    UnhandledRejection { reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JsError {
    pub fn syntax_error(message: impl Into<String>, line: u32, column: u32) -> Self {
        JsError::SyntaxError {
            message: message.into(),
            location: SourceLocation {
                file: None,
                line,
                column,
            },
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        JsError::TypeError {
            message: message.into(),
        }
    }

    /// `name is not defined`
    pub fn reference_error(name: impl AsRef<str>) -> Self {
        JsError::ReferenceError {
            message: format!("{} is not defined", name.as_ref()),
        }
    }

    pub fn reference_error_with_message(message: impl Into<String>) -> Self {
        JsError::ReferenceError {
            message: message.into(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        JsError::RangeError {
            message: message.into(),
        }
    }

    pub fn module_error(message: impl Into<String>) -> Self {
        JsError::ModuleError {
            message: message.into(),
        }
    }

    /// Create an internal error for a violated engine invariant
    pub fn internal_error(message: impl Into<String>) -> Self {
        JsError::Internal(message.into())
    }

    /// Wrap a thrown JavaScript value
    pub fn thrown(value: Value) -> Self {
        JsError::Thrown { value }
    }

    /// Every propagating error has the `Error` kind.
    pub fn kind(&self) -> Kind {
        Kind::Error
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, JsError::Internal(_))
    }

    /// Name of the JavaScript constructor this error materializes as
    pub fn error_name(&self) -> &'static str {
        match self {
            JsError::SyntaxError { .. } => "SyntaxError",
            JsError::TypeError { .. } => "TypeError",
            JsError::ReferenceError { .. } => "ReferenceError",
            JsError::RangeError { .. } => "RangeError",
            JsError::ModuleError { .. }
            | JsError::Thrown { .. }
            | JsError::UnhandledRejection { .. }
            | JsError::Internal(_) => "Error",
        }
    }

    /// Message text without the constructor name prefix
    pub fn message(&self) -> String {
        match self {
            JsError::SyntaxError { message, .. }
            | JsError::TypeError { message }
            | JsError::ReferenceError { message }
            | JsError::RangeError { message }
            | JsError::ModuleError { message } => message.clone(),
            JsError::Thrown { value } => format!("{:?}", value),
            JsError::UnhandledRejection { reason } => format!("Uncaught (in promise) {}", reason),
            JsError::Internal(message) => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_error_message() {
        let err = JsError::reference_error("foo");
        assert_eq!(err.to_string(), "ReferenceError: foo is not defined");
        assert_eq!(err.error_name(), "ReferenceError");
    }

    #[test]
    fn test_errors_have_error_kind() {
        assert_eq!(JsError::type_error("x").kind(), Kind::Error);
        assert!(JsError::internal_error("broken").is_internal());
        assert!(!JsError::thrown(Value::Number(1.0)).is_internal());
    }

    #[test]
    fn test_unhandled_rejection_display() {
        let err = JsError::UnhandledRejection {
            reason: "Error: boom".to_string(),
        };
        assert_eq!(err.to_string(), "Uncaught (in promise) Error: boom");
        assert_eq!(err.error_name(), "Error");
    }

    #[test]
    fn test_stack_frame_display() {
        let frame = StackFrame {
            function_name: Some("main".to_string()),
            file: Some("app.js".to_string()),
            line: 3,
            column: 7,
        };
        assert_eq!(frame.to_string(), "    at main (app.js:3:7)");
    }
}
