//! ABOUTME: Error types for parsing and evaluation failures in the template engine
//!
//! Mirrors the taxonomy in the specification's error-handling design: `Syntax`,
//! `Name`, `Type`, `Runtime`, and `TemplateNotFound`. Grounded on the teacher's
//! `error.rs`, which uses `thiserror` with rich contextual fields (function,
//! expected, actual, position) rather than bare string errors.

use thiserror::Error;

/// A `{line, col}` location in the original template/script source, attached to
/// errors as they bubble out of the evaluator so the first unhandled
/// rejection can report where rendering failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Raised at parse time; carries the failing location and a source snippet.
    #[error("syntax error at {span}: {message} ({snippet})")]
    Syntax {
        message: String,
        span: SourceSpan,
        snippet: String,
    },

    /// A symbol could not be resolved, or an assignment target was invalid.
    #[error("{message}")]
    Name { message: String, span: Option<SourceSpan> },

    /// An operator or function was applied to incompatible types.
    #[error("{function}: expected {expected}, got {actual}")]
    Type {
        function: String,
        expected: String,
        actual: String,
    },

    /// Propagated from user code, a loader, a filter/test/extension, or a
    /// rejected deferred value.
    #[error("{message}")]
    Runtime { message: String, span: Option<SourceSpan> },

    /// Surfaced to `include`/`extends` when the loader cannot find a template.
    #[error("template not found: {name}")]
    TemplateNotFound { name: String },
}

impl EngineError {
    pub fn syntax(message: impl Into<String>, span: SourceSpan, snippet: impl Into<String>) -> Self {
        EngineError::Syntax {
            message: message.into(),
            span,
            snippet: snippet.into(),
        }
    }

    pub fn name(message: impl Into<String>) -> Self {
        EngineError::Name {
            message: message.into(),
            span: None,
        }
    }

    pub fn name_at(message: impl Into<String>, span: SourceSpan) -> Self {
        EngineError::Name {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn type_error(function: &str, expected: &str, actual: &str) -> Self {
        EngineError::Type {
            function: function.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        EngineError::Runtime {
            message: message.into(),
            span: None,
        }
    }

    pub fn runtime_at(message: impl Into<String>, span: SourceSpan) -> Self {
        EngineError::Runtime {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn template_not_found(name: impl Into<String>) -> Self {
        EngineError::TemplateNotFound { name: name.into() }
    }

    /// Attaches a source location to errors that don't already carry one,
    /// preserving the original message (the user-visible contract in the spec).
    pub fn with_span(self, span: SourceSpan) -> Self {
        match self {
            EngineError::Name { message, span: None } => EngineError::Name {
                message,
                span: Some(span),
            },
            EngineError::Runtime { message, span: None } => EngineError::Runtime {
                message,
                span: Some(span),
            },
            other => other,
        }
    }

    pub fn is_template_not_found(&self) -> bool {
        matches!(self, EngineError::TemplateNotFound { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
