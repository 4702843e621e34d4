pub mod ansi;
pub mod json;
pub mod registry;

use crate::ast::Span;
use crate::compiler::CompileError;
use crate::interpreter::RuntimeError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::VmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// A program that finished with an error value rather than a fault.
    pub fn from_error_value(message: &str) -> Self {
        Diagnostic::error(message).with_code("MK-E001")
    }
}

// ---- From impls for each error tier ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("MK-L001")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let code = match e {
            CompileError::UnresolvedIdentifier { .. } => "MK-C001",
            CompileError::DuplicateDefinition { .. } => "MK-C002",
            CompileError::NotImplemented { .. } => "MK-C003",
            CompileError::InvalidAssignment { .. } => "MK-C004",
            CompileError::TooManyArguments { .. } => "MK-C005",
            CompileError::TooManyLocals { .. } => "MK-C006",
            CompileError::TooManyConstants => "MK-C007",
            CompileError::Code(_) | CompileError::Internal(_) => "MK-C008",
        };
        let mut d = Diagnostic::error(e.to_string()).with_code(code);
        if let Some(span) = e.span() {
            d = d.with_span(span, "here");
        }
        match e {
            CompileError::UnresolvedIdentifier { name, .. } => {
                d.with_suggestion(format!("declare it first: let {} = ...;", name))
            }
            CompileError::DuplicateDefinition { name, .. } => {
                d.with_suggestion(format!("assign instead of redeclaring: {} = ...;", name))
            }
            _ => d,
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let code = match e {
            VmError::StackOverflow => "MK-V001",
            VmError::StackUnderflow => "MK-V002",
            VmError::ArityMismatch { .. } => "MK-V003",
            VmError::DivisionByZero => "MK-V004",
            VmError::Code(_)
            | VmError::UnknownBuiltin { .. }
            | VmError::NotAFunction { .. }
            | VmError::BadConstant { .. }
            | VmError::BadGlobal { .. }
            | VmError::ReturnFromMain => "MK-V005",
        };
        Diagnostic::error(e.to_string()).with_code(code)
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let d = Diagnostic::error(&e.message).with_code("MK-R001");
        match e.span {
            Some(span) => d.with_span(span, "here"),
            None => d,
        }
    }
}
