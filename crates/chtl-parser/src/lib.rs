//! CHTL Parser
//!
//! Turns scanned, tokenized CHTL into an expanded element tree. The crate holds
//! the two halves of compilation:
//!
//! - the syntax pass: [`Parser`] builds a [`SyntaxTree`] where template usages,
//!   style items and specializations are still unexpanded;
//! - the semantic pass: [`loader::discover`] fills a [`Registry`] by following
//!   imports, then [`loader::resolve`] runs the [`Expander`] against it to
//!   produce a [`Document`] ready for code generation.
//!
//! ```text
//! entry.chtl → discover() → Registry ─┐
//! entry.chtl ───────────────────────→ resolve() → Document
//! ```

pub mod ast;
pub mod config;
pub mod eval;
pub mod expand;
pub mod expr;
pub mod loader;
pub mod parser;
pub mod registry;
pub mod specialize;
pub mod value;

pub use ast::{Ast, DefKind, Definition, Node, NodeId};
pub use config::{CompileOptions, Configuration};
pub use expand::{Document, Expander};
pub use loader::{compile_file, compile_source, discover, resolve};
pub use parser::{ParseMode, ParseOptions, Parser, SyntaxTree};
pub use registry::Registry;
pub use value::StyleValue;

use chtl_lexer::LexerError;
use chtl_scanner::ScanError;

/// Parser error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl From<LexerError> for ParseError {
    fn from(e: LexerError) -> Self {
        ParseError {
            message: e.message,
            line: e.line,
            column: e.column,
        }
    }
}

/// Any error that stops a compilation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexerError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("`{name}` is already defined in namespace `{namespace}` (line {line}, column {column})")]
    DuplicateDefinition {
        name: String,
        namespace: String,
        line: usize,
        column: usize,
    },

    #[error("{kind} `{name}` not found in namespace `{namespace}` or the global namespace")]
    TemplateNotFound {
        kind: String,
        name: String,
        namespace: String,
        line: usize,
        column: usize,
    },

    #[error("property `{property}` not found on `{selector}`")]
    PropertyNotFound { selector: String, property: String },

    #[error("specialization target `{selector}` not found")]
    TargetNotFound { selector: String },

    #[error("specialization error: {message}")]
    Specialization { message: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("unit mismatch: `{left}` {op} `{right}`")]
    UnitMismatch {
        left: String,
        op: String,
        right: String,
    },

    #[error("import `{path}` not found (imported from `{from}`)")]
    ImportNotFound { path: String, from: String },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("cannot read `{path}`: {message}")]
    Io { path: String, message: String },
}

impl CompileError {
    /// Taxonomy name used when reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Lex(_) => "LexError",
            CompileError::Scan(ScanError::UnmatchedBrace { .. }) => "UnmatchedBrace",
            CompileError::Parse(_) => "ParseError",
            CompileError::DuplicateDefinition { .. } => "DuplicateDefinition",
            CompileError::TemplateNotFound { .. } => "TemplateNotFound",
            CompileError::PropertyNotFound { .. } => "PropertyNotFound",
            CompileError::TargetNotFound { .. } => "TargetNotFound",
            CompileError::Specialization { .. } => "SpecializationError",
            CompileError::TypeMismatch { .. } => "TypeMismatch",
            CompileError::DivisionByZero => "DivisionByZero",
            CompileError::UnitMismatch { .. } => "UnitMismatch",
            CompileError::ImportNotFound { .. } => "ImportNotFound",
            CompileError::ConstraintViolation { .. } => "ConstraintViolation",
            CompileError::Io { .. } => "Io",
        }
    }

    /// Line and column of the error, when the error carries one.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            CompileError::Lex(e) => Some((e.line, e.column)),
            CompileError::Scan(e) => Some(e.position()),
            CompileError::Parse(e) => Some((e.line, e.column)),
            CompileError::DuplicateDefinition { line, column, .. }
            | CompileError::TemplateNotFound { line, column, .. } => Some((*line, *column)),
            _ => None,
        }
    }

    pub(crate) fn specialization(message: impl Into<String>) -> Self {
        CompileError::Specialization {
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(message: impl Into<String>) -> Self {
        CompileError::TypeMismatch {
            message: message.into(),
        }
    }
}
