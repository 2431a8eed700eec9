//! CHTL Unified Scanner
//!
//! Splits one `.chtl` source file into typed code fragments before the CHTL
//! lexer ever sees it. Local `style { }` and `script { }` interiors and raw
//! `[Origin]` bodies are cut out and replaced by placeholders, so CSS, JS and
//! raw HTML never have to be tokenized as CHTL.
//!
//! ```text
//! source → scan() → ScanOutput { markup (with __FRAGMENT_n__), fragments }
//! ```
//!
//! # Example
//!
//! ```
//! use chtl_scanner::{scan, FragmentKind};
//!
//! let output = scan("div { style { color: red; } }").unwrap();
//! assert_eq!(output.markup, "div { style {__FRAGMENT_0__} }");
//!
//! let fragment = output.fragments.get("__FRAGMENT_0__").unwrap();
//! assert_eq!(fragment.kind, FragmentKind::Style);
//! assert_eq!(output.fragments.restore(&output.markup), "div { style { color: red; } }");
//! ```

pub mod fragment;
pub mod unified;

pub use fragment::{Fragment, FragmentKind, FragmentTable, PLACEHOLDER_PREFIX};
pub use unified::{scan, scan_with, ScanOutput};

/// Scanner error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    /// A block opened after `keyword` never closes.
    #[error("Scan error at line {line}, column {column}: unmatched brace after `{keyword}`")]
    UnmatchedBrace {
        keyword: String,
        line: usize,
        column: usize,
    },
}

impl ScanError {
    pub fn position(&self) -> (usize, usize) {
        match self {
            ScanError::UnmatchedBrace { line, column, .. } => (*line, *column),
        }
    }
}
