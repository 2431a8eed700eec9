//! CHTL Lexer
//!
//! Tokenizes `.chtl` source into a stream of tokens. CHTL is brace structured:
//! elements, blocks and definitions nest with `{ }`, statements end with `;`.
//! Numbers keep their CSS unit, hyphenated identifiers (`font-size`) are one
//! token, and comments are kept as tokens so the parser can decide what to emit.
//!
//! # Example
//!
//! ```
//! use chtl_lexer::{Lexer, TokenKind};
//!
//! let tokens = Lexer::tokenize("div { id: box; }").unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::Identifier("div".into()));
//! assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
//! ```

pub mod lexer;
pub mod token;

pub use lexer::Lexer;
pub use token::{is_void_element, join_lexemes, Span, Token, TokenKind};

/// Lexer error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Lexer error at line {line}, column {column}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}
