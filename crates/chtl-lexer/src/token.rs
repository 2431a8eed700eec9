/// A position in source text, tracking byte offsets plus line and column for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

/// Token classification for CHTL source.
///
/// Data-carrying variants embed their value directly. CHTL keywords are
/// contextual (`top`, `inherit` and `after` are also CSS values), so they are
/// lexed as identifiers and recognized by the parser with [`Token::is_word`].
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals (carry data)
    Identifier(String),
    String(String),
    /// A number with its optional unit: `100px`, `1.5`, `50%`.
    Number { value: f64, unit: String },
    /// `// line` and `/* block */` comments. Not emitted.
    Comment(String),
    /// `-- comment`, emitted into the generated HTML.
    GeneratorComment(String),

    // Delimiters
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // Punctuation
    Semicolon,
    Colon,
    Equals,
    Comma,
    Dot,
    Hash,
    At,
    Ampersand,
    Question,
    Bang,
    Arrow,

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Gt,
    Lt,
    Gte,
    Lte,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,

    // End of input
    Eof,
}

impl TokenKind {
    /// Binary and ternary operators understood by the style expression grammar.
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::StarStar
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::Gt
                | TokenKind::Lt
                | TokenKind::Gte
                | TokenKind::Lte
                | TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::AndAnd
                | TokenKind::OrOr
                | TokenKind::Question
        )
    }
}

/// A token produced by the CHTL lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The exact source text of the token.
    pub lexeme: String,
    pub span: Span,
    /// Whether whitespace (or a comment) separated this token from the previous one.
    pub spaced: bool,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span, spaced: bool) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
            spaced,
        }
    }

    /// Check if the token is the identifier `word`.
    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Identifier(name) if name == word)
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

/// Rebuild source-like text from a token run.
///
/// Tokens are joined by their lexemes with a single space wherever the source
/// had whitespace, so `1px solid black` and `rgb(0, 0, 0)` round-trip while
/// spacing noise collapses.
pub fn join_lexemes(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.is_eof() {
            break;
        }
        if i > 0 && token.spaced {
            out.push(' ');
        }
        out.push_str(&token.lexeme);
    }
    out
}

/// HTML5 void elements (self-closing, no children).
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Check if a tag name is an HTML5 void element.
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}
