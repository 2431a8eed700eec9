use crate::token::{Span, Token, TokenKind};
use crate::LexerError;

/// CHTL source lexer.
///
/// Tokenizes `.chtl` markup (and the interiors of style fragments, which use
/// the same token set) into a vector of tokens.
///
/// - `Vec<char>` source for index-based navigation, byte offsets tracked alongside
/// - Position tracking on every token, optionally offset to a fragment origin
/// - A `spaced` flag on every token so value text can be rebuilt from tokens
pub struct Lexer<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    offset: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    spaced: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'a str) -> Self {
        Self::with_origin(source, 1, 1)
    }

    /// Create a lexer whose reported positions start at `line`/`column`.
    ///
    /// Used for fragments cut out of a larger file by the unified scanner.
    pub fn with_origin(source: &'a str, line: usize, column: usize) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            offset: 0,
            line,
            column,
            tokens: Vec::new(),
            spaced: false,
        }
    }

    /// Tokenize the entire source into a vector of tokens.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexerError> {
        Lexer::new(source).run()
    }

    /// Tokenize starting from an explicit origin position.
    pub fn tokenize_at(source: &str, line: usize, column: usize) -> Result<Vec<Token>, LexerError> {
        Lexer::with_origin(source, line, column).run()
    }

    /// Consume the lexer and return every token, ending with `Eof`.
    pub fn run(mut self) -> Result<Vec<Token>, LexerError> {
        while !self.is_at_end() {
            self.scan_token()?;
        }
        let span = Span::new(self.offset, self.offset, self.line, self.column);
        let spaced = self.spaced;
        self.tokens.push(Token::new(TokenKind::Eof, "", span, spaced));
        Ok(self.tokens)
    }

    /// Scan the next token.
    fn scan_token(&mut self) -> Result<(), LexerError> {
        let ch = self.peek();

        match ch {
            ' ' | '\t' | '\r' | '\n' => {
                self.advance();
                self.spaced = true;
                Ok(())
            }

            // Comments
            '/' if self.peek_next() == '/' && self.comment_allowed() => self.scan_line_comment(),
            '/' if self.peek_next() == '*' => self.scan_block_comment(),
            '-' if self.peek_next() == '-' && self.is_generator_comment() => {
                self.scan_generator_comment()
            }

            // Strings
            '"' | '\'' => self.scan_string(),

            // Numbers, including a sign glued to the digits after a separator
            '0'..='9' => self.scan_number(),
            '-' if self.peek_next().is_ascii_digit() && self.sign_allowed() => self.scan_number(),

            // Identifiers (`-webkit-box`, `--main-color` count as identifiers)
            '-' if self.peek_next().is_alphabetic() || self.peek_next() == '-' => {
                self.scan_identifier()
            }
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            // Two-character operators
            '*' if self.peek_next() == '*' => self.double(TokenKind::StarStar),
            '>' if self.peek_next() == '=' => self.double(TokenKind::Gte),
            '<' if self.peek_next() == '=' => self.double(TokenKind::Lte),
            '=' if self.peek_next() == '=' => self.double(TokenKind::EqEq),
            '!' if self.peek_next() == '=' => self.double(TokenKind::NotEq),
            '&' if self.peek_next() == '&' => self.double(TokenKind::AndAnd),
            '|' if self.peek_next() == '|' => self.double(TokenKind::OrOr),
            '-' if self.peek_next() == '>' => self.double(TokenKind::Arrow),

            // Single-character tokens
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            ';' => self.single(TokenKind::Semicolon),
            ':' => self.single(TokenKind::Colon),
            '=' => self.single(TokenKind::Equals),
            ',' => self.single(TokenKind::Comma),
            '.' => self.single(TokenKind::Dot),
            '#' => self.single(TokenKind::Hash),
            '@' => self.single(TokenKind::At),
            '&' => self.single(TokenKind::Ampersand),
            '?' => self.single(TokenKind::Question),
            '!' => self.single(TokenKind::Bang),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '%' => self.single(TokenKind::Percent),
            '>' => self.single(TokenKind::Gt),
            '<' => self.single(TokenKind::Lt),

            _ => Err(self.error(format!("Unexpected character: '{ch}'"))),
        }
    }

    // --- Scanners ---

    /// Scan a string literal. The lexeme keeps the quotes; the value is unescaped.
    fn scan_string(&mut self) -> Result<(), LexerError> {
        let quote = self.peek();
        let start = self.mark();
        self.advance(); // consume opening quote

        let mut value = String::new();

        while !self.is_at_end() && self.peek() != quote {
            if self.peek() == '\\' {
                self.advance(); // consume backslash
                if self.is_at_end() {
                    return Err(self.error("Unterminated escape sequence".into()));
                }
                match self.peek() {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    c if c == quote => value.push(c),
                    c => {
                        value.push('\\');
                        value.push(c);
                    }
                }
                self.advance();
            } else {
                value.push(self.peek());
                self.advance();
            }
        }

        if self.is_at_end() {
            return Err(LexerError {
                message: "Unterminated string".into(),
                line: start.line,
                column: start.column,
            });
        }

        self.advance(); // consume closing quote
        self.push(TokenKind::String(value), start);
        Ok(())
    }

    /// Scan an identifier. Hyphens continue an identifier when followed by an
    /// alphanumeric character or another hyphen (`font-size`, `box--wide`).
    fn scan_identifier(&mut self) -> Result<(), LexerError> {
        let start = self.mark();
        let mut ident = String::new();
        ident.push(self.peek());
        self.advance();

        while !self.is_at_end()
            && (self.peek().is_alphanumeric()
                || self.peek() == '_'
                || (self.peek() == '-'
                    && (self.peek_next().is_alphanumeric() || self.peek_next() == '-')))
        {
            ident.push(self.peek());
            self.advance();
        }

        self.push(TokenKind::Identifier(ident), start);
        Ok(())
    }

    /// Scan a number literal (integer or float) with an optional unit.
    fn scan_number(&mut self) -> Result<(), LexerError> {
        let start = self.mark();
        let mut text = String::new();

        if self.peek() == '-' {
            text.push('-');
            self.advance();
        }
        while !self.is_at_end() && self.peek().is_ascii_digit() {
            text.push(self.peek());
            self.advance();
        }
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            text.push('.');
            self.advance();
            while !self.is_at_end() && self.peek().is_ascii_digit() {
                text.push(self.peek());
                self.advance();
            }
        }

        let value: f64 = text.parse().map_err(|_| LexerError {
            message: format!("Invalid number: '{text}'"),
            line: start.line,
            column: start.column,
        })?;

        let mut unit = String::new();
        if self.peek() == '%' {
            unit.push('%');
            self.advance();
        } else {
            while !self.is_at_end() && self.peek().is_ascii_alphabetic() {
                unit.push(self.peek());
                self.advance();
            }
        }

        self.push(TokenKind::Number { value, unit }, start);
        Ok(())
    }

    /// Scan a line comment (`// ...`).
    fn scan_line_comment(&mut self) -> Result<(), LexerError> {
        let start = self.mark();
        self.advance();
        self.advance();

        let mut content = String::new();
        while !self.is_at_end() && self.peek() != '\n' && self.peek() != '\r' {
            content.push(self.peek());
            self.advance();
        }

        self.push(TokenKind::Comment(content.trim().to_string()), start);
        self.spaced = true;
        Ok(())
    }

    /// Scan a block comment (`/* ... */`).
    fn scan_block_comment(&mut self) -> Result<(), LexerError> {
        let start = self.mark();
        self.advance();
        self.advance();

        let mut content = String::new();
        loop {
            if self.is_at_end() {
                return Err(LexerError {
                    message: "Unterminated block comment".into(),
                    line: start.line,
                    column: start.column,
                });
            }
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                break;
            }
            content.push(self.peek());
            self.advance();
        }

        self.push(TokenKind::Comment(content.trim().to_string()), start);
        self.spaced = true;
        Ok(())
    }

    /// Scan a generator comment (`-- ...`), which survives into the output.
    fn scan_generator_comment(&mut self) -> Result<(), LexerError> {
        let start = self.mark();
        self.advance();
        self.advance();

        let mut content = String::new();
        while !self.is_at_end() && self.peek() != '\n' && self.peek() != '\r' {
            content.push(self.peek());
            self.advance();
        }

        self.push(TokenKind::GeneratorComment(content.trim().to_string()), start);
        self.spaced = true;
        Ok(())
    }

    // --- Helpers ---

    /// `//` opens a comment only at the start of input or after whitespace or a
    /// structural character, so `url(http://x)` stays one value.
    fn comment_allowed(&self) -> bool {
        match self.pos.checked_sub(1).map(|at| self.chars[at]) {
            None => true,
            Some(c) => c.is_whitespace() || matches!(c, '{' | '}' | ';' | ','),
        }
    }

    /// `--` opens a generator comment only when followed by whitespace or the end of input.
    fn is_generator_comment(&self) -> bool {
        match self.chars.get(self.pos + 2) {
            None => true,
            Some(c) => c.is_whitespace(),
        }
    }

    /// A `-` may be glued to a number after whitespace or an opening separator.
    fn sign_allowed(&self) -> bool {
        match self.tokens.last() {
            None => true,
            Some(prev) => {
                self.spaced
                    || matches!(
                        prev.kind,
                        TokenKind::LParen
                            | TokenKind::Colon
                            | TokenKind::Comma
                            | TokenKind::Equals
                            | TokenKind::Question
                    )
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> Result<(), LexerError> {
        let start = self.mark();
        self.advance();
        self.push(kind, start);
        Ok(())
    }

    fn double(&mut self, kind: TokenKind) -> Result<(), LexerError> {
        let start = self.mark();
        self.advance();
        self.advance();
        self.push(kind, start);
        Ok(())
    }

    fn mark(&self) -> Span {
        Span::new(self.offset, self.offset, self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, start: Span) {
        let span = Span::new(start.start, self.offset, start.line, start.column);
        let lexeme = &self.source[start.start..self.offset];
        let spaced = self.spaced;
        self.tokens.push(Token::new(kind, lexeme, span, spaced));
        self.spaced = false;
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.pos]
        }
    }

    fn peek_next(&self) -> char {
        self.chars.get(self.pos + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) {
        if let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            self.offset += c.len_utf8();
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn error(&self, message: String) -> LexerError {
        LexerError {
            message,
            line: self.line,
            column: self.column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::join_lexemes;
    use pretty_assertions::assert_eq;

    /// Helper: tokenize and return token kinds (ignoring spans).
    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Identifier(name.into())
    }

    fn number(value: f64, unit: &str) -> TokenKind {
        TokenKind::Number {
            value,
            unit: unit.into(),
        }
    }

    // =========================================================================
    // Structure
    // =========================================================================

    #[test]
    fn test_empty_source() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_element_block() {
        assert_eq!(
            kinds("div { id: box; }"),
            vec![
                ident("div"),
                TokenKind::LBrace,
                ident("id"),
                TokenKind::Colon,
                ident("box"),
                TokenKind::Semicolon,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_template_header() {
        assert_eq!(
            kinds("[Template] @Style Base"),
            vec![
                TokenKind::LBracket,
                ident("Template"),
                TokenKind::RBracket,
                TokenKind::At,
                ident("Style"),
                ident("Base"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_index_selector() {
        assert_eq!(
            kinds("p[1]"),
            vec![
                ident("p"),
                TokenKind::LBracket,
                number(1.0, ""),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    // =========================================================================
    // Identifiers and numbers
    // =========================================================================

    #[test]
    fn test_hyphenated_identifier() {
        assert_eq!(kinds("font-size"), vec![ident("font-size"), TokenKind::Eof]);
    }

    #[test]
    fn test_vendor_and_custom_property_identifiers() {
        assert_eq!(
            kinds("-webkit-box --main-color"),
            vec![ident("-webkit-box"), ident("--main-color"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_number_with_unit() {
        assert_eq!(kinds("100px"), vec![number(100.0, "px"), TokenKind::Eof]);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(kinds("50%"), vec![number(50.0, "%"), TokenKind::Eof]);
    }

    #[test]
    fn test_float_number() {
        assert_eq!(kinds("1.5em"), vec![number(1.5, "em"), TokenKind::Eof]);
    }

    #[test]
    fn test_spaced_minus_is_operator() {
        assert_eq!(
            kinds("100px - 50px"),
            vec![
                number(100.0, "px"),
                TokenKind::Minus,
                number(50.0, "px"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_glued_minus_after_space_is_negative_number() {
        assert_eq!(
            kinds("0 -5px"),
            vec![number(0.0, ""), number(-5.0, "px"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_negative_after_colon() {
        assert_eq!(
            kinds("margin:-2px"),
            vec![
                ident("margin"),
                TokenKind::Colon,
                number(-2.0, "px"),
                TokenKind::Eof,
            ]
        );
    }

    // =========================================================================
    // Operators
    // =========================================================================

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("** >= <= == != && || ? ->"),
            vec![
                TokenKind::StarStar,
                TokenKind::Gte,
                TokenKind::Lte,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Question,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_single_pipe_rejected() {
        let err = Lexer::tokenize("a | b").unwrap_err();
        assert!(err.message.contains("Unexpected character"));
        assert_eq!(err.column, 3);
    }

    // =========================================================================
    // Strings
    // =========================================================================

    #[test]
    fn test_string_value_and_lexeme() {
        let tokens = Lexer::tokenize("\"hello\"").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String("hello".into()));
        assert_eq!(tokens[0].lexeme, "\"hello\"");
    }

    #[test]
    fn test_string_escaped_quote() {
        assert_eq!(
            kinds(r#"'it\'s'"#),
            vec![TokenKind::String("it's".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_string_unterminated() {
        let err = Lexer::tokenize("\"abc").unwrap_err();
        assert!(err.message.contains("Unterminated string"));
    }

    // =========================================================================
    // Comments
    // =========================================================================

    #[test]
    fn test_line_and_block_comments() {
        assert_eq!(
            kinds("// one\n/* two */ a"),
            vec![
                TokenKind::Comment("one".into()),
                TokenKind::Comment("two".into()),
                ident("a"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_generator_comment() {
        assert_eq!(
            kinds("-- shown in output\ndiv"),
            vec![
                TokenKind::GeneratorComment("shown in output".into()),
                ident("div"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_url_is_not_a_comment() {
        let tokens = Lexer::tokenize("url(http://x.png)").unwrap();
        assert_eq!(join_lexemes(&tokens), "url(http://x.png)");
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(Lexer::tokenize("/* open").is_err());
    }

    // =========================================================================
    // Positions and spacing
    // =========================================================================

    #[test]
    fn test_span_line_column() {
        let tokens = Lexer::tokenize("div\n  span").unwrap();
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.column, 3);
    }

    #[test]
    fn test_origin_offsets_positions() {
        let tokens = Lexer::tokenize_at("a\nb", 10, 5).unwrap();
        assert_eq!((tokens[0].span.line, tokens[0].span.column), (10, 5));
        assert_eq!((tokens[1].span.line, tokens[1].span.column), (11, 1));
    }

    #[test]
    fn test_join_lexemes_preserves_spacing() {
        let tokens = Lexer::tokenize("1px solid rgb(0, 0,0)").unwrap();
        assert_eq!(join_lexemes(&tokens), "1px solid rgb(0, 0,0)");
    }

    #[test]
    fn test_unicode_text_offsets() {
        let tokens = Lexer::tokenize("\"你好\" x").unwrap();
        assert_eq!(tokens[1].lexeme, "x");
        assert_eq!(tokens[1].span.column, 6);
    }
}
