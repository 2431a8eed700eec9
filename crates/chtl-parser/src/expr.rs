//! Style expression parser.
//!
//! Parses the token run of a property value into an [`Expr`] by precedence
//! climbing. Binding power, tightest first:
//!
//! ```text
//! **  >  * / %  >  + -  >  > < >= <=  >  == !=  >  &&  >  ||  >  ?:
//! ```
//!
//! `**` and `?:` are right-associative. Anything that is not an operator
//! chain is a literal, including multi-word values such as `1px solid black`.

use std::fmt;

use chtl_lexer::{join_lexemes, Token, TokenKind};

use crate::ParseError;

/// A parsed style expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        raw: String,
    },
    /// `box.width`, `.card.height`, `#main.margin`.
    PropertyRef {
        selector: String,
        property: String,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `cond ? then : otherwise`; a missing `otherwise` yields an empty value.
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinaryOp {
    fn from_token(kind: &TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Rem,
            TokenKind::StarStar => BinaryOp::Pow,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Gte => BinaryOp::Gte,
            TokenKind::Lte => BinaryOp::Lte,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::OrOr => BinaryOp::Or,
            _ => return None,
        })
    }

    /// Binding power; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::NotEq => 3,
            BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
            BinaryOp::Pow => 7,
        }
    }

    fn is_right_assoc(self) -> bool {
        self == BinaryOp::Pow
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Gte => ">=",
            BinaryOp::Lte => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Whether a value's tokens need the expression parser at all.
///
/// Plain CSS (`1px solid black`, `12px/1.5 Arial`, `rgb(0, 0, 0)`, `#fff`)
/// is passed through as raw text.
pub fn is_expression(tokens: &[Token]) -> bool {
    tokens.iter().enumerate().any(|(i, token)| {
        let next = tokens.get(i + 1);
        match &token.kind {
            TokenKind::Question | TokenKind::AndAnd | TokenKind::OrOr => true,
            kind if kind.is_operator() => {
                i > 0 && token.spaced && next.is_some_and(|n| n.spaced && !n.is_eof())
            }
            TokenKind::LParen => {
                let call = i > 0
                    && !token.spaced
                    && matches!(tokens[i - 1].kind, TokenKind::Identifier(_));
                !call
            }
            TokenKind::Dot => {
                property_ref_at(tokens, i.saturating_sub(1)).is_some()
                    || property_ref_at(tokens, i).is_some()
            }
            _ => false,
        }
    })
}

/// Match a property reference starting at `i`; returns `(selector, property, len)`.
fn property_ref_at(tokens: &[Token], i: usize) -> Option<(String, String, usize)> {
    let ident = |at: usize| match tokens.get(at).map(|t| (&t.kind, t.spaced)) {
        Some((TokenKind::Identifier(name), false)) => Some(name.clone()),
        _ => None,
    };
    let glued = |at: usize, kind: TokenKind| {
        tokens
            .get(at)
            .is_some_and(|t| t.kind == kind && !t.spaced)
    };

    let first = tokens.get(i)?;
    let (selector, next) = match &first.kind {
        TokenKind::Identifier(name) => (name.clone(), i + 1),
        TokenKind::Dot | TokenKind::Hash => {
            let sigil = if first.kind == TokenKind::Dot { "." } else { "#" };
            (format!("{sigil}{}", ident(i + 1)?), i + 2)
        }
        _ => return None,
    };
    if !glued(next, TokenKind::Dot) {
        return None;
    }
    let property = ident(next + 1)?;
    Some((selector, property, next + 2 - i))
}

/// Precedence-climbing expression parser over CHTL tokens.
pub struct ExprParser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> ExprParser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse a complete expression; every token must be consumed.
    pub fn parse(tokens: &'t [Token]) -> Result<Expr, ParseError> {
        let mut parser = ExprParser::new(tokens);
        let expr = parser.parse_ternary()?;
        if !parser.is_at_end() {
            return Err(parser.error(format!(
                "Unexpected '{}' in expression",
                parser.peek().map_or("", |t| t.lexeme.as_str())
            )));
        }
        Ok(expr)
    }

    /// `cond ? then : else`, `cond ? then, cond2 ? then2 : else`, `cond ? then`.
    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(1)?;
        if !self.check(&TokenKind::Question) {
            return Ok(cond);
        }
        self.advance();

        // Right-associative: `a ? b ? c : d : e` nests in the true branch.
        let then = self.parse_ternary()?;
        let otherwise = if self.check(&TokenKind::Colon) || self.check(&TokenKind::Comma) {
            self.advance();
            Some(Box::new(self.parse_ternary()?))
        } else {
            None
        };

        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise,
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_primary()?;

        while let Some(op) = self.peek().and_then(|t| BinaryOp::from_token(&t.kind)) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let next_min = if op.is_right_assoc() {
                precedence
            } else {
                precedence + 1
            };
            let right = self.parse_binary(next_min)?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::LParen) {
            self.advance();
            let inner = self.parse_ternary()?;
            if !self.check(&TokenKind::RParen) {
                return Err(self.error("Expected ')' in expression".into()));
            }
            self.advance();
            return Ok(inner);
        }

        if let Some((selector, property, len)) = property_ref_at(self.tokens, self.pos) {
            self.pos += len;
            return Ok(Expr::PropertyRef { selector, property });
        }

        let start = self.pos;
        while let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Identifier(_) if self.peek_at(1).is_some_and(is_call_paren) => {
                    self.advance();
                    self.skip_group()?;
                }
                TokenKind::Identifier(_)
                | TokenKind::Number { .. }
                | TokenKind::String(_)
                | TokenKind::Hash
                | TokenKind::Dot
                | TokenKind::Bang => self.advance(),
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.error(match self.peek() {
                Some(t) => format!("Expected value, got '{}'", t.lexeme),
                None => "Expected value".into(),
            }));
        }

        Ok(Expr::Literal {
            raw: join_lexemes(&self.tokens[start..self.pos]),
        })
    }

    /// Skip a balanced `( ... )` group starting at the cursor.
    fn skip_group(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.advance();
        }
        Err(self.error("Unclosed '(' in value".into()))
    }

    // --- Helpers ---

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).filter(|t| !t.is_eof())
    }

    fn peek_at(&self, n: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + n).filter(|t| !t.is_eof())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == *kind)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.peek().is_none()
    }

    fn error(&self, message: String) -> ParseError {
        let span = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default();
        ParseError {
            message,
            line: span.line,
            column: span.column,
        }
    }
}

fn is_call_paren(token: &Token) -> bool {
    token.kind == TokenKind::LParen && !token.spaced
}
