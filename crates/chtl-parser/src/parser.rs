//! Syntax parser for CHTL.
//!
//! Runs the unified scanner, lexes the remaining markup and builds a
//! [`SyntaxTree`] by recursive descent. The parser never consults the
//! registry: definitions, imports and named origins are recorded in the tree
//! for the loader to register, and usages stay unexpanded.
//!
//! Style fragments cut out by the scanner are lexed on their own (with their
//! original positions) and parsed into [`StyleItem`]s here, so later passes
//! only ever see placeholders for scripts.

use chtl_lexer::{join_lexemes, Lexer, Token, TokenKind};
use chtl_scanner::{Fragment, FragmentKind, FragmentTable, PLACEHOLDER_PREFIX};
use tracing::debug;

use crate::ast::{
    Ast, CondBranch, Conditional, Constraint, DefBody, DefKind, Definition, Element, Import,
    ImportKind, Node, NodeId, Origin, StyleItem, StyleSource, StyleUsage, Usage,
};
use crate::config::Configuration;
use crate::specialize::{InsertPosition, Selector, SpecInstr, Specialization};
use crate::value::PropertyMap;
use crate::{CompileError, ParseError};

/// How much of a file the parser materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Registration pass: specialization blocks of usages outside definitions
    /// are skipped, since only definitions and imports are wanted.
    Discovery,
    #[default]
    Normal,
}

/// Per-file parser settings.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub mode: ParseMode,
    /// Namespace everything in the file belongs to (an import alias).
    pub namespace: String,
    /// Configuration in effect before the file's own `[Configuration]` blocks.
    pub configuration: Configuration,
}

/// A named `[Origin]` block found in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginDef {
    pub namespace: String,
    pub origin: Origin,
    pub line: usize,
    pub column: usize,
}

/// The result of parsing one file.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    pub ast: Ast,
    pub roots: Vec<NodeId>,
    /// `TemplateDef` / `CustomDef` nodes, in source order.
    pub definitions: Vec<NodeId>,
    /// `Import` nodes, in source order.
    pub imports: Vec<NodeId>,
    pub origins: Vec<OriginDef>,
    pub configuration: Configuration,
    pub use_html5: bool,
    pub fragments: FragmentTable,
}

impl SyntaxTree {
    pub fn definition(&self, id: NodeId) -> Option<&Definition> {
        match self.ast.get(id) {
            Node::TemplateDef(def) | Node::CustomDef(def) => Some(def),
            _ => None,
        }
    }

    pub fn import(&self, id: NodeId) -> Option<&Import> {
        match self.ast.get(id) {
            Node::Import(import) => Some(import),
            _ => None,
        }
    }
}

/// Where an item appears, which decides what it may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Top,
    Namespace,
    Element,
    /// Element template bodies and `insert` bodies.
    Body,
}

impl Scope {
    fn is_file_level(self) -> bool {
        matches!(self, Scope::Top | Scope::Namespace)
    }
}

/// A comment set aside by the parser until it reaches the comment's position.
struct PendingComment {
    start: usize,
    value: String,
    generator_visible: bool,
}

/// CHTL syntax parser.
pub struct Parser<'f> {
    tokens: Vec<Token>,
    pos: usize,
    comments: Vec<PendingComment>,
    next_comment: usize,
    fragments: &'f FragmentTable,
    mode: ParseMode,
    namespace: Vec<String>,
    definition_depth: usize,
    ast: Ast,
    definitions: Vec<NodeId>,
    imports: Vec<NodeId>,
    origins: Vec<OriginDef>,
    configuration: Configuration,
    use_html5: bool,
}

impl<'f> Parser<'f> {
    fn new(tokens: Vec<Token>, fragments: &'f FragmentTable) -> Self {
        let mut comments = Vec::new();
        let mut tokens: Vec<Token> = tokens
            .into_iter()
            .filter_map(|t| match t.kind {
                TokenKind::Comment(value) => {
                    comments.push(PendingComment {
                        start: t.span.start,
                        value,
                        generator_visible: false,
                    });
                    None
                }
                TokenKind::GeneratorComment(value) => {
                    comments.push(PendingComment {
                        start: t.span.start,
                        value,
                        generator_visible: true,
                    });
                    None
                }
                _ => Some(t),
            })
            .collect();
        if !tokens.last().is_some_and(Token::is_eof) {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, "", span, false));
        }
        Self {
            tokens,
            pos: 0,
            comments,
            next_comment: 0,
            fragments,
            mode: ParseMode::Normal,
            namespace: Vec::new(),
            definition_depth: 0,
            ast: Ast::new(),
            definitions: Vec::new(),
            imports: Vec::new(),
            origins: Vec::new(),
            configuration: Configuration::default(),
            use_html5: false,
        }
    }

    /// Parse a standalone source with default options.
    pub fn parse(source: &str) -> Result<SyntaxTree, CompileError> {
        Self::parse_source(source, FragmentTable::new(), &ParseOptions::default())
    }

    /// Scan, lex and parse `source`. New fragments are minted into `fragments`,
    /// which is returned inside the tree.
    pub fn parse_source(
        source: &str,
        fragments: FragmentTable,
        options: &ParseOptions,
    ) -> Result<SyntaxTree, CompileError> {
        let scanned = chtl_scanner::scan_with(source, fragments)?;
        let positions = PositionMap::build(&scanned.markup, &scanned.fragments);
        let mut tokens = Lexer::tokenize(&scanned.markup).map_err(|mut e| {
            (e.line, e.column) = positions.map(e.line, e.column);
            e
        })?;
        for token in &mut tokens {
            (token.span.line, token.span.column) = positions.map(token.span.line, token.span.column);
        }

        let mut parser = Parser::new(tokens, &scanned.fragments);
        parser.mode = options.mode;
        parser.configuration = options.configuration.clone();
        if !options.namespace.is_empty() {
            parser.namespace.push(options.namespace.clone());
        }

        let roots = parser.parse_items(Scope::Top)?;
        if !parser.is_at_end() {
            return Err(parser.error("Unmatched '}'").into());
        }
        debug!(
            nodes = parser.ast.len(),
            definitions = parser.definitions.len(),
            imports = parser.imports.len(),
            "parsed file"
        );

        let Parser {
            ast,
            definitions,
            imports,
            origins,
            configuration,
            use_html5,
            ..
        } = parser;
        Ok(SyntaxTree {
            ast,
            roots,
            definitions,
            imports,
            origins,
            configuration,
            use_html5,
            fragments: scanned.fragments,
        })
    }

    // =========================================================================
    // Items
    // =========================================================================

    /// Parse items until `}` or the end of input (neither is consumed).
    fn parse_items(&mut self, scope: Scope) -> Result<Vec<NodeId>, ParseError> {
        let mut items = Vec::new();
        loop {
            items.extend(self.drain_comments());
            if self.is_at_end() || self.check(&TokenKind::RBrace) {
                break;
            }
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            if let Some(id) = self.parse_item(scope)? {
                items.push(id);
            }
        }
        Ok(items)
    }

    fn parse_item(&mut self, scope: Scope) -> Result<Option<NodeId>, ParseError> {
        let token = self.peek().clone();
        let next = self.peek_at(1).kind.clone();
        match &token.kind {
            TokenKind::LBracket => self.parse_bracket_item(scope),
            TokenKind::At => self.parse_usage().map(Some),
            TokenKind::Identifier(word) => match word.as_str() {
                "use" if self.peek_at(1).is_word("html5") => {
                    if scope != Scope::Top {
                        return Err(self.error("`use html5;` is only allowed at the top of a file"));
                    }
                    self.advance();
                    self.advance();
                    self.expect(&TokenKind::Semicolon, "';' after `use html5`")?;
                    self.use_html5 = true;
                    Ok(None)
                }
                "text" if matches!(next, TokenKind::LBrace | TokenKind::Colon | TokenKind::Equals) => {
                    self.parse_text().map(Some)
                }
                "style" if next == TokenKind::LBrace => self.parse_style_block(scope).map(Some),
                "script" if next == TokenKind::LBrace => self.parse_script().map(Some),
                "except" if scope == Scope::Element => self.parse_except().map(Some),
                "if" if scope == Scope::Element && next == TokenKind::LBrace => {
                    let conditional = self.parse_conditional()?;
                    let source = StyleSource {
                        items: vec![StyleItem::Conditional(conditional)],
                        global: false,
                    };
                    Ok(Some(self.ast.alloc(Node::StyleSource(source))))
                }
                _ if next == TokenKind::LBrace => self.parse_element().map(Some),
                _ => Err(self.error(format!("Unexpected '{}'", token.lexeme))),
            },
            _ => Err(self.error(format!("Unexpected '{}'", token.lexeme))),
        }
    }

    /// `[Keyword]` items.
    fn parse_bracket_item(&mut self, scope: Scope) -> Result<Option<NodeId>, ParseError> {
        let keyword = self
            .bracket_keyword()
            .ok_or_else(|| self.error("Expected `[Keyword]`"))?;
        let file_level = |parser: &Self| {
            if scope.is_file_level() {
                Ok(())
            } else {
                Err(parser.error(format!("[{keyword}] is only allowed at file or namespace level")))
            }
        };
        match keyword.as_str() {
            "Template" | "Custom" => {
                file_level(self)?;
                self.parse_definition(keyword == "Custom").map(Some)
            }
            "Import" => {
                file_level(self)?;
                self.parse_import().map(Some)
            }
            "Namespace" => {
                file_level(self)?;
                self.parse_namespace().map(Some)
            }
            "Configuration" => {
                file_level(self)?;
                self.parse_configuration()?;
                Ok(None)
            }
            "Origin" => self.parse_origin(scope),
            other => Err(self.error(format!("Unknown block [{other}]"))),
        }
    }

    // =========================================================================
    // Elements, text, style and script
    // =========================================================================

    /// Parse `tag { body }`.
    fn parse_element(&mut self) -> Result<NodeId, ParseError> {
        let tag = self.expect_identifier()?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let element = self.parse_element_body(Element::new(tag))?;
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(self.ast.alloc(Node::Element(element)))
    }

    /// Fill in attributes and children until the closing `}`.
    fn parse_element_body(&mut self, mut element: Element) -> Result<Element, ParseError> {
        loop {
            element.children.extend(self.drain_comments());
            if self.is_at_end() || self.check(&TokenKind::RBrace) {
                break;
            }
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            if self.at_attribute() {
                let name = self.expect_identifier()?;
                self.advance(); // `:` or `=`
                let value = self.collect_until(|kind| {
                    matches!(kind, TokenKind::Semicolon | TokenKind::RBrace)
                });
                if self.check(&TokenKind::Semicolon) {
                    self.advance();
                }
                element.set_attribute(name, text_of(&value));
                continue;
            }
            if let Some(id) = self.parse_item(Scope::Element)? {
                element.children.push(id);
            }
        }
        Ok(element)
    }

    fn at_attribute(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(name) if name != "text")
            && matches!(self.peek_at(1).kind, TokenKind::Colon | TokenKind::Equals)
    }

    /// `text { ... }` or `text: "...";`.
    fn parse_text(&mut self) -> Result<NodeId, ParseError> {
        self.advance(); // `text`
        let value = if self.check(&TokenKind::LBrace) {
            self.advance();
            let tokens = self.collect_until(|kind| *kind == TokenKind::RBrace);
            self.expect(&TokenKind::RBrace, "'}' to close text")?;
            tokens
        } else {
            self.advance(); // `:` or `=`
            let tokens = self.collect_until(|kind| {
                matches!(kind, TokenKind::Semicolon | TokenKind::RBrace)
            });
            if self.check(&TokenKind::Semicolon) {
                self.advance();
            }
            tokens
        };
        Ok(self.ast.alloc(Node::Text(text_of(&value))))
    }

    /// `style { placeholder }`; the fragment is parsed into style items.
    fn parse_style_block(&mut self, scope: Scope) -> Result<NodeId, ParseError> {
        self.advance(); // `style`
        self.expect(&TokenKind::LBrace, "'{'")?;
        let fragment = self.expect_placeholder(Some(FragmentKind::Style))?;
        self.expect(&TokenKind::RBrace, "'}'")?;

        let tokens = Lexer::tokenize_at(&fragment.content, fragment.line, fragment.column)?;
        let mut sub = Parser::new(tokens, self.fragments);
        let items = sub.parse_style_items(false)?;
        if !sub.is_at_end() {
            return Err(sub.error(format!("Unexpected '{}' in style block", sub.peek().lexeme)));
        }

        let source = StyleSource {
            items,
            global: scope != Scope::Element,
        };
        Ok(self.ast.alloc(Node::StyleSource(source)))
    }

    fn parse_script(&mut self) -> Result<NodeId, ParseError> {
        self.advance(); // `script`
        self.expect(&TokenKind::LBrace, "'{'")?;
        let fragment = self.expect_placeholder(Some(FragmentKind::Script))?;
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(self.ast.alloc(Node::Script {
            placeholder: fragment.placeholder,
        }))
    }

    /// `except span, @Html, [Custom] @Element Box;`.
    fn parse_except(&mut self) -> Result<NodeId, ParseError> {
        self.advance(); // `except`
        let mut constraints = Vec::new();
        loop {
            match self.peek().kind.clone() {
                TokenKind::Semicolon => {
                    self.advance();
                    break;
                }
                TokenKind::Comma => self.advance(),
                TokenKind::Identifier(tag) => {
                    self.advance();
                    constraints.push(Constraint::Tag(tag));
                }
                TokenKind::At if self.peek_at(1).is_word("Html") => {
                    self.advance();
                    self.advance();
                    constraints.push(Constraint::AnyHtml);
                }
                TokenKind::At | TokenKind::LBracket => {
                    let custom = match self.bracket_keyword().as_deref() {
                        Some("Template") => Some(false),
                        Some("Custom") => Some(true),
                        Some(other) => return Err(self.error(format!("Unexpected [{other}] in except"))),
                        None => None,
                    };
                    if custom.is_some() {
                        self.pos += 3;
                    }
                    let kind = if self.check(&TokenKind::At) {
                        self.advance();
                        Some(self.expect_def_kind()?)
                    } else {
                        None
                    };
                    let name = match &self.peek().kind {
                        TokenKind::Identifier(name) => {
                            let name = name.clone();
                            self.advance();
                            Some(name)
                        }
                        _ => None,
                    };
                    constraints.push(Constraint::Definition { custom, kind, name });
                }
                _ => return Err(self.error(format!("Unexpected '{}' in except", self.peek().lexeme))),
            }
        }
        if constraints.is_empty() {
            return Err(self.error("`except` needs at least one target"));
        }
        Ok(self.ast.alloc(Node::Except(constraints)))
    }

    // =========================================================================
    // Definitions and usages
    // =========================================================================

    /// `[Template] @Kind Name { ... }` / `[Custom] @Kind Name { ... }`.
    fn parse_definition(&mut self, custom: bool) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        self.pos += 3; // `[Template]`
        self.expect(&TokenKind::At, "'@' before the definition kind")?;
        let kind = self.expect_def_kind()?;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LBrace, "'{'")?;

        self.definition_depth += 1;
        let body = match kind {
            DefKind::Style => DefBody::Style(self.parse_style_items(false)?),
            DefKind::Element => DefBody::Element(self.parse_items(Scope::Body)?),
            DefKind::Var => DefBody::Var(self.parse_var_body()?),
        };
        self.definition_depth -= 1;
        self.expect(&TokenKind::RBrace, "'}' to close the definition")?;

        let def = Definition {
            kind,
            custom,
            name,
            namespace: self.current_namespace(),
            body,
            file: 0,
            line: start.line,
            column: start.column,
        };
        let id = self.ast.alloc(Node::definition(def));
        self.definitions.push(id);
        Ok(id)
    }

    fn parse_var_body(&mut self) -> Result<PropertyMap<Vec<Token>>, ParseError> {
        let mut vars = PropertyMap::new();
        for item in self.parse_style_items(false)? {
            match item {
                StyleItem::Property { name, value } => vars.insert(name, value),
                _ => return Err(self.error("@Var groups only hold `name: value;` pairs")),
            }
        }
        Ok(vars)
    }

    /// `@Element Name [from ns] (; | { specialization })`.
    fn parse_usage(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        self.advance(); // `@`
        let kind = self.expect_def_kind()?;
        if kind != DefKind::Element {
            return Err(ParseError {
                message: format!("{kind} can only be used inside a style block"),
                line: start.line,
                column: start.column,
            });
        }
        let name = self.expect_identifier()?;
        let from = self.parse_from()?;

        let specialization = if self.check(&TokenKind::LBrace) {
            if self.mode == ParseMode::Discovery && self.definition_depth == 0 {
                self.skip_braced()?;
                None
            } else {
                self.advance();
                let spec = self.parse_specialization()?;
                self.expect(&TokenKind::RBrace, "'}' to close the specialization")?;
                Some(spec)
            }
        } else {
            if self.check(&TokenKind::Semicolon) {
                self.advance();
            }
            None
        };

        Ok(self.ast.alloc(Node::Usage(Usage {
            kind,
            name,
            from,
            specialization,
            line: start.line,
            column: start.column,
        })))
    }

    /// Optional `from a.b`.
    fn parse_from(&mut self) -> Result<Option<String>, ParseError> {
        if !self.peek().is_word("from") {
            return Ok(None);
        }
        self.advance();
        let mut path = self.expect_identifier()?;
        while self.check(&TokenKind::Dot) && !self.peek().spaced {
            self.advance();
            path.push('.');
            path.push_str(&self.expect_identifier()?);
        }
        Ok(Some(path))
    }

    fn parse_specialization(&mut self) -> Result<Specialization, ParseError> {
        let mut spec = Specialization::default();
        loop {
            self.skip_comments();
            if self.is_at_end() || self.check(&TokenKind::RBrace) {
                break;
            }
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                continue;
            }

            if self.peek().is_word("delete") {
                self.advance();
                loop {
                    if self.check(&TokenKind::At) {
                        self.advance();
                        let kind = self.expect_def_kind()?;
                        let name = self.expect_identifier()?;
                        spec.instructions.push(SpecInstr::DeleteInherit { kind, name });
                    } else {
                        let target = self.parse_selector()?;
                        spec.instructions.push(SpecInstr::Delete { target });
                    }
                    if self.check(&TokenKind::Comma) {
                        self.advance();
                        continue;
                    }
                    break;
                }
                self.expect(&TokenKind::Semicolon, "';' after delete")?;
            } else if self.peek().is_word("insert") {
                self.advance();
                let (position, target) = self.parse_insert_position()?;
                self.expect(&TokenKind::LBrace, "'{' after the insert position")?;
                let nodes = self.parse_items(Scope::Body)?;
                self.expect(&TokenKind::RBrace, "'}' to close insert")?;
                spec.instructions.push(SpecInstr::Insert {
                    position,
                    target,
                    nodes,
                });
            } else if matches!(self.peek().kind, TokenKind::Identifier(_))
                && matches!(self.peek_at(1).kind, TokenKind::LBracket | TokenKind::LBrace)
            {
                let target = self.parse_selector()?;
                self.expect(&TokenKind::LBrace, "'{'")?;
                let mut element = Element::new(target.tag.clone());
                element.index = target.index;
                let element = self.parse_element_body(element)?;
                self.expect(&TokenKind::RBrace, "'}'")?;
                let overrides = self.ast.alloc(Node::Element(element));
                spec.instructions.push(SpecInstr::Modify { target, overrides });
            } else {
                return Err(self.error(format!(
                    "Expected delete, insert or an element override, got '{}'",
                    self.peek().lexeme
                )));
            }
        }
        Ok(spec)
    }

    fn parse_insert_position(&mut self) -> Result<(InsertPosition, Option<Selector>), ParseError> {
        let word = self.expect_identifier()?;
        let position = match word.as_str() {
            "before" => InsertPosition::Before,
            "after" => InsertPosition::After,
            "replace" => InsertPosition::Replace,
            "at" => {
                let place = self.expect_identifier()?;
                return match place.as_str() {
                    "top" => Ok((InsertPosition::AtTop, None)),
                    "bottom" => Ok((InsertPosition::AtBottom, None)),
                    _ => Err(self.error(format!("Expected `at top` or `at bottom`, got `at {place}`"))),
                };
            }
            _ => return Err(self.error(format!("Unknown insert position '{word}'"))),
        };
        Ok((position, Some(self.parse_selector()?)))
    }

    /// `tag` or `tag[n]`.
    fn parse_selector(&mut self) -> Result<Selector, ParseError> {
        let tag = self.expect_identifier()?;
        if !self.check(&TokenKind::LBracket) {
            return Ok(Selector::new(tag, None));
        }
        self.advance();
        let index = match &self.peek().kind {
            TokenKind::Number { value, unit } if unit.is_empty() && *value >= 0.0 && value.fract() == 0.0 => {
                *value as usize
            }
            _ => return Err(self.error("Selector index must be a non-negative integer")),
        };
        self.advance();
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Selector::new(tag, Some(index)))
    }

    // =========================================================================
    // Imports, namespaces, origins, configuration
    // =========================================================================

    /// `[Import] @Chtl from "path" [as Alias];` and friends.
    fn parse_import(&mut self) -> Result<NodeId, ParseError> {
        let start = self.peek().span;
        self.pos += 3; // `[Import]`

        let kind = if let Some(keyword) = self.bracket_keyword() {
            let custom = match keyword.as_str() {
                "Template" => false,
                "Custom" => true,
                other => return Err(self.error(format!("Cannot import [{other}]"))),
            };
            self.pos += 3;
            self.expect(&TokenKind::At, "'@' before the definition kind")?;
            let kind = self.expect_def_kind()?;
            let name = self.expect_identifier()?;
            ImportKind::Precise { custom, kind, name }
        } else {
            self.expect(&TokenKind::At, "'@' or '[' after [Import]")?;
            match self.expect_identifier()?.as_str() {
                "Chtl" => ImportKind::Chtl,
                "Html" => ImportKind::Html,
                "Style" => ImportKind::Style,
                "JavaScript" => ImportKind::JavaScript,
                other => return Err(self.error(format!("Unknown import type @{other}"))),
            }
        };

        if !self.peek().is_word("from") {
            return Err(self.error("Expected `from` in import"));
        }
        self.advance();
        let path = match &self.peek().kind {
            TokenKind::String(path) => {
                let path = path.clone();
                self.advance();
                path
            }
            _ => {
                let tokens = self.collect_until(|kind| {
                    matches!(kind, TokenKind::Semicolon | TokenKind::RBrace)
                        || matches!(kind, TokenKind::Identifier(w) if w == "as")
                });
                join_lexemes(&tokens)
            }
        };
        if path.is_empty() {
            return Err(self.error("Expected an import path"));
        }

        let alias = if self.peek().is_word("as") {
            self.advance();
            Some(self.expect_identifier()?)
        } else {
            None
        };
        if matches!(kind, ImportKind::Html | ImportKind::Style | ImportKind::JavaScript) && alias.is_none() {
            return Err(ParseError {
                message: format!("Importing \"{path}\" as raw content requires `as <name>`"),
                line: start.line,
                column: start.column,
            });
        }
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        }

        let id = self.ast.alloc(Node::Import(Import {
            kind,
            path,
            alias,
            namespace: self.current_namespace(),
            line: start.line,
            column: start.column,
        }));
        self.imports.push(id);
        Ok(id)
    }

    /// `[Namespace] name { ... }`, or `[Namespace] name` covering the rest of
    /// the enclosing block.
    fn parse_namespace(&mut self) -> Result<NodeId, ParseError> {
        self.pos += 3; // `[Namespace]`
        let name = self.expect_identifier()?;
        self.namespace.push(name);

        let children = if self.check(&TokenKind::LBrace) {
            self.advance();
            let children = self.parse_items(Scope::Namespace)?;
            self.expect(&TokenKind::RBrace, "'}' to close the namespace")?;
            children
        } else {
            if self.check(&TokenKind::Semicolon) {
                self.advance();
            }
            self.parse_items(Scope::Namespace)?
        };

        let name = self.current_namespace();
        self.namespace.pop();
        Ok(self.ast.alloc(Node::Namespace { name, children }))
    }

    /// `[Origin] @Type [name] { ... }` or `[Origin] @Type name;`.
    ///
    /// A named block at file level is only recorded; inside an element it is
    /// also emitted where it stands.
    fn parse_origin(&mut self, scope: Scope) -> Result<Option<NodeId>, ParseError> {
        let start = self.peek().span;
        self.pos += 3; // `[Origin]`
        self.expect(&TokenKind::At, "'@' before the origin type")?;
        let raw_type = self.expect_identifier()?;
        let name = match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };

        if self.check(&TokenKind::Semicolon) {
            self.advance();
            let name = name.ok_or_else(|| self.error("An origin reference needs a name"))?;
            return Ok(Some(self.ast.alloc(Node::OriginRef {
                raw_type,
                name,
                line: start.line,
                column: start.column,
            })));
        }

        self.expect(&TokenKind::LBrace, "'{' or ';' after the origin header")?;
        let fragment = self.expect_placeholder(None)?;
        self.expect(&TokenKind::RBrace, "'}'")?;
        let origin = Origin {
            raw_type,
            name,
            content: self.fragments.restore(&fragment.content),
        };

        if origin.name.is_some() {
            self.origins.push(OriginDef {
                namespace: self.current_namespace(),
                origin: origin.clone(),
                line: start.line,
                column: start.column,
            });
            if scope.is_file_level() {
                return Ok(None);
            }
        }
        Ok(Some(self.ast.alloc(Node::Origin(origin))))
    }

    /// `[Configuration] { KEY = value; ... }`.
    fn parse_configuration(&mut self) -> Result<(), ParseError> {
        self.pos += 3; // `[Configuration]`
        self.expect(&TokenKind::LBrace, "'{' after [Configuration]")?;
        loop {
            self.skip_comments();
            match &self.peek().kind {
                TokenKind::RBrace => break,
                TokenKind::Semicolon => self.advance(),
                TokenKind::Identifier(_) => {
                    let at = self.peek().clone();
                    let key = self.expect_identifier()?;
                    if !matches!(self.peek().kind, TokenKind::Equals | TokenKind::Colon) {
                        return Err(self.error(format!("Expected '=' after {key}")));
                    }
                    self.advance();
                    let value = self.collect_until(|kind| {
                        matches!(kind, TokenKind::Semicolon | TokenKind::RBrace)
                    });
                    self.configuration
                        .set(&key, &text_of(&value))
                        .map_err(|message| ParseError {
                            message,
                            line: at.span.line,
                            column: at.span.column,
                        })?;
                }
                _ => return Err(self.error("Expected `KEY = value;` in [Configuration]")),
            }
        }
        self.expect(&TokenKind::RBrace, "'}' to close [Configuration]")?;
        Ok(())
    }

    // =========================================================================
    // Style items
    // =========================================================================

    /// Parse style items until `}` or the end of input. Inside `if` blocks
    /// (`in_condition`) a comma also ends a property value.
    fn parse_style_items(&mut self, in_condition: bool) -> Result<Vec<StyleItem>, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_comments();
            if self.is_at_end() || self.check(&TokenKind::RBrace) {
                break;
            }
            if matches!(self.peek().kind, TokenKind::Semicolon | TokenKind::Comma) {
                self.advance();
                continue;
            }

            if self.check(&TokenKind::At) {
                items.push(StyleItem::Inherit(self.parse_style_usage()?));
            } else if self.peek().is_word("inherit") && self.peek_at(1).kind == TokenKind::At {
                self.advance();
                items.push(StyleItem::Inherit(self.parse_style_usage()?));
            } else if self.peek().is_word("delete") && !self.at_property() {
                self.advance();
                items.push(self.parse_style_delete()?);
            } else if self.peek().is_word("if") && self.peek_at(1).kind == TokenKind::LBrace {
                items.push(StyleItem::Conditional(self.parse_conditional()?));
            } else if self.at_rule(in_condition) {
                let selector = self.collect_until(|kind| *kind == TokenKind::LBrace);
                self.expect(&TokenKind::LBrace, "'{'")?;
                let nested = self.parse_style_items(false)?;
                self.expect(&TokenKind::RBrace, "'}' to close the rule")?;
                items.push(StyleItem::Rule {
                    selector: join_lexemes(&selector),
                    items: nested,
                });
            } else {
                items.push(self.parse_property(in_condition)?);
            }
        }
        Ok(items)
    }

    fn at_property(&self) -> bool {
        matches!(self.peek_at(1).kind, TokenKind::Colon | TokenKind::Equals)
    }

    /// Whether a `{` comes before the end of the current declaration.
    fn at_rule(&self, in_condition: bool) -> bool {
        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth = depth.saturating_sub(1),
                TokenKind::LBrace if depth == 0 => return true,
                TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof if depth == 0 => return false,
                TokenKind::Comma if depth == 0 && in_condition => return false,
                _ => {}
            }
        }
        false
    }

    /// `name: value`, or a valueless member list `a, b;`.
    fn parse_property(&mut self, in_condition: bool) -> Result<StyleItem, ParseError> {
        let name = self.expect_identifier()?;
        match self.peek().kind {
            TokenKind::Colon | TokenKind::Equals => {
                self.advance();
                let value = self.collect_until(|kind| {
                    matches!(kind, TokenKind::Semicolon | TokenKind::RBrace)
                        || (in_condition && *kind == TokenKind::Comma)
                });
                Ok(StyleItem::Property { name, value })
            }
            TokenKind::Comma | TokenKind::Semicolon | TokenKind::RBrace => {
                let mut names = vec![name];
                while self.check(&TokenKind::Comma) {
                    self.advance();
                    if let TokenKind::Identifier(next) = &self.peek().kind {
                        names.push(next.clone());
                        self.advance();
                    }
                }
                Ok(StyleItem::Valueless(names))
            }
            _ => Err(self.error(format!("Expected ':' after property '{name}'"))),
        }
    }

    /// After `delete`: `@Style Name` or `a, b`.
    fn parse_style_delete(&mut self) -> Result<StyleItem, ParseError> {
        if self.check(&TokenKind::At) {
            self.advance();
            let kind = self.expect_def_kind()?;
            if kind != DefKind::Style {
                return Err(self.error(format!("Cannot delete {kind} inside a style block")));
            }
            let name = self.expect_identifier()?;
            return Ok(StyleItem::DeleteInherit { name });
        }
        let mut names = vec![self.expect_identifier()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            names.push(self.expect_identifier()?);
        }
        Ok(StyleItem::Delete(names))
    }

    /// `@Style Name [from ns] (; | { items })`.
    fn parse_style_usage(&mut self) -> Result<StyleUsage, ParseError> {
        let start = self.peek().span;
        self.advance(); // `@`
        let kind = self.expect_def_kind()?;
        if kind != DefKind::Style {
            return Err(ParseError {
                message: format!("Only @Style groups can be used in a style block, found {kind}"),
                line: start.line,
                column: start.column,
            });
        }
        let name = self.expect_identifier()?;
        let from = self.parse_from()?;
        let items = if self.check(&TokenKind::LBrace) {
            self.advance();
            let items = self.parse_style_items(false)?;
            self.expect(&TokenKind::RBrace, "'}' to close the specialization")?;
            items
        } else {
            if self.check(&TokenKind::Semicolon) {
                self.advance();
            }
            Vec::new()
        };
        Ok(StyleUsage {
            name,
            from,
            items,
            line: start.line,
            column: start.column,
        })
    }

    /// `if { condition: e, prop: v, } else if { ... } else { ... }`.
    fn parse_conditional(&mut self) -> Result<Conditional, ParseError> {
        let mut branches = Vec::new();
        loop {
            let at = self.peek().span;
            self.advance(); // `if`
            self.expect(&TokenKind::LBrace, "'{' after if")?;
            let mut items = self.parse_style_items(true)?;
            self.expect(&TokenKind::RBrace, "'}' to close the if block")?;

            let slot = items
                .iter()
                .position(|item| matches!(item, StyleItem::Property { name, .. } if name == "condition"));
            let condition = match slot.map(|i| items.remove(i)) {
                Some(StyleItem::Property { value, .. }) => value,
                _ => {
                    return Err(ParseError {
                        message: "if block needs a `condition:`".into(),
                        line: at.line,
                        column: at.column,
                    })
                }
            };
            branches.push(CondBranch {
                condition: Some(condition),
                items,
            });

            if !self.peek().is_word("else") {
                break;
            }
            self.advance();
            if self.peek().is_word("if") {
                continue;
            }
            self.expect(&TokenKind::LBrace, "'{' after else")?;
            let items = self.parse_style_items(true)?;
            self.expect(&TokenKind::RBrace, "'}' to close the else block")?;
            branches.push(CondBranch {
                condition: None,
                items,
            });
            break;
        }
        Ok(Conditional { branches })
    }

    // =========================================================================
    // Token navigation helpers
    // =========================================================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.peek().is_eof()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("Expected {what}, got '{}'", self.peek().lexeme)))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(format!("Expected identifier, got '{}'", self.peek().lexeme)))
        }
    }

    fn expect_def_kind(&mut self) -> Result<DefKind, ParseError> {
        let name = self.expect_identifier()?;
        DefKind::from_name(&name).ok_or_else(|| self.error(format!("Unknown kind @{name}")))
    }

    /// The keyword of a `[Keyword]` group at the cursor, without consuming it.
    fn bracket_keyword(&self) -> Option<String> {
        match (&self.peek().kind, &self.peek_at(1).kind, &self.peek_at(2).kind) {
            (TokenKind::LBracket, TokenKind::Identifier(word), TokenKind::RBracket) => Some(word.clone()),
            _ => None,
        }
    }

    /// The scanner placeholder standing for a block body.
    fn expect_placeholder(&mut self, kind: Option<FragmentKind>) -> Result<Fragment, ParseError> {
        let fragment = match &self.peek().kind {
            TokenKind::Identifier(name) if name.starts_with(PLACEHOLDER_PREFIX) => self.fragments.get(name),
            _ => None,
        };
        match fragment {
            Some(fragment) if kind.map_or(true, |kind| kind == fragment.kind) => {
                let fragment = fragment.clone();
                self.advance();
                Ok(fragment)
            }
            _ => Err(self.error("Expected a block body")),
        }
    }

    /// Collect tokens up to (not including) the first one matching `stop` at
    /// parenthesis depth zero.
    fn collect_until(&mut self, stop: impl Fn(&TokenKind) -> bool) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        while !self.is_at_end() {
            let token = self.peek();
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth = depth.saturating_sub(1),
                _ if depth == 0 && stop(&token.kind) => break,
                _ => {}
            }
            tokens.push(token.clone());
            self.advance();
        }
        tokens
    }

    /// Skip a balanced `{ ... }` group.
    fn skip_braced(&mut self) -> Result<(), ParseError> {
        let open = self.peek().span;
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return Ok(());
                    }
                }
                TokenKind::Eof => {
                    return Err(ParseError {
                        message: "Unclosed '{'".into(),
                        line: open.line,
                        column: open.column,
                    })
                }
                _ => {}
            }
            self.advance();
        }
    }

    /// Turn comments that precede the cursor into comment nodes.
    fn drain_comments(&mut self) -> Vec<NodeId> {
        let before = self.peek().span.start;
        let mut nodes = Vec::new();
        while let Some(comment) = self.comments.get(self.next_comment).filter(|c| c.start < before) {
            let node = Node::Comment {
                value: comment.value.clone(),
                generator_visible: comment.generator_visible,
            };
            self.next_comment += 1;
            nodes.push(self.ast.alloc(node));
        }
        nodes
    }

    fn skip_comments(&mut self) {
        let before = self.peek().span.start;
        while self.comments.get(self.next_comment).is_some_and(|c| c.start < before) {
            self.next_comment += 1;
        }
    }

    fn current_namespace(&self) -> String {
        self.namespace.join(".")
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError {
            message: message.into(),
            line: token.span.line,
            column: token.span.column,
        }
    }
}

/// Text of an attribute value or text block: a lone string yields its content,
/// anything else is rebuilt from lexemes with string quotes dropped.
fn text_of(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && token.spaced {
            out.push(' ');
        }
        match &token.kind {
            TokenKind::String(value) => out.push_str(value),
            _ => out.push_str(&token.lexeme),
        }
    }
    out
}

// =============================================================================
// Position mapping
// =============================================================================

/// Maps positions in scanned markup back to the original file.
///
/// Each placeholder shortens the markup by its fragment's length, so tokens
/// after a multi-line style block would otherwise report the wrong line.
struct PositionMap {
    anchors: Vec<Anchor>,
}

/// The end of one placeholder in markup and in the original file.
struct Anchor {
    markup_line: usize,
    markup_column: usize,
    line: usize,
    column: usize,
}

impl PositionMap {
    fn build(markup: &str, fragments: &FragmentTable) -> Self {
        let mut anchors = Vec::new();
        for (i, text) in markup.split('\n').enumerate() {
            let mut from = 0;
            while let Some(found) = text[from..].find(PLACEHOLDER_PREFIX) {
                let start = from + found;
                let digits = text[start + PLACEHOLDER_PREFIX.len()..]
                    .bytes()
                    .take_while(u8::is_ascii_digit)
                    .count();
                let end = start + PLACEHOLDER_PREFIX.len() + digits + "__".len();
                from = start + PLACEHOLDER_PREFIX.len();
                let Some(fragment) = text.get(start..end).and_then(|p| fragments.get(p)) else {
                    continue;
                };
                from = end;

                let content = fragments.restore(&fragment.content);
                let (line, column) = match content.rfind('\n') {
                    Some(last) => (
                        fragment.line + content.matches('\n').count(),
                        content[last + 1..].chars().count() + 1,
                    ),
                    None => (fragment.line, fragment.column + content.chars().count()),
                };
                anchors.push(Anchor {
                    markup_line: i + 1,
                    markup_column: text[..end].chars().count() + 1,
                    line,
                    column,
                });
            }
        }
        Self { anchors }
    }

    fn map(&self, line: usize, column: usize) -> (usize, usize) {
        let anchor = self
            .anchors
            .iter()
            .rev()
            .find(|a| (a.markup_line, a.markup_column) <= (line, column));
        match anchor {
            None => (line, column),
            Some(a) if a.markup_line == line => (a.line, a.column + (column - a.markup_column)),
            Some(a) => (a.line + (line - a.markup_line), column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> SyntaxTree {
        Parser::parse(source).unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        match Parser::parse(source).unwrap_err() {
            CompileError::Parse(e) => e,
            other => panic!("Expected ParseError, got {other:?}"),
        }
    }

    fn element(tree: &SyntaxTree, id: NodeId) -> &Element {
        match tree.ast.get(id) {
            Node::Element(el) => el,
            other => panic!("Expected Element, got {other:?}"),
        }
    }

    fn style_items(tree: &SyntaxTree, id: NodeId) -> &[StyleItem] {
        match tree.ast.get(id) {
            Node::StyleSource(source) => &source.items,
            other => panic!("Expected StyleSource, got {other:?}"),
        }
    }

    fn property(name: &str, value: &str) -> (String, String) {
        (name.into(), value.into())
    }

    fn item_summary(item: &StyleItem) -> (String, String) {
        match item {
            StyleItem::Property { name, value } => property(name, &join_lexemes(value)),
            StyleItem::Valueless(names) => property("valueless", &names.join(",")),
            StyleItem::Delete(names) => property("delete", &names.join(",")),
            StyleItem::DeleteInherit { name } => property("delete-inherit", name),
            StyleItem::Inherit(usage) => property("inherit", &usage.name),
            StyleItem::Conditional(c) => property("if", &c.branches.len().to_string()),
            StyleItem::Rule { selector, .. } => property("rule", selector),
        }
    }

    // =========================================================================
    // Elements
    // =========================================================================

    #[test]
    fn test_empty_document() {
        let tree = parse("");
        assert!(tree.roots.is_empty());
    }

    #[test]
    fn test_element_with_attributes_and_text() {
        let tree = parse(r#"div { id: main; class = "a b"; text { "Hello" } }"#);
        let div = element(&tree, tree.roots[0]);
        assert_eq!(div.tag, "div");
        assert_eq!(div.attributes, vec![property("id", "main"), property("class", "a b")]);
        assert_eq!(tree.ast.get(div.children[0]), &Node::Text("Hello".into()));
    }

    #[test]
    fn test_text_forms() {
        let tree = parse(r#"p { text: "one"; text { two words } }"#);
        let p = element(&tree, tree.roots[0]);
        assert_eq!(tree.ast.get(p.children[0]), &Node::Text("one".into()));
        assert_eq!(tree.ast.get(p.children[1]), &Node::Text("two words".into()));
    }

    #[test]
    fn test_nested_elements() {
        let tree = parse("html { body { div { } span { } } }");
        let html = element(&tree, tree.roots[0]);
        let body = element(&tree, html.children[0]);
        assert_eq!(body.children.len(), 2);
        assert_eq!(element(&tree, body.children[1]).tag, "span");
        assert_eq!(tree.ast.parent(body.children[1]), Some(html.children[0]));
    }

    #[test]
    fn test_use_html5() {
        let tree = parse("use html5;\nhtml { }");
        assert!(tree.use_html5);
        assert_eq!(tree.roots.len(), 1);
    }

    #[test]
    fn test_generator_comments_become_nodes() {
        let tree = parse("-- banner\ndiv { // hidden\n span { } }");
        assert_eq!(
            tree.ast.get(tree.roots[0]),
            &Node::Comment {
                value: "banner".into(),
                generator_visible: true
            }
        );
        let div = element(&tree, tree.roots[1]);
        assert!(matches!(
            tree.ast.get(div.children[0]),
            Node::Comment {
                generator_visible: false,
                ..
            }
        ));
    }

    #[test]
    fn test_unexpected_token() {
        let err = parse_err("div { ; } }");
        assert_eq!((err.line, err.column), (1, 11));
    }

    // =========================================================================
    // Style and script blocks
    // =========================================================================

    #[test]
    fn test_local_style_items() {
        let tree = parse("div { style { width: 100px; .box { color: red; } &:hover { color: blue; } } }");
        let div = element(&tree, tree.roots[0]);
        let items: Vec<_> = style_items(&tree, div.children[0]).iter().map(item_summary).collect();
        assert_eq!(
            items,
            vec![
                property("width", "100px"),
                property("rule", ".box"),
                property("rule", "&:hover"),
            ]
        );
    }

    #[test]
    fn test_global_style_block() {
        let tree = parse("style { body { margin: 0; } }");
        match tree.ast.get(tree.roots[0]) {
            Node::StyleSource(source) => assert!(source.global),
            other => panic!("Expected StyleSource, got {other:?}"),
        }
    }

    #[test]
    fn test_style_values_keep_tokens() {
        let tree = parse("div { style { border: 1px solid #333; width: Box.width * 2; font: url(http://x/a.woff); } }");
        let div = element(&tree, tree.roots[0]);
        let items: Vec<_> = style_items(&tree, div.children[0]).iter().map(item_summary).collect();
        assert_eq!(
            items,
            vec![
                property("border", "1px solid #333"),
                property("width", "Box.width * 2"),
                property("font", "url(http://x/a.woff)"),
            ]
        );
    }

    #[test]
    fn test_script_keeps_placeholder() {
        let tree = parse("div { script { let a = 1; } }");
        let div = element(&tree, tree.roots[0]);
        match tree.ast.get(div.children[0]) {
            Node::Script { placeholder } => {
                assert_eq!(tree.fragments.get(placeholder).unwrap().content, " let a = 1; ");
            }
            other => panic!("Expected Script, got {other:?}"),
        }
    }

    #[test]
    fn test_conditional_in_element() {
        let tree = parse("div { if { condition: 1 > 0, display: none, } else { display: block, } }");
        let div = element(&tree, tree.roots[0]);
        match &style_items(&tree, div.children[0])[0] {
            StyleItem::Conditional(c) => {
                assert_eq!(c.branches.len(), 2);
                assert_eq!(join_lexemes(c.branches[0].condition.as_ref().unwrap()), "1 > 0");
                assert_eq!(item_summary(&c.branches[0].items[0]), property("display", "none"));
                assert!(c.branches[1].condition.is_none());
            }
            other => panic!("Expected Conditional, got {other:?}"),
        }
    }

    #[test]
    fn test_conditional_requires_condition() {
        let err = parse_err("div { if { display: none, } }");
        assert!(err.message.contains("condition"));
    }

    #[test]
    fn test_positions_after_multiline_style() {
        let err = parse_err("div {\n  style {\n    color: red;\n  }\n  ?\n}");
        assert_eq!((err.line, err.column), (5, 3));
    }

    #[test]
    fn test_style_error_position() {
        let err = parse_err("div {\n  style {\n    color red;\n  }\n}");
        assert_eq!(err.line, 3);
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    #[test]
    fn test_style_template() {
        let tree = parse("[Template] @Style Base { color: red; font-size: 16px; }");
        let def = tree.definition(tree.definitions[0]).unwrap();
        assert_eq!((def.kind, def.custom, def.name.as_str()), (DefKind::Style, false, "Base"));
        match &def.body {
            DefBody::Style(items) => assert_eq!(items.len(), 2),
            other => panic!("Expected style body, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_style_members() {
        let tree = parse("[Custom] @Style Card { @Style Base; delete color; padding, margin; }");
        let def = tree.definition(tree.definitions[0]).unwrap();
        assert!(def.custom);
        assert_eq!(def.valueless_members(), vec!["padding", "margin"]);
        assert_eq!(def.deleted_members(), vec!["color"]);
    }

    #[test]
    fn test_element_template_body() {
        let tree = parse("[Template] @Element Box { div { } span { } }");
        let def = tree.definition(tree.definitions[0]).unwrap();
        match &def.body {
            DefBody::Element(roots) => assert_eq!(roots.len(), 2),
            other => panic!("Expected element body, got {other:?}"),
        }
    }

    #[test]
    fn test_var_template() {
        let tree = parse("[Template] @Var Theme { primary: #336; gap: 4px; }");
        let def = tree.definition(tree.definitions[0]).unwrap();
        match &def.body {
            DefBody::Var(vars) => {
                assert_eq!(vars.keys().collect::<Vec<_>>(), vec!["primary", "gap"]);
                assert_eq!(join_lexemes(vars.get("primary").unwrap()), "#336");
            }
            other => panic!("Expected var body, got {other:?}"),
        }
    }

    #[test]
    fn test_definition_outside_file_level() {
        let err = parse_err("div { [Template] @Style A { } }");
        assert!(err.message.contains("file or namespace level"));
    }

    #[test]
    fn test_namespaces() {
        let tree = parse("[Namespace] ui { [Namespace] forms { [Template] @Style Input { } } }\n[Template] @Style Top { }");
        let names: Vec<_> = tree
            .definitions
            .iter()
            .map(|&id| tree.definition(id).unwrap().namespace.clone())
            .collect();
        assert_eq!(names, vec!["ui.forms".to_string(), String::new()]);
    }

    #[test]
    fn test_unbraced_namespace_covers_rest_of_file() {
        let tree = parse("[Template] @Style A { }\n[Namespace] lib\n[Template] @Style B { }");
        assert_eq!(tree.definition(tree.definitions[0]).unwrap().namespace, "");
        assert_eq!(tree.definition(tree.definitions[1]).unwrap().namespace, "lib");
    }

    #[test]
    fn test_options_namespace() {
        let options = ParseOptions {
            namespace: "Lib".into(),
            ..ParseOptions::default()
        };
        let tree = Parser::parse_source("[Template] @Style A { }", FragmentTable::new(), &options).unwrap();
        assert_eq!(tree.definition(tree.definitions[0]).unwrap().namespace, "Lib");
    }

    // =========================================================================
    // Usages and specialization
    // =========================================================================

    #[test]
    fn test_usage_with_from() {
        let tree = parse("body { @Element Card from ui.cards; }");
        let body = element(&tree, tree.roots[0]);
        match tree.ast.get(body.children[0]) {
            Node::Usage(usage) => {
                assert_eq!(usage.name, "Card");
                assert_eq!(usage.from.as_deref(), Some("ui.cards"));
                assert!(usage.specialization.is_none());
            }
            other => panic!("Expected Usage, got {other:?}"),
        }
    }

    #[test]
    fn test_specialization_instructions() {
        let tree = parse(
            "body { @Element Box { delete p[0], span; insert after div[1] { hr { } } insert at top { br { } } div[0] { class: x; } delete @Element Base; } }",
        );
        let body = element(&tree, tree.roots[0]);
        let Node::Usage(usage) = tree.ast.get(body.children[0]) else {
            panic!("Expected Usage");
        };
        let instructions = &usage.specialization.as_ref().unwrap().instructions;
        assert_eq!(instructions.len(), 6);
        assert_eq!(
            instructions[0],
            SpecInstr::Delete {
                target: Selector::new("p", Some(0))
            }
        );
        assert!(matches!(
            &instructions[2],
            SpecInstr::Insert { position: InsertPosition::After, target: Some(t), nodes } if t.index == Some(1) && nodes.len() == 1
        ));
        assert!(matches!(
            &instructions[3],
            SpecInstr::Insert {
                position: InsertPosition::AtTop,
                target: None,
                ..
            }
        ));
        match &instructions[4] {
            SpecInstr::Modify { target, overrides } => {
                assert_eq!(target, &Selector::new("div", Some(0)));
                assert_eq!(element(&tree, *overrides).attribute("class"), Some("x"));
            }
            other => panic!("Expected Modify, got {other:?}"),
        }
        assert_eq!(
            instructions[5],
            SpecInstr::DeleteInherit {
                kind: DefKind::Element,
                name: "Base".into()
            }
        );
    }

    #[test]
    fn test_discovery_skips_usage_bodies() {
        let options = ParseOptions {
            mode: ParseMode::Discovery,
            ..ParseOptions::default()
        };
        let tree = Parser::parse_source(
            "body { @Element Box { whatever goes ( here; } }",
            FragmentTable::new(),
            &options,
        )
        .unwrap();
        let body = element(&tree, tree.roots[0]);
        assert!(matches!(tree.ast.get(body.children[0]), Node::Usage(u) if u.specialization.is_none()));
    }

    #[test]
    fn test_style_usage_in_element_is_rejected() {
        let err = parse_err("div { @Style Base; }");
        assert!(err.message.contains("style block"));
    }

    #[test]
    fn test_style_group_usage_with_specialization() {
        let tree = parse("div { style { @Style Card from ui { padding: 4px; delete color; } } }");
        let div = element(&tree, tree.roots[0]);
        match &style_items(&tree, div.children[0])[0] {
            StyleItem::Inherit(usage) => {
                assert_eq!(usage.from.as_deref(), Some("ui"));
                let items: Vec<_> = usage.items.iter().map(item_summary).collect();
                assert_eq!(items, vec![property("padding", "4px"), property("delete", "color")]);
            }
            other => panic!("Expected Inherit, got {other:?}"),
        }
    }

    #[test]
    fn test_except_constraints() {
        let tree = parse("div { except span, @Html, [Custom] @Element Box; }");
        let div = element(&tree, tree.roots[0]);
        assert_eq!(
            tree.ast.get(div.children[0]),
            &Node::Except(vec![
                Constraint::Tag("span".into()),
                Constraint::AnyHtml,
                Constraint::Definition {
                    custom: Some(true),
                    kind: Some(DefKind::Element),
                    name: Some("Box".into()),
                },
            ])
        );
    }

    // =========================================================================
    // Imports, origins, configuration
    // =========================================================================

    #[test]
    fn test_imports() {
        let tree = parse(
            "[Import] @Chtl from \"lib/ui.chtl\" as UI;\n[Import] [Custom] @Element Card from ./cards.chtl;\n[Import] @Style from \"reset.css\" as reset;",
        );
        let imports: Vec<_> = tree.imports.iter().map(|&id| tree.import(id).unwrap().clone()).collect();
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].kind, ImportKind::Chtl);
        assert_eq!(imports[0].alias.as_deref(), Some("UI"));
        assert_eq!(
            imports[1].kind,
            ImportKind::Precise {
                custom: true,
                kind: DefKind::Element,
                name: "Card".into()
            }
        );
        assert_eq!(imports[1].path, "./cards.chtl");
        assert_eq!(imports[2].kind, ImportKind::Style);
    }

    #[test]
    fn test_raw_import_requires_alias() {
        let err = parse_err("[Import] @Html from \"banner.html\";");
        assert!(err.message.contains("as <name>"));
    }

    #[test]
    fn test_origins() {
        let tree = parse("[Origin] @Html banner { <b>hi</b> }\n[Origin] @Html { <hr> }\nbody { [Origin] @Html banner; }");
        assert_eq!(tree.origins.len(), 1);
        assert_eq!(tree.origins[0].origin.content, " <b>hi</b> ");
        assert_eq!(tree.roots.len(), 2);
        assert!(matches!(tree.ast.get(tree.roots[0]), Node::Origin(o) if o.name.is_none()));
        let body = element(&tree, tree.roots[1]);
        assert!(matches!(tree.ast.get(body.children[0]), Node::OriginRef { name, .. } if name == "banner"));
    }

    #[test]
    fn test_configuration() {
        let tree = parse("[Configuration] { INDEX_INITIAL_COUNT = 1; DEBUG_MODE = true; }");
        assert_eq!(tree.configuration.index_initial_count, 1);
        assert!(tree.configuration.debug_mode);
    }

    #[test]
    fn test_configuration_unknown_key() {
        let err = parse_err("[Configuration] {\n  THEME = dark;\n}");
        assert_eq!((err.line, err.column), (2, 3));
        assert!(err.message.contains("Unknown configuration key"));
    }
}
