use serde::Serialize;
use tracing::debug;

use crate::fragment::{FragmentKind, FragmentTable};
use crate::ScanError;

/// CHTL-JS block keywords recognized inside scripts.
const CHTLJS_KEYWORDS: &[&str] = &["Listen", "Delegate", "Animate", "Router"];

/// Result of scanning one file.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutput {
    /// The source with every extracted interior replaced by its placeholder.
    pub markup: String,
    pub fragments: FragmentTable,
}

/// Scan a source file with a fresh fragment table.
pub fn scan(source: &str) -> Result<ScanOutput, ScanError> {
    scan_with(source, FragmentTable::new())
}

/// Scan a source file, minting placeholders into `fragments`.
pub fn scan_with(source: &str, fragments: FragmentTable) -> Result<ScanOutput, ScanError> {
    let mut scanner = UnifiedScanner {
        cursor: Cursor::new(source),
        out: String::with_capacity(source.len()),
        copied: 0,
        fragments,
    };
    scanner.run()?;
    Ok(ScanOutput {
        markup: scanner.out,
        fragments: scanner.fragments,
    })
}

/// Lexical state that decides whether a brace counts toward nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InDoubleQuote,
    InSingleQuote,
    InTemplateLiteral,
    InLineComment,
    InBlockComment,
}

/// Byte cursor with line/column tracking.
///
/// Every delimiter the scanner cares about is ASCII, so scanning bytes is safe
/// for UTF-8 input; columns count characters, not bytes.
#[derive(Debug, Clone, Copy)]
struct Cursor<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self::with_origin(source, 1, 1)
    }

    fn with_origin(source: &'a str, line: usize, column: usize) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line,
            column,
        }
    }

    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> u8 {
        self.bytes.get(self.pos + n).copied().unwrap_or(0)
    }

    fn prev(&self) -> Option<u8> {
        self.pos.checked_sub(1).map(|at| self.bytes[at])
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn starts_with(&self, text: &str) -> bool {
        self.bytes[self.pos..].starts_with(text.as_bytes())
    }

    fn advance(&mut self) {
        if let Some(&b) = self.bytes.get(self.pos) {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if b & 0xC0 != 0x80 {
                self.column += 1;
            }
        }
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_ascii_whitespace() {
            self.advance();
        }
    }

    /// The identifier starting at the cursor (may be empty).
    fn word(&self) -> &'a str {
        let len = self.bytes[self.pos..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        &self.source[self.pos..self.pos + len]
    }

    /// A `//` or `--` comment may only open after whitespace or a structural character,
    /// so `url(http://x)` stays a value.
    fn comment_allowed(&self) -> bool {
        match self.prev() {
            None => true,
            Some(b) => b.is_ascii_whitespace() || matches!(b, b'{' | b'}' | b';' | b','),
        }
    }

    /// In `Normal` state, consume a string or comment opener if one starts here.
    fn enter_quoted(&mut self, state: &mut ScanState, markup: bool) -> bool {
        let next = match self.peek() {
            b'"' => ScanState::InDoubleQuote,
            b'\'' => ScanState::InSingleQuote,
            b'`' => ScanState::InTemplateLiteral,
            b'/' if self.peek_at(1) == b'*' => ScanState::InBlockComment,
            b'/' if self.peek_at(1) == b'/' && self.comment_allowed() => ScanState::InLineComment,
            b'-' if markup
                && self.peek_at(1) == b'-'
                && (self.peek_at(2).is_ascii_whitespace() || self.peek_at(2) == 0)
                && self.comment_allowed() =>
            {
                ScanState::InLineComment
            }
            _ => return false,
        };
        let opener = match next {
            ScanState::InLineComment | ScanState::InBlockComment => 2,
            _ => 1,
        };
        self.advance_by(opener);
        *state = next;
        true
    }

    /// Outside `Normal` state, consume one unit of the string or comment.
    fn step_quoted(&mut self, state: &mut ScanState) {
        let b = self.peek();
        match *state {
            ScanState::InDoubleQuote | ScanState::InSingleQuote | ScanState::InTemplateLiteral => {
                let close = match *state {
                    ScanState::InDoubleQuote => b'"',
                    ScanState::InSingleQuote => b'\'',
                    _ => b'`',
                };
                if b == b'\\' {
                    self.advance_by(2);
                    return;
                }
                // Plain quotes never span lines; a stray apostrophe only costs one line.
                if b == close || (b == b'\n' && *state != ScanState::InTemplateLiteral) {
                    *state = ScanState::Normal;
                }
                self.advance();
            }
            ScanState::InLineComment => {
                if b == b'\n' {
                    *state = ScanState::Normal;
                }
                self.advance();
            }
            ScanState::InBlockComment => {
                if b == b'*' && self.peek_at(1) == b'/' {
                    self.advance_by(2);
                    *state = ScanState::Normal;
                } else {
                    self.advance();
                }
            }
            ScanState::Normal => self.advance(),
        }
    }

    /// With the cursor on `{`, move past the matching `}` and return its offset.
    ///
    /// With `aware` set, braces inside strings and comments are ignored.
    fn skip_block(&mut self, aware: bool) -> Option<usize> {
        let mut depth = 0usize;
        let mut state = ScanState::Normal;

        loop {
            if self.is_at_end() {
                return None;
            }
            if state != ScanState::Normal {
                self.step_quoted(&mut state);
                continue;
            }
            if aware && self.enter_quoted(&mut state, false) {
                continue;
            }
            match self.peek() {
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let close = self.pos;
                        self.advance();
                        return Some(close);
                    }
                }
                _ => {}
            }
            self.advance();
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Top-level scanner over a CHTL file.
struct UnifiedScanner<'a> {
    cursor: Cursor<'a>,
    out: String,
    /// Offset up to which source text has been copied into `out`.
    copied: usize,
    fragments: FragmentTable,
}

impl<'a> UnifiedScanner<'a> {
    fn run(&mut self) -> Result<(), ScanError> {
        let mut state = ScanState::Normal;

        while !self.cursor.is_at_end() {
            if state != ScanState::Normal {
                self.cursor.step_quoted(&mut state);
                continue;
            }
            if self.cursor.enter_quoted(&mut state, true) {
                continue;
            }
            if self.at_boundary() {
                if self.cursor.starts_with("style") && self.try_block("style", FragmentKind::Style)? {
                    continue;
                }
                if self.cursor.starts_with("script")
                    && self.try_block("script", FragmentKind::Script)?
                {
                    continue;
                }
                if self.cursor.starts_with("[Origin]") && self.try_origin()? {
                    continue;
                }
            }
            self.cursor.advance();
        }

        let source = self.cursor.source;
        self.out.push_str(&source[self.copied..]);
        Ok(())
    }

    /// Keywords only count when not part of a longer name or `@Style`, `.style`, `#style`.
    fn at_boundary(&self) -> bool {
        match self.cursor.prev() {
            None => true,
            Some(b) => !(is_ident_byte(b) || matches!(b, b'@' | b'.' | b'#')),
        }
    }

    /// Extract `keyword { ... }` if the keyword is followed by a block.
    fn try_block(&mut self, keyword: &str, kind: FragmentKind) -> Result<bool, ScanError> {
        let (line, column) = (self.cursor.line, self.cursor.column);
        let mut probe = self.cursor;
        probe.advance_by(keyword.len());
        if is_ident_byte(probe.peek()) {
            return Ok(false);
        }
        probe.skip_whitespace();
        if probe.peek() != b'{' {
            return Ok(false);
        }

        self.extract(probe, kind, true, keyword, (line, column))?;
        Ok(true)
    }

    /// Extract the body of `[Origin] @Type name? { ... }`.
    fn try_origin(&mut self) -> Result<bool, ScanError> {
        let (line, column) = (self.cursor.line, self.cursor.column);
        let mut probe = self.cursor;
        probe.advance_by("[Origin]".len());
        probe.skip_whitespace();
        if probe.peek() != b'@' {
            return Ok(false);
        }
        probe.advance();
        let raw_type = probe.word();
        probe.advance_by(raw_type.len());
        probe.skip_whitespace();
        let name = probe.word();
        probe.advance_by(name.len());
        probe.skip_whitespace();
        if probe.peek() != b'{' {
            return Ok(false);
        }

        let kind = match raw_type {
            "Html" => FragmentKind::Markup,
            "Style" => FragmentKind::Style,
            _ => FragmentKind::Script,
        };
        // Raw HTML has no string syntax worth honoring: `don't` must not open a string.
        let aware = kind != FragmentKind::Markup;
        self.extract(probe, kind, aware, "[Origin]", (line, column))?;
        Ok(true)
    }

    /// With `probe` on the opening brace, cut the interior out as a fragment.
    fn extract(
        &mut self,
        mut probe: Cursor<'a>,
        kind: FragmentKind,
        aware: bool,
        keyword: &str,
        at: (usize, usize),
    ) -> Result<(), ScanError> {
        let open = probe.pos;
        let (line, column) = (probe.line, probe.column + 1);
        let close = probe
            .skip_block(aware)
            .ok_or_else(|| ScanError::UnmatchedBrace {
                keyword: keyword.to_string(),
                line: at.0,
                column: at.1,
            })?;

        let source = self.cursor.source;
        let interior = &source[open + 1..close];
        let content = if kind == FragmentKind::Script && aware {
            partition_script(interior, line, column, &mut self.fragments)?
        } else {
            interior.to_string()
        };

        let placeholder = self.fragments.mint(kind, &content, line, column);
        debug!(?kind, %placeholder, line, column, "extracted fragment");

        self.out.push_str(&source[self.copied..=open]);
        self.out.push_str(&placeholder);
        self.copied = close;
        self.cursor = probe;
        Ok(())
    }
}

fn is_chtljs_keyword(word: &str) -> bool {
    CHTLJS_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Cut CHTL-JS constructs out of a script interior as `ChtlJs` sub-fragments.
fn partition_script(
    content: &str,
    line: usize,
    column: usize,
    fragments: &mut FragmentTable,
) -> Result<String, ScanError> {
    let mut cursor = Cursor::with_origin(content, line, column);
    let mut out = String::with_capacity(content.len());
    let mut copied = 0;
    let mut state = ScanState::Normal;

    while !cursor.is_at_end() {
        if state != ScanState::Normal {
            cursor.step_quoted(&mut state);
            continue;
        }
        if cursor.enter_quoted(&mut state, false) {
            continue;
        }

        let start = cursor.pos;
        let (at_line, at_column) = (cursor.line, cursor.column);
        let unmatched = |keyword: &str| ScanError::UnmatchedBrace {
            keyword: keyword.to_string(),
            line: at_line,
            column: at_column,
        };

        let end = if cursor.starts_with("{{") {
            let mut probe = cursor;
            probe.advance_by(2);
            while !probe.starts_with("}}") {
                if probe.is_at_end() {
                    return Err(unmatched("{{"));
                }
                probe.advance();
            }
            probe.advance_by(2);

            // `{{box}}->Listen { ... }` travels as one construct.
            let mut tail = probe;
            tail.skip_whitespace();
            if tail.starts_with("->") {
                tail.advance_by(2);
                tail.skip_whitespace();
                let word = tail.word();
                if is_chtljs_keyword(word) {
                    tail.advance_by(word.len());
                    tail.skip_whitespace();
                    if tail.peek() == b'{' {
                        tail.skip_block(true).ok_or_else(|| unmatched(word))?;
                        probe = tail;
                    }
                }
            }
            Some(probe)
        } else if cursor
            .prev()
            .map_or(true, |b| !(b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$' | b'.')))
        {
            let word = cursor.word();
            let mut probe = cursor;
            if is_chtljs_keyword(word) {
                probe.advance_by(word.len());
                probe.skip_whitespace();
                if probe.peek() == b'{' {
                    probe.skip_block(true).ok_or_else(|| unmatched(word))?;
                    Some(probe)
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            None
        };

        match end {
            Some(probe) => {
                let placeholder =
                    fragments.mint(FragmentKind::ChtlJs, &content[start..probe.pos], at_line, at_column);
                debug!(%placeholder, line = at_line, column = at_column, "extracted CHTL-JS construct");
                out.push_str(&content[copied..start]);
                out.push_str(&placeholder);
                copied = probe.pos;
                cursor = probe;
            }
            None => cursor.advance(),
        }
    }

    out.push_str(&content[copied..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn content<'a>(output: &'a ScanOutput, placeholder: &str) -> &'a str {
        &output.fragments.get(placeholder).unwrap().content
    }

    // =========================================================================
    // Style and script extraction
    // =========================================================================

    #[test]
    fn test_local_style_extracted() {
        let output = scan("div { style { color: red; } }").unwrap();
        assert_eq!(output.markup, "div { style {__FRAGMENT_0__} }");
        assert_eq!(content(&output, "__FRAGMENT_0__"), " color: red; ");
    }

    #[test]
    fn test_whitespace_before_brace_preserved() {
        let output = scan("style\n  {a: b;}").unwrap();
        assert_eq!(output.markup, "style\n  {__FRAGMENT_0__}");
    }

    #[test]
    fn test_brace_in_string_does_not_close_block() {
        let output = scan(r#"style { content: "{"; } div { }"#).unwrap();
        assert_eq!(output.markup, "style {__FRAGMENT_0__} div { }");
        assert_eq!(content(&output, "__FRAGMENT_0__"), r#" content: "{"; "#);
    }

    #[test]
    fn test_brace_in_comment_ignored() {
        let output = scan("style { /* } */ color: red; }").unwrap();
        assert_eq!(content(&output, "__FRAGMENT_0__"), " /* } */ color: red; ");
    }

    #[test]
    fn test_url_is_not_a_comment() {
        let output = scan("style { background: url(http://x.png); }").unwrap();
        assert_eq!(output.markup, "style {__FRAGMENT_0__}");
    }

    #[test]
    fn test_keyword_boundaries() {
        let source = "[Template] @Style Base { } div { class: my-style; } .style { } nostyle { }";
        let output = scan(source).unwrap();
        assert_eq!(output.markup, source);
        assert!(output.fragments.is_empty());
    }

    #[test]
    fn test_style_as_attribute_value_untouched() {
        let output = scan("div { class: style; }").unwrap();
        assert_eq!(output.markup, "div { class: style; }");
    }

    #[test]
    fn test_keyword_inside_markup_string_ignored() {
        let output = scan(r#"text { "style { oops" }"#).unwrap();
        assert!(output.fragments.is_empty());
    }

    #[test]
    fn test_generator_comment_with_apostrophe() {
        let output = scan("-- don't panic\nstyle { a: b; }").unwrap();
        assert_eq!(output.markup, "-- don't panic\nstyle {__FRAGMENT_0__}");
    }

    #[test]
    fn test_fragment_position() {
        let output = scan("div {\n  style {\n    color: red;\n  }\n}").unwrap();
        let fragment = output.fragments.get("__FRAGMENT_0__").unwrap();
        assert_eq!((fragment.line, fragment.column), (2, 10));
        assert_eq!(fragment.kind, FragmentKind::Style);
    }

    // =========================================================================
    // Script partitioning
    // =========================================================================

    #[test]
    fn test_script_enhanced_selector_partitioned() {
        let output = scan("script { let b = {{box}}; }").unwrap();
        assert_eq!(content(&output, "__FRAGMENT_0__"), "{{box}}");
        assert_eq!(
            output.fragments.get("__FRAGMENT_0__").unwrap().kind,
            FragmentKind::ChtlJs
        );
        assert_eq!(content(&output, "__FRAGMENT_1__"), " let b = __FRAGMENT_0__; ");
        assert_eq!(output.markup, "script {__FRAGMENT_1__}");
    }

    #[test]
    fn test_script_listen_block_with_selector() {
        let output = scan("script { {{.btn}}->Listen { click: () => { go(); } }; }").unwrap();
        assert_eq!(
            content(&output, "__FRAGMENT_0__"),
            "{{.btn}}->Listen { click: () => { go(); } }"
        );
        assert_eq!(content(&output, "__FRAGMENT_1__"), " __FRAGMENT_0__; ");
    }

    #[test]
    fn test_script_keyword_block() {
        let output = scan("script { Animate { target: x } run(); }").unwrap();
        assert_eq!(content(&output, "__FRAGMENT_0__"), "Animate { target: x }");
    }

    #[test]
    fn test_script_strings_not_partitioned() {
        let output = scan(r#"script { let s = "{{x}}"; obj.Listen = 1; }"#).unwrap();
        assert_eq!(output.fragments.len(), 1);
        assert_eq!(content(&output, "__FRAGMENT_0__"), r#" let s = "{{x}}"; obj.Listen = 1; "#);
    }

    #[test]
    fn test_unterminated_enhanced_selector() {
        let err = scan("script { {{box }").unwrap_err();
        let ScanError::UnmatchedBrace { keyword, .. } = err;
        assert_eq!(keyword, "script");
    }

    // =========================================================================
    // Origin blocks
    // =========================================================================

    #[test]
    fn test_origin_html_body_extracted_raw() {
        let output = scan("[Origin] @Html banner { <b>don't</b> }").unwrap();
        assert_eq!(output.markup, "[Origin] @Html banner {__FRAGMENT_0__}");
        let fragment = output.fragments.get("__FRAGMENT_0__").unwrap();
        assert_eq!(fragment.kind, FragmentKind::Markup);
        assert_eq!(fragment.content, " <b>don't</b> ");
    }

    #[test]
    fn test_origin_script_not_partitioned() {
        let output = scan("[Origin] @JavaScript { {{raw}} }").unwrap();
        assert_eq!(output.fragments.len(), 1);
        assert_eq!(content(&output, "__FRAGMENT_0__"), " {{raw}} ");
    }

    #[test]
    fn test_origin_usage_untouched() {
        let output = scan("body { [Origin] @Html banner; }").unwrap();
        assert_eq!(output.markup, "body { [Origin] @Html banner; }");
    }

    #[test]
    fn test_style_inside_origin_not_extracted() {
        let output = scan("[Origin] @Html { <style>p{}</style> style { } }").unwrap();
        assert_eq!(output.fragments.len(), 1);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    #[test]
    fn test_restore_is_byte_exact() {
        let source = "use html5;\nhtml {\n  body {\n    style { .a { color: \"}\"; } }\n    \
                      div { script { {{.a}}->Listen { click: f }; let t = `${x}`; } }\n    \
                      [Origin] @Style { p { } }\n    text { \"你好\" }\n  }\n}\n";
        let output = scan(source).unwrap();
        assert_eq!(output.fragments.len(), 4);
        assert_eq!(output.fragments.restore(&output.markup), source);
    }

    #[test]
    fn test_unmatched_brace_reports_keyword_position() {
        let err = scan("div {\n  style { color: red;\n").unwrap_err();
        assert_eq!(
            err,
            ScanError::UnmatchedBrace {
                keyword: "style".into(),
                line: 2,
                column: 3,
            }
        );
    }

    #[test]
    fn test_seeded_table_continues_numbering() {
        let output = scan_with("style { a: b; }", FragmentTable::starting_at(4)).unwrap();
        assert_eq!(output.markup, "style {__FRAGMENT_4__}");
        assert_eq!(output.fragments.next_id(), 5);
    }
}
