//! CHTL Code Generator
//!
//! Turns an expanded [`Document`] into three outputs: HTML, CSS, and
//! JavaScript. HTML carries the element tree with inline styles; CSS collects
//! the rules of every style block plus `@Style` origins; JS collects scripts
//! plus `@JavaScript` origins, with CHTL-JS constructs handed to a
//! [`ChtlJsCompiler`].
//!
//! ```text
//! Document → compile() → CompilerOutput { html, css, js }
//! ```

pub mod css;
pub mod html;
pub mod js;

use chtl_parser::Document;
use chtl_scanner::Fragment;
use serde::Serialize;
use tracing::debug;

/// The compiled output from a CHTL document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilerOutput {
    pub html: String,
    pub css: String,
    pub js: String,
}

/// Code generation error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Codegen error: {message}")]
pub struct CodegenError {
    pub message: String,
}

/// Compiles CHTL-JS constructs (`{{box}}`, `Listen { }`) cut out of scripts.
pub trait ChtlJsCompiler {
    fn compile(&self, fragment: &Fragment) -> String;
}

/// Leaves CHTL-JS constructs as they were written.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompiler;

impl ChtlJsCompiler for PassthroughCompiler {
    fn compile(&self, fragment: &Fragment) -> String {
        fragment.content.clone()
    }
}

/// Compile an expanded document into HTML + CSS + JS.
pub fn compile(doc: &Document, chtl_js: &dyn ChtlJsCompiler) -> Result<CompilerOutput, CodegenError> {
    let html = html::generate(doc)?;
    let css = css::generate(doc)?;
    let js = js::generate(doc, chtl_js)?;
    debug!(html = html.len(), css = css.len(), js = js.len(), "generated output");

    Ok(CompilerOutput { html, css, js })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chtl_parser::CompileOptions;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Document {
        chtl_parser::compile_source(source, &CompileOptions::default()).unwrap()
    }

    /// Replaces every CHTL-JS construct with a marker.
    struct Marker;

    impl ChtlJsCompiler for Marker {
        fn compile(&self, fragment: &Fragment) -> String {
            format!("/*{}*/", fragment.content.trim())
        }
    }

    // =========================================================================
    // Integration: compile()
    // =========================================================================

    #[test]
    fn test_compile_empty() {
        let output = compile(&parse(""), &PassthroughCompiler).unwrap();
        assert_eq!(output.html, "");
        assert_eq!(output.css, "");
        assert_eq!(output.js, "");
    }

    #[test]
    fn test_compile_all_three_outputs() {
        let doc = parse(
            "div { class: card; style { width: 10px; &:hover { color: red; } } script { go(); } }",
        );
        let output = compile(&doc, &PassthroughCompiler).unwrap();
        assert_eq!(output.html, "<div class=\"card\" style=\"width: 10px;\"></div>\n");
        assert_eq!(output.css, ".card:hover {\n  color: red;\n}\n");
        assert_eq!(output.js, "go();\n");
    }

    #[test]
    fn test_chtl_js_compiler_is_consulted() {
        let doc = parse("script { {{box}}.show(); }");
        let output = compile(&doc, &Marker).unwrap();
        assert_eq!(output.js, "/*{{box}}*/.show();\n");

        let passthrough = compile(&doc, &PassthroughCompiler).unwrap();
        assert_eq!(passthrough.js, "{{box}}.show();\n");
    }

    #[test]
    fn test_output_serializes() {
        let output = CompilerOutput {
            html: "<p></p>".into(),
            css: String::new(),
            js: String::new(),
        };
        let json = serde_json::to_string(&output).unwrap();
        assert_eq!(json, r#"{"html":"<p></p>","css":"","js":""}"#);
    }
}
