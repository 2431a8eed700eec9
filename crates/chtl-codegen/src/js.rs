//! JavaScript code generator.
//!
//! Emits every `script { }` block and `@JavaScript` origin in document order.
//! Script code lives in the fragment table; CHTL-JS constructs inside it are
//! passed through the [`ChtlJsCompiler`].

use chtl_parser::ast::Node;
use chtl_parser::{Document, NodeId};
use chtl_scanner::FragmentKind;
use tracing::debug;

use crate::{ChtlJsCompiler, CodegenError};

/// Generate JavaScript from an expanded document.
pub fn generate(doc: &Document, chtl_js: &dyn ChtlJsCompiler) -> Result<String, CodegenError> {
    let mut js = String::new();
    for &id in &doc.roots {
        generate_node(doc, id, chtl_js, &mut js)?;
    }
    Ok(js)
}

fn generate_node(
    doc: &Document,
    id: NodeId,
    chtl_js: &dyn ChtlJsCompiler,
    out: &mut String,
) -> Result<(), CodegenError> {
    match doc.ast.get(id) {
        Node::Element(el) => {
            for &kid in &el.children {
                generate_node(doc, kid, chtl_js, out)?;
            }
        }
        Node::Script { placeholder } => {
            let code = script_code(doc, placeholder, chtl_js)?;
            push_block(out, &code);
        }
        Node::Origin(origin) if origin.raw_type == "JavaScript" => push_block(out, &origin.content),
        _ => {}
    }
    Ok(())
}

/// Restore a script's code, compiling its CHTL-JS pieces.
fn script_code(doc: &Document, placeholder: &str, chtl_js: &dyn ChtlJsCompiler) -> Result<String, CodegenError> {
    let fragment = doc.fragments.get(placeholder).ok_or_else(|| CodegenError {
        message: format!("Unknown script fragment `{placeholder}`"),
    })?;
    let fragments = &doc.fragments;
    let mut compiled = 0;
    let code = fragments.substitute(&fragment.content, |piece| match piece.kind {
        FragmentKind::ChtlJs => {
            compiled += 1;
            fragments.restore(&chtl_js.compile(piece))
        }
        _ => fragments.restore(&piece.content),
    });
    if compiled > 0 {
        debug!(placeholder, compiled, "compiled CHTL-JS constructs");
    }
    Ok(code)
}

fn push_block(out: &mut String, code: &str) {
    let code = code.trim();
    if code.is_empty() {
        return;
    }
    out.push_str(code);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PassthroughCompiler;
    use chtl_parser::CompileOptions;
    use pretty_assertions::assert_eq;

    fn gen(source: &str) -> String {
        let doc = chtl_parser::compile_source(source, &CompileOptions::default()).unwrap();
        generate(&doc, &PassthroughCompiler).unwrap()
    }

    #[test]
    fn test_no_scripts() {
        assert_eq!(gen("div { p { } }"), "");
    }

    #[test]
    fn test_scripts_in_document_order() {
        let js = gen("div { script { one(); } p { script { two(); } } }\nscript { three(); }");
        assert_eq!(js, "one();\ntwo();\nthree();\n");
    }

    #[test]
    fn test_braces_in_strings_survive() {
        let js = gen("script { let s = \"}\"; }");
        assert_eq!(js, "let s = \"}\";\n");
    }

    #[test]
    fn test_javascript_origin() {
        let js = gen("[Origin] @JavaScript { console.log(1); }");
        assert_eq!(js, "console.log(1);\n");
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let mut doc = chtl_parser::compile_source("script { x(); }", &CompileOptions::default()).unwrap();
        doc.fragments = chtl_scanner::FragmentTable::new();
        let err = generate(&doc, &PassthroughCompiler).unwrap_err();
        assert!(err.message.contains("Unknown script fragment"));
    }
}
