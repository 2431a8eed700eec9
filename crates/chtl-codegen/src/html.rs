//! HTML code generator.
//!
//! Walks the expanded document and writes one element per line, indented two
//! spaces per level. Elements whose children are only text stay on one line.
//! Local style properties become the element's `style` attribute; rules,
//! scripts and non-HTML origins are left to the CSS and JS generators.

use chtl_lexer::is_void_element;
use chtl_parser::ast::{Element, Node, Origin};
use chtl_parser::{Document, NodeId};

use crate::CodegenError;

/// Generate HTML from an expanded document.
pub fn generate(doc: &Document) -> Result<String, CodegenError> {
    let mut html = String::new();

    if doc.use_html5 {
        html.push_str("<!DOCTYPE html>\n");
    }
    for &id in &doc.roots {
        generate_node(doc, id, &mut html, 0)?;
    }

    Ok(html)
}

fn generate_node(doc: &Document, id: NodeId, out: &mut String, depth: usize) -> Result<(), CodegenError> {
    let indent = "  ".repeat(depth);
    match doc.ast.get(id) {
        Node::Element(el) => generate_element(doc, el, out, depth)?,
        Node::Text(text) => {
            out.push_str(&indent);
            out.push_str(&escape_text(text));
            out.push('\n');
        }
        Node::Comment {
            value,
            generator_visible: true,
        } => {
            out.push_str(&format!("{indent}<!-- {value} -->\n"));
        }
        Node::Origin(origin) if emits_html(origin) => {
            out.push_str(&indent);
            out.push_str(origin.content.trim());
            out.push('\n');
        }
        // Styles, scripts and plain comments don't generate markup
        _ => {}
    }
    Ok(())
}

fn generate_element(doc: &Document, el: &Element, out: &mut String, depth: usize) -> Result<(), CodegenError> {
    let indent = "  ".repeat(depth);

    // Opening tag
    out.push_str(&indent);
    out.push('<');
    out.push_str(&el.tag);

    let inline_style = inline_style(doc, el);
    let mut wrote_style = false;
    for (name, value) in &el.attributes {
        let value = if name == "style" && !inline_style.is_empty() {
            wrote_style = true;
            format!("{} {inline_style}", value.trim_end())
        } else {
            value.clone()
        };
        out.push_str(&format!(" {name}=\"{}\"", escape_attr(&value)));
    }
    if !wrote_style && !inline_style.is_empty() {
        out.push_str(&format!(" style=\"{}\"", escape_attr(&inline_style)));
    }

    out.push('>');

    // Void elements have no closing tag
    if is_void_element(&el.tag) {
        out.push('\n');
        return Ok(());
    }

    let has_block_children = el.children.iter().any(|&kid| is_block(doc.ast.get(kid)));
    if has_block_children {
        out.push('\n');
        for &kid in &el.children {
            generate_node(doc, kid, out, depth + 1)?;
        }
        out.push_str(&indent);
    } else {
        // Text-only children stay inline
        for &kid in &el.children {
            if let Node::Text(text) = doc.ast.get(kid) {
                out.push_str(&escape_text(text));
            }
        }
    }

    out.push_str(&format!("</{}>\n", el.tag));
    Ok(())
}

/// `name: value;` pairs from the element's local style blocks.
fn inline_style(doc: &Document, el: &Element) -> String {
    let declarations: Vec<String> = el
        .children
        .iter()
        .filter_map(|&kid| match doc.ast.get(kid) {
            Node::Style(block) if !block.global => Some(block),
            _ => None,
        })
        .flat_map(|block| block.properties.iter())
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{name}: {value};"))
        .collect();
    declarations.join(" ")
}

/// Nodes that go on their own line.
fn is_block(node: &Node) -> bool {
    match node {
        Node::Element(_) => true,
        Node::Comment {
            generator_visible, ..
        } => *generator_visible,
        Node::Origin(origin) => emits_html(origin),
        _ => false,
    }
}

/// Origins that are emitted in place: `@Html` and user-defined types.
fn emits_html(origin: &Origin) -> bool {
    !matches!(origin.raw_type.as_str(), "Style" | "JavaScript")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
