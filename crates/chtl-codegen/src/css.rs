//! CSS code generator.
//!
//! Collects the rules of every style block in document order, followed by
//! `@Style` origins. `&` in a local rule stands for the element the style
//! block belongs to.

use chtl_parser::ast::{CssRule, Element, Node};
use chtl_parser::{Document, NodeId};

use crate::CodegenError;

/// Generate CSS from an expanded document.
pub fn generate(doc: &Document) -> Result<String, CodegenError> {
    let mut rules = Vec::new();
    let mut origins = Vec::new();
    for &id in &doc.roots {
        collect(doc, id, None, &mut rules, &mut origins);
    }

    let mut css = String::new();
    for (selector, rule) in rules {
        write_rule(&selector, rule, &mut css);
    }
    for origin in origins {
        css.push_str(origin.trim());
        css.push('\n');
    }
    Ok(css)
}

fn collect<'d>(
    doc: &'d Document,
    id: NodeId,
    owner: Option<&'d Element>,
    rules: &mut Vec<(String, &'d CssRule)>,
    origins: &mut Vec<&'d str>,
) {
    match doc.ast.get(id) {
        Node::Element(el) => {
            for &kid in &el.children {
                collect(doc, kid, Some(el), rules, origins);
            }
        }
        Node::Style(block) => {
            let owner = owner.filter(|_| !block.global);
            for rule in &block.rules {
                let selector = match owner {
                    Some(el) => rule.selector.replace('&', &element_selector(el)),
                    None => rule.selector.clone(),
                };
                rules.push((selector, rule));
            }
        }
        Node::Origin(origin) if origin.raw_type == "Style" => origins.push(&origin.content),
        _ => {}
    }
}

/// What `&` resolves to: the first class, else the id, else the tag.
fn element_selector(el: &Element) -> String {
    if let Some(class) = el.attribute("class").and_then(|c| c.split_whitespace().next()) {
        return format!(".{class}");
    }
    if let Some(id) = el.attribute("id") {
        return format!("#{id}");
    }
    el.tag.clone()
}

fn write_rule(selector: &str, rule: &CssRule, out: &mut String) {
    let declarations: Vec<(&str, String)> = rule
        .properties
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| (name, value.to_css()))
        .collect();
    if declarations.is_empty() {
        return;
    }

    out.push_str(selector);
    out.push_str(" {\n");
    for (name, value) in declarations {
        out.push_str(&format!("  {name}: {value};\n"));
    }
    out.push_str("}\n");
}
