//! Template expansion.
//!
//! The [`Expander`] walks a [`SyntaxTree`] against a populated [`Registry`]
//! and writes a fresh output arena: usages are replaced by their template
//! bodies and specialized, style sources are flattened and evaluated into
//! [`StyleBlock`]s, namespaces dissolve and definitions disappear.
//!
//! Elements are allocated before their children and every child is attached
//! as soon as it is finished, so property references (`box.width`) can see
//! every element materialized earlier in document order.

use chtl_lexer::{join_lexemes, Token, TokenKind};
use chtl_scanner::FragmentTable;
use tracing::debug;

use crate::ast::{
    Ast, Constraint, CssRule, DefBody, DefKind, Element, Node, NodeId, StyleBlock, StyleItem,
    StyleUsage, Usage,
};
use crate::config::Configuration;
use crate::eval::{Evaluator, PropertyLookup};
use crate::expr::{is_expression, ExprParser};
use crate::parser::SyntaxTree;
use crate::registry::Registry;
use crate::specialize::{self, Selector, SpecInstr, Specialization};
use crate::value::{PropertyMap, StyleValue};
use crate::CompileError;

/// The expanded document handed to code generation.
#[derive(Debug, Clone)]
pub struct Document {
    pub ast: Ast,
    pub roots: Vec<NodeId>,
    pub use_html5: bool,
    /// Fragments of every file in the compilation.
    pub fragments: FragmentTable,
}

/// Properties gathered from style items before evaluation. `None` marks a
/// valueless member still waiting for a value.
type Gathered = PropertyMap<Option<Vec<Token>>>;

pub struct Expander<'r> {
    registry: &'r Registry,
    config: &'r Configuration,
    out: Ast,
    namespace: String,
    /// Templates being expanded, for the cycle guard.
    active: Vec<(DefKind, String, String)>,
}

impl<'r> Expander<'r> {
    pub fn new(registry: &'r Registry, config: &'r Configuration) -> Self {
        Self {
            registry,
            config,
            out: Ast::new(),
            namespace: String::new(),
            active: Vec::new(),
        }
    }

    /// Expand the entry file's tree into a [`Document`].
    pub fn expand(mut self, tree: &SyntaxTree) -> Result<Document, CompileError> {
        let mut roots = Vec::new();
        for &id in &tree.roots {
            self.expand_node(&tree.ast, id, None, &mut roots)?;
        }

        let mut fragments = self.registry.fragments().clone();
        fragments.extend(&tree.fragments);
        debug!(nodes = self.out.len(), roots = roots.len(), "expanded document");
        Ok(Document {
            ast: self.out,
            roots,
            use_html5: tree.use_html5,
            fragments,
        })
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Expand the source node `id` of `src`, appending results to `out`.
    /// `parent` is the output element a local style block belongs to.
    fn expand_node(
        &mut self,
        src: &Ast,
        id: NodeId,
        parent: Option<NodeId>,
        out: &mut Vec<NodeId>,
    ) -> Result<(), CompileError> {
        match src.get(id) {
            Node::Element(el) => {
                let produced = self.expand_element(src, el)?;
                out.push(produced);
            }
            Node::Text(_) | Node::Comment { .. } | Node::Script { .. } | Node::Origin(_) => {
                out.push(self.out.alloc(src.get(id).clone()));
            }
            Node::StyleSource(source) => {
                let block = self.evaluate_style(&source.items, source.global, parent)?;
                out.push(self.out.alloc(Node::Style(block)));
            }
            Node::Style(block) => {
                out.push(self.out.alloc(Node::Style(block.clone())));
            }
            Node::Namespace { name, children } => {
                let saved = std::mem::replace(&mut self.namespace, name.clone());
                debug!(namespace = %name, "entering namespace");
                for &kid in children {
                    self.expand_node(src, kid, parent, out)?;
                }
                self.namespace = saved;
            }
            Node::Usage(usage) => self.expand_usage(src, usage, out)?,
            Node::OriginRef {
                raw_type,
                name,
                line,
                column,
            } => {
                let origin = self
                    .registry
                    .lookup_origin(name, &self.namespace)
                    .ok_or_else(|| CompileError::TemplateNotFound {
                        kind: format!("[Origin] @{raw_type}"),
                        name: name.clone(),
                        namespace: self.namespace.clone(),
                        line: *line,
                        column: *column,
                    })?;
                out.push(self.out.alloc(Node::Origin(origin.clone())));
            }
            Node::TemplateDef(_) | Node::CustomDef(_) | Node::Import(_) | Node::Except(_) => {}
        }
        Ok(())
    }

    fn expand_element(&mut self, src: &Ast, el: &Element) -> Result<NodeId, CompileError> {
        let mut shell = Element::new(el.tag.clone());
        shell.attributes = el.attributes.clone();
        let id = self.out.alloc(Node::Element(shell));

        let constraints: Vec<&Constraint> = el
            .children
            .iter()
            .filter_map(|&kid| match src.get(kid) {
                Node::Except(list) => Some(list.iter()),
                _ => None,
            })
            .flatten()
            .collect();

        for &kid in &el.children {
            self.check_constraints(&el.tag, &constraints, src.get(kid))?;
            let mut produced = Vec::new();
            self.expand_node(src, kid, Some(id), &mut produced)?;
            for node in produced {
                self.out.push_child(id, node);
            }
        }
        Ok(id)
    }

    fn check_constraints(
        &self,
        tag: &str,
        constraints: &[&Constraint],
        child: &Node,
    ) -> Result<(), CompileError> {
        for constraint in constraints {
            let forbidden = match (constraint, child) {
                (Constraint::Tag(name), Node::Element(el)) => *name == el.tag,
                (Constraint::AnyHtml, Node::Element(_)) => true,
                (Constraint::Definition { custom, kind, name }, Node::Usage(usage)) => {
                    let ns = usage.from.as_deref().unwrap_or(&self.namespace);
                    let is_custom = self
                        .registry
                        .find(usage.kind, &usage.name, ns)
                        .map(|def| def.custom);
                    custom.map_or(true, |c| is_custom == Some(c))
                        && kind.map_or(true, |k| k == usage.kind)
                        && name.as_ref().map_or(true, |n| *n == usage.name)
                }
                _ => false,
            };
            if forbidden {
                let what = match child {
                    Node::Element(el) => format!("<{}>", el.tag),
                    Node::Usage(usage) => format!("{} {}", usage.kind, usage.name),
                    _ => String::new(),
                };
                return Err(CompileError::ConstraintViolation {
                    message: format!("<{tag}> does not allow {what} as a child"),
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Element templates
    // =========================================================================

    fn expand_usage(&mut self, src: &Ast, usage: &Usage, out: &mut Vec<NodeId>) -> Result<(), CompileError> {
        let registry = self.registry;
        let ns = usage.from.clone().unwrap_or_else(|| self.namespace.clone());
        let def = registry.lookup(usage.kind, &usage.name, &ns, (usage.line, usage.column))?;
        let DefBody::Element(body) = &def.body else {
            return Err(CompileError::specialization(format!("{} is not an element template", def.name)));
        };
        let body_ast = registry.file(def.file).ok_or_else(|| {
            CompileError::specialization(format!("{} {} has no source file", def.kind, def.name))
        })?;

        let key = (def.kind, def.namespace.clone(), def.name.clone());
        if self.active.contains(&key) {
            return Err(CompileError::specialization(format!(
                "{} {} expands itself",
                def.kind, def.name
            )));
        }
        if self.config.debug_mode {
            debug!(template = %def.name, namespace = %def.namespace, custom = def.custom, "expanding element template");
        }

        let body = without_inherited(body_ast, body, usage.specialization.as_ref())?;

        self.active.push(key);
        let saved = std::mem::replace(&mut self.namespace, def.namespace.clone());
        let mut children = Vec::new();
        for id in body {
            self.expand_node(body_ast, id, None, &mut children)?;
        }
        self.namespace = saved;
        self.active.pop();

        if let Some(spec) = &usage.specialization {
            let instructions = self.materialize(src, spec)?;
            children = specialize::apply(&mut self.out, children, &instructions)?;
        }
        out.extend(children);
        Ok(())
    }

    /// Expand the node payloads of a specialization into the output arena.
    fn materialize(&mut self, src: &Ast, spec: &Specialization) -> Result<Vec<SpecInstr>, CompileError> {
        let mut instructions = Vec::with_capacity(spec.instructions.len());
        for instr in &spec.instructions {
            let instr = match instr {
                SpecInstr::Delete { target } => SpecInstr::Delete {
                    target: self.shift(target)?,
                },
                SpecInstr::Insert {
                    position,
                    target,
                    nodes,
                } => {
                    let mut expanded = Vec::new();
                    for &id in nodes {
                        self.expand_node(src, id, None, &mut expanded)?;
                    }
                    SpecInstr::Insert {
                        position: *position,
                        target: target.as_ref().map(|t| self.shift(t)).transpose()?,
                        nodes: expanded,
                    }
                }
                SpecInstr::Modify { target, overrides } => {
                    let mut expanded = Vec::new();
                    self.expand_node(src, *overrides, None, &mut expanded)?;
                    let Some(&overrides) = expanded.first() else {
                        return Err(CompileError::specialization(format!("empty override for {target}")));
                    };
                    // The override is a carrier only; its contents move into the target.
                    self.out.detach(overrides);
                    SpecInstr::Modify {
                        target: self.shift(target)?,
                        overrides,
                    }
                }
                SpecInstr::DeleteInherit { .. } => instr.clone(),
            };
            instructions.push(instr);
        }
        Ok(instructions)
    }

    /// Rebase a selector index on `INDEX_INITIAL_COUNT`.
    fn shift(&self, selector: &Selector) -> Result<Selector, CompileError> {
        let Some(index) = selector.index else {
            return Ok(selector.clone());
        };
        index
            .checked_sub(self.config.index_initial_count)
            .map(|index| Selector::new(selector.tag.clone(), Some(index)))
            .ok_or_else(|| CompileError::TargetNotFound {
                selector: selector.to_string(),
            })
    }

    // =========================================================================
    // Style
    // =========================================================================

    fn evaluate_style(
        &mut self,
        items: &[StyleItem],
        global: bool,
        parent: Option<NodeId>,
    ) -> Result<StyleBlock, CompileError> {
        let mut gathered = Gathered::new();
        let mut rules = Vec::new();
        self.gather(items, &mut gathered, &mut rules, None)?;

        let mut block = StyleBlock {
            global,
            ..StyleBlock::default()
        };
        // Loose properties of a global block have nowhere to go.
        if !global {
            block.properties = self.evaluate_gathered(gathered)?;
        }
        for (selector, gathered) in rules {
            let properties = self.evaluate_gathered(gathered)?;
            block.rules.push(CssRule { selector, properties });
        }

        if let (false, Some(parent)) = (global, parent) {
            self.auto_attributes(parent, &block.rules);
        }
        Ok(block)
    }

    /// Collect `items` into `into` in order; rules go to `rules` with their
    /// full selector.
    fn gather(
        &mut self,
        items: &[StyleItem],
        into: &mut Gathered,
        rules: &mut Vec<(String, Gathered)>,
        enclosing: Option<&str>,
    ) -> Result<(), CompileError> {
        for item in items {
            match item {
                StyleItem::Property { name, value } => into.insert(name.clone(), Some(value.clone())),
                StyleItem::Valueless(names) => {
                    for name in names {
                        into.insert(name.clone(), None);
                    }
                }
                StyleItem::Delete(names) => {
                    for name in names {
                        into.remove(name);
                    }
                }
                StyleItem::DeleteInherit { .. } => {}
                StyleItem::Inherit(usage) => self.gather_usage(usage, into, rules, enclosing)?,
                StyleItem::Conditional(conditional) => {
                    for branch in &conditional.branches {
                        let taken = match &branch.condition {
                            None => true,
                            Some(condition) => match self.evaluate_value(condition)? {
                                StyleValue::Bool(b) => b,
                                other => {
                                    return Err(CompileError::type_mismatch(format!(
                                        "if condition must be a boolean, got {} `{other}`",
                                        other.type_name()
                                    )))
                                }
                            },
                        };
                        if taken {
                            self.gather(&branch.items, into, rules, enclosing)?;
                            break;
                        }
                    }
                }
                StyleItem::Rule { selector, items } => {
                    let full = match enclosing {
                        None => selector.clone(),
                        Some(outer) if selector.contains('&') => selector.replace('&', outer),
                        Some(outer) => format!("{outer} {selector}"),
                    };
                    let mut own = Gathered::new();
                    let mut nested = Vec::new();
                    self.gather(items, &mut own, &mut nested, Some(&full))?;
                    rules.push((full, own));
                    rules.extend(nested);
                }
            }
        }
        Ok(())
    }

    /// `@Style Name { ... }`: the group's body first, then the usage-site items.
    fn gather_usage(
        &mut self,
        usage: &StyleUsage,
        into: &mut Gathered,
        rules: &mut Vec<(String, Gathered)>,
        enclosing: Option<&str>,
    ) -> Result<(), CompileError> {
        let registry = self.registry;
        let ns = usage.from.clone().unwrap_or_else(|| self.namespace.clone());
        let def = registry.lookup(DefKind::Style, &usage.name, &ns, (usage.line, usage.column))?;
        let DefBody::Style(body) = &def.body else {
            return Err(CompileError::specialization(format!("{} is not a style group", def.name)));
        };

        let key = (def.kind, def.namespace.clone(), def.name.clone());
        if self.active.contains(&key) {
            return Err(CompileError::specialization(format!("@Style {} inherits itself", def.name)));
        }
        if self.config.debug_mode {
            debug!(template = %def.name, namespace = %def.namespace, custom = def.custom, "expanding style group");
        }

        let dropped: Vec<&str> = usage
            .items
            .iter()
            .filter_map(|item| match item {
                StyleItem::DeleteInherit { name } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let body: Vec<StyleItem> = body
            .iter()
            .filter(|item| !matches!(item, StyleItem::Inherit(inner) if dropped.contains(&inner.name.as_str())))
            .cloned()
            .collect();

        self.active.push(key);
        let saved = std::mem::replace(&mut self.namespace, def.namespace.clone());
        let result = self.gather(&body, into, rules, enclosing);
        self.namespace = saved;
        self.active.pop();
        result?;

        self.gather(&usage.items, into, rules, enclosing)
    }

    fn evaluate_gathered(&self, gathered: Gathered) -> Result<PropertyMap<StyleValue>, CompileError> {
        let mut properties = PropertyMap::new();
        for (name, value) in gathered.iter() {
            let Some(tokens) = value else {
                return Err(CompileError::specialization(format!(
                    "valueless property `{name}` was never given a value"
                )));
            };
            properties.insert(name, self.evaluate_value(tokens)?);
        }
        Ok(properties)
    }

    /// Evaluate one property value.
    fn evaluate_value(&self, tokens: &[Token]) -> Result<StyleValue, CompileError> {
        let tokens = self.substitute_vars(tokens)?;
        if tokens.is_empty() {
            return Ok(StyleValue::Empty);
        }
        if is_expression(&tokens) {
            if let Ok(expr) = ExprParser::parse(&tokens) {
                let lookup = OutputLookup { ast: &self.out };
                return Evaluator::new(&lookup).evaluate(&expr);
            }
            return Ok(StyleValue::Str(join_lexemes(&tokens)));
        }
        match tokens.as_slice() {
            [token] => Ok(match &token.kind {
                TokenKind::String(value) => StyleValue::Str(value.clone()),
                _ => StyleValue::from_literal(&token.lexeme),
            }),
            _ => Ok(StyleValue::Str(join_lexemes(&tokens))),
        }
    }

    /// Replace `Group(key)` / `Group(key = value)` with the variable's tokens.
    fn substitute_vars(&self, tokens: &[Token]) -> Result<Vec<Token>, CompileError> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let Some((replacement, consumed)) = self.var_usage_at(tokens, i)? else {
                out.push(tokens[i].clone());
                i += 1;
                continue;
            };
            let spaced = tokens[i].spaced;
            out.extend(replacement.into_iter().enumerate().map(|(n, mut token)| {
                if n == 0 {
                    token.spaced = spaced;
                }
                token
            }));
            i += consumed;
        }
        Ok(out)
    }

    fn var_usage_at(&self, tokens: &[Token], i: usize) -> Result<Option<(Vec<Token>, usize)>, CompileError> {
        let TokenKind::Identifier(group) = &tokens[i].kind else {
            return Ok(None);
        };
        let opens = tokens
            .get(i + 1)
            .is_some_and(|t| t.kind == TokenKind::LParen && !t.spaced);
        let Some(TokenKind::Identifier(key)) = tokens.get(i + 2).map(|t| &t.kind) else {
            return Ok(None);
        };
        if !opens {
            return Ok(None);
        }
        let Some(def) = self.registry.find(DefKind::Var, group, &self.namespace) else {
            return Ok(None);
        };
        let Some(close) = tokens[i + 3..]
            .iter()
            .position(|t| t.kind == TokenKind::RParen)
            .map(|at| i + 3 + at)
        else {
            return Ok(None);
        };

        let overridden = tokens.get(i + 3).is_some_and(|t| t.kind == TokenKind::Equals);
        let replacement = if overridden {
            tokens[i + 4..close].to_vec()
        } else {
            let DefBody::Var(vars) = &def.body else {
                return Ok(None);
            };
            vars.get(key)
                .cloned()
                .ok_or_else(|| CompileError::TemplateNotFound {
                    kind: "@Var".into(),
                    name: format!("{group}({key})"),
                    namespace: def.namespace.clone(),
                    line: tokens[i].span.line,
                    column: tokens[i].span.column,
                })?
        };
        Ok(Some((replacement, close + 1 - i)))
    }

    /// Give the owning element the class / id of its first `.name` / `#name` rule.
    fn auto_attributes(&mut self, element: NodeId, rules: &[CssRule]) {
        let first = |sigil: char| {
            rules.iter().find_map(|rule| {
                let name: String = rule
                    .selector
                    .strip_prefix(sigil)?
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                    .collect();
                (!name.is_empty()).then_some(name)
            })
        };
        let class = (!self.config.disable_style_auto_add_class).then(|| first('.')).flatten();
        let id = (!self.config.disable_style_auto_add_id).then(|| first('#')).flatten();

        if let Node::Element(el) = self.out.get_mut(element) {
            if let Some(class) = class {
                if el.attribute("class").is_none() {
                    el.set_attribute("class", class);
                }
            }
            if let Some(id) = id {
                if el.attribute("id").is_none() {
                    el.set_attribute("id", id);
                }
            }
        }
    }
}

/// The template body minus the usages a `delete @Element X;` drops.
fn without_inherited(
    body_ast: &Ast,
    body: &[NodeId],
    spec: Option<&Specialization>,
) -> Result<Vec<NodeId>, CompileError> {
    let dropped: Vec<&str> = spec
        .map(|spec| {
            spec.instructions
                .iter()
                .filter_map(|instr| match instr {
                    SpecInstr::DeleteInherit { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let inherits = |id: &NodeId, name: &str| matches!(body_ast.get(*id), Node::Usage(u) if u.name == name);
    if let Some(missing) = dropped.iter().find(|name| !body.iter().any(|id| inherits(id, name))) {
        return Err(CompileError::specialization(format!(
            "cannot delete @Element {missing}: the template does not use it"
        )));
    }
    Ok(body
        .iter()
        .copied()
        .filter(|id| !dropped.iter().any(|name| inherits(id, name)))
        .collect())
}

/// Property references resolved against the output tree built so far.
struct OutputLookup<'a> {
    ast: &'a Ast,
}

impl PropertyLookup for OutputLookup<'_> {
    fn lookup(&self, selector: &str, property: &str) -> Option<StyleValue> {
        self.ast
            .iter()
            .filter(|(id, _)| self.ast.is_attached(*id))
            .find_map(|(_, node)| {
                let el = node.as_element().filter(|el| selects(el, selector))?;
                el.children
                    .iter()
                    .rev()
                    .find_map(|&kid| match self.ast.get(kid) {
                        Node::Style(block) => block.properties.get(property).cloned(),
                        _ => None,
                    })
                    .or_else(|| el.attribute(property).map(StyleValue::from_literal))
            })
    }
}

/// `.cls` by class, `#id` by id, a bare name by tag, then id, then class.
fn selects(el: &Element, selector: &str) -> bool {
    if let Some(class) = selector.strip_prefix('.') {
        el.has_class(class)
    } else if let Some(id) = selector.strip_prefix('#') {
        el.attribute("id") == Some(id)
    } else {
        el.tag == selector || el.attribute("id") == Some(selector) || el.has_class(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::register_tree;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn expand(source: &str) -> Result<Document, CompileError> {
        let tree = Parser::parse(source)?;
        let mut registry = Registry::new();
        register_tree(&mut registry, &tree)?;
        Expander::new(&registry, &tree.configuration).expand(&tree)
    }

    /// Helper: a compact outline of the output tree.
    fn outline(doc: &Document) -> String {
        describe(&doc.ast, &doc.roots)
    }

    fn describe(ast: &Ast, ids: &[NodeId]) -> String {
        ids.iter()
            .map(|&id| match ast.get(id) {
                Node::Element(el) => {
                    let mut s = el.tag.clone();
                    if !el.attributes.is_empty() {
                        let attrs: Vec<String> = el.attributes.iter().map(|(k, v)| format!("{k}={v}")).collect();
                        s.push_str(&format!("[{}]", attrs.join(" ")));
                    }
                    let kids = describe(ast, &el.children);
                    if !kids.is_empty() {
                        s.push_str(&format!("({kids})"));
                    }
                    s
                }
                Node::Text(t) => format!("{t:?}"),
                Node::Style(block) => {
                    let props: Vec<String> = block
                        .properties
                        .iter()
                        .map(|(k, v)| format!("{k}:{}", v.to_css()))
                        .collect();
                    format!("style{{{}}}", props.join(";"))
                }
                Node::Origin(o) => format!("origin({})", o.content.trim()),
                Node::Comment { value, .. } => format!("--{value}"),
                Node::Script { .. } => "script".into(),
                other => format!("{other:?}"),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn first_style(doc: &Document) -> &StyleBlock {
        doc.ast
            .iter()
            .find_map(|(_, node)| match node {
                Node::Style(block) => Some(block),
                _ => None,
            })
            .unwrap()
    }

    // =========================================================================
    // Element templates and specialization
    // =========================================================================

    #[test]
    fn test_plain_elements_pass_through() {
        let doc = expand(r#"html { body { div { class: box; text { "hi" } } } }"#).unwrap();
        assert_eq!(outline(&doc), r#"html(body(div[class=box]("hi")))"#);
    }

    #[test]
    fn test_delete_first_paragraph() {
        let doc = expand(
            r#"[Template] @Element Box { p { text {"first"} } p { text {"second"} } }
               body { @Element Box { delete p[0]; } }"#,
        )
        .unwrap();
        assert_eq!(outline(&doc), r#"body(p("second"))"#);
    }

    #[test]
    fn test_unindexed_delete_of_absent_tag() {
        let doc = expand("[Template] @Element Box { p { } }\nbody { @Element Box { delete span; } }").unwrap();
        assert_eq!(outline(&doc), "body(p)");
    }

    #[test]
    fn test_index_initial_count() {
        let doc = expand(
            r#"[Configuration] { INDEX_INITIAL_COUNT = 1; }
               [Template] @Element Box { p { text {"first"} } p { text {"second"} } }
               body { @Element Box { delete p[1]; } }"#,
        )
        .unwrap();
        assert_eq!(outline(&doc), r#"body(p("second"))"#);

        let err = expand(
            r#"[Configuration] { INDEX_INITIAL_COUNT = 1; }
               [Template] @Element Box { p { } }
               body { @Element Box { delete p[0]; } }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "TargetNotFound");
    }

    #[test]
    fn test_insert_and_modify() {
        let doc = expand(
            r#"[Custom] @Element Card { h1 { } p { } }
               body { @Element Card {
                   insert after h1[0] { hr { } }
                   p { class: lead; style { color: red; } }
                   insert at bottom { footer { } }
               } }"#,
        )
        .unwrap();
        assert_eq!(outline(&doc), "body(h1 hr p[class=lead](style{color:red}) footer)");
    }

    #[test]
    fn test_template_used_twice_gets_fresh_nodes() {
        let doc = expand("[Template] @Element Item { li { } }\nul { @Element Item; @Element Item { li { id: x; } } }").unwrap();
        assert_eq!(outline(&doc), "ul(li li[id=x])");
    }

    #[test]
    fn test_nested_templates() {
        let doc = expand(
            "[Template] @Element Inner { span { } }\n[Template] @Element Outer { div { @Element Inner; } }\nbody { @Element Outer; }",
        )
        .unwrap();
        assert_eq!(outline(&doc), "body(div(span))");
    }

    #[test]
    fn test_delete_inherited_usage() {
        let doc = expand(
            "[Template] @Element Base { span { } }\n[Custom] @Element Card { @Element Base; p { } }\nbody { @Element Card { delete @Element Base; } }",
        )
        .unwrap();
        assert_eq!(outline(&doc), "body(p)");
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = expand("[Template] @Element Loop { div { @Element Loop; } }\nbody { @Element Loop; }").unwrap_err();
        assert_eq!(err.kind(), "SpecializationError");
    }

    #[test]
    fn test_unknown_template() {
        let err = expand("body { @Element Missing; }").unwrap_err();
        assert_eq!(err.kind(), "TemplateNotFound");
        assert_eq!(err.position(), Some((1, 8)));
    }

    #[test]
    fn test_namespaced_usage() {
        let doc = expand(
            "[Namespace] ui { [Template] @Element Btn { button { } } }\n[Template] @Element Btn { a { } }\nbody { @Element Btn from ui; @Element Btn; }",
        )
        .unwrap();
        assert_eq!(outline(&doc), "body(button a)");
    }

    #[test]
    fn test_except_forbids_children() {
        let err = expand("div { except span; span { } }").unwrap_err();
        assert_eq!(err.kind(), "ConstraintViolation");

        let err = expand("[Custom] @Element Box { p { } }\ndiv { except [Custom] @Element; @Element Box; }").unwrap_err();
        assert_eq!(err.kind(), "ConstraintViolation");

        assert!(expand("[Template] @Element Box { p { } }\ndiv { except [Custom]; @Element Box; }").is_ok());
    }

    #[test]
    fn test_origins() {
        let doc = expand("[Origin] @Html banner { <b>hi</b> }\nbody { [Origin] @Html banner; [Origin] @Html { <hr> } }").unwrap();
        assert_eq!(outline(&doc), "body(origin(<b>hi</b>) origin(<hr>))");
    }

    // =========================================================================
    // Style groups
    // =========================================================================

    #[test]
    fn test_style_group_inheritance() {
        let doc = expand(
            "[Template] @Style Base { color: red; padding: 4px; }\n[Template] @Style Loud { @Style Base; color: blue; }\ndiv { style { @Style Loud; margin: 0; } }",
        )
        .unwrap();
        assert_eq!(outline(&doc), "div(style{color:blue;padding:4px;margin:0})");
    }

    #[test]
    fn test_custom_style_fill_and_delete() {
        let doc = expand(
            "[Custom] @Style Card { color: red; padding, margin; }\ndiv { style { @Style Card { padding: 1px; margin: 2px; delete color; } } }",
        )
        .unwrap();
        assert_eq!(outline(&doc), "div(style{padding:1px;margin:2px})");
    }

    #[test]
    fn test_unfilled_valueless_member() {
        let err = expand("[Custom] @Style Card { padding; }\ndiv { style { @Style Card; } }").unwrap_err();
        assert_eq!(err.kind(), "SpecializationError");
    }

    #[test]
    fn test_delete_inherited_style() {
        let doc = expand(
            "[Template] @Style A { color: red; }\n[Custom] @Style B { @Style A; width: 1px; }\ndiv { style { @Style B { delete @Style A; } } }",
        )
        .unwrap();
        assert_eq!(outline(&doc), "div(style{width:1px})");
    }

    #[test]
    fn test_variable_groups() {
        let doc = expand(
            "[Template] @Var Theme { primary: #336; gap: 4px; }\ndiv { style { color: Theme(primary); margin: Theme(gap = 8px); } }",
        )
        .unwrap();
        assert_eq!(outline(&doc), "div(style{color:#336;margin:8px})");

        let err = expand("[Template] @Var Theme { primary: red; }\ndiv { style { color: Theme(accent); } }").unwrap_err();
        assert_eq!(err.kind(), "TemplateNotFound");
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    #[test]
    fn test_property_reference_to_earlier_element() {
        let doc = expand("div { id: box; style { width: 100px; } }\np { style { width: box.width * 2; height: #box.width + 10px; } }")
            .unwrap();
        assert_eq!(outline(&doc), "div[id=box](style{width:100px}) p(style{width:200px;height:110px})");
    }

    #[test]
    fn test_forward_reference_fails() {
        let err = expand("p { style { width: later.width * 2; } }\ndiv { id: later; style { width: 1px; } }").unwrap_err();
        assert_eq!(err.kind(), "PropertyNotFound");
    }

    #[test]
    fn test_conditional_block() {
        let doc = expand("div { style { width: 100px; } if { condition: 1 > 2, color: red, } else { color: green, } }").unwrap();
        assert_eq!(outline(&doc), "div(style{width:100px} style{color:green})");
    }

    #[test]
    fn test_nested_ternary_value() {
        let doc = expand("div { style { color: 1 > 0 ? 2 > 1 ? red : blue : green; } }").unwrap();
        assert_eq!(outline(&doc), "div(style{color:red})");
    }

    #[test]
    fn test_plain_css_passes_through() {
        let doc = expand("div { style { border: 1px solid black; font: 12px/1.5 Arial; } }").unwrap();
        assert_eq!(outline(&doc), "div(style{border:1px solid black;font:12px/1.5 Arial})");
    }

    #[test]
    fn test_unit_mismatch_degrades_to_calc() {
        let doc = expand("div { style { width: 100% - 20px; } }").unwrap();
        assert_eq!(outline(&doc), "div(style{width:calc(100% - 20px)})");
    }

    // =========================================================================
    // Local rules
    // =========================================================================

    #[test]
    fn test_auto_class_and_rules() {
        let doc = expand("div { style { .card { color: red; } &:hover { color: blue; } } }").unwrap();
        let style = first_style(&doc);
        let selectors: Vec<&str> = style.rules.iter().map(|r| r.selector.as_str()).collect();
        assert_eq!(selectors, vec![".card", "&:hover"]);
        assert_eq!(outline(&doc), "div[class=card](style{})");
    }

    #[test]
    fn test_auto_class_disabled() {
        let doc = expand("[Configuration] { DISABLE_STYLE_AUTO_ADD_CLASS = true; }\ndiv { style { .card { color: red; } #main { } } }")
            .unwrap();
        assert_eq!(outline(&doc), "div[id=main](style{})");
    }

    #[test]
    fn test_nested_rules_flatten() {
        let doc = expand("style { .nav { color: red; a { color: blue; } &.open { color: green; } } }").unwrap();
        let style = first_style(&doc);
        let selectors: Vec<&str> = style.rules.iter().map(|r| r.selector.as_str()).collect();
        assert_eq!(selectors, vec![".nav", ".nav a", ".nav.open"]);
        assert!(style.global);
    }
}
