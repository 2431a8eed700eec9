//! Abstract Syntax Tree for CHTL.
//!
//! Nodes live in an arena ([`Ast`]) and refer to each other by [`NodeId`].
//! Child lists hold ids; every entry keeps an optional back-index to its
//! parent, so the expander and emitter can walk upwards (the `&` selector of a
//! local style rule resolves against the owning element).
//!
//! The same node type serves both passes. The syntax pass produces
//! `StyleSource`, `Usage` and definition nodes; the expander consumes them and
//! writes an output tree made of elements, text, comments, evaluated `Style`
//! blocks, scripts and origins.

use chtl_lexer::Token;

use crate::specialize::Specialization;
use crate::value::{PropertyMap, StyleValue};

/// Index of a node inside its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    node: Node,
    parent: Option<NodeId>,
    detached: bool,
}

/// Arena of nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ast {
    entries: Vec<Entry>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a node and return its id. Child ids already inside `node` are re-parented.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.entries.len() as u32);
        let kids = node.children().to_vec();
        self.entries.push(Entry {
            node,
            parent: None,
            detached: false,
        });
        for kid in kids {
            self.entries[kid.index()].parent = Some(id);
        }
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.entries[id.index()].node
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.entries[id.index()].node
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.entries[id.index()].parent
    }

    /// Child ids of an element or namespace; empty for leaves.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).children()
    }

    /// Replace the children of an element or namespace and re-parent them.
    pub fn set_children(&mut self, id: NodeId, kids: Vec<NodeId>) {
        for &kid in &kids {
            let entry = &mut self.entries[kid.index()];
            entry.parent = Some(id);
            entry.detached = false;
        }
        match &mut self.entries[id.index()].node {
            Node::Element(el) => el.children = kids,
            Node::Namespace { children, .. } => *children = kids,
            _ => {}
        }
    }

    /// Append a child to an element or namespace.
    pub fn push_child(&mut self, id: NodeId, kid: NodeId) {
        let mut kids = self.children(id).to_vec();
        kids.push(kid);
        self.set_children(id, kids);
    }

    /// Mark a node as removed from the tree. It stays in the arena.
    pub fn detach(&mut self, id: NodeId) {
        let entry = &mut self.entries[id.index()];
        entry.parent = None;
        entry.detached = true;
    }

    /// Whether neither the node nor any ancestor has been detached.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(at) = current {
            let entry = &self.entries[at.index()];
            if entry.detached {
                return false;
            }
            current = entry.parent;
        }
        true
    }

    /// All nodes in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (NodeId(i as u32), &entry.node))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The element a node belongs to: itself, or its closest element ancestor.
    pub fn owning_element(&self, id: NodeId) -> Option<(NodeId, &Element)> {
        let mut current = Some(id);
        while let Some(at) = current {
            if let Node::Element(el) = self.get(at) {
                return Some((at, el));
            }
            current = self.parent(at);
        }
        None
    }
}

/// A node in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// An HTML element.
    Element(Element),

    /// Text content.
    Text(String),

    /// A comment. Only generator comments (`-- text`) reach the output HTML.
    Comment { value: String, generator_visible: bool },

    /// A `style { }` block before evaluation (syntax pass).
    StyleSource(StyleSource),

    /// An evaluated style block (output tree).
    Style(StyleBlock),

    /// A `script { }` block; its code stays in the fragment table.
    Script { placeholder: String },

    /// `[Template] @Kind Name { }`.
    TemplateDef(Definition),

    /// `[Custom] @Kind Name { }`.
    CustomDef(Definition),

    /// `[Namespace] name { }`. `name` is the full dot-joined path.
    Namespace { name: String, children: Vec<NodeId> },

    /// `[Import] ...;`.
    Import(Import),

    /// `@Element Name [from ns] [{ specialization }]`.
    Usage(Usage),

    /// Raw foreign content.
    Origin(Origin),

    /// `[Origin] @Type name;`, re-emitting a named origin.
    OriginRef {
        raw_type: String,
        name: String,
        line: usize,
        column: usize,
    },

    /// `except ...;` inside an element body.
    Except(Vec<Constraint>),
}

impl Node {
    /// Wrap a definition in the node variant matching its `custom` flag.
    pub fn definition(def: Definition) -> Self {
        if def.custom {
            Node::CustomDef(def)
        } else {
            Node::TemplateDef(def)
        }
    }

    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Element(el) => &el.children,
            Node::Namespace { children, .. } => children,
            _ => &[],
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }
}

/// An HTML element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: String,
    /// Attributes in source order.
    pub attributes: Vec<(String, String)>,
    /// Explicit `[n]` index, only present on specialization targets.
    pub index: Option<usize>,
    pub children: Vec<NodeId>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Whether `class` lists `name`.
    pub fn has_class(&self, name: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == name))
    }
}

// ---------------------------------------------------------------------------
// Style items
// ---------------------------------------------------------------------------

/// One entry of a style block, style definition or style specialization.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleItem {
    /// `name: value;`, the value kept as tokens until evaluation.
    Property { name: String, value: Vec<Token> },
    /// `color, font-size;` (members a Custom style leaves for the user to fill).
    Valueless(Vec<String>),
    /// `delete color, width;`.
    Delete(Vec<String>),
    /// `delete @Style Name;`.
    DeleteInherit { name: String },
    /// `@Style Name;` or `inherit @Style Name { ... }`.
    Inherit(StyleUsage),
    /// `if { condition: ..., } else if { } else { }`.
    Conditional(Conditional),
    /// `.box { }`, `&:hover { }`.
    Rule { selector: String, items: Vec<StyleItem> },
}

/// A style group usage.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleUsage {
    pub name: String,
    pub from: Option<String>,
    /// Specialization items (`delete`, overrides, valueless fills).
    pub items: Vec<StyleItem>,
    pub line: usize,
    pub column: usize,
}

/// A chain of conditional branches.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub branches: Vec<CondBranch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CondBranch {
    /// `None` for the `else` branch.
    pub condition: Option<Vec<Token>>,
    pub items: Vec<StyleItem>,
}

/// An unevaluated `style { }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleSource {
    pub items: Vec<StyleItem>,
    pub global: bool,
}

/// An evaluated style block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyleBlock {
    /// Inline properties (the owning element's `style` attribute).
    pub properties: PropertyMap<StyleValue>,
    /// Rules for the global stylesheet. Selectors may still contain `&`.
    pub rules: Vec<CssRule>,
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CssRule {
    pub selector: String,
    pub properties: PropertyMap<StyleValue>,
}

// ---------------------------------------------------------------------------
// Definitions, usages, imports
// ---------------------------------------------------------------------------

/// The kind of a template or custom definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefKind {
    Style,
    Element,
    Var,
}

impl DefKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Style" => Some(DefKind::Style),
            "Element" => Some(DefKind::Element),
            "Var" => Some(DefKind::Var),
            _ => None,
        }
    }
}

impl std::fmt::Display for DefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefKind::Style => f.write_str("@Style"),
            DefKind::Element => f.write_str("@Element"),
            DefKind::Var => f.write_str("@Var"),
        }
    }
}

/// A `[Template]` or `[Custom]` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub kind: DefKind,
    pub custom: bool,
    pub name: String,
    /// Full dot-joined namespace; empty for the global namespace.
    pub namespace: String,
    pub body: DefBody,
    /// Index of the arena holding an element body, assigned by the registry.
    pub file: usize,
    pub line: usize,
    pub column: usize,
}

impl Definition {
    /// Members a Custom style declares without a value.
    pub fn valueless_members(&self) -> Vec<&str> {
        match &self.body {
            DefBody::Style(items) => items
                .iter()
                .filter_map(|item| match item {
                    StyleItem::Valueless(names) => Some(names.iter().map(String::as_str)),
                    _ => None,
                })
                .flatten()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Properties a Custom style deletes from what it inherits.
    pub fn deleted_members(&self) -> Vec<&str> {
        match &self.body {
            DefBody::Style(items) => items
                .iter()
                .filter_map(|item| match item {
                    StyleItem::Delete(names) => Some(names.iter().map(String::as_str)),
                    _ => None,
                })
                .flatten()
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefBody {
    Style(Vec<StyleItem>),
    /// Root node ids in the arena `Definition::file` points at.
    Element(Vec<NodeId>),
    Var(PropertyMap<Vec<Token>>),
}

/// A template usage in an element body.
#[derive(Debug, Clone, PartialEq)]
pub struct Usage {
    pub kind: DefKind,
    pub name: String,
    pub from: Option<String>,
    pub specialization: Option<Specialization>,
    pub line: usize,
    pub column: usize,
}

/// Raw foreign content.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    /// `Html`, `Style`, `JavaScript` or a user type.
    pub raw_type: String,
    pub name: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// `@Chtl`: the whole file.
    Chtl,
    Html,
    Style,
    JavaScript,
    /// `[Template] @Element Box`: one definition.
    Precise {
        custom: bool,
        kind: DefKind,
        name: String,
    },
}

/// `[Import] ... from "path" [as alias];`
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub kind: ImportKind,
    pub path: String,
    pub alias: Option<String>,
    /// Namespace active at the import statement.
    pub namespace: String,
    pub line: usize,
    pub column: usize,
}

/// One entry of an `except` list.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// A plain tag: `except span;`.
    Tag(String),
    /// `@Html`: any plain element.
    AnyHtml,
    /// `[Template]`, `[Custom] @Element`, `[Custom] @Element Box`, `@Element Box`.
    Definition {
        custom: Option<bool>,
        kind: Option<DefKind>,
        name: Option<String>,
    },
}
