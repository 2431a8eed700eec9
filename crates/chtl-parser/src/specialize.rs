//! Specialization of expanded element templates.
//!
//! A usage such as
//!
//! ```text
//! @Element Card {
//!     delete span;
//!     insert after p[0] { hr { } }
//!     div { style { color: red; } }
//! }
//! ```
//!
//! carries a list of instructions applied, in order, to the child list the
//! template expanded into.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::ast::{Ast, DefKind, Node, NodeId};
use crate::CompileError;

/// Element selector used as a specialization target: `p`, `p[1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub tag: String,
    /// `None` targets the next occurrence in document order.
    pub index: Option<usize>,
}

impl Selector {
    pub fn new(tag: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            tag: tag.into(),
            index,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{index}]", self.tag),
            None => f.write_str(&self.tag),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
    Replace,
    AtTop,
    AtBottom,
}

/// One instruction of a usage-site specialization block.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecInstr {
    /// `delete p[1];` / `delete span;`.
    Delete { target: Selector },
    /// `insert after p[0] { ... }` / `insert at top { ... }`.
    Insert {
        position: InsertPosition,
        target: Option<Selector>,
        nodes: Vec<NodeId>,
    },
    /// `div[1] { ... }`: merge the override element into the target.
    Modify { target: Selector, overrides: NodeId },
    /// `delete @Element Base;`: drop an inherited usage from the template body.
    DeleteInherit { kind: DefKind, name: String },
}

/// A usage-site `{ ... }` block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Specialization {
    pub instructions: Vec<SpecInstr>,
}

/// Apply `instructions` to `children`, returning the specialized list.
///
/// Node ids in the instructions must belong to `ast`. `DeleteInherit` is
/// handled by the expander before the template body is expanded and is a no-op here.
pub fn apply(
    ast: &mut Ast,
    mut children: Vec<NodeId>,
    instructions: &[SpecInstr],
) -> Result<Vec<NodeId>, CompileError> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();

    for instr in instructions {
        trace!(?instr, "applying specialization");
        match instr {
            SpecInstr::Delete { target } => match target.index {
                Some(index) => {
                    let at = locate(ast, &children, &target.tag, index, target)?;
                    ast.detach(children.remove(at));
                }
                None => {
                    let (removed, kept): (Vec<NodeId>, Vec<NodeId>) = children
                        .into_iter()
                        .partition(|&id| is_tag(ast, id, &target.tag));
                    for id in removed {
                        ast.detach(id);
                    }
                    children = kept;
                }
            },

            SpecInstr::Insert {
                position,
                target,
                nodes,
            } => match (position, target) {
                (InsertPosition::AtTop, _) => {
                    children.splice(0..0, nodes.iter().copied());
                }
                (InsertPosition::AtBottom, _) => {
                    children.extend(nodes.iter().copied());
                }
                (_, None) => {
                    return Err(CompileError::specialization(
                        "insert before/after/replace needs a target",
                    ))
                }
                (position, Some(target)) => {
                    let index = target
                        .index
                        .unwrap_or_else(|| occurrences.get(&target.tag).copied().unwrap_or(0));
                    let at = locate(ast, &children, &target.tag, index, target)?;
                    match position {
                        InsertPosition::Before => {
                            children.splice(at..at, nodes.iter().copied());
                        }
                        InsertPosition::After => {
                            children.splice(at + 1..at + 1, nodes.iter().copied());
                        }
                        _ => {
                            let replaced: Vec<NodeId> =
                                children.splice(at..=at, nodes.iter().copied()).collect();
                            for id in replaced {
                                ast.detach(id);
                            }
                        }
                    }
                }
            },

            SpecInstr::Modify { target, overrides } => {
                let index = match target.index {
                    Some(index) => index,
                    None => occurrences.get(&target.tag).copied().unwrap_or(0),
                };
                let at = locate(ast, &children, &target.tag, index, target)?;
                merge(ast, children[at], *overrides);
                if target.index.is_none() {
                    *occurrences.entry(target.tag.clone()).or_insert(0) += 1;
                }
            }

            SpecInstr::DeleteInherit { .. } => {}
        }
    }

    Ok(children)
}

fn is_tag(ast: &Ast, id: NodeId, tag: &str) -> bool {
    matches!(ast.get(id), Node::Element(el) if el.tag == tag)
}

/// Position in `children` of the `index`-th element named `tag`.
fn locate(
    ast: &Ast,
    children: &[NodeId],
    tag: &str,
    index: usize,
    target: &Selector,
) -> Result<usize, CompileError> {
    children
        .iter()
        .enumerate()
        .filter(|(_, &id)| is_tag(ast, id, tag))
        .nth(index)
        .map(|(at, _)| at)
        .ok_or_else(|| not_found(target))
}

fn not_found(target: &Selector) -> CompileError {
    CompileError::TargetNotFound {
        selector: target.to_string(),
    }
}

/// Merge the override element into `target`: attributes and style properties
/// last-writer-wins, style rules appended, other children appended.
fn merge(ast: &mut Ast, target: NodeId, overrides: NodeId) {
    let Node::Element(over) = ast.get(overrides).clone() else {
        return;
    };

    if let Node::Element(el) = ast.get_mut(target) {
        for (name, value) in &over.attributes {
            el.set_attribute(name.clone(), value.clone());
        }
    }

    for kid in over.children {
        let Node::Style(block) = ast.get(kid).clone() else {
            ast.push_child(target, kid);
            continue;
        };

        let own = ast
            .children(target)
            .iter()
            .copied()
            .find(|&id| matches!(ast.get(id), Node::Style(_)));
        match own {
            Some(own) => {
                if let Node::Style(existing) = ast.get_mut(own) {
                    existing.properties.extend(block.properties);
                    existing.rules.extend(block.rules);
                }
                ast.detach(kid);
            }
            None => {
                let mut kids = ast.children(target).to_vec();
                kids.insert(0, kid);
                ast.set_children(target, kids);
            }
        }
    }
}
