//! Namespaced symbol registry.
//!
//! Holds every `[Template]` / `[Custom]` definition and named `[Origin]` block
//! discovered in a compilation, keyed by namespace then name. A name is unique
//! within its namespace whatever its kind. Lookups probe the requested
//! namespace first and fall back to the global namespace (`""`).
//!
//! The registry also owns the arena of every discovered file (element
//! template bodies point into them) and the merged fragment table.

use std::collections::BTreeMap;

use chtl_scanner::FragmentTable;

use crate::ast::{Ast, DefKind, Definition, Origin};
use crate::CompileError;

#[derive(Debug, Default)]
pub struct Registry {
    definitions: BTreeMap<String, BTreeMap<String, Definition>>,
    origins: BTreeMap<String, BTreeMap<String, Origin>>,
    files: Vec<Ast>,
    fragments: FragmentTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a file's arena; returns the index definitions refer to.
    pub fn add_file(&mut self, ast: Ast) -> usize {
        self.files.push(ast);
        self.files.len() - 1
    }

    /// The arena of a discovered file.
    pub fn file(&self, index: usize) -> Option<&Ast> {
        self.files.get(index)
    }

    /// Register a definition; a second definition of the same name in the same
    /// namespace is a `DuplicateDefinition`.
    pub fn register(&mut self, def: Definition) -> Result<(), CompileError> {
        let names = self.definitions.entry(def.namespace.clone()).or_default();
        if names.contains_key(&def.name) {
            return Err(CompileError::DuplicateDefinition {
                name: def.name,
                namespace: def.namespace,
                line: def.line,
                column: def.column,
            });
        }
        names.insert(def.name.clone(), def);
        Ok(())
    }

    /// Find a definition of `kind` named `name`, probing `namespace` then global.
    pub fn lookup(
        &self,
        kind: DefKind,
        name: &str,
        namespace: &str,
        at: (usize, usize),
    ) -> Result<&Definition, CompileError> {
        probe(&self.definitions, name, namespace, |def| def.kind == kind).ok_or_else(|| {
            CompileError::TemplateNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                line: at.0,
                column: at.1,
            }
        })
    }

    /// Like [`Registry::lookup`] but returns `None` instead of an error.
    pub fn find(&self, kind: DefKind, name: &str, namespace: &str) -> Option<&Definition> {
        probe(&self.definitions, name, namespace, |def| def.kind == kind)
    }

    /// Register a named origin block.
    pub fn register_origin(
        &mut self,
        namespace: &str,
        origin: Origin,
        at: (usize, usize),
    ) -> Result<(), CompileError> {
        let Some(name) = origin.name.clone() else {
            return Ok(());
        };
        let names = self.origins.entry(namespace.to_string()).or_default();
        if names.contains_key(&name) {
            return Err(CompileError::DuplicateDefinition {
                name,
                namespace: namespace.to_string(),
                line: at.0,
                column: at.1,
            });
        }
        names.insert(name, origin);
        Ok(())
    }

    pub fn lookup_origin(&self, name: &str, namespace: &str) -> Option<&Origin> {
        probe(&self.origins, name, namespace, |_| true)
    }

    pub fn fragments(&self) -> &FragmentTable {
        &self.fragments
    }

    pub fn merge_fragments(&mut self, table: &FragmentTable) {
        self.fragments.extend(table);
    }

    /// All definitions, by namespace then name.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values().flat_map(|names| names.values())
    }
}

fn probe<'a, T>(
    map: &'a BTreeMap<String, BTreeMap<String, T>>,
    name: &str,
    namespace: &str,
    accept: impl Fn(&T) -> bool,
) -> Option<&'a T> {
    let hit = |ns: &str| map.get(ns).and_then(|names| names.get(name)).filter(|t| accept(t));
    hit(namespace).or_else(|| if namespace.is_empty() { None } else { hit("") })
}
