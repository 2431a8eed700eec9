//! Two-pass compilation driver.
//!
//! [`discover`] follows imports from the entry file with a work queue,
//! parsing every file in discovery mode and registering its definitions.
//! [`resolve`] parses the entry file again in normal mode and expands it
//! against the finished registry. Circular imports terminate because a
//! canonical path is only ever loaded once.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use chtl_scanner::FragmentTable;
use tracing::{debug, info};

use crate::ast::{DefKind, Definition, ImportKind, Origin};
use crate::config::CompileOptions;
use crate::expand::{Document, Expander};
use crate::parser::{ParseMode, ParseOptions, Parser, SyntaxTree};
use crate::registry::Registry;
use crate::CompileError;

/// Discover `entry` and everything it imports.
pub fn discover(entry: &Path, options: &CompileOptions) -> Result<Registry, CompileError> {
    let path = canonical(entry)?;
    let mut loader = Loader::new(options);
    loader.queue.push_back(Task {
        path,
        namespace: String::new(),
        source: None,
    });
    loader.run()
}

/// Expand `entry` against a registry built by [`discover`].
pub fn resolve(entry: &Path, registry: &Registry, options: &CompileOptions) -> Result<Document, CompileError> {
    let source = read(entry)?;
    resolve_source(&source, registry, options)
}

/// Discover and resolve a file.
pub fn compile_file(entry: &Path, options: &CompileOptions) -> Result<Document, CompileError> {
    info!(path = %entry.display(), "compiling");
    let registry = discover(entry, options)?;
    resolve(entry, &registry, options)
}

/// Compile source text that is not backed by a file. Imports resolve against
/// the current directory.
pub fn compile_source(source: &str, options: &CompileOptions) -> Result<Document, CompileError> {
    let base = std::env::current_dir().map_err(|e| CompileError::Io {
        path: ".".into(),
        message: e.to_string(),
    })?;
    let mut loader = Loader::new(options);
    loader.queue.push_back(Task {
        path: base.join("<input>"),
        namespace: String::new(),
        source: Some(source.to_string()),
    });
    let registry = loader.run()?;
    resolve_source(source, &registry, options)
}

fn resolve_source(source: &str, registry: &Registry, options: &CompileOptions) -> Result<Document, CompileError> {
    let parse_options = ParseOptions {
        mode: ParseMode::Normal,
        namespace: String::new(),
        configuration: options.configuration.clone(),
    };
    let fragments = FragmentTable::starting_at(registry.fragments().next_id());
    let tree = Parser::parse_source(source, fragments, &parse_options)?;
    Expander::new(registry, &tree.configuration).expand(&tree)
}

/// Register a parsed file's definitions, named origins and fragments.
pub(crate) fn register_tree(registry: &mut Registry, tree: &SyntaxTree) -> Result<(), CompileError> {
    let definitions: Vec<Definition> = tree
        .definitions
        .iter()
        .filter_map(|&id| tree.definition(id).cloned())
        .collect();
    let file = registry.add_file(tree.ast.clone());
    for mut def in definitions {
        def.file = file;
        registry.register(def)?;
    }
    for named in &tree.origins {
        registry.register_origin(&named.namespace, named.origin.clone(), (named.line, named.column))?;
    }
    registry.merge_fragments(&tree.fragments);
    Ok(())
}

struct Task {
    path: PathBuf,
    namespace: String,
    /// In-memory source; read from `path` when absent.
    source: Option<String>,
}

/// `[Import] [Template] @Kind Name from "..." as Alias;`, applied once every
/// file is discovered.
struct PendingAlias {
    kind: DefKind,
    custom: bool,
    name: String,
    alias: Option<String>,
    namespace: String,
    line: usize,
    column: usize,
}

struct Loader<'o> {
    options: &'o CompileOptions,
    registry: Registry,
    queue: VecDeque<Task>,
    visited: HashSet<PathBuf>,
    aliases: Vec<PendingAlias>,
}

impl<'o> Loader<'o> {
    fn new(options: &'o CompileOptions) -> Self {
        Self {
            options,
            registry: Registry::new(),
            queue: VecDeque::new(),
            visited: HashSet::new(),
            aliases: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Registry, CompileError> {
        while let Some(task) = self.queue.pop_front() {
            if !self.visited.insert(task.path.clone()) {
                debug!(path = %task.path.display(), "already discovered");
                continue;
            }
            self.load(task)?;
        }
        for alias in std::mem::take(&mut self.aliases) {
            self.apply_alias(alias)?;
        }
        Ok(self.registry)
    }

    fn load(&mut self, task: Task) -> Result<(), CompileError> {
        debug!(path = %task.path.display(), namespace = %task.namespace, "discovering file");
        let source = match task.source {
            Some(source) => source,
            None => read(&task.path)?,
        };
        let options = ParseOptions {
            mode: ParseMode::Discovery,
            namespace: task.namespace,
            configuration: self.options.configuration.clone(),
        };
        let fragments = FragmentTable::starting_at(self.registry.fragments().next_id());
        let tree = Parser::parse_source(&source, fragments, &options)?;
        register_tree(&mut self.registry, &tree)?;

        let dir = task.path.parent().map(Path::to_path_buf).unwrap_or_default();
        for import in tree.imports.iter().filter_map(|&id| tree.import(id)) {
            let extension = match &import.kind {
                ImportKind::Chtl | ImportKind::Precise { .. } => "chtl",
                ImportKind::Html => "html",
                ImportKind::Style => "css",
                ImportKind::JavaScript => "js",
            };
            let path = self.locate(&import.path, extension, &dir).ok_or_else(|| {
                CompileError::ImportNotFound {
                    path: import.path.clone(),
                    from: task.path.display().to_string(),
                }
            })?;

            match &import.kind {
                ImportKind::Chtl => self.queue.push_back(Task {
                    path,
                    namespace: import.alias.clone().unwrap_or_default(),
                    source: None,
                }),
                ImportKind::Precise { custom, kind, name } => {
                    self.queue.push_back(Task {
                        path,
                        namespace: String::new(),
                        source: None,
                    });
                    self.aliases.push(PendingAlias {
                        kind: *kind,
                        custom: *custom,
                        name: name.clone(),
                        alias: import.alias.clone(),
                        namespace: import.namespace.clone(),
                        line: import.line,
                        column: import.column,
                    });
                }
                raw => {
                    let raw_type = match raw {
                        ImportKind::Html => "Html",
                        ImportKind::Style => "Style",
                        _ => "JavaScript",
                    };
                    let origin = Origin {
                        raw_type: raw_type.into(),
                        name: import.alias.clone(),
                        content: read(&path)?,
                    };
                    debug!(path = %path.display(), raw_type, "imported raw content");
                    self.registry
                        .register_origin(&import.namespace, origin, (import.line, import.column))?;
                }
            }
        }
        Ok(())
    }

    /// Check a precise import and register its alias, if any.
    fn apply_alias(&mut self, pending: PendingAlias) -> Result<(), CompileError> {
        let def = self
            .registry
            .find(pending.kind, &pending.name, "")
            .filter(|def| def.custom == pending.custom)
            .cloned()
            .ok_or_else(|| CompileError::TemplateNotFound {
                kind: pending.kind.to_string(),
                name: pending.name.clone(),
                namespace: String::new(),
                line: pending.line,
                column: pending.column,
            })?;
        let Some(alias) = pending.alias else {
            return Ok(());
        };
        debug!(name = %def.name, %alias, namespace = %pending.namespace, "registering import alias");
        self.registry.register(Definition {
            name: alias,
            namespace: pending.namespace,
            line: pending.line,
            column: pending.column,
            ..def
        })
    }

    /// Resolve an import path: next to the importing file first, then in
    /// each module directory. A path without an extension also tries
    /// `extension`.
    fn locate(&self, path: &str, extension: &str, dir: &Path) -> Option<PathBuf> {
        let raw = Path::new(path);
        let mut candidates = vec![raw.to_path_buf()];
        if raw.extension().is_none() {
            candidates.push(raw.with_extension(extension));
        }

        std::iter::once(dir)
            .chain(self.options.module_dirs.iter().map(PathBuf::as_path))
            .flat_map(|base| candidates.iter().map(move |c| base.join(c)))
            .find(|candidate| candidate.is_file())
            .and_then(|found| fs::canonicalize(found).ok())
    }
}

fn canonical(path: &Path) -> Result<PathBuf, CompileError> {
    fs::canonicalize(path).map_err(|e| io_error(path, e))
}

fn read(path: &Path) -> Result<String, CompileError> {
    fs::read_to_string(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, e: std::io::Error) -> CompileError {
    CompileError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
