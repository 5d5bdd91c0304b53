//! Registry: file discovery, per-file ASTs, and the global FQN index.
//!
//! The registry owns every parsed tree, keyed by input file name. Each
//! transitively imported `<modulepath>.nyx` is parsed at most once, then
//! the mandatory built-in `nyx.nyx` module, and finally the global index
//! is built over namespaces, rules, storage fields, and aliases. Nothing
//! in an AST is mutated after `parse` returns.

use crate::ast::{qualify, Alias, Identifier, Namespace, NamespaceKind, Rule, SyntaxTree};
use crate::error::{Diagnostic, DiagnosticSink, Error, Severity};
use crate::lower::lower;
use crate::parser;
use crate::source::SourceProvider;
use crate::tokenizer::tokenize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// File name of the mandatory built-in module.
pub const BUILTIN_NAME: &str = "nyx.nyx";

/// Namespace holding the built-in primitives.
pub const BUILTIN_NAMESPACE: &str = "nyx";

/// Embedded copy of the built-in module, used when the include path does
/// not provide one.
const BUILTIN_SOURCE: &str = include_str!("../stdlib/nyx.nyx");

/// One entry of the global FQN index. Entries are descriptors into the
/// registry-owned trees, never shared handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Namespace {
        file: String,
        namespace: String,
    },
    Rule {
        file: String,
        namespace: String,
        rule: String,
    },
    StorageField {
        file: String,
        namespace: String,
        rule: String,
        field: String,
    },
    Alias {
        file: String,
        namespace: String,
        /// Key in the owning namespace's alias table (the new name).
        name: String,
    },
}

impl Entry {
    pub fn namespace_name(&self) -> &str {
        match self {
            Entry::Namespace { namespace, .. }
            | Entry::Rule { namespace, .. }
            | Entry::StorageField { namespace, .. }
            | Entry::Alias { namespace, .. } => namespace,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    /// Per-file ASTs, keyed by the name the file was requested under.
    parsed: BTreeMap<String, SyntaxTree>,
    /// Emitted namespaces: name to owning file. First definition wins.
    emit: BTreeMap<String, String>,
    /// Module (reference-only) namespaces: name to owning file.
    modules: BTreeMap<String, String>,
    /// Global FQN index.
    global: BTreeMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Parse `file` and everything it transitively imports, then the
    /// built-in module, then (re)build the global index.
    pub fn parse(
        &mut self,
        provider: &dyn SourceProvider,
        file: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), Error> {
        self.parse_file(provider, file, false, sink)?;
        self.parse_file(provider, BUILTIN_NAME, true, sink)?;
        self.build_index();
        Ok(())
    }

    fn parse_file(
        &mut self,
        provider: &dyn SourceProvider,
        file: &str,
        search: bool,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), Error> {
        if self.parsed.contains_key(file) {
            return Ok(());
        }

        let source = self.load(provider, file, search, sink)?;
        let tokens = tokenize(&source, file);
        let cst = parser::parse(&tokens, sink)?;
        let mut tree = lower(&cst, sink)?;

        // Synthesise an alias for each import into its namespace's alias
        // table, and remember which module files to pull in.
        let mut wanted: Vec<String> = Vec::new();
        for namespace in tree.namespaces.values_mut() {
            for import in &namespace.imports {
                wanted.push(import.module.joined());
                let alias = match (&import.element, &import.alias) {
                    (Some(element), Some(alias)) => Some(Alias {
                        original: Identifier::join(&import.module, element),
                        alias: alias.clone(),
                    }),
                    (None, Some(alias)) => Some(Alias {
                        original: import.module.clone(),
                        alias: alias.clone(),
                    }),
                    (Some(element), None) => Some(Alias {
                        original: Identifier::join(&import.module, element),
                        alias: element.clone(),
                    }),
                    (None, None) => None,
                };
                if let Some(alias) = alias {
                    namespace.aliases.insert(alias.alias.joined(), alias);
                }
            }
        }

        for (name, namespace) in &tree.namespaces {
            let side = match namespace.kind {
                NamespaceKind::Emit => &mut self.emit,
                NamespaceKind::Module => &mut self.modules,
            };
            side.entry(name.clone()).or_insert_with(|| file.to_owned());
        }

        // Mark the file parsed before chasing imports so import cycles
        // terminate.
        self.parsed.insert(file.to_owned(), tree);

        for module in wanted {
            self.parse_file(provider, &format!("{}.nyx", module), true, sink)?;
        }

        Ok(())
    }

    fn load(
        &self,
        provider: &dyn SourceProvider,
        file: &str,
        search: bool,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<String, Error> {
        let path = if search {
            match provider.locate(file) {
                Some(path) => path,
                None if file == BUILTIN_NAME => return Ok(BUILTIN_SOURCE.to_owned()),
                None => {
                    sink.report(Diagnostic::bare(
                        Severity::Error,
                        file,
                        0,
                        format!("Failure to find import {}", file),
                    ));
                    return Err(Error::FileNotFound {
                        name: file.to_owned(),
                    });
                }
            }
        } else {
            Path::new(file).to_path_buf()
        };

        provider.read_source(&path).map_err(|e| {
            sink.report(Diagnostic::bare(
                Severity::Error,
                file,
                0,
                format!("Failure to open {} for reading", file),
            ));
            Error::Io {
                path: path.to_string_lossy().into_owned(),
                source: e,
            }
        })
    }

    /// Populate the global FQN index: for every namespace, the namespace
    /// itself, each rule, each rule's storage fields, and each alias.
    fn build_index(&mut self) {
        let mut global = BTreeMap::new();

        let sides = self.emit.iter().chain(self.modules.iter());
        for (ns_name, file) in sides {
            let namespace = &self.parsed[file].namespaces[ns_name];

            global
                .entry(ns_name.clone())
                .or_insert_with(|| Entry::Namespace {
                    file: file.clone(),
                    namespace: ns_name.clone(),
                });

            for (rule_name, rule) in &namespace.rules {
                let fqn = qualify(ns_name, rule_name);
                if let Some(storage) = &rule.storage {
                    for field in storage {
                        global
                            .entry(qualify(&fqn, field.name.text()))
                            .or_insert_with(|| Entry::StorageField {
                                file: file.clone(),
                                namespace: ns_name.clone(),
                                rule: rule_name.clone(),
                                field: field.name.text().to_owned(),
                            });
                    }
                }
                global.entry(fqn).or_insert_with(|| Entry::Rule {
                    file: file.clone(),
                    namespace: ns_name.clone(),
                    rule: rule_name.clone(),
                });
            }

            for alias_name in namespace.aliases.keys() {
                global
                    .entry(qualify(ns_name, alias_name))
                    .or_insert_with(|| Entry::Alias {
                        file: file.clone(),
                        namespace: ns_name.clone(),
                        name: alias_name.clone(),
                    });
            }
        }

        self.global = global;
    }

    // -- lookups ------------------------------------------------

    pub fn syntax_trees(&self) -> &BTreeMap<String, SyntaxTree> {
        &self.parsed
    }

    pub fn global_index(&self) -> &BTreeMap<String, Entry> {
        &self.global
    }

    /// Emitted namespaces in name order.
    pub fn emit_namespaces(&self) -> impl Iterator<Item = (&String, &Namespace)> {
        self.emit
            .iter()
            .map(|(name, file)| (name, &self.parsed[file].namespaces[name]))
    }

    /// Fetch a namespace (emitted or module) by name.
    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        let file = self.emit.get(name).or_else(|| self.modules.get(name))?;
        self.parsed.get(file)?.namespaces.get(name)
    }

    /// Fetch a rule by owning namespace and name.
    pub fn rule(&self, namespace: &str, rule: &str) -> Option<&Rule> {
        self.namespace(namespace)?.rules.get(rule)
    }

    /// Direct FQN lookup.
    pub fn lookup(&self, fqn: &str) -> Option<(&String, &Entry)> {
        self.global.get_key_value(fqn)
    }

    /// Resolve `ident` as seen from `namespace`.
    ///
    /// Single-component names try the current namespace, then the alias
    /// table (restarting on single-component originals, going global on
    /// qualified ones), then fall back to the built-in `nyx` namespace.
    /// Multi-component names may have their first component substituted by
    /// an alias before the global lookup.
    pub fn resolve(&self, namespace: &str, ident: &Identifier) -> Option<(&String, &Entry)> {
        if !ident.is_compound() {
            let mut seen = HashSet::new();
            return self.resolve_simple(namespace, ident.first().text(), &mut seen);
        }

        let parts = ident.part_texts();
        if let Some(ns) = self.namespace(namespace) {
            if let Some(alias) = ns.aliases.get(&parts[0]) {
                let mut substituted = alias.original.part_texts();
                substituted.extend(parts[1..].iter().cloned());
                return self.lookup(&substituted.join("."));
            }
        }

        self.lookup(&ident.joined())
    }

    fn resolve_simple<'a>(
        &'a self,
        namespace: &str,
        name: &str,
        seen: &mut HashSet<String>,
    ) -> Option<(&'a String, &'a Entry)> {
        if !seen.insert(format!("{}\u{0}{}", namespace, name)) {
            return None; // alias cycle
        }

        let fqn = qualify(namespace, name);
        if let Some(found) = self.lookup(&fqn) {
            return Some(found);
        }

        if let Some(ns) = self.namespace(namespace) {
            if let Some(alias) = ns.aliases.get(name) {
                if !alias.original.is_compound() {
                    return self.resolve_simple(namespace, alias.original.first().text(), seen);
                }
                return self.lookup(&alias.original.joined());
            }
        }

        self.lookup(&qualify(BUILTIN_NAMESPACE, name))
    }
}
