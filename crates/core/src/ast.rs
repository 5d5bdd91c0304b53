//! Abstract syntax tree.
//!
//! The AST discards syntactic noise (keywords, punctuation, line ends) and
//! normalises repetition and binding onto the pattern elements. Source
//! locations survive through the retained tokens. Identifier equality and
//! hashing use the dot-joined canonical string everywhere.

use crate::token::Token;
use std::collections::BTreeMap;
use std::fmt;

/// Dotted identifier; always at least one component.
#[derive(Debug, Clone)]
pub struct Identifier {
    parts: Vec<Token>,
}

impl Identifier {
    pub fn new(parts: Vec<Token>) -> Self {
        debug_assert!(!parts.is_empty(), "identifiers have at least one component");
        Identifier { parts }
    }

    pub fn single(token: Token) -> Self {
        Identifier { parts: vec![token] }
    }

    /// Concatenate two identifiers, as for FQN construction.
    pub fn join(first: &Identifier, second: &Identifier) -> Self {
        let mut parts = first.parts.clone();
        parts.extend(second.parts.iter().cloned());
        Identifier { parts }
    }

    pub fn parts(&self) -> &[Token] {
        &self.parts
    }

    pub fn first(&self) -> &Token {
        &self.parts[0]
    }

    pub fn is_compound(&self) -> bool {
        self.parts.len() > 1
    }

    pub fn part_texts(&self) -> Vec<String> {
        self.parts.iter().map(|t| t.text().to_owned()).collect()
    }

    /// Canonical dot-joined form; the stable key for the registry, the
    /// dependency graph, and the plan.
    pub fn joined(&self) -> String {
        let mut out = String::new();
        for (i, token) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            out.push_str(token.text());
        }
        out
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// `@import module [element] [as alias]` after lowering.
#[derive(Debug, Clone)]
pub struct Import {
    pub module: Identifier,
    pub element: Option<Identifier>,
    pub alias: Option<Identifier>,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Import: ")?;
        if let Some(element) = &self.element {
            write!(f, "{} from ", element)?;
        }
        write!(f, "{}", self.module)?;
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

/// `@alias original new`, also synthesised from imports.
#[derive(Debug, Clone)]
pub struct Alias {
    pub original: Identifier,
    pub alias: Identifier,
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alias: {} as {}", self.original, self.alias)
    }
}

/// Normalised repetition bounds kept as strings; `-1` means unbounded and
/// alphabetic bounds name values from the enclosing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repeat {
    pub min: String,
    pub max: String,
}

impl Repeat {
    pub fn once() -> Self {
        Repeat {
            min: "1".to_owned(),
            max: "1".to_owned(),
        }
    }

    pub fn is_once(&self) -> bool {
        self.min == "1" && self.max == "1"
    }
}

/// One pattern element with its repetition and optional binding.
#[derive(Debug, Clone)]
pub struct PatternElement {
    pub repeat: Repeat,
    pub binding: Option<Token>,
    pub kind: PatternKind,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    /// A literal token: numeric/string literal or wildcard pattern.
    Literal(Token),
    /// A named type or rule reference.
    Reference(Identifier),
    /// Ordered sequence of sub-elements.
    Compound(Vec<PatternElement>),
    /// `@match (discriminant) { key => rule ... }`.
    Match {
        discriminant: Identifier,
        cases: Vec<MatchCase>,
    },
}

impl fmt::Display for PatternElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PatternKind::Literal(token) => write!(f, "Element: {}", token.text())?,
            PatternKind::Reference(ident) => write!(f, "Element: {}", ident)?,
            PatternKind::Compound(children) => {
                f.write_str("Group:")?;
                for child in children {
                    write!(f, " [{}]", child)?;
                }
            }
            PatternKind::Match {
                discriminant,
                cases,
            } => {
                write!(f, "Match: ({})", discriminant)?;
                for case in cases {
                    write!(f, " {} => {}", case.key.text(), case.value)?;
                }
            }
        }

        write!(f, " from {} to {}", self.repeat.min, self.repeat.max)?;
        if let Some(binding) = &self.binding {
            write!(f, " as {}", binding.text())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MatchCase {
    pub key: Token,
    pub value: Identifier,
}

/// One storage field, optionally typed.
#[derive(Debug, Clone)]
pub struct StorageField {
    pub name: Token,
    pub ty: Option<Identifier>,
}

/// S-expression in flat form: an ordered atom vector, recursion through
/// nested vectors.
#[derive(Debug, Clone)]
pub struct Sexpr {
    pub atoms: Vec<SexprAtom>,
}

#[derive(Debug, Clone)]
pub enum SexprAtom {
    Token(Token),
    Identifier(Identifier),
    Sexpr(Sexpr),
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match atom {
                SexprAtom::Token(token) => f.write_str(token.text())?,
                SexprAtom::Identifier(ident) => write!(f, "{}", ident)?,
                SexprAtom::Sexpr(inner) => write!(f, "{}", inner)?,
            }
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: Token,
    /// Alternatives, in source order.
    pub pattern: Vec<PatternElement>,
    pub storage: Option<Vec<StorageField>>,
    pub encode: Option<Sexpr>,
    pub decode: Option<Sexpr>,
    pub validate: Option<Sexpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    /// Rules are output by the plugin.
    Emit,
    /// Pure reference; contributes definitions only.
    Module,
}

#[derive(Debug)]
pub struct Namespace {
    /// `None` for the nameless default namespace.
    pub ident: Option<Identifier>,
    pub kind: NamespaceKind,
    /// Rule table; later definitions with the same name overwrite.
    pub rules: BTreeMap<String, Rule>,
    /// Alias table keyed by the new name; at most one entry per new name.
    pub aliases: BTreeMap<String, Alias>,
    /// Imports in source order.
    pub imports: Vec<Import>,
}

impl Namespace {
    pub fn new(ident: Option<Identifier>, kind: NamespaceKind) -> Self {
        Namespace {
            ident,
            kind,
            rules: BTreeMap::new(),
            aliases: BTreeMap::new(),
            imports: Vec::new(),
        }
    }

    /// Namespace name; empty string for the default namespace.
    pub fn name(&self) -> String {
        self.ident.as_ref().map(Identifier::joined).unwrap_or_default()
    }

    /// Namespace name parts; empty for the default namespace.
    pub fn name_parts(&self) -> Vec<String> {
        self.ident
            .as_ref()
            .map(Identifier::part_texts)
            .unwrap_or_default()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Namespace: {}", self.name())?;
        for alias in self.aliases.values() {
            writeln!(f, "{}", alias)?;
        }
        for import in &self.imports {
            writeln!(f, "{}", import)?;
        }
        for (name, rule) in &self.rules {
            writeln!(f, "Rule: {}", name)?;
            for element in &rule.pattern {
                writeln!(f, "  {}", element)?;
            }
        }
        Ok(())
    }
}

/// Fully qualified name under a namespace; the default namespace
/// contributes no prefix.
pub fn qualify(namespace: &str, rest: &str) -> String {
    if namespace.is_empty() {
        rest.to_owned()
    } else if rest.is_empty() {
        namespace.to_owned()
    } else {
        format!("{}.{}", namespace, rest)
    }
}

/// One file's AST: namespaces keyed by name. A nameless default namespace
/// is always present and is current until the first `@namespace` or
/// `@module` directive.
#[derive(Debug)]
pub struct SyntaxTree {
    pub namespaces: BTreeMap<String, Namespace>,
    current: String,
}

impl SyntaxTree {
    pub fn new() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(String::new(), Namespace::new(None, NamespaceKind::Emit));
        SyntaxTree {
            namespaces,
            current: String::new(),
        }
    }

    /// Switch to (creating if needed) the namespace named by `ident`.
    pub fn enter_namespace(&mut self, ident: Identifier, kind: NamespaceKind) -> &mut Namespace {
        let name = ident.joined();
        self.current = name.clone();
        self.namespaces
            .entry(name)
            .or_insert_with(|| Namespace::new(Some(ident), kind))
    }

    pub fn current_namespace(&self) -> &Namespace {
        &self.namespaces[&self.current]
    }

    pub fn current_namespace_mut(&mut self) -> &mut Namespace {
        self.namespaces
            .get_mut(&self.current)
            .expect("current namespace always exists")
    }
}

impl Default for SyntaxTree {
    fn default() -> Self {
        SyntaxTree::new()
    }
}
