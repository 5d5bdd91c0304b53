//! Planner: registry to dependency-ordered plan.
//!
//! Builds a rule-level dependency graph over every emitted namespace,
//! computes dependency depths, and flattens each namespace into a
//! deterministic topological order (depth descending, FQN ascending,
//! dependencies before dependents, each rule exactly once). Pattern
//! elements lower to execution stages along the way.
//!
//! The graph is an arena of nodes with index children; the plan copies
//! everything it needs out of the registry and owns its entities.

use crate::ast::{
    qualify, Identifier, PatternElement, PatternKind, Rule as AstRule, Sexpr,
};
use crate::error::{Diagnostic, DiagnosticSink, Error, Severity};
use crate::registry::{Entry, Registry, BUILTIN_NAMESPACE};
use crate::token::{Lexeme, Token};
use std::collections::{BTreeMap, HashMap, HashSet};

// ── Plan entities ────────────────────────────────────────────────────

/// Execution-level form of one pattern element.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub min: String,
    pub max: String,
    pub binding: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StageKind {
    /// Exact byte sequence, big-endian packed.
    Primitive(Vec<u8>),
    /// Single-byte mask/value predicate from a wildcard literal.
    Wildcard { mask: u8, value: u8 },
    /// Ordered child stages from a compound pattern.
    Group(Vec<Stage>),
    /// Match stage: discriminant reference plus key-to-rule cases.
    Select {
        reference: String,
        cases: Vec<SelectCase>,
    },
    /// Named type or rule reference, including the fixed primitives.
    Reference(String),
}

#[derive(Debug, Clone)]
pub struct SelectCase {
    pub key: SelectKey,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectKey {
    Number(u64),
    Text(String),
}

/// One rule alternative.
#[derive(Debug, Clone)]
pub struct Alternate {
    pub stage: Stage,
}

#[derive(Debug, Clone)]
pub struct StorageSlot {
    pub name: String,
    pub ty: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub pattern: Vec<Alternate>,
    pub storage: Option<Vec<StorageSlot>>,
    pub encode: Option<Sexpr>,
    pub decode: Option<Sexpr>,
    pub validate: Option<Sexpr>,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: Vec<String>,
    pub element: Option<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub parts: Vec<String>,
    pub imports: Vec<Import>,
    pub rules: Vec<Rule>,
}

/// The front end's product: emitted namespaces with their rules in
/// dependency order.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub namespaces: Vec<Namespace>,
}

// ── Dependency graph ─────────────────────────────────────────────────

#[derive(Debug)]
struct DepNode {
    fqn: String,
    namespace: String,
    rule: String,
    needs: Vec<usize>,
}

#[derive(Default)]
struct DepGraph {
    nodes: Vec<DepNode>,
    index: HashMap<String, usize>,
    building: HashSet<String>,
}

impl DepGraph {
    /// Get or create the node for a rule, tracing its dependencies on
    /// first visit. The graph is a DAG built by memoisation; re-entering
    /// a node still under construction is a dependency cycle.
    fn trace_rule(
        &mut self,
        registry: &Registry,
        ns_name: &str,
        rule_name: &str,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<usize, Error> {
        let fqn = qualify(ns_name, rule_name);

        if let Some(&idx) = self.index.get(&fqn) {
            if self.building.contains(&fqn) {
                sink.report(Diagnostic::bare(
                    Severity::Error,
                    ns_name,
                    0,
                    format!("Dependency cycle involving '{}'", fqn),
                ));
                return Err(Error::Dependency {
                    message: format!("cycle involving '{}'", fqn),
                });
            }
            return Ok(idx);
        }

        let idx = self.nodes.len();
        self.nodes.push(DepNode {
            fqn: fqn.clone(),
            namespace: ns_name.to_owned(),
            rule: rule_name.to_owned(),
            needs: Vec::new(),
        });
        self.index.insert(fqn.clone(), idx);
        self.building.insert(fqn.clone());

        let rule = registry
            .rule(ns_name, rule_name)
            .expect("traced rules exist in the registry");
        for alternative in &rule.pattern {
            self.trace_element(registry, ns_name, alternative, idx, sink)?;
        }

        self.building.remove(&fqn);
        Ok(idx)
    }

    fn trace_element(
        &mut self,
        registry: &Registry,
        ns_name: &str,
        element: &PatternElement,
        node: usize,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), Error> {
        match &element.kind {
            PatternKind::Literal(_) => Ok(()),
            PatternKind::Reference(ident) => {
                self.trace_ident(registry, ns_name, ident, node, sink)
            }
            PatternKind::Compound(children) => {
                for child in children {
                    self.trace_element(registry, ns_name, child, node, sink)?;
                }
                Ok(())
            }
            PatternKind::Match { cases, .. } => {
                for case in cases {
                    self.trace_ident(registry, ns_name, &case.value, node, sink)?;
                }
                Ok(())
            }
        }
    }

    /// Resolve one referenced identifier. Rules become edges; aliases into
    /// the built-in namespace are primitives and end the trace; other
    /// aliases are followed from their owning namespace.
    fn trace_ident(
        &mut self,
        registry: &Registry,
        ns_name: &str,
        ident: &Identifier,
        node: usize,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), Error> {
        let mut current_ns = ns_name.to_owned();
        let mut current = ident.clone();
        let mut hops: HashSet<String> = HashSet::new();

        loop {
            let Some((fqn, entry)) = registry.resolve(&current_ns, &current) else {
                sink.report(Diagnostic::at_token(
                    Severity::Error,
                    ident.first(),
                    format!("Symbol '{}' not defined in current scope", current.joined()),
                ));
                return Err(Error::Resolution {
                    symbol: current.joined(),
                    namespace: current_ns,
                });
            };

            match entry {
                Entry::Rule {
                    namespace, rule, ..
                } => {
                    let namespace = namespace.clone();
                    let rule = rule.clone();
                    let child = self.trace_rule(registry, &namespace, &rule, sink)?;
                    self.nodes[node].needs.push(child);
                    return Ok(());
                }

                Entry::Alias {
                    namespace, name, ..
                } => {
                    if namespace == BUILTIN_NAMESPACE {
                        return Ok(()); // primitive reference
                    }
                    if !hops.insert(fqn.clone()) {
                        sink.report(Diagnostic::at_token(
                            Severity::Error,
                            ident.first(),
                            format!("Alias cycle while resolving '{}'", ident.joined()),
                        ));
                        return Err(Error::Dependency {
                            message: format!("alias cycle at '{}'", fqn),
                        });
                    }
                    let alias = registry
                        .namespace(namespace)
                        .and_then(|ns| ns.aliases.get(name))
                        .expect("alias entries point at live aliases");
                    current = alias.original.clone();
                    current_ns = namespace.clone();
                }

                other => {
                    sink.report(Diagnostic::at_token(
                        Severity::Error,
                        ident.first(),
                        format!(
                            "Unexpected resolve type for '{}' ({})",
                            current.joined(),
                            match other {
                                Entry::Namespace { .. } => "namespace",
                                Entry::StorageField { .. } => "storage field",
                                _ => "unknown",
                            }
                        ),
                    ));
                    return Err(Error::Dependency {
                        message: format!("unexpected resolve type for '{}'", current.joined()),
                    });
                }
            }
        }
    }

    /// Dependency depth per node: 1 for leaves, 1 + max child depth
    /// otherwise. The graph is acyclic by construction.
    fn depths(&self) -> Vec<usize> {
        fn depth_of(nodes: &[DepNode], idx: usize, memo: &mut [usize]) -> usize {
            if memo[idx] != 0 {
                return memo[idx];
            }
            let children = nodes[idx]
                .needs
                .iter()
                .map(|&n| depth_of(nodes, n, memo))
                .max()
                .unwrap_or(0);
            memo[idx] = children + 1;
            memo[idx]
        }

        let mut memo = vec![0; self.nodes.len()];
        for idx in 0..self.nodes.len() {
            depth_of(&self.nodes, idx, &mut memo);
        }
        memo
    }
}

// ── Plan generation ──────────────────────────────────────────────────

/// Generate the plan for every emitted namespace in the registry.
pub fn generate(registry: &Registry, sink: &mut dyn DiagnosticSink) -> Result<Plan, Error> {
    let mut graph = DepGraph::default();
    for (ns_name, namespace) in registry.emit_namespaces() {
        for rule_name in namespace.rules.keys() {
            graph.trace_rule(registry, ns_name, rule_name, sink)?;
        }
    }

    let depths = graph.depths();
    let mut order: Vec<usize> = (0..graph.nodes.len()).collect();
    order.sort_by(|&a, &b| {
        depths[b]
            .cmp(&depths[a])
            .then_with(|| graph.nodes[a].fqn.cmp(&graph.nodes[b].fqn))
    });

    // Every named emit namespace appears in the plan, rules or not. The
    // nameless default namespace appears only when it holds rules, and
    // module namespaces only when the trace pulled rules out of them.
    let mut spaces: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (ns_name, _) in registry.emit_namespaces() {
        if !ns_name.is_empty() {
            spaces.entry(ns_name.clone()).or_default();
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    for idx in order {
        emit_post_order(&graph, idx, &mut seen, &mut spaces);
    }

    let mut plan = Plan::default();
    for (ns_name, nodes) in &spaces {
        let Some(namespace) = registry.namespace(ns_name) else {
            sink.report(Diagnostic::bare(
                Severity::Error,
                ns_name,
                0,
                format!("Impossibly missing namespace: {}", ns_name),
            ));
            return Err(Error::Dependency {
                message: format!("missing namespace '{}'", ns_name),
            });
        };

        let mut out = Namespace {
            parts: namespace.name_parts(),
            imports: namespace.imports.iter().map(plan_import).collect(),
            rules: Vec::with_capacity(nodes.len()),
        };
        for &idx in nodes {
            let node = &graph.nodes[idx];
            let rule = registry
                .rule(&node.namespace, &node.rule)
                .expect("planned rules exist in the registry");
            out.rules.push(plan_rule(rule, sink)?);
        }
        plan.namespaces.push(out);
    }

    Ok(plan)
}

/// Emit `idx`'s transitive dependencies, then `idx`, each rule exactly
/// once across the whole plan. Rules land in their own namespace's list.
fn emit_post_order(
    graph: &DepGraph,
    idx: usize,
    seen: &mut HashSet<String>,
    spaces: &mut BTreeMap<String, Vec<usize>>,
) {
    let node = &graph.nodes[idx];
    if !seen.insert(node.fqn.clone()) {
        return;
    }
    for &need in &node.needs {
        emit_post_order(graph, need, seen, spaces);
    }
    spaces
        .entry(node.namespace.clone())
        .or_default()
        .push(idx);
}

fn plan_import(import: &crate::ast::Import) -> Import {
    Import {
        module: import.module.part_texts(),
        element: import.element.as_ref().map(Identifier::joined),
        alias: import.alias.as_ref().map(Identifier::joined),
    }
}

fn plan_rule(rule: &AstRule, sink: &mut dyn DiagnosticSink) -> Result<Rule, Error> {
    let mut pattern = Vec::with_capacity(rule.pattern.len());
    for alternative in &rule.pattern {
        pattern.push(Alternate {
            stage: build_stage(alternative, sink)?,
        });
    }

    Ok(Rule {
        name: rule.name.text().to_owned(),
        pattern,
        storage: rule.storage.as_ref().map(|fields| {
            fields
                .iter()
                .map(|f| StorageSlot {
                    name: f.name.text().to_owned(),
                    ty: f.ty.as_ref().map(Identifier::part_texts).unwrap_or_default(),
                })
                .collect()
        }),
        encode: rule.encode.clone(),
        decode: rule.decode.clone(),
        validate: rule.validate.clone(),
    })
}

// ── Stage construction ───────────────────────────────────────────────

fn build_stage(element: &PatternElement, sink: &mut dyn DiagnosticSink) -> Result<Stage, Error> {
    let kind = match &element.kind {
        PatternKind::Literal(token) => {
            if token.lexeme().is_numeric(false) || token.is(Lexeme::StringLiteral) {
                StageKind::Primitive(literal_bytes(token, sink)?)
            } else {
                let (mask, value) = wildcard_mask_value(token, sink)?;
                StageKind::Wildcard { mask, value }
            }
        }

        PatternKind::Reference(ident) => StageKind::Reference(ident.joined()),

        PatternKind::Compound(children) => {
            if children.iter().all(collapsible_literal) {
                let mut bytes = Vec::new();
                for child in children {
                    match &child.kind {
                        PatternKind::Literal(token) => {
                            bytes.extend(literal_bytes(token, sink)?)
                        }
                        _ => unreachable!("collapsible children are literals"),
                    }
                }
                StageKind::Primitive(bytes)
            } else {
                let mut stages = Vec::with_capacity(children.len());
                for child in children {
                    stages.push(build_stage(child, sink)?);
                }
                StageKind::Group(stages)
            }
        }

        PatternKind::Match {
            discriminant,
            cases,
        } => StageKind::Select {
            reference: discriminant.joined(),
            cases: cases
                .iter()
                .map(|case| {
                    Ok(SelectCase {
                        key: select_key(&case.key, sink)?,
                        value: case.value.joined(),
                    })
                })
                .collect::<Result<_, Error>>()?,
        },
    };

    Ok(Stage {
        kind,
        min: element.repeat.min.clone(),
        max: element.repeat.max.clone(),
        binding: element.binding.as_ref().map(|t| t.text().to_owned()),
    })
}

/// A child that may be folded into a single primitive stage: an exact
/// (non-wildcard) literal, repeated exactly once, with no binding.
fn collapsible_literal(element: &PatternElement) -> bool {
    element.repeat.is_once()
        && element.binding.is_none()
        && matches!(
            &element.kind,
            PatternKind::Literal(token)
                if token.lexeme().is_numeric(false) || token.is(Lexeme::StringLiteral)
        )
}

/// Big-endian byte image of a literal token. Decimal and octal pack the
/// numeric value into the fewest bytes; hexadecimal packs two digits per
/// byte and binary eight; strings copy their characters.
fn literal_bytes(token: &Token, sink: &mut dyn DiagnosticSink) -> Result<Vec<u8>, Error> {
    let text = token.text();
    match token.lexeme() {
        Lexeme::DecimalLiteral => {
            let digits = text.strip_prefix('+').unwrap_or(text);
            if digits.starts_with('-') {
                sink.report(Diagnostic::error(
                    token,
                    "Negative literals are not valid in patterns",
                ));
                return Err(Error::lowering(token));
            }
            let value: u64 = digits.parse().map_err(|_| {
                sink.report(Diagnostic::error(token, "Decimal literal out of range"));
                Error::lowering(token)
            })?;
            Ok(minimal_be_bytes(value))
        }

        Lexeme::OctalLiteral => {
            let digits = &text[1..];
            let value = u64::from_str_radix(digits, 8).map_err(|_| {
                sink.report(Diagnostic::error(token, "Octal literal out of range"));
                Error::lowering(token)
            })?;
            Ok(minimal_be_bytes(value))
        }

        Lexeme::HexadecimalLiteral => {
            let digits = &text[2..];
            let padded = if digits.len() % 2 == 1 {
                format!("0{}", digits)
            } else {
                digits.to_owned()
            };
            let bytes = padded
                .as_bytes()
                .chunks(2)
                .map(|pair| {
                    let hi = (pair[0] as char).to_digit(16).expect("scanned hex digit");
                    let lo = (pair[1] as char).to_digit(16).expect("scanned hex digit");
                    (hi * 16 + lo) as u8
                })
                .collect();
            Ok(bytes)
        }

        Lexeme::BinaryLiteral => {
            let digits = &text[2..];
            let pad = (8 - digits.len() % 8) % 8;
            let padded = format!("{}{}", "0".repeat(pad), digits);
            let bytes = padded
                .as_bytes()
                .chunks(8)
                .map(|chunk| {
                    chunk
                        .iter()
                        .fold(0u8, |acc, &bit| (acc << 1) | (bit - b'0'))
                })
                .collect();
            Ok(bytes)
        }

        Lexeme::StringLiteral => Ok(text[1..text.len() - 1].as_bytes().to_vec()),

        Lexeme::FloatLiteral => {
            sink.report(Diagnostic::error(
                token,
                "Floating point literals are not valid in patterns",
            ));
            Err(Error::lowering(token))
        }

        _ => {
            sink.report(Diagnostic::error(token, "Unexpected literal in pattern"));
            Err(Error::lowering(token))
        }
    }
}

fn minimal_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[first..].to_vec()
}

/// Mask and value byte from a wildcard pattern literal: every digit of
/// the declared base contributes its bits, `*` digits contribute zero
/// mask bits.
fn wildcard_mask_value(
    token: &Token,
    sink: &mut dyn DiagnosticSink,
) -> Result<(u8, u8), Error> {
    let text = token.text();
    let (digits, bits) = match token.lexeme() {
        Lexeme::BinaryPattern => (&text[2..], 1u32),
        Lexeme::HexadecimalPattern => (&text[2..], 4),
        Lexeme::OctalPattern => (&text[1..], 3),
        _ => {
            sink.report(Diagnostic::error(token, "Unexpected wildcard pattern"));
            return Err(Error::lowering(token));
        }
    };

    if digits.len() as u32 * bits > 8 {
        sink.report(Diagnostic::error(
            token,
            "Wildcard pattern wider than one byte",
        ));
        return Err(Error::lowering(token));
    }

    let mut mask: u32 = 0;
    let mut value: u32 = 0;
    for digit in digits.chars() {
        mask <<= bits;
        value <<= bits;
        if digit != '*' {
            mask |= (1 << bits) - 1;
            value |= digit.to_digit(1 << bits).expect("scanned pattern digit");
        }
    }

    Ok((mask as u8, value as u8))
}

fn select_key(token: &Token, sink: &mut dyn DiagnosticSink) -> Result<SelectKey, Error> {
    let text = token.text();
    let parsed = match token.lexeme() {
        Lexeme::DecimalLiteral => text
            .strip_prefix('+')
            .unwrap_or(text)
            .parse::<u64>()
            .ok(),
        Lexeme::OctalLiteral => u64::from_str_radix(&text[1..], 8).ok(),
        Lexeme::BinaryLiteral => u64::from_str_radix(&text[2..], 2).ok(),
        Lexeme::HexadecimalLiteral => u64::from_str_radix(&text[2..], 16).ok(),
        Lexeme::StringLiteral => return Ok(SelectKey::Text(text[1..text.len() - 1].to_owned())),
        _ => None,
    };

    parsed.map(SelectKey::Number).ok_or_else(|| {
        sink.report(Diagnostic::error(token, "Invalid match case key"));
        Error::lowering(token)
    })
}
