//! Abstract lowerer: CST to AST.
//!
//! Walks the CST root with a nameless default namespace current, switching
//! namespaces on `@namespace`/`@module`, accumulating imports and aliases,
//! and lowering rules. Comments and documentation are dropped. Repetition
//! shorthands are normalised here so every pattern element leaves with a
//! defined `(min, max)`.

use crate::ast::{
    Alias, Identifier, Import, MatchCase, NamespaceKind, PatternElement, PatternKind, Repeat,
    Rule, Sexpr, SexprAtom, StorageField, SyntaxTree,
};
use crate::concrete::{ConcreteElement, ConcreteKind};
use crate::error::{Diagnostic, DiagnosticSink, Error};
use crate::token::{Lexeme, Token};

/// Lower a CST root into a per-file AST.
pub fn lower(root: &ConcreteElement, sink: &mut dyn DiagnosticSink) -> Result<SyntaxTree, Error> {
    let mut tree = SyntaxTree::new();

    for node in root.children() {
        match node.kind() {
            Some(ConcreteKind::Namespace) => {
                tree.enter_namespace(path_identifier(node), NamespaceKind::Emit);
            }
            Some(ConcreteKind::Module) => {
                tree.enter_namespace(path_identifier(node), NamespaceKind::Module);
            }
            Some(ConcreteKind::Import) => {
                let import = lower_import(node);
                tree.current_namespace_mut().imports.push(import);
            }
            Some(ConcreteKind::Alias) => {
                let alias = lower_alias(node);
                tree.current_namespace_mut()
                    .aliases
                    .insert(alias.alias.joined(), alias);
            }
            Some(ConcreteKind::Comment) | Some(ConcreteKind::Documentation) => {}
            Some(ConcreteKind::Rule) => {
                let rule = lower_rule(node, sink)?;
                let name = rule.name.text().to_owned();
                let namespace = tree.current_namespace_mut();
                if namespace.rules.contains_key(&name) {
                    sink.report(Diagnostic::warning(
                        &rule.name,
                        format!("rule '{}' redefined; previous definition replaced", name),
                    ));
                }
                namespace.rules.insert(name, rule);
            }
            _ => {
                let token = node.first_token().expect("CST nodes are never empty");
                sink.report(Diagnostic::error(token, "Unexpected element"));
                return Err(Error::lowering(token));
            }
        }
    }

    Ok(tree)
}

/// Identifier tokens of a `@namespace`/`@module` node, dots discarded.
fn path_identifier(node: &ConcreteElement) -> Identifier {
    Identifier::new(
        node.children()
            .iter()
            .filter_map(ConcreteElement::token)
            .filter(|t| t.is(Lexeme::Identifier))
            .cloned()
            .collect(),
    )
}

fn lower_import(node: &ConcreteElement) -> Import {
    // children: @import ident... [from ident...] [as ident]
    let tokens: Vec<&Token> = node
        .children()
        .iter()
        .filter_map(ConcreteElement::token)
        .collect();

    let mut first: Vec<Token> = Vec::new();
    let mut module: Vec<Token> = Vec::new();
    let mut alias: Vec<Token> = Vec::new();
    let mut target: u8 = 0; // 0 = first, 1 = module (after from), 2 = alias (after as)

    for token in &tokens[1..] {
        if token.is(Lexeme::Dot) {
            continue;
        }
        match token.text() {
            "from" if target == 0 => target = 1,
            "as" if target < 2 => target = 2,
            _ => match target {
                0 => first.push((*token).clone()),
                1 => module.push((*token).clone()),
                _ => alias.push((*token).clone()),
            },
        }
    }

    let alias = (!alias.is_empty()).then(|| Identifier::new(alias));
    if module.is_empty() {
        Import {
            module: Identifier::new(first),
            element: None,
            alias,
        }
    } else {
        Import {
            module: Identifier::new(module),
            element: Some(Identifier::new(first)),
            alias,
        }
    }
}

fn lower_alias(node: &ConcreteElement) -> Alias {
    let children = node.children();
    let original = children[1].token().expect("alias original is a token");
    let renamed = children[2].token().expect("alias new name is a token");
    Alias {
        original: Identifier::single(original.clone()),
        alias: Identifier::single(renamed.clone()),
    }
}

fn lower_rule(node: &ConcreteElement, sink: &mut dyn DiagnosticSink) -> Result<Rule, Error> {
    let children = node.children();
    let name = children[0].token().expect("rule name is a token").clone();

    let mut pattern: Option<(Vec<PatternElement>, Token)> = None;
    let mut storage: Option<(Vec<StorageField>, Token)> = None;
    let mut encode: Option<(Sexpr, Token)> = None;
    let mut decode: Option<(Sexpr, Token)> = None;
    let mut validate: Option<(Sexpr, Token)> = None;

    // skip the name, the braces, and lower each section at most once
    for section in &children[2..children.len() - 1] {
        let marker = section
            .first_token()
            .expect("rule sections start with their keyword")
            .clone();

        match section.kind() {
            Some(ConcreteKind::Pattern) => {
                check_duplicate(pattern.as_ref().map(|p| &p.1), &marker, sink)?;
                pattern = Some((lower_pattern(section, sink)?, marker));
            }
            Some(ConcreteKind::Storage) => {
                check_duplicate(storage.as_ref().map(|s| &s.1), &marker, sink)?;
                storage = Some((lower_storage(section), marker));
            }
            Some(ConcreteKind::Encode) => {
                check_duplicate(encode.as_ref().map(|c| &c.1), &marker, sink)?;
                encode = Some((lower_sexpr(&section.children()[1]), marker));
            }
            Some(ConcreteKind::Decode) => {
                check_duplicate(decode.as_ref().map(|c| &c.1), &marker, sink)?;
                decode = Some((lower_sexpr(&section.children()[1]), marker));
            }
            Some(ConcreteKind::Validate) => {
                check_duplicate(validate.as_ref().map(|c| &c.1), &marker, sink)?;
                validate = Some((lower_sexpr(&section.children()[1]), marker));
            }
            _ => {
                sink.report(Diagnostic::error(&marker, "Unexpected rule section"));
                return Err(Error::lowering(&marker));
            }
        }
    }

    Ok(Rule {
        name,
        pattern: pattern.map(|p| p.0).unwrap_or_default(),
        storage: storage.map(|s| s.0),
        encode: encode.map(|c| c.0),
        decode: decode.map(|c| c.0),
        validate: validate.map(|c| c.0),
    })
}

fn check_duplicate(
    first: Option<&Token>,
    duplicate: &Token,
    sink: &mut dyn DiagnosticSink,
) -> Result<(), Error> {
    if let Some(first) = first {
        sink.report(Diagnostic::error(
            duplicate,
            format!(
                "duplicate '{}' section, first defined at {}:{}",
                duplicate.text(),
                first.file_name(),
                first.line_number()
            ),
        ));
        return Err(Error::lowering(duplicate));
    }
    Ok(())
}

/// Flatten a pattern section into its alternatives.
fn lower_pattern(
    node: &ConcreteElement,
    sink: &mut dyn DiagnosticSink,
) -> Result<Vec<PatternElement>, Error> {
    let mut alternatives = Vec::new();
    let mut group: Vec<PatternElement> = Vec::new();

    for child in &node.children()[1..] {
        if child.token().map(|t| t.is(Lexeme::BitwiseOr)).unwrap_or(false) {
            alternatives.push(close_group(&mut group));
        } else {
            group.push(lower_element(child, sink)?);
        }
    }
    alternatives.push(close_group(&mut group));

    Ok(alternatives)
}

fn close_group(group: &mut Vec<PatternElement>) -> PatternElement {
    let mut elements = std::mem::take(group);
    if elements.len() == 1 {
        elements.pop().expect("group of one")
    } else {
        PatternElement {
            repeat: Repeat::once(),
            binding: None,
            kind: PatternKind::Compound(elements),
        }
    }
}

fn lower_element(
    node: &ConcreteElement,
    sink: &mut dyn DiagnosticSink,
) -> Result<PatternElement, Error> {
    match node {
        ConcreteElement::Token(token) => {
            let kind = match token.lexeme() {
                Lexeme::Identifier => PatternKind::Reference(Identifier::single(token.clone())),
                lexeme if lexeme.is_numeric(true) || lexeme == Lexeme::StringLiteral => {
                    PatternKind::Literal(token.clone())
                }
                _ => {
                    sink.report(Diagnostic::error(token, "Unexpected token in pattern"));
                    return Err(Error::lowering(token));
                }
            };
            Ok(PatternElement {
                repeat: Repeat::once(),
                binding: None,
                kind,
            })
        }

        ConcreteElement::Compound { kind, children } => match kind {
            ConcreteKind::List => {
                let mut elements = Vec::new();
                for child in &children[1..children.len() - 1] {
                    elements.push(lower_element(child, sink)?);
                }
                Ok(PatternElement {
                    repeat: Repeat::once(),
                    binding: None,
                    kind: PatternKind::Compound(elements),
                })
            }

            ConcreteKind::Match => lower_match(node, sink),

            ConcreteKind::Repetition => {
                let mut element = lower_element(&children[0], sink)?;
                element.repeat = repetition_bounds(&children[2..children.len() - 1]);
                Ok(element)
            }

            ConcreteKind::Bound => {
                let mut element = lower_element(&children[0], sink)?;
                element.binding = children[2].token().cloned();
                Ok(element)
            }

            _ => {
                let token = node.first_token().expect("CST nodes are never empty");
                sink.report(Diagnostic::error(token, "Unexpected pattern element"));
                Err(Error::lowering(token))
            }
        },
    }
}

/// Map repetition bound tokens to the normalised `(min, max)` pair:
/// `?` -> (0,1), `*` -> (0,-1), `+` -> (1,-1), `n` -> (n,n), and an upper
/// bound of `*` means unbounded.
fn repetition_bounds(bounds: &[ConcreteElement]) -> Repeat {
    let tokens: Vec<&Token> = bounds
        .iter()
        .filter_map(ConcreteElement::token)
        .filter(|t| !t.is(Lexeme::Comma))
        .collect();

    match tokens.len() {
        1 => match tokens[0].text() {
            "?" => Repeat {
                min: "0".to_owned(),
                max: "1".to_owned(),
            },
            "*" => Repeat {
                min: "0".to_owned(),
                max: "-1".to_owned(),
            },
            "+" => Repeat {
                min: "1".to_owned(),
                max: "-1".to_owned(),
            },
            bound => Repeat {
                min: bound.to_owned(),
                max: bound.to_owned(),
            },
        },
        2 => {
            let max = match tokens[1].text() {
                "*" | "+" => "-1".to_owned(),
                text => text.to_owned(),
            };
            Repeat {
                min: tokens[0].text().to_owned(),
                max,
            }
        }
        _ => Repeat::once(),
    }
}

fn lower_match(
    node: &ConcreteElement,
    sink: &mut dyn DiagnosticSink,
) -> Result<PatternElement, Error> {
    let children = node.children();
    let head = node.first_token().expect("match starts with its keyword");

    // discriminant tokens sit between the parentheses, before the body
    let mut discriminant: Vec<Token> = Vec::new();
    for child in children {
        if child.token().map(|t| t.is(Lexeme::OpenCurly)).unwrap_or(false) {
            break;
        }
        if let Some(token) = child.token() {
            if token.is(Lexeme::Identifier) {
                discriminant.push(token.clone());
            }
        }
    }

    let mut cases = Vec::new();
    for child in children {
        // a case with repetition arrives wrapped; the repetition has no
        // abstract counterpart and is dropped
        let case = match child.kind() {
            Some(ConcreteKind::Bound) => child,
            Some(ConcreteKind::Repetition) => &child.children()[0],
            _ => continue,
        };
        if !case.is_kind(ConcreteKind::Bound) {
            continue;
        }

        let key = case.children()[0]
            .token()
            .expect("match case keys are tokens");
        if !key.lexeme().is_numeric(false) && !key.is(Lexeme::StringLiteral)
            || key.is(Lexeme::FloatLiteral)
        {
            sink.report(Diagnostic::error(
                key,
                "Match case keys must be integer or string literals",
            ));
            return Err(Error::lowering(key));
        }
        let value = case.children()[2]
            .token()
            .expect("match case values are tokens");
        cases.push(MatchCase {
            key: key.clone(),
            value: Identifier::single(value.clone()),
        });
    }

    if cases.is_empty() {
        sink.report(Diagnostic::error(head, "Empty match body"));
        return Err(Error::lowering(head));
    }

    Ok(PatternElement {
        repeat: Repeat::once(),
        binding: None,
        kind: PatternKind::Match {
            discriminant: Identifier::new(discriminant),
            cases,
        },
    })
}

fn lower_storage(node: &ConcreteElement) -> Vec<StorageField> {
    let mut fields = Vec::new();

    for child in &node.children()[1..] {
        match child {
            ConcreteElement::Token(token) => fields.push(StorageField {
                name: token.clone(),
                ty: None,
            }),
            ConcreteElement::Compound { children, .. } => {
                let name = children[0].token().expect("field name is a token");
                let ty = children[2].token().expect("field type is a token");
                fields.push(StorageField {
                    name: name.clone(),
                    ty: Some(Identifier::single(ty.clone())),
                });
            }
        }
    }

    fields
}

/// Lower an s-expression node, merging `ident (. ident)*` runs into dotted
/// identifiers.
fn lower_sexpr(node: &ConcreteElement) -> Sexpr {
    let children = node.children();
    let inner = &children[1..children.len() - 1];
    let mut atoms = Vec::new();
    let mut i = 0;

    while i < inner.len() {
        match &inner[i] {
            ConcreteElement::Compound { .. } => {
                atoms.push(SexprAtom::Sexpr(lower_sexpr(&inner[i])));
                i += 1;
            }
            ConcreteElement::Token(token) if token.is(Lexeme::Identifier) => {
                let mut parts = vec![token.clone()];
                while i + 2 < inner.len()
                    && inner[i + 1].token().map(|t| t.is(Lexeme::Dot)).unwrap_or(false)
                    && inner[i + 2]
                        .token()
                        .map(|t| t.is(Lexeme::Identifier))
                        .unwrap_or(false)
                {
                    parts.push(inner[i + 2].token().expect("checked above").clone());
                    i += 2;
                }
                atoms.push(SexprAtom::Identifier(Identifier::new(parts)));
                i += 1;
            }
            ConcreteElement::Token(token) => {
                atoms.push(SexprAtom::Token(token.clone()));
                i += 1;
            }
        }
    }

    Sexpr { atoms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BufferSink;
    use crate::parser;
    use crate::tokenizer::tokenize;

    fn lower_ok(source: &str) -> SyntaxTree {
        let tokens = tokenize(source, "test.nyx");
        let mut sink = BufferSink::new();
        let cst = parser::parse(&tokens, &mut sink).expect("parse");
        match lower(&cst, &mut sink) {
            Ok(tree) => tree,
            Err(e) => panic!(
                "lowering failed: {:?}, diagnostics: {:?}",
                e,
                sink.diagnostics
                    .iter()
                    .map(|d| d.message.clone())
                    .collect::<Vec<_>>()
            ),
        }
    }

    fn lower_err(source: &str) -> BufferSink {
        let tokens = tokenize(source, "test.nyx");
        let mut sink = BufferSink::new();
        let cst = parser::parse(&tokens, &mut sink).expect("parse");
        assert!(lower(&cst, &mut sink).is_err(), "expected lowering failure");
        sink
    }

    #[test]
    fn namespace_switching() {
        let tree = lower_ok("@namespace a.b\nr { pattern: 0x00 }\n@module m\ns { pattern: 0x01 }\n");
        assert_eq!(tree.namespaces["a.b"].kind, NamespaceKind::Emit);
        assert!(tree.namespaces["a.b"].rules.contains_key("r"));
        assert_eq!(tree.namespaces["m"].kind, NamespaceKind::Module);
        assert!(tree.namespaces["m"].rules.contains_key("s"));
    }

    #[test]
    fn rules_before_any_namespace_land_in_default() {
        let tree = lower_ok("r { pattern: 0x00 }\n");
        assert!(tree.namespaces[""].rules.contains_key("r"));
    }

    #[test]
    fn import_forms() {
        let tree = lower_ok(
            "@import plain\n@import mod as m\n@import elem from mod\n@import e from mod as x\n",
        );
        let imports = &tree.namespaces[""].imports;
        assert_eq!(imports.len(), 4);
        assert_eq!(imports[0].module.joined(), "plain");
        assert!(imports[0].element.is_none() && imports[0].alias.is_none());
        assert_eq!(imports[1].alias.as_ref().unwrap().joined(), "m");
        assert_eq!(imports[2].element.as_ref().unwrap().joined(), "elem");
        assert_eq!(imports[3].module.joined(), "mod");
        assert_eq!(imports[3].element.as_ref().unwrap().joined(), "e");
        assert_eq!(imports[3].alias.as_ref().unwrap().joined(), "x");
    }

    #[test]
    fn alias_lands_in_table() {
        let tree = lower_ok("@alias original renamed\n");
        let alias = &tree.namespaces[""].aliases["renamed"];
        assert_eq!(alias.original.joined(), "original");
    }

    #[test]
    fn repetition_normalisation() {
        let tree = lower_ok(
            "r { pattern: a{?} b{*} c{+} d{3} e{2,4} f{1,*} plain }\n",
        );
        let rule = &tree.namespaces[""].rules["r"];
        let elements = match &rule.pattern[0].kind {
            PatternKind::Compound(elements) => elements,
            other => panic!("expected compound, got {:?}", other),
        };
        let reps: Vec<(&str, &str)> = elements
            .iter()
            .map(|e| (e.repeat.min.as_str(), e.repeat.max.as_str()))
            .collect();
        assert_eq!(
            reps,
            vec![
                ("0", "1"),
                ("0", "-1"),
                ("1", "-1"),
                ("3", "3"),
                ("2", "4"),
                ("1", "-1"),
                ("1", "1"),
            ]
        );
    }

    #[test]
    fn named_bounds_stay_symbolic() {
        let tree = lower_ok("r { pattern: a{count} }\n");
        let rule = &tree.namespaces[""].rules["r"];
        assert_eq!(rule.pattern[0].repeat.min, "count");
        assert_eq!(rule.pattern[0].repeat.max, "count");
    }

    #[test]
    fn binding_is_pushed_onto_the_element() {
        let tree = lower_ok("r { pattern: 0x41{2} => field }\n");
        let element = &tree.namespaces[""].rules["r"].pattern[0];
        assert_eq!(element.binding.as_ref().unwrap().text(), "field");
        assert_eq!(element.repeat.min, "2");
        assert!(matches!(element.kind, PatternKind::Literal(_)));
    }

    #[test]
    fn alternatives_flatten() {
        let tree = lower_ok("r { pattern: 0x41 | 0x42 0x43 | sub }\n");
        let rule = &tree.namespaces[""].rules["r"];
        assert_eq!(rule.pattern.len(), 3);
        assert!(matches!(rule.pattern[0].kind, PatternKind::Literal(_)));
        assert!(matches!(rule.pattern[1].kind, PatternKind::Compound(_)));
        assert!(matches!(rule.pattern[2].kind, PatternKind::Reference(_)));
    }

    #[test]
    fn match_lowering() {
        let tree = lower_ok("r { pattern: @match (kind) { 1 => alpha 2 => beta } => out }\n");
        let element = &tree.namespaces[""].rules["r"].pattern[0];
        assert_eq!(element.binding.as_ref().unwrap().text(), "out");
        match &element.kind {
            PatternKind::Match {
                discriminant,
                cases,
            } => {
                assert_eq!(discriminant.joined(), "kind");
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0].key.text(), "1");
                assert_eq!(cases[0].value.joined(), "alpha");
                assert_eq!(cases[1].value.joined(), "beta");
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn empty_match_body_is_fatal() {
        let sink = lower_err("r { pattern: @match (k) { } }\n");
        assert!(sink
            .errors()
            .any(|d| d.message.contains("Empty match body")));
    }

    #[test]
    fn identifier_match_key_is_fatal() {
        let sink = lower_err("r { pattern: @match (k) { bogus => alpha } }\n");
        assert!(sink
            .errors()
            .any(|d| d.message.contains("integer or string")));
    }

    #[test]
    fn duplicate_section_is_fatal_with_both_locations() {
        let sink = lower_err("r {\n  pattern: 0x41\n  pattern: 0x42\n}\n");
        let diag = sink.errors().next().unwrap();
        assert!(diag.message.contains("duplicate 'pattern:'"));
        assert!(diag.message.contains("test.nyx:2"));
        assert_eq!(diag.line, 3);
    }

    #[test]
    fn rule_redefinition_warns_and_overwrites() {
        let tokens = tokenize(
            "r { pattern: 0x41 }\nr { pattern: 0x42 }\n",
            "test.nyx",
        );
        let mut sink = BufferSink::new();
        let cst = parser::parse(&tokens, &mut sink).expect("parse");
        let tree = lower(&cst, &mut sink).expect("lower");
        assert!(sink
            .diagnostics
            .iter()
            .any(|d| d.severity == crate::error::Severity::Warning));
        let rule = &tree.namespaces[""].rules["r"];
        match &rule.pattern[0].kind {
            PatternKind::Literal(token) => assert_eq!(token.text(), "0x42"),
            other => panic!("expected literal, got {:?}", other),
        }
    }

    #[test]
    fn storage_fields_with_types() {
        let tree = lower_ok("r { pattern: 0x00 storage: [a b => u8] }\n");
        let storage = tree.namespaces[""].rules["r"].storage.as_ref().unwrap();
        assert_eq!(storage.len(), 2);
        assert_eq!(storage[0].name.text(), "a");
        assert!(storage[0].ty.is_none());
        assert_eq!(storage[1].name.text(), "b");
        assert_eq!(storage[1].ty.as_ref().unwrap().joined(), "u8");
    }

    #[test]
    fn sexpr_identifiers_merge_dots() {
        let tree = lower_ok("r { pattern: 0x00 encode: (+ self.field 1) }\n");
        let encode = tree.namespaces[""].rules["r"].encode.as_ref().unwrap();
        assert_eq!(encode.atoms.len(), 3);
        match &encode.atoms[1] {
            SexprAtom::Identifier(ident) => assert_eq!(ident.joined(), "self.field"),
            other => panic!("expected identifier, got {:?}", other),
        }
    }

    #[test]
    fn nested_sexprs_stay_nested() {
        let tree = lower_ok("r { pattern: 0x00 decode: (a (b c) d)\n}\n");
        let decode = tree.namespaces[""].rules["r"].decode.as_ref().unwrap();
        assert_eq!(decode.atoms.len(), 3);
        assert!(matches!(decode.atoms[1], SexprAtom::Sexpr(_)));
    }

    #[test]
    fn comments_are_dropped() {
        let tree = lower_ok("# comment\n#++\n# docs\n#--\nr { pattern: 0x00 }\n");
        assert_eq!(tree.namespaces.len(), 1);
        assert!(tree.namespaces[""].rules.contains_key("r"));
    }
}
