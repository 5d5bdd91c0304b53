//! Plan serialization: the keyed table handed to the code-generator
//! plugin, as JSON with deterministic key order.
//!
//! Shape per namespace: `{namespace, module, imports, rules}`; each stage
//! discriminates on a `type` tag from `{ExactMatch, PatternMatch, Group,
//! Select, Numeric, Identifier}`; code snippets are atom arrays of
//! `{value, type, mode?}` where `mode = "BinOp"` marks binary operators.

use crate::ast::{Sexpr, SexprAtom};
use crate::plan::{
    Import, Namespace, Plan, Rule, SelectKey, Stage, StageKind, StorageSlot,
};
use crate::token::Lexeme;
use serde_json::{json, Map, Value};

const K_MAXIMUM: &str = "maximum";
const K_MINIMUM: &str = "minimum";
const K_MODULE: &str = "module";
const K_NAMESPACE: &str = "namespace";
const K_PATTERN: &str = "pattern";
const K_TYPE: &str = "type";
const K_VALUE: &str = "value";

/// Insert a key-value pair into a JSON map, allocating the key.
#[inline]
fn ins(m: &mut Map<String, Value>, key: &str, val: Value) {
    m.insert(key.to_owned(), val);
}

/// Serialize a plan plus the plugin option strings. Options of the form
/// `key=value` become string entries; bare keys become `true`.
pub fn serialize(plan: &Plan, options: &[String]) -> Value {
    let mut root = Map::new();
    ins(&mut root, "options", options_value(options));
    ins(
        &mut root,
        "namespaces",
        Value::Array(plan.namespaces.iter().map(namespace_value).collect()),
    );
    Value::Object(root)
}

fn options_value(options: &[String]) -> Value {
    let mut out = Map::new();
    for option in options {
        match option.split_once('=') {
            Some((key, value)) => ins(&mut out, key, json!(value)),
            None => ins(&mut out, option, json!(true)),
        }
    }
    Value::Object(out)
}

fn namespace_value(ns: &Namespace) -> Value {
    let mut out = Map::new();
    ins(&mut out, K_NAMESPACE, json!(ns.parts));
    ins(&mut out, K_MODULE, json!(ns.parts));
    ins(
        &mut out,
        "imports",
        Value::Array(ns.imports.iter().map(import_value).collect()),
    );
    ins(
        &mut out,
        "rules",
        Value::Array(ns.rules.iter().map(rule_value).collect()),
    );
    Value::Object(out)
}

fn import_value(import: &Import) -> Value {
    let mut out = Map::new();
    ins(&mut out, K_NAMESPACE, json!(import.module));
    ins(&mut out, K_MODULE, json!(import.module));
    Value::Object(out)
}

fn rule_value(rule: &Rule) -> Value {
    let mut out = Map::new();
    ins(&mut out, "name", json!(rule.name));
    ins(
        &mut out,
        K_PATTERN,
        Value::Array(
            rule.pattern
                .iter()
                .map(|alt| stage_value(&alt.stage))
                .collect(),
        ),
    );
    if let Some(storage) = &rule.storage {
        ins(
            &mut out,
            "storage",
            Value::Array(storage.iter().map(storage_value).collect()),
        );
    }
    if let Some(code) = &rule.encode {
        ins(&mut out, "encode", code_value(code));
    }
    if let Some(code) = &rule.decode {
        ins(&mut out, "decode", code_value(code));
    }
    if let Some(code) = &rule.validate {
        ins(&mut out, "validate", code_value(code));
    }
    Value::Object(out)
}

fn storage_value(slot: &StorageSlot) -> Value {
    let mut out = Map::new();
    ins(&mut out, "name", json!(slot.name));
    ins(&mut out, K_TYPE, json!(slot.ty));
    Value::Object(out)
}

fn stage_value(stage: &Stage) -> Value {
    let mut out = Map::new();

    match &stage.kind {
        StageKind::Primitive(bytes) => {
            ins(&mut out, K_TYPE, json!("ExactMatch"));
            ins(&mut out, K_PATTERN, json!(bytes));
        }

        StageKind::Wildcard { mask, value } => {
            ins(&mut out, K_TYPE, json!("PatternMatch"));
            let mut pattern = Map::new();
            ins(&mut pattern, "mask", json!(mask));
            ins(&mut pattern, K_VALUE, json!(value));
            ins(&mut out, K_PATTERN, Value::Object(pattern));
        }

        StageKind::Group(stages) => {
            ins(&mut out, K_TYPE, json!("Group"));
            ins(
                &mut out,
                "stages",
                Value::Array(stages.iter().map(stage_value).collect()),
            );
        }

        StageKind::Select { reference, cases } => {
            ins(&mut out, K_TYPE, json!("Select"));
            let mut pattern = Map::new();
            ins(&mut pattern, "reference", json!(reference));
            ins(
                &mut pattern,
                "keys",
                Value::Array(cases.iter().map(|c| key_value(&c.key)).collect()),
            );
            let mut map = Map::new();
            for case in cases {
                ins(&mut map, &key_text(&case.key), json!(case.value));
            }
            ins(&mut pattern, "cases", Value::Object(map));
            ins(&mut out, K_PATTERN, Value::Object(pattern));
        }

        StageKind::Reference(name) => match numeric_info(name) {
            Some((size, order, signed)) => {
                ins(&mut out, K_TYPE, json!("Numeric"));
                let mut pattern = Map::new();
                ins(&mut pattern, K_TYPE, json!(name));
                ins(&mut pattern, "size", json!(size));
                ins(&mut pattern, "order", json!(order));
                if let Some(signed) = signed {
                    ins(&mut pattern, "signed", json!(signed));
                }
                ins(&mut out, K_PATTERN, Value::Object(pattern));
            }
            None => {
                ins(&mut out, K_TYPE, json!("Identifier"));
                ins(&mut out, K_PATTERN, json!(name));
            }
        },
    }

    ins(&mut out, K_MINIMUM, bound_value(&stage.min));
    ins(&mut out, K_MAXIMUM, bound_value(&stage.max));
    if let Some(binding) = &stage.binding {
        ins(&mut out, "ident", json!(binding));
    }

    Value::Object(out)
}

/// Numeric bounds serialize as numbers; named bounds stay strings.
fn bound_value(bound: &str) -> Value {
    match bound.parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(bound),
    }
}

fn key_value(key: &SelectKey) -> Value {
    match key {
        SelectKey::Number(n) => json!(n),
        SelectKey::Text(s) => json!(s),
    }
}

fn key_text(key: &SelectKey) -> String {
    match key {
        SelectKey::Number(n) => n.to_string(),
        SelectKey::Text(s) => s.clone(),
    }
}

/// The closed primitive set: `u8 i8 u16 i16 u32 i32 u64 i64 f32 f64`,
/// multi-byte variants with an `l`/`b` suffix for little/big endian.
/// Returns `(size, order, signed)`; floats carry no signedness.
fn numeric_info(name: &str) -> Option<(u32, &'static str, Option<bool>)> {
    const MACHINE: [&str; 10] = [
        "u8", "i8", "u16", "i16", "u32", "i32", "u64", "i64", "f32", "f64",
    ];
    const MULTI: [&str; 8] = ["u16", "i16", "u32", "i32", "u64", "i64", "f32", "f64"];

    let (base, order) = if MACHINE.contains(&name) {
        (name, "machine")
    } else if let Some(base) = name.strip_suffix('l').filter(|b| MULTI.contains(b)) {
        (base, "little")
    } else if let Some(base) = name.strip_suffix('b').filter(|b| MULTI.contains(b)) {
        (base, "big")
    } else {
        return None;
    };

    let size = match base {
        "u8" | "i8" => 1,
        "u16" | "i16" => 2,
        "u32" | "i32" | "f32" => 4,
        _ => 8,
    };
    let signed = if base.starts_with('f') {
        None
    } else {
        Some(base.starts_with('i'))
    };

    Some((size, order, signed))
}

fn code_value(code: &Sexpr) -> Value {
    Value::Array(code.atoms.iter().map(atom_value).collect())
}

fn atom_value(atom: &SexprAtom) -> Value {
    match atom {
        SexprAtom::Token(token) => {
            let mut out = Map::new();
            ins(&mut out, K_VALUE, json!(token.text()));
            ins(&mut out, K_TYPE, json!(token.lexeme().name()));
            if is_binop(token.lexeme()) {
                ins(&mut out, "mode", json!("BinOp"));
            }
            Value::Object(out)
        }
        SexprAtom::Identifier(ident) => {
            let mut out = Map::new();
            ins(&mut out, K_VALUE, json!(ident.part_texts()));
            ins(&mut out, K_TYPE, json!("Identifier"));
            Value::Object(out)
        }
        SexprAtom::Sexpr(inner) => {
            let mut out = Map::new();
            ins(&mut out, K_VALUE, code_value(inner));
            ins(&mut out, K_TYPE, json!("Sexpr"));
            Value::Object(out)
        }
    }
}

fn is_binop(lexeme: Lexeme) -> bool {
    matches!(
        lexeme,
        Lexeme::Assignment
            | Lexeme::BitwiseAnd
            | Lexeme::BitwiseNot
            | Lexeme::BitwiseOr
            | Lexeme::BitwiseXor
            | Lexeme::CloseAngle
            | Lexeme::Division
            | Lexeme::Equality
            | Lexeme::Minus
            | Lexeme::Modulo
            | Lexeme::OpenAngle
            | Lexeme::Plus
            | Lexeme::Times
            | Lexeme::LeftShift
            | Lexeme::RightShift
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BufferSink;
    use crate::plan::generate;
    use crate::registry::Registry;
    use crate::source::InMemoryProvider;

    fn bundle(source: &str, options: &[&str]) -> Value {
        let provider = InMemoryProvider::from_pairs(&[("main.nyx", source)]);
        let mut sink = BufferSink::new();
        let mut registry = Registry::new();
        registry
            .parse(&provider, "main.nyx", &mut sink)
            .expect("registry parse");
        let plan = generate(&registry, &mut sink).expect("plan");
        let options: Vec<String> = options.iter().map(|s| (*s).to_string()).collect();
        serialize(&plan, &options)
    }

    #[test]
    fn options_translate_to_booleans_and_strings() {
        let value = bundle("@namespace n\n", &["debug", "outdir=/tmp/out"]);
        assert_eq!(value["options"]["debug"], json!(true));
        assert_eq!(value["options"]["outdir"], json!("/tmp/out"));
    }

    #[test]
    fn exact_match_stage_shape() {
        let value = bundle("@namespace n\nr { pattern: 0x41 }\n", &[]);
        let ns = &value["namespaces"][0];
        assert_eq!(ns["namespace"], json!(["n"]));
        assert_eq!(ns["module"], json!(["n"]));
        let stage = &ns["rules"][0]["pattern"][0];
        assert_eq!(stage["type"], json!("ExactMatch"));
        assert_eq!(stage["pattern"], json!([0x41]));
        assert_eq!(stage["minimum"], json!(1));
        assert_eq!(stage["maximum"], json!(1));
    }

    #[test]
    fn wildcard_stage_shape() {
        let value = bundle("@namespace n\nr { pattern: 0b1010**** }\n", &[]);
        let stage = &value["namespaces"][0]["rules"][0]["pattern"][0];
        assert_eq!(stage["type"], json!("PatternMatch"));
        assert_eq!(stage["pattern"]["mask"], json!(0xF0));
        assert_eq!(stage["pattern"]["value"], json!(0xA0));
    }

    #[test]
    fn numeric_stage_shapes() {
        let value = bundle("@namespace n\nr { pattern: u8 i16 u32l f64b }\n", &[]);
        let stages = &value["namespaces"][0]["rules"][0]["pattern"][0]["stages"];

        assert_eq!(stages[0]["type"], json!("Numeric"));
        assert_eq!(stages[0]["pattern"]["type"], json!("u8"));
        assert_eq!(stages[0]["pattern"]["size"], json!(1));
        assert_eq!(stages[0]["pattern"]["order"], json!("machine"));
        assert_eq!(stages[0]["pattern"]["signed"], json!(false));

        assert_eq!(stages[1]["pattern"]["type"], json!("i16"));
        assert_eq!(stages[1]["pattern"]["size"], json!(2));
        assert_eq!(stages[1]["pattern"]["signed"], json!(true));

        assert_eq!(stages[2]["pattern"]["order"], json!("little"));
        assert_eq!(stages[2]["pattern"]["size"], json!(4));

        assert_eq!(stages[3]["pattern"]["order"], json!("big"));
        assert_eq!(stages[3]["pattern"]["size"], json!(8));
        assert!(stages[3]["pattern"].get("signed").is_none());
    }

    #[test]
    fn unknown_reference_is_identifier_stage() {
        let value = bundle(
            "@namespace n\nsub { pattern: 0x00 }\nr { pattern: sub }\n",
            &[],
        );
        let rules = value["namespaces"][0]["rules"].as_array().unwrap();
        let r = rules.iter().find(|r| r["name"] == json!("r")).unwrap();
        let stage = &r["pattern"][0];
        assert_eq!(stage["type"], json!("Identifier"));
        assert_eq!(stage["pattern"], json!("sub"));
    }

    #[test]
    fn u8_has_no_endian_variants() {
        let value = bundle(
            "@namespace n\nu8l { pattern: 0x00 }\nr { pattern: u8l }\n",
            &[],
        );
        let rules = value["namespaces"][0]["rules"].as_array().unwrap();
        let r = rules.iter().find(|r| r["name"] == json!("r")).unwrap();
        // a local rule named u8l resolves as a rule reference, and u8l is
        // not a primitive name
        assert_eq!(r["pattern"][0]["type"], json!("Identifier"));
    }

    #[test]
    fn select_stage_shape() {
        let value = bundle(
            concat!(
                "@namespace n\n",
                "alpha { pattern: 0x01 }\n",
                "beta { pattern: 0x02 }\n",
                "r { pattern: @match (kind) { 1 => alpha 0x10 => beta } }\n",
            ),
            &[],
        );
        let rules = value["namespaces"][0]["rules"].as_array().unwrap();
        let r = rules.iter().find(|r| r["name"] == json!("r")).unwrap();
        let stage = &r["pattern"][0];
        assert_eq!(stage["type"], json!("Select"));
        assert_eq!(stage["pattern"]["reference"], json!("kind"));
        assert_eq!(stage["pattern"]["keys"], json!([1, 16]));
        assert_eq!(stage["pattern"]["cases"]["1"], json!("alpha"));
        assert_eq!(stage["pattern"]["cases"]["16"], json!("beta"));
    }

    #[test]
    fn named_bounds_serialize_as_strings() {
        let value = bundle(
            "@namespace n\nr { pattern: 0x41{count} => data storage: count }\n",
            &[],
        );
        let rule = &value["namespaces"][0]["rules"][0];
        let stage = &rule["pattern"][0];
        assert_eq!(stage["minimum"], json!("count"));
        assert_eq!(stage["maximum"], json!("count"));
        assert_eq!(stage["ident"], json!("data"));
        assert_eq!(rule["storage"][0]["name"], json!("count"));
        assert!(rule["storage"][0]["type"].as_array().unwrap().is_empty());
    }

    #[test]
    fn unbounded_maximum_is_minus_one() {
        let value = bundle("@namespace n\nr { pattern: u8{+} }\n", &[]);
        let stage = &value["namespaces"][0]["rules"][0]["pattern"][0];
        assert_eq!(stage["minimum"], json!(1));
        assert_eq!(stage["maximum"], json!(-1));
    }

    #[test]
    fn code_atoms() {
        let value = bundle(
            "@namespace n\nr { pattern: u8 => v encode: (+ self.v (<< 1 2)) }\n",
            &[],
        );
        let code = value["namespaces"][0]["rules"][0]["encode"]
            .as_array()
            .unwrap();
        assert_eq!(code[0]["value"], json!("+"));
        assert_eq!(code[0]["type"], json!("Plus"));
        assert_eq!(code[0]["mode"], json!("BinOp"));
        assert_eq!(code[1]["value"], json!(["self", "v"]));
        assert_eq!(code[1]["type"], json!("Identifier"));
        assert_eq!(code[2]["type"], json!("Sexpr"));
        let inner = code[2]["value"].as_array().unwrap();
        assert_eq!(inner[0]["value"], json!("<<"));
        assert_eq!(inner[0]["mode"], json!("BinOp"));
        assert_eq!(inner[1]["type"], json!("DecimalLiteral"));
        assert!(inner[1].get("mode").is_none());
    }

    #[test]
    fn storage_types_carry_parts() {
        let value = bundle(
            "@namespace n\nr { pattern: u8 => a storage: [a => u8 b] }\n",
            &[],
        );
        let storage = value["namespaces"][0]["rules"][0]["storage"]
            .as_array()
            .unwrap();
        assert_eq!(storage[0]["name"], json!("a"));
        assert_eq!(storage[0]["type"], json!(["u8"]));
        assert_eq!(storage[1]["name"], json!("b"));
    }

    #[test]
    fn serialization_is_deterministic() {
        let source = concat!(
            "@namespace n\n",
            "a { pattern: b c }\n",
            "b { pattern: 0x01 }\n",
            "c { pattern: 0x02 }\n",
        );
        let first = serde_json::to_string(&bundle(source, &["x=1"])).unwrap();
        let second = serde_json::to_string(&bundle(source, &["x=1"])).unwrap();
        assert_eq!(first, second);
    }
}
