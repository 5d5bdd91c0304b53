//! End-to-end pipeline tests: source text in, plan (and serialized plan)
//! out, driven through an in-memory provider.

use nyx_core::plan::{Plan, SelectKey, StageKind};
use nyx_core::{compile, serialize, BufferSink, InMemoryProvider, Registry};
use serde_json::json;

fn plan_for(pairs: &[(&str, &str)]) -> Plan {
    let provider = InMemoryProvider::from_pairs(pairs);
    let mut sink = BufferSink::new();
    let inputs = vec![pairs[0].0.to_string()];
    match compile(&provider, &inputs, &mut sink) {
        Ok(plan) => plan,
        Err(e) => panic!(
            "compile failed: {:?}, diagnostics: {:?}",
            e,
            sink.diagnostics
                .iter()
                .map(|d| d.message.clone())
                .collect::<Vec<_>>()
        ),
    }
}

fn rule_names(plan: &Plan, parts: &[&str]) -> Vec<String> {
    plan.namespaces
        .iter()
        .find(|ns| ns.parts == parts)
        .unwrap_or_else(|| panic!("namespace {:?} missing", parts))
        .rules
        .iter()
        .map(|r| r.name.clone())
        .collect()
}

#[test]
fn empty_namespace_scenario() {
    let plan = plan_for(&[("main.nyx", "@namespace a.b\n\n")]);
    assert_eq!(plan.namespaces.len(), 1);
    let ns = &plan.namespaces[0];
    assert_eq!(ns.parts, vec!["a", "b"]);
    assert!(ns.rules.is_empty());
    assert!(ns.imports.is_empty());
}

#[test]
fn single_literal_rule_scenario() {
    let plan = plan_for(&[("main.nyx", "@namespace n\nr { pattern: 0x41 }\n")]);
    let ns = &plan.namespaces[0];
    assert_eq!(ns.parts, vec!["n"]);
    assert_eq!(ns.rules.len(), 1);
    let stage = &ns.rules[0].pattern[0].stage;
    assert!(matches!(&stage.kind, StageKind::Primitive(bytes) if bytes == &vec![0x41]));
    assert_eq!(stage.min, "1");
    assert_eq!(stage.max, "1");
}

#[test]
fn dependency_order_scenario() {
    let plan = plan_for(&[(
        "main.nyx",
        "@namespace n\na { pattern: b }\nb { pattern: c }\nc { pattern: 0x00 }\n",
    )]);
    assert_eq!(rule_names(&plan, &["n"]), vec!["c", "b", "a"]);
}

#[test]
fn match_scenario() {
    let plan = plan_for(&[(
        "main.nyx",
        concat!(
            "@namespace n\n",
            "alpha { pattern: 0x01 }\n",
            "beta { pattern: 0x02 }\n",
            "r { pattern: @match (kind) { 1 => alpha 2 => beta } => result }\n",
        ),
    )]);
    let ns = &plan.namespaces[0];
    let rule = ns.rules.iter().find(|r| r.name == "r").unwrap();
    let stage = &rule.pattern[0].stage;
    match &stage.kind {
        StageKind::Select { reference, cases } => {
            assert_eq!(reference, "kind");
            let keys: Vec<&SelectKey> = cases.iter().map(|c| &c.key).collect();
            assert_eq!(keys, vec![&SelectKey::Number(1), &SelectKey::Number(2)]);
            assert_eq!(cases[0].value, "alpha");
            assert_eq!(cases[1].value, "beta");
        }
        other => panic!("expected select, got {:?}", other),
    }
    assert_eq!(stage.binding.as_deref(), Some("result"));
}

#[test]
fn cross_file_alias_scenario() {
    let plan = plan_for(&[
        (
            "main.nyx",
            "@namespace m\n@import q from p as x\nr { pattern: x }\n",
        ),
        ("p.nyx", "@namespace p\nq { pattern: 0x00 }\n"),
    ]);
    assert_eq!(rule_names(&plan, &["m"]), vec!["r"]);
    assert_eq!(rule_names(&plan, &["p"]), vec!["q"]);
}

#[test]
fn wildcard_scenario() {
    let plan = plan_for(&[("main.nyx", "@namespace n\nr { pattern: 0b1010**** }\n")]);
    let stage = &plan.namespaces[0].rules[0].pattern[0].stage;
    match &stage.kind {
        StageKind::Wildcard { mask, value } => {
            assert_eq!(*mask, 0xF0);
            assert_eq!(*value, 0xA0);
        }
        other => panic!("expected wildcard, got {:?}", other),
    }
}

#[test]
fn stage_collapsing_property() {
    let plan = plan_for(&[(
        "main.nyx",
        "@namespace n\nr { pattern: 0x41 0x42 0x4344 }\n",
    )]);
    let rule = &plan.namespaces[0].rules[0];
    assert_eq!(rule.pattern.len(), 1);
    match &rule.pattern[0].stage.kind {
        StageKind::Primitive(bytes) => {
            assert_eq!(bytes, &vec![0x41, 0x42, 0x43, 0x44]);
        }
        other => panic!("expected one primitive stage, got {:?}", other),
    }
}

#[test]
fn topological_correctness_property() {
    let plan = plan_for(&[(
        "main.nyx",
        concat!(
            "@namespace n\n",
            "top { pattern: mid1 mid2 }\n",
            "mid1 { pattern: leaf }\n",
            "mid2 { pattern: leaf mid1 }\n",
            "leaf { pattern: 0x00 }\n",
        ),
    )]);
    let names = rule_names(&plan, &["n"]);
    let position = |name: &str| names.iter().position(|n| n == name).unwrap();
    assert!(position("leaf") < position("mid1"));
    assert!(position("leaf") < position("mid2"));
    assert!(position("mid1") < position("mid2"));
    assert!(position("mid2") < position("top"));
}

#[test]
fn plan_determinism_property() {
    let sources = [
        (
            "main.nyx",
            concat!(
                "@namespace n\n",
                "@import helpers\n",
                "frame { pattern: header payload{0,16} => body }\n",
                "header { pattern: 0xFF magic }\n",
                "payload { pattern: u8 }\n",
                "magic { pattern: helpers.tag }\n",
            ),
        ),
        ("helpers.nyx", "@module helpers\ntag { pattern: 0x7F }\n"),
    ];
    let first = serde_json::to_string(&serialize(&plan_for(&sources), &[])).unwrap();
    let second = serde_json::to_string(&serialize(&plan_for(&sources), &[])).unwrap();
    assert_eq!(first, second);
}

#[test]
fn module_rules_surface_in_their_own_namespace() {
    let plan = plan_for(&[
        (
            "main.nyx",
            "@namespace m\n@import helpers\nr { pattern: helpers.tag }\n",
        ),
        ("helpers.nyx", "@module helpers\ntag { pattern: 0x7F }\n"),
    ]);
    assert_eq!(rule_names(&plan, &["m"]), vec!["r"]);
    assert_eq!(rule_names(&plan, &["helpers"]), vec!["tag"]);
}

#[test]
fn builtin_primitives_do_not_join_the_plan() {
    let plan = plan_for(&[(
        "main.nyx",
        "@namespace n\nr { pattern: u8 u16l f32b => triple }\n",
    )]);
    assert_eq!(plan.namespaces.len(), 1);
    assert_eq!(plan.namespaces[0].parts, vec!["n"]);
}

#[test]
fn storage_and_code_reach_the_plan() {
    let plan = plan_for(&[(
        "main.nyx",
        concat!(
            "@namespace n\n",
            "r {\n",
            "  pattern: u16 => len u8{len} => data\n",
            "  storage: [len data]\n",
            "  encode: (= len (count data))\n",
            "  decode: (data)\n",
            "  validate: (<= len 512)\n",
            "}\n",
        ),
    )]);
    let rule = &plan.namespaces[0].rules[0];
    let storage = rule.storage.as_ref().unwrap();
    assert_eq!(storage.len(), 2);
    assert!(rule.encode.is_some());
    assert!(rule.decode.is_some());
    assert!(rule.validate.is_some());
}

#[test]
fn serialized_bundle_matches_plugin_shape() {
    let pairs = [(
        "main.nyx",
        concat!(
            "@namespace demo\n",
            "@import helpers\n",
            "frame { pattern: 0x7E body 0x7E storage: body }\n",
            "body { pattern: u8{0,255} => body }\n",
        ),
    ), ("helpers.nyx", "@module helpers\ntag { pattern: 0x01 }\n")];
    let plan = plan_for(&pairs);
    let value = serialize(&plan, &["outdir=/tmp/gen".to_string()]);

    assert_eq!(value["options"]["outdir"], json!("/tmp/gen"));
    let namespaces = value["namespaces"].as_array().unwrap();
    let demo = namespaces
        .iter()
        .find(|ns| ns["namespace"] == json!(["demo"]))
        .unwrap();
    assert_eq!(demo["imports"][0]["namespace"], json!(["helpers"]));
    let rules = demo["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 2);
    // body precedes frame
    assert_eq!(rules[0]["name"], json!("body"));
    assert_eq!(rules[1]["name"], json!("frame"));
    // frame is a group: marker byte, identifier, marker byte
    let frame_stage = &rules[1]["pattern"][0];
    assert_eq!(frame_stage["type"], json!("Group"));
    let stages = frame_stage["stages"].as_array().unwrap();
    assert_eq!(stages[0]["type"], json!("ExactMatch"));
    assert_eq!(stages[1]["type"], json!("Identifier"));
    assert_eq!(stages[2]["type"], json!("ExactMatch"));
}

#[test]
fn alias_uniqueness_property() {
    let provider = InMemoryProvider::from_pairs(&[
        (
            "main.nyx",
            "@namespace m\n@import a from p\n@import a from p\n@alias local a\n",
        ),
        ("p.nyx", "@namespace p\na { pattern: 0x00 }\n"),
    ]);
    let mut sink = BufferSink::new();
    let mut registry = Registry::new();
    registry
        .parse(&provider, "main.nyx", &mut sink)
        .expect("parse");
    let ns = registry.namespace("m").unwrap();
    let mut names: Vec<&String> = ns.aliases.keys().collect();
    names.dedup();
    assert_eq!(names.len(), ns.aliases.len());
}

#[test]
fn resolution_fallback_property() {
    use nyx_core::ast::Identifier;
    use nyx_core::token::{Lexeme, Token};
    use std::rc::Rc;

    let provider = InMemoryProvider::from_pairs(&[("main.nyx", "@namespace n\n")]);
    let mut sink = BufferSink::new();
    let mut registry = Registry::new();
    registry
        .parse(&provider, "main.nyx", &mut sink)
        .expect("parse");

    let ident = |name: &str| {
        Identifier::single(Token::new(
            name.to_owned(),
            Rc::new("test.nyx".to_owned()),
            Rc::new(String::new()),
            1,
            0,
            Lexeme::Identifier,
        ))
    };

    // resolves to nyx.<name> exactly when the builtin index has it
    let (fqn, _) = registry.resolve("n", &ident("i32")).unwrap();
    assert_eq!(fqn, "nyx.i32");
    assert!(registry.lookup("nyx.i32").is_some());
    assert!(registry.resolve("n", &ident("i33")).is_none());
    assert!(registry.lookup("nyx.i33").is_none());
}
