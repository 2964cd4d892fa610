//! Tests for lookup rule synthesis and modulo-K stratification

use kmir::kast::json::encode;
use kmir::kast::Term;
use kmir::rules::{synthesize, type_table, DEFAULT_MODULUS, MODULE_NAME};
use kmir::smir::Smir;
use kmir::Error;
use serde_json::{json, Value};

fn ty_query(k: i64) -> Term {
    Term::apply(
        "lookupTy",
        vec![Term::apply("ty", vec![Term::int(i128::from(k))])],
    )
}

fn alloc_query(k: i64) -> Term {
    Term::apply(
        "lookupAlloc",
        vec![Term::apply("allocId", vec![Term::int(i128::from(k))])],
    )
}

fn metadata(k: i64) -> Value {
    match k % 3 {
        0 => json!({"PrimitiveType": {"Uint": "U64"}}),
        1 => json!({"RefType": {"pointee_type": k - 1}}),
        _ => json!({"ArrayType": {"elem_type": k - 2, "size": null}}),
    }
}

fn wide_program(n: i64) -> Smir {
    let types: Vec<Value> = (0..n).map(|k| json!([k, metadata(k)])).collect();
    Smir::load(json!({
        "name": "wide",
        "crate_id": 0,
        "allocs": [],
        "functions": [],
        "items": [],
        "types": types
    }))
    .unwrap()
}

fn memory(id: i64, ty: i64, bytes: &[u8]) -> Value {
    json!({"alloc_id": id, "ty": ty, "global_alloc": {"Memory": {
        "bytes": bytes, "provenance": {"ptrs": []}, "align": 1, "mutability": "Not"}}})
}

fn allocs_program() -> Smir {
    Smir::load(json!({
        "name": "allocs",
        "crate_id": 0,
        "allocs": [
            memory(0, 1, &[1]),
            memory(1, 1, &[7]),
            memory(2, 2, &[0x2a, 0, 0, 0]),
            {"alloc_id": 3, "ty": 2, "global_alloc": {"Static": 11}}
        ],
        "functions": [],
        "items": [],
        "types": [
            [1, {"PrimitiveType": "Bool"}],
            [2, {"PrimitiveType": {"Uint": "U32"}}]
        ]
    }))
    .unwrap()
}

// ====================
// stratified-hit
// ====================

#[test]
fn test_stratified_hit_ten_thousand_types() {
    let smir = wide_program(10_000);
    let rules = synthesize(&smir, DEFAULT_MODULUS).unwrap().rule_set();

    for k in 0..10_000 {
        let (out, steps) = rules.normalize(&ty_query(k), 10);
        assert!(steps <= 2, "ty({}) took {} steps", k, steps);
        assert_eq!(out, encode(&metadata(k)), "ty({})", k);
    }
}

#[test]
fn test_stratified_miss_falls_back() {
    let smir = wide_program(100);
    let rules = synthesize(&smir, 7).unwrap().rule_set();
    for k in [100, 12_345, -4] {
        let (out, steps) = rules.normalize(&ty_query(k), 10);
        assert_eq!(out, Term::constant("TypeInfoInvalid"));
        assert_eq!(steps, 2);
    }
}

#[test]
fn test_each_stratum_gets_its_residue() {
    let table = type_table(&wide_program(50), 10);
    let rules = table.rules();
    for rule in rules.iter().filter(|r| !r.owise && r.requires.is_none()) {
        let stratum = rule.lhs.label().unwrap();
        let key = rule.lhs.args()[0].as_int().unwrap();
        assert_eq!(stratum, format!("lookupTy_{}", key.rem_euclid(10)));
    }
}

#[test]
fn test_modulus_changes_stratum_count() {
    let smir = wide_program(10);
    let three = synthesize(&smir, 3).unwrap();
    let five = synthesize(&smir, 5).unwrap();
    // two stratified tables, one syntax line per stratum
    assert_eq!(three.syntax.len(), 6);
    assert_eq!(five.syntax.len(), 10);
}

#[test]
fn test_zero_modulus_is_invalid() {
    assert!(matches!(
        synthesize(&wide_program(1), 0),
        Err(Error::InvalidOption(_))
    ));
}

// ====================
// Allocations
// ====================

#[test]
fn test_decoded_allocations_are_looked_up() {
    let rules = synthesize(&allocs_program(), DEFAULT_MODULUS)
        .unwrap()
        .rule_set();

    let (b, _) = rules.normalize(&alloc_query(0), 5);
    assert_eq!(b, Term::apply("BoolVal", vec![Term::bool(true)]));

    let (n, _) = rules.normalize(&alloc_query(2), 5);
    assert_eq!(
        n,
        Term::apply("Integer", vec![Term::int(42), Term::int(32), Term::bool(false)])
    );
}

#[test]
fn test_bad_bytes_become_sentinel() {
    let rules = synthesize(&allocs_program(), DEFAULT_MODULUS)
        .unwrap()
        .rule_set();
    let (bad, _) = rules.normalize(&alloc_query(1), 5);
    assert_eq!(bad.label(), Some("UnableToDecode"));
    let (stat, _) = rules.normalize(&alloc_query(3), 5);
    assert_eq!(stat.label(), Some("UnableToDecode"));
}

// ====================
// Function bodies
// ====================

#[test]
fn test_function_body_keeps_extractor_keys() {
    let smir = Smir::load(json!({
        "name": "bodies",
        "crate_id": 0,
        "allocs": [],
        "functions": [[20, {"NormalSym": "f_sym"}]],
        "items": [{"symbol_name": "f_sym", "mono_item_kind": {"MonoItemFn": {
            "name": "f", "id": 4, "body": {
                "blocks": [{"statements": [], "terminator": {"kind": "Return"}}],
                "locals": [{"ty": 1, "mutability": "Mut"}],
                "arg_count": 0,
                "var_debug_info": [{"name": "x", "source_info": {"span": 3}}]
            }}}}],
        "types": [[1, {"PrimitiveType": "Bool"}]]
    }))
    .unwrap();
    let text = synthesize(&smir, DEFAULT_MODULUS).unwrap().render_rules();
    assert!(text.contains("var_debug_info"));
    assert!(!text.contains("spread_arg"));

    let rules = synthesize(&smir, DEFAULT_MODULUS).unwrap().rule_set();
    let query = Term::apply("lookupFunction", vec![Term::apply("ty", vec![Term::int(20)])]);
    let (item, _) = rules.normalize(&query, 5);
    assert_eq!(item.label(), Some("MonoItemFn"));
    assert_eq!(item.args()[2].label(), Some("someBody"));
}

// ====================
// Rendering
// ====================

#[test]
fn test_rendered_module_is_spliceable() {
    let module = synthesize(&allocs_program(), 2).unwrap();
    let text = module.render("KMIR");
    assert!(text.starts_with(&format!("module {}", MODULE_NAME)));
    let spliced = kmir::backend::splice(
        "module KMIR\nendmodule\n",
        &module.render_rules(),
    )
    .unwrap();
    assert!(spliced.contains("lookupAlloc_1"));
    assert!(spliced.trim_end().ends_with("endmodule"));
}
