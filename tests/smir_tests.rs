//! Tests for program DB loading, indexing and call-graph reduction

use kmir::smir::{FunctionSymbol, Smir, TypeId, TypeInfo, MAIN_TY};
use kmir::Error;
use serde_json::{json, Value};

fn call_block(callee: i64, next: usize) -> Value {
    json!({"statements": [], "terminator": {"kind": {"Call": {
        "func": {"Constant": {"const_": {"kind": "ZeroSized", "ty": callee}}},
        "args": [],
        "destination": {"local": 0, "projection": []},
        "target": next
    }}}})
}

fn fn_item(symbol: &str, name: &str, calls: &[i64]) -> Value {
    let mut blocks: Vec<Value> = calls
        .iter()
        .enumerate()
        .map(|(i, ty)| call_block(*ty, i + 1))
        .collect();
    blocks.push(json!({"statements": [], "terminator": {"kind": "Return"}}));
    json!({
        "symbol_name": symbol,
        "mono_item_kind": {"MonoItemFn": {"name": name, "id": 1, "body": {
            "blocks": blocks,
            "locals": [{"ty": 1, "mutability": "Mut"}],
            "arg_count": 0
        }}}
    })
}

fn extern_item(symbol: &str, name: &str) -> Value {
    json!({
        "symbol_name": symbol,
        "mono_item_kind": {"MonoItemFn": {"name": name, "id": 9, "body": null}}
    })
}

/// main -> f -> {g, ext}; h and k unreachable; f appears under two type ids
fn program() -> Value {
    json!({
        "name": "program",
        "crate_id": 42,
        "allocs": [],
        "functions": [
            [10, {"NormalSym": "f_sym"}],
            [14, {"NormalSym": "f_sym"}],
            [11, {"NormalSym": "g_sym"}],
            [12, {"NormalSym": "h_sym"}],
            [13, {"NormalSym": "ext_sym"}],
            [15, {"IntrinsicSym": "black_box"}],
            [16, {"NoOpSym": ""}]
        ],
        "items": [
            fn_item("main_sym", "main", &[10]),
            fn_item("f_sym", "f", &[11, 13, 15]),
            fn_item("g_sym", "g", &[]),
            fn_item("h_sym", "h", &[11]),
            fn_item("k_sym", "k", &[]),
            extern_item("ext_sym", "ext")
        ],
        "types": [
            [1, {"PrimitiveType": "Bool"}],
            [2, {"PrimitiveType": {"Uint": "U32"}}],
            [3, {"RefType": {"pointee_type": 2}}],
            [4, {"RefType": {"pointee_type": 3}}]
        ],
        "spans": [[0, ["lib.rs", 1, 1, 1, 10]]],
        "machine": {"pointer_width": 64}
    })
}

fn load() -> Smir {
    Smir::load(program()).unwrap()
}

// ====================
// Loading
// ====================

#[test]
fn test_load_exposes_tables() {
    let smir = load();
    assert_eq!(smir.name(), "program");
    assert_eq!(smir.crate_id(), 42);
    assert_eq!(smir.items().len(), 6);
    assert_eq!(smir.functions().len(), 7);
    assert_eq!(smir.types().len(), 4);
    assert_eq!(smir.spans().len(), 1);
}

#[test]
fn test_load_rejects_non_object() {
    let err = Smir::load(json!([1, 2, 3])).unwrap_err();
    assert!(matches!(err, Error::MalformedProgramDb { .. }));
}

#[test]
fn test_load_rejects_non_list_items() {
    let mut raw = program();
    raw["items"] = json!({"not": "a list"});
    assert!(matches!(
        Smir::load(raw),
        Err(Error::MalformedProgramDb { .. })
    ));
}

#[test]
fn test_from_json_str_rejects_garbage() {
    assert!(matches!(
        Smir::from_json_str("{ not json"),
        Err(Error::MalformedProgramDb { .. })
    ));
}

#[test]
fn test_unknown_keys_survive_dump() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("program.smir.json");
    let smir = load();
    smir.dump(&path).unwrap();

    let reloaded = Smir::from_file(&path).unwrap();
    assert_eq!(reloaded, smir);
    assert_eq!(reloaded.to_json()["machine"], json!({"pointer_width": 64}));
}

#[test]
fn test_digest_tracks_content() {
    let a = load();
    let mut raw = program();
    raw["name"] = json!("renamed");
    let b = Smir::load(raw).unwrap();
    assert_eq!(a.digest().unwrap(), load().digest().unwrap());
    assert_ne!(a.digest().unwrap(), b.digest().unwrap());
}

// ====================
// Indices
// ====================

#[test]
fn test_main_gets_reserved_type_id() {
    let smir = load();
    assert_eq!(smir.function_tys()["main"], MAIN_TY);
    assert_eq!(
        smir.function_symbols()[&MAIN_TY],
        FunctionSymbol::NormalSym("main_sym".into())
    );
}

#[test]
fn test_duplicate_type_ids_preserved_in_reverse_index() {
    let smir = load();
    assert_eq!(
        smir.function_symbols_reverse()["f_sym"],
        vec![TypeId(10), TypeId(14)]
    );
    // name lookups take the first match
    assert_eq!(smir.function_tys()["f"], TypeId(10));
}

#[test]
fn test_call_edges_shared_by_duplicate_ids() {
    let smir = load();
    let edges = smir.call_edges();
    assert_eq!(edges[&TypeId(10)], edges[&TypeId(14)]);
    assert!(edges[&TypeId(10)].contains(&TypeId(15)));
}

#[test]
fn test_function_lookup_by_name_and_symbol() {
    let smir = load();
    assert_eq!(smir.function("g").unwrap().symbol_name, "g_sym");
    assert_eq!(smir.function("g_sym").unwrap().symbol_name, "g_sym");
    assert!(smir.function("nope").is_none());
}

#[test]
fn test_types_unref_follows_chain() {
    let smir = load();
    assert_eq!(smir.types_unref(TypeId(4)), TypeId(2));
    assert_eq!(smir.types_unref(TypeId(1)), TypeId(1));
    assert!(matches!(smir.types().get(TypeId(2)), Some(TypeInfo::Uint(_))));
}

// ====================
// Reduction
// ====================

#[test]
fn test_reduce_keeps_reachable_items() {
    let reduced = load().reduce_to(&["main"]).unwrap();
    let mut symbols: Vec<&str> = reduced
        .items()
        .iter()
        .map(|i| i.symbol_name.as_str())
        .collect();
    symbols.sort();
    assert_eq!(symbols, vec!["ext_sym", "f_sym", "g_sym", "main_sym"]);
}

#[test]
fn test_reduce_passes_other_tables_through() {
    let smir = load();
    let reduced = smir.reduce_to(&["main"]).unwrap();
    assert_eq!(reduced.functions(), smir.functions());
    assert_eq!(reduced.to_json()["types"], smir.to_json()["types"]);
    assert_eq!(reduced.types().len(), smir.types().len());
    assert_eq!(reduced.spans(), smir.spans());
    assert_eq!(reduced.to_json()["machine"], smir.to_json()["machine"]);
}

#[test]
fn test_reduce_is_idempotent() {
    let once = load().reduce_to(&["main"]).unwrap();
    let twice = once.reduce_to(&["main"]).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_reduce_lists_missing_bodies() {
    let reduced = load().reduce_to(&["f"]).unwrap();
    assert_eq!(reduced.missing_bodies(), vec!["ext_sym"]);
}

#[test]
fn test_reduce_from_several_entries() {
    let reduced = load().reduce_to(&["g", "h"]).unwrap();
    assert_eq!(reduced.items().len(), 2);
}

#[test]
fn test_reduce_unknown_entry() {
    let err = load().reduce_to(&["does_not_exist"]).unwrap_err();
    assert!(matches!(err, Error::UnknownSymbol { name } if name == "does_not_exist"));
}
