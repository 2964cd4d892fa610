//! Tests for argument generation and entry call configurations

use kmir::args::config::END_PROGRAM;
use kmir::args::{call_config, ArgGenerator, GenMode};
use kmir::kast::{sort, Term};
use kmir::smir::{LocalDecl, Mutability, Smir, TypeId, TypeInfo, TypeTable};
use kmir::Error;
use serde_json::{json, Value};

fn body(locals: &[i64], arg_count: usize) -> Value {
    let locals: Vec<Value> = locals
        .iter()
        .map(|ty| json!({"ty": ty, "mutability": "Not"}))
        .collect();
    json!({
        "blocks": [{"statements": [], "terminator": {"kind": "Return"}}],
        "locals": locals,
        "arg_count": arg_count
    })
}

/// `fn add(x: u32, y: u32) -> u32`, `fn pick(e: Choice, s: &[u8])`, and an
/// extern `ext`
fn program() -> Smir {
    Smir::load(json!({
        "name": "arith",
        "crate_id": 0,
        "allocs": [],
        "functions": [
            [20, {"NormalSym": "add_sym"}],
            [21, {"NormalSym": "pick_sym"}],
            [22, {"NormalSym": "ext_sym"}]
        ],
        "items": [
            {"symbol_name": "add_sym", "mono_item_kind": {"MonoItemFn": {
                "name": "add", "id": 1, "body": body(&[1, 1, 1], 2)}}},
            {"symbol_name": "pick_sym", "mono_item_kind": {"MonoItemFn": {
                "name": "pick", "id": 2, "body": body(&[4, 2, 6], 2)}}},
            {"symbol_name": "ext_sym", "mono_item_kind": {"MonoItemFn": {
                "name": "ext", "id": 3, "body": null}}}
        ],
        "types": [
            [1, {"PrimitiveType": {"Uint": "U32"}}],
            [2, {"EnumType": {"name": "Choice", "adt_def": 7,
                 "discriminants": [0, 1, 2], "fields": [[], [1], []]}}],
            [3, {"PrimitiveType": {"Uint": "U8"}}],
            [4, "VoidType"],
            [5, {"ArrayType": {"elem_type": 3, "size": null}}],
            [6, {"RefType": {"pointee_type": 5}}]
        ]
    }))
    .unwrap()
}

fn decl(ty: i64) -> LocalDecl {
    LocalDecl {
        ty: TypeId(ty),
        span: None,
        mutability: Mutability::Not,
    }
}

// ====================
// symbolic-add
// ====================

#[test]
fn test_symbolic_add_bounds_both_arguments() {
    let call = call_config(&program(), "add", GenMode::Symbolic).unwrap();
    let max = Term::int(4_294_967_295);
    for name in ["ARG_UINT0", "ARG_UINT1"] {
        let x = Term::var(name, sort::INT);
        assert!(call
            .init
            .constraints
            .contains(&Term::le_int(Term::int(0), x.clone())));
        assert!(call.init.constraints.contains(&Term::le_int(x, max.clone())));
    }
    assert_eq!(call.init.constraints.len(), 4);
}

#[test]
fn test_symbolic_add_locals() {
    let call = call_config(&program(), "add", GenMode::Symbolic).unwrap();
    let Some(Term::Apply { args: locals, .. }) = call.init.term.cell("<locals>") else {
        panic!("no locals cell");
    };
    // return slot plus two parameters
    assert_eq!(locals.len(), 3);
    assert_eq!(locals[0].label(), Some("newLocal"));
    let x = &locals[1].args()[0];
    assert_eq!(x.label(), Some("Integer"));
    assert_eq!(x.args()[0], Term::var("ARG_UINT0", sort::INT));
    assert_eq!(x.args()[1], Term::int(32));
    assert_eq!(x.args()[2], Term::bool(false));
}

#[test]
fn test_call_config_targets_entry_type() {
    let call = call_config(&program(), "add", GenMode::Symbolic).unwrap();
    assert_eq!(call.entry_ty, TypeId(20));
    let k = call.init.control().unwrap();
    assert!(k.find(&|t| t.label() == Some("#execTerminator")).is_some());
    assert_eq!(
        call.target.control(),
        Some(&Term::seq(vec![Term::constant(END_PROGRAM)]))
    );
}

#[test]
fn test_call_config_unknown_entry() {
    let err = call_config(&program(), "missing", GenMode::Symbolic).unwrap_err();
    assert!(matches!(err, Error::UnknownSymbol { .. }));
}

#[test]
fn test_call_config_entry_without_body() {
    let err = call_config(&program(), "ext", GenMode::Symbolic).unwrap_err();
    assert!(matches!(err, Error::InvalidOption(_)));
}

// ====================
// Shapes
// ====================

#[test]
fn test_enum_index_bounded_by_discriminant_count() {
    let smir = program();
    let out = ArgGenerator::new(smir.types(), GenMode::Symbolic)
        .generate(&[decl(2)])
        .unwrap();
    let idx = Term::var("ARG_IDX0", sort::INT);
    assert_eq!(
        out.constraints,
        vec![
            Term::le_int(Term::int(0), idx.clone()),
            Term::le_int(idx, Term::int(3)),
        ]
    );
}

#[test]
fn test_slice_reference_gets_pointee_slot() {
    let smir = program();
    let out = ArgGenerator::new(smir.types(), GenMode::Symbolic)
        .generate(&[decl(6)])
        .unwrap();
    assert_eq!(out.locals.len(), 2);
    let pointee = &out.locals[1];
    assert_eq!(pointee.args()[0].label(), Some("Range"));
    assert_eq!(pointee.args()[2], Term::constant("mutabilityMut"));
}

#[test]
fn test_void_parameter_is_opaque() {
    let smir = program();
    let out = ArgGenerator::new(smir.types(), GenMode::Symbolic)
        .generate(&[decl(4)])
        .unwrap();
    assert_eq!(
        out.constraints,
        vec![Term::apply("isValue", vec![Term::var("ARG_VAL0", sort::VALUE)])]
    );
}

#[test]
fn test_pick_mixes_enum_and_slice() {
    let call = call_config(&program(), "pick", GenMode::Symbolic).unwrap();
    // enum index bounds plus the slice length equation
    assert_eq!(call.init.constraints.len(), 3);
}

/// `struct Node { next: *const Node }` and `type Loop = &Loop`
fn recursive_types() -> TypeTable {
    TypeTable::from_entries(vec![
        (
            TypeId(1),
            TypeInfo::Struct {
                name: "Node".into(),
                adt_def: 5,
                fields: vec![TypeId(2)],
                layout: None,
            },
        ),
        (TypeId(2), TypeInfo::Ptr { pointee: TypeId(1) }),
        (TypeId(3), TypeInfo::Ref { pointee: TypeId(3) }),
    ])
}

#[test]
fn test_pointer_cycle_ends_in_opaque_pointee() {
    let types = recursive_types();
    let out = ArgGenerator::new(&types, GenMode::Symbolic)
        .generate(&[decl(2)])
        .unwrap();
    let opaque = Term::var("ARG_VAL0", sort::VALUE);
    assert_eq!(out.constraints, vec![Term::apply("isValue", vec![opaque.clone()])]);
    // the parameter, the opaque inner pointee, the outer `Node` pointee
    assert_eq!(out.locals.len(), 3);
    assert_eq!(out.locals[1].args()[0], opaque);
    assert_eq!(out.locals[2].args()[0].label(), Some("Aggregate"));
}

#[test]
fn test_self_reference_is_bounded() {
    let types = recursive_types();
    let out = ArgGenerator::new(&types, GenMode::Symbolic)
        .generate(&[decl(3)])
        .unwrap();
    assert_eq!(out.locals.len(), 2);
    assert_eq!(out.constraints.len(), 1);
}

#[test]
fn test_random_mode_rejects_pointer_cycle() {
    let types = recursive_types();
    let err = ArgGenerator::new(&types, GenMode::Random(1))
        .generate(&[decl(2)])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOption(_)));
}

// ====================
// Random mode
// ====================

#[test]
fn test_random_mode_is_deterministic_per_seed() {
    let smir = program();
    let a = call_config(&smir, "add", GenMode::Random(7)).unwrap();
    let b = call_config(&smir, "add", GenMode::Random(7)).unwrap();
    assert_eq!(a, b);
    assert!(a.init.constraints.is_empty());
    assert!(a.init.term.free_vars().is_empty());
}

#[test]
fn test_random_enum_picks_valid_variant() {
    let smir = program();
    for seed in 0..20 {
        let out = ArgGenerator::new(smir.types(), GenMode::Random(seed))
            .generate(&[decl(2)])
            .unwrap();
        let agg = &out.locals[0].args()[0];
        let idx = agg.args()[0].args()[0].as_int().unwrap();
        assert!((0..3).contains(&idx));
    }
}
