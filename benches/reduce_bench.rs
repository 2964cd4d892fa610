use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kmir::kast::Term;
use kmir::rules::{synthesize, DEFAULT_MODULUS};
use kmir::smir::Smir;
use serde_json::{json, Value};

/// A chain of `n` functions where `f{i}` calls `f{i+1}` and `f{i+2}`,
/// plus `n` integer types
fn wide_program(n: i64) -> Smir {
    let call = |callee: i64, target: usize| {
        json!({"statements": [], "terminator": {"kind": {"Call": {
            "func": {"Constant": {"const_": {"kind": "ZeroSized", "ty": 10_000 + callee}}},
            "args": [],
            "destination": {"local": 0, "projection": []},
            "target": target
        }}}})
    };
    let items: Vec<Value> = (0..n)
        .map(|i| {
            let mut blocks: Vec<Value> = [i + 1, i + 2]
                .iter()
                .filter(|c| **c < n)
                .enumerate()
                .map(|(b, c)| call(*c, b + 1))
                .collect();
            blocks.push(json!({"statements": [], "terminator": {"kind": "Return"}}));
            json!({"symbol_name": format!("f{}_sym", i), "mono_item_kind": {"MonoItemFn": {
                "name": format!("f{}", i), "id": i, "body": {
                    "blocks": blocks,
                    "locals": [{"ty": 1, "mutability": "Mut"}],
                    "arg_count": 0}}}})
        })
        .collect();
    let functions: Vec<Value> = (0..n)
        .map(|i| json!([10_000 + i, {"NormalSym": format!("f{}_sym", i)}]))
        .collect();
    let types: Vec<Value> = (0..n)
        .map(|i| json!([i, {"PrimitiveType": {"Uint": "U64"}}]))
        .collect();
    Smir::load(json!({
        "name": "wide",
        "crate_id": 0,
        "allocs": [],
        "functions": functions,
        "items": items,
        "types": types
    }))
    .unwrap()
}

fn reduce_benchmark(c: &mut Criterion) {
    let smir = wide_program(2_000);

    c.bench_function("reduce 2000 functions from the middle", |b| {
        b.iter(|| smir.reduce_to(black_box(&["f1000"])).unwrap())
    });

    c.bench_function("digest 2000 functions", |b| b.iter(|| black_box(&smir).digest().unwrap()));
}

fn lookup_benchmark(c: &mut Criterion) {
    let smir = wide_program(10_000);

    c.bench_function("synthesize 10000 types", |b| {
        b.iter(|| synthesize(black_box(&smir), DEFAULT_MODULUS).unwrap())
    });

    let rules = synthesize(&smir, DEFAULT_MODULUS).unwrap().rule_set();
    let query = Term::apply("lookupTy", vec![Term::apply("ty", vec![Term::int(7_777)])]);
    c.bench_function("stratified lookup among 10000 types", |b| {
        b.iter(|| rules.normalize(black_box(&query), 10))
    });
}

criterion_group!(benches, reduce_benchmark, lookup_benchmark);
criterion_main!(benches);
