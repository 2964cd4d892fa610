//! # Rule Synthesis
//!
//! Turns a reduced program DB into lookup equations for the backend:
//!
//! - `lookupFunction(ty(T))`: function bodies, intrinsics, and an `owise`
//!   unknown-function default
//! - `lookupTy(ty(N))`: type metadata, stratified modulo `K`
//! - `lookupAlloc(allocId(N))`: pre-decoded allocations, stratified modulo `K`
//!
//! The resulting [`RuleModule`] renders as a K module that is spliced into
//! the base definition, and can also be loaded into an in-process
//! [`RuleSet`] for evaluation.

pub mod decode;
pub mod exists;
pub mod stratify;

pub use stratify::{StratifiedTable, DEFAULT_MODULUS};

use crate::kast::{json, sort, Rule, RuleSet, Term};
use crate::smir::{FunctionSymbol, Smir};
use crate::value;
use crate::{Error, Result};
use std::fmt::Write as _;
use tracing::{debug, info};

/// Symbol of the `owise` function default
pub const UNKNOWN_FUNCTION: &str = "** UNKNOWN FUNCTION **";

/// Name of the generated module
pub const MODULE_NAME: &str = "KMIR-SMIR-RULES";

/// Generated declarations and rules
#[derive(Debug, Clone, Default)]
pub struct RuleModule {
    pub name: String,
    pub syntax: Vec<String>,
    pub rules: Vec<Rule>,
}

impl RuleModule {
    /// Load into an in-process rewriter
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new(self.rules.iter().cloned())
    }

    /// Render the rules as module body text
    pub fn render_rules(&self) -> String {
        let mut out = String::new();
        for decl in &self.syntax {
            let _ = writeln!(out, "  {}", decl);
        }
        for rule in &self.rules {
            let _ = write!(out, "  rule [{}]: {} => {}", rule.label, rule.lhs, rule.rhs);
            if let Some(cond) = &rule.requires {
                let _ = write!(out, "\n    requires {}", cond);
            }
            if rule.owise {
                let _ = writeln!(out, " [owise]");
            } else {
                let _ = writeln!(out, " [priority({})]", rule.priority);
            }
        }
        out
    }

    /// Render as a complete module importing `imports`
    pub fn render(&self, imports: &str) -> String {
        format!(
            "module {}\n  imports {}\n\n{}endmodule\n",
            self.name,
            imports,
            self.render_rules()
        )
    }
}

/// `MonoItemFn(symbol(S), defId(D), body)`
fn mono_item_fn(symbol: &str, def_id: i64, body: Term) -> Term {
    Term::apply(
        "MonoItemFn",
        vec![
            Term::apply("symbol", vec![Term::string(symbol)]),
            Term::apply("defId", vec![Term::int(i128::from(def_id))]),
            body,
        ],
    )
}

/// `lookupFunction` equations
pub fn function_rules(smir: &Smir) -> Result<Vec<Rule>> {
    let lookup = |ty| Term::apply("lookupFunction", vec![value::ty(ty)]);
    let mut rules = Vec::new();

    let raw_items = smir.raw_entries("items");
    for (i, item) in smir.items().iter().enumerate() {
        let Some((_, body)) = item.as_fn() else {
            continue;
        };
        let Some(tys) = smir.function_symbols_reverse().get(&item.symbol_name) else {
            continue;
        };
        // the extractor's JSON, so keys outside the typed model are kept
        let raw_body = raw_items
            .get(i)
            .and_then(|raw| raw.pointer("/mono_item_kind/MonoItemFn/body"))
            .filter(|b| !b.is_null());
        let body_term = match (raw_body, body) {
            (Some(raw), _) => Term::apply("someBody", vec![json::encode(raw)]),
            (None, Some(body)) => Term::apply(
                "someBody",
                vec![json::encode(&serde_json::to_value(body)?)],
            ),
            (None, None) => Term::constant("noBody"),
        };
        let rhs = mono_item_fn(&item.symbol_name, item.def_id().unwrap_or(0), body_term);
        for ty in tys {
            rules.push(Rule::new(
                format!("lookupFunction-{}", ty),
                lookup(*ty),
                rhs.clone(),
            ));
        }
    }

    for (ty, sym) in smir.functions() {
        if let FunctionSymbol::IntrinsicSym(name) = sym {
            rules.push(Rule::new(
                format!("lookupFunction-{}", ty),
                lookup(*ty),
                Term::apply(
                    "IntrinsicFunction",
                    vec![Term::apply("symbol", vec![Term::string(name.clone())])],
                ),
            ));
        }
    }

    let t = Term::var("T", sort::INT);
    rules.push(
        Rule::new(
            "lookupFunction-default",
            Term::apply("lookupFunction", vec![Term::apply("ty", vec![t.clone()])]),
            Term::apply(
                "MonoItemFn",
                vec![
                    Term::apply("symbol", vec![Term::string(UNKNOWN_FUNCTION)]),
                    Term::apply("defId", vec![t]),
                    Term::constant("noBody"),
                ],
            ),
        )
        .owise(),
    );

    Ok(rules)
}

/// Stratified `lookupTy` table over the raw type metadata
pub fn type_table(smir: &Smir, modulus: usize) -> StratifiedTable {
    let entries = smir
        .raw_entries("types")
        .iter()
        .filter_map(|entry| {
            let id = entry.get(0)?.as_i64()?;
            Some((id, json::encode(entry.get(1)?)))
        })
        .collect();
    StratifiedTable {
        lookup: "lookupTy".into(),
        key: "ty".into(),
        result_sort: "TypeInfo".into(),
        default: Term::constant("TypeInfoInvalid"),
        entries,
        modulus,
    }
}

/// Stratified `lookupAlloc` table over decoded allocations
pub fn alloc_table(smir: &Smir, modulus: usize) -> Result<StratifiedTable> {
    let mut entries = Vec::with_capacity(smir.allocs().len());
    let mut undecoded = 0usize;
    for alloc in smir.allocs() {
        let decoded = decode::decode_alloc(alloc, smir.types())?;
        if matches!(decoded, value::Value::UnableToDecode(_)) {
            undecoded += 1;
        }
        entries.push((alloc.alloc_id.0, decoded.to_term()));
    }
    if undecoded > 0 {
        debug!("{} of {} allocations not decoded", undecoded, entries.len());
    }
    Ok(StratifiedTable {
        lookup: "lookupAlloc".into(),
        key: "allocId".into(),
        result_sort: "Evaluation".into(),
        default: Term::apply(
            "InvalidAlloc",
            vec![Term::apply("allocId", vec![StratifiedTable::key_var()])],
        ),
        entries,
        modulus,
    })
}

/// All generated rules for a reduced program DB
pub fn synthesize(smir: &Smir, modulus: usize) -> Result<RuleModule> {
    if modulus == 0 {
        return Err(Error::InvalidOption(
            "stratification modulus must be positive".into(),
        ));
    }

    let mut module = RuleModule {
        name: MODULE_NAME.to_string(),
        ..Default::default()
    };

    module.rules.extend(function_rules(smir)?);

    let types = type_table(smir, modulus);
    let allocs = alloc_table(smir, modulus)?;
    for table in [&types, &allocs] {
        module.syntax.extend(table.syntax());
        module.rules.extend(table.rules());
    }

    info!(
        "Generated {} rules ({} types, {} allocs, modulus {})",
        module.rules.len(),
        types.entries.len(),
        allocs.entries.len(),
        modulus
    );
    Ok(module)
}

/// Load user rules from a JSON list of rules and quantify RHS-only variables
pub fn load_aux_rules(text: &str) -> Result<Vec<Rule>> {
    let rules: Vec<Rule> = serde_json::from_str(text)?;
    Ok(rules.into_iter().map(exists::quantify).collect())
}
