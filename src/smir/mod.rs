//! # Stable MIR Program DB
//!
//! Typed view over the JSON document produced by the `stable_mir_json`
//! extractor, plus the call-graph reducer.
//!
//! The raw JSON tree is kept alongside the parsed tables so that keys this
//! model does not know about survive a `load -> dump` round trip. Derived
//! indices (`items_by_symbol`, `function_tys`, `call_edges`, ...) are built on
//! first use and never change afterwards; every transformation produces a new
//! [`Smir`].

pub mod alloc;
pub mod body;
pub mod callgraph;
pub mod linker;
pub mod ty;

pub use alloc::{AllocEntry, AllocId, Allocation, GlobalAlloc, Mutability, ProvenanceMap};
pub use body::{Body, FunctionSymbol, Item, LocalDecl, MonoItemKind, Operand, Place};
pub use callgraph::CallEdges;
pub use ty::{FloatTy, IntTy, Layout, TypeId, TypeInfo, TypeTable, UintTy};

use crate::{Error, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Reserved function type id of the program's `main`
pub const MAIN_TY: TypeId = TypeId(-1);

/// Loaded program DB
#[derive(Debug, Clone)]
pub struct Smir {
    raw: Map<String, Value>,
    types: TypeTable,
    items: Vec<Item>,
    functions: Vec<(TypeId, FunctionSymbol)>,
    allocs: Vec<AllocEntry>,
    indices: OnceLock<Indices>,
}

#[derive(Debug, Clone, Default)]
struct Indices {
    items_by_symbol: HashMap<String, usize>,
    function_symbols: BTreeMap<TypeId, FunctionSymbol>,
    function_symbols_reverse: HashMap<String, Vec<TypeId>>,
    function_tys: HashMap<String, TypeId>,
    call_edges: CallEdges,
    adt_defs: HashMap<i64, TypeId>,
}

impl PartialEq for Smir {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

fn required<'a>(raw: &'a Map<String, Value>, key: &str) -> Result<&'a Vec<Value>> {
    match raw.get(key) {
        Some(Value::Array(vs)) => Ok(vs),
        Some(_) => Err(Error::malformed(format!("`{}` must be a list", key))),
        None => Err(Error::malformed(format!("missing key `{}`", key))),
    }
}

fn parse_list<T: serde::de::DeserializeOwned>(values: &[Value], what: &str) -> Result<Vec<T>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            serde_json::from_value(v.clone())
                .map_err(|e| Error::malformed(format!("{}[{}]: {}", what, i, e)))
        })
        .collect()
}

impl Smir {
    /// Parse a program DB from a JSON value.
    ///
    /// Fails only with [`Error::MalformedProgramDb`].
    pub fn load(json: Value) -> Result<Self> {
        let Value::Object(raw) = json else {
            return Err(Error::malformed("top level is not an object"));
        };

        if !raw.get("name").map_or(false, Value::is_string) {
            return Err(Error::malformed("missing string key `name`"));
        }
        if !raw.get("crate_id").map_or(false, |v| v.is_i64() || v.is_u64()) {
            return Err(Error::malformed("missing integer key `crate_id`"));
        }
        match raw.get("spans") {
            None | Some(Value::Array(_)) => {}
            Some(_) => return Err(Error::malformed("`spans` must be a list")),
        }

        let types = TypeTable::from_json(required(&raw, "types")?)?;
        let items = parse_list(required(&raw, "items")?, "items")?;
        let functions = parse_list(required(&raw, "functions")?, "functions")?;
        let allocs = parse_list(required(&raw, "allocs")?, "allocs")?;

        Ok(Self {
            raw,
            types,
            items,
            functions,
            allocs,
            indices: OnceLock::new(),
        })
    }

    /// Parse a program DB from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::malformed(format!("not JSON: {}", e)))?;
        Self::load(value)
    }

    /// Read and parse a `*.smir.json` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let smir = Self::from_json_str(&text)?;
        debug!(
            "Loaded {} ({} items, {} types)",
            path.display(),
            smir.items.len(),
            smir.types.len()
        );
        Ok(smir)
    }

    /// The JSON document, unknown keys included
    pub fn to_json(&self) -> Value {
        Value::Object(self.raw.clone())
    }

    /// Write the program DB as JSON
    pub fn dump(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(&self.raw)?;
        std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }

    /// Hex SHA-256 of the serialized document.
    ///
    /// Object keys serialize in sorted order, so the digest does not depend
    /// on key order in the source file.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.raw)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Crate name
    pub fn name(&self) -> &str {
        self.raw.get("name").and_then(Value::as_str).unwrap_or("")
    }

    /// Crate id
    pub fn crate_id(&self) -> u64 {
        self.raw.get("crate_id").and_then(Value::as_u64).unwrap_or(0)
    }

    /// Type table
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// Items in source order
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Function table in source order
    pub fn functions(&self) -> &[(TypeId, FunctionSymbol)] {
        &self.functions
    }

    /// Allocation table in source order
    pub fn allocs(&self) -> &[AllocEntry] {
        &self.allocs
    }

    /// Raw JSON entries of a top-level list (empty when absent)
    pub fn raw_entries(&self, key: &str) -> &[Value] {
        self.raw
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Raw span table (empty when absent)
    pub fn spans(&self) -> &[Value] {
        self.raw_entries("spans")
    }

    fn indices(&self) -> &Indices {
        self.indices.get_or_init(|| self.build_indices())
    }

    fn build_indices(&self) -> Indices {
        let mut ix = Indices::default();

        for (i, item) in self.items.iter().enumerate() {
            ix.items_by_symbol.entry(item.symbol_name.clone()).or_insert(i);
        }

        let mut entries: Vec<(TypeId, FunctionSymbol)> = self.functions.clone();
        if let Some(main) = self
            .items
            .iter()
            .find(|item| matches!(item.as_fn(), Some((name, _)) if name == "main"))
        {
            entries.push((MAIN_TY, FunctionSymbol::NormalSym(main.symbol_name.clone())));
        }

        for (ty, sym) in &entries {
            ix.function_symbols.insert(*ty, sym.clone());
            let symbol = match sym {
                FunctionSymbol::NormalSym(s) | FunctionSymbol::IntrinsicSym(s) => s,
                FunctionSymbol::NoOpSym(_) => continue,
            };
            ix.function_symbols_reverse
                .entry(symbol.clone())
                .or_default()
                .push(*ty);

            if let FunctionSymbol::NormalSym(s) = sym {
                let name = ix
                    .items_by_symbol
                    .get(s)
                    .and_then(|&i| self.items[i].as_fn())
                    .map(|(name, _)| name.to_string());
                if let Some(name) = name {
                    ix.function_tys.entry(name).or_insert(*ty);
                }
            }
            ix.function_tys.entry(symbol.clone()).or_insert(*ty);
        }

        for item in &self.items {
            let Some((_, Some(body))) = item.as_fn() else {
                continue;
            };
            let Some(tys) = ix.function_symbols_reverse.get(&item.symbol_name) else {
                continue;
            };
            let callees: BTreeSet<TypeId> = body.call_targets().collect();
            for ty in tys {
                ix.call_edges
                    .entry(*ty)
                    .or_default()
                    .extend(callees.iter().copied());
            }
        }

        for (ty, info) in self.types.iter() {
            if let Some(adt) = info.adt_def() {
                ix.adt_defs.entry(adt).or_insert(*ty);
            }
        }

        ix
    }

    /// Item carrying `symbol`
    pub fn item(&self, symbol: &str) -> Option<&Item> {
        self.indices()
            .items_by_symbol
            .get(symbol)
            .map(|&i| &self.items[i])
    }

    /// `TypeId -> FunctionSymbol`, including [`MAIN_TY`]
    pub fn function_symbols(&self) -> &BTreeMap<TypeId, FunctionSymbol> {
        &self.indices().function_symbols
    }

    /// `symbol -> [TypeId]`, duplicates preserved in table order
    pub fn function_symbols_reverse(&self) -> &HashMap<String, Vec<TypeId>> {
        &self.indices().function_symbols_reverse
    }

    /// `name -> TypeId` (first match); both function names and symbols are keys
    pub fn function_tys(&self) -> &HashMap<String, TypeId> {
        &self.indices().function_tys
    }

    /// Static call edges
    pub fn call_edges(&self) -> &CallEdges {
        &self.indices().call_edges
    }

    /// `adt_def -> TypeId`
    pub fn adt_defs(&self) -> &HashMap<i64, TypeId> {
        &self.indices().adt_defs
    }

    /// Function item by name or symbol
    pub fn function(&self, name: &str) -> Option<&Item> {
        if let Some(item) = self.item(name) {
            return Some(item);
        }
        let ty = self.function_tys().get(name)?;
        let symbol = self.function_symbols().get(ty)?.normal()?;
        self.item(symbol)
    }

    /// Parameter declarations of a function with a body
    pub fn function_arguments(&self, name: &str) -> Option<&[LocalDecl]> {
        match self.function(name)?.as_fn()? {
            (_, Some(body)) => Some(body.arguments()),
            _ => None,
        }
    }

    /// Strip references: follow `Ref` pointees while they are in the table
    pub fn types_unref(&self, ty: TypeId) -> TypeId {
        let mut current = ty;
        let mut seen = HashSet::new();
        while let Some(TypeInfo::Ref { pointee }) = self.types.get(current) {
            if self.types.get(*pointee).is_none() {
                warn!("Pointee ty({}) of ty({}) is not in the type table", pointee, current);
                return current;
            }
            if !seen.insert(current) {
                break;
            }
            current = *pointee;
        }
        current
    }

    /// Symbols of function items that have no body
    pub fn missing_bodies(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| matches!(item.as_fn(), Some((_, None))))
            .map(|item| item.symbol_name.as_str())
            .collect()
    }

    /// Resolve entry names to their function types
    pub fn entry_tys<S: AsRef<str>>(&self, entries: &[S]) -> Result<Vec<TypeId>> {
        entries
            .iter()
            .map(|e| {
                self.function_tys()
                    .get(e.as_ref())
                    .copied()
                    .ok_or_else(|| Error::UnknownSymbol {
                        name: e.as_ref().to_string(),
                    })
            })
            .collect()
    }

    /// Keep only the items reachable from `entries` over `call_edges`.
    ///
    /// `functions`, `types`, `allocs` and `spans` pass through unchanged.
    pub fn reduce_to<S: AsRef<str>>(&self, entries: &[S]) -> Result<Smir> {
        let start = self.entry_tys(entries)?;
        let reached = callgraph::closure(start, self.call_edges());

        let symbols = self.function_symbols();
        let keep: HashSet<&str> = reached
            .iter()
            .filter_map(|ty| symbols.get(ty).and_then(FunctionSymbol::normal))
            .collect();

        let raw_items = self
            .raw
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut items = Vec::new();
        let mut kept_raw = Vec::new();
        for (item, raw) in self.items.iter().zip(raw_items) {
            if keep.contains(item.symbol_name.as_str()) {
                items.push(item.clone());
                kept_raw.push(raw);
            }
        }

        info!(
            "Reduced {} from {} to {} items ({} functions reachable)",
            self.name(),
            self.items.len(),
            items.len(),
            reached.len()
        );

        let mut raw = self.raw.clone();
        raw.insert("items".to_string(), Value::Array(kept_raw));

        Ok(Smir {
            raw,
            types: self.types.clone(),
            items,
            functions: self.functions.clone(),
            allocs: self.allocs.clone(),
            indices: OnceLock::new(),
        })
    }
}
