//! Linking several program DBs into one.
//!
//! Every id space (types, ADTs, allocations, spans) of the `i`-th input is
//! shifted by `i * base`, where `base` is the smallest power of ten strictly
//! greater than the largest id found in any input. Ids are rewritten in the
//! raw JSON so that payloads this model does not parse are shifted too.

use super::Smir;
use crate::{Error, Result};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Keys whose value is a single shifted id
const ID_KEYS: &[&str] = &[
    "ty",
    "pointee_type",
    "elem_type",
    "adt_def",
    "span",
    "alloc_id",
    "Static",
    "ZSTValue",
    "OpaqueCast",
    "Subtype",
    "Type",
    "Array",
];

/// Keys whose value is a list of type ids (or lists of them)
const ID_LIST_KEYS: &[&str] = &["fields", "types"];

/// Tuple-shaped variants and the position of their id
const POSITIONAL: &[(&str, usize)] = &[
    ("Field", 1),
    ("Cast", 2),
    ("ShallowInitBox", 1),
    ("NullaryOp", 1),
    ("RawPtr", 0),
    ("Adt", 0),
    ("Value", 0),
];

/// Smallest power of ten strictly greater than `max_id`
pub fn offset_base(max_id: i64) -> i64 {
    let mut base = 1i64;
    while base <= max_id {
        base = base.saturating_mul(10);
    }
    base
}

struct Shifter {
    offset: i64,
}

impl Shifter {
    fn shift(&self, v: &mut Value) {
        if let Some(n) = v.as_i64() {
            *v = Value::from(n + self.offset);
        }
    }

    fn shift_lists(&self, v: &mut Value) {
        match v {
            Value::Array(items) => items.iter_mut().for_each(|i| self.shift_lists(i)),
            Value::Number(_) => self.shift(v),
            _ => {}
        }
    }

    fn walk(&self, v: &mut Value) {
        match v {
            Value::Array(items) => items.iter_mut().for_each(|i| self.walk(i)),
            Value::Object(obj) => self.walk_object(obj),
            _ => {}
        }
    }

    fn walk_object(&self, obj: &mut Map<String, Value>) {
        for (key, child) in obj.iter_mut() {
            if ID_KEYS.contains(&key.as_str()) && child.is_number() {
                self.shift(child);
                continue;
            }
            if ID_LIST_KEYS.contains(&key.as_str()) && child.is_array() {
                self.shift_lists(child);
                continue;
            }
            if key == "ptrs" {
                // provenance: [[offset, alloc_id], ...]
                if let Value::Array(ptrs) = child {
                    for ptr in ptrs.iter_mut() {
                        if let Some(target) = ptr.get_mut(1) {
                            self.shift(target);
                        }
                    }
                }
                continue;
            }
            if let Some(&(_, pos)) = POSITIONAL.iter().find(|(k, _)| k == key) {
                if let Value::Array(parts) = child {
                    for (i, part) in parts.iter_mut().enumerate() {
                        if i == pos && part.is_number() {
                            self.shift(part);
                        } else {
                            self.walk(part);
                        }
                    }
                    continue;
                }
            }
            self.walk(child);
        }
    }

    /// Shift the leading id of `[id, payload]` entries
    fn shift_entries(&self, entries: &mut [Value], walk_payload: bool) {
        for entry in entries {
            if let Value::Array(pair) = entry {
                if let Some(id) = pair.get_mut(0) {
                    self.shift(id);
                }
                if walk_payload {
                    pair.iter_mut().skip(1).for_each(|p| self.walk(p));
                }
            }
        }
    }
}

fn max_id(db: &Value) -> i64 {
    let mut max = 0i64;
    let mut see = |v: Option<&Value>| {
        if let Some(n) = v.and_then(Value::as_i64) {
            max = max.max(n);
        }
    };
    let list = |key: &str| db.get(key).and_then(Value::as_array).cloned().unwrap_or_default();

    for entry in list("types") {
        see(entry.get(0));
        if let Some(info) = entry.get(1).and_then(Value::as_object) {
            for body in info.values() {
                see(body.get("adt_def"));
            }
        }
    }
    for entry in list("functions") {
        see(entry.get(0));
    }
    for alloc in list("allocs") {
        see(alloc.get("alloc_id"));
    }
    for span in list("spans") {
        see(span.get(0));
    }
    max
}

/// Decode one legacy mangled segment (`$LT$`, `..`, `$u20$`, ...)
fn unescape_segment(seg: &str) -> String {
    let seg = match seg.strip_prefix('_') {
        Some(rest) if rest.starts_with('$') => rest,
        _ => seg,
    };
    let mut out = String::with_capacity(seg.len());
    let mut rest = seg;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("..") {
            out.push_str("::");
            rest = tail;
            continue;
        }
        if rest.starts_with('$') {
            if let Some(end) = rest[1..].find('$') {
                let code = &rest[1..=end];
                let decoded = match code {
                    "SP" => Some('@'),
                    "BP" => Some('*'),
                    "RF" => Some('&'),
                    "LT" => Some('<'),
                    "GT" => Some('>'),
                    "LP" => Some('('),
                    "RP" => Some(')'),
                    "C" => Some(','),
                    _ => code
                        .strip_prefix('u')
                        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                        .and_then(char::from_u32),
                };
                if let Some(c) = decoded {
                    out.push(c);
                    rest = &rest[end + 2..];
                    continue;
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// Demangle a legacy `_ZN...E` symbol into `a::b::h0123...`.
///
/// Generic arguments are written `::<...>` so that path splitting treats
/// them as their own segment.
pub fn demangle(symbol: &str) -> Option<String> {
    let mut rest = symbol.strip_prefix("_ZN")?;
    let mut segments = Vec::new();
    loop {
        if let Some(tail) = rest.strip_prefix('E') {
            if !tail.is_empty() && !tail.starts_with('.') {
                return None;
            }
            break;
        }
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let len: usize = rest[..digits].parse().ok()?;
        let seg = rest.get(digits..digits + len)?;
        segments.push(unescape_segment(seg));
        rest = &rest[digits + len..];
    }
    if segments.is_empty() {
        return None;
    }

    let joined = segments.join("::");
    let mut out = String::with_capacity(joined.len() + 8);
    for (i, c) in joined.chars().enumerate() {
        if c == '<' && i > 0 && !out.ends_with(':') {
            out.push_str("::");
        }
        out.push(c);
    }
    Some(out)
}

/// Split a path at `::` outside of `<...>`
pub fn path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut buf = String::new();
    let mut depth = 0usize;
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                if depth > 0 {
                    buf.push_str("::");
                } else {
                    segments.push(std::mem::take(&mut buf));
                }
            }
            '-' if chars.peek() == Some(&'>') => {
                chars.next();
                buf.push_str("->");
            }
            '<' => {
                depth += 1;
                buf.push(c);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                buf.push(c);
            }
            _ => buf.push(c),
        }
    }
    segments.push(buf);
    segments
}

/// Leading Rust identifier of `s`
fn ident_prefix(s: &str) -> Option<&str> {
    let mut end = 0;
    for (i, c) in s.char_indices() {
        let ok = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    (end > 0).then(|| &s[..end])
}

/// Extend `name` with the path prefix of its mangled `symbol`.
///
/// `foo::bar::do_something::h0123` with `baz::do_something::<&u128>`
/// becomes `foo::baz::do_something::<&u128>`. A name whose own prefix is
/// at least as long as the symbol's is returned unchanged.
pub fn qualified_name(symbol: &str, name: &str) -> Option<String> {
    let symbol = path_segments(&demangle(symbol)?);
    let name_segments = path_segments(name);
    if symbol.len() < 2 {
        return None;
    }

    // last segment before the hash that starts with an identifier
    let (symbol_index, fn_name) = symbol[..symbol.len() - 1]
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, s)| ident_prefix(s).map(|id| (i, id)))?;
    let name_index = name_segments.iter().rposition(|s| s == fn_name)?;

    if symbol_index < name_index {
        return Some(name.to_string());
    }
    let mut parts: Vec<&str> = symbol[..symbol_index - name_index]
        .iter()
        .map(String::as_str)
        .collect();
    parts.extend(name_segments.iter().map(String::as_str));
    Some(parts.join("::"))
}

/// Qualify function item names in raw `items` with their crate path
fn qualify_items(items: &mut [Value]) {
    for item in items {
        let Some(symbol) = item
            .get("symbol_name")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            continue;
        };
        let Some(Value::String(name)) = item.pointer_mut("/mono_item_kind/MonoItemFn/name") else {
            continue;
        };
        if !symbol.starts_with("_Z") {
            warn!("Symbol name is not mangled, name qualification skipped: {}", symbol);
            continue;
        }
        match qualified_name(&symbol, name) {
            Some(qualified) if qualified != *name => {
                info!("Qualified item {:?}: {} -> {}", symbol, name, qualified);
                *name = qualified;
            }
            Some(_) => {}
            None => debug!("Cannot qualify {} from {}", name, symbol),
        }
    }
}

/// Link program DBs; ids of the `i`-th input are shifted by `i * base`.
///
/// Function item names are qualified with the path prefix of their
/// mangled symbol, so that `main` of crate `a` becomes `a::main`.
/// The result is named after all inputs (comma separated) and has
/// `crate_id` 0. Top-level keys outside the program DB schema are taken
/// from the first input.
pub fn link(dbs: &[Smir]) -> Result<Smir> {
    if dbs.is_empty() {
        return Err(Error::InvalidOption("nothing to link".to_string()));
    }

    let raws: Vec<Value> = dbs.iter().map(Smir::to_json).collect();
    let base = offset_base(raws.iter().map(max_id).max().unwrap_or(0));

    let mut types = Vec::new();
    let mut functions = Vec::new();
    let mut items = Vec::new();
    let mut allocs = Vec::new();
    let mut spans = Vec::new();

    for (i, raw) in raws.into_iter().enumerate() {
        let shifter = Shifter {
            offset: base * i as i64,
        };
        let take = |key: &str| -> Vec<Value> {
            raw.get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };

        let mut t = take("types");
        shifter.shift_entries(&mut t, true);
        types.extend(t);

        let mut f = take("functions");
        shifter.shift_entries(&mut f, false);
        functions.extend(f);

        let mut it = take("items");
        qualify_items(&mut it);
        it.iter_mut().for_each(|item| shifter.walk(item));
        items.extend(it);

        let mut a = take("allocs");
        a.iter_mut().for_each(|alloc| shifter.walk(alloc));
        allocs.extend(a);

        let mut s = take("spans");
        shifter.shift_entries(&mut s, false);
        spans.extend(s);
    }

    let mut out = match dbs[0].to_json() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let name = dbs.iter().map(Smir::name).collect::<Vec<_>>().join(",");
    out.insert("name".into(), Value::from(name));
    out.insert("crate_id".into(), Value::from(0));
    out.insert("types".into(), Value::Array(types));
    out.insert("functions".into(), Value::Array(functions));
    out.insert("items".into(), Value::Array(items));
    out.insert("allocs".into(), Value::Array(allocs));
    out.insert("spans".into(), Value::Array(spans));

    info!("Linked {} program DBs with id base {}", dbs.len(), base);
    Smir::load(Value::Object(out))
}
