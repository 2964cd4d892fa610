//! Type metadata from the program DB `types` table

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Opaque type identifier, stable within one program DB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub i64);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed integer widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntTy {
    I8,
    I16,
    I32,
    I64,
    I128,
    Isize,
}

/// Unsigned integer widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UintTy {
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
}

/// Float widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatTy {
    F16,
    F32,
    F64,
    F128,
}

impl IntTy {
    /// Width in bytes (`isize` is 8)
    pub fn nbytes(self) -> usize {
        match self {
            IntTy::I8 => 1,
            IntTy::I16 => 2,
            IntTy::I32 => 4,
            IntTy::I64 | IntTy::Isize => 8,
            IntTy::I128 => 16,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "I8" => IntTy::I8,
            "I16" => IntTy::I16,
            "I32" => IntTy::I32,
            "I64" => IntTy::I64,
            "I128" => IntTy::I128,
            "Isize" => IntTy::Isize,
            _ => return None,
        })
    }
}

impl UintTy {
    /// Width in bytes (`usize` is 8)
    pub fn nbytes(self) -> usize {
        match self {
            UintTy::U8 => 1,
            UintTy::U16 => 2,
            UintTy::U32 => 4,
            UintTy::U64 | UintTy::Usize => 8,
            UintTy::U128 => 16,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "U8" => UintTy::U8,
            "U16" => UintTy::U16,
            "U32" => UintTy::U32,
            "U64" => UintTy::U64,
            "U128" => UintTy::U128,
            "Usize" => UintTy::Usize,
            _ => return None,
        })
    }
}

impl FloatTy {
    /// Width in bytes
    pub fn nbytes(self) -> usize {
        match self {
            FloatTy::F16 => 2,
            FloatTy::F32 => 4,
            FloatTy::F64 => 8,
            FloatTy::F128 => 16,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "F16" => FloatTy::F16,
            "F32" => FloatTy::F32,
            "F64" => FloatTy::F64,
            "F128" => FloatTy::F128,
            _ => return None,
        })
    }
}

/// Scalar holding an enum tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagScalar {
    /// Integer tag of the given byte width
    Int { nbytes: usize, signed: bool },
    /// Pointer-sized tag (niche-encoded nullable pointers)
    Pointer { valid_start: u128, valid_end: u128 },
}

/// How an enum tag maps to a variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEncoding {
    /// The tag is the discriminant
    Direct,
    /// Variants other than `untagged_variant` are encoded in a niche
    Niche {
        untagged_variant: usize,
        variant_start: usize,
        variant_end: usize,
        niche_start: u128,
    },
}

/// Variant part of a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantsShape {
    /// Exactly one variant
    Single { index: usize },
    /// Tagged variants, each with its own field layout
    Multiple {
        tag: TagScalar,
        encoding: TagEncoding,
        tag_field: usize,
        variants: Vec<Layout>,
    },
}

/// Memory layout of an aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Field byte offsets, when the fields shape is arbitrary
    pub offsets: Option<Vec<usize>>,
    /// Variant layout
    pub variants: VariantsShape,
    /// Total size in bytes, when known
    pub size: Option<usize>,
}

/// Decoded type metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeInfo {
    Bool,
    Char,
    Str,
    Int(IntTy),
    Uint(UintTy),
    Float(FloatTy),
    Enum {
        name: String,
        adt_def: i64,
        discriminants: Vec<i128>,
        /// Field types per variant
        fields: Vec<Vec<TypeId>>,
        layout: Option<Layout>,
    },
    Struct {
        name: String,
        adt_def: i64,
        fields: Vec<TypeId>,
        layout: Option<Layout>,
    },
    Union {
        name: String,
        adt_def: i64,
    },
    Array {
        element: TypeId,
        /// `None` for slices
        length: Option<u64>,
    },
    Ptr {
        pointee: TypeId,
    },
    Ref {
        pointee: TypeId,
    },
    Tuple {
        components: Vec<TypeId>,
        layout: Option<Layout>,
    },
    Fun {
        descriptor: String,
    },
    Void,
}

impl TypeInfo {
    /// Parse one `TypeInfo` JSON value.
    ///
    /// Returns `Ok(None)` for variants this model does not know about.
    pub fn from_json(data: &Value) -> Result<Option<TypeInfo>> {
        if data.as_str() == Some("VoidType") {
            return Ok(Some(TypeInfo::Void));
        }
        let obj = data
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| Error::malformed(format!("type metadata: {}", data)))?;
        let (variant, body) = obj
            .iter()
            .next()
            .ok_or_else(|| Error::malformed("empty type metadata"))?;

        let info = match variant.as_str() {
            "PrimitiveType" => parse_primitive(body)?,
            "EnumType" => TypeInfo::Enum {
                name: str_field(body, "name")?,
                adt_def: int_field(body, "adt_def")?,
                discriminants: body
                    .get("discriminants")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Error::malformed("EnumType.discriminants"))?
                    .iter()
                    .map(as_i128)
                    .collect::<Result<_>>()?,
                fields: match body.get("fields") {
                    Some(Value::Array(vs)) => vs
                        .iter()
                        .map(|v| ty_list(v, "EnumType.fields"))
                        .collect::<Result<_>>()?,
                    _ => vec![],
                },
                layout: parse_layout_opt(body.get("layout"))?,
            },
            "StructType" => TypeInfo::Struct {
                name: str_field(body, "name")?,
                adt_def: int_field(body, "adt_def")?,
                fields: match body.get("fields") {
                    Some(v) => ty_list(v, "StructType.fields")?,
                    None => vec![],
                },
                layout: parse_layout_opt(body.get("layout"))?,
            },
            "UnionType" => TypeInfo::Union {
                name: str_field(body, "name")?,
                adt_def: int_field(body, "adt_def")?,
            },
            "ArrayType" => TypeInfo::Array {
                element: TypeId(int_field(body, "elem_type")?),
                length: parse_array_size(body.get("size").unwrap_or(&Value::Null))?,
            },
            "PtrType" => TypeInfo::Ptr {
                pointee: TypeId(int_field(body, "pointee_type")?),
            },
            "RefType" => TypeInfo::Ref {
                pointee: TypeId(int_field(body, "pointee_type")?),
            },
            "TupleType" => TypeInfo::Tuple {
                components: match body.get("types") {
                    Some(v) => ty_list(v, "TupleType.types")?,
                    None => vec![],
                },
                layout: parse_layout_opt(body.get("layout"))?,
            },
            "FunType" => TypeInfo::Fun {
                descriptor: body.as_str().unwrap_or_default().to_string(),
            },
            _ => return Ok(None),
        };
        Ok(Some(info))
    }

    /// ADT id of structs, enums and unions
    pub fn adt_def(&self) -> Option<i64> {
        match self {
            TypeInfo::Enum { adt_def, .. }
            | TypeInfo::Struct { adt_def, .. }
            | TypeInfo::Union { adt_def, .. } => Some(*adt_def),
            _ => None,
        }
    }

    /// Short human-readable description
    pub fn describe(&self) -> String {
        match self {
            TypeInfo::Int(i) => format!("{:?}", i).to_lowercase(),
            TypeInfo::Uint(u) => format!("{:?}", u).to_lowercase(),
            TypeInfo::Float(f) => format!("{:?}", f).to_lowercase(),
            TypeInfo::Enum { name, .. } => format!("enum {}", name),
            TypeInfo::Struct { name, .. } => format!("struct {}", name),
            TypeInfo::Union { name, .. } => format!("union {}", name),
            TypeInfo::Array {
                element,
                length: Some(n),
            } => format!("[ty({}); {}]", element, n),
            TypeInfo::Array {
                element,
                length: None,
            } => format!("[ty({})]", element),
            TypeInfo::Ptr { pointee } => format!("*ty({})", pointee),
            TypeInfo::Ref { pointee } => format!("&ty({})", pointee),
            TypeInfo::Tuple { components, .. } => format!(
                "({})",
                components
                    .iter()
                    .map(|c| format!("ty({})", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            TypeInfo::Fun { descriptor } => format!("fn {}", descriptor),
            other => format!("{:?}", other).to_lowercase(),
        }
    }
}

fn parse_primitive(body: &Value) -> Result<TypeInfo> {
    if let Some(name) = body.as_str() {
        return match name {
            "Bool" => Ok(TypeInfo::Bool),
            "Char" => Ok(TypeInfo::Char),
            "Str" => Ok(TypeInfo::Str),
            _ => Err(Error::malformed(format!("PrimitiveType {}", name))),
        };
    }
    let bad = || Error::malformed(format!("PrimitiveType {}", body));
    let (kind, width) = body
        .as_object()
        .and_then(|o| o.iter().next())
        .ok_or_else(bad)?;
    let width = width.as_str().ok_or_else(bad)?;
    match kind.as_str() {
        "Int" => IntTy::parse(width).map(TypeInfo::Int).ok_or_else(bad),
        "Uint" => UintTy::parse(width).map(TypeInfo::Uint).ok_or_else(bad),
        "Float" => FloatTy::parse(width).map(TypeInfo::Float).ok_or_else(bad),
        _ => Err(bad()),
    }
}

fn parse_array_size(size: &Value) -> Result<Option<u64>> {
    match size {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_u64()),
        _ => {
            // Type-level constant: kind.Value = [ty, { bytes: [...] }]
            let bytes = size
                .pointer("/kind/Value/1/bytes")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::malformed(format!("ArrayType.size {}", size)))?;
            let mut n: u64 = 0;
            for (i, b) in bytes.iter().enumerate().take(8) {
                let b = b.as_u64().unwrap_or(0);
                n |= b << (8 * i);
            }
            Ok(Some(n))
        }
    }
}

fn parse_layout_opt(layout: Option<&Value>) -> Result<Option<Layout>> {
    match layout {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_layout(v).map(Some),
    }
}

fn machine_size(v: &Value) -> Option<usize> {
    v.get("num_bits")
        .and_then(Value::as_u64)
        .map(|bits| (bits / 8) as usize)
}

/// Parse a layout shape: `{ fields, variants, size }`
pub fn parse_layout(v: &Value) -> Result<Layout> {
    let offsets = v
        .pointer("/fields/Arbitrary/offsets")
        .and_then(Value::as_array)
        .map(|os| os.iter().filter_map(machine_size).collect());

    let variants = match v.get("variants") {
        Some(Value::Object(o)) if o.contains_key("Single") => VariantsShape::Single {
            index: o["Single"]
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
        },
        Some(Value::Object(o)) if o.contains_key("Multiple") => {
            let m = &o["Multiple"];
            VariantsShape::Multiple {
                tag: parse_tag(m.get("tag").unwrap_or(&Value::Null))?,
                encoding: parse_tag_encoding(m.get("tag_encoding").unwrap_or(&Value::Null))?,
                tag_field: m.get("tag_field").and_then(Value::as_u64).unwrap_or(0) as usize,
                variants: m
                    .get("variants")
                    .and_then(Value::as_array)
                    .map(|vs| vs.iter().map(parse_layout).collect::<Result<Vec<_>>>())
                    .transpose()?
                    .unwrap_or_default(),
            }
        }
        _ => VariantsShape::Single { index: 0 },
    };

    Ok(Layout {
        offsets,
        variants,
        size: v.get("size").and_then(machine_size),
    })
}

fn parse_tag(v: &Value) -> Result<TagScalar> {
    let init = v
        .get("Initialized")
        .ok_or_else(|| Error::malformed(format!("enum tag {}", v)))?;
    let range = |key: &str| {
        init.pointer(&format!("/valid_range/{}", key))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u128
    };
    if let Some(int) = init.pointer("/value/Int") {
        let nbytes = match int.get("length").and_then(Value::as_str) {
            Some("I8") => 1,
            Some("I16") => 2,
            Some("I32") => 4,
            Some("I64") => 8,
            Some("I128") => 16,
            other => return Err(Error::malformed(format!("tag length {:?}", other))),
        };
        let signed = int.get("signed").and_then(Value::as_bool).unwrap_or(false);
        return Ok(TagScalar::Int { nbytes, signed });
    }
    if init.pointer("/value/Pointer").is_some() {
        return Ok(TagScalar::Pointer {
            valid_start: range("start"),
            valid_end: range("end"),
        });
    }
    Err(Error::malformed(format!("enum tag {}", v)))
}

fn parse_tag_encoding(v: &Value) -> Result<TagEncoding> {
    if v.as_str() == Some("Direct") {
        return Ok(TagEncoding::Direct);
    }
    let niche = v
        .get("Niche")
        .ok_or_else(|| Error::malformed(format!("tag encoding {}", v)))?;
    let get = |p: &str| niche.pointer(p).and_then(Value::as_u64).unwrap_or(0);
    Ok(TagEncoding::Niche {
        untagged_variant: get("/untagged_variant") as usize,
        variant_start: get("/niche_variants/start") as usize,
        variant_end: get("/niche_variants/end") as usize,
        niche_start: get("/niche_start") as u128,
    })
}

fn str_field(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::malformed(format!("missing string field `{}`", key)))
}

fn int_field(body: &Value, key: &str) -> Result<i64> {
    body.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::malformed(format!("missing integer field `{}`", key)))
}

fn ty_list(v: &Value, what: &str) -> Result<Vec<TypeId>> {
    v.as_array()
        .ok_or_else(|| Error::malformed(format!("{} is not a list", what)))?
        .iter()
        .map(|t| {
            t.as_i64()
                .map(TypeId)
                .ok_or_else(|| Error::malformed(format!("{} entry {}", what, t)))
        })
        .collect()
}

fn as_i128(v: &Value) -> Result<i128> {
    v.as_i64()
        .map(i128::from)
        .or_else(|| v.as_u64().map(i128::from))
        .ok_or_else(|| Error::malformed(format!("discriminant {}", v)))
}

/// Type table in source order with an id index
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    entries: Vec<(TypeId, TypeInfo)>,
    index: HashMap<TypeId, usize>,
}

impl TypeTable {
    /// Build from `[[id, info], ...]`, skipping unrecognised variants
    pub fn from_json(types: &[Value]) -> Result<Self> {
        let mut entries = Vec::with_capacity(types.len());
        for entry in types {
            let pair = entry
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| Error::malformed(format!("types entry {}", entry)))?;
            let id = pair[0]
                .as_i64()
                .ok_or_else(|| Error::malformed(format!("type id {}", pair[0])))?;
            match TypeInfo::from_json(&pair[1])? {
                Some(info) => entries.push((TypeId(id), info)),
                None => warn!("Skipping unsupported type metadata for ty({})", id),
            }
        }
        Ok(Self::from_entries(entries))
    }

    /// Build from parsed entries
    pub fn from_entries(entries: Vec<(TypeId, TypeInfo)>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, (ty, _))| (*ty, i))
            .collect();
        Self { entries, index }
    }

    /// Look up a type
    pub fn get(&self, ty: TypeId) -> Option<&TypeInfo> {
        self.index.get(&ty).map(|&i| &self.entries[i].1)
    }

    /// Entries in source order
    pub fn iter(&self) -> impl Iterator<Item = &(TypeId, TypeInfo)> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size in bytes of a value of type `ty`
    pub fn nbytes(&self, ty: TypeId) -> Result<usize> {
        let info = self.get(ty).ok_or(Error::UnknownType { ty: ty.0 })?;
        self.info_nbytes(info)
    }

    /// Size in bytes of a value described by `info`
    pub fn info_nbytes(&self, info: &TypeInfo) -> Result<usize> {
        match info {
            TypeInfo::Bool => Ok(1),
            TypeInfo::Char => Ok(4),
            TypeInfo::Int(i) => Ok(i.nbytes()),
            TypeInfo::Uint(u) => Ok(u.nbytes()),
            TypeInfo::Float(f) => Ok(f.nbytes()),
            TypeInfo::Ptr { pointee } | TypeInfo::Ref { pointee } => {
                if self.is_unsized(*pointee) {
                    Ok(16)
                } else {
                    Ok(8)
                }
            }
            TypeInfo::Array {
                element,
                length: Some(n),
            } => Ok(self.nbytes(*element)? * (*n as usize)),
            TypeInfo::Struct {
                layout: Some(Layout { size: Some(n), .. }),
                ..
            }
            | TypeInfo::Enum {
                layout: Some(Layout { size: Some(n), .. }),
                ..
            }
            | TypeInfo::Tuple {
                layout: Some(Layout { size: Some(n), .. }),
                ..
            } => Ok(*n),
            TypeInfo::Struct { fields, .. } => fields.iter().map(|f| self.nbytes(*f)).sum(),
            TypeInfo::Tuple { components, .. } => {
                components.iter().map(|c| self.nbytes(*c)).sum()
            }
            TypeInfo::Fun { .. } | TypeInfo::Void => Ok(0),
            other => Err(Error::decode(format!(
                "size of {} is not known",
                other.describe()
            ))),
        }
    }

    /// Str and slices need a length next to the pointer
    pub fn is_unsized(&self, ty: TypeId) -> bool {
        matches!(
            self.get(ty),
            Some(TypeInfo::Str) | Some(TypeInfo::Array { length: None, .. })
        )
    }
}
