//! Decoding raw allocation bytes into values

use crate::smir::ty::{TagEncoding, TagScalar, VariantsShape};
use crate::smir::{AllocEntry, GlobalAlloc, TypeId, TypeInfo, TypeTable};
use crate::value::{MetadataSize, Value};
use crate::{Error, Result};
use tracing::warn;

/// Decode one allocation.
///
/// Decode failures become [`Value::UnableToDecode`]; a missing type is an
/// error.
pub fn decode_alloc(entry: &AllocEntry, types: &TypeTable) -> Result<Value> {
    let mem = match &entry.global_alloc {
        GlobalAlloc::Memory(mem) => mem,
        GlobalAlloc::Static(_) => {
            return Ok(Value::UnableToDecode(
                "Static global allocation not decoded".into(),
            ))
        }
        GlobalAlloc::Function(_) => {
            return Ok(Value::UnableToDecode(
                "Function global allocation not decoded".into(),
            ))
        }
        GlobalAlloc::VTable(_) => {
            return Ok(Value::UnableToDecode(
                "VTable global allocation not decoded".into(),
            ))
        }
    };

    let data = mem.data();
    let result = match mem.provenance.ptrs.as_slice() {
        [] => decode_value(&data, entry.ty, types),
        [(0, target)] => decode_pointer(&data, entry.ty, types).map(|size| Value::AllocRef {
            alloc_id: *target,
            size,
        }),
        _ => Err(Error::decode(format!(
            "unsupported provenance {:?}",
            mem.provenance.ptrs
        ))),
    };

    match result {
        Ok(value) => Ok(value),
        Err(Error::DecodeFailure { reason }) => {
            warn!("Unable to decode alloc {}: {}", entry.alloc_id.0, reason);
            Ok(Value::UnableToDecode(reason))
        }
        Err(other) => Err(other),
    }
}

fn lookup(types: &TypeTable, ty: TypeId) -> Result<&TypeInfo> {
    types.get(ty).ok_or(Error::UnknownType { ty: ty.0 })
}

/// Metadata size of a pointer with provenance at offset 0
fn decode_pointer(data: &[u8], ty: TypeId, types: &TypeTable) -> Result<MetadataSize> {
    let pointee = match lookup(types, ty)? {
        TypeInfo::Ptr { pointee } | TypeInfo::Ref { pointee } => *pointee,
        other => {
            return Err(Error::decode(format!(
                "pointer bytes for non-pointer {}",
                other.describe()
            )))
        }
    };
    let size = match lookup(types, pointee)? {
        TypeInfo::Array { length: None, .. } | TypeInfo::Str => MetadataSize::Dynamic(1),
        TypeInfo::Array {
            length: Some(n), ..
        } => MetadataSize::Static(*n),
        _ => MetadataSize::NoSize,
    };
    match (data.len(), size) {
        (8, size) => Ok(size),
        (16, MetadataSize::Dynamic(_)) => {
            let len = read_uint(&data[8..16]);
            Ok(MetadataSize::Dynamic(len as u64))
        }
        (n, _) => Err(Error::decode(format!("pointer of {} bytes", n))),
    }
}

fn read_uint(bytes: &[u8]) -> u128 {
    bytes
        .iter()
        .rev()
        .fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

fn read_int(bytes: &[u8], signed: bool) -> Result<i128> {
    let raw = read_uint(bytes);
    let bits = bytes.len() * 8;
    if signed {
        if bits == 0 || bits >= 128 {
            return Ok(raw as i128);
        }
        let shift = 128 - bits;
        Ok(((raw << shift) as i128) >> shift)
    } else {
        i128::try_from(raw).map_err(|_| Error::decode(format!("{} exceeds the i128 range", raw)))
    }
}

/// Decode bytes as a value of type `ty`
pub fn decode_value(data: &[u8], ty: TypeId, types: &TypeTable) -> Result<Value> {
    let info = lookup(types, ty)?;
    decode_info(data, info, types)
}

fn decode_info(data: &[u8], info: &TypeInfo, types: &TypeTable) -> Result<Value> {
    match info {
        TypeInfo::Bool => match data {
            [0] => Ok(Value::Bool(false)),
            [1] => Ok(Value::Bool(true)),
            _ => Err(Error::decode(format!("cannot decode {:?} as bool", data))),
        },
        TypeInfo::Str => String::from_utf8(data.to_vec())
            .map(Value::Str)
            .map_err(|e| Error::decode(format!("invalid utf-8: {}", e))),
        TypeInfo::Int(i) => decode_int(data, i.nbytes(), true),
        TypeInfo::Uint(u) => decode_int(data, u.nbytes(), false),
        TypeInfo::Array { element, length } => {
            let elem_info = lookup(types, *element)?;
            let elem_size = types.info_nbytes(elem_info)?;
            let elems = if elem_size == 0 {
                (0..length.unwrap_or(0))
                    .map(|_| decode_info(&[], elem_info, types))
                    .collect::<Result<Vec<_>>>()?
            } else {
                if data.len() % elem_size != 0 {
                    return Err(Error::decode(format!(
                        "{} bytes do not split into {}-byte elements",
                        data.len(),
                        elem_size
                    )));
                }
                data.chunks(elem_size)
                    .map(|chunk| decode_info(chunk, elem_info, types))
                    .collect::<Result<Vec<_>>>()?
            };
            if let Some(n) = length {
                if elems.len() as u64 != *n {
                    return Err(Error::decode(format!(
                        "expected {} elements, got {}",
                        n,
                        elems.len()
                    )));
                }
            }
            Ok(Value::Range(elems))
        }
        TypeInfo::Struct { fields, layout, .. } => {
            let layout = layout
                .as_ref()
                .ok_or_else(|| Error::decode("struct layout not provided"))?;
            if layout.variants != (VariantsShape::Single { index: 0 }) {
                return Err(Error::decode("unexpected variants in struct layout"));
            }
            let offsets = offsets(layout.offsets.as_deref())?;
            Ok(Value::Aggregate {
                variant: 0,
                fields: decode_fields(data, fields, offsets, types)?,
            })
        }
        TypeInfo::Tuple { components, layout } => {
            if components.is_empty() {
                if !data.is_empty() {
                    return Err(Error::decode("zero-sized tuple with data"));
                }
                return Ok(Value::Aggregate {
                    variant: 0,
                    fields: vec![],
                });
            }
            let layout = layout
                .as_ref()
                .ok_or_else(|| Error::decode("tuple layout not provided"))?;
            let offsets = offsets(layout.offsets.as_deref())?;
            Ok(Value::Aggregate {
                variant: 0,
                fields: decode_fields(data, components, offsets, types)?,
            })
        }
        TypeInfo::Enum {
            discriminants,
            fields,
            layout,
            ..
        } => {
            let layout = layout
                .as_ref()
                .ok_or_else(|| Error::decode("enum layout not provided"))?;
            let (variant, field_offsets) = match &layout.variants {
                VariantsShape::Single { index } => (*index, offsets(layout.offsets.as_deref())?),
                VariantsShape::Multiple {
                    tag,
                    encoding,
                    tag_field,
                    variants,
                } => {
                    let tag_offset = *offsets(layout.offsets.as_deref())?
                        .get(*tag_field)
                        .ok_or_else(|| Error::decode("tag field has no offset"))?;
                    let idx = decode_tag(data, tag_offset, tag, encoding, discriminants)?;
                    let variant_layout = variants
                        .get(idx)
                        .ok_or_else(|| Error::decode(format!("no layout for variant {}", idx)))?;
                    (idx, offsets(variant_layout.offsets.as_deref())?)
                }
            };
            let tys = fields
                .get(variant)
                .ok_or_else(|| Error::decode(format!("no fields for variant {}", variant)))?;
            Ok(Value::Aggregate {
                variant,
                fields: decode_fields(data, tys, field_offsets, types)?,
            })
        }
        other => Err(Error::decode(format!(
            "unsupported type {}",
            other.describe()
        ))),
    }
}

fn offsets(offsets: Option<&[usize]>) -> Result<&[usize]> {
    offsets.ok_or_else(|| Error::decode("unsupported fields shape"))
}

fn decode_int(data: &[u8], nbytes: usize, signed: bool) -> Result<Value> {
    if data.len() != nbytes {
        return Err(Error::decode(format!(
            "expected {} bytes, got {}",
            nbytes,
            data.len()
        )));
    }
    Ok(Value::Integer {
        value: read_int(data, signed)?,
        nbits: nbytes * 8,
        signed,
    })
}

fn decode_fields(
    data: &[u8],
    tys: &[TypeId],
    offsets: &[usize],
    types: &TypeTable,
) -> Result<Vec<Value>> {
    if tys.len() != offsets.len() {
        return Err(Error::decode(format!(
            "{} fields but {} offsets",
            tys.len(),
            offsets.len()
        )));
    }
    tys.iter()
        .zip(offsets)
        .map(|(ty, offset)| {
            let size = types.nbytes(*ty)?;
            let bytes = data
                .get(*offset..offset + size)
                .ok_or_else(|| Error::decode(format!("field at {} out of bounds", offset)))?;
            decode_value(bytes, *ty, types)
        })
        .collect()
}

/// Variant index selected by the tag
fn decode_tag(
    data: &[u8],
    offset: usize,
    tag: &TagScalar,
    encoding: &TagEncoding,
    discriminants: &[i128],
) -> Result<usize> {
    let (nbytes, signed) = match tag {
        TagScalar::Int { nbytes, signed } => (*nbytes, *signed),
        TagScalar::Pointer { .. } => (8, false),
    };
    let bytes = data
        .get(offset..offset + nbytes)
        .ok_or_else(|| Error::decode("tag out of bounds"))?;

    match encoding {
        TagEncoding::Direct => {
            let discriminant = read_int(bytes, signed)?;
            discriminants
                .iter()
                .position(|d| *d == discriminant)
                .ok_or_else(|| Error::decode(format!("discriminant {} not found", discriminant)))
        }
        TagEncoding::Niche {
            untagged_variant,
            variant_start,
            variant_end,
            niche_start,
        } => {
            let width_mask = if nbytes >= 16 {
                u128::MAX
            } else {
                (1u128 << (nbytes * 8)) - 1
            };
            let relative = read_uint(bytes).wrapping_sub(*niche_start) & width_mask;
            let span = variant_end.saturating_sub(*variant_start) as u128;
            if relative <= span {
                Ok(variant_start + relative as usize)
            } else {
                Ok(*untagged_variant)
            }
        }
    }
}
