//! Runtime values of the object language and their term encoding.
//!
//! Concrete [`Value`]s come out of allocation decoding and random argument
//! generation; the symbolic argument generator builds the same shapes
//! directly as terms with the constructors below.

use crate::kast::Term;
use crate::smir::{AllocId, Mutability, TypeId};

/// `metadata(size, ptr_offset, origin_size)` for a pointer
pub fn metadata(size: Term) -> Term {
    Term::apply("metadata", vec![size.clone(), Term::int(0), size])
}

/// Size marker of thin pointers
pub fn no_size() -> Term {
    Term::constant("noMetadataSize")
}

/// Size marker of pointers to arrays of known length
pub fn static_size(n: u64) -> Term {
    Term::apply("staticSize", vec![Term::int(i128::from(n))])
}

/// Size marker of slice pointers
pub fn dynamic_size(n: Term) -> Term {
    Term::apply("dynamicSize", vec![n])
}

/// `Integer(value, nbits, signed)`
pub fn integer(value: Term, nbits: usize, signed: bool) -> Term {
    Term::apply(
        "Integer",
        vec![value, Term::int(nbits as i128), Term::bool(signed)],
    )
}

/// `BoolVal(b)`
pub fn bool_val(b: Term) -> Term {
    Term::apply("BoolVal", vec![b])
}

/// `Range(elems)`
pub fn range(elems: Term) -> Term {
    Term::apply("Range", vec![elems])
}

/// `Aggregate(variantIdx(idx), fields)`
pub fn aggregate(idx: Term, fields: Term) -> Term {
    Term::apply(
        "Aggregate",
        vec![Term::apply("variantIdx", vec![idx]), fields],
    )
}

/// `Reference(stack_offset, place(local(K)), mutability, metadata)`
pub fn reference(local: usize, mutability: Mutability, meta: Term) -> Term {
    Term::apply(
        "Reference",
        vec![
            Term::int(0),
            place(local),
            Term::constant(mutability.label()),
            meta,
        ],
    )
}

/// `place(local(i), .ProjectionElems)`
pub fn place(local: usize) -> Term {
    Term::apply(
        "place",
        vec![
            Term::apply("local", vec![Term::int(local as i128)]),
            Term::constant(".ProjectionElems"),
        ],
    )
}

/// `ty(N)`
pub fn ty(id: TypeId) -> Term {
    Term::apply("ty", vec![Term::int(i128::from(id.0))])
}

/// `typedValue(value, ty(N), mutability)`
pub fn typed_value(value: Term, id: TypeId, mutability: Mutability) -> Term {
    Term::apply(
        "typedValue",
        vec![value, ty(id), Term::constant(mutability.label())],
    )
}

/// Size recorded in pointer metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSize {
    NoSize,
    Static(u64),
    Dynamic(u64),
}

impl MetadataSize {
    fn to_term(&self) -> Term {
        match self {
            MetadataSize::NoSize => no_size(),
            MetadataSize::Static(n) => static_size(*n),
            MetadataSize::Dynamic(n) => dynamic_size(Term::int(i128::from(*n))),
        }
    }
}

/// A concrete runtime value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Integer { value: i128, nbits: usize, signed: bool },
    Str(String),
    Range(Vec<Value>),
    Aggregate { variant: usize, fields: Vec<Value> },
    /// Pointer into a global allocation
    AllocRef { alloc_id: AllocId, size: MetadataSize },
    /// Marker left where decoding failed
    UnableToDecode(String),
}

impl Value {
    /// Encode as a term
    pub fn to_term(&self) -> Term {
        match self {
            Value::Bool(b) => bool_val(Term::bool(*b)),
            Value::Integer {
                value,
                nbits,
                signed,
            } => integer(Term::int(*value), *nbits, *signed),
            Value::Str(s) => Term::apply("StringVal", vec![Term::string(s.clone())]),
            Value::Range(elems) => range(Term::list(elems.iter().map(Value::to_term).collect())),
            Value::Aggregate { variant, fields } => aggregate(
                Term::int(*variant as i128),
                Term::list(fields.iter().map(Value::to_term).collect()),
            ),
            Value::AllocRef { alloc_id, size } => Term::apply(
                "AllocRef",
                vec![
                    Term::apply("allocId", vec![Term::int(i128::from(alloc_id.0))]),
                    Term::constant(".ProjectionElems"),
                    metadata(size.to_term()),
                ],
            ),
            Value::UnableToDecode(msg) => {
                Term::apply("UnableToDecode", vec![Term::string(msg.clone())])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_term() {
        let v = Value::Integer {
            value: -1,
            nbits: 8,
            signed: true,
        };
        assert_eq!(
            v.to_term(),
            Term::apply("Integer", vec![Term::int(-1), Term::int(8), Term::bool(true)])
        );
    }

    #[test]
    fn test_reference_points_at_local() {
        let r = reference(4, Mutability::Not, metadata(no_size()));
        assert_eq!(r.args()[1], place(4));
        assert_eq!(r.args()[2], Term::constant("mutabilityNot"));
    }
}
