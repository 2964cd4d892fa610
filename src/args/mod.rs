//! # Argument Generation
//!
//! Builds the initial locals of an entry function from its signature and the
//! type table, together with the path constraints over the fresh variables.
//!
//! | Type            | Value                                   | Constraints            |
//! |-----------------|-----------------------------------------|------------------------|
//! | `Int(w)`        | `Integer(ARG_INTn, 8w, true)`           | signed range           |
//! | `Uint(w)`       | `Integer(ARG_UINTn, 8w, false)`         | unsigned range         |
//! | `Bool`          | `BoolVal(ARG_BOOLn)`                    | none                   |
//! | `Enum`          | `Aggregate(variantIdx(IDX), ARGS)`      | `0 <= IDX <= len(disc)`|
//! | struct / tuple  | `Aggregate(variantIdx(0), [fields])`    | children               |
//! | `Union`         | `Aggregate(variantIdx(0), ARG_UNIONn)`  | none                   |
//! | slice           | `Range(L)`                              | `sizeList(L) == N`     |
//! | `[T; n]`        | `Range([v0, ...])`                      | children               |
//! | `&T` / `*T`     | `Reference(0, place(local(K)), ..)`     | pointee                |
//! | other           | `ARG_VALn`                              | `isValue(ARG_VALn)`    |
//!
//! Pointees live in extra locals appended after the parameters, so the final
//! locals vector is `[return, params.., pointees..]`.

pub mod config;
pub mod random;

pub use config::{call_config, initial_config, target_config, CallConfig};
pub use random::RandomSource;

use crate::kast::{sort, FreshVars, Term};
use crate::smir::{LocalDecl, Mutability, TypeId, TypeInfo, TypeTable};
use crate::value;
use crate::{Error, Result};
use tracing::{debug, warn};

/// How argument values are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenMode {
    /// Fresh variables with range constraints
    Symbolic,
    /// Concrete samples from a seeded RNG
    Random(u64),
}

/// Generated locals and constraints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedArgs {
    /// Parameters followed by pointee slots (no return slot)
    pub locals: Vec<Term>,
    /// Path constraints over the fresh variables
    pub constraints: Vec<Term>,
}

/// A generated value plus the size its pointers should carry
struct Generated {
    value: Term,
    size: Term,
}

impl Generated {
    fn thin(value: Term) -> Self {
        Self {
            value,
            size: value::no_size(),
        }
    }
}

/// Signed range `[-2^(8w-1), 2^(8w-1)-1]` as integer tokens
pub fn signed_bounds(nbytes: usize) -> (Term, Term) {
    let bits = nbytes * 8;
    if bits >= 128 {
        return (Term::int(i128::MIN), Term::int(i128::MAX));
    }
    (
        Term::int(-(1i128 << (bits - 1))),
        Term::int((1i128 << (bits - 1)) - 1),
    )
}

/// Unsigned range `[0, 2^(8w)-1]` as integer tokens
pub fn unsigned_bounds(nbytes: usize) -> (Term, Term) {
    let bits = nbytes * 8;
    let max = if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    };
    (Term::int(0), Term::uint(max))
}

/// Argument generator over one type table
pub struct ArgGenerator<'a> {
    types: &'a TypeTable,
    random: Option<RandomSource>,
    fresh: FreshVars,
    next_slot: usize,
    pointees: Vec<Term>,
    constraints: Vec<Term>,
    /// Pointee types currently being generated
    behind: Vec<TypeId>,
}

impl<'a> ArgGenerator<'a> {
    /// Create a generator
    pub fn new(types: &'a TypeTable, mode: GenMode) -> Self {
        Self {
            types,
            random: match mode {
                GenMode::Symbolic => None,
                GenMode::Random(seed) => Some(RandomSource::new(seed)),
            },
            fresh: FreshVars::new(),
            next_slot: 0,
            pointees: Vec::new(),
            constraints: Vec::new(),
            behind: Vec::new(),
        }
    }

    /// Generate typed values for the parameter declarations `args`
    pub fn generate(mut self, args: &[LocalDecl]) -> Result<GeneratedArgs> {
        self.next_slot = args.len() + 1;
        let mut locals = Vec::with_capacity(args.len());
        for decl in args {
            let generated = self.value(decl.ty)?;
            locals.push(value::typed_value(generated.value, decl.ty, decl.mutability));
        }
        locals.extend(self.pointees);
        Ok(GeneratedArgs {
            locals,
            constraints: self.constraints,
        })
    }

    fn opaque(&mut self, ty: TypeId, info: Option<&TypeInfo>) -> Result<Generated> {
        if self.random.is_some() {
            return Err(Error::UnknownType { ty: ty.0 });
        }
        match info {
            Some(info) => warn!(
                "No argument shape for ty({}) ({}), using an opaque value",
                ty,
                info.describe()
            ),
            None => warn!("ty({}) is not in the type table, using an opaque value", ty),
        }
        let var = self.fresh.fresh("ARG_VAL", sort::VALUE);
        self.constraints
            .push(Term::apply("isValue", vec![var.clone()]));
        Ok(Generated::thin(var))
    }

    fn int_value(&mut self, nbytes: usize, signed: bool) -> Term {
        let nbits = nbytes * 8;
        if let Some(rng) = self.random.as_mut() {
            return value::integer(Term::int(rng.int(nbytes, signed)), nbits, signed);
        }
        let (prefix, (lo, hi)) = if signed {
            ("ARG_INT", signed_bounds(nbytes))
        } else {
            ("ARG_UINT", unsigned_bounds(nbytes))
        };
        let var = self.fresh.fresh(prefix, sort::INT);
        self.constraints.push(Term::le_int(lo, var.clone()));
        self.constraints.push(Term::le_int(var.clone(), hi));
        value::integer(var, nbits, signed)
    }

    fn value(&mut self, ty: TypeId) -> Result<Generated> {
        let types = self.types;
        let Some(info) = types.get(ty) else {
            return self.opaque(ty, None);
        };

        let generated = match info {
            TypeInfo::Int(i) => Generated::thin(self.int_value(i.nbytes(), true)),
            TypeInfo::Uint(u) => Generated::thin(self.int_value(u.nbytes(), false)),
            TypeInfo::Bool => {
                let b = match self.random.as_mut() {
                    Some(rng) => Term::bool(rng.bool()),
                    None => self.fresh.fresh("ARG_BOOL", sort::BOOL),
                };
                Generated::thin(value::bool_val(b))
            }
            TypeInfo::Enum {
                discriminants,
                fields,
                ..
            } => {
                if let Some(rng) = self.random.as_mut() {
                    let idx = rng.index(discriminants.len());
                    let field_tys = fields.get(idx).cloned().unwrap_or_default();
                    let values = self.values(&field_tys)?;
                    Generated::thin(value::aggregate(
                        Term::int(idx as i128),
                        Term::list(values),
                    ))
                } else {
                    let idx = self.fresh.fresh("ARG_IDX", sort::INT);
                    let args = self.fresh.fresh("ARG_ADT", sort::LIST);
                    self.constraints
                        .push(Term::le_int(Term::int(0), idx.clone()));
                    self.constraints.push(Term::le_int(
                        idx.clone(),
                        Term::int(discriminants.len() as i128),
                    ));
                    Generated::thin(value::aggregate(idx, args))
                }
            }
            TypeInfo::Struct { fields, .. } => {
                let values = self.values(fields)?;
                Generated::thin(value::aggregate(Term::int(0), Term::list(values)))
            }
            TypeInfo::Tuple { components, .. } => {
                let values = self.values(components)?;
                Generated::thin(value::aggregate(Term::int(0), Term::list(values)))
            }
            TypeInfo::Union { .. } => {
                let payload = match self.random {
                    Some(_) => Term::list(vec![]),
                    None => self.fresh.fresh("ARG_UNION", sort::LIST),
                };
                Generated::thin(value::aggregate(Term::int(0), payload))
            }
            TypeInfo::Array {
                element,
                length: None,
            } => {
                let element = *element;
                if let Some(rng) = self.random.as_mut() {
                    let len = rng.slice_len();
                    let elems = self.values(&vec![element; len])?;
                    Generated {
                        value: value::range(Term::list(elems)),
                        size: value::dynamic_size(Term::int(len as i128)),
                    }
                } else {
                    let list = self.fresh.fresh("ARG_ARRAY", sort::LIST);
                    let len = self.fresh.fresh("ARG_ARRAY_LEN", sort::INT);
                    self.constraints.push(Term::eq_int(
                        Term::apply("sizeList", vec![list.clone()]),
                        len.clone(),
                    ));
                    Generated {
                        value: value::range(list),
                        size: value::dynamic_size(len),
                    }
                }
            }
            TypeInfo::Array {
                element,
                length: Some(n),
            } => {
                let elems = self.values(&vec![*element; *n as usize])?;
                Generated {
                    value: value::range(Term::list(elems)),
                    size: value::static_size(*n),
                }
            }
            TypeInfo::Ref { pointee } | TypeInfo::Ptr { pointee } => {
                let pointee = *pointee;
                let target = if self.behind.contains(&pointee) {
                    self.recursive(pointee)?
                } else {
                    self.behind.push(pointee);
                    let target = self.value(pointee);
                    self.behind.pop();
                    target?
                };
                let slot = self.next_slot;
                self.next_slot += 1;
                self.pointees.push(value::typed_value(
                    target.value,
                    pointee,
                    Mutability::Mut,
                ));
                Generated::thin(value::reference(
                    slot,
                    Mutability::Mut,
                    value::metadata(target.size),
                ))
            }
            other => return self.opaque(ty, Some(other)),
        };
        Ok(generated)
    }

    /// Pointee reached again through its own pointer chain
    fn recursive(&mut self, pointee: TypeId) -> Result<Generated> {
        if self.random.is_some() {
            return Err(Error::InvalidOption(format!(
                "ty({}) is recursive through a pointer; no finite random value",
                pointee
            )));
        }
        debug!("ty({}) recurs behind a pointer, using an opaque pointee", pointee);
        let var = self.fresh.fresh("ARG_VAL", sort::VALUE);
        self.constraints
            .push(Term::apply("isValue", vec![var.clone()]));
        Ok(Generated::thin(var))
    }

    fn values(&mut self, tys: &[TypeId]) -> Result<Vec<Term>> {
        tys.iter()
            .map(|ty| self.value(*ty).map(|g| g.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smir::{IntTy, UintTy};

    fn decl(ty: i64) -> LocalDecl {
        LocalDecl {
            ty: TypeId(ty),
            span: None,
            mutability: Mutability::Not,
        }
    }

    fn table() -> TypeTable {
        TypeTable::from_entries(vec![
            (TypeId(1), TypeInfo::Uint(UintTy::U32)),
            (TypeId(2), TypeInfo::Int(IntTy::I8)),
            (TypeId(3), TypeInfo::Ref { pointee: TypeId(1) }),
            (TypeId(4), TypeInfo::Ref { pointee: TypeId(3) }),
            (
                TypeId(5),
                TypeInfo::Array {
                    element: TypeId(1),
                    length: None,
                },
            ),
            (TypeId(6), TypeInfo::Ref { pointee: TypeId(5) }),
            (TypeId(7), TypeInfo::Char),
        ])
    }

    #[test]
    fn test_uint_bounds() {
        let types = table();
        let out = ArgGenerator::new(&types, GenMode::Symbolic)
            .generate(&[decl(1)])
            .unwrap();
        let x = Term::var("ARG_UINT0", sort::INT);
        assert_eq!(
            out.constraints,
            vec![
                Term::le_int(Term::int(0), x.clone()),
                Term::le_int(x, Term::int(4294967295)),
            ]
        );
    }

    #[test]
    fn test_signed_bounds() {
        assert_eq!(signed_bounds(1), (Term::int(-128), Term::int(127)));
        assert_eq!(unsigned_bounds(16).1, Term::uint(u128::MAX));
    }

    #[test]
    fn test_references_append_slots_after_params() {
        let types = table();
        let out = ArgGenerator::new(&types, GenMode::Symbolic)
            .generate(&[decl(4), decl(2)])
            .unwrap();
        // params: &&u32, i8; pointees: u32 (slot 3), &u32 (slot 4)
        assert_eq!(out.locals.len(), 4);
        let outer = &out.locals[0].args()[0];
        assert_eq!(outer.label(), Some("Reference"));
        assert_eq!(outer.args()[1], value::place(4));
        let inner = &out.locals[3].args()[0];
        assert_eq!(inner.args()[1], value::place(3));
    }

    #[test]
    fn test_slice_reference_carries_dynamic_size() {
        let types = table();
        let out = ArgGenerator::new(&types, GenMode::Symbolic)
            .generate(&[decl(6)])
            .unwrap();
        let reference = &out.locals[0].args()[0];
        let meta = &reference.args()[3];
        assert_eq!(meta.args()[0].label(), Some("dynamicSize"));
        assert!(out
            .constraints
            .iter()
            .any(|c| c.args().first().and_then(Term::label) == Some("sizeList")));
    }

    #[test]
    fn test_unknown_type_falls_back_to_opaque() {
        let types = table();
        let out = ArgGenerator::new(&types, GenMode::Symbolic)
            .generate(&[decl(7), decl(99)])
            .unwrap();
        assert_eq!(out.constraints.len(), 2);
        assert!(out
            .constraints
            .iter()
            .all(|c| c.label() == Some("isValue")));
    }

    #[test]
    fn test_random_mode_is_concrete() {
        let types = table();
        let out = ArgGenerator::new(&types, GenMode::Random(1))
            .generate(&[decl(1), decl(4)])
            .unwrap();
        assert!(out.constraints.is_empty());
        assert!(out.locals.iter().all(|l| l.free_vars().is_empty()));
    }

    #[test]
    fn test_random_mode_rejects_unknown_type() {
        let types = table();
        let err = ArgGenerator::new(&types, GenMode::Random(1))
            .generate(&[decl(99)])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownType { ty: 99 }));
    }
}
