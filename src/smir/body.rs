//! Items, function symbols and MIR bodies

use super::alloc::Mutability;
use super::ty::TypeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entry of the `functions` table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionSymbol {
    /// A function with a (possibly absent) body under this symbol
    NormalSym(String),
    /// A compiler intrinsic, resolved by the backend
    IntrinsicSym(String),
    /// A no-op shim
    NoOpSym(String),
}

impl FunctionSymbol {
    /// The symbol of a `NormalSym`
    pub fn normal(&self) -> Option<&str> {
        match self {
            FunctionSymbol::NormalSym(s) => Some(s),
            _ => None,
        }
    }
}

/// A monomorphised item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub symbol_name: String,
    pub mono_item_kind: MonoItemKind,
}

/// Kinds of monomorphised items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonoItemKind {
    MonoItemFn {
        name: String,
        #[serde(default)]
        id: i64,
        #[serde(default)]
        body: Option<Body>,
    },
    MonoItemStatic {
        name: String,
        #[serde(default)]
        id: i64,
        #[serde(default)]
        allocation: Option<Value>,
    },
    MonoItemGlobalAsm {
        asm: String,
    },
}

impl Item {
    /// Function name and body, if this is a `MonoItemFn`
    pub fn as_fn(&self) -> Option<(&str, Option<&Body>)> {
        match &self.mono_item_kind {
            MonoItemKind::MonoItemFn { name, body, .. } => Some((name, body.as_ref())),
            _ => None,
        }
    }

    /// Def id of functions and statics
    pub fn def_id(&self) -> Option<i64> {
        match &self.mono_item_kind {
            MonoItemKind::MonoItemFn { id, .. } | MonoItemKind::MonoItemStatic { id, .. } => {
                Some(*id)
            }
            MonoItemKind::MonoItemGlobalAsm { .. } => None,
        }
    }
}

/// A MIR body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub blocks: Vec<BasicBlock>,
    pub locals: Vec<LocalDecl>,
    pub arg_count: usize,
    #[serde(default)]
    pub spread_arg: Option<usize>,
    #[serde(default)]
    pub span: Option<i64>,
}

impl Body {
    /// Parameter declarations (locals `1..=arg_count`)
    pub fn arguments(&self) -> &[LocalDecl] {
        let end = (self.arg_count + 1).min(self.locals.len());
        self.locals.get(1..end).unwrap_or(&[])
    }

    /// Static call targets: `ty` of every constant `func` operand
    pub fn call_targets(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.blocks.iter().filter_map(|bb| match &bb.terminator.kind {
            TerminatorKind::Call {
                func: Operand::Constant(c),
                ..
            } => Some(c.const_.ty),
            _ => None,
        })
    }
}

/// Local variable declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub ty: TypeId,
    #[serde(default)]
    pub span: Option<i64>,
    pub mutability: Mutability,
}

/// Basic block; statements stay raw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub statements: Vec<Value>,
    pub terminator: Terminator,
}

/// Block terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminator {
    pub kind: TerminatorKind,
    #[serde(default)]
    pub span: Option<i64>,
}

/// Terminator kinds; payloads the driver never inspects stay raw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TerminatorKind {
    Goto {
        target: usize,
    },
    SwitchInt {
        discr: Operand,
        targets: Value,
    },
    Resume,
    Abort,
    Return,
    Unreachable,
    Drop {
        place: Place,
        target: usize,
        #[serde(default)]
        unwind: Value,
    },
    Call {
        func: Operand,
        args: Vec<Operand>,
        destination: Place,
        #[serde(default)]
        target: Option<usize>,
        #[serde(default)]
        unwind: Value,
    },
    Assert {
        cond: Operand,
        expected: bool,
        msg: Value,
        target: usize,
        #[serde(default)]
        unwind: Value,
    },
    InlineAsm(Value),
}

/// Place: a local plus projections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub local: usize,
    #[serde(default)]
    pub projection: Vec<Value>,
}

/// Operand of a terminator or rvalue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Copy(Place),
    Move(Place),
    Constant(ConstOperand),
}

/// Constant operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstOperand {
    #[serde(default)]
    pub span: Option<i64>,
    #[serde(default)]
    pub user_ty: Option<Value>,
    pub const_: MirConst,
}

/// A MIR constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirConst {
    pub kind: Value,
    pub ty: TypeId,
    #[serde(default)]
    pub id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_block(callee: i64) -> Value {
        json!({
            "statements": [],
            "terminator": {
                "kind": {"Call": {
                    "func": {"Constant": {"span": 1, "user_ty": null,
                        "const_": {"kind": "ZeroSized", "ty": callee, "id": 0}}},
                    "args": [{"Move": {"local": 1, "projection": []}}],
                    "destination": {"local": 0, "projection": []},
                    "target": 1,
                    "unwind": "Continue"
                }},
                "span": 2
            }
        })
    }

    #[test]
    fn test_call_targets() {
        let body: Body = serde_json::from_value(json!({
            "blocks": [call_block(17), {"statements": [], "terminator": {"kind": "Return", "span": 3}}],
            "locals": [
                {"ty": 1, "span": 0, "mutability": "Mut"},
                {"ty": 2, "span": 0, "mutability": "Not"}
            ],
            "arg_count": 1,
            "spread_arg": null,
            "span": 4
        }))
        .unwrap();
        assert_eq!(body.call_targets().collect::<Vec<_>>(), vec![TypeId(17)]);
        assert_eq!(body.arguments().len(), 1);
        assert_eq!(body.arguments()[0].ty, TypeId(2));
    }

    #[test]
    fn test_function_symbol_shapes() {
        let syms: Vec<(TypeId, FunctionSymbol)> = serde_json::from_value(json!([
            [1, {"NormalSym": "_ZN4main"}],
            [2, {"IntrinsicSym": "black_box"}],
            [3, {"NoOpSym": ""}]
        ]))
        .unwrap();
        assert_eq!(syms[0].1.normal(), Some("_ZN4main"));
        assert_eq!(syms[1].1, FunctionSymbol::IntrinsicSym("black_box".into()));
        assert_eq!(syms[2].1.normal(), None);
    }
}
