//! Initial and target configurations for calling an entry function

use super::{ArgGenerator, GenMode};
use crate::kast::{sort, Config, Term};
use crate::smir::{Mutability, Smir, TypeId, MAIN_TY};
use crate::value;
use crate::{Error, Result};

/// Control symbol that ends a program
pub const END_PROGRAM: &str = "#EndProgram";

/// `Call` terminator invoking `ty(target)` with `local(1..=arg_count)`,
/// writing the result to `local(0)`
pub fn call_terminator(target: TypeId, arg_count: usize) -> Term {
    let operands = (1..=arg_count)
        .map(|i| Term::apply("Copy", vec![value::place(i)]))
        .collect();
    let func = Term::apply(
        "Constant",
        vec![Term::apply(
            "constOperand",
            vec![
                Term::apply("span", vec![Term::int(0)]),
                Term::constant("noUserTypeAnnotationIndex"),
                Term::apply(
                    "mirConst",
                    vec![
                        Term::constant("ZeroSized"),
                        value::ty(target),
                        Term::apply("mirConstId", vec![Term::int(0)]),
                    ],
                ),
            ],
        )],
    );
    Term::apply(
        "#execTerminator",
        vec![Term::apply(
            "terminator",
            vec![
                Term::apply(
                    "Call",
                    vec![
                        func,
                        Term::list(operands),
                        value::place(0),
                        Term::constant("noBasicBlockIdx"),
                        Term::constant("unwindActionContinue"),
                    ],
                ),
                Term::apply("span", vec![Term::int(0)]),
            ],
        )],
    )
}

/// Build the `<kmir>` configuration around a `<k>` cell and caller locals
pub fn initial_config(k: Term, locals: Vec<Term>) -> Term {
    Term::apply(
        "<kmir>",
        vec![
            Term::apply("<k>", vec![k]),
            Term::apply("<retVal>", vec![Term::constant("noReturn")]),
            Term::apply("<currentFunc>", vec![value::ty(MAIN_TY)]),
            Term::apply(
                "<currentFrame>",
                vec![
                    Term::apply("<caller>", vec![value::ty(MAIN_TY)]),
                    Term::apply("<dest>", vec![Term::apply(
                        "place",
                        vec![
                            Term::apply("local", vec![Term::int(-1)]),
                            Term::constant(".ProjectionElems"),
                        ],
                    )]),
                    Term::apply("<target>", vec![Term::constant("noBasicBlockIdx")]),
                    Term::apply("<unwind>", vec![Term::constant("unwindActionUnreachable")]),
                    Term::apply("<locals>", vec![Term::list(locals)]),
                ],
            ),
            Term::apply("<stack>", vec![Term::list(vec![])]),
        ],
    )
}

/// Target of an all-paths proof: `<k>` holds `#EndProgram`, every other
/// cell is unconstrained
pub fn target_config() -> Config {
    Config::new(Term::apply(
        "<kmir>",
        vec![
            Term::apply("<k>", vec![Term::seq(vec![Term::constant(END_PROGRAM)])]),
            Term::apply("<retVal>", vec![Term::var("RETVAL_CELL", "MaybeValue")]),
            Term::apply("<currentFunc>", vec![Term::var("CURRENTFUNC_CELL", "Ty")]),
            Term::apply(
                "<currentFrame>",
                vec![Term::var("CURRENTFRAME_CELL", "FrameCell")],
            ),
            Term::apply("<stack>", vec![Term::var("STACK_CELL", sort::LIST)]),
        ],
    ))
}

/// Initial configuration and target of a call to an entry function
#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    pub init: Config,
    pub target: Config,
    /// Function type being called
    pub entry_ty: TypeId,
}

/// Configuration calling `entry` with generated arguments
pub fn call_config(smir: &Smir, entry: &str, mode: GenMode) -> Result<CallConfig> {
    let entry_ty = *smir
        .function_tys()
        .get(entry)
        .ok_or_else(|| Error::UnknownSymbol {
            name: entry.to_string(),
        })?;
    let item = smir.function(entry).ok_or_else(|| Error::UnknownSymbol {
        name: entry.to_string(),
    })?;
    let body = match item.as_fn() {
        Some((_, Some(body))) => body,
        _ => {
            return Err(Error::InvalidOption(format!(
                "entry `{}` has no body",
                entry
            )))
        }
    };

    let args = ArgGenerator::new(smir.types(), mode).generate(body.arguments())?;

    let ret_ty = body
        .locals
        .first()
        .map(|l| l.ty)
        .ok_or_else(|| Error::malformed(format!("body of `{}` has no return local", entry)))?;
    let mut locals = vec![Term::apply(
        "newLocal",
        vec![value::ty(ret_ty), Term::constant(Mutability::Mut.label())],
    )];
    locals.extend(args.locals);

    let k = Term::seq(vec![call_terminator(entry_ty, body.arg_count)]);
    Ok(CallConfig {
        init: Config::with_constraints(initial_config(k, locals), args.constraints),
        target: target_config(),
        entry_ty,
    })
}
