//! Terminal predicate and failure diagnosis over configurations

use crate::args::config::END_PROGRAM;
use crate::kast::{sort, Config, Term};
use crate::proof::FailureCause;

/// Thunk constructor deferring symbolic evaluation
pub const THUNK: &str = "thunk";

fn is_end(t: &Term) -> bool {
    *t == Term::constant(END_PROGRAM)
}

fn is_k_var(t: &Term) -> bool {
    match t {
        Term::Var { sort, .. } => sort.as_deref().map_or(true, |s| s == sort::K),
        _ => false,
    }
}

/// Whether the control cell holds `#EndProgram`, nothing, or
/// `#EndProgram ~> REST`
pub fn is_terminal(config: &Config) -> bool {
    match config.control() {
        Some(Term::Sequence { items }) => match items.as_slice() {
            [] => true,
            [end] => is_end(end),
            [end, rest] => is_end(end) && is_k_var(rest),
            _ => false,
        },
        Some(t) => is_end(t),
        None => false,
    }
}

/// Whether the next computation is a thunk
pub fn is_thunk(config: &Config) -> bool {
    let head = match config.control() {
        Some(Term::Sequence { items }) => items.first(),
        other => other,
    };
    head.and_then(Term::label) == Some(THUNK)
}

/// Cause for a node the backend could not advance
pub fn diagnose_stuck(config: &Config) -> FailureCause {
    let no_body = config.term.find(&|t: &Term| {
        t.label() == Some("MonoItemFn")
            && t.args().len() == 3
            && t.args()[2] == Term::constant("noBody")
    });
    match no_body.map(|item| &item.args()[0]) {
        Some(Term::Apply { label, args }) if label == "symbol" => match args.first() {
            Some(Term::Token { token, .. }) => FailureCause::NoBody(token.clone()),
            _ => FailureCause::Stuck,
        },
        _ => FailureCause::Stuck,
    }
}
