//! # Terms and Symbolic Configurations
//!
//! A small KAST-style term language shared by argument generation, rule
//! synthesis, the backend protocol and the proof object.
//!
//! ```text
//! Term ::= label(Term, ...)      Apply
//!        | NAME:Sort             Var
//!        | "token":Sort          Token
//!        | Term ~> Term ~> ...   Sequence
//! ```
//!
//! A [`Config`] pairs a term with its path constraints and stands for every
//! concrete state that satisfies them.

pub mod json;
pub mod matching;

pub use matching::{Rule, RuleSet};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Well-known sorts
pub mod sort {
    /// Unbounded integers
    pub const INT: &str = "Int";
    /// Booleans
    pub const BOOL: &str = "Bool";
    /// Strings
    pub const STRING: &str = "String";
    /// Computation sequences
    pub const K: &str = "K";
    /// K lists
    pub const LIST: &str = "List";
    /// Runtime values
    pub const VALUE: &str = "Value";
}

/// A term of the object language
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum Term {
    /// Constructor or function application
    #[serde(rename = "KApply")]
    Apply {
        /// Production label
        label: String,
        /// Arguments in order
        args: Vec<Term>,
    },
    /// Logical variable
    #[serde(rename = "KVariable")]
    Var {
        /// Variable name
        name: String,
        /// Optional sort annotation
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sort: Option<String>,
    },
    /// Literal token of a builtin sort
    #[serde(rename = "KToken")]
    Token {
        /// Token text (strings unquoted)
        token: String,
        /// Sort of the token
        sort: String,
    },
    /// Computation sequence (`~>`); empty means `.K`
    #[serde(rename = "KSequence")]
    Sequence {
        /// Items in execution order
        items: Vec<Term>,
    },
}

impl Term {
    /// Application of `label` to `args`
    pub fn apply(label: impl Into<String>, args: Vec<Term>) -> Self {
        Term::Apply {
            label: label.into(),
            args,
        }
    }

    /// Nullary constructor
    pub fn constant(label: impl Into<String>) -> Self {
        Term::apply(label, vec![])
    }

    /// Variable with a sort
    pub fn var(name: impl Into<String>, sort: &str) -> Self {
        Term::Var {
            name: name.into(),
            sort: Some(sort.to_string()),
        }
    }

    /// Integer token
    pub fn int(value: i128) -> Self {
        Term::Token {
            token: value.to_string(),
            sort: sort::INT.to_string(),
        }
    }

    /// Integer token for values beyond `i128` (e.g. `u128::MAX`)
    pub fn uint(value: u128) -> Self {
        Term::Token {
            token: value.to_string(),
            sort: sort::INT.to_string(),
        }
    }

    /// Boolean token
    pub fn bool(value: bool) -> Self {
        Term::Token {
            token: value.to_string(),
            sort: sort::BOOL.to_string(),
        }
    }

    /// String token
    pub fn string(value: impl Into<String>) -> Self {
        Term::Token {
            token: value.into(),
            sort: sort::STRING.to_string(),
        }
    }

    /// K sequence
    pub fn seq(items: Vec<Term>) -> Self {
        Term::Sequence { items }
    }

    /// List of terms
    pub fn list(items: Vec<Term>) -> Self {
        Term::apply("list", items)
    }

    /// `a <=Int b`
    pub fn le_int(a: Term, b: Term) -> Self {
        Term::apply("_<=Int_", vec![a, b])
    }

    /// `a <Int b`
    pub fn lt_int(a: Term, b: Term) -> Self {
        Term::apply("_<Int_", vec![a, b])
    }

    /// `a ==Int b`
    pub fn eq_int(a: Term, b: Term) -> Self {
        Term::apply("_==Int_", vec![a, b])
    }

    /// `a modInt b`
    pub fn mod_int(a: Term, b: Term) -> Self {
        Term::apply("_modInt_", vec![a, b])
    }

    /// `a andBool b`
    pub fn and_bool(a: Term, b: Term) -> Self {
        Term::apply("_andBool_", vec![a, b])
    }

    /// `notBool a`
    pub fn not_bool(a: Term) -> Self {
        Term::apply("notBool_", vec![a])
    }

    /// Production label, if this is an application
    pub fn label(&self) -> Option<&str> {
        match self {
            Term::Apply { label, .. } => Some(label),
            _ => None,
        }
    }

    /// Arguments of an application (empty for other nodes)
    pub fn args(&self) -> &[Term] {
        match self {
            Term::Apply { args, .. } => args,
            _ => &[],
        }
    }

    /// Integer value of an `Int` token
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Term::Token { token, sort } if sort == sort::INT => token.parse().ok(),
            _ => None,
        }
    }

    /// Boolean value of a `Bool` token
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Term::Token { token, sort } if sort == sort::BOOL => token.parse().ok(),
            _ => None,
        }
    }

    /// Variable names occurring in the term, sorted
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Term::Var { name, .. } => {
                out.insert(name.clone());
            }
            Term::Apply { args, .. } => args.iter().for_each(|a| a.collect_vars(out)),
            Term::Sequence { items } => items.iter().for_each(|a| a.collect_vars(out)),
            Term::Token { .. } => {}
        }
    }

    /// Replace variables bound in `subst`
    pub fn substitute(&self, subst: &Subst) -> Term {
        match self {
            Term::Var { name, .. } => subst.get(name).cloned().unwrap_or_else(|| self.clone()),
            Term::Apply { label, args } => Term::Apply {
                label: label.clone(),
                args: args.iter().map(|a| a.substitute(subst)).collect(),
            },
            Term::Sequence { items } => {
                // Substituted sequences are flattened so `X ~> Y` with
                // `X := (a ~> b)` stays a single sequence.
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item.substitute(subst) {
                        Term::Sequence { items } => flat.extend(items),
                        other => flat.push(other),
                    }
                }
                Term::Sequence { items: flat }
            }
            Term::Token { .. } => self.clone(),
        }
    }

    /// Pre-order search for the first sub-term satisfying `pred`
    pub fn find(&self, pred: &dyn Fn(&Term) -> bool) -> Option<&Term> {
        if pred(self) {
            return Some(self);
        }
        let children: &[Term] = match self {
            Term::Apply { args, .. } => args,
            Term::Sequence { items } => items,
            _ => &[],
        };
        children.iter().find_map(|c| c.find(pred))
    }

    /// The argument of the first cell labelled `cell` (e.g. `<k>`)
    pub fn cell(&self, cell: &str) -> Option<&Term> {
        self.find(&|t| t.label() == Some(cell))
            .and_then(|t| t.args().first())
    }

    /// Copy of the term with the first `cell` argument replaced
    pub fn with_cell(&self, cell: &str, value: Term) -> Term {
        fn go(t: &Term, cell: &str, value: &Term, done: &mut bool) -> Term {
            if *done {
                return t.clone();
            }
            match t {
                Term::Apply { label, .. } if label == cell => {
                    *done = true;
                    Term::apply(label.clone(), vec![value.clone()])
                }
                Term::Apply { label, args } => Term::Apply {
                    label: label.clone(),
                    args: args.iter().map(|a| go(a, cell, value, done)).collect(),
                },
                Term::Sequence { items } => Term::Sequence {
                    items: items.iter().map(|a| go(a, cell, value, done)).collect(),
                },
                _ => t.clone(),
            }
        }
        let mut done = false;
        go(self, cell, &value, &mut done)
    }
}

/// Variable substitution
pub type Subst = BTreeMap<String, Term>;

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Apply { label, args } if args.is_empty() => write!(f, "{}", label),
            Term::Apply { label, args } => {
                // Binary infix labels `_op_` print infix
                if args.len() == 2 && label.starts_with('_') && label.ends_with('_') {
                    let op = &label[1..label.len() - 1];
                    return write!(f, "( {} {} {} )", args[0], op, args[1]);
                }
                write!(f, "{}(", label)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Term::Var { name, sort: Some(s) } => write!(f, "{}:{}", name, s),
            Term::Var { name, sort: None } => write!(f, "{}", name),
            Term::Token { token, sort } if sort == sort::STRING => write!(f, "{:?}", token),
            Term::Token { token, .. } => write!(f, "{}", token),
            Term::Sequence { items } if items.is_empty() => write!(f, ".K"),
            Term::Sequence { items } => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ~> ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

/// A symbolic configuration: a term plus path constraints
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Config {
    /// The configuration term
    pub term: Term,
    /// Boolean constraints over the term's variables
    #[serde(default)]
    pub constraints: Vec<Term>,
}

impl Config {
    /// Unconstrained configuration
    pub fn new(term: Term) -> Self {
        Self {
            term,
            constraints: vec![],
        }
    }

    /// Configuration with constraints
    pub fn with_constraints(term: Term, constraints: Vec<Term>) -> Self {
        Self { term, constraints }
    }

    /// Add a constraint unless it is already present
    pub fn add_constraint(&mut self, constraint: Term) {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
    }

    /// The control (`<k>`) cell contents
    pub fn control(&self) -> Option<&Term> {
        self.term.cell("<k>")
    }
}

/// Fresh variable supply with per-prefix counters
#[derive(Debug, Default, Clone)]
pub struct FreshVars {
    counters: BTreeMap<String, usize>,
}

impl FreshVars {
    /// Create an empty supply
    pub fn new() -> Self {
        Self::default()
    }

    /// Next fresh variable `PREFIX<n>` of the given sort
    pub fn fresh(&mut self, prefix: &str, sort: &str) -> Term {
        let n = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{}{}", prefix, n);
        *n += 1;
        Term::var(name, sort)
    }
}
