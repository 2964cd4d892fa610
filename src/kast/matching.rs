//! First-order matching and a small in-process rewriter.
//!
//! Used to evaluate generated lookup equations without the external backend
//! (tests, `info`, sanity checks on stratified tables). Only ground builtin
//! arithmetic and comparisons are evaluated in side conditions.

use super::{sort, Subst, Term};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A rewrite rule or equation `lhs => rhs requires cond`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier (also the cut-point name)
    pub label: String,
    pub lhs: Term,
    pub rhs: Term,
    /// Side condition; `None` means `true`
    #[serde(default)]
    pub requires: Option<Term>,
    /// Lower applies first
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Applies only when no other rule does
    #[serde(default)]
    pub owise: bool,
}

/// Priority of rules without an attribute
pub const DEFAULT_PRIORITY: u32 = 50;

/// Priority of `owise` rules
pub const OWISE_PRIORITY: u32 = 200;

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

impl Rule {
    /// Unconditional rule with default priority
    pub fn new(label: impl Into<String>, lhs: Term, rhs: Term) -> Self {
        Self {
            label: label.into(),
            lhs,
            rhs,
            requires: None,
            priority: DEFAULT_PRIORITY,
            owise: false,
        }
    }

    /// Add a side condition
    pub fn requires(mut self, cond: Term) -> Self {
        self.requires = Some(cond);
        self
    }

    /// Set the priority
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as fallback
    pub fn owise(mut self) -> Self {
        self.owise = true;
        self.priority = OWISE_PRIORITY;
        self
    }

    /// Apply at the root of `term`
    pub fn apply(&self, term: &Term) -> Option<Term> {
        let mut subst = Subst::new();
        if !match_term(&self.lhs, term, &mut subst) {
            return None;
        }
        if let Some(cond) = &self.requires {
            if eval_bool(&cond.substitute(&subst)) != Some(true) {
                return None;
            }
        }
        Some(self.rhs.substitute(&subst))
    }
}

fn is_builtin(s: &str) -> bool {
    s == sort::INT || s == sort::BOOL || s == sort::STRING
}

/// Match `pattern` against `subject`, extending `subst`
pub fn match_term(pattern: &Term, subject: &Term, subst: &mut Subst) -> bool {
    match pattern {
        Term::Var { name, sort } => {
            if let Some(s) = sort.as_deref().filter(|s| is_builtin(s)) {
                let ok = match subject {
                    Term::Token { sort: ts, .. } => ts == s,
                    Term::Var { sort: vs, .. } => vs.as_deref() == Some(s),
                    _ => false,
                };
                if !ok {
                    return false;
                }
            }
            if name.starts_with('_') {
                return true;
            }
            match subst.get(name) {
                Some(bound) => bound == subject,
                None => {
                    subst.insert(name.clone(), subject.clone());
                    true
                }
            }
        }
        Term::Token { .. } => pattern == subject,
        Term::Apply { label, args } => match subject {
            Term::Apply {
                label: sl,
                args: sargs,
            } if sl == label && sargs.len() == args.len() => args
                .iter()
                .zip(sargs)
                .all(|(p, s)| match_term(p, s, subst)),
            _ => false,
        },
        Term::Sequence { items } => {
            let subject_items: Vec<Term> = match subject {
                Term::Sequence { items } => items.clone(),
                other => vec![other.clone()],
            };
            let tail_var = matches!(
                items.last(),
                Some(Term::Var { sort: Some(s), .. }) if s == sort::K
            );
            if tail_var {
                let prefix = &items[..items.len() - 1];
                if subject_items.len() < prefix.len() {
                    return false;
                }
                if !prefix
                    .iter()
                    .zip(&subject_items)
                    .all(|(p, s)| match_term(p, s, subst))
                {
                    return false;
                }
                let rest = Term::seq(subject_items[prefix.len()..].to_vec());
                match_term(&items[items.len() - 1], &rest, subst)
            } else {
                items.len() == subject_items.len()
                    && items
                        .iter()
                        .zip(&subject_items)
                        .all(|(p, s)| match_term(p, s, subst))
            }
        }
    }
}

/// Evaluate a ground integer expression
pub fn eval_int(term: &Term) -> Option<i128> {
    if let Some(n) = term.as_int() {
        return Some(n);
    }
    let args = term.args();
    let bin = |f: fn(i128, i128) -> Option<i128>| -> Option<i128> {
        match args {
            [a, b] => f(eval_int(a)?, eval_int(b)?),
            _ => None,
        }
    };
    match term.label()? {
        "_+Int_" => bin(i128::checked_add),
        "_-Int_" => bin(i128::checked_sub),
        "_*Int_" => bin(i128::checked_mul),
        "_%Int_" => bin(i128::checked_rem),
        "_modInt_" => bin(i128::checked_rem_euclid),
        _ => None,
    }
}

/// Evaluate a ground boolean expression
pub fn eval_bool(term: &Term) -> Option<bool> {
    if let Some(b) = term.as_bool() {
        return Some(b);
    }
    let args = term.args();
    let cmp = |f: fn(&i128, &i128) -> bool| -> Option<bool> {
        match args {
            [a, b] => Some(f(&eval_int(a)?, &eval_int(b)?)),
            _ => None,
        }
    };
    match term.label()? {
        "_==Int_" => cmp(i128::eq),
        "_=/=Int_" => cmp(i128::ne),
        "_<=Int_" => cmp(i128::le),
        "_<Int_" => cmp(i128::lt),
        "_>=Int_" => cmp(i128::ge),
        "_>Int_" => cmp(i128::gt),
        "_andBool_" => Some(eval_bool(args.first()?)? && eval_bool(args.get(1)?)?),
        "_orBool_" => Some(eval_bool(args.first()?)? || eval_bool(args.get(1)?)?),
        "notBool_" => Some(!eval_bool(args.first()?)?),
        _ => None,
    }
}

/// Rules indexed by the root label of their left-hand side
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    by_label: HashMap<String, Vec<Rule>>,
}

impl RuleSet {
    /// Build from rules; within a label, rules are tried by ascending priority
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut by_label: HashMap<String, Vec<Rule>> = HashMap::new();
        for rule in rules {
            let key = rule.lhs.label().unwrap_or_default().to_string();
            by_label.entry(key).or_default().push(rule);
        }
        for rules in by_label.values_mut() {
            rules.sort_by_key(|r| (r.owise, r.priority));
        }
        Self { by_label }
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.by_label.values().map(Vec::len).sum()
    }

    /// True if there are no rules
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rewrite_root(&self, term: &Term) -> Option<Term> {
        let rules = self.by_label.get(term.label()?)?;
        rules.iter().find_map(|r| r.apply(term))
    }

    /// One rewrite step, outermost-leftmost
    pub fn step(&self, term: &Term) -> Option<Term> {
        if let Some(out) = self.rewrite_root(term) {
            return Some(out);
        }
        match term {
            Term::Apply { label, args } => {
                for (i, arg) in args.iter().enumerate() {
                    if let Some(new) = self.step(arg) {
                        let mut args = args.clone();
                        args[i] = new;
                        return Some(Term::Apply {
                            label: label.clone(),
                            args,
                        });
                    }
                }
                None
            }
            Term::Sequence { items } => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(new) = self.step(item) {
                        let mut items = items.clone();
                        items[i] = new;
                        return Some(Term::Sequence { items });
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Rewrite until no rule applies or `limit` steps were taken.
    ///
    /// Returns the final term and the number of steps.
    pub fn normalize(&self, term: &Term, limit: usize) -> (Term, usize) {
        let mut current = term.clone();
        let mut steps = 0;
        while steps < limit {
            match self.step(&current) {
                Some(next) => {
                    current = next;
                    steps += 1;
                }
                None => break,
            }
        }
        (current, steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_sorted_var_only_matches_tokens() {
        let mut s = Subst::new();
        assert!(match_term(&Term::var("N", sort::INT), &Term::int(4), &mut s));
        let mut s = Subst::new();
        assert!(!match_term(
            &Term::var("N", sort::INT),
            &Term::constant("x"),
            &mut s
        ));
    }

    #[test]
    fn test_sequence_tail_binding() {
        let pattern = Term::seq(vec![Term::constant("#EndProgram"), Term::var("REST", sort::K)]);
        let mut s = Subst::new();
        assert!(match_term(
            &pattern,
            &Term::seq(vec![Term::constant("#EndProgram")]),
            &mut s
        ));
        assert_eq!(s["REST"], Term::seq(vec![]));
    }

    #[test]
    fn test_owise_applies_last() {
        let n = Term::var("N", sort::INT);
        let rules = RuleSet::new(vec![
            Rule::new("f-owise", Term::apply("f", vec![n.clone()]), Term::int(0)).owise(),
            Rule::new("f-1", Term::apply("f", vec![Term::int(1)]), Term::int(10)),
        ]);
        let (out, steps) = rules.normalize(&Term::apply("f", vec![Term::int(1)]), 10);
        assert_eq!((out, steps), (Term::int(10), 1));
        let (out, _) = rules.normalize(&Term::apply("f", vec![Term::int(2)]), 10);
        assert_eq!(out, Term::int(0));
    }

    #[test]
    fn test_requires_mod_int() {
        let n = Term::var("N", sort::INT);
        let rule = Rule::new("even", Term::apply("g", vec![n.clone()]), Term::bool(true))
            .requires(Term::eq_int(
                Term::apply("_modInt_", vec![n, Term::int(2)]),
                Term::int(0),
            ));
        assert_eq!(rule.apply(&Term::apply("g", vec![Term::int(4)])), Some(Term::bool(true)));
        assert_eq!(rule.apply(&Term::apply("g", vec![Term::int(-3)])), None);
    }

    #[test]
    fn test_eval_bool_is_partial() {
        let open = Term::le_int(Term::int(0), Term::var("X", sort::INT));
        assert_eq!(eval_bool(&open), None);
        assert_eq!(
            eval_bool(&Term::and_bool(Term::bool(true), Term::lt_int(Term::int(1), Term::int(2)))),
            Some(true)
        );
    }
}
