//! Modulo-`K` stratification of large lookup tables.
//!
//! `lookupX(key(N))` dispatches to `lookupX_m(N)` with `m = N modInt K`.
//! Each `lookupX_m` is a total function: one equation per entry of residue
//! `m` (priority 50) and an `owise` fallback to the table's default.

use crate::kast::matching::DEFAULT_PRIORITY;
use crate::kast::{sort, Rule, Term};

/// Default stratification modulus
pub const DEFAULT_MODULUS: usize = 10;

/// An integer-keyed lookup table to be stratified
#[derive(Debug, Clone)]
pub struct StratifiedTable {
    /// Lookup function name, e.g. `lookupTy`
    pub lookup: String,
    /// Key wrapper, e.g. `ty` in `lookupTy(ty(N))`
    pub key: String,
    /// Result sort of the lookup
    pub result_sort: String,
    /// Fallback; may mention the variable `N`
    pub default: Term,
    /// Entries in source order
    pub entries: Vec<(i64, Term)>,
    /// Number of strata
    pub modulus: usize,
}

impl StratifiedTable {
    /// Name of the lookup for residue `m`
    pub fn stratum(&self, m: usize) -> String {
        format!("{}_{}", self.lookup, m)
    }

    /// Residue class of a key
    pub fn residue(&self, key: i64) -> usize {
        key.rem_euclid(self.modulus as i64) as usize
    }

    /// Key variable shared by dispatch and fallback rules
    pub fn key_var() -> Term {
        Term::var("N", sort::INT)
    }

    /// Dispatch, entry and fallback rules
    pub fn rules(&self) -> Vec<Rule> {
        let n = Self::key_var();
        let k = self.modulus as i128;
        let mut rules = Vec::with_capacity(self.entries.len() + 2 * self.modulus);

        for m in 0..self.modulus {
            rules.push(
                Rule::new(
                    format!("{}-dispatch-{}", self.lookup, m),
                    Term::apply(
                        self.lookup.clone(),
                        vec![Term::apply(self.key.clone(), vec![n.clone()])],
                    ),
                    Term::apply(self.stratum(m), vec![n.clone()]),
                )
                .requires(Term::eq_int(
                    Term::mod_int(n.clone(), Term::int(k)),
                    Term::int(m as i128),
                ))
                .priority(DEFAULT_PRIORITY),
            );
        }

        for (key, payload) in &self.entries {
            let m = self.residue(*key);
            rules.push(
                Rule::new(
                    format!("{}-{}", self.stratum(m), key),
                    Term::apply(self.stratum(m), vec![Term::int(i128::from(*key))]),
                    payload.clone(),
                )
                .priority(DEFAULT_PRIORITY),
            );
        }

        for m in 0..self.modulus {
            rules.push(
                Rule::new(
                    format!("{}-default", self.stratum(m)),
                    Term::apply(self.stratum(m), vec![n.clone()]),
                    self.default.clone(),
                )
                .owise(),
            );
        }

        rules
    }

    /// Syntax declarations for the stratum functions
    pub fn syntax(&self) -> Vec<String> {
        (0..self.modulus)
            .map(|m| {
                format!(
                    "syntax {} ::= {}(Int) [function, total]",
                    self.result_sort,
                    self.stratum(m)
                )
            })
            .collect()
    }
}
