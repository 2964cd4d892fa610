//! # Proof Advancement
//!
//! [`advance_proof`] expands pending nodes one at a time, oldest first,
//! through a backend [`Session`]:
//!
//! ```text
//! pending ──terminal predicate──▶ terminal
//!    │
//!    └──step──▶ Stuck     ─▶ failing(NoBody | Stuck)
//!               Terminal  ─▶ terminal
//!               Step(n)   ─▶ expanded, n new pending nodes
//!               Branch(n) ─▶ expanded, n new pending nodes (constrained)
//!               timeout   ─▶ retried up to the limit, then failing(SmtTimeout)
//!               error     ─▶ failing(BackendStep)
//! ```
//!
//! Every `maintenance_rate` iterations duplicate nodes are covered, covered
//! subtrees are collected and the proof is flushed to disk.

pub mod cut_points;
pub mod semantics;

pub use cut_points::BreakFlags;

use crate::backend::{Session, StepResult, Successor};
use crate::proof::{FailureCause, NodeId, NodeStatus, Proof, ProofStatus};
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Prover configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProverOptions {
    /// Stop after this many expansions
    pub max_iterations: Option<usize>,
    /// Step bound per backend call
    pub max_depth: Option<usize>,
    /// Stop at the first failing node
    pub fail_fast: bool,
    /// Expansions between maintenance passes; 0 disables them
    pub maintenance_rate: usize,
    /// Treat thunk-headed nodes as terminal
    pub terminate_on_thunk: bool,
    /// Rules the backend must pause at
    pub cut_point_rules: Vec<String>,
    /// Timeouts tolerated per node
    pub smt_retry_limit: u32,
}

impl Default for ProverOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_depth: None,
            fail_fast: false,
            maintenance_rate: 1,
            terminate_on_thunk: false,
            cut_point_rules: vec![],
            smt_retry_limit: 0,
        }
    }
}

impl ProverOptions {
    /// Options with cut points from `flags`; thunk breaking is forced when
    /// thunks terminate
    pub fn with_breaks(mut self, flags: &BreakFlags) -> Self {
        let mut flags = *flags;
        flags.on_thunk |= self.terminate_on_thunk;
        self.cut_point_rules = flags.cut_point_rules();
        self
    }
}

fn add_successor(proof: &mut Proof, source: NodeId, succ: Successor) -> Result<NodeId> {
    let id = proof.kcfg.create_node(succ.config, NodeStatus::Pending);
    proof.kcfg.add_edge(source, id, succ.depth, succ.trace)?;
    Ok(id)
}

fn fail(proof: &mut Proof, id: NodeId, cause: FailureCause) -> Result<()> {
    info!("Node {} failing: {}", id, cause);
    proof.kcfg.set_status(id, NodeStatus::Failing { cause })
}

/// Cover duplicates, collect covered subtrees and flush to disk
pub fn maintenance(proof: &mut Proof) -> Result<()> {
    let covered = proof.kcfg.cover_duplicates();
    if !covered.is_empty() {
        debug!("Covered {} duplicate nodes", covered.len());
    }
    let protected = proof.protected();
    let removed = proof.kcfg.gc_covered(&protected);
    if !removed.is_empty() {
        debug!("Collected {} nodes below covered nodes", removed.len());
    }
    proof.write()
}

/// Expand a single node
fn expand(
    proof: &mut Proof,
    session: &mut dyn Session,
    id: NodeId,
    options: &ProverOptions,
    retries: &mut BTreeMap<NodeId, u32>,
) -> Result<()> {
    let config = proof.kcfg.get(id)?.config.clone();

    if semantics::is_terminal(&config)
        || (options.terminate_on_thunk && semantics::is_thunk(&config))
    {
        debug!("Node {} terminal", id);
        return proof.kcfg.set_status(id, NodeStatus::Terminal);
    }

    let result = session.step(&config, options.max_depth, &options.cut_point_rules);
    match result {
        Ok(StepResult::Stuck) => fail(proof, id, semantics::diagnose_stuck(&config)),
        Ok(StepResult::Terminal) => proof.kcfg.set_status(id, NodeStatus::Terminal),
        Ok(StepResult::Step(successors)) => {
            if successors.is_empty()
                || (successors.len() == 1 && successors[0].config == config)
            {
                return fail(proof, id, semantics::diagnose_stuck(&config));
            }
            let n = successors.len();
            for succ in successors {
                add_successor(proof, id, succ)?;
            }
            debug!("Node {} stepped to {} successors", id, n);
            proof.kcfg.set_status(id, NodeStatus::Expanded)
        }
        Ok(StepResult::Branch(branches)) => {
            if branches.is_empty() {
                return fail(proof, id, semantics::diagnose_stuck(&config));
            }
            let mut targets = Vec::with_capacity(branches.len());
            for (condition, mut succ) in branches {
                succ.config.add_constraint(condition.clone());
                let child = proof.kcfg.create_node(succ.config, NodeStatus::Pending);
                targets.push((child, condition));
            }
            debug!("Node {} split into {} branches", id, targets.len());
            proof.kcfg.add_split(id, targets)?;
            proof.kcfg.set_status(id, NodeStatus::Expanded)
        }
        Err(Error::SmtTimeout(limit)) => {
            let count = retries.entry(id).or_insert(0);
            *count += 1;
            if *count > options.smt_retry_limit {
                fail(proof, id, FailureCause::SmtTimeout)
            } else {
                warn!(
                    "Node {} timed out after {:?} (attempt {} of {})",
                    id,
                    limit,
                    count,
                    options.smt_retry_limit + 1
                );
                Ok(())
            }
        }
        Err(Error::BackendStepFailure { message }) => {
            fail(proof, id, FailureCause::BackendStep(message))
        }
        Err(e) => Err(e),
    }
}

/// Advance `proof` until the frontier is empty, `max_iterations` is
/// reached, or (with `fail_fast`) a node fails
pub fn advance_proof(
    proof: &mut Proof,
    session: &mut dyn Session,
    options: &ProverOptions,
) -> Result<ProofStatus> {
    let mut iterations = 0usize;
    let mut retries = BTreeMap::new();

    loop {
        if options.max_iterations.is_some_and(|max| iterations >= max) {
            info!("Reached max iterations ({})", iterations);
            break;
        }
        if options.fail_fast && !proof.failing().is_empty() {
            info!("Stopping at first failing node");
            break;
        }
        let Some(id) = proof.pending().first().copied() else {
            break;
        };

        iterations += 1;
        debug!("Iteration {}: expanding node {}", iterations, id);
        expand(proof, session, id, options, &mut retries)?;

        if options.maintenance_rate > 0 && iterations % options.maintenance_rate == 0 {
            maintenance(proof)?;
        }
    }

    maintenance(proof)?;
    let status = proof.status();
    info!("{}", proof.summary());
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kast::{Config, Term};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<StepResult>>);

    impl Session for Scripted {
        fn execute(&mut self, config: &Config, _: Option<usize>) -> Result<Config> {
            Ok(config.clone())
        }
        fn step(&mut self, _: &Config, _: Option<usize>, _: &[String]) -> Result<StepResult> {
            self.0.pop_front().unwrap_or(Ok(StepResult::Stuck))
        }
        fn simplify(&mut self, config: &Config) -> Result<Config> {
            Ok(config.clone())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn k(items: Vec<Term>) -> Config {
        Config::new(Term::apply("<kmir>", vec![Term::apply("<k>", vec![Term::seq(items)])]))
    }

    fn succ(config: Config) -> Successor {
        Successor {
            config,
            trace: vec![],
            depth: 1,
        }
    }

    fn proof() -> Proof {
        Proof::new("p", k(vec![Term::constant("start")]), k(vec![]), None)
    }

    #[test]
    fn test_step_then_terminal_passes() {
        let mut p = proof();
        let mut s = Scripted(VecDeque::from([Ok(StepResult::Step(vec![succ(k(vec![
            Term::constant(crate::args::config::END_PROGRAM),
        ]))]))]));
        let status = advance_proof(&mut p, &mut s, &ProverOptions::default()).unwrap();
        assert_eq!(status, ProofStatus::Passed);
        assert_eq!(p.terminal().len(), 1);
    }

    #[test]
    fn test_timeout_retries_then_fails() {
        let mut p = proof();
        let timeout = || Err(Error::SmtTimeout(std::time::Duration::from_millis(1)));
        let mut s = Scripted(VecDeque::from([timeout(), timeout()]));
        let options = ProverOptions {
            smt_retry_limit: 1,
            ..Default::default()
        };
        assert_eq!(
            advance_proof(&mut p, &mut s, &options).unwrap(),
            ProofStatus::Failed
        );
        assert_eq!(p.failing(), vec![(p.init, FailureCause::SmtTimeout)]);
    }

    #[test]
    fn test_branch_adds_conditions() {
        let mut p = proof();
        let cond = Term::lt_int(Term::var("X", "Int"), Term::int(3));
        let mut s = Scripted(VecDeque::from([Ok(StepResult::Branch(vec![
            (cond.clone(), succ(k(vec![Term::constant("a")]))),
            (Term::not_bool(cond.clone()), succ(k(vec![Term::constant("b")]))),
        ]))]));
        let options = ProverOptions {
            max_iterations: Some(1),
            ..Default::default()
        };
        assert_eq!(
            advance_proof(&mut p, &mut s, &options).unwrap(),
            ProofStatus::Pending
        );
        let pending = p.pending();
        assert_eq!(pending.len(), 2);
        let first = p.kcfg.get(pending[0]).unwrap();
        assert_eq!(first.config.constraints, vec![cond]);
    }

    #[test]
    fn test_fail_fast_stops_early() {
        let mut p = proof();
        let mut s = Scripted(VecDeque::from([
            Ok(StepResult::Branch(vec![
                (Term::bool(true), succ(k(vec![Term::constant("a")]))),
                (Term::bool(false), succ(k(vec![Term::constant("b")]))),
            ])),
            Err(Error::step("boom")),
        ]));
        let options = ProverOptions {
            fail_fast: true,
            ..Default::default()
        };
        advance_proof(&mut p, &mut s, &options).unwrap();
        assert_eq!(p.failing().len(), 1);
        assert_eq!(p.pending().len(), 1);
    }

    #[test]
    fn test_fatal_errors_propagate() {
        let mut p = proof();
        let mut s = Scripted(VecDeque::from([Err(Error::InvalidOption("x".into()))]));
        assert!(advance_proof(&mut p, &mut s, &ProverOptions::default()).is_err());
    }

    #[test]
    fn test_terminate_on_thunk_forces_thunk_cut_point() {
        let options = ProverOptions {
            terminate_on_thunk: true,
            ..Default::default()
        }
        .with_breaks(&BreakFlags::default());
        assert_eq!(options.cut_point_rules, vec![cut_points::THUNK_RULE.to_string()]);
    }
}
