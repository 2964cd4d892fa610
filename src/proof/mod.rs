//! # All-Paths Reachability Proofs
//!
//! A [`Proof`] owns a [`Kcfg`] with a fixed init node and target node. The
//! prover grows the graph from the frontier; the proof passes once no node
//! is pending or failing.
//!
//! On disk a proof lives under `{proof_dir}/{id}/` (see [`store`]).

pub mod kcfg;
pub mod store;

pub use kcfg::{Edge, Kcfg, Node, NodeId, NodeStatus, Split};
pub use store::{ProofLock, ProofStore};

use crate::kast::Config;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Why a node is failing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    /// Execution reached a call to a function without a body
    NoBody(String),
    /// No rule applies
    Stuck,
    /// The backend exceeded its time budget too often
    SmtTimeout,
    /// The backend reported an error
    BackendStep(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::NoBody(sym) => write!(f, "NoBody({})", sym),
            FailureCause::Stuck => write!(f, "Stuck"),
            FailureCause::SmtTimeout => write!(f, "SmtTimeout"),
            FailureCause::BackendStep(msg) => write!(f, "BackendStep({})", msg),
        }
    }
}

/// Overall proof status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    Pending,
    Passed,
    Failed,
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProofStatus::Pending => "pending",
            ProofStatus::Passed => "passed",
            ProofStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A reachability proof from `init` to `target`
#[derive(Debug, Clone, PartialEq)]
pub struct Proof {
    pub id: String,
    pub kcfg: Kcfg,
    pub init: NodeId,
    pub target: NodeId,
    /// Root directory the proof is persisted under, if any
    pub proof_dir: Option<PathBuf>,
}

impl Proof {
    /// Fresh proof with a pending init node and a target node
    pub fn new(
        id: impl Into<String>,
        init: Config,
        target: Config,
        proof_dir: Option<PathBuf>,
    ) -> Self {
        let mut kcfg = Kcfg::new();
        let init = kcfg.create_node(init, NodeStatus::Pending);
        let target = kcfg.create_node(target, NodeStatus::Target);
        Self {
            id: id.into(),
            kcfg,
            init,
            target,
            proof_dir,
        }
    }

    /// Pending nodes in FIFO order
    pub fn pending(&self) -> Vec<NodeId> {
        self.kcfg.pending()
    }

    /// Terminal nodes
    pub fn terminal(&self) -> Vec<NodeId> {
        self.kcfg.with_status("terminal")
    }

    /// Failing nodes with their causes
    pub fn failing(&self) -> Vec<(NodeId, FailureCause)> {
        self.kcfg
            .nodes()
            .filter_map(|n| match &n.status {
                NodeStatus::Failing { cause } => Some((n.id, cause.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn status(&self) -> ProofStatus {
        if !self.failing().is_empty() {
            ProofStatus::Failed
        } else if !self.pending().is_empty() {
            ProofStatus::Pending
        } else {
            ProofStatus::Passed
        }
    }

    pub fn passed(&self) -> bool {
        self.status() == ProofStatus::Passed
    }

    /// Nodes that may never be pruned
    pub fn protected(&self) -> [NodeId; 2] {
        [self.init, self.target]
    }

    /// Remove a node and its subtree
    pub fn prune(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let protected = self.protected();
        self.kcfg.prune(id, &protected)
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        format!(
            "Proof {}: {} ({} nodes, {} pending, {} failing, {} terminal)",
            self.id,
            self.status(),
            self.kcfg.len(),
            self.pending().len(),
            self.failing().len(),
            self.terminal().len()
        )
    }

    /// Write to `proof_dir`, if set
    pub fn write(&self) -> Result<()> {
        match &self.proof_dir {
            Some(dir) => ProofStore::new(dir).save(self),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kast::Term;

    fn proof() -> Proof {
        Proof::new(
            "t.main",
            Config::new(Term::constant("init")),
            Config::new(Term::constant("target")),
            None,
        )
    }

    #[test]
    fn test_fresh_proof_is_pending() {
        let p = proof();
        assert_eq!(p.status(), ProofStatus::Pending);
        assert_eq!(p.pending(), vec![p.init]);
        assert_eq!(p.kcfg.get(p.target).unwrap().status, NodeStatus::Target);
    }

    #[test]
    fn test_status_from_nodes() {
        let mut p = proof();
        p.kcfg.set_status(p.init, NodeStatus::Terminal).unwrap();
        assert!(p.passed());
        let n = p.kcfg.create_node(
            Config::new(Term::constant("x")),
            NodeStatus::Failing {
                cause: FailureCause::NoBody("ext".into()),
            },
        );
        assert_eq!(p.status(), ProofStatus::Failed);
        assert_eq!(p.failing(), vec![(n, FailureCause::NoBody("ext".into()))]);
    }

    #[test]
    fn test_init_and_target_are_protected() {
        let mut p = proof();
        assert!(p.prune(p.init).is_err());
        assert!(p.prune(p.target).is_err());
    }
}
