//! # KCFG
//!
//! A DAG of symbolic configurations. Node ids are assigned monotonically in
//! creation order and never reused, including after pruning.

use super::FailureCause;
use crate::kast::{Config, Term};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    /// Frontier; successors not yet computed
    Pending,
    /// Successors computed
    Expanded,
    /// Matches the terminal predicate
    Terminal,
    /// The proof goal
    Target,
    /// Subsumed by another node
    Covered { by: NodeId },
    /// No successor and not terminal
    Failing { cause: FailureCause },
}

impl NodeStatus {
    /// One-word marker used by the text renderers
    pub fn marker(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Expanded => "expanded",
            NodeStatus::Terminal => "terminal",
            NodeStatus::Target => "target",
            NodeStatus::Covered { .. } => "covered",
            NodeStatus::Failing { .. } => "failing",
        }
    }

    /// Whether the node may receive outbound edges
    fn accepts_successors(&self) -> bool {
        matches!(self, NodeStatus::Pending | NodeStatus::Expanded)
    }
}

/// A node: configuration plus status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub config: Config,
    pub status: NodeStatus,
}

/// An execution edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    /// Rewrite steps taken
    pub depth: usize,
    /// Applied rule ids, when traced
    #[serde(default)]
    pub trace: Vec<String>,
}

/// A case split under mutually exclusive conditions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub source: NodeId,
    pub targets: Vec<(NodeId, Term)>,
}

/// Control-flow graph of symbolic states
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kcfg {
    pub(crate) next_id: u64,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) splits: Vec<Split>,
}

impl Kcfg {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its fresh id
    pub fn create_node(&mut self, config: Config, status: NodeStatus) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node { id, config, status });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Node or a proof-data error
    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::InvalidOption(format!("no node {}", id)))
    }

    /// All nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Update a node's status
    pub fn set_status(&mut self, id: NodeId, status: NodeStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidOption(format!("no node {}", id)))?;
        node.status = status;
        Ok(())
    }

    fn check_link(&self, source: NodeId, target: NodeId) -> Result<()> {
        let src = self.get(source)?;
        if !src.status.accepts_successors() {
            return Err(Error::InvalidOption(format!(
                "node {} is {} and cannot have successors",
                source,
                src.status.marker()
            )));
        }
        self.get(target)?;
        Ok(())
    }

    /// Connect `source` to `target` with an execution edge
    pub fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        depth: usize,
        trace: Vec<String>,
    ) -> Result<()> {
        self.check_link(source, target)?;
        self.edges.push(Edge {
            source,
            target,
            depth,
            trace,
        });
        Ok(())
    }

    /// Record a case split of `source`
    pub fn add_split(&mut self, source: NodeId, targets: Vec<(NodeId, Term)>) -> Result<()> {
        for (target, _) in &targets {
            self.check_link(source, *target)?;
        }
        self.splits.push(Split { source, targets });
        Ok(())
    }

    /// Direct successors in creation order
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target)
            .chain(
                self.splits
                    .iter()
                    .filter(|s| s.source == id)
                    .flat_map(|s| s.targets.iter().map(|(t, _)| *t)),
            )
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Direct predecessors
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source)
            .chain(
                self.splits
                    .iter()
                    .filter(|s| s.targets.iter().any(|(t, _)| *t == id))
                    .map(|s| s.source),
            )
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Nodes with the given status marker, by id
    pub fn with_status(&self, marker: &str) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.status.marker() == marker)
            .map(|n| n.id)
            .collect()
    }

    /// Frontier in FIFO order
    pub fn pending(&self) -> Vec<NodeId> {
        self.with_status("pending")
    }

    /// `id` and every node reachable from it
    pub fn reachable(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(n) = queue.pop_front() {
            if seen.insert(n) {
                queue.extend(self.successors(n));
            }
        }
        seen
    }

    /// Remove `id` and its subtree, keeping `protected` nodes. Predecessors
    /// left without successors return to the frontier.
    pub fn prune(&mut self, id: NodeId, protected: &[NodeId]) -> Result<Vec<NodeId>> {
        if protected.contains(&id) {
            return Err(Error::InvalidOption(format!(
                "node {} cannot be pruned",
                id
            )));
        }
        self.get(id)?;

        let doomed: BTreeSet<NodeId> = self
            .reachable(id)
            .into_iter()
            .filter(|n| !protected.contains(n))
            .collect();
        let parents: BTreeSet<NodeId> = doomed
            .iter()
            .flat_map(|n| self.predecessors(*n))
            .filter(|p| !doomed.contains(p))
            .collect();

        for n in &doomed {
            self.nodes.remove(n);
        }
        self.edges
            .retain(|e| !doomed.contains(&e.source) && !doomed.contains(&e.target));
        for split in &mut self.splits {
            split.targets.retain(|(t, _)| !doomed.contains(t));
        }
        self.splits
            .retain(|s| !doomed.contains(&s.source) && !s.targets.is_empty());

        for parent in parents {
            let orphaned = self.successors(parent).is_empty();
            if let Some(node) = self.nodes.get_mut(&parent) {
                if orphaned && node.status == NodeStatus::Expanded {
                    node.status = NodeStatus::Pending;
                }
            }
        }

        Ok(doomed.into_iter().collect())
    }

    /// Mark pending nodes whose configuration equals that of an earlier,
    /// uncovered node as covered by it. Returns the newly covered nodes.
    pub fn cover_duplicates(&mut self) -> Vec<NodeId> {
        let mut first_seen: Vec<(NodeId, &Config)> = Vec::new();
        let mut covers = Vec::new();
        for node in self.nodes.values() {
            if matches!(node.status, NodeStatus::Covered { .. } | NodeStatus::Failing { .. }) {
                continue;
            }
            match first_seen.iter().find(|(_, c)| **c == node.config) {
                Some((by, _)) if node.status == NodeStatus::Pending => covers.push((node.id, *by)),
                Some(_) => {}
                None => first_seen.push((node.id, &node.config)),
            }
        }
        for (id, by) in &covers {
            if let Some(node) = self.nodes.get_mut(id) {
                node.status = NodeStatus::Covered { by: *by };
            }
        }
        covers.into_iter().map(|(id, _)| id).collect()
    }

    /// Drop subtrees hanging below covered nodes
    pub fn gc_covered(&mut self, protected: &[NodeId]) -> Vec<NodeId> {
        let covered = self.with_status("covered");
        let mut removed = Vec::new();
        for id in covered {
            for child in self.successors(id) {
                if self.nodes.contains_key(&child) {
                    if let Ok(mut gone) = self.prune(child, protected) {
                        removed.append(&mut gone);
                    }
                }
            }
        }
        removed
    }
}
