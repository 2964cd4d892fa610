//! On-disk proof layout
//!
//! ```text
//! {proof_dir}/{id}/
//!   proof.json        metadata and node statuses
//!   nodes/{n}.json    one configuration per node
//!   edges.json        edges and splits
//!   smir.json         reduced program DB (optional)
//!   digest.json       backend cache key (optional)
//!   .lock             present while a writer advances the proof
//! ```
//!
//! Every file is written to a temporary name and renamed into place;
//! `proof.json` is written last.

use super::kcfg::{Edge, Kcfg, Node, NodeId, NodeStatus, Split};
use super::{Proof, ProofStatus};
use crate::backend::kompile::write_atomic;
use crate::kast::Config;
use crate::smir::Smir;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PROOF_FILE: &str = "proof.json";
const EDGES_FILE: &str = "edges.json";
const NODES_DIR: &str = "nodes";
const SMIR_FILE: &str = "smir.json";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Serialize, Deserialize)]
struct NodeEntry {
    id: NodeId,
    state: NodeStatus,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProofMeta {
    id: String,
    init: NodeId,
    target: NodeId,
    status: ProofStatus,
    next_id: u64,
    nodes: Vec<NodeEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EdgesFile {
    edges: Vec<Edge>,
    #[serde(default)]
    splits: Vec<Split>,
}

/// Proof persistence rooted at a proof directory
#[derive(Debug, Clone)]
pub struct ProofStore {
    root: PathBuf,
}

impl ProofStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of proof `id`
    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Whether proof data for `id` exists
    pub fn exists(&self, id: &str) -> bool {
        self.dir(id).join(PROOF_FILE).is_file()
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        write_atomic(path, &serde_json::to_vec_pretty(value)?)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
        let text = fs::read_to_string(path).map_err(|e| Error::ProofData {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::ProofData {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Persist a proof
    pub fn save(&self, proof: &Proof) -> Result<()> {
        let dir = self.dir(&proof.id);
        let nodes_dir = dir.join(NODES_DIR);
        fs::create_dir_all(&nodes_dir).map_err(|e| Error::io(&nodes_dir, e))?;

        let mut live = BTreeSet::new();
        for node in proof.kcfg.nodes() {
            let path = nodes_dir.join(format!("{}.json", node.id));
            Self::write_json(&path, &node.config)?;
            live.insert(path);
        }
        // Nodes removed by pruning
        let entries = fs::read_dir(&nodes_dir).map_err(|e| Error::io(&nodes_dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !live.contains(&path) {
                fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
            }
        }

        Self::write_json(
            &dir.join(EDGES_FILE),
            &EdgesFile {
                edges: proof.kcfg.edges.clone(),
                splits: proof.kcfg.splits.clone(),
            },
        )?;

        let meta = ProofMeta {
            id: proof.id.clone(),
            init: proof.init,
            target: proof.target,
            status: proof.status(),
            next_id: proof.kcfg.next_id,
            nodes: proof
                .kcfg
                .nodes()
                .map(|n| NodeEntry {
                    id: n.id,
                    state: n.status.clone(),
                })
                .collect(),
        };
        Self::write_json(&dir.join(PROOF_FILE), &meta)?;
        debug!("Wrote proof {} ({} nodes)", proof.id, proof.kcfg.len());
        Ok(())
    }

    /// Read proof `id`
    pub fn load(&self, id: &str) -> Result<Proof> {
        let dir = self.dir(id);
        let meta: ProofMeta = Self::read_json(&dir.join(PROOF_FILE))?;
        let edges: EdgesFile = Self::read_json(&dir.join(EDGES_FILE))?;

        let mut kcfg = Kcfg {
            next_id: meta.next_id,
            ..Default::default()
        };
        for entry in meta.nodes {
            let config: Config =
                Self::read_json(&dir.join(NODES_DIR).join(format!("{}.json", entry.id)))?;
            if entry.id.0 >= meta.next_id {
                return Err(Error::ProofData {
                    path: dir.join(PROOF_FILE),
                    reason: format!("node {} not below next id {}", entry.id, meta.next_id),
                });
            }
            kcfg.nodes.insert(
                entry.id,
                Node {
                    id: entry.id,
                    config,
                    status: entry.state,
                },
            );
        }
        for id in [meta.init, meta.target] {
            if kcfg.node(id).is_none() {
                return Err(Error::ProofData {
                    path: dir.join(PROOF_FILE),
                    reason: format!("missing node {}", id),
                });
            }
        }
        kcfg.edges = edges.edges;
        kcfg.splits = edges.splits;

        Ok(Proof {
            id: meta.id,
            kcfg,
            init: meta.init,
            target: meta.target,
            proof_dir: Some(self.root.clone()),
        })
    }

    /// Store the reduced program DB next to the proof
    pub fn save_smir(&self, id: &str, smir: &Smir) -> Result<()> {
        let dir = self.dir(id);
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        smir.dump(&dir.join(SMIR_FILE))
    }

    /// The stored program DB
    pub fn load_smir(&self, id: &str) -> Result<Smir> {
        let path = self.dir(id).join(SMIR_FILE);
        if !path.is_file() {
            return Err(Error::ProofData {
                path,
                reason: "no stored program DB".into(),
            });
        }
        Smir::from_file(&path)
    }

    /// Take the single-writer lock of proof `id`.
    ///
    /// A lock left behind by a process that is no longer running is
    /// removed and taken over.
    pub fn lock(&self, id: &str) -> Result<ProofLock> {
        let dir = self.dir(id);
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        let path = dir.join(LOCK_FILE);
        let mut reclaimed = false;
        let mut file = loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => break f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if reclaimed || holder_alive(&path) {
                        return Err(Error::ProofLocked { id: id.to_string() });
                    }
                    warn!("Removing stale lock {}", path.display());
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(Error::io(&path, e)),
                    }
                    reclaimed = true;
                }
                Err(e) => return Err(Error::io(&path, e)),
            }
        };
        let lock = ProofLock { path };
        writeln!(file, "{}", std::process::id()).map_err(|e| Error::io(&lock.path, e))?;
        Ok(lock)
    }
}

/// Whether the process recorded in a lock file is still running.
///
/// An empty file belongs to a writer that has not recorded its id yet.
fn holder_alive(path: &Path) -> bool {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return e.kind() != std::io::ErrorKind::NotFound,
    };
    let text = text.trim();
    if text.is_empty() {
        return true;
    }
    match text.parse::<u32>() {
        Ok(pid) => process_alive(pid),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Held while a proof is advanced; removes the lock file when dropped
#[derive(Debug)]
pub struct ProofLock {
    path: PathBuf,
}

impl Drop for ProofLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}
