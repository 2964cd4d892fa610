//! # Driver
//!
//! End-to-end operations behind the `kmir` sub-commands:
//!
//! - [`prove_rs`]: extract or load a program DB, reduce it to the start
//!   symbol, kompile, and advance an all-paths proof (resuming from disk
//!   unless `reload` is set)
//! - [`prove_many`]: the same for several start symbols on a rayon pool
//! - [`run`]: concrete execution with random arguments
//! - [`show`], [`view`], [`prune`], [`info`], [`link_files`]: proof and
//!   program DB inspection

use crate::args::{call_config, GenMode};
use crate::backend::{
    self, extractor, with_session, Backend, KompileOptions, SessionMode, SessionOptions,
};
use crate::kast::Config;
use crate::proof::{NodeId, NodeStatus, Proof, ProofStore};
use crate::prover::{self, BreakFlags, ProverOptions};
use crate::smir::{linker, Smir, TypeId};
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything `prove-rs` needs
#[derive(Debug, Clone, PartialEq)]
pub struct ProveRsOptions {
    /// Rust source file, or SMIR JSON with `smir`
    pub rs_file: PathBuf,
    /// Treat `rs_file` as an already extracted program DB
    pub smir: bool,
    pub start_symbol: String,
    /// Persist proofs under this directory
    pub proof_dir: Option<PathBuf>,
    /// Rebuild instead of resuming
    pub reload: bool,
    /// Keep the extractor's JSON output
    pub save_smir: bool,
    /// Root searched for an in-tree extractor
    pub repo_root: Option<PathBuf>,
    pub kompile: KompileOptions,
    pub session: SessionOptions,
    pub prover: ProverOptions,
    pub breaks: BreakFlags,
}

impl Default for ProveRsOptions {
    fn default() -> Self {
        Self {
            rs_file: PathBuf::new(),
            smir: false,
            start_symbol: "main".to_string(),
            proof_dir: None,
            reload: false,
            save_smir: false,
            repo_root: None,
            kompile: KompileOptions::default(),
            session: SessionOptions::default(),
            prover: ProverOptions::default(),
            breaks: BreakFlags::default(),
        }
    }
}

impl ProveRsOptions {
    /// Proof id: `<file stem>.<start symbol>`
    pub fn label(&self) -> String {
        let stem = self
            .rs_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("proof");
        let stem = stem.strip_suffix(".smir").unwrap_or(stem);
        format!("{}.{}", stem, self.start_symbol)
    }
}

/// Program DB named by the options
pub fn load_program(opts: &ProveRsOptions) -> Result<Smir> {
    if !opts.rs_file.is_file() {
        return Err(Error::InvalidOption(format!(
            "Input file does not exist: {}",
            opts.rs_file.display()
        )));
    }
    if opts.smir {
        return Smir::from_file(&opts.rs_file);
    }
    let tool = extractor::find_extractor(opts.repo_root.as_deref())?;
    let work_dir = opts
        .rs_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    extractor::extract(&tool, &opts.rs_file, work_dir, opts.save_smir)
}

/// Reduce `program` and build a fresh proof for the start symbol
pub fn initial_proof(program: &Smir, opts: &ProveRsOptions) -> Result<(Proof, Smir)> {
    let smir = program.reduce_to(&[opts.start_symbol.as_str()])?;

    let missing = smir.missing_bodies();
    info!("Reduced items table size {}", smir.items().len());
    if !missing.is_empty() {
        info!("missing-bodies-present=true count={}", missing.len());
        debug!(
            "Missing-body function symbols (first 5): {:?}",
            &missing[..missing.len().min(5)]
        );
    }

    let call = call_config(&smir, &opts.start_symbol, GenMode::Symbolic)?;
    let proof = Proof::new(opts.label(), call.init, call.target, opts.proof_dir.clone());
    Ok((proof, smir))
}

fn prove_label(
    backend: &dyn Backend,
    opts: &ProveRsOptions,
    load: &dyn Fn() -> Result<Smir>,
) -> Result<Proof> {
    let label = opts.label();
    let store = opts.proof_dir.as_ref().map(ProofStore::new);
    let _lock = match &store {
        Some(store) => Some(store.lock(&label)?),
        None => None,
    };

    let (mut proof, smir) = match &store {
        Some(store) if !opts.reload && store.exists(&label) => {
            info!("Reading proof from disk: {}", store.dir(&label).display());
            (store.load(&label)?, store.load_smir(&label)?)
        }
        _ => {
            info!("Constructing initial proof: {}", label);
            let (proof, smir) = initial_proof(&load()?, opts)?;
            if let Some(store) = &store {
                store.save_smir(&label, &smir)?;
                store.save(&proof)?;
            }
            (proof, smir)
        }
    };

    if proof.passed() {
        return Ok(proof);
    }

    let mut kompile_opts = opts.kompile.clone();
    kompile_opts.symbolic = true;
    if let Some(store) = &store {
        kompile_opts.target_dir = store.dir(&label);
    }
    let kompiled = backend::kompile(&smir, backend, &kompile_opts)?;
    let artifact = kompiled
        .artifact(SessionMode::Symbolic)
        .cloned()
        .ok_or_else(|| Error::compile("no symbolic artifact produced"))?;

    let mut prover_opts = opts.prover.clone().with_breaks(&opts.breaks);
    prover_opts.smt_retry_limit = opts.session.smt_retry_limit;

    with_session(backend, &artifact, &opts.session, |session| {
        prover::advance_proof(&mut proof, session, &prover_opts)
    })?;
    Ok(proof)
}

/// Prove that the start symbol runs to `#EndProgram` on all paths
pub fn prove_rs(backend: &dyn Backend, opts: &ProveRsOptions) -> Result<Proof> {
    prove_label(backend, opts, &|| load_program(opts))
}

/// [`prove_rs`] for several start symbols in parallel. The program DB is
/// loaded once; each proof gets its own session and artifact directory.
pub fn prove_many(
    backend: &dyn Backend,
    opts: &ProveRsOptions,
    symbols: &[String],
    workers: Option<usize>,
) -> Result<Vec<(String, Result<Proof>)>> {
    let workers = workers.unwrap_or_else(num_cpus::get);
    if workers == 0 {
        return Err(Error::InvalidOption(
            "expected a positive number of workers".into(),
        ));
    }
    let program = load_program(opts)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::InvalidOption(format!("thread pool: {}", e)))?;

    info!("Proving {} symbols on {} workers", symbols.len(), workers);
    Ok(pool.install(|| {
        symbols
            .par_iter()
            .map(|symbol| {
                let mut o = opts.clone();
                o.start_symbol = symbol.clone();
                if o.proof_dir.is_none() {
                    o.kompile.target_dir = opts.kompile.target_dir.join(symbol);
                }
                let result = prove_label(backend, &o, &|| Ok(program.clone()));
                (symbol.clone(), result)
            })
            .collect()
    }))
}

/// Run `start_symbol` concretely with arguments drawn from `seed`
pub fn run(
    backend: &dyn Backend,
    smir: &Smir,
    start_symbol: &str,
    depth: Option<usize>,
    seed: u64,
    kompile_opts: &KompileOptions,
    session: &SessionOptions,
) -> Result<Config> {
    let reduced = smir.reduce_to(&[start_symbol])?;
    let call = call_config(&reduced, start_symbol, GenMode::Random(seed))?;

    let mut kompile_opts = kompile_opts.clone();
    kompile_opts.concrete = true;
    kompile_opts.symbolic = false;
    let kompiled = backend::kompile(&reduced, backend, &kompile_opts)?;
    let artifact = kompiled
        .artifact(SessionMode::Concrete)
        .cloned()
        .ok_or_else(|| Error::compile("no concrete artifact produced"))?;

    with_session(backend, &artifact, session, |s| s.execute(&call.init, depth))
}

/// What `show` prints besides the tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShowOptions {
    pub pending: bool,
    pub failing: bool,
    /// Print every node's configuration
    pub full_nodes: bool,
}

fn node_line(proof: &Proof, id: NodeId) -> String {
    let Some(node) = proof.kcfg.node(id) else {
        return format!("{} (missing)", id);
    };
    let mut line = format!("{} [{}]", id, node.status.marker());
    if id == proof.init {
        line.push_str(" init");
    }
    match &node.status {
        NodeStatus::Covered { by } => {
            let _ = write!(line, " by {}", by);
        }
        NodeStatus::Failing { cause } => {
            let _ = write!(line, " {}", cause);
        }
        _ => {}
    }
    line
}

fn show_tree(
    proof: &Proof,
    id: NodeId,
    indent: usize,
    seen: &mut BTreeSet<NodeId>,
    out: &mut String,
) {
    let pad = "  ".repeat(indent);
    if !seen.insert(id) {
        let _ = writeln!(out, "{}{} (see above)", pad, id);
        return;
    }
    let _ = writeln!(out, "{}{}", pad, node_line(proof, id));

    let kcfg = &proof.kcfg;
    for edge in kcfg.edges().iter().filter(|e| e.source == id) {
        let _ = writeln!(out, "{}  | {} steps", pad, edge.depth);
        show_tree(proof, edge.target, indent + 1, seen, out);
    }
    for split in kcfg.splits().iter().filter(|s| s.source == id) {
        for (target, condition) in &split.targets {
            let _ = writeln!(out, "{}  ? {}", pad, condition);
            show_tree(proof, *target, indent + 1, seen, out);
        }
    }
}

fn show_config(out: &mut String, proof: &Proof, id: NodeId) {
    if let Some(node) = proof.kcfg.node(id) {
        let _ = writeln!(out, "Node {} [{}]", id, node.status.marker());
        let _ = writeln!(out, "  {}", node.config.term);
        for c in &node.config.constraints {
            let _ = writeln!(out, "  #And {}", c);
        }
    }
}

/// Text rendering of a proof's KCFG
pub fn show(proof: &Proof, options: ShowOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", proof.summary());
    let _ = writeln!(out);

    let mut seen = BTreeSet::new();
    show_tree(proof, proof.init, 0, &mut seen, &mut out);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", node_line(proof, proof.target));

    let detached: Vec<NodeId> = proof
        .kcfg
        .nodes()
        .map(|n| n.id)
        .filter(|id| !seen.contains(id) && *id != proof.target)
        .collect();
    for id in detached {
        let _ = writeln!(out, "{}", node_line(proof, id));
    }

    if options.pending {
        let _ = writeln!(out, "\nPending nodes: {:?}", ids(&proof.pending()));
    }
    if options.failing {
        let _ = writeln!(out, "\nFailing nodes:");
        for (id, cause) in proof.failing() {
            let _ = writeln!(out, "  {}: {}", id, cause);
        }
    }
    if options.full_nodes {
        let _ = writeln!(out);
        for node in proof.kcfg.nodes() {
            show_config(&mut out, proof, node.id);
        }
    }
    out
}

fn ids(nodes: &[NodeId]) -> Vec<u64> {
    nodes.iter().map(|n| n.0).collect()
}

/// Every node with its configuration
pub fn view(proof: &Proof) -> String {
    let mut out = String::new();
    for node in proof.kcfg.nodes() {
        show_config(&mut out, proof, node.id);
        let succ = proof.kcfg.successors(node.id);
        if !succ.is_empty() {
            let _ = writeln!(out, "  -> {:?}", ids(&succ));
        }
    }
    out
}

/// Remove a node and its subtree from a stored proof
pub fn prune(proof_dir: &Path, id: &str, node: NodeId) -> Result<Vec<NodeId>> {
    let store = ProofStore::new(proof_dir);
    let _lock = store.lock(id)?;
    let mut proof = store.load(id)?;
    let removed = proof.prune(node)?;
    store.save(&proof)?;
    info!("Pruned nodes {:?} from {}", ids(&removed), id);
    Ok(removed)
}

/// Program DB summary, optionally with selected type entries
pub fn info(smir: &Smir, types: &[i64]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "name:      {}", smir.name());
    let _ = writeln!(out, "crate_id:  {}", smir.crate_id());
    let _ = writeln!(out, "items:     {}", smir.items().len());
    let _ = writeln!(out, "functions: {}", smir.functions().len());
    let _ = writeln!(out, "types:     {}", smir.types().len());
    let _ = writeln!(out, "allocs:    {}", smir.allocs().len());
    let missing = smir.missing_bodies();
    if !missing.is_empty() {
        let _ = writeln!(out, "missing bodies: {}", missing.join(", "));
    }
    for id in types {
        match smir.types().get(TypeId(*id)) {
            Some(info) => {
                let _ = writeln!(out, "type {}: {}", id, info.describe());
            }
            None => {
                let _ = writeln!(out, "type {}: unknown", id);
            }
        }
    }
    out
}

/// Link program DB files into one and write it to `output`
pub fn link_files(inputs: &[PathBuf], output: &Path) -> Result<Smir> {
    let dbs = inputs
        .iter()
        .map(|p| Smir::from_file(p))
        .collect::<Result<Vec<_>>>()?;
    let linked = linker::link(&dbs)?;
    linked.dump(output)?;
    info!(
        "Linked {} program DBs into {} ({} types)",
        dbs.len(),
        output.display(),
        linked.types().len()
    );
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kast::Term;
    use crate::proof::FailureCause;

    #[test]
    fn test_label_strips_smir_suffix() {
        let opts = ProveRsOptions {
            rs_file: PathBuf::from("dir/arith.smir.json"),
            start_symbol: "add".into(),
            ..Default::default()
        };
        assert_eq!(opts.label(), "arith.add");
    }

    #[test]
    fn test_show_marks_statuses() {
        let mut p = Proof::new(
            "t.main",
            Config::new(Term::constant("i")),
            Config::new(Term::constant("t")),
            None,
        );
        let a = p
            .kcfg
            .create_node(Config::new(Term::constant("a")), NodeStatus::Pending);
        p.kcfg.add_edge(p.init, a, 4, vec![]).unwrap();
        p.kcfg.set_status(p.init, NodeStatus::Expanded).unwrap();
        p.kcfg
            .set_status(
                a,
                NodeStatus::Failing {
                    cause: FailureCause::NoBody("f".into()),
                },
            )
            .unwrap();
        let text = show(
            &p,
            ShowOptions {
                failing: true,
                ..Default::default()
            },
        );
        assert!(text.contains("0 [expanded] init"));
        assert!(text.contains("  | 4 steps"));
        assert!(text.contains("  2 [failing] NoBody(f)"));
        assert!(text.contains("1 [target]"));
        assert!(text.contains("Failing nodes:\n  2: NoBody(f)"));
    }

    #[test]
    fn test_missing_input_file() {
        let opts = ProveRsOptions {
            rs_file: PathBuf::from("/nonexistent/x.rs"),
            ..Default::default()
        };
        assert!(matches!(load_program(&opts), Err(Error::InvalidOption(_))));
    }
}
