//! KMIR CLI
//!
//! # Commands
//!
//! - `kmir prove-rs <file>` - Prove that a function runs to completion on all paths
//! - `kmir show <id>` - Render a stored proof as a tree
//! - `kmir view <id>` - Print every node of a stored proof
//! - `kmir prune <id> <node>` - Remove a node and its subtree
//! - `kmir info <smir>` - Summarize a program DB
//! - `kmir link <smir>... -o <out>` - Link program DBs
//! - `kmir run <smir>` - Execute concretely with random arguments

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kmir::backend::{KompileOptions, SessionOptions};
use kmir::driver::{self, ShowOptions};
use kmir::proof::{NodeId, ProofStore};
use kmir::rules::DEFAULT_MODULUS;
use kmir::{BreakFlags, KBackend, ProveRsOptions, ProverOptions, Smir};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kmir")]
#[command(about = "Symbolic execution for Rust programs via Stable MIR")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Debug output
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Default)]
struct BreakArgs {
    /// Break on all function and intrinsic calls
    #[arg(long)]
    break_on_calls: bool,
    /// Break on function calls
    #[arg(long)]
    break_on_function_calls: bool,
    /// Break on intrinsic calls
    #[arg(long)]
    break_on_intrinsic_calls: bool,
    /// Break on thunk construction
    #[arg(long)]
    break_on_thunk: bool,
    /// Break after every statement
    #[arg(long)]
    break_every_statement: bool,
    /// Break on Goto terminators
    #[arg(long)]
    break_on_terminator_goto: bool,
    /// Break on SwitchInt terminators
    #[arg(long)]
    break_on_terminator_switch_int: bool,
    /// Break on Return terminators
    #[arg(long)]
    break_on_terminator_return: bool,
    /// Break on Call terminators
    #[arg(long)]
    break_on_terminator_call: bool,
    /// Break on Assert terminators
    #[arg(long)]
    break_on_terminator_assert: bool,
    /// Break on Drop terminators
    #[arg(long)]
    break_on_terminator_drop: bool,
    /// Break on Unreachable terminators
    #[arg(long)]
    break_on_terminator_unreachable: bool,
    /// Break on every terminator
    #[arg(long)]
    break_every_terminator: bool,
    /// Break on every statement and terminator
    #[arg(long)]
    break_every_step: bool,
}

impl From<&BreakArgs> for BreakFlags {
    fn from(a: &BreakArgs) -> Self {
        BreakFlags {
            on_calls: a.break_on_calls,
            on_function_calls: a.break_on_function_calls,
            on_intrinsic_calls: a.break_on_intrinsic_calls,
            on_thunk: a.break_on_thunk,
            every_statement: a.break_every_statement,
            on_terminator_goto: a.break_on_terminator_goto,
            on_terminator_switch_int: a.break_on_terminator_switch_int,
            on_terminator_return: a.break_on_terminator_return,
            on_terminator_call: a.break_on_terminator_call,
            on_terminator_assert: a.break_on_terminator_assert,
            on_terminator_drop: a.break_on_terminator_drop,
            on_terminator_unreachable: a.break_on_terminator_unreachable,
            every_terminator: a.break_every_terminator,
            every_step: a.break_every_step,
        }
    }
}

#[derive(Args)]
struct KompileArgs {
    /// Directory for compiled artifacts
    #[arg(long, default_value = "kmir-out")]
    target_dir: PathBuf,
    /// Base definition directory
    #[arg(long, env = "KMIR_DEFINITION")]
    definition_dir: Option<PathBuf>,
    /// Stratification modulus for lookup tables
    #[arg(long, default_value_t = DEFAULT_MODULUS)]
    modulus: usize,
}

impl KompileArgs {
    fn options(&self, reload: bool) -> KompileOptions {
        let mut options = KompileOptions {
            target_dir: self.target_dir.clone(),
            modulus: self.modulus,
            reload,
            ..Default::default()
        };
        if let Some(dir) = &self.definition_dir {
            options.definition_dir = dir.clone();
        }
        options
    }
}

#[derive(Args)]
struct SessionArgs {
    /// Per-call backend time budget in milliseconds (0 disables)
    #[arg(long, default_value = "300000")]
    smt_timeout: u64,
    /// Timeouts tolerated per node
    #[arg(long, default_value = "0")]
    smt_retry_limit: u32,
    /// RPC server executable
    #[arg(long, env = "KMIR_RPC_SERVER", default_value = "kore-rpc-booster")]
    server: PathBuf,
    /// Ask the backend for applied rule ids
    #[arg(long)]
    trace_rewrites: bool,
    /// Record backend traffic to this file
    #[arg(long)]
    bug_report: Option<PathBuf>,
}

impl SessionArgs {
    fn options(&self) -> SessionOptions {
        SessionOptions {
            smt_timeout: (self.smt_timeout > 0).then(|| Duration::from_millis(self.smt_timeout)),
            smt_retry_limit: self.smt_retry_limit,
            server: self.server.clone(),
            trace_rewrites: self.trace_rewrites,
            bug_report: self.bug_report.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Prove that a function runs to completion on all paths
    ProveRs {
        /// Rust source file (or SMIR JSON with --smir)
        file: PathBuf,
        /// Input is already a SMIR JSON file
        #[arg(long)]
        smir: bool,
        /// Entry function; repeat to prove several in parallel
        #[arg(long, default_value = "main")]
        start_symbol: Vec<String>,
        /// Store proofs under this directory
        #[arg(long)]
        proof_dir: Option<PathBuf>,
        /// Rebuild the proof instead of resuming it
        #[arg(long)]
        reload: bool,
        /// Keep the extracted SMIR JSON
        #[arg(long)]
        save_smir: bool,
        /// Maximum rewrite steps per backend call
        #[arg(long)]
        max_depth: Option<usize>,
        /// Maximum node expansions
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Stop at the first failing node
        #[arg(long)]
        fail_fast: bool,
        /// Expansions between proof flushes
        #[arg(long, default_value = "1")]
        maintenance_rate: usize,
        /// Treat thunks as terminal
        #[arg(long)]
        terminate_on_thunk: bool,
        /// Extra rules (JSON) for the symbolic backend
        #[arg(long)]
        add_module: Option<PathBuf>,
        /// Worker threads for several start symbols
        #[arg(long)]
        workers: Option<usize>,
        #[command(flatten)]
        breaks: BreakArgs,
        #[command(flatten)]
        kompile: KompileArgs,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Render a stored proof as a tree
    Show {
        /// Proof id
        id: String,
        #[arg(long, default_value = ".")]
        proof_dir: PathBuf,
        /// Also list pending nodes
        #[arg(long)]
        pending: bool,
        /// Also list failing nodes
        #[arg(long)]
        failing: bool,
        /// Print every node's configuration
        #[arg(long)]
        full_nodes: bool,
    },
    /// Print every node of a stored proof
    View {
        /// Proof id
        id: String,
        #[arg(long, default_value = ".")]
        proof_dir: PathBuf,
    },
    /// Remove a node and its subtree from a stored proof
    Prune {
        /// Proof id
        id: String,
        /// Node to remove
        node: u64,
        #[arg(long, default_value = ".")]
        proof_dir: PathBuf,
    },
    /// Summarize a program DB
    Info {
        /// SMIR JSON file
        smir: PathBuf,
        /// Type ids to describe
        #[arg(long, value_delimiter = ',')]
        types: Vec<i64>,
    },
    /// Link several program DBs into one
    Link {
        /// SMIR JSON files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output file
        #[arg(short, long, default_value = "linker_output.smir.json")]
        output: PathBuf,
    },
    /// Execute a function concretely with random arguments
    Run {
        /// SMIR JSON file
        smir: PathBuf,
        #[arg(long, default_value = "main")]
        start_symbol: String,
        /// Maximum rewrite steps
        #[arg(long)]
        depth: Option<usize>,
        /// Seed for argument generation
        #[arg(long, default_value = "0")]
        seed: u64,
        #[command(flatten)]
        kompile: KompileArgs,
        #[command(flatten)]
        session: SessionArgs,
    },
}

fn init_logging(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Runs a command; `Ok(false)` means a proof did not pass
fn execute(command: Commands) -> anyhow::Result<bool> {
    let backend = KBackend::default();

    match command {
        Commands::ProveRs {
            file,
            smir,
            start_symbol,
            proof_dir,
            reload,
            save_smir,
            max_depth,
            max_iterations,
            fail_fast,
            maintenance_rate,
            terminate_on_thunk,
            add_module,
            workers,
            breaks,
            kompile,
            session,
        } => {
            let mut kompile_opts = kompile.options(reload);
            kompile_opts.aux_rules = add_module;
            let opts = ProveRsOptions {
                rs_file: file,
                smir,
                start_symbol: start_symbol.first().cloned().unwrap_or_else(|| "main".into()),
                proof_dir,
                reload,
                save_smir,
                repo_root: std::env::current_dir().ok(),
                kompile: kompile_opts,
                session: session.options(),
                prover: ProverOptions {
                    max_iterations,
                    max_depth,
                    fail_fast,
                    maintenance_rate,
                    terminate_on_thunk,
                    ..Default::default()
                },
                breaks: BreakFlags::from(&breaks),
            };

            if start_symbol.len() > 1 {
                let results = driver::prove_many(&backend, &opts, &start_symbol, workers)
                    .context("failed to prove start symbols")?;
                let mut all_passed = true;
                for (symbol, result) in results {
                    match result {
                        Ok(proof) => {
                            println!("{}", proof.summary());
                            all_passed &= proof.passed();
                        }
                        Err(e) => {
                            error!("{}: {}", symbol, e);
                            all_passed = false;
                        }
                    }
                }
                return Ok(all_passed);
            }

            let proof = driver::prove_rs(&backend, &opts)
                .with_context(|| format!("failed to prove {}", opts.label()))?;
            println!("{}", proof.summary());
            for (id, cause) in proof.failing() {
                println!("  node {}: {}", id, cause);
            }
            Ok(proof.passed())
        }
        Commands::Show {
            id,
            proof_dir,
            pending,
            failing,
            full_nodes,
        } => {
            let proof = ProofStore::new(&proof_dir)
                .load(&id)
                .with_context(|| format!("failed to read proof {}", id))?;
            let options = ShowOptions {
                pending,
                failing,
                full_nodes,
            };
            print!("{}", driver::show(&proof, options));
            Ok(true)
        }
        Commands::View { id, proof_dir } => {
            let proof = ProofStore::new(&proof_dir)
                .load(&id)
                .with_context(|| format!("failed to read proof {}", id))?;
            print!("{}", driver::view(&proof));
            Ok(true)
        }
        Commands::Prune {
            id,
            node,
            proof_dir,
        } => {
            let removed = driver::prune(&proof_dir, &id, NodeId(node))
                .with_context(|| format!("failed to prune node {} of {}", node, id))?;
            let removed: Vec<u64> = removed.iter().map(|n| n.0).collect();
            println!("Pruned nodes: {:?}", removed);
            Ok(true)
        }
        Commands::Info { smir, types } => {
            let db = Smir::from_file(&smir)
                .with_context(|| format!("failed to load {}", smir.display()))?;
            print!("{}", driver::info(&db, &types));
            Ok(true)
        }
        Commands::Link { inputs, output } => {
            driver::link_files(&inputs, &output).context("failed to link program DBs")?;
            println!("Wrote {}", output.display());
            Ok(true)
        }
        Commands::Run {
            smir,
            start_symbol,
            depth,
            seed,
            kompile,
            session,
        } => {
            let db = Smir::from_file(&smir)
                .with_context(|| format!("failed to load {}", smir.display()))?;
            let result = driver::run(
                &backend,
                &db,
                &start_symbol,
                depth,
                seed,
                &kompile.options(false),
                &session.options(),
            )
            .with_context(|| format!("failed to run {}", start_symbol))?;
            println!("{}", result.term);
            for c in &result.constraints {
                println!("#And {}", c);
            }
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);
    debug!("kmir {}", kmir::VERSION);

    match execute(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
