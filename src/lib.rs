//! # KMIR - Symbolic Execution for Stable MIR
//!
//! Drives all-paths reachability proofs for Rust programs lowered to Stable
//! MIR JSON by an external extractor, using an external term-rewriting
//! backend for the actual execution.
//!
//! ## Pipeline
//!
//! ```text
//! *.rs ──extractor──▶ Smir ──reduce_to──▶ Smir (slice)
//!                                          │
//!                     ┌────────────────────┼────────────────────┐
//!                     ▼                                         ▼
//!              args::call_config                        rules::synthesize
//!            (symbolic init config)                  (stratified lookups)
//!                     │                                         │
//!                     ▼                                         ▼
//!                  Proof ◀──prover::advance_proof── Session ◀─ kompile
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use kmir::smir::Smir;
//! use serde_json::json;
//!
//! # fn main() -> kmir::Result<()> {
//! let smir = Smir::load(json!({
//!     "name": "demo",
//!     "crate_id": 0,
//!     "allocs": [],
//!     "functions": [],
//!     "types": [],
//!     "items": [{
//!         "symbol_name": "_ZN4demo4main",
//!         "mono_item_kind": {"MonoItemFn": {"name": "main", "id": 1, "body": null}}
//!     }]
//! }))?;
//!
//! let reduced = smir.reduce_to(&["main"])?;
//! assert_eq!(reduced.items().len(), 1);
//! assert_eq!(reduced.missing_bodies(), vec!["_ZN4demo4main"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`smir`]: program DB model, call-graph reduction, linking
//! - [`kast`]: terms, configurations and an in-process rule evaluator
//! - [`value`]: runtime value terms
//! - [`args`]: symbolic and random argument generation
//! - [`rules`]: lookup rule synthesis with modulo-`K` stratification
//! - [`backend`]: kompile pipeline, RPC sessions, extractor lookup
//! - [`proof`]: KCFG and on-disk proof layout
//! - [`prover`]: proof advancement and cut points
//! - [`driver`]: end-to-end commands

/// Version of the KMIR driver
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod args;
pub mod backend;
pub mod driver;
pub mod error;
pub mod kast;
pub mod proof;
pub mod prover;
pub mod rules;
pub mod smir;
pub mod value;

// Re-export main types
pub use backend::{Backend, KBackend, Session, SessionMode, SessionOptions, StepResult};
pub use driver::{prove_many, prove_rs, ProveRsOptions};
pub use error::{Error, ErrorSeverity, Result};
pub use kast::{Config, Term};
pub use proof::{FailureCause, NodeId, NodeStatus, Proof, ProofStatus};
pub use prover::{advance_proof, BreakFlags, ProverOptions};
pub use smir::{Smir, TypeId, TypeInfo};
