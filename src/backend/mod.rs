//! # Rewrite Backend Interface
//!
//! The external term-rewriting backend is consumed through two traits:
//! [`Backend`] compiles definitions into runnable artifacts and opens
//! sessions; a [`Session`] executes, steps and simplifies configurations.
//!
//! ```text
//! KompilePipeline ──compile──▶ Artifact ──open_session──▶ Session
//!                                                   step / execute / simplify
//! ```
//!
//! Sessions are scoped: [`with_session`] opens one, runs a closure and closes
//! it on every exit path, including unwinding.

pub mod extractor;
pub mod kompile;
pub mod rpc;

pub use kompile::{kompile, splice, CacheOutcome, KompileOptions, Kompiled};
pub use rpc::KBackend;

use crate::kast::{Config, Term};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Which backend flavour an artifact targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Concrete execution (`llvm` artifacts)
    Concrete,
    /// Symbolic execution (`haskell` artifacts)
    Symbolic,
}

impl SessionMode {
    /// Artifact sub-directory name
    pub fn dir_name(self) -> &'static str {
        match self {
            SessionMode::Concrete => "llvm",
            SessionMode::Symbolic => "haskell",
        }
    }
}

/// A compiled, runnable backend artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Compiled definition directory
    pub dir: PathBuf,
    pub mode: SessionMode,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Wall-clock budget per backend call
    pub smt_timeout: Option<Duration>,
    /// Timeouts tolerated per node before it is marked failing
    pub smt_retry_limit: u32,
    /// RPC server executable
    pub server: PathBuf,
    /// Ask the backend to report applied rules
    pub trace_rewrites: bool,
    /// Record every request and response to this file
    pub bug_report: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            smt_timeout: Some(Duration::from_millis(300_000)),
            smt_retry_limit: 0,
            server: std::env::var_os("KMIR_RPC_SERVER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("kore-rpc-booster")),
            trace_rewrites: false,
            bug_report: None,
        }
    }
}

/// One successor of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Successor {
    pub config: Config,
    /// Rule ids applied on the way, when traced
    #[serde(default)]
    pub trace: Vec<String>,
    /// Rewrite steps taken
    #[serde(default)]
    pub depth: usize,
}

/// Outcome of [`Session::step`]
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// No rule applies and the state is not terminal
    Stuck,
    /// A terminal rule fired
    Terminal,
    /// The backend stopped at a cut point or depth bound
    Step(Vec<Successor>),
    /// The state splits under mutually exclusive conditions
    Branch(Vec<(Term, Successor)>),
}

/// A live connection to a backend
pub trait Session {
    /// Run to completion (or `depth` steps)
    fn execute(&mut self, config: &Config, depth: Option<usize>) -> Result<Config>;

    /// Advance up to `depth` steps, pausing at any rule in `cut_points`
    fn step(
        &mut self,
        config: &Config,
        depth: Option<usize>,
        cut_points: &[String],
    ) -> Result<StepResult>;

    /// Simplify a configuration without rewriting
    fn simplify(&mut self, config: &Config) -> Result<Config>;

    /// Release backend resources
    fn close(&mut self) -> Result<()>;
}

/// Compiler and session factory
pub trait Backend: Send + Sync {
    /// Splice `extra_rules` into the definition under `base_definition_dir`
    /// and compile it into `target`
    fn compile(
        &self,
        base_definition_dir: &Path,
        extra_rules: &str,
        target: &Path,
        mode: SessionMode,
    ) -> Result<Artifact>;

    /// Start a session on a compiled artifact
    fn open_session(
        &self,
        artifact: &Artifact,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>>;
}

/// Closes the wrapped session when dropped
pub struct SessionGuard {
    session: Option<Box<dyn Session>>,
}

impl SessionGuard {
    /// Take ownership of an open session
    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// The guarded session
    pub fn session(&mut self) -> &mut dyn Session {
        match self.session.as_mut() {
            Some(s) => s.as_mut(),
            None => unreachable!("session taken before drop"),
        }
    }

    /// Close now and report the result
    pub fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(mut s) => s.close(),
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(mut s) = self.session.take() {
            if let Err(e) = s.close() {
                warn!("Failed to close backend session: {}", e);
            }
        }
    }
}

/// Open a session, run `f`, and close the session on every exit path
pub fn with_session<T>(
    backend: &dyn Backend,
    artifact: &Artifact,
    options: &SessionOptions,
    f: impl FnOnce(&mut dyn Session) -> Result<T>,
) -> Result<T> {
    let mut guard = SessionGuard::new(backend.open_session(artifact, options)?);
    let result = f(guard.session());
    let closed = guard.close();
    let value = result?;
    closed?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    impl Session for CountingSession {
        fn execute(&mut self, config: &Config, _depth: Option<usize>) -> Result<Config> {
            Ok(config.clone())
        }
        fn step(&mut self, _: &Config, _: Option<usize>, _: &[String]) -> Result<StepResult> {
            Ok(StepResult::Stuck)
        }
        fn simplify(&mut self, config: &Config) -> Result<Config> {
            Ok(config.clone())
        }
        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingBackend {
        closes: Arc<AtomicUsize>,
    }

    impl Backend for CountingBackend {
        fn compile(&self, _: &Path, _: &str, target: &Path, mode: SessionMode) -> Result<Artifact> {
            Ok(Artifact {
                dir: target.to_path_buf(),
                mode,
            })
        }
        fn open_session(&self, _: &Artifact, _: &SessionOptions) -> Result<Box<dyn Session>> {
            Ok(Box::new(CountingSession {
                closes: self.closes.clone(),
            }))
        }
    }

    fn artifact() -> Artifact {
        Artifact {
            dir: PathBuf::from("/tmp/x"),
            mode: SessionMode::Symbolic,
        }
    }

    #[test]
    fn test_session_closed_after_success_and_error() {
        let closes = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            closes: closes.clone(),
        };
        let ok = with_session(&backend, &artifact(), &SessionOptions::default(), |_| Ok(1));
        assert_eq!(ok.unwrap(), 1);
        let err: Result<()> = with_session(&backend, &artifact(), &SessionOptions::default(), |_| {
            Err(crate::Error::step("boom"))
        });
        assert!(err.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _guard = SessionGuard::new(Box::new(CountingSession {
                closes: closes.clone(),
            }));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
