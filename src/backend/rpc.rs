//! # K Backend over JSON-RPC
//!
//! [`KBackend`] compiles definitions with the `kompile` driver (a
//! subprocess) and opens sessions against an RPC server spawned per
//! session. Each [`RpcSession`] owns a current-thread tokio runtime, the
//! server child process and one TCP connection; requests are
//! newline-delimited JSON-RPC 2.0.
//!
//! ## Protocol
//!
//! | Method     | Params                                                    | Result                                   |
//! |------------|-----------------------------------------------------------|------------------------------------------|
//! | `execute`  | `state`, `max-depth`, `cut-point-rules`, `log-successful-rewrites` | `reason`, `state`, `next-states`, `depth`, `logs` |
//! | `simplify` | `state`                                                   | `state`                                  |
//!
//! States are serialized [`Config`] values (KAST-JSON terms plus constraints).

use super::{kompile::splice, Artifact, Backend, Session, SessionMode, SessionOptions};
use super::{StepResult, Successor};
use crate::kast::{Config, Term};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Child;
use tracing::{debug, info, trace, warn};

/// Spliced definition source inside an artifact directory
const SPLICED_SOURCE: &str = "kmir-spliced.k";

/// Compiled definition inside an artifact directory
const DEFINITION_DIR: &str = "definition";

/// Connection attempts while the server starts up
const CONNECT_ATTEMPTS: u32 = 100;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Subprocess-driven K backend
#[derive(Debug, Clone)]
pub struct KBackend {
    /// `kompile` executable
    pub kompile: PathBuf,
    /// Main definition file inside the base definition directory
    pub main_file: String,
    /// Main module name
    pub main_module: String,
}

impl Default for KBackend {
    fn default() -> Self {
        Self {
            kompile: std::env::var_os("KMIR_KOMPILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("kompile")),
            main_file: "kmir.k".to_string(),
            main_module: "KMIR".to_string(),
        }
    }
}

impl KBackend {
    fn backend_flag(mode: SessionMode) -> &'static str {
        match mode {
            SessionMode::Concrete => "llvm",
            SessionMode::Symbolic => "haskell",
        }
    }
}

impl Backend for KBackend {
    fn compile(
        &self,
        base_definition_dir: &Path,
        extra_rules: &str,
        target: &Path,
        mode: SessionMode,
    ) -> Result<Artifact> {
        let main = base_definition_dir.join(&self.main_file);
        let base = fs::read_to_string(&main).map_err(|e| {
            Error::compile(format!("Cannot read base definition {}: {}", main.display(), e))
        })?;
        let spliced = splice(&base, extra_rules)?;

        fs::create_dir_all(target).map_err(|e| Error::io(target, e))?;
        let source = target.join(SPLICED_SOURCE);
        fs::write(&source, spliced).map_err(|e| Error::io(&source, e))?;

        debug!("Running {} on {}", self.kompile.display(), source.display());
        let output = Command::new(&self.kompile)
            .arg(&source)
            .arg("--main-module")
            .arg(&self.main_module)
            .arg("--backend")
            .arg(Self::backend_flag(mode))
            .arg("--output-definition")
            .arg(target.join(DEFINITION_DIR))
            .arg("-I")
            .arg(base_definition_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                Error::compile(format!("Failed to run {}: {}", self.kompile.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::compile(format!(
                "{} exited with {}: {}",
                self.kompile.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(Artifact {
            dir: target.to_path_buf(),
            mode,
        })
    }

    fn open_session(
        &self,
        artifact: &Artifact,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>> {
        let definition = artifact.dir.join(DEFINITION_DIR);
        let session = RpcSession::start(&definition, &self.main_module, options)?;
        Ok(Box::new(session))
    }
}

#[derive(Debug, Deserialize)]
struct NextState {
    #[serde(flatten)]
    config: Config,
    #[serde(default)]
    predicate: Option<Term>,
}

#[derive(Debug, Deserialize)]
struct RewriteLog {
    #[serde(rename = "rule-id", default)]
    rule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResult {
    reason: String,
    state: Config,
    #[serde(rename = "next-states", default)]
    next_states: Vec<NextState>,
    #[serde(default)]
    depth: usize,
    #[serde(default)]
    logs: Vec<RewriteLog>,
}

#[derive(Debug, Deserialize)]
struct SimplifyResult {
    state: Config,
}

/// A session against a spawned RPC server
pub struct RpcSession {
    runtime: tokio::runtime::Runtime,
    child: Option<Child>,
    stream: BufReader<TcpStream>,
    /// Bytes of a response line not yet complete when a call timed out
    pending: Vec<u8>,
    /// Set once the connection is out of step with the server
    broken: bool,
    next_id: u64,
    options: SessionOptions,
    report: Option<File>,
}

impl RpcSession {
    /// Spawn the server on `definition` and connect to it
    pub fn start(definition: &Path, module: &str, options: &SessionOptions) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::step(format!("Failed to start RPC runtime: {}", e)))?;

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .map_err(|e| Error::step(format!("No free port for RPC server: {}", e)))?;

        let server = options.server.clone();
        let (child, stream) = runtime.block_on(async {
            let mut child = tokio::process::Command::new(&server)
                .arg(definition)
                .arg("--module")
                .arg(module)
                .arg("--server-port")
                .arg(port.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    Error::step(format!("Failed to start {}: {}", server.display(), e))
                })?;

            for _ in 0..CONNECT_ATTEMPTS {
                if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
                    return Ok((child, stream));
                }
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(Error::step(format!(
                        "{} exited during startup with {}",
                        server.display(),
                        status
                    )));
                }
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
            let _ = child.kill().await;
            Err(Error::step(format!(
                "{} did not accept connections on port {}",
                server.display(),
                port
            )))
        })?;

        let report = match &options.bug_report {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| Error::io(path, e))?,
            ),
            None => None,
        };

        info!("RPC session on port {} ({})", port, definition.display());
        Ok(Self::connected(runtime, Some(child), stream, options, report))
    }

    fn connected(
        runtime: tokio::runtime::Runtime,
        child: Option<Child>,
        stream: TcpStream,
        options: &SessionOptions,
        report: Option<File>,
    ) -> Self {
        Self {
            runtime,
            child,
            stream: BufReader::new(stream),
            pending: Vec::new(),
            broken: false,
            next_id: 0,
            options: options.clone(),
            report,
        }
    }

    fn record(&mut self, kind: &str, payload: &Value) {
        if let Some(file) = self.report.as_mut() {
            let line = json!({ "kind": kind, "payload": payload });
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write bug report: {}", e);
                self.report = None;
            }
        }
    }

    /// Send one request and wait for the response with the same id.
    ///
    /// A timeout while waiting keeps the partial response line, so the
    /// next call reads on from there. A timeout while sending, or any
    /// transport error, leaves the session unusable.
    fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        if self.broken {
            return Err(Error::step("RPC session is unusable after an interrupted request"));
        }
        self.next_id += 1;
        let id = self.next_id;
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        self.record("request", &request);
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let timeout = self.options.smt_timeout;
        let stream = &mut self.stream;
        let pending = &mut self.pending;
        let mut sent = false;
        let exchange = async {
            stream.get_mut().write_all(line.as_bytes()).await?;
            sent = true;
            loop {
                stream.read_until(b'\n', pending).await?;
                if !pending.ends_with(b"\n") {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "RPC server closed the connection",
                    ));
                }
                let value: Value = serde_json::from_slice(&std::mem::take(pending))?;
                // Late answers to timed-out requests are skipped
                if value.get("id").and_then(Value::as_u64) == Some(id) {
                    return Ok(value);
                }
            }
        };
        let outcome = self.runtime.block_on(async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| limit),
                None => Ok(exchange.await),
            }
        });
        let response = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.broken = true;
                return Err(Error::step(format!("RPC transport error: {}", e)));
            }
            Err(limit) => {
                if !sent {
                    warn!("RPC request {} interrupted while sending", id);
                    self.broken = true;
                }
                return Err(Error::SmtTimeout(limit));
            }
        };
        self.record("response", &response);

        if let Some(error) = response.get("error") {
            return Err(Error::step(format!("RPC error: {}", error)));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| Error::step("RPC response missing 'result' field"))
    }

    fn run(
        &mut self,
        config: &Config,
        depth: Option<usize>,
        cut_points: &[String],
    ) -> Result<ExecuteResult> {
        let params = json!({
            "state": config,
            "max-depth": depth,
            "cut-point-rules": cut_points,
            "log-successful-rewrites": self.options.trace_rewrites,
        });
        let result = self.call("execute", params)?;
        trace!("execute result: {}", result);
        Ok(serde_json::from_value(result)?)
    }
}

fn trace_of(logs: &[RewriteLog]) -> Vec<String> {
    logs.iter().filter_map(|l| l.rule_id.clone()).collect()
}

impl Session for RpcSession {
    fn execute(&mut self, config: &Config, depth: Option<usize>) -> Result<Config> {
        let result = self.run(config, depth, &[])?;
        match result.reason.as_str() {
            "branching" => Err(Error::step(format!(
                "concrete execution branched into {} states",
                result.next_states.len()
            ))),
            "timeout" => Err(Error::SmtTimeout(self.options.smt_timeout.unwrap_or_default())),
            "aborted" => Err(Error::step("backend aborted execution")),
            _ => Ok(result.state),
        }
    }

    fn step(
        &mut self,
        config: &Config,
        depth: Option<usize>,
        cut_points: &[String],
    ) -> Result<StepResult> {
        let ExecuteResult {
            reason,
            state,
            next_states,
            depth: steps,
            logs,
        } = self.run(config, depth, cut_points)?;
        let trace = trace_of(&logs);

        match reason.as_str() {
            "stuck" | "vacuous" => Ok(StepResult::Stuck),
            "terminal-rule" => Ok(StepResult::Terminal),
            "depth-bound" => Ok(StepResult::Step(vec![Successor {
                config: state,
                trace,
                depth: steps,
            }])),
            "cut-point-rule" => {
                // Resume past the cut rule so the next step makes progress
                let successors = if next_states.is_empty() {
                    vec![Successor {
                        config: state,
                        trace,
                        depth: steps,
                    }]
                } else {
                    next_states
                        .into_iter()
                        .map(|n| Successor {
                            config: n.config,
                            trace: trace.clone(),
                            depth: steps + 1,
                        })
                        .collect()
                };
                Ok(StepResult::Step(successors))
            }
            "branching" => Ok(StepResult::Branch(
                next_states
                    .into_iter()
                    .map(|n| {
                        let condition = n.predicate.unwrap_or_else(|| Term::bool(true));
                        (
                            condition,
                            Successor {
                                config: n.config,
                                trace: trace.clone(),
                                depth: steps,
                            },
                        )
                    })
                    .collect(),
            )),
            "timeout" => Err(Error::SmtTimeout(self.options.smt_timeout.unwrap_or_default())),
            other => Err(Error::step(format!("backend stopped: {}", other))),
        }
    }

    fn simplify(&mut self, config: &Config) -> Result<Config> {
        let result = self.call("simplify", json!({ "state": config }))?;
        let SimplifyResult { state } = serde_json::from_value(result)?;
        Ok(state)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            self.runtime.block_on(async {
                if let Ok(None) = child.try_wait() {
                    let _ = child.kill().await;
                }
            });
            debug!("RPC server stopped");
        }
        Ok(())
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
