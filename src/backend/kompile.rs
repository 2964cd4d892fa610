//! # Kompile Pipeline
//!
//! Generates the lookup rules for a program DB, splices them into the base
//! definition and compiles concrete and/or symbolic artifacts. A digest of
//! the DB and the flags is stored in `<target>/digest.json`; when it matches,
//! the backend is not invoked at all.

use super::{Artifact, Backend, SessionMode};
use crate::rules::{self, DEFAULT_MODULUS};
use crate::smir::Smir;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Digest file name inside the target directory
pub const DIGEST_FILE: &str = "digest.json";

/// Marker the generated rules are inserted before
const MODULE_END: &str = "endmodule";

/// Kompile configuration
#[derive(Debug, Clone, PartialEq)]
pub struct KompileOptions {
    /// Output directory for artifacts and the digest
    pub target_dir: PathBuf,
    /// Base definition directory
    pub definition_dir: PathBuf,
    /// Stratification modulus
    pub modulus: usize,
    /// Build the concrete artifact
    pub concrete: bool,
    /// Build the symbolic artifact
    pub symbolic: bool,
    /// Extra user rules (JSON), symbolic artifact only
    pub aux_rules: Option<PathBuf>,
    /// Ignore a matching digest
    pub reload: bool,
}

impl Default for KompileOptions {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("kmir-out"),
            definition_dir: default_definition_dir(),
            modulus: DEFAULT_MODULUS,
            concrete: false,
            symbolic: true,
            aux_rules: None,
            reload: false,
        }
    }
}

/// `$KMIR_DEFINITION`, or `share/kmir` next to the crate
pub fn default_definition_dir() -> PathBuf {
    std::env::var_os("KMIR_DEFINITION")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
            path.push("share");
            path.push("kmir");
            path
        })
}

/// Whether the backend ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Digest matched; artifacts reused
    Hit,
    /// Artifacts (re)built
    Miss,
}

/// Result of a kompile run
#[derive(Debug, Clone, PartialEq)]
pub struct Kompiled {
    pub concrete: Option<Artifact>,
    pub symbolic: Option<Artifact>,
    pub digest: String,
    pub outcome: CacheOutcome,
}

impl Kompiled {
    /// The artifact for a mode, if built
    pub fn artifact(&self, mode: SessionMode) -> Option<&Artifact> {
        match mode {
            SessionMode::Concrete => self.concrete.as_ref(),
            SessionMode::Symbolic => self.symbolic.as_ref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DigestFile {
    digest: String,
}

/// Insert `extra` before the last `endmodule` of `base`
pub fn splice(base: &str, extra: &str) -> Result<String> {
    let at = base
        .rfind(MODULE_END)
        .ok_or_else(|| Error::compile("base definition has no closing `endmodule`"))?;
    let mut out = String::with_capacity(base.len() + extra.len() + 1);
    out.push_str(&base[..at]);
    out.push_str(extra);
    if !extra.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&base[at..]);
    Ok(out)
}

fn input_digest(smir: &Smir, options: &KompileOptions, aux: Option<&str>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(smir.digest()?.as_bytes());
    hasher.update(
        format!(
            "modulus={};concrete={};symbolic={}",
            options.modulus, options.concrete, options.symbolic
        )
        .as_bytes(),
    );
    if let Some(text) = aux {
        hasher.update(b";aux=");
        hasher.update(text.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

fn read_digest(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str::<DigestFile>(&text)
        .ok()
        .map(|d| d.digest)
}

/// Write `contents` to `path` via a temporary file and a rename
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

fn artifact_for(options: &KompileOptions, mode: SessionMode) -> Artifact {
    Artifact {
        dir: options.target_dir.join(mode.dir_name()),
        mode,
    }
}

fn staging_dir(options: &KompileOptions, mode: SessionMode) -> PathBuf {
    options
        .target_dir
        .join(format!(".{}.staging", mode.dir_name()))
}

fn discard(staged: &[PathBuf]) {
    for dir in staged {
        let _ = fs::remove_dir_all(dir);
    }
}

/// Compile one artifact into its staging directory
fn stage(
    backend: &dyn Backend,
    options: &KompileOptions,
    mode: SessionMode,
    extra_rules: &str,
) -> Result<PathBuf> {
    let staging = staging_dir(options, mode);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
    }

    info!("Compiling {} artifact", mode.dir_name());
    if let Err(e) = backend.compile(&options.definition_dir, extra_rules, &staging, mode) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }
    if !staging.exists() {
        fs::create_dir_all(&staging).map_err(|e| Error::io(&staging, e))?;
    }
    Ok(staging)
}

/// Move a staged artifact over its final directory
fn promote(options: &KompileOptions, mode: SessionMode, staging: &Path) -> Result<Artifact> {
    let final_dir = options.target_dir.join(mode.dir_name());
    if final_dir.exists() {
        fs::remove_dir_all(&final_dir).map_err(|e| Error::io(&final_dir, e))?;
    }
    fs::rename(staging, &final_dir).map_err(|e| Error::io(&final_dir, e))?;
    Ok(Artifact {
        dir: final_dir,
        mode,
    })
}

/// Generate rules for `smir` and compile the requested artifacts
pub fn kompile(smir: &Smir, backend: &dyn Backend, options: &KompileOptions) -> Result<Kompiled> {
    if !options.concrete && !options.symbolic {
        return Err(Error::InvalidOption(
            "at least one of concrete or symbolic artifacts must be requested".into(),
        ));
    }

    let aux_text = match &options.aux_rules {
        Some(path) => Some(fs::read_to_string(path).map_err(|e| Error::io(path, e))?),
        None => None,
    };
    let digest = input_digest(smir, options, aux_text.as_deref())?;
    let digest_path = options.target_dir.join(DIGEST_FILE);

    if !options.reload && read_digest(&digest_path).as_deref() == Some(digest.as_str()) {
        info!("Kompiled artifacts are up to date ({})", &digest[..12]);
        return Ok(Kompiled {
            concrete: options
                .concrete
                .then(|| artifact_for(options, SessionMode::Concrete)),
            symbolic: options
                .symbolic
                .then(|| artifact_for(options, SessionMode::Symbolic)),
            digest,
            outcome: CacheOutcome::Hit,
        });
    }

    fs::create_dir_all(&options.target_dir).map_err(|e| Error::io(&options.target_dir, e))?;

    let module = rules::synthesize(smir, options.modulus)?;
    let generated = module.render_rules();
    debug!("Generated rule text: {} bytes", generated.len());

    let mut builds = Vec::new();
    if options.concrete {
        builds.push((SessionMode::Concrete, generated.clone()));
    }
    if options.symbolic {
        let mut extra = generated;
        if let Some(text) = &aux_text {
            let aux = rules::RuleModule {
                name: rules::MODULE_NAME.to_string(),
                syntax: vec![],
                rules: rules::load_aux_rules(text)?,
            };
            extra.push_str(&aux.render_rules());
        }
        builds.push((SessionMode::Symbolic, extra));
    }

    // Every mode is staged before any final directory is touched.
    let mut staged = Vec::with_capacity(builds.len());
    for (mode, extra) in &builds {
        match stage(backend, options, *mode, extra) {
            Ok(dir) => staged.push(dir),
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        }
    }

    // The digest goes first so an interrupted promotion is never a cache hit.
    if digest_path.exists() {
        fs::remove_file(&digest_path).map_err(|e| Error::io(&digest_path, e))?;
    }
    let (mut concrete, mut symbolic) = (None, None);
    for ((mode, _), dir) in builds.iter().zip(&staged) {
        let artifact = promote(options, *mode, dir)?;
        match mode {
            SessionMode::Concrete => concrete = Some(artifact),
            SessionMode::Symbolic => symbolic = Some(artifact),
        }
    }

    let record = serde_json::to_vec_pretty(&DigestFile {
        digest: digest.clone(),
    })?;
    write_atomic(&digest_path, &record)?;

    Ok(Kompiled {
        concrete,
        symbolic,
        digest,
        outcome: CacheOutcome::Miss,
    })
}
