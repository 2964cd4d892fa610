//! Locating and running the Rust-to-SMIR extractor (`stable_mir_json`).
//!
//! Lookup order:
//!
//! 1. `$KMIR_SMIR_JSON`
//! 2. `deps/.stable-mir-json/{release,debug}.sh` under the repository root
//! 3. `stable_mir_json` on `$PATH`
//! 4. `$HOME/.stable-mir-json/{release,debug}.sh`

use crate::smir::Smir;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Extractor executable name on `$PATH`
pub const EXTRACTOR_NAME: &str = "stable_mir_json";

fn scripts_in(dir: &Path) -> [PathBuf; 2] {
    [dir.join("release.sh"), dir.join("debug.sh")]
}

/// Candidate locations in lookup order
pub fn candidates(repo_root: Option<&Path>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(path) = std::env::var_os("KMIR_SMIR_JSON") {
        out.push(PathBuf::from(path));
    }
    if let Some(root) = repo_root {
        out.extend(scripts_in(&root.join("deps").join(".stable-mir-json")));
    }
    if let Some(paths) = std::env::var_os("PATH") {
        out.extend(std::env::split_paths(&paths).map(|dir| dir.join(EXTRACTOR_NAME)));
    }
    if let Some(home) = std::env::var_os("HOME") {
        out.extend(scripts_in(&PathBuf::from(home).join(".stable-mir-json")));
    }
    out
}

/// First existing candidate
pub fn find_extractor(repo_root: Option<&Path>) -> Result<PathBuf> {
    let tried = candidates(repo_root);
    match tried.iter().find(|p| p.is_file()) {
        Some(found) => {
            debug!("Using extractor {}", found.display());
            Ok(found.clone())
        }
        None => Err(Error::ExtractorNotFound { tried }),
    }
}

/// Run the extractor on `source` in `work_dir` and load `<stem>.smir.json`.
/// The JSON file is removed afterwards unless `keep` is set.
pub fn extract(extractor: &Path, source: &Path, work_dir: &Path, keep: bool) -> Result<Smir> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::InvalidOption(format!("not a source file: {}", source.display())))?;
    let source = fs::canonicalize(source).map_err(|e| Error::io(source, e))?;

    info!("Extracting SMIR from {}", source.display());
    let output = Command::new(extractor)
        .arg("-Zno-codegen")
        .arg(&source)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::compile(format!("Failed to run {}: {}", extractor.display(), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::compile(format!(
            "{} failed on {}: {}",
            extractor.display(),
            source.display(),
            stderr.trim()
        )));
    }

    let json_path = work_dir.join(format!("{}.smir.json", stem));
    let smir = Smir::from_file(&json_path)?;
    if !keep {
        fs::remove_file(&json_path).map_err(|e| Error::io(&json_path, e))?;
    }
    Ok(smir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_scripts_follow_env_override() {
        let root = PathBuf::from("/repo");
        let c = candidates(Some(&root));
        let release = root.join("deps/.stable-mir-json/release.sh");
        let debug = root.join("deps/.stable-mir-json/debug.sh");
        let r = c.iter().position(|p| *p == release).unwrap();
        let d = c.iter().position(|p| *p == debug).unwrap();
        assert!(r < d);
        if std::env::var_os("KMIR_SMIR_JSON").is_some() {
            assert!(r > 0);
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("extract.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_extractor_is_a_compile_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("prog.rs");
        fs::write(&source, "fn main() {}").unwrap();
        let tool = script(dir.path(), "echo 'error[E0425]: cannot find value' >&2\nexit 1");

        match extract(&tool, &source, dir.path(), false) {
            Err(Error::BackendCompileFailure { message }) => assert!(message.contains("E0425")),
            other => panic!("unexpected result: {:?}", other.map(|s| s.name().to_string())),
        }
        let missing = extract(&dir.path().join("absent.sh"), &source, dir.path(), false);
        assert!(matches!(missing, Err(Error::BackendCompileFailure { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_loads_and_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("prog.rs");
        fs::write(&source, "fn main() {}").unwrap();
        let tool = script(
            dir.path(),
            r#"echo '{"name": "prog", "crate_id": 0, "allocs": [], "functions": [], "items": [], "types": []}' > prog.smir.json"#,
        );

        let smir = extract(&tool, &source, dir.path(), false).unwrap();
        assert_eq!(smir.name(), "prog");
        assert!(!dir.path().join("prog.smir.json").exists());

        extract(&tool, &source, dir.path(), true).unwrap();
        assert!(dir.path().join("prog.smir.json").exists());
    }

    #[test]
    fn test_not_found_lists_candidates() {
        let dir = tempfile::tempdir().unwrap();
        match find_extractor(Some(dir.path())) {
            Err(Error::ExtractorNotFound { tried }) => {
                assert!(tried.contains(&dir.path().join("deps/.stable-mir-json/release.sh")));
            }
            // An extractor installed on this machine is also fine
            Ok(found) => assert!(found.is_file()),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}
