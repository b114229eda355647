//! Diagnostics
//!
//! Best-effort version reporting and the stale-artifact hint logged next to
//! fatal decode errors. Nothing here ever fails the process.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{info, warn};

/// What `.git` says about the checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    /// First line of `.git/HEAD`.
    pub head: String,
    /// Commit hash the HEAD reference points to, if it is a reference.
    pub hash: Option<String>,
}

/// Read git information from `repo/.git`, if present.
pub fn git_info(repo: &Path) -> Option<GitInfo> {
    let git_dir = repo.join(".git");
    let head = first_line(&git_dir.join("HEAD")).ok()?;

    let hash = match head.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["ref:", reference] => first_line(&git_dir.join(reference)).ok(),
        _ => None,
    };

    Some(GitInfo { head, hash })
}

/// Log git information for the working directory.
pub fn log_git_info() {
    if let Some(git) = git_info(Path::new(".")) {
        info!("Contents of .git/HEAD: {}", git.head);
        if let Some(hash) = git.hash {
            info!("Current reference hash: {}", hash);
        }
    }
}

fn first_line(path: &Path) -> io::Result<String> {
    let contents = fs::read_to_string(path)?;
    Ok(contents.lines().next().unwrap_or_default().trim().to_string())
}

// =============================================================================
// STALE ARTIFACTS
// =============================================================================

/// Why a generated artifact looks out of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleArtifact {
    /// The artifact does not exist.
    Missing,
    /// The source was modified after the artifact was generated.
    Outdated,
}

/// Compare a schema source with the artifact generated from it.
///
/// Returns `None` when the artifact looks current or when timestamps are
/// unavailable.
pub fn stale_artifact_hint(source: &Path, artifact: &Path) -> Option<StaleArtifact> {
    if !artifact.is_file() {
        return Some(StaleArtifact::Missing);
    }
    let source_modified = fs::metadata(source).and_then(|m| m.modified()).ok()?;
    let artifact_modified = fs::metadata(artifact).and_then(|m| m.modified()).ok()?;

    (source_modified > artifact_modified).then_some(StaleArtifact::Outdated)
}

/// Log a remediation hint if `artifact` looks stale relative to `source`.
///
/// Returns whether a hint was logged.
pub fn log_stale_artifact_hint(source: &Path, artifact: &Path) -> bool {
    let hint = match stale_artifact_hint(source, artifact) {
        Some(hint) => hint,
        None => return false,
    };

    warn!("================================================");
    match hint {
        StaleArtifact::Missing => warn!("{} does not exist.", artifact.display()),
        StaleArtifact::Outdated => {
            warn!("{} is newer than {}.", source.display(), artifact.display())
        }
    }
    warn!("A likely fix for this fatal error is to regenerate");
    warn!("{} from {}", artifact.display(), source.display());
    warn!("and rebuild. This is needed after every change to the source.");
    warn!("================================================");
    true
}
