use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::github::{EntryKind, GitHost, HeadRef};
use crate::workspace::resolve_under;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub dirs: usize,
    pub files: usize,
    pub skipped: usize,
}

/// Materialise the tree of `head.sha` into `dir`, one blob request per file.
pub fn fetch_to_dir<H: GitHost + ?Sized>(
    host: &H,
    dir: &Path,
    head: &HeadRef,
) -> Result<FetchStats> {
    let commit = host
        .get_commit(&head.repo, &head.sha)
        .map_err(|e| e.context(format!("fetching commit {}", head.sha)))?;
    let tree = host
        .get_tree(&head.repo, &commit.tree.sha, true)
        .map_err(|e| e.context(format!("fetching tree {}", commit.tree.sha)))?;
    if tree.truncated {
        return Err(Error::msg(format!(
            "tree {} of {} is truncated; refusing to build a partial checkout",
            tree.sha, head.repo
        )));
    }

    let mut stats = FetchStats::default();
    // Entries arrive parent-first, but a blob's parent dir is created anyway.
    for entry in &tree.entries {
        let dst = resolve_under(dir, &entry.path)?;
        match entry.kind {
            EntryKind::Tree => {
                fs::create_dir_all(&dst).map_err(|e| {
                    Error::msg(format!("failed to create dir {}: {e}", dst.display()))
                })?;
                stats.dirs += 1;
            }
            EntryKind::Blob => {
                let sha = entry
                    .sha
                    .as_deref()
                    .ok_or_else(|| Error::msg(format!("blob {} has no sha", entry.path)))?;
                debug!(%sha, path = %entry.path, "fetching blob");
                let contents = host.get_blob(&head.repo, sha)?;
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent).map_err(|e| {
                        Error::msg(format!("failed to create dir {}: {e}", parent.display()))
                    })?;
                }
                fs::write(&dst, contents)
                    .map_err(|e| Error::msg(format!("failed to write {}: {e}", dst.display())))?;
                stats.files += 1;
            }
            EntryKind::Commit => {
                warn!(path = %entry.path, "skipping submodule entry");
                stats.skipped += 1;
            }
        }
    }

    info!(
        repo = %head.repo,
        sha = %head.sha,
        dirs = stats.dirs,
        files = stats.files,
        "fetched tree"
    );
    Ok(stats)
}
