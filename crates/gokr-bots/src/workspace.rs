use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};

use crate::error::{Error, Result};

/// Where a poll cycle does its work: the bot's `$HOME`, which also holds
/// the Go toolchain's `go/bin` and the per-cycle scratch space.
#[derive(Debug, Clone)]
pub struct WorkDirs {
    pub home: PathBuf,
}

impl WorkDirs {
    pub fn from_env() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| Error::msg("HOME is not set"))?;
        Ok(Self { home })
    }

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.home).map_err(|e| {
            Error::msg(format!(
                "failed to create home dir {}: {e}",
                self.home.display()
            ))
        })
    }

    pub fn go_bin(&self) -> PathBuf {
        self.home.join("go").join("bin")
    }

    /// Fresh checkout directory, removed when the returned guard drops.
    pub fn cycle_dir(&self) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix("testboot")
            .tempdir_in(&self.home)
            .map_err(|e| Error::msg(format!("failed to create cycle dir: {e}")))
    }

    /// Output path for a built boot image, removed when the returned guard drops.
    pub fn boot_file(&self) -> Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix("bootfile")
            .tempfile_in(&self.home)
            .map_err(|e| Error::msg(format!("failed to create boot image file: {e}")))
    }
}

/// Join a repository-relative path under `base`, refusing anything that could escape it.
pub fn resolve_under(base: &Path, rel: &str) -> Result<PathBuf> {
    if rel.is_empty() {
        return Err(Error::msg("empty relative path"));
    }
    let rel_pb = Path::new(rel);
    for c in rel_pb.components() {
        match c {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::msg(format!(
                    "invalid relative path '{rel}' (contains '..')"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::msg(format!(
                    "invalid relative path '{rel}' (absolute)"
                )));
            }
        }
    }
    Ok(base.join(rel_pb))
}
