use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::PipelineError;

pub struct ScratchDir {
    dir: Option<TempDir>,
    path: Utf8PathBuf,
    keep: bool,
}

impl ScratchDir {
    pub fn create(root: &Utf8Path, prefix: &str, keep: bool) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(root.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("create {root}: {err}")))?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| PipelineError::Filesystem("non-utf8 scratch path".to_string()))?;
        debug!(path = %path, "scratch.create");
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let kept: PathBuf = dir.keep();
            info!(path = %kept.display(), "scratch directory preserved");
        } else if let Err(err) = dir.close() {
            debug!("failed to remove scratch directory {}: {err}", self.path);
        }
    }
}
