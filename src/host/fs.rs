//! Filesystem-backed file sink.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{FileSink, SinkError};

/// [`FileSink`] writing under a fixed root directory.
///
/// Path hints are interpreted relative to the root; absolute hints and hints
/// containing parent-directory components are rejected so a batch cannot
/// write outside its download area.
#[derive(Debug, Clone)]
pub struct DirFileSink {
    root: PathBuf,
}

impl DirFileSink {
    /// Creates a sink rooted at `root`.
    ///
    /// The root itself is created on first save, not here.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the configured root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path_hint: &Path) -> Result<PathBuf, SinkError> {
        let escapes = path_hint
            .components()
            .any(|part| matches!(part, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes || path_hint.as_os_str().is_empty() {
            return Err(SinkError::InvalidPath {
                path: path_hint.to_path_buf(),
            });
        }
        Ok(self.root.join(path_hint))
    }
}

#[async_trait]
impl FileSink for DirFileSink {
    async fn save(&self, path_hint: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        let path = self.resolve(path_hint)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SinkError::io(parent, source))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| SinkError::io(&path, source))?;
        debug!(path = %path.display(), bytes = bytes.len(), "saved file");
        Ok(())
    }
}
