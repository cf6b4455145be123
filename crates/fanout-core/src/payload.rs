//! The command script sent to every host.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("cannot read script file {}", path.display())]
pub struct PayloadReadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Immutable script text, read once per run and shared by every Runner.
///
/// Cloning is cheap: all clones point at the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Arc<str>);

impl Payload {
    pub fn new(script: impl Into<Arc<str>>) -> Self {
        Self(script.into())
    }

    /// Read the script file at `path`.
    pub fn load(path: &Path) -> Result<Self, PayloadReadError> {
        let script = std::fs::read_to_string(path).map_err(|source| PayloadReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(script))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.0.len()).finish()
    }
}
