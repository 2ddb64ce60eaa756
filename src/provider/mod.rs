pub(crate) mod local;
#[cfg(test)]
pub(crate) mod memory;

use std::{fmt, path::Path};

use async_trait::async_trait;
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};
use crate::resource::Document;

pub(crate) use local::LocalProvider;

/// Hex encoded SHA-256 of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Digest(String);

impl Digest {
    pub(crate) fn of(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform operations the compiler and the deployment engine rely on.
///
/// `rename` must replace the target atomically: a reader sees either the old or the new
/// content, never a partial write.
#[async_trait]
pub(crate) trait Provider: Send + Sync {
    async fn write_text(&self, path: &Path, data: &str) -> Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn remove(&self, path: &Path) -> Result<()>;

    async fn read_text(&self, path: &Path) -> Result<String>;

    /// Returns `None` when the file does not exist.
    async fn hash_file(&self, path: &Path) -> Result<Option<Digest>>;

    fn hash_text(&self, data: &str) -> Digest {
        Digest::of(data.as_bytes())
    }

    fn serialize_document(&self, document: &Document) -> Result<String> {
        serde_yaml::to_string(document).map_err(|e| Error::serialize("document", e))
    }
}
