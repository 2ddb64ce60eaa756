use std::{io, path::Path};

use async_trait::async_trait;
use tokio::fs;

use super::{Digest, Provider};
use crate::error::{Error, Result};

/// Provider backed by the local filesystem.
#[derive(Debug, Default, Clone)]
pub(crate) struct LocalProvider;

#[async_trait]
impl Provider for LocalProvider {
    async fn write_text(&self, path: &Path, data: &str) -> Result<()> {
        fs::write(path, data)
            .await
            .map_err(|e| Error::io(format!("write {}", path.display()), e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(|e| {
            Error::io(format!("move {} to {}", from.display(), to.display()), e)
        })
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .map_err(|e| Error::io(format!("remove {}", path.display()), e))
    }

    async fn read_text(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(format!("read {}", path.display()), e))
    }

    async fn hash_file(&self, path: &Path) -> Result<Option<Digest>> {
        match fs::read(path).await {
            Ok(content) => Ok(Some(Digest::of(&content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(format!("hash {}", path.display()), e)),
        }
    }
}
