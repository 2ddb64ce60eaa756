use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;

use super::{Digest, Provider};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    Write(PathBuf),
    Rename(PathBuf, PathBuf),
    Remove(PathBuf),
}

/// In-memory filesystem that records every mutating call, for observing swap order.
#[derive(Debug, Default)]
pub(crate) struct MemoryProvider {
    files: Mutex<BTreeMap<PathBuf, String>>,
    ops: Mutex<Vec<Op>>,
    fail_rename_to: Mutex<Option<PathBuf>>,
}

impl MemoryProvider {
    pub(crate) fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub(crate) fn put(&self, path: impl Into<PathBuf>, data: &str) {
        self.files.lock().unwrap().insert(path.into(), data.to_owned());
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub(crate) fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Renames whose target file name ends with `to` return an error.
    pub(crate) fn fail_rename_to(&self, to: impl Into<PathBuf>) {
        *self.fail_rename_to.lock().unwrap() = Some(to.into());
    }

    /// Target paths of all renames, in order.
    pub(crate) fn renamed(&self) -> Vec<PathBuf> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Rename(_, to) => Some(to),
                _ => None,
            })
            .collect()
    }
}

fn not_found(path: &Path) -> Error {
    Error::io(
        path.display().to_string(),
        io::Error::from(io::ErrorKind::NotFound),
    )
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn write_text(&self, path: &Path, data: &str) -> Result<()> {
        self.put(path, data);
        self.ops.lock().unwrap().push(Op::Write(path.to_owned()));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(fail) = self.fail_rename_to.lock().unwrap().as_ref() {
            if to.ends_with(fail) {
                return Err(Error::io(
                    format!("move {}", to.display()),
                    io::Error::from(io::ErrorKind::PermissionDenied),
                ));
            }
        }

        let mut files = self.files.lock().unwrap();
        let data = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_owned(), data);
        self.ops
            .lock()
            .unwrap()
            .push(Op::Rename(from.to_owned(), to.to_owned()));
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .ok_or_else(|| not_found(path))?;
        self.ops.lock().unwrap().push(Op::Remove(path.to_owned()));
        Ok(())
    }

    async fn read_text(&self, path: &Path) -> Result<String> {
        self.file(path).ok_or_else(|| not_found(path))
    }

    async fn hash_file(&self, path: &Path) -> Result<Option<Digest>> {
        Ok(self.file(path).map(|data| Digest::of(data.as_bytes())))
    }
}
