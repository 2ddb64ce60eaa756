use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::provider::{Digest, Provider};
use crate::resource::Document;

/// One deployed file and the document it should contain.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    /// Name matched by the target filter: `envoy`, `lds`, `cds` or `tls_<name>`.
    pub(crate) key: String,
    pub(crate) file_name: String,
    pub(crate) document: Document,
}

impl Target {
    pub(crate) fn new(key: impl Into<String>, document: Document) -> Self {
        let key = key.into();

        Self {
            file_name: format!("{key}.yaml"),
            key,
            document,
        }
    }
}

#[derive(Debug)]
struct Staged {
    file_name: String,
    staging: PathBuf,
    deployed: PathBuf,
    digest: Digest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Swapped,
    /// The deployed file already has this content.
    Skipped,
}

/// What happened to each target, in swap order.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct DeployReport {
    pub(crate) files: Vec<(String, Outcome)>,
}

impl DeployReport {
    pub(crate) fn count(&self, outcome: Outcome) -> usize {
        self.files.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// Writes targets next to their deployed files, then swaps the changed ones in
/// reverse order so everything a document references is in place before it.
pub(crate) struct Deployer<'a> {
    provider: &'a dyn Provider,
    dir: &'a Path,
}

impl<'a> Deployer<'a> {
    pub(crate) fn new(provider: &'a dyn Provider, dir: &'a Path) -> Self {
        Self { provider, dir }
    }

    pub(crate) async fn deploy(&self, targets: Vec<Target>) -> Result<DeployReport> {
        let staged = self.stage(targets).await?;
        self.swap(staged).await
    }

    async fn stage(&self, targets: Vec<Target>) -> Result<Vec<Staged>> {
        let mut staged = Vec::with_capacity(targets.len());

        for target in targets {
            let text = self.provider.serialize_document(&target.document)?;
            let staging = self.dir.join(format!(".{}", target.file_name));

            let digest = self.provider.hash_text(&text);
            self.provider.write_text(&staging, &text).await?;
            debug!(target = %target.key, file = %staging.display(), %digest, "staged");

            staged.push(Staged {
                deployed: self.dir.join(&target.file_name),
                file_name: target.file_name,
                staging,
                digest,
            });
        }

        Ok(staged)
    }

    async fn swap(&self, staged: Vec<Staged>) -> Result<DeployReport> {
        let mut report = DeployReport::default();

        for staged in staged.into_iter().rev() {
            let current = self.provider.hash_file(&staged.deployed).await?;

            let outcome = if current.as_ref() == Some(&staged.digest) {
                self.provider.remove(&staged.staging).await?;
                debug!(file = %staged.deployed.display(), "unchanged");
                Outcome::Skipped
            } else {
                self.provider.rename(&staged.staging, &staged.deployed).await?;
                info!(file = %staged.deployed.display(), "swapped");
                Outcome::Swapped
            };

            report.files.push((staged.file_name, outcome));
        }

        Ok(report)
    }
}
