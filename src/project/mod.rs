mod bootstrap;
pub(crate) mod config;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_yaml::Mapping;
use tracing::warn;

use crate::deploy::{DeployReport, Deployer, Target};
use crate::error::{Collection, Error, Result};
use crate::provider::Provider;
use crate::resource::{to_mapping, Certificate, Cluster, Document, Listener, Named, Resource};

pub(crate) use bootstrap::bootstrap;
pub(crate) use config::ProjectConfig;

/// Ordered collection with unique names.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    collection: Collection,
    items: Vec<T>,
    names: HashSet<String>,
}

impl<T: Named> Registry<T> {
    pub(crate) fn new(collection: Collection) -> Self {
        Self {
            collection,
            items: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Adds every item or none of them.
    pub(crate) fn add_all(&mut self, items: Vec<T>) -> Result<()> {
        let mut batch = HashSet::new();

        for item in &items {
            let name = item.name();

            if self.names.contains(name) {
                return Err(Error::AlreadyExists(self.collection, name.to_owned()));
            }

            if !batch.insert(name) {
                return Err(Error::NameRepeat(self.collection, name.to_owned()));
            }
        }

        for item in items {
            self.names.insert(item.name().to_owned());
            self.items.push(item);
        }

        Ok(())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.items
    }
}

#[derive(Serialize, Debug)]
struct Resources {
    resources: Vec<Document>,
}

/// Everything deployed to one envoy: its listeners, clusters and certificates plus the
/// bootstrap document pointing envoy at them.
pub(crate) struct Project {
    dir: PathBuf,
    watch: PathBuf,
    fixed: Mapping,
    provider: Arc<dyn Provider>,
    listeners: Registry<Listener>,
    clusters: Registry<Cluster>,
    certificates: Registry<Certificate>,
}

impl Project {
    /// Files are written to `dir`, which is also where envoy watches them unless
    /// [`Project::with_watch`] says otherwise.
    pub(crate) fn new(dir: impl Into<PathBuf>, provider: Arc<dyn Provider>) -> Self {
        let dir = dir.into();

        Self {
            watch: dir.clone(),
            dir,
            fixed: Mapping::new(),
            provider,
            listeners: Registry::new(Collection::Listeners),
            clusters: Registry::new(Collection::Clusters),
            certificates: Registry::new(Collection::Certificates),
        }
    }

    /// Directory as seen by envoy, e.g. a container mount of `dir`.
    pub(crate) fn with_watch(mut self, watch: impl Into<PathBuf>) -> Self {
        self.watch = watch.into();
        self
    }

    /// Extra bootstrap sections such as `admin`.
    pub(crate) fn with_fixed(mut self, fixed: Mapping) -> Self {
        self.fixed = fixed;
        self
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn add_listeners(&mut self, listeners: Vec<Listener>) -> Result<()> {
        self.listeners.add_all(listeners)
    }

    pub(crate) fn add_clusters(&mut self, clusters: Vec<Cluster>) -> Result<()> {
        self.clusters.add_all(clusters)
    }

    pub(crate) fn add_certificates(&mut self, certificates: Vec<Certificate>) -> Result<()> {
        self.certificates.add_all(certificates)
    }

    pub(crate) fn compile_bootstrap(&self) -> Result<Document> {
        bootstrap(&self.watch, &self.fixed)
    }

    async fn compile_resources<T: Resource>(&self, items: &[T]) -> Result<Document> {
        let mut resources = Vec::with_capacity(items.len());

        for item in items {
            resources.push(item.compile(self.provider.as_ref()).await?);
        }

        to_mapping(&Resources { resources })
    }

    /// Reports filter chains and routes whose certificate or cluster is not registered.
    pub(crate) fn check_references(&self) {
        for listener in self.listeners.as_slice() {
            for chain in listener.filter_chains() {
                let certificate = chain.certificate().name();

                if !self.certificates.contains(certificate) {
                    warn!(
                        listener = listener.name(),
                        filter_chain = chain.name(),
                        certificate,
                        "filter chain references an unknown certificate"
                    );
                }
            }

            for router in listener.routers() {
                for cluster in router.clusters() {
                    if !self.clusters.contains(cluster) {
                        warn!(
                            listener = listener.name(),
                            router = router.name(),
                            cluster,
                            "route references an unknown cluster"
                        );
                    }
                }
            }
        }
    }

    /// Compiles the files selected by `filter`: `envoy`, `lds`, `cds`, then one
    /// `tls_<name>` per certificate.
    pub(crate) async fn targets(&self, filter: Option<&Regex>) -> Result<Vec<Target>> {
        let selected = |key: &str| filter.map_or(true, |filter| filter.is_match(key));

        self.check_references();

        let mut targets = Vec::new();

        if selected("envoy") {
            targets.push(Target::new("envoy", self.compile_bootstrap()?));
        }

        if selected("lds") {
            targets.push(Target::new(
                "lds",
                self.compile_resources(self.listeners.as_slice()).await?,
            ));
        }

        if selected("cds") {
            targets.push(Target::new(
                "cds",
                self.compile_resources(self.clusters.as_slice()).await?,
            ));
        }

        for certificate in self.certificates.as_slice() {
            let key = Certificate::secret_name(certificate.name());

            if selected(&key) {
                let document = self
                    .compile_resources(std::slice::from_ref(certificate))
                    .await?;
                targets.push(Target::new(key, document));
            }
        }

        Ok(targets)
    }

    /// Compiles and deploys the selected files into `dir`.
    pub(crate) async fn build(&self, filter: Option<&Regex>) -> Result<DeployReport> {
        let targets = self.targets(filter).await?;

        Deployer::new(self.provider.as_ref(), &self.dir)
            .deploy(targets)
            .await
    }

    /// Serialized text of the selected files, without touching `dir`.
    pub(crate) async fn inspect(&self, filter: Option<&Regex>) -> Result<Vec<(String, String)>> {
        self.targets(filter)
            .await?
            .into_iter()
            .map(|target| {
                let text = self.provider.serialize_document(&target.document)?;
                Ok((target.file_name, text))
            })
            .collect()
    }
}
