use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_yaml::Mapping;

use super::Project;
use crate::error::{Collection, Error, Result};
use crate::provider::Provider;
use crate::resource::filter_chain::CertificateRef;
use crate::resource::listener::ListenerNetwork;
use crate::resource::server_name::ServerName;
use crate::resource::{
    Certificate, CertificateOptions, Cluster, ClusterOptions, FilterChain, FilterChainOptions,
    Listener, ListenerOptions, Named, Router, RouterOptions,
};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct FilterChainConfig {
    pub(crate) name: String,
    /// Certificate name.
    pub(crate) tls: String,
    /// Where envoy finds `tls_<tls>.yaml`, defaults to the watch directory.
    #[serde(default)]
    pub(crate) dir: Option<PathBuf>,
    #[serde(default)]
    pub(crate) server_names: Option<Vec<ServerName>>,
    #[serde(default)]
    pub(crate) alpn: Option<Vec<String>>,
    #[serde(default)]
    pub(crate) h3: bool,
    #[serde(default)]
    pub(crate) router: Option<String>,
    #[serde(default)]
    pub(crate) init: Mapping,
    #[serde(default)]
    pub(crate) overlay: Mapping,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ListenerConfig {
    pub(crate) name: String,
    pub(crate) addr: String,
    #[serde(default)]
    pub(crate) network: ListenerNetwork,
    /// Router name.
    #[serde(default)]
    pub(crate) http: Option<String>,
    #[serde(default)]
    pub(crate) https: Vec<FilterChainConfig>,
    #[serde(default)]
    pub(crate) init: Mapping,
    #[serde(default)]
    pub(crate) overlay: Mapping,
}

/// Project file contents.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ProjectConfig {
    pub(crate) dir: PathBuf,
    #[serde(default)]
    pub(crate) watch: Option<PathBuf>,
    #[serde(default)]
    pub(crate) fixed: Mapping,
    #[serde(default)]
    pub(crate) routers: Vec<RouterOptions>,
    #[serde(default)]
    pub(crate) certificates: Vec<CertificateOptions>,
    #[serde(default)]
    pub(crate) clusters: Vec<ClusterOptions>,
    #[serde(default)]
    pub(crate) listeners: Vec<ListenerConfig>,
}

struct Routers(HashMap<String, Router>);

impl Routers {
    fn new(options: Vec<RouterOptions>) -> Result<Self> {
        let mut routers = HashMap::with_capacity(options.len());

        for opts in options {
            let router = Router::new(opts)?;

            if routers.contains_key(router.name()) {
                return Err(Error::NameRepeat(Collection::Routers, router.name().to_owned()));
            }

            routers.insert(router.name().to_owned(), router);
        }

        Ok(Self(routers))
    }

    /// A copy of router `name` serving `owner`.
    fn resolve(&self, name: Option<&str>, owner: &str) -> Result<Option<Router>> {
        name.map(|name| {
            self.0
                .get(name)
                .ok_or_else(|| Error::UnknownRouter(name.to_owned()))?
                .clone_named(owner)
        })
        .transpose()
    }
}

impl ProjectConfig {
    pub(crate) async fn load(provider: &dyn Provider, path: &Path) -> Result<Self> {
        let text = provider.read_text(path).await?;

        Self::parse(path, &text)
    }

    pub(crate) fn parse(path: &Path, text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|source| Error::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Builds the project; relative directories resolve against `base`, the directory of
    /// the project file.
    pub(crate) fn into_project(self, base: &Path, provider: Arc<dyn Provider>) -> Result<Project> {
        let dir = base.join(&self.dir);
        let watch = self.watch.clone().unwrap_or_else(|| dir.clone());
        let routers = Routers::new(self.routers)?;

        let certificates = self
            .certificates
            .into_iter()
            .map(Certificate::new)
            .collect::<Result<Vec<_>>>()?;

        let clusters = self.clusters.into_iter().map(Cluster::new).collect();

        let listeners = self
            .listeners
            .into_iter()
            .map(|listener| listener.build(&routers, &watch))
            .collect::<Result<Vec<_>>>()?;

        let mut project = Project::new(dir, provider)
            .with_watch(watch)
            .with_fixed(self.fixed);

        project.add_certificates(certificates)?;
        project.add_clusters(clusters)?;
        project.add_listeners(listeners)?;

        Ok(project)
    }
}

impl ListenerConfig {
    fn build(self, routers: &Routers, watch: &Path) -> Result<Listener> {
        let https = self
            .https
            .into_iter()
            .map(|chain| {
                let router = routers.resolve(chain.router.as_deref(), &chain.name)?;
                let dir = chain.dir.unwrap_or_else(|| watch.to_owned());

                FilterChain::new(FilterChainOptions {
                    router,
                    server_names: chain.server_names,
                    alpn: chain.alpn,
                    h3: chain.h3,
                    init: chain.init,
                    overlay: chain.overlay,
                    ..FilterChainOptions::new(chain.name, CertificateRef::new(chain.tls, dir))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Listener::new(ListenerOptions {
            http: routers.resolve(self.http.as_deref(), &self.name)?,
            name: self.name,
            addr: self.addr,
            network: self.network,
            https,
            init: self.init,
            overlay: self.overlay,
        })
    }
}
