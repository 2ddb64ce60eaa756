pub(crate) mod matchers;
pub(crate) mod route;

use std::collections::HashSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;
use tracing::warn;

use super::{merge, Document, Named};
use crate::error::{check_name, Error, ResourceKind, Result};

pub(crate) use route::Route;
use route::RouteEntry;

/// A virtual host: a set of domains and the routes that apply to them.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct Host {
    /// Unique within its router.
    pub(crate) name: String,
    /// Defaults to `["*"]`.
    #[serde(default)]
    pub(crate) domains: Option<Vec<String>>,
    #[serde(default)]
    pub(crate) routes: Vec<Route>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub(crate) struct RouterOptions {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) hosts: Vec<Host>,
    #[serde(default)]
    pub(crate) init: Mapping,
    #[serde(default)]
    pub(crate) overlay: Mapping,
}

/// Routing rules compiled into an inline route configuration `router_<name>`.
///
/// The same rules usually serve several listeners, each under its own name, see
/// [`Router::clone_named`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Router {
    opts: RouterOptions,
}

#[derive(Serialize, Debug)]
struct RouteConfiguration {
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    virtual_hosts: Vec<VirtualHost>,
}

#[derive(Serialize, Debug)]
struct VirtualHost {
    name: String,
    domains: Vec<String>,
    routes: Vec<RouteEntry>,
}

impl Router {
    pub(crate) fn new(opts: RouterOptions) -> Result<Self> {
        check_name(ResourceKind::Router, &opts.name)?;

        let mut seen = HashSet::new();

        for host in &opts.hosts {
            if host.name.is_empty() {
                return Err(Error::invalid(
                    ResourceKind::Router,
                    &opts.name,
                    "host name invalid: empty",
                ));
            }

            if !seen.insert(host.name.as_str()) {
                return Err(Error::invalid(
                    ResourceKind::Router,
                    &opts.name,
                    format!("host name repeat: {}", host.name),
                ));
            }

            for warning in host.routes.iter().flat_map(Route::regex_warnings) {
                warn!(router = %opts.name, host = %host.name, "{warning}");
            }
        }

        Ok(Self { opts })
    }

    /// An independent copy of these rules under another name.
    pub(crate) fn clone_named(&self, name: &str) -> Result<Self> {
        check_name(ResourceKind::Router, name)?;

        Ok(Self {
            opts: RouterOptions {
                name: name.to_owned(),
                ..self.opts.clone()
            },
        })
    }

    /// Upstream clusters referenced by any route.
    pub(crate) fn clusters(&self) -> impl Iterator<Item = &str> {
        self.opts
            .hosts
            .iter()
            .flat_map(|host| host.routes.iter())
            .flat_map(|route| route.clusters())
            .unique()
    }

    pub(crate) fn document(&self) -> Result<Document> {
        let opts = &self.opts;

        let virtual_hosts = opts
            .hosts
            .iter()
            .map(|host| {
                let routes = host
                    .routes
                    .iter()
                    .map(Route::entries)
                    .flatten_ok()
                    .collect::<Result<Vec<_>>>()?;

                Ok(VirtualHost {
                    name: ["host", opts.name.as_str(), host.name.as_str()].iter().join("_"),
                    domains: host.domains.clone().unwrap_or_else(|| vec!["*".to_owned()]),
                    routes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let document = RouteConfiguration {
            name: format!("router_{}", opts.name),
            virtual_hosts,
        };

        merge(&opts.init, &document, &opts.overlay)
    }
}

impl Named for Router {
    fn name(&self) -> &str {
        &self.opts.name
    }
}
