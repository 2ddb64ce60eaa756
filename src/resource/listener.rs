use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use super::filter_chain::http_connection_manager;
use super::{
    merge, Address, Document, FilterChain, Named, Resource, Router, TypeOnly, TypedConfig,
};
use crate::address::HostPort;
use crate::error::{check_name, Error, ResourceKind, Result};
use crate::provider::Provider;

pub(crate) const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ListenerNetwork {
    #[default]
    Tcp,
    /// QUIC, carrying HTTP/3 filter chains only.
    Udp,
    Unix,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct ListenerOptions {
    pub(crate) name: String,
    /// `host:port`, or a socket path for unix listeners.
    pub(crate) addr: String,
    pub(crate) network: ListenerNetwork,
    /// Plain HTTP routing, ignored when `https` is not empty.
    pub(crate) http: Option<Router>,
    pub(crate) https: Vec<FilterChain>,
    pub(crate) init: Mapping,
    pub(crate) overlay: Mapping,
}

/// Downstream listener compiled into `lds_<name>`.
#[derive(Debug, Clone)]
pub(crate) struct Listener {
    opts: ListenerOptions,
    address: Address,
}

#[derive(Serialize, Debug)]
struct ListenerDocument {
    #[serde(rename = "@type")]
    type_url: &'static str,
    name: String,
    address: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    udp_listener_config: Option<UdpListenerConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    listener_filters: Vec<TypedConfig<TypeOnly>>,
    filter_chains: Vec<Document>,
}

#[derive(Serialize, Debug)]
struct UdpListenerConfig {
    quic_options: Mapping,
}

#[derive(Serialize, Debug)]
struct PlainFilterChain {
    filters: Vec<TypedConfig<Document>>,
}

impl Listener {
    pub(crate) fn new(opts: ListenerOptions) -> Result<Self> {
        check_name(ResourceKind::Listener, &opts.name)?;

        let invalid = |message: &str| Err(Error::invalid(ResourceKind::Listener, &opts.name, message));

        if opts.addr.is_empty() {
            return invalid("listener addr invalid: empty address");
        }

        if opts.https.is_empty() && opts.http.is_none() {
            return invalid("either http or https must be set");
        }

        match opts.network {
            ListenerNetwork::Udp if opts.https.is_empty() => {
                return invalid("udp listener requires https filter chains");
            }
            ListenerNetwork::Udp if !opts.https.iter().all(FilterChain::is_h3) => {
                return invalid("udp listener only serves h3 filter chains");
            }
            ListenerNetwork::Tcp | ListenerNetwork::Unix if opts.https.iter().any(FilterChain::is_h3) => {
                return invalid("h3 filter chains need a udp listener");
            }
            _ => {}
        }

        let address = match opts.network {
            ListenerNetwork::Unix => Address::pipe(opts.addr.as_str()),
            network => {
                let HostPort { host, port } =
                    opts.addr.parse::<HostPort>().map_err(|source| Error::Address {
                        kind: ResourceKind::Listener,
                        name: opts.name.clone(),
                        source,
                    })?;

                let host = if host.is_empty() { "0.0.0.0".to_owned() } else { host };
                let mut address = Address::socket(host, port);

                if network == ListenerNetwork::Udp {
                    if let Some(socket) = address.socket_address.as_mut() {
                        socket.protocol = Some("UDP");
                    }
                }

                address
            }
        };

        Ok(Self { opts, address })
    }

    pub(crate) fn resource_name(name: &str) -> String {
        format!("lds_{name}")
    }

    /// TLS filter chains; when present they replace the plain `http` chain.
    pub(crate) fn filter_chains(&self) -> &[FilterChain] {
        &self.opts.https
    }

    /// Every router this listener embeds.
    pub(crate) fn routers(&self) -> Vec<&Router> {
        if self.opts.https.is_empty() {
            self.opts.http.iter().collect()
        } else {
            self.opts.https.iter().filter_map(FilterChain::router).collect()
        }
    }

    pub(crate) fn document(&self) -> Result<Document> {
        let opts = &self.opts;
        let tls = !opts.https.is_empty();
        let udp = opts.network == ListenerNetwork::Udp;

        let filter_chains = if tls {
            opts.https
                .iter()
                .map(FilterChain::document)
                .collect::<Result<Vec<_>>>()?
        } else {
            let chain = PlainFilterChain {
                filters: vec![http_connection_manager(
                    &opts.name,
                    opts.http.as_ref(),
                    false,
                    &Mapping::new(),
                    &Mapping::new(),
                )?],
            };

            vec![super::to_mapping(&chain)?]
        };

        let listener_filters = if tls && !udp {
            vec![TypedConfig {
                name: "envoy.filters.listener.tls_inspector",
                typed_config: TypeOnly {
                    type_url:
                        "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector",
                },
            }]
        } else {
            Vec::new()
        };

        let document = ListenerDocument {
            type_url: LISTENER_TYPE_URL,
            name: Self::resource_name(&opts.name),
            address: self.address.clone(),
            udp_listener_config: udp.then(|| UdpListenerConfig {
                quic_options: Mapping::new(),
            }),
            listener_filters,
            filter_chains,
        };

        merge(&opts.init, &document, &opts.overlay)
    }
}

impl Named for Listener {
    fn name(&self) -> &str {
        &self.opts.name
    }
}

#[async_trait]
impl Resource for Listener {
    async fn compile(&self, _provider: &dyn Provider) -> Result<Document> {
        self.document()
    }
}
