use std::path::PathBuf;

use serde::Serialize;
use serde_yaml::Mapping;

use super::certificate::Certificate;
use super::server_name::ServerName;
use super::{merge, to_mapping, Document, Named, PathConfigSource, Router, TypeOnly, TypedConfig};
use crate::error::{check_name, Error, ResourceKind, Result};

const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const QUIC_TRANSPORT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.quic.v3.QuicDownstreamTransport";
const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// Reference to a certificate by name, resolved by envoy through `<dir>/tls_<name>.yaml`.
///
/// The certificate itself is a separate SDS document; nothing links the two in memory.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CertificateRef {
    name: String,
    dir: PathBuf,
}

impl CertificateRef {
    pub(crate) fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.dir.join(Certificate::file_name(&self.name))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FilterChainOptions {
    pub(crate) name: String,
    pub(crate) tls: CertificateRef,
    /// SNI names to match; any name when unset.
    pub(crate) server_names: Option<Vec<ServerName>>,
    /// Defaults to `[h2, http/1.1]`, or `[h3]` for HTTP/3.
    pub(crate) alpn: Option<Vec<String>>,
    pub(crate) h3: bool,
    pub(crate) router: Option<Router>,
    /// Defaults for the HTTP connection manager.
    pub(crate) init: Mapping,
    /// Forced HTTP connection manager fields.
    pub(crate) overlay: Mapping,
}

impl FilterChainOptions {
    pub(crate) fn new(name: impl Into<String>, tls: CertificateRef) -> Self {
        Self {
            name: name.into(),
            tls,
            server_names: None,
            alpn: None,
            h3: false,
            router: None,
            init: Mapping::new(),
            overlay: Mapping::new(),
        }
    }
}

/// TLS terminating filter chain of an HTTPS (or HTTP/3) listener.
#[derive(Debug, Clone)]
pub(crate) struct FilterChain {
    opts: FilterChainOptions,
}

#[derive(Serialize, Debug)]
struct FilterChainDocument {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_chain_match: Option<FilterChainMatch>,
    transport_socket: TypedConfig<DownstreamTransport>,
    filters: Vec<TypedConfig<Document>>,
}

#[derive(Serialize, Debug)]
struct FilterChainMatch {
    server_names: Vec<ServerName>,
}

#[derive(Serialize, Debug)]
struct DownstreamTransport {
    #[serde(rename = "@type")]
    type_url: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    common_tls_context: Option<CommonTlsContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    downstream_tls_context: Option<DownstreamTlsContext>,
}

#[derive(Serialize, Debug)]
struct DownstreamTlsContext {
    common_tls_context: CommonTlsContext,
}

#[derive(Serialize, Debug)]
struct CommonTlsContext {
    alpn_protocols: Vec<String>,
    tls_certificate_sds_secret_configs: Vec<SdsSecretConfig>,
}

#[derive(Serialize, Debug)]
struct SdsSecretConfig {
    name: String,
    sds_config: PathConfigSource,
}

#[derive(Serialize, Debug)]
struct HttpConnectionManager {
    #[serde(rename = "@type")]
    type_url: &'static str,
    access_log: Vec<TypedConfig<TypeOnly>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    codec_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http3_protocol_options: Option<Mapping>,
    generate_request_id: bool,
    http_filters: Vec<TypedConfig<TypeOnly>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    route_config: Option<Document>,
    stat_prefix: String,
}

/// The `envoy.filters.network.http_connection_manager` network filter serving `router`.
pub(crate) fn http_connection_manager(
    stat_prefix: &str,
    router: Option<&Router>,
    h3: bool,
    init: &Mapping,
    overlay: &Mapping,
) -> Result<TypedConfig<Document>> {
    let manager = HttpConnectionManager {
        type_url: HTTP_CONNECTION_MANAGER_TYPE_URL,
        access_log: vec![TypedConfig {
            name: "envoy.access_loggers.stdout",
            typed_config: TypeOnly {
                type_url: "type.googleapis.com/envoy.extensions.access_loggers.stream.v3.StdoutAccessLog",
            },
        }],
        codec_type: h3.then_some("HTTP3"),
        http3_protocol_options: h3.then(Mapping::new),
        generate_request_id: false,
        http_filters: vec![TypedConfig {
            name: "envoy.filters.http.router",
            typed_config: TypeOnly {
                type_url: "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router",
            },
        }],
        route_config: router.map(Router::document).transpose()?,
        stat_prefix: stat_prefix.to_owned(),
    };

    Ok(TypedConfig {
        name: "envoy.filters.network.http_connection_manager",
        typed_config: merge(init, &manager, overlay)?,
    })
}

impl FilterChain {
    pub(crate) fn new(opts: FilterChainOptions) -> Result<Self> {
        check_name(ResourceKind::FilterChain, &opts.name)?;

        if opts.tls.name().is_empty() {
            return Err(Error::invalid(
                ResourceKind::FilterChain,
                &opts.name,
                "tls certificate name is empty",
            ));
        }

        Ok(Self { opts })
    }

    pub(crate) fn is_h3(&self) -> bool {
        self.opts.h3
    }

    pub(crate) fn certificate(&self) -> &CertificateRef {
        &self.opts.tls
    }

    pub(crate) fn router(&self) -> Option<&Router> {
        self.opts.router.as_ref()
    }

    pub(crate) fn document(&self) -> Result<Document> {
        let opts = &self.opts;

        let (name, type_url, default_alpn): (_, _, &[&str]) = if opts.h3 {
            ("envoy.transport_sockets.quic", QUIC_TRANSPORT_TYPE_URL, &["h3"])
        } else {
            (
                "envoy.transport_sockets.tls",
                DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
                &["h2", "http/1.1"],
            )
        };

        let common_tls_context = CommonTlsContext {
            alpn_protocols: opts
                .alpn
                .clone()
                .unwrap_or_else(|| default_alpn.iter().map(|p| p.to_string()).collect()),
            tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                name: Certificate::secret_name(opts.tls.name()),
                sds_config: PathConfigSource::new(&opts.tls.path()),
            }],
        };

        // QUIC nests the TLS context one level deeper.
        let transport = if opts.h3 {
            DownstreamTransport {
                type_url,
                common_tls_context: None,
                downstream_tls_context: Some(DownstreamTlsContext { common_tls_context }),
            }
        } else {
            DownstreamTransport {
                type_url,
                common_tls_context: Some(common_tls_context),
                downstream_tls_context: None,
            }
        };

        let document = FilterChainDocument {
            name: opts.name.clone(),
            filter_chain_match: opts.server_names.clone().map(|server_names| FilterChainMatch {
                server_names,
            }),
            transport_socket: TypedConfig {
                name,
                typed_config: transport,
            },
            filters: vec![http_connection_manager(
                &opts.name,
                opts.router.as_ref(),
                opts.h3,
                &opts.init,
                &opts.overlay,
            )?],
        };

        to_mapping(&document)
    }
}

impl Named for FilterChain {
    fn name(&self) -> &str {
        &self.opts.name
    }
}
