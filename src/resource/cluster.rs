use std::time::Duration;

use async_trait::async_trait;
use duration_string::DurationString;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_yaml::Mapping;

use super::{merge, Address, Document, Named, Resource, TypedConfig};
use crate::address::split_host_port;
use crate::error::{check_name, Error, ResourceKind, Result};
use crate::provider::Provider;

pub(crate) const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
const UPSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum DiscoveryType {
    #[default]
    Static,
    StrictDns,
    LogicalDns,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ClusterNetwork {
    #[default]
    Tcp,
    Unix,
}

/// Upstream protocol. `http`/`https` speak HTTP/1.1, `h2c`/`h2` speak HTTP/2,
/// `auto` negotiates through ALPN. All but `http` and `h2c` use TLS.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum UpstreamProtocol {
    H2c,
    H2,
    #[default]
    Http,
    Https,
    Auto,
}

/// One address or a list of them.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub(crate) enum Addresses {
    One(String),
    Many(Vec<String>),
}

impl Default for Addresses {
    fn default() -> Self {
        Self::Many(vec![])
    }
}

impl Addresses {
    fn as_slice(&self) -> &[String] {
        match self {
            Addresses::One(addr) => std::slice::from_ref(addr),
            Addresses::Many(addrs) => addrs,
        }
    }
}

impl From<&str> for Addresses {
    fn from(addr: &str) -> Self {
        Self::One(addr.to_owned())
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ClusterOptions {
    pub(crate) name: String,
    pub(crate) addr: Addresses,
    #[serde(default, rename = "type")]
    pub(crate) discovery: DiscoveryType,
    #[serde(default)]
    pub(crate) network: ClusterNetwork,
    #[serde(default)]
    pub(crate) protocol: UpstreamProtocol,
    /// Only used by `auto`, defaults to `[h2, http/1.1]`.
    #[serde(default)]
    pub(crate) alpn: Option<Vec<String>>,
    /// `250ms`, `1m`, or envoy's own `0.25s`.
    #[serde(default, deserialize_with = "deserialize_timeout")]
    pub(crate) connect_timeout: Option<DurationString>,
    #[serde(default)]
    pub(crate) insecure_skip_verify: bool,
    #[serde(default)]
    pub(crate) init: Mapping,
    #[serde(default)]
    pub(crate) overlay: Mapping,
}

/// Upstream cluster named `cds_<name>`.
///
/// Construction never fails; options are checked when the cluster compiles.
#[derive(Debug, Clone)]
pub(crate) struct Cluster {
    opts: ClusterOptions,
}

#[derive(Serialize, Debug)]
struct ClusterDocument {
    typed_extension_protocol_options: ExtensionProtocolOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    transport_socket: Option<TypedConfig<UpstreamTlsContext>>,
    #[serde(rename = "@type")]
    type_url: &'static str,
    connect_timeout: String,
    load_assignment: LoadAssignment,
    name: String,
    #[serde(rename = "type")]
    discovery: DiscoveryType,
}

#[derive(Serialize, Debug)]
struct ExtensionProtocolOptions {
    #[serde(rename = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions")]
    http: HttpProtocolOptions,
}

#[derive(Serialize, Debug)]
struct HttpProtocolOptions {
    #[serde(rename = "@type")]
    type_url: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    explicit_http_config: Option<ExplicitHttpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_config: Option<Mapping>,
}

#[derive(Serialize, Debug, Default)]
struct ExplicitHttpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    http_protocol_options: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http2_protocol_options: Option<Mapping>,
}

#[derive(Serialize, Debug)]
struct UpstreamTlsContext {
    #[serde(rename = "@type")]
    type_url: &'static str,
    common_tls_context: UpstreamCommonTlsContext,
}

#[derive(Serialize, Debug, Default)]
struct UpstreamCommonTlsContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_expired_certificate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_untrusted_root: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alpn_protocols: Option<Vec<String>>,
}

#[derive(Serialize, Debug)]
struct LoadAssignment {
    cluster_name: String,
    endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Serialize, Debug)]
struct LocalityLbEndpoints {
    lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Serialize, Debug)]
struct LbEndpoint {
    endpoint: Endpoint,
}

#[derive(Serialize, Debug)]
struct Endpoint {
    address: Address,
}

impl Cluster {
    pub(crate) fn new(opts: ClusterOptions) -> Self {
        Self { opts }
    }

    /// Resource name routes refer to.
    pub(crate) fn resource_name(name: &str) -> String {
        format!("cds_{name}")
    }

    /// Compiles the cluster document, validating the options on the way.
    pub(crate) fn document(&self) -> Result<Document> {
        let opts = &self.opts;

        check_name(ResourceKind::Cluster, &opts.name)?;

        let lb_endpoints = opts
            .addr
            .as_slice()
            .iter()
            .map(|addr| self.endpoint(addr))
            .collect::<Result<Vec<_>>>()?;

        if lb_endpoints.is_empty() {
            return Err(Error::invalid(
                ResourceKind::Cluster,
                &opts.name,
                "cluster addr invalid: no address",
            ));
        }

        let (http, transport_socket) = self.protocol();

        let document = ClusterDocument {
            typed_extension_protocol_options: ExtensionProtocolOptions { http },
            transport_socket,
            type_url: CLUSTER_TYPE_URL,
            connect_timeout: envoy_duration(
                opts.connect_timeout
                    .clone()
                    .map(Duration::from)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            ),
            load_assignment: LoadAssignment {
                cluster_name: Self::resource_name(&opts.name),
                endpoints: vec![LocalityLbEndpoints { lb_endpoints }],
            },
            name: Self::resource_name(&opts.name),
            discovery: opts.discovery,
        };

        merge(&opts.init, &document, &opts.overlay)
    }

    fn protocol(&self) -> (HttpProtocolOptions, Option<TypedConfig<UpstreamTlsContext>>) {
        let opts = &self.opts;

        let explicit = |config: ExplicitHttpConfig| HttpProtocolOptions {
            type_url: HTTP_PROTOCOL_OPTIONS_TYPE_URL,
            explicit_http_config: Some(config),
            auto_config: None,
        };
        let http1 = || ExplicitHttpConfig {
            http_protocol_options: Some(Mapping::new()),
            ..Default::default()
        };
        let http2 = || ExplicitHttpConfig {
            http2_protocol_options: Some(Mapping::new()),
            ..Default::default()
        };

        match opts.protocol {
            UpstreamProtocol::H2c => (explicit(http2()), None),
            UpstreamProtocol::H2 => (explicit(http2()), Some(self.tls(None))),
            UpstreamProtocol::Http => (explicit(http1()), None),
            UpstreamProtocol::Https => (explicit(http1()), Some(self.tls(None))),
            UpstreamProtocol::Auto => {
                let alpn = opts
                    .alpn
                    .clone()
                    .unwrap_or_else(|| vec!["h2".to_owned(), "http/1.1".to_owned()]);

                (
                    HttpProtocolOptions {
                        type_url: HTTP_PROTOCOL_OPTIONS_TYPE_URL,
                        explicit_http_config: None,
                        auto_config: Some(Mapping::new()),
                    },
                    Some(self.tls(Some(alpn))),
                )
            }
        }
    }

    fn tls(&self, alpn_protocols: Option<Vec<String>>) -> TypedConfig<UpstreamTlsContext> {
        let insecure = self.opts.insecure_skip_verify.then_some(true);

        TypedConfig {
            name: "envoy.transport_sockets.tls",
            typed_config: UpstreamTlsContext {
                type_url: UPSTREAM_TLS_CONTEXT_TYPE_URL,
                common_tls_context: UpstreamCommonTlsContext {
                    allow_expired_certificate: insecure,
                    allow_untrusted_root: insecure,
                    alpn_protocols,
                },
            },
        }
    }

    fn endpoint(&self, addr: &str) -> Result<LbEndpoint> {
        let name = &self.opts.name;

        if addr.is_empty() {
            return Err(Error::invalid(
                ResourceKind::Cluster,
                name,
                "cluster addr invalid: empty address",
            ));
        }

        let address = match self.opts.network {
            ClusterNetwork::Unix => Address::pipe(addr),
            ClusterNetwork::Tcp => {
                let (host, port) = split_host_port(addr).map_err(|source| Error::Address {
                    kind: ResourceKind::Cluster,
                    name: name.clone(),
                    source,
                })?;

                Address::socket(host, port)
            }
        };

        Ok(LbEndpoint {
            endpoint: Endpoint { address },
        })
    }
}

fn deserialize_timeout<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DurationString>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;

    parse_timeout(&text).map(Some).map_err(de::Error::custom)
}

/// Accepts `duration-string` units, falling back to envoy's `<seconds>[.<fraction>]s`.
fn parse_timeout(text: &str) -> std::result::Result<DurationString, String> {
    if let Ok(duration) = text.parse::<DurationString>() {
        return Ok(duration);
    }

    let invalid = || format!("invalid duration {text:?}, expected e.g. 250ms, 5s or 0.25s");
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let seconds = text.strip_suffix('s').ok_or_else(invalid)?;
    let (whole, fraction) = seconds.split_once('.').ok_or_else(invalid)?;

    if !digits(whole) || !digits(fraction) || fraction.len() > 9 {
        return Err(invalid());
    }

    let secs = whole.parse::<u64>().map_err(|_| invalid())?;
    let nanos = format!("{fraction:0<9}").parse::<u32>().map_err(|_| invalid())?;

    Ok(Duration::new(secs, nanos).into())
}

/// Formats a duration the way envoy's JSON mapping of `google.protobuf.Duration` expects.
fn envoy_duration(duration: Duration) -> String {
    let nanos = duration.subsec_nanos();

    if nanos == 0 {
        return format!("{}s", duration.as_secs());
    }

    let fraction = format!("{nanos:09}");
    format!("{}.{}s", duration.as_secs(), fraction.trim_end_matches('0'))
}

impl Named for Cluster {
    fn name(&self) -> &str {
        &self.opts.name
    }
}

#[async_trait]
impl Resource for Cluster {
    async fn compile(&self, _provider: &dyn Provider) -> Result<Document> {
        self.document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddrError;
    use crate::resource::tests::yaml;
    use serde_yaml::Value;

    fn cluster(name: &str, addr: &str, protocol: UpstreamProtocol) -> ClusterOptions {
        ClusterOptions {
            name: name.to_owned(),
            addr: addr.into(),
            protocol,
            ..Default::default()
        }
    }

    #[test]
    fn bing_auto_strict_dns() {
        let opts = ClusterOptions {
            discovery: DiscoveryType::StrictDns,
            ..cluster("bing", "bing.com:443", UpstreamProtocol::Auto)
        };

        let document = Cluster::new(opts).document().unwrap();

        assert_eq!(
            Value::Mapping(document),
            yaml(
                r#"
typed_extension_protocol_options:
  envoy.extensions.upstreams.http.v3.HttpProtocolOptions:
    "@type": type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions
    auto_config: {}
transport_socket:
  name: envoy.transport_sockets.tls
  typed_config:
    "@type": type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext
    common_tls_context:
      alpn_protocols: [h2, http/1.1]
"@type": type.googleapis.com/envoy.config.cluster.v3.Cluster
connect_timeout: 5s
load_assignment:
  cluster_name: cds_bing
  endpoints:
    - lb_endpoints:
        - endpoint:
            address:
              socket_address: { address: bing.com, port_value: 443 }
name: cds_bing
type: STRICT_DNS
"#
            )
        );
    }

    #[test]
    fn h2c_is_plaintext_http2() {
        let document = Cluster::new(cluster("grpc", "10.0.0.1:9000", UpstreamProtocol::H2c))
            .document()
            .unwrap();

        assert_eq!(
            document["typed_extension_protocol_options"]
                ["envoy.extensions.upstreams.http.v3.HttpProtocolOptions"]["explicit_http_config"],
            yaml("{ http2_protocol_options: {} }")
        );
        assert!(document.get("transport_socket").is_none());
        assert_eq!(document["type"], "STATIC");
    }

    #[test]
    fn h2_and_https_add_tls() {
        let h2 = Cluster::new(cluster("a", "a.com:443", UpstreamProtocol::H2))
            .document()
            .unwrap();
        let https = Cluster::new(cluster("b", "b.com:443", UpstreamProtocol::Https))
            .document()
            .unwrap();

        assert_eq!(
            h2["typed_extension_protocol_options"]
                ["envoy.extensions.upstreams.http.v3.HttpProtocolOptions"]["explicit_http_config"],
            yaml("{ http2_protocol_options: {} }")
        );
        assert_eq!(
            https["typed_extension_protocol_options"]
                ["envoy.extensions.upstreams.http.v3.HttpProtocolOptions"]["explicit_http_config"],
            yaml("{ http_protocol_options: {} }")
        );
        for document in [&h2, &https] {
            assert_eq!(
                document["transport_socket"]["typed_config"]["common_tls_context"],
                yaml("{}")
            );
        }
    }

    #[test]
    fn http_is_the_default_protocol() {
        let opts: ClusterOptions = serde_yaml::from_str("{ name: web, addr: 'web:80' }").unwrap();

        let document = Cluster::new(opts).document().unwrap();

        assert_eq!(
            document["typed_extension_protocol_options"]
                ["envoy.extensions.upstreams.http.v3.HttpProtocolOptions"]["explicit_http_config"],
            yaml("{ http_protocol_options: {} }")
        );
        assert!(document.get("transport_socket").is_none());
    }

    #[test]
    fn insecure_skip_verify_allows_bad_certificates() {
        let opts = ClusterOptions {
            insecure_skip_verify: true,
            alpn: Some(vec!["h2".to_owned()]),
            ..cluster("self-signed", "[::1]:8443", UpstreamProtocol::Auto)
        };

        let document = Cluster::new(opts).document().unwrap();

        assert_eq!(
            document["transport_socket"]["typed_config"]["common_tls_context"],
            yaml("{ allow_expired_certificate: true, allow_untrusted_root: true, alpn_protocols: [h2] }")
        );
        assert_eq!(
            document["load_assignment"]["endpoints"][0]["lb_endpoints"][0]["endpoint"]["address"],
            yaml("{ socket_address: { address: '::1', port_value: 8443 } }")
        );
    }

    #[test]
    fn unix_addresses_are_paths() {
        let opts = ClusterOptions {
            network: ClusterNetwork::Unix,
            addr: Addresses::Many(vec!["/run/a.sock".to_owned(), "/run/b.sock".to_owned()]),
            ..cluster("local", "", UpstreamProtocol::Http)
        };

        let document = Cluster::new(opts).document().unwrap();

        assert_eq!(
            document["load_assignment"]["endpoints"][0]["lb_endpoints"],
            yaml(
                "[ { endpoint: { address: { pipe: { path: /run/a.sock } } } }, { endpoint: { address: { pipe: { path: /run/b.sock } } } } ]"
            )
        );
    }

    #[test]
    fn validation_is_deferred_to_compilation() {
        let cluster = Cluster::new(cluster("broken", "no-port", UpstreamProtocol::Http));

        let err = cluster.document().unwrap_err();

        match err {
            Error::Address { source, .. } => {
                assert_eq!(source, AddrError::MissingPort("no-port".to_owned()))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_name_and_empty_address_fail_to_compile() {
        assert!(matches!(
            Cluster::new(cluster("", "a:1", UpstreamProtocol::Http)).document(),
            Err(Error::InvalidName { .. })
        ));
        assert!(matches!(
            Cluster::new(cluster("a", "", UpstreamProtocol::Http)).document(),
            Err(Error::Invalid { .. })
        ));
        assert!(matches!(
            Cluster::new(ClusterOptions {
                name: "a".to_owned(),
                ..Default::default()
            })
            .document(),
            Err(Error::Invalid { .. })
        ));
    }

    #[test]
    fn connect_timeout_and_overrides() {
        let opts: ClusterOptions = serde_yaml::from_str(
            r#"
name: slow
addr: ["slow.internal:80"]
type: LOGICAL_DNS
connect-timeout: 250ms
init: { dns_lookup_family: V4_ONLY, name: ignored }
overlay: { type: STRICT_DNS }
"#,
        )
        .unwrap();

        let document = Cluster::new(opts).document().unwrap();

        assert_eq!(document["connect_timeout"], "0.25s");
        assert_eq!(document["dns_lookup_family"], "V4_ONLY");
        assert_eq!(document["name"], "cds_slow");
        assert_eq!(document["type"], "STRICT_DNS");
        assert_eq!(
            document.keys().next(),
            Some(&Value::from("dns_lookup_family"))
        );
    }

    #[test]
    fn unknown_protocol_is_rejected_when_parsing() {
        let result =
            serde_yaml::from_str::<ClusterOptions>("{ name: a, addr: 'a:1', protocol: h3 }");

        assert!(result.is_err());
    }

    #[test]
    fn connect_timeout_accepts_envoy_durations() {
        let parse = |timeout: &str| {
            serde_yaml::from_str::<ClusterOptions>(&format!(
                "{{ name: a, addr: 'a:1', connect-timeout: '{timeout}' }}"
            ))
            .map(|opts| Cluster::new(opts).document().unwrap()["connect_timeout"].clone())
        };

        assert_eq!(parse("0.25s").unwrap(), "0.25s");
        assert_eq!(parse("1.5s").unwrap(), "1.5s");
        assert_eq!(parse("250ms").unwrap(), "0.25s");
        assert_eq!(parse("2m").unwrap(), "120s");
        assert!(parse("1.s").is_err());
        assert!(parse(".5s").is_err());
        assert!(parse("0.1234567891s").is_err());
        assert!(parse("soon").is_err());
    }

    #[test]
    fn envoy_durations() {
        assert_eq!(envoy_duration(Duration::from_secs(5)), "5s");
        assert_eq!(envoy_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(envoy_duration(Duration::from_micros(1)), "0.000001s");
    }
}
