use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::matchers::{
    check_regex, HeaderMatch, HeaderMatchKind, HeaderMatcher, PathMatchKind, RegexMatcher,
    RouteMatch,
};
use crate::error::Result;
use crate::resource::cluster::Cluster;
use crate::resource::{merge, upsert};

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WebsocketMode {
    /// Plain route only.
    #[default]
    No,
    /// Route only websocket upgrades.
    Yes,
    /// A websocket route followed by a plain one.
    Both,
}

/// Answer the proxy gives without contacting an upstream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DirectResponse {
    pub(crate) status: u16,
    /// Takes precedence over `filename` when non-empty.
    pub(crate) body: Option<String>,
    pub(crate) filename: Option<String>,
    /// When unset envoy guesses the content type.
    pub(crate) content_type: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct RegexRewrite {
    pub(crate) pattern: String,
    #[serde(default)]
    pub(crate) substitution: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct RedirectResponse {
    pub(crate) https: Option<bool>,
    pub(crate) scheme: Option<String>,
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) path: Option<String>,
    pub(crate) prefix: Option<String>,
    pub(crate) regex: Option<RegexRewrite>,
    pub(crate) code: Option<u16>,
    pub(crate) strip: Option<bool>,
}

/// What a matched request gets: an upstream cluster, a fixed response, or a redirect.
///
/// In a project file the variant follows from the value's shape: a string names a cluster,
/// a mapping with `body` or `filename` is a direct response, and a mapping with any redirect
/// field is a redirect.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "ResponseSpec")]
pub(crate) enum Response {
    Cluster(String),
    Direct(DirectResponse),
    Redirect(RedirectResponse),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResponseSpec {
    Cluster(String),
    Fields(ResponseFields),
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ResponseFields {
    status: Option<u16>,
    body: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,

    https: Option<bool>,
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    prefix: Option<String>,
    regex: Option<RegexRewrite>,
    code: Option<u16>,
    strip: Option<bool>,
}

impl TryFrom<ResponseSpec> for Response {
    type Error = String;

    fn try_from(spec: ResponseSpec) -> std::result::Result<Self, Self::Error> {
        let fields = match spec {
            ResponseSpec::Cluster(name) if name.is_empty() => {
                return Err("response cluster name is empty".to_owned())
            }
            ResponseSpec::Cluster(name) => return Ok(Response::Cluster(name)),
            ResponseSpec::Fields(fields) => fields,
        };

        if fields.body.is_some() || fields.filename.is_some() {
            return Ok(Response::Direct(DirectResponse {
                status: fields.status.unwrap_or(200),
                body: fields.body,
                filename: fields.filename,
                content_type: fields.content_type,
            }));
        }

        let redirect = RedirectResponse {
            https: fields.https,
            scheme: fields.scheme,
            host: fields.host,
            port: fields.port,
            path: fields.path,
            prefix: fields.prefix,
            regex: fields.regex,
            code: fields.code,
            strip: fields.strip,
        };

        if redirect == RedirectResponse::default() {
            return Err(
                "response must name a cluster, set body/filename, or describe a redirect"
                    .to_owned(),
            );
        }

        Ok(Response::Redirect(redirect))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Route {
    pub(crate) path: String,
    pub(crate) response: Response,
    #[serde(default)]
    pub(crate) headers: Vec<HeaderMatch>,
    #[serde(default, rename = "match")]
    pub(crate) kind: PathMatchKind,
    /// Optional name used in traffic statistics.
    #[serde(default)]
    pub(crate) name: Option<String>,
    /// Host header sent upstream.
    #[serde(default)]
    pub(crate) rewrite_host: Option<String>,
    #[serde(default)]
    pub(crate) websocket: WebsocketMode,
    /// Upstream for websocket upgrades; defaults to `response`.
    #[serde(default)]
    pub(crate) websocket_cluster: Option<String>,
    /// Defaults for the route action.
    #[serde(default)]
    pub(crate) init: Mapping,
    /// Forced route action fields.
    #[serde(default)]
    pub(crate) overlay: Mapping,
}

/// `envoy.config.route.v3.Route`.
#[derive(Serialize, Debug)]
pub(crate) struct RouteEntry {
    #[serde(rename = "match")]
    route_match: RouteMatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    direct_response: Option<DirectResponseAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_headers_to_add: Option<Vec<HeaderValueOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<RedirectAction>,
}

#[derive(Serialize, Debug)]
struct DirectResponseAction {
    status: u16,
    body: DataSource,
}

#[derive(Serialize, Debug, Default)]
struct DataSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
}

#[derive(Serialize, Debug)]
struct HeaderValueOption {
    header: HeaderValue,
}

#[derive(Serialize, Debug)]
struct HeaderValue {
    key: &'static str,
    value: String,
}

#[derive(Serialize, Debug)]
struct RedirectAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    https_redirect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheme_redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port_redirect: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path_redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix_rewrite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    regex_rewrite: Option<RegexRewriteAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strip_query: Option<bool>,
}

#[derive(Serialize, Debug)]
struct RegexRewriteAction {
    pattern: RegexMatcher,
    substitution: String,
}

#[derive(Serialize, Debug)]
struct RouteAction {
    cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_rewrite_literal: Option<String>,
}

impl Route {
    /// Patterns the `regex` crate cannot parse. RE2 accepts some of them (`\Q..\E`,
    /// `{,n}`, literal braces), so these are hints rather than errors.
    pub(crate) fn regex_warnings(&self) -> Vec<String> {
        let mut patterns = Vec::new();

        if self.kind == PathMatchKind::Regexp {
            patterns.push(self.path.as_str());
        }

        patterns.extend(
            self.headers
                .iter()
                .filter(|header| header.kind == HeaderMatchKind::Regexp)
                .map(|header| header.value.as_str()),
        );

        if let Response::Redirect(RedirectResponse {
            regex: Some(rewrite),
            ..
        }) = &self.response
        {
            patterns.push(rewrite.pattern.as_str());
        }

        patterns
            .into_iter()
            .filter_map(|pattern| check_regex(pattern).err())
            .collect()
    }

    /// Upstream clusters this route sends traffic to.
    pub(crate) fn clusters(&self) -> Vec<&str> {
        match &self.response {
            Response::Cluster(cluster) => match (self.websocket, &self.websocket_cluster) {
                (WebsocketMode::No, _) | (_, None) => vec![cluster.as_str()],
                (WebsocketMode::Yes, Some(ws)) => vec![ws.as_str()],
                (WebsocketMode::Both, Some(ws)) => vec![ws.as_str(), cluster.as_str()],
            },
            _ => vec![],
        }
    }

    fn route_match(&self) -> RouteMatch {
        RouteMatch::new(&self.path, self.kind, &self.headers)
    }

    /// Compiles into one route entry, or two for `websocket: both`.
    pub(crate) fn entries(&self) -> Result<Vec<RouteEntry>> {
        let entry = |route_match: RouteMatch| RouteEntry {
            route_match,
            name: self.name.clone(),
            route: None,
            direct_response: None,
            response_headers_to_add: None,
            redirect: None,
        };

        match &self.response {
            Response::Direct(direct) => {
                let body = match (&direct.body, &direct.filename) {
                    (Some(body), _) if !body.is_empty() => DataSource {
                        inline_string: Some(body.clone()),
                        ..Default::default()
                    },
                    (_, Some(filename)) => DataSource {
                        filename: Some(filename.clone()),
                        ..Default::default()
                    },
                    _ => DataSource {
                        inline_string: Some(String::new()),
                        ..Default::default()
                    },
                };

                Ok(vec![RouteEntry {
                    direct_response: Some(DirectResponseAction {
                        status: direct.status,
                        body,
                    }),
                    response_headers_to_add: direct.content_type.as_ref().map(|value| {
                        vec![HeaderValueOption {
                            header: HeaderValue {
                                key: "Content-Type",
                                value: value.clone(),
                            },
                        }]
                    }),
                    ..entry(self.route_match())
                }])
            }
            Response::Redirect(redirect) => Ok(vec![RouteEntry {
                redirect: Some(RedirectAction {
                    https_redirect: redirect.https,
                    scheme_redirect: redirect.scheme.clone(),
                    host_redirect: redirect.host.clone(),
                    port_redirect: redirect.port,
                    path_redirect: redirect.path.clone(),
                    prefix_rewrite: redirect.prefix.clone(),
                    regex_rewrite: redirect.regex.as_ref().map(|rewrite| RegexRewriteAction {
                        pattern: RegexMatcher::new(rewrite.pattern.clone()),
                        substitution: rewrite.substitution.clone(),
                    }),
                    response_code: redirect.code,
                    strip_query: redirect.strip,
                }),
                ..entry(self.route_match())
            }]),
            Response::Cluster(cluster) => {
                let mut entries = vec![];

                if matches!(self.websocket, WebsocketMode::Yes | WebsocketMode::Both) {
                    let upstream = self.websocket_cluster.as_ref().unwrap_or(cluster);
                    let mut route_match = self.route_match();
                    route_match.set_header(HeaderMatcher::exact("Upgrade", "websocket"));

                    let mut action = self.action(upstream)?;
                    upsert(
                        &mut action,
                        "upgrade_configs",
                        upgrade_config(),
                        |v| v["upgrade_type"] == "websocket",
                    );

                    entries.push(RouteEntry {
                        route: Some(action),
                        ..entry(route_match)
                    });
                }

                if matches!(self.websocket, WebsocketMode::No | WebsocketMode::Both) {
                    // Built from scratch so it shares nothing with the websocket entry.
                    entries.push(RouteEntry {
                        route: Some(self.action(cluster)?),
                        ..entry(self.route_match())
                    });
                }

                Ok(entries)
            }
        }
    }

    fn action(&self, cluster: &str) -> Result<Mapping> {
        let action = RouteAction {
            cluster: Cluster::resource_name(cluster),
            host_rewrite_literal: self.rewrite_host.clone(),
        };

        merge(&self.init, &action, &self.overlay)
    }
}

fn upgrade_config() -> Value {
    let mut config = Mapping::new();
    config.insert("upgrade_type".into(), "websocket".into());
    Value::Mapping(config)
}
