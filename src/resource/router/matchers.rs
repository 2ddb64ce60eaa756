use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

/// How a route's `path` is compared with the request path.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum PathMatchKind {
    Equal,
    #[default]
    Prefix,
    Regexp,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum HeaderMatchKind {
    #[default]
    Equal,
    Prefix,
    Suffix,
    Contains,
    Regexp,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct HeaderMatch {
    pub(crate) name: String,
    pub(crate) value: String,
    #[serde(default, rename = "match")]
    pub(crate) kind: HeaderMatchKind,
}

/// `envoy.type.matcher.v3.RegexMatcher`, always on the RE2 engine.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct RegexMatcher {
    google_re2: Mapping,
    regex: String,
}

impl RegexMatcher {
    pub(crate) fn new(regex: impl Into<String>) -> Self {
        Self {
            google_re2: Mapping::new(),
            regex: regex.into(),
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub(crate) struct StringMatcher {
    #[serde(skip_serializing_if = "Option::is_none")]
    exact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    safe_regex: Option<RegexMatcher>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct HeaderMatcher {
    pub(crate) name: String,
    string_match: StringMatcher,
}

impl HeaderMatcher {
    pub(crate) fn exact(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            string_match: StringMatcher {
                exact: Some(value.to_owned()),
                ..Default::default()
            },
        }
    }
}

impl From<&HeaderMatch> for HeaderMatcher {
    fn from(header: &HeaderMatch) -> Self {
        let value = Some(header.value.clone());

        let string_match = match header.kind {
            HeaderMatchKind::Equal => StringMatcher {
                exact: value,
                ..Default::default()
            },
            HeaderMatchKind::Prefix => StringMatcher {
                prefix: value,
                ..Default::default()
            },
            HeaderMatchKind::Suffix => StringMatcher {
                suffix: value,
                ..Default::default()
            },
            HeaderMatchKind::Contains => StringMatcher {
                contains: value,
                ..Default::default()
            },
            HeaderMatchKind::Regexp => StringMatcher {
                safe_regex: Some(RegexMatcher::new(header.value.clone())),
                ..Default::default()
            },
        };

        Self {
            name: header.name.clone(),
            string_match,
        }
    }
}

/// `envoy.config.route.v3.RouteMatch`.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub(crate) struct RouteMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    safe_regex: Option<RegexMatcher>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<HeaderMatcher>,
}

impl RouteMatch {
    pub(crate) fn new(path: &str, kind: PathMatchKind, headers: &[HeaderMatch]) -> Self {
        let path = path.to_owned();

        let mut route_match = match kind {
            PathMatchKind::Equal => Self {
                path: Some(path),
                ..Default::default()
            },
            PathMatchKind::Prefix => Self {
                prefix: Some(path),
                ..Default::default()
            },
            PathMatchKind::Regexp => Self {
                safe_regex: Some(RegexMatcher::new(path)),
                ..Default::default()
            },
        };

        route_match.headers = headers.iter().map(HeaderMatcher::from).collect();
        route_match
    }

    /// Replaces the first header matcher with the same name, or appends.
    pub(crate) fn set_header(&mut self, matcher: HeaderMatcher) {
        match self.headers.iter_mut().find(|h| h.name == matcher.name) {
            Some(found) => *found = matcher,
            None => self.headers.push(matcher),
        }
    }
}

/// Parses a pattern with the `regex` crate to flag likely typos. Envoy compiles with RE2,
/// which accepts a few forms this rejects, so callers only warn.
pub(crate) fn check_regex(pattern: &str) -> Result<(), String> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| format!("invalid regexp {pattern:?}: {e}"))
}
