use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::{Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use derive_more::Display;

/// A TLS SNI name a filter chain matches on.
#[derive(Debug, Clone, PartialEq, Display)]
#[display(fmt = "{}", _0)]
pub(crate) struct ServerName(String);

#[derive(Debug, PartialEq, Display)]
pub(crate) enum ServerNameParseError {
    #[display(fmt = "empty server name")]
    EmptyStr,
    #[display(fmt = "empty label in {:?}", _0)]
    EmptyLabel(String),
    #[display(fmt = "invalid label in {:?}", _0)]
    InvalidLabel(String),
    #[display(fmt = "wildcard must be the whole first label in {:?}", _0)]
    InvalidWildcard(String),
    #[display(fmt = "unexpected ip address {:?}", _0)]
    UnexpectedIp(String),
}

fn label_regex() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9_]([a-z0-9_-]*[a-z0-9_])?$").expect("label pattern compiles")
    })
}

impl FromStr for ServerName {
    type Err = ServerNameParseError;

    /// A hostname, optionally prefixed by a single `*.` wildcard label. Names are
    /// case-insensitive and stored lowercased; labels may carry underscores as in
    /// `_acme.example.com`. IP addresses never appear in SNI and are rejected.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = &value.to_ascii_lowercase();

        if value.is_empty() {
            return Err(ServerNameParseError::EmptyStr);
        }

        if IpAddr::from_str(value).is_ok() {
            return Err(ServerNameParseError::UnexpectedIp(value.to_owned()));
        }

        let mut wildcard = false;

        // Walk from the top level domain down; a wildcard can only be the last label seen.
        for label in value.split('.').rev() {
            if label.is_empty() {
                return Err(ServerNameParseError::EmptyLabel(value.to_owned()));
            }

            if wildcard {
                return Err(ServerNameParseError::InvalidWildcard(value.to_owned()));
            }

            if label == "*" {
                wildcard = true;
            } else if !label_regex().is_match(label) {
                return Err(ServerNameParseError::InvalidLabel(value.to_owned()));
            }
        }

        if wildcard && !value.contains('.') {
            return Err(ServerNameParseError::InvalidWildcard(value.to_owned()));
        }

        Ok(Self(value.to_owned()))
    }
}

struct ServerNameVisitor;

impl<'de> Visitor<'de> for ServerNameVisitor {
    type Value = ServerName;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a hostname, optionally starting with *.")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        ServerName::from_str(value).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ServerName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_string(ServerNameVisitor)
    }
}

impl Serialize for ServerName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}
