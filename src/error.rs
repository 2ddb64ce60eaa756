use std::{io, path::PathBuf};

use derive_more::Display;

use crate::address::AddrError;

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// What kind of entity an error is about.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    #[display(fmt = "certificate")]
    Certificate,
    #[display(fmt = "cluster")]
    Cluster,
    #[display(fmt = "listener")]
    Listener,
    #[display(fmt = "filter chain")]
    FilterChain,
    #[display(fmt = "router")]
    Router,
}

/// Registration collections of a project, named after the discovery service they feed.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collection {
    #[display(fmt = "lds")]
    Listeners,
    #[display(fmt = "cds")]
    Clusters,
    #[display(fmt = "sds")]
    Certificates,
    #[display(fmt = "routers")]
    Routers,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("{kind} name invalid: {name:?}")]
    InvalidName { kind: ResourceKind, name: String },

    #[error("{kind} {name}: {source}")]
    Address {
        kind: ResourceKind,
        name: String,
        #[source]
        source: AddrError,
    },

    #[error("{kind} {name}: {message}")]
    Invalid {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("{0} already exists: {1}")]
    AlreadyExists(Collection, String),

    #[error("{0} name repeat: {1}")]
    NameRepeat(Collection, String),

    #[error("unknown router: {0}")]
    UnknownRouter(String),

    #[error("fixed cannot specify {0}")]
    ReservedSection(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse project file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize {context}: {source}")]
    Serialize {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl Error {
    pub(crate) fn invalid(kind: ResourceKind, name: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            name: name.to_owned(),
            message: message.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn serialize(context: impl Into<String>, source: serde_yaml::Error) -> Self {
        Self::Serialize {
            context: context.into(),
            source,
        }
    }
}

/// Rejects empty names, the one check every entity shares.
pub(crate) fn check_name(kind: ResourceKind, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            kind,
            name: name.to_owned(),
        });
    }

    Ok(())
}
