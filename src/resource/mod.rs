pub(crate) mod certificate;
pub(crate) mod cluster;
pub(crate) mod filter_chain;
pub(crate) mod listener;
pub(crate) mod router;
pub(crate) mod server_name;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::provider::Provider;

pub(crate) use certificate::{Certificate, CertificateOptions};
pub(crate) use cluster::{Cluster, ClusterOptions};
pub(crate) use filter_chain::{FilterChain, FilterChainOptions};
pub(crate) use listener::{Listener, ListenerOptions};
pub(crate) use router::{Router, RouterOptions};

/// Ordered mapping a resource compiles into.
pub(crate) type Document = Mapping;

/// Anything registered in a project collection carries a unique name.
pub(crate) trait Named {
    fn name(&self) -> &str;
}

/// A named entity that compiles into one resource document of a collection file.
#[async_trait]
pub(crate) trait Resource: Named + Send + Sync {
    async fn compile(&self, provider: &dyn Provider) -> Result<Document>;
}

/// Shallow merge: `init` keys first, then computed fields overwrite them, then `overlay`
/// overwrites everything. Keys keep the position of their first insertion.
pub(crate) fn merge<T: Serialize>(
    init: &Mapping,
    computed: &T,
    overlay: &Mapping,
) -> Result<Document> {
    let mut document = init.clone();

    for (key, value) in to_mapping(computed)? {
        document.insert(key, value);
    }

    for (key, value) in overlay {
        document.insert(key.clone(), value.clone());
    }

    Ok(document)
}

pub(crate) fn to_mapping<T: Serialize>(value: &T) -> Result<Mapping> {
    match serde_yaml::to_value(value).map_err(|e| Error::serialize("resource", e))? {
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(Error::serialize(
            "resource",
            serde::ser::Error::custom(format!("expected a mapping, got {other:?}")),
        )),
    }
}

/// Replaces the first element of the sequence under `key` matching `same`, or appends `item`.
/// A missing or non-sequence value is replaced by `[item]`.
pub(crate) fn upsert(document: &mut Mapping, key: &str, item: Value, same: impl Fn(&Value) -> bool) {
    match document.get_mut(key) {
        Some(Value::Sequence(items)) => match items.iter_mut().find(|v| same(v)) {
            Some(found) => *found = item,
            None => items.push(item),
        },
        _ => {
            document.insert(Value::from(key), Value::Sequence(vec![item]));
        }
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct TypedConfig<T> {
    pub(crate) name: &'static str,
    pub(crate) typed_config: T,
}

#[derive(Serialize, Debug)]
pub(crate) struct TypeOnly {
    #[serde(rename = "@type")]
    pub(crate) type_url: &'static str,
}

/// `envoy.config.core.v3.ConfigSource` reading a watched file.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct PathConfigSource {
    path_config_source: FilePath,
    resource_api_version: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
struct FilePath {
    path: String,
}

impl PathConfigSource {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path_config_source: FilePath {
                path: path.display().to_string(),
            },
            resource_api_version: "V3",
        }
    }
}

/// `envoy.config.core.v3.Address`: either a socket or a unix domain socket path.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub(crate) struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) socket_address: Option<SocketAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) pipe: Option<Pipe>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct SocketAddress {
    pub(crate) address: String,
    pub(crate) port_value: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) protocol: Option<&'static str>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub(crate) struct Pipe {
    pub(crate) path: String,
}

impl Address {
    pub(crate) fn socket(address: impl Into<String>, port_value: u16) -> Self {
        Self {
            socket_address: Some(SocketAddress {
                address: address.into(),
                port_value,
                protocol: None,
            }),
            pipe: None,
        }
    }

    pub(crate) fn pipe(path: impl Into<String>) -> Self {
        Self {
            socket_address: None,
            pipe: Some(Pipe { path: path.into() }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    pub(crate) fn mapping(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[derive(Serialize)]
    struct Computed {
        name: &'static str,
        kind: &'static str,
    }

    #[test]
    fn computed_fields_beat_init_and_lose_to_overlay() {
        let init = mapping("{ name: from-init, extra: 1 }");
        let overlay = mapping("{ kind: from-overlay }");

        let document = merge(
            &init,
            &Computed {
                name: "computed",
                kind: "computed",
            },
            &overlay,
        )
        .unwrap();

        assert_eq!(
            Value::Mapping(document),
            yaml("{ name: computed, extra: 1, kind: from-overlay }")
        );
    }

    #[test]
    fn merge_is_shallow() {
        let init = mapping("{ nested: { a: 1, b: 2 } }");
        let overlay = mapping("{ nested: { c: 3 } }");

        let document = merge(&init, &Mapping::new(), &overlay).unwrap();

        assert_eq!(Value::Mapping(document), yaml("{ nested: { c: 3 } }"));
    }

    #[test]
    fn init_keys_keep_their_position() {
        let init = mapping("{ name: x, first: 1 }");

        let document = merge(
            &init,
            &Computed {
                name: "computed",
                kind: "k",
            },
            &Mapping::new(),
        )
        .unwrap();

        let keys: Vec<_> = document.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, vec!["name", "first", "kind"]);
    }

    #[test]
    fn upsert_replaces_matching_item() {
        let mut document = mapping("{ headers: [ { name: Upgrade, v: old }, { name: Host } ] }");

        upsert(&mut document, "headers", yaml("{ name: Upgrade, v: new }"), |v| {
            v["name"] == "Upgrade"
        });

        assert_eq!(
            Value::Mapping(document),
            yaml("{ headers: [ { name: Upgrade, v: new }, { name: Host } ] }")
        );
    }

    #[test]
    fn upsert_appends_or_creates() {
        let mut document = mapping("{ headers: [ { name: Host } ] }");

        upsert(&mut document, "headers", yaml("{ name: Upgrade }"), |v| {
            v["name"] == "Upgrade"
        });
        upsert(&mut document, "upgrade_configs", yaml("{ upgrade_type: websocket }"), |_| true);

        assert_eq!(
            Value::Mapping(document),
            yaml(
                "{ headers: [ { name: Host }, { name: Upgrade } ], upgrade_configs: [ { upgrade_type: websocket } ] }"
            )
        );
    }
}
