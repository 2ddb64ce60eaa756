use std::path::Path;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::resource::{to_mapping, Document, PathConfigSource};

const DYNAMIC_RESOURCES: &str = "dynamic_resources";

#[derive(Serialize, Debug)]
struct DynamicResources {
    cds_config: PathConfigSource,
    lds_config: PathConfigSource,
}

#[derive(Serialize, Debug)]
struct Node {
    cluster: &'static str,
    id: &'static str,
}

#[derive(Serialize, Debug)]
struct LayeredRuntime {
    layers: Vec<RuntimeLayer>,
}

#[derive(Serialize, Debug)]
struct RuntimeLayer {
    name: &'static str,
    static_layer: Value,
}

fn default_runtime() -> Result<Value> {
    let static_layer = serde_yaml::from_str(
        r#"
envoy:
  resource_limits:
    listener:
      http_listener: { connection_limit: 10000 }
      https_listener: { connection_limit: 10000 }
overload:
  global_downstream_max_connections: 50000
"#,
    )
    .map_err(|e| Error::serialize("layered_runtime", e))?;

    serde_yaml::to_value(LayeredRuntime {
        layers: vec![RuntimeLayer {
            name: "static_layer_conns",
            static_layer,
        }],
    })
    .map_err(|e| Error::serialize("layered_runtime", e))
}

/// Top-level envoy configuration: file based LDS/CDS under `watch`, the caller's `fixed`
/// sections, then a default node identity and connection limits where `fixed` has none.
pub(crate) fn bootstrap(watch: &Path, fixed: &Mapping) -> Result<Document> {
    let dynamic = DynamicResources {
        cds_config: PathConfigSource::new(&watch.join("cds.yaml")),
        lds_config: PathConfigSource::new(&watch.join("lds.yaml")),
    };

    let mut document = Mapping::new();
    document.insert(
        DYNAMIC_RESOURCES.into(),
        Value::Mapping(to_mapping(&dynamic)?),
    );

    for (key, value) in fixed {
        if key.as_str() == Some(DYNAMIC_RESOURCES) {
            return Err(Error::ReservedSection(DYNAMIC_RESOURCES.to_owned()));
        }

        document.insert(key.clone(), value.clone());
    }

    if !document.contains_key("node") {
        let node = Node {
            cluster: "envoy-xDS-cluster",
            id: "envoy-xDS-id",
        };
        document.insert("node".into(), Value::Mapping(to_mapping(&node)?));
    }

    if !document.contains_key("layered_runtime") {
        document.insert("layered_runtime".into(), default_runtime()?);
    }

    Ok(document)
}
