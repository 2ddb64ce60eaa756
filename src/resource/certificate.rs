use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use super::{merge, Document, Named, Resource};
use crate::error::{check_name, Error, ResourceKind, Result};
use crate::provider::Provider;

pub(crate) const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// Where the certificate chain and private key come from.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CertificateSource {
    /// PEM text embedded in the document.
    Inline,
    /// Paths envoy reads itself.
    #[default]
    File,
    /// Paths read at compile time and embedded as PEM text.
    InlineFile,
    /// Environment variable names envoy resolves.
    Env,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct CertificateOptions {
    pub(crate) name: String,
    /// Certificate chain.
    pub(crate) cert: String,
    /// Private key.
    pub(crate) key: String,
    #[serde(default, rename = "type")]
    pub(crate) source: CertificateSource,
    #[serde(default)]
    pub(crate) init: Mapping,
    #[serde(default)]
    pub(crate) overlay: Mapping,
}

/// TLS certificate delivered to envoy as an SDS secret named `tls_<name>`.
#[derive(Debug, Clone)]
pub(crate) struct Certificate {
    opts: CertificateOptions,
}

#[derive(Serialize, Debug)]
struct SecretDocument {
    #[serde(rename = "@type")]
    type_url: &'static str,
    name: String,
    tls_certificate: TlsCertificate,
}

#[derive(Serialize, Debug)]
struct TlsCertificate {
    certificate_chain: DataSource,
    private_key: DataSource,
}

#[derive(Serialize, Debug, Default)]
struct DataSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment_variable: Option<String>,
}

impl DataSource {
    fn new(source: CertificateSource, value: String) -> Self {
        match source {
            CertificateSource::Inline | CertificateSource::InlineFile => Self {
                inline_string: Some(value),
                ..Default::default()
            },
            CertificateSource::File => Self {
                filename: Some(value),
                ..Default::default()
            },
            CertificateSource::Env => Self {
                environment_variable: Some(value),
                ..Default::default()
            },
        }
    }
}

impl Certificate {
    pub(crate) fn new(opts: CertificateOptions) -> Result<Self> {
        check_name(ResourceKind::Certificate, &opts.name)?;

        // The name becomes part of a file name in the output directory.
        if opts.name.contains('/') || opts.name.contains('\\') {
            return Err(Error::invalid(
                ResourceKind::Certificate,
                &opts.name,
                "name must not contain path separators",
            ));
        }

        Ok(Self { opts })
    }

    /// Name of the secret inside the SDS document.
    pub(crate) fn secret_name(name: &str) -> String {
        format!("tls_{name}")
    }

    /// File the SDS document is deployed to, relative to the output directory.
    pub(crate) fn file_name(name: &str) -> String {
        format!("{}.yaml", Self::secret_name(name))
    }

    async fn tls_certificate(&self, provider: &dyn Provider) -> Result<TlsCertificate> {
        let opts = &self.opts;

        let (cert, key) = match opts.source {
            CertificateSource::InlineFile => (
                provider.read_text(Path::new(&opts.cert)).await?,
                provider.read_text(Path::new(&opts.key)).await?,
            ),
            _ => (opts.cert.clone(), opts.key.clone()),
        };

        Ok(TlsCertificate {
            certificate_chain: DataSource::new(opts.source, cert),
            private_key: DataSource::new(opts.source, key),
        })
    }
}

impl Named for Certificate {
    fn name(&self) -> &str {
        &self.opts.name
    }
}

#[async_trait]
impl Resource for Certificate {
    async fn compile(&self, provider: &dyn Provider) -> Result<Document> {
        let document = SecretDocument {
            type_url: SECRET_TYPE_URL,
            name: Self::secret_name(&self.opts.name),
            tls_certificate: self.tls_certificate(provider).await?,
        };

        merge(&self.opts.init, &document, &self.opts.overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryProvider;
    use crate::resource::tests::{mapping, yaml};
    use serde_yaml::Value;

    fn options(source: CertificateSource) -> CertificateOptions {
        CertificateOptions {
            name: "example.com".to_owned(),
            cert: "/certs/fullchain.pem".to_owned(),
            key: "/certs/privkey.pem".to_owned(),
            source,
            ..Default::default()
        }
    }

    #[test]
    fn empty_name_is_rejected_at_construction() {
        let result = Certificate::new(CertificateOptions::default());

        assert!(matches!(result, Err(Error::InvalidName { .. })));
    }

    #[test]
    fn path_separator_in_name_is_rejected() {
        let mut opts = options(CertificateSource::File);
        opts.name = "../etc".to_owned();

        assert!(matches!(
            Certificate::new(opts),
            Err(Error::Invalid { .. })
        ));
    }

    #[test]
    fn unknown_type_is_rejected_when_parsing() {
        let result = serde_yaml::from_str::<CertificateOptions>(
            "{ name: a, cert: c, key: k, type: pkcs12 }",
        );

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn file_certificate() {
        let certificate = Certificate::new(options(CertificateSource::File)).unwrap();

        let document = certificate.compile(&MemoryProvider::default()).await.unwrap();

        assert_eq!(
            Value::Mapping(document),
            yaml(
                r#"
"@type": type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret
name: tls_example.com
tls_certificate:
  certificate_chain: { filename: /certs/fullchain.pem }
  private_key: { filename: /certs/privkey.pem }
"#
            )
        );
    }

    #[tokio::test]
    async fn inline_and_env_certificates() {
        let provider = MemoryProvider::default();

        let inline = Certificate::new(options(CertificateSource::Inline))
            .unwrap()
            .compile(&provider)
            .await
            .unwrap();
        let env = Certificate::new(options(CertificateSource::Env))
            .unwrap()
            .compile(&provider)
            .await
            .unwrap();

        assert_eq!(
            inline["tls_certificate"]["private_key"],
            yaml("{ inline_string: /certs/privkey.pem }")
        );
        assert_eq!(
            env["tls_certificate"]["certificate_chain"],
            yaml("{ environment_variable: /certs/fullchain.pem }")
        );
    }

    #[tokio::test]
    async fn inline_file_reads_through_provider() {
        let provider = MemoryProvider::default();
        provider.put("/certs/fullchain.pem", "CHAIN");
        provider.put("/certs/privkey.pem", "KEY");

        let document = Certificate::new(options(CertificateSource::InlineFile))
            .unwrap()
            .compile(&provider)
            .await
            .unwrap();

        assert_eq!(
            document["tls_certificate"],
            yaml("{ certificate_chain: { inline_string: CHAIN }, private_key: { inline_string: KEY } }")
        );
    }

    #[tokio::test]
    async fn inline_file_missing_is_an_io_error() {
        let result = Certificate::new(options(CertificateSource::InlineFile))
            .unwrap()
            .compile(&MemoryProvider::default())
            .await;

        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[tokio::test]
    async fn init_and_overlay() {
        let mut opts = options(CertificateSource::File);
        opts.init = mapping("{ name: ignored, extra: 1 }");
        opts.overlay = mapping("{ tls_certificate: replaced }");

        let document = Certificate::new(opts)
            .unwrap()
            .compile(&MemoryProvider::default())
            .await
            .unwrap();

        assert_eq!(document["name"], "tls_example.com");
        assert_eq!(document["extra"], 1);
        assert_eq!(document["tls_certificate"], "replaced");
    }
}
