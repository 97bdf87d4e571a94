//! Kubeconfig files.
//!
//! Only what a client needs to reach one cluster is read: the server, its CA,
//! and the user's bearer token or client certificate. Relative paths resolve
//! against the directory of the kubeconfig file.

use crate::error::{ApiError, ApiResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Credential material, either on disk or embedded in the kubeconfig.
#[derive(Clone, PartialEq, Eq)]
pub enum Source {
    /// Read from a file when the client is built.
    File(PathBuf),
    /// Embedded bytes.
    Inline(Vec<u8>),
}

impl Source {
    /// Read the material.
    pub fn load(&self) -> ApiResult<Vec<u8>> {
        match self {
            Source::File(path) => std::fs::read(path)
                .map_err(|e| ApiError::Request(format!("failed to read {}: {e}", path.display()))),
            Source::Inline(bytes) => Ok(bytes.clone()),
        }
    }

    /// Read the material as trimmed UTF-8.
    pub fn load_string(&self) -> ApiResult<String> {
        let bytes = self.load()?;
        String::from_utf8(bytes)
            .map(|s| s.trim().to_string())
            .map_err(|_| ApiError::Request(format!("{self} is not valid UTF-8")))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Inline(_) => f.write_str("<inline data>"),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) => f.debug_tuple("File").field(path).finish(),
            Source::Inline(_) => f.write_str("Inline(<redacted>)"),
        }
    }
}

/// Connection settings of one kubeconfig context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigTarget {
    /// Name of the selected context.
    pub context: String,
    /// API server URL.
    pub server: String,
    /// CA bundle used to verify the server.
    pub ca: Option<Source>,
    /// Bearer token.
    pub token: Option<Source>,
    /// Client certificate and key, both PEM.
    pub identity: Option<(Source, Source)>,
    /// Skip server certificate verification.
    pub insecure: bool,
    /// Default namespace of the context.
    pub namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawKubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

/// A parsed kubeconfig file.
#[derive(Debug)]
pub struct Kubeconfig {
    raw: RawKubeconfig,
    base_dir: PathBuf,
}

impl Kubeconfig {
    /// Read and parse a kubeconfig file.
    pub fn from_file(path: &Path) -> ApiResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ApiError::Request(format!("failed to read kubeconfig {}: {e}", path.display()))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Self::from_yaml(&content, base_dir)
            .map_err(|e| ApiError::Request(format!("kubeconfig {}: {e}", path.display())))
    }

    /// Parse kubeconfig YAML; relative paths resolve against `base_dir`.
    pub fn from_yaml(content: &str, base_dir: impl Into<PathBuf>) -> ApiResult<Self> {
        let raw: RawKubeconfig = serde_yaml::from_str(content)
            .map_err(|e| ApiError::Request(format!("invalid kubeconfig: {e}")))?;
        Ok(Self {
            raw,
            base_dir: base_dir.into(),
        })
    }

    /// Settings of `context`, or of the current context when `None`.
    pub fn target(&self, context: Option<&str>) -> ApiResult<KubeconfigTarget> {
        let name = context
            .or(self.raw.current_context.as_deref())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::Request("kubeconfig has no current-context".into()))?;
        let context = self
            .raw
            .contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
            .ok_or_else(|| ApiError::Request(format!("kubeconfig context {name} not found")))?;
        let cluster = self
            .raw
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                ApiError::Request(format!("kubeconfig cluster {} not found", context.cluster))
            })?;
        let user = match &context.user {
            Some(user) => Some(
                self.raw
                    .users
                    .iter()
                    .find(|u| &u.name == user)
                    .map(|u| &u.user)
                    .ok_or_else(|| ApiError::Request(format!("kubeconfig user {user} not found")))?,
            ),
            None => None,
        };

        let ca = self.source(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
        )?;
        let (token, identity) = match user {
            Some(user) => {
                let token = match (&user.token, &user.token_file) {
                    (Some(token), _) => Some(Source::Inline(token.clone().into_bytes())),
                    (None, Some(path)) => Some(Source::File(self.resolve(path))),
                    (None, None) => None,
                };
                let cert = self.source(
                    user.client_certificate_data.as_deref(),
                    user.client_certificate.as_deref(),
                )?;
                let key = self.source(user.client_key_data.as_deref(), user.client_key.as_deref())?;
                (token, cert.zip(key))
            }
            None => (None, None),
        };

        Ok(KubeconfigTarget {
            context: name.to_string(),
            server: cluster.server.trim_end_matches('/').to_string(),
            ca,
            token,
            identity,
            insecure: cluster.insecure_skip_tls_verify,
            namespace: context.namespace.clone(),
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Embedded base64 data wins over a file path.
    fn source(&self, data: Option<&str>, path: Option<&Path>) -> ApiResult<Option<Source>> {
        if let Some(data) = data {
            let bytes = STANDARD
                .decode(data.trim())
                .map_err(|e| ApiError::Request(format!("invalid base64 in kubeconfig: {e}")))?;
            return Ok(Some(Source::Inline(bytes)));
        }
        Ok(path.map(|path| Source::File(self.resolve(path))))
    }
}
