//! JSON-over-HTTPS client for a Kubernetes API server.
//!
//! Covers `apps/v1` Deployments, `v1` Pods and `chaos-mesh.org/v1alpha1`
//! IOChaos objects. Requests go through an optional client-side token bucket
//! (qps/burst) before they are sent.

use super::kubeconfig::{Kubeconfig, Source};
use super::{
    ConditionApi, ConditionPhase, ConditionRecord, ConditionSpec, ConditionStatus, PatchOp,
    Resource, ResourceApi,
};
use crate::config::ConnectionConfig;
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use perf_types::ResourceKind;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Mount point of the pod's service-account credentials.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Plural of the condition kind, used in REST paths and errors.
const CONDITION_PLURAL: &str = "iochaos";

const JSON_PATCH: &str = "application/json-patch+json";

/// Where and how to reach the API server.
#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    base_url: String,
    token: Option<Source>,
    ca_cert: Option<Source>,
    identity: Option<(Source, Source)>,
    insecure: bool,
}

impl Endpoint {
    /// An explicit `api_server` wins, then a kubeconfig file, then the
    /// in-cluster service environment and the mounted service-account files.
    /// Explicit `token_file` and `ca_cert` override what the others provide.
    fn resolve(
        config: &ConnectionConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> ApiResult<Self> {
        let token_file = config.token_file.clone().map(Source::File);
        let ca_cert = config.ca_cert.clone().map(Source::File);

        if let Some(api_server) = &config.api_server {
            return Ok(Self {
                base_url: api_server.trim_end_matches('/').to_string(),
                token: token_file,
                ca_cert,
                identity: None,
                insecure: false,
            });
        }

        let kubeconfig = config
            .kubeconfig
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty());
        if let Some(path) = kubeconfig {
            let target = Kubeconfig::from_file(path)?.target(config.context.as_deref())?;
            tracing::debug!(
                kubeconfig = %path.display(),
                context = %target.context,
                "using kubeconfig context"
            );
            return Ok(Self {
                base_url: target.server,
                token: token_file.or(target.token),
                ca_cert: ca_cert.or(target.ca),
                identity: target.identity,
                insecure: target.insecure,
            });
        }

        let host = env("KUBERNETES_SERVICE_HOST").ok_or_else(|| {
            ApiError::Request(
                "no api_server or kubeconfig configured and KUBERNETES_SERVICE_HOST is unset"
                    .into(),
            )
        })?;
        let port = env("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".into());
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let account = Path::new(SERVICE_ACCOUNT_DIR);
        Ok(Self {
            base_url: format!("https://{host}:{port}"),
            token: token_file.or_else(|| Some(Source::File(account.join("token")))),
            ca_cert: ca_cert.or_else(|| Some(Source::File(account.join("ca.crt")))),
            identity: None,
            insecure: false,
        })
    }
}

/// Object metadata, the subset this client reads and writes.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_version: Option<String>,
}

/// Wire form of a Deployment or Pod.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    metadata: ObjectMeta,
    #[serde(default)]
    spec: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ManifestList {
    #[serde(default)]
    items: Vec<Manifest>,
}

fn api_version(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Deployment => "apps/v1",
        ResourceKind::Pod => "v1",
    }
}

fn kind_name(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Deployment => "Deployment",
        ResourceKind::Pod => "Pod",
    }
}

fn to_manifest(resource: &Resource) -> Manifest {
    Manifest {
        api_version: Some(api_version(resource.kind).into()),
        kind: Some(kind_name(resource.kind).into()),
        metadata: ObjectMeta {
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
            labels: resource.labels.clone(),
            annotations: resource.annotations.clone(),
            resource_version: resource.resource_version.clone(),
        },
        spec: resource.spec.clone(),
    }
}

fn from_manifest(kind: ResourceKind, manifest: Manifest) -> Resource {
    Resource {
        kind,
        name: manifest.metadata.name,
        namespace: manifest.metadata.namespace,
        labels: manifest.metadata.labels,
        annotations: manifest.metadata.annotations,
        resource_version: manifest.metadata.resource_version,
        spec: manifest.spec,
    }
}

/// Map a non-success HTTP status to an [`ApiError`].
fn status_error(status: u16, kind: &str, name: &str, body: &str) -> ApiError {
    match status {
        404 => ApiError::NotFound {
            kind: kind.into(),
            name: name.into(),
        },
        409 => ApiError::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        },
        _ => {
            // Kubernetes wraps failures in a Status object carrying `message`.
            let message = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| body.to_string());
            ApiError::Status { status, message }
        }
    }
}

/// Read per-record phases out of a condition's `status`.
fn parse_condition_status(object: &serde_json::Value) -> ConditionStatus {
    let experiment = &object["status"]["experiment"];
    let records = experiment
        .get("containerRecords")
        .or_else(|| experiment.get("records"))
        .and_then(|r| r.as_array())
        .map(|records| {
            records
                .iter()
                .map(|record| ConditionRecord {
                    id: record["id"].as_str().unwrap_or_default().to_string(),
                    phase: ConditionPhase::from_api(record["phase"].as_str().unwrap_or_default()),
                })
                .collect()
        })
        .unwrap_or_default();
    ConditionStatus { records }
}

/// REST client for one API server.
#[derive(Clone)]
pub struct KubeClient {
    base_url: String,
    http: reqwest::Client,
    token: Option<String>,
    limiter: Option<Arc<DirectLimiter>>,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("limiter", &self.limiter.as_ref().map(|_| "DirectLimiter"))
            .finish()
    }
}

impl KubeClient {
    /// Build a client from connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Request`] if no server can be resolved, a
    /// credential file cannot be read, or the HTTP client cannot be built.
    pub fn new(config: &ConnectionConfig) -> ApiResult<Self> {
        let endpoint = Endpoint::resolve(config, |key| std::env::var(key).ok())?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify || endpoint.insecure);

        if let Some(source) = &endpoint.ca_cert {
            let cert = reqwest::Certificate::from_pem(&source.load()?)
                .map_err(|e| ApiError::Request(format!("invalid CA bundle {source}: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some((cert, key)) = &endpoint.identity {
            let mut pem = cert.load()?;
            pem.push(b'\n');
            pem.extend(key.load()?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ApiError::Request(format!("invalid client certificate {cert}: {e}")))?;
            builder = builder.identity(identity);
        }

        let token = endpoint.token.as_ref().map(Source::load_string).transpose()?;

        let http = builder
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        let limiter = NonZeroU32::new(config.qps)
            .zip(NonZeroU32::new(config.burst))
            .map(|(qps, burst)| Quota::per_second(qps).allow_burst(burst))
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        tracing::debug!(
            api_server = %endpoint.base_url,
            qps = config.qps,
            burst = config.burst,
            "API client ready"
        );

        Ok(Self {
            base_url: endpoint.base_url,
            http,
            token,
            limiter,
        })
    }

    /// Base URL of the API server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Collection URL of a resource kind in a namespace.
    pub fn collection_url(&self, kind: ResourceKind, namespace: &str) -> String {
        match kind {
            ResourceKind::Deployment => format!(
                "{}/apis/apps/v1/namespaces/{}/deployments",
                self.base_url, namespace
            ),
            ResourceKind::Pod => format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace),
        }
    }

    /// URL of one named object.
    pub fn object_url(&self, kind: ResourceKind, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_url(kind, namespace), name)
    }

    /// Collection URL of condition objects in a namespace.
    pub fn condition_collection_url(&self, namespace: &str) -> String {
        format!(
            "{}/apis/chaos-mesh.org/v1alpha1/namespaces/{}/{}",
            self.base_url, namespace, CONDITION_PLURAL
        )
    }

    /// URL of one named condition object.
    pub fn condition_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.condition_collection_url(namespace), name)
    }

    /// Wait for the rate limiter, authenticate, send and check the status.
    async fn send(&self, request: RequestBuilder, kind: &str, name: &str) -> ApiResult<Response> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), kind, name, &body))
    }

    async fn send_for_resource(
        &self,
        kind: ResourceKind,
        request: RequestBuilder,
        name: &str,
    ) -> ApiResult<Resource> {
        let response = self.send(request, kind.plural(), name).await?;
        let manifest: Manifest = response.json().await?;
        Ok(from_manifest(kind, manifest))
    }
}

#[async_trait]
impl ResourceApi for KubeClient {
    async fn create(&self, resource: &Resource) -> ApiResult<Resource> {
        let url = self.collection_url(resource.kind, &resource.namespace);
        let request = self.http.post(url).json(&to_manifest(resource));
        self.send_for_resource(resource.kind, request, &resource.name)
            .await
    }

    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> ApiResult<Resource> {
        let request = self.http.get(self.object_url(kind, namespace, name));
        self.send_for_resource(kind, request, name).await
    }

    async fn update(&self, resource: &Resource) -> ApiResult<Resource> {
        let url = self.object_url(resource.kind, &resource.namespace, &resource.name);
        let request = self.http.put(url).json(&to_manifest(resource));
        self.send_for_resource(resource.kind, request, &resource.name)
            .await
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &[PatchOp],
    ) -> ApiResult<Resource> {
        let body = serde_json::to_vec(patch).map_err(|e| ApiError::Request(e.to_string()))?;
        let request = self
            .http
            .patch(self.object_url(kind, namespace, name))
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(body);
        self.send_for_resource(kind, request, name).await
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> ApiResult<Vec<Resource>> {
        let request = self
            .http
            .get(self.collection_url(kind, namespace))
            .query(&[("labelSelector", label_selector)]);
        let response = self.send(request, kind.plural(), label_selector).await?;
        let list: ManifestList = response.json().await?;
        Ok(list
            .items
            .into_iter()
            .map(|manifest| from_manifest(kind, manifest))
            .collect())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> ApiResult<()> {
        let request = self.http.delete(self.object_url(kind, namespace, name));
        self.send(request, kind.plural(), name).await?;
        Ok(())
    }
}

#[async_trait]
impl ConditionApi for KubeClient {
    async fn create(&self, spec: &ConditionSpec) -> ApiResult<()> {
        let request = self
            .http
            .post(self.condition_collection_url(&spec.namespace))
            .json(&spec.manifest);
        self.send(request, CONDITION_PLURAL, &spec.name).await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> ApiResult<ConditionStatus> {
        let request = self.http.get(self.condition_url(namespace, name));
        let response = self.send(request, CONDITION_PLURAL, name).await?;
        let object: serde_json::Value = response.json().await?;
        Ok(parse_condition_status(&object))
    }

    async fn delete(&self, namespace: &str, name: &str) -> ApiResult<()> {
        let request = self.http.delete(self.condition_url(namespace, name));
        self.send(request, CONDITION_PLURAL, name).await?;
        Ok(())
    }
}
