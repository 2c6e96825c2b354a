// Remote sandbox: hosted control plane for lifecycle, in-sandbox agent for files.
use super::{
    sandbox_host, SandboxEntry, SandboxEntryKind, SandboxError, SandboxHandle, SandboxProvider,
};
use crate::config::SandboxConfig;
use crate::llm::truncate_text;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const API_KEY_HEADER: &str = "x-api-key";
const ACCESS_TOKEN_HEADER: &str = "x-access-token";
const CONNECT_PROTOCOL_HEADER: &str = "connect-protocol-version";
const ERROR_BODY_MAX_CHARS: usize = 512;

pub struct RemoteSandboxProvider {
    config: SandboxConfig,
    api_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxCreated {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListDirResponse {
    #[serde(default)]
    entries: Vec<ListDirEntry>,
}

#[derive(Debug, Deserialize)]
struct ListDirEntry {
    name: String,
    path: String,
    #[serde(rename = "type", default)]
    kind: String,
}

fn normalize_endpoint(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        let url = Url::parse(trimmed).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        return Some(trimmed.to_string());
    }
    let prefixed = format!("https://{trimmed}");
    Url::parse(&prefixed).ok().map(|_| prefixed)
}

fn transport_error(err: reqwest::Error) -> SandboxError {
    SandboxError::Unavailable(err.to_string())
}

async fn classify_failure(response: Response, target: &str) -> SandboxError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = format!("{target}: {status} {}", truncate_text(&body, ERROR_BODY_MAX_CHARS));
    match status {
        StatusCode::NOT_FOUND => SandboxError::NotFound(detail),
        _ if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            SandboxError::Unavailable(detail)
        }
        _ => SandboxError::Request(detail),
    }
}

impl RemoteSandboxProvider {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let api_url = normalize_endpoint(&config.api_url)
            .ok_or_else(|| anyhow!("invalid sandbox api url: {}", config.api_url))?;
        if config.api_key.trim().is_empty() {
            warn!("sandbox api key is empty, remote sandbox calls will be rejected");
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s.max(1)))
            .build()?;
        Ok(Self {
            config,
            api_url,
            http,
        })
    }

    fn control_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(self.config.api_key.trim()) {
            headers.insert(API_KEY_HEADER, value);
        }
        headers
    }

    /// File-plane client for a sandbox; hosts use the configured domain.
    fn bind(&self, created: SandboxCreated) -> RemoteSandbox {
        let domain = self.config.domain.clone();
        let envd_url = format!(
            "https://{}",
            sandbox_host(&created.sandbox_id, self.config.envd_port, &domain)
        );
        RemoteSandbox {
            id: created.sandbox_id,
            domain,
            envd_url,
            access_token: created.envd_access_token,
            user: self.config.user.clone(),
            http: self.http.clone(),
        }
    }

    async fn send_lifecycle(
        &self,
        request: RequestBuilder,
        target: &str,
    ) -> Result<SandboxCreated, SandboxError> {
        let response = request
            .headers(self.control_headers())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            let err = classify_failure(response, target).await;
            warn!("sandbox lifecycle call failed: {err}");
            return Err(err);
        }
        response
            .json::<SandboxCreated>()
            .await
            .map_err(|err| SandboxError::Request(format!("{target}: decode response: {err}")))
    }
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    async fn create(&self) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        let request = self.http.post(format!("{}/sandboxes", self.api_url)).json(&json!({
            "templateID": self.config.template,
            "timeout": self.config.sandbox_timeout_s,
        }));
        let created = self.send_lifecycle(request, "create sandbox").await?;
        debug!("sandbox created: {}", created.sandbox_id);
        Ok(Arc::new(self.bind(created)))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        let sandbox_id = sandbox_id.trim();
        if sandbox_id.is_empty() {
            return Err(SandboxError::NotFound("empty sandbox id".to_string()));
        }
        let request = self
            .http
            .post(format!("{}/sandboxes/{sandbox_id}/connect", self.api_url))
            .json(&json!({ "timeout": self.config.sandbox_timeout_s }));
        let mut connected = self
            .send_lifecycle(request, &format!("connect sandbox {sandbox_id}"))
            .await?;
        if connected.sandbox_id.trim().is_empty() {
            connected.sandbox_id = sandbox_id.to_string();
        }
        Ok(Arc::new(self.bind(connected)))
    }
}

struct RemoteSandbox {
    id: String,
    domain: String,
    envd_url: String,
    access_token: Option<String>,
    user: String,
    http: Client,
}

impl RemoteSandbox {
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.access_token.as_deref() {
            if let Ok(value) = HeaderValue::from_str(token) {
                headers.insert(ACCESS_TOKEN_HEADER, value);
            }
        }
        headers
    }

    fn files_url(&self, path: &str) -> Result<Url, SandboxError> {
        let mut url = Url::parse(&format!("{}/files", self.envd_url))
            .map_err(|err| SandboxError::Request(format!("invalid sandbox url: {err}")))?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("username", &self.user);
        Ok(url)
    }

    async fn rpc(&self, method: &str, body: Value) -> Result<Value, SandboxError> {
        let target = format!("filesystem.{method}");
        let response = self
            .http
            .post(format!("{}/filesystem.Filesystem/{method}", self.envd_url))
            .headers(self.headers())
            .header(CONNECT_PROTOCOL_HEADER, "1")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(classify_failure(response, &target).await);
        }
        let text = response.text().await.map_err(transport_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|err| SandboxError::Request(format!("{target}: decode response: {err}")))
    }
}

#[async_trait]
impl SandboxHandle for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let response = self
            .http
            .get(self.files_url(path)?)
            .headers(self.headers())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(classify_failure(response, &format!("read {path}")).await);
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let file_name = path.rsplit('/').next().unwrap_or("file").to_string();
        let part = Part::bytes(content.as_bytes().to_vec()).file_name(file_name);
        let form = Form::new().part("file", part);
        let response = self
            .http
            .post(self.files_url(path)?)
            .headers(self.headers())
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(classify_failure(response, &format!("write {path}")).await);
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), SandboxError> {
        self.rpc("Remove", json!({ "path": path })).await.map(|_| ())
    }

    async fn list(&self, path: &str, depth: u32) -> Result<Vec<SandboxEntry>, SandboxError> {
        let payload = self
            .rpc("ListDir", json!({ "path": path, "depth": depth.max(1) }))
            .await?;
        if payload.is_null() {
            return Ok(Vec::new());
        }
        let listed: ListDirResponse = serde_json::from_value(payload)
            .map_err(|err| SandboxError::Request(format!("list {path}: {err}")))?;
        Ok(listed
            .entries
            .into_iter()
            .map(|entry| SandboxEntry {
                kind: if entry.kind.to_ascii_uppercase().contains("DIR") {
                    SandboxEntryKind::Dir
                } else {
                    SandboxEntryKind::File
                },
                name: entry.name,
                path: entry.path,
            })
            .collect())
    }

    fn host(&self, port: u16) -> String {
        sandbox_host(&self.id, port, &self.domain)
    }
}
