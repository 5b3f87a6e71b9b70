use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::git::{
    CommitInfo, GitConfig, GitConfigUpdate, RemoteFileInfo, RemoteSyncOutcome, RepoStatus,
};
use crate::sync::gateway::{GatewayError, RemoteFileResult, RemoteStore, Result};

/// HTTP client for the Git file server's REST surface.
pub struct GitApiClient {
    client: Client,
    base_url: String,
}

/// Failure envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResponse {
    content: String,
    last_commit: Option<CommitInfo>,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    files: Vec<RemoteFileInfo>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    commit: CommitInfo,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: RepoStatus,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: Vec<CommitInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    config: GitConfig,
    #[serde(default)]
    public_key: Option<String>,
}

impl GitApiClient {
    /// Create a client for a server base URL, e.g.
    /// `http://localhost:5001/api/git`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(GatewayError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issue a request and decode the success payload. Non-2xx
    /// responses are mapped onto the gateway error taxonomy, keeping
    /// not-found distinct from transport and server failures.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = self.url(path);
        log::debug!("Git API call: {} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| text.clone());
            if status == StatusCode::NOT_FOUND || message.contains("ENOENT") {
                return Err(GatewayError::NotFound(message));
            }
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::Api(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RemoteStore for GitApiClient {
    async fn read(&self, name: &str) -> Result<RemoteFileResult> {
        let path = format!("/file/{}", urlencoding::encode(name));
        match self.request::<FileResponse>(Method::GET, &path, None).await {
            Ok(response) => Ok(RemoteFileResult {
                found: true,
                content: Some(response.content),
                last_commit: response.last_commit,
            }),
            Err(GatewayError::NotFound(_)) => Ok(RemoteFileResult::absent()),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, name: &str, content: &str, commit_message: &str) -> Result<CommitInfo> {
        let path = format!("/file/{}", urlencoding::encode(name));
        let body = json!({ "content": content, "commitMessage": commit_message });
        let response: CommitResponse = self.request(Method::POST, &path, Some(body)).await?;
        log::debug!(
            "File written and committed: {} ({})",
            name,
            response.commit.hash
        );
        Ok(response.commit)
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<CommitInfo> {
        let body = json!({ "oldFilename": old_name, "newFilename": new_name });
        let response: CommitResponse = self.request(Method::POST, "/rename", Some(body)).await?;
        Ok(response.commit)
    }

    async fn delete(&self, name: &str) -> Result<CommitInfo> {
        let path = format!("/file/{}", urlencoding::encode(name));
        let response: CommitResponse = self.request(Method::DELETE, &path, None).await?;
        Ok(response.commit)
    }

    async fn list_all(&self) -> Result<Vec<RemoteFileInfo>> {
        let response: FilesResponse = self.request(Method::GET, "/files", None).await?;
        Ok(response.files)
    }

    async fn status(&self) -> Result<RepoStatus> {
        let response: StatusResponse = self.request(Method::GET, "/status", None).await?;
        Ok(response.status)
    }

    async fn history(&self, name: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        let path = format!("/history/{}?limit={}", urlencoding::encode(name), limit);
        let response: HistoryResponse = self.request(Method::GET, &path, None).await?;
        Ok(response.history)
    }

    async fn get_config(&self) -> Result<(GitConfig, Option<String>)> {
        let response: ConfigResponse = self.request(Method::GET, "/config", None).await?;
        Ok((response.config, response.public_key))
    }

    async fn update_config(&self, update: GitConfigUpdate) -> Result<GitConfig> {
        let body = serde_json::to_value(&update).map_err(|e| GatewayError::Api(e.to_string()))?;
        let response: ConfigResponse = self.request(Method::POST, "/config", Some(body)).await?;
        Ok(response.config)
    }

    async fn remote_sync(&self) -> Result<RemoteSyncOutcome> {
        // The sync endpoint reports merge conflicts through its body
        // (success=false + conflict list) rather than an error status.
        self.request(Method::POST, "/sync", None).await
    }
}
