//! HTTP client for the conversion backend
//!
//! One method per endpoint, one request per call. Retries, caching and the
//! online/offline bookkeeping belong to the coordinator.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use super::types::*;
use super::BackendError;

type Result<T> = std::result::Result<T, BackendError>;

/// Typed wrapper around the backend's REST surface.
///
/// Cloning is cheap: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    /// Reuse an existing connection pool against a (possibly new) base URL.
    pub fn with_http(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    // ==================== Health & tasks ====================

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.http.get(self.url("health")).send().await?;
        handle_response(response).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>> {
        let response = self.http.get(self.url("tasks")).send().await?;
        handle_response(response).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskSummary> {
        let response = self
            .http
            .get(self.url(&format!("tasks/{}", task_id)))
            .send()
            .await?;
        handle_response(response).await
    }

    pub async fn submit_task(&self, request: &TaskRequest) -> Result<TaskSummary> {
        self.post_json("tasks", request).await
    }

    // ==================== Libraries ====================

    pub async fn validate_library(&self, path: &str) -> Result<LibraryValidation> {
        self.post_json("libraries/validate", &json!({ "path": path })).await
    }

    pub async fn check_component(&self, path: &str, lcsc_id: &str) -> Result<ComponentPresence> {
        self.post_json("libraries/component", &json!({ "path": path, "lcsc_id": lcsc_id }))
            .await
    }

    pub async fn check_components(&self, path: &str, lcsc_ids: &[String]) -> Result<ComponentsPresence> {
        self.post_json("libraries/components", &json!({ "path": path, "lcsc_ids": lcsc_ids }))
            .await
    }

    pub async fn scaffold_library(&self, request: &ScaffoldRequest) -> Result<ScaffoldResult> {
        self.post_json("libraries/scaffold", request).await
    }

    // ==================== Filesystem ====================

    pub async fn list_roots(&self) -> Result<FsRoots> {
        let response = self.http.get(self.url("fs/roots")).send().await?;
        handle_response(response).await
    }

    pub async fn list_directory(&self, path: &str) -> Result<FsListing> {
        let response = self
            .http
            .get(self.url("fs/list"))
            .query(&[("path", path)])
            .send()
            .await?;
        handle_response(response).await
    }

    pub async fn check_path(&self, path: &str) -> Result<PathCheck> {
        self.post_json("fs/check", &json!({ "path": path })).await
    }

    // ==================== Helper Methods ====================

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        handle_response(response).await
    }
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_http() -> Client {
        Client::builder().timeout(Duration::from_secs(5)).build().unwrap()
    }

    fn client_for(server: &MockServer) -> BackendClient {
        BackendClient::with_http(test_http(), &format!("{}/", server.uri()))
    }

    #[tokio::test]
    async fn test_submit_task_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .and(body_json(json!({
                "lcsc_id": "C8734",
                "output_path": "/libs/main",
                "overwrite": false,
                "symbol": true,
                "footprint": true,
                "model": false,
                "overwrite_model": false,
                "project_relative": false,
                "project_relative_path": null,
                "model_path": null
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "id": "task-1", "status": "queued", "progress": 0, "queue_position": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let task = client_for(&server)
            .submit_task(&TaskRequest {
                lcsc_id: "C8734".to_string(),
                output_path: "/libs/main".to_string(),
                overwrite: false,
                symbol: true,
                footprint: true,
                model: false,
                overwrite_model: false,
                project_relative: false,
                project_relative_path: None,
                model_path: None,
            })
            .await
            .unwrap();

        assert_eq!(task.id, "task-1");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.queue_position, Some(1));
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Task not found."))
            .mount(&server)
            .await;

        let err = client_for(&server).get_task("missing").await.unwrap_err();
        match err {
            BackendError::Http { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "Task not found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_directory_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fs/list"))
            .and(query_param("path", "/home/me/kicad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "path": "/home/me/kicad",
                "parent": "/home/me",
                "entries": [{"name": "libs", "path": "/home/me/kicad/libs", "is_dir": true}]
            })))
            .mount(&server)
            .await;

        let listing = client_for(&server).list_directory("/home/me/kicad").await.unwrap();
        assert_eq!(listing.parent.as_deref(), Some("/home/me"));
        assert_eq!(listing.entries.len(), 1);
        assert!(listing.entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // Nothing listens on port 9 (discard) in the test environment
        let client = BackendClient::with_http(test_http(), "http://127.0.0.1:9");
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
