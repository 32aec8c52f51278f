//! REST adapter for [`RemoteApi`].
//!
//! The actual HTTP library is abstracted behind [`HttpClient`], so hosts can
//! plug in whatever client their platform provides. Bodies are JSON.
//!
//! | Call | Request |
//! |------|---------|
//! | create todo | `POST /todos` |
//! | update todo | `PATCH /todos/{id}` |
//! | delete todo | `DELETE /todos/{id}` |
//! | create / update / delete category | same shape under `/categories` |
//! | create completion | `POST /completions` |
//! | delete completion | `DELETE /completions/{todoId}/{date}` |
//! | list categories | `GET /categories` |
//! | todo delta | `GET /todos/delta?since={cursor}` |
//! | completion delta | `GET /completions/delta?since={cursor}` |

use crate::config::HttpRemoteConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::remote::RemoteApi;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tasksync_protocol::{
    CategoryPatch, CompletionDelta, CompletionKey, NewCategory, NewCompletion, NewTodo,
    RemoteCategory, SyncCursor, TodoDelta, TodoPatch,
};
use tracing::debug;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl HttpMethod {
    /// Returns the method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// JSON body.
    pub body: Option<Vec<u8>>,
}

/// A response as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations report transport failures as [`RemoteError::Network`]
/// (or [`RemoteError::Timeout`]) and return every response the server
/// sent, whatever its status.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> RemoteResult<HttpResponse>;
}

/// [`RemoteApi`] over REST.
pub struct HttpRemote<C: HttpClient> {
    config: HttpRemoteConfig,
    client: C,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a remote.
    pub fn new(config: HttpRemoteConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Returns the client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.config.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: String,
        body: Option<Vec<u8>>,
    ) -> RemoteResult<Vec<u8>> {
        debug!(%method, %url, "remote request");
        let request = HttpRequest { method, url, body };
        let response = tokio::time::timeout(self.config.timeout, self.client.send(request))
            .await
            .map_err(|_| RemoteError::Timeout)??;

        if !response.is_success() {
            let message = String::from_utf8_lossy(&response.body).trim().to_string();
            return Err(RemoteError::http(response.status, message));
        }
        Ok(response.body)
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        url: String,
        body: &T,
    ) -> RemoteResult<()> {
        let body =
            serde_json::to_vec(body).map_err(|e| RemoteError::Precondition(e.to_string()))?;
        self.send(method, url, Some(body)).await.map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> RemoteResult<T> {
        let body = self.send(HttpMethod::Get, url, None).await?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    fn delta_url(&self, resource: &str, since: &SyncCursor) -> String {
        format!(
            "{}?since={}",
            self.url(&[resource, "delta"]),
            urlencoding::encode(&since.to_string())
        )
    }
}

#[async_trait]
impl<C: HttpClient> RemoteApi for HttpRemote<C> {
    async fn create_todo(&self, todo: &NewTodo) -> RemoteResult<()> {
        self.send_json(HttpMethod::Post, self.url(&["todos"]), todo).await
    }

    async fn update_todo(&self, patch: &TodoPatch) -> RemoteResult<()> {
        self.send_json(HttpMethod::Patch, self.url(&["todos", patch.id.as_str()]), patch)
            .await
    }

    async fn delete_todo(&self, id: &str) -> RemoteResult<()> {
        self.send(HttpMethod::Delete, self.url(&["todos", id]), None)
            .await
            .map(|_| ())
    }

    async fn create_category(&self, category: &NewCategory) -> RemoteResult<()> {
        self.send_json(HttpMethod::Post, self.url(&["categories"]), category)
            .await
    }

    async fn update_category(&self, patch: &CategoryPatch) -> RemoteResult<()> {
        self.send_json(
            HttpMethod::Patch,
            self.url(&["categories", patch.id.as_str()]),
            patch,
        )
        .await
    }

    async fn delete_category(&self, id: &str) -> RemoteResult<()> {
        self.send(HttpMethod::Delete, self.url(&["categories", id]), None)
            .await
            .map(|_| ())
    }

    async fn create_completion(&self, completion: &NewCompletion) -> RemoteResult<()> {
        self.send_json(HttpMethod::Post, self.url(&["completions"]), completion)
            .await
    }

    async fn delete_completion(&self, key: &CompletionKey) -> RemoteResult<()> {
        let date = key.date.format("%Y-%m-%d").to_string();
        self.send(
            HttpMethod::Delete,
            self.url(&["completions", key.todo_id.as_str(), date.as_str()]),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn list_categories(&self) -> RemoteResult<Vec<RemoteCategory>> {
        self.get_json(self.url(&["categories"])).await
    }

    async fn todo_delta(&self, since: &SyncCursor) -> RemoteResult<TodoDelta> {
        self.get_json(self.delta_url("todos", since)).await
    }

    async fn completion_delta(&self, since: &SyncCursor) -> RemoteResult<CompletionDelta> {
        self.get_json(self.delta_url("completions", since)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory_store::MemoryStore;
    use crate::pull::PullEngine;
    use crate::store::LocalStore;
    use chrono::{NaiveDate, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct TestClient {
        requests: Mutex<Vec<HttpRequest>>,
        responses: Mutex<VecDeque<RemoteResult<HttpResponse>>>,
        delay: Option<Duration>,
    }

    impl TestClient {
        fn respond(&self, response: RemoteResult<HttpResponse>) {
            self.responses.lock().push_back(response);
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn send(&self, request: HttpRequest) -> RemoteResult<HttpResponse> {
            self.requests.lock().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.responses.lock().pop_front();
            next.unwrap_or_else(|| Ok(HttpResponse::new(204, Vec::new())))
        }
    }

    fn remote(client: TestClient) -> HttpRemote<TestClient> {
        HttpRemote::new(HttpRemoteConfig::new("https://api.test/v1/"), client)
    }

    #[tokio::test]
    async fn maps_calls_to_routes() {
        let remote = remote(TestClient::default());
        remote.create_todo(&NewTodo::new("t1", "x")).await.unwrap();
        remote.delete_todo("t 1").await.unwrap();
        remote
            .delete_completion(&CompletionKey::new(
                "t1",
                NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            ))
            .await
            .unwrap();

        let requests = remote.client().requests.lock().clone();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].url, "https://api.test/v1/todos");
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["id"], "t1");

        assert_eq!(requests[1].method, HttpMethod::Delete);
        assert_eq!(requests[1].url, "https://api.test/v1/todos/t%201");
        assert_eq!(
            requests[2].url,
            "https://api.test/v1/completions/t1/2024-05-01"
        );
    }

    #[tokio::test]
    async fn non_success_becomes_http_error() {
        let client = TestClient::default();
        client.respond(Ok(HttpResponse::new(404, "no such todo\n")));
        let remote = remote(client);

        let err = remote.delete_todo("t1").await.unwrap_err();
        assert_eq!(err, RemoteError::http(404, "no such todo"));
    }

    #[tokio::test]
    async fn delta_decodes_and_encodes_cursor() {
        let client = TestClient::default();
        client.respond(Ok(HttpResponse::new(
            200,
            r#"{"updated":[{"id":"t1"}],"deleted":["t2"],"syncTime":"2024-05-01T10:00:00Z"}"#,
        )));
        let remote = remote(client);

        let since = SyncCursor::parse("2024-05-01T09:00:00Z").unwrap();
        let delta = remote.todo_delta(&since).await.unwrap();
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.deleted, vec!["t2".to_string()]);

        let url = remote.client().requests.lock()[0].url.clone();
        assert_eq!(
            url,
            "https://api.test/v1/todos/delta?since=2024-05-01T09%3A00%3A00.000Z"
        );
    }

    #[tokio::test]
    async fn undecodable_success_is_malformed() {
        let client = TestClient::default();
        client.respond(Ok(HttpResponse::new(200, "<html>")));
        let remote = remote(client);

        assert!(matches!(
            remote.list_categories().await,
            Err(RemoteError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let client = TestClient::default();
        client.respond(Err(RemoteError::Network("refused".into())));
        let remote = remote(client);

        assert_eq!(
            remote.delete_category("c1").await,
            Err(RemoteError::Network("refused".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_responses_time_out() {
        let client = TestClient {
            delay: Some(Duration::from_secs(60)),
            ..TestClient::default()
        };
        let remote = HttpRemote::new(
            HttpRemoteConfig::new("https://api.test").with_timeout(Duration::from_secs(1)),
            client,
        );

        assert_eq!(
            remote.delete_todo("t1").await,
            Err(RemoteError::Timeout)
        );
    }

    #[tokio::test]
    async fn path_segments_are_percent_encoded() {
        let remote = remote(TestClient::default());
        remote.delete_category("a/b c:d").await.unwrap();
        remote.delete_todo("safe-._~").await.unwrap();

        let requests = remote.client().requests.lock().clone();
        assert_eq!(requests[0].url, "https://api.test/v1/categories/a%2Fb%20c%3Ad");
        assert_eq!(requests[1].url, "https://api.test/v1/todos/safe-._~");
    }

    #[tokio::test]
    async fn epoch_millis_sync_time_lets_pull_advance() {
        let client = TestClient::default();
        client.respond(Ok(HttpResponse::new(200, "[]")));
        client.respond(Ok(HttpResponse::new(
            200,
            r#"{"updated":[{"id":"t1","title":"x"}],"deleted":[],"syncTime":1714557600000}"#,
        )));
        client.respond(Ok(HttpResponse::new(200, r#"{"updated":[],"deleted":[]}"#)));
        let store = Arc::new(MemoryStore::new());
        let engine = PullEngine::new(
            store.clone(),
            Arc::new(remote(client)),
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            )),
        );

        let result = engine.run(Some("2024-05-01T09:00:00.000Z")).await.unwrap();
        assert!(result.ok, "{:?}", result.last_error);
        assert!(store.todo("t1").unwrap().is_some());
        let expected = SyncCursor::parse("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(result.server_sync_time, Some(expected));
        assert_eq!(store.cursor().unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn one_bad_record_does_not_sink_the_delta() {
        let client = TestClient::default();
        client.respond(Ok(HttpResponse::new(
            200,
            r#"{"updated":[{"id":7},{"id":"t2"}],"deleted":[],"syncTime":"2024-05-01T10:00:00Z"}"#,
        )));
        let remote = remote(client);

        let delta = remote.todo_delta(&SyncCursor::epoch()).await.unwrap();
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.updated[0].id.as_deref(), Some("t2"));
        assert_eq!(delta.malformed, 1);
    }
}
