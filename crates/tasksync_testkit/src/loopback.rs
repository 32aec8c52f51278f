//! An in-process HTTP client that routes REST calls to a [`FakeServer`].
//!
//! Lets tests drive [`HttpRemote`](tasksync_engine::HttpRemote) end to end
//! without a socket.

use crate::fake_server::FakeServer;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use tasksync_engine::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, RemoteApi, RemoteError, RemoteResult,
};
use tasksync_protocol::{
    parse_date, CategoryPatch, CompletionKey, NewCategory, NewCompletion, NewTodo, SyncCursor,
    TodoPatch,
};

const RESOURCES: [&str; 3] = ["todos", "categories", "completions"];

/// [`HttpClient`] that serves requests from a [`FakeServer`].
#[derive(Clone)]
pub struct LoopbackClient {
    server: Arc<FakeServer>,
}

impl LoopbackClient {
    /// Creates a client connected to `server`.
    pub fn new(server: Arc<FakeServer>) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &Arc<FakeServer> {
        &self.server
    }

    async fn route(&self, request: &HttpRequest) -> RemoteResult<Vec<u8>> {
        let (path, query) = split_url(&request.url);
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::decode(s).map(Cow::into_owned))
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| RemoteError::http(400, e.to_string()))?;
        // Anything before the first resource name is the base path.
        let start = segments
            .iter()
            .position(|s| RESOURCES.contains(&s.as_str()))
            .unwrap_or(segments.len());
        let segments: Vec<&str> = segments[start..].iter().map(String::as_str).collect();
        let body = request.body.as_deref().unwrap_or_default();

        match (request.method, segments.as_slice()) {
            (HttpMethod::Post, ["todos"]) => {
                self.server.create_todo(&decode::<NewTodo>(body)?).await?;
                Ok(Vec::new())
            }
            (HttpMethod::Patch, ["todos", id]) => {
                let patch = decode::<TodoPatch>(body)?;
                check_id(&patch.id, id)?;
                self.server.update_todo(&patch).await?;
                Ok(Vec::new())
            }
            (HttpMethod::Delete, ["todos", id]) => {
                self.server.delete_todo(id).await?;
                Ok(Vec::new())
            }
            (HttpMethod::Get, ["todos", "delta"]) => {
                let since = since(query)?;
                encode(&self.server.todo_delta(&since).await?)
            }
            (HttpMethod::Get, ["categories"]) => encode(&self.server.list_categories().await?),
            (HttpMethod::Post, ["categories"]) => {
                self.server
                    .create_category(&decode::<NewCategory>(body)?)
                    .await?;
                Ok(Vec::new())
            }
            (HttpMethod::Patch, ["categories", id]) => {
                let patch = decode::<CategoryPatch>(body)?;
                check_id(&patch.id, id)?;
                self.server.update_category(&patch).await?;
                Ok(Vec::new())
            }
            (HttpMethod::Delete, ["categories", id]) => {
                self.server.delete_category(id).await?;
                Ok(Vec::new())
            }
            (HttpMethod::Post, ["completions"]) => {
                self.server
                    .create_completion(&decode::<NewCompletion>(body)?)
                    .await?;
                Ok(Vec::new())
            }
            (HttpMethod::Delete, ["completions", todo_id, date]) => {
                let date = parse_date(date)
                    .ok_or_else(|| RemoteError::http(400, format!("bad date {date}")))?;
                self.server
                    .delete_completion(&CompletionKey::new(*todo_id, date))
                    .await?;
                Ok(Vec::new())
            }
            (HttpMethod::Get, ["completions", "delta"]) => {
                let since = since(query)?;
                encode(&self.server.completion_delta(&since).await?)
            }
            _ => Err(RemoteError::http(
                404,
                format!("no route for {} {}", request.method, path),
            )),
        }
    }
}

#[async_trait]
impl HttpClient for LoopbackClient {
    async fn send(&self, request: HttpRequest) -> RemoteResult<HttpResponse> {
        match self.route(&request).await {
            Ok(body) => Ok(HttpResponse::new(200, body)),
            Err(RemoteError::Http { status, message }) => Ok(HttpResponse::new(status, message)),
            Err(err) => Err(err),
        }
    }
}

/// Splits an absolute URL into its path and query.
fn split_url(url: &str) -> (&str, Option<&str>) {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = rest.find('/').map_or("", |i| &rest[i..]);
    match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    }
}

fn since(query: Option<&str>) -> RemoteResult<SyncCursor> {
    let value = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("since="))
        .ok_or_else(|| RemoteError::http(400, "missing since"))?;
    let value = urlencoding::decode(value).map_err(|e| RemoteError::http(400, e.to_string()))?;
    SyncCursor::parse(&value).map_err(|e| RemoteError::http(400, e.to_string()))
}

fn check_id(body_id: &str, path_id: &str) -> RemoteResult<()> {
    if body_id == path_id {
        Ok(())
    } else {
        Err(RemoteError::http(400, "id mismatch"))
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> RemoteResult<T> {
    serde_json::from_slice(body).map_err(|e| RemoteError::http(400, e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> RemoteResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| RemoteError::http(500, e.to_string()))
}
