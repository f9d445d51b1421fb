use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use serde_json::Value;
use url::Url;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::Board;
use crate::traits::{RawThreadPosts, RemoteFetcher};

const USER_AGENT_STRING: &str = concat!("board-archiver/", env!("CARGO_PKG_VERSION"));

/// JSON API client for a 2ch-style imageboard.
///
/// `GET {base}/{board}/threads.json` lists the live threads and
/// `GET {base}/{board}/res/{number}.json` returns one thread with its posts.
pub struct BoardClient {
    client: Client,
    base_url: Url,
}

impl BoardClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(USER_AGENT_STRING);

        if let Some(proxy) = config.http_proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::http(proxy)?);
        }
        if let Some(proxy) = config.https_proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::https(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url()?,
        })
    }

    fn threads_url(&self, board: &Board) -> Result<Url> {
        self.join(&format!("{}/threads.json", board.name()))
    }

    fn thread_url(&self, board: &Board, thread: i64) -> Result<Url> {
        self.join(&format!("{}/res/{}.json", board.name(), thread))
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Config(format!("cannot build URL for {}: {}", path, e)))
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(AppError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::malformed(format!("{} is not valid JSON: {}", url, e)))
    }
}

#[async_trait]
impl RemoteFetcher for BoardClient {
    async fn fetch_thread_list(&self, board: &Board) -> Result<Vec<Value>> {
        let url = self.threads_url(board)?;
        tracing::info!(board = board.name(), "Requesting thread list");
        let body = self.get_json(url).await?;
        extract_threads(body)
    }

    async fn fetch_thread_posts(&self, board: &Board, thread: i64) -> Result<RawThreadPosts> {
        let url = self.thread_url(board, thread)?;
        let body = self.get_json(url).await?;
        extract_posts(body, thread)
    }
}

fn extract_threads(mut body: Value) -> Result<Vec<Value>> {
    match body.get_mut("threads").map(Value::take) {
        Some(Value::Array(threads)) => Ok(threads),
        _ => Err(AppError::malformed("thread list has no `threads` array")),
    }
}

fn extract_posts(mut body: Value, thread: i64) -> Result<RawThreadPosts> {
    let unique_posters = body
        .get_mut("unique_posters")
        .map(Value::take)
        .unwrap_or(Value::Null);

    let posts = body
        .pointer_mut("/threads/0/posts")
        .map(Value::take)
        .and_then(|posts| match posts {
            Value::Array(posts) => Some(posts),
            _ => None,
        })
        .ok_or_else(|| AppError::malformed(format!("thread {} has no posts array", thread)))?;

    Ok(RawThreadPosts {
        posts,
        unique_posters,
    })
}
