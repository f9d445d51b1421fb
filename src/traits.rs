//! Collaborator contracts consumed by the sync engine.
//!
//! The engine never talks to HTTP or SQLite directly; it goes through these
//! traits so the reconciliation logic can be exercised against fakes.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::models::{Board, Post, StoreCounts, Thread};

/// Raw post list for one thread as returned by the remote API.
#[derive(Debug, Clone, Default)]
pub struct RawThreadPosts {
    pub posts: Vec<Value>,
    pub unique_posters: Value,
}

/// Source of remote board state.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch_thread_list(&self, board: &Board) -> Result<Vec<Value>>;
    async fn fetch_thread_posts(&self, board: &Board, thread: i64) -> Result<RawThreadPosts>;
}

/// Turns markup into plain text.
pub trait Sanitizer: Send + Sync {
    fn strip(&self, markup: &str) -> String;
}

/// One partition of persisted threads and posts. The live and the dead
/// store are two instances of this contract.
///
/// Every insert is an atomic upsert-if-absent keyed by `(board, number)`:
/// it returns `false` instead of failing when the key already exists.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Short label for log lines, e.g. `live` or `dead`.
    fn label(&self) -> &'static str;

    /// Create the uniqueness indexes on the identifier fields. Idempotent.
    async fn ensure_indexes(&self) -> Result<()>;

    async fn find_thread(&self, board: &str, number: i64) -> Result<Option<Thread>>;
    async fn insert_thread_if_absent(&self, thread: &Thread) -> Result<bool>;
    async fn update_thread_counters(
        &self,
        board: &str,
        number: i64,
        views: i64,
        unique_posters: i64,
    ) -> Result<bool>;
    async fn delete_thread(&self, board: &str, number: i64) -> Result<bool>;
    async fn thread_numbers(&self, board: &str) -> Result<Vec<i64>>;

    async fn insert_post_if_absent(&self, post: &Post) -> Result<bool>;
    async fn delete_post(&self, board: &str, number: i64) -> Result<bool>;
    async fn posts_for_thread(&self, board: &str, thread: i64) -> Result<Vec<Post>>;

    /// Thread numbers referenced by posts in this store that have no thread
    /// record here. Left behind when an archive move is interrupted.
    async fn orphaned_post_threads(&self, board: &str) -> Result<Vec<i64>>;

    async fn counts(&self) -> Result<StoreCounts>;
}

/// Writes a remote file to a local path and returns the number of bytes written.
#[async_trait]
pub trait FileTransport: Send + Sync {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64>;
}

/// Content hashes of files that have already been downloaded.
#[async_trait]
pub trait DownloadLedger: Send + Sync {
    async fn has(&self, hash: &str) -> Result<bool>;
    /// Returns `false` when the hash was already recorded.
    async fn record(&self, hash: &str, at: DateTime<Utc>) -> Result<bool>;
    async fn recorded_count(&self) -> Result<i64>;
}
