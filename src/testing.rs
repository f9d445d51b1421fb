//! Fixtures and in-process fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::db::EntityTables;
use crate::error::{AppError, Result};
use crate::models::{Attachment, Board, Post, StoreCounts, Thread};
use crate::traits::{
    DownloadLedger, EntityStore, FileTransport, RawThreadPosts, RemoteFetcher, Sanitizer,
};

const EPOCH: i64 = 1_700_000_000;

pub fn sample_thread(number: i64, views: i64) -> Thread {
    Thread {
        board: "b".into(),
        number,
        subject: format!("thread {}", number),
        timestamp: EPOCH + number,
        views,
        unique_posters: 0,
        processed: false,
    }
}

pub fn sample_post(thread: i64, number: i64, index: i64) -> Post {
    Post {
        board: "b".into(),
        thread,
        number,
        index,
        timestamp: EPOCH + number,
        op: thread == number,
        message: format!("post {}", number),
        files: vec![],
    }
}

pub fn attachment(hash: &str, name: &str, kind: i64) -> Attachment {
    Attachment {
        name: name.into(),
        path: format!("/b/src/1/{}", name),
        hash: Some(hash.into()),
        kind,
    }
}

/// Thread list entry as the API sends it, numbers as strings.
pub fn thread_json(number: i64, views: i64) -> Value {
    json!({
        "num": number.to_string(),
        "subject": format!("thread {}", number),
        "timestamp": EPOCH + number,
        "views": views,
        "posts_count": 1,
    })
}

/// Post entry as the API sends it. `files` holds `(md5, name)` pairs.
pub fn post_json(number: i64, parent: i64, index: i64, files: &[(&str, &str)]) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|(hash, name)| {
            json!({
                "name": name,
                "path": format!("/b/src/{}/{}", if parent == 0 { number } else { parent }, name),
                "md5": hash,
                "type": 6,
            })
        })
        .collect();
    json!({
        "num": number,
        "parent": parent.to_string(),
        "number": index,
        "timestamp": EPOCH + number,
        "comment": format!("post {}", number),
        "op": if parent == 0 { 1 } else { 0 },
        "files": files,
    })
}

/// Returns the markup unchanged and counts calls.
#[derive(Default)]
pub struct CountingSanitizer {
    calls: AtomicUsize,
}

impl CountingSanitizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Sanitizer for CountingSanitizer {
    fn strip(&self, markup: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        markup.to_string()
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    threads: Mutex<Option<Vec<Value>>>,
    posts: Mutex<HashMap<i64, RawThreadPosts>>,
    failing: Mutex<HashSet<i64>>,
    post_delay: Mutex<Duration>,
    list_requests: AtomicUsize,
}

impl FakeFetcher {
    pub fn set_threads(&self, threads: Vec<Value>) {
        *self.threads.lock().unwrap() = Some(threads);
    }

    pub fn fail_list(&self) {
        *self.threads.lock().unwrap() = None;
    }

    pub fn set_posts(&self, thread: i64, posts: Vec<Value>, unique_posters: i64) {
        self.posts.lock().unwrap().insert(
            thread,
            RawThreadPosts {
                posts,
                unique_posters: json!(unique_posters.to_string()),
            },
        );
    }

    pub fn fail_thread(&self, thread: i64) {
        self.failing.lock().unwrap().insert(thread);
    }

    pub fn recover_thread(&self, thread: i64) {
        self.failing.lock().unwrap().remove(&thread);
    }

    pub fn set_post_delay(&self, delay: Duration) {
        *self.post_delay.lock().unwrap() = delay;
    }

    pub fn list_requests(&self) -> usize {
        self.list_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetcher for FakeFetcher {
    async fn fetch_thread_list(&self, _board: &Board) -> Result<Vec<Value>> {
        self.list_requests.fetch_add(1, Ordering::SeqCst);
        self.threads.lock().unwrap().clone().ok_or(AppError::HttpStatus {
            url: "fake://threads.json".into(),
            status: 503,
        })
    }

    async fn fetch_thread_posts(&self, _board: &Board, thread: i64) -> Result<RawThreadPosts> {
        let delay = *self.post_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&thread) {
            return Err(AppError::Timeout(Duration::from_secs(30)));
        }
        self.posts
            .lock()
            .unwrap()
            .get(&thread)
            .cloned()
            .ok_or(AppError::HttpStatus {
                url: format!("fake://res/{}.json", thread),
                status: 404,
            })
    }
}

/// Writes the URL into the destination file instead of downloading.
#[derive(Default)]
pub struct FakeTransport {
    requests: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delay: Duration,
}

impl FakeTransport {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileTransport for FakeTransport {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        self.requests.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.lock().unwrap().contains(url) {
            return Err(AppError::HttpStatus {
                url: url.to_string(),
                status: 500,
            });
        }
        tokio::fs::write(destination, url.as_bytes()).await?;
        Ok(url.len() as u64)
    }
}

/// Ledger whose database is unreachable.
pub struct BrokenLedger;

impl BrokenLedger {
    fn offline() -> AppError {
        AppError::Io(std::io::Error::other("ledger offline"))
    }
}

#[async_trait]
impl DownloadLedger for BrokenLedger {
    async fn has(&self, _hash: &str) -> Result<bool> {
        Err(Self::offline())
    }

    async fn record(&self, _hash: &str, _at: DateTime<Utc>) -> Result<bool> {
        Err(Self::offline())
    }

    async fn recorded_count(&self) -> Result<i64> {
        Err(Self::offline())
    }
}

/// Store wrapper whose post inserts fail for selected threads.
pub struct FailingStore {
    inner: EntityTables,
    failing_threads: Mutex<HashSet<i64>>,
}

impl FailingStore {
    pub fn new(inner: EntityTables) -> Self {
        Self {
            inner,
            failing_threads: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_posts_of(&self, thread: i64) {
        self.failing_threads.lock().unwrap().insert(thread);
    }
}

#[async_trait]
impl EntityStore for FailingStore {
    fn label(&self) -> &'static str {
        self.inner.label()
    }

    async fn ensure_indexes(&self) -> Result<()> {
        self.inner.ensure_indexes().await
    }

    async fn find_thread(&self, board: &str, number: i64) -> Result<Option<Thread>> {
        self.inner.find_thread(board, number).await
    }

    async fn insert_thread_if_absent(&self, thread: &Thread) -> Result<bool> {
        self.inner.insert_thread_if_absent(thread).await
    }

    async fn update_thread_counters(
        &self,
        board: &str,
        number: i64,
        views: i64,
        unique_posters: i64,
    ) -> Result<bool> {
        self.inner
            .update_thread_counters(board, number, views, unique_posters)
            .await
    }

    async fn delete_thread(&self, board: &str, number: i64) -> Result<bool> {
        self.inner.delete_thread(board, number).await
    }

    async fn thread_numbers(&self, board: &str) -> Result<Vec<i64>> {
        self.inner.thread_numbers(board).await
    }

    async fn insert_post_if_absent(&self, post: &Post) -> Result<bool> {
        if self.failing_threads.lock().unwrap().contains(&post.thread) {
            return Err(AppError::Io(std::io::Error::other("disk full")));
        }
        self.inner.insert_post_if_absent(post).await
    }

    async fn delete_post(&self, board: &str, number: i64) -> Result<bool> {
        self.inner.delete_post(board, number).await
    }

    async fn posts_for_thread(&self, board: &str, thread: i64) -> Result<Vec<Post>> {
        self.inner.posts_for_thread(board, thread).await
    }

    async fn orphaned_post_threads(&self, board: &str) -> Result<Vec<i64>> {
        self.inner.orphaned_post_threads(board).await
    }

    async fn counts(&self) -> Result<StoreCounts> {
        self.inner.counts().await
    }
}
