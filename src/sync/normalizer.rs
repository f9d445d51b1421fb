//! Validation of raw remote payloads into entity models.
//!
//! Each record is parsed on its own: a malformed thread or post is counted
//! and dropped, never aborting the rest of the batch.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{is_content_hash, Attachment, Board, Post, Thread, ThreadPosts};
use crate::traits::{RawThreadPosts, Sanitizer};

/// Validated live snapshot of one board's thread list.
#[derive(Debug, Default)]
pub struct NormalizedThreads {
    /// Valid threads, in snapshot order.
    pub threads: Vec<Thread>,
    pub rejected: usize,
    /// Every thread number the remote reported, including entries rejected
    /// for other fields. The archiver treats all of these as still live.
    pub seen: HashSet<i64>,
}

pub fn normalize_threads(board: &Board, raw: &[Value]) -> NormalizedThreads {
    let mut snapshot = NormalizedThreads::default();
    let mut accepted = HashSet::new();

    for (position, entry) in raw.iter().enumerate() {
        if let Some(number) = entry.get("num").and_then(as_int).filter(|n| *n > 0) {
            snapshot.seen.insert(number);
        }

        match parse_thread(board, entry) {
            Ok(thread) if accepted.insert(thread.number) => snapshot.threads.push(thread),
            Ok(thread) => {
                warn!(board = board.name(), thread = thread.number, "Duplicate thread in snapshot");
                snapshot.rejected += 1;
            }
            Err(e) => {
                warn!(board = board.name(), position, "Rejected thread entry: {}", e);
                snapshot.rejected += 1;
            }
        }
    }

    snapshot
}

fn parse_thread(board: &Board, entry: &Value) -> Result<Thread> {
    let number = positive_field(entry, "num")?;
    let subject = entry
        .get("subject")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::malformed(format!("thread {} has no subject", number)))?;

    Ok(Thread {
        board: board.name().to_string(),
        number,
        subject: subject.to_string(),
        timestamp: int_field(entry, "timestamp")?,
        views: int_field(entry, "views")?,
        unique_posters: 0,
        processed: false,
    })
}

/// Parses post payloads, passing every accepted body through a [`Sanitizer`].
pub struct SnapshotNormalizer<'a> {
    sanitizer: &'a dyn Sanitizer,
}

impl<'a> SnapshotNormalizer<'a> {
    pub fn new(sanitizer: &'a dyn Sanitizer) -> Self {
        Self { sanitizer }
    }

    /// Fails only when the thread-level `unique_posters` counter is unusable;
    /// individual bad posts are counted in [`ThreadPosts::rejected`].
    pub fn normalize_posts(&self, board: &Board, thread: i64, raw: &RawThreadPosts) -> Result<ThreadPosts> {
        let unique_posters = as_int(&raw.unique_posters).ok_or_else(|| {
            AppError::malformed(format!("thread {} has no unique_posters", thread))
        })?;

        let mut batch = ThreadPosts {
            unique_posters,
            ..ThreadPosts::default()
        };

        for entry in &raw.posts {
            match self.parse_post(board, entry) {
                Ok(post) if post.thread == thread => batch.posts.push(post),
                Ok(post) => {
                    warn!(
                        board = board.name(),
                        thread,
                        post = post.number,
                        parent = post.thread,
                        "Rejected post belonging to another thread"
                    );
                    batch.rejected += 1;
                }
                Err(e) => {
                    warn!(board = board.name(), thread, "Rejected post: {}", e);
                    batch.rejected += 1;
                }
            }
        }

        Ok(batch)
    }

    fn parse_post(&self, board: &Board, entry: &Value) -> Result<Post> {
        let number = positive_field(entry, "num")?;
        let index = int_field(entry, "number")?;
        let timestamp = int_field(entry, "timestamp")?;

        // The opening post reports parent 0; it is its own thread.
        let parent = entry.get("parent").and_then(as_int).unwrap_or(0);
        let thread = if parent > 0 { parent } else { number };

        let op = match entry.get("op") {
            Some(Value::Bool(op)) => *op,
            Some(value) => as_int(value).map(|v| v != 0).unwrap_or(thread == number),
            None => thread == number,
        };

        let files = entry
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|file| match parse_attachment(file) {
                        Ok(attachment) => Some(attachment),
                        Err(e) => {
                            debug!(post = number, "Dropping attachment: {}", e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let markup = entry.get("comment").and_then(Value::as_str).unwrap_or("");

        Ok(Post {
            board: board.name().to_string(),
            thread,
            number,
            index,
            timestamp,
            op,
            message: self.sanitizer.strip(markup),
            files,
        })
    }
}

fn parse_attachment(entry: &Value) -> Result<Attachment> {
    let text = |key: &str| entry.get(key).and_then(Value::as_str);

    let name = text("name").ok_or_else(|| AppError::malformed("attachment has no name"))?;
    let path = text("path").ok_or_else(|| AppError::malformed("attachment has no path"))?;

    Ok(Attachment {
        name: name.to_string(),
        path: path.to_string(),
        hash: text("md5")
            .map(str::trim)
            .filter(|h| is_content_hash(h))
            .map(str::to_string),
        kind: entry.get("type").and_then(as_int).unwrap_or(0),
    })
}

/// The API mixes JSON numbers and numeric strings for the same fields.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn int_field(entry: &Value, key: &str) -> Result<i64> {
    match entry.get(key) {
        None | Some(Value::Null) => Err(AppError::malformed(format!("missing `{}`", key))),
        Some(value) => {
            as_int(value).ok_or_else(|| AppError::malformed(format!("`{}` is not numeric: {}", key, value)))
        }
    }
}

fn positive_field(entry: &Value, key: &str) -> Result<i64> {
    let value = int_field(entry, key)?;
    if value <= 0 {
        return Err(AppError::malformed(format!("`{}` must be positive, got {}", key, value)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post_json, thread_json, CountingSanitizer};
    use serde_json::json;

    fn board() -> Board {
        Board::new("b").unwrap()
    }

    #[test]
    fn malformed_threads_are_rejected_individually() {
        let raw = vec![
            thread_json(10, 5),
            json!({"num": "11", "subject": "no views", "timestamp": 1}),
            json!({"num": "abc", "subject": "bad id", "timestamp": 1, "views": 1}),
            thread_json(12, 0),
        ];

        let snapshot = normalize_threads(&board(), &raw);
        let numbers: Vec<i64> = snapshot.threads.iter().map(|t| t.number).collect();

        assert_eq!(numbers, vec![10, 12]);
        assert_eq!(snapshot.rejected, 2);
        // 11 is still reported live even though its entry was unusable.
        assert_eq!(snapshot.seen, HashSet::from([10, 11, 12]));
    }

    #[test]
    fn accepts_numeric_strings() {
        let raw = vec![json!({"num": "42", "subject": "", "timestamp": "1700000000", "views": "3"})];
        let snapshot = normalize_threads(&board(), &raw);

        let thread = &snapshot.threads[0];
        assert_eq!((thread.number, thread.timestamp, thread.views), (42, 1_700_000_000, 3));
        assert_eq!(thread.board, "b");
    }

    #[test]
    fn duplicate_thread_numbers_keep_first() {
        let raw = vec![thread_json(10, 5), thread_json(10, 7)];
        let snapshot = normalize_threads(&board(), &raw);

        assert_eq!(snapshot.threads.len(), 1);
        assert_eq!(snapshot.threads[0].views, 5);
        assert_eq!(snapshot.rejected, 1);
    }

    #[test]
    fn opening_post_is_its_own_parent() {
        let sanitizer = CountingSanitizer::default();
        let normalizer = SnapshotNormalizer::new(&sanitizer);

        for parent in [json!(0), json!("0"), json!(null), json!("")] {
            let mut op = post_json(100, 0, 0, &[]);
            op["parent"] = parent;
            let raw = RawThreadPosts {
                posts: vec![op],
                unique_posters: json!(1),
            };

            let batch = normalizer.normalize_posts(&board(), 100, &raw).unwrap();
            assert_eq!(batch.posts[0].thread, 100);
            assert!(batch.posts[0].op);
        }
    }

    #[test]
    fn posts_keep_order_and_reject_strays() {
        let sanitizer = CountingSanitizer::default();
        let normalizer = SnapshotNormalizer::new(&sanitizer);
        let raw = RawThreadPosts {
            posts: vec![
                post_json(100, 0, 1, &[]),
                post_json(101, 100, 2, &[]),
                post_json(102, 555, 3, &[]),
                json!({"num": 103, "parent": "100"}),
                post_json(104, 100, 4, &[]),
            ],
            unique_posters: json!("3"),
        };

        let batch = normalizer.normalize_posts(&board(), 100, &raw).unwrap();
        let numbers: Vec<i64> = batch.posts.iter().map(|p| p.number).collect();

        assert_eq!(numbers, vec![100, 101, 104]);
        assert_eq!(batch.rejected, 2);
        assert_eq!(batch.unique_posters, 3);
        assert!(!batch.posts[1].op);
    }

    #[test]
    fn sanitizer_runs_once_per_post_body() {
        let sanitizer = CountingSanitizer::default();
        let normalizer = SnapshotNormalizer::new(&sanitizer);
        let raw = RawThreadPosts {
            posts: vec![post_json(100, 0, 1, &[]), post_json(101, 100, 2, &[])],
            unique_posters: json!(2),
        };

        let batch = normalizer.normalize_posts(&board(), 100, &raw).unwrap();

        assert_eq!(sanitizer.calls(), 2);
        assert_eq!(batch.posts[0].message, "post 100");
    }

    #[test]
    fn attachments_without_hash_are_kept_on_the_post() {
        let sanitizer = CountingSanitizer::default();
        let normalizer = SnapshotNormalizer::new(&sanitizer);
        let mut post = post_json(100, 0, 1, &[("abc", "a.webm")]);
        post["files"]
            .as_array_mut()
            .unwrap()
            .extend([json!({"name": "b.jpg", "path": "/b/src/100/b.jpg", "type": 1}), json!({"path": "x"})]);
        let raw = RawThreadPosts {
            posts: vec![post],
            unique_posters: json!(1),
        };

        let batch = normalizer.normalize_posts(&board(), 100, &raw).unwrap();
        let files = &batch.posts[0].files;

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].hash.as_deref(), Some("abc"));
        assert_eq!(files[1].hash, None);
        assert_eq!(files[1].kind, 1);
    }

    #[test]
    fn non_hex_hashes_are_treated_as_missing() {
        let sanitizer = CountingSanitizer::default();
        let normalizer = SnapshotNormalizer::new(&sanitizer);
        let raw = RawThreadPosts {
            posts: vec![post_json(
                100,
                0,
                1,
                &[("../../escaped", "a.webm"), ("D41D8CD98F00B204E9800998ECF8427E", "b.webm")],
            )],
            unique_posters: json!(1),
        };

        let batch = normalizer.normalize_posts(&board(), 100, &raw).unwrap();
        let files = &batch.posts[0].files;

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].hash, None);
        assert_eq!(files[1].hash.as_deref(), Some("D41D8CD98F00B204E9800998ECF8427E"));
    }

    #[test]
    fn missing_unique_posters_fails_the_thread() {
        let sanitizer = CountingSanitizer::default();
        let normalizer = SnapshotNormalizer::new(&sanitizer);
        let raw = RawThreadPosts {
            posts: vec![post_json(100, 0, 1, &[])],
            unique_posters: json!(null),
        };

        let err = normalizer.normalize_posts(&board(), 100, &raw).unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));
    }
}
