use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Attachment, Thread, ThreadPosts};
use crate::traits::EntityStore;

/// What happened to one live thread's record during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadDecision {
    Inserted,
    Updated,
    Unchanged,
    /// Already moved to the dead store; archived threads are never mutated.
    AlreadyArchived,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub threads_inserted: usize,
    pub threads_updated: usize,
    pub threads_unchanged: usize,
    pub threads_archived_skipped: usize,
    /// Post list could not be retrieved or parsed.
    pub threads_fetch_failed: usize,
    /// Store error while writing the thread record.
    pub threads_failed: usize,
    pub posts_inserted: usize,
    pub posts_skipped: usize,
    pub posts_rejected: usize,
    pub posts_failed: usize,
    pub cancelled: bool,
}

impl ReconcileReport {
    fn tally(&mut self, decision: ThreadDecision) {
        match decision {
            ThreadDecision::Inserted => self.threads_inserted += 1,
            ThreadDecision::Updated => self.threads_updated += 1,
            ThreadDecision::Unchanged => self.threads_unchanged += 1,
            ThreadDecision::AlreadyArchived => self.threads_archived_skipped += 1,
        }
    }
}

/// Result of a reconciliation pass: the counters plus every attachment seen
/// on the threads that were reconciled, for download planning.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub report: ReconcileReport,
    pub attachments: Vec<Attachment>,
}

/// Diffs a live snapshot against the live store.
///
/// Thread records are inserted or have their counters updated; posts are
/// append-only. All writes go through the store's upsert-if-absent
/// primitives, so a concurrent run inserting the same identifier cannot
/// produce a duplicate.
pub struct Reconciler<'a> {
    live: &'a dyn EntityStore,
    dead: &'a dyn EntityStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(live: &'a dyn EntityStore, dead: &'a dyn EntityStore) -> Self {
        Self { live, dead }
    }

    /// Reconciles `threads` in snapshot order.
    ///
    /// `fetch_posts` is called once per thread, with up to `workers` calls in
    /// flight. A failed fetch skips that thread for this pass only. Store
    /// writes stay sequential. Cancellation is checked between threads.
    pub async fn reconcile<F, Fut>(
        &self,
        threads: Vec<Thread>,
        fetch_posts: F,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Reconciled
    where
        F: Fn(Thread) -> Fut,
        Fut: Future<Output = Result<ThreadPosts>>,
    {
        let total = threads.len();
        let mut out = Reconciled::default();

        let fetched = stream::iter(threads)
            .map(|thread| {
                let posts = fetch_posts(thread.clone());
                async move { (thread, posts.await) }
            })
            .buffered(workers.max(1));
        let mut fetched = std::pin::pin!(fetched);

        let mut position = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    out.report.cancelled = true;
                    break;
                }
                next = fetched.next() => next,
            };
            let Some((thread, posts)) = next else { break };
            position += 1;

            let posts = match posts {
                Ok(posts) => posts,
                Err(e) => {
                    warn!(
                        board = %thread.board,
                        thread = thread.number,
                        "[{}/{}] Skipping thread, posts unavailable: {}",
                        position,
                        total,
                        e
                    );
                    out.report.threads_fetch_failed += 1;
                    continue;
                }
            };

            self.reconcile_thread(thread, posts, position, total, &mut out).await;
        }

        out
    }

    async fn reconcile_thread(
        &self,
        mut thread: Thread,
        posts: ThreadPosts,
        position: usize,
        total: usize,
        out: &mut Reconciled,
    ) {
        thread.unique_posters = posts.unique_posters;
        out.report.posts_rejected += posts.rejected;

        let decision = match self.upsert_thread(&thread).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    board = %thread.board,
                    thread = thread.number,
                    store = self.live.label(),
                    "[{}/{}] Failed to store thread: {}",
                    position,
                    total,
                    e
                );
                out.report.threads_failed += 1;
                return;
            }
        };
        debug!(
            board = %thread.board,
            thread = thread.number,
            ?decision,
            "[{}/{}] Reconciled thread",
            position,
            total
        );
        out.report.tally(decision);

        if decision == ThreadDecision::AlreadyArchived {
            return;
        }

        for post in &posts.posts {
            match self.live.insert_post_if_absent(post).await {
                Ok(true) => out.report.posts_inserted += 1,
                Ok(false) => out.report.posts_skipped += 1,
                Err(e) => {
                    warn!(
                        board = %post.board,
                        thread = post.thread,
                        post = post.number,
                        "Failed to store post: {}",
                        e
                    );
                    out.report.posts_failed += 1;
                }
            }
        }

        out.attachments.extend(posts.attachments().cloned());
    }

    async fn upsert_thread(&self, thread: &Thread) -> Result<ThreadDecision> {
        if self
            .dead
            .find_thread(&thread.board, thread.number)
            .await?
            .is_some()
        {
            // A move cut short after the dead insert leaves the live record
            // behind; drop it so the archiver sweeps the posts as orphans.
            if self.live.delete_thread(&thread.board, thread.number).await? {
                warn!(
                    board = %thread.board,
                    thread = thread.number,
                    store = self.live.label(),
                    "Removed leftover record of an archived thread"
                );
            }
            return Ok(ThreadDecision::AlreadyArchived);
        }

        let existing = match self.live.find_thread(&thread.board, thread.number).await? {
            Some(existing) => existing,
            None => {
                if self.live.insert_thread_if_absent(thread).await? {
                    return Ok(ThreadDecision::Inserted);
                }
                // Lost an insert race; compare against the winner.
                match self.live.find_thread(&thread.board, thread.number).await? {
                    Some(existing) => existing,
                    None => return Ok(ThreadDecision::Unchanged),
                }
            }
        };

        if existing.counters_match(thread) {
            return Ok(ThreadDecision::Unchanged);
        }

        self.live
            .update_thread_counters(&thread.board, thread.number, thread.views, thread.unique_posters)
            .await?;
        Ok(ThreadDecision::Updated)
    }
}
