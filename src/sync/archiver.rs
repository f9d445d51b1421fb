use std::collections::{BTreeSet, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::Board;
use crate::traits::EntityStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFailure {
    pub thread: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub threads_archived: usize,
    pub posts_archived: usize,
    /// Posts already present in the dead store, left over from an earlier
    /// interrupted move; removed from the live store without a new copy.
    pub posts_already_archived: usize,
    /// Threads whose record was already gone from the live store but still
    /// had live posts.
    pub orphans_recovered: usize,
    pub failures: Vec<ArchiveFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct MoveStats {
    thread_moved: bool,
    posts_moved: usize,
    posts_already_archived: usize,
}

/// Moves threads that vanished from the live snapshot, and their posts,
/// from the live store to the dead store.
///
/// Each move inserts into the dead store before deleting from the live one,
/// thread record first, then its posts. An interrupted move leaves posts in
/// the live store whose thread record is gone; the next pass picks those up
/// as orphans and finishes the job.
pub struct Archiver<'a> {
    live: &'a dyn EntityStore,
    dead: &'a dyn EntityStore,
}

impl<'a> Archiver<'a> {
    pub fn new(live: &'a dyn EntityStore, dead: &'a dyn EntityStore) -> Self {
        Self { live, dead }
    }

    /// Archives every live thread of `board` whose number is not in
    /// `live_numbers`. Fails only when the live store cannot be scanned; a
    /// failure while moving one thread is recorded in the report and the
    /// pass continues with the next thread.
    pub async fn archive_dead(
        &self,
        board: &Board,
        live_numbers: &HashSet<i64>,
        cancel: &CancellationToken,
    ) -> Result<ArchiveReport> {
        let mut report = ArchiveReport::default();

        let vanished: BTreeSet<i64> = self
            .live
            .thread_numbers(board.name())
            .await?
            .into_iter()
            .filter(|n| !live_numbers.contains(n))
            .collect();

        let mut orphans = BTreeSet::new();
        for number in self.live.orphaned_post_threads(board.name()).await? {
            if vanished.contains(&number) {
                continue;
            }
            let archived = self.dead.find_thread(board.name(), number).await?.is_some();
            if archived || !live_numbers.contains(&number) {
                orphans.insert(number);
            }
        }

        if !vanished.is_empty() || !orphans.is_empty() {
            info!(
                board = board.name(),
                "Archiving {} vanished threads ({} with leftover posts)",
                vanished.len(),
                orphans.len()
            );
        }

        for number in vanished.iter().chain(orphans.iter()).copied() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.move_thread(board, number).await {
                Ok(stats) => {
                    if stats.thread_moved {
                        report.threads_archived += 1;
                    } else {
                        report.orphans_recovered += 1;
                    }
                    report.posts_archived += stats.posts_moved;
                    report.posts_already_archived += stats.posts_already_archived;
                    debug!(
                        board = board.name(),
                        thread = number,
                        posts = stats.posts_moved,
                        "Archived thread"
                    );
                }
                Err(e) => {
                    warn!(
                        board = board.name(),
                        thread = number,
                        from = self.live.label(),
                        to = self.dead.label(),
                        "Archive move aborted: {}",
                        e
                    );
                    report.failures.push(ArchiveFailure {
                        thread: number,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn move_thread(&self, board: &Board, number: i64) -> Result<MoveStats> {
        let mut stats = MoveStats::default();

        if let Some(thread) = self.live.find_thread(board.name(), number).await? {
            self.dead.insert_thread_if_absent(&thread).await?;
            self.live.delete_thread(board.name(), number).await?;
            stats.thread_moved = true;
        }

        for post in self.live.posts_for_thread(board.name(), number).await? {
            if self.dead.insert_post_if_absent(&post).await? {
                stats.posts_moved += 1;
            } else {
                stats.posts_already_archived += 1;
            }
            self.live.delete_post(board.name(), post.number).await?;
        }

        Ok(stats)
    }
}
