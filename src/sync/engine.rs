use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, ErrorKind, Result};
use crate::models::{Attachment, Board, Thread, ThreadPosts};
use crate::traits::{EntityStore, RemoteFetcher, Sanitizer};

use super::archiver::{ArchiveReport, Archiver};
use super::dedup::{plan_downloads, DownloadExecutor, DownloadReport};
use super::normalizer::{normalize_threads, SnapshotNormalizer};
use super::reconciler::{ReconcileReport, Reconciler};

/// Knobs the engine needs from the config file.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub fetch_workers: usize,
    pub request_timeout: Duration,
    pub request_delay: Duration,
    pub download_type: i64,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_workers: config.fetch_workers,
            request_timeout: config.request_timeout(),
            request_delay: Duration::from_millis(config.request_delay_ms),
            download_type: config.download_type,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fetch_workers: 5,
            request_timeout: Duration::from_secs(30),
            request_delay: Duration::ZERO,
            download_type: 6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub fetch: Duration,
    pub reconcile: Duration,
    pub archive: Duration,
    pub download: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Cancelled,
    /// The thread list could not be fetched; nothing was reconciled or archived.
    ListUnavailable(String),
    /// A configuration error ended the cycle after the stages already run.
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub board: String,
    pub threads_seen: usize,
    pub threads_rejected: usize,
    pub reconcile: ReconcileReport,
    pub archive: Option<ArchiveReport>,
    /// Set when the archive pass could not scan the live store.
    pub archive_error: Option<String>,
    pub downloads: Option<DownloadReport>,
    /// Set when the download stage failed before any file was attempted.
    pub download_error: Option<String>,
    pub timings: StageTimings,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(board: &Board) -> Self {
        Self {
            board: board.name().to_string(),
            threads_seen: 0,
            threads_rejected: 0,
            reconcile: ReconcileReport::default(),
            archive: None,
            archive_error: None,
            downloads: None,
            download_error: None,
            timings: StageTimings::default(),
            outcome: CycleOutcome::Completed,
        }
    }

    pub fn threads_dead(&self) -> usize {
        self.archive.as_ref().map_or(0, |a| a.threads_archived)
    }

    pub fn log_summary(&self) {
        let r = &self.reconcile;
        let (downloaded, skipped, failed) = self
            .downloads
            .as_ref()
            .map_or((0, 0, 0), |d| (d.downloaded, d.skipped, d.failed));
        info!(
            board = %self.board,
            outcome = ?self.outcome,
            "Threads: {} new, {} updated, {} unchanged, {} dead, {} failed, {} rejected. \
             Posts: {} new, {} known. Files: {} downloaded, {} skipped, {} failed. \
             Took fetch {:?}, reconcile {:?}, archive {:?}, download {:?}",
            r.threads_inserted,
            r.threads_updated,
            r.threads_unchanged,
            self.threads_dead(),
            r.threads_fetch_failed + r.threads_failed,
            self.threads_rejected,
            r.posts_inserted,
            r.posts_skipped,
            downloaded,
            skipped,
            failed,
            self.timings.fetch,
            self.timings.reconcile,
            self.timings.archive,
            self.timings.download,
        );
    }
}

/// Runs poll cycles: fetch, normalize, reconcile, archive, download.
///
/// A cycle never returns an error. Per-entity failures are counted in the
/// report; only a configuration error stops a cycle early, and it is
/// reported through [`CycleOutcome::Aborted`].
pub struct SyncEngine {
    fetcher: Arc<dyn RemoteFetcher>,
    sanitizer: Arc<dyn Sanitizer>,
    live: Arc<dyn EntityStore>,
    dead: Arc<dyn EntityStore>,
    downloads: Option<DownloadExecutor>,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        fetcher: Arc<dyn RemoteFetcher>,
        sanitizer: Arc<dyn Sanitizer>,
        live: Arc<dyn EntityStore>,
        dead: Arc<dyn EntityStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            fetcher,
            sanitizer,
            live,
            dead,
            downloads: None,
            settings,
        }
    }

    pub fn with_downloads(mut self, downloads: DownloadExecutor) -> Self {
        self.downloads = Some(downloads);
        self
    }

    pub async fn run_cycle(&self, board: &Board, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::new(board);
        info!(board = board.name(), "=== START ===");

        let started = Instant::now();
        let raw = match self
            .with_timeout(self.fetcher.fetch_thread_list(board))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!(board = board.name(), "Thread list unavailable: {}", e);
                report.timings.fetch = started.elapsed();
                report.outcome = CycleOutcome::ListUnavailable(e.to_string());
                return report;
            }
        };
        let snapshot = normalize_threads(board, &raw);
        report.timings.fetch = started.elapsed();
        report.threads_seen = snapshot.threads.len();
        report.threads_rejected = snapshot.rejected;
        info!(
            board = board.name(),
            "Fetched {} threads ({} rejected) in {:?}",
            snapshot.threads.len(),
            snapshot.rejected,
            report.timings.fetch
        );

        let started = Instant::now();
        let reconciler = Reconciler::new(self.live.as_ref(), self.dead.as_ref());
        let reconciled = reconciler
            .reconcile(
                snapshot.threads,
                |thread| self.fetch_posts(board, thread),
                self.settings.fetch_workers,
                cancel,
            )
            .await;
        report.timings.reconcile = started.elapsed();
        report.reconcile = reconciled.report;

        if cancel.is_cancelled() {
            report.outcome = CycleOutcome::Cancelled;
            return report;
        }

        let started = Instant::now();
        let archiver = Archiver::new(self.live.as_ref(), self.dead.as_ref());
        match archiver.archive_dead(board, &snapshot.seen, cancel).await {
            Ok(archive) => report.archive = Some(archive),
            Err(e) => {
                warn!(board = board.name(), "Archive pass skipped: {}", e);
                report.archive_error = Some(e.to_string());
            }
        }
        report.timings.archive = started.elapsed();

        if cancel.is_cancelled() {
            report.outcome = CycleOutcome::Cancelled;
            return report;
        }

        if let Some(downloads) = &self.downloads {
            let started = Instant::now();
            match self
                .download(downloads, board, &reconciled.attachments, cancel)
                .await
            {
                Ok(download) => {
                    if download.cancelled {
                        report.outcome = CycleOutcome::Cancelled;
                    }
                    report.downloads = Some(download);
                }
                Err(e) if e.kind() == ErrorKind::Configuration => {
                    error!(board = board.name(), "Cycle aborted: {}", e);
                    report.outcome = CycleOutcome::Aborted(e.to_string());
                }
                Err(e) => {
                    warn!(board = board.name(), "Download stage skipped: {}", e);
                    report.download_error = Some(e.to_string());
                }
            }
            report.timings.download = started.elapsed();
        }

        self.log_totals(board).await;
        info!(board = board.name(), "=== STOP ===");
        report
    }

    async fn fetch_posts(&self, board: &Board, thread: Thread) -> Result<ThreadPosts> {
        if !self.settings.request_delay.is_zero() {
            tokio::time::sleep(self.settings.request_delay).await;
        }
        let raw = self
            .with_timeout(self.fetcher.fetch_thread_posts(board, thread.number))
            .await?;
        SnapshotNormalizer::new(self.sanitizer.as_ref()).normalize_posts(board, thread.number, &raw)
    }

    async fn download(
        &self,
        downloads: &DownloadExecutor,
        board: &Board,
        attachments: &[Attachment],
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let plan = plan_downloads(attachments, self.settings.download_type, downloads.ledger()).await?;
        downloads.execute(board, plan, cancel).await
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let limit = self.settings.request_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AppError::Timeout(limit))?
    }

    async fn log_totals(&self, board: &Board) {
        match (self.live.counts().await, self.dead.counts().await) {
            (Ok(live), Ok(dead)) => info!(
                board = board.name(),
                "Stored {} live threads with {} posts, {} dead threads with {} posts",
                live.threads,
                live.posts,
                dead.threads,
                dead.posts
            ),
            (Err(e), _) | (_, Err(e)) => warn!("Could not count stored records: {}", e),
        }
    }
}
