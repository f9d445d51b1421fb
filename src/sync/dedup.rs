use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Attachment, Board};
use crate::traits::{DownloadLedger, FileTransport};

/// Picks the attachments that still need downloading.
///
/// Keeps only `kind` attachments that carry a content hash, drops hashes the
/// ledger already knows, and collapses repeated hashes to their first
/// occurrence. Input order is preserved.
pub async fn plan_downloads(
    attachments: &[Attachment],
    kind: i64,
    ledger: &dyn DownloadLedger,
) -> Result<Vec<Attachment>> {
    let mut planned = HashSet::new();
    let mut plan = Vec::new();

    for attachment in attachments.iter().filter(|a| a.kind == kind) {
        let Some(hash) = attachment.content_hash() else {
            continue;
        };
        if planned.contains(hash) || ledger.has(hash).await? {
            continue;
        }
        planned.insert(hash.to_string());
        plan.push(attachment.clone());
    }

    Ok(plan)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub planned: usize,
    pub downloaded: usize,
    pub bytes: u64,
    /// Already in the ledger, or being fetched by another worker.
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Downloaded(u64),
    Skipped,
    Failed,
    Cancelled,
}

/// Releases a hash claim when a download finishes, however it finishes.
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    hash: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.hash);
        }
    }
}

/// Runs download plans against a [`FileTransport`] and records successful
/// downloads in the ledger.
///
/// Files are stored under `<root>/<board>/<hash>.<ext>`. Two attempts at the
/// same hash never overlap: the second one is skipped while the first holds
/// the hash claim. Only successful downloads are recorded, so failures are
/// retried on the next cycle.
pub struct DownloadExecutor {
    transport: Arc<dyn FileTransport>,
    ledger: Arc<dyn DownloadLedger>,
    root: PathBuf,
    base_url: Url,
    workers: usize,
    timeout: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl DownloadExecutor {
    pub fn new(
        transport: Arc<dyn FileTransport>,
        ledger: Arc<dyn DownloadLedger>,
        root: impl Into<PathBuf>,
        base_url: Url,
        workers: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            ledger,
            root: root.into(),
            base_url,
            workers: workers.max(1),
            timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &dyn DownloadLedger {
        self.ledger.as_ref()
    }

    /// Creates the board's file directory if needed. A failure here is a
    /// configuration problem and ends the cycle.
    pub async fn ensure_namespace(&self, board: &Board) -> Result<PathBuf> {
        let dir = self.root.join(board.name());
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Config(format!("cannot create file directory {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    pub async fn execute(
        &self,
        board: &Board,
        plan: Vec<Attachment>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let dir = self.ensure_namespace(board).await?;
        let mut report = DownloadReport {
            planned: plan.len(),
            ..DownloadReport::default()
        };
        if plan.is_empty() {
            return Ok(report);
        }

        info!(board = board.name(), "Downloading {} files", plan.len());
        let outcomes: Vec<Outcome> = stream::iter(plan)
            .map(|attachment| self.fetch_one(&dir, attachment, cancel))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Downloaded(bytes) => {
                    report.downloaded += 1;
                    report.bytes += bytes;
                }
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Cancelled => report.cancelled = true,
            }
        }

        Ok(report)
    }

    fn claim(&self, hash: &str) -> Option<Claim<'_>> {
        let mut in_flight = self.in_flight.lock().ok()?;
        if !in_flight.insert(hash.to_string()) {
            return None;
        }
        Some(Claim {
            in_flight: &self.in_flight,
            hash: hash.to_string(),
        })
    }

    /// Resolves a remote attachment path beneath the API root, keeping any
    /// path prefix of the root. Absolute URLs and `..` segments are refused.
    fn file_url(&self, path: &str) -> Result<Url> {
        if Url::parse(path).is_ok() || path.split('/').any(|segment| segment == "..") {
            return Err(AppError::malformed(format!("attachment path {} is not a board path", path)));
        }
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::malformed(format!("attachment path {}: {}", path, e)))
    }

    async fn fetch_one(&self, dir: &Path, attachment: Attachment, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let (Some(hash), Some(file_name)) = (attachment.content_hash(), attachment.storage_name()) else {
            return Outcome::Skipped;
        };

        let Some(_claim) = self.claim(hash) else {
            debug!(hash, "Download already in flight");
            return Outcome::Skipped;
        };

        // Another cycle may have finished this hash since planning.
        match self.ledger.has(hash).await {
            Ok(true) => return Outcome::Skipped,
            Ok(false) => {}
            Err(e) => {
                warn!(hash, "Ledger lookup failed: {}", e);
                return Outcome::Failed;
            }
        }

        let url = match self.file_url(&attachment.path) {
            Ok(url) => url,
            Err(e) => {
                warn!(hash, path = %attachment.path, "Bad attachment path: {}", e);
                return Outcome::Failed;
            }
        };
        let destination = dir.join(&file_name);

        let bytes = match tokio::time::timeout(
            self.timeout,
            self.transport.download(url.as_str(), &destination),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(hash, url = %url, "Download failed: {}", e);
                return Outcome::Failed;
            }
            Err(_) => {
                warn!(hash, url = %url, "Download timed out after {:?}", self.timeout);
                return Outcome::Failed;
            }
        };

        if let Err(e) = self.ledger.record(hash, Utc::now()).await {
            warn!(hash, "Downloaded {} but could not record it: {}", file_name, e);
            return Outcome::Failed;
        }

        debug!(hash, file = %file_name, bytes, "Downloaded");
        Outcome::Downloaded(bytes)
    }
}
