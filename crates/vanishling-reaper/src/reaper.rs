use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vanishling_journal::{Journal, JournalEntry};
use vanishling_types::{Clock, SystemClock};

use crate::config::{CompactionPolicy, ReaperConfig};

/// Where the reaper is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaperState {
    Idle,
    Scanning,
    Deleting,
    Compacting,
    Stopped,
}

impl fmt::Display for ReaperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::Deleting => write!(f, "deleting"),
            Self::Compacting => write!(f, "compacting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A journal compaction performed at the end of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Compaction {
    Truncated { before_bytes: u64 },
    Rewritten { before_bytes: u64, after_bytes: u64, kept: usize, dropped: usize },
}

/// What one pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Well-formed journal entries examined.
    pub scanned: usize,
    /// Files deleted by this pass.
    pub deleted: usize,
    /// Entries whose file was already gone.
    pub missing: usize,
    /// Entries whose file exists but has not expired yet.
    pub not_due: usize,
    /// Deletions that failed; retried next tick.
    pub failed: usize,
    /// Entries pointing outside the storage root; never deleted.
    pub foreign: usize,
    /// Journal lines that did not decode.
    pub malformed: usize,
    pub compaction: Option<Compaction>,
}

/// Snapshot published on every state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaperStatus {
    pub state: ReaperState,
    /// Passes completed since the reaper was created.
    pub passes: u64,
    pub last_report: Option<PassReport>,
}

/// Deletes expired objects recorded in the journal.
///
/// The reaper exclusively owns the delete path of the storage root. It keeps
/// no index of its own: every pass rebuilds its view from the journal and
/// checks the filesystem for each entry.
pub struct Reaper {
    journal: Arc<Journal>,
    config: ReaperConfig,
    clock: Arc<dyn Clock>,
    status: watch::Sender<ReaperStatus>,
}

impl Reaper {
    pub fn new(journal: Arc<Journal>, config: ReaperConfig) -> Self {
        let (status, _) = watch::channel(ReaperStatus {
            state: ReaperState::Idle,
            passes: 0,
            last_report: None,
        });
        Self {
            journal,
            config,
            clock: Arc::new(SystemClock),
            status,
        }
    }

    /// Replace the clock used to decide what has expired.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    pub fn state(&self) -> ReaperState {
        self.status.borrow().state
    }

    /// Watch state transitions and pass reports.
    pub fn subscribe(&self) -> watch::Receiver<ReaperStatus> {
        self.status.subscribe()
    }

    fn transition(&self, state: ReaperState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Run one full pass: scan, delete what is due, compact if oversized.
    ///
    /// Never fails; every problem is logged and counted in the report.
    pub fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();
        let now = self.clock.now();

        self.transition(ReaperState::Scanning);
        let scan = match self.journal.read_all() {
            Ok(scan) => scan,
            Err(e) => {
                warn!(journal = %self.journal.path().display(), error = %e, "journal scan failed");
                self.finish(report.clone());
                return report;
            }
        };
        report.scanned = scan.entries.len();
        report.malformed = scan.malformed;

        self.transition(ReaperState::Deleting);
        for entry in &scan.entries {
            self.reap_entry(entry, now, &mut report);
        }

        report.compaction = self.compact_if_oversized();

        if report.deleted > 0 || report.failed > 0 || report.compaction.is_some() {
            info!(
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                not_due = report.not_due,
                compacted = report.compaction.is_some(),
                "reaper pass completed"
            );
        } else {
            debug!(scanned = report.scanned, not_due = report.not_due, "reaper pass: nothing to do");
        }
        self.finish(report.clone());
        report
    }

    fn finish(&self, report: PassReport) {
        self.status.send_modify(|s| {
            s.state = ReaperState::Idle;
            s.passes += 1;
            s.last_report = Some(report);
        });
    }

    fn reap_entry(&self, entry: &JournalEntry, now: chrono::DateTime<chrono::Utc>, report: &mut PassReport) {
        if !self.is_inside_root(&entry.path) {
            report.foreign += 1;
            warn!(path = %entry.path.display(), "journal entry outside storage root; not deleting");
            return;
        }
        match entry.path.try_exists() {
            Ok(true) => {}
            Ok(false) => {
                report.missing += 1;
                return;
            }
            Err(e) => {
                report.failed += 1;
                warn!(path = %entry.path.display(), error = %e, "cannot stat journaled file");
                return;
            }
        }
        if !entry.is_due(now) {
            report.not_due += 1;
            return;
        }

        match std::fs::remove_file(&entry.path) {
            Ok(()) => {
                report.deleted += 1;
                info!(
                    path = %entry.path.display(),
                    ttl = %vanishling_types::format_ttl(entry.ttl),
                    expires_at = %entry.expires_at,
                    "deleted expired file"
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => report.missing += 1,
            Err(e) => {
                report.failed += 1;
                warn!(path = %entry.path.display(), error = %e, "failed to delete expired file");
            }
        }
    }

    fn is_inside_root(&self, path: &Path) -> bool {
        match &self.config.storage_root {
            Some(root) => path.parent() == Some(root.as_path()),
            None => true,
        }
    }

    fn compact_if_oversized(&self) -> Option<Compaction> {
        let before_bytes = match self.journal.size() {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "cannot stat journal");
                return None;
            }
        };
        if before_bytes <= self.config.max_journal_bytes {
            return None;
        }

        self.transition(ReaperState::Compacting);
        let result = match self.config.compaction {
            CompactionPolicy::Truncate => self
                .journal
                .truncate()
                .map(|()| Compaction::Truncated { before_bytes }),
            CompactionPolicy::RetainPending => self
                .journal
                .retain(|e| e.path.exists())
                .map(|outcome| Compaction::Rewritten {
                    before_bytes,
                    after_bytes: outcome.bytes,
                    kept: outcome.kept,
                    dropped: outcome.dropped,
                }),
        };

        match result {
            Ok(compaction) => {
                info!(?compaction, ceiling = self.config.max_journal_bytes, "journal compacted");
                Some(compaction)
            }
            Err(e) => {
                warn!(error = %e, "journal compaction failed");
                None
            }
        }
    }

    /// Start the periodic task. The first pass runs immediately, which
    /// recovers expirations left pending by a previous process.
    pub fn spawn(self: Arc<Self>) -> ReaperHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&self).run(cancel.clone()));
        ReaperHandle {
            reaper: self,
            cancel,
            task,
        }
    }

    /// Tick until `cancel` fires. Cancellation is observed only between
    /// passes; a pass that has started always completes.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            journal = %self.journal.path().display(),
            "reaper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reaper = Arc::clone(&self);
                    if let Err(e) = tokio::task::spawn_blocking(move || reaper.run_pass()).await {
                        warn!(error = %e, "reaper pass panicked");
                        self.transition(ReaperState::Idle);
                    }
                }
            }
        }

        self.transition(ReaperState::Stopped);
        info!("reaper stopped");
    }
}

impl fmt::Debug for Reaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaper")
            .field("journal", &self.journal.path())
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle to a spawned reaper task.
pub struct ReaperHandle {
    reaper: Arc<Reaper>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn reaper(&self) -> &Arc<Reaper> {
        &self.reaper
    }

    /// Token that stops the task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the task and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "reaper task ended abnormally");
        }
    }
}
