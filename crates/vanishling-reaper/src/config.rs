use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between reaper passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default journal size ceiling: 1 TiB.
pub const DEFAULT_MAX_JOURNAL_BYTES: u64 = 1024 * 1024 * 1024 * 1024;

/// What to do with a journal that has outgrown its ceiling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompactionPolicy {
    /// Truncate the whole file to zero length.
    ///
    /// Lossy: objects whose expiry lies beyond the truncation lose their
    /// journal entry and are never reaped.
    Truncate,
    /// Rewrite the file keeping every entry whose file still exists, so a
    /// due entry whose delete failed is retried on the next pass.
    #[default]
    RetainPending,
}

/// Configuration for the reaper task.
#[derive(Clone, Debug)]
pub struct ReaperConfig {
    /// Interval between passes.
    pub interval: Duration,
    /// Compact once the journal is larger than this many bytes.
    pub max_journal_bytes: u64,
    pub compaction: CompactionPolicy,
    /// If set, only paths directly inside this directory are ever deleted.
    pub storage_root: Option<PathBuf>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_journal_bytes: DEFAULT_MAX_JOURNAL_BYTES,
            compaction: CompactionPolicy::default(),
            storage_root: None,
        }
    }
}
