//! Expiry journal for vanishling.
//!
//! An append-only text file holding one `expiry,ttl,path` line per accepted
//! upload. It is the crash-recovery source of truth: after a restart the
//! reaper rebuilds every pending expiration from this file alone.
//!
//! Lines are never edited in place. Expiry is effected by deleting the
//! referenced file; stale lines are skipped on later scans and disappear
//! when the journal is compacted.

pub mod entry;
pub mod error;
pub mod journal;

pub use entry::JournalEntry;
pub use error::{JournalError, JournalResult};
pub use journal::{Journal, JournalScan, RetainOutcome, JOURNAL_FILE_NAME};
