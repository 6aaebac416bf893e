//! Expiry reaper for vanishling.
//!
//! A single long-lived task that wakes on a fixed interval, scans the
//! journal, deletes every object whose expiry has passed, and compacts the
//! journal once it outgrows its ceiling.
//!
//! # State Machine
//!
//! ```text
//! Idle -> Scanning -> Deleting -> (Compacting) -> Idle
//!   \-> Stopped (on cancellation, only at a tick boundary)
//! ```
//!
//! Deletion is idempotent: entries whose file is already gone are skipped,
//! and a failed delete is retried on the next tick. The reaper never stops
//! because of a bad entry.

pub mod config;
pub mod reaper;

pub use config::{CompactionPolicy, ReaperConfig};
pub use reaper::{Compaction, PassReport, Reaper, ReaperHandle, ReaperState, ReaperStatus};
