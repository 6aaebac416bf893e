//! Foundation types for vanishling, the ephemeral file-upload service.
//!
//! Every other vanishling crate depends on `vanishling-types`.
//!
//! # Key Types
//!
//! - [`FileId`]: hex-encoded keyed-hash digest naming a stored object
//! - [`TtlPolicy`]: default/maximum TTL and client TTL resolution
//! - [`Clock`]: injectable wall clock ([`SystemClock`], [`ManualClock`])
//!
//! The text codecs in [`temporal`] and [`ttl`] define the on-disk journal
//! representation of instants and durations. They must stay stable across
//! releases: a restarted reaper recovers pending expirations from them.

pub mod error;
pub mod file_id;
pub mod temporal;
pub mod ttl;

pub use error::TypeError;
pub use file_id::{is_path_safe, validate_file_name, FileId, FILE_ID_HEX_LEN};
pub use temporal::{expiry_after, format_timestamp, parse_timestamp, Clock, ManualClock, SystemClock};
pub use ttl::{format_ttl, parse_ttl, ResolvedTtl, TtlPolicy, TtlSource, DEFAULT_MAX_TTL, DEFAULT_TTL};
