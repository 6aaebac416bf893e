use std::fmt;
use std::time::Duration;

use crate::error::TypeError;

/// Default TTL applied when the client does not ask for one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Longest TTL a client may request.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(60 * 60);

/// Format a TTL for the journal (`5m`, `1h 30m`, `0s`).
pub fn format_ttl(ttl: Duration) -> String {
    humantime::format_duration(ttl).to_string()
}

/// Parse a TTL from a journal field or an `x-ttl` header value.
pub fn parse_ttl(s: &str) -> Result<Duration, TypeError> {
    humantime::parse_duration(s.trim()).map_err(|e| TypeError::InvalidDuration {
        input: s.to_string(),
        reason: e.to_string(),
    })
}

/// Where a resolved TTL came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtlSource {
    /// No TTL was requested.
    Default,
    /// The requested TTL was valid and honoured.
    Requested,
    /// The requested TTL did not parse; the default was substituted.
    Unparsable,
    /// The requested TTL exceeded the maximum; the default was substituted.
    ExceedsMax,
}

impl fmt::Display for TtlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Requested => write!(f, "requested"),
            Self::Unparsable => write!(f, "unparsable"),
            Self::ExceedsMax => write!(f, "exceeds-max"),
        }
    }
}

/// A TTL together with the reason it was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedTtl {
    pub ttl: Duration,
    pub source: TtlSource,
}

/// Default and maximum TTL for uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Applied when the client sends no TTL or an unacceptable one.
    pub default: Duration,
    /// Client TTLs above this are replaced by `default`.
    pub max: Duration,
}

impl TtlPolicy {
    pub fn new(default: Duration, max: Duration) -> Self {
        Self { default, max }
    }

    /// Pick the TTL for an upload given the raw `x-ttl` header value.
    ///
    /// Invalid requests never fail the upload; they silently degrade to the
    /// default.
    pub fn resolve(&self, requested: Option<&str>) -> ResolvedTtl {
        let Some(raw) = requested.filter(|r| !r.trim().is_empty()) else {
            return ResolvedTtl {
                ttl: self.default,
                source: TtlSource::Default,
            };
        };
        match parse_ttl(raw) {
            Ok(ttl) if ttl <= self.max => ResolvedTtl {
                ttl,
                source: TtlSource::Requested,
            },
            Ok(_) => ResolvedTtl {
                ttl: self.default,
                source: TtlSource::ExceedsMax,
            },
            Err(_) => ResolvedTtl {
                ttl: self.default,
                source: TtlSource::Unparsable,
            },
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            default: DEFAULT_TTL,
            max: DEFAULT_MAX_TTL,
        }
    }
}
