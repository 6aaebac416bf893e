use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use vanishling_types::{expiry_after, format_timestamp, format_ttl, parse_timestamp, parse_ttl};

use crate::error::{JournalError, JournalResult};

/// One pending expiration: `expiry,ttl,path`.
///
/// The path is the last field and may itself contain commas; it may not
/// contain line breaks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    /// Instant after which the file may be deleted (millisecond precision).
    pub expires_at: DateTime<Utc>,
    /// The TTL the upload was accepted with.
    pub ttl: Duration,
    /// Absolute path of the stored object.
    pub path: PathBuf,
}

impl JournalEntry {
    /// Entry for an object accepted at `now` with `ttl`.
    pub fn new(now: DateTime<Utc>, ttl: Duration, path: impl Into<PathBuf>) -> Self {
        Self {
            expires_at: expiry_after(now, ttl),
            ttl,
            path: path.into(),
        }
    }

    /// Returns `true` once `now` has reached the expiry instant.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Encode as a journal line, including the trailing newline.
    pub fn to_line(&self) -> JournalResult<String> {
        let path = journalable_path(&self.path)?;
        Ok(format!(
            "{},{},{}\n",
            format_timestamp(self.expires_at),
            format_ttl(self.ttl),
            path
        ))
    }

    /// Decode one journal line (without its newline).
    pub fn parse_line(line: &str) -> JournalResult<Self> {
        let malformed = |reason: String| JournalError::Malformed { line: 0, reason };

        let mut fields = line.splitn(3, ',');
        let (Some(expiry), Some(ttl), Some(path)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(format!(
                "expected 3 fields, got {}",
                line.split(',').count()
            )));
        };
        if path.is_empty() {
            return Err(malformed("empty path".into()));
        }

        let expires_at = parse_timestamp(expiry).map_err(|e| malformed(e.to_string()))?;
        let ttl = parse_ttl(ttl).map_err(|e| malformed(e.to_string()))?;
        Ok(Self {
            expires_at,
            ttl,
            path: PathBuf::from(path),
        })
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            format_timestamp(self.expires_at),
            format_ttl(self.ttl),
            self.path.display()
        )
    }
}

impl FromStr for JournalEntry {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s.trim_end_matches(&['\r', '\n'][..]))
    }
}

fn journalable_path(path: &Path) -> JournalResult<&str> {
    match path.to_str() {
        Some(s) if !s.is_empty() && !s.contains(&['\n', '\r'][..]) => Ok(s),
        _ => Err(JournalError::InvalidPath(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, h, m, s).unwrap()
    }

    #[test]
    fn line_format() {
        let entry = JournalEntry::new(at(12, 0, 0), Duration::from_secs(300), "/srv/up/abc");
        assert_eq!(
            entry.to_line().unwrap(),
            "2026-10-18T12:05:00.000Z,5m,/srv/up/abc\n"
        );
    }

    #[test]
    fn line_roundtrip() {
        let entry = JournalEntry::new(at(8, 30, 0), Duration::from_secs(90), "/tmp/v/uploads/ff00");
        let line = entry.to_line().unwrap();
        assert_eq!(line.parse::<JournalEntry>().unwrap(), entry);
    }

    #[test]
    fn commas_in_path_survive() {
        let entry = JournalEntry::new(at(1, 0, 0), Duration::ZERO, "/data/a,b/c");
        let parsed: JournalEntry = entry.to_line().unwrap().parse().unwrap();
        assert_eq!(parsed.path, PathBuf::from("/data/a,b/c"));
    }

    #[test]
    fn newline_in_path_is_refused() {
        let entry = JournalEntry::new(at(1, 0, 0), Duration::ZERO, "/data/a\nb");
        assert!(matches!(entry.to_line(), Err(JournalError::InvalidPath(_))));
    }

    #[test]
    fn malformed_lines() {
        for bad in [
            "",
            "only-one-field",
            "2026-10-18T12:00:00.000Z,5m",
            "2026-10-18T12:00:00.000Z,5m,",
            "yesterday,5m,/x",
            "2026-10-18T12:00:00.000Z,forever,/x",
        ] {
            assert!(
                matches!(JournalEntry::parse_line(bad), Err(JournalError::Malformed { .. })),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn due_at_and_after_expiry() {
        let entry = JournalEntry::new(at(12, 0, 0), Duration::from_secs(60), "/x");
        assert!(!entry.is_due(at(12, 0, 59)));
        assert!(entry.is_due(at(12, 1, 0)));
        assert!(entry.is_due(at(13, 0, 0)));
    }

    #[test]
    fn zero_ttl_is_due_immediately() {
        let now = at(9, 0, 0);
        assert!(JournalEntry::new(now, Duration::ZERO, "/x").is_due(now));
    }
}
