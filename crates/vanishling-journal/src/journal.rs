use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use vanishling_types::{Clock, FileId, SystemClock};

use crate::entry::JournalEntry;
use crate::error::{JournalError, JournalResult};

/// File name of the journal inside the journal root.
pub const JOURNAL_FILE_NAME: &str = "entries.journal";

/// Result of a full journal scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JournalScan {
    /// Entries that decoded cleanly, in file order.
    pub entries: Vec<JournalEntry>,
    /// Lines that did not decode (including a torn tail).
    pub malformed: usize,
    /// The file did not end in a newline: an append was in flight or torn.
    pub torn_tail: bool,
}

/// Outcome of [`Journal::retain`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetainOutcome {
    pub kept: usize,
    pub dropped: usize,
    /// Journal size after the rewrite.
    pub bytes: u64,
}

/// Append-only expiry journal.
///
/// On-disk format, one entry per line:
/// ```text
/// <expiry RFC 3339 UTC ms>,<ttl humantime>,<absolute path>\n
/// ```
///
/// Appends are serialised on an internal lock and each one writes its whole
/// line with a single `write_all` on an `O_APPEND` handle, then syncs before
/// returning. Scans take no lock and tolerate a partially written last line.
/// Compaction ([`truncate`](Self::truncate), [`retain`](Self::retain)) holds
/// the append lock so no concurrent append is lost.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl Journal {
    /// Open (or create) `entries.journal` inside `dir`.
    pub fn open(dir: &Path) -> JournalResult<Self> {
        Self::open_file(&dir.join(JOURNAL_FILE_NAME))
    }

    /// Open (or create) a journal at an explicit file path.
    pub fn open_file(path: &Path) -> JournalResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)?;

        info!(path = %path.display(), "journal opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used to stamp expiry instants.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that the object `id` under `storage_root` expires `ttl` from now.
    ///
    /// The line is durable when this returns.
    pub fn append(&self, ttl: Duration, storage_root: &Path, id: &FileId) -> JournalResult<JournalEntry> {
        let path = std::path::absolute(storage_root.join(id.as_str()))?;
        let entry = JournalEntry::new(self.clock.now(), ttl, path);
        self.append_entry(&entry)?;
        Ok(entry)
    }

    /// Append a pre-built entry.
    pub fn append_entry(&self, entry: &JournalEntry) -> JournalResult<()> {
        let line = entry.to_line()?;

        let _guard = self.writer.lock().expect("journal mutex poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        // A crash mid-append leaves an unterminated tail; never glue onto it.
        let mut buf = Vec::with_capacity(line.len() + 1);
        let len = file.metadata()?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                buf.push(b'\n');
            }
        }
        buf.extend_from_slice(line.as_bytes());
        file.write_all(&buf)?;
        file.sync_data()?;

        debug!(path = %entry.path.display(), expires_at = %entry.expires_at, "journal append");
        Ok(())
    }

    /// Read every entry.
    ///
    /// Malformed lines are logged and skipped; they never abort the scan. A
    /// missing journal file scans as empty.
    pub fn read_all(&self) -> JournalResult<JournalScan> {
        let mut raw = Vec::new();
        match File::open(&self.path) {
            Ok(mut file) => {
                file.read_to_end(&mut raw)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(JournalScan::default()),
            Err(e) => return Err(e.into()),
        }
        Ok(scan_bytes(&raw))
    }

    /// Current journal size in bytes (0 if the file is missing).
    pub fn size(&self) -> JournalResult<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every entry by truncating the file to zero length.
    pub fn truncate(&self) -> JournalResult<()> {
        let _guard = self.writer.lock().expect("journal mutex poisoned");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;

        debug!(path = %self.path.display(), "journal truncated");
        Ok(())
    }

    /// Rewrite the journal keeping only entries for which `keep` returns
    /// `true`. Malformed lines are always dropped.
    ///
    /// The file is rescanned under the append lock and replaced atomically
    /// (temp file, fsync, rename), so a crash leaves either the old or the
    /// new journal.
    pub fn retain<F>(&self, mut keep: F) -> JournalResult<RetainOutcome>
    where
        F: FnMut(&JournalEntry) -> bool,
    {
        let _guard = self.writer.lock().expect("journal mutex poisoned");
        let scan = self.read_all()?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".journal-")
            .tempfile_in(dir)?;

        let mut outcome = RetainOutcome {
            dropped: scan.malformed,
            ..RetainOutcome::default()
        };
        for entry in &scan.entries {
            if keep(entry) {
                tmp.write_all(entry.to_line()?.as_bytes())?;
                outcome.kept += 1;
            } else {
                outcome.dropped += 1;
            }
        }
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        outcome.bytes = tmp.as_file().metadata()?.len();
        tmp.persist(&self.path).map_err(|e| JournalError::Io(e.error))?;

        debug!(kept = outcome.kept, dropped = outcome.dropped, "journal rewritten");
        Ok(outcome)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

fn scan_bytes(raw: &[u8]) -> JournalScan {
    let text = String::from_utf8_lossy(raw);
    let torn_tail = !text.is_empty() && !text.ends_with('\n');
    let mut scan = JournalScan {
        torn_tail,
        ..JournalScan::default()
    };

    let lines: Vec<&str> = text.split('\n').collect();
    // `split` yields a final empty piece after the last newline, or the torn
    // remainder when there is none.
    let (complete, tail) = lines.split_at(lines.len().saturating_sub(1));

    for (idx, line) in complete.iter().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        match JournalEntry::parse_line(line) {
            Ok(entry) => scan.entries.push(entry),
            Err(e) => {
                scan.malformed += 1;
                warn!(line = idx + 1, error = %e, "skipping malformed journal line");
            }
        }
    }

    if torn_tail {
        scan.malformed += 1;
        debug!(line = lines.len(), bytes = tail.first().map_or(0, |t| t.len()), "skipping unterminated journal tail");
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vanishling_types::ManualClock;

    fn fixed_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()))
    }

    /// A well-formed id whose leading bytes spell `label`.
    fn id(label: &str) -> FileId {
        let mut digest = [0u8; 32];
        digest[..label.len()].copy_from_slice(label.as_bytes());
        FileId::from_digest(digest)
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap().with_clock(fixed_clock());

        let e1 = journal.append(Duration::from_secs(60), Path::new("/srv/up"), &id("aa")).unwrap();
        let e2 = journal.append(Duration::from_secs(300), Path::new("/srv/up"), &id("bb")).unwrap();

        let scan = journal.read_all().unwrap();
        assert_eq!(scan.entries, vec![e1, e2]);
        assert_eq!(scan.malformed, 0);
        assert!(!scan.torn_tail);
    }

    #[test]
    fn append_writes_the_documented_line() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap().with_clock(fixed_clock());
        journal.append(Duration::from_secs(300), Path::new("/srv/up"), &id("abc")).unwrap();

        let text = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(text, format!("2026-10-18T12:05:00.000Z,5m,/srv/up/{}\n", id("abc")));
    }

    #[test]
    fn open_uses_default_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(&dir.path().join("log")).unwrap();
        assert_eq!(journal.path(), dir.path().join("log").join(JOURNAL_FILE_NAME));
        assert!(journal.path().exists());
        assert_eq!(journal.size().unwrap(), 0);
    }

    #[test]
    fn relative_roots_are_made_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let entry = journal.append(Duration::ZERO, Path::new("uploads"), &id("cc")).unwrap();
        assert!(entry.path.is_absolute());
        assert!(entry.path.ends_with(format!("uploads/{}", id("cc"))));
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap().with_clock(fixed_clock());
        journal.append(Duration::from_secs(1), Path::new("/a"), &id("one")).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(journal.path()).unwrap();
            f.write_all(b"garbage line\n").unwrap();
            f.write_all(b"Mon Jan  2 15:04:05 MST 2006,5m0s,/legacy\n").unwrap();
        }
        journal.append(Duration::from_secs(2), Path::new("/a"), &id("two")).unwrap();

        let scan = journal.read_all().unwrap();
        assert_eq!(scan.entries.len(), 2);
        assert_eq!(scan.malformed, 2);
        assert_eq!(scan.entries[1].path, Path::new("/a").join(id("two").as_str()));
    }

    #[test]
    fn torn_tail_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap().with_clock(fixed_clock());
        journal.append(Duration::from_secs(1), Path::new("/a"), &id("whole")).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(journal.path()).unwrap();
            f.write_all(b"2026-10-18T12:00:01.000Z,1s,/a/par").unwrap();
        }

        let scan = journal.read_all().unwrap();
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.malformed, 1);
        assert!(scan.torn_tail);
    }

    #[test]
    fn append_after_torn_tail_starts_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap().with_clock(fixed_clock());
        fs::write(journal.path(), b"2026-10-18T12:00:01.000Z,1s,/a/to").unwrap();

        let entry = journal.append(Duration::from_secs(1), Path::new("/a"), &id("next")).unwrap();

        let scan = journal.read_all().unwrap();
        assert_eq!(scan.entries.len(), 2);
        assert_eq!(scan.entries[1], entry);
        assert!(!scan.torn_tail);
    }

    #[test]
    fn missing_file_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        fs::remove_file(journal.path()).unwrap();
        assert_eq!(journal.read_all().unwrap(), JournalScan::default());
        assert_eq!(journal.size().unwrap(), 0);
    }

    #[test]
    fn truncate_empties_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        journal.append(Duration::from_secs(1), Path::new("/a"), &id("x")).unwrap();
        assert!(journal.size().unwrap() > 0);

        journal.truncate().unwrap();
        assert_eq!(journal.size().unwrap(), 0);
        assert!(journal.read_all().unwrap().entries.is_empty());

        // Appends continue after truncation.
        journal.append(Duration::from_secs(1), Path::new("/a"), &id("y")).unwrap();
        assert_eq!(journal.read_all().unwrap().entries.len(), 1);
    }

    #[test]
    fn retain_keeps_selected_entries() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap().with_clock(fixed_clock());
        for name in ["keep1", "drop1", "keep2"] {
            journal.append(Duration::from_secs(60), Path::new("/s"), &id(name)).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(journal.path()).unwrap();
            f.write_all(b"junk\n").unwrap();
        }

        let unwanted = Path::new("/s").join(id("drop1").as_str());
        let outcome = journal.retain(|e| e.path != unwanted).unwrap();
        assert_eq!(outcome.kept, 2);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.bytes, journal.size().unwrap());

        let scan = journal.read_all().unwrap();
        let paths: Vec<_> = scan.entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                Path::new("/s").join(id("keep1").as_str()),
                Path::new("/s").join(id("keep2").as_str()),
            ]
        );
        assert_eq!(scan.malformed, 0);
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let journal = Arc::clone(&journal);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let name = format!("t{t}-{i}");
                        journal
                            .append(Duration::from_secs(60), Path::new("/c"), &id(&name))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let scan = journal.read_all().unwrap();
        assert_eq!(scan.entries.len(), 200);
        assert_eq!(scan.malformed, 0);
    }
}
