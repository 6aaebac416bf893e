use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vanishling_crypto::{KeyedHasher, UploadDigest};
use vanishling_types::{validate_file_name, Clock, FileId, SystemClock};

use crate::error::{StoreError, StoreResult};

/// Prefix of in-flight upload files inside the storage root.
const STAGING_PREFIX: &str = ".staging-";

/// Prefix of write-probe files inside the storage root.
const PROBE_PREFIX: &str = ".probe-";

const COPY_BUF_SIZE: usize = 64 * 1024;

/// A published upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub id: FileId,
    /// Payload length in bytes.
    pub size: u64,
    /// Absolute location: `storage-root/<id>`.
    pub path: PathBuf,
}

/// Filesystem-backed store naming each upload by its keyed hash.
///
/// The store exclusively owns the create path. Concurrent uploads never
/// conflict because every upload mixes a fresh timestamp and nonce into its
/// id; no lock is taken on the write or read path.
pub struct ContentStore {
    root: PathBuf,
    hasher: KeyedHasher,
    clock: Arc<dyn Clock>,
}

impl ContentStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Failing to create the root is fatal for the service.
    pub fn open(root: impl AsRef<Path>, hasher: KeyedHasher) -> StoreResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        info!(root = %root.display(), "content store opened");
        Ok(Self {
            root,
            hasher,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used for the id mixer.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the object with `id` lives (whether or not it exists).
    pub fn path_of(&self, id: &FileId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Check that the root accepts new files by creating and deleting one.
    pub fn probe_writable(&self) -> StoreResult<()> {
        let unavailable = |source: io::Error| StoreError::StorageUnavailable {
            path: self.root.clone(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(unavailable)?;
        let probe = self.root.join(format!("{PROBE_PREFIX}{}", Uuid::now_v7()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&probe)
            .map_err(unavailable)?;
        drop(file);
        fs::remove_file(&probe).map_err(unavailable)?;
        Ok(())
    }

    /// Start a streaming upload of a file the client called `name`.
    ///
    /// Validates the name, probes the root, and opens a staging file. Feed
    /// the payload through [`PendingUpload::write`] and publish it with
    /// [`PendingUpload::commit`]. Dropping the upload discards the staging
    /// file.
    pub fn begin(&self, peer: &str, name: &str) -> StoreResult<PendingUpload> {
        validate_file_name(name).map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        self.probe_writable()?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|source| StoreError::StorageUnavailable {
                path: self.root.clone(),
                source,
            })?;

        let mixer = format!(
            "{}/{}",
            self.clock.now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            Uuid::now_v7()
        );
        debug!(peer, name, staging = %staging.path().display(), "upload started");

        Ok(PendingUpload {
            root: self.root.clone(),
            peer: peer.to_string(),
            name: name.to_string(),
            staging,
            digest: self.hasher.start(&mixer),
        })
    }

    /// Store everything `reader` yields as one object.
    ///
    /// `declared_size` is the client's claimed length; zero is rejected
    /// before the filesystem is touched.
    pub fn store<R: Read>(
        &self,
        peer: &str,
        mut reader: R,
        name: &str,
        declared_size: u64,
    ) -> StoreResult<StoredObject> {
        validate_file_name(name).map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        if declared_size == 0 {
            return Err(StoreError::InvalidInput(format!("zero byte file uploaded: {name}")));
        }

        let mut upload = self.begin(peer, name)?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            upload.write(&buf[..n])?;
        }
        upload.commit()
    }

    /// Read a whole object.
    ///
    /// `id` comes straight from the client; anything but a well-formed
    /// hash-id is refused before any filesystem access, so staging and
    /// probe files are never readable.
    pub fn retrieve(&self, peer: &str, id: &str) -> StoreResult<Vec<u8>> {
        let id = FileId::parse(id).map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        let path = self.path_of(&id);
        match fs::read(&path) {
            Ok(bytes) => {
                info!(peer, file_id = %id, size = bytes.len(), "object retrieved");
                Ok(bytes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(peer, file_id = %id, "object not found");
                Err(StoreError::NotFound(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns `true` if an object with `id` is present.
    pub fn exists(&self, id: &FileId) -> bool {
        self.path_of(id).is_file()
    }

    /// Delete an object. Returns `true` if it existed.
    ///
    /// Idempotent: removing a missing object is not an error.
    pub fn remove(&self, id: &FileId) -> StoreResult<bool> {
        match fs::remove_file(self.path_of(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored object ids, sorted. Staging and probe files are excluded.
    pub fn list(&self) -> StoreResult<Vec<FileId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with(STAGING_PREFIX) || name.starts_with(PROBE_PREFIX) {
                continue;
            }
            if let Ok(id) = FileId::parse(&name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("root", &self.root)
            .finish()
    }
}

/// An upload being streamed into a staging file.
///
/// Owns everything it needs, so it can be handed to a blocking thread.
pub struct PendingUpload {
    root: PathBuf,
    peer: String,
    name: String,
    staging: NamedTempFile,
    digest: UploadDigest,
}

impl PendingUpload {
    /// Append a chunk of payload.
    pub fn write(&mut self, chunk: &[u8]) -> StoreResult<()> {
        self.staging.write_all(chunk)?;
        self.digest.update(chunk);
        Ok(())
    }

    /// Bytes received so far.
    pub fn len(&self) -> u64 {
        self.digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digest.is_empty()
    }

    /// Make the staged bytes durable and publish them under their id.
    ///
    /// Fails with `InvalidInput` for an empty payload and `AlreadyExists`
    /// if the id is taken; the staging file is removed in both cases.
    pub fn commit(mut self) -> StoreResult<StoredObject> {
        if self.digest.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "zero byte file uploaded: {}",
                self.name
            )));
        }
        self.staging.flush()?;
        self.staging.as_file().sync_all()?;

        let id = self.digest.finalize();
        let size = self.digest.len();
        let path = self.root.join(id.as_str());

        if let Err(e) = self.staging.persist_noclobber(&path) {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                warn!(peer = %self.peer, file_id = %id, "hash-id collision");
                return Err(StoreError::AlreadyExists(id));
            }
            return Err(e.error.into());
        }

        info!(peer = %self.peer, name = %self.name, file_id = %id, size, "object stored");
        Ok(StoredObject { id, size, path })
    }
}
