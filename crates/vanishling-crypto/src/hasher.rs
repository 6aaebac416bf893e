use std::fmt;
use std::io;

use vanishling_types::FileId;

/// Key material used when none is configured.
pub const DEFAULT_HASH_KEY_HEX: &str =
    "000102030405060708090A0B0C0D0E0FF0E0D0C0B0A090807060504030201000";

/// 32-byte secret key for the keyed hash.
#[derive(Clone, PartialEq, Eq)]
pub struct HashKey([u8; 32]);

impl HashKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decode a key from 64 hex characters (either case).
    pub fn from_hex(s: &str) -> Result<Self, HasherError> {
        let bytes = hex::decode(s.trim()).map_err(|e| HasherError::InvalidHex(e.to_string()))?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HasherError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Default for HashKey {
    fn default() -> Self {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate().take(16) {
            *b = i as u8;
        }
        for (i, b) in key.iter_mut().skip(16).enumerate() {
            *b = 0xf0 - (i as u8) * 0x10;
        }
        Self(key)
    }
}

// Never print key material.
impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashKey(..)")
    }
}

/// Keyed BLAKE3 hasher producing [`FileId`]s.
///
/// The digest covers `mixer ":" bytes`. Callers pass a mixer that is unique
/// per upload (a timestamp plus a nonce) which makes the id an upload-instance
/// identifier rather than a pure content hash.
#[derive(Clone, Debug)]
pub struct KeyedHasher {
    key: HashKey,
}

impl KeyedHasher {
    pub fn new(key: HashKey) -> Self {
        Self { key }
    }

    /// Begin a streaming digest seeded with `mixer`.
    pub fn start(&self, mixer: &str) -> UploadDigest {
        let mut inner = blake3::Hasher::new_keyed(self.key.as_bytes());
        inner.update(mixer.as_bytes());
        inner.update(b":");
        UploadDigest { inner, len: 0 }
    }

    /// One-shot digest of an in-memory buffer.
    pub fn hash(&self, mixer: &str, data: &[u8]) -> FileId {
        let mut digest = self.start(mixer);
        digest.update(data);
        digest.finalize()
    }
}

impl Default for KeyedHasher {
    fn default() -> Self {
        Self::new(HashKey::default())
    }
}

/// In-progress digest of one upload. Holds only the hash state.
pub struct UploadDigest {
    inner: blake3::Hasher,
    len: u64,
}

impl UploadDigest {
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Payload bytes hashed so far (the mixer is not counted).
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(&self) -> FileId {
        FileId::from_digest(*self.inner.finalize().as_bytes())
    }
}

impl io::Write for UploadDigest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Errors from key handling.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("invalid hex key: {0}")]
    InvalidHex(String),

    #[error("hash key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_key_matches_default_hex() {
        assert_eq!(HashKey::default(), HashKey::from_hex(DEFAULT_HASH_KEY_HEX).unwrap());
    }

    #[test]
    fn key_length_is_checked() {
        assert_eq!(HashKey::from_hex("0011"), Err(HasherError::InvalidKeyLength(2)));
        assert!(matches!(HashKey::from_hex("zz"), Err(HasherError::InvalidHex(_))));
    }

    #[test]
    fn same_mixer_same_bytes_same_id() {
        let h = KeyedHasher::default();
        assert_eq!(h.hash("t1", b"hello"), h.hash("t1", b"hello"));
    }

    #[test]
    fn mixer_changes_the_id() {
        let h = KeyedHasher::default();
        assert_ne!(h.hash("t1", b"hello"), h.hash("t2", b"hello"));
    }

    #[test]
    fn key_changes_the_id() {
        let a = KeyedHasher::new(HashKey::new([1; 32]));
        let b = KeyedHasher::new(HashKey::new([2; 32]));
        assert_ne!(a.hash("t", b"data"), b.hash("t", b"data"));
    }

    #[test]
    fn streaming_equals_one_shot() {
        let h = KeyedHasher::default();
        let mut digest = h.start("mix");
        digest.write_all(b"hel").unwrap();
        digest.write_all(b"lo").unwrap();
        assert_eq!(digest.len(), 5);
        assert_eq!(digest.finalize(), h.hash("mix", b"hello"));
    }

    #[test]
    fn debug_hides_key() {
        assert_eq!(format!("{:?}", HashKey::new([7; 32])), "HashKey(..)");
    }
}
