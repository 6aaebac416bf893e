use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length of a [`FileId`] in hex characters.
pub const FILE_ID_HEX_LEN: usize = 64;

/// Returns `true` if `s` can be joined onto a directory without escaping it.
///
/// Rejects the empty string, parent references (`..`), path separators
/// (`/` and `\`) and NUL bytes.
pub fn is_path_safe(s: &str) -> bool {
    !s.is_empty() && !s.contains("..") && !s.contains('/') && !s.contains('\\') && !s.contains('\0')
}

/// Validate a client-declared upload file name.
///
/// The name is only used for audit logging, but a name that could address
/// another file is refused outright.
pub fn validate_file_name(name: &str) -> Result<(), TypeError> {
    if is_path_safe(name) {
        Ok(())
    } else {
        Err(TypeError::UnsafePath(name.to_string()))
    }
}

/// Identifier of a stored object: the hex-encoded keyed hash of the upload.
///
/// The id doubles as the object's file name under the storage root, so a
/// parsed id is always exactly 64 lowercase hex characters. Anything else
/// in the root (staging and probe files) can never be named by a client.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Create a `FileId` from a 32-byte digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Parse a client-supplied id.
    ///
    /// Traversal attempts are reported as `UnsafePath`; any other string
    /// that is not a lowercase 64-char hex digest is `InvalidLength` or
    /// `InvalidHex`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if !is_path_safe(s) {
            return Err(TypeError::UnsafePath(s.to_string()));
        }
        if s.len() != FILE_ID_HEX_LEN {
            return Err(TypeError::InvalidLength {
                expected: FILE_ID_HEX_LEN,
                actual: s.len(),
            });
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(TypeError::InvalidHex(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The id as a string slice (also the on-disk file name).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation (first 8 characters).
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.short())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn digest_is_64_hex_chars() {
        let id = FileId::from_digest([0xab; 32]);
        assert_eq!(id.as_str().len(), 64);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parse_accepts_digests() {
        let hex = "ab".repeat(32);
        let id = FileId::parse(&hex).unwrap();
        assert_eq!(id, FileId::from_digest([0xab; 32]));
    }

    #[test]
    fn parse_rejects_non_digests() {
        assert_eq!(
            FileId::parse("deadbeef"),
            Err(TypeError::InvalidLength { expected: 64, actual: 8 })
        );
        let upper = "AB".repeat(32);
        assert_eq!(FileId::parse(&upper), Err(TypeError::InvalidHex(upper.clone())));
        let staging = format!(".staging-{}", "a".repeat(55));
        assert_eq!(staging.len(), 64);
        assert!(matches!(FileId::parse(&staging), Err(TypeError::InvalidHex(_))));
    }

    #[test]
    fn parse_rejects_traversal() {
        for bad in ["", "..", "../etc/passwd", "a/b", "a\\b", "x..y", "nul\0"] {
            assert!(FileId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn file_name_validation() {
        assert!(validate_file_name("a.txt").is_ok());
        assert!(validate_file_name(".hidden").is_ok());
        assert_eq!(
            validate_file_name("../a.txt"),
            Err(TypeError::UnsafePath("../a.txt".into()))
        );
        assert!(validate_file_name("").is_err());
    }

    #[test]
    fn short_is_prefix() {
        let id = FileId::from_digest([1; 32]);
        assert_eq!(id.short(), "01010101");
    }

    #[test]
    fn serde_rejects_unsafe_ids() {
        let hex = "0f".repeat(32);
        let ok: FileId = serde_json::from_str(&format!("\"{hex}\"")).unwrap();
        assert_eq!(ok.as_str(), hex);
        assert!(serde_json::from_str::<FileId>("\"../x\"").is_err());
        assert!(serde_json::from_str::<FileId>("\"abc123\"").is_err());
    }

    proptest! {
        #[test]
        fn anything_with_a_separator_is_unsafe(prefix in ".*", suffix in ".*") {
            let slash = format!("{prefix}/{suffix}");
            let dots = format!("{prefix}..{suffix}");
            prop_assert!(!is_path_safe(&slash));
            prop_assert!(!is_path_safe(&dots));
        }

        #[test]
        fn digests_parse_back(bytes in proptest::array::uniform32(any::<u8>())) {
            let id = FileId::from_digest(bytes);
            prop_assert!(is_path_safe(id.as_str()));
            prop_assert_eq!(FileId::parse(id.as_str()), Ok(id));
        }
    }
}
