//! Cryptographic primitives for vanishling.
//!
//! Provides the keyed BLAKE3 hasher that names stored uploads. Every id is
//! derived from a secret key, a per-upload mixer string, and the uploaded
//! bytes, so identical content uploaded twice never shares an id.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::{HashKey, HasherError, KeyedHasher, UploadDigest, DEFAULT_HASH_KEY_HEX};
