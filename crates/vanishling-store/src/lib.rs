//! Content-addressed upload storage for vanishling.
//!
//! Every accepted upload is stored as one immutable file named by its
//! [`FileId`](vanishling_types::FileId) directly under the storage root.
//!
//! # Design Rules
//!
//! 1. Bytes are staged in a temporary file inside the root and published
//!    under their id with create-exclusive semantics. A partially written
//!    upload is never visible under an id.
//! 2. Ids are hashed while streaming; the payload is never held in memory.
//! 3. Client-supplied names and ids are validated before any filesystem
//!    access.
//! 4. The store only creates objects. Deleting them is the reaper's job
//!    ([`ContentStore::remove`] exists for it and for manual cleanup).
//! 5. There is no in-memory index; the filesystem is the source of truth.

pub mod capacity;
pub mod error;
pub mod store;

pub use capacity::{CapacityGuard, DiskSpace, SpaceProbe, StatvfsProbe, DEFAULT_THRESHOLD_PERCENT};
pub use error::{StoreError, StoreResult};
pub use store::{ContentStore, PendingUpload, StoredObject};
