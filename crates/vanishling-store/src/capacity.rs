//! Disk capacity admission control.
//!
//! The upload path asks [`CapacityGuard::admit`] before reading a request
//! body. Sampling goes through the [`SpaceProbe`] seam: `statvfs` in
//! production, fixed numbers in tests.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Uploads are refused once utilization passes this percentage.
pub const DEFAULT_THRESHOLD_PERCENT: u64 = 90;

/// Space figures for one filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskSpace {
    /// Total size of the filesystem in bytes.
    pub total_bytes: u64,
    /// Space available to unprivileged users, in bytes.
    pub available_bytes: u64,
    /// `total - available`.
    pub used_bytes: u64,
}

impl DiskSpace {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            total_bytes,
            available_bytes,
            used_bytes: total_bytes.saturating_sub(available_bytes),
        }
    }

    /// Whole-percent utilization (rounded down).
    pub fn usage_percent(&self) -> u64 {
        if self.total_bytes == 0 {
            return 0;
        }
        ((self.used_bytes as u128 * 100) / self.total_bytes as u128) as u64
    }

    /// Returns `true` when utilization is strictly above `threshold_percent`.
    pub fn exceeds(&self, threshold_percent: u64) -> bool {
        self.used_bytes as u128 * 100 > threshold_percent as u128 * self.total_bytes as u128
    }
}

/// Samples filesystem space for a path.
pub trait SpaceProbe: Send + Sync {
    fn sample(&self, path: &Path) -> std::io::Result<DiskSpace>;
}

/// [`SpaceProbe`] backed by `statvfs(3)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    #[cfg(target_family = "unix")]
    fn sample(&self, path: &Path) -> std::io::Result<DiskSpace> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: statvfs is a plain C struct of integers; all-zero is valid.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }

        #[allow(clippy::unnecessary_cast)]
        let (blocks, avail, frsize) = (stat.f_blocks as u64, stat.f_bavail as u64, stat.f_frsize as u64);
        Ok(DiskSpace::new(blocks.saturating_mul(frsize), avail.saturating_mul(frsize)))
    }

    #[cfg(not(target_family = "unix"))]
    fn sample(&self, _path: &Path) -> std::io::Result<DiskSpace> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "disk space sampling is only supported on unix",
        ))
    }
}

/// Admission control for uploads based on filesystem utilization.
pub struct CapacityGuard {
    path: PathBuf,
    threshold_percent: u64,
    probe: Box<dyn SpaceProbe>,
}

impl CapacityGuard {
    /// Guard the filesystem holding `path` with the `statvfs` probe.
    pub fn new(path: impl Into<PathBuf>, threshold_percent: u64) -> Self {
        Self::with_probe(path, threshold_percent, StatvfsProbe)
    }

    pub fn with_probe(
        path: impl Into<PathBuf>,
        threshold_percent: u64,
        probe: impl SpaceProbe + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            threshold_percent,
            probe: Box::new(probe),
        }
    }

    pub fn threshold_percent(&self) -> u64 {
        self.threshold_percent
    }

    /// Current space figures, or `None` if sampling failed.
    pub fn sample(&self) -> Option<DiskSpace> {
        match self.probe.sample(&self.path) {
            Ok(space) => Some(space),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "disk space sampling failed");
                None
            }
        }
    }

    /// Returns `true` when utilization exceeds the threshold.
    ///
    /// A failed sample counts as not full; the store's write probe still
    /// catches a filesystem that cannot take data.
    pub fn is_full(&self) -> bool {
        self.sample()
            .map(|space| space.exceeds(self.threshold_percent))
            .unwrap_or(false)
    }

    /// `Ok(())` if an upload may proceed, `ResourceExhausted` otherwise.
    pub fn admit(&self) -> StoreResult<()> {
        let Some(space) = self.sample() else {
            return Ok(());
        };
        if space.exceeds(self.threshold_percent) {
            debug!(
                usage_percent = space.usage_percent(),
                threshold = self.threshold_percent,
                "disk almost full; refusing upload"
            );
            return Err(StoreError::ResourceExhausted {
                usage_percent: space.usage_percent(),
                threshold_percent: self.threshold_percent,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for CapacityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityGuard")
            .field("path", &self.path)
            .field("threshold_percent", &self.threshold_percent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64, u64);

    impl SpaceProbe for Fixed {
        fn sample(&self, _path: &Path) -> std::io::Result<DiskSpace> {
            Ok(DiskSpace::new(self.0, self.1))
        }
    }

    struct Broken;

    impl SpaceProbe for Broken {
        fn sample(&self, _path: &Path) -> std::io::Result<DiskSpace> {
            Err(std::io::Error::other("no statfs for you"))
        }
    }

    #[test]
    fn usage_percent_math() {
        assert_eq!(DiskSpace::new(100, 50).usage_percent(), 50);
        assert_eq!(DiskSpace::new(100, 0).usage_percent(), 100);
        assert_eq!(DiskSpace::new(0, 0).usage_percent(), 0);
        assert_eq!(DiskSpace::new(100, 200).usage_percent(), 0);
        assert_eq!(DiskSpace::new(1_000_000_000_000, 250_000_000_000).usage_percent(), 75);
    }

    #[test]
    fn threshold_is_strict() {
        assert!(!DiskSpace::new(100, 10).exceeds(90));
        assert!(DiskSpace::new(1000, 99).exceeds(90));
    }

    #[test]
    fn guard_below_threshold_admits() {
        let guard = CapacityGuard::with_probe("/", 90, Fixed(100, 50));
        assert!(!guard.is_full());
        assert!(guard.admit().is_ok());
    }

    #[test]
    fn guard_above_threshold_refuses() {
        let guard = CapacityGuard::with_probe("/", 90, Fixed(100, 5));
        assert!(guard.is_full());
        let err = guard.admit().unwrap_err();
        assert!(matches!(
            err,
            StoreError::ResourceExhausted { usage_percent: 95, threshold_percent: 90 }
        ));
    }

    #[test]
    fn failed_sample_admits() {
        let guard = CapacityGuard::with_probe("/", 90, Broken);
        assert!(!guard.is_full());
        assert!(guard.admit().is_ok());
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn statvfs_reads_a_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let space = StatvfsProbe.sample(dir.path()).unwrap();
        assert!(space.total_bytes > 0);
        assert!(space.used_bytes <= space.total_bytes);
    }
}
