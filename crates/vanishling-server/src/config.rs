use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vanishling_crypto::{HashKey, DEFAULT_HASH_KEY_HEX};
use vanishling_reaper::{CompactionPolicy, ReaperConfig};
use vanishling_store::DEFAULT_THRESHOLD_PERCENT;
use vanishling_types::{TtlPolicy, DEFAULT_MAX_TTL, DEFAULT_TTL};

use crate::error::{ServerError, ServerResult};

/// Largest accepted request body.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

/// Service configuration, loadable from TOML. Missing keys take defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VanishlingConfig {
    pub listen_addr: SocketAddr,
    pub storage_root: PathBuf,
    pub journal_root: PathBuf,
    #[serde(with = "humantime_str")]
    pub reap_interval: Duration,
    #[serde(with = "humantime_str")]
    pub default_ttl: Duration,
    #[serde(with = "humantime_str")]
    pub max_ttl: Duration,
    pub max_upload_bytes: usize,
    pub max_journal_bytes: u64,
    pub capacity_threshold_percent: u64,
    /// 64 hex characters.
    pub hash_key: String,
    pub compaction: CompactionPolicy,
}

impl Default for VanishlingConfig {
    fn default() -> Self {
        let reaper = ReaperConfig::default();
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            storage_root: PathBuf::from("/tmp/vanishling/uploads"),
            journal_root: PathBuf::from("/tmp/vanishling/log"),
            reap_interval: reaper.interval,
            default_ttl: DEFAULT_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_journal_bytes: reaper.max_journal_bytes,
            capacity_threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            hash_key: DEFAULT_HASH_KEY_HEX.to_string(),
            compaction: reaper.compaction,
        }
    }
}

impl VanishlingConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if self.reap_interval.is_zero() {
            return Err(ServerError::Config("reap_interval must be non-zero".into()));
        }
        if self.default_ttl > self.max_ttl {
            return Err(ServerError::Config(format!(
                "default_ttl ({}) exceeds max_ttl ({})",
                humantime::format_duration(self.default_ttl),
                humantime::format_duration(self.max_ttl)
            )));
        }
        if !(1..=100).contains(&self.capacity_threshold_percent) {
            return Err(ServerError::Config(format!(
                "capacity_threshold_percent must be within 1..=100, got {}",
                self.capacity_threshold_percent
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(ServerError::Config("max_upload_bytes must be non-zero".into()));
        }
        self.hash_key()?;
        Ok(())
    }

    pub fn hash_key(&self) -> ServerResult<HashKey> {
        HashKey::from_hex(&self.hash_key).map_err(|e| ServerError::Config(format!("hash_key: {e}")))
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(self.default_ttl, self.max_ttl)
    }

    /// Reaper settings, confined to `storage_root`.
    pub fn reaper_config(&self, storage_root: &Path) -> ReaperConfig {
        ReaperConfig {
            interval: self.reap_interval,
            max_journal_bytes: self.max_journal_bytes,
            compaction: self.compaction,
            storage_root: Some(storage_root.to_path_buf()),
        }
    }
}

mod humantime_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = VanishlingConfig::default();
        assert_eq!(c.listen_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(c.reap_interval, Duration::from_secs(5));
        assert_eq!(c.default_ttl, Duration::from_secs(300));
        assert_eq!(c.max_ttl, Duration::from_secs(3600));
        assert_eq!(c.max_upload_bytes, 15 * 1024 * 1024);
        assert_eq!(c.max_journal_bytes, 1 << 40);
        assert_eq!(c.capacity_threshold_percent, 90);
        assert_eq!(c.compaction, CompactionPolicy::RetainPending);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c = VanishlingConfig::from_toml(
            r#"
            listen_addr = "0.0.0.0:9000"
            default_ttl = "10m"
            max_ttl = "2h"
            compaction = "truncate"
            "#,
        )
        .unwrap();
        assert_eq!(c.listen_addr.port(), 9000);
        assert_eq!(c.default_ttl, Duration::from_secs(600));
        assert_eq!(c.max_ttl, Duration::from_secs(7200));
        assert_eq!(c.compaction, CompactionPolicy::Truncate);
        assert_eq!(c.storage_root, PathBuf::from("/tmp/vanishling/uploads"));
    }

    #[test]
    fn toml_roundtrip() {
        let c = VanishlingConfig::default();
        let text = toml::to_string(&c).unwrap();
        assert!(text.contains("reap_interval = \"5s\""));
        assert_eq!(VanishlingConfig::from_toml(&text).unwrap(), c);
    }

    #[test]
    fn rejects_bad_values() {
        for bad in [
            r#"reap_interval = "0s""#,
            r#"default_ttl = "2h""#,
            "capacity_threshold_percent = 0",
            "capacity_threshold_percent = 101",
            r#"hash_key = "abcd""#,
            r#"default_ttl = "soon""#,
            "unknown_key = 1",
        ] {
            assert!(
                matches!(VanishlingConfig::from_toml(bad), Err(ServerError::Config(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn reaper_config_is_confined() {
        let c = VanishlingConfig::default();
        let r = c.reaper_config(Path::new("/srv/uploads"));
        assert_eq!(r.storage_root.as_deref(), Some(Path::new("/srv/uploads")));
        assert_eq!(r.interval, c.reap_interval);
    }
}
