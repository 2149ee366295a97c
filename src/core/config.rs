use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Configuration for the message store.
///
/// Every field has a default so an empty TOML document yields a working
/// single-node store under `data/msgstore`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Root directory; each bucket opens its database under
    /// `<store_dir>/<bucket_index>/`.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Number of bucket shards (N). Every key routes to exactly one bucket.
    #[serde(default = "default_buckets")]
    pub buckets: usize,
    /// Number of shared staging tables (M) for scan results.
    #[serde(default = "default_staging_tables")]
    pub staging_tables: usize,
    /// Lower bound of the per-bucket randomized write-buffer size, bytes.
    #[serde(default = "default_write_buffer_size_min")]
    pub write_buffer_size_min: usize,
    /// Upper bound of the per-bucket randomized write-buffer size, bytes.
    #[serde(default = "default_write_buffer_size_max")]
    pub write_buffer_size_max: usize,
    /// Attempts to open a database whose lock is held elsewhere.
    #[serde(default = "default_open_retries")]
    pub open_retries: u32,
    /// Sleep between lock-contended open attempts, milliseconds.
    #[serde(default = "default_open_retry_delay_ms")]
    pub open_retry_delay_ms: u64,
    /// Whether index scans populate the block cache.
    #[serde(default)]
    pub fill_cache: bool,
    /// Fsync the backend WAL before acknowledging writes.
    #[serde(default)]
    pub sync_writes: bool,
    /// Backend passthrough: cap on open file descriptors per bucket.
    #[serde(default)]
    pub max_open_files: Option<i32>,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("data/msgstore")
}

fn default_buckets() -> usize {
    12
}

fn default_staging_tables() -> usize {
    10
}

fn default_write_buffer_size_min() -> usize {
    30 * MIB
}

fn default_write_buffer_size_max() -> usize {
    60 * MIB
}

fn default_open_retries() -> u32 {
    30
}

fn default_open_retry_delay_ms() -> u64 {
    2000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            buckets: default_buckets(),
            staging_tables: default_staging_tables(),
            write_buffer_size_min: default_write_buffer_size_min(),
            write_buffer_size_max: default_write_buffer_size_max(),
            open_retries: default_open_retries(),
            open_retry_delay_ms: default_open_retry_delay_ms(),
            fill_cache: false,
            sync_writes: false,
            max_open_files: None,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a path resolved via MAGNETITE_CONFIG or the
    /// conventional `config/msgstore.toml`, then apply env overrides.
    pub fn load_from_env() -> Result<Self> {
        let path = std::env::var("MAGNETITE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/msgstore.toml"));
        let mut cfg = Self::load(&path)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Read configuration from disk. The format follows the extension:
    /// `.json` parses as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read store config {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("parse JSON store config {}", path.display())),
            _ => toml::from_str(&raw)
                .with_context(|| format!("parse TOML store config {}", path.display())),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("MAGNETITE_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
    }

    /// Validate schema-level invariants before any bucket opens.
    pub fn validate(&self) -> Result<()> {
        if self.buckets == 0 {
            bail!("buckets must be > 0");
        }
        if self.staging_tables == 0 {
            bail!("staging_tables must be > 0");
        }
        if self.write_buffer_size_min == 0 {
            bail!("write_buffer_size_min must be > 0");
        }
        if self.write_buffer_size_min > self.write_buffer_size_max {
            bail!(
                "write_buffer_size_min ({}) exceeds write_buffer_size_max ({})",
                self.write_buffer_size_min,
                self.write_buffer_size_max
            );
        }
        if self.open_retries == 0 {
            bail!("open_retries must be > 0");
        }
        Ok(())
    }

    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    /// Directory owned by one bucket.
    pub fn bucket_dir(&self, index: usize) -> PathBuf {
        self.store_dir.join(index.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_complete_and_valid() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.store_dir, PathBuf::from("data/msgstore"));
        assert_eq!(cfg.buckets, 12);
        assert_eq!(cfg.staging_tables, 10);
        assert_eq!(cfg.write_buffer_size_min, 30 * MIB);
        assert_eq!(cfg.write_buffer_size_max, 60 * MIB);
        assert_eq!(cfg.open_retries, 30);
        assert_eq!(cfg.open_retry_delay_ms, 2000);
        assert!(!cfg.fill_cache);
        assert!(!cfg.sync_writes);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_overrides_defaults() {
        let cfg: StoreConfig = toml::from_str(
            r#"
store_dir = "/var/lib/broker/msgstore"
buckets = 4
staging_tables = 2
open_retries = 3
open_retry_delay_ms = 10
"#,
        )
        .unwrap();
        assert_eq!(cfg.store_dir, PathBuf::from("/var/lib/broker/msgstore"));
        assert_eq!(cfg.buckets, 4);
        assert_eq!(cfg.staging_tables, 2);
        assert_eq!(cfg.open_retries, 3);
        // untouched fields keep their defaults
        assert_eq!(cfg.write_buffer_size_max, 60 * MIB);
    }

    #[test]
    fn load_dispatches_on_extension() {
        let dir = tempdir().unwrap();
        let toml_path = dir.path().join("store.toml");
        let json_path = dir.path().join("store.json");
        let mut f = fs::File::create(&toml_path).unwrap();
        writeln!(f, "buckets = 2").unwrap();
        let mut f = fs::File::create(&json_path).unwrap();
        writeln!(f, "{{\"buckets\": 3}}").unwrap();

        assert_eq!(StoreConfig::load(&toml_path).unwrap().buckets, 2);
        assert_eq!(StoreConfig::load(&json_path).unwrap().buckets, 3);
    }

    #[test]
    fn zero_buckets_rejected() {
        let cfg: StoreConfig = toml::from_str("buckets = 0").unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:?}").contains("buckets must be > 0"));
    }

    #[test]
    fn inverted_write_buffer_range_rejected() {
        let cfg: StoreConfig = toml::from_str(
            r#"
write_buffer_size_min = 100
write_buffer_size_max = 50
"#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:?}").contains("exceeds write_buffer_size_max"));
    }

    #[test]
    fn bucket_dir_layout() {
        let cfg: StoreConfig = toml::from_str("store_dir = \"/tmp/ms\"").unwrap();
        assert_eq!(cfg.bucket_dir(7), PathBuf::from("/tmp/ms/7"));
    }
}
