//! Database open options.
//!
//! Env-driven, read once at open time rather than polled per operation.
//! Narrowed to the knobs named in spec.md §6: `cache_size`, `sync_mode`,
//! `checkpoint_threshold`, `checkpoint_timeout`, `read_only`.

use std::time::Duration;

/// WAL commit durability mode (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync on every commit.
    Full,
    /// fdatasync on every commit.
    Normal,
    /// Batched; caller accepts loss of the last batch on crash.
    Deferred,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Full
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: u32,
    pub cache_size_pages: usize,
    pub sync_mode: SyncMode,
    pub checkpoint_threshold_bytes: u64,
    pub checkpoint_timeout: Duration,
    pub read_only: bool,
    /// Internal group-commit coalescing window for `SyncMode::Deferred`.
    pub wal_coalesce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 4096,
            cache_size_pages: 2000,
            sync_mode: SyncMode::Full,
            checkpoint_threshold_bytes: 4 * 1024 * 1024,
            checkpoint_timeout: Duration::from_secs(30),
            read_only: false,
            wal_coalesce: Duration::from_millis(0),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Read overrides from environment variables, falling back to defaults.
    /// Unrecognized or malformed values are ignored (best-effort).
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("DECENTDB_PAGE_SIZE") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.page_size = n;
            }
        }
        if let Ok(v) = std::env::var("DECENTDB_CACHE_SIZE") {
            if let Some(n) = parse_cache_size(&v, cfg.page_size) {
                cfg.cache_size_pages = n;
            }
        }
        if let Ok(v) = std::env::var("DECENTDB_SYNC_MODE") {
            match v.trim().to_ascii_uppercase().as_str() {
                "FULL" => cfg.sync_mode = SyncMode::Full,
                "NORMAL" => cfg.sync_mode = SyncMode::Normal,
                "DEFERRED" => cfg.sync_mode = SyncMode::Deferred,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("DECENTDB_CHECKPOINT_THRESHOLD") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.checkpoint_threshold_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("DECENTDB_CHECKPOINT_TIMEOUT_SECS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.checkpoint_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("DECENTDB_READ_ONLY") {
            let s = v.trim().to_ascii_lowercase();
            cfg.read_only = s == "1" || s == "true" || s == "yes" || s == "on";
        }
        cfg
    }
}

/// Parses `"NNN"` (page count) or `"NNMB"` (megabytes) as in spec.md §6.
fn parse_cache_size(raw: &str, page_size: u32) -> Option<usize> {
    let s = raw.trim();
    if let Some(num) = s.strip_suffix("MB").or_else(|| s.strip_suffix("mb")) {
        let mb: u64 = num.trim().parse().ok()?;
        let bytes = mb.saturating_mul(1024 * 1024);
        Some((bytes / page_size.max(1) as u64).max(1) as usize)
    } else {
        s.parse::<usize>().ok()
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    cfg: Config,
}

impl ConfigBuilder {
    pub fn page_size(mut self, n: u32) -> Self {
        self.cfg.page_size = n;
        self
    }
    pub fn cache_size_pages(mut self, n: usize) -> Self {
        self.cfg.cache_size_pages = n;
        self
    }
    pub fn sync_mode(mut self, m: SyncMode) -> Self {
        self.cfg.sync_mode = m;
        self
    }
    pub fn checkpoint_threshold_bytes(mut self, n: u64) -> Self {
        self.cfg.checkpoint_threshold_bytes = n;
        self
    }
    pub fn checkpoint_timeout(mut self, d: Duration) -> Self {
        self.cfg.checkpoint_timeout = d;
        self
    }
    pub fn read_only(mut self, v: bool) -> Self {
        self.cfg.read_only = v;
        self
    }
    pub fn build(self) -> Config {
        self.cfg
    }
}
