//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sandcell_common::StackPolicy;

/// Bytes of record store capacity granted per megabyte of memory budget.
pub const BYTES_PER_MEMORY_MB: u64 = 150 * 1024;

/// Configuration for a [`SandboxServer`](crate::SandboxServer).
///
/// # Example
///
/// ```
/// use sandcell_server::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_socket_path("/tmp/test.sock")
///     .with_memory_limit_mb(10);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.store_capacity_bytes(), 10 * 150 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Path of the Unix socket the server listens on
    pub socket_path: PathBuf,
    /// Path of the record store the server writes into
    pub mmap_path: PathBuf,
    /// Prefix of the per-client record stores; the client id is appended
    pub share_prefix: String,
    /// Memory budget, in megabytes, the store capacity is derived from
    pub memory_limit_mb: u64,
    /// Number of record slots in the store
    pub max_entries: u32,
    /// Pause before the listener is bound again after a failure
    pub restart_delay: Duration,
    /// `Redact` strips stack frames from every error record
    pub stack_policy: StackPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/sandcell.sock"),
            mmap_path: PathBuf::from("/tmp/sandcell-share"),
            share_prefix: "/tmp/sandcell-share-".to_string(),
            memory_limit_mb: 55,
            max_entries: 1024,
            restart_delay: Duration::from_millis(500),
            stack_policy: StackPolicy::Preserve,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_mmap_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mmap_path = path.into();
        self
    }

    pub fn with_share_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.share_prefix = prefix.into();
        self
    }

    pub fn with_memory_limit_mb(mut self, megabytes: u64) -> Self {
        self.memory_limit_mb = megabytes;
        self
    }

    pub fn with_max_entries(mut self, max_entries: u32) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_stack_policy(mut self, policy: StackPolicy) -> Self {
        self.stack_policy = policy;
        self
    }

    /// Size of the store's data area.
    pub fn store_capacity_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(BYTES_PER_MEMORY_MB)
    }

    /// Path of the store owned by `client_id`.
    pub fn reader_path(&self, client_id: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.share_prefix, client_id))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The memory limit or entry count is zero
    /// - The memory limit exceeds 64 GiB
    /// - A path or the share prefix is empty
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_limit_mb == 0 {
            return Err("memory limit must be greater than zero".to_string());
        }

        if self.memory_limit_mb > 64 * 1024 {
            return Err(format!(
                "memory limit must be <= 65536 MB (got {} MB)",
                self.memory_limit_mb
            ));
        }

        if self.max_entries == 0 {
            return Err("max entries must be greater than zero".to_string());
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err("socket path must not be empty".to_string());
        }

        if self.mmap_path.as_os_str().is_empty() {
            return Err("mmap path must not be empty".to_string());
        }

        if self.share_prefix.is_empty() {
            return Err("share prefix must not be empty".to_string());
        }

        Ok(())
    }
}
