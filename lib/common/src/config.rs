//! The configuration of a Koral cluster member.
//!
//! The configuration is read from a TOML file. Every key is optional; missing keys fall back to
//! the defaults of [KoralConfig::default]. Master and slaves are expected to share the same
//! file except for `current_id`.

use crate::ConfigError;
use koral_model::{ComputerId, MASTER_ID};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The port that is used if an address does not specify one.
pub const DEFAULT_PORT: u16 = 4710;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KoralConfig {
    /// The address of the master, e.g., `192.168.0.1:4710`.
    pub master: String,
    /// The addresses of the slaves. The n-th entry is the slave with the id n.
    pub slaves: Vec<String>,
    /// The id of this cluster member. If not set, the id is determined by comparing the
    /// configured addresses with the local addresses.
    pub current_id: Option<ComputerId>,
    /// Directory for intermediate data, e.g., spilled join caches.
    pub tmp_dir: PathBuf,
    /// The default log filter if `RUST_LOG` is not set.
    pub log_level: String,
    /// The number of mapping buffers each worker thread keeps for reuse.
    pub size_of_mapping_recycle_cache: usize,
    /// How much the loads of neighbouring worker threads may differ before tasks are moved.
    pub unbalance_threshold_for_worker_threads: f64,
    /// The number of mappings that are bundled into one message.
    pub mapping_bundle_size: usize,
    /// The number of mappings each input queue keeps in memory before spilling to disk.
    pub receiver_queue_size: usize,
    /// The maximum number of mappings an operator emits in one step.
    pub max_emitted_mappings_per_round: usize,
    /// The number of hash buckets of each join cache.
    pub number_of_hash_buckets: usize,
    /// The number of mappings each join cache keeps in memory before spilling to disk.
    pub max_in_memory_mappings: usize,
    /// The number of worker threads. Defaults to the number of CPUs minus one.
    pub number_of_worker_threads: Option<usize>,
    /// How long a send may block before it is reported as failed.
    pub send_timeout_ms: u64,
    /// How often a failed mapping batch is resent before the sending task fails.
    pub mapping_send_retries: usize,
    /// The interval of keep-alive messages to clients.
    pub client_keep_alive_interval_ms: u64,
}

impl Default for KoralConfig {
    fn default() -> Self {
        Self {
            master: format!("127.0.0.1:{DEFAULT_PORT}"),
            slaves: Vec::new(),
            current_id: None,
            tmp_dir: std::env::temp_dir(),
            log_level: "info".to_owned(),
            size_of_mapping_recycle_cache: 100_000,
            unbalance_threshold_for_worker_threads: 0.1,
            mapping_bundle_size: 100,
            receiver_queue_size: 1000,
            max_emitted_mappings_per_round: 100,
            number_of_hash_buckets: 16,
            max_in_memory_mappings: 100_000,
            number_of_worker_threads: None,
            send_timeout_ms: 100,
            mapping_send_retries: 10,
            client_keep_alive_interval_ms: 3000,
        }
    }
}

impl KoralConfig {
    /// Loads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks value ranges and that all addresses can be parsed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mapping_bundle_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "mapping_bundle_size",
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.max_emitted_mappings_per_round == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_emitted_mappings_per_round",
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.number_of_hash_buckets == 0 {
            return Err(ConfigError::InvalidValue {
                key: "number_of_hash_buckets",
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.unbalance_threshold_for_worker_threads.is_nan()
            || self.unbalance_threshold_for_worker_threads < 0.0
        {
            return Err(ConfigError::InvalidValue {
                key: "unbalance_threshold_for_worker_threads",
                reason: "must not be negative".to_owned(),
            });
        }
        if self.slaves.len() >= usize::from(u16::MAX) {
            return Err(ConfigError::InvalidValue {
                key: "slaves",
                reason: "too many slaves".to_owned(),
            });
        }
        if let Some(current_id) = self.current_id {
            if usize::from(current_id) > self.slaves.len() {
                return Err(ConfigError::UnknownCurrentComputer(current_id));
            }
        }
        self.cluster_addresses()?;
        Ok(())
    }

    pub fn number_of_slaves(&self) -> u16 {
        u16::try_from(self.slaves.len()).unwrap_or(u16::MAX)
    }

    pub fn number_of_worker_threads(&self) -> usize {
        self.number_of_worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|cpus| cpus.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        })
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn client_keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.client_keep_alive_interval_ms)
    }

    /// Resolves the addresses of all cluster members.
    pub fn cluster_addresses(&self) -> Result<ClusterAddresses, ConfigError> {
        let mut members = Vec::with_capacity(self.slaves.len() + 1);
        members.push(resolve_address(&self.master)?);
        for slave in &self.slaves {
            members.push(resolve_address(slave)?);
        }
        Ok(ClusterAddresses { members })
    }

    /// Returns the id of this cluster member.
    ///
    /// If `current_id` is not configured, the member whose address is bound to a local
    /// interface is chosen. This fails if none or more than one member is local.
    pub fn current_id(&self) -> Result<ComputerId, ConfigError> {
        if let Some(current_id) = self.current_id {
            return Ok(current_id);
        }
        let addresses = self.cluster_addresses()?;
        let mut local = addresses
            .iter()
            .filter(|(_, address)| std::net::TcpListener::bind((address.ip(), 0)).is_ok());
        match (local.next(), local.next()) {
            (Some((id, _)), None) => Ok(id),
            _ => Err(ConfigError::MissingCurrentComputer),
        }
    }
}

/// The resolved addresses of all cluster members. The index is the [ComputerId].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAddresses {
    members: Vec<SocketAddr>,
}

impl ClusterAddresses {
    /// Creates a new [ClusterAddresses] with the master at index 0.
    pub fn new(members: Vec<SocketAddr>) -> Self {
        Self { members }
    }

    pub fn master(&self) -> SocketAddr {
        self.members[usize::from(MASTER_ID)]
    }

    pub fn member(&self, id: ComputerId) -> Option<SocketAddr> {
        self.members.get(usize::from(id)).copied()
    }

    pub fn number_of_slaves(&self) -> u16 {
        u16::try_from(self.members.len().saturating_sub(1)).unwrap_or(u16::MAX)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComputerId, SocketAddr)> + '_ {
        (0..).zip(self.members.iter().copied())
    }
}

fn resolve_address(address: &str) -> Result<SocketAddr, ConfigError> {
    let with_port = if address.contains(':') {
        address.to_owned()
    } else {
        format!("{address}:{DEFAULT_PORT}")
    };
    with_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addresses| addresses.next())
        .ok_or_else(|| ConfigError::InvalidAddress(address.to_owned()))
}
