use std::sync::OnceLock;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

mod log_config;
pub use log_config::LogConfig;

pub static CONFIG: OnceLock<CmConfig> = OnceLock::new();

/// Loads the CM's own configuration snapshot and installs it as the process-wide
/// default used by [`crate::manager::Manager::init_global`].
///
/// Merges `config.toml` (or the file named by `CM_CONFIG`) with `CM_`-prefixed
/// environment variables. Exits the process with a message on malformed input,
/// matching this codebase's existing config loader.
pub fn init() {
    let config = match load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "It looks like your config is invalid. The following error occurred: {e}"
            );
            std::process::exit(1);
        }
    };
    CONFIG.set(config).expect("config should be set");
}

/// Like [`init`] but returns the error instead of exiting, for callers that
/// want to decide how to handle a bad config (e.g. tests, embedding binaries).
pub fn load() -> Result<CmConfig, figment::Error> {
    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("CM_CONFIG").as_deref().unwrap_or("config.toml"),
        ))
        .merge(Env::prefixed("CM_").global());

    let config = raw_config.extract::<CmConfig>()?;
    if !config.n_shards.is_power_of_two() {
        return Err(figment::Error::from(format!(
            "nShards must be a power of two, got {}",
            config.n_shards
        )));
    }
    Ok(config)
}

pub fn get() -> &'static CmConfig {
    CONFIG.get().expect("config should be set")
}

/// Read-only configuration snapshot for the Connection Manager.
///
/// Bound once at startup (or built directly with [`CmConfig::default`] in
/// tests) and never mutated afterward — every background task reads its own
/// `Arc<CmConfig>` clone.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CmConfig {
    /// Registry backend selector. Only `"memory"` exists today.
    pub registry: String,
    /// Number of registry shards. Must be a power of two.
    pub n_shards: usize,
    /// Initial capacity reserved per shard.
    pub init_shard_size: usize,
    pub websocket: WebsocketConfig,
    pub http: HttpConfig,
    pub log: LogConfig,
}

impl Default for CmConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            n_shards: default_n_shards(),
            init_shard_size: default_init_shard_size(),
            websocket: WebsocketConfig::default(),
            http: HttpConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct WebsocketConfig {
    /// Capacity of each Connection's bounded send queue.
    pub request_queue_size: usize,
    pub timeouts: WebsocketTimeouts,
    pub buffer_sizes: BufferSizes,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            request_queue_size: default_request_queue_size(),
            timeouts: WebsocketTimeouts::default(),
            buffer_sizes: BufferSizes::default(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct WebsocketTimeouts {
    #[serde(with = "duration_ms")]
    pub write: Duration,
    #[serde(with = "duration_ms")]
    pub read: Duration,
    #[serde(with = "duration_ms")]
    pub request: Duration,
    #[serde(with = "duration_ms")]
    pub response: Duration,
}

impl Default for WebsocketTimeouts {
    fn default() -> Self {
        Self {
            write: Duration::from_secs(5),
            read: Duration::from_secs(60),
            request: Duration::from_secs(10),
            response: Duration::from_secs(5),
        }
    }
}

/// Transport-level buffer size hints, passed through to whatever real
/// websocket/QUIC library backs the [`Transport`](crate::transport::Transport)
/// implementation. The CM itself never allocates these buffers.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BufferSizes {
    pub read: usize,
    pub write: usize,
}

impl Default for BufferSizes {
    fn default() -> Self {
        Self {
            read: 64 * 1024,
            write: 64 * 1024,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HttpConfig {
    pub timeouts: HttpTimeouts,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeouts: HttpTimeouts::default(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HttpTimeouts {
    /// Lifetime of a oneshot (long-polling) connection before it is force-closed.
    #[serde(with = "duration_ms")]
    pub long_polling: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            long_polling: Duration::from_secs(30),
        }
    }
}

fn default_registry() -> String {
    "memory".into()
}

fn default_n_shards() -> usize {
    16
}

fn default_init_shard_size() -> usize {
    64
}

fn default_request_queue_size() -> usize {
    256
}

/// (De)serializes a [`Duration`] as a plain number of milliseconds, since CM
/// config values are always short, sub-minute timeouts.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        d: &Duration,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = CmConfig::default();
        assert!(cfg.n_shards.is_power_of_two());
        assert!(cfg.websocket.request_queue_size > 0);
    }
}
