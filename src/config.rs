use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn default_log_level() -> String {
    "info".to_string()
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_seed() -> bool {
    true
}
fn default_forwarder_host() -> String {
    "127.0.0.1".to_string()
}
fn default_forwarder_port() -> u16 {
    6363
}
fn default_interest_lifetime_ms() -> u64 {
    4_000
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub torrent: TorrentConfig,
    pub face: FaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentConfig {
    /// URI of the torrent file's initial segment, e.g. `/nt/demo/torrent-file/seg=0`.
    pub name: String,
    pub seed: bool,
    /// Routable prefixes to steer interests through; the download pipeline
    /// rotates across these.
    pub routable_prefixes: Vec<String>,
    /// Optional JSON file of trust anchors; empty means anchorless.
    pub trusted_keys_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    pub forwarder_host: String,
    pub forwarder_port: u16,
    pub interest_lifetime_ms: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            seed: default_seed(),
            routable_prefixes: Vec::new(),
            trusted_keys_path: String::new(),
        }
    }
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            forwarder_host: default_forwarder_host(),
            forwarder_port: default_forwarder_port(),
            interest_lifetime_ms: default_interest_lifetime_ms(),
        }
    }
}

fn config_path() -> String {
    std::env::var("NTORRENT_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
}

impl Config {
    /// Read `config.toml` (or `$NTORRENT_CONFIG`), falling back to defaults.
    pub fn from_env() -> Self {
        let path = config_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(error) => {
                    eprintln!("ignoring malformed config '{path}': {error}");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// Write back to the same file `from_env` reads, via tmp-then-rename.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let path = config_path();
        let tmp = format!("{path}.tmp");
        tokio::fs::write(&tmp, toml::to_string_pretty(self)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

pub fn init_tracing(config: &Config) {
    // RUST_LOG overrides the configured log_level, e.g.
    // RUST_LOG=info,ntorrent::torrent=debug.
    let directives =
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}
