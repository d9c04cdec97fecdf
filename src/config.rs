use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration: facility binary names, command timeout, and
/// the well-known directory for persisted route artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Packet-filter CLI binary (name or absolute path)
    #[serde(default = "default_nft")]
    pub nft_path: String,
    /// Routing CLI binary
    #[serde(default = "default_ip")]
    pub ip_path: String,
    /// Kernel parameter CLI binary
    #[serde(default = "default_sysctl")]
    pub sysctl_path: String,
    /// Directory for reboot-persist route artifacts
    #[serde(default = "default_route_persist_dir")]
    pub route_persist_dir: PathBuf,
    /// Bound on every facility call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nft_path: default_nft(),
            ip_path: default_ip(),
            sysctl_path: default_sysctl(),
            route_persist_dir: default_route_persist_dir(),
            command_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_nft() -> String {
    "nft".to_string()
}

fn default_ip() -> String {
    "ip".to_string()
}

fn default_sysctl() -> String {
    "sysctl".to_string()
}

fn default_route_persist_dir() -> PathBuf {
    PathBuf::from("/etc/routemgr/routes.d")
}

fn default_timeout_secs() -> u64 {
    30
}

/// Facility paths and limits resolved once at startup and injected into the
/// executor. Never re-discovered per call: runtime lookups of binary
/// locations were a recurring source of surprises in the system this
/// replaces.
///
/// Environment overrides (`ROUTEMGR_NFT_COMMAND`, `ROUTEMGR_IP_COMMAND`,
/// `ROUTEMGR_SYSCTL_COMMAND`, `ROUTEMGR_ROUTE_PERSIST_DIR`) exist for tests
/// and packagers and win over the config file.
#[derive(Debug, Clone)]
pub struct FacilityConfig {
    pub nft_program: PathBuf,
    pub ip_program: PathBuf,
    pub sysctl_program: PathBuf,
    pub route_persist_dir: PathBuf,
    pub command_timeout: Duration,
}

impl FacilityConfig {
    pub fn resolve(config: &AppConfig) -> Self {
        let env_path = |var: &str, fallback: &str| {
            std::env::var(var)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(fallback))
        };

        Self {
            nft_program: env_path("ROUTEMGR_NFT_COMMAND", &config.nft_path),
            ip_program: env_path("ROUTEMGR_IP_COMMAND", &config.ip_path),
            sysctl_program: env_path("ROUTEMGR_SYSCTL_COMMAND", &config.sysctl_path),
            route_persist_dir: std::env::var("ROUTEMGR_ROUTE_PERSIST_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| config.route_persist_dir.clone()),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

impl Default for FacilityConfig {
    fn default() -> Self {
        Self::resolve(&AppConfig::default())
    }
}

/// Saves the app config to disk using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    if let Some(mut path) = get_data_dir() {
        tokio::fs::create_dir_all(&path).await?;
        let json = serde_json::to_string_pretty(config)?;

        let mut temp_path = path.clone();
        temp_path.push("config.json.tmp");

        path.push("config.json");

        #[cfg(unix)]
        {
            use tokio::fs::OpenOptions;
            use tokio::io::AsyncWriteExt;

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600) // Set permissions BEFORE any data is written
                .open(&temp_path)
                .await?;

            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?; // Ensure data is flushed to physical media
        }

        #[cfg(not(unix))]
        {
            use tokio::io::AsyncWriteExt;

            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
        }

        // Atomic rename
        tokio::fs::rename(temp_path, path).await?;
    }
    Ok(())
}

/// Loads the app config from disk, or returns default if not found.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn load_config() -> AppConfig {
    if let Some(mut path) = get_data_dir() {
        path.push("config.json");
        if let Ok(json) = tokio::fs::read_to_string(&path).await
            && let Ok(config) = serde_json::from_str::<AppConfig>(&json)
        {
            return config;
        }
    }
    AppConfig::default()
}
