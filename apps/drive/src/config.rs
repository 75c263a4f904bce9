use analysis::TrackerConfig;
use anyhow::{Context, Result};
use geo_ingest_core::WatchOptions;
use geo_ingest_udp::UdpConfig;
use ledger_client::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub server: ServerConfig,
    pub watch: WatchOptions,
    pub udp: UdpConfig,
    pub tracker: TrackerConfig,
}

impl DriveConfig {
    /// `<config_dir>/speedtrap/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|d| d.join("speedtrap").join("config.json"))
    }

    /// Reads `explicit` if given (must exist), otherwise the default location
    /// if present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => {
                    debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let text = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut cfg: Self = serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        // udp keeps its own copy so the source can run standalone
        cfg.udp.watch = cfg.watch.clone();
        info!("config loaded from {}", path.display());
        Ok(cfg)
    }
}
