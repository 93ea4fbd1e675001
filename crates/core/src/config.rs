use std::path::{Path, PathBuf};

use lpbridge_engine::{InteriorOptions, MipOptions, SimplexOptions};
use serde::{Deserialize, Serialize};

/// Log lines buffered between the worker and an awaiting caller.
pub const DEFAULT_LOG_CHANNEL_CAPACITY: usize = 32;
/// Name of the async worker thread.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "lpbridge-worker";

/// Bridge settings and the default options for each solver.
///
/// Every field is independently defaulted, so a partial file only overrides
/// what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capacity of the per-call log channel used by async calls.
    pub log_channel_capacity: usize,
    /// Also emit every engine line as a `tracing` debug event.
    pub echo_engine_output: bool,
    /// Name of the async worker thread.
    pub worker_thread_name: String,
    /// Defaults for simplex and exact-simplex calls.
    pub simplex: SimplexOptions,
    /// Defaults for interior-point calls.
    pub interior: InteriorOptions,
    /// Defaults for branch-and-bound calls.
    pub mip: MipOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_channel_capacity: DEFAULT_LOG_CHANNEL_CAPACITY,
            echo_engine_output: false,
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
            simplex: SimplexOptions::default(),
            interior: InteriorOptions::default(),
            mip: MipOptions::default(),
        }
    }
}

impl BridgeConfig {
    fn normalize(&mut self) {
        self.log_channel_capacity = self.log_channel_capacity.max(1);
        self.worker_thread_name = self.worker_thread_name.trim().to_string();
        if self.worker_thread_name.is_empty() {
            self.worker_thread_name = DEFAULT_WORKER_THREAD_NAME.to_string();
        }
    }
}

fn xdg_config_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_CONFIG_HOME is set but empty");
        }
        return Ok(dir);
    }

    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".config"))
}

/// `$XDG_CONFIG_HOME/lpbridge/config.json`, falling back to `~/.config`.
pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_home()?.join("lpbridge").join("config.json"))
}

/// Load the config from its default location. `Ok(None)` if there is no file.
pub fn load_config() -> anyhow::Result<Option<BridgeConfig>> {
    load_config_from(&config_path()?)
}

/// Load the config from `path`. `Ok(None)` if there is no file.
pub fn load_config_from(path: &Path) -> anyhow::Result<Option<BridgeConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let mut cfg: BridgeConfig = serde_json::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("invalid config {}: {err}", path.display()))?;
    cfg.normalize();
    Ok(Some(cfg))
}

/// Save the config to its default location.
pub fn save_config(cfg: &BridgeConfig) -> anyhow::Result<()> {
    save_config_to(&config_path()?, cfg)
}

/// Save the config to `path` through a temporary file and a rename.
pub fn save_config_to(path: &Path, cfg: &BridgeConfig) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let mut cfg = cfg.clone();
    cfg.normalize();

    let json = serde_json::to_string_pretty(&cfg)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}
