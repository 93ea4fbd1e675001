//! Configuration shared by the bridge and the command-line tool.

pub mod config;

pub use config::{
    config_path, load_config, load_config_from, save_config, save_config_to, BridgeConfig,
    DEFAULT_LOG_CHANNEL_CAPACITY, DEFAULT_WORKER_THREAD_NAME,
};
