use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use lpbridge_bridge::ExecMode;
use lpbridge_engine::MsgLevel;

fn parse_node_limit(input: &str) -> Result<u64, String> {
    let s = input.trim().replace('_', "");
    if s.is_empty() {
        return Err("node limit must not be empty".to_string());
    }
    let value: u64 = s
        .parse()
        .map_err(|_| format!("invalid node limit: {input:?}"))?;
    if value == 0 {
        return Err("node limit must be >= 1".to_string());
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SolveMethod {
    /// Primal simplex (default).
    Simplex,
    /// Simplex followed by exact vertex refinement.
    Exact,
    /// Interior point.
    Interior,
    /// Branch and bound over the integer columns.
    Mip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageLevel {
    Off,
    Err,
    On,
    All,
}

impl From<MessageLevel> for MsgLevel {
    fn from(level: MessageLevel) -> Self {
        match level {
            MessageLevel::Off => MsgLevel::Off,
            MessageLevel::Err => MsgLevel::Err,
            MessageLevel::On => MsgLevel::On,
            MessageLevel::All => MsgLevel::All,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "lpbridge", version, about = "Solve an LP or MIP model through the engine bridge")]
pub struct Cli {
    /// Model file in CPLEX LP format.
    #[arg(env = "LPBRIDGE_MODEL")]
    pub model: PathBuf,

    #[arg(long, env = "LPBRIDGE_METHOD", value_enum, default_value_t = SolveMethod::Simplex)]
    pub method: SolveMethod,

    /// Run every call on the caller's thread instead of the bridge worker.
    #[arg(long, env = "LPBRIDGE_SYNC", default_value_t = false)]
    pub sync: bool,

    /// Engine terminal verbosity; overrides the config file.
    #[arg(long, env = "LPBRIDGE_MSG_LEVEL", value_enum)]
    pub msg_level: Option<MessageLevel>,

    /// Enable the presolver.
    #[arg(long, env = "LPBRIDGE_PRESOLVE", default_value_t = false)]
    pub presolve: bool,

    /// Stop branch and bound after this many nodes (e.g. `10_000`).
    #[arg(long, env = "LPBRIDGE_NODE_LIMIT", value_parser = parse_node_limit)]
    pub node_limit: Option<u64>,

    /// Config file; defaults to `$XDG_CONFIG_HOME/lpbridge/config.json`.
    #[arg(long, env = "LPBRIDGE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the effective config back to the config file.
    #[arg(long, default_value_t = false)]
    pub save_config: bool,

    /// Print the final report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(long, env = "LPBRIDGE_NO_PROGRESS", default_value_t = false)]
    pub no_progress: bool,

    /// Also emit engine output as debug events (`RUST_LOG=lpbridge::engine=debug`).
    #[arg(long, default_value_t = false)]
    pub echo: bool,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn exec_mode(&self) -> ExecMode {
        if self.sync {
            ExecMode::Sync
        } else {
            ExecMode::Async
        }
    }
}
