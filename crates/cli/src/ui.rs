use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use lpbridge_engine::NodeInfo;

use crate::constants::SPINNER_TICK;
use crate::format::format_node_line;

/// Where output goes: a spinner line with log lines printed above it, or
/// plain stdout.
#[derive(Clone)]
pub(crate) struct Ui {
    bar: Option<ProgressBar>,
}

impl Ui {
    pub(crate) fn plain() -> Self {
        Self { bar: None }
    }

    pub(crate) fn with_spinner() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_draw_target(ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::with_template("{spinner} {elapsed} {msg}\u{1b}[0K") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(SPINNER_TICK);
        bar.set_message("starting");
        Self { bar: Some(bar) }
    }

    pub(crate) fn println(&self, msg: &str) {
        match &self.bar {
            Some(bar) => bar.println(msg),
            None => println!("{msg}"),
        }
    }

    pub(crate) fn set_stage(&self, msg: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(msg.to_string());
        }
    }

    pub(crate) fn set_node(&self, info: &NodeInfo) {
        if let Some(bar) = &self.bar {
            bar.set_message(format_node_line(info));
        }
    }

    pub(crate) fn finish(&self, elapsed: Duration) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "run finished");
    }
}
