use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use lpbridge_bridge::SearchControl;
use tokio::sync::mpsc;

/// Ctrl-C state shared with the running search.
#[derive(Debug, Default)]
pub struct ShutdownController {
    presses: AtomicU8,
    search: SearchControl,
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    /// Ask the running search to stop at its next node.
    Graceful,
    Immediate,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) -> u8 {
        self.presses.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn request_stop(&self) {
        self.search.stop();
    }

    /// Control handed to branch and bound; the first Ctrl-C stops it.
    pub fn search_control(&self) -> SearchControl {
        self.search.clone()
    }
}

pub fn spawn_ctrl_c_handler(
    shutdown: Arc<ShutdownController>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>,
) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let n = shutdown.bump();
            if n == 1 {
                shutdown.request_stop();
                let _ = shutdown_tx.send(ShutdownEvent::Graceful);
            } else {
                let _ = shutdown_tx.send(ShutdownEvent::Immediate);
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_press_stops_the_search() {
        let s = ShutdownController::new();
        let control = s.search_control();
        assert!(!control.is_stopped());
        assert_eq!(s.bump(), 1);
        s.request_stop();
        assert!(control.is_stopped());
        assert!(s.search_control().is_stopped());
        assert_eq!(s.bump(), 2);
    }
}
