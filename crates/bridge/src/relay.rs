//! Captures engine terminal output for one call and relays it line by line.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use lpbridge_engine::{set_term_hook, TermHook};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::api::{FailureSite, LogEvent, LogObserver, ObserverFailure};

pub(crate) enum Sink {
    Inline(Option<LogObserver>),
    Channel(mpsc::Sender<LogEvent>),
}

struct RelayState {
    call_id: u64,
    seq: u64,
    sink: Sink,
    echo: bool,
    detached: bool,
    failures: Vec<ObserverFailure>,
}

impl RelayState {
    fn push(&mut self, line: &str) {
        let event = LogEvent {
            call_id: self.call_id,
            seq: self.seq,
            text: line.to_string(),
        };
        self.seq += 1;
        if self.echo {
            tracing::debug!(target: "lpbridge::engine", call_id = event.call_id, "{}", event.text);
        }

        match &self.sink {
            Sink::Inline(Some(observer)) => {
                if let Err(message) = deliver(observer, &event) {
                    self.failures.push(failure(&event, message));
                }
            }
            Sink::Inline(None) => {}
            Sink::Channel(tx) => {
                if !self.detached && tx.blocking_send(event).is_err() {
                    // Caller dropped its handle; keep running, discard output.
                    tracing::debug!(call_id = self.call_id, "log receiver gone");
                    self.detached = true;
                }
            }
        }
    }
}

/// Output capture for one call.
pub(crate) struct Capture {
    state: Arc<Mutex<RelayState>>,
    previous: Option<TermHook>,
}

pub(crate) fn begin_capture(call_id: u64, sink: Sink, echo: bool) -> Capture {
    let state = Arc::new(Mutex::new(RelayState {
        call_id,
        seq: 0,
        sink,
        echo,
        detached: false,
        failures: Vec::new(),
    }));
    let hook_state = Arc::clone(&state);
    let previous = set_term_hook(Some(Box::new(move |line: &str| {
        hook_state.lock().push(line);
    })));
    Capture { state, previous }
}

impl Capture {
    pub(crate) fn end(self) -> Vec<ObserverFailure> {
        drop(set_term_hook(self.previous));
        let mut state = self.state.lock();
        // Drops the channel sender, which ends the stream.
        state.sink = Sink::Inline(None);
        std::mem::take(&mut state.failures)
    }
}

fn failure(event: &LogEvent, message: String) -> ObserverFailure {
    tracing::warn!(call_id = event.call_id, seq = event.seq, %message, "log observer failed");
    ObserverFailure {
        call_id: event.call_id,
        site: FailureSite::Line { seq: event.seq },
        message,
    }
}

/// Hand one line to an observer, turning an error or a panic into a message.
pub(crate) fn deliver(observer: &LogObserver, event: &LogEvent) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| observer(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

pub(crate) fn deliver_recorded(
    observer: Option<&LogObserver>,
    event: &LogEvent,
    failures: &mut Vec<ObserverFailure>,
) {
    let Some(observer) = observer else {
        return;
    };
    if let Err(message) = deliver(observer, event) {
        failures.push(failure(event, message));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::EngineLock;
    use lpbridge_engine::{intopt, MipOptions, Problem};

    fn collecting() -> (LogObserver, Arc<Mutex<Vec<LogEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: LogObserver = Arc::new(move |e: &LogEvent| {
            sink.lock().push(e.clone());
            Ok(())
        });
        (observer, seen)
    }

    fn empty_mip() -> Problem {
        Problem::new()
    }

    fn presolve() -> MipOptions {
        MipOptions {
            presolve: true,
            ..MipOptions::default()
        }
    }

    #[test]
    fn inline_capture_numbers_lines_in_order() {
        let _engine = EngineLock::global().acquire();
        let (observer, seen) = collecting();
        let mut lp = empty_mip();

        let capture = begin_capture(9, Sink::Inline(Some(observer)), false);
        intopt(&mut lp, &presolve()).unwrap();
        assert!(capture.end().is_empty());

        let seen = seen.lock();
        assert_eq!(seen.len(), 6);
        for (i, e) in seen.iter().enumerate() {
            assert_eq!(e.call_id, 9);
            assert_eq!(e.seq, i as u64);
        }
        assert_eq!(seen[3].text, "Preprocessing...");
    }

    #[test]
    fn failing_observer_still_sees_every_line() {
        let _engine = EngineLock::global().acquire();
        let count = Arc::new(Mutex::new(0u64));
        let counter = Arc::clone(&count);
        let observer: LogObserver = Arc::new(move |e: &LogEvent| {
            *counter.lock() += 1;
            if e.seq % 2 == 0 {
                Err(format!("rejected {}", e.seq).into())
            } else {
                panic!("boom {}", e.seq)
            }
        });
        let mut lp = empty_mip();

        let capture = begin_capture(1, Sink::Inline(Some(observer)), false);
        intopt(&mut lp, &presolve()).unwrap();
        let failures = capture.end();

        assert_eq!(*count.lock(), 6);
        assert_eq!(failures.len(), 6);
        assert_eq!(failures[0].message, "rejected 0");
        assert_eq!(failures[1].message, "boom 1");
        assert_eq!(failures[5].site, FailureSite::Line { seq: 5 });
    }

    #[test]
    fn channel_capture_ends_stream_after_end() {
        let _engine = EngineLock::global().acquire();
        let (tx, mut rx) = mpsc::channel(64);
        let mut lp = empty_mip();

        let capture = begin_capture(3, Sink::Channel(tx), false);
        intopt(&mut lp, &presolve()).unwrap();
        capture.end();

        let mut seqs = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            seqs.push(event.seq);
        }
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn dropped_receiver_detaches_without_failing() {
        let _engine = EngineLock::global().acquire();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut lp = empty_mip();

        let capture = begin_capture(4, Sink::Channel(tx), false);
        let outcome = intopt(&mut lp, &presolve()).unwrap();
        assert!(capture.end().is_empty());
        assert_eq!(outcome.nodes, 0);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "panic");
    }
}
