//! Serializes every engine call and runs async calls on a dedicated worker.

use std::future::{Future, IntoFuture};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lpbridge_core::BridgeConfig;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::api::{CallOutcome, CallOutput, LogEvent, LogObserver, ObserverFailure, OperationKind};
use crate::error::BridgeError;
use crate::lock::EngineLock;
use crate::memory::MemoryMonitor;
use crate::relay::{begin_capture, deliver_recorded, panic_message, Sink};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub(crate) struct CallContext {
    pub(crate) call_id: u64,
    pub(crate) failures: Vec<ObserverFailure>,
}

pub(crate) type Work = Box<dyn FnOnce(&mut CallContext) -> Result<CallOutput, BridgeError> + Send>;

// Dropped by the worker only after the engine lock is released.
pub(crate) type Owner = Arc<dyn std::any::Any + Send + Sync>;

struct Job {
    call_id: u64,
    kind: OperationKind,
    work: Work,
    owner: Option<Owner>,
    logs: mpsc::Sender<LogEvent>,
    drained: oneshot::Receiver<()>,
    done: oneshot::Sender<CallOutcome>,
    submitted: Instant,
}

enum WorkerCommand {
    Run(Job),
    Stop,
}

/// Routes engine calls through the process-wide engine lock.
///
/// Sync calls run on the caller's thread. Async calls are queued, in
/// submission order, for a single named worker thread.
pub struct CallGateway {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: BridgeConfig,
}

static GLOBAL: OnceLock<Arc<CallGateway>> = OnceLock::new();

impl CallGateway {
    /// Start a gateway and its worker thread.
    pub fn new(config: &BridgeConfig) -> Result<Arc<Self>, BridgeError> {
        MemoryMonitor::global();
        lpbridge_engine::set_term_output(false);

        let (tx, rx) = mpsc::unbounded_channel();
        let echo = config.echo_engine_output;
        let worker = std::thread::Builder::new()
            .name(config.worker_thread_name.clone())
            .spawn(move || run_worker(rx, echo))
            .map_err(|err| BridgeError::Resource(format!("cannot start worker thread: {err}")))?;

        Ok(Arc::new(Self {
            tx,
            worker: Mutex::new(Some(worker)),
            config: config.clone(),
        }))
    }

    /// Gateway shared by sessions created with [`crate::SolverSession::new`],
    /// started with the default [`BridgeConfig`] on first use.
    pub fn global() -> Result<Arc<Self>, BridgeError> {
        if let Some(gateway) = GLOBAL.get() {
            return Ok(Arc::clone(gateway));
        }
        let gateway = Self::new(&BridgeConfig::default())?;
        Ok(Arc::clone(GLOBAL.get_or_init(|| gateway)))
    }

    /// Settings this gateway was started with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Let queued calls finish, then stop the worker and wait for it.
    ///
    /// Blocks the calling thread. Calls submitted afterwards complete with
    /// [`BridgeError::WorkerGone`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerCommand::Stop);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("bridge worker panicked");
            }
        }
    }

    fn next_call_id() -> u64 {
        NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn run_sync<F>(
        &self,
        kind: OperationKind,
        observer: Option<LogObserver>,
        work: F,
    ) -> CallOutcome
    where
        F: FnOnce(&mut CallContext) -> Result<CallOutput, BridgeError>,
    {
        let call_id = Self::next_call_id();
        let submitted = Instant::now();
        let span = tracing::debug_span!("engine_call", call_id, %kind, mode = "sync");
        let _span = span.enter();

        let lock = EngineLock::global();
        if lock.is_held() {
            tracing::trace!(ahead = lock.waiting() + 1, "waiting for engine lock");
        }
        let engine = lock.acquire();
        tracing::debug!(waited = ?submitted.elapsed(), "engine lock acquired");

        let capture = begin_capture(
            call_id,
            Sink::Inline(observer),
            self.config.echo_engine_output,
        );
        let mut cx = CallContext {
            call_id,
            failures: Vec::new(),
        };
        let result = guarded(|| work(&mut cx));
        let mut observer_failures = capture.end();
        drop(engine);

        observer_failures.append(&mut cx.failures);
        finished(CallOutcome {
            call_id,
            result,
            observer_failures,
            elapsed: submitted.elapsed(),
        })
    }

    pub(crate) fn submit(
        &self,
        kind: OperationKind,
        observer: Option<LogObserver>,
        work: Work,
    ) -> PendingCall {
        self.submit_owned(kind, observer, work, None)
    }

    pub(crate) fn submit_owned(
        &self,
        kind: OperationKind,
        observer: Option<LogObserver>,
        work: Work,
        owner: Option<Owner>,
    ) -> PendingCall {
        let call_id = Self::next_call_id();
        let submitted = Instant::now();
        let (logs_tx, logs) = mpsc::channel(self.config.log_channel_capacity.max(1));
        let (drained, drained_rx) = oneshot::channel();
        let (done_tx, done) = oneshot::channel();

        let job = Job {
            call_id,
            kind,
            work,
            owner,
            logs: logs_tx,
            drained: drained_rx,
            done: done_tx,
            submitted,
        };
        if self.tx.send(WorkerCommand::Run(job)).is_err() {
            tracing::warn!(call_id, %kind, "bridge worker is gone; call dropped");
        } else {
            tracing::debug!(call_id, %kind, "engine call submitted");
        }

        PendingCall {
            call_id,
            logs,
            drained: Some(drained),
            done,
            observer,
            submitted,
        }
    }

    pub(crate) fn reject(kind: OperationKind, err: BridgeError) -> PendingCall {
        let call_id = Self::next_call_id();
        tracing::debug!(call_id, %kind, error = %err, "engine call rejected");
        let (_, logs) = mpsc::channel(1);
        let (done_tx, done) = oneshot::channel();
        let _ = done_tx.send(CallOutcome {
            call_id,
            result: Err(err),
            observer_failures: Vec::new(),
            elapsed: Duration::ZERO,
        });
        PendingCall {
            call_id,
            logs,
            drained: None,
            done,
            observer: None,
            submitted: Instant::now(),
        }
    }
}

impl Drop for CallGateway {
    fn drop(&mut self) {
        // The worker drains what is queued and exits on its own.
        let _ = self.tx.send(WorkerCommand::Stop);
    }
}

impl std::fmt::Debug for CallGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn guarded<F>(work: F) -> Result<CallOutput, BridgeError>
where
    F: FnOnce() -> Result<CallOutput, BridgeError>,
{
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(BridgeError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn finished(outcome: CallOutcome) -> CallOutcome {
    match &outcome.result {
        Ok(_) => tracing::debug!(
            call_id = outcome.call_id,
            elapsed = ?outcome.elapsed,
            failures = outcome.observer_failures.len(),
            "engine call finished"
        ),
        Err(err) => tracing::debug!(
            call_id = outcome.call_id,
            elapsed = ?outcome.elapsed,
            error = %err,
            "engine call failed"
        ),
    }
    outcome
}

fn run_worker(mut rx: mpsc::UnboundedReceiver<WorkerCommand>, echo: bool) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            WorkerCommand::Stop => break,
            WorkerCommand::Run(job) => run_job(job, echo),
        }
    }
    tracing::debug!("bridge worker stopped");
}

fn run_job(job: Job, echo: bool) {
    let Job {
        call_id,
        kind,
        work,
        owner,
        logs,
        drained,
        done,
        submitted,
    } = job;
    let span = tracing::debug_span!("engine_call", call_id, %kind, mode = "async");
    let _span = span.enter();

    let lock = EngineLock::global();
    if lock.is_held() {
        tracing::trace!(ahead = lock.waiting() + 1, "waiting for engine lock");
    }
    let engine = lock.acquire();
    tracing::debug!(waited = ?submitted.elapsed(), "engine lock acquired");

    let capture = begin_capture(call_id, Sink::Channel(logs), echo);
    let mut cx = CallContext {
        call_id,
        failures: Vec::new(),
    };
    let result = guarded(|| work(&mut cx));
    capture.end();

    // The lock is held until the caller has consumed every line. A dropped
    // handle closes the channel and ends the wait.
    let _ = drained.blocking_recv();
    drop(engine);
    drop(owner);

    let outcome = finished(CallOutcome {
        call_id,
        result,
        observer_failures: cx.failures,
        elapsed: submitted.elapsed(),
    });
    let _ = done.send(outcome);
}

/// An async call that has been queued or is running.
///
/// Await it (or call [`PendingCall::wait`]) to stream its log lines into the
/// session's observer and get the [`CallOutcome`]. The engine stays locked
/// until the lines are consumed, so a pending call must be awaited or
/// dropped; dropping it lets the call finish with its output discarded.
pub struct PendingCall {
    call_id: u64,
    logs: mpsc::Receiver<LogEvent>,
    drained: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<CallOutcome>,
    observer: Option<LogObserver>,
    submitted: Instant,
}

impl PendingCall {
    /// Id shared by this call's log events and outcome.
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Next log line, bypassing the observer. `None` once the call has
    /// written its last line.
    pub async fn next_log(&mut self) -> Option<LogEvent> {
        self.logs.recv().await
    }

    /// Deliver the remaining lines to the observer, then wait for the result.
    ///
    /// Observer failures come first in [`CallOutcome::observer_failures`],
    /// followed by node callback failures.
    pub async fn wait(mut self) -> CallOutcome {
        let mut failures = Vec::new();
        while let Some(event) = self.logs.recv().await {
            deliver_recorded(self.observer.as_ref(), &event, &mut failures);
        }
        if let Some(drained) = self.drained.take() {
            let _ = drained.send(());
        }

        match self.done.await {
            Ok(mut outcome) => {
                failures.append(&mut outcome.observer_failures);
                outcome.observer_failures = failures;
                outcome
            }
            Err(_) => CallOutcome {
                call_id: self.call_id,
                result: Err(BridgeError::WorkerGone),
                observer_failures: failures,
                elapsed: self.submitted.elapsed(),
            },
        }
    }
}

impl IntoFuture for PendingCall {
    type Output = CallOutcome;
    type IntoFuture = Pin<Box<dyn Future<Output = CallOutcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}
