//! Allocation accounting for engine-owned memory.
//!
//! The engine only reports allocations process-wide, so [`MemoryMonitor`]
//! keeps global counters. Per-session numbers are attributed from what the
//! engine's thread does inside each of the session's calls (a *window*) and
//! are an estimate, not an isolated allocator.

use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use lpbridge_engine::{set_memory_hook, MemoryHook};
use parking_lot::{Mutex, MutexGuard};

use crate::api::MemorySnapshot;

#[derive(Debug, Default)]
struct Counters {
    now: MemorySnapshot,
    window: Option<WindowMark>,
}

/// Running totals of the window's own thread, relative to its start.
#[derive(Debug, Clone, Copy)]
struct WindowMark {
    owner: ThreadId,
    count: i64,
    total: i64,
    count_high: i64,
    total_high: i64,
}

impl WindowMark {
    fn record(&mut self, count: i64, bytes: i64) {
        if thread::current().id() != self.owner {
            return;
        }
        self.count += count;
        self.total += bytes;
        self.count_high = self.count_high.max(self.count);
        self.total_high = self.total_high.max(self.total);
    }
}

/// Net change and high-water rise over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Window {
    count_delta: i64,
    total_delta: i64,
    count_rise: u64,
    total_rise: u64,
}

/// Global allocation counters, fed by the engine's allocation hook.
///
/// Counts and peaks are updated under one mutex, so a [`MemorySnapshot`]
/// always satisfies `cpeak >= count` and `tpeak >= total`.
#[derive(Debug, Default)]
pub struct MemoryMonitor {
    counters: Mutex<Counters>,
}

struct Hook(Arc<MemoryMonitor>);

impl MemoryHook for Hook {
    fn on_alloc(&self, bytes: usize) {
        self.0.on_allocate(bytes);
    }

    fn on_free(&self, bytes: usize) {
        self.0.on_free(bytes);
    }
}

static GLOBAL: OnceLock<Arc<MemoryMonitor>> = OnceLock::new();

impl MemoryMonitor {
    /// The process-wide monitor. The first call installs it as the engine's
    /// allocation hook; allocations made before that are not counted.
    pub fn global() -> &'static MemoryMonitor {
        GLOBAL.get_or_init(|| {
            let monitor = Arc::new(MemoryMonitor::default());
            set_memory_hook(Some(Arc::new(Hook(Arc::clone(&monitor)))));
            monitor
        })
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock()
    }

    /// Record an allocation of `bytes`.
    pub fn on_allocate(&self, bytes: usize) {
        let mut c = self.counters();
        let now = &mut c.now;
        now.count += 1;
        now.total += bytes as u64;
        now.cpeak = now.cpeak.max(now.count);
        now.tpeak = now.tpeak.max(now.total);
        if let Some(mark) = c.window.as_mut() {
            mark.record(1, bytes as i64);
        }
    }

    /// Record a release of `bytes`. Releasing more than is accounted
    /// saturates at zero.
    pub fn on_free(&self, bytes: usize) {
        let mut c = self.counters();
        let now = &mut c.now;
        if now.count == 0 || now.total < bytes as u64 {
            tracing::warn!(
                bytes,
                count = now.count,
                total = now.total,
                "engine released more memory than was accounted"
            );
        }
        now.count = now.count.saturating_sub(1);
        now.total = now.total.saturating_sub(bytes as u64);
        if let Some(mark) = c.window.as_mut() {
            mark.record(-1, -(bytes as i64));
        }
    }

    /// Current counters.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.counters().now
    }

    /// Run `f` inside a window and report what the calling thread
    /// allocated and released meanwhile.
    ///
    /// Windows do not nest; callers hold the engine lock, which keeps them
    /// from overlapping.
    pub(crate) fn window<R>(&self, f: impl FnOnce() -> R) -> (R, Window) {
        self.counters().window = Some(WindowMark {
            owner: thread::current().id(),
            count: 0,
            total: 0,
            count_high: 0,
            total_high: 0,
        });
        let out = f();
        let window = match self.counters().window.take() {
            Some(mark) => Window {
                count_delta: mark.count,
                total_delta: mark.total,
                count_rise: mark.count_high as u64,
                total_rise: mark.total_high as u64,
            },
            None => Window::default(),
        };
        (out, window)
    }
}

/// Memory charged to one session, built from the windows of its calls.
#[derive(Debug, Default)]
pub(crate) struct Attribution {
    charged: Mutex<MemorySnapshot>,
}

impl Attribution {
    pub(crate) fn charge(&self, window: &Window) {
        let mut s = self.charged.lock();
        let start_count = s.count;
        let start_total = s.total;
        s.cpeak = s.cpeak.max(start_count + window.count_rise);
        s.tpeak = s.tpeak.max(start_total + window.total_rise);
        s.count = start_count.saturating_add_signed(window.count_delta);
        s.total = start_total.saturating_add_signed(window.total_delta);
        s.cpeak = s.cpeak.max(s.count);
        s.tpeak = s.tpeak.max(s.total);
    }

    pub(crate) fn snapshot(&self) -> MemorySnapshot {
        *self.charged.lock()
    }
}
