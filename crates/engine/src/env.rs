//! Process-wide engine environment.
//!
//! The engine keeps its terminal output hook, its allocation hook and its
//! "call in progress" marker in process-global state. None of this is
//! per-thread: whoever drives the engine must make sure only one call runs at
//! a time and must install hooks for the duration of that call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::EngineError;
use crate::params::MsgLevel;

/// Receives every line the engine writes to its terminal.
///
/// The line never contains a trailing newline.
pub type TermHook = Box<dyn FnMut(&str) + Send>;

/// Observes every allocation and release of engine-owned memory.
pub trait MemoryHook: Send + Sync {
    /// Called after the engine allocates a block of `bytes`.
    fn on_alloc(&self, bytes: usize);

    /// Called after the engine releases a block of `bytes`.
    fn on_free(&self, bytes: usize);
}

static TERM_HOOK: Mutex<Option<TermHook>> = Mutex::new(None);
static TERM_OUT: AtomicBool = AtomicBool::new(true);
static MEMORY_HOOK: RwLock<Option<Arc<dyn MemoryHook>>> = RwLock::new(None);
static IN_CALL: AtomicBool = AtomicBool::new(false);

/// Install (or clear) the terminal hook, returning the previous one.
///
/// While a hook is installed, engine output goes to the hook only.
pub fn set_term_hook(hook: Option<TermHook>) -> Option<TermHook> {
    let mut slot = TERM_HOOK.lock();
    std::mem::replace(&mut *slot, hook)
}

/// Enable or disable echoing engine output to stdout when no hook is installed.
///
/// Returns the previous setting.
pub fn set_term_output(enabled: bool) -> bool {
    TERM_OUT.swap(enabled, Ordering::SeqCst)
}

/// Install (or clear) the allocation hook, returning the previous one.
pub fn set_memory_hook(hook: Option<Arc<dyn MemoryHook>>) -> Option<Arc<dyn MemoryHook>> {
    let mut slot = MEMORY_HOOK.write();
    std::mem::replace(&mut *slot, hook)
}

/// Whether an engine entry point is currently executing.
pub fn is_busy() -> bool {
    IN_CALL.load(Ordering::SeqCst)
}

fn print(line: &str) {
    let mut slot = TERM_HOOK.lock();
    match slot.as_mut() {
        Some(hook) => hook(line),
        None => {
            if TERM_OUT.load(Ordering::Relaxed) {
                println!("{line}");
            }
        }
    }
}

/// Message-level gate in front of [`print`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Terminal {
    level: MsgLevel,
}

impl Terminal {
    pub(crate) fn new(level: MsgLevel) -> Self {
        Self { level }
    }

    pub(crate) fn silent() -> Self {
        Self::new(MsgLevel::Off)
    }

    pub(crate) fn level(&self) -> MsgLevel {
        self.level
    }

    /// Full diagnostic output.
    pub(crate) fn all(&self, line: impl AsRef<str>) {
        if self.level >= MsgLevel::All {
            print(line.as_ref());
        }
    }

    /// Normal output.
    pub(crate) fn on(&self, line: impl AsRef<str>) {
        if self.level >= MsgLevel::On {
            print(line.as_ref());
        }
    }

    /// Errors and warnings.
    pub(crate) fn err(&self, line: impl AsRef<str>) {
        if self.level >= MsgLevel::Err {
            print(line.as_ref());
        }
    }
}

/// Marks one engine entry point as running. A second concurrent entry fails
/// with [`EngineError::Busy`] instead of corrupting the global state.
#[derive(Debug)]
pub(crate) struct CallGuard {
    _private: (),
}

impl CallGuard {
    pub(crate) fn enter(entry: &'static str) -> Result<Self, EngineError> {
        IN_CALL
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| EngineError::Busy(entry))?;
        Ok(Self { _private: () })
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        IN_CALL.store(false, Ordering::SeqCst);
    }
}

fn notify_alloc(bytes: usize) {
    let slot = MEMORY_HOOK.read();
    if let Some(hook) = slot.as_ref() {
        hook.on_alloc(bytes);
    }
}

fn notify_free(bytes: usize) {
    let slot = MEMORY_HOOK.read();
    if let Some(hook) = slot.as_ref() {
        hook.on_free(bytes);
    }
}

/// An accounted block of engine memory. Allocation and release are reported
/// to the installed [`MemoryHook`].
#[derive(Debug)]
pub(crate) struct Block {
    size: usize,
}

impl Block {
    pub(crate) fn alloc(size: usize) -> Self {
        notify_alloc(size);
        Self { size }
    }

    pub(crate) fn resize(&mut self, size: usize) {
        notify_free(self.size);
        notify_alloc(size);
        self.size = size;
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        notify_free(self.size);
    }
}

/// Format like C's `%.9e` (two-digit signed exponent).
pub(crate) fn sci(value: f64) -> String {
    if !value.is_finite() {
        return format!("{value}");
    }
    let raw = format!("{value:.9e}");
    let Some((mantissa, exp)) = raw.split_once('e') else {
        return raw;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

/// `"<n> <noun>s"` with the plural suffix dropped for exactly one.
pub(crate) fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::{Mutex, MutexGuard};

    static SERIAL: Mutex<()> = Mutex::new(());

    /// Engine entry points are process-global; tests that call them take this.
    pub(crate) fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock()
    }
}
