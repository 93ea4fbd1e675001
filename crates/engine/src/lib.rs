#![deny(missing_docs)]
#![deny(unreachable_pub)]

//! In-process linear and mixed-integer programming engine.
//!
//! The engine behaves like a classic C solver library: its terminal output
//! and allocation hooks are process-global, entry points block until they
//! finish, and only one entry point may run at a time (a second concurrent
//! entry fails with [`EngineError::Busy`]). Callers that need concurrency put
//! a lock and a worker in front of it.

mod env;
mod error;
mod factor;
mod lp_reader;
mod params;
mod problem;
mod search;
mod simplex;

pub use env::{is_busy, set_memory_hook, set_term_hook, set_term_output, MemoryHook, TermHook};
pub use error::EngineError;
pub use factor::factorize;
pub use lp_reader::read_lp;
pub use params::{Branching, InteriorOptions, MipOptions, MsgLevel, Scaling, SimplexOptions};
pub use problem::{Bound, ColKind, Direction, Problem, ReturnCode, Solution, Status};
pub use search::{intopt, NodeInfo, NodeReason, NodeView, Search, SearchOutcome, Step};
pub use simplex::{exact, interior, simplex};
