use std::time::Duration;

pub const SPINNER_TICK: Duration = Duration::from_millis(120);
/// Exit status after a second Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;
