//! Provider-agnostic process helpers: timers, stall detection, termination.

mod kill;
mod stall;
mod timer;

pub use kill::{ChildProcess, ExitState, KillOutcome, Terminable, kill_process_gracefully};
pub use stall::StallDetector;
pub use timer::TimeoutTimer;

/// Parse `text` as JSON, returning `None` instead of an error.
pub fn try_parse_json(text: &str) -> Option<serde_json::Value> {
    serde_json::from_str(text).ok()
}
