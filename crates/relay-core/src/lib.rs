//! Provider invocation and process supervision for agent CLIs.
//!
//! `relay-core` launches an external agent binary (`claude`, `codex`,
//! `gemini`), writes the prompt to its stdin, supervises it under a hard
//! timeout, a stall timeout and caller cancellation, and folds whatever it
//! prints into a single [`AgentResult`] -- or a typed [`ProviderError`].
//!
//! # Architecture
//!
//! ```text
//! caller
//!   |
//!   v
//! ProviderRegistry --select/validate--> &dyn Provider
//!   |                                        |
//!   |   invoke(request, cancel) -------------+
//!   |        |
//!   |        v
//!   |   harness::run_piped / run_pty
//!   |        |  spawn, write stdin, close stdin
//!   |        |  select! { exit, cancel, hard timeout, stall, output }
//!   |        |  kill_process_gracefully on every non-exit path
//!   |        v
//!   |   StreamParser (per-vendor Dialect)
//!   |        |
//!   v        v
//! Result<AgentResult, ProviderError>
//! ```

pub mod error;
pub mod harness;
pub mod parser;
pub mod process;
pub mod provider;
pub mod registry;
pub mod types;

pub use error::{ErrorKind, ProviderError};
pub use provider::{ClaudeAdapter, CodexAdapter, GeminiAdapter, Provider};
pub use registry::{ProviderDescriptor, ProviderRegistry};
pub use types::{AgentResult, InvocationRequest, Mode, ProviderType, TokenUsage};
