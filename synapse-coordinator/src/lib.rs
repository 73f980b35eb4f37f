//! File-based mailbox coordinator (spec §4.5): spawns and supervises
//! worker processes that read a Request file and write a Result file, with
//! progressive timeouts, health checks, and sub-request depth capping.

pub mod error;
pub mod mailbox;
pub mod process;
pub mod scheduler;

pub use error::{CoordinatorError, Result};
pub use mailbox::{Context, Handoff, Mailbox, Request, ResultStatus, Role, TaskResult};
pub use process::AgentProcess;
pub use scheduler::{Coordinator, Phase, RequestStatus};
