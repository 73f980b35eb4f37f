//! Core library for the self-improving multi-agent execution platform:
//! tiered memory, the rate limiter, multi-expert parallel execution, and
//! the refinement loop engine. The coordinator and CLI binaries depend on
//! this crate; it has no binary targets of its own.

pub mod circuit_breaker;
pub mod config;
pub mod distance;
pub mod error;
pub mod experts;
pub mod logging;
pub mod memory;
pub mod ratelimit;
pub mod refine;
pub mod retry;

pub use config::SynapseConfig;
pub use error::{Result, SynapseError};
pub use memory::MemorySubstrate;
pub use ratelimit::RateLimiter;
