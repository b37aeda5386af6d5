//! Goal-driven browser agent: a planning loop that asks a language model for
//! one tool call at a time and a resilient locator/interaction layer that
//! carries those calls out in Chrome.

pub mod agent;
pub mod brain;
pub mod config;
pub mod diagnostics;
pub mod dom;
pub mod errors;
pub mod hands;
pub mod interact;
pub mod locator;
pub mod query;
pub mod tools;
pub mod types;

pub use agent::{Agent, LoopStop, RunOutcome};
pub use brain::{Brain, Planner};
pub use errors::{AgentError, BrowserError, DecodeError};
pub use tools::{Tool, ToolSet};
pub use types::{Action, LoopLimits, RunState};
