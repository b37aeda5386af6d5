use thiserror::Error;

/// The planner answered with something other than the two accepted shapes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty planner response")]
    Empty,

    #[error("planner response is not JSON: {0}")]
    NotJson(String),

    #[error("planner response has an unexpected shape: {0}")]
    Shape(String),
}

/// Failures raised by the locator and the interaction engine. Tools turn
/// these into result strings; they never reach the planning loop as errors.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Element not found for {0}")]
    NotFound(String),

    #[error("Failed to click '{target}': {reason}")]
    ClickFailed { target: String, reason: String },

    #[error(
        "Failed to input text into '{target}' after every input strategy (last readback '{readback}'). \
         Try a different selector or send Enter if appropriate."
    )]
    InputExhausted { target: String, readback: String },

    #[error("Failed to send key '{key}' to '{target}': {reason}")]
    KeyFailed {
        target: String,
        key: String,
        reason: String,
    },

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Browser driver error: {0:#}")]
    Driver(#[from] anyhow::Error),

    #[error("Page script returned malformed data: {0}")]
    Script(#[from] serde_json::Error),
}

impl BrowserError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrowserError::NotFound(_))
    }
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Terminal failures of a planning run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Planning service request failed: {0:#}")]
    Planner(anyhow::Error),

    #[error("Unsupported tool: {0}")]
    UnsupportedTool(String),

    #[error("Tool task did not complete: {0}")]
    ToolTask(String),

    #[error("Browser session lock is poisoned")]
    SessionPoisoned,
}

pub type AgentResult<T> = Result<T, AgentError>;
