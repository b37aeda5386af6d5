use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::DecodeError;

/// The single decision the planner hands back each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Invoke { tool: String, args: String },
    Finish { summary: String },
}

/// Wire shape of a planner reply. `tool: null` means the run is over.
#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<String>,
    #[serde(default, rename = "final")]
    final_text: Option<String>,
}

impl Action {
    /// Decode a raw planner reply. Markdown fences around the JSON are
    /// tolerated; any other deviation from the two accepted shapes is an error.
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        let cleaned = strip_fences(raw);
        if cleaned.is_empty() {
            return Err(DecodeError::Empty);
        }

        let value: serde_json::Value =
            serde_json::from_str(cleaned).map_err(|e| DecodeError::NotJson(e.to_string()))?;
        if !value.is_object() {
            return Err(DecodeError::Shape("expected a JSON object".into()));
        }

        let raw: RawAction =
            serde_json::from_value(value).map_err(|e| DecodeError::Shape(e.to_string()))?;

        match (raw.tool, raw.final_text) {
            (Some(tool), _) if !tool.trim().is_empty() => Ok(Action::Invoke {
                tool: tool.trim().to_string(),
                args: raw.args.unwrap_or_default(),
            }),
            (Some(_), _) => Err(DecodeError::Shape("\"tool\" is an empty string".into())),
            (None, Some(summary)) => Ok(Action::Finish { summary }),
            (None, None) => Err(DecodeError::Shape(
                "\"tool\" is null but \"final\" is missing".into(),
            )),
        }
    }
}

fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// One executed tool call as it is replayed to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub tool: String,
    pub args: String,
    pub result: String,
}

/// Per-goal bookkeeping owned by the planning loop. Dropped when the run ends.
#[derive(Debug, Default)]
pub struct RunState {
    pub history: Vec<HistoryEntry>,
    pub last_action: Option<(String, String)>,
    pub call_counts: HashMap<String, usize>,
    pub has_inspected_page: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `(tool, args)` is exactly the previously executed pair.
    pub fn is_repeat(&self, tool: &str, args: &str) -> bool {
        matches!(&self.last_action, Some((t, a)) if t.eq_ignore_ascii_case(tool) && a == args)
    }

    /// Bumps the counter for `tool` and returns the new count.
    pub fn record_call(&mut self, tool: &str) -> usize {
        let count = self
            .call_counts
            .entry(tool.to_ascii_lowercase())
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn calls_to(&self, tool: &str) -> usize {
        self.call_counts
            .get(&tool.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn record_result(&mut self, tool: &str, args: &str, result: String) {
        self.history.push(HistoryEntry {
            tool: tool.to_string(),
            args: args.to_string(),
            result,
        });
        self.last_action = Some((tool.to_string(), args.to_string()));
    }

    /// History in the form it is pasted into the next user prompt.
    pub fn render_history(&self) -> String {
        if self.history.is_empty() {
            return "(no tools executed yet)".to_string();
        }
        self.history
            .iter()
            .map(|h| format!("[Tool:{}] args={}\nResult={}", h.tool, h.args, h.result))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Loop-safety ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_steps: usize,
    pub max_calls_per_tool: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_steps: MAX_STEPS_PER_RUN,
            max_calls_per_tool: MAX_CALLS_PER_TOOL,
        }
    }
}

pub const MAX_STEPS_PER_RUN: usize = 10;
pub const MAX_CALLS_PER_TOOL: usize = 5;

pub const ELEMENT_WAIT: Duration = Duration::from_secs(10);
pub const ELEMENT_POLL: Duration = Duration::from_millis(500);
pub const NEW_CONTEXT_WAIT: Duration = Duration::from_secs(5);
pub const NEW_CONTEXT_POLL: Duration = Duration::from_millis(200);
pub const READY_WAIT: Duration = Duration::from_secs(10);
pub const READY_POLL: Duration = Duration::from_millis(200);

pub const TYPE_SETTLE: Duration = Duration::from_millis(100);
pub const KEY_SETTLE: Duration = Duration::from_millis(300);
pub const POINTER_SETTLE: Duration = Duration::from_millis(200);
pub const CLICK_SETTLE: Duration = Duration::from_millis(500);
pub const ENTER_DELAY: Duration = Duration::from_millis(200);
pub const SCRIPT_RETRY_BACKOFF: Duration = Duration::from_millis(150);
pub const SCRIPT_RETRY_ATTEMPTS: usize = 3;

pub const DIGEST_MAX_INPUTS: usize = 20;
pub const DIGEST_MAX_SAMPLES: usize = 10;
pub const DIGEST_MAX_IMAGES: usize = 15;
pub const DIGEST_VALUE_MAX_CHARS: usize = 80;
pub const DIGEST_SRC_MAX_CHARS: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_invoke() {
        let action = Action::parse(r#"{"tool":"ClickElement","args":"selector:#x"}"#).unwrap();
        assert_eq!(
            action,
            Action::Invoke {
                tool: "ClickElement".into(),
                args: "selector:#x".into()
            }
        );
    }

    #[test]
    fn missing_args_become_empty() {
        let action = Action::parse(r#"{"tool":"InspectPage"}"#).unwrap();
        assert_eq!(
            action,
            Action::Invoke {
                tool: "InspectPage".into(),
                args: String::new()
            }
        );
    }

    #[test]
    fn parses_finish_inside_fences() {
        let raw = "```json\n{\"tool\":null,\"final\":\"Done\"}\n```";
        assert_eq!(
            Action::parse(raw).unwrap(),
            Action::Finish {
                summary: "Done".into()
            }
        );
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(Action::parse("click the button").is_err());
        assert!(Action::parse("").is_err());
        assert!(Action::parse("[1,2]").is_err());
        assert!(Action::parse(r#"{"tool":null}"#).is_err());
        assert!(Action::parse(r#"{"tool":42,"args":"x"}"#).is_err());
        assert!(Action::parse(r#"{"tool":"  ","args":"x"}"#).is_err());
    }

    #[test]
    fn repeat_detection_is_exact() {
        let mut state = RunState::new();
        assert!(!state.is_repeat("ClickElement", "selector:#x"));
        state.record_result("ClickElement", "selector:#x", "ok".into());
        assert!(state.is_repeat("ClickElement", "selector:#x"));
        assert!(!state.is_repeat("ClickElement", "selector:#y"));
        assert!(!state.is_repeat("ClickImage", "selector:#x"));
    }

    #[test]
    fn repeat_detection_ignores_tool_name_case() {
        let mut state = RunState::new();
        state.record_result("ClickElement", "selector:#x", "ok".into());
        assert!(state.is_repeat("clickelement", "selector:#x"));
        assert!(state.is_repeat("CLICKELEMENT", "selector:#x"));
        // arguments stay case-sensitive
        assert!(!state.is_repeat("clickelement", "selector:#X"));
    }

    #[test]
    fn call_counts_ignore_case() {
        let mut state = RunState::new();
        assert_eq!(state.record_call("Scroll"), 1);
        assert_eq!(state.record_call("scroll"), 2);
        assert_eq!(state.calls_to("SCROLL"), 2);
        assert_eq!(state.calls_to("InputText"), 0);
    }

    #[test]
    fn history_renders_in_order() {
        let mut state = RunState::new();
        assert!(state.render_history().contains("no tools"));
        state.record_result("InspectPage", "", "[Title] Home".into());
        state.record_result("Scroll", "to:bottom", "Scrolled".into());
        let rendered = state.render_history();
        let first = rendered.find("InspectPage").unwrap();
        let second = rendered.find("Scroll").unwrap();
        assert!(first < second);
        assert!(rendered.contains("Result=[Title] Home"));
    }
}
