//! The tool catalog the planner chooses from.
//!
//! Tools are leaves: they parse their argument string, drive the locator and
//! the interaction engine, and always answer with a result string. Browser
//! errors never escape a tool.

use std::sync::Arc;

use tracing::{info, warn};

use crate::dom::{capture_digest, render_digest};
use crate::errors::{BrowserError, BrowserResult};
use crate::hands::BrowserSession;
use crate::interact::{ClickMethod, Engine, TypeOutcome};
use crate::locator::{self, SearchScope};
use crate::query::{
    DragArgs, ElementQuery, HistoryDirection, InputArgs, PointerTarget, ScrollCommand,
};

/// A named operation exposed to the planner, run against a context `S`
/// (the live browser session in production).
pub trait Tool<S>: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-line capability description shown in the system prompt.
    fn description(&self) -> &'static str;

    fn execute(&self, ctx: &mut S, args: &str) -> String;

    /// Whether running this tool counts as having looked at the page.
    fn inspects_page(&self) -> bool {
        false
    }
}

/// Registered tools, looked up by name case-insensitively.
pub struct ToolSet<S> {
    tools: Vec<Arc<dyn Tool<S>>>,
}

impl<S> Default for ToolSet<S> {
    fn default() -> Self {
        Self { tools: Vec::new() }
    }
}

impl<S> ToolSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; a later registration with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool<S>>) -> &mut Self {
        self.tools
            .retain(|t| !t.name().eq_ignore_ascii_case(tool.name()));
        self.tools.push(tool);
        self
    }

    pub fn with(mut self, tool: Arc<dyn Tool<S>>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool<S>>> {
        let name = name.trim();
        self.tools
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// `- Name: description` per tool, in registration order.
    pub fn catalog(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The full browser catalog sharing one engine.
pub fn browser_tools(engine: Arc<Engine>, login_marker: &str) -> ToolSet<BrowserSession> {
    ToolSet::new()
        .with(Arc::new(InspectPage {
            login_marker: login_marker.to_string(),
        }))
        .with(Arc::new(ClickElement {
            engine: Arc::clone(&engine),
        }))
        .with(Arc::new(ClickImage {
            engine: Arc::clone(&engine),
        }))
        .with(Arc::new(InputText {
            engine: Arc::clone(&engine),
        }))
        .with(Arc::new(MovePointer {
            engine: Arc::clone(&engine),
        }))
        .with(Arc::new(Scroll {
            engine: Arc::clone(&engine),
        }))
        .with(Arc::new(NavigateHistory {
            engine: Arc::clone(&engine),
        }))
        .with(Arc::new(CloseTab {
            engine: Arc::clone(&engine),
        }))
        .with(Arc::new(DragAndDrop { engine }))
}

// Every browser tool starts here: no dialog pending, main document.
fn begin(session: &mut BrowserSession) {
    session.accept_alert();
    session.reset_frame();
}

// Every browser tool ends here: back to the main document of whatever tab is
// active, and errors flattened into text for the history.
fn conclude(
    session: &mut BrowserSession,
    tool: &str,
    outcome: BrowserResult<String>,
    on_error: impl FnOnce(&BrowserError) -> String,
) -> String {
    session.reset_frame();
    match outcome {
        Ok(text) => text,
        Err(e) => {
            warn!(tool, "{e}");
            on_error(&e)
        }
    }
}

fn plain_error(e: &BrowserError) -> String {
    e.to_string()
}

pub struct InspectPage {
    login_marker: String,
}

impl Tool<BrowserSession> for InspectPage {
    fn name(&self) -> &'static str {
        "InspectPage"
    }

    fn description(&self) -> &'static str {
        "Returns a short summary of the current page: title, inputs, buttons, links, login elements and images. Args: none."
    }

    fn inspects_page(&self) -> bool {
        true
    }

    fn execute(&self, session: &mut BrowserSession, _args: &str) -> String {
        begin(session);
        let outcome = capture_digest(session, &self.login_marker)
            .map(|digest| render_digest(&digest, &self.login_marker));
        conclude(session, self.name(), outcome, |e| {
            format!("Failed to inspect page: {e}")
        })
    }
}

pub struct ClickElement {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for ClickElement {
    fn name(&self) -> &'static str {
        "ClickElement"
    }

    fn description(&self) -> &'static str {
        "Clicks an element. Args: 'selector:<css>' for an exact CSS selector, or the element's visible text."
    }

    fn execute(&self, session: &mut BrowserSession, args: &str) -> String {
        begin(session);
        let outcome = (|| -> BrowserResult<String> {
            let query = ElementQuery::for_click(args)?;
            let element = locator::resolve(session, &query, SearchScope::WithFrames)?;
            let clicked = self.engine.click(session, &element)?;
            info!(
                via = ?clicked.method,
                new_tab = clicked.switched_to_new_context,
                "Clicked {}",
                element.label
            );

            let mut text = match &query {
                ElementQuery::Selector(css) => format!("Clicked element with selector: {css}"),
                other => format!("Clicked element matching {}", other.describe()),
            };
            if clicked.method == ClickMethod::Script {
                text.push_str(" (script click)");
            }
            if clicked.switched_to_new_context {
                text.push_str(&format!(
                    ". A new tab opened and is now active: '{}'",
                    session.title()
                ));
            }
            Ok(text)
        })();
        conclude(session, self.name(), outcome, plain_error)
    }
}

pub struct ClickImage {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for ClickImage {
    fn name(&self) -> &'static str {
        "ClickImage"
    }

    fn description(&self) -> &'static str {
        "Clicks an image by alt text or ID. Args: 'alt text' or 'id:imageId'."
    }

    fn execute(&self, session: &mut BrowserSession, args: &str) -> String {
        begin(session);
        let query_text = args.trim().to_string();
        let outcome = (|| -> BrowserResult<String> {
            let query = ElementQuery::for_image(args)?;
            let element = match locator::resolve(session, &query, SearchScope::MainDocument) {
                Err(e) if e.is_not_found() => {
                    return Ok(format!("Image not found with query: '{query_text}'"));
                }
                other => other?,
            };
            self.engine.click(session, &element)?;
            Ok(format!("Clicked image: {query_text}"))
        })();
        conclude(session, self.name(), outcome, |e| match e {
            BrowserError::InvalidArgs(msg) => msg.clone(),
            other => format!("Failed to click image '{query_text}': {other}"),
        })
    }
}

pub struct InputText {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for InputText {
    fn name(&self) -> &'static str {
        "InputText"
    }

    fn description(&self) -> &'static str {
        "Inputs text into a field. Args: 'fieldName|text' to find the field by label/placeholder/name, or 'selector:<css>|text'. Append '|enter=true' to press Enter afterwards."
    }

    fn execute(&self, session: &mut BrowserSession, args: &str) -> String {
        begin(session);
        let parsed = match InputArgs::parse(args) {
            Ok(parsed) => parsed,
            Err(e) => return conclude(session, self.name(), Err(e), plain_error),
        };
        let field = parsed.field_raw.clone();

        let outcome = (|| -> BrowserResult<String> {
            let element = match locator::resolve(session, &parsed.field, SearchScope::WithFrames) {
                Err(e) if e.is_not_found() => {
                    return Ok(format!(
                        "Input field not found for: '{field}'. Try specifying the field more clearly."
                    ));
                }
                other => other?,
            };

            let typed = self.engine.type_text(session, &element, &parsed.text)?;
            if typed == TypeOutcome::EnterSent {
                return Ok(format!("Sent Enter key to field '{field}'."));
            }
            if parsed.send_enter {
                self.engine.send_enter_after_typing(session, &element)?;
                return Ok(format!(
                    "Input '{}' into field '{field}' and sent Enter key.",
                    parsed.text
                ));
            }
            Ok(format!("Input '{}' into field '{field}'.", parsed.text))
        })();

        conclude(session, self.name(), outcome, |e| {
            format!("Failed to input text into '{field}': {e}")
        })
    }
}

pub struct MovePointer {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for MovePointer {
    fn name(&self) -> &'static str {
        "MovePointer"
    }

    fn description(&self) -> &'static str {
        "Moves the mouse pointer to a position or over an element. Args: 'x:100|y:200' or 'selector:<css>'."
    }

    fn execute(&self, session: &mut BrowserSession, args: &str) -> String {
        begin(session);
        let outcome = (|| -> BrowserResult<String> {
            let target = PointerTarget::parse(args)?;
            self.engine.move_pointer(session, &target)?;
            Ok(match target {
                PointerTarget::Coordinates { x, y } => format!("Mouse moved to ({x}, {y})"),
                PointerTarget::Selector(css) => format!("Mouse moved to element: {css}"),
            })
        })();
        conclude(session, self.name(), outcome, |e| match e {
            BrowserError::InvalidArgs(msg) => msg.clone(),
            other => format!("Failed to move mouse: {other}"),
        })
    }
}

pub struct Scroll {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for Scroll {
    fn name(&self) -> &'static str {
        "Scroll"
    }

    fn description(&self) -> &'static str {
        "Scrolls the page. Args: 'by:dx|dy' (e.g. 'by:0|500'), 'x:100|y:200', 'to:top', 'to:bottom', a bare number of pixels, or 'selector:<css>'."
    }

    fn execute(&self, session: &mut BrowserSession, args: &str) -> String {
        begin(session);
        if args.trim().is_empty() {
            return "No arguments provided. Use 'by:0|500', 'x:100|y:200', 'to:bottom', or 'selector:...'.".to_string();
        }
        let command = ScrollCommand::parse(args);
        let outcome = self.engine.scroll(session, &command).map(|moved| {
            if !moved.applied {
                return format!("Scroll arguments not understood, nothing scrolled: {args}");
            }
            format!(
                "Scrolled with args: {args} (position {},{} -> {},{})",
                moved.before.x, moved.before.y, moved.after.x, moved.after.y
            )
        });
        conclude(session, self.name(), outcome, |e| format!("Failed to scroll: {e}"))
    }
}

pub struct NavigateHistory {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for NavigateHistory {
    fn name(&self) -> &'static str {
        "NavigateHistory"
    }

    fn description(&self) -> &'static str {
        "Navigates browser history. Args: 'back' or 'forward'."
    }

    fn execute(&self, session: &mut BrowserSession, args: &str) -> String {
        begin(session);
        let outcome = HistoryDirection::parse(args).and_then(|direction| {
            self.engine.navigate_history(session, direction)?;
            Ok(match direction {
                HistoryDirection::Back => "Navigated back".to_string(),
                HistoryDirection::Forward => "Navigated forward".to_string(),
            })
        });
        conclude(session, self.name(), outcome, |e| match e {
            BrowserError::InvalidArgs(msg) => msg.clone(),
            other => format!("Failed to navigate: {other}"),
        })
    }
}

pub struct CloseTab {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for CloseTab {
    fn name(&self) -> &'static str {
        "CloseTab"
    }

    fn description(&self) -> &'static str {
        "Closes the current browser tab and switches to another one if available. Args: none."
    }

    fn execute(&self, session: &mut BrowserSession, _args: &str) -> String {
        begin(session);
        let outcome = self
            .engine
            .close_active_context(session)
            .map(|()| "Closed current tab/window.".to_string());
        conclude(session, self.name(), outcome, |e| {
            format!("Failed to close current tab: {e}")
        })
    }
}

pub struct DragAndDrop {
    engine: Arc<Engine>,
}

impl Tool<BrowserSession> for DragAndDrop {
    fn name(&self) -> &'static str {
        "DragAndDrop"
    }

    fn description(&self) -> &'static str {
        "Drags one element onto another. Args: 'sourceSelector|targetSelector' (CSS)."
    }

    fn execute(&self, session: &mut BrowserSession, args: &str) -> String {
        begin(session);
        let outcome = DragArgs::parse(args).and_then(|drag| {
            self.engine
                .drag_and_drop(session, &drag.source, &drag.target)?;
            Ok(format!("Dragged {} to {}", drag.source, drag.target))
        });
        conclude(session, self.name(), outcome, |e| match e {
            BrowserError::InvalidArgs(msg) => msg.clone(),
            other => format!("Failed to drag: {other}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    impl Tool<Vec<String>> for Echo {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "echoes"
        }

        fn execute(&self, log: &mut Vec<String>, args: &str) -> String {
            log.push(args.to_string());
            format!("{}:{args}", self.0)
        }
    }

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let tools = ToolSet::new().with(Arc::new(Echo("ClickElement")));
        assert!(tools.get("clickelement").is_some());
        assert!(tools.get(" CLICKELEMENT ").is_some());
        assert!(tools.get("Click").is_none());
    }

    #[test]
    fn catalog_lists_in_registration_order() {
        let tools = ToolSet::new()
            .with(Arc::new(Echo("A")))
            .with(Arc::new(Echo("B")));
        assert_eq!(tools.catalog(), "- A: echoes\n- B: echoes");
        assert_eq!(tools.names(), vec!["A", "B"]);
    }

    #[test]
    fn reregistering_replaces() {
        let mut tools = ToolSet::new();
        tools.register(Arc::new(Echo("A")));
        tools.register(Arc::new(Echo("a")));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools.names(), vec!["a"]);
    }

    #[test]
    fn tools_run_against_their_context() {
        let tools = ToolSet::new().with(Arc::new(Echo("A")));
        let mut log = Vec::new();
        let tool = tools.get("a").unwrap();
        assert_eq!(tool.execute(&mut log, "x"), "A:x");
        assert!(!tool.inspects_page());
        assert_eq!(log, vec!["x".to_string()]);
    }
}
