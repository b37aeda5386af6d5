//! Interaction Engine.
//!
//! Every operation takes the session explicitly. Operations that can move the
//! session to another document say so: `click` may switch to a newly opened
//! tab, `close_active_context` always switches, and everything that resolves
//! an element may leave the frame context inside an iframe until the tool
//! layer resets it.

use std::thread::sleep;

use headless_chrome::browser::tab::point::Point;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::diagnostics::{Diagnostics, FailureArtifacts};
use crate::errors::{BrowserError, BrowserResult};
use crate::hands::{BrowserSession, js_literal, poll};
use crate::locator::{self, ResolvedElement, SearchScope};
use crate::query::{ElementQuery, HistoryDirection, PointerTarget, ScrollCommand, is_enter_key};
use crate::types::{
    CLICK_SETTLE, ELEMENT_POLL, ELEMENT_WAIT, ENTER_DELAY, KEY_SETTLE, NEW_CONTEXT_POLL, NEW_CONTEXT_WAIT,
    POINTER_SETTLE, READY_WAIT, SCRIPT_RETRY_ATTEMPTS, SCRIPT_RETRY_BACKOFF, TYPE_SETTLE,
};

/// Text-entry strategies, tried in order until one is verified by readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStrategy {
    NativeKeys,
    PointerThenKeys,
    ScriptAssign,
}

pub const INPUT_STRATEGIES: [InputStrategy; 3] = [
    InputStrategy::NativeKeys,
    InputStrategy::PointerThenKeys,
    InputStrategy::ScriptAssign,
];

impl InputStrategy {
    pub fn name(self) -> &'static str {
        match self {
            InputStrategy::NativeKeys => "native keystrokes",
            InputStrategy::PointerThenKeys => "pointer click + keystrokes",
            InputStrategy::ScriptAssign => "scripted assignment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMethod {
    Native,
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickOutcome {
    pub method: ClickMethod,
    pub switched_to_new_context: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOutcome {
    EnterSent,
    Typed(InputStrategy),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollOutcome {
    pub before: ScrollPosition,
    pub after: ScrollPosition,
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
struct BoxCenter {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    /// The topmost element at the centre is the element or a descendant.
    #[serde(default)]
    hit: bool,
}

impl BoxCenter {
    fn point(&self, label: &str) -> BrowserResult<Point> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(BrowserError::ClickFailed {
                target: label.to_string(),
                reason: "element has no visible box".into(),
            });
        }
        Ok(Point {
            x: self.x,
            y: self.y,
        })
    }

    // A pointer click at the centre lands on whatever is on top.
    fn click_point(&self, label: &str) -> BrowserResult<Point> {
        let point = self.point(label)?;
        if !self.hit {
            return Err(BrowserError::ClickFailed {
                target: label.to_string(),
                reason: "element is covered by another element".into(),
            });
        }
        Ok(point)
    }
}

// Assigns through the realm's native value setter so framework value
// trackers see a change, then replays the event sequence a user would cause.
const SCRIPT_ASSIGN: &str = r#"function (el, val) {
  if (!el) return null;
  try { el.focus(); } catch (e) {}
  if (!('value' in el) && el.isContentEditable) {
    el.textContent = val;
  } else {
    var last = el.value;
    var win = (el.ownerDocument && el.ownerDocument.defaultView) || window;
    var proto = el.tagName === 'TEXTAREA' ? win.HTMLTextAreaElement.prototype : win.HTMLInputElement.prototype;
    var desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) { desc.set.call(el, val); } else { el.value = val; }
    try {
      var tracker = el._valueTracker;
      if (tracker && tracker.setValue) tracker.setValue(last);
    } catch (e) {}
  }
  ['keydown', 'keypress', 'input', 'keyup', 'change', 'blur'].forEach(function (n) {
    try { el.dispatchEvent(new Event(n, { bubbles: true })); } catch (e) {}
  });
  try { el.dispatchEvent(new KeyboardEvent('keyup', { bubbles: true })); } catch (e) {}
  return ('value' in el) ? String(el.value) : (el.innerText || '');
}"#;

const DRAG_AND_DROP: &str = r#"function (src, dst) {
  if (!src || !dst) return false;
  var center = function (e) { var r = e.getBoundingClientRect(); return { x: r.left + r.width / 2, y: r.top + r.height / 2 }; };
  var a = center(src), b = center(dst);
  var dt = null;
  try { dt = new DataTransfer(); } catch (e) {}
  var mouse = function (el, type, p) {
    el.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, clientX: p.x, clientY: p.y, buttons: 1 }));
  };
  var drag = function (el, type, p) {
    var ev;
    try { ev = new DragEvent(type, { bubbles: true, cancelable: true, clientX: p.x, clientY: p.y, dataTransfer: dt }); }
    catch (e) { ev = new Event(type, { bubbles: true, cancelable: true }); }
    el.dispatchEvent(ev);
  };
  mouse(src, 'mousedown', a);
  drag(src, 'dragstart', a);
  drag(src, 'drag', a);
  mouse(dst, 'mousemove', b);
  drag(dst, 'dragenter', b);
  drag(dst, 'dragover', b);
  drag(dst, 'drop', b);
  mouse(dst, 'mouseup', b);
  drag(src, 'dragend', b);
  return true;
}"#;

/// Runs click/type/key/pointer/scroll/history operations against a session.
#[derive(Debug, Clone)]
pub struct Engine {
    diagnostics: Diagnostics,
}

impl Engine {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self { diagnostics }
    }

    /// Native click with a scripted fallback. Accepts stray dialogs and
    /// adopts a tab the click opened.
    pub fn click(
        &self,
        session: &mut BrowserSession,
        element: &ResolvedElement,
    ) -> BrowserResult<ClickOutcome> {
        session.accept_alert();
        let before = session.tab_ids()?;

        let native = click_target(session, element).and_then(|point| {
            session.tab().click_point(point)?;
            Ok(())
        });
        let method = match native {
            Ok(()) => ClickMethod::Native,
            Err(e) => {
                debug!("Native click on {} failed ({e}), trying script click", element.label);
                if script_click(session, element)? {
                    ClickMethod::Script
                } else {
                    return Err(BrowserError::ClickFailed {
                        target: element.label.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        };
        sleep(CLICK_SETTLE);

        session.accept_alert();
        let switched = adopt_new_context(session, &before);
        if switched {
            session.accept_alert();
        }

        Ok(ClickOutcome {
            method,
            switched_to_new_context: switched,
        })
    }

    /// Enter text into a field through the [`INPUT_STRATEGIES`] cascade.
    pub fn type_text(
        &self,
        session: &mut BrowserSession,
        element: &ResolvedElement,
        text: &str,
    ) -> BrowserResult<TypeOutcome> {
        if is_enter_key(text) {
            debug!("Text is the Enter key, sending it directly");
            self.send_key(session, element, "Enter")?;
            return Ok(TypeOutcome::EnterSent);
        }

        scroll_into_view(session, element);
        wait_interactable(session, element);

        let mut readback = String::new();
        for strategy in INPUT_STRATEGIES {
            match apply_strategy(session, element, text, strategy) {
                Ok(value) if value == text => {
                    info!("Text entered into {} via {}", element.label, strategy.name());
                    return Ok(TypeOutcome::Typed(strategy));
                }
                Ok(value) => {
                    debug!(
                        "{} left '{value}' in {}, falling back",
                        strategy.name(),
                        element.label
                    );
                    readback = value;
                }
                Err(e) => debug!("{} failed on {}: {e}", strategy.name(), element.label),
            }
        }

        let FailureArtifacts { screenshot, markup } =
            self.diagnostics.capture_input_failure(session, element);
        warn!(
            ?screenshot,
            ?markup,
            "Every input strategy failed for {}",
            element.label
        );
        Err(BrowserError::InputExhausted {
            target: element.label.clone(),
            readback,
        })
    }

    /// Focus the element and press a named key.
    pub fn send_key(
        &self,
        session: &BrowserSession,
        element: &ResolvedElement,
        key: &str,
    ) -> BrowserResult<()> {
        let key = key_name(key);
        let key_failed = |reason: String| BrowserError::KeyFailed {
            target: element.label.clone(),
            key: key.to_string(),
            reason,
        };

        if !focus(session, element)? {
            return Err(key_failed("element is gone".into()));
        }
        session
            .tab()
            .press_key(key)
            .map_err(|e| key_failed(format!("{e:#}")))?;
        sleep(KEY_SETTLE);
        Ok(())
    }

    /// Pause between typing and a trailing Enter so input handlers settle.
    pub fn send_enter_after_typing(
        &self,
        session: &BrowserSession,
        element: &ResolvedElement,
    ) -> BrowserResult<()> {
        sleep(ENTER_DELAY);
        self.send_key(session, element, "Enter")
    }

    pub fn move_pointer(
        &self,
        session: &mut BrowserSession,
        target: &PointerTarget,
    ) -> BrowserResult<Point> {
        let point = match target {
            PointerTarget::Coordinates { x, y } => Point {
                x: *x as f64,
                y: *y as f64,
            },
            PointerTarget::Selector(css) => {
                let element = locator::resolve(
                    session,
                    &ElementQuery::Selector(css.clone()),
                    SearchScope::MainDocument,
                )?;
                center(session, &element)?
            }
        };
        session.tab().move_mouse_to_point(point)?;
        sleep(POINTER_SETTLE);
        Ok(point)
    }

    /// Apply a scroll command to the top-level window. `Noop` reports
    /// `applied: false` instead of failing.
    pub fn scroll(
        &self,
        session: &mut BrowserSession,
        command: &ScrollCommand,
    ) -> BrowserResult<ScrollOutcome> {
        let before = scroll_position(session)?;
        let script = match command {
            ScrollCommand::IntoView(css) => {
                let element = locator::resolve(
                    session,
                    &ElementQuery::Selector(css.clone()),
                    SearchScope::MainDocument,
                )?;
                format!(
                    "(function(){{ var el = {}; if (el) el.scrollIntoView({{block:'center', inline:'center'}}); }})()",
                    element.expr()
                )
            }
            ScrollCommand::By { dx, dy } => format!("window.scrollBy({dx}, {dy})"),
            ScrollCommand::Top => "window.scrollTo(0, 0)".to_string(),
            ScrollCommand::Bottom => "window.scrollTo(0, document.body.scrollHeight || document.documentElement.scrollHeight)".to_string(),
            ScrollCommand::Noop => {
                debug!("Unrecognised scroll arguments, nothing to do");
                return Ok(ScrollOutcome {
                    before,
                    after: before,
                    applied: false,
                });
            }
        };
        session.eval(&script)?;
        let after = scroll_position(session)?;
        Ok(ScrollOutcome {
            before,
            after,
            applied: true,
        })
    }

    /// Back/forward through session history. The ready-state wait is best-effort.
    pub fn navigate_history(
        &self,
        session: &mut BrowserSession,
        direction: HistoryDirection,
    ) -> BrowserResult<()> {
        session.reset_frame();
        let script = match direction {
            HistoryDirection::Back => "history.back()",
            HistoryDirection::Forward => "history.forward()",
        };
        session.eval(script)?;
        sleep(KEY_SETTLE);
        session.wait_ready(READY_WAIT);
        Ok(())
    }

    /// Close the active tab; the session moves to the most recently listed remaining one.
    pub fn close_active_context(&self, session: &mut BrowserSession) -> BrowserResult<()> {
        session.close_active()?;
        session.wait_ready(READY_WAIT);
        Ok(())
    }

    pub fn drag_and_drop(
        &self,
        session: &mut BrowserSession,
        source_css: &str,
        target_css: &str,
    ) -> BrowserResult<()> {
        let source = locator::resolve(
            session,
            &ElementQuery::Selector(source_css.to_string()),
            SearchScope::MainDocument,
        )?;
        let target = locator::resolve(
            session,
            &ElementQuery::Selector(target_css.to_string()),
            SearchScope::MainDocument,
        )?;

        if let Ok(from) = center(session, &source) {
            if let Err(e) = session.tab().move_mouse_to_point(from) {
                debug!("Pointer move to drag source failed: {e:#}");
            }
        }
        let script = format!("({DRAG_AND_DROP})({}, {})", source.expr(), target.expr());
        match session.eval(&script)? {
            Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::NotFound(format!(
                "drag source '{source_css}' or target '{target_css}'"
            ))),
        }
    }
}

fn apply_strategy(
    session: &BrowserSession,
    element: &ResolvedElement,
    text: &str,
    strategy: InputStrategy,
) -> BrowserResult<String> {
    match strategy {
        InputStrategy::NativeKeys => {
            clear(session, element)?;
            if !focus(session, element)? {
                return Err(BrowserError::NotFound(element.label.clone()));
            }
            session.tab().type_str(text)?;
            sleep(TYPE_SETTLE);
            read_value(session, element)
        }
        InputStrategy::PointerThenKeys => {
            let point = click_target(session, element)?;
            session.tab().move_mouse_to_point(point)?;
            session.tab().click_point(point)?;
            clear(session, element)?;
            session.tab().type_str(text)?;
            sleep(TYPE_SETTLE);
            read_value(session, element)
        }
        InputStrategy::ScriptAssign => script_assign(session, element, text),
    }
}

fn script_assign(
    session: &BrowserSession,
    element: &ResolvedElement,
    text: &str,
) -> BrowserResult<String> {
    let script = format!("({SCRIPT_ASSIGN})({}, {})", element.expr(), js_literal(text));
    let mut last = Err(BrowserError::NotFound(element.label.clone()));

    for attempt in 1..=SCRIPT_RETRY_ATTEMPTS {
        match session.eval(&script) {
            Ok(Value::String(value)) => {
                debug!("Scripted set attempt {attempt}, readback '{value}'");
                if value == text {
                    return Ok(value);
                }
                last = Ok(value);
            }
            Ok(_) => last = Err(BrowserError::NotFound(element.label.clone())),
            Err(e) => {
                debug!("Scripted set attempt {attempt} failed: {e}");
                last = Err(e);
            }
        }
        sleep(SCRIPT_RETRY_BACKOFF);
    }
    last
}

/// Scroll the element to the middle of the viewport and measure its box in
/// top-level viewport coordinates, with a hit test at its centre.
fn measure(session: &BrowserSession, element: &ResolvedElement) -> BrowserResult<BoxCenter> {
    let script = format!(
        "(function(){{ var el = {el}; if (!el) return JSON.stringify(null); \
         try {{ el.scrollIntoView({{block:'center', inline:'center'}}); }} catch (e) {{}} \
         var r = el.getBoundingClientRect(); var o = {offset}; \
         var cx = r.left + r.width / 2, cy = r.top + r.height / 2; \
         var top = el.ownerDocument.elementFromPoint(cx, cy); \
         return JSON.stringify({{x: o.left + cx, y: o.top + cy, width: r.width, height: r.height, \
         hit: !!top && (top === el || el.contains(top))}}); }})()",
        el = element.expr(),
        offset = element.frame.offset_expr(),
    );
    let found: Option<BoxCenter> = session.eval_json(&script)?;
    found.ok_or_else(|| BrowserError::NotFound(element.label.clone()))
}

/// Centre of the element, covered or not. For pointer moves.
fn center(session: &BrowserSession, element: &ResolvedElement) -> BrowserResult<Point> {
    measure(session, element)?.point(&element.label)
}

/// Centre of the element, only when a pointer click there would reach it.
fn click_target(session: &BrowserSession, element: &ResolvedElement) -> BrowserResult<Point> {
    measure(session, element)?.click_point(&element.label)
}

fn element_call(element: &ResolvedElement, body: &str) -> String {
    format!(
        "(function(){{ var el = {}; if (!el) return null; {body} }})()",
        element.expr()
    )
}

fn script_click(session: &BrowserSession, element: &ResolvedElement) -> BrowserResult<bool> {
    let value = session.eval(&element_call(element, "el.click(); return true;"))?;
    Ok(value == Value::Bool(true))
}

fn focus(session: &BrowserSession, element: &ResolvedElement) -> BrowserResult<bool> {
    let value = session.eval(&element_call(element, "el.focus(); return true;"))?;
    Ok(value == Value::Bool(true))
}

fn clear(session: &BrowserSession, element: &ResolvedElement) -> BrowserResult<()> {
    session.eval(&element_call(
        element,
        "if ('value' in el) { el.value = ''; } else if (el.isContentEditable) { el.textContent = ''; } \
         return true;",
    ))?;
    Ok(())
}

fn read_value(session: &BrowserSession, element: &ResolvedElement) -> BrowserResult<String> {
    match session.eval(&element_call(
        element,
        "return ('value' in el) ? String(el.value) : (el.innerText || '');",
    ))? {
        Value::String(value) => Ok(value),
        _ => Err(BrowserError::NotFound(element.label.clone())),
    }
}

fn scroll_into_view(session: &BrowserSession, element: &ResolvedElement) {
    let script = element_call(
        element,
        "el.scrollIntoView({block:'center', inline:'center'}); return true;",
    );
    if let Err(e) = session.eval(&script) {
        debug!("scrollIntoView failed: {e}");
    }
}

// Bounded wait for displayed + enabled; a timeout is not an error.
fn wait_interactable(session: &BrowserSession, element: &ResolvedElement) {
    let script = element_call(
        element,
        "var shown = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length); \
         return shown && !el.disabled;",
    );
    let ready = poll(ELEMENT_WAIT, ELEMENT_POLL, || {
        matches!(session.eval(&script), Ok(Value::Bool(true))).then_some(())
    });
    if ready.is_none() {
        debug!("{} not displayed/enabled after {ELEMENT_WAIT:?}", element.label);
    }
}

fn scroll_position(session: &BrowserSession) -> BrowserResult<ScrollPosition> {
    session.eval_json("JSON.stringify({x: window.scrollX, y: window.scrollY})")
}

// After a click: if a tab appeared, make it active and let it load.
fn adopt_new_context(session: &mut BrowserSession, before: &[String]) -> bool {
    let opened = poll(NEW_CONTEXT_WAIT, NEW_CONTEXT_POLL, || {
        session
            .tabs()
            .ok()?
            .into_iter()
            .find(|tab| !before.iter().any(|id| id == tab.get_target_id()))
    });
    match opened {
        Some(tab) => {
            info!("Click opened a new tab, switching to it");
            session.switch_to(tab);
            session.wait_ready(NEW_CONTEXT_WAIT);
            true
        }
        None => false,
    }
}

/// Map loose key names onto the driver's key table.
pub fn key_name(key: &str) -> &str {
    match key.trim().to_ascii_lowercase().as_str() {
        "enter" | "return" | "\n" | "{enter}" => "Enter",
        "tab" => "Tab",
        "esc" | "escape" => "Escape",
        "backspace" => "Backspace",
        "space" => " ",
        _ => key,
    }
}
