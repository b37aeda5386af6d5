//! Argument grammars shared by the tools.
//!
//! Every tool receives a single raw string from the planner. The small
//! prefix grammar (`selector:`, `id:`, `by:`, `x:`/`y:`, `to:top`) is parsed
//! here into typed values before anything touches the page.

use crate::errors::{BrowserError, BrowserResult};

const SELECTOR_PREFIX: &str = "selector:";
const ID_PREFIX: &str = "id:";
const BY_PREFIX: &str = "by:";

/// Case-insensitive `strip_prefix`.
pub fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// What the locator is asked to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementQuery {
    /// Exact CSS address; no fallback when absent.
    Selector(String),
    /// Visible text, matched exactly first and then as a substring.
    Text(String),
    /// Loose description of an input field (label, placeholder, name...).
    Field(String),
    /// `<img>` by id.
    ImageId(String),
    /// `<img>` whose alt text contains the query.
    ImageAlt(String),
}

impl ElementQuery {
    /// `selector:<css>` or free text.
    pub fn for_click(raw: &str) -> BrowserResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BrowserError::InvalidArgs(
                "No selector provided. Use 'selector:<css>' or the element's visible text.".into(),
            ));
        }
        Ok(match strip_prefix_ci(raw, SELECTOR_PREFIX) {
            Some(css) => ElementQuery::Selector(css.trim().to_string()),
            None => ElementQuery::Text(raw.to_string()),
        })
    }

    /// `selector:<css>` or a field description.
    pub fn for_field(raw: &str) -> BrowserResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BrowserError::InvalidArgs("Empty field query.".into()));
        }
        Ok(match strip_prefix_ci(raw, SELECTOR_PREFIX) {
            Some(css) => ElementQuery::Selector(css.trim().to_string()),
            None => ElementQuery::Field(raw.to_string()),
        })
    }

    /// `id:<id>` or alt-text substring.
    pub fn for_image(raw: &str) -> BrowserResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BrowserError::InvalidArgs(
                "No arguments provided. Use 'alt text' or 'id:imageId'.".into(),
            ));
        }
        Ok(match strip_prefix_ci(raw, ID_PREFIX) {
            Some(id) => ElementQuery::ImageId(id.trim().to_string()),
            None => ElementQuery::ImageAlt(raw.to_string()),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            ElementQuery::Selector(css) => format!("selector '{css}'"),
            ElementQuery::Text(text) => format!("text '{text}'"),
            ElementQuery::Field(field) => format!("field '{field}'"),
            ElementQuery::ImageId(id) => format!("image id '{id}'"),
            ElementQuery::ImageAlt(alt) => format!("image alt '{alt}'"),
        }
    }
}

/// Parsed `input-text` arguments: `<fieldQuery>|<text>[|enter=true]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArgs {
    pub field: ElementQuery,
    pub field_raw: String,
    pub text: String,
    pub send_enter: bool,
}

impl InputArgs {
    pub fn parse(raw: &str) -> BrowserResult<Self> {
        if raw.trim().is_empty() {
            return Err(BrowserError::InvalidArgs(
                "No arguments provided. Use 'fieldName|text' or 'selector:cssSelector|text'."
                    .into(),
            ));
        }

        let mut parts = raw.splitn(3, '|');
        let field_raw = parts.next().unwrap_or_default().trim().to_string();
        let Some(text) = parts.next() else {
            return Err(BrowserError::InvalidArgs(
                "Invalid arguments. Use 'fieldName|text'.".into(),
            ));
        };
        let send_enter = parts
            .next()
            .map(|opt| opt.trim().eq_ignore_ascii_case("enter=true"))
            .unwrap_or(false);

        Ok(Self {
            field: ElementQuery::for_field(&field_raw)?,
            field_raw,
            text: text.to_string(),
            send_enter,
        })
    }
}

/// Where `move-pointer` should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTarget {
    Coordinates { x: i64, y: i64 },
    Selector(String),
}

impl PointerTarget {
    pub fn parse(raw: &str) -> BrowserResult<Self> {
        let raw = raw.trim();
        let usage = "Use 'x:100|y:200' or 'selector:cssSelector'.";
        if raw.is_empty() {
            return Err(BrowserError::InvalidArgs(format!(
                "No arguments provided. {usage}"
            )));
        }

        let lower = raw.to_ascii_lowercase();
        if lower.contains("x:") && lower.contains("y:") {
            let (mut x, mut y) = (0, 0);
            for part in raw.split('|').map(str::trim) {
                if let Some(v) = strip_prefix_ci(part, "x:") {
                    x = v.trim().parse().unwrap_or(x);
                } else if let Some(v) = strip_prefix_ci(part, "y:") {
                    y = v.trim().parse().unwrap_or(y);
                }
            }
            return Ok(PointerTarget::Coordinates { x, y });
        }

        match strip_prefix_ci(raw, SELECTOR_PREFIX) {
            Some(css) if !css.trim().is_empty() => Ok(PointerTarget::Selector(css.trim().into())),
            _ => Err(BrowserError::InvalidArgs(format!("Invalid arguments. {usage}"))),
        }
    }
}

/// The scroll grammar. Unrecognised input is a no-op, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollCommand {
    IntoView(String),
    By { dx: i64, dy: i64 },
    Top,
    Bottom,
    Noop,
}

impl ScrollCommand {
    pub fn parse(raw: &str) -> Self {
        let q = raw.trim();

        if let Some(css) = strip_prefix_ci(q, SELECTOR_PREFIX) {
            let css = css.trim();
            return if css.is_empty() {
                ScrollCommand::Noop
            } else {
                ScrollCommand::IntoView(css.to_string())
            };
        }

        let lower = q.to_ascii_lowercase();
        let by = strip_prefix_ci(q, BY_PREFIX);
        if by.is_some() || (lower.contains("x:") && lower.contains("y:")) {
            return parse_offsets(by.unwrap_or(q));
        }

        if lower == "to:top" {
            return ScrollCommand::Top;
        }
        if lower == "to:bottom" {
            return ScrollCommand::Bottom;
        }

        match q.parse::<i64>() {
            Ok(amount) => ScrollCommand::By { dx: 0, dy: amount },
            Err(_) => ScrollCommand::Noop,
        }
    }
}

// Labelled `x:`/`y:` parts win; bare numbers are positional (dx, dy), and a
// lone bare number is vertical.
fn parse_offsets(body: &str) -> ScrollCommand {
    let (mut dx, mut dy) = (None, None);
    let mut bare = Vec::new();

    for part in body.split('|').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(v) = strip_prefix_ci(part, "x:") {
            dx = v.trim().parse().ok().or(dx);
        } else if let Some(v) = strip_prefix_ci(part, "y:") {
            dy = v.trim().parse().ok().or(dy);
        } else if let Ok(v) = part.parse::<i64>() {
            bare.push(v);
        }
    }

    let (bare_dx, bare_dy) = match bare.as_slice() {
        [] => (0, 0),
        [only] => (0, *only),
        [first, second, ..] => (*first, *second),
    };

    ScrollCommand::By {
        dx: dx.unwrap_or(bare_dx),
        dy: dy.unwrap_or(bare_dy),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    Back,
    Forward,
}

impl HistoryDirection {
    pub fn parse(raw: &str) -> BrowserResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "back" => Ok(HistoryDirection::Back),
            "forward" => Ok(HistoryDirection::Forward),
            _ => Err(BrowserError::InvalidArgs(
                "Invalid arguments. Use 'back' or 'forward'.".into(),
            )),
        }
    }
}

/// `<sourceSelector>|<targetSelector>`; a `selector:` prefix on either side is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragArgs {
    pub source: String,
    pub target: String,
}

impl DragArgs {
    pub fn parse(raw: &str) -> BrowserResult<Self> {
        let usage = "Use 'sourceSelector|targetSelector'.";
        let mut parts = raw.splitn(2, '|').map(|p| {
            let p = p.trim();
            strip_prefix_ci(p, SELECTOR_PREFIX).unwrap_or(p).trim().to_string()
        });
        match (parts.next(), parts.next()) {
            (Some(source), Some(target)) if !source.is_empty() && !target.is_empty() => {
                Ok(Self { source, target })
            }
            _ => Err(BrowserError::InvalidArgs(format!("Invalid arguments. {usage}"))),
        }
    }
}

/// Whether `text` stands for the logical Enter key rather than literal input.
pub fn is_enter_key(text: &str) -> bool {
    matches!(text, "\n" | "\r" | "\r\n" | "\u{E007}") || text.trim().eq_ignore_ascii_case("{enter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_query_prefixes() {
        assert_eq!(
            ElementQuery::for_click("selector: #login ").unwrap(),
            ElementQuery::Selector("#login".into())
        );
        assert_eq!(
            ElementQuery::for_click("SELECTOR:a.more").unwrap(),
            ElementQuery::Selector("a.more".into())
        );
        assert_eq!(
            ElementQuery::for_click("Sign in").unwrap(),
            ElementQuery::Text("Sign in".into())
        );
        assert!(ElementQuery::for_click("   ").is_err());
    }

    #[test]
    fn image_query_prefixes() {
        assert_eq!(
            ElementQuery::for_image("id:logo").unwrap(),
            ElementQuery::ImageId("logo".into())
        );
        assert_eq!(
            ElementQuery::for_image("company logo").unwrap(),
            ElementQuery::ImageAlt("company logo".into())
        );
    }

    #[test]
    fn input_args_with_selector_and_enter() {
        let args = InputArgs::parse("selector:#search|hello world|enter=true").unwrap();
        assert_eq!(args.field, ElementQuery::Selector("#search".into()));
        assert_eq!(args.text, "hello world");
        assert!(args.send_enter);
    }

    #[test]
    fn input_args_field_description() {
        let args = InputArgs::parse("Email| a@b.c ").unwrap();
        assert_eq!(args.field, ElementQuery::Field("Email".into()));
        // text is taken verbatim
        assert_eq!(args.text, " a@b.c ");
        assert!(!args.send_enter);

        let args = InputArgs::parse("q|rust|enter=false").unwrap();
        assert!(!args.send_enter);
    }

    #[test]
    fn input_args_errors() {
        assert!(InputArgs::parse("").is_err());
        assert!(InputArgs::parse("only-a-field").is_err());
        assert!(InputArgs::parse(" |text").is_err());
    }

    #[test]
    fn pointer_targets() {
        assert_eq!(
            PointerTarget::parse("x:100|y:200").unwrap(),
            PointerTarget::Coordinates { x: 100, y: 200 }
        );
        assert_eq!(
            PointerTarget::parse("y:5|x:7").unwrap(),
            PointerTarget::Coordinates { x: 7, y: 5 }
        );
        assert_eq!(
            PointerTarget::parse("selector:.menu").unwrap(),
            PointerTarget::Selector(".menu".into())
        );
        assert!(PointerTarget::parse("somewhere").is_err());
    }

    #[test]
    fn scroll_grammar() {
        assert_eq!(
            ScrollCommand::parse("by:0|500"),
            ScrollCommand::By { dx: 0, dy: 500 }
        );
        assert_eq!(
            ScrollCommand::parse("by:120|-40"),
            ScrollCommand::By { dx: 120, dy: -40 }
        );
        assert_eq!(
            ScrollCommand::parse("x:100|y:200"),
            ScrollCommand::By { dx: 100, dy: 200 }
        );
        assert_eq!(
            ScrollCommand::parse("by:300"),
            ScrollCommand::By { dx: 0, dy: 300 }
        );
        assert_eq!(ScrollCommand::parse("to:top"), ScrollCommand::Top);
        assert_eq!(ScrollCommand::parse("TO:BOTTOM"), ScrollCommand::Bottom);
        assert_eq!(
            ScrollCommand::parse("-250"),
            ScrollCommand::By { dx: 0, dy: -250 }
        );
        assert_eq!(
            ScrollCommand::parse("selector:#footer"),
            ScrollCommand::IntoView("#footer".into())
        );
        assert_eq!(ScrollCommand::parse("a little"), ScrollCommand::Noop);
        assert_eq!(ScrollCommand::parse(""), ScrollCommand::Noop);
    }

    #[test]
    fn history_direction() {
        assert_eq!(
            HistoryDirection::parse(" Back ").unwrap(),
            HistoryDirection::Back
        );
        assert_eq!(
            HistoryDirection::parse("forward").unwrap(),
            HistoryDirection::Forward
        );
        assert!(HistoryDirection::parse("up").is_err());
    }

    #[test]
    fn drag_args() {
        let args = DragArgs::parse("#card|selector:#done").unwrap();
        assert_eq!(args.source, "#card");
        assert_eq!(args.target, "#done");
        assert!(DragArgs::parse("#card").is_err());
        assert!(DragArgs::parse("#card| ").is_err());
    }

    #[test]
    fn enter_key_forms() {
        assert!(is_enter_key("\n"));
        assert!(is_enter_key("{Enter}"));
        assert!(is_enter_key("\u{E007}"));
        assert!(!is_enter_key("Enter the dragon"));
        assert!(!is_enter_key(""));
    }

    #[test]
    fn prefix_strip_handles_short_and_multibyte_input() {
        assert_eq!(strip_prefix_ci("by", "by:"), None);
        assert_eq!(strip_prefix_ci("로그인", "by:"), None);
        assert_eq!(strip_prefix_ci("By:1", "by:"), Some("1"));
    }
}
