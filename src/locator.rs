//! Element Locator.
//!
//! Resolution runs page scripts that *collect* candidate descriptors and
//! stamp each one with a [`REF_ATTR`] token; choosing between candidates is
//! done here in plain Rust so the heuristics can be tested without a browser.
//!
//! Strategy order, first success wins:
//! 1. explicit selector (no text fallback)
//! 2. exact own-text match
//! 3. contained own-text match, natively clickable elements preferred
//! 4. field-descriptor scoring over `<input>`/`<textarea>`
//! 5. the same search inside each iframe, for content-affecting tools

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::errors::{BrowserError, BrowserResult};
use crate::hands::{BrowserSession, FrameContext, REF_ATTR, js_literal};
use crate::query::ElementQuery;

/// Whether a miss in the main document should be retried inside iframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    MainDocument,
    WithFrames,
}

/// A live element for the duration of one tool call. Never cache it across
/// steps: the page may have navigated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    pub reference: String,
    pub frame: FrameContext,
    pub tag: String,
    /// Human-readable address used in result strings and errors.
    pub label: String,
}

impl ResolvedElement {
    /// CSS selector for the element inside its own document.
    pub fn selector(&self) -> String {
        format!("[{REF_ATTR}=\"{}\"]", self.reference)
    }

    /// JS expression evaluating to the element, or `null` once it is gone.
    pub fn expr(&self) -> String {
        format!(
            "(function(){{ var d = {doc}; return d ? d.querySelector({sel}) : null; }})()",
            doc = self.frame.document_expr(),
            sel = js_literal(&self.selector()),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SelectorHit {
    #[serde(rename = "ref")]
    reference: Option<String>,
    tag: Option<String>,
    error: Option<String>,
}

/// Element whose own text contains the query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextCandidate {
    #[serde(rename = "ref")]
    pub reference: String,
    pub tag: String,
    pub text: String,
    pub clickable: bool,
}

/// Everything the field scorer looks at for one `<input>`/`<textarea>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FieldCandidate {
    #[serde(rename = "ref")]
    pub reference: String,
    pub tag: String,
    pub placeholder: String,
    pub name: String,
    pub id: String,
    pub aria_label: String,
    /// `<label for=id>` text, or the wrapping `<label>`.
    pub label: String,
    pub sibling_text: String,
    pub preceding_label: String,
    pub value: String,
    pub multiline: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageCandidate {
    #[serde(rename = "ref")]
    pub reference: String,
    pub alt: String,
}

const SELECTOR_COLLECTOR: &str = r#"function (doc, attr, base, selector) {
  if (!doc) return JSON.stringify({});
  var el;
  try { el = doc.querySelector(selector); } catch (e) { return JSON.stringify({ error: String(e) }); }
  if (!el) return JSON.stringify({});
  var ref = base + '-0';
  el.setAttribute(attr, ref);
  return JSON.stringify({ ref: ref, tag: el.tagName.toLowerCase() });
}"#;

const TEXT_COLLECTOR: &str = r#"function (doc, attr, base, query) {
  if (!doc || !doc.body) return JSON.stringify([]);
  doc.querySelectorAll('[' + attr + ']').forEach(function (e) { e.removeAttribute(attr); });
  var norm = function (s) { return (s || '').replace(/\s+/g, ' ').trim(); };
  var q = norm(query).toLowerCase();
  var out = [];
  var all = doc.body.querySelectorAll('*');
  for (var i = 0; i < all.length; i++) {
    var el = all[i];
    var tag = el.tagName.toLowerCase();
    if (tag === 'script' || tag === 'style' || tag === 'noscript') continue;
    var own = '';
    for (var c = el.firstChild; c; c = c.nextSibling) { if (c.nodeType === 3) own += c.nodeValue; }
    if (tag === 'input' && /^(submit|button|reset)$/i.test(el.type || '')) own = el.value;
    own = norm(own);
    if (!own || own.toLowerCase().indexOf(q) < 0) continue;
    if (out.length >= 200 && own.toLowerCase() !== q) continue;
    var ref = base + '-' + out.length;
    el.setAttribute(attr, ref);
    var role = el.getAttribute('role');
    var clickable = /^(a|button|input|select|textarea|summary|option|label)$/.test(tag)
      || role === 'button' || role === 'link' || el.hasAttribute('onclick');
    out.push({ ref: ref, tag: tag, text: own.slice(0, 500), clickable: clickable });
  }
  return JSON.stringify(out);
}"#;

const FIELD_COLLECTOR: &str = r#"function (doc, attr, base, _query) {
  if (!doc) return JSON.stringify([]);
  doc.querySelectorAll('[' + attr + ']').forEach(function (e) { e.removeAttribute(attr); });
  var norm = function (s) { return (s || '').replace(/\s+/g, ' ').trim().slice(0, 120); };
  var labels = Array.prototype.slice.call(doc.querySelectorAll('label'));
  var out = [];
  doc.querySelectorAll('input, textarea').forEach(function (el, i) {
    var ref = base + '-' + i;
    el.setAttribute(attr, ref);
    var label = '';
    if (el.id) {
      var forLabel = null;
      try { forLabel = doc.querySelector('label[for="' + CSS.escape(el.id) + '"]'); } catch (e) {}
      if (forLabel) label = forLabel.innerText || forLabel.textContent;
    }
    if (!label) {
      var wrap = el.closest('label');
      if (wrap) label = wrap.innerText || wrap.textContent;
    }
    var sibling = '';
    for (var n = el.previousSibling, hops = 0; n && hops < 4 && !sibling; n = n.previousSibling, hops++) {
      sibling = norm(n.textContent);
    }
    var preceding = '';
    for (var j = labels.length - 1; j >= 0; j--) {
      var l = labels[j];
      if (l.htmlFor || l.contains(el)) continue;
      if (l.compareDocumentPosition(el) & Node.DOCUMENT_POSITION_FOLLOWING) {
        preceding = l.innerText || l.textContent;
        break;
      }
    }
    out.push({
      ref: ref,
      tag: el.tagName.toLowerCase(),
      placeholder: norm(el.getAttribute('placeholder')),
      name: norm(el.getAttribute('name')),
      id: norm(el.id),
      aria_label: norm(el.getAttribute('aria-label')),
      label: norm(label),
      sibling_text: sibling,
      preceding_label: norm(preceding),
      value: String(el.value || ''),
      multiline: el.tagName === 'TEXTAREA'
    });
  });
  return JSON.stringify(out);
}"#;

const IMAGE_COLLECTOR: &str = r#"function (doc, attr, base, _query) {
  if (!doc) return JSON.stringify([]);
  doc.querySelectorAll('[' + attr + ']').forEach(function (e) { e.removeAttribute(attr); });
  var out = [];
  doc.querySelectorAll('img').forEach(function (el, i) {
    if (i >= 500) return;
    var ref = base + '-' + i;
    el.setAttribute(attr, ref);
    out.push({ ref: ref, alt: el.getAttribute('alt') || '' });
  });
  return JSON.stringify(out);
}"#;

/// Resolve `query` against the active tab.
///
/// On success the session's frame context is left pointing at the document
/// the element lives in, so the caller's next engine call runs there. On
/// failure the session is back on the main document.
pub fn resolve(
    session: &mut BrowserSession,
    query: &ElementQuery,
    scope: SearchScope,
) -> BrowserResult<ResolvedElement> {
    session.reset_frame();
    if let Some(found) = resolve_in_current(session, query)? {
        debug!("Resolved {} in main document", query.describe());
        return Ok(found);
    }

    if scope == SearchScope::WithFrames {
        let frames = frame_count(session)?;
        for index in 0..frames {
            session.enter_frame(index);
            match resolve_in_current(session, query) {
                Ok(Some(found)) => {
                    info!("Resolved {} inside iframe #{index}", query.describe());
                    return Ok(found);
                }
                Ok(None) => {}
                Err(e) => debug!("Frame #{index} search failed: {e}"),
            }
            session.reset_frame();
        }
    }

    Err(BrowserError::NotFound(query.describe()))
}

fn frame_count(session: &BrowserSession) -> BrowserResult<usize> {
    let count = session.eval("document.querySelectorAll('iframe').length")?;
    Ok(count.as_u64().unwrap_or(0) as usize)
}

fn collect<T: DeserializeOwned>(
    session: &mut BrowserSession,
    collector: &str,
    query: &str,
) -> BrowserResult<T> {
    let base = session.next_ref();
    let script = format!(
        "({collector})({doc}, {attr}, {base}, {query})",
        doc = session.frame().document_expr(),
        attr = js_literal(REF_ATTR),
        base = js_literal(&base),
        query = js_literal(query),
    );
    session.eval_json(&script)
}

fn resolve_in_current(
    session: &mut BrowserSession,
    query: &ElementQuery,
) -> BrowserResult<Option<ResolvedElement>> {
    let frame = session.frame();
    let found = |reference: String, tag: String| ResolvedElement {
        reference,
        frame,
        tag,
        label: query.describe(),
    };

    match query {
        ElementQuery::Selector(css) => {
            let hit = by_selector(session, css)?;
            Ok(hit.map(|(reference, tag)| found(reference, tag)))
        }
        ElementQuery::ImageId(id) => {
            let css = format!("[id=\"{}\"]", css_attr_escape(id));
            let hit = by_selector(session, &css)?;
            Ok(hit.map(|(reference, tag)| found(reference, tag)))
        }
        ElementQuery::Text(text) => {
            let candidates: Vec<TextCandidate> = collect(session, TEXT_COLLECTOR, text)?;
            Ok(pick_text_candidate(&candidates, text).map(|i| {
                let c = &candidates[i];
                found(c.reference.clone(), c.tag.clone())
            }))
        }
        ElementQuery::Field(field) => {
            let candidates: Vec<FieldCandidate> = collect(session, FIELD_COLLECTOR, field)?;
            Ok(pick_field(&candidates, field).map(|i| {
                let c = &candidates[i];
                found(c.reference.clone(), c.tag.clone())
            }))
        }
        ElementQuery::ImageAlt(alt) => {
            let candidates: Vec<ImageCandidate> = collect(session, IMAGE_COLLECTOR, alt)?;
            Ok(pick_image_by_alt(&candidates, alt).map(|i| {
                found(candidates[i].reference.clone(), "img".to_string())
            }))
        }
    }
}

fn by_selector(session: &mut BrowserSession, css: &str) -> BrowserResult<Option<(String, String)>> {
    let hit: SelectorHit = collect(session, SELECTOR_COLLECTOR, css)?;
    if let Some(error) = hit.error {
        return Err(BrowserError::InvalidArgs(format!(
            "'{css}' is not a valid CSS selector: {error}"
        )));
    }
    Ok(hit.reference.map(|r| (r, hit.tag.unwrap_or_default())))
}

pub fn css_attr_escape(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Whitespace-collapsed, lowercased text.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Exact own-text match first; otherwise the first clickable substring
/// match, otherwise the first substring match.
pub fn pick_text_candidate(candidates: &[TextCandidate], query: &str) -> Option<usize> {
    let q = normalize_text(query);
    if q.is_empty() {
        return None;
    }

    let normalized: Vec<String> = candidates.iter().map(|c| normalize_text(&c.text)).collect();
    if let Some(exact) = normalized.iter().position(|t| *t == q) {
        return Some(exact);
    }

    let contained: Vec<usize> = normalized
        .iter()
        .enumerate()
        .filter(|(_, t)| t.contains(&q))
        .map(|(i, _)| i)
        .collect();
    contained
        .iter()
        .copied()
        .find(|&i| candidates[i].clickable)
        .or_else(|| contained.first().copied())
}

const EXACT_FACTOR: u32 = 6;
const CONTAINS_FACTOR: u32 = 2;
const EMPTY_VALUE_BONUS: u32 = 1;
const MULTILINE_BONUS: u32 = 1;

/// Match score of one field. Orders on `base` first; `bonus` only decides
/// between fields with equal base scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FieldScore {
    /// Weighted attribute matches. Zero means "unrelated".
    pub base: u32,
    /// Empty value and multi-line bonuses; zero whenever `base` is.
    pub bonus: u32,
}

impl FieldScore {
    pub fn is_related(&self) -> bool {
        self.base > 0
    }
}

/// Weighted match score of one field against a description.
pub fn score_field(candidate: &FieldCandidate, query: &str) -> FieldScore {
    let q = normalize_text(query);
    if q.is_empty() {
        return FieldScore::default();
    }

    let sources: [(&str, u32); 7] = [
        (&candidate.label, 4),
        (&candidate.aria_label, 4),
        (&candidate.placeholder, 3),
        (&candidate.name, 3),
        (&candidate.id, 3),
        (&candidate.sibling_text, 2),
        (&candidate.preceding_label, 2),
    ];

    let base: u32 = sources
        .iter()
        .map(|(text, weight)| {
            let t = normalize_text(text);
            if t.is_empty() {
                0
            } else if t == q {
                weight * EXACT_FACTOR
            } else if t.contains(&q) {
                weight * CONTAINS_FACTOR
            } else {
                0
            }
        })
        .sum();

    if base == 0 {
        return FieldScore::default();
    }

    let mut bonus = 0;
    if candidate.value.is_empty() {
        bonus += EMPTY_VALUE_BONUS;
    }
    if candidate.multiline {
        bonus += MULTILINE_BONUS;
    }
    FieldScore { base, bonus }
}

/// Highest-scoring related field; ties go to the first seen.
pub fn pick_field(candidates: &[FieldCandidate], query: &str) -> Option<usize> {
    let mut best: Option<(usize, FieldScore)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let score = score_field(candidate, query);
        if !score.is_related() {
            continue;
        }
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// First image whose alt text contains the query, ignoring case.
pub fn pick_image_by_alt(candidates: &[ImageCandidate], query: &str) -> Option<usize> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return None;
    }
    candidates
        .iter()
        .position(|c| c.alt.to_lowercase().contains(&q))
}
