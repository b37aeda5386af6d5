use serde::Deserialize;

use crate::errors::BrowserResult;
use crate::hands::{BrowserSession, js_literal};
use crate::types::{
    DIGEST_MAX_IMAGES, DIGEST_MAX_INPUTS, DIGEST_MAX_SAMPLES, DIGEST_SRC_MAX_CHARS,
    DIGEST_VALUE_MAX_CHARS,
};

/// Page script that gathers everything the digest reports. Takes the login
/// marker text and the per-category caps; counts are always exact.
const DIGEST_JS: &str = r#"function (marker, maxInputs, maxSamples, maxImages) {
  const text = (el) => (el.innerText || el.textContent || '').trim();
  const attr = (el, name) => el.getAttribute(name);

  const inputs = [...document.getElementsByTagName('input')];
  const buttons = [...document.getElementsByTagName('button')];
  const links = [...document.getElementsByTagName('a')];
  const images = [...document.getElementsByTagName('img')];

  const markerHits = [];
  if (marker) {
    const walker = document.createTreeWalker(document.body || document.documentElement, NodeFilter.SHOW_TEXT);
    const seen = new Set();
    while (walker.nextNode() && markerHits.length < maxSamples) {
      const host = walker.currentNode.parentElement;
      if (!host || seen.has(host) || !walker.currentNode.nodeValue.includes(marker)) continue;
      if (host.tagName === 'SCRIPT' || host.tagName === 'STYLE') continue;
      seen.add(host);
      markerHits.push({
        tag: host.tagName.toLowerCase(),
        text: text(host),
        id: attr(host, 'id') || '',
        class_name: attr(host, 'class') || '',
        href: attr(host, 'href') || '',
        has_onclick: host.hasAttribute('onclick'),
      });
    }
  }

  return JSON.stringify({
    title: document.title || '',
    input_count: inputs.length,
    inputs: inputs.slice(0, maxInputs).map((el) => ({
      name: attr(el, 'name'),
      id: attr(el, 'id'),
      input_type: attr(el, 'type'),
      placeholder: attr(el, 'placeholder') || '',
      value: el.value || '',
    })),
    button_count: buttons.length,
    button_texts: buttons.slice(0, maxSamples).map(text).filter((t) => t.length > 0),
    link_count: links.length,
    link_texts: links.map(text).filter((t) => t.length > 0).slice(0, maxSamples),
    marker_hits: markerHits,
    image_count: images.length,
    images: images.slice(0, maxImages).map((el) => ({
      alt: attr(el, 'alt'),
      id: attr(el, 'id') || '',
      title: attr(el, 'title') || '',
      src: attr(el, 'src') || '',
    })),
  });
}"#;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputSummary {
    pub name: Option<String>,
    pub id: Option<String>,
    pub input_type: Option<String>,
    pub placeholder: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarkerHit {
    pub tag: String,
    pub text: String,
    pub id: String,
    pub class_name: String,
    pub href: String,
    pub has_onclick: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageSummary {
    pub alt: Option<String>,
    pub id: String,
    pub title: String,
    pub src: String,
}

/// Raw facts about the current page. Rendering applies the caps, so a
/// snapshot built by hand with oversized lists still renders within bounds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageDigest {
    pub title: String,
    pub input_count: usize,
    pub inputs: Vec<InputSummary>,
    pub button_count: usize,
    pub button_texts: Vec<String>,
    pub link_count: usize,
    pub link_texts: Vec<String>,
    pub marker_hits: Vec<MarkerHit>,
    pub image_count: usize,
    pub images: Vec<ImageSummary>,
}

/// Read the digest facts from the active tab's main document.
pub fn capture_digest(session: &BrowserSession, login_marker: &str) -> BrowserResult<PageDigest> {
    let script = format!(
        "({DIGEST_JS})({}, {DIGEST_MAX_INPUTS}, {DIGEST_MAX_SAMPLES}, {DIGEST_MAX_IMAGES})",
        js_literal(login_marker)
    );
    let mut digest: PageDigest = session.eval_json(&script)?;
    if digest.title.is_empty() {
        digest.title = session.title();
    }
    Ok(digest)
}

/// Render the digest as the text handed to the planner. Every section
/// header is always present; list sections are capped.
pub fn render_digest(digest: &PageDigest, login_marker: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("[Title] {}\n", digest.title));

    out.push_str(&format!("\n[Inputs found: {}]\n", digest.input_count));
    for input in digest.inputs.iter().take(DIGEST_MAX_INPUTS) {
        out.push_str(&format!(
            "  [Input] name='{}' id='{}' type='{}' placeholder='{}' value='{}'\n",
            input.name.as_deref().unwrap_or("(no name)"),
            input.id.as_deref().unwrap_or("(no id)"),
            input.input_type.as_deref().unwrap_or("text"),
            input.placeholder,
            truncate(&input.value, DIGEST_VALUE_MAX_CHARS, "..."),
        ));
    }

    out.push_str("\n[Clickable elements]\n");
    out.push_str(&format!(
        "[Buttons: {}] texts='{}'\n",
        digest.button_count,
        sample(&digest.button_texts)
    ));
    out.push_str(&format!(
        "[Links: {}] texts='{}'\n",
        digest.link_count,
        sample(&digest.link_texts)
    ));

    out.push_str(&format!(
        "\n[Elements containing '{login_marker}': {}]\n",
        digest.marker_hits.len().min(DIGEST_MAX_SAMPLES)
    ));
    for hit in digest.marker_hits.iter().take(DIGEST_MAX_SAMPLES) {
        let mut attrs = String::new();
        if !hit.id.is_empty() {
            attrs.push_str(&format!(" id='{}'", hit.id));
        }
        if !hit.class_name.is_empty() {
            attrs.push_str(&format!(" class='{}'", hit.class_name));
        }
        if !hit.href.is_empty() {
            attrs.push_str(&format!(" href='{}'", hit.href));
        }
        if hit.has_onclick {
            attrs.push_str(" onclick=yes");
        }
        out.push_str(&format!("  [{}] text='{}'{attrs}\n", hit.tag, hit.text));
    }

    out.push_str(&format!("\n[Images: {}]\n", digest.image_count));
    for image in digest.images.iter().take(DIGEST_MAX_IMAGES) {
        out.push_str(&format!(
            "  [Image] alt='{}' id='{}' title='{}' src='{}'\n",
            image.alt.as_deref().unwrap_or("(no alt)"),
            image.id,
            image.title,
            truncate(&image.src, DIGEST_SRC_MAX_CHARS, "..."),
        ));
    }

    out
}

fn sample(texts: &[String]) -> String {
    texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .take(DIGEST_MAX_SAMPLES)
        .collect::<Vec<_>>()
        .join(", ")
}

// Char-based so multi-byte text never splits.
fn truncate(s: &str, max_chars: usize, ellipsis: &str) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{ellipsis}", &s[..cut]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADERS: [&str; 6] = [
        "[Title]",
        "[Inputs found:",
        "[Clickable elements]",
        "[Buttons:",
        "[Links:",
        "[Images:",
    ];

    #[test]
    fn empty_page_still_has_every_section() {
        let text = render_digest(&PageDigest::default(), "로그인");
        for header in HEADERS {
            assert!(text.contains(header), "missing {header}");
        }
        assert!(text.contains("[Elements containing '로그인': 0]"));
    }

    #[test]
    fn oversized_snapshot_respects_caps() {
        let digest = PageDigest {
            title: "Busy".into(),
            input_count: 50,
            inputs: vec![InputSummary::default(); 50],
            button_count: 30,
            button_texts: (0..30).map(|i| format!("b{i}")).collect(),
            link_count: 30,
            link_texts: (0..30).map(|i| format!("l{i}")).collect(),
            marker_hits: vec![MarkerHit::default(); 25],
            image_count: 40,
            images: vec![ImageSummary::default(); 40],
        };
        let text = render_digest(&digest, "Login");

        assert_eq!(text.matches("  [Input]").count(), DIGEST_MAX_INPUTS);
        assert_eq!(text.matches("  [Image]").count(), DIGEST_MAX_IMAGES);
        assert!(text.contains("[Inputs found: 50]"));
        assert!(text.contains("[Buttons: 30] texts='b0, b1, b2, b3, b4, b5, b6, b7, b8, b9'\n"));
        assert!(!text.contains("l10"));
        assert!(text.contains("[Elements containing 'Login': 10]"));
    }

    #[test]
    fn input_defaults_and_value_truncation() {
        let digest = PageDigest {
            input_count: 1,
            inputs: vec![InputSummary {
                value: "가".repeat(100),
                ..Default::default()
            }],
            ..Default::default()
        };
        let text = render_digest(&digest, "로그인");
        let expected = format!(
            "[Input] name='(no name)' id='(no id)' type='text' placeholder='' value='{}...'",
            "가".repeat(80)
        );
        assert!(text.contains(&expected));
    }

    #[test]
    fn marker_hit_attributes() {
        let digest = PageDigest {
            marker_hits: vec![MarkerHit {
                tag: "a".into(),
                text: "로그인".into(),
                href: "/login".into(),
                has_onclick: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let text = render_digest(&digest, "로그인");
        assert!(text.contains("  [a] text='로그인' href='/login' onclick=yes\n"));
    }

    #[test]
    fn digest_decodes_partial_json() {
        let digest: PageDigest =
            serde_json::from_str(r#"{"title":"T","input_count":2,"images":[{"src":"x.png"}]}"#)
                .unwrap();
        assert_eq!(digest.title, "T");
        assert_eq!(digest.input_count, 2);
        assert_eq!(digest.images[0].alt, None);
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("abcdef", 3, "..."), "abc...");
        assert_eq!(truncate("abc", 3, "..."), "abc");
    }
}
