//! Browser tools against a real headless Chrome. Ignored by default; run with
//! `cargo test --test browser_tools -- --ignored` on a machine with Chrome.

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use serde_json::Value;

use web_agent::diagnostics::Diagnostics;
use web_agent::hands::{BrowserSession, LaunchSettings, js_literal};
use web_agent::interact::Engine;
use web_agent::tools::browser_tools;
use web_agent::{Tool, ToolSet};

fn scratch_dir(kind: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("web-agent-test-{kind}-{}", rand::random::<u32>()))
}

fn launch() -> BrowserSession {
    BrowserSession::launch(&LaunchSettings {
        headless: true,
        profile_dir: Some(scratch_dir("profile")),
        ..Default::default()
    })
    .unwrap()
}

fn catalog() -> ToolSet<BrowserSession> {
    let engine = Engine::new(Diagnostics::new(scratch_dir("output")));
    browser_tools(Arc::new(engine), "로그인")
}

fn load(session: &BrowserSession, html: &str) {
    session
        .eval(&format!(
            "document.open(); document.write({}); document.close();",
            js_literal(html)
        ))
        .unwrap();
}

fn run(tools: &ToolSet<BrowserSession>, session: &mut BrowserSession, tool: &str, args: &str) -> String {
    tools.get(tool).unwrap().execute(session, args)
}

fn js(session: &BrowserSession, expr: &str) -> Value {
    session.eval(expr).unwrap()
}

#[test]
#[ignore]
fn input_by_selector_types_and_sends_enter() {
    let mut session = launch();
    let tools = catalog();
    load(
        &session,
        r#"<input id="search" onkeydown="if (event.key === 'Enter') window.__entered = true;">"#,
    );

    let result = run(&tools, &mut session, "InputText", "selector:#search|hello world|enter=true");

    assert_eq!(
        result,
        "Input 'hello world' into field 'selector:#search' and sent Enter key."
    );
    assert_eq!(
        js(&session, "document.getElementById('search').value"),
        Value::from("hello world")
    );
    assert_eq!(js(&session, "window.__entered === true"), Value::Bool(true));
}

#[test]
#[ignore]
fn input_by_field_name_reads_back_the_same_text() {
    let mut session = launch();
    let tools = catalog();
    load(&session, r#"<form><input name="q" type="text"></form>"#);

    let result = run(&tools, &mut session, "InputText", "q|plain text");

    assert_eq!(result, "Input 'plain text' into field 'q'.");
    assert_eq!(
        js(&session, "document.querySelector('[name=q]').value"),
        Value::from("plain text")
    );
}

#[test]
#[ignore]
fn scroll_by_moves_the_window() {
    let mut session = launch();
    let tools = catalog();
    load(&session, r#"<div style="height: 5000px; width: 10px">tall</div>"#);

    let result = run(&tools, &mut session, "Scroll", "by:0|500");

    assert_eq!(result, "Scrolled with args: by:0|500 (position 0,0 -> 0,500)");
    assert_eq!(js(&session, "window.scrollY").as_f64(), Some(500.0));
    assert_eq!(js(&session, "window.scrollX").as_f64(), Some(0.0));
}

#[test]
#[ignore]
fn covered_button_falls_back_to_script_click() {
    let mut session = launch();
    let tools = catalog();
    load(
        &session,
        r#"<button id="target" onclick="window.__clicked = true">Buy</button>
           <div style="position: fixed; inset: 0; z-index: 10; background: rgba(0,0,0,.3)"></div>"#,
    );

    let result = run(&tools, &mut session, "ClickElement", "selector:#target");

    assert_eq!(result, "Clicked element with selector: #target (script click)");
    assert_eq!(js(&session, "window.__clicked === true"), Value::Bool(true));
}

#[test]
#[ignore]
fn uncovered_button_gets_a_native_click() {
    let mut session = launch();
    let tools = catalog();
    load(
        &session,
        r#"<button id="target" onclick="window.__trusted = event.isTrusted">Buy</button>"#,
    );

    let result = run(&tools, &mut session, "ClickElement", "selector:#target");

    assert_eq!(result, "Clicked element with selector: #target");
    assert_eq!(js(&session, "window.__trusted === true"), Value::Bool(true));
}

#[test]
#[ignore]
fn dialog_left_by_previous_step_is_accepted_before_next_tool() {
    let mut session = launch();
    let tools = catalog();
    load(
        &session,
        r#"<title>Search</title>
           <input id="search" onkeydown="if (event.key === 'Enter') setTimeout(function () { alert('done'); }, 0);">"#,
    );

    let typed = run(&tools, &mut session, "InputText", "selector:#search|rust|enter=true");
    assert!(typed.ends_with("and sent Enter key."), "{typed}");
    sleep(Duration::from_millis(300));

    let digest = run(&tools, &mut session, "InspectPage", "");
    assert!(digest.starts_with("[Title] Search"), "{digest}");
}

#[test]
#[ignore]
fn exact_text_is_found_after_many_partial_matches() {
    let mut session = launch();
    let tools = catalog();
    let mut html: String = (0..250)
        .map(|i| format!("<a href=\"#p{i}\">Sign in with provider {i}</a><br>"))
        .collect();
    html.push_str(r#"<button onclick="window.__exact = true">Sign in</button>"#);
    load(&session, &html);

    let result = run(&tools, &mut session, "ClickElement", "Sign in");

    assert!(result.starts_with("Clicked element matching"), "{result}");
    assert_eq!(js(&session, "window.__exact === true"), Value::Bool(true));
}

#[test]
#[ignore]
fn drag_and_drop_delivers_a_drop_event() {
    let mut session = launch();
    let tools = catalog();
    load(
        &session,
        r#"<div id="src" draggable="true" style="width: 50px; height: 50px">drag me</div>
           <div id="dst" ondrop="window.__dropped = true" style="width: 80px; height: 80px">here</div>"#,
    );

    let result = run(&tools, &mut session, "DragAndDrop", "#src|#dst");

    assert_eq!(result, "Dragged #src to #dst");
    assert_eq!(js(&session, "window.__dropped === true"), Value::Bool(true));
}
