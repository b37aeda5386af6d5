use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use web_agent::agent::{Agent, RunOutcome};
use web_agent::config::AgentConfig;
use web_agent::diagnostics::Diagnostics;
use web_agent::dom::{capture_digest, render_digest};
use web_agent::hands::{self, BrowserSession};
use web_agent::interact::Engine;
use web_agent::tools::browser_tools;

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "종료"];

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("web_agent=info,agent=info")),
        )
        .init();

    info!("Starting browser agent");

    // 1. Attach to a running Chrome if one answers, otherwise launch our own
    let client = reqwest::Client::new();
    let ws_url = hands::discover_debugger_url(&client, &config.attach_url).await;
    if ws_url.is_none() {
        info!("No Chrome at {}, a new one will be launched", config.attach_url);
    }
    let settings = config.launch_settings(ws_url);
    let start_url = config.start_url.clone();

    let session = tokio::task::spawn_blocking(move || -> Result<BrowserSession> {
        let session = BrowserSession::launch(&settings)?;
        if let Some(url) = start_url {
            info!("Opening {url}");
            session.navigate(&url)?;
            session.settle();
        }
        Ok(session)
    })
    .await
    .map_err(|e| anyhow!("Browser launch panicked: {}", e))??;
    let session = Arc::new(Mutex::new(session));

    // 2. Planner + tools
    let brain = config.brain()?;
    info!(model = brain.model(), "Planner ready");

    let engine = Arc::new(Engine::new(Diagnostics::new(config.output_dir.clone())));
    let tools = browser_tools(engine, &config.login_marker);
    let agent = Agent::new(brain, tools, Arc::clone(&session), config.limits());

    print_digest(&session, &config.login_marker).await;

    // 3. One-shot goal, or read goals until the user leaves
    if let Some(goal) = config.goal.as_deref() {
        report(agent.run(goal).await);
        print_digest(&session, &config.login_marker).await;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("\nEnter a goal (or 'exit' to quit):");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let goal = line.trim();
        if goal.is_empty() {
            continue;
        }
        if EXIT_WORDS.iter().any(|w| goal.eq_ignore_ascii_case(w)) {
            break;
        }

        report(agent.run(goal).await);
        print_digest(&session, &config.login_marker).await;
    }

    info!("Agent stopped");
    Ok(())
}

fn report(outcome: RunOutcome) {
    match outcome {
        RunOutcome::Finished { .. } => {}
        RunOutcome::StepLimitReached => println!("[Agent] Step limit reached."),
        RunOutcome::Stopped(stop) => info!(?stop, "Run stopped by loop safety"),
        RunOutcome::Failed(e) => warn!("Run ended with an error: {e}"),
    }
}

async fn print_digest(session: &Arc<Mutex<BrowserSession>>, login_marker: &str) {
    let session = Arc::clone(session);
    let marker = login_marker.to_string();
    let digest = tokio::task::spawn_blocking(move || {
        let mut session = session.lock().map_err(|_| anyhow!("browser session lock poisoned"))?;
        session.reset_frame();
        let digest = capture_digest(&session, &marker)?;
        Ok::<_, anyhow::Error>(render_digest(&digest, &marker))
    })
    .await;

    match digest {
        Ok(Ok(text)) => println!("\n[Page]\n{text}"),
        Ok(Err(e)) => warn!("Page summary unavailable: {e:#}"),
        Err(e) => warn!("Page summary task failed: {e}"),
    }
}
