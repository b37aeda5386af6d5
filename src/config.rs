use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::brain::Brain;
use crate::hands::LaunchSettings;
use crate::types::{LoopLimits, MAX_CALLS_PER_TOOL, MAX_STEPS_PER_RUN};

/// Drive a Chrome tab from natural-language goals.
#[derive(Debug, Clone, Parser)]
#[command(name = "agent", author, version, about, long_about = None)]
pub struct AgentConfig {
    /// Run this single goal and exit instead of reading goals from stdin
    #[arg(long)]
    pub goal: Option<String>,

    /// Page to open once the browser is up
    #[arg(long, env = "AGENT_START_URL")]
    pub start_url: Option<String>,

    /// Planning model name
    #[arg(long, env = "AGENT_MODEL", default_value = "gpt-4.1-mini")]
    pub model: String,

    /// Base URL of the OpenAI-compatible planning endpoint
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub api_base: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    #[arg(long, default_value_t = 0.2)]
    pub temperature: f32,

    /// Launch Chrome without a window (ignored when attaching)
    #[arg(long)]
    pub headless: bool,

    #[arg(long, env = "CHROME_PATH", value_name = "FILE")]
    pub chrome_path: Option<PathBuf>,

    /// Remote-debugging HTTP endpoint of a Chrome to attach to before launching one
    #[arg(long, env = "AGENT_ATTACH_URL", default_value = "http://127.0.0.1:9222")]
    pub attach_url: String,

    /// Chrome profile directory for launched browsers
    #[arg(long, value_name = "DIR")]
    pub profile_dir: Option<PathBuf>,

    /// Where screenshots and markup of failed inputs are written
    #[arg(long, value_name = "DIR", default_value = "ToolOutput")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = MAX_STEPS_PER_RUN)]
    pub max_steps: usize,

    #[arg(long, default_value_t = MAX_CALLS_PER_TOOL)]
    pub max_calls_per_tool: usize,

    /// Text the page inspection reports elements for, e.g. the site's login label
    #[arg(long, default_value = "로그인")]
    pub login_marker: String,
}

impl AgentConfig {
    /// Load `.env` (if any) and parse the command line.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }

    pub fn limits(&self) -> LoopLimits {
        LoopLimits {
            max_steps: self.max_steps.max(1),
            max_calls_per_tool: self.max_calls_per_tool.max(1),
        }
    }

    pub fn brain(&self) -> Result<Brain> {
        Brain::new(
            self.api_base.clone(),
            self.api_key.clone(),
            self.model.clone(),
            self.temperature,
        )
    }

    /// Launch settings; `debugger_ws_url` is filled in once attach discovery ran.
    pub fn launch_settings(&self, debugger_ws_url: Option<String>) -> LaunchSettings {
        LaunchSettings {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            debugger_ws_url,
            profile_dir: self.profile_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AgentConfig {
        let mut argv = vec!["agent", "--api-key", "sk-test"];
        argv.extend_from_slice(args);
        AgentConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_loop_limits() {
        let config = parse(&[]);
        assert_eq!(config.limits(), LoopLimits::default());
        assert_eq!(config.output_dir, PathBuf::from("ToolOutput"));
        assert_eq!(config.login_marker, "로그인");
        assert!(!config.headless);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--goal",
            "search for rust",
            "--max-steps",
            "3",
            "--headless",
            "--model",
            "local-model",
        ]);
        assert_eq!(config.goal.as_deref(), Some("search for rust"));
        assert_eq!(config.limits().max_steps, 3);
        assert!(config.launch_settings(None).headless);
        assert_eq!(config.brain().unwrap().model(), "local-model");
    }

    #[test]
    fn zero_limits_are_clamped() {
        let config = parse(&["--max-steps", "0", "--max-calls-per-tool", "0"]);
        assert_eq!(
            config.limits(),
            LoopLimits {
                max_steps: 1,
                max_calls_per_tool: 1
            }
        );
    }
}
