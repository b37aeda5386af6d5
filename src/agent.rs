//! The planning loop: goal in, a bounded sequence of tool calls out.

use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::brain::Planner;
use crate::errors::{AgentError, AgentResult};
use crate::tools::{Tool, ToolSet};
use crate::types::{Action, LoopLimits, RunState};

/// Why a run stopped without the planner finishing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The planner asked for exactly the previous `(tool, args)` again.
    IdenticalRepeat { tool: String, args: String },
    /// One more call to `tool` would exceed the per-tool ceiling.
    Overuse { tool: String, calls: usize },
}

#[derive(Debug)]
pub enum RunOutcome {
    Finished { summary: String },
    StepLimitReached,
    Stopped(LoopStop),
    Failed(AgentError),
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunOutcome::Finished { .. })
    }
}

/// Drives one goal at a time against a shared context `C`.
///
/// The context lives behind a mutex because tools are blocking and run on
/// the blocking pool; only one tool ever holds it at a time.
pub struct Agent<P, C> {
    planner: P,
    tools: Arc<ToolSet<C>>,
    session: Arc<Mutex<C>>,
    limits: LoopLimits,
}

impl<P, C> Agent<P, C>
where
    P: Planner,
    C: Send + 'static,
{
    pub fn new(planner: P, tools: ToolSet<C>, session: Arc<Mutex<C>>, limits: LoopLimits) -> Self {
        Self {
            planner,
            tools: Arc::new(tools),
            session,
            limits,
        }
    }

    pub fn session(&self) -> &Arc<Mutex<C>> {
        &self.session
    }

    pub fn limits(&self) -> LoopLimits {
        self.limits
    }

    /// Run `goal` until the planner finishes, a safety stop trips, an error
    /// ends the run, or the step limit is reached.
    pub async fn run(&self, goal: &str) -> RunOutcome {
        let system_prompt = system_prompt(&self.tools);
        let mut state = RunState::new();
        info!(goal, "Starting run");

        for step in 1..=self.limits.max_steps {
            let user_prompt = user_prompt(goal, &state, &self.tools);

            let raw = match self.planner.next_action(&system_prompt, &user_prompt).await {
                Ok(raw) => raw,
                Err(e) => return self.fail(AgentError::Planner(e)),
            };
            println!("[Planner] {raw}");

            let action = match Action::parse(&raw) {
                Ok(action) => action,
                Err(e) => return self.fail(e.into()),
            };

            let (tool_name, args) = match action {
                Action::Finish { summary } => {
                    println!("[Agent] Finished: {summary}");
                    info!(step, "Run finished");
                    return RunOutcome::Finished { summary };
                }
                Action::Invoke { tool, args } => (tool, args),
            };

            if state.is_repeat(&tool_name, &args) {
                warn!(tool = %tool_name, %args, "Identical consecutive call, stopping run");
                println!("[Agent] '{tool_name}' was requested again with the same arguments, stopping.");
                return RunOutcome::Stopped(LoopStop::IdenticalRepeat {
                    tool: tool_name,
                    args,
                });
            }

            let calls = state.record_call(&tool_name);
            if calls > self.limits.max_calls_per_tool {
                warn!(
                    tool = %tool_name,
                    calls,
                    limit = self.limits.max_calls_per_tool,
                    "Per-tool call ceiling exceeded, stopping run"
                );
                println!("[Agent] '{tool_name}' has been called too many times, stopping.");
                return RunOutcome::Stopped(LoopStop::Overuse {
                    tool: tool_name,
                    calls,
                });
            }

            let Some(tool) = self.tools.get(&tool_name) else {
                return self.fail(AgentError::UnsupportedTool(tool_name));
            };

            info!(step, tool = tool.name(), %args, "Executing tool");
            let result = match self.execute(Arc::clone(&tool), args.clone()).await {
                Ok(result) => result,
                Err(e) => return self.fail(e),
            };
            println!("[Tool:{}] result: {result}", tool.name());

            if tool.inspects_page() {
                state.has_inspected_page = true;
            }
            state.record_result(&tool_name, &args, result);
        }

        warn!(limit = self.limits.max_steps, "Step limit reached, stopping run");
        RunOutcome::StepLimitReached
    }

    // Tools block on the browser, so they run on the blocking pool.
    async fn execute(&self, tool: Arc<dyn Tool<C>>, args: String) -> AgentResult<String> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || -> AgentResult<String> {
            let mut ctx = session.lock().map_err(|_| AgentError::SessionPoisoned)?;
            Ok(tool.execute(&mut ctx, &args))
        })
        .await
        .map_err(|e| AgentError::ToolTask(e.to_string()))?
    }

    fn fail(&self, err: AgentError) -> RunOutcome {
        error!("Run failed: {err}");
        println!("[Agent] {err}");
        RunOutcome::Failed(err)
    }
}

/// Built once per run: the tool catalog and the two reply shapes.
pub fn system_prompt<C>(tools: &ToolSet<C>) -> String {
    format!(
        r#"You are an agent that carries out tasks on a web page.
You can use the following tools:

{catalog}

Always answer with a single JSON object and nothing else. Do not write any text outside the JSON.

- To call a tool:
  {{"tool":"ToolName","args":"string arguments"}}

- When the whole task is done and you have a final result for the user:
  {{"tool":null,"final":"summary of the result"}}
"#,
        catalog = tools.catalog()
    )
}

/// Rebuilt every step from the goal, the history so far and whether the
/// page has been inspected yet.
pub fn user_prompt<C>(goal: &str, state: &RunState, tools: &ToolSet<C>) -> String {
    let history = state.render_history();
    let inspector = tools
        .names()
        .into_iter()
        .find(|name| tools.get(name).is_some_and(|t| t.inspects_page()));

    match inspector {
        Some(inspector) if !state.has_inspected_page => format!(
            r#"User goal: {goal}

Tool history so far:
{history}

You have not collected any page information yet.
First call the {inspector} tool once to see what is on the screen.

Reply format (JSON only):
  {{"tool":"{inspector}","args":""}}

Do not send a final answer yet; call {inspector} first.
"#
        ),
        _ => {
            let repeat_note = match inspector {
                Some(inspector) => format!(
                    "You already collected the current page information with {inspector}.\n\
                     Only call it again if the page has changed.\n\n"
                ),
                None => String::new(),
            };
            format!(
                r#"User goal: {goal}

Tool history so far:
{history}

{repeat_note}Use another tool if it is needed to reach the goal, or write the final summary if no more tool calls are needed.
Never repeat the exact same tool call twice in a row.

Reply format (JSON only):
- Tool call:
  {{"tool":"ToolName","args":"string args"}}
- Task finished:
  {{"tool":null,"final":"a natural-language summary the user can understand"}}
"#
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Inspect;

    impl Tool<()> for Inspect {
        fn name(&self) -> &'static str {
            "InspectPage"
        }
        fn description(&self) -> &'static str {
            "summarises"
        }
        fn execute(&self, _: &mut (), _: &str) -> String {
            "[Title] Home".into()
        }
        fn inspects_page(&self) -> bool {
            true
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl Planner for Fixed {
        async fn next_action(&self, _: &str, _: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn tools() -> ToolSet<()> {
        ToolSet::new().with(Arc::new(Inspect))
    }

    #[test]
    fn system_prompt_lists_tools_and_both_shapes() {
        let prompt = system_prompt(&tools());
        assert!(prompt.contains("- InspectPage: summarises"));
        assert!(prompt.contains(r#"{"tool":"ToolName","args":"string arguments"}"#));
        assert!(prompt.contains(r#"{"tool":null,"final":"#));
    }

    #[test]
    fn user_prompt_asks_for_inspection_first() {
        let mut state = RunState::new();
        let before = user_prompt("log in", &state, &tools());
        assert!(before.contains("User goal: log in"));
        assert!(before.contains(r#"{"tool":"InspectPage","args":""}"#));

        state.has_inspected_page = true;
        state.record_result("InspectPage", "", "[Title] Home".into());
        let after = user_prompt("log in", &state, &tools());
        assert!(after.contains("already collected"));
        assert!(after.contains("Result=[Title] Home"));
        assert!(!after.contains("Do not send a final answer yet"));
    }

    #[tokio::test]
    async fn finish_first_ends_without_tools() {
        let agent = Agent::new(
            Fixed(r#"{"tool":null,"final":"Done"}"#),
            tools(),
            Arc::new(Mutex::new(())),
            LoopLimits::default(),
        );
        match agent.run("anything").await {
            RunOutcome::Finished { summary } => assert_eq!(summary, "Done"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_the_run() {
        let agent = Agent::new(
            Fixed(r#"{"tool":"Teleport","args":""}"#),
            tools(),
            Arc::new(Mutex::new(())),
            LoopLimits::default(),
        );
        assert!(matches!(
            agent.run("anything").await,
            RunOutcome::Failed(AgentError::UnsupportedTool(name)) if name == "Teleport"
        ));
    }

    #[tokio::test]
    async fn prose_reply_is_a_decode_failure() {
        let agent = Agent::new(
            Fixed("Sure! I will click the button."),
            tools(),
            Arc::new(Mutex::new(())),
            LoopLimits::default(),
        );
        assert!(matches!(
            agent.run("anything").await,
            RunOutcome::Failed(AgentError::Decode(_))
        ));
    }
}
