use chrono::{DateTime, Local};

use crate::agent_engine::actions::ActionProposal;

pub const SYSTEM_PROMPT: &str = "\
You are WebClaw, a browser automation assistant acting on a web page on behalf of the user.

You will be given a task to perform and the current state of the page. You will also be given previous actions that you have taken. You may retry a failed action up to one time.

Rules:
- Use the provided tools to interact with the page. Every tool call must include a `thought`.
- Use the numeric `id` shown in the page contents as `element_id`.
- Call `finish` when the task is done, or `fail` if it cannot be completed.
- Only call `ask_user` when information needed for the task is missing.
- DO NOT REPEAT ANY ACTIONS THAT YOU HAVE PERFORMED BEFORE!";

/// Everything a decision prompt is built from. Identical inputs give an identical prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub instructions: &'a str,
    pub resume: Option<&'a str>,
    pub memory: Option<&'a str>,
    pub now: DateTime<Local>,
    pub snapshot: &'a str,
    /// Previously taken actions, oldest first, already error-filtered.
    pub history: &'a [ActionProposal],
}

/// Section order is fixed: instructions, resume, memory, time, page, history.
pub fn format_prompt(inputs: &PromptInputs<'_>, window: usize) -> String {
    let previous = render_history(inputs.history, window);

    format!(
        "TASK INSTRUCTIONS:\n{instructions}\n\n\
         RESUME:\n{resume}\n\n\
         {memory}\n\n\
         CURRENT TIME:\n{now}\n\n\
         CURRENT PAGE CONTENTS:\n{snapshot}\n\n\
         PREVIOUS ACTIONS TAKEN:\n{previous}",
        instructions = inputs.instructions,
        resume = inputs.resume.unwrap_or_default(),
        memory = inputs.memory.unwrap_or_default(),
        now = inputs.now.format("%-m/%-d/%Y, %-I:%M:%S %p"),
        snapshot = inputs.snapshot,
    )
}

fn render_history(history: &[ActionProposal], window: usize) -> String {
    if history.is_empty() {
        return String::new();
    }
    let start = history.len().saturating_sub(window);
    let serialized = history[start..]
        .iter()
        .map(|p| {
            serde_json::json!({
                "action": p.action,
                "thought": p.thought,
            })
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("You have already taken the following actions: \n{serialized}\n\n")
}
