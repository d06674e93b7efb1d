use crate::errors::{WebClawError, WebClawResult};
use crate::llm::types::ToolDef;

/// Loads the model-facing action catalogue from prompts/tools/actions.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_action_tools() -> WebClawResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/actions.json");
    serde_json::from_str(json)
        .map_err(|e| WebClawError::Config(format!("Failed to parse action tools: {e}")))
}

/// Names listed under `parameters.required`, minus the shared `thought` field.
pub fn required_args(tool: &ToolDef) -> Vec<String> {
    tool.function.parameters["required"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter(|name| *name != "thought")
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
