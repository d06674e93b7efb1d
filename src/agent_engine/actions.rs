//! The closed catalogue of actions the model may request.
//!
//! The model sees `prompts/tools/actions.json`; the loop dispatches on
//! [`Action`]. Both must list the same names with the same required
//! arguments, which the tests below enforce.

use serde::{Deserialize, Serialize};

use crate::llm::types::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    SetValue,
    Finish,
    Fail,
    AskUser,
}

/// Internal descriptor of one vocabulary member.
#[derive(Debug, Clone, Copy)]
pub struct ActionDescriptor {
    pub kind: ActionKind,
    pub name: &'static str,
    pub args: &'static [&'static str],
}

pub const AVAILABLE_ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        kind: ActionKind::Click,
        name: "click",
        args: &["element_id"],
    },
    ActionDescriptor {
        kind: ActionKind::SetValue,
        name: "set_value",
        args: &["element_id", "value"],
    },
    ActionDescriptor {
        kind: ActionKind::Finish,
        name: "finish",
        args: &[],
    },
    ActionDescriptor {
        kind: ActionKind::Fail,
        name: "fail",
        args: &[],
    },
    ActionDescriptor {
        kind: ActionKind::AskUser,
        name: "ask_user",
        args: &["question"],
    },
];

impl ActionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        AVAILABLE_ACTIONS
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.kind)
    }

    pub fn descriptor(self) -> &'static ActionDescriptor {
        match self {
            ActionKind::Click => &AVAILABLE_ACTIONS[0],
            ActionKind::SetValue => &AVAILABLE_ACTIONS[1],
            ActionKind::Finish => &AVAILABLE_ACTIONS[2],
            ActionKind::Fail => &AVAILABLE_ACTIONS[3],
            ActionKind::AskUser => &AVAILABLE_ACTIONS[4],
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Ends the run once reached.
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionKind::Finish | ActionKind::Fail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickArgs {
    pub element_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetValueArgs {
    pub element_id: u32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskUserArgs {
    pub question: String,
}

/// A tool call that did not match the vocabulary or its argument schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnparsableAction {
    pub name: String,
    pub arguments: String,
    pub error: String,
}

/// One validated action, or the marker for a call that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum Action {
    Click(ClickArgs),
    SetValue(SetValueArgs),
    Finish,
    Fail,
    AskUser(AskUserArgs),
    Unparsable(UnparsableAction),
}

impl Action {
    pub fn kind(&self) -> Option<ActionKind> {
        match self {
            Action::Click(_) => Some(ActionKind::Click),
            Action::SetValue(_) => Some(ActionKind::SetValue),
            Action::Finish => Some(ActionKind::Finish),
            Action::Fail => Some(ActionKind::Fail),
            Action::AskUser(_) => Some(ActionKind::AskUser),
            Action::Unparsable(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Action::Unparsable(_))
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_some_and(ActionKind::is_terminal)
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Action::Unparsable(u) => Some(format!(
                "Could not parse action '{}': {}",
                u.name, u.error
            )),
            _ => None,
        }
    }
}

/// One action choice emitted by a decision, with its justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action: Action,
    pub thought: Option<String>,
    /// Token usage of the call that produced this proposal.
    pub usage: Option<u32>,
}

/// Turns one model tool call into a proposal. Never fails: anything that does
/// not validate becomes [`Action::Unparsable`].
pub fn parse_tool_call(tc: &ToolCall, usage: Option<u32>) -> ActionProposal {
    let raw = if tc.function.arguments.trim().is_empty() {
        "{}"
    } else {
        tc.function.arguments.as_str()
    };

    let unparsable = |error: String, thought: Option<String>| ActionProposal {
        action: Action::Unparsable(UnparsableAction {
            name: tc.function.name.clone(),
            arguments: tc.function.arguments.clone(),
            error,
        }),
        thought,
        usage,
    };

    let args: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v @ serde_json::Value::Object(_)) => v,
        Ok(other) => return unparsable(format!("arguments are not an object: {other}"), None),
        Err(e) => return unparsable(format!("invalid JSON arguments: {e}"), None),
    };
    let thought = args["thought"].as_str().map(str::to_string);

    let Some(kind) = ActionKind::from_name(&tc.function.name) else {
        return unparsable(format!("unknown action '{}'", tc.function.name), thought);
    };

    let parsed = match kind {
        ActionKind::Click => serde_json::from_value(args).map(Action::Click),
        ActionKind::SetValue => serde_json::from_value(args).map(Action::SetValue),
        ActionKind::AskUser => serde_json::from_value(args).map(Action::AskUser),
        ActionKind::Finish => Ok(Action::Finish),
        ActionKind::Fail => Ok(Action::Fail),
    };

    match parsed {
        Ok(action) => ActionProposal {
            action,
            thought,
            usage,
        },
        Err(e) => unparsable(e.to_string(), thought),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::llm::tools::{load_action_tools, required_args};
    use crate::llm::types::FunctionCall;

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_0".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    #[test]
    fn catalogue_and_dispatch_stay_in_lock_step() {
        let tools = load_action_tools().unwrap();

        let model_names: BTreeSet<_> = tools.iter().map(|t| t.function.name.clone()).collect();
        let dispatch_names: BTreeSet<_> =
            AVAILABLE_ACTIONS.iter().map(|d| d.name.to_string()).collect();
        assert_eq!(model_names, dispatch_names);

        for tool in &tools {
            let kind = ActionKind::from_name(&tool.function.name).unwrap();
            let mut model_args = required_args(tool);
            model_args.sort();
            let mut dispatch_args: Vec<String> =
                kind.descriptor().args.iter().map(|a| a.to_string()).collect();
            dispatch_args.sort();
            assert_eq!(model_args, dispatch_args, "args drifted for {}", tool.function.name);
        }
    }

    #[test]
    fn descriptor_lookup_matches_kind() {
        for d in AVAILABLE_ACTIONS {
            assert_eq!(d.kind.descriptor().name, d.name);
            assert_eq!(ActionKind::from_name(d.name), Some(d.kind));
        }
    }

    #[test]
    fn parses_click_with_thought() {
        let p = parse_tool_call(&call("click", r#"{"thought":"apply now","element_id":7}"#), Some(50));
        assert_eq!(p.action, Action::Click(ClickArgs { element_id: 7 }));
        assert_eq!(p.thought.as_deref(), Some("apply now"));
        assert_eq!(p.usage, Some(50));
    }

    #[test]
    fn parses_set_value_and_ask_user() {
        let p = parse_tool_call(
            &call("set_value", r#"{"thought":"name","element_id":3,"value":"Ada"}"#),
            None,
        );
        assert_eq!(
            p.action,
            Action::SetValue(SetValueArgs {
                element_id: 3,
                value: "Ada".into()
            })
        );

        let p = parse_tool_call(&call("ask_user", r#"{"question":"Which city?"}"#), None);
        assert_eq!(
            p.action,
            Action::AskUser(AskUserArgs {
                question: "Which city?".into()
            })
        );
        assert!(p.thought.is_none());
    }

    #[test]
    fn terminal_actions_accept_empty_arguments() {
        assert_eq!(parse_tool_call(&call("finish", ""), None).action, Action::Finish);
        let fail = parse_tool_call(&call("fail", "{}"), None).action;
        assert_eq!(fail, Action::Fail);
        assert!(fail.is_terminal());
    }

    #[test]
    fn bad_calls_become_unparsable() {
        let missing = parse_tool_call(&call("click", r#"{"thought":"x"}"#), None);
        assert!(missing.action.is_error());
        assert_eq!(missing.thought.as_deref(), Some("x"));

        let unknown = parse_tool_call(&call("scroll", r#"{"thought":"down"}"#), None);
        assert!(unknown.action.error_message().unwrap().contains("unknown action"));

        let garbage = parse_tool_call(&call("click", "{element_id: 7"), None);
        assert!(garbage.action.is_error());

        let wrong_type = parse_tool_call(&call("click", r#"{"element_id":"seven"}"#), None);
        assert!(wrong_type.action.is_error());
    }

    #[test]
    fn serializes_as_name_and_args() {
        let json = serde_json::to_value(Action::Click(ClickArgs { element_id: 7 })).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "click", "args": { "element_id": 7 } }));
        let json = serde_json::to_value(Action::Finish).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "finish" }));
    }
}
