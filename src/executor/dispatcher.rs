use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent_engine::actions::Action;
use crate::agent_engine::context::TaskContext;
use crate::errors::{WebClawError, WebClawResult};

/// The subset of the vocabulary that touches the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum PageAction {
    Click { element_id: u32 },
    SetValue { element_id: u32, value: String },
}

impl PageAction {
    pub fn from_action(action: &Action) -> Option<Self> {
        match action {
            Action::Click(args) => Some(PageAction::Click {
                element_id: args.element_id,
            }),
            Action::SetValue(args) => Some(PageAction::SetValue {
                element_id: args.element_id,
                value: args.value.clone(),
            }),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PageAction::Click { .. } => "click",
            PageAction::SetValue { .. } => "set_value",
        }
    }
}

/// Performs page actions against the live surface. May wait for the page to
/// settle before returning; an `Err` is fatal for the current run.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &PageAction, ctx: &TaskContext) -> WebClawResult<()>;
}

/// Routes an executable action to `executor`. Non-page actions are a caller bug.
pub async fn dispatch(
    executor: &dyn ActionExecutor,
    action: &Action,
    ctx: &TaskContext,
) -> WebClawResult<()> {
    let page_action = PageAction::from_action(action).ok_or_else(|| {
        WebClawError::Executor(format!("{action:?} is not a page action"))
    })?;
    tracing::info!(action = page_action.name(), ?page_action, "performing page action");
    executor.execute(&page_action, ctx).await.map_err(|e| {
        tracing::error!(action = page_action.name(), error = %e, "page action failed");
        e
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::agent_engine::actions::{ClickArgs, SetValueArgs};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PageAction>>,
    }

    #[async_trait]
    impl ActionExecutor for Recorder {
        async fn execute(&self, action: &PageAction, _ctx: &TaskContext) -> WebClawResult<()> {
            self.seen.lock().unwrap().push(action.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_click_and_set_value() {
        let recorder = Recorder::default();
        let ctx = TaskContext::new();
        dispatch(&recorder, &Action::Click(ClickArgs { element_id: 7 }), &ctx)
            .await
            .unwrap();
        dispatch(
            &recorder,
            &Action::SetValue(SetValueArgs {
                element_id: 2,
                value: "Ada".into(),
            }),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                PageAction::Click { element_id: 7 },
                PageAction::SetValue {
                    element_id: 2,
                    value: "Ada".into()
                }
            ]
        );
    }

    #[tokio::test]
    async fn refuses_non_page_actions() {
        let recorder = Recorder::default();
        let err = dispatch(&recorder, &Action::Finish, &TaskContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WebClawError::Executor(_)));
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
