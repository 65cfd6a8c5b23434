//! Plans
//!
//! The model's proposal for one turn: tool invocations to run, or a final
//! answer. An empty plan is valid and sends the session to the summarizer.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// One proposed action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    ToolInvocation(ToolCall),
    FinalAnswer { text: String },
}

/// Ordered steps for the current turn
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,

    /// Text the model produced alongside its tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
}

impl Plan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn final_answer(text: impl Into<String>) -> Self {
        Self {
            steps: vec![Step::FinalAnswer { text: text.into() }],
            narration: None,
        }
    }

    /// Invocations in the order the model returned them
    pub fn tool_calls(calls: Vec<ToolCall>, narration: Option<String>) -> Self {
        Self {
            steps: calls.into_iter().map(Step::ToolInvocation).collect(),
            narration: narration.filter(|n| !n.trim().is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn invocations(&self) -> impl Iterator<Item = &ToolCall> {
        self.steps.iter().filter_map(|s| match s {
            Step::ToolInvocation(call) => Some(call),
            Step::FinalAnswer { .. } => None,
        })
    }

    pub fn has_invocations(&self) -> bool {
        self.invocations().next().is_some()
    }

    /// The answer when the plan is a single final answer
    pub fn answer(&self) -> Option<&str> {
        match self.steps.as_slice() {
            [Step::FinalAnswer { text }] => Some(text.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_plan_is_valid() {
        let plan = Plan::empty();
        assert!(plan.is_empty());
        assert!(!plan.has_invocations());
        assert_eq!(plan.answer(), None);
    }

    #[test]
    fn tool_plan_preserves_order() {
        let plan = Plan::tool_calls(
            vec![
                ToolCall::new("file_read", json!({"file": "/a"})).with_id("1"),
                ToolCall::new("shell_exec", json!({"command": "ls"})).with_id("2"),
            ],
            Some("  ".into()),
        );
        let ids: Vec<&str> = plan.invocations().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert_eq!(plan.narration, None);
        assert_eq!(plan.answer(), None);
    }

    #[test]
    fn final_answer_plan() {
        let plan = Plan::final_answer("42");
        assert_eq!(plan.answer(), Some("42"));
        assert!(!plan.has_invocations());
    }
}
