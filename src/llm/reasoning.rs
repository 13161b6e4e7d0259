//! Task planning for the coordinator.

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Task content given to the tester in the fallback plan.
pub const FALLBACK_TEST_TASK: &str = "Create tests for the generated code";

/// One step of a plan: which agent gets which task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Recipient agent id.
    pub agent: String,
    /// Task content sent to the agent.
    pub task: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    1
}

/// Ordered list of steps. Steps are dispatched in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

/// Build the planning prompt for a task.
pub fn planning_prompt(task: &str, context: &str) -> String {
    format!(
        r#"You are a smart coordinator managing a team of AI agents.

Current task: {task}
Recent context: {context}

Your job is to:
1. Break down the task into steps
2. Decide which agents should handle each step
3. Create clear instructions for each agent

Available agents:
- coder: Writes code and implements features
- tester: Creates test cases and validates code
- runner: Executes tests and reports results

Respond with a JSON structure like this:
{{
    "steps": [
        {{"agent": "coder", "task": "Write a Python function that...", "priority": 1}},
        {{"agent": "tester", "task": "Create test cases for the function", "priority": 2}}
    ]
}}"#
    )
}

/// Parse a plan out of a model response.
///
/// The JSON object may be surrounded by prose. A plan without steps is
/// rejected so the caller falls back.
pub fn parse_plan(content: &str) -> Result<Plan, LlmError> {
    let json_str = extract_json(content).unwrap_or(content);

    let plan: Plan = serde_json::from_str(json_str).map_err(|e| LlmError::InvalidResponse {
        provider: "planner".to_string(),
        reason: format!("Failed to parse plan: {}", e),
    })?;

    if plan.steps.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: "planner".to_string(),
            reason: "Plan has no steps".to_string(),
        });
    }

    if plan
        .steps
        .iter()
        .any(|step| step.agent.trim().is_empty() || step.task.is_empty())
    {
        return Err(LlmError::InvalidResponse {
            provider: "planner".to_string(),
            reason: "Plan step has a blank agent or task".to_string(),
        });
    }

    Ok(plan)
}

/// The plan used whenever planning fails: code the task, then test it.
pub fn fallback_plan(task: &str) -> Plan {
    Plan {
        steps: vec![
            PlanStep {
                agent: "coder".to_string(),
                task: task.to_string(),
                priority: 1,
            },
            PlanStep {
                agent: "tester".to_string(),
                task: FALLBACK_TEST_TASK.to_string(),
                priority: 2,
            },
        ],
    }
}

/// Extract JSON from text that might contain other content.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_json() {
        let text = r#"Here's the plan:
{"steps": []}
That's my plan."#;

        let json = extract_json(text).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
    }

    #[test]
    fn test_parse_plan_with_prose() {
        let text = r#"Sure! {"steps": [
            {"agent": "coder", "task": "write add", "priority": 1},
            {"agent": "runner", "task": "run it"}
        ]} Good luck."#;

        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].agent, "runner");
        assert_eq!(plan.steps[1].priority, 1);
    }

    #[test]
    fn test_parse_plan_rejects_garbage_and_empty() {
        assert!(parse_plan("no json here").is_err());
        assert!(parse_plan(r#"{"steps": []}"#).is_err());
        assert!(parse_plan(r#"{"steps": [{"task": "missing agent"}]}"#).is_err());
        assert!(parse_plan(r#"{"steps": [{"agent": " ", "task": "blank agent"}]}"#).is_err());
    }

    #[test]
    fn test_fallback_plan() {
        let plan = fallback_plan("write a function that adds two integers");
        assert_eq!(
            plan.steps,
            vec![
                PlanStep {
                    agent: "coder".into(),
                    task: "write a function that adds two integers".into(),
                    priority: 1,
                },
                PlanStep {
                    agent: "tester".into(),
                    task: "Create tests for the generated code".into(),
                    priority: 2,
                },
            ]
        );
    }

    #[test]
    fn test_planning_prompt_names_roles() {
        let prompt = planning_prompt("build it", "Recent conversation:\n");
        assert!(prompt.contains("Current task: build it"));
        for role in ["coder:", "tester:", "runner:"] {
            assert!(prompt.contains(role));
        }
    }
}
