//! Plan actions: the closed vocabulary the planner may emit.
//!
//! A plan is parsed into `AgentAction`s and then validated against the
//! round's `ControlInventory` as a whole. One bad action rejects the plan;
//! nothing partially-typed reaches the page.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::{ControlId, ControlInventory, ControlKind};

/// Most actions a single plan may carry.
pub const MAX_PLAN_ACTIONS: usize = 10;

/// One instruction as emitted by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    Click { id: String },
    ClickText { text: String },
    ClickRole { role: String, name: String },
    Fill { id: String, value: String },
    Select { id: String, value: String },
    Check { id: String },
    Uncheck { id: String },
    Press { key: String },
    Wait { ms: u64 },
}

/// Planner response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanResponse {
    pub actions: Vec<AgentAction>,
}

/// An action bound to this round's controls, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAction {
    Click { id: ControlId, label: String },
    ClickText { text: String },
    ClickRole { role: String, name: String },
    Fill { id: ControlId, label: String, value: String },
    Select { id: ControlId, label: String, value: String },
    SetChecked { id: ControlId, label: String, checked: bool },
    Press { key: String },
    Wait { duration: Duration },
}

impl ResolvedAction {
    /// Short description for the step trace.
    pub fn describe(&self) -> serde_json::Value {
        match self {
            Self::Click { label, .. } => serde_json::json!({"action": "click", "id": label}),
            Self::ClickText { text } => serde_json::json!({"action": "click_text", "text": text}),
            Self::ClickRole { role, name } => {
                serde_json::json!({"action": "click_role", "role": role, "name": name})
            }
            // Filled values can be the user's address; keep them out of the trace.
            Self::Fill { label, .. } => serde_json::json!({"action": "fill", "id": label}),
            Self::Select { label, value, .. } => {
                serde_json::json!({"action": "select", "id": label, "value": value})
            }
            Self::SetChecked { label, checked, .. } => serde_json::json!({
                "action": if *checked { "check" } else { "uncheck" },
                "id": label,
            }),
            Self::Press { key } => serde_json::json!({"action": "press", "key": key}),
            Self::Wait { duration } => {
                serde_json::json!({"action": "wait", "ms": duration.as_millis() as u64})
            }
        }
    }
}

/// Validate a parsed plan against `inventory`.
///
/// Returns the resolved actions, or the reason the whole plan was rejected.
/// `wait` durations are clamped to `max_wait`.
pub fn validate_plan(
    plan: PlanResponse,
    inventory: &ControlInventory,
    max_wait: Duration,
) -> Result<Vec<ResolvedAction>, String> {
    if plan.actions.is_empty() {
        return Err("plan contains no actions".to_string());
    }
    if plan.actions.len() > MAX_PLAN_ACTIONS {
        return Err(format!(
            "plan contains {} actions (max {MAX_PLAN_ACTIONS})",
            plan.actions.len()
        ));
    }

    let lookup = |label: &str| {
        inventory
            .resolve(label)
            .ok_or_else(|| format!("unknown control id '{label}'"))
    };

    let mut resolved = Vec::with_capacity(plan.actions.len());
    for (i, action) in plan.actions.into_iter().enumerate() {
        let step = match action {
            AgentAction::Click { id } => {
                let control = lookup(&id)?;
                ResolvedAction::Click {
                    id: control.id,
                    label: control.label(),
                }
            }
            AgentAction::ClickText { text } => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(format!("action {i}: click_text with empty text"));
                }
                ResolvedAction::ClickText { text }
            }
            AgentAction::ClickRole { role, name } => {
                if role.trim().is_empty() {
                    return Err(format!("action {i}: click_role with empty role"));
                }
                ResolvedAction::ClickRole {
                    role: role.trim().to_string(),
                    name: name.trim().to_string(),
                }
            }
            AgentAction::Fill { id, value } => {
                let control = lookup(&id)?;
                if !control.kind.accepts_text() {
                    return Err(format!("action {i}: cannot fill {}", control.label()));
                }
                ResolvedAction::Fill {
                    id: control.id,
                    label: control.label(),
                    value,
                }
            }
            AgentAction::Select { id, value } => {
                let control = lookup(&id)?;
                if control.kind != ControlKind::Select {
                    return Err(format!("action {i}: cannot select on {}", control.label()));
                }
                ResolvedAction::Select {
                    id: control.id,
                    label: control.label(),
                    value,
                }
            }
            AgentAction::Check { id } => resolve_toggle(inventory, i, &id, true)?,
            AgentAction::Uncheck { id } => resolve_toggle(inventory, i, &id, false)?,
            AgentAction::Press { key } => {
                let key = key.trim().to_string();
                if key.is_empty() {
                    return Err(format!("action {i}: press with empty key"));
                }
                ResolvedAction::Press { key }
            }
            AgentAction::Wait { ms } => ResolvedAction::Wait {
                duration: Duration::from_millis(ms).min(max_wait),
            },
        };
        resolved.push(step);
    }

    Ok(resolved)
}

fn resolve_toggle(
    inventory: &ControlInventory,
    i: usize,
    label: &str,
    checked: bool,
) -> Result<ResolvedAction, String> {
    let control = inventory
        .resolve(label)
        .ok_or_else(|| format!("unknown control id '{label}'"))?;
    if !control.kind.is_toggle() {
        return Err(format!("action {i}: {label} is not a checkbox or radio"));
    }
    Ok(ResolvedAction::SetChecked {
        id: control.id,
        label: control.label(),
        checked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::RawControl;

    fn inventory() -> ControlInventory {
        let control = |kind, index, ordinal| RawControl {
            kind: Some(kind),
            index,
            ordinal,
            text: Some("x".into()),
            ..Default::default()
        };
        ControlInventory::from_raw(
            1,
            vec![
                control(ControlKind::Button, 0, 0),
                control(ControlKind::Input, 0, 1),
                control(ControlKind::Checkbox, 0, 2),
                control(ControlKind::Select, 0, 3),
            ],
        )
    }

    fn parse(json: &str) -> Result<PlanResponse, serde_json::Error> {
        serde_json::from_str(json)
    }

    const MAX_WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn valid_plan_resolves_every_variant() {
        let plan = parse(
            r#"{"actions":[
                {"type":"fill","id":"input:0","value":"me@example.com"},
                {"type":"uncheck","id":"checkbox:0"},
                {"type":"select","id":"select:0","value":"Never"},
                {"type":"click","id":"button:0"},
                {"type":"click_text","text":" Confirm "},
                {"type":"click_role","role":"button","name":"Unsubscribe"},
                {"type":"press","key":"Enter"},
                {"type":"wait","ms":60000}
            ]}"#,
        )
        .unwrap();

        let actions = validate_plan(plan, &inventory(), MAX_WAIT).unwrap();
        assert_eq!(actions.len(), 8);
        assert!(matches!(
            &actions[1],
            ResolvedAction::SetChecked { checked: false, .. }
        ));
        assert_eq!(
            actions[4],
            ResolvedAction::ClickText {
                text: "Confirm".into()
            }
        );
        assert_eq!(actions[7], ResolvedAction::Wait { duration: MAX_WAIT });
    }

    #[test]
    fn unknown_id_rejects_whole_plan() {
        let plan = parse(
            r#"{"actions":[{"type":"click","id":"button:0"},{"type":"click","id":"button:7"}]}"#,
        )
        .unwrap();
        let err = validate_plan(plan, &inventory(), MAX_WAIT).unwrap_err();
        assert!(err.contains("button:7"));
    }

    #[test]
    fn kind_mismatch_rejects_plan() {
        let plan = parse(r#"{"actions":[{"type":"fill","id":"button:0","value":"x"}]}"#).unwrap();
        assert!(validate_plan(plan, &inventory(), MAX_WAIT).is_err());

        let plan = parse(r#"{"actions":[{"type":"check","id":"input:0"}]}"#).unwrap();
        assert!(validate_plan(plan, &inventory(), MAX_WAIT).is_err());
    }

    #[test]
    fn action_count_is_bounded() {
        let empty = parse(r#"{"actions":[]}"#).unwrap();
        assert!(validate_plan(empty, &inventory(), MAX_WAIT).is_err());

        let many: Vec<String> = (0..11)
            .map(|_| r#"{"type":"wait","ms":10}"#.to_string())
            .collect();
        let plan = parse(&format!(r#"{{"actions":[{}]}}"#, many.join(","))).unwrap();
        assert!(validate_plan(plan, &inventory(), MAX_WAIT).is_err());
    }

    #[test]
    fn schema_violations_fail_to_parse() {
        assert!(parse(r#"{"actions":[{"type":"hover","id":"button:0"}]}"#).is_err());
        assert!(parse(r#"{"actions":[{"type":"click"}]}"#).is_err());
        assert!(parse(r#"{"actions":[{"type":"wait","ms":"soon"}]}"#).is_err());
        assert!(parse(r#"{"steps":[]}"#).is_err());
    }

    #[test]
    fn fill_description_omits_value() {
        let plan = parse(r#"{"actions":[{"type":"fill","id":"input:0","value":"secret@x"}]}"#)
            .unwrap();
        let actions = validate_plan(plan, &inventory(), MAX_WAIT).unwrap();
        let described = actions[0].describe().to_string();
        assert!(!described.contains("secret@x"));
        assert!(described.contains("input:0"));
    }
}
