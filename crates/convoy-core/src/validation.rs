//! Schema validation for task lists produced by the planning service.
//!
//! The planner must not trust its upstream: every raw task object is checked
//! field by field and the whole batch is rejected if any single task fails.
//! A missing `taskId` is not an error; a fresh one is generated. A missing
//! `jobId` becomes the nil UUID and is stamped later by the orchestrator.

use crate::error::{ConvoyError, ConvoyResult};
use crate::protocol::TaskAssignment;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// One schema violation inside a task object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate every raw task and convert the batch, or reject it as a whole.
pub fn validate_task_assignments(raw: &[Value]) -> ConvoyResult<Vec<TaskAssignment>> {
    let mut accepted = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for (index, value) in raw.iter().enumerate() {
        match validate_one(value) {
            Ok(task) => accepted.push(task),
            Err(issues) => rejected.push(serde_json::json!({
                "index": index,
                "task": value,
                "issues": issues,
            })),
        }
    }

    if rejected.is_empty() {
        return Ok(accepted);
    }

    Err(ConvoyError::Validation {
        message: format!(
            "{} of {} task assignments failed validation",
            rejected.len(),
            raw.len()
        ),
        details: Value::Array(rejected),
    })
}

fn validate_one(value: &Value) -> Result<TaskAssignment, Vec<ValidationIssue>> {
    let Some(obj) = value.as_object() else {
        return Err(vec![ValidationIssue::new("", "task must be a JSON object")]);
    };

    let mut issues = Vec::new();

    let task_type = required_string(obj, "taskType", &mut issues);
    if task_type.as_deref() == Some("") {
        issues.push(ValidationIssue::new("taskType", "must not be empty"));
    }
    let description = required_string(obj, "description", &mut issues);

    let parameters = match obj.get("parameters") {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            issues.push(ValidationIssue::new("parameters", "must be an object"));
            None
        }
        None => {
            issues.push(ValidationIssue::new("parameters", "is required"));
            None
        }
    };

    let task_id = optional_uuid(obj, "taskId", &mut issues);
    let job_id = optional_uuid(obj, "jobId", &mut issues);

    let dependencies = match obj.get("dependencies") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => {
            let mut deps = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str().map(Uuid::parse_str) {
                    Some(Ok(id)) => deps.push(id),
                    _ => issues.push(ValidationIssue::new(
                        &format!("dependencies[{i}]"),
                        "must be a UUID string",
                    )),
                }
            }
            Some(deps)
        }
        Some(_) => {
            issues.push(ValidationIssue::new("dependencies", "must be an array"));
            None
        }
    };

    let context = match obj.get("context") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            issues.push(ValidationIssue::new("context", "must be an object"));
            None
        }
    };

    match (task_type, description, parameters) {
        (Some(task_type), Some(description), Some(parameters)) if issues.is_empty() => {
            Ok(TaskAssignment {
                job_id: job_id.unwrap_or_else(Uuid::nil),
                task_id: task_id.unwrap_or_else(Uuid::new_v4),
                task_type,
                description,
                parameters,
                dependencies,
                context,
            })
        }
        _ => Err(issues),
    }
}

fn required_string(
    obj: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match obj.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            issues.push(ValidationIssue::new(field, "must be a string"));
            None
        }
        None => {
            issues.push(ValidationIssue::new(field, "is required"));
            None
        }
    }
}

fn optional_uuid(
    obj: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Uuid> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => match Uuid::parse_str(s) {
            Ok(id) => Some(id),
            Err(_) => {
                issues.push(ValidationIssue::new(field, "must be a UUID"));
                None
            }
        },
        Some(_) => {
            issues.push(ValidationIssue::new(field, "must be a UUID string"));
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_task(task_type: &str) -> Value {
        json!({
            "taskType": task_type,
            "description": "do the thing",
            "parameters": {"query": "rust"}
        })
    }

    #[test]
    fn test_generates_missing_task_id() {
        let tasks = validate_task_assignments(&[valid_task("web_search")]).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(!tasks[0].task_id.is_nil());
        assert!(tasks[0].job_id.is_nil());
    }

    #[test]
    fn test_keeps_provided_ids() {
        let task_id = Uuid::new_v4();
        let dep = Uuid::new_v4();
        let mut raw = valid_task("data_analysis");
        raw["taskId"] = json!(task_id);
        raw["dependencies"] = json!([dep]);
        let tasks = validate_task_assignments(&[raw]).unwrap();
        assert_eq!(tasks[0].task_id, task_id);
        assert_eq!(tasks[0].dependencies, Some(vec![dep]));
    }

    #[test]
    fn test_single_invalid_task_rejects_batch() {
        let bad = json!({"taskType": "web_search", "description": 42});
        let err = validate_task_assignments(&[valid_task("a"), bad, valid_task("b")]).unwrap_err();
        match err {
            ConvoyError::Validation { message, details } => {
                assert_eq!(message, "1 of 3 task assignments failed validation");
                let rejected = details.as_array().unwrap();
                assert_eq!(rejected.len(), 1);
                assert_eq!(rejected[0]["index"], 1);
                let fields: Vec<&str> = rejected[0]["issues"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|i| i["field"].as_str().unwrap())
                    .collect();
                assert!(fields.contains(&"description"));
                assert!(fields.contains(&"parameters"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_ids() {
        let mut raw = valid_task("x");
        raw["taskId"] = json!("not-a-uuid");
        raw["dependencies"] = json!(["also-bad"]);
        assert!(validate_task_assignments(&[raw]).is_err());
    }

    #[test]
    fn test_rejects_non_object_and_empty_type() {
        assert!(validate_task_assignments(&[json!("just a string")]).is_err());
        assert!(validate_task_assignments(&[valid_task("")]).is_err());
    }

    #[test]
    fn test_empty_batch_is_accepted() {
        assert!(validate_task_assignments(&[]).unwrap().is_empty());
    }
}
