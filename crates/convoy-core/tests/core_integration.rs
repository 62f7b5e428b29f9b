#![allow(clippy::unwrap_used, clippy::expect_used)]

use convoy_core::*;
use serde_json::json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. Planner output -> validated tasks -> wire payload
// ---------------------------------------------------------------------------

#[test]
fn planner_output_becomes_publishable_tasks() {
    let raw = vec![
        json!({
            "taskType": "web_search",
            "description": "Find recent AI regulation news",
            "parameters": {"query": "AI regulation healthcare"}
        }),
        json!({
            "taskType": "data_analysis",
            "description": "Summarise the impact",
            "parameters": {},
            "context": {"priority": "high"}
        }),
    ];

    let mut tasks = validate_task_assignments(&raw).unwrap();
    let job_id = Uuid::new_v4();
    for task in &mut tasks {
        task.job_id = job_id;
    }

    let bytes = serde_json::to_vec(&tasks[1]).unwrap();
    let decoded: TaskAssignment = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(decoded.job_id, job_id);
    assert_eq!(decoded.task_type, "data_analysis");
    assert_eq!(decoded.context.unwrap()["priority"], "high");
}

// ---------------------------------------------------------------------------
// 2. Task ids are unique across a batch
// ---------------------------------------------------------------------------

#[test]
fn generated_task_ids_are_unique() {
    let raw: Vec<_> = (0..50)
        .map(|i| json!({"taskType": "echo", "description": format!("t{i}"), "parameters": {}}))
        .collect();
    let tasks = validate_task_assignments(&raw).unwrap();
    let mut ids: Vec<Uuid> = tasks.iter().map(|t| t.task_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 50);
}

// ---------------------------------------------------------------------------
// 3. Status update builder produces the worker wire shape
// ---------------------------------------------------------------------------

#[test]
fn completed_status_carries_result() {
    let update = StatusUpdate::new(Uuid::new_v4(), Uuid::new_v4(), TaskStatus::Completed)
        .with_result(json!({"echo": true}));
    let value = serde_json::to_value(&update).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["result"]["echo"], true);
    assert!(value.get("taskId").is_some());
}

// ---------------------------------------------------------------------------
// 4. Trace and capability payloads
// ---------------------------------------------------------------------------

#[test]
fn trace_event_and_capability_wire_shape() {
    let trace = TraceEvent {
        job_id: Uuid::new_v4(),
        task_id: Uuid::new_v4(),
        agent_id: "echo-agent".into(),
        step: "task_started".into(),
        details: None,
        timestamp: chrono::Utc::now(),
    };
    let value = serde_json::to_value(&trace).unwrap();
    assert_eq!(value["agentId"], "echo-agent");
    assert!(value.get("details").is_none());

    let cap = AgentCapability::new("echo-agent", vec!["echo".into()]);
    let value = serde_json::to_value(&cap).unwrap();
    assert_eq!(value["capabilities"], json!(["echo"]));
}

// ---------------------------------------------------------------------------
// 5. Error codes are stable
// ---------------------------------------------------------------------------

#[test]
fn error_codes() {
    let err = ConvoyError::TaskExecution {
        job_id: Uuid::nil(),
        task_id: Uuid::nil(),
        message: "boom".into(),
    };
    assert_eq!(err.code(), "TASK_EXECUTION_ERROR");
    assert!(!err.is_transient());
    assert_eq!(
        ConvoyError::Capability { required: "ocr".into() }.code(),
        "CAPABILITY_ERROR"
    );
}
