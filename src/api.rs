use crate::jobs::{QueueSnapshot, TaskQueue};
use serde::Serialize;

/// Flat `{success, ...}` envelopes for the host UI. Errors surface as
/// strings in the payload instead of crossing the boundary as panics.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn submit_task(queue: &TaskQueue, task_type: &str, args: serde_json::Value) -> SubmitResponse {
    match queue.submit(task_type, args) {
        Ok(task_id) => SubmitResponse {
            success: true,
            task_id: Some(task_id),
            error: None,
        },
        Err(e) => SubmitResponse {
            success: false,
            task_id: None,
            error: Some(e.to_string()),
        },
    }
}

pub fn cancel_active_task(queue: &TaskQueue) -> ActionResponse {
    match queue.cancel_active() {
        Ok(()) => ActionResponse {
            success: true,
            error: None,
        },
        Err(e) => ActionResponse {
            success: false,
            error: Some(e.to_string()),
        },
    }
}

pub fn remove_queued_task(queue: &TaskQueue, task_id: &str) -> ActionResponse {
    match queue.remove_queued(task_id) {
        Ok(()) => ActionResponse {
            success: true,
            error: None,
        },
        Err(e) => ActionResponse {
            success: false,
            error: Some(e.to_string()),
        },
    }
}

pub fn queue_state(queue: &TaskQueue) -> QueueSnapshot {
    queue.get_state()
}
