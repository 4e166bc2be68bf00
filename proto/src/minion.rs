//! Messages handled by the minion service.

use job::{Status, TaskState};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Ask the minion to include its executor error buffer.
    pub detail: bool,
}

/// An overloaded or long-frozen minion answers with the default value,
/// which matches no job; the monitor reads that as absence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub jobid: String,
    pub task_id: i32,
    pub attempt_id: i32,
    pub task_state: TaskState,
    pub log_msg: String,
}

impl Default for QueryResponse {
    fn default() -> Self {
        QueryResponse {
            jobid: String::new(),
            task_id: -1,
            attempt_id: -1,
            task_state: TaskState::Unknown,
            log_msg: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    pub jobid: String,
    pub task_id: i32,
    pub attempt_id: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancelTaskResponse {
    pub status: Status,
}
