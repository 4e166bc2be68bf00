//! Messages handled by the master service.

use std::collections::BTreeMap;

use job::{JobDescriptor, JobState, Status, TaskInfo, TaskState, TaskStatistics, WorkMode};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssignTaskRequest {
    pub endpoint: String,
    pub jobid: String,
    pub work_mode: WorkMode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssignTaskResponse {
    pub status: Status,
    pub task: Option<TaskInfo>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinishTaskRequest {
    pub jobid: String,
    pub task_id: i32,
    pub attempt_id: i32,
    pub task_state: TaskState,
    pub endpoint: String,
    pub work_mode: WorkMode,
    pub error_msg: String,
    pub counters: BTreeMap<String, i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinishTaskResponse {
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub job: JobDescriptor,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub status: Status,
    pub jobid: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateJobRequest {
    pub jobid: String,
    /// Cluster-style priority name (kMonitor, kOnline, kOffline,
    /// kBestEffort); anything else maps to normal.
    pub priority: Option<String>,
    pub map_capacity: Option<i32>,
    pub reduce_capacity: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateJobResponse {
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KillJobRequest {
    pub jobid: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KillJobResponse {
    pub status: Status,
}

/// One job as presented by ListJobs and ShowJob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobOverview {
    pub jobid: String,
    pub desc: JobDescriptor,
    pub state: JobState,
    pub map_stat: TaskStatistics,
    pub reduce_stat: TaskStatistics,
    pub start_time: i64,
    pub finish_time: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListJobsRequest {
    /// Include retracted jobs still waiting for garbage collection.
    pub all: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobOverview>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShowJobRequest {
    pub jobid: String,
    pub all: bool,
    pub show_detail: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShowJobResponse {
    pub status: Status,
    pub job: Option<JobOverview>,
    pub error_msg: String,
    pub counters: BTreeMap<String, i64>,
}
