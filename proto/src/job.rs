//! Job-level types shared by the master and the minions. These cross the
//! wire inside every RPC, so they are all plain serde structs.

/// Operation result codes used by every master and minion RPC.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    /// The caller should back off and retry later.
    Suspend,
    /// No further work will be handed to this caller.
    NoMore,
    NoSuchJob,
    NoSuchTask,
    OpenFileFail,
    WriteFileFail,
    /// The cluster backend rejected a worker-group operation.
    BackendError,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Failed,
    Killed,
    Completed,
}

/// The lifecycle of a single task attempt as reported by a minion or
/// decided by the tracker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    Running,
    Failed,
    Killed,
    Completed,
    Canceled,
    /// The executor produced output but could not move it into place.
    MoveOutputFailed,
    Unknown,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkMode {
    Map,
    Reduce,
    MapOnly,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobType {
    MapOnly,
    MapReduce,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobPriority {
    VeryHigh,
    High,
    Normal,
    Low,
}

/// How map input is carved into resource items.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum InputFormat {
    /// Fixed-size byte ranges of `split_size` bytes.
    ByteBlock,
    /// One item per input line.
    NLine,
}

/// Immutable configuration of a submitted job. The master fills in
/// `map_total` once the input has been carved up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub inputs: Vec<String>,
    pub output: String,
    pub map_command: String,
    pub reduce_command: String,
    pub map_capacity: i32,
    pub reduce_capacity: i32,
    pub map_total: i32,
    pub reduce_total: i32,
    pub map_allow_duplicates: bool,
    pub reduce_allow_duplicates: bool,
    /// Zero means "use the master's retry bound".
    pub map_retry: i32,
    pub reduce_retry: i32,
    /// Zero means "use the master's input block size".
    pub split_size: i64,
    pub input_format: InputFormat,
    pub check_counters: bool,
    pub ignore_map_failures: i32,
    pub ignore_reduce_failures: i32,
}

impl Default for JobDescriptor {
    fn default() -> Self {
        JobDescriptor {
            name: String::new(),
            job_type: JobType::MapReduce,
            priority: JobPriority::Normal,
            inputs: Vec::new(),
            output: String::new(),
            map_command: String::new(),
            reduce_command: String::new(),
            map_capacity: 0,
            reduce_capacity: 0,
            map_total: 0,
            reduce_total: 0,
            map_allow_duplicates: true,
            reduce_allow_duplicates: true,
            map_retry: 0,
            reduce_retry: 0,
            split_size: 0,
            input_format: InputFormat::ByteBlock,
            check_counters: false,
            ignore_map_failures: 0,
            ignore_reduce_failures: 0,
        }
    }
}

/// The input range a map attempt should consume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub input_file: String,
    pub offset: i64,
    pub size: i64,
}

/// Everything a minion needs to run one attempt of one task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: i32,
    pub attempt_id: i32,
    /// Only present for map tasks.
    pub input: Option<TaskInput>,
    pub job: JobDescriptor,
}

/// Aggregate progress of one phase of a job.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total: i32,
    pub pending: i32,
    pub running: i32,
    pub failed: i32,
    pub killed: i32,
    pub completed: i32,
}
