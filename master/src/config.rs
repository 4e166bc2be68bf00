//! Every master tunable lives here, built once from the command line and
//! passed around explicitly.

pub struct MasterConfig {
    /// Port the master RPC service listens on.
    pub port: u16,
    /// Root directory of the file-backed naming service.
    pub naming_root: String,
    /// Key under which the master publishes its endpoint.
    pub master_path: String,
    /// Mount point of the shared filesystem, if one is used.
    pub data_root: Option<String>,
    /// Fan-out with which worker groups are deployed.
    pub deploy_step: i32,
    /// Largest input range a single map item covers.
    pub input_block_size: i64,
    /// Most attempts of one item allowed to run at once.
    pub parallel_attempts: i32,
    /// The last `replica_begin` items of a phase are end-game items.
    pub replica_begin: i32,
    /// The last `replica_begin_percent` percent of a phase are end-game.
    pub replica_begin_percent: i32,
    /// Speculative replicas queued per end-game item.
    pub replica_num: i32,
    /// Percentage of minions kept around when work runs out.
    pub left_percent: i32,
    /// Monitor delay while no attempt has completed yet, in seconds.
    pub first_sleeptime: i64,
    /// Longest monitor sleep, in seconds.
    pub time_tolerance: i64,
    /// Seconds a retracted job is kept before garbage collection.
    pub gc_interval: i64,
    /// Default retry budget per item when the job does not set one.
    pub retry_bound: i32,
    /// Most distinct counter keys a single job may accumulate.
    pub max_counters_per_job: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            port: 9917,
            naming_root: "./naming".to_owned(),
            master_path: "master".to_owned(),
            data_root: None,
            deploy_step: 30,
            input_block_size: 500 * 1024 * 1024,
            parallel_attempts: 5,
            replica_begin: 100,
            replica_begin_percent: 10,
            replica_num: 3,
            left_percent: 120,
            first_sleeptime: 10,
            time_tolerance: 120,
            gc_interval: 600,
            retry_bound: 3,
            max_counters_per_job: 120,
        }
    }
}
