use std::path::PathBuf;

use charon_proto::job as pb;

/// Every minion tunable, built once from the command line.
pub struct MinionConfig {
    /// Root directory of the file-backed naming service.
    pub naming_root: String,
    /// Naming key under which the master publishes itself.
    pub master_path: String,
    /// Skip the naming service and talk to this master endpoint.
    pub master_override: Option<String>,
    pub work_mode: pb::WorkMode,
    /// The job this minion works for.
    pub jobid: String,
    /// Report the breakpoint as killed and exit instead of looping.
    pub kill_task: bool,
    /// Upper bound of the random part of the retry backoff, in seconds.
    pub suspend_time: i64,
    /// NIC throughput ceiling on a 10 GbE host, bytes per second.
    pub flow_limit_10gb: i64,
    /// NIC throughput ceiling on a 1 GbE host, bytes per second.
    pub flow_limit_1gb: i64,
    /// Port the minion RPC service listens on.
    pub port: u16,
    /// Endpoint advertised to the master, host:port.
    pub endpoint: Option<String>,
    /// Where the running-task breakpoint is persisted.
    pub breakpoint_file: PathBuf,
}

impl Default for MinionConfig {
    fn default() -> Self {
        MinionConfig {
            naming_root: "./naming".to_owned(),
            master_path: "master".to_owned(),
            master_override: None,
            work_mode: pb::WorkMode::Map,
            jobid: String::new(),
            kill_task: false,
            suspend_time: 30,
            flow_limit_10gb: 800 << 20,
            flow_limit_1gb: 80 << 20,
            port: 7810,
            endpoint: None,
            breakpoint_file: PathBuf::from("./task_running"),
        }
    }
}
