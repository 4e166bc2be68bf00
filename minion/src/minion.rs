//! The worker loop: pull one task at a time from the master, supervise
//! the executor, report the outcome, and keep a breakpoint on local disk
//! so a crashed minion can clear its ghost allocation on restart.

use std::fs;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand;

use charon_proto::job as pb;
use charon_proto::master as master_pb;
use charon_proto::minion as minion_pb;
use config::MinionConfig;
use errors::*;
use executor::Executor;
use master_interface::MasterRpc;
use watch_dog::WatchFlags;

/// Base seconds of every backoff; a random share of `suspend_time` is
/// added on top.
const BACKOFF_BASE_SECS: u64 = 5;
/// A minion frozen longer than this stops answering queries, making the
/// attempt reapable.
const FROZEN_BLACKOUT_SECS: i64 = 300;

struct TaskContext {
    cur_task_id: i32,
    cur_attempt_id: i32,
    cur_task_state: pb::TaskState,
}

pub struct MinionImpl {
    config: Arc<MinionConfig>,
    endpoint: String,
    executor: Arc<Executor>,
    master: Arc<MasterRpc>,
    watch: Arc<WatchFlags>,
    state: Mutex<TaskContext>,
    stop: AtomicBool,
}

/// Parses a breakpoint file body: two whitespace-separated ints,
/// `task_id attempt_id`.
pub fn parse_breakpoint(contents: &str) -> Option<(i32, i32)> {
    let mut parts = contents.split_whitespace();
    let task_id = parts.next().and_then(|raw| raw.parse().ok());
    let attempt_id = parts.next().and_then(|raw| raw.parse().ok());
    match (task_id, attempt_id) {
        (Some(task_id), Some(attempt_id)) => Some((task_id, attempt_id)),
        _ => None,
    }
}

impl MinionImpl {
    pub fn new(
        config: Arc<MinionConfig>,
        endpoint: String,
        executor: Arc<Executor>,
        master: Arc<MasterRpc>,
        watch: Arc<WatchFlags>,
    ) -> Self {
        MinionImpl {
            config: config,
            endpoint: endpoint,
            executor: executor,
            master: master,
            watch: watch,
            state: Mutex::new(TaskContext {
                cur_task_id: -1,
                cur_attempt_id: -1,
                cur_task_state: pb::TaskState::Unknown,
            }),
            stop: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn shut_down(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn sleep_random_time(&self) {
        let jitter = (rand::random::<f64>() * self.config.suspend_time as f64) as u64;
        thread::sleep(Duration::from_secs(BACKOFF_BASE_SECS + jitter));
    }

    /// Reports a leftover breakpoint as a killed attempt. The master must
    /// learn about the ghost before this minion takes new work, so a
    /// failed report is fatal.
    pub fn check_unfinished_task(&self) -> Result<()> {
        let contents = match fs::read_to_string(&self.config.breakpoint_file) {
            Ok(contents) => contents,
            Err(_) => return Ok(()),
        };
        let (task_id, attempt_id) = match parse_breakpoint(&contents) {
            Some(ids) => ids,
            None => {
                warn!("invalid breakpoint file, ignoring");
                return Ok(());
            }
        };
        warn!(
            "found unfinished task: task_id: {}, attempt_id: {}",
            task_id,
            attempt_id
        );
        let request = master_pb::FinishTaskRequest {
            jobid: self.config.jobid.clone(),
            task_id: task_id,
            attempt_id: attempt_id,
            task_state: pb::TaskState::Killed,
            endpoint: self.endpoint.clone(),
            work_mode: self.config.work_mode,
            error_msg: String::new(),
            counters: Default::default(),
        };
        self.master.finish_task(&request).chain_err(
            || "fail to report unfinished task to master",
        )?;
        self.clear_breakpoint();
        Ok(())
    }

    fn save_breakpoint(&self, task: &pb::TaskInfo) {
        let written = File::create(&self.config.breakpoint_file).and_then(|mut file| {
            writeln!(file, "{} {}", task.task_id, task.attempt_id)
        });
        if let Err(err) = written {
            warn!("failed to save breakpoint file: {}", err);
        }
    }

    fn clear_breakpoint(&self) {
        if let Err(err) = fs::remove_file(&self.config.breakpoint_file) {
            warn!("failed to remove breakpoint file: {}", err);
        }
    }

    /// Runs the minion until the master dismisses it.
    pub fn run(&self) -> Result<()> {
        self.check_unfinished_task()?;
        let mut task_count = 0;
        while !self.is_stopped() {
            task_count += 1;
            info!("======== task:{} ========", task_count);
            let request = master_pb::AssignTaskRequest {
                endpoint: self.endpoint.clone(),
                jobid: self.config.jobid.clone(),
                work_mode: self.config.work_mode,
            };
            let response = loop {
                if self.is_stopped() {
                    return Ok(());
                }
                match self.master.assign_task(&request) {
                    Ok(response) => break response,
                    Err(err) => {
                        warn!("fail to fetch task from master: {}", err);
                        self.sleep_random_time();
                    }
                }
            };
            match response.status {
                pb::Status::Ok => {}
                pb::Status::NoMore => {
                    info!("master has no more task for minion, so exit");
                    break;
                }
                pb::Status::NoSuchJob => {
                    info!("the job may be finished");
                    break;
                }
                pb::Status::Suspend => {
                    info!("minion will suspend for a while");
                    self.sleep_random_time();
                    continue;
                }
                other => {
                    bail!("invalid assign task response status: {:?}", other);
                }
            }
            let task = match response.task {
                Some(task) => task,
                None => bail!("assign task response carries no task"),
            };
            self.save_breakpoint(&task);
            self.executor
                .set_env(&self.config.jobid, &task, self.config.work_mode);
            {
                let mut state = self.state.lock().unwrap();
                state.cur_task_id = task.task_id;
                state.cur_attempt_id = task.attempt_id;
                state.cur_task_state = pb::TaskState::Running;
            }
            info!(
                "try exec task: {}, {}, {}",
                self.config.jobid,
                task.task_id,
                task.attempt_id
            );
            let task_state = self.executor.exec(&task);
            {
                let mut state = self.state.lock().unwrap();
                state.cur_task_state = task_state;
            }
            info!("exec done, task state: {:?}", task_state);

            let error_msg = if task_state == pb::TaskState::Failed {
                self.executor.last_error()
            } else {
                String::new()
            };
            let counters = if task_state == pb::TaskState::Completed && task.job.check_counters {
                self.executor.parse_counters(&task)
            } else {
                Default::default()
            };

            let finish_request = master_pb::FinishTaskRequest {
                jobid: self.config.jobid.clone(),
                task_id: task.task_id,
                attempt_id: task.attempt_id,
                task_state: task_state,
                endpoint: self.endpoint.clone(),
                work_mode: self.config.work_mode,
                error_msg: error_msg.clone(),
                counters: counters,
            };
            loop {
                if self.is_stopped() {
                    return Ok(());
                }
                match self.master.finish_task(&finish_request) {
                    Err(err) => {
                        warn!("fail to send task state to master: {}", err);
                        self.sleep_random_time();
                    }
                    Ok(response) => {
                        if response.status == pb::Status::Suspend {
                            warn!("wait a moment and then report finish");
                            self.sleep_random_time();
                            continue;
                        }
                        break;
                    }
                }
            }
            self.clear_breakpoint();
            if task_state == pb::TaskState::Failed {
                warn!("task failed: {:?}", task.task_id);
                self.executor.upload_error(&task, &error_msg);
                self.sleep_random_time();
            }
        }
        self.shut_down();
        Ok(())
    }

    /// Answers the master's liveness probe. Silence while the host is
    /// overloaded or the task has been frozen too long.
    pub fn query(&self, request: minion_pb::QueryRequest) -> minion_pb::QueryResponse {
        if self.watch.over_loaded.load(Ordering::SeqCst) {
            return minion_pb::QueryResponse::default();
        }
        if self.watch.task_frozen.load(Ordering::SeqCst) {
            let frozen_time = *self.watch.frozen_time.lock().unwrap();
            if frozen_time + FROZEN_BLACKOUT_SECS < Utc::now().timestamp() {
                return minion_pb::QueryResponse::default();
            }
        }
        let state = self.state.lock().unwrap();
        minion_pb::QueryResponse {
            jobid: self.config.jobid.clone(),
            task_id: state.cur_task_id,
            attempt_id: state.cur_attempt_id,
            task_state: state.cur_task_state,
            log_msg: if request.detail {
                self.executor.last_error()
            } else {
                String::new()
            },
        }
    }

    pub fn cancel_task(&self, request: minion_pb::CancelTaskRequest)
        -> minion_pb::CancelTaskResponse {
        let current = self.state.lock().unwrap().cur_task_id;
        if request.task_id != current || request.jobid != self.config.jobid {
            return minion_pb::CancelTaskResponse { status: pb::Status::NoSuchTask };
        }
        self.executor.stop(request.task_id);
        minion_pb::CancelTaskResponse { status: pb::Status::Ok }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::env;
    use std::path::PathBuf;

    use super::*;

    struct ScriptedMaster {
        assigns: Mutex<VecDeque<master_pb::AssignTaskResponse>>,
        finishes: Mutex<Vec<master_pb::FinishTaskRequest>>,
    }

    impl ScriptedMaster {
        fn new(assigns: Vec<master_pb::AssignTaskResponse>) -> Self {
            ScriptedMaster {
                assigns: Mutex::new(assigns.into_iter().collect()),
                finishes: Mutex::new(Vec::new()),
            }
        }
    }

    impl MasterRpc for ScriptedMaster {
        fn assign_task(&self, _request: &master_pb::AssignTaskRequest)
            -> Result<master_pb::AssignTaskResponse> {
            Ok(self.assigns.lock().unwrap().pop_front().unwrap_or(
                master_pb::AssignTaskResponse {
                    status: pb::Status::NoMore,
                    task: None,
                },
            ))
        }

        fn finish_task(&self, request: &master_pb::FinishTaskRequest)
            -> Result<master_pb::FinishTaskResponse> {
            self.finishes.lock().unwrap().push(request.clone());
            Ok(master_pb::FinishTaskResponse { status: pb::Status::Ok })
        }
    }

    struct StubExecutor {
        outcome: pb::TaskState,
        error: String,
        stopped: Mutex<Vec<i32>>,
    }

    impl StubExecutor {
        fn completing() -> Self {
            StubExecutor {
                outcome: pb::TaskState::Completed,
                error: String::new(),
                stopped: Mutex::new(Vec::new()),
            }
        }
    }

    impl Executor for StubExecutor {
        fn set_env(&self, _jobid: &str, _task: &pb::TaskInfo, _mode: pb::WorkMode) {}

        fn exec(&self, _task: &pb::TaskInfo) -> pb::TaskState {
            self.outcome
        }

        fn stop(&self, task_id: i32) {
            self.stopped.lock().unwrap().push(task_id);
        }

        fn last_error(&self) -> String {
            self.error.clone()
        }

        fn parse_counters(&self, _task: &pb::TaskInfo) -> BTreeMap<String, i64> {
            let mut counters = BTreeMap::new();
            counters.insert("records".to_owned(), 3);
            counters
        }

        fn upload_error(&self, _task: &pb::TaskInfo, _error_msg: &str) {}

        fn pause(&self) {}

        fn resume(&self) {}
    }

    fn test_config(name: &str) -> Arc<MinionConfig> {
        Arc::new(MinionConfig {
            jobid: "job_test".to_owned(),
            work_mode: pb::WorkMode::MapOnly,
            suspend_time: 0,
            breakpoint_file: breakpoint_path(name),
            ..Default::default()
        })
    }

    fn breakpoint_path(name: &str) -> PathBuf {
        env::temp_dir().join(format!("charon-breakpoint-{}", name))
    }

    fn task(task_id: i32, attempt_id: i32, check_counters: bool) -> pb::TaskInfo {
        pb::TaskInfo {
            task_id: task_id,
            attempt_id: attempt_id,
            input: None,
            job: pb::JobDescriptor {
                name: "grep".to_owned(),
                job_type: pb::JobType::MapOnly,
                map_command: "true".to_owned(),
                check_counters: check_counters,
                ..Default::default()
            },
        }
    }

    fn minion(
        name: &str,
        master: Arc<ScriptedMaster>,
        executor: Arc<StubExecutor>,
    ) -> MinionImpl {
        MinionImpl::new(
            test_config(name),
            "minion-1:7810".to_owned(),
            executor,
            master,
            Arc::new(WatchFlags::new()),
        )
    }

    #[test]
    fn test_parse_breakpoint() {
        assert_eq!(Some((5, 2)), parse_breakpoint("5 2\n"));
        assert_eq!(Some((12, 0)), parse_breakpoint("  12\t0  "));
        assert_eq!(None, parse_breakpoint(""));
        assert_eq!(None, parse_breakpoint("5"));
        assert_eq!(None, parse_breakpoint("five two"));
    }

    #[test]
    fn test_task_loop_runs_until_dismissed() {
        let _ = fs::remove_file(breakpoint_path("loop"));
        let master = Arc::new(ScriptedMaster::new(vec![
            master_pb::AssignTaskResponse {
                status: pb::Status::Ok,
                task: Some(task(3, 1, true)),
            },
        ]));
        let executor = Arc::new(StubExecutor::completing());
        let minion = minion("loop", master.clone(), executor);

        minion.run().unwrap();

        let finishes = master.finishes.lock().unwrap();
        assert_eq!(1, finishes.len());
        assert_eq!(3, finishes[0].task_id);
        assert_eq!(1, finishes[0].attempt_id);
        assert_eq!(pb::TaskState::Completed, finishes[0].task_state);
        assert_eq!("minion-1:7810", finishes[0].endpoint);
        assert_eq!(Some(&3), finishes[0].counters.get("records"));
        // The breakpoint does not outlive the task.
        assert!(!breakpoint_path("loop").exists());
    }

    #[test]
    fn test_breakpoint_reported_as_killed_on_startup() {
        let path = breakpoint_path("ghost");
        {
            let mut file = File::create(&path).unwrap();
            writeln!(file, "5 2").unwrap();
        }
        let master = Arc::new(ScriptedMaster::new(Vec::new()));
        let executor = Arc::new(StubExecutor::completing());
        let minion = minion("ghost", master.clone(), executor);

        minion.check_unfinished_task().unwrap();

        let finishes = master.finishes.lock().unwrap();
        assert_eq!(1, finishes.len());
        assert_eq!(5, finishes[0].task_id);
        assert_eq!(2, finishes[0].attempt_id);
        assert_eq!(pb::TaskState::Killed, finishes[0].task_state);
        assert!(!path.exists());
    }

    #[test]
    fn test_query_reports_current_task() {
        let master = Arc::new(ScriptedMaster::new(Vec::new()));
        let executor = Arc::new(StubExecutor::completing());
        let minion = minion("query", master, executor);
        {
            let mut state = minion.state.lock().unwrap();
            state.cur_task_id = 7;
            state.cur_attempt_id = 2;
            state.cur_task_state = pb::TaskState::Running;
        }

        let response = minion.query(minion_pb::QueryRequest { detail: false });
        assert_eq!("job_test", response.jobid);
        assert_eq!(7, response.task_id);
        assert_eq!(2, response.attempt_id);
        assert_eq!(pb::TaskState::Running, response.task_state);
    }

    #[test]
    fn test_query_silent_when_overloaded() {
        let master = Arc::new(ScriptedMaster::new(Vec::new()));
        let executor = Arc::new(StubExecutor::completing());
        let minion = minion("overloaded", master, executor);
        minion.watch.over_loaded.store(true, Ordering::SeqCst);

        let response = minion.query(minion_pb::QueryRequest { detail: false });
        assert_eq!(minion_pb::QueryResponse::default(), response);
    }

    #[test]
    fn test_query_silent_after_long_freeze() {
        let master = Arc::new(ScriptedMaster::new(Vec::new()));
        let executor = Arc::new(StubExecutor::completing());
        let minion = minion("frozen", master, executor);
        minion.watch.task_frozen.store(true, Ordering::SeqCst);
        *minion.watch.frozen_time.lock().unwrap() = Utc::now().timestamp() - 30;

        // A freshly frozen minion still answers.
        let response = minion.query(minion_pb::QueryRequest { detail: false });
        assert_eq!("job_test", response.jobid);

        *minion.watch.frozen_time.lock().unwrap() =
            Utc::now().timestamp() - FROZEN_BLACKOUT_SECS - 1;
        let response = minion.query(minion_pb::QueryRequest { detail: false });
        assert_eq!(minion_pb::QueryResponse::default(), response);
    }

    #[test]
    fn test_cancel_task_matches_current() {
        let master = Arc::new(ScriptedMaster::new(Vec::new()));
        let executor = Arc::new(StubExecutor::completing());
        let minion = minion("cancel", master, executor.clone());
        {
            let mut state = minion.state.lock().unwrap();
            state.cur_task_id = 4;
        }

        let response = minion.cancel_task(minion_pb::CancelTaskRequest {
            jobid: "job_test".to_owned(),
            task_id: 9,
            attempt_id: 1,
        });
        assert_eq!(pb::Status::NoSuchTask, response.status);

        let response = minion.cancel_task(minion_pb::CancelTaskRequest {
            jobid: "job_test".to_owned(),
            task_id: 4,
            attempt_id: 1,
        });
        assert_eq!(pb::Status::Ok, response.status);
        assert_eq!(vec![4], *executor.stopped.lock().unwrap());
    }
}
