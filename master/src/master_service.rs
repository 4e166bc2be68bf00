//! Routes minion and client RPCs to the job tracker that owns them, keeps
//! retracted trackers around for inspection, and garbage-collects them
//! once they have been dead long enough.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use charon_proto::job as pb;
use charon_proto::master as master_pb;
use config::MasterConfig;
use gru::{parse_priority, ClusterBackend};
use job_tracker::{JobEvent, JobTracker};
use minion_interface::MinionRpc;
use util::data_layer::AbstractionLayer;

const GC_PERIOD_SECS: u64 = 60;

pub struct MasterService {
    config: Arc<MasterConfig>,
    backend: Arc<ClusterBackend>,
    fs: Arc<AbstractionLayer>,
    rpc: Arc<MinionRpc>,
    events: Mutex<mpsc::Sender<JobEvent>>,
    trackers: Mutex<HashMap<String, Arc<JobTracker>>>,
    dead_trackers: Mutex<HashMap<String, Arc<JobTracker>>>,
}

impl MasterService {
    pub fn new(
        config: Arc<MasterConfig>,
        backend: Arc<ClusterBackend>,
        fs: Arc<AbstractionLayer>,
        rpc: Arc<MinionRpc>,
    ) -> Arc<MasterService> {
        let (sender, receiver) = mpsc::channel();
        let service = Arc::new(MasterService {
            config: config,
            backend: backend,
            fs: fs,
            rpc: rpc,
            events: Mutex::new(sender),
            trackers: Mutex::new(HashMap::new()),
            dead_trackers: Mutex::new(HashMap::new()),
        });
        MasterService::spawn_event_loop(&service, receiver);
        MasterService::spawn_gc(&service);
        service
    }

    fn spawn_event_loop(service: &Arc<MasterService>, receiver: Receiver<JobEvent>) {
        let weak = Arc::downgrade(service);
        thread::spawn(move || for event in receiver {
            let service = match weak.upgrade() {
                Some(service) => service,
                None => break,
            };
            match event {
                JobEvent::Retraction { jobid, end_state } => {
                    service.bury_tracker(&jobid, end_state)
                }
            }
        });
    }

    fn spawn_gc(service: &Arc<MasterService>) {
        let weak = Arc::downgrade(service);
        thread::spawn(move || loop {
            thread::sleep(Duration::from_secs(GC_PERIOD_SECS));
            let service = match weak.upgrade() {
                Some(service) => service,
                None => break,
            };
            service.collect_garbage();
        });
    }

    /// Moves a self-retracted tracker into the dead set.
    fn bury_tracker(&self, jobid: &str, end_state: pb::JobState) {
        let tracker = self.trackers.lock().unwrap().remove(jobid);
        if let Some(tracker) = tracker {
            info!("job retracted with {:?}: {}", end_state, jobid);
            self.dead_trackers
                .lock()
                .unwrap()
                .insert(jobid.to_owned(), tracker);
        }
    }

    fn collect_garbage(&self) {
        let now = Utc::now().timestamp();
        let mut dead = self.dead_trackers.lock().unwrap();
        let expired: Vec<String> = dead.iter()
            .filter(|&(_, tracker)| {
                let age = now - tracker.finish_time();
                age < 0 || age > self.config.gc_interval
            })
            .map(|(jobid, _)| jobid.clone())
            .collect();
        for jobid in expired {
            dead.remove(&jobid);
            info!("[gc] remove dead job tracker: {}", jobid);
        }
    }

    fn tracker(&self, jobid: &str) -> Option<Arc<JobTracker>> {
        self.trackers.lock().unwrap().get(jobid).cloned()
    }

    fn dead_tracker(&self, jobid: &str) -> Option<Arc<JobTracker>> {
        self.dead_trackers.lock().unwrap().get(jobid).cloned()
    }

    fn overview(jobid: &str, tracker: &JobTracker) -> master_pb::JobOverview {
        master_pb::JobOverview {
            jobid: jobid.to_owned(),
            desc: tracker.descriptor(),
            state: tracker.state(),
            map_stat: tracker.map_statistics(),
            reduce_stat: tracker.reduce_statistics(),
            start_time: tracker.start_time(),
            finish_time: tracker.finish_time(),
        }
    }

    pub fn submit_job(&self, request: master_pb::SubmitJobRequest) -> master_pb::SubmitJobResponse {
        info!("submit job: {}", request.job.name);
        let sender = self.events.lock().unwrap().clone();
        let tracker = JobTracker::new(
            Arc::clone(&self.config),
            Arc::clone(&self.backend),
            Arc::clone(&self.fs),
            Arc::clone(&self.rpc),
            sender,
            request.job,
        );
        let status = tracker.start();
        let jobid = tracker.jobid().to_owned();
        if status == pb::Status::Ok {
            self.trackers.lock().unwrap().insert(jobid.clone(), tracker);
        } else {
            self.dead_trackers
                .lock()
                .unwrap()
                .insert(jobid.clone(), tracker);
        }
        master_pb::SubmitJobResponse {
            status: status,
            jobid: jobid,
        }
    }

    pub fn update_job(&self, request: master_pb::UpdateJobRequest) -> master_pb::UpdateJobResponse {
        let priority = request.priority.as_ref().map(|raw| parse_priority(raw));
        let status = match self.tracker(&request.jobid) {
            Some(tracker) => {
                tracker.update(priority, request.map_capacity, request.reduce_capacity)
            }
            None => {
                warn!("try to update an inexist job: {}", request.jobid);
                pb::Status::NoSuchJob
            }
        };
        master_pb::UpdateJobResponse { status: status }
    }

    pub fn kill_job(&self, request: master_pb::KillJobRequest) -> master_pb::KillJobResponse {
        let status = if self.tracker(&request.jobid).is_some() {
            self.retract_job(&request.jobid, pb::JobState::Killed)
        } else {
            warn!("try to kill an inexist job: {}", request.jobid);
            pb::Status::NoSuchJob
        };
        master_pb::KillJobResponse { status: status }
    }

    /// Moves a job to the dead set and tears it down with `end_state`.
    pub fn retract_job(&self, jobid: &str, end_state: pb::JobState) -> pb::Status {
        let tracker = self.trackers.lock().unwrap().remove(jobid);
        match tracker {
            Some(tracker) => {
                self.dead_trackers
                    .lock()
                    .unwrap()
                    .insert(jobid.to_owned(), Arc::clone(&tracker));
                tracker.kill(end_state)
            }
            None => {
                warn!("retract job failed: job inexist: {}", jobid);
                pb::Status::NoSuchJob
            }
        }
    }

    pub fn list_jobs(&self, request: master_pb::ListJobsRequest) -> master_pb::ListJobsResponse {
        let mut jobs = Vec::new();
        for (jobid, tracker) in self.trackers.lock().unwrap().iter() {
            jobs.push(MasterService::overview(jobid, tracker));
        }
        if request.all {
            for (jobid, tracker) in self.dead_trackers.lock().unwrap().iter() {
                jobs.push(MasterService::overview(jobid, tracker));
            }
        }
        master_pb::ListJobsResponse { jobs: jobs }
    }

    pub fn show_job(&self, request: master_pb::ShowJobRequest) -> master_pb::ShowJobResponse {
        let tracker = match self.tracker(&request.jobid) {
            Some(tracker) => Some(tracker),
            None if request.all => self.dead_tracker(&request.jobid),
            None => None,
        };
        match tracker {
            Some(tracker) => {
                let counters = if request.show_detail {
                    tracker.counters()
                } else {
                    Default::default()
                };
                master_pb::ShowJobResponse {
                    status: pb::Status::Ok,
                    job: Some(MasterService::overview(&request.jobid, &tracker)),
                    error_msg: tracker.error_msg(),
                    counters: counters,
                }
            }
            None => {
                warn!("try to access an inexist job: {}", request.jobid);
                master_pb::ShowJobResponse {
                    status: pb::Status::NoSuchJob,
                    job: None,
                    error_msg: String::new(),
                    counters: Default::default(),
                }
            }
        }
    }

    pub fn assign_task(&self, request: master_pb::AssignTaskRequest)
        -> master_pb::AssignTaskResponse {
        let tracker = match self.tracker(&request.jobid) {
            Some(tracker) => tracker,
            None => {
                return if self.dead_tracker(&request.jobid).is_some() {
                    master_pb::AssignTaskResponse {
                        status: pb::Status::NoMore,
                        task: None,
                    }
                } else {
                    warn!("assign task failed: job inexist: {}", request.jobid);
                    master_pb::AssignTaskResponse {
                        status: pb::Status::NoSuchJob,
                        task: None,
                    }
                };
            }
        };
        if request.work_mode == pb::WorkMode::Reduce {
            let (item, status) = tracker.assign_reduce(&request.endpoint);
            let task = item.map(|item| {
                pb::TaskInfo {
                    task_id: item.no,
                    attempt_id: item.attempt,
                    input: None,
                    job: tracker.descriptor(),
                }
            });
            master_pb::AssignTaskResponse {
                status: status,
                task: task,
            }
        } else {
            let (item, status) = tracker.assign_map(&request.endpoint);
            let task = item.map(|item| {
                pb::TaskInfo {
                    task_id: item.no,
                    attempt_id: item.attempt,
                    input: Some(pb::TaskInput {
                        input_file: item.input_file.clone(),
                        offset: item.offset,
                        size: item.size,
                    }),
                    job: tracker.descriptor(),
                }
            });
            master_pb::AssignTaskResponse {
                status: status,
                task: task,
            }
        }
    }

    pub fn finish_task(&self, request: master_pb::FinishTaskRequest)
        -> master_pb::FinishTaskResponse {
        let tracker = match self.tracker(&request.jobid) {
            Some(tracker) => tracker,
            None => {
                let status = if self.dead_tracker(&request.jobid).is_some() {
                    pb::Status::Ok
                } else {
                    warn!("finish task failed: job inexist: {}", request.jobid);
                    pb::Status::NoSuchJob
                };
                return master_pb::FinishTaskResponse { status: status };
            }
        };
        let status = if request.work_mode == pb::WorkMode::Reduce {
            tracker.finish_reduce(
                request.task_id,
                request.attempt_id,
                request.task_state,
                &request.error_msg,
                &request.counters,
            )
        } else {
            tracker.finish_map(
                request.task_id,
                request.attempt_id,
                request.task_state,
                &request.error_msg,
                &request.counters,
            )
        };
        master_pb::FinishTaskResponse { status: status }
    }
}
