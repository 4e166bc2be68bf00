//! Per-job scheduling brain: hands work items to minions, accounts for
//! their reports, replicates stragglers during the end game, reaps
//! unresponsive attempts through a timeout monitor, and drives the job to
//! a terminal state.
//!
//! Lock order: the job core and the allocation ledger are never held at
//! the same time; resource managers are leaf locks acquired under either.

use std::cmp;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand;
use rand::Rng;

use charon_proto::job as pb;
use charon_proto::minion as minion_pb;
use config::MasterConfig;
use errors::*;
use gru::{ClusterBackend, Gru};
use minion_interface::MinionRpc;
use resource_manager::{IdItem, IdManager, ResourceItem, ResourceManager};
use resource_manager::{plan_byte_blocks, plan_nline};
use util::data_layer::AbstractionLayer;
use util::output_error;

/// How many heap entries one monitor wake may process.
const MONITOR_DRAIN_BUDGET: i32 = 10;
/// Chance that a wake probes workers that have not timed out yet.
const RANDOM_QUERY_RATE: f64 = 0.3;

/// One attempt of one item as recorded in the allocation ledger. Entries
/// are appended and restamped, never removed, until the tracker goes away.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocateItem {
    pub endpoint: String,
    pub resource_no: i32,
    pub attempt: i32,
    pub is_map: bool,
    pub alloc_time: i64,
    pub period: i64,
    pub state: pb::TaskState,
}

/// Notifications a tracker sends to the service that owns it.
#[derive(Clone, Debug, PartialEq)]
pub enum JobEvent {
    Retraction {
        jobid: String,
        end_state: pb::JobState,
    },
}

struct MonitorHandle {
    stop: Arc<AtomicBool>,
}

impl MonitorHandle {
    fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct JobCore {
    job: pb::JobDescriptor,
    state: pb::JobState,
    start_time: i64,
    finish_time: i64,
    error_msg: String,

    map_killed: i32,
    map_failed: i32,
    reduce_killed: i32,
    reduce_failed: i32,

    map_end_game_begin: i32,
    reduce_begin: i32,
    reduce_end_game_begin: i32,

    failed_count: HashMap<i32, i32>,
    failed_nodes: HashMap<i32, HashSet<String>>,
    ignore_failure_mappers: HashSet<i32>,
    ignore_failure_reducers: HashSet<i32>,
    ignored_map_failures: i32,
    ignored_reduce_failures: i32,

    map_dismissed: HashSet<String>,
    reduce_dismissed: HashSet<String>,

    counters: BTreeMap<String, i64>,

    map_gru: Option<Gru>,
    reduce_gru: Option<Gru>,
    map_monitoring: bool,
    reduce_monitoring: bool,
    map_monitor: Option<MonitorHandle>,
    reduce_monitor: Option<MonitorHandle>,
}

struct AllocState {
    table: Vec<AllocateItem>,
    map_index: HashMap<i32, HashMap<i32, usize>>,
    reduce_index: HashMap<i32, HashMap<i32, usize>>,
    time_heap: BinaryHeap<Reverse<(i64, usize)>>,
    map_slug: VecDeque<i32>,
    reduce_slug: VecDeque<i32>,
}

pub struct JobTracker {
    jobid: String,
    config: Arc<MasterConfig>,
    backend: Arc<ClusterBackend>,
    fs: Arc<AbstractionLayer>,
    rpc: Mutex<Option<Arc<MinionRpc>>>,
    events: Mutex<Sender<JobEvent>>,
    weak_self: Mutex<Weak<JobTracker>>,

    core: Mutex<JobCore>,
    alloc: Mutex<AllocState>,
    map_manager: Mutex<Option<ResourceManager>>,
    reduce_manager: Mutex<Option<IdManager>>,
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn host_of(endpoint: &str) -> String {
    endpoint.split(':').next().unwrap_or("").to_owned()
}

fn generate_job_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0, 1_000_000);
    format!("job_{}_{:06}", Utc::now().format("%Y%m%d_%H%M%S"), suffix)
}

fn accumulate_counters(core: &mut JobCore, counters: &BTreeMap<String, i64>, limit: usize) {
    for (key, value) in counters {
        if core.counters.contains_key(key) || core.counters.len() < limit {
            *core.counters.entry(key.clone()).or_insert(0) += *value;
        } else {
            warn!("too many counters, dropping {}", key);
        }
    }
}

impl JobTracker {
    pub fn new(
        config: Arc<MasterConfig>,
        backend: Arc<ClusterBackend>,
        fs: Arc<AbstractionLayer>,
        rpc: Arc<MinionRpc>,
        events: Sender<JobEvent>,
        mut job: pb::JobDescriptor,
    ) -> Arc<JobTracker> {
        if job.map_retry <= 0 {
            job.map_retry = config.retry_bound;
        }
        if job.reduce_retry <= 0 {
            job.reduce_retry = config.retry_bound;
        }
        if job.reduce_total > 0 && job.reduce_capacity > job.reduce_total * 2 {
            job.reduce_capacity = cmp::max(job.reduce_total * 2, 60);
        }

        let tracker = Arc::new(JobTracker {
            jobid: generate_job_id(),
            config: config,
            backend: backend,
            fs: fs,
            rpc: Mutex::new(Some(rpc)),
            events: Mutex::new(events),
            weak_self: Mutex::new(Weak::new()),
            core: Mutex::new(JobCore {
                job: job,
                state: pb::JobState::Pending,
                start_time: 0,
                finish_time: 0,
                error_msg: String::new(),
                map_killed: 0,
                map_failed: 0,
                reduce_killed: 0,
                reduce_failed: 0,
                map_end_game_begin: 0,
                reduce_begin: 0,
                reduce_end_game_begin: 0,
                failed_count: HashMap::new(),
                failed_nodes: HashMap::new(),
                ignore_failure_mappers: HashSet::new(),
                ignore_failure_reducers: HashSet::new(),
                ignored_map_failures: 0,
                ignored_reduce_failures: 0,
                map_dismissed: HashSet::new(),
                reduce_dismissed: HashSet::new(),
                counters: BTreeMap::new(),
                map_gru: None,
                reduce_gru: None,
                map_monitoring: false,
                reduce_monitoring: false,
                map_monitor: None,
                reduce_monitor: None,
            }),
            alloc: Mutex::new(AllocState {
                table: Vec::new(),
                map_index: HashMap::new(),
                reduce_index: HashMap::new(),
                time_heap: BinaryHeap::new(),
                map_slug: VecDeque::new(),
                reduce_slug: VecDeque::new(),
            }),
            map_manager: Mutex::new(None),
            reduce_manager: Mutex::new(None),
        });
        *tracker.weak_self.lock().unwrap() = Arc::downgrade(&tracker);
        tracker
    }

    pub fn jobid(&self) -> &str {
        &self.jobid
    }

    pub fn state(&self) -> pb::JobState {
        self.core.lock().unwrap().state
    }

    pub fn descriptor(&self) -> pb::JobDescriptor {
        self.core.lock().unwrap().job.clone()
    }

    pub fn start_time(&self) -> i64 {
        self.core.lock().unwrap().start_time
    }

    pub fn finish_time(&self) -> i64 {
        self.core.lock().unwrap().finish_time
    }

    pub fn error_msg(&self) -> String {
        self.core.lock().unwrap().error_msg.clone()
    }

    pub fn counters(&self) -> BTreeMap<String, i64> {
        self.core.lock().unwrap().counters.clone()
    }

    fn with_map_manager<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut ResourceManager) -> T,
    {
        let mut guard = self.map_manager.lock().unwrap();
        match *guard {
            Some(ref mut manager) => Some(f(manager)),
            None => None,
        }
    }

    fn with_reduce_manager<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut IdManager) -> T,
    {
        let mut guard = self.reduce_manager.lock().unwrap();
        match *guard {
            Some(ref mut manager) => Some(f(manager)),
            None => None,
        }
    }

    /// Validates the output target, carves the input into resource items
    /// and brings up the map worker group.
    pub fn start(&self) -> pb::Status {
        {
            let mut core = self.core.lock().unwrap();
            core.start_time = now_secs();
        }
        let job = self.descriptor();

        match self.fs.exists(Path::new(&job.output)) {
            Ok(false) => {}
            _ => {
                info!("output exists, failed: {}", self.jobid);
                let mut core = self.core.lock().unwrap();
                core.job.map_total = 0;
                core.job.reduce_total = 0;
                core.state = pb::JobState::Failed;
                return pb::Status::WriteFileFail;
            }
        }

        let block_size = if job.split_size > 0 {
            job.split_size
        } else {
            self.config.input_block_size
        };
        let spans = match job.input_format {
            pb::InputFormat::NLine => plan_nline(&*self.fs, &job.inputs),
            pb::InputFormat::ByteBlock => plan_byte_blocks(&*self.fs, &job.inputs, block_size),
        };
        let spans = match spans {
            Ok(spans) => spans,
            Err(err) => {
                warn!("unable to plan job input: {}", self.jobid);
                output_error(&err);
                let mut core = self.core.lock().unwrap();
                core.state = pb::JobState::Failed;
                return pb::Status::OpenFileFail;
            }
        };
        let sum_of_map = spans.len() as i32;
        *self.map_manager.lock().unwrap() = Some(ResourceManager::new(
            spans,
            self.config.parallel_attempts,
        ));
        {
            let mut core = self.core.lock().unwrap();
            core.job.map_total = sum_of_map;
            if sum_of_map < 1 {
                info!("map input may not exist, failed: {}", self.jobid);
                core.job.reduce_total = 0;
                core.state = pb::JobState::Failed;
                return pb::Status::OpenFileFail;
            }
            if core.job.job_type == pb::JobType::MapReduce {
                *self.reduce_manager.lock().unwrap() = Some(IdManager::new(
                    core.job.reduce_total,
                    self.config.parallel_attempts,
                ));
            }
        }
        self.build_end_game_counters();

        let job = self.descriptor();
        let mode = if job.job_type == pb::JobType::MapOnly {
            pb::WorkMode::MapOnly
        } else {
            pb::WorkMode::Map
        };
        match Gru::start(
            self.backend.clone(),
            &job,
            &self.jobid,
            mode,
            self.config.deploy_step,
        ) {
            Ok(gru) => {
                self.core.lock().unwrap().map_gru = Some(gru);
                info!("start a new map reduce job: {} -> {}", job.name, self.jobid);
                pb::Status::Ok
            }
            Err(err) => {
                warn!(
                    "cluster backend report error when submitting a new job: {}: {}",
                    job.name,
                    err
                );
                pb::Status::BackendError
            }
        }
    }

    fn build_end_game_counters(&self) {
        let sum_of_map = match self.with_map_manager(|m| m.sum_of_item()) {
            Some(n) => n,
            None => return,
        };
        let reduce_total = self.with_reduce_manager(|m| m.sum_of_item());

        let mut core = self.core.lock().unwrap();
        let mut end_game = sum_of_map - self.config.replica_begin;
        let by_percent = sum_of_map - sum_of_map * self.config.replica_begin_percent / 100;
        if end_game > by_percent {
            end_game = by_percent;
        }
        core.map_end_game_begin = end_game;

        if let Some(reduce_total) = reduce_total {
            core.reduce_begin = sum_of_map - sum_of_map * self.config.replica_begin_percent / 100;
            let mut reduce_end_game = reduce_total - self.config.replica_begin;
            let by_percent = reduce_total * self.config.replica_begin_percent / 100;
            if reduce_end_game < by_percent {
                reduce_end_game = by_percent;
            }
            core.reduce_end_game_begin = reduce_end_game;
        }
    }

    /// Adjusts priority and capacities of the running worker groups.
    pub fn update(
        &self,
        priority: Option<pb::JobPriority>,
        map_capacity: Option<i32>,
        reduce_capacity: Option<i32>,
    ) -> pb::Status {
        let (map_group, reduce_group) = {
            let core = self.core.lock().unwrap();
            (
                core.map_gru.as_ref().map(|g| g.group_id().to_owned()),
                core.reduce_gru.as_ref().map(|g| g.group_id().to_owned()),
            )
        };

        if let Some(group_id) = map_group {
            let capacity = map_capacity.unwrap_or(-1);
            if self.backend.update(&group_id, priority, capacity).is_err() {
                return pb::Status::BackendError;
            }
            let mut core = self.core.lock().unwrap();
            if let Some(capacity) = map_capacity {
                core.job.map_capacity = capacity;
            }
            if let Some(priority) = priority {
                core.job.priority = priority;
            }
        }
        if let Some(group_id) = reduce_group {
            let capacity = reduce_capacity.unwrap_or(-1);
            if self.backend.update(&group_id, priority, capacity).is_err() {
                return pb::Status::BackendError;
            }
            let mut core = self.core.lock().unwrap();
            if let Some(capacity) = reduce_capacity {
                core.job.reduce_capacity = capacity;
            }
            if let Some(priority) = priority {
                core.job.priority = priority;
            }
        }
        pb::Status::Ok
    }

    /// Tears the job down: worker groups removed, monitors stopped, every
    /// running attempt marked killed, terminal state stamped.
    pub fn kill(&self, end_state: pb::JobState) -> pb::Status {
        let (map_gru, reduce_gru) = {
            let mut core = self.core.lock().unwrap();
            if let Some(monitor) = core.map_monitor.take() {
                monitor.stop();
            }
            if let Some(monitor) = core.reduce_monitor.take() {
                monitor.stop();
            }
            core.state = end_state;
            (core.map_gru.take(), core.reduce_gru.take())
        };
        if let Some(gru) = map_gru {
            info!("map minions finished, kill: {}", self.jobid);
            gru.kill();
        }
        if let Some(gru) = reduce_gru {
            info!("reduce minions finished, kill: {}", self.jobid);
            gru.kill();
        }

        let (map_killed, reduce_killed) = {
            let mut alloc = self.alloc.lock().unwrap();
            let now = now_secs();
            let mut map_killed = 0;
            let mut reduce_killed = 0;
            for entry in &mut alloc.table {
                if entry.state == pb::TaskState::Running {
                    entry.state = pb::TaskState::Killed;
                    entry.period = now - entry.alloc_time;
                    if entry.is_map {
                        map_killed += 1;
                    } else {
                        reduce_killed += 1;
                    }
                }
            }
            (map_killed, reduce_killed)
        };
        {
            let mut core = self.core.lock().unwrap();
            core.map_killed += map_killed;
            core.reduce_killed += reduce_killed;
            core.finish_time = now_secs();
        }
        *self.rpc.lock().unwrap() = None;
        pb::Status::Ok
    }

    /// Kills the job locally and tells the owning service to move it to
    /// the dead set.
    fn retract(&self, end_state: pb::JobState) {
        self.kill(end_state);
        let event = JobEvent::Retraction {
            jobid: self.jobid.clone(),
            end_state: end_state,
        };
        let _ = self.events.lock().unwrap().send(event);
    }

    fn can_map_dismiss(&self, endpoint: &str) -> pb::Status {
        let completed = self.with_map_manager(|m| m.done()).unwrap_or(0);
        let mut core = self.core.lock().unwrap();
        let not_done = core.job.map_total - completed;
        let reserve =
            (cmp::max(not_done, 5) as f64 * self.config.left_percent as f64 / 100.0).ceil() as i32;
        let dismiss_minion_num = core.job.map_capacity - reserve;
        if core.job.map_capacity > not_done {
            if core.map_dismissed.len() as i32 >= dismiss_minion_num {
                debug!("assign map: suspend: {}", self.jobid);
                pb::Status::Suspend
            } else {
                core.map_dismissed.insert(endpoint.to_owned());
                info!("assign map: no more: {}, {}", self.jobid, endpoint);
                pb::Status::NoMore
            }
        } else {
            pb::Status::Suspend
        }
    }

    fn can_reduce_dismiss(&self, endpoint: &str) -> pb::Status {
        let completed = self.with_reduce_manager(|m| m.done()).unwrap_or(0);
        let mut core = self.core.lock().unwrap();
        let not_done = core.job.reduce_total - completed;
        let reserve =
            (cmp::max(not_done, 5) as f64 * self.config.left_percent as f64 / 100.0).ceil() as i32;
        let dismiss_minion_num = core.job.reduce_capacity - reserve;
        if core.job.reduce_capacity > not_done {
            if core.reduce_dismissed.len() as i32 >= dismiss_minion_num {
                debug!("assign reduce: suspend: {}", self.jobid);
                pb::Status::Suspend
            } else {
                core.reduce_dismissed.insert(endpoint.to_owned());
                info!("assign reduce: no more: {}, {}", self.jobid, endpoint);
                pb::Status::NoMore
            }
        } else {
            pb::Status::Suspend
        }
    }

    fn pop_map_slug(&self) -> Option<i32> {
        let mut alloc = self.alloc.lock().unwrap();
        loop {
            let front = match alloc.map_slug.front() {
                Some(&no) => no,
                None => return None,
            };
            if self.with_map_manager(|m| m.is_allocated(front)).unwrap_or(false) {
                return alloc.map_slug.pop_front();
            }
            info!("map slug drop stale hint: map_{}", front);
            alloc.map_slug.pop_front();
        }
    }

    fn pop_reduce_slug(&self) -> Option<i32> {
        let mut alloc = self.alloc.lock().unwrap();
        loop {
            let front = match alloc.reduce_slug.front() {
                Some(&no) => no,
                None => return None,
            };
            if self.with_reduce_manager(|m| m.is_allocated(front)).unwrap_or(false) {
                return alloc.reduce_slug.pop_front();
            }
            info!("reduce slug drop stale hint: reduce_{}", front);
            alloc.reduce_slug.pop_front();
        }
    }

    fn record_allocation(&self, endpoint: &str, no: i32, attempt: i32, is_map: bool) {
        let mut alloc = self.alloc.lock().unwrap();
        let AllocState {
            ref mut table,
            ref mut map_index,
            ref mut reduce_index,
            ref mut time_heap,
            ..
        } = *alloc;
        let alloc_time = now_secs();
        let index = table.len();
        table.push(AllocateItem {
            endpoint: endpoint.to_owned(),
            resource_no: no,
            attempt: attempt,
            is_map: is_map,
            alloc_time: alloc_time,
            period: -1,
            state: pb::TaskState::Running,
        });
        let lookup = if is_map { map_index } else { reduce_index };
        lookup
            .entry(no)
            .or_insert_with(HashMap::new)
            .insert(attempt, index);
        time_heap.push(Reverse((alloc_time, index)));
    }

    /// Hands a map item to the minion at `endpoint`, preferring slug-queue
    /// hints once the fresh pool is drained.
    pub fn assign_map(&self, endpoint: &str) -> (Option<ResourceItem>, pb::Status) {
        let (allow_duplicates, end_game_begin) = {
            let mut core = self.core.lock().unwrap();
            if core.state == pb::JobState::Pending {
                core.state = pb::JobState::Running;
            }
            (core.job.map_allow_duplicates, core.map_end_game_begin)
        };

        let item = match self.with_map_manager(|m| m.get_item()).unwrap_or(None) {
            Some(item) => {
                if allow_duplicates && item.no >= end_game_begin {
                    let mut alloc = self.alloc.lock().unwrap();
                    for _ in 0..self.config.replica_num {
                        alloc.map_slug.push_back(item.no);
                    }
                }
                item
            }
            None => {
                let certain = match self.pop_map_slug() {
                    Some(no) => {
                        info!("get certain item for: map_{}", no);
                        self.with_map_manager(|m| m.get_certain_item(no)).unwrap_or(None)
                    }
                    None => None,
                };
                match certain {
                    Some(item) => item,
                    None => return (None, self.can_map_dismiss(endpoint)),
                }
            }
        };

        {
            let mut core = self.core.lock().unwrap();
            if item.no >= core.map_end_game_begin && !core.map_monitoring {
                core.map_monitor = Some(self.spawn_monitor(true));
                core.map_monitoring = true;
            }
        }
        self.record_allocation(endpoint, item.no, item.attempt, true);
        info!(
            "assign map: < no - {}, attempt - {} >, to {}: {}",
            item.no,
            item.attempt,
            endpoint,
            self.jobid
        );
        (Some(item), pb::Status::Ok)
    }

    /// Hands a reduce partition to the minion at `endpoint`. Gated until
    /// enough maps are done to make shuffle input available.
    pub fn assign_reduce(&self, endpoint: &str) -> (Option<IdItem>, pb::Status) {
        let (allow_duplicates, end_game_begin, reduce_begin) = {
            let mut core = self.core.lock().unwrap();
            if core.state == pb::JobState::Pending {
                core.state = pb::JobState::Running;
            }
            (
                core.job.reduce_allow_duplicates,
                core.reduce_end_game_begin,
                core.reduce_begin,
            )
        };
        if self.reduce_manager.lock().unwrap().is_none() {
            return (None, pb::Status::NoMore);
        }
        let map_done = self.with_map_manager(|m| m.done()).unwrap_or(0);
        if map_done < reduce_begin {
            debug!("assign reduce: map phase too early: {}", self.jobid);
            return (None, pb::Status::Suspend);
        }

        let item = match self.with_reduce_manager(|m| m.get_item()).unwrap_or(None) {
            Some(item) => {
                if allow_duplicates && item.no >= end_game_begin {
                    let mut alloc = self.alloc.lock().unwrap();
                    for _ in 0..self.config.replica_num {
                        alloc.reduce_slug.push_back(item.no);
                    }
                }
                item
            }
            None => {
                let certain = match self.pop_reduce_slug() {
                    Some(no) => {
                        info!("get certain item for: reduce_{}", no);
                        self.with_reduce_manager(|m| m.get_certain_item(no)).unwrap_or(None)
                    }
                    None => None,
                };
                match certain {
                    Some(item) => item,
                    None => return (None, self.can_reduce_dismiss(endpoint)),
                }
            }
        };

        {
            let mut core = self.core.lock().unwrap();
            if item.no >= core.reduce_end_game_begin && !core.reduce_monitoring {
                core.reduce_monitor = Some(self.spawn_monitor(false));
                core.reduce_monitoring = true;
            }
        }
        self.record_allocation(endpoint, item.no, item.attempt, false);
        info!(
            "assign reduce: < no - {}, attempt - {} >, to {}: {}",
            item.no,
            item.attempt,
            endpoint,
            self.jobid
        );
        (Some(item), pb::Status::Ok)
    }

    fn write_empty_shuffle_stub(&self, output: &str, no: i32) -> Result<()> {
        let dir = format!("{}/_temporary/shuffle/map_{}", output, no);
        self.fs.create_dir_all(Path::new(&dir)).chain_err(|| {
            format!("Unable to create shuffle stub directory {}", dir)
        })?;
        let sort_file = format!("{}/0.sort", dir);
        warn!("make an empty sort file: {}", sort_file);
        self.fs
            .create_file(Path::new(&sort_file))
            .map(|_| ())
            .chain_err(|| format!("Unable to create shuffle stub {}", sort_file))
    }

    /// Accounts for a map attempt report and drives the map phase state
    /// machine: retries, failure masking, reduce spawn and phase turnover.
    pub fn finish_map(
        &self,
        no: i32,
        attempt: i32,
        state: pb::TaskState,
        err_msg: &str,
        counters: &BTreeMap<String, i64>,
    ) -> pb::Status {
        let allow_duplicates = self.core.lock().unwrap().job.map_allow_duplicates;
        let (index, endpoint) = {
            let alloc = self.alloc.lock().unwrap();
            let found = alloc
                .map_index
                .get(&no)
                .and_then(|attempts| attempts.get(&attempt))
                .cloned();
            match found {
                Some(index) if alloc.table[index].state == pb::TaskState::Running => {
                    (index, alloc.table[index].endpoint.clone())
                }
                _ => {
                    warn!(
                        "try to finish an inexist map task: < no - {}, attempt - {} >: {}",
                        no,
                        attempt,
                        self.jobid
                    );
                    return pb::Status::NoMore;
                }
            }
        };
        info!(
            "finish a map task: < no - {}, attempt - {} >, state {:?}: {}",
            no,
            attempt,
            state,
            self.jobid
        );

        let mut state = state;
        if state == pb::TaskState::MoveOutputFailed {
            state = if !self.with_map_manager(|m| m.is_done(no)).unwrap_or(false) {
                pb::TaskState::Failed
            } else {
                pb::TaskState::Canceled
            };
        }
        let cur_node = host_of(&endpoint);

        let mut finished = false;
        {
            let mut core = self.core.lock().unwrap();
            if state == pb::TaskState::Failed && core.ignore_failure_mappers.contains(&no) {
                warn!("mask map_{} of {} as completed", no, self.jobid);
                state = pb::TaskState::Completed;
                if core.job.job_type != pb::JobType::MapOnly {
                    let output = core.job.output.clone();
                    drop(core);
                    let stub = self.write_empty_shuffle_stub(&output, no);
                    core = self.core.lock().unwrap();
                    if let Err(err) = stub {
                        output_error(&err);
                        state = pb::TaskState::Failed;
                    }
                }
            }
            match state {
                pb::TaskState::Completed => {
                    if !self.with_map_manager(|m| m.finish_item(no)).unwrap_or(false) {
                        warn!("ignore finish map request: {}, {}", self.jobid, no);
                        state = pb::TaskState::Canceled;
                    } else {
                        accumulate_counters(&mut core, counters, self.config.max_counters_per_job);
                        let completed = self.with_map_manager(|m| m.done()).unwrap_or(0);
                        let total = core.job.map_total;
                        info!(
                            "complete a map task({}/{}): {}",
                            completed,
                            total,
                            self.jobid
                        );
                        if completed == core.reduce_begin &&
                            core.job.job_type != pb::JobType::MapOnly
                        {
                            info!(
                                "map phase nearly ends, pull up reduce tasks: {}",
                                self.jobid
                            );
                            let descriptor = core.job.clone();
                            drop(core);
                            let gru = Gru::start(
                                self.backend.clone(),
                                &descriptor,
                                &self.jobid,
                                pb::WorkMode::Reduce,
                                self.config.deploy_step,
                            );
                            core = self.core.lock().unwrap();
                            match gru {
                                Ok(gru) => core.reduce_gru = Some(gru),
                                Err(err) => {
                                    warn!(
                                        "reduce failed due to cluster backend issue: {}: {}",
                                        self.jobid,
                                        err
                                    );
                                    core.error_msg =
                                        "failed to submit reduce worker group".to_owned();
                                    drop(core);
                                    self.retract(pb::JobState::Failed);
                                    core = self.core.lock().unwrap();
                                    core.state = pb::JobState::Failed;
                                    finished = true;
                                }
                            }
                        }
                        if completed == total {
                            if core.job.job_type == pb::JobType::MapOnly {
                                info!("map-only job finish: {}", self.jobid);
                                let output = core.job.output.clone();
                                drop(core);
                                let tmp_dir = format!("{}/_temporary", output);
                                if let Err(err) = self.fs.remove(Path::new(&tmp_dir)) {
                                    warn!("remove temp directory failed: {}", err);
                                }
                                self.retract(pb::JobState::Completed);
                                core = self.core.lock().unwrap();
                                core.state = pb::JobState::Completed;
                                finished = true;
                            } else {
                                info!("map phase ends now: {}", self.jobid);
                                core.failed_count.clear();
                                core.failed_nodes.clear();
                                drop(core);
                                {
                                    // Reduce entries survive the turnover, map
                                    // entries leave the heap with the phase.
                                    let mut alloc = self.alloc.lock().unwrap();
                                    let AllocState {
                                        ref mut time_heap,
                                        ref table,
                                        ..
                                    } = *alloc;
                                    let rest: Vec<Reverse<(i64, usize)>> = time_heap
                                        .drain()
                                        .filter(|&Reverse((_, index))| !table[index].is_map)
                                        .collect();
                                    for entry in rest {
                                        time_heap.push(entry);
                                    }
                                }
                                core = self.core.lock().unwrap();
                                if let Some(monitor) = core.map_monitor.take() {
                                    monitor.stop();
                                }
                                if core.reduce_monitoring && core.reduce_monitor.is_none() {
                                    core.reduce_monitor = Some(self.spawn_monitor(false));
                                }
                                if let Some(gru) = core.map_gru.take() {
                                    info!("map minions finished, kill: {}", self.jobid);
                                    drop(core);
                                    gru.kill();
                                    core = self.core.lock().unwrap();
                                }
                            }
                        }
                    }
                }
                pb::TaskState::Failed => {
                    self.with_map_manager(|m| m.return_back_item(no));
                    let first_on_node = core.failed_nodes
                        .entry(no)
                        .or_insert_with(HashSet::new)
                        .insert(cur_node.clone());
                    if first_on_node {
                        *core.failed_count.entry(no).or_insert(0) += 1;
                        warn!(
                            "failed map task: job: {}, no: {}, attempt: {}, node: {}",
                            self.jobid,
                            no,
                            attempt,
                            cur_node
                        );
                    }
                    core.map_failed += 1;
                    let failures = core.failed_count.get(&no).cloned().unwrap_or(0);
                    if failures >= core.job.map_retry {
                        if core.ignored_map_failures < core.job.ignore_map_failures {
                            core.ignore_failure_mappers.insert(no);
                            core.ignored_map_failures += 1;
                            warn!("ignore failure of map_{}: {}", no, self.jobid);
                        } else {
                            info!("map failed, kill job: {}", self.jobid);
                            warn!("=== error msg ===");
                            warn!("{}", err_msg);
                            core.error_msg = err_msg.to_owned();
                            drop(core);
                            self.retract(pb::JobState::Failed);
                            core = self.core.lock().unwrap();
                            core.state = pb::JobState::Failed;
                            finished = true;
                        }
                    }
                }
                pb::TaskState::Killed => {
                    self.with_map_manager(|m| m.return_back_item(no));
                    core.map_killed += 1;
                }
                pb::TaskState::Canceled => {
                    if !self.with_map_manager(|m| m.is_done(no)).unwrap_or(false) {
                        self.with_map_manager(|m| m.return_back_item(no));
                    }
                }
                _ => {
                    warn!("unfamiliar task finish state: {:?}", state);
                    return pb::Status::NoMore;
                }
            }
        }

        {
            let mut alloc = self.alloc.lock().unwrap();
            let now = now_secs();
            {
                let entry = &mut alloc.table[index];
                entry.state = state;
                entry.period = now - entry.alloc_time;
            }
            if allow_duplicates &&
                (state == pb::TaskState::Killed || state == pb::TaskState::Failed)
            {
                alloc.map_slug.push_back(no);
            }
        }

        if state != pb::TaskState::Completed {
            return pb::Status::Ok;
        }
        if !allow_duplicates {
            return pb::Status::Ok;
        }
        self.cancel_other_attempts(true, no, attempt);
        if finished {
            *self.rpc.lock().unwrap() = None;
        }
        pb::Status::Ok
    }

    /// Accounts for a reduce attempt report. Reports other than kills are
    /// rejected with `Suspend` until every map is done.
    pub fn finish_reduce(
        &self,
        no: i32,
        attempt: i32,
        state: pb::TaskState,
        err_msg: &str,
        counters: &BTreeMap<String, i64>,
    ) -> pb::Status {
        let (allow_duplicates, map_total) = {
            let core = self.core.lock().unwrap();
            (core.job.reduce_allow_duplicates, core.job.map_total)
        };
        let map_done = self.with_map_manager(|m| m.done()).unwrap_or(0);
        if map_done < map_total && state != pb::TaskState::Killed {
            warn!("reduce finish too early, wait a moment: {}", self.jobid);
            return pb::Status::Suspend;
        }

        let (index, endpoint) = {
            let alloc = self.alloc.lock().unwrap();
            let found = alloc
                .reduce_index
                .get(&no)
                .and_then(|attempts| attempts.get(&attempt))
                .cloned();
            match found {
                Some(index) if alloc.table[index].state == pb::TaskState::Running => {
                    (index, alloc.table[index].endpoint.clone())
                }
                _ => {
                    warn!(
                        "try to finish an inexist reduce task: < no - {}, attempt - {} >: {}",
                        no,
                        attempt,
                        self.jobid
                    );
                    return pb::Status::NoMore;
                }
            }
        };
        info!(
            "finish a reduce task: < no - {}, attempt - {} >, state {:?}: {}",
            no,
            attempt,
            state,
            self.jobid
        );

        let mut state = state;
        if state == pb::TaskState::MoveOutputFailed {
            state = if !self.with_reduce_manager(|m| m.is_done(no)).unwrap_or(false) {
                pb::TaskState::Failed
            } else {
                pb::TaskState::Canceled
            };
        }
        let cur_node = host_of(&endpoint);

        let mut finished = false;
        {
            let mut core = self.core.lock().unwrap();
            if state == pb::TaskState::Failed && core.ignore_failure_reducers.contains(&no) {
                warn!("mask reduce_{} of {} as completed", no, self.jobid);
                state = pb::TaskState::Completed;
            }
            match state {
                pb::TaskState::Completed => {
                    if !self.with_reduce_manager(|m| m.finish_item(no)).unwrap_or(false) {
                        warn!("ignore finish reduce request: {}, {}", self.jobid, no);
                        state = pb::TaskState::Canceled;
                    } else {
                        accumulate_counters(&mut core, counters, self.config.max_counters_per_job);
                        let completed = self.with_reduce_manager(|m| m.done()).unwrap_or(0);
                        let total = core.job.reduce_total;
                        info!(
                            "complete a reduce task({}/{}): {}",
                            completed,
                            total,
                            self.jobid
                        );
                        if completed == total {
                            info!("map-reduce job finish: {}", self.jobid);
                            let output = core.job.output.clone();
                            drop(core);
                            let tmp_dir = format!("{}/_temporary", output);
                            info!("remove temp work directory: {}", tmp_dir);
                            if let Err(err) = self.fs.remove(Path::new(&tmp_dir)) {
                                warn!("remove temp directory failed: {}", err);
                            }
                            self.retract(pb::JobState::Completed);
                            core = self.core.lock().unwrap();
                            core.state = pb::JobState::Completed;
                            finished = true;
                        }
                    }
                }
                pb::TaskState::Failed => {
                    self.with_reduce_manager(|m| m.return_back_item(no));
                    let first_on_node = core.failed_nodes
                        .entry(no)
                        .or_insert_with(HashSet::new)
                        .insert(cur_node.clone());
                    if first_on_node {
                        *core.failed_count.entry(no).or_insert(0) += 1;
                        warn!(
                            "failed reduce task: job: {}, no: {}, attempt: {}, node: {}",
                            self.jobid,
                            no,
                            attempt,
                            cur_node
                        );
                    }
                    core.reduce_failed += 1;
                    let failures = core.failed_count.get(&no).cloned().unwrap_or(0);
                    if failures >= core.job.reduce_retry {
                        if core.ignored_reduce_failures < core.job.ignore_reduce_failures {
                            core.ignore_failure_reducers.insert(no);
                            core.ignored_reduce_failures += 1;
                            warn!("ignore failure of reduce_{}: {}", no, self.jobid);
                        } else {
                            info!("reduce failed, kill job: {}", self.jobid);
                            warn!("=== error msg ===");
                            warn!("{}", err_msg);
                            core.error_msg = err_msg.to_owned();
                            drop(core);
                            self.retract(pb::JobState::Failed);
                            core = self.core.lock().unwrap();
                            core.state = pb::JobState::Failed;
                            finished = true;
                        }
                    }
                }
                pb::TaskState::Killed => {
                    self.with_reduce_manager(|m| m.return_back_item(no));
                    core.reduce_killed += 1;
                }
                pb::TaskState::Canceled => {
                    if !self.with_reduce_manager(|m| m.is_done(no)).unwrap_or(false) {
                        self.with_reduce_manager(|m| m.return_back_item(no));
                    }
                }
                _ => {
                    warn!("unfamiliar task finish state: {:?}", state);
                    return pb::Status::NoMore;
                }
            }
        }

        {
            let mut alloc = self.alloc.lock().unwrap();
            let now = now_secs();
            {
                let entry = &mut alloc.table[index];
                entry.state = state;
                entry.period = now - entry.alloc_time;
            }
            if allow_duplicates &&
                (state == pb::TaskState::Killed || state == pb::TaskState::Failed)
            {
                alloc.reduce_slug.push_back(no);
            }
        }

        if state != pb::TaskState::Completed {
            return pb::Status::Ok;
        }
        if !allow_duplicates {
            return pb::Status::Ok;
        }
        self.cancel_other_attempts(false, no, attempt);
        if finished {
            *self.rpc.lock().unwrap() = None;
        }
        pb::Status::Ok
    }

    /// Marks every other attempt of a won item canceled and tells its
    /// minion to stop, fire-and-forget.
    fn cancel_other_attempts(&self, is_map: bool, no: i32, attempt: i32) {
        let rpc = match self.rpc.lock().unwrap().clone() {
            Some(rpc) => rpc,
            None => return,
        };
        let victims = {
            let mut alloc = self.alloc.lock().unwrap();
            let now = now_secs();
            let AllocState {
                ref mut table,
                ref map_index,
                ref reduce_index,
                ..
            } = *alloc;
            let lookup = if is_map { map_index } else { reduce_index };
            let mut victims = Vec::new();
            if let Some(attempts) = lookup.get(&no) {
                for (&other, &index) in attempts {
                    if other == attempt {
                        continue;
                    }
                    let entry = &mut table[index];
                    entry.state = pb::TaskState::Canceled;
                    entry.period = now - entry.alloc_time;
                    victims.push((entry.endpoint.clone(), other));
                }
            }
            victims
        };
        for (endpoint, other) in victims {
            info!(
                "cancel {} task: job: {}, task: {}, attempt: {}",
                if is_map { "map" } else { "reduce" },
                self.jobid,
                no,
                other
            );
            let rpc = rpc.clone();
            let request = minion_pb::CancelTaskRequest {
                jobid: self.jobid.clone(),
                task_id: no,
                attempt_id: other,
            };
            thread::spawn(move || if let Err(err) = rpc.cancel_task(&endpoint, &request) {
                warn!("fail to cancel task on {}: {}", endpoint, err);
            });
        }
    }

    fn spawn_monitor(&self, map_now: bool) -> MonitorHandle {
        let weak = self.weak_self.lock().unwrap().clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        thread::spawn(move || loop {
            if stop_flag.load(Ordering::SeqCst) {
                return;
            }
            let sleep_secs = {
                let tracker = match weak.upgrade() {
                    Some(tracker) => tracker,
                    None => return,
                };
                tracker.monitor_pass(map_now)
            };
            let steps = cmp::max(sleep_secs, 1) * 4;
            for _ in 0..steps {
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(Duration::from_millis(250));
            }
        });
        MonitorHandle { stop: stop }
    }

    fn monitor_pass(&self, map_now: bool) -> i64 {
        info!(
            "[monitor] {} monitor starts to check timeout: {}",
            if map_now { "map" } else { "reduce" },
            self.jobid
        );
        let need_random_query = rand::random::<f64>() < RANDOM_QUERY_RATE;
        self.monitor_pass_with(map_now, need_random_query)
    }

    /// One monitor wake. Returns the number of seconds until the next one.
    fn monitor_pass_with(&self, map_now: bool, need_random_query: bool) -> i64 {
        let mut periods: Vec<i64> = {
            let alloc = self.alloc.lock().unwrap();
            alloc
                .table
                .iter()
                .filter(|entry| {
                    entry.is_map == map_now && entry.state == pb::TaskState::Completed
                })
                .map(|entry| entry.period)
                .collect()
        };
        let timeout = if !periods.is_empty() {
            periods.sort();
            let median = periods[periods.len() / 2];
            let timeout = median + median / 5;
            info!("[monitor] calc timeout bound, {}: {}", timeout, self.jobid);
            timeout
        } else if !need_random_query {
            info!(
                "[monitor] will now rest for {}s: {}",
                self.config.first_sleeptime,
                self.jobid
            );
            return self.config.first_sleeptime;
        } else {
            0
        };
        let not_allow_duplicates = {
            let core = self.core.lock().unwrap();
            if map_now {
                !core.job.map_allow_duplicates
            } else {
                !core.job.reduce_allow_duplicates
            }
        };
        let sleep_time = cmp::min(self.config.time_tolerance, timeout);

        let mut budget = MONITOR_DRAIN_BUDGET;
        let mut returned: Vec<Reverse<(i64, usize)>> = Vec::new();
        let mut killed_now = 0;
        let mut alloc = self.alloc.lock().unwrap();
        let now = now_secs();
        while budget > 0 {
            let Reverse((alloc_time, index)) = match alloc.time_heap.peek() {
                Some(&entry) => entry,
                None => break,
            };
            if now - alloc_time < sleep_time {
                break;
            }
            alloc.time_heap.pop();
            budget -= 1;
            if alloc.table[index].state != pb::TaskState::Running {
                budget += 1;
                continue;
            }
            if alloc.table[index].is_map != map_now {
                budget += 1;
                returned.push(Reverse((alloc_time, index)));
                continue;
            }
            let no = alloc.table[index].resource_no;
            let attempt = alloc.table[index].attempt;
            let endpoint = alloc.table[index].endpoint.clone();

            if not_allow_duplicates || (now - alloc_time < timeout) || need_random_query {
                let rpc = match self.rpc.lock().unwrap().clone() {
                    Some(rpc) => rpc,
                    None => {
                        returned.push(Reverse((alloc_time, index)));
                        break;
                    }
                };
                drop(alloc);
                info!(
                    "[monitor] query {} with <{}, {}>: {}",
                    endpoint,
                    no,
                    attempt,
                    self.jobid
                );
                let response = rpc.query(&endpoint);
                alloc = self.alloc.lock().unwrap();

                let confirmed = match response {
                    Ok(ref resp) => {
                        resp.jobid == self.jobid && resp.task_id == no &&
                            resp.attempt_id == attempt
                    }
                    Err(_) => false,
                };
                if confirmed {
                    budget += 1;
                    returned.push(Reverse((alloc_time, index)));
                    continue;
                }
                let absent_everywhere = response.is_ok() &&
                    !if map_now {
                        self.with_map_manager(|m| m.is_allocated(no)).unwrap_or(false)
                    } else {
                        self.with_reduce_manager(|m| m.is_allocated(no)).unwrap_or(false)
                    };
                if absent_everywhere {
                    if alloc.table[index].state == pb::TaskState::Running {
                        alloc.table[index].state = pb::TaskState::Killed;
                        alloc.table[index].period = now_secs() - alloc_time;
                        killed_now += 1;
                    }
                    budget += 1;
                    continue;
                }
                info!(
                    "[monitor] query lost track of <{}, {}>: {}",
                    no,
                    attempt,
                    self.jobid
                );
                if alloc.table[index].state == pb::TaskState::Running {
                    alloc.table[index].state = pb::TaskState::Killed;
                    alloc.table[index].period = now_secs() - alloc_time;
                    killed_now += 1;
                }
            }

            let entry_state = alloc.table[index].state;
            if attempt >= self.config.parallel_attempts - 1 &&
                entry_state == pb::TaskState::Running
            {
                // Maxed-out attempts are not reallocated, only watched.
                budget += 1;
                returned.push(Reverse((alloc_time, index)));
                let slug_len = if map_now {
                    alloc.map_slug.len()
                } else {
                    alloc.reduce_slug.len()
                };
                let index_len = if map_now {
                    alloc.map_index.len()
                } else {
                    alloc.reduce_index.len()
                };
                if slug_len > index_len {
                    continue;
                }
            }
            if entry_state == pb::TaskState::Killed {
                if map_now {
                    self.with_map_manager(|m| m.return_back_item(no));
                } else {
                    self.with_reduce_manager(|m| m.return_back_item(no));
                }
            }
            if map_now {
                alloc.map_slug.push_back(no);
            } else {
                alloc.reduce_slug.push_back(no);
            }
            info!(
                "reallocate a long no-response task: < no - {}, attempt - {} >: {}",
                no,
                attempt,
                self.jobid
            );
        }
        for entry in returned {
            alloc.time_heap.push(entry);
        }
        drop(alloc);

        if killed_now > 0 {
            let mut core = self.core.lock().unwrap();
            if map_now {
                core.map_killed += killed_now;
            } else {
                core.reduce_killed += killed_now;
            }
        }
        let sleep_time = cmp::max(sleep_time, 1);
        info!(
            "[monitor] will now rest for {}s: {}",
            sleep_time,
            self.jobid
        );
        sleep_time
    }

    pub fn map_statistics(&self) -> pb::TaskStatistics {
        let (pending, running, completed) = self.with_map_manager(|m| {
            (m.pending(), m.allocated(), m.done())
        }).unwrap_or((0, 0, 0));
        let core = self.core.lock().unwrap();
        pb::TaskStatistics {
            total: core.job.map_total,
            pending: pending,
            running: running,
            failed: core.map_failed,
            killed: core.map_killed,
            completed: completed,
        }
    }

    pub fn reduce_statistics(&self) -> pb::TaskStatistics {
        let (pending, running, completed) = self.with_reduce_manager(|m| {
            (m.pending(), m.allocated(), m.done())
        }).unwrap_or((0, 0, 0));
        let core = self.core.lock().unwrap();
        pb::TaskStatistics {
            total: core.job.reduce_total,
            pending: pending,
            running: running,
            failed: core.reduce_failed,
            killed: core.reduce_killed,
            completed: completed,
        }
    }

    pub fn history_for_dump(&self) -> Vec<AllocateItem> {
        self.alloc.lock().unwrap().table.clone()
    }

    pub fn input_data_for_dump(&self) -> Vec<ResourceItem> {
        self.with_map_manager(|m| m.dump()).unwrap_or_else(Vec::new)
    }

    /// Rebuilds lifecycle tables from an allocation history. Running
    /// attempts count as outstanding unless the item completed later;
    /// completions win unconditionally.
    fn replay(history: &[AllocateItem], n: i32, is_map: bool) -> Vec<IdItem> {
        use resource_manager::ResourceStatus;

        let mut table: Vec<IdItem> = (0..n).map(IdItem::fresh).collect();
        for item in history {
            if item.is_map != is_map || item.resource_no < 0 || item.resource_no >= n {
                continue;
            }
            let cur = &mut table[item.resource_no as usize];
            cur.attempt = item.attempt;
            match item.state {
                pb::TaskState::Running => {
                    if cur.status != ResourceStatus::Done {
                        cur.status = ResourceStatus::Allocated;
                        cur.allocated += 1;
                    }
                }
                pb::TaskState::Completed => {
                    cur.status = ResourceStatus::Done;
                    cur.allocated = 0;
                }
                _ => {}
            }
        }
        table
    }

    /// Restores a freshly constructed tracker from dumped state. The
    /// persisted resource rows contribute the input ranges; the replayed
    /// history decides each item's lifecycle.
    pub fn load(
        &self,
        state: pb::JobState,
        history: Vec<AllocateItem>,
        resources: Vec<ResourceItem>,
        start_time: i64,
        finish_time: i64,
    ) -> Result<()> {
        info!("reload job: {}, history: {}", self.jobid, history.len());
        {
            let mut core = self.core.lock().unwrap();
            core.state = state;
            core.start_time = start_time;
            core.finish_time = finish_time;
        }
        let job = self.descriptor();

        if job.map_total != 0 {
            if resources.len() as i32 != job.map_total {
                bail!(
                    "resource reload mismatch: {} rows for {} items",
                    resources.len(),
                    job.map_total
                );
            }
            let ids = Self::replay(&history, job.map_total, true);
            let rows: Vec<ResourceItem> = resources
                .iter()
                .zip(ids.iter())
                .map(|(row, id)| {
                    ResourceItem {
                        no: id.no,
                        attempt: id.attempt,
                        status: id.status,
                        allocated: id.allocated,
                        input_file: row.input_file.clone(),
                        offset: row.offset,
                        size: row.size,
                    }
                })
                .collect();
            let mut manager = ResourceManager::new(Vec::new(), self.config.parallel_attempts);
            manager.load(rows);
            *self.map_manager.lock().unwrap() = Some(manager);
        }
        if job.reduce_total != 0 {
            let ids = Self::replay(&history, job.reduce_total, false);
            let mut manager = IdManager::new(0, self.config.parallel_attempts);
            manager.load(ids);
            *self.reduce_manager.lock().unwrap() = Some(manager);
        }
        self.build_end_game_counters();

        let map_done = self.with_map_manager(|m| m.done()).unwrap_or(0);
        let map_phase = map_done < job.map_total;

        let (map_failed, map_killed, reduce_failed, reduce_killed) = {
            let mut alloc = self.alloc.lock().unwrap();
            let mut tallies = (0, 0, 0, 0);
            for item in history {
                let AllocState {
                    ref mut table,
                    ref mut map_index,
                    ref mut reduce_index,
                    ref mut time_heap,
                    ..
                } = *alloc;
                let index = table.len();
                let lookup = if item.is_map { map_index } else { reduce_index };
                lookup
                    .entry(item.resource_no)
                    .or_insert_with(HashMap::new)
                    .insert(item.attempt, index);
                match item.state {
                    pb::TaskState::Running => time_heap.push(Reverse((item.alloc_time, index))),
                    pb::TaskState::Failed => if item.is_map {
                        tallies.0 += 1;
                    } else {
                        tallies.2 += 1;
                    },
                    pb::TaskState::Killed => if item.is_map {
                        tallies.1 += 1;
                    } else {
                        tallies.3 += 1;
                    },
                    _ => {}
                }
                table.push(item);
            }
            tallies
        };
        {
            let mut core = self.core.lock().unwrap();
            core.map_failed = map_failed;
            core.map_killed = map_killed;
            core.reduce_failed = reduce_failed;
            core.reduce_killed = reduce_killed;
            if core.state == pb::JobState::Running {
                if map_phase {
                    core.map_monitor = Some(self.spawn_monitor(true));
                    core.map_monitoring = true;
                } else {
                    core.reduce_monitor = Some(self.spawn_monitor(false));
                    core.reduce_monitoring = true;
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn backdate(&self, secs: i64) {
        let mut alloc = self.alloc.lock().unwrap();
        for entry in &mut alloc.table {
            entry.alloc_time -= secs;
        }
        let indices: Vec<usize> = alloc.time_heap.drain().map(|Reverse((_, i))| i).collect();
        let AllocState {
            ref table,
            ref mut time_heap,
            ..
        } = *alloc;
        for index in indices {
            time_heap.push(Reverse((table[index].alloc_time, index)));
        }
    }

    #[cfg(test)]
    fn slug_contains(&self, is_map: bool, no: i32) -> bool {
        let alloc = self.alloc.lock().unwrap();
        let slug = if is_map {
            &alloc.map_slug
        } else {
            &alloc.reduce_slug
        };
        slug.iter().any(|&n| n == no)
    }

    #[cfg(test)]
    fn dismissed_count(&self, is_map: bool) -> usize {
        let core = self.core.lock().unwrap();
        if is_map {
            core.map_dismissed.len()
        } else {
            core.reduce_dismissed.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::sync::mpsc::Receiver;
    use std::time::Instant;

    use gru::test_support::RecordingBackend;
    use test_support::{RecordingRpc, StubLayer};

    use super::*;

    fn test_config() -> MasterConfig {
        MasterConfig {
            replica_begin: 0,
            replica_begin_percent: 0,
            replica_num: 3,
            left_percent: 100,
            first_sleeptime: 7,
            time_tolerance: 120,
            parallel_attempts: 5,
            retry_bound: 3,
            max_counters_per_job: 10,
            ..Default::default()
        }
    }

    fn map_only_job(inputs: &[&str]) -> pb::JobDescriptor {
        pb::JobDescriptor {
            name: "grep".to_owned(),
            job_type: pb::JobType::MapOnly,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: "/out".to_owned(),
            map_command: "grep foo".to_owned(),
            map_capacity: 10,
            map_allow_duplicates: false,
            ..Default::default()
        }
    }

    struct Harness {
        tracker: Arc<JobTracker>,
        backend: Arc<RecordingBackend>,
        rpc: Arc<RecordingRpc>,
        fs: Arc<StubLayer>,
        events: Receiver<JobEvent>,
    }

    fn harness(config: MasterConfig, job: pb::JobDescriptor, fs: StubLayer) -> Harness {
        harness_with_backend(config, job, fs, RecordingBackend::new())
    }

    fn harness_with_backend(
        config: MasterConfig,
        job: pb::JobDescriptor,
        fs: StubLayer,
        backend: RecordingBackend,
    ) -> Harness {
        let backend = Arc::new(backend);
        let rpc = Arc::new(RecordingRpc::new());
        let fs = Arc::new(fs);
        let (sender, receiver) = mpsc::channel();
        let tracker = JobTracker::new(
            Arc::new(config),
            backend.clone(),
            fs.clone(),
            rpc.clone(),
            sender,
            job,
        );
        Harness {
            tracker: tracker,
            backend: backend,
            rpc: rpc,
            fs: fs,
            events: receiver,
        }
    }

    fn three_split_files() -> StubLayer {
        StubLayer::with_files(&[("/in/a", 10), ("/in/b", 10), ("/in/c", 10)])
    }

    fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            if Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_happy_path_map_only() {
        let h = harness(
            test_config(),
            map_only_job(&["/in/a", "/in/b", "/in/c"]),
            three_split_files(),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());
        assert_eq!(3, h.tracker.descriptor().map_total);
        {
            let submitted = h.backend.submitted.lock().unwrap();
            assert_eq!(1, submitted.len());
            assert_eq!(pb::WorkMode::MapOnly, submitted[0].mode);
        }

        for i in 0..3 {
            let endpoint = format!("h{}:7000", i);
            let (item, status) = h.tracker.assign_map(&endpoint);
            assert_eq!(pb::Status::Ok, status);
            assert_eq!(i, item.unwrap().no);
        }
        assert_eq!(pb::JobState::Running, h.tracker.state());

        for i in 0..3 {
            let status = h.tracker.finish_map(
                i,
                1,
                pb::TaskState::Completed,
                "",
                &BTreeMap::new(),
            );
            assert_eq!(pb::Status::Ok, status);
        }

        assert_eq!(pb::JobState::Completed, h.tracker.state());
        assert_eq!(3, h.tracker.map_statistics().completed);
        assert_eq!(3, h.tracker.history_for_dump().len());
        assert!(
            h.fs.removed
                .lock()
                .unwrap()
                .contains(&PathBuf::from("/out/_temporary"))
        );
        match h.events.recv().unwrap() {
            JobEvent::Retraction { end_state, .. } => {
                assert_eq!(pb::JobState::Completed, end_state)
            }
        }
    }

    #[test]
    fn test_retry_on_distinct_hosts() {
        let mut job = map_only_job(&["/in/a"]);
        job.map_retry = 3;
        let h = harness(
            test_config(),
            job,
            StubLayer::with_files(&[("/in/a", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for (attempt, host) in [(1, "h1:7000"), (2, "h2:7000")].iter() {
            let (item, _) = h.tracker.assign_map(host);
            assert_eq!(*attempt, item.unwrap().attempt);
            let status = h.tracker.finish_map(
                0,
                *attempt,
                pb::TaskState::Failed,
                "boom",
                &BTreeMap::new(),
            );
            assert_eq!(pb::Status::Ok, status);
            assert_eq!(pb::JobState::Running, h.tracker.state());
        }
        assert_eq!(2, h.tracker.map_statistics().failed);

        let (item, _) = h.tracker.assign_map("h3:7000");
        assert_eq!(3, item.unwrap().attempt);
        h.tracker
            .finish_map(0, 3, pb::TaskState::Completed, "", &BTreeMap::new());
        assert_eq!(pb::JobState::Completed, h.tracker.state());
    }

    #[test]
    fn test_repeat_failure_on_same_host_counts_once() {
        let mut job = map_only_job(&["/in/a"]);
        job.map_retry = 2;
        let h = harness(
            test_config(),
            job,
            StubLayer::with_files(&[("/in/a", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for attempt in 1..4 {
            let (item, _) = h.tracker.assign_map("h1:7000");
            assert_eq!(attempt, item.unwrap().attempt);
            h.tracker.finish_map(
                0,
                attempt,
                pb::TaskState::Failed,
                "boom",
                &BTreeMap::new(),
            );
        }
        // Three failures, all from the same node: the retry budget of two
        // is not exhausted.
        assert_eq!(pb::JobState::Running, h.tracker.state());
        assert_eq!(3, h.tracker.map_statistics().failed);
    }

    #[test]
    fn test_retry_exhaustion_poisons_job() {
        let mut job = map_only_job(&["/in/a"]);
        job.map_retry = 2;
        let h = harness(
            test_config(),
            job,
            StubLayer::with_files(&[("/in/a", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for (attempt, host) in [(1, "h1:7000"), (2, "h2:7000")].iter() {
            let (item, _) = h.tracker.assign_map(host);
            assert_eq!(*attempt, item.unwrap().attempt);
            h.tracker.finish_map(
                0,
                *attempt,
                pb::TaskState::Failed,
                "went sideways",
                &BTreeMap::new(),
            );
        }

        assert_eq!(pb::JobState::Failed, h.tracker.state());
        assert_eq!("went sideways", h.tracker.error_msg());
        match h.events.recv().unwrap() {
            JobEvent::Retraction { end_state, .. } => assert_eq!(pb::JobState::Failed, end_state),
        }
    }

    #[test]
    fn test_retry_saturation_masked_with_shuffle_stub() {
        let mut job = map_only_job(&["/in/a"]);
        job.job_type = pb::JobType::MapReduce;
        job.reduce_command = "uniq -c".to_owned();
        job.reduce_total = 1;
        job.reduce_capacity = 2;
        job.map_retry = 2;
        job.ignore_map_failures = 1;
        let h = harness(
            test_config(),
            job,
            StubLayer::with_files(&[("/in/a", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for (attempt, host) in [(1, "h1:7000"), (2, "h2:7000")].iter() {
            let (item, _) = h.tracker.assign_map(host);
            assert_eq!(*attempt, item.unwrap().attempt);
            h.tracker.finish_map(
                0,
                *attempt,
                pb::TaskState::Failed,
                "boom",
                &BTreeMap::new(),
            );
        }
        // The budget absorbed the exhaustion instead of failing the job.
        assert_eq!(pb::JobState::Running, h.tracker.state());

        let (item, _) = h.tracker.assign_map("h3:7000");
        assert_eq!(3, item.unwrap().attempt);
        let status = h.tracker.finish_map(
            0,
            3,
            pb::TaskState::Failed,
            "boom",
            &BTreeMap::new(),
        );
        assert_eq!(pb::Status::Ok, status);

        assert!(
            h.fs.created
                .lock()
                .unwrap()
                .contains(&PathBuf::from("/out/_temporary/shuffle/map_0/0.sort"))
        );
        // The masked completion starts the reduce phase.
        {
            let submitted = h.backend.submitted.lock().unwrap();
            assert_eq!(2, submitted.len());
            assert_eq!(pb::WorkMode::Reduce, submitted[1].mode);
        }
        assert_eq!(1, h.tracker.map_statistics().completed);

        let (item, status) = h.tracker.assign_reduce("h3:7000");
        assert_eq!(pb::Status::Ok, status);
        assert_eq!(0, item.unwrap().no);
        h.tracker
            .finish_reduce(0, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        assert_eq!(pb::JobState::Completed, h.tracker.state());
        assert!(
            h.fs.removed
                .lock()
                .unwrap()
                .contains(&PathBuf::from("/out/_temporary"))
        );
    }

    #[test]
    fn test_mask_reverts_when_stub_write_fails() {
        let mut job = map_only_job(&["/in/a"]);
        job.job_type = pb::JobType::MapReduce;
        job.reduce_total = 1;
        job.reduce_capacity = 2;
        job.map_retry = 2;
        job.ignore_map_failures = 1;
        let h = harness(
            test_config(),
            job,
            StubLayer::failing_creates(&[("/in/a", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for (attempt, host) in [(1, "h1:7000"), (2, "h2:7000")].iter() {
            let (item, _) = h.tracker.assign_map(host);
            assert_eq!(*attempt, item.unwrap().attempt);
            h.tracker.finish_map(
                0,
                *attempt,
                pb::TaskState::Failed,
                "boom",
                &BTreeMap::new(),
            );
        }
        let (item, _) = h.tracker.assign_map("h3:7000");
        assert_eq!(3, item.unwrap().attempt);
        h.tracker
            .finish_map(0, 3, pb::TaskState::Failed, "boom", &BTreeMap::new());

        // The stub could not be fabricated, so the mask is off and the
        // third distinct host exhausts the budget for real.
        assert_eq!(pb::JobState::Failed, h.tracker.state());
    }

    #[test]
    fn test_reduce_gated_on_map_progress() {
        let mut job = map_only_job(&["/in/a", "/in/b", "/in/c"]);
        job.job_type = pb::JobType::MapReduce;
        job.reduce_total = 2;
        job.reduce_capacity = 4;
        let h = harness(test_config(), job, three_split_files());
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for i in 0..3 {
            let endpoint = format!("h{}:7000", i);
            h.tracker.assign_map(&endpoint);
        }
        h.tracker
            .finish_map(0, 1, pb::TaskState::Completed, "", &BTreeMap::new());

        let (item, status) = h.tracker.assign_reduce("h9:7000");
        assert!(item.is_none());
        assert_eq!(pb::Status::Suspend, status);

        for i in 1..3 {
            h.tracker
                .finish_map(i, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        }
        let (item, status) = h.tracker.assign_reduce("h9:7000");
        assert_eq!(pb::Status::Ok, status);
        assert!(item.is_some());
    }

    #[test]
    fn test_early_reduce_report_suspended() {
        let mut job = map_only_job(&["/in/a", "/in/b", "/in/c"]);
        job.job_type = pb::JobType::MapReduce;
        job.reduce_total = 2;
        job.reduce_capacity = 4;
        let mut config = test_config();
        config.replica_begin_percent = 50;
        let h = harness(config, job, three_split_files());
        assert_eq!(pb::Status::Ok, h.tracker.start());

        // reduce_begin is 2 of 3 maps; finish two, leaving one pending.
        h.tracker.assign_map("h0:7000");
        h.tracker.assign_map("h1:7000");
        h.tracker
            .finish_map(0, 1, pb::TaskState::Completed, "", &BTreeMap::new());

        let (item, status) = h.tracker.assign_reduce("h9:7000");
        assert!(item.is_none());
        assert_eq!(pb::Status::Suspend, status);

        h.tracker
            .finish_map(1, 1, pb::TaskState::Completed, "", &BTreeMap::new());

        let (item, status) = h.tracker.assign_reduce("h9:7000");
        assert_eq!(pb::Status::Ok, status);
        let item = item.unwrap();

        // A completion report before the map phase is over must wait.
        let status = h.tracker.finish_reduce(
            item.no,
            item.attempt,
            pb::TaskState::Completed,
            "",
            &BTreeMap::new(),
        );
        assert_eq!(pb::Status::Suspend, status);

        // A kill report goes through immediately.
        let status = h.tracker.finish_reduce(
            item.no,
            item.attempt,
            pb::TaskState::Killed,
            "",
            &BTreeMap::new(),
        );
        assert_eq!(pb::Status::Ok, status);
    }

    #[test]
    fn test_reduce_spawn_failure_poisons_job() {
        let mut job = map_only_job(&["/in/a"]);
        job.job_type = pb::JobType::MapReduce;
        job.reduce_total = 1;
        job.reduce_capacity = 2;
        let h = harness_with_backend(
            test_config(),
            job,
            StubLayer::with_files(&[("/in/a", 10)]),
            RecordingBackend::failing_on(pb::WorkMode::Reduce),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        h.tracker.assign_map("h1:7000");
        h.tracker
            .finish_map(0, 1, pb::TaskState::Completed, "", &BTreeMap::new());

        assert_eq!(pb::JobState::Failed, h.tracker.state());
        match h.events.recv().unwrap() {
            JobEvent::Retraction { end_state, .. } => assert_eq!(pb::JobState::Failed, end_state),
        }
    }

    #[test]
    fn test_speculation_cancels_losing_replicas() {
        let mut config = test_config();
        config.replica_begin = 2;
        config.replica_begin_percent = 20;
        config.replica_num = 2;
        let mut job = map_only_job(&[
            "/in/a", "/in/b", "/in/c", "/in/d", "/in/e", "/in/f", "/in/g", "/in/h", "/in/i",
            "/in/j",
        ]);
        job.map_allow_duplicates = true;
        job.map_capacity = 20;
        let files: Vec<(String, u64)> = (0..10)
            .map(|i| (format!("/in/{}", (b'a' + i as u8) as char), 10u64))
            .collect();
        let file_refs: Vec<(&str, u64)> =
            files.iter().map(|&(ref p, s)| (p.as_str(), s)).collect();
        let h = harness(config, job, StubLayer::with_files(&file_refs));
        assert_eq!(pb::Status::Ok, h.tracker.start());

        // Fill the pre-end-game items and give the monitor a comfortable
        // timeout baseline before entering the end game.
        for i in 0..8 {
            let endpoint = format!("h{}:7000", i);
            let (item, _) = h.tracker.assign_map(&endpoint);
            assert_eq!(i, item.unwrap().no);
        }
        h.tracker.backdate(50);
        for i in 0..8 {
            h.tracker
                .finish_map(i, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        }

        let (item, _) = h.tracker.assign_map("h8:7000");
        assert_eq!(8, item.unwrap().no);
        let (item, _) = h.tracker.assign_map("h9:7000");
        assert_eq!(9, item.unwrap().no);

        // The end game queued replicas for items 8 and 9; idle minions
        // pick them up as duplicate attempts.
        let (item, status) = h.tracker.assign_map("h10:7000");
        assert_eq!(pb::Status::Ok, status);
        let item = item.unwrap();
        assert_eq!(8, item.no);
        assert_eq!(2, item.attempt);
        let (item, _) = h.tracker.assign_map("h11:7000");
        let item = item.unwrap();
        assert_eq!(8, item.no);
        assert_eq!(3, item.attempt);

        // The original attempt wins; both replicas get canceled.
        h.tracker
            .finish_map(8, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        wait_until("cancel fan-out", || h.rpc.cancels.lock().unwrap().len() == 2);
        {
            let cancels = h.rpc.cancels.lock().unwrap();
            let mut endpoints: Vec<String> =
                cancels.iter().map(|&(ref e, _)| e.clone()).collect();
            endpoints.sort();
            assert_eq!(vec!["h10:7000".to_owned(), "h11:7000".to_owned()], endpoints);
        }

        // A late report from a canceled replica is turned away.
        let status = h.tracker.finish_map(
            8,
            2,
            pb::TaskState::Canceled,
            "",
            &BTreeMap::new(),
        );
        assert_eq!(pb::Status::NoMore, status);

        h.tracker
            .finish_map(9, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        assert_eq!(pb::JobState::Completed, h.tracker.state());

        // Exactly one completed attempt per item; extras are canceled.
        let mut completed: StdHashMap<i32, i32> = StdHashMap::new();
        for entry in h.tracker.history_for_dump() {
            match entry.state {
                pb::TaskState::Completed => *completed.entry(entry.resource_no).or_insert(0) += 1,
                pb::TaskState::Canceled => {}
                other => panic!("unexpected ledger state {:?}", other),
            }
        }
        for no in 0..10 {
            assert_eq!(Some(&1), completed.get(&no));
        }
    }

    #[test]
    fn test_monitor_reaps_lost_attempt() {
        let h = harness(
            test_config(),
            map_only_job(&["/in/a", "/in/b", "/in/c"]),
            three_split_files(),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for i in 0..3 {
            let endpoint = format!("h{}:7000", i);
            h.tracker.assign_map(&endpoint);
        }
        h.tracker.backdate(60);
        h.tracker
            .finish_map(1, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        h.tracker
            .finish_map(2, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        // Item 0 is 80 seconds old against a median-based timeout of 72.
        h.tracker.backdate(20);

        // The query hits a minion that no longer knows the attempt.
        let slept = h.tracker.monitor_pass_with(true, true);
        assert_eq!(72, slept);

        assert_eq!(1, h.tracker.map_statistics().killed);
        assert!(h.tracker.slug_contains(true, 0));

        // The item comes back for reassignment with a fresh attempt.
        let (item, status) = h.tracker.assign_map("h5:7000");
        assert_eq!(pb::Status::Ok, status);
        let item = item.unwrap();
        assert_eq!(0, item.no);
        assert_eq!(2, item.attempt);
    }

    #[test]
    fn test_monitor_keeps_confirmed_attempt() {
        let h = harness(
            test_config(),
            map_only_job(&["/in/a", "/in/b", "/in/c"]),
            three_split_files(),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for i in 0..3 {
            let endpoint = format!("h{}:7000", i);
            h.tracker.assign_map(&endpoint);
        }
        h.tracker.backdate(60);
        h.tracker
            .finish_map(1, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        h.tracker
            .finish_map(2, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        h.tracker.backdate(20);

        {
            let mut response = h.rpc.query_response.lock().unwrap();
            response.jobid = h.tracker.jobid().to_owned();
            response.task_id = 0;
            response.attempt_id = 1;
            response.task_state = pb::TaskState::Running;
        }
        h.tracker.monitor_pass_with(true, true);

        assert_eq!(0, h.tracker.map_statistics().killed);
        assert_eq!(1, h.tracker.map_statistics().running);
    }

    #[test]
    fn test_monitor_rests_without_completed_attempts() {
        let h = harness(
            test_config(),
            map_only_job(&["/in/a"]),
            StubLayer::with_files(&[("/in/a", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());
        h.tracker.assign_map("h1:7000");

        assert_eq!(7, h.tracker.monitor_pass_with(true, false));
        assert_eq!(1, h.tracker.map_statistics().running);
    }

    #[test]
    fn test_ghost_task_recovery() {
        let h = harness(
            test_config(),
            {
                let mut job = map_only_job(&["/in/a"]);
                job.map_allow_duplicates = true;
                job
            },
            StubLayer::with_files(&[("/in/a", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        let (item, _) = h.tracker.assign_map("h1:7000");
        let item = item.unwrap();
        assert_eq!((0, 1), (item.no, item.attempt));

        // The minion restarted and reported its breakpoint as killed.
        let status = h.tracker.finish_map(
            0,
            1,
            pb::TaskState::Killed,
            "",
            &BTreeMap::new(),
        );
        assert_eq!(pb::Status::Ok, status);
        assert_eq!(1, h.tracker.map_statistics().killed);
        assert!(h.tracker.slug_contains(true, 0));

        let (item, _) = h.tracker.assign_map("h1:7000");
        let item = item.unwrap();
        assert_eq!((0, 2), (item.no, item.attempt));
    }

    #[test]
    fn test_dismissal_reserves_minions() {
        let mut job = map_only_job(&["/in/a", "/in/b", "/in/c"]);
        job.map_capacity = 10;
        let h = harness(test_config(), job, three_split_files());
        assert_eq!(pb::Status::Ok, h.tracker.start());

        for i in 0..3 {
            let endpoint = format!("h{}:7000", i);
            h.tracker.assign_map(&endpoint);
        }
        // capacity 10, 3 not done, reserve ceil(5 * 100%) = 5: dismiss up
        // to 5 idle minions, suspend the rest.
        for i in 3..8 {
            let endpoint = format!("h{}:7000", i);
            let (item, status) = h.tracker.assign_map(&endpoint);
            assert!(item.is_none());
            assert_eq!(pb::Status::NoMore, status);
        }
        assert_eq!(5, h.tracker.dismissed_count(true));

        let (_, status) = h.tracker.assign_map("h9:7000");
        assert_eq!(pb::Status::Suspend, status);
        assert_eq!(5, h.tracker.dismissed_count(true));
    }

    #[test]
    fn test_counters_accumulate_and_cap() {
        let mut config = test_config();
        config.max_counters_per_job = 2;
        let h = harness(
            config,
            map_only_job(&["/in/a", "/in/b"]),
            StubLayer::with_files(&[("/in/a", 10), ("/in/b", 10)]),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());

        h.tracker.assign_map("h1:7000");
        h.tracker.assign_map("h2:7000");

        let mut counters = BTreeMap::new();
        counters.insert("records".to_owned(), 5);
        counters.insert("bytes".to_owned(), 100);
        h.tracker
            .finish_map(0, 1, pb::TaskState::Completed, "", &counters);

        let mut counters = BTreeMap::new();
        counters.insert("records".to_owned(), 7);
        counters.insert("dropped".to_owned(), 1);
        h.tracker
            .finish_map(1, 1, pb::TaskState::Completed, "", &counters);

        let counters = h.tracker.counters();
        assert_eq!(2, counters.len());
        assert_eq!(Some(&12), counters.get("records"));
        assert_eq!(Some(&100), counters.get("bytes"));
        assert_eq!(None, counters.get("dropped"));
    }

    #[test]
    fn test_output_exists_fails_start() {
        let h = harness(
            test_config(),
            map_only_job(&["/in/a"]),
            StubLayer::existing_output(&[("/in/a", 10)]),
        );

        assert_eq!(pb::Status::WriteFileFail, h.tracker.start());
        assert_eq!(pb::JobState::Failed, h.tracker.state());
        assert!(h.backend.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reduce_capacity_clamped() {
        let mut job = map_only_job(&["/in/a"]);
        job.job_type = pb::JobType::MapReduce;
        job.reduce_total = 4;
        job.reduce_capacity = 500;
        let h = harness(
            test_config(),
            job,
            StubLayer::with_files(&[("/in/a", 10)]),
        );
        assert_eq!(60, h.tracker.descriptor().reduce_capacity);
    }

    #[test]
    fn test_kill_marks_running_attempts() {
        let h = harness(
            test_config(),
            map_only_job(&["/in/a", "/in/b", "/in/c"]),
            three_split_files(),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());
        for i in 0..3 {
            let endpoint = format!("h{}:7000", i);
            h.tracker.assign_map(&endpoint);
        }
        h.tracker
            .finish_map(0, 1, pb::TaskState::Completed, "", &BTreeMap::new());

        assert_eq!(pb::Status::Ok, h.tracker.kill(pb::JobState::Killed));
        assert_eq!(pb::JobState::Killed, h.tracker.state());
        assert_eq!(2, h.tracker.map_statistics().killed);
        assert!(h.tracker.finish_time() > 0);
        assert!(!h.backend.removed.lock().unwrap().is_empty());

        // Reports arriving after the kill find nothing running.
        let status = h.tracker.finish_map(
            1,
            1,
            pb::TaskState::Completed,
            "",
            &BTreeMap::new(),
        );
        assert_eq!(pb::Status::NoMore, status);
    }

    #[test]
    fn test_load_dump_round_trip() {
        let h = harness(
            test_config(),
            map_only_job(&["/in/a", "/in/b", "/in/c"]),
            three_split_files(),
        );
        assert_eq!(pb::Status::Ok, h.tracker.start());
        for i in 0..3 {
            let endpoint = format!("h{}:7000", i);
            h.tracker.assign_map(&endpoint);
        }
        h.tracker
            .finish_map(0, 1, pb::TaskState::Completed, "", &BTreeMap::new());
        h.tracker
            .finish_map(1, 1, pb::TaskState::Failed, "boom", &BTreeMap::new());

        let history = h.tracker.history_for_dump();
        let resources = h.tracker.input_data_for_dump();

        let twin = harness(
            test_config(),
            h.tracker.descriptor(),
            three_split_files(),
        );
        // Arm the query mock first: the reloaded monitor probes the
        // still-running attempt and must find it confirmed.
        {
            let mut response = twin.rpc.query_response.lock().unwrap();
            response.jobid = twin.tracker.jobid().to_owned();
            response.task_id = 2;
            response.attempt_id = 1;
            response.task_state = pb::TaskState::Running;
        }
        twin.tracker
            .load(
                h.tracker.state(),
                history.clone(),
                resources.clone(),
                h.tracker.start_time(),
                0,
            )
            .unwrap();

        assert_eq!(history, twin.tracker.history_for_dump());
        assert_eq!(resources, twin.tracker.input_data_for_dump());
        assert_eq!(h.tracker.map_statistics(), twin.tracker.map_statistics());

        // The reloaded tracker keeps scheduling where the dump left off.
        let (item, status) = twin.tracker.assign_map("h9:7000");
        assert_eq!(pb::Status::Ok, status);
        let item = item.unwrap();
        assert_eq!(1, item.no);
        assert_eq!(2, item.attempt);
    }
}
