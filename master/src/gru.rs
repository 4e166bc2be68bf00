//! Worker-group handles. A `Gru` herds the minions of one phase of one
//! job: it submits the group to the cluster backend, resizes or
//! reprioritises it, and tears it down when the phase ends. The backend
//! itself is a collaborator behind the `ClusterBackend` trait.

use std::cmp;
use std::sync::Arc;

use charon_proto::job as pb;
use errors::*;

/// What the backend needs to launch the minions of one phase.
#[derive(Clone, Debug)]
pub struct WorkerGroupSpec {
    pub name: String,
    pub jobid: String,
    pub mode: pb::WorkMode,
    pub replica: i32,
    pub deploy_step: i32,
    pub priority: pb::JobPriority,
}

pub trait ClusterBackend: Send + Sync {
    /// Launches a worker group and returns its backend-side id.
    fn submit(&self, spec: &WorkerGroupSpec) -> Result<String>;

    /// Adjusts priority and/or capacity of a running group. A capacity of
    /// -1 leaves the replica count unchanged.
    fn update(&self, group_id: &str, priority: Option<pb::JobPriority>, capacity: i32)
        -> Result<()>;

    fn remove(&self, group_id: &str) -> Result<()>;
}

/// Maps the priority names understood by the cluster front end onto job
/// priorities. Unknown names fall back to normal.
pub fn parse_priority(priority: &str) -> pb::JobPriority {
    match priority {
        "kMonitor" => pb::JobPriority::VeryHigh,
        "kOnline" => pb::JobPriority::High,
        "kOffline" => pb::JobPriority::Normal,
        "kBestEffort" => pb::JobPriority::Low,
        _ => pb::JobPriority::Normal,
    }
}

fn mode_str(mode: pb::WorkMode) -> &'static str {
    match mode {
        pb::WorkMode::Reduce => "reduce",
        pb::WorkMode::Map | pb::WorkMode::MapOnly => "map",
    }
}

pub struct Gru {
    backend: Arc<ClusterBackend>,
    group_id: String,
}

impl Gru {
    /// Submits the worker group for one phase of a job. Replica count is
    /// bounded by the phase capacity but never drops below a small floor,
    /// so short jobs still get enough minions to finish promptly.
    pub fn start(
        backend: Arc<ClusterBackend>,
        job: &pb::JobDescriptor,
        jobid: &str,
        mode: pb::WorkMode,
        deploy_step: i32,
    ) -> Result<Gru> {
        let (capacity, total) = match mode {
            pb::WorkMode::Reduce => (job.reduce_capacity, job.reduce_total),
            _ => (job.map_capacity, job.map_total),
        };
        let replica = cmp::min(capacity, cmp::max(total * 6 / 5, 20));
        let spec = WorkerGroupSpec {
            name: format!("{}_{}", job.name, mode_str(mode)),
            jobid: jobid.to_owned(),
            mode: mode,
            replica: replica,
            deploy_step: cmp::min(deploy_step, replica),
            priority: job.priority,
        };
        let group_id = backend.submit(&spec).chain_err(|| {
            format!("unable to submit {} worker group", mode_str(mode))
        })?;
        info!("cluster worker group id: {}", group_id);
        Ok(Gru {
            backend: backend,
            group_id: group_id,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn update(&self, priority: Option<pb::JobPriority>, capacity: i32) -> Result<()> {
        self.backend
            .update(&self.group_id, priority, capacity)
            .chain_err(|| "unable to update worker group")
    }

    /// Best-effort teardown; a backend error is logged and swallowed.
    pub fn kill(&self) {
        info!("kill cluster worker group: {}", self.group_id);
        if let Err(err) = self.backend.remove(&self.group_id) {
            warn!("unable to remove worker group {}: {}", self.group_id, err);
        }
    }
}

/// Backend used when minions are launched out-of-band: submissions are
/// logged and acknowledged, nothing is spawned.
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        NullBackend
    }
}

impl ClusterBackend for NullBackend {
    fn submit(&self, spec: &WorkerGroupSpec) -> Result<String> {
        info!(
            "worker group {} ({} replicas) left to external launch",
            spec.name,
            spec.replica
        );
        Ok(format!("unmanaged/{}", spec.name))
    }

    fn update(&self, group_id: &str, _priority: Option<pb::JobPriority>, capacity: i32)
        -> Result<()> {
        info!("worker group {} capacity update to {}", group_id, capacity);
        Ok(())
    }

    fn remove(&self, group_id: &str) -> Result<()> {
        info!("worker group {} removed", group_id);
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Records submissions and can be told to fail specific work modes.
    pub struct RecordingBackend {
        pub submitted: Mutex<Vec<WorkerGroupSpec>>,
        pub removed: Mutex<Vec<String>>,
        fail_modes: Vec<pb::WorkMode>,
    }

    impl RecordingBackend {
        pub fn new() -> Self {
            RecordingBackend {
                submitted: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
                fail_modes: Vec::new(),
            }
        }

        pub fn failing_on(mode: pb::WorkMode) -> Self {
            let mut backend = RecordingBackend::new();
            backend.fail_modes.push(mode);
            backend
        }
    }

    impl ClusterBackend for RecordingBackend {
        fn submit(&self, spec: &WorkerGroupSpec) -> Result<String> {
            if self.fail_modes.contains(&spec.mode) {
                return Err("backend refused worker group".into());
            }
            self.submitted.lock().unwrap().push(spec.clone());
            Ok(format!("group/{}", spec.name))
        }

        fn update(&self, _group_id: &str, _priority: Option<pb::JobPriority>, _capacity: i32)
            -> Result<()> {
            Ok(())
        }

        fn remove(&self, group_id: &str) -> Result<()> {
            self.removed.lock().unwrap().push(group_id.to_owned());
            Ok(())
        }
    }
}
