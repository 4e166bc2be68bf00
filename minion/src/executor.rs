//! Supervision of the user command. Each attempt runs as a child process
//! group of its own, so the whole pipeline a command may spawn can be
//! killed, paused and resumed together.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::os::unix::process::CommandExt;
use std::sync::Mutex;
use std::thread;

use libc;
use uuid::Uuid;

use charon_proto::job as pb;

/// Counters a task emits on stderr, hadoop-streaming style.
const COUNTER_PREFIX: &str = "reporter:counter:";
/// Where stderr of failed attempts is kept for later upload.
const ERROR_LOG_DIR: &str = "./error_logs";

pub trait Executor: Send + Sync {
    /// Prepares the execution environment for one attempt.
    fn set_env(&self, jobid: &str, task: &pb::TaskInfo, mode: pb::WorkMode);

    /// Runs the attempt to completion and classifies the outcome.
    fn exec(&self, task: &pb::TaskInfo) -> pb::TaskState;

    /// Stops the attempt of `task_id` if it is the one running.
    fn stop(&self, task_id: i32);

    /// The stderr tail of the last finished attempt.
    fn last_error(&self) -> String;

    fn parse_counters(&self, task: &pb::TaskInfo) -> BTreeMap<String, i64>;

    fn upload_error(&self, task: &pb::TaskInfo, error_msg: &str);

    /// Pauses the running process group, if any.
    fn pause(&self);

    /// Resumes the running process group, if any.
    fn resume(&self);
}

struct ExecutorState {
    command: String,
    env: Vec<(String, String)>,
    running_group: Option<i32>,
    last_error: String,
}

pub struct CommandExecutor {
    state: Mutex<ExecutorState>,
    stop_requested: Mutex<HashSet<i32>>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        CommandExecutor {
            state: Mutex::new(ExecutorState {
                command: String::new(),
                env: Vec::new(),
                running_group: None,
                last_error: String::new(),
            }),
            stop_requested: Mutex::new(HashSet::new()),
        }
    }

    fn signal_group(&self, signal: libc::c_int) {
        let state = self.state.lock().unwrap();
        if let Some(pgid) = state.running_group {
            unsafe {
                libc::kill(-pgid, signal);
            }
        }
    }
}

impl Executor for CommandExecutor {
    fn set_env(&self, jobid: &str, task: &pb::TaskInfo, mode: pb::WorkMode) {
        let mut state = self.state.lock().unwrap();
        state.command = match mode {
            pb::WorkMode::Reduce => task.job.reduce_command.clone(),
            pb::WorkMode::Map | pb::WorkMode::MapOnly => task.job.map_command.clone(),
        };
        let mut env = vec![
            ("charon_jobid".to_owned(), jobid.to_owned()),
            ("charon_task_id".to_owned(), task.task_id.to_string()),
            ("charon_attempt_id".to_owned(), task.attempt_id.to_string()),
            (
                "charon_work_mode".to_owned(),
                format!("{:?}", mode).to_lowercase(),
            ),
            ("charon_output".to_owned(), task.job.output.clone()),
        ];
        if let Some(ref input) = task.input {
            env.push(("map_input_file".to_owned(), input.input_file.clone()));
            env.push(("map_input_offset".to_owned(), input.offset.to_string()));
            env.push(("map_input_size".to_owned(), input.size.to_string()));
        }
        state.env = env;
    }

    fn exec(&self, task: &pb::TaskInfo) -> pb::TaskState {
        let (command, env) = {
            let state = self.state.lock().unwrap();
            (state.command.clone(), state.env.clone())
        };
        if command.is_empty() {
            warn!("no command configured for task {}", task.task_id);
            return pb::TaskState::Failed;
        }
        self.stop_requested.lock().unwrap().remove(&task.task_id);

        let work_dir = PathBuf::from(format!("./work/{}", Uuid::new_v4()));
        if let Err(err) = fs::create_dir_all(&work_dir) {
            warn!("unable to create work directory {:?}: {}", work_dir, err);
            return pb::TaskState::Failed;
        }

        let mut builder = Command::new("sh");
        builder
            .arg("-c")
            .arg(&command)
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .before_exec(|| {
                unsafe {
                    libc::setpgid(0, 0);
                }
                Ok(())
            });
        for (key, value) in env {
            builder.env(key, value);
        }

        let mut child = match builder.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!("unable to spawn task command: {}", err);
                self.state.lock().unwrap().last_error = err.to_string();
                return pb::TaskState::Failed;
            }
        };
        self.state.lock().unwrap().running_group = Some(child.id() as i32);

        let stderr = child.stderr.take();
        let reader = thread::spawn(move || {
            let mut buffer = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buffer);
            }
            buffer
        });

        let status = child.wait();
        let stderr = reader.join().unwrap_or_else(|_| String::new());
        {
            let mut state = self.state.lock().unwrap();
            state.running_group = None;
            state.last_error = stderr;
        }

        if self.stop_requested.lock().unwrap().remove(&task.task_id) {
            return pb::TaskState::Killed;
        }
        match status {
            Ok(status) if status.success() => pb::TaskState::Completed,
            Ok(status) => {
                warn!("task command exited with {}", status);
                pb::TaskState::Failed
            }
            Err(err) => {
                warn!("unable to wait for task command: {}", err);
                pb::TaskState::Failed
            }
        }
    }

    fn stop(&self, task_id: i32) {
        info!("stop requested for task {}", task_id);
        self.stop_requested.lock().unwrap().insert(task_id);
        self.signal_group(libc::SIGKILL);
    }

    fn last_error(&self) -> String {
        self.state.lock().unwrap().last_error.clone()
    }

    fn parse_counters(&self, _task: &pb::TaskInfo) -> BTreeMap<String, i64> {
        parse_counter_lines(&self.last_error())
    }

    fn upload_error(&self, task: &pb::TaskInfo, error_msg: &str) {
        let dir = PathBuf::from(ERROR_LOG_DIR);
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!("unable to create error log directory: {}", err);
            return;
        }
        let path = dir.join(format!("task_{}_{}.log", task.task_id, task.attempt_id));
        let written = File::create(&path).and_then(|mut file| {
            file.write_all(error_msg.as_bytes())
        });
        if let Err(err) = written {
            warn!("unable to upload error message to {:?}: {}", path, err);
        }
    }

    fn pause(&self) {
        self.signal_group(libc::SIGSTOP);
    }

    fn resume(&self) {
        self.signal_group(libc::SIGCONT);
    }
}

/// Extracts `reporter:counter:<name>,<amount>` lines the way streaming
/// tasks report progress on stderr. Malformed lines are skipped.
pub fn parse_counter_lines(output: &str) -> BTreeMap<String, i64> {
    let mut counters = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with(COUNTER_PREFIX) {
            continue;
        }
        let rest = &line[COUNTER_PREFIX.len()..];
        let mut parts = rest.rsplitn(2, ',');
        let amount = parts.next().and_then(|raw| raw.trim().parse::<i64>().ok());
        let name = parts.next().map(|name| name.trim());
        if let (Some(name), Some(amount)) = (name, amount) {
            if !name.is_empty() {
                *counters.entry(name.to_owned()).or_insert(0) += amount;
            }
        }
    }
    counters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter_lines() {
        let output = "starting up\n\
                      reporter:counter:records,12\n\
                      reporter:counter:records,3\n\
                      reporter:counter:bytes_read,4096\n\
                      some other noise\n";
        let counters = parse_counter_lines(output);
        assert_eq!(2, counters.len());
        assert_eq!(Some(&15), counters.get("records"));
        assert_eq!(Some(&4096), counters.get("bytes_read"));
    }

    #[test]
    fn test_parse_counter_lines_skips_malformed() {
        let output = "reporter:counter:broken\n\
                      reporter:counter:,77\n\
                      reporter:counter:ok,not_a_number\n";
        assert!(parse_counter_lines(output).is_empty());
    }
}
