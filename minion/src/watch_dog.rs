//! Host-pressure watchdog. Samples load average and NIC throughput once a
//! second and freezes or thaws the executor's process group so one greedy
//! task cannot starve the machine it shares.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use libc;

use executor::Executor;

const SAMPLE_PERIOD_MS: u64 = 1000;
/// Load per core above which the host counts as overloaded.
const OVERLOAD_FACTOR: f64 = 1.5;
/// Load per core below which a frozen task may resume.
const RESUME_FACTOR: f64 = 0.8;
/// Interface speeds at or above this report as 10 GbE, in Mb/s.
const TEN_GBE_MBPS: i64 = 10_000;

/// Flags shared with the RPC surface: an overloaded minion answers
/// queries with silence, a long-frozen one becomes reapable.
pub struct WatchFlags {
    pub task_frozen: AtomicBool,
    pub over_loaded: AtomicBool,
    pub frozen_time: Mutex<i64>,
}

impl WatchFlags {
    pub fn new() -> Self {
        WatchFlags {
            task_frozen: AtomicBool::new(false),
            over_loaded: AtomicBool::new(false),
            frozen_time: Mutex::new(0),
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum WatchVerdict {
    Freeze { overloaded: bool },
    Thaw,
    Leave,
}

/// The freeze policy, ordered: load pressure freezes hard (the minion
/// also goes silent), network pressure freezes softly, and a frozen task
/// thaws only once the load has dropped well below capacity.
pub fn evaluate(load: f64, cores: i64, tx: i64, rx: i64, limit: i64, frozen: bool)
    -> WatchVerdict {
    if load > OVERLOAD_FACTOR * cores as f64 {
        WatchVerdict::Freeze { overloaded: true }
    } else if tx > limit || rx > limit {
        WatchVerdict::Freeze { overloaded: false }
    } else if frozen && load < RESUME_FACTOR * cores as f64 {
        WatchVerdict::Thaw
    } else {
        WatchVerdict::Leave
    }
}

/// Byte-counter sampling of one network interface.
pub struct NetStat {
    iface: String,
    last: Mutex<Option<(i64, i64, Instant)>>,
}

impl NetStat {
    pub fn new() -> Self {
        NetStat {
            iface: detect_iface(),
            last: Mutex::new(None),
        }
    }

    pub fn is_10gb(&self) -> bool {
        let path = format!("/sys/class/net/{}/speed", self.iface);
        match fs::read_to_string(&path) {
            Ok(raw) => raw.trim().parse::<i64>().unwrap_or(0) >= TEN_GBE_MBPS,
            Err(_) => false,
        }
    }

    fn read_counters(&self) -> Option<(i64, i64)> {
        let contents = match fs::read_to_string("/proc/net/dev") {
            Ok(contents) => contents,
            Err(_) => return None,
        };
        for line in contents.lines() {
            let line = line.trim();
            let mut parts = line.splitn(2, ':');
            let name = match parts.next() {
                Some(name) => name.trim(),
                None => continue,
            };
            if name != self.iface {
                continue;
            }
            let fields: Vec<&str> = match parts.next() {
                Some(rest) => rest.split_whitespace().collect(),
                None => continue,
            };
            // receive bytes is field 0, transmit bytes field 8
            if fields.len() > 8 {
                let rx = fields[0].parse::<i64>().unwrap_or(0);
                let tx = fields[8].parse::<i64>().unwrap_or(0);
                return Some((tx, rx));
            }
        }
        None
    }

    /// Instantaneous throughput in bytes per second, zero until two
    /// samples exist.
    pub fn sample(&self) -> (i64, i64) {
        let counters = match self.read_counters() {
            Some(counters) => counters,
            None => return (0, 0),
        };
        let now = Instant::now();
        let mut last = self.last.lock().unwrap();
        let speeds = match *last {
            Some((tx, rx, at)) => {
                let elapsed = now.duration_since(at).as_secs() as i64;
                if elapsed > 0 {
                    ((counters.0 - tx) / elapsed, (counters.1 - rx) / elapsed)
                } else {
                    (0, 0)
                }
            }
            None => (0, 0),
        };
        *last = Some((counters.0, counters.1, now));
        speeds
    }
}

fn detect_iface() -> String {
    if let Ok(contents) = fs::read_to_string("/proc/net/dev") {
        for line in contents.lines().skip(2) {
            if let Some(name) = line.trim().split(':').next() {
                let name = name.trim();
                if !name.is_empty() && name != "lo" {
                    return name.to_owned();
                }
            }
        }
    }
    "eth0".to_owned()
}

fn read_load_average() -> Option<f64> {
    let contents = match fs::read_to_string("/proc/loadavg") {
        Ok(contents) => contents,
        Err(_) => return None,
    };
    contents
        .split_whitespace()
        .next()
        .and_then(|raw| raw.parse::<f64>().ok())
}

fn online_cores() -> i64 {
    let cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if cores < 1 { 1 } else { cores as i64 }
}

pub struct WatchDog {
    flags: Arc<WatchFlags>,
    executor: Weak<Executor>,
    netstat: NetStat,
    flow_limit_10gb: i64,
    flow_limit_1gb: i64,
}

impl WatchDog {
    pub fn new(
        flags: Arc<WatchFlags>,
        executor: &Arc<Executor>,
        flow_limit_10gb: i64,
        flow_limit_1gb: i64,
    ) -> Self {
        WatchDog {
            flags: flags,
            executor: Arc::downgrade(executor),
            netstat: NetStat::new(),
            flow_limit_10gb: flow_limit_10gb,
            flow_limit_1gb: flow_limit_1gb,
        }
    }

    fn tick(&self) {
        let load = match read_load_average() {
            Some(load) => load,
            None => return,
        };
        let executor = match self.executor.upgrade() {
            Some(executor) => executor,
            None => return,
        };
        let cores = online_cores();
        let (tx, rx) = self.netstat.sample();
        let limit = if self.netstat.is_10gb() {
            self.flow_limit_10gb
        } else {
            self.flow_limit_1gb
        };
        let frozen = self.flags.task_frozen.load(Ordering::SeqCst);

        match evaluate(load, cores, tx, rx, limit, frozen) {
            WatchVerdict::Freeze { overloaded } => {
                if overloaded {
                    warn!("load average: {}, cores: {}", load, cores);
                    warn!("machine may be overloaded, so freeze the task");
                } else {
                    warn!("traffic tx: {}, rx: {}", tx, rx);
                    warn!("network traffic is busy, so freeze the task");
                }
                if !frozen {
                    *self.flags.frozen_time.lock().unwrap() = Utc::now().timestamp();
                }
                self.flags.task_frozen.store(true, Ordering::SeqCst);
                if overloaded {
                    self.flags.over_loaded.store(true, Ordering::SeqCst);
                }
                executor.pause();
            }
            WatchVerdict::Thaw => {
                info!("machine seems healthy, so resume the task");
                executor.resume();
                self.flags.task_frozen.store(false, Ordering::SeqCst);
                self.flags.over_loaded.store(false, Ordering::SeqCst);
            }
            WatchVerdict::Leave => {}
        }
    }

    /// Starts the sampling loop. It stops by itself when the executor is
    /// dropped.
    pub fn spawn(self) {
        thread::spawn(move || loop {
            if self.executor.upgrade().is_none() {
                return;
            }
            self.tick();
            thread::sleep(Duration::from_millis(SAMPLE_PERIOD_MS));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overload_freezes_hard() {
        let verdict = evaluate(13.0, 8, 0, 0, 1 << 30, false);
        assert_eq!(WatchVerdict::Freeze { overloaded: true }, verdict);
    }

    #[test]
    fn test_network_pressure_freezes_softly() {
        let limit = 80 << 20;
        let verdict = evaluate(1.0, 8, limit + 1, 0, limit, false);
        assert_eq!(WatchVerdict::Freeze { overloaded: false }, verdict);

        let verdict = evaluate(1.0, 8, 0, limit + 1, limit, false);
        assert_eq!(WatchVerdict::Freeze { overloaded: false }, verdict);
    }

    #[test]
    fn test_load_pressure_wins_over_network() {
        let limit = 80 << 20;
        let verdict = evaluate(13.0, 8, limit + 1, 0, limit, true);
        assert_eq!(WatchVerdict::Freeze { overloaded: true }, verdict);
    }

    #[test]
    fn test_thaw_needs_headroom() {
        // Load below 1.5x but not below 0.8x: stay frozen.
        let verdict = evaluate(7.0, 8, 0, 0, 1 << 30, true);
        assert_eq!(WatchVerdict::Leave, verdict);

        let verdict = evaluate(5.0, 8, 0, 0, 1 << 30, true);
        assert_eq!(WatchVerdict::Thaw, verdict);
    }

    #[test]
    fn test_healthy_host_untouched() {
        let verdict = evaluate(1.0, 8, 0, 0, 1 << 30, false);
        assert_eq!(WatchVerdict::Leave, verdict);
    }
}
