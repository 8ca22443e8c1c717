//! Long-lived worker threads sharing one cooperative running flag.
//!
//! Audio loops run on std::thread (NOT tokio tasks) so blocking device I/O
//! never stalls the network tasks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;

type WorkerFn = Box<dyn FnOnce(&AtomicBool) -> Result<()> + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub name: String,
    pub alive: bool,
}

/// Snapshot of every worker, in start order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status(pub Vec<WorkerStatus>);

impl Status {
    pub fn any_alive(&self) -> bool {
        self.0.iter().any(|w| w.alive)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for worker in &self.0 {
            write!(f, "[{}] alive: {} ", worker.name, worker.alive)?;
        }
        Ok(())
    }
}

struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    running: Arc<AtomicBool>,
    pending: Vec<(String, WorkerFn)>,
    workers: Vec<Worker>,
    ready: bool,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            pending: Vec::new(),
            workers: Vec::new(),
            ready: false,
        }
    }

    /// Register a loop to run on its own thread once `start` is called. The
    /// loop should return when the flag it is handed clears.
    pub fn add<F>(&mut self, name: &str, work: F)
    where
        F: FnOnce(&AtomicBool) -> Result<()> + Send + 'static,
    {
        self.pending.push((name.to_string(), Box::new(work)));
    }

    /// Launch every registered worker. Ready only once all are running.
    pub fn start(&mut self) -> Result<()> {
        for (name, work) in std::mem::take(&mut self.pending) {
            let running = self.running.clone();
            let thread_name = name.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || match work(running.as_ref()) {
                    Ok(()) => log::info!("{} worker finished", thread_name),
                    Err(e) => log::error!("{} worker failed: {:#}", thread_name, e),
                })?;
            self.workers.push(Worker { name, handle });
        }
        self.ready = true;
        log::info!("{} workers started", self.workers.len());
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn status(&self) -> Status {
        if !self.is_ready() {
            return Status::default();
        }
        Status(
            self.workers
                .iter()
                .map(|w| WorkerStatus {
                    name: w.name.clone(),
                    alive: !w.handle.is_finished(),
                })
                .collect(),
        )
    }

    /// Ask every worker to return at its next polling point.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop, then wait up to `grace` for the workers to return. Returns the
    /// names of those still blocked, which are left detached.
    pub fn shutdown(&mut self, grace: Duration) -> Vec<String> {
        self.stop();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && self.workers.iter().any(|w| !w.handle.is_finished()) {
            thread::sleep(Duration::from_millis(10));
        }

        let mut blocked = Vec::new();
        for worker in self.workers.drain(..) {
            if worker.handle.is_finished() {
                if worker.handle.join().is_err() {
                    log::error!("{} worker panicked", worker.name);
                }
            } else {
                log::warn!("{} worker still blocked after {:?}", worker.name, grace);
                blocked.push(worker.name);
            }
        }
        blocked
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_until_finished(supervisor: &Supervisor, name: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let dead = supervisor
                .status()
                .0
                .iter()
                .any(|w| w.name == name && !w.alive);
            if dead {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("{} never finished", name);
    }

    fn idle(running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    #[test]
    fn status_is_empty_before_start() {
        let mut supervisor = Supervisor::new();
        supervisor.add("capture", idle);
        assert!(!supervisor.is_ready());
        assert!(supervisor.status().0.is_empty());
    }

    #[test]
    fn reports_workers_in_start_order() {
        let mut supervisor = Supervisor::new();
        supervisor.add("capture", idle);
        supervisor.add("playback", idle);
        supervisor.start().unwrap();

        let status = supervisor.status();
        let names: Vec<_> = status.0.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["capture", "playback"]);
        assert!(status.0.iter().all(|w| w.alive));
        assert_eq!(
            status.to_string(),
            "[capture] alive: true [playback] alive: true "
        );

        assert!(supervisor.shutdown(Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn failed_worker_is_not_alive_and_others_continue() {
        let mut supervisor = Supervisor::new();
        supervisor.add("capture", |_| anyhow::bail!("read failed"));
        supervisor.add("playback", idle);
        supervisor.start().unwrap();

        wait_until_finished(&supervisor, "capture");
        let status = supervisor.status();
        assert!(status.any_alive());
        assert!(status.0.iter().any(|w| w.name == "playback" && w.alive));

        supervisor.stop();
        wait_until_finished(&supervisor, "playback");
        assert!(!supervisor.status().any_alive());
    }

    #[test]
    fn shutdown_reports_blocked_workers() {
        let mut supervisor = Supervisor::new();
        supervisor.add("stuck", |_| {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        supervisor.add("ptt", idle);
        supervisor.start().unwrap();

        let blocked = supervisor.shutdown(Duration::from_millis(50));
        assert_eq!(blocked, vec!["stuck".to_string()]);
    }
}
