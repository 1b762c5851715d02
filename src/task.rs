//! Ownership of long-running worker threads, one slot per kind of work.

use crate::error::Error;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error};

/// Handed to the worker so it can observe cancellation.
#[derive(Debug, Clone)]
pub struct StopToken {
    stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl StopToken {
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Release the slot before the worker returns, so that whoever receives
    /// the worker's final message can immediately spawn the next task.
    pub fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

struct Task {
    token: StopToken,
    handle: JoinHandle<()>,
}

/// Holds at most one running task.
pub struct TaskSlot {
    name: &'static str,
    task: Option<Task>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self { name, task: None }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| {
            task.token.active.load(Ordering::SeqCst) && !task.handle.is_finished()
        })
    }

    /// Spawn `work` on a new thread. Returns `false` without spawning if the
    /// slot's previous task is still running.
    pub fn spawn<F>(&mut self, work: F) -> Result<bool, Error>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        if self.is_running() {
            return Ok(false);
        }
        self.reap();

        let token = StopToken {
            stop: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(true)),
        };
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name(self.name.to_owned())
            .spawn(move || {
                work(worker_token.clone());
                worker_token.finish();
            })
            .map_err(|e| Error::SpawnThread(e, self.name))?;

        debug!(message = "spawned task", name = self.name);
        self.task = Some(Task { token, handle });
        Ok(true)
    }

    /// Ask the running task to stop without waiting for it.
    pub fn request_stop(&self) {
        if let Some(task) = &self.task {
            task.token.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Ask the running task to stop and wait for its thread to exit.
    /// Returns whether there was a task to stop.
    pub fn stop(&mut self) -> bool {
        self.request_stop();
        self.reap()
    }

    fn reap(&mut self) -> bool {
        match self.task.take() {
            Some(task) if task.handle.thread().id() == thread::current().id() => {
                // dropped by its own worker, which is about to exit anyway
                debug!(message = "detached task", name = self.name);
                true
            }
            Some(task) => {
                if task.handle.join().is_err() {
                    error!(message = "task panicked", name = self.name);
                }
                debug!(message = "joined task", name = self.name);
                true
            }
            None => false,
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.stop();
    }
}
