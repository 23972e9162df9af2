//! Background monitor that expires jobs which waited too long to start.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::core::future::JobId;

struct MonitorState {
    deadlines: BinaryHeap<Reverse<(Instant, JobId)>>,
    /// A deadline was registered since the monitor last looked.
    dirty: bool,
    shutdown: bool,
}

/// Deadline heap shared between the scheduler and the monitor thread.
pub(crate) struct ExpirationMonitor {
    state: Mutex<MonitorState>,
    changed: Condvar,
}

impl ExpirationMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState {
                deadlines: BinaryHeap::new(),
                dirty: false,
                shutdown: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn register(&self, deadline: Instant, job_id: JobId) {
        let mut state = self.state.lock();
        state.deadlines.push(Reverse((deadline, job_id)));
        state.dirty = true;
        self.changed.notify_one();
    }

    /// Pop every deadline at or before `now`.
    pub fn take_due(&self, now: Instant) -> Vec<JobId> {
        let mut state = self.state.lock();
        let mut due = Vec::new();
        while let Some(Reverse((deadline, job_id))) = state.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            state.deadlines.pop();
            due.push(job_id);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().deadlines.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Sleep up to `timeout` or until a new deadline arrives. Returns `false`
    /// once the monitor is shut down.
    fn park(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        if !state.dirty {
            self.changed.wait_for(&mut state, timeout);
        }
        state.dirty = false;
        !state.shutdown
    }

    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.changed.notify_all();
    }

    /// Run `sweep` until it returns `None` or the monitor shuts down. `sweep`
    /// expires what is due and returns how long to sleep.
    pub fn spawn<F>(monitor: Arc<Self>, mut sweep: F) -> io::Result<JoinHandle<()>>
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        thread::Builder::new()
            .name("job-expiration".to_string())
            .spawn(move || {
                debug!("expiration monitor started");
                while let Some(wait) = sweep() {
                    if !monitor.park(wait) {
                        break;
                    }
                }
                debug!("expiration monitor stopped");
            })
    }
}
