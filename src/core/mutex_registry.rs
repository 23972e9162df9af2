//! Mutex domains and the registry that grants their permits.
//!
//! Every domain has at most one holder. Jobs that want the permit queue up in
//! FIFO order; when the holder releases, the head of the queue is granted
//! immediately. A first-time acquisition is handed back to the scheduler to
//! submit to the executor, a resumption after a blocking condition is
//! signalled to the suspended thread directly.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::future::FutureCore;

/// Key of a mutual-exclusion domain, e.g. one per user session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutexDomain(String);

impl MutexDomain {
    /// Domain with the given key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Domain with a random, process-unique key.
    #[must_use]
    pub fn unique() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutexDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MutexDomain {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for MutexDomain {
    fn from(key: String) -> Self {
        Self(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquisitionKind {
    /// The job has never run; granting means submitting it.
    Start,
    /// The job is suspended in `wait_for`; granting means waking it.
    Resume,
}

struct PendingAcquisition {
    core: Arc<FutureCore>,
    enqueued_at: Instant,
    kind: AcquisitionKind,
}

#[derive(Default)]
struct DomainState {
    holder: Option<Arc<FutureCore>>,
    waiting: VecDeque<PendingAcquisition>,
}

impl DomainState {
    fn is_idle(&self) -> bool {
        self.holder.is_none() && self.waiting.is_empty()
    }

    /// Hand the permit to the head of the queue. Returns the job to submit
    /// when the grant is a first start.
    fn grant_next(&mut self, domain: &MutexDomain) -> Option<Arc<FutureCore>> {
        let pending = self.waiting.pop_front()?;
        trace!(
            domain = %domain,
            job_id = pending.core.id,
            waited_us = u64::try_from(pending.enqueued_at.elapsed().as_micros()).unwrap_or(u64::MAX),
            "permit granted"
        );
        self.holder = Some(Arc::clone(&pending.core));
        match pending.kind {
            AcquisitionKind::Start => Some(pending.core),
            AcquisitionKind::Resume => {
                pending.core.grant_resume();
                None
            }
        }
    }
}

/// Permit bookkeeping for all domains of one scheduler.
#[derive(Default)]
pub(crate) struct MutexRegistry {
    domains: Mutex<HashMap<MutexDomain, DomainState>>,
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `core` for its domain's permit. Returns the job to submit if a
    /// first start was granted right away.
    pub fn acquire(
        &self,
        core: &Arc<FutureCore>,
        kind: AcquisitionKind,
        now: Instant,
    ) -> Option<Arc<FutureCore>> {
        let domain = core.domain.as_ref()?;
        let mut domains = self.domains.lock();
        let state = domains.entry(domain.clone()).or_default();
        state.waiting.push_back(PendingAcquisition {
            core: Arc::clone(core),
            enqueued_at: now,
            kind,
        });
        if state.holder.is_none() {
            state.grant_next(domain)
        } else {
            None
        }
    }

    /// Give up the permit if `core` holds it, granting it to the next waiter.
    pub fn release(&self, core: &Arc<FutureCore>) -> Option<Arc<FutureCore>> {
        let domain = core.domain.as_ref()?;
        let mut domains = self.domains.lock();
        let state = domains.get_mut(domain)?;
        if !state.holder.as_ref().is_some_and(|h| h.id == core.id) {
            return None;
        }
        state.holder = None;
        core.revoke_resume();
        let next = state.grant_next(domain);
        if state.is_idle() {
            domains.remove(domain);
        }
        next
    }

    /// Leave the domain queue, or release the permit if it was already
    /// granted.
    pub fn withdraw(&self, core: &Arc<FutureCore>) -> Option<Arc<FutureCore>> {
        let domain = core.domain.as_ref()?;
        {
            let mut domains = self.domains.lock();
            let state = domains.get_mut(domain)?;
            if let Some(pos) = state.waiting.iter().position(|p| p.core.id == core.id) {
                state.waiting.remove(pos);
                if state.is_idle() {
                    domains.remove(domain);
                }
                return None;
            }
        }
        self.release(core)
    }

    /// Jobs queued in or holding the domain.
    pub fn permit_count(&self, domain: &MutexDomain) -> usize {
        self.domains
            .lock()
            .get(domain)
            .map_or(0, |state| usize::from(state.holder.is_some()) + state.waiting.len())
    }

    pub fn is_holder(&self, core: &FutureCore) -> bool {
        let Some(domain) = core.domain.as_ref() else {
            return false;
        };
        self.domains
            .lock()
            .get(domain)
            .and_then(|state| state.holder.as_ref())
            .is_some_and(|holder| holder.id == core.id)
    }

    #[cfg(test)]
    pub fn domain_count(&self) -> usize {
        self.domains.lock().len()
    }
}
