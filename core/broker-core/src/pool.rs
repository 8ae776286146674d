//! Session pooling: reuse, launch, and shut down application instances.
//!
//! The pool indexes sessions by their external [`InstanceId`] through weak
//! references, so asking for the same running instance twice yields the same
//! [`Session`] for as long as anyone holds it. Instances the pool never
//! launched (started by a user, or by another process) are discovered through
//! [`Automation::running`] and adopted on first sight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::automation::{AppObject, Automation, InstanceId};
use crate::error::{BrokerError, Result};
use crate::options::{CloseUnsavedPolicy, SessionSelector};
use crate::reaper;
use crate::session::Session;

/// Settings for the close-all sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseAllConfig {
    /// How often to re-check for instances that are still running.
    pub poll_attempts: u32,
    /// Pause between checks; doubles after each attempt.
    pub poll_interval_ms: u64,
    /// Also kill leftover OS processes named `process_name`.
    pub kill_stray_processes: bool,
    pub process_name: String,
}

impl Default for CloseAllConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 3,
            poll_interval_ms: 100,
            kill_stray_processes: false,
            process_name: "EXCEL.EXE".to_string(),
        }
    }
}

/// Settings applied to sessions the pool launches.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    pub visible: bool,
    pub suppress_alerts: bool,
    pub close_all: CloseAllConfig,
}

/// Outcome of [`SessionPool::close_all`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CloseAllReport {
    /// Sessions that quit cleanly.
    pub closed: usize,
    /// Sessions that failed to close.
    pub errored: usize,
    /// Instances (or stray processes) that had to be killed.
    pub terminated: usize,
}

struct PoolState {
    /// In adoption order.
    sessions: Vec<(InstanceId, Weak<Session>)>,
    /// Remembered even after the wrapper is dropped, so a hidden instance is
    /// never handed out as `current`.
    hidden: HashSet<InstanceId>,
}

pub struct SessionPool {
    automation: Arc<dyn Automation>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl SessionPool {
    pub fn new(automation: Arc<dyn Automation>, config: PoolConfig) -> Self {
        Self {
            automation,
            config,
            state: Mutex::new(PoolState {
                sessions: Vec::new(),
                hidden: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn automation(&self) -> &Arc<dyn Automation> {
        &self.automation
    }

    /// Resolves a selector to a live session.
    pub fn resolve(&self, selector: &SessionSelector) -> Result<Arc<Session>> {
        match selector {
            SessionSelector::Current => self.current(),
            SessionSelector::New => self.create(false),
            SessionSelector::Session(session) => {
                if session.alive() {
                    Ok(Arc::clone(session))
                } else {
                    Err(BrokerError::DeadSession { id: session.id() })
                }
            }
        }
    }

    /// First live, non-hidden running instance; launches one if there is none.
    pub fn current(&self) -> Result<Arc<Session>> {
        for app in self.automation.running() {
            let Ok(id) = app.instance_id() else {
                continue;
            };
            if self.lock().hidden.contains(&id) {
                continue;
            }
            let session = self.adopt(app, id, false);
            if session.alive() {
                return Ok(session);
            }
        }
        self.create(false)
    }

    /// Launches a fresh instance.
    pub fn create(&self, hidden: bool) -> Result<Arc<Session>> {
        let app = self.automation.launch().map_err(|e| BrokerError::Automation {
            context: "launch session".to_string(),
            source: e,
        })?;
        let id = app.instance_id().map_err(|e| BrokerError::Automation {
            context: "launch session".to_string(),
            source: e,
        })?;

        let session = self.adopt(app, id, hidden);
        session.set_display_alerts(!self.config.suppress_alerts)?;
        session.set_visible(self.config.visible && !hidden)?;
        info!(session = id, hidden, "Session launched");
        Ok(session)
    }

    /// Wraps `app`, reusing the existing wrapper for `id` when one is alive.
    fn adopt(&self, app: Box<dyn AppObject>, id: InstanceId, hidden: bool) -> Arc<Session> {
        let mut state = self.lock();
        state.sessions.retain(|(_, weak)| weak.strong_count() > 0);
        if let Some(existing) = state
            .sessions
            .iter()
            .find(|(known, _)| *known == id)
            .and_then(|(_, weak)| weak.upgrade())
        {
            return existing;
        }

        if hidden {
            state.hidden.insert(id);
        }
        let is_hidden = hidden || state.hidden.contains(&id);
        let session = Arc::new(Session::new(app, id, is_hidden));
        state.sessions.push((id, Arc::downgrade(&session)));
        debug!(session = id, "Session adopted");
        session
    }

    /// Every live session: the ones already wrapped plus any running instance
    /// not seen before.
    pub fn known_sessions(&self) -> Vec<Arc<Session>> {
        let mut listed: Vec<Arc<Session>> = {
            let state = self.lock();
            state
                .sessions
                .iter()
                .filter_map(|(_, weak)| weak.upgrade())
                .collect()
        };
        for app in self.automation.running() {
            let Ok(id) = app.instance_id() else {
                continue;
            };
            if listed.iter().all(|session| session.id() != id) {
                listed.push(self.adopt(app, id, false));
            }
        }
        listed.retain(|session| session.alive());
        listed
    }

    /// Closes every session under `if_unsaved`, then sweeps for instances
    /// that are still running and kills them.
    ///
    /// Under `raise`, the first refusal is returned after the remaining
    /// sessions have been tried and the kill sweep is skipped.
    pub fn close_all(&self, if_unsaved: CloseUnsavedPolicy) -> Result<CloseAllReport> {
        let mut report = CloseAllReport::default();
        let mut first_error = None;
        let mut spared = HashSet::new();

        for session in self.known_sessions() {
            match session.close(if_unsaved) {
                Ok(()) => report.closed += 1,
                Err(err) => {
                    warn!(session = session.id(), error = %err, "Session failed to close");
                    report.errored += 1;
                    spared.insert(session.id());
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            if if_unsaved == CloseUnsavedPolicy::Raise {
                return Err(err);
            }
        }

        report.terminated += self.sweep(&spared);
        if self.config.close_all.kill_stray_processes {
            report.terminated += reaper::kill_processes(&self.config.close_all.process_name);
        }
        info!(
            closed = report.closed,
            errored = report.errored,
            terminated = report.terminated,
            "Close-all finished"
        );
        Ok(report)
    }

    /// Polls for leftover instances with backoff, then terminates them.
    /// Instances in `spared` refused to close and are left alone.
    fn sweep(&self, spared: &HashSet<InstanceId>) -> usize {
        let config = &self.config.close_all;
        let mut interval = Duration::from_millis(config.poll_interval_ms);
        for attempt in 0..config.poll_attempts {
            if self.leftovers(spared).is_empty() {
                return 0;
            }
            debug!(attempt, "Waiting for sessions to exit");
            thread::sleep(interval);
            interval = interval.saturating_mul(2);
        }

        let mut terminated = 0;
        for (id, app) in self.leftovers(spared) {
            match app.terminate() {
                Ok(()) => terminated += 1,
                Err(err) => warn!(session = id, error = %err, "Failed to terminate session"),
            }
        }
        terminated
    }

    fn leftovers(&self, spared: &HashSet<InstanceId>) -> Vec<(InstanceId, Box<dyn AppObject>)> {
        self.automation
            .running()
            .into_iter()
            .filter_map(|app| app.instance_id().ok().map(|id| (id, app)))
            .filter(|(id, _)| !spared.contains(id))
            .collect()
    }
}
