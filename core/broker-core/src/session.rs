//! One running application instance.
//!
//! A `Session` wraps an [`AppObject`] and answers "is this instance still
//! there?" by pinging it. Once a probe fails the session is dead for good:
//! a relaunched application gets a new `Session`, never this one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::automation::{
    AppObject, AutomationError, Calculation, CloseMode, DocumentObject, InstanceId,
};
use crate::error::{BrokerError, Result};
use crate::options::CloseUnsavedPolicy;

pub struct Session {
    id: InstanceId,
    hidden: bool,
    app: Box<dyn AppObject>,
    dead: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("hidden", &self.hidden)
            .field("dead", &self.dead.load(Ordering::SeqCst))
            .finish()
    }
}

impl Session {
    pub(crate) fn new(app: Box<dyn AppObject>, id: InstanceId, hidden: bool) -> Self {
        Self {
            id,
            hidden,
            app,
            dead: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// The broker's private session for unobtrusive access.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Probes the instance. A failed probe is remembered.
    pub fn alive(&self) -> bool {
        if self.dead.load(Ordering::SeqCst) {
            return false;
        }
        if self.app.ping().is_err() {
            debug!(session = self.id, "Session stopped responding");
            self.dead.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn visible(&self) -> Result<bool> {
        self.app.visible().map_err(|e| self.failure("visible", e))
    }

    pub fn set_visible(&self, visible: bool) -> Result<()> {
        self.app
            .set_visible(visible)
            .map_err(|e| self.failure("set visible", e))
    }

    pub fn display_alerts(&self) -> Result<bool> {
        self.app
            .display_alerts()
            .map_err(|e| self.failure("display alerts", e))
    }

    pub fn set_display_alerts(&self, enabled: bool) -> Result<()> {
        self.app
            .set_display_alerts(enabled)
            .map_err(|e| self.failure("set display alerts", e))
    }

    /// Runs `f` with display alerts switched to `enabled`, restoring the
    /// previous setting afterwards even when `f` fails.
    pub fn with_display_alerts<T>(
        &self,
        enabled: bool,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let previous = self.display_alerts()?;
        self.set_display_alerts(enabled)?;
        let result = f();
        if self.alive() {
            self.set_display_alerts(previous)?;
        }
        result
    }

    pub fn calculation(&self) -> Result<Calculation> {
        self.app
            .calculation()
            .map_err(|e| self.failure("calculation", e))
    }

    pub fn set_calculation(&self, mode: Calculation) -> Result<()> {
        self.app
            .set_calculation(mode)
            .map_err(|e| self.failure("set calculation", e))
    }

    /// Runs `f` under `mode`, restoring the previous mode afterwards.
    pub fn with_calculation<T>(
        &self,
        mode: Calculation,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let previous = self.calculation()?;
        self.set_calculation(mode)?;
        let result = f();
        if self.alive() {
            self.set_calculation(previous)?;
        }
        result
    }

    pub(crate) fn documents(&self) -> Result<Vec<Box<dyn DocumentObject>>> {
        self.app
            .documents()
            .map_err(|e| self.failure("list documents", e))
    }

    /// Full names of open documents with unsaved changes.
    pub fn unsaved_documents(&self) -> Result<Vec<String>> {
        let mut unsaved = Vec::new();
        for doc in self.documents()? {
            if !doc.saved().map_err(|e| self.failure("saved", e))? {
                unsaved.push(doc.full_name().map_err(|e| self.failure("full name", e))?);
            }
        }
        Ok(unsaved)
    }

    pub(crate) fn open_document(
        &self,
        path: &str,
        read_only: bool,
    ) -> Result<Box<dyn DocumentObject>> {
        self.app
            .open_document(path, read_only)
            .map_err(|e| match e {
                AutomationError::NotFound(_) => BrokerError::ResourceNotFound {
                    name: path.to_string(),
                },
                other => BrokerError::automation(path, "open", other),
            })
    }

    pub(crate) fn create_document(&self, path: &str) -> Result<Box<dyn DocumentObject>> {
        self.app
            .create_document(path)
            .map_err(|e| BrokerError::automation(path, "create", e))
    }

    /// Closes every document under `if_unsaved`, then quits the instance.
    ///
    /// Saved documents close without saving. Unsaved ones are checked against
    /// `if_unsaved` (`save` also needs write access) before any document is
    /// touched, so a refused close leaves the session as it was. `keep_open`
    /// has no meaning for a whole session and is rejected.
    pub fn close(&self, if_unsaved: CloseUnsavedPolicy) -> Result<()> {
        if !self.alive() {
            return Ok(());
        }
        let documents = self.documents()?;

        if if_unsaved == CloseUnsavedPolicy::KeepOpen {
            return Err(BrokerError::invalid_option(
                CloseUnsavedPolicy::OPTION,
                "keep_open",
            ));
        }

        let mut plan = Vec::with_capacity(documents.len());
        for doc in &documents {
            let name = doc.full_name().unwrap_or_default();
            let saved = doc.saved().map_err(|e| self.failure("saved", e))?;
            let mode = if saved {
                CloseMode::Discard
            } else {
                match if_unsaved {
                    CloseUnsavedPolicy::Raise => {
                        return Err(BrokerError::UnsavedConflict {
                            name,
                            option: CloseUnsavedPolicy::OPTION,
                        })
                    }
                    CloseUnsavedPolicy::Save => {
                        let read_only = doc
                            .read_only()
                            .map_err(|e| BrokerError::automation(&name, "read only", e))?;
                        if read_only {
                            return Err(BrokerError::ReadOnlyViolation { name });
                        }
                        CloseMode::Save
                    }
                    CloseUnsavedPolicy::Forget | CloseUnsavedPolicy::KeepOpen => {
                        CloseMode::Discard
                    }
                    CloseUnsavedPolicy::Alert => CloseMode::Prompt,
                }
            };
            plan.push((doc, name, mode));
        }

        let prompt = plan.iter().any(|(_, _, mode)| *mode == CloseMode::Prompt);
        let run = || -> Result<()> {
            for (doc, name, mode) in &plan {
                doc.close(*mode)
                    .map_err(|e| BrokerError::automation(name, "close", e))?;
            }
            Ok(())
        };
        if prompt {
            self.with_display_alerts(true, run)?;
        } else {
            run()?;
        }

        self.app.quit().map_err(|e| self.failure("quit", e))?;
        self.dead.store(true, Ordering::SeqCst);
        info!(session = self.id, "Session closed");
        Ok(())
    }

    /// Kills the instance without asking. Unsaved changes are lost.
    pub fn terminate(&self) -> Result<()> {
        self.app
            .terminate()
            .map_err(|e| self.failure("terminate", e))?;
        self.dead.store(true, Ordering::SeqCst);
        info!(session = self.id, "Session terminated");
        Ok(())
    }

    fn failure(&self, context: &str, source: AutomationError) -> BrokerError {
        BrokerError::Automation {
            context: format!("session {}: {}", self.id, context),
            source,
        }
    }
}
