//! Document handles.
//!
//! A [`Book`] is the broker's proxy for one document open in one session.
//! Callers own handles through `Arc<Book>`; the registry only keeps weak
//! references, so a handle lives exactly as long as someone holds it.
//!
//! Liveness is polled: [`Book::alive`] pings the document and a failed ping
//! closes the handle permanently. Reopening always yields a new handle.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::automation::{AutomationError, CloseMode, DocumentObject};
use crate::canonical::{base_name, canonicalize};
use crate::error::{BrokerError, Result};
use crate::options::CloseUnsavedPolicy;
use crate::session::Session;

pub struct Book {
    state: Mutex<BookState>,
}

struct BookState {
    object: Box<dyn DocumentObject>,
    session: Arc<Session>,
    full_name: String,
    canonical_name: String,
    writable: bool,
    closed: bool,
    /// Key this handle was last stored under in the registry.
    stored_key: Option<String>,
}

impl BookState {
    fn probe(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.object.ping().is_err() {
            debug!(path = %self.full_name, "Document handle went away");
            self.closed = true;
        }
        !self.closed
    }
}

impl fmt::Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Book")
            .field("full_name", &state.full_name)
            .field("session", &state.session.id())
            .field("writable", &state.writable)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Book {
    pub(crate) fn new(object: Box<dyn DocumentObject>, session: Arc<Session>) -> Result<Arc<Self>> {
        let full_name = object
            .full_name()
            .map_err(|e| BrokerError::automation("<unnamed>", "full name", e))?;
        let read_only = object
            .read_only()
            .map_err(|e| BrokerError::automation(&full_name, "read only", e))?;

        Ok(Arc::new(Self {
            state: Mutex::new(BookState {
                object,
                session,
                canonical_name: canonicalize(&full_name),
                full_name,
                writable: !read_only,
                closed: false,
                stored_key: None,
            }),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, BookState> {
        // Recover from poisoning - the state is plain data and still consistent
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live(&self) -> Result<MutexGuard<'_, BookState>> {
        let mut state = self.lock();
        if state.probe() {
            Ok(state)
        } else {
            Err(BrokerError::DeadHandle {
                name: state.full_name.clone(),
            })
        }
    }

    /// Whether the document is still open. Never true again once false.
    pub fn alive(&self) -> bool {
        self.lock().probe()
    }

    /// Full path as last reported by the application.
    pub fn full_name(&self) -> String {
        self.lock().full_name.clone()
    }

    /// Registry key for this document.
    pub fn canonical_name(&self) -> String {
        self.lock().canonical_name.clone()
    }

    pub fn base_name(&self) -> String {
        base_name(&self.lock().full_name)
    }

    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.lock().session)
    }

    /// False when opened read-only. Fixed for the life of the handle.
    pub fn writable(&self) -> bool {
        self.lock().writable
    }

    /// True when there are no unsaved modifications.
    pub fn saved(&self) -> Result<bool> {
        let state = self.live()?;
        state
            .object
            .saved()
            .map_err(|e| BrokerError::automation(&state.full_name, "saved", e))
    }

    pub fn set_saved(&self, saved: bool) -> Result<()> {
        let state = self.live()?;
        state
            .object
            .set_saved(saved)
            .map_err(|e| BrokerError::automation(&state.full_name, "set saved", e))
    }

    pub fn visible(&self) -> Result<bool> {
        let state = self.live()?;
        state
            .object
            .visible()
            .map_err(|e| BrokerError::automation(&state.full_name, "visible", e))
    }

    /// Changes window visibility. Use through [`Book::retain_saved`] when the
    /// saved flag must not move.
    pub fn set_visible(&self, visible: bool) -> Result<()> {
        let state = self.live()?;
        state
            .object
            .set_visible(visible)
            .map_err(|e| BrokerError::automation(&state.full_name, "set visible", e))
    }

    /// Runs `f` and puts the saved flag back to what it was before.
    pub fn retain_saved<T>(&self, f: impl FnOnce(&Book) -> Result<T>) -> Result<T> {
        let was_saved = self.saved()?;
        let result = f(self);
        if self.alive() {
            self.set_saved(was_saved)?;
        }
        result
    }

    pub fn value(&self, cell: &str) -> Result<Option<String>> {
        let state = self.live()?;
        state
            .object
            .value(cell)
            .map_err(|e| BrokerError::automation(&state.full_name, "read value", e))
    }

    pub fn set_value(&self, cell: &str, value: &str) -> Result<()> {
        let state = self.live()?;
        state
            .object
            .set_value(cell, value)
            .map_err(|e| BrokerError::automation(&state.full_name, "write value", e))
    }

    /// Saves in place. Read-only handles refuse.
    pub fn save(&self) -> Result<()> {
        let state = self.live()?;
        if !state.writable {
            return Err(BrokerError::ReadOnlyViolation {
                name: state.full_name.clone(),
            });
        }
        state.object.save().map_err(|e| match e {
            AutomationError::ReadOnly => BrokerError::ReadOnlyViolation {
                name: state.full_name.clone(),
            },
            other => BrokerError::automation(&state.full_name, "save", other),
        })
    }

    /// Closes the document. Closing a dead handle does nothing.
    pub fn close(&self, if_unsaved: CloseUnsavedPolicy) -> Result<()> {
        let mut state = self.lock();
        if !state.probe() {
            return Ok(());
        }
        let saved = state
            .object
            .saved()
            .map_err(|e| BrokerError::automation(&state.full_name, "saved", e))?;

        let mode = if saved {
            CloseMode::Discard
        } else {
            match if_unsaved {
                CloseUnsavedPolicy::Raise => {
                    return Err(BrokerError::UnsavedConflict {
                        name: state.full_name.clone(),
                        option: CloseUnsavedPolicy::OPTION,
                    })
                }
                CloseUnsavedPolicy::KeepOpen => return Ok(()),
                CloseUnsavedPolicy::Save if !state.writable => {
                    return Err(BrokerError::ReadOnlyViolation {
                        name: state.full_name.clone(),
                    })
                }
                CloseUnsavedPolicy::Save => CloseMode::Save,
                CloseUnsavedPolicy::Forget => CloseMode::Discard,
                CloseUnsavedPolicy::Alert => CloseMode::Prompt,
            }
        };

        let session = Arc::clone(&state.session);
        let result = if mode == CloseMode::Prompt {
            // The prompt closure relocks the handle
            drop(state);
            let outcome = session.with_display_alerts(true, || {
                let state = self.lock();
                state
                    .object
                    .close(mode)
                    .map_err(|e| BrokerError::automation(&state.full_name, "close", e))
            });
            state = self.lock();
            outcome
        } else {
            state
                .object
                .close(mode)
                .map_err(|e| BrokerError::automation(&state.full_name, "close", e))
        };
        result?;

        state.closed = true;
        debug!(path = %state.full_name, session = session.id(), "Document closed");
        Ok(())
    }

    /// Saves under a new name and takes that name. The caller re-keys the registry.
    pub(crate) fn save_as_path(&self, path: &str) -> Result<()> {
        let mut state = self.live()?;
        state
            .object
            .save_as(path)
            .map_err(|e| BrokerError::automation(path, "save as", e))?;
        let full_name = state
            .object
            .full_name()
            .unwrap_or_else(|_| path.to_string());
        state.canonical_name = canonicalize(&full_name);
        state.full_name = full_name;
        state.writable = true;
        Ok(())
    }

    pub(crate) fn stored_key(&self) -> Option<String> {
        self.lock().stored_key.clone()
    }

    pub(crate) fn set_stored_key(&self, key: String) {
        self.lock().stored_key = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::Automation;
    use crate::sim::{PromptResponse, SimAutomation};

    fn open(sim: &SimAutomation, path: &str, read_only: bool) -> Arc<Book> {
        let app = sim.launch().unwrap();
        let id = app.instance_id().unwrap();
        let session = Arc::new(Session::new(app, id, false));
        let object = session.open_document(path, read_only).unwrap();
        Book::new(object, session).unwrap()
    }

    #[test]
    fn new_handle_reports_document_state() {
        let sim = SimAutomation::new();
        sim.write_file("C:/Data/Book.xlsx", &[]);
        let book = open(&sim, "C:/Data/Book.xlsx", false);

        assert!(book.alive());
        assert!(book.writable());
        assert!(book.saved().unwrap());
        assert_eq!(book.canonical_name(), "c:/data/book.xlsx");
        assert_eq!(book.full_name(), "C:/Data/Book.xlsx");
        assert_eq!(book.base_name(), "book.xlsx");
    }

    #[test]
    fn dead_handle_stays_dead() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let book = open(&sim, "c:/a.xlsx", false);

        sim.crash(book.session().id());
        assert!(!book.alive());
        assert!(matches!(book.saved(), Err(BrokerError::DeadHandle { .. })));
        assert!(book.close(CloseUnsavedPolicy::Raise).is_ok());
    }

    #[test]
    fn save_on_read_only_handle_is_a_violation() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let book = open(&sim, "c:/a.xlsx", true);

        book.set_value("A1", "1").unwrap();
        assert!(matches!(
            book.save(),
            Err(BrokerError::ReadOnlyViolation { .. })
        ));
    }

    #[test]
    fn retain_saved_keeps_flag() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let book = open(&sim, "c:/a.xlsx", false);

        book.retain_saved(|b| b.set_visible(false)).unwrap();
        assert!(!book.visible().unwrap());
        assert!(book.saved().unwrap());
    }

    #[test]
    fn close_policies() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[("A1", "0")]);
        let book = open(&sim, "c:/a.xlsx", false);
        book.set_value("A1", "1").unwrap();

        assert!(matches!(
            book.close(CloseUnsavedPolicy::Raise),
            Err(BrokerError::UnsavedConflict { .. })
        ));
        book.close(CloseUnsavedPolicy::KeepOpen).unwrap();
        assert!(book.alive());

        book.close(CloseUnsavedPolicy::Save).unwrap();
        assert!(!book.alive());
        assert_eq!(sim.file_value("c:/a.xlsx", "A1").as_deref(), Some("1"));
    }

    #[test]
    fn close_alert_cancel_keeps_document_open() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let book = open(&sim, "c:/a.xlsx", false);
        book.session().set_display_alerts(false).unwrap();
        book.set_value("A1", "1").unwrap();

        sim.set_prompt_response(PromptResponse::Cancel);
        assert!(matches!(
            book.close(CloseUnsavedPolicy::Alert),
            Err(BrokerError::UserCanceled { .. })
        ));
        assert!(book.alive());

        sim.set_prompt_response(PromptResponse::No);
        book.close(CloseUnsavedPolicy::Alert).unwrap();
        assert!(!book.alive());
        assert_eq!(sim.file_value("c:/a.xlsx", "A1"), None);
    }
}
