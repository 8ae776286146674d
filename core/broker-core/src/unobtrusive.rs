//! Access a document without leaving a trace.
//!
//! [`Broker::with_unchanged_state`] captures what the caller could observe
//! about a document (open or not, write mode, saved flag, visibility, the
//! session's calculation mode), runs a closure against a handle, and puts
//! all of it back. Restoration runs on every exit path; if the closure
//! fails, its error wins over any restore error.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::automation::Calculation;
use crate::book::Book;
use crate::broker::Broker;
use crate::canonical::{absolutize, normalize};
use crate::error::{BrokerError, Result};
use crate::options::{
    ClosedPlacement, CloseUnsavedPolicy, OpenOptions, SessionSelector, UnobtrusiveOptions,
    UnsavedPolicy,
};
use crate::registry::FetchOptions;

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    saved: bool,
    visible: bool,
    calculation: Calculation,
}

impl Snapshot {
    fn capture(book: &Book) -> Result<Self> {
        Ok(Self {
            saved: book.saved()?,
            visible: book.visible()?,
            calculation: book.session().calculation()?,
        })
    }
}

/// Puts a document back the way it was. Runs from `Drop` if `run` was
/// never reached (the body panicked).
struct Restore<'a> {
    broker: &'a Broker,
    book: Arc<Book>,
    snapshot: Snapshot,
    options: UnobtrusiveOptions,
    /// The document was open before the call.
    was_open: bool,
    /// The earlier handle was read-only and got replaced by a writable one.
    reopened: bool,
    done: bool,
}

impl Restore<'_> {
    fn run(mut self) -> Result<()> {
        self.done = true;
        self.restore()
    }

    fn restore(&self) -> Result<()> {
        let book = &self.book;
        if !book.alive() {
            return Ok(());
        }

        let modified = !book.saved()?;
        if modified && self.options.writable && book.writable() {
            book.save()?;
        }

        if !self.was_open {
            if self.options.keep_open {
                self.broker.retain(Arc::clone(book));
                return self.restore_flags(book);
            }
            debug!(path = %book.full_name(), "Closing document opened for unobtrusive access");
            return book.close(CloseUnsavedPolicy::Forget);
        }

        if self.reopened {
            let session = book.session();
            book.close(CloseUnsavedPolicy::Forget)?;
            let options = OpenOptions::new()
                .read_only(true)
                .force_session(SessionSelector::Session(session));
            let original = self.broker.open(&book.full_name(), &options)?;
            debug!(path = %original.full_name(), "Restored read-only handle");
            self.restore_flags(&original)?;
            self.broker.retain(original);
            return Ok(());
        }

        self.restore_flags(book)
    }

    fn restore_flags(&self, book: &Book) -> Result<()> {
        if book.visible()? != self.snapshot.visible {
            book.set_visible(self.snapshot.visible)?;
        }
        if book.saved()? != self.snapshot.saved {
            book.set_saved(self.snapshot.saved)?;
        }
        let session = book.session();
        if session.calculation()? != self.snapshot.calculation {
            session.set_calculation(self.snapshot.calculation)?;
        }
        Ok(())
    }
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(err) = self.restore() {
            warn!(path = %self.book.full_name(), error = %err, "Failed to restore document state");
        }
    }
}

impl Broker {
    /// Runs `body` against `name` and leaves the document as it found it.
    ///
    /// - not open before: opened in the hidden (or current) session, closed
    ///   afterwards unless `keep_open`
    /// - open read-only and `writable` requested: reopened for writing, then
    ///   reopened read-only again; refused if it has unsaved changes
    /// - pending edits are saved when write access was requested
    /// - saved flag, visibility and calculation mode are restored
    /// - a handle the call reopened or kept open stays reachable through `fetch`
    pub fn with_unchanged_state<T>(
        &self,
        name: &str,
        options: &UnobtrusiveOptions,
        body: impl FnOnce(&Arc<Book>) -> Result<T>,
    ) -> Result<T> {
        let path = normalize(&absolutize(name));
        let prior = self
            .fetch_with(&path, &FetchOptions::default())
            .filter(|book| book.alive());

        let guard = match prior {
            Some(prior) => {
                let snapshot = Snapshot::capture(&prior)?;
                let reopened = options.writable && !prior.writable();
                let book = if reopened {
                    if !snapshot.saved {
                        return Err(BrokerError::UnsavedConflict {
                            name: prior.full_name(),
                            option: UnsavedPolicy::OPTION,
                        });
                    }
                    let writable = OpenOptions::new()
                        .force_session(SessionSelector::Session(prior.session()));
                    self.open(&path, &writable)?
                } else {
                    prior
                };
                Restore {
                    broker: self,
                    book,
                    snapshot,
                    options: *options,
                    was_open: true,
                    reopened,
                    done: false,
                }
            }
            None => {
                let session = match options.if_closed {
                    ClosedPlacement::Hidden => self.hidden_session()?,
                    ClosedPlacement::Current => self.pool().current()?,
                };
                let open = OpenOptions::new()
                    .read_only(!options.writable)
                    .force_session(SessionSelector::Session(session));
                let book = self.open(&path, &open)?;
                Restore {
                    broker: self,
                    snapshot: Snapshot::capture(&book)?,
                    book,
                    options: *options,
                    was_open: false,
                    reopened: false,
                    done: false,
                }
            }
        };

        let result = body(&guard.book);
        let restored = guard.run();
        match result {
            Ok(value) => restored.map(|()| value),
            Err(err) => {
                if let Err(restore_err) = restored {
                    warn!(path = %path, error = %restore_err, "Restore failed after body error");
                }
                Err(err)
            }
        }
    }
}
