//! The broker: the one entry point callers use to open, save and close documents.
//!
//! A `Broker` owns a [`SessionPool`] and a [`BookRegistry`] and runs the open
//! algorithm on top of them:
//!
//! 1. Resolve the name and check existence (`if_absent`)
//! 2. Try the registry for a handle that can be returned as-is
//! 3. Pick a session (force > last seen > default > current)
//! 4. Clear same-base-name obstructions and same-path conflicts in that session
//! 5. Open, apply cosmetic options save-state-neutrally, and register
//!
//! Brokers are independent: tests build one each, nothing is global.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::automation::{Automation, CloseMode, DocumentObject};
use crate::book::Book;
use crate::canonical::{absolutize, base_name, canonicalize, normalize, AliasResolver};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::options::{
    AbsentPolicy, CloseUnsavedPolicy, ExistsPolicy, ObstructedPolicy, OpenOptions, SaveAsOptions,
    SessionSelector, UnsavedPolicy,
};
use crate::pool::{CloseAllReport, SessionPool};
use crate::registry::{BookRegistry, FetchOptions};
use crate::session::Session;

/// Outcome of checking a session for documents that stand in the way.
enum Resolution {
    /// Nothing in the way: open the document.
    Proceed,
    /// Open with display alerts on and let the application ask.
    Prompt,
    /// The document is already open and usable.
    Reuse(Arc<Book>),
    /// Retry in a freshly launched session.
    Switch,
}

pub struct Broker {
    pool: SessionPool,
    registry: BookRegistry,
    aliases: AliasResolver,
    config: BrokerConfig,
    /// Private session for unobtrusive access, created on first use.
    hidden: Mutex<Option<Arc<Session>>>,
    /// Handles the broker opened on its own behalf and no caller holds.
    retained: Mutex<Vec<Arc<Book>>>,
}

impl Broker {
    pub fn new(automation: Arc<dyn Automation>, config: BrokerConfig) -> Self {
        let aliases = AliasResolver::new(&config.drive_mappings);
        Self {
            pool: SessionPool::new(automation, config.pool_config()),
            registry: BookRegistry::new(aliases.clone()),
            aliases,
            config,
            hidden: Mutex::new(None),
            retained: Mutex::new(Vec::new()),
        }
    }

    pub fn with_defaults(automation: Arc<dyn Automation>) -> Self {
        Self::new(automation, BrokerConfig::default())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn registry(&self) -> &BookRegistry {
        &self.registry
    }

    /// Opens `name` under `options`, reusing an already open handle when one
    /// satisfies the request.
    pub fn open(&self, name: &str, options: &OpenOptions) -> Result<Arc<Book>> {
        let path = normalize(&absolutize(name));
        let key = canonicalize(&path);

        let create = if self.pool.automation().document_exists(&path) {
            false
        } else {
            match options.if_absent {
                AbsentPolicy::Raise => return Err(BrokerError::ResourceNotFound { name: path }),
                AbsentPolicy::Create => true,
            }
        };

        if !create {
            if let Some(book) = self.try_cached(&path, &key, options)? {
                return Ok(book);
            }
        }

        let session = self.pool.resolve(&options.session_selector())?;
        self.open_in(session, &path, &key, options, create)
    }

    /// Registry lookup honoring `force_session`. `None` means "open normally".
    fn try_cached(
        &self,
        path: &str,
        key: &str,
        options: &OpenOptions,
    ) -> Result<Option<Arc<Book>>> {
        let forced = match &options.force_session {
            Some(SessionSelector::New) => return Ok(None),
            Some(SessionSelector::Session(session)) => Some(Arc::clone(session)),
            Some(SessionSelector::Current) | None => None,
        };

        let fetch = FetchOptions {
            prefer_session: forced.clone(),
            prefer_writable: true,
        };
        let Some(book) = self.registry.fetch(key, &fetch) else {
            return Ok(None);
        };
        let session = book.session();
        if forced.is_some_and(|wanted| wanted.id() != session.id()) {
            return Ok(None);
        }

        if !book.alive() {
            // Reopen where it was last seen; a dead session falls back to default selection
            if session.alive() {
                debug!(path, session = session.id(), "Reopening in last known session");
                return self.open_in(session, path, key, options, false).map(Some);
            }
            return Ok(None);
        }

        let reusable = if book.saved()? {
            book.writable() || options.read_only
        } else {
            options.if_unsaved == UnsavedPolicy::Accept
        };
        if reusable {
            self.finish(&book, options)?;
            return Ok(Some(book));
        }
        self.open_in(session, path, key, options, false).map(Some)
    }

    fn open_in(
        &self,
        session: Arc<Session>,
        path: &str,
        key: &str,
        options: &OpenOptions,
        create: bool,
    ) -> Result<Arc<Book>> {
        let mut session = session;
        let mut resolution = self.resolve_conflicts(&session, path, key, options)?;
        if matches!(resolution, Resolution::Switch) {
            session = self.pool.create(false)?;
            debug!(path, session = session.id(), "Switched to a new session");
            resolution = self.resolve_conflicts(&session, path, key, options)?;
        }

        let load = || {
            if create {
                session.create_document(path)
            } else {
                session.open_document(path, options.read_only)
            }
        };
        let object = match resolution {
            Resolution::Reuse(book) => {
                self.finish(&book, options)?;
                return Ok(book);
            }
            Resolution::Proceed | Resolution::Switch => load()?,
            Resolution::Prompt => session.with_display_alerts(true, load)?,
        };

        let book = self.adopt(&session, object, key)?;
        self.finish(&book, options)?;
        debug!(path, session = session.id(), writable = book.writable(), "Document opened");
        Ok(book)
    }

    /// Walks the session's documents sharing the requested base name and
    /// applies `if_obstructed` / `if_unsaved`.
    fn resolve_conflicts(
        &self,
        session: &Arc<Session>,
        path: &str,
        key: &str,
        options: &OpenOptions,
    ) -> Result<Resolution> {
        let base = base_name(path);
        for doc in session.documents()? {
            let Ok(full_name) = doc.full_name() else {
                continue;
            };
            if base_name(&full_name) != base {
                continue;
            }

            if !self.aliases.equivalent(&full_name, key) {
                if self.clear_obstruction(doc.as_ref(), &full_name, path, options.if_obstructed)? {
                    return Ok(Resolution::Switch);
                }
                continue;
            }

            let saved = doc
                .saved()
                .map_err(|e| BrokerError::automation(&full_name, "saved", e))?;
            if !saved {
                match options.if_unsaved {
                    UnsavedPolicy::Raise => {
                        return Err(BrokerError::UnsavedConflict {
                            name: full_name,
                            option: UnsavedPolicy::OPTION,
                        })
                    }
                    UnsavedPolicy::Accept => {
                        return self.adopt(session, doc, key).map(Resolution::Reuse)
                    }
                    UnsavedPolicy::Forget => {
                        debug!(path = %full_name, "Discarding unsaved changes before reopen");
                        close_document(doc.as_ref(), &full_name, CloseMode::Discard)?;
                        continue;
                    }
                    UnsavedPolicy::Alert => return Ok(Resolution::Prompt),
                    UnsavedPolicy::NewSession => return Ok(Resolution::Switch),
                }
            }

            let read_only = doc
                .read_only()
                .map_err(|e| BrokerError::automation(&full_name, "read only", e))?;
            if read_only && !options.read_only {
                debug!(path = %full_name, "Reopening read-only document for writing");
                close_document(doc.as_ref(), &full_name, CloseMode::Discard)?;
                continue;
            }
            return self.adopt(session, doc, key).map(Resolution::Reuse);
        }
        Ok(Resolution::Proceed)
    }

    /// Applies `policy` to a document blocking `path`. Returns true when the
    /// caller should retry in a new session.
    fn clear_obstruction(
        &self,
        doc: &dyn DocumentObject,
        obstructing: &str,
        path: &str,
        policy: ObstructedPolicy,
    ) -> Result<bool> {
        let raise = || BrokerError::Obstructed {
            name: path.to_string(),
            obstructing: obstructing.to_string(),
            option: ObstructedPolicy::OPTION,
        };
        match policy {
            ObstructedPolicy::Raise => return Err(raise()),
            ObstructedPolicy::NewSession => return Ok(true),
            ObstructedPolicy::Forget => close_document(doc, obstructing, CloseMode::Discard)?,
            ObstructedPolicy::Save => {
                let saved = doc
                    .saved()
                    .map_err(|e| BrokerError::automation(obstructing, "saved", e))?;
                let mode = if saved {
                    CloseMode::Discard
                } else {
                    let read_only = doc
                        .read_only()
                        .map_err(|e| BrokerError::automation(obstructing, "read only", e))?;
                    if read_only {
                        return Err(BrokerError::ReadOnlyViolation {
                            name: obstructing.to_string(),
                        });
                    }
                    CloseMode::Save
                };
                close_document(doc, obstructing, mode)?;
            }
            ObstructedPolicy::CloseIfSaved => {
                let saved = doc
                    .saved()
                    .map_err(|e| BrokerError::automation(obstructing, "saved", e))?;
                if !saved {
                    return Err(raise());
                }
                close_document(doc, obstructing, CloseMode::Discard)?;
            }
        }
        debug!(path, obstructing, %policy, "Closed obstructing document");
        Ok(false)
    }

    /// Returns the registered handle for this document in `session`, or wraps `object`.
    fn adopt(
        &self,
        session: &Arc<Session>,
        object: Box<dyn DocumentObject>,
        key: &str,
    ) -> Result<Arc<Book>> {
        if let Some(book) = self.registry.books_in(key, session).into_iter().next() {
            return Ok(book);
        }
        Book::new(object, Arc::clone(session))
    }

    fn finish(&self, book: &Arc<Book>, options: &OpenOptions) -> Result<()> {
        if let Some(visible) = options.visible {
            book.retain_saved(|b| b.set_visible(visible))?;
        }
        if let Some(mode) = options.calculation {
            book.session().set_calculation(mode)?;
        }
        self.registry.store(book);
        Ok(())
    }

    /// Best registered handle for `name`, without opening anything.
    pub fn fetch(&self, name: &str) -> Option<Arc<Book>> {
        self.registry.fetch(name, &FetchOptions::default())
    }

    pub fn fetch_with(&self, name: &str, options: &FetchOptions) -> Option<Arc<Book>> {
        self.registry.fetch(name, options)
    }

    pub fn close(&self, book: &Book, if_unsaved: CloseUnsavedPolicy) -> Result<()> {
        book.close(if_unsaved)
    }

    pub fn save(&self, book: &Book) -> Result<()> {
        book.save()
    }

    /// Saves `book` under `name` and moves it to that key in the registry.
    pub fn save_as(&self, book: &Arc<Book>, name: &str, options: SaveAsOptions) -> Result<()> {
        if options.if_obstructed == ObstructedPolicy::NewSession {
            return Err(BrokerError::invalid_option(
                ObstructedPolicy::OPTION,
                &ObstructedPolicy::NewSession.to_string(),
            ));
        }
        if !book.alive() {
            return Err(BrokerError::DeadHandle {
                name: book.full_name(),
            });
        }

        let path = normalize(&absolutize(name));
        let key = canonicalize(&path);
        let old_name = book.full_name();
        let own_key = book.canonical_name();
        let session = book.session();

        let base = base_name(&path);
        for doc in session.documents()? {
            let Ok(full_name) = doc.full_name() else {
                continue;
            };
            if canonicalize(&full_name) == own_key || base_name(&full_name) != base {
                continue;
            }
            self.clear_obstruction(doc.as_ref(), &full_name, &path, options.if_obstructed)?;
        }

        let automation = self.pool.automation();
        let prompt = if key != own_key && automation.document_exists(&path) {
            match options.if_exists {
                ExistsPolicy::Raise => return Err(BrokerError::AlreadyExists { name: path }),
                ExistsPolicy::Overwrite => {
                    automation
                        .remove_document(&path)
                        .map_err(|e| BrokerError::automation(&path, "remove", e))?;
                    false
                }
                ExistsPolicy::Alert => true,
            }
        } else {
            false
        };

        if prompt {
            session.with_display_alerts(true, || book.save_as_path(&path))?;
        } else {
            book.save_as_path(&path)?;
        }
        self.registry.rekey(book, &old_name);
        info!(from = %old_name, to = %path, "Document saved under new name");
        Ok(())
    }

    /// A live handle for the same document: `book` itself when still open,
    /// otherwise a new handle, preferably in the session it was last seen in.
    pub fn reopen(&self, book: &Arc<Book>) -> Result<Arc<Book>> {
        if book.alive() {
            return Ok(Arc::clone(book));
        }
        let path = book.full_name();
        let key = canonicalize(&path);
        let options = OpenOptions::new().read_only(!book.writable());

        let last = book.session();
        let session = if last.alive() {
            last
        } else {
            self.pool.resolve(&options.session_selector())?
        };
        self.open_in(session, &path, &key, &options, false)
    }

    /// Open handles outside the hidden session.
    pub fn books(&self) -> Vec<Arc<Book>> {
        self.registry
            .books()
            .into_iter()
            .filter(|book| !book.session().is_hidden())
            .collect()
    }

    pub fn unsaved_books(&self) -> Vec<Arc<Book>> {
        self.books()
            .into_iter()
            .filter(|book| matches!(book.saved(), Ok(false)))
            .collect()
    }

    /// The broker's private session, relaunched when the previous one died.
    pub fn hidden_session(&self) -> Result<Arc<Session>> {
        let mut slot = self
            .hidden
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(session) = slot.as_ref().filter(|session| session.alive()) {
            return Ok(Arc::clone(session));
        }
        let session = self.pool.create(true)?;
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Keeps `book` reachable through `fetch` until its document closes.
    pub(crate) fn retain(&self, book: Arc<Book>) {
        let mut retained = self
            .retained
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        retained.retain(|held| held.alive() && !Arc::ptr_eq(held, &book));
        retained.push(book);
    }

    /// Closes every session, including ones this broker did not launch.
    pub fn close_all(&self, if_unsaved: CloseUnsavedPolicy) -> Result<CloseAllReport> {
        self.pool.close_all(if_unsaved)
    }
}

fn close_document(doc: &dyn DocumentObject, name: &str, mode: CloseMode) -> Result<()> {
    doc.close(mode)
        .map_err(|e| BrokerError::automation(name, "close", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimAutomation;

    fn broker(sim: &SimAutomation) -> Broker {
        Broker::with_defaults(Arc::new(sim.clone()))
    }

    #[test]
    fn open_missing_raises_by_default() {
        let sim = SimAutomation::new();
        let broker = broker(&sim);
        let err = broker.open("c:/missing.xlsx", &OpenOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ResourceNotFound { ref name } if name == "c:/missing.xlsx"
        ));
        assert_eq!(sim.instance_count(), 0);
    }

    #[test]
    fn open_create_makes_an_empty_document() {
        let sim = SimAutomation::new();
        let broker = broker(&sim);
        let book = broker
            .open("c:/new.xlsx", &OpenOptions::new().if_absent(AbsentPolicy::Create))
            .unwrap();
        assert!(book.alive());
        assert!(book.writable());
        assert!(sim.document_exists("c:/new.xlsx"));
    }

    #[test]
    fn read_only_cached_handle_is_reopened_for_writing() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let broker = broker(&sim);

        let reader = broker.open("c:/a.xlsx", &OpenOptions::new().read_only(true)).unwrap();
        let writer = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();
        assert!(!reader.alive());
        assert!(writer.writable());
        assert_eq!(reader.session().id(), writer.session().id());
    }

    #[test]
    fn writable_handle_satisfies_read_only_request() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let broker = broker(&sim);

        let writer = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();
        let again = broker.open("c:/a.xlsx", &OpenOptions::new().read_only(true)).unwrap();
        assert!(Arc::ptr_eq(&writer, &again));
    }

    #[test]
    fn forget_discards_unsaved_changes() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[("A1", "disk")]);
        let broker = broker(&sim);
        let book = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();
        book.set_value("A1", "memory").unwrap();

        let fresh = broker
            .open("c:/a.xlsx", &OpenOptions::new().if_unsaved(UnsavedPolicy::Forget))
            .unwrap();
        assert!(!book.alive());
        assert_eq!(fresh.value("A1").unwrap().as_deref(), Some("disk"));
        assert!(fresh.saved().unwrap());
    }

    #[test]
    fn unsaved_new_session_opens_a_second_copy() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let broker = broker(&sim);
        let book = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();
        book.set_value("A1", "1").unwrap();

        let other = broker
            .open("c:/a.xlsx", &OpenOptions::new().if_unsaved(UnsavedPolicy::NewSession))
            .unwrap();
        assert!(book.alive());
        assert_ne!(book.session().id(), other.session().id());
        assert_eq!(sim.open_count("c:/a.xlsx"), 2);
    }

    #[test]
    fn obstruction_close_if_saved_refuses_dirty_blocker() {
        let sim = SimAutomation::new();
        sim.write_file("c:/one/book.xlsx", &[]);
        sim.write_file("c:/two/book.xlsx", &[]);
        let broker = broker(&sim);
        let blocker = broker.open("c:/one/book.xlsx", &OpenOptions::default()).unwrap();
        blocker.set_value("A1", "1").unwrap();

        let options = OpenOptions::new().if_obstructed(ObstructedPolicy::CloseIfSaved);
        assert!(matches!(
            broker.open("c:/two/book.xlsx", &options),
            Err(BrokerError::Obstructed { .. })
        ));

        blocker.save().unwrap();
        let book = broker.open("c:/two/book.xlsx", &options).unwrap();
        assert!(book.alive());
        assert!(!blocker.alive());
    }

    #[test]
    fn obstruction_save_persists_blocker() {
        let sim = SimAutomation::new();
        sim.write_file("c:/one/book.xlsx", &[]);
        sim.write_file("c:/two/book.xlsx", &[]);
        let broker = broker(&sim);
        let blocker = broker.open("c:/one/book.xlsx", &OpenOptions::default()).unwrap();
        blocker.set_value("A1", "kept").unwrap();

        broker
            .open(
                "c:/two/book.xlsx",
                &OpenOptions::new().if_obstructed(ObstructedPolicy::Save),
            )
            .unwrap();
        assert_eq!(sim.file_value("c:/one/book.xlsx", "A1").as_deref(), Some("kept"));
    }

    #[test]
    fn obstruction_save_discards_saved_read_only_blocker() {
        let sim = SimAutomation::new();
        sim.write_file("c:/one/book.xlsx", &[("A1", "disk")]);
        sim.write_file("c:/two/book.xlsx", &[]);
        let broker = broker(&sim);
        let blocker = broker
            .open("c:/one/book.xlsx", &OpenOptions::new().read_only(true))
            .unwrap();

        let book = broker
            .open(
                "c:/two/book.xlsx",
                &OpenOptions::new().if_obstructed(ObstructedPolicy::Save),
            )
            .unwrap();
        assert!(book.alive());
        assert!(!blocker.alive());
        assert_eq!(sim.file_value("c:/one/book.xlsx", "A1").as_deref(), Some("disk"));
    }

    #[test]
    fn obstruction_save_refuses_unsaved_read_only_blocker() {
        let sim = SimAutomation::new();
        sim.write_file("c:/one/book.xlsx", &[]);
        sim.write_file("c:/two/book.xlsx", &[]);
        let broker = broker(&sim);
        let blocker = broker
            .open("c:/one/book.xlsx", &OpenOptions::new().read_only(true))
            .unwrap();
        blocker.set_value("A1", "1").unwrap();

        let err = broker
            .open(
                "c:/two/book.xlsx",
                &OpenOptions::new().if_obstructed(ObstructedPolicy::Save),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ReadOnlyViolation { ref name } if name == "c:/one/book.xlsx"
        ));
        assert!(blocker.alive());
    }

    #[test]
    fn save_as_save_policy_discards_saved_read_only_blocker() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        sim.write_file("c:/other/b.xlsx", &[]);
        let broker = broker(&sim);
        let book = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();
        let blocker = broker
            .open("c:/other/b.xlsx", &OpenOptions::new().read_only(true))
            .unwrap();

        let options = SaveAsOptions {
            if_obstructed: ObstructedPolicy::Save,
            ..SaveAsOptions::default()
        };
        broker.save_as(&book, "c:/b.xlsx", options).unwrap();
        assert!(!blocker.alive());
        assert_eq!(book.full_name(), "c:/b.xlsx");
    }

    #[test]
    fn obstruction_new_session_keeps_blocker_open() {
        let sim = SimAutomation::new();
        sim.write_file("c:/one/book.xlsx", &[]);
        sim.write_file("c:/two/book.xlsx", &[]);
        let broker = broker(&sim);
        let blocker = broker.open("c:/one/book.xlsx", &OpenOptions::default()).unwrap();

        let book = broker
            .open(
                "c:/two/book.xlsx",
                &OpenOptions::new().if_obstructed(ObstructedPolicy::NewSession),
            )
            .unwrap();
        assert!(blocker.alive());
        assert_ne!(book.session().id(), blocker.session().id());
    }

    #[test]
    fn force_new_session_bypasses_cache() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let broker = broker(&sim);
        let first = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();
        let second = broker
            .open("c:/a.xlsx", &OpenOptions::new().force_session(SessionSelector::New))
            .unwrap();
        assert_ne!(first.session().id(), second.session().id());
    }

    #[test]
    fn forced_dead_session_is_an_error() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let broker = broker(&sim);
        let session = broker.pool().create(false).unwrap();
        sim.crash(session.id());

        let options = OpenOptions::new().force_session(SessionSelector::Session(session));
        assert!(matches!(
            broker.open("c:/a.xlsx", &options),
            Err(BrokerError::DeadSession { .. })
        ));
    }

    #[test]
    fn closed_handle_reopens_in_last_session() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let outside = sim.launch().unwrap();
        let broker = broker(&sim);
        let first = broker
            .open("c:/a.xlsx", &OpenOptions::new().default_session(SessionSelector::New))
            .unwrap();
        assert_ne!(first.session().id(), outside.instance_id().unwrap());
        first.close(CloseUnsavedPolicy::Raise).unwrap();

        let again = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &again));
        assert_eq!(again.session().id(), first.session().id());
    }

    #[test]
    fn visible_option_keeps_saved_flag() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let broker = broker(&sim);
        let book = broker
            .open("c:/a.xlsx", &OpenOptions::new().visible(false))
            .unwrap();
        assert!(!book.visible().unwrap());
        assert!(book.saved().unwrap());
    }

    #[test]
    fn save_as_rejects_new_session_policy() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let broker = broker(&sim);
        let book = broker.open("c:/a.xlsx", &OpenOptions::default()).unwrap();

        let options = SaveAsOptions {
            if_obstructed: ObstructedPolicy::NewSession,
            ..SaveAsOptions::default()
        };
        assert!(matches!(
            broker.save_as(&book, "c:/b.xlsx", options),
            Err(BrokerError::InvalidPolicyOption { .. })
        ));
    }

    #[test]
    fn hidden_session_is_reused_until_it_dies() {
        let sim = SimAutomation::new();
        let broker = broker(&sim);
        let first = broker.hidden_session().unwrap();
        assert!(first.is_hidden());
        assert!(Arc::ptr_eq(&first, &broker.hidden_session().unwrap()));

        sim.crash(first.id());
        let second = broker.hidden_session().unwrap();
        assert_ne!(first.id(), second.id());
    }
}
