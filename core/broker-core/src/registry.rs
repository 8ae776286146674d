//! Weak-reference cache of document handles keyed by canonical name.
//!
//! The registry never owns a [`Book`]. Each key maps to the handles stored
//! under it, oldest first; entries whose handle was dropped are pruned lazily
//! on the next `fetch` or `store` touching that key.
//!
//! Avoids holding the lock while probing documents:
//! 1. Lock briefly to prune and upgrade the key's entries
//! 2. Release, then probe liveness (external round trips)
//! 3. Pick by preference

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tracing::debug;

use crate::book::Book;
use crate::canonical::{canonicalize, AliasResolver};
use crate::session::Session;

/// Preferences for [`BookRegistry::fetch`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Return a handle owned by this session before anything else.
    pub prefer_session: Option<Arc<Session>>,
    /// Return the first writable open handle rather than the latest open one.
    pub prefer_writable: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            prefer_session: None,
            prefer_writable: true,
        }
    }
}

pub struct BookRegistry {
    entries: RwLock<HashMap<String, Vec<Weak<Book>>>>,
    aliases: AliasResolver,
}

impl Default for BookRegistry {
    fn default() -> Self {
        Self::new(AliasResolver::default())
    }
}

impl BookRegistry {
    pub fn new(aliases: AliasResolver) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            aliases,
        }
    }

    /// Records `book` under its current canonical name.
    ///
    /// A handle stored earlier under another name (it was saved elsewhere
    /// since) is moved. Storing the same handle twice keeps its position.
    pub fn store(&self, book: &Arc<Book>) {
        let key = book.canonical_name();
        let previous = book.stored_key();
        {
            // Recover from poisoning - entries are weak pointers, nothing to corrupt
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if let Some(old) = previous.as_deref().filter(|old| *old != key) {
                debug!(from = %old, to = %key, "Re-keying document handle");
                remove_from(&mut entries, old, book);
            }

            let list = entries.entry(key.clone()).or_default();
            list.retain(|weak| weak.strong_count() > 0);
            if !list.iter().any(|weak| same_book(weak, book)) {
                list.push(Arc::downgrade(book));
            }
        }
        book.set_stored_key(key);
    }

    /// Moves `book` from `old_name` to its current canonical name.
    pub fn rekey(&self, book: &Arc<Book>, old_name: &str) {
        let old = canonicalize(old_name);
        {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            remove_from(&mut entries, &old, book);
        }
        self.store(book);
    }

    /// Picks the best handle for `name`.
    ///
    /// Precedence: a handle in `prefer_session`; the first writable open
    /// handle (when preferred); the most recently stored open handle; the
    /// most recently stored closed handle. Handles in the hidden session are
    /// never returned. When the key has no entries at all, drive/share
    /// aliases of the name are tried once.
    pub fn fetch(&self, name: &str, options: &FetchOptions) -> Option<Arc<Book>> {
        let key = canonicalize(name);
        let mut candidates = self.candidates(&key);
        if candidates.is_empty() {
            candidates = self
                .aliases
                .aliases(&key)
                .iter()
                .map(|alias| self.candidates(alias))
                .find(|found| !found.is_empty())
                .unwrap_or_default();
        }
        select(candidates, options)
    }

    /// Every stored handle that is still open, hidden session included.
    pub fn books(&self) -> Vec<Arc<Book>> {
        let all: Vec<Arc<Book>> = {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries
                .values()
                .flat_map(|list| list.iter().filter_map(Weak::upgrade))
                .collect()
        };
        all.into_iter().filter(|book| book.alive()).collect()
    }

    /// Open handles for `name` owned by `session`.
    pub(crate) fn books_in(&self, name: &str, session: &Session) -> Vec<Arc<Book>> {
        self.candidates(&canonicalize(name))
            .into_iter()
            .filter(|book| book.session().id() == session.id() && book.alive())
            .collect()
    }

    /// Number of keys with at least one reachable handle.
    pub fn len(&self) -> usize {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .values()
            .filter(|list| list.iter().any(|weak| weak.strong_count() > 0))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn candidates(&self, key: &str) -> Vec<Arc<Book>> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(list) = entries.get_mut(key) else {
            return Vec::new();
        };
        list.retain(|weak| weak.strong_count() > 0);
        let found: Vec<Arc<Book>> = list.iter().filter_map(Weak::upgrade).collect();
        if list.is_empty() {
            entries.remove(key);
        }
        found
    }
}

fn select(candidates: Vec<Arc<Book>>, options: &FetchOptions) -> Option<Arc<Book>> {
    let visible: Vec<Arc<Book>> = candidates
        .into_iter()
        .filter(|book| !book.session().is_hidden())
        .collect();

    if let Some(prefer) = &options.prefer_session {
        if let Some(book) = visible
            .iter()
            .find(|book| book.session().id() == prefer.id())
        {
            return Some(Arc::clone(book));
        }
    }

    let mut open = None;
    let mut closed = None;
    for book in visible {
        if book.alive() {
            if options.prefer_writable && book.writable() {
                return Some(book);
            }
            open = Some(book);
        } else {
            closed = Some(book);
        }
    }
    open.or(closed)
}

fn same_book(weak: &Weak<Book>, book: &Arc<Book>) -> bool {
    std::ptr::eq(weak.as_ptr(), Arc::as_ptr(book))
}

fn remove_from(entries: &mut HashMap<String, Vec<Weak<Book>>>, key: &str, book: &Arc<Book>) {
    if let Some(list) = entries.get_mut(key) {
        list.retain(|weak| weak.strong_count() > 0 && !same_book(weak, book));
        if list.is_empty() {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::Automation;
    use crate::canonical::DriveMapping;
    use crate::options::CloseUnsavedPolicy;
    use crate::sim::SimAutomation;

    fn session(sim: &SimAutomation, hidden: bool) -> Arc<Session> {
        let app = sim.launch().unwrap();
        let id = app.instance_id().unwrap();
        Arc::new(Session::new(app, id, hidden))
    }

    fn open_in(session: &Arc<Session>, path: &str, read_only: bool) -> Arc<Book> {
        let object = session.open_document(path, read_only).unwrap();
        Book::new(object, Arc::clone(session)).unwrap()
    }

    #[test]
    fn store_then_fetch_round_trips() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();
        let book = open_in(&session(&sim, false), "c:/a.xlsx", false);

        registry.store(&book);
        let found = registry.fetch("C:\\A.XLSX", &FetchOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&found, &book));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = BookRegistry::default();
        assert!(registry.fetch("c:/nothing.xlsx", &FetchOptions::default()).is_none());
    }

    #[test]
    fn prefers_writable_over_read_only() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();

        let writable = open_in(&session(&sim, false), "c:/a.xlsx", false);
        writable.set_value("A1", "dirty").unwrap();
        let read_only = open_in(&session(&sim, false), "c:/a.xlsx", true);
        registry.store(&writable);
        registry.store(&read_only);

        let preferred = registry.fetch("c:/a.xlsx", &FetchOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&preferred, &writable));

        let latest = registry
            .fetch(
                "c:/a.xlsx",
                &FetchOptions {
                    prefer_writable: false,
                    ..FetchOptions::default()
                },
            )
            .unwrap();
        assert!(Arc::ptr_eq(&latest, &read_only));
    }

    #[test]
    fn prefers_requested_session() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();

        let first = open_in(&session(&sim, false), "c:/a.xlsx", false);
        let second_session = session(&sim, false);
        let second = open_in(&second_session, "c:/a.xlsx", true);
        registry.store(&first);
        registry.store(&second);

        let found = registry
            .fetch(
                "c:/a.xlsx",
                &FetchOptions {
                    prefer_session: Some(second_session),
                    prefer_writable: true,
                },
            )
            .unwrap();
        assert!(Arc::ptr_eq(&found, &second));
    }

    #[test]
    fn open_beats_closed_and_closed_is_last_resort() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();

        let open = open_in(&session(&sim, false), "c:/a.xlsx", true);
        let closed = open_in(&session(&sim, false), "c:/a.xlsx", false);
        registry.store(&open);
        registry.store(&closed);
        closed.close(CloseUnsavedPolicy::Raise).unwrap();

        let found = registry.fetch("c:/a.xlsx", &FetchOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&found, &open));

        open.close(CloseUnsavedPolicy::Raise).unwrap();
        let found = registry.fetch("c:/a.xlsx", &FetchOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&found, &closed));
        assert!(!found.alive());
    }

    #[test]
    fn hidden_session_is_excluded() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();
        let hidden = session(&sim, true);
        let book = open_in(&hidden, "c:/a.xlsx", false);
        registry.store(&book);

        assert!(registry.fetch("c:/a.xlsx", &FetchOptions::default()).is_none());
        let preferring_hidden = FetchOptions {
            prefer_session: Some(hidden),
            prefer_writable: true,
        };
        assert!(registry.fetch("c:/a.xlsx", &preferring_hidden).is_none());
        assert_eq!(registry.books().len(), 1);
    }

    #[test]
    fn dropped_handles_are_pruned() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();
        let book = open_in(&session(&sim, false), "c:/a.xlsx", false);
        registry.store(&book);
        assert_eq!(registry.len(), 1);

        drop(book);
        assert!(registry.fetch("c:/a.xlsx", &FetchOptions::default()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn storing_twice_is_idempotent() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();
        let book = open_in(&session(&sim, false), "c:/a.xlsx", false);

        registry.store(&book);
        registry.store(&book);
        assert_eq!(registry.candidates("c:/a.xlsx").len(), 1);
    }

    #[test]
    fn rename_moves_handle_to_new_key() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();
        let book = open_in(&session(&sim, false), "c:/a.xlsx", false);
        registry.store(&book);

        book.save_as_path("c:/renamed.xlsx").unwrap();
        registry.store(&book);

        assert!(registry.fetch("c:/a.xlsx", &FetchOptions::default()).is_none());
        let found = registry.fetch("c:/renamed.xlsx", &FetchOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&found, &book));
    }

    #[test]
    fn rekey_moves_from_explicit_old_name() {
        let sim = SimAutomation::new();
        sim.write_file("c:/a.xlsx", &[]);
        let registry = BookRegistry::default();
        let book = open_in(&session(&sim, false), "c:/a.xlsx", false);
        registry.store(&book);

        book.save_as_path("c:/b.xlsx").unwrap();
        registry.rekey(&book, "c:/a.xlsx");

        assert!(registry.fetch("c:/a.xlsx", &FetchOptions::default()).is_none());
        assert!(registry.fetch("c:/b.xlsx", &FetchOptions::default()).is_some());
    }

    #[test]
    fn falls_back_to_share_alias() {
        let sim = SimAutomation::new();
        sim.write_file("//server/share/a.xlsx", &[]);
        let registry = BookRegistry::new(AliasResolver::new(&[DriveMapping {
            drive: "z:".to_string(),
            unc: "//server/share".to_string(),
        }]));
        let book = open_in(&session(&sim, false), "//server/share/a.xlsx", false);
        registry.store(&book);

        let found = registry.fetch("Z:\\a.xlsx", &FetchOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&found, &book));
    }
}
