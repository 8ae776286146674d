//! In-memory automation backend.
//!
//! Models just enough of a spreadsheet application for the broker to be
//! exercised end to end without one installed:
//!
//! - a case-insensitive virtual file store keyed by canonical name
//! - several application instances with stable numeric ids
//! - the application's rule that one instance cannot hold two open documents
//!   with the same base name
//! - prompts (only while display alerts are on) answered by [`PromptResponse`]
//! - the quirk that changing window visibility marks a document unsaved
//!
//! Instances can be killed out of band with [`SimAutomation::crash`] to test
//! liveness handling.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::automation::{
    AppObject, Automation, AutomationError, Calculation, CloseMode, DocumentObject, InstanceId,
};
use crate::canonical::{base_name, canonicalize, normalize};

type Cells = BTreeMap<String, String>;

/// Answer given to every prompt the simulated application shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// Revert / overwrite / save, depending on the prompt.
    Yes,
    /// Keep what is open / close without saving.
    No,
    /// Decline the operation.
    Cancel,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not wedge the whole backend
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    files: Mutex<HashMap<String, Cells>>,
    instances: Mutex<Vec<Arc<Instance>>>,
    next_id: AtomicU64,
    prompt: Mutex<PromptResponse>,
}

impl Shared {
    fn prompt(&self) -> PromptResponse {
        *lock(&self.prompt)
    }
}

struct Instance {
    id: InstanceId,
    state: Mutex<InstanceState>,
}

struct InstanceState {
    alive: bool,
    visible: bool,
    display_alerts: bool,
    calculation: Calculation,
    documents: Vec<Arc<Doc>>,
}

impl Instance {
    fn is_alive(&self) -> bool {
        lock(&self.state).alive
    }

    fn alerts_enabled(&self) -> bool {
        lock(&self.state).display_alerts
    }

    fn shut_down(&self) {
        let mut state = lock(&self.state);
        state.alive = false;
        for doc in state.documents.drain(..) {
            lock(&doc.state).open = false;
        }
    }
}

struct Doc {
    state: Mutex<DocState>,
}

struct DocState {
    full_name: String,
    key: String,
    open: bool,
    read_only: bool,
    saved: bool,
    visible: bool,
    cells: Cells,
}

/// Simulated automation layer. Cheap to clone; clones share one world.
#[derive(Clone)]
pub struct SimAutomation {
    shared: Arc<Shared>,
}

impl Default for SimAutomation {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAutomation {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                files: Mutex::new(HashMap::new()),
                instances: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                prompt: Mutex::new(PromptResponse::Yes),
            }),
        }
    }

    /// Store a document with the given cell values, replacing any previous one.
    pub fn write_file(&self, path: &str, cells: &[(&str, &str)]) {
        let cells = cells
            .iter()
            .map(|(cell, value)| (cell.to_string(), value.to_string()))
            .collect();
        lock(&self.shared.files).insert(canonicalize(path), cells);
    }

    /// Value of `cell` in the stored (saved) copy of the document.
    pub fn file_value(&self, path: &str, cell: &str) -> Option<String> {
        lock(&self.shared.files)
            .get(&canonicalize(path))
            .and_then(|cells| cells.get(cell).cloned())
    }

    /// Kill an instance out of band. Returns false for unknown ids.
    pub fn crash(&self, id: InstanceId) -> bool {
        let instance = lock(&self.shared.instances)
            .iter()
            .find(|instance| instance.id == id)
            .cloned();
        match instance {
            Some(instance) => {
                instance.shut_down();
                true
            }
            None => false,
        }
    }

    /// Number of instances still running.
    pub fn instance_count(&self) -> usize {
        lock(&self.shared.instances)
            .iter()
            .filter(|instance| instance.is_alive())
            .count()
    }

    /// How many running instances currently hold `path` open.
    pub fn open_count(&self, path: &str) -> usize {
        let key = canonicalize(path);
        let instances = lock(&self.shared.instances).clone();
        instances
            .iter()
            .filter(|instance| {
                lock(&instance.state)
                    .documents
                    .iter()
                    .any(|doc| lock(&doc.state).key == key)
            })
            .count()
    }

    pub fn set_prompt_response(&self, response: PromptResponse) {
        *lock(&self.shared.prompt) = response;
    }

    fn app(&self, instance: Arc<Instance>) -> Box<dyn AppObject> {
        Box::new(SimApp {
            shared: Arc::clone(&self.shared),
            instance,
        })
    }
}

impl Automation for SimAutomation {
    fn launch(&self) -> Result<Box<dyn AppObject>, AutomationError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = Arc::new(Instance {
            id,
            state: Mutex::new(InstanceState {
                alive: true,
                visible: false,
                display_alerts: true,
                calculation: Calculation::Automatic,
                documents: Vec::new(),
            }),
        });
        lock(&self.shared.instances).push(Arc::clone(&instance));
        Ok(self.app(instance))
    }

    fn running(&self) -> Vec<Box<dyn AppObject>> {
        let instances = lock(&self.shared.instances).clone();
        instances
            .into_iter()
            .filter(|instance| instance.is_alive())
            .map(|instance| self.app(instance))
            .collect()
    }

    fn document_exists(&self, path: &str) -> bool {
        lock(&self.shared.files).contains_key(&canonicalize(path))
    }

    fn remove_document(&self, path: &str) -> Result<(), AutomationError> {
        lock(&self.shared.files)
            .remove(&canonicalize(path))
            .map(|_| ())
            .ok_or_else(|| AutomationError::NotFound(path.to_string()))
    }
}

struct SimApp {
    shared: Arc<Shared>,
    instance: Arc<Instance>,
}

impl SimApp {
    fn state(&self) -> Result<MutexGuard<'_, InstanceState>, AutomationError> {
        let state = lock(&self.instance.state);
        if state.alive {
            Ok(state)
        } else {
            Err(AutomationError::Disconnected)
        }
    }

    fn document(&self, doc: Arc<Doc>) -> Box<dyn DocumentObject> {
        Box::new(SimDocument {
            shared: Arc::clone(&self.shared),
            instance: Arc::clone(&self.instance),
            doc,
        })
    }
}

impl AppObject for SimApp {
    fn instance_id(&self) -> Result<InstanceId, AutomationError> {
        self.state().map(|_| self.instance.id)
    }

    fn ping(&self) -> Result<(), AutomationError> {
        self.state().map(|_| ())
    }

    fn documents(&self) -> Result<Vec<Box<dyn DocumentObject>>, AutomationError> {
        let docs = self.state()?.documents.clone();
        Ok(docs.into_iter().map(|doc| self.document(doc)).collect())
    }

    fn open_document(
        &self,
        path: &str,
        read_only: bool,
    ) -> Result<Box<dyn DocumentObject>, AutomationError> {
        let key = canonicalize(path);
        let base = base_name(path);
        let cells = lock(&self.shared.files)
            .get(&key)
            .cloned()
            .ok_or_else(|| AutomationError::NotFound(path.to_string()))?;

        let mut state = self.state()?;
        for doc in &state.documents {
            let mut open = lock(&doc.state);
            if open.key == key {
                if !open.saved && state.display_alerts {
                    match self.shared.prompt() {
                        PromptResponse::Yes => {
                            open.cells = cells;
                            open.saved = true;
                        }
                        PromptResponse::No => {}
                        PromptResponse::Cancel => return Err(AutomationError::Canceled),
                    }
                }
                drop(open);
                return Ok(self.document(Arc::clone(doc)));
            }
            if base_name(&open.full_name) == base {
                return Err(AutomationError::NameConflict(base));
            }
        }

        let doc = Arc::new(Doc {
            state: Mutex::new(DocState {
                full_name: normalize(path),
                key,
                open: true,
                read_only,
                saved: true,
                visible: true,
                cells,
            }),
        });
        state.documents.push(Arc::clone(&doc));
        drop(state);
        Ok(self.document(doc))
    }

    fn create_document(&self, path: &str) -> Result<Box<dyn DocumentObject>, AutomationError> {
        let key = canonicalize(path);
        let base = base_name(path);

        let mut state = self.state()?;
        if state
            .documents
            .iter()
            .any(|doc| base_name(&lock(&doc.state).full_name) == base)
        {
            return Err(AutomationError::NameConflict(base));
        }
        lock(&self.shared.files).insert(key.clone(), Cells::new());

        let doc = Arc::new(Doc {
            state: Mutex::new(DocState {
                full_name: normalize(path),
                key,
                open: true,
                read_only: false,
                saved: true,
                visible: true,
                cells: Cells::new(),
            }),
        });
        state.documents.push(Arc::clone(&doc));
        drop(state);
        Ok(self.document(doc))
    }

    fn visible(&self) -> Result<bool, AutomationError> {
        Ok(self.state()?.visible)
    }

    fn set_visible(&self, visible: bool) -> Result<(), AutomationError> {
        self.state()?.visible = visible;
        Ok(())
    }

    fn display_alerts(&self) -> Result<bool, AutomationError> {
        Ok(self.state()?.display_alerts)
    }

    fn set_display_alerts(&self, enabled: bool) -> Result<(), AutomationError> {
        self.state()?.display_alerts = enabled;
        Ok(())
    }

    fn calculation(&self) -> Result<Calculation, AutomationError> {
        Ok(self.state()?.calculation)
    }

    fn set_calculation(&self, mode: Calculation) -> Result<(), AutomationError> {
        self.state()?.calculation = mode;
        Ok(())
    }

    fn quit(&self) -> Result<(), AutomationError> {
        self.ping()?;
        self.instance.shut_down();
        Ok(())
    }

    fn terminate(&self) -> Result<(), AutomationError> {
        self.instance.shut_down();
        Ok(())
    }
}

struct SimDocument {
    shared: Arc<Shared>,
    instance: Arc<Instance>,
    doc: Arc<Doc>,
}

impl SimDocument {
    fn state(&self) -> Result<MutexGuard<'_, DocState>, AutomationError> {
        if !self.instance.is_alive() {
            return Err(AutomationError::Disconnected);
        }
        let state = lock(&self.doc.state);
        if state.open {
            Ok(state)
        } else {
            Err(AutomationError::Disconnected)
        }
    }

    fn write_back(&self, state: &mut DocState) -> Result<(), AutomationError> {
        if state.read_only {
            return Err(AutomationError::ReadOnly);
        }
        lock(&self.shared.files).insert(state.key.clone(), state.cells.clone());
        state.saved = true;
        Ok(())
    }

    fn detach(&self) {
        lock(&self.doc.state).open = false;
        lock(&self.instance.state)
            .documents
            .retain(|doc| !Arc::ptr_eq(doc, &self.doc));
    }
}

impl DocumentObject for SimDocument {
    fn ping(&self) -> Result<(), AutomationError> {
        self.state().map(|_| ())
    }

    fn full_name(&self) -> Result<String, AutomationError> {
        Ok(self.state()?.full_name.clone())
    }

    fn read_only(&self) -> Result<bool, AutomationError> {
        Ok(self.state()?.read_only)
    }

    fn saved(&self) -> Result<bool, AutomationError> {
        Ok(self.state()?.saved)
    }

    fn set_saved(&self, saved: bool) -> Result<(), AutomationError> {
        self.state()?.saved = saved;
        Ok(())
    }

    fn visible(&self) -> Result<bool, AutomationError> {
        Ok(self.state()?.visible)
    }

    fn set_visible(&self, visible: bool) -> Result<(), AutomationError> {
        let mut state = self.state()?;
        if state.visible != visible {
            state.visible = visible;
            state.saved = false;
        }
        Ok(())
    }

    fn save(&self) -> Result<(), AutomationError> {
        let mut state = self.state()?;
        self.write_back(&mut state)
    }

    fn save_as(&self, path: &str) -> Result<(), AutomationError> {
        let key = canonicalize(path);
        let base = base_name(path);
        self.ping()?;

        let alerts = {
            let instance = lock(&self.instance.state);
            let clash = instance
                .documents
                .iter()
                .filter(|doc| !Arc::ptr_eq(doc, &self.doc))
                .any(|doc| base_name(&lock(&doc.state).full_name) == base);
            if clash {
                return Err(AutomationError::NameConflict(base));
            }
            instance.display_alerts
        };

        let mut state = self.state()?;
        let exists = lock(&self.shared.files).contains_key(&key);
        if exists && key != state.key && alerts && self.shared.prompt() != PromptResponse::Yes {
            return Err(AutomationError::Canceled);
        }

        state.full_name = normalize(path);
        state.key = key;
        state.read_only = false;
        self.write_back(&mut state)
    }

    fn close(&self, mode: CloseMode) -> Result<(), AutomationError> {
        let alerts = self.instance.alerts_enabled();
        {
            let mut state = self.state()?;
            match mode {
                CloseMode::Discard => {}
                CloseMode::Save => self.write_back(&mut state)?,
                CloseMode::Prompt => {
                    if !state.saved && alerts {
                        match self.shared.prompt() {
                            PromptResponse::Yes => self.write_back(&mut state)?,
                            PromptResponse::No => {}
                            PromptResponse::Cancel => return Err(AutomationError::Canceled),
                        }
                    }
                }
            }
        }
        self.detach();
        Ok(())
    }

    fn value(&self, cell: &str) -> Result<Option<String>, AutomationError> {
        Ok(self.state()?.cells.get(cell).cloned())
    }

    fn set_value(&self, cell: &str, value: &str) -> Result<(), AutomationError> {
        let mut state = self.state()?;
        state.cells.insert(cell.to_string(), value.to_string());
        state.saved = false;
        Ok(())
    }
}
