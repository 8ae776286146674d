//! Interfaces to the external spreadsheet automation layer.
//!
//! The broker never talks to an application directly. Everything it needs is
//! expressed by three object-safe traits:
//!
//! - [`Automation`]: the process-level entry point (launch, enumerate instances)
//! - [`AppObject`]: one running application instance
//! - [`DocumentObject`]: one document open inside an instance
//!
//! Every call may block until the application answers. Liveness is polled
//! through `ping`, never pushed: a failing `ping` means the object is gone.
//!
//! Implementors should:
//! - Be cheap to clone behind `Box` (objects are proxies, not owners)
//! - Return `AutomationError::Canceled` when a user declines a prompt
//! - Only prompt when the owning instance has display alerts enabled

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Stable external identifier of an application instance (a window handle).
pub type InstanceId = u64;

/// Errors reported by the automation layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    #[error("no document at {0}")]
    NotFound(String),

    #[error("prompt canceled by user")]
    Canceled,

    #[error("automation server disconnected")]
    Disconnected,

    #[error("a document named {0} is already open")]
    NameConflict(String),

    #[error("document is read-only")]
    ReadOnly,

    #[error("automation call failed: {0}")]
    Failed(String),
}

/// Session-wide recalculation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calculation {
    Manual,
    Automatic,
}

impl fmt::Display for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Calculation::Manual => write!(f, "manual"),
            Calculation::Automatic => write!(f, "automatic"),
        }
    }
}

impl FromStr for Calculation {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(Calculation::Manual),
            "automatic" => Ok(Calculation::Automatic),
            other => Err(BrokerError::invalid_option("calculation", other)),
        }
    }
}

/// How a document close treats pending modifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Close and drop unsaved modifications.
    Discard,
    /// Save first, then close.
    Save,
    /// Let the application ask the user.
    Prompt,
}

/// Process-level entry point into the automation layer.
pub trait Automation: Send + Sync {
    /// Start a fresh application instance.
    fn launch(&self) -> Result<Box<dyn AppObject>, AutomationError>;

    /// All instances currently running, in start order, including ones the
    /// broker did not launch.
    fn running(&self) -> Vec<Box<dyn AppObject>>;

    /// Whether a document exists at `path`. Must not open it.
    fn document_exists(&self, path: &str) -> bool;

    /// Delete the document stored at `path`.
    fn remove_document(&self, path: &str) -> Result<(), AutomationError>;
}

/// One running application instance.
pub trait AppObject: Send + Sync {
    fn instance_id(&self) -> Result<InstanceId, AutomationError>;

    /// Cheap no-op round trip used as a liveness probe.
    fn ping(&self) -> Result<(), AutomationError>;

    /// Documents currently open in this instance, in open order.
    fn documents(&self) -> Result<Vec<Box<dyn DocumentObject>>, AutomationError>;

    fn open_document(
        &self,
        path: &str,
        read_only: bool,
    ) -> Result<Box<dyn DocumentObject>, AutomationError>;

    /// Create an empty document and save it at `path`. It stays open.
    fn create_document(&self, path: &str) -> Result<Box<dyn DocumentObject>, AutomationError>;

    fn visible(&self) -> Result<bool, AutomationError>;
    fn set_visible(&self, visible: bool) -> Result<(), AutomationError>;
    fn display_alerts(&self) -> Result<bool, AutomationError>;
    fn set_display_alerts(&self, enabled: bool) -> Result<(), AutomationError>;
    fn calculation(&self) -> Result<Calculation, AutomationError>;
    fn set_calculation(&self, mode: Calculation) -> Result<(), AutomationError>;

    /// Ask the instance to exit. Open documents are discarded.
    fn quit(&self) -> Result<(), AutomationError>;

    /// Kill the instance without asking.
    fn terminate(&self) -> Result<(), AutomationError>;
}

/// One document open inside an application instance.
pub trait DocumentObject: Send + Sync {
    /// Cheap no-op round trip used as a liveness probe.
    fn ping(&self) -> Result<(), AutomationError>;

    /// Full path of the document as the application reports it.
    fn full_name(&self) -> Result<String, AutomationError>;

    fn read_only(&self) -> Result<bool, AutomationError>;
    fn saved(&self) -> Result<bool, AutomationError>;
    fn set_saved(&self, saved: bool) -> Result<(), AutomationError>;
    fn visible(&self) -> Result<bool, AutomationError>;
    fn set_visible(&self, visible: bool) -> Result<(), AutomationError>;
    fn save(&self) -> Result<(), AutomationError>;
    fn save_as(&self, path: &str) -> Result<(), AutomationError>;
    fn close(&self, mode: CloseMode) -> Result<(), AutomationError>;

    fn value(&self, cell: &str) -> Result<Option<String>, AutomationError>;
    fn set_value(&self, cell: &str, value: &str) -> Result<(), AutomationError>;
}
