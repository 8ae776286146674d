//! # broker-core
//!
//! Handle registry and session pooling for scripted access to spreadsheet
//! documents shared with a human user.
//!
//! ## Design Principles
//!
//! - **Synchronous**: Every call blocks until the automation layer answers.
//! - **Identity**: One `Session` per running instance, one `Book` per open,
//!   handed out as `Arc` and cached weakly.
//! - **Polled liveness**: Nothing is pushed; `alive()` asks, and a failed probe
//!   is final.
//! - **Conservative defaults**: Every policy defaults to `raise`. Unsaved work
//!   is only discarded when a caller says `forget`.
//! - **Pluggable backend**: The automation layer is a trait object; `sim`
//!   provides an in-memory one.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use broker_core::{Broker, OpenOptions, SimAutomation};
//!
//! let broker = Broker::with_defaults(Arc::new(SimAutomation::new()));
//! let book = broker.open("C:/Data/Report.xlsx", &OpenOptions::default())?;
//! book.set_value("A1", "42")?;
//! broker.save(&book)?;
//! ```

// Public modules
pub mod automation;
pub mod book;
pub mod broker;
pub mod canonical;
pub mod config;
pub mod error;
pub mod logging;
pub mod options;
pub mod pool;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod sim;
mod unobtrusive;

// Re-export commonly used items at crate root
pub use automation::{
    AppObject, Automation, AutomationError, Calculation, CloseMode, DocumentObject, InstanceId,
};
pub use book::Book;
pub use broker::Broker;
pub use canonical::{canonicalize, AliasResolver, DriveMapping};
pub use config::{load_config, BrokerConfig, LogConfig};
pub use error::{BrokerError, Result};
pub use logging::init_logging;
pub use options::*;
pub use pool::{CloseAllConfig, CloseAllReport, PoolConfig, SessionPool};
pub use registry::{BookRegistry, FetchOptions};
pub use session::Session;
pub use sim::{PromptResponse, SimAutomation};
