//! Error types for broker-core operations.
//! Policy errors always carry the resource name and the option that raised them.

use std::path::PathBuf;

use crate::automation::{AutomationError, InstanceId};

/// All errors that can occur while brokering document handles.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    // ─────────────────────────────────────────────────────────────────────
    // Policy Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Document not found: {name} (if_absent: raise)")]
    ResourceNotFound { name: String },

    #[error("Document {name} is obstructed by {obstructing} ({option}: raise)")]
    Obstructed {
        name: String,
        obstructing: String,
        option: &'static str,
    },

    #[error("Document {name} has unsaved changes ({option}: raise)")]
    UnsavedConflict { name: String, option: &'static str },

    #[error("Document {name} is read-only")]
    ReadOnlyViolation { name: String },

    #[error("Invalid value for {option}: {value}")]
    InvalidPolicyOption { option: String, value: String },

    #[error("User canceled the prompt for {name}")]
    UserCanceled { name: String },

    #[error("Document already exists: {name} (if_exists: raise)")]
    AlreadyExists { name: String },

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Document handle is closed: {name}")]
    DeadHandle { name: String },

    #[error("Session {id} is not alive")]
    DeadSession { id: InstanceId },

    #[error("Automation failure: {context}: {source}")]
    Automation {
        context: String,
        #[source]
        source: AutomationError,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BrokerError {
    /// Wraps an automation failure, turning a declined prompt into `UserCanceled`.
    pub(crate) fn automation(name: &str, context: &str, source: AutomationError) -> Self {
        match source {
            AutomationError::Canceled => BrokerError::UserCanceled {
                name: name.to_string(),
            },
            source => BrokerError::Automation {
                context: format!("{context}: {name}"),
                source,
            },
        }
    }

    pub(crate) fn invalid_option(option: &str, value: &str) -> Self {
        BrokerError::InvalidPolicyOption {
            option: option.to_string(),
            value: value.to_string(),
        }
    }
}

/// Convenience type alias for Results using BrokerError.
pub type Result<T> = std::result::Result<T, BrokerError>;
