//! Policy enums and option bundles for open, close, save-as and unobtrusive access.
//!
//! Each policy axis is a closed enum, so an unknown value is rejected when the
//! options are built (or parsed via `FromStr`), never halfway through an open.
//! Defaults are conservative: anything that could lose data raises.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::automation::Calculation;
use crate::error::BrokerError;
use crate::session::Session;

macro_rules! policy_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $option:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Option name this policy is supplied under.
            pub const OPTION: &'static str = $option;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( $name::$variant => write!(f, $text) ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = BrokerError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $( $text => Ok($name::$variant), )+
                    other => Err(BrokerError::invalid_option($option, other)),
                }
            }
        }
    };
}

policy_enum! {
    /// What to do when nothing exists at the requested name.
    AbsentPolicy, "if_absent" {
        #[default]
        Raise => "raise",
        Create => "create",
    }
}

policy_enum! {
    /// What to do when the same document is already open with unsaved changes.
    UnsavedPolicy, "if_unsaved" {
        #[default]
        Raise => "raise",
        Accept => "accept",
        Forget => "forget",
        Alert => "alert",
        NewSession => "new_session",
    }
}

policy_enum! {
    /// What to do when a different document with the same base name is open.
    ObstructedPolicy, "if_obstructed" {
        #[default]
        Raise => "raise",
        Forget => "forget",
        Save => "save",
        CloseIfSaved => "close_if_saved",
        NewSession => "new_session",
    }
}

policy_enum! {
    /// What closing does with unsaved changes.
    CloseUnsavedPolicy, "if_unsaved" {
        #[default]
        Raise => "raise",
        Save => "save",
        Forget => "forget",
        KeepOpen => "keep_open",
        Alert => "alert",
    }
}

policy_enum! {
    /// What save-as does when the target already exists.
    ExistsPolicy, "if_exists" {
        #[default]
        Raise => "raise",
        Overwrite => "overwrite",
        Alert => "alert",
    }
}

policy_enum! {
    /// Where unobtrusive access opens a document that was not open.
    ClosedPlacement, "if_closed" {
        Current => "current",
        #[default]
        Hidden => "hidden",
    }
}

/// Which session an open should land in.
#[derive(Debug, Clone, Default)]
pub enum SessionSelector {
    /// First live session, launching one if none runs.
    #[default]
    Current,
    /// Always a freshly launched session.
    New,
    /// This session exactly. Dead sessions are an error, never substituted.
    Session(Arc<Session>),
}

impl FromStr for SessionSelector {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "current" => Ok(SessionSelector::Current),
            "new" => Ok(SessionSelector::New),
            other => Err(BrokerError::invalid_option("excel", other)),
        }
    }
}

/// Options for [`Broker::open`](crate::Broker::open).
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Session used when the document has no usable earlier session.
    pub default_session: Option<SessionSelector>,
    /// Session the document must end up in. Wins over `default_session`.
    pub force_session: Option<SessionSelector>,
    pub read_only: bool,
    pub if_absent: AbsentPolicy,
    pub if_unsaved: UnsavedPolicy,
    pub if_obstructed: ObstructedPolicy,
    /// Window visibility, applied without touching the saved flag.
    pub visible: Option<bool>,
    /// Session-wide calculation mode.
    pub calculation: Option<Calculation>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_session(mut self, selector: SessionSelector) -> Self {
        self.default_session = Some(selector);
        self
    }

    pub fn force_session(mut self, selector: SessionSelector) -> Self {
        self.force_session = Some(selector);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn if_absent(mut self, policy: AbsentPolicy) -> Self {
        self.if_absent = policy;
        self
    }

    pub fn if_unsaved(mut self, policy: UnsavedPolicy) -> Self {
        self.if_unsaved = policy;
        self
    }

    pub fn if_obstructed(mut self, policy: ObstructedPolicy) -> Self {
        self.if_obstructed = policy;
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn calculation(mut self, mode: Calculation) -> Self {
        self.calculation = Some(mode);
        self
    }

    /// Force wins over default; `current` when neither is given.
    pub(crate) fn session_selector(&self) -> SessionSelector {
        self.force_session
            .clone()
            .or_else(|| self.default_session.clone())
            .unwrap_or_default()
    }
}

/// Options for [`Broker::save_as`](crate::Broker::save_as).
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveAsOptions {
    pub if_exists: ExistsPolicy,
    /// `new_session` is meaningless here and rejected.
    pub if_obstructed: ObstructedPolicy,
}

/// Options for [`Broker::with_unchanged_state`](crate::Broker::with_unchanged_state).
#[derive(Debug, Clone, Copy)]
pub struct UnobtrusiveOptions {
    /// Write access is needed; changes are saved on the way out.
    pub writable: bool,
    pub if_closed: ClosedPlacement,
    /// Leave a document that was closed before open afterwards.
    pub keep_open: bool,
}

impl Default for UnobtrusiveOptions {
    fn default() -> Self {
        Self {
            writable: true,
            if_closed: ClosedPlacement::default(),
            keep_open: false,
        }
    }
}
