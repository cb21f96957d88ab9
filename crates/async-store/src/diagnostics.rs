//! Leveled diagnostics
//!
//! Misuse and override conditions are never fatal. Each one is emitted as a
//! `tracing` event and, when a [`DiagnosticSink`] is configured, forwarded to
//! it if its level passes the configured minimum.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::id::Id;

/// Severity of a diagnostic.
///
/// Ordered by severity: `Debug < Info < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Internal bookkeeping, overrides that are part of normal operation
    Debug,
    /// Lifecycle events worth noting
    Info,
    /// Misuse that is tolerated
    Warning,
    /// Conditions that lost work
    Error,
}

impl DiagnosticLevel {
    /// Bracketed tag used when rendering a diagnostic line
    pub fn tag(self) -> &'static str {
        match self {
            Self::Debug => "[DEBUG]",
            Self::Info => "[INFO]",
            Self::Warning => "[WARNING]",
            Self::Error => "[ERROR]",
        }
    }
}

impl std::str::FromStr for DiagnosticLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(StoreError::config(format!(
                "unknown diagnostic level '{other}'"
            ))),
        }
    }
}

/// Conditions the store reports instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A cancellable entry was replaced; the previous one was cancelled first
    IdentifierOverridden {
        /// Identifier that was reused
        id: Id,
    },
    /// A distributor channel was reopened under a live identifier
    ChannelOverridden {
        /// Identifier that was reused
        id: Id,
    },
    /// A channel's buffering policy discarded a value
    ValueDropped {
        /// Channel that dropped the value
        id: Id,
    },
    /// A channel's consumer went away; the channel was pruned
    ChannelTerminated {
        /// Channel that was pruned
        id: Id,
    },
    /// A value was published while no channel was open
    NoSubscribers,
    /// `receive` was called on an inactive store; the effect was dropped
    ReceiveWhileInactive {
        /// Description of the dropped effect
        effect: String,
    },
    /// The intake stream was closed underneath `receive`
    IntakeTerminated {
        /// Description of the dropped effect
        effect: String,
    },
    /// A `debounce` sits beneath a `concatenate` and will never be debounced
    ConcatenatedDebounce,
    /// `receive` was called outside the designated writer context
    ForeignWriterContext {
        /// Name or id of the calling thread
        thread: String,
    },
    /// A periodic timer stopped because it was cancelled
    TimerCancelled,
    /// An operation failed and its error is being mapped to an effect
    ErrorMapped {
        /// The error handed to the mapper
        error: StoreError,
    },
    /// A binding started driving effects
    BindingStarted {
        /// Identifier of the binding
        id: Id,
    },
    /// The store started its reduce loop
    Activated,
    /// The store stopped its reduce loop and released its registrations
    Deactivated,
}

impl Diagnostic {
    /// Fixed severity of this diagnostic
    pub fn level(&self) -> DiagnosticLevel {
        match self {
            Self::IdentifierOverridden { .. }
            | Self::ValueDropped { .. }
            | Self::NoSubscribers
            | Self::ErrorMapped { .. }
            | Self::Activated
            | Self::Deactivated => DiagnosticLevel::Debug,
            Self::ChannelTerminated { .. }
            | Self::TimerCancelled
            | Self::BindingStarted { .. } => DiagnosticLevel::Info,
            Self::ChannelOverridden { .. }
            | Self::ReceiveWhileInactive { .. }
            | Self::IntakeTerminated { .. }
            | Self::ConcatenatedDebounce
            | Self::ForeignWriterContext { .. } => DiagnosticLevel::Warning,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentifierOverridden { id } => {
                write!(f, "overriding existing entry for id: {id}")
            }
            Self::ChannelOverridden { id } => {
                write!(f, "overriding existing channel for id: {id}")
            }
            Self::ValueDropped { id } => write!(f, "channel {id} dropped a buffered value"),
            Self::ChannelTerminated { id } => write!(f, "channel {id} terminated"),
            Self::NoSubscribers => f.write_str("published with no open channels"),
            Self::ReceiveWhileInactive { effect } => {
                write!(f, "dropped effect {effect}: store is inactive")
            }
            Self::IntakeTerminated { effect } => {
                write!(f, "dropped effect {effect}: stream terminated")
            }
            Self::ConcatenatedDebounce => f.write_str(
                "Concatenated debounce effects may not be debounced as they will be synchronized.",
            ),
            Self::ForeignWriterContext { thread } => write!(
                f,
                "'receive' should only be called from the designated writer context (called from {thread})"
            ),
            Self::TimerCancelled => f.write_str("timer was cancelled"),
            Self::ErrorMapped { error } => write!(f, "mapping error: {error}"),
            Self::BindingStarted { id } => write!(f, "binding to id: {id}"),
            Self::Activated => f.write_str("activated"),
            Self::Deactivated => f.write_str("deactivated"),
        }
    }
}

/// Receiver for diagnostics that pass the configured minimum level.
pub trait DiagnosticSink: Send + Sync {
    /// Record one diagnostic emitted by `component`.
    fn record(&self, component: &str, level: DiagnosticLevel, diagnostic: &Diagnostic);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&str, DiagnosticLevel, &Diagnostic) + Send + Sync,
{
    fn record(&self, component: &str, level: DiagnosticLevel, diagnostic: &Diagnostic) {
        self(component, level, diagnostic);
    }
}

/// Emission handle shared by every component of one store.
#[derive(Clone)]
pub struct Diagnostics {
    component: Arc<str>,
    sink: Option<Arc<dyn DiagnosticSink>>,
    min_level: DiagnosticLevel,
}

impl Diagnostics {
    /// Diagnostics that only go to `tracing`.
    pub fn new(component: impl Into<Arc<str>>) -> Self {
        Self {
            component: component.into(),
            sink: None,
            min_level: DiagnosticLevel::Debug,
        }
    }

    /// Attach a sink receiving diagnostics at or above `min_level`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>, min_level: DiagnosticLevel) -> Self {
        self.sink = Some(sink);
        self.min_level = min_level;
        self
    }

    /// Component name attached to every emitted diagnostic
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Emit a diagnostic.
    pub fn emit(&self, diagnostic: Diagnostic) {
        let level = diagnostic.level();
        let component = &*self.component;
        match level {
            DiagnosticLevel::Debug => tracing::debug!(component, "{diagnostic}"),
            DiagnosticLevel::Info => tracing::info!(component, "{diagnostic}"),
            DiagnosticLevel::Warning => tracing::warn!(component, "{diagnostic}"),
            DiagnosticLevel::Error => tracing::error!(component, "{diagnostic}"),
        }

        if let Some(sink) = &self.sink {
            if level >= self.min_level {
                sink.record(component, level, &diagnostic);
            }
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new("AsyncStore")
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("component", &self.component)
            .field("has_sink", &self.sink.is_some())
            .field("min_level", &self.min_level)
            .finish()
    }
}
