//! Alerts produced by analysis modules and their delivery.
//!
//! An [`Alert`] only ever lives inside a [`crate::modules::ModuleResult`];
//! it is never persisted on its own. The [`AlertDispatcher`] forwards
//! alerts to a [`NotificationSink`] right after a successful run.

pub mod dispatcher;
pub mod format;
pub mod telegram;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dispatcher::{AlertDispatcher, DispatchOutcome, DispatcherConfig, SkipReason};
pub use telegram::TelegramSink;

/// Alert severity, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub recommended_action: Option<String>,
}

impl Alert {
    pub fn new(alert_type: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            severity,
            message: message.into(),
            recommended_action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.recommended_action = Some(action.into());
        self
    }
}

/// Markup flavour of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Html,
    Plain,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Delivery failed: {message}")]
    Delivery { message: String },

    #[error("Sink rejected message with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Destination for rendered alert messages.
///
/// Delivery is never retried by the dispatcher.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, text: &str, format: MessageFormat) -> Result<(), SinkError>;

    fn sink_name(&self) -> &str;
}
