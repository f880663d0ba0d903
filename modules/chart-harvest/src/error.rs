use serde::Serialize;
use thiserror::Error;
use fantoccini::error::{CmdError, ErrorStatus, WebDriver};

/// Failure of a single browser interaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The handle points at a node the page has since removed or recycled.
    #[error("stale element reference")]
    Stale,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("session transport error: {0}")]
    Transport(String),
}

impl SessionError {
    pub fn is_stale(&self) -> bool {
        matches!(self, SessionError::Stale)
    }
}

impl From<CmdError> for SessionError {
    fn from(err: CmdError) -> Self {
        match &err {
            // A node that can no longer be found was recycled between the
            // query and the read.
            CmdError::Standard(WebDriver {
                error: ErrorStatus::StaleElementReference | ErrorStatus::NoSuchElement,
                ..
            }) => SessionError::Stale,
            CmdError::Standard(WebDriver {
                error: ErrorStatus::JavascriptError,
                message,
                ..
            }) => SessionError::Script(message.to_string()),
            _ => SessionError::Transport(err.to_string()),
        }
    }
}

/// Terminal failure of one list's harvest.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HarvestError {
    #[error("list never rendered within {waited_ms}ms")]
    InitialLoadTimeout { waited_ms: u64 },

    #[error("all scroll strategies failed to move the viewport")]
    ScrollExhausted,

    #[error("no scrollable list container found")]
    NonScrollableContainer,

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser session error: {0}")]
    Session(String),
}

impl From<SessionError> for HarvestError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Navigation(msg) => HarvestError::Navigation(msg),
            other => HarvestError::Session(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webdriver(status: ErrorStatus, message: &'static str) -> CmdError {
        CmdError::Standard(WebDriver::new(status, message))
    }

    #[test]
    fn webdriver_stale_maps_to_stale() {
        let err: SessionError = webdriver(ErrorStatus::StaleElementReference, "gone").into();
        assert!(err.is_stale());
    }

    #[test]
    fn missing_node_maps_to_stale() {
        let err: SessionError = webdriver(ErrorStatus::NoSuchElement, "row unmounted").into();
        assert!(err.is_stale());
    }

    #[test]
    fn script_errors_keep_their_message() {
        let err: SessionError = webdriver(ErrorStatus::JavascriptError, "el is null").into();
        assert_eq!(err, SessionError::Script("el is null".into()));
    }

    #[test]
    fn other_webdriver_errors_are_transport() {
        let err: SessionError = webdriver(ErrorStatus::InvalidSessionId, "session gone").into();
        assert!(matches!(err, SessionError::Transport(_)));
        let err: SessionError = CmdError::WaitTimeout.into();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[test]
    fn navigation_keeps_its_kind_when_escalated() {
        let err: HarvestError = SessionError::Navigation("dns".into()).into();
        assert_eq!(err, HarvestError::Navigation("dns".into()));
    }
}
