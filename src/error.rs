use std::io;

use thiserror::Error;

/// Errors that can occur while serving a single connection.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connection error occurred.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// Protocol error occurred during the session.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client went silent for longer than the configured timeout.
    #[error("Session timed out after {0} ms")]
    Timeout(u64),
}

impl SessionError {
    /// Returns `true` if the error is a client-side issue.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_))
    }
}

/// Errors that can occur in the accept loop.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to the socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}

/// A veto raised by one of the embedder hooks.
///
/// When `smtp_response` is set it is used verbatim as the reply line;
/// otherwise the session falls back to the default reply for the context
/// the rejection occurred in.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Rejection {
    message: String,
    smtp_response: Option<String>,
}

impl Rejection {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            smtp_response: None,
        }
    }

    /// Attach a full SMTP reply line (code, enhanced status and text) to be
    /// sent instead of the context's default.
    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.smtp_response = Some(response.into());
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn smtp_response(&self) -> Option<&str> {
        self.smtp_response.as_deref()
    }

    pub(crate) fn reply_or(&self, default: String) -> String {
        self.smtp_response
            .clone()
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejection_prefers_embedder_reply() {
        let rejection = Rejection::new("no such user");
        assert_eq!(
            rejection.reply_or("550 5.1.1 default".to_string()),
            "550 5.1.1 default"
        );

        let rejection = rejection.with_response("450 4.2.0 Greylisted, try again");
        assert_eq!(
            rejection.reply_or("550 5.1.1 default".to_string()),
            "450 4.2.0 Greylisted, try again"
        );
        assert_eq!(rejection.message(), "no such user");
    }

    #[test]
    fn session_error_classification() {
        assert!(SessionError::Timeout(60000).is_client_error());
        assert!(SessionError::Protocol("bad".into()).is_client_error());
        assert!(
            !SessionError::Connection(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
                .is_client_error()
        );
    }
}
