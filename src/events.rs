use async_trait::async_trait;

use crate::{error::Rejection, smtp::envelope::Envelope, smtp::validate};

/// The contract between the server and the embedding application: one slot
/// per event, with default bodies giving the behavior of an unregistered
/// handler. Implement the slots you care about and hand the result to
/// [`Server::new`](crate::Server::new).
///
/// Within one session the slots are invoked in protocol order, and the
/// session does not read further commands while one of them is pending.
/// No ordering holds across sessions.
#[async_trait]
pub trait Events: Send + Sync {
    /// The connection ended, gracefully or not.
    async fn on_close(&self, _envelope: &Envelope) {}

    /// DATA was accepted; body bytes will follow.
    async fn on_start_data(&self, _envelope: &Envelope) {}

    /// A run of body bytes, dot-unstuffed. The body is an opaque byte
    /// stream to the server; store it or stream it onward.
    async fn on_data(&self, _envelope: &Envelope, _chunk: &[u8]) {}

    /// The body terminator arrived. Return `Ok(Some(id))` to name the queue
    /// entry yourself, `Ok(None)` to let the server mint a random id, or a
    /// [`Rejection`] to refuse the message.
    async fn on_data_ready(&self, _envelope: &Envelope) -> Result<Option<String>, Rejection> {
        Ok(None)
    }

    /// Verify credentials collected by the AUTH dialogue. `secret` is the
    /// password (PLAIN, LOGIN) or the bearer token (XOAUTH2). Without an
    /// override nobody can authenticate.
    async fn authorize_user(
        &self,
        _envelope: &Envelope,
        _username: &str,
        _secret: &str,
    ) -> Result<bool, Rejection> {
        Ok(false)
    }

    /// Veto point for MAIL FROM addresses that passed the MX check.
    async fn validate_sender(&self, _envelope: &Envelope, _email: &str) -> Result<(), Rejection> {
        Ok(())
    }

    /// Veto point for RCPT TO addresses that passed the MX check.
    async fn validate_recipient(
        &self,
        _envelope: &Envelope,
        _email: &str,
    ) -> Result<(), Rejection> {
        Ok(())
    }

    /// A MAIL FROM address failed the MX check.
    async fn on_sender_validation_failed(&self, _email: &str) {}

    /// A RCPT TO address failed the MX check.
    async fn on_recipient_validation_failed(&self, _email: &str) {}

    /// The MX-lookup hook used by address validation. The default asks the
    /// system resolver; override to inject policy, return a [`Rejection`]
    /// with an `smtp_response` to control the reply text.
    async fn resolve_mx(&self, domain: &str) -> Result<Vec<String>, Rejection> {
        validate::system_mx_lookup(domain).await
    }
}

/// An embedder that accepts every message and authenticates nobody.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl Events for Unattended {}
