use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// Where the authentication dialogue currently stands. The dispatcher and
/// the AUTH sub-machine coordinate exclusively through this variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Normal,
    /// `AUTH PLAIN` was issued without a payload; the next line carries it.
    PlainUserData,
    /// Inside the LOGIN username/password exchange.
    Authenticating,
    /// XOAUTH2 failed; the next (empty) line gets the definitive 535.
    XOAuth2,
    /// Credentials are with the embedder for verification.
    Verifying,
    Authenticated,
}

/// Session-scoped authentication record. Survives RSET and completed
/// transactions; only dropped with the connection (or a STARTTLS reset).
#[derive(Debug, Clone, Default)]
pub struct Authentication {
    username: Option<String>,
    authenticated: bool,
    state: AuthState,
}

impl Authentication {
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: AuthState) {
        self.state = state;
    }

    pub(crate) fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }

    /// `authenticated` and `state` move together; these two methods are the
    /// only way to flip them.
    pub(crate) fn succeed(&mut self, username: String) {
        self.username = Some(username);
        self.authenticated = true;
        self.state = AuthState::Authenticated;
    }

    pub(crate) fn fail(&mut self) {
        self.username = None;
        self.authenticated = false;
        self.state = AuthState::Normal;
    }
}

/// The in-progress transaction: sender, recipients and metadata, distinct
/// from the message body.
#[derive(Debug, Clone)]
pub struct Envelope {
    from: Option<String>,
    to: Vec<String>,
    host: String,
    remote_address: IpAddr,
    message_size: Option<usize>,
    date: DateTime<Utc>,
    authentication: Authentication,
}

impl Envelope {
    pub(crate) fn new(remote_address: IpAddr) -> Self {
        Self {
            from: None,
            to: Vec::new(),
            host: String::new(),
            remote_address,
            message_size: None,
            date: Utc::now(),
            authentication: Authentication::default(),
        }
    }

    /// The sender mailbox. `Some("")` is the null reverse-path `<>`.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Accepted recipients, in order, deduplicated, domains lowercased.
    #[must_use]
    pub fn to(&self) -> &[String] {
        &self.to
    }

    /// The hostname the client declared in HELO/EHLO.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn remote_address(&self) -> IpAddr {
        self.remote_address
    }

    /// The declared `SIZE=n` from MAIL FROM, when one was given and the
    /// server advertises SIZE.
    #[must_use]
    pub const fn message_size(&self) -> Option<usize> {
        self.message_size
    }

    #[must_use]
    pub const fn date(&self) -> DateTime<Utc> {
        self.date
    }

    #[must_use]
    pub const fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    pub(crate) fn authentication_mut(&mut self) -> &mut Authentication {
        &mut self.authentication
    }

    pub(crate) fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    pub(crate) fn set_null_sender(&mut self) {
        self.from = Some(String::new());
    }

    pub(crate) fn set_from(&mut self, local: &str, domain: &str) {
        self.from = Some(format!("{local}@{}", domain.to_lowercase()));
    }

    pub(crate) fn set_message_size(&mut self, size: usize) {
        self.message_size = Some(size);
    }

    /// Append a recipient. The local part is preserved verbatim, the domain
    /// is lowercased, and resubmissions of an already-present address are
    /// absorbed silently.
    pub(crate) fn add_recipient(&mut self, local: &str, domain: &str) {
        let address = format!("{local}@{}", domain.to_lowercase());
        if !self.to.contains(&address) {
            self.to.push(address);
        }
    }

    /// Start a fresh transaction on the same connection. The authentication
    /// record and the HELO identity are session state and stay put.
    pub(crate) fn reset(&mut self) {
        self.from = None;
        self.to.clear();
        self.message_size = None;
        self.date = Utc::now();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn envelope() -> Envelope {
        Envelope::new("192.0.2.7".parse().unwrap())
    }

    #[test]
    fn recipients_dedup_case_insensitively_on_domain() {
        let mut envelope = envelope();
        envelope.add_recipient("X", "Y.COM");
        envelope.add_recipient("X", "y.com");

        assert_eq!(envelope.to(), ["X@y.com"]);
    }

    #[test]
    fn local_part_stays_case_sensitive() {
        let mut envelope = envelope();
        envelope.add_recipient("Alice", "example.com");
        envelope.add_recipient("alice", "example.com");

        assert_eq!(envelope.to(), ["Alice@example.com", "alice@example.com"]);
    }

    #[test]
    fn sender_domain_is_lowercased() {
        let mut envelope = envelope();
        envelope.set_from("Bob", "EXAMPLE.ORG");
        assert_eq!(envelope.from(), Some("Bob@example.org"));
    }

    #[test]
    fn null_sender_is_empty_string() {
        let mut envelope = envelope();
        envelope.set_null_sender();
        assert_eq!(envelope.from(), Some(""));
    }

    #[test]
    fn reset_preserves_authentication_and_host() {
        let mut envelope = envelope();
        envelope.set_host("client.example");
        envelope.set_from("a", "b.com");
        envelope.add_recipient("c", "d.com");
        envelope.set_message_size(42);
        envelope.authentication_mut().succeed("alice".to_string());

        envelope.reset();

        assert_eq!(envelope.from(), None);
        assert!(envelope.to().is_empty());
        assert_eq!(envelope.message_size(), None);
        assert_eq!(envelope.host(), "client.example");
        assert!(envelope.authentication().is_authenticated());
        assert_eq!(envelope.authentication().username(), Some("alice"));
    }

    #[test]
    fn authenticated_flag_tracks_state() {
        let mut auth = Authentication::default();
        assert_eq!(auth.state(), AuthState::Normal);
        assert!(!auth.is_authenticated());

        auth.succeed("alice".to_string());
        assert_eq!(auth.state(), AuthState::Authenticated);
        assert!(auth.is_authenticated());

        auth.fail();
        assert_eq!(auth.state(), AuthState::Normal);
        assert!(!auth.is_authenticated());
        assert_eq!(auth.username(), None);
    }
}
