use core::fmt::{self, Display, Formatter};
use std::{path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// SASL mechanisms the server can offer on AUTH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMethod {
    Plain,
    Login,
    XOAuth2,
}

impl Display for AuthMethod {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::XOAuth2 => "XOAUTH2",
        })
    }
}

impl FromStr for AuthMethod {
    type Err = ();

    fn from_str(mechanism: &str) -> Result<Self, Self::Err> {
        match mechanism.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "LOGIN" => Ok(Self::Login),
            "XOAUTH2" => Ok(Self::XOAuth2),
            _ => Err(()),
        }
    }
}

/// PEM certificate/key pair used for STARTTLS and immediate-TLS listeners.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsCredentials {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Server configuration.
///
/// Every field has a default, so embedders can start from
/// `Options::default()` and override what they need. The struct derives
/// `Deserialize`; feeding it from a file is the embedder's concern.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Hostname used in the greeting and status lines.
    pub name: String,
    /// Raise the default log filter to TRACE.
    pub debug: bool,
    /// Socket inactivity timeout, in milliseconds.
    pub timeout: u64,
    /// Start every connection in TLS (implicit TLS rather than STARTTLS).
    pub secure_connection: bool,
    /// Free-text suffix for the `220` banner.
    pub banner: String,
    /// Reject MAIL until the session has authenticated.
    pub require_authentication: bool,
    /// Permit AUTH even when authentication is not required.
    pub enable_authentication: bool,
    /// Advertise the SIZE capability with this limit.
    pub max_size: Option<usize>,
    /// TLS credentials; without them STARTTLS is not offered.
    pub credentials: Option<TlsCredentials>,
    /// Mechanisms offered on AUTH.
    pub auth_methods: Vec<AuthMethod>,
    /// Reject EHLO, forcing clients down to plain HELO.
    pub disable_ehlo: bool,
    /// Allow AUTH on plaintext connections.
    pub ignore_tls: bool,
    /// Never offer or accept STARTTLS.
    pub disable_starttls: bool,
    /// Skip the MX-lookup step of address validation.
    pub disable_dns_validation: bool,
    /// Admission limit; further clients are turned away with a 421.
    pub max_clients: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: default_name(),
            debug: false,
            timeout: 60_000,
            secure_connection: false,
            banner: String::from("ready and willing"),
            require_authentication: false,
            enable_authentication: false,
            max_size: None,
            credentials: None,
            auth_methods: vec![AuthMethod::Plain, AuthMethod::Login],
            disable_ehlo: false,
            ignore_tls: false,
            disable_starttls: false,
            disable_dns_validation: false,
            max_clients: None,
        }
    }
}

impl Options {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// AUTH is available when it is either required or explicitly enabled.
    pub(crate) const fn authentication_enabled(&self) -> bool {
        self.require_authentication || self.enable_authentication
    }
}

fn default_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string())
}
