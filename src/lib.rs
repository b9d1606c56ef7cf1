pub mod error;
pub mod events;
pub mod logging;
pub mod options;
pub mod server;
pub mod smtp;

pub use error::{Rejection, SessionError};
pub use events::{Events, Unattended};
pub use options::{AuthMethod, Options, TlsCredentials};
pub use server::Server;
pub use smtp::envelope::{AuthState, Authentication, Envelope};

pub use tracing;
