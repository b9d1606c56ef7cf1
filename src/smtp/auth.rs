//! The AUTH sub-dialogues. Three mechanisms share the session's
//! [`AuthState`]; whichever is active consumes command lines until it
//! resolves back to `Normal` or `Authenticated`.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    error::SessionError,
    options::AuthMethod,
    smtp::{envelope::AuthState, session::Session, status::Status},
};

/// base64("Username:")
const USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
/// base64("Password:")
const PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";
/// The canned XOAUTH2 error blob clients expect before the definitive 535:
/// base64 of `{"status":"401","schemes":"bearer mac","scope":"https://mail.google.com/"}`
const XOAUTH2_ERROR: &str =
    "eyJzdGF0dXMiOiI0MDEiLCJzY2hlbWVzIjoiYmVhcmVyIG1hYyIsInNjb3BlIjoiaHR0cHM6Ly9tYWlsLmdvb2dsZS5jb20vIn0=";

#[derive(Debug, PartialEq, Eq, Error)]
pub(crate) enum AuthError {
    #[error("invalid base64")]
    Base64,
    #[error("malformed credentials")]
    Malformed,
}

/// RFC 4616 PLAIN: base64 of `authzid NUL authcid NUL password`, exactly
/// three fields. The username is the authcid, or the authzid when the
/// authcid is empty.
pub(crate) fn decode_plain(blob: &str) -> Result<(String, String), AuthError> {
    let text = decode_utf8(blob)?;

    let parts: Vec<&str> = text.split('\0').collect();
    let [authzid, authcid, password] = parts.as_slice() else {
        return Err(AuthError::Malformed);
    };

    let username = if authcid.is_empty() { authzid } else { authcid };

    Ok((username.to_string(), password.to_string()))
}

/// XOAUTH2: base64 of `user={user}\x01auth=Bearer {token}\x01\x01`, which
/// splits on `\x01` into exactly four fields.
pub(crate) fn decode_xoauth2(blob: &str) -> Result<(String, String), AuthError> {
    let text = decode_utf8(blob)?;

    let parts: Vec<&str> = text.split('\u{1}').collect();
    let [user, auth, _, _] = parts.as_slice() else {
        return Err(AuthError::Malformed);
    };

    let username = user.get(5..).ok_or(AuthError::Malformed)?;
    let token = auth
        .split_whitespace()
        .nth(1)
        .ok_or(AuthError::Malformed)?;

    Ok((username.to_string(), token.to_string()))
}

/// One base64 line of the LOGIN exchange.
pub(crate) fn decode_login_field(blob: &str) -> Result<String, AuthError> {
    decode_utf8(blob)
}

fn decode_utf8(blob: &str) -> Result<String, AuthError> {
    let bytes = STANDARD.decode(blob.trim()).map_err(|_| AuthError::Base64)?;
    String::from_utf8(bytes).map_err(|_| AuthError::Malformed)
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    pub(super) async fn begin_authentication(
        &mut self,
        mechanism: &str,
        initial: Option<String>,
    ) -> Result<(), SessionError> {
        if !self.options.authentication_enabled() {
            return self
                .send(format!(
                    "{} 5.5.1 Error: authentication not enabled",
                    Status::InvalidCommandSequence
                ))
                .await;
        }

        if !self.secure && !self.options.ignore_tls {
            return self
                .send(format!(
                    "{} 5.7.0 Must issue a STARTTLS command first",
                    Status::AuthRequired
                ))
                .await;
        }

        if self.envelope.authentication().is_authenticated() {
            return self
                .send(format!(
                    "{} 5.7.0 No identity changes permitted",
                    Status::InvalidCommandSequence
                ))
                .await;
        }

        let method = mechanism.parse::<AuthMethod>().ok();
        let Some(method) = method.filter(|method| self.options.auth_methods.contains(method))
        else {
            return self
                .send(format!(
                    "{} 5.7.8 Error: authentication failed: no mechanism available",
                    Status::AuthFailed
                ))
                .await;
        };

        match method {
            AuthMethod::Plain => match initial {
                Some(blob) => self.plain_userdata(&blob).await,
                None => {
                    self.envelope
                        .authentication_mut()
                        .set_state(AuthState::PlainUserData);
                    self.send(Status::AuthContinue).await
                }
            },
            AuthMethod::Login => {
                self.envelope
                    .authentication_mut()
                    .set_state(AuthState::Authenticating);
                match initial {
                    Some(blob) => self.login_step(&blob).await,
                    None => {
                        self.send(format!("{} {USERNAME_CHALLENGE}", Status::AuthContinue))
                            .await
                    }
                }
            }
            AuthMethod::XOAuth2 => {
                let blob = initial.unwrap_or_default();
                self.xoauth2_userdata(&blob).await
            }
        }
    }

    /// A command line arriving while an AUTH dialogue is open.
    pub(super) async fn continue_authentication(
        &mut self,
        line: &str,
    ) -> Result<(), SessionError> {
        match self.envelope.authentication().state() {
            AuthState::PlainUserData => self.plain_userdata(line).await,
            AuthState::Authenticating => self.login_step(line).await,
            // The client has acknowledged the XOAUTH2 error blob; now the
            // refusal becomes definitive
            AuthState::XOAuth2 => {
                self.envelope.authentication_mut().fail();
                self.send(format!(
                    "{} 5.7.1 Username and Password not accepted",
                    Status::AuthFailed
                ))
                .await
            }
            _ => Ok(()),
        }
    }

    async fn plain_userdata(&mut self, blob: &str) -> Result<(), SessionError> {
        match decode_plain(blob) {
            Ok((username, password)) => {
                self.verify_credentials(AuthMethod::Plain, username, password)
                    .await
            }
            Err(_) => self.invalid_userdata().await,
        }
    }

    async fn login_step(&mut self, blob: &str) -> Result<(), SessionError> {
        if self.envelope.authentication().username().is_none() {
            return match decode_login_field(blob) {
                Ok(username) => {
                    self.envelope.authentication_mut().set_username(username);
                    self.send(format!("{} {PASSWORD_CHALLENGE}", Status::AuthContinue))
                        .await
                }
                Err(_) => self.invalid_userdata().await,
            };
        }

        match decode_login_field(blob) {
            Ok(password) => {
                let username = self
                    .envelope
                    .authentication()
                    .username()
                    .unwrap_or_default()
                    .to_string();
                self.verify_credentials(AuthMethod::Login, username, password)
                    .await
            }
            Err(_) => self.invalid_userdata().await,
        }
    }

    async fn xoauth2_userdata(&mut self, blob: &str) -> Result<(), SessionError> {
        match decode_xoauth2(blob) {
            Ok((username, token)) => {
                self.verify_credentials(AuthMethod::XOAuth2, username, token)
                    .await
            }
            Err(_) => self.xoauth2_challenge().await,
        }
    }

    /// Hand the collected credentials to the embedder and reply according
    /// to its verdict.
    async fn verify_credentials(
        &mut self,
        method: AuthMethod,
        username: String,
        secret: String,
    ) -> Result<(), SessionError> {
        self.envelope
            .authentication_mut()
            .set_state(AuthState::Verifying);

        let events = Arc::clone(&self.events);
        let verdict = events
            .authorize_user(&self.envelope, &username, &secret)
            .await;

        match verdict {
            Ok(true) => {
                self.envelope.authentication_mut().succeed(username);
                self.send(format!(
                    "{} 2.7.0 Authentication successful",
                    Status::AuthSuccessful
                ))
                .await
            }
            _ if method == AuthMethod::XOAuth2 => self.xoauth2_challenge().await,
            _ => {
                self.envelope.authentication_mut().fail();
                self.send(format!(
                    "{} 5.7.8 Error: authentication failed: generic failure",
                    Status::AuthFailed
                ))
                .await
            }
        }
    }

    /// XOAUTH2 rejections go through a challenge round first: the canned
    /// error blob, then a 535 on the client's empty continuation.
    async fn xoauth2_challenge(&mut self) -> Result<(), SessionError> {
        let authentication = self.envelope.authentication_mut();
        authentication.fail();
        authentication.set_state(AuthState::XOAuth2);

        self.send(format!("{} {XOAUTH2_ERROR}", Status::AuthContinue))
            .await
    }

    async fn invalid_userdata(&mut self) -> Result<(), SessionError> {
        self.envelope.authentication_mut().fail();
        self.send(format!(
            "{} 5.5.2 Error: invalid userdata to decode",
            Status::ParameterError
        ))
        .await
    }
}

#[cfg(test)]
mod test {
    use base64::Engine as _;

    use super::*;

    #[test]
    fn plain_decodes_three_nul_fields() {
        // base64("\0alice\0secret")
        let (username, password) = decode_plain("AGFsaWNlAHNlY3JldA==").unwrap();
        assert_eq!(username, "alice");
        assert_eq!(password, "secret");
    }

    #[test]
    fn plain_falls_back_to_authzid() {
        let blob = STANDARD.encode("zid\0\0secret");
        let (username, password) = decode_plain(&blob).unwrap();
        assert_eq!(username, "zid");
        assert_eq!(password, "secret");
    }

    #[test]
    fn plain_rejects_wrong_field_count() {
        let two = STANDARD.encode("alice\0secret");
        assert_eq!(decode_plain(&two), Err(AuthError::Malformed));

        let four = STANDARD.encode("\0a\0b\0c");
        assert_eq!(decode_plain(&four), Err(AuthError::Malformed));

        assert_eq!(decode_plain("!!not base64!!"), Err(AuthError::Base64));
    }

    #[test]
    fn xoauth2_extracts_user_and_token() {
        let blob = STANDARD.encode("user=carol@example.com\x01auth=Bearer ya29.token\x01\x01");
        let (username, token) = decode_xoauth2(&blob).unwrap();
        assert_eq!(username, "carol@example.com");
        assert_eq!(token, "ya29.token");
    }

    #[test]
    fn xoauth2_rejects_wrong_field_count() {
        let blob = STANDARD.encode("user=carol@example.com\x01auth=Bearer tok");
        assert_eq!(decode_xoauth2(&blob), Err(AuthError::Malformed));
    }

    #[test]
    fn login_fields_are_plain_base64() {
        assert_eq!(decode_login_field("Ym9i").unwrap(), "bob");
        assert_eq!(decode_login_field("aHVudGVyMg==").unwrap(), "hunter2");
        assert_eq!(decode_login_field("???"), Err(AuthError::Base64));
    }
}
