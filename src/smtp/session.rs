use std::{net::SocketAddr, sync::Arc};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    error::SessionError,
    events::Events,
    incoming, internal,
    options::Options,
    outgoing,
    smtp::{
        command::{self, Command, ReversePath},
        connection::Connection,
        envelope::{AuthState, Envelope},
        extensions::Extension,
        framer::{Frame, Framer},
        status::Status,
        validate::{self, AddressKind},
    },
};

/// Command lines longer than this (terminator excluded) are refused.
const MAX_LINE_LENGTH: usize = 512;

/// What the session loop should do after a frame has been handled.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
    StartTls,
}

/// One client connection: the framed stream, the transaction in progress,
/// and the identity the client has presented so far. Commands are handled
/// strictly one at a time; while an embedder hook is pending the framer is
/// simply not polled, so buffered input sits untouched.
pub(crate) struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    peer: SocketAddr,
    pub(super) options: Arc<Options>,
    pub(super) events: Arc<dyn Events>,
    connection: Connection<Stream>,
    framer: Framer,
    pub(super) envelope: Envelope,
    host_name_appears_as: Option<String>,
    pub(super) secure: bool,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    pub(crate) fn create(
        stream: Stream,
        peer: SocketAddr,
        options: Arc<Options>,
        events: Arc<dyn Events>,
    ) -> Self {
        Self {
            envelope: Envelope::new(peer.ip()),
            peer,
            options,
            events,
            connection: Connection::Plain { stream },
            framer: Framer::new(),
            host_name_appears_as: None,
            secure: false,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), SessionError> {
        internal!("Connected to {}", self.peer);

        let result = self.serve().await;

        if let Err(err) = &result {
            let cause = match err {
                SessionError::Timeout(_) => "timeout exceeded".to_string(),
                err => err.to_string(),
            };
            let reply = format!(
                "{} 4.4.2 {} Error: {cause}",
                Status::Unavailable,
                self.options.name
            );
            let _ = self.connection.send(&reply).await;
        }

        let events = Arc::clone(&self.events);
        events.on_close(&self.envelope).await;
        internal!("Connection closed");

        result
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        if self.options.secure_connection {
            self.upgrade_tls().await?;
        }

        self.send(format!(
            "{} {} ESMTP {}",
            Status::ServiceReady,
            self.options.name,
            self.options.banner
        ))
        .await?;

        let mut buf = [0; 4096];

        loop {
            while let Some(frame) = self.framer.next() {
                match self.handle_frame(frame).await? {
                    Flow::Continue => {}
                    Flow::Quit => return Ok(()),
                    Flow::StartTls => self.upgrade_tls().await?,
                }
            }

            let received =
                tokio::time::timeout(self.options.timeout(), self.connection.receive(&mut buf))
                    .await;

            match received {
                Err(_) => return Err(SessionError::Timeout(self.options.timeout)),
                Ok(Err(err)) => return Err(SessionError::Connection(err)),
                // Reading 0 bytes means the other side has closed the
                // connection or is done writing, then so are we.
                Ok(Ok(0)) => return Ok(()),
                Ok(Ok(bytes_read)) => self.framer.feed(&buf[..bytes_read]),
            }
        }
    }

    pub(super) async fn send<S: core::fmt::Display + Send + Sync>(
        &mut self,
        response: S,
    ) -> Result<(), SessionError> {
        outgoing!("{response}");

        self.connection.send(&response).await.map_err(|err| {
            internal!(level = ERROR, "{err}");
            SessionError::Connection(err)
        })
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Flow, SessionError> {
        match frame {
            Frame::Line(line) => self.handle_line(line).await,
            Frame::Data(chunk) => {
                let events = Arc::clone(&self.events);
                events.on_data(&self.envelope, &chunk).await;
                Ok(Flow::Continue)
            }
            Frame::Ready => {
                self.finish_data().await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_line(&mut self, line: String) -> Result<Flow, SessionError> {
        if line.len() > MAX_LINE_LENGTH {
            self.send(format!("{} 5.5.2 Error: line too long", Status::SyntaxError))
                .await?;
            return Ok(Flow::Continue);
        }

        // Lines inside an unfinished AUTH dialogue belong to it, whatever
        // they happen to look like (XOAUTH2 continues with an empty line)
        if matches!(
            self.envelope.authentication().state(),
            AuthState::PlainUserData | AuthState::Authenticating | AuthState::XOAuth2
        ) {
            self.continue_authentication(&line).await?;
            return Ok(Flow::Continue);
        }

        // Otherwise blank lines mean nothing
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        let command = match Command::try_from(line.as_str()) {
            Ok(command) => command,
            Err(err) => {
                incoming!("{line}");
                self.send(err.reply()).await?;
                return Ok(Flow::Continue);
            }
        };

        incoming!("{command}");

        self.dispatch(command).await
    }

    async fn dispatch(&mut self, command: Command) -> Result<Flow, SessionError> {
        match command {
            Command::Helo(host) => self.helo(host, false).await,
            Command::Ehlo(host) => self.helo(host, true).await,
            Command::Mail(args) => self.mail(&args).await,
            Command::Rcpt(args) => self.rcpt(&args).await,
            Command::Data => self.data().await,
            Command::Rset => {
                self.envelope.reset();
                self.send(format!("{} 2.0.0 Ok", Status::Ok)).await?;
                Ok(Flow::Continue)
            }
            Command::Noop => {
                self.send(format!("{} OK", Status::Ok)).await?;
                Ok(Flow::Continue)
            }
            Command::Vrfy => {
                self.send(format!(
                    "{} 2.1.5 Send some mail, I'll try my best",
                    Status::CannotVerify
                ))
                .await?;
                Ok(Flow::Continue)
            }
            Command::Quit => {
                self.send(format!("{} 2.0.0 Goodbye!", Status::GoodBye))
                    .await?;
                Ok(Flow::Quit)
            }
            Command::StartTls => self.starttls().await,
            Command::Auth { mechanism, initial } => {
                self.begin_authentication(&mechanism, initial).await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn helo(&mut self, host: String, extended: bool) -> Result<Flow, SessionError> {
        if extended && self.options.disable_ehlo {
            self.send(format!(
                "{} 5.5.2 Error: command not implemented",
                Status::NotImplemented
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        self.envelope.set_host(&host);
        self.host_name_appears_as = Some(host);

        let greeting = format!(
            "{} at your service, [{}]",
            self.options.name,
            self.peer.ip()
        );

        if !extended {
            self.send(format!("{} {greeting}", Status::Ok)).await?;
            return Ok(Flow::Continue);
        }

        let extensions = self.extensions();
        let mut response = vec![format!("{}-{greeting}", Status::Ok)];
        for (idx, extension) in extensions.iter().enumerate() {
            response.push(format!(
                "{}{}{extension}",
                Status::Ok,
                if idx == extensions.len() - 1 { ' ' } else { '-' },
            ));
        }

        for line in response {
            self.send(line).await?;
        }

        Ok(Flow::Continue)
    }

    /// The capabilities this session advertises on EHLO, in a fixed order.
    fn extensions(&self) -> Vec<Extension> {
        let mut extensions = vec![Extension::EightBitMime, Extension::EnhancedStatusCodes];

        if let Some(max_size) = self.options.max_size {
            extensions.push(Extension::Size(max_size));
        }

        if self.options.authentication_enabled()
            && (self.secure || self.options.ignore_tls)
            && !self.options.auth_methods.is_empty()
        {
            extensions.push(Extension::Auth(self.options.auth_methods.clone()));
        }

        if !self.secure && !self.options.disable_starttls && self.options.credentials.is_some() {
            extensions.push(Extension::Starttls);
        }

        extensions
    }

    async fn mail(&mut self, args: &str) -> Result<Flow, SessionError> {
        if self.host_name_appears_as.is_none() {
            self.send(format!(
                "{} 5.5.1 Error: send HELO/EHLO first",
                Status::InvalidCommandSequence
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        if self.envelope.from().is_some() {
            self.send(format!(
                "{} 5.5.1 Error: nested MAIL command",
                Status::InvalidCommandSequence
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        if self.options.require_authentication
            && !self.envelope.authentication().is_authenticated()
        {
            self.send(format!(
                "{} 5.5.1 Authentication Required",
                Status::AuthRequired
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        let Some((path, size)) = command::parse_reverse_path(args) else {
            self.send(format!(
                "{} 5.1.7 Bad sender address syntax",
                Status::ParameterError
            ))
            .await?;
            return Ok(Flow::Continue);
        };

        match path {
            ReversePath::Null => self.envelope.set_null_sender(),
            ReversePath::Mailbox { local, domain } => {
                let events = Arc::clone(&self.events);
                let verdict = validate::validate_address(
                    &self.options,
                    events.as_ref(),
                    &self.envelope,
                    AddressKind::Sender,
                    &local,
                    &domain,
                )
                .await;

                if let Err(reply) = verdict {
                    self.send(reply).await?;
                    return Ok(Flow::Continue);
                }

                self.envelope.set_from(&local, &domain);
            }
        }

        // The declared size is recorded, not enforced; enforcement during
        // DATA is the embedder's call
        if self.options.max_size.is_some() {
            if let Some(size) = size {
                self.envelope.set_message_size(size);
            }
        }

        self.send(format!("{} 2.1.0 Ok", Status::Ok)).await?;
        Ok(Flow::Continue)
    }

    async fn rcpt(&mut self, args: &str) -> Result<Flow, SessionError> {
        if self.envelope.from().is_none() {
            self.send(format!(
                "{} 5.5.1 Error: need MAIL command",
                Status::InvalidCommandSequence
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        let Some((local, domain)) = command::parse_forward_path(args) else {
            self.send(format!(
                "{} 5.1.7 Bad recipient address syntax",
                Status::ParameterError
            ))
            .await?;
            return Ok(Flow::Continue);
        };

        let events = Arc::clone(&self.events);
        let verdict = validate::validate_address(
            &self.options,
            events.as_ref(),
            &self.envelope,
            AddressKind::Recipient,
            &local,
            &domain,
        )
        .await;

        if let Err(reply) = verdict {
            self.send(reply).await?;
            return Ok(Flow::Continue);
        }

        self.envelope.add_recipient(&local, &domain);
        self.send(format!("{} 2.1.0 Ok", Status::Ok)).await?;
        Ok(Flow::Continue)
    }

    async fn data(&mut self) -> Result<Flow, SessionError> {
        if self.envelope.to().is_empty() {
            self.send(format!(
                "{} 5.5.1 Error: need RCPT command",
                Status::InvalidCommandSequence
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        self.send(format!(
            "{} End data with <CR><LF>.<CR><LF>",
            Status::StartMailInput
        ))
        .await?;
        self.framer.start_data();

        let events = Arc::clone(&self.events);
        events.on_start_data(&self.envelope).await;

        Ok(Flow::Continue)
    }

    async fn finish_data(&mut self) -> Result<(), SessionError> {
        let events = Arc::clone(&self.events);

        let reply = match events.on_data_ready(&self.envelope).await {
            Ok(code) => format!(
                "{} 2.0.0 Ok: queued as {}",
                Status::Ok,
                code.unwrap_or_else(queue_id)
            ),
            Err(rejection) => {
                let message = if rejection.message().is_empty() {
                    "FAILED"
                } else {
                    rejection.message()
                };
                rejection.reply_or(format!("{} {message}", Status::Error))
            }
        };

        self.send(reply).await?;
        self.envelope.reset();

        Ok(())
    }

    async fn starttls(&mut self) -> Result<Flow, SessionError> {
        if self.secure {
            self.send(format!(
                "{} 5.5.1 Error: TLS already active",
                Status::TransactionFailed
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        if self.options.disable_starttls || self.options.credentials.is_none() {
            self.send(format!(
                "{} 5.5.2 Error: command not implemented",
                Status::NotImplemented
            ))
            .await?;
            return Ok(Flow::Continue);
        }

        self.send(format!("{} 2.0.0 Ready to start TLS", Status::ServiceReady))
            .await?;

        Ok(Flow::StartTls)
    }

    async fn upgrade_tls(&mut self) -> Result<(), SessionError> {
        let Some(credentials) = self.options.credentials.clone() else {
            return Err(SessionError::Protocol(
                "TLS requested without credentials".to_string(),
            ));
        };

        let connection = std::mem::replace(&mut self.connection, Connection::Detached);
        let (connection, info) = connection.upgrade(&credentials).await?;
        self.connection = connection;
        self.secure = true;

        // RFC 3207: the command state resets completely after the handshake
        self.framer.reset();
        self.host_name_appears_as = None;
        self.envelope = Envelope::new(self.peer.ip());

        tracing::debug!(
            "Connection upgraded: protocol {}, cipher {}",
            info.proto(),
            info.cipher()
        );

        Ok(())
    }
}

/// 10 random bytes as 20 hex characters.
fn queue_id() -> String {
    hex::encode(rand::random::<[u8; 10]>())
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::{events::Unattended, options::Options};

    use super::Session;

    async fn started(
        options: Options,
    ) -> (
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
        BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        tokio::task::JoinHandle<Result<(), crate::error::SessionError>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = Session::create(
            server,
            "127.0.0.1:2525".parse().unwrap(),
            Arc::new(options),
            Arc::new(Unattended),
        );
        let handle = tokio::spawn(session.run());

        let (read, write) = tokio::io::split(client);
        (write, BufReader::new(read), handle)
    }

    async fn reply(reader: &mut BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    fn options() -> Options {
        Options {
            name: "mx.test".to_string(),
            banner: "testing".to_string(),
            disable_dns_validation: true,
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn greets_on_connect() {
        let (write, mut reader, handle) = started(options()).await;

        assert_eq!(reply(&mut reader).await, "220 mx.test ESMTP testing\r\n");

        drop(write);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn helo_names_the_peer() {
        let (mut write, mut reader, handle) = started(options()).await;

        let _ = reply(&mut reader).await;
        write.write_all(b"HELO client.example\r\n").await.unwrap();
        assert_eq!(
            reply(&mut reader).await,
            "250 mx.test at your service, [127.0.0.1]\r\n"
        );

        drop(write);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn mail_requires_greeting() {
        let (mut write, mut reader, handle) = started(options()).await;

        let _ = reply(&mut reader).await;
        write.write_all(b"MAIL FROM:<a@b.c>\r\n").await.unwrap();
        assert_eq!(
            reply(&mut reader).await,
            "503 5.5.1 Error: send HELO/EHLO first\r\n"
        );

        drop(write);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn overlong_lines_are_refused() {
        let (mut write, mut reader, handle) = started(options()).await;

        let _ = reply(&mut reader).await;
        let long = format!("NOOP {}\r\n", "x".repeat(600));
        write.write_all(long.as_bytes()).await.unwrap();
        assert_eq!(
            reply(&mut reader).await,
            "500 5.5.2 Error: line too long\r\n"
        );

        drop(write);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
