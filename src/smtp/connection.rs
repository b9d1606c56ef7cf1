use std::{fs::File, io, io::BufReader, sync::Arc};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{
    rustls::{
        pki_types::{CertificateDer, PrivateKeyDer},
        ProtocolVersion, ServerConfig, ServerConnection, SupportedCipherSuite,
    },
    server::TlsStream,
    TlsAcceptor,
};

use crate::options::TlsCredentials;

/// Negotiated TLS parameters, for logging after a handshake.
#[derive(Debug)]
pub(crate) struct TlsInfo {
    version: Option<ProtocolVersion>,
    ciphers: Option<SupportedCipherSuite>,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> Self {
        Self {
            version: conn.protocol_version(),
            ciphers: conn.negotiated_cipher_suite(),
        }
    }

    pub(crate) fn proto(&self) -> String {
        self.version
            .and_then(|version| version.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub(crate) fn cipher(&self) -> String {
        self.ciphers
            .and_then(|ciphers| ciphers.suite().as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

pub(crate) enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    Plain { stream: Stream },
    Tls { stream: Box<TlsStream<Stream>> },
    /// Transient placeholder while the stream is being upgraded; any I/O
    /// against it is a bug in the session.
    Detached,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Connection<Stream> {
    pub(crate) async fn send<S: core::fmt::Display + Send + Sync>(
        &mut self,
        response: &S,
    ) -> io::Result<()> {
        let response = format!("{response}\r\n");

        match self {
            Self::Plain { stream } => stream.write_all(response.as_bytes()).await,
            Self::Tls { stream } => stream.write_all(response.as_bytes()).await,
            Self::Detached => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub(crate) async fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain { stream } => stream.read(buf).await,
            Self::Tls { stream } => stream.read(buf).await,
            Self::Detached => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn load_certs(credentials: &TlsCredentials) -> io::Result<Vec<CertificateDer<'static>>> {
        rustls_pemfile::certs(&mut BufReader::new(File::open(&credentials.certificate)?)).collect()
    }

    fn load_key(credentials: &TlsCredentials) -> io::Result<PrivateKeyDer<'static>> {
        let mut reader = BufReader::new(File::open(&credentials.key)?);

        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
            _ => Err(io::Error::other("Unable to determine key file")),
        }
    }

    /// Wrap the stream in TLS using the server credentials. Works both for
    /// the STARTTLS upgrade and for immediate-TLS connections.
    pub(crate) async fn upgrade(
        self,
        credentials: &TlsCredentials,
    ) -> io::Result<(Self, TlsInfo)> {
        tracing::debug!("Upgrading connection ...");

        let certs = Self::load_certs(credentials)?;
        let key = Self::load_key(credentials)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(io::Error::other)?;

        let acceptor = TlsAcceptor::from(Arc::new(config));

        match self {
            Self::Plain { stream } => {
                let stream = acceptor.accept(stream).await?;
                let info = TlsInfo::of(stream.get_ref().1);

                Ok((
                    Self::Tls {
                        stream: Box::new(stream),
                    },
                    info,
                ))
            }
            Self::Tls { stream } => {
                let (stream, connection) = acceptor.accept(stream).await?.into_inner();

                Ok((Self::Tls { stream }, TlsInfo::of(&connection)))
            }
            Self::Detached => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}
