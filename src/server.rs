use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures_util::future::join_all;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::broadcast,
};

use crate::{
    error::{ListenerError, SessionError},
    events::Events,
    internal,
    options::Options,
    smtp::{session::Session, status::Status},
};

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}

/// The server facade: holds the shared configuration and the embedder's
/// event handlers, accepts connections, and spawns one session task per
/// client. Cloning is cheap; clones share the admission counter and the
/// shutdown channel.
#[derive(Clone)]
pub struct Server {
    options: Arc<Options>,
    events: Arc<dyn Events>,
    connected: Arc<AtomicUsize>,
    shutdown: broadcast::Sender<Signal>,
}

impl Server {
    #[must_use]
    pub fn new(options: Options, events: Arc<dyn Events>) -> Self {
        let (shutdown, _) = broadcast::channel(16);

        Self {
            options: Arc::new(options),
            events,
            connected: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop accepting new connections. Sessions in flight run to
    /// completion; [`listen`](Self::listen) returns once they have.
    pub fn close(&self) {
        let _ = self.shutdown.send(Signal::Shutdown);
    }

    /// Run one already-accepted connection through a full SMTP session.
    /// [`listen`](Self::listen) calls this for every accept; it is public
    /// so embedders can drive sessions over their own transports.
    pub async fn serve_connection<Stream>(
        &self,
        stream: Stream,
        peer: SocketAddr,
    ) -> Result<(), SessionError>
    where
        Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync,
    {
        Session::create(
            stream,
            peer,
            Arc::clone(&self.options),
            Arc::clone(&self.events),
        )
        .run()
        .await
    }

    /// Bind and accept until [`close`](Self::close) is called.
    pub async fn listen(&self, socket: SocketAddr) -> Result<(), ListenerError> {
        let listener =
            TcpListener::bind(socket)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: socket.to_string(),
                    source,
                })?;

        internal!("Listening on {socket}");

        let mut receiver = self.shutdown.subscribe();
        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                _ = receiver.recv() => {
                    internal!(level = INFO, "Listener {} shutting down, finishing sessions ...", socket);
                    join_all(sessions).await;
                    return Ok(());
                }

                connection = listener.accept() => {
                    let (stream, peer) = connection?;
                    tracing::debug!("Connection received from {peer}");

                    let guard = ClientGuard::admit(&self.connected);

                    if self.options.max_clients.is_some_and(|max| guard.count > max) {
                        let reply = format!(
                            "{} 4.3.2 {} Error: too many connections\r\n",
                            Status::Unavailable,
                            self.options.name,
                        );
                        sessions.push(tokio::spawn(async move {
                            let _guard = guard;
                            let mut stream = stream;
                            let _ = stream.write_all(reply.as_bytes()).await;
                        }));
                        continue;
                    }

                    let server = self.clone();
                    sessions.push(tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(err) = server.serve_connection(stream, peer).await {
                            internal!(level = ERROR, "Error: {err}");
                        }
                    }));
                }
            }
        }
    }
}

/// Keeps the connected-client count honest whatever way a session ends.
struct ClientGuard {
    connected: Arc<AtomicUsize>,
    count: usize,
}

impl ClientGuard {
    fn admit(connected: &Arc<AtomicUsize>) -> Self {
        let connected = Arc::clone(connected);
        let count = connected.fetch_add(1, Ordering::SeqCst) + 1;

        Self { connected, count }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.connected.fetch_sub(1, Ordering::SeqCst);
    }
}
