use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    sync::{Mutex as AsyncMutex, mpsc, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::{HubError, Result},
    message::{ControlEvent, Frame, read_frame, write_encoded},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything the receive loop and the send path hand to the presentation
/// side, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A chat line or announcement from the server, verbatim.
    Chat(String),
    /// A chat line this client sent, for the local transcript.
    Sent(String),
    Control(ControlEvent),
    Disconnected,
}

/// Peer side of the hub: one connection, one receive loop.
///
/// Events are pushed onto the channel returned by [`ChatClient::connect`];
/// whoever renders the local view drains it on its own schedule.
pub struct ChatClient {
    server: SocketAddr,
    connect_timeout: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    status: Mutex<Status>,
    link: AsyncMutex<Option<Link>>,
}

struct Status {
    state: ClientState,
    generation: u64,
}

/// The write side of one established connection.
struct Link {
    generation: u64,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    events: mpsc::UnboundedSender<ClientEvent>,
    closing: watch::Sender<bool>,
}

impl ChatClient {
    pub fn new(server: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            server,
            connect_timeout,
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    state: ClientState::Disconnected,
                    generation: 0,
                }),
                link: AsyncMutex::new(None),
            }),
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn state(&self) -> ClientState {
        self.shared.status().state
    }

    /// Opens the connection and spawns the receive loop.
    ///
    /// Fails with [`HubError::Connect`] when the handshake does not complete
    /// within the connect timeout, or when a connection is already open.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        let generation = self.begin_connect()?;

        let stream = match self.establish().await {
            Ok(stream) => stream,
            Err(source) => {
                self.shared.set_state(generation, ClientState::Disconnected);
                warn!(server = %self.server, error = ?source, "connection failed");
                return Err(HubError::Connect {
                    addr: self.server,
                    source,
                });
            }
        };

        let (reader, writer) = stream.into_split();
        let events = self.attach(generation, reader, writer).await;
        info!(server = %self.server, "connected");
        Ok(events)
    }

    fn begin_connect(&self) -> Result<u64> {
        let mut status = self.shared.status();
        if status.state != ClientState::Disconnected {
            return Err(HubError::Connect {
                addr: self.server,
                source: io::Error::new(io::ErrorKind::AlreadyExists, "already connected"),
            });
        }
        status.state = ClientState::Connecting;
        status.generation += 1;
        Ok(status.generation)
    }

    /// Installs both halves of an established stream as the live link and
    /// spawns its receive loop.
    async fn attach<R, W>(
        &self,
        generation: u64,
        reader: R,
        writer: W,
    ) -> mpsc::UnboundedReceiver<ClientEvent>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closing_tx, closing_rx) = watch::channel(false);

        *self.shared.link.lock().await = Some(Link {
            generation,
            writer: Box::new(writer),
            events: events_tx.clone(),
            closing: closing_tx,
        });
        self.shared.set_state(generation, ClientState::Connected);

        tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            generation,
            BufReader::new(reader),
            events_tx,
            closing_rx,
        ));

        events_rx
    }

    async fn establish(&self) -> io::Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(self.server)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection attempt timed out",
            )),
        }
    }

    /// Sends a chat line. Blank lines are ignored.
    ///
    /// On success the line is queued as [`ClientEvent::Sent`] so the local
    /// transcript shows it without the server's name prefix.
    pub async fn send(&self, text: &str) -> Result<()> {
        let text = text.trim_end_matches(&['\n', '\r'][..]);
        if text.trim().is_empty() {
            return Ok(());
        }
        self.write(Frame::Chat(text.to_string())).await
    }

    pub async fn send_control(&self, event: ControlEvent) -> Result<()> {
        self.write(Frame::Control(event)).await
    }

    /// A failed write tears the connection down; there is no retry.
    async fn write(&self, frame: Frame) -> Result<()> {
        let encoded = frame
            .encode()
            .map_err(|err| HubError::Send(io::Error::new(io::ErrorKind::InvalidData, err)))?;

        let mut link = self.shared.link.lock().await;
        let Some(active) = link.as_mut() else {
            return Err(HubError::NotConnected);
        };

        match write_encoded(&mut active.writer, &encoded).await {
            Ok(()) => {
                if let Frame::Chat(text) = frame {
                    let _ = active.events.send(ClientEvent::Sent(text));
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = ?err, "send failed, disconnecting");
                if let Some(failed) = link.take() {
                    failed.closing.send_replace(true);
                    self.shared
                        .set_state(failed.generation, ClientState::Disconnected);
                }
                Err(HubError::Send(err))
            }
        }
    }

    /// Closes the connection. The receive loop reports
    /// [`ClientEvent::Disconnected`] as it exits.
    pub async fn disconnect(&self) {
        let taken = self.shared.link.lock().await.take();
        if let Some(mut link) = taken {
            link.closing.send_replace(true);
            if let Err(error) = link.writer.shutdown().await {
                debug!(?error, "failed to shut down writer cleanly");
            }
            self.shared
                .set_state(link.generation, ClientState::Disconnected);
            info!(server = %self.server, "disconnected");
        }
    }
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Updates the state unless a newer connection attempt has taken over.
    fn set_state(&self, generation: u64, state: ClientState) {
        let mut status = self.status();
        if status.generation == generation {
            status.state = state;
        }
    }

    /// Drops the link belonging to `generation` if it is still installed.
    async fn release(&self, generation: u64) {
        let mut link = self.link.lock().await;
        if link.as_ref().is_some_and(|link| link.generation == generation) {
            if let Some(mut link) = link.take() {
                let _ = link.writer.shutdown().await;
            }
        }
        self.set_state(generation, ClientState::Disconnected);
    }
}

async fn receive_loop<R>(
    shared: Arc<Shared>,
    generation: u64,
    mut reader: BufReader<R>,
    events: mpsc::UnboundedSender<ClientEvent>,
    mut closing: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        select! {
            frame = read_frame(&mut reader) => {
                let event = match frame {
                    Ok(Some(Frame::Chat(line))) => ClientEvent::Chat(line),
                    Ok(Some(Frame::Control(event))) => ClientEvent::Control(event),
                    Ok(None) => {
                        info!("server closed the connection");
                        break;
                    }
                    Err(err) => {
                        warn!(error = ?err, "receive failed");
                        break;
                    }
                };
                let _ = events.send(event);
            }
            _ = closing.wait_for(|closing| *closing) => break,
        }
    }

    shared.release(generation).await;
    let _ = events.send(ClientEvent::Disconnected);
}
