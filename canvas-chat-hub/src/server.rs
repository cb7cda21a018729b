use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::BufReader,
    net::{TcpListener, TcpSocket, TcpStream, tcp::OwnedReadHalf},
    select,
    sync::oneshot,
    task::{JoinError, JoinHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::{HubError, Result},
    hub::Hub,
    message::{Frame, read_frame},
    registry::Session,
};

const LISTEN_BACKLOG: u32 = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// A bound, not yet running, hub server.
pub struct HubServer {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl HubServer {
    /// Binds the listening socket.
    ///
    /// The socket is marked reusable so a stopped server's address can be
    /// bound again right away; an address held by a live listener still fails.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let bind_error = |source| HubError::Bind { addr, source };

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;

        Ok(Self::new(listener))
    }

    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            hub: Arc::new(Hub::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Runs the accept loop on a background task.
    pub fn start(self) -> io::Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let hub = self.hub();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(self.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Ok(ServerHandle {
            local_addr,
            hub,
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Accepts connections until `shutdown` resolves, then closes every
    /// session and waits for all connection tasks to finish.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let HubServer { listener, hub } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub, &mut connections);
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    reap_connection(finished);
                }
            }
        }

        handle_shutdown(&hub).await;
        drop(listener);

        while let Some(finished) = connections.join_next().await {
            reap_connection(finished);
        }
        info!("hub stopped");
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Control handle for a server started with [`HubServer::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    hub: Arc<Hub>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn session_count(&self) -> usize {
        self.hub.session_count()
    }

    /// Announces the shutdown, closes every session and the listener, and
    /// returns once the accept loop and all receive loops have exited.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            warn!(error = ?err, "accept loop ended abnormally");
        }
    }
}

async fn handle_shutdown(hub: &Hub) {
    info!(sessions = hub.session_count(), "hub shutting down");
    // A peer that stopped reading must not hold the shutdown hostage.
    if timeout(SHUTDOWN_GRACE, hub.announce("server shutting down"))
        .await
        .is_err()
    {
        warn!("shutdown notice still pending, closing sessions anyway");
    }
    hub.close_all();
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    hub: &Arc<Hub>,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, hub, connections),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: &Arc<Hub>,
    connections: &mut JoinSet<()>,
) {
    let hub = Arc::clone(hub);
    connections.spawn(async move {
        if let Err(err) = handle_connection(stream, peer, hub).await {
            warn!(peer = %peer, error = ?err, "session closed with error");
        }
    });
}

fn reap_connection(result: std::result::Result<(), JoinError>) {
    if let Err(err) = result {
        warn!(error = ?err, "connection task failed");
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: Arc<Hub>) -> io::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let session = hub.join(writer, peer).await;
    info!(peer = %peer, session = %session.name(), "session registered");
    hub.announce(&format!("{} joined the chat", session.name()))
        .await;

    let result = run_session(&hub, &session, &mut reader).await;

    hub.leave(&session).await;
    session.shutdown().await;
    debug!(session = %session.name(), "session removed");

    result
}

async fn run_session(
    hub: &Hub,
    session: &Session,
    reader: &mut BufReader<OwnedReadHalf>,
) -> io::Result<()> {
    loop {
        select! {
            frame = read_frame(reader) => {
                if !handle_frame(frame?, hub, session).await {
                    break;
                }
            }
            _ = session.closed() => break,
            _ = hub.stopped() => break,
        }
    }

    Ok(())
}

async fn handle_frame(frame: Option<Frame>, hub: &Hub, session: &Session) -> bool {
    match frame {
        Some(Frame::Chat(text)) => {
            hub.route_chat(session, &text).await;
            true
        }
        Some(Frame::Control(event)) => {
            debug!(session = %session.name(), ?event, "control event");
            hub.route_control(event).await;
            true
        }
        None => false,
    }
}
