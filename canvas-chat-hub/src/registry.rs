use std::{
    collections::BTreeMap,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{Mutex as AsyncMutex, watch},
};

use crate::message::write_encoded;

pub type SessionId = u64;

pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of a session, serialized so one frame is written at a time.
pub type SharedWriter = Arc<AsyncMutex<FrameWriter>>;

pub fn shared_writer<W>(writer: W) -> SharedWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(AsyncMutex::new(Box::new(writer)))
}

/// One connected peer.
///
/// The name is fixed at registration. Closing a session only raises its close
/// signal: in-flight deliveries abort and the owning connection task leaves
/// its receive loop, which is where the stream is actually torn down.
pub struct Session {
    id: SessionId,
    name: String,
    addr: SocketAddr,
    writer: SharedWriter,
    closed: watch::Sender<bool>,
}

impl Session {
    fn new(id: SessionId, writer: SharedWriter, addr: SocketAddr) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            name: format!("User{id}"),
            addr,
            writer,
            closed,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Writes one pre-encoded frame, giving up as soon as the session closes.
    pub async fn deliver(&self, encoded: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }

        select! {
            result = async {
                let mut writer = self.writer.lock().await;
                write_encoded(&mut *writer, encoded).await
            } => result,
            _ = self.closed() => Err(closed_error()),
        }
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`Session::close`] has been called.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Closes the session and shuts its write half down so the peer sees EOF.
    pub async fn shutdown(&self) {
        self.close();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "session closed")
}

/// The set of live sessions.
///
/// Every operation takes the lock once and never awaits while holding it;
/// callers iterate over [`SessionRegistry::snapshot`] instead of the map.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: BTreeMap<SessionId, Arc<Session>>,
    last_id: SessionId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next display name and makes the session visible to
    /// snapshots taken after this call returns.
    pub fn register(&self, writer: SharedWriter, addr: SocketAddr) -> Arc<Session> {
        let mut inner = self.lock();
        inner.last_id += 1;
        let session = Arc::new(Session::new(inner.last_id, writer, addr));
        inner.sessions.insert(session.id, Arc::clone(&session));
        session
    }

    /// Removes a session. Returns `None` when it was already gone, so both a
    /// failed delivery and the receive loop may call this for the same peer.
    pub fn unregister(&self, id: SessionId) -> Option<Arc<Session>> {
        self.lock().sessions.remove(&id)
    }

    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().expect("valid addr")
    }

    fn register(registry: &SessionRegistry) -> Arc<Session> {
        registry.register(shared_writer(tokio::io::sink()), addr())
    }

    #[test]
    fn assigns_sequential_names() {
        let registry = SessionRegistry::new();
        let first = register(&registry);
        let second = register(&registry);

        assert_eq!(first.name(), "User1");
        assert_eq!(second.name(), "User2");

        // Names are never reused after a removal.
        registry.unregister(second.id());
        assert_eq!(register(&registry).name(), "User3");
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = register(&registry);

        assert!(registry.unregister(session.id()).is_some());
        assert!(registry.unregister(session.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_a_point_in_time_copy() {
        let registry = SessionRegistry::new();
        let one = register(&registry);
        let two = register(&registry);

        let snapshot = registry.snapshot();
        registry.unregister(one.id());
        let three = register(&registry);

        let ids: Vec<_> = snapshot.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![one.id(), two.id()]);

        let ids: Vec<_> = registry.snapshot().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![two.id(), three.id()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_membership_changes_settle_exactly() {
        let registry = Arc::new(SessionRegistry::new());

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let mut kept = Vec::new();
                for round in 0..50 {
                    let session = register(&registry);
                    if (worker + round) % 3 == 0 {
                        registry.unregister(session.id());
                        registry.unregister(session.id());
                    } else {
                        kept.push(session.id());
                    }
                    tokio::task::yield_now().await;
                }
                kept
            }));
        }

        let mut expected = BTreeSet::new();
        for task in tasks {
            expected.extend(task.await.expect("worker"));
        }

        let snapshot: Vec<_> = registry.snapshot().iter().map(|s| s.id()).collect();
        let unique: BTreeSet<_> = snapshot.iter().copied().collect();
        assert_eq!(unique.len(), snapshot.len(), "no duplicates");
        assert_eq!(unique, expected);
        assert_eq!(registry.len(), expected.len());
    }

    #[tokio::test]
    async fn closed_session_refuses_delivery() {
        let (writer, _reader) = tokio::io::duplex(64);
        let registry = SessionRegistry::new();
        let session = registry.register(shared_writer(writer), addr());

        session.deliver(b"hi\n").await.expect("open session delivers");
        session.close();
        session.closed().await;

        let err = session.deliver(b"hi\n").await.expect_err("closed");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn close_aborts_a_stalled_delivery() {
        // Nobody reads the other end, so the second write blocks on capacity.
        let (writer, _reader) = tokio::io::duplex(4);
        let registry = SessionRegistry::new();
        let session = registry.register(shared_writer(writer), addr());

        let stalled = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.deliver(b"far too long\n").await })
        };
        tokio::task::yield_now().await;
        session.close();

        let result = stalled.await.expect("delivery task");
        assert!(result.is_err());
    }
}
