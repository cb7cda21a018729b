use std::{collections::VecDeque, net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use tokio::{io::AsyncWrite, select, sync::watch};
use tracing::{debug, info, warn};

use crate::{
    message::{ControlEvent, Frame, announcement, chat_from, encode_chat, write_encoded},
    registry::{Session, SessionId, SessionRegistry, shared_writer},
    replay::ReplayLog,
};

/// Shared server state: who is connected and what has been drawn.
pub struct Hub {
    registry: SessionRegistry,
    replay: ReplayLog,
    stopping: watch::Sender<bool>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (stopping, _) = watch::channel(false);
        Self {
            registry: SessionRegistry::new(),
            replay: ReplayLog::new(),
            stopping,
        }
    }

    pub fn replay(&self) -> &ReplayLog {
        &self.replay
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Registers a new session and replays the drawing log to it.
    ///
    /// The joiner's writer is locked before the session becomes visible and
    /// stays locked until the replay is written, so live frames queue up
    /// behind the replay instead of interleaving with it.
    pub async fn join<W>(&self, writer: W, addr: SocketAddr) -> Arc<Session>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = shared_writer(writer);
        let mut guard = Arc::clone(&writer).lock_owned().await;

        let (session, backlog) = self
            .replay
            .snapshot_and(|backlog| (self.registry.register(writer, addr), backlog));

        if !backlog.is_empty() {
            let encoded = encode_backlog(&backlog);
            select! {
                result = write_encoded(&mut *guard, &encoded) => {
                    if let Err(err) = result {
                        debug!(session = %session.name(), error = ?err, "failed to replay drawing log");
                        session.close();
                    }
                }
                _ = session.closed() => {}
            }
            debug!(session = %session.name(), events = backlog.len(), "replayed drawing log");
        }

        drop(guard);
        session
    }

    /// Sends a system notice to every session.
    pub async fn announce(&self, text: &str) -> usize {
        self.broadcast(&announcement(text), None).await
    }

    /// Delivers a chat line to every registered session except `exclude`.
    ///
    /// Returns how many sessions received it.
    pub async fn broadcast(&self, line: &str, exclude: Option<SessionId>) -> usize {
        let encoded = encode_chat(line);
        let recipients = self.recipients(exclude);
        self.fan_out(encoded, recipients).await
    }

    /// Relays a participant's chat line to everyone else.
    pub async fn route_chat(&self, from: &Session, text: &str) -> usize {
        info!(session = %from.name(), "{text}");
        self.broadcast(&chat_from(from.name(), text), Some(from.id()))
            .await
    }

    /// Records a control event and relays it to every session, the sender
    /// included.
    pub async fn route_control(&self, event: ControlEvent) -> usize {
        let encoded = match Frame::Control(event.clone()).encode() {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(?error, "failed to encode control event");
                return 0;
            }
        };

        if event == ControlEvent::Clear {
            info!("canvas cleared");
        }

        let recipients = self
            .replay
            .apply_and(&event, || self.registry.snapshot());
        self.fan_out(encoded, recipients).await
    }

    /// Removes `session` and announces its departure.
    ///
    /// Returns `false` when someone else already removed it, in which case
    /// that caller made the announcement.
    pub async fn leave(&self, session: &Session) -> bool {
        session.close();
        if self.registry.unregister(session.id()).is_none() {
            return false;
        }

        info!(session = %session.name(), peer = %session.addr(), "session left");
        self.announce(&departure_notice(session.name())).await;
        true
    }

    /// Closes every live session and refuses to keep new ones open.
    pub fn close_all(&self) {
        self.stopping.send_replace(true);
        for session in self.registry.snapshot() {
            session.close();
        }
    }

    /// Resolves once [`Hub::close_all`] has been called.
    pub async fn stopped(&self) {
        let mut stopping = self.stopping.subscribe();
        let _ = stopping.wait_for(|stopping| *stopping).await;
    }

    fn recipients(&self, exclude: Option<SessionId>) -> Vec<Arc<Session>> {
        let mut recipients = self.registry.snapshot();
        if let Some(excluded) = exclude {
            recipients.retain(|session| session.id() != excluded);
        }
        recipients
    }

    /// Writes `encoded` to every recipient concurrently.
    ///
    /// A recipient whose write fails is unregistered and closed, and its
    /// departure is announced in a follow-up round once this one completes.
    /// Only deliveries of `encoded` itself are counted.
    async fn fan_out(&self, encoded: Vec<u8>, recipients: Vec<Arc<Session>>) -> usize {
        let mut rounds = VecDeque::from([(encoded, recipients)]);
        let mut delivered = None;

        while let Some((frame, recipients)) = rounds.pop_front() {
            let results = join_all(recipients.iter().map(|session| session.deliver(&frame))).await;

            let mut succeeded = 0;
            for (session, result) in recipients.iter().zip(results) {
                match result {
                    Ok(()) => succeeded += 1,
                    Err(error) => {
                        debug!(session = %session.name(), ?error, "dropping session after failed delivery");
                        session.close();
                        if self.registry.unregister(session.id()).is_some() {
                            info!(session = %session.name(), peer = %session.addr(), "session left");
                            let notice = announcement(&departure_notice(session.name()));
                            rounds.push_back((encode_chat(&notice), self.registry.snapshot()));
                        }
                    }
                }
            }

            if delivered.is_none() {
                delivered = Some(succeeded);
            }
        }

        delivered.unwrap_or_default()
    }
}

/// Text announced when a session goes away, whichever path removed it.
fn departure_notice(name: &str) -> String {
    format!("{name} left the chat")
}

fn encode_backlog(backlog: &[ControlEvent]) -> Vec<u8> {
    let mut encoded = Vec::new();
    for event in backlog {
        match Frame::Control(event.clone()).encode() {
            Ok(frame) => encoded.extend_from_slice(&frame),
            Err(error) => warn!(?error, "skipping unencodable control event in replay"),
        }
    }
    encoded
}
