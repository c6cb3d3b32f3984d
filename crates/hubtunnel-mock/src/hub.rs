use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use hubtunnel_conn::{handshake_server, ConnectionError, HandshakeConfig};
use hubtunnel_frame::args::nth_argument;
use hubtunnel_frame::{
    encode_message, CloseMessage, FrameError, FrameReader, FrameWriter, HubMessage,
    InvocationMessage,
};
use hubtunnel_transport::{Connector, TransportError, TunnelStream};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

use crate::completion::{encode_completion, Reply};

/// Decides the reply for each invocation that expects one.
pub type Responder = Arc<dyn Fn(&InvocationMessage) -> Reply + Send + Sync>;

/// Buffer size of the in-memory pipes handed out by [`MockConnector`].
const PIPE_BUFFER: usize = 64 * 1024;

/// Answer with the first argument, `Void` when there is none.
pub fn echo_first_argument(invocation: &InvocationMessage) -> Reply {
    match nth_argument(&invocation.arguments, 0) {
        Ok(Some(value)) => Reply::Result(value),
        Ok(None) => Reply::Void,
        Err(err) => Reply::Error(err.to_string()),
    }
}

enum Command {
    Send(HubMessage),
    Disconnect,
}

struct Shared {
    responder: Responder,
    received: Mutex<Vec<InvocationMessage>>,
    received_changed: Notify,
    peers: Mutex<Vec<mpsc::UnboundedSender<Command>>>,
    accepted: AtomicUsize,
    refuse: AtomicUsize,
}

/// Server side of the hub protocol, driven in-process.
///
/// Completes the handshake, records every invocation, answers those with an
/// invocation id through its [`Responder`], and can push invocations and
/// Close messages to connected clients.
#[derive(Clone)]
pub struct MockHub {
    shared: Arc<Shared>,
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHub {
    /// A hub that echoes the first argument of every invocation.
    pub fn new() -> Self {
        Self::with_responder(Arc::new(echo_first_argument))
    }

    pub fn with_responder(responder: Responder) -> Self {
        Self {
            shared: Arc::new(Shared {
                responder,
                received: Mutex::new(Vec::new()),
                received_changed: Notify::new(),
                peers: Mutex::new(Vec::new()),
                accepted: AtomicUsize::new(0),
                refuse: AtomicUsize::new(0),
            }),
        }
    }

    /// Connector producing a fresh in-memory connection to this hub per call.
    pub fn connector(&self) -> MockConnector {
        MockConnector { hub: self.clone() }
    }

    /// Serve one client until it disconnects or the hub drops it.
    pub async fn serve(&self, stream: TunnelStream) -> Result<(), ConnectionError> {
        // registered before the handshake so commands issued right after the
        // client's start() are queued, not lost
        let (tx, mut commands) = mpsc::unbounded_channel();
        {
            let mut peers = self.shared.peers.lock();
            peers.retain(|peer| !peer.is_closed());
            peers.push(tx);
        }
        let connection = self.shared.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(connection, peer = stream.peer(), "mock hub accepted client");

        let (read, write) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);
        handshake_server(&mut reader, &mut writer, &HandshakeConfig::default()).await?;
        let mut raw = writer.into_inner();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        let mut frame = BytesMut::new();
                        encode_message(&message, &mut frame)?;
                        raw.write_all(&frame).await.map_err(FrameError::from)?;
                        if matches!(message, HubMessage::Close(_)) {
                            return Ok(());
                        }
                    }
                    Some(Command::Disconnect) | None => return Ok(()),
                },
                incoming = reader.read_message() => match incoming {
                    Ok(HubMessage::Invocation(invocation)) => {
                        let reply = invocation
                            .invocation_id
                            .as_deref()
                            .map(|id| encode_completion(id, &(self.shared.responder)(&invocation)))
                            .transpose()?
                            .flatten();
                        self.record(invocation);
                        if let Some(frame) = reply {
                            raw.write_all(&frame).await.map_err(FrameError::from)?;
                        }
                    }
                    Ok(HubMessage::Ping) => trace!(connection, "mock hub got ping"),
                    Ok(other) => debug!(connection, kind = other.kind().name(), "mock hub ignored message"),
                    Err(FrameError::ConnectionClosed) => return Ok(()),
                    Err(err) => return Err(err.into()),
                },
            }
        }
    }

    fn record(&self, invocation: InvocationMessage) {
        self.shared.received.lock().push(invocation);
        self.shared.received_changed.notify_waiters();
    }

    /// Every invocation received so far, in arrival order.
    pub fn received(&self) -> Vec<InvocationMessage> {
        self.shared.received.lock().clone()
    }

    /// Wait until at least `count` invocations have arrived.
    pub async fn wait_for_invocations(&self, count: usize) -> Vec<InvocationMessage> {
        loop {
            let notified = self.shared.received_changed.notified();
            {
                let received = self.shared.received.lock();
                if received.len() >= count {
                    return received.clone();
                }
            }
            notified.await;
        }
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Invoke `target` on every connected client. Returns how many were reached.
    pub fn push_invocation(&self, target: &str, arguments: impl Into<Bytes>) -> usize {
        let arguments = arguments.into();
        self.broadcast(|| Command::Send(InvocationMessage::new(target, arguments.clone()).into()))
    }

    /// Send a Close message to every connected client and drop them.
    pub fn close(&self, error: Option<&str>, allow_reconnect: bool) -> usize {
        self.broadcast(|| {
            Command::Send(HubMessage::Close(CloseMessage {
                error: error.map(str::to_string),
                allow_reconnect,
            }))
        })
    }

    /// Drop every connected client without a Close message.
    pub fn disconnect(&self) -> usize {
        self.broadcast(|| Command::Disconnect)
    }

    /// Make the next `count` connect attempts through [`MockConnector`] fail.
    pub fn refuse_next(&self, count: usize) {
        self.shared.refuse.store(count, Ordering::SeqCst);
    }

    fn broadcast(&self, command: impl Fn() -> Command) -> usize {
        let mut peers = self.shared.peers.lock();
        peers.retain(|peer| peer.send(command()).is_ok());
        peers.len()
    }

    fn take_refusal(&self) -> bool {
        self.shared
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

/// [`Connector`] that serves each new connection from a [`MockHub`].
#[derive(Clone)]
pub struct MockConnector {
    hub: MockHub,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> hubtunnel_transport::Result<TunnelStream> {
        if self.hub.take_refusal() {
            return Err(TransportError::Connect {
                endpoint: self.describe(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "mock hub refused"),
            });
        }

        let (client, server) = TunnelStream::pair(PIPE_BUFFER);
        let hub = self.hub.clone();
        tokio::spawn(async move {
            if let Err(err) = hub.serve(server).await {
                debug!(error = %err, "mock hub session ended with error");
            }
        });
        Ok(client)
    }

    fn describe(&self) -> String {
        "mock-hub".to_string()
    }
}
