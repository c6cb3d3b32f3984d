use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hubtunnel_frame::{FrameError, FrameReader, FrameWriter, HubMessage, InvocationMessage};
use hubtunnel_transport::{Connector, TunnelStream};
use parking_lot::Mutex;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionConfig, ReconnectPolicy};
use crate::error::{ConnectionError, Result};
use crate::events::ConnectionEvents;
use crate::handler::{Handler, Subscription, Subscriptions};
use crate::handshake::handshake_client;
use crate::id::{ConnectionId, InvocationIds};
use crate::pending::PendingInvocations;
use crate::state::ConnectionState;

/// Error reported when the server stays silent past the server timeout.
pub const SERVER_TIMEOUT_MESSAGE: &str =
    "Server timeout elapsed without receiving a message from the server.";

type Reader = FrameReader<ReadHalf<TunnelStream>>;
type Writer = FrameWriter<WriteHalf<TunnelStream>>;

/// Client side of a hub connection.
///
/// Cloning is cheap; clones share the same connection. Background tasks
/// keep the connection alive while it runs, so call [`dispose`](Self::dispose)
/// to release it.
#[derive(Clone)]
pub struct HubConnection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    events: Arc<dyn ConnectionEvents>,
    state: Mutex<ConnectionState>,
    reconnect_policy: Mutex<ReconnectPolicy>,
    /// Serializes start, stop, dispose and reconnect attempts.
    lifecycle: tokio::sync::Mutex<()>,
    /// Single writer: a whole frame is written while this is held.
    writer: tokio::sync::Mutex<Option<Writer>>,
    pending: Mutex<PendingInvocations>,
    subscriptions: Mutex<Subscriptions>,
    invocation_ids: InvocationIds,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    reconnect_abort: Mutex<CancellationToken>,
    disposed: CancellationToken,
}

/// One connected transport and the tasks reading it.
#[derive(Clone)]
struct Session {
    generation: u64,
    shutdown: CancellationToken,
}

/// Why a session ended.
struct Loss {
    error: Option<String>,
    allow_reconnect: bool,
}

impl HubConnection {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
        events: Arc<dyn ConnectionEvents>,
    ) -> Self {
        let id = ConnectionId::next();
        debug!(connection = %id, endpoint = %connector.describe(), "created hub connection");
        let reconnect_policy = Mutex::new(config.reconnect.clone());
        Self {
            inner: Arc::new(Inner {
                id,
                connector,
                config,
                events,
                state: Mutex::new(ConnectionState::Created),
                reconnect_policy,
                lifecycle: tokio::sync::Mutex::new(()),
                writer: tokio::sync::Mutex::new(None),
                pending: Mutex::new(PendingInvocations::default()),
                subscriptions: Mutex::new(Subscriptions::default()),
                invocation_ids: InvocationIds::default(),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnect_abort: Mutex::new(CancellationToken::new()),
                disposed: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn endpoint(&self) -> String {
        self.inner.connector.describe()
    }

    /// Replace the reconnect policy. Only allowed before the first start.
    pub fn set_reconnect_policy(&self, policy: ReconnectPolicy) -> Result<()> {
        let state = self.inner.state.lock();
        state.ensure_live()?;
        if *state != ConnectionState::Created {
            return Err(ConnectionError::InvalidState {
                operation: "set reconnect policy",
                state: *state,
            });
        }
        *self.inner.reconnect_policy.lock() = policy;
        Ok(())
    }

    /// Connect, handshake and start the background tasks.
    ///
    /// On failure the connection returns to `Stopped` and may be started again.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.lock_lifecycle(cancel).await?;

        {
            let mut state = inner.state.lock();
            state.ensure_startable()?;
            *state = ConnectionState::Starting;
        }
        info!(connection = %inner.id, endpoint = %inner.connector.describe(), "starting");

        let result = match inner.open_transport(cancel).await {
            Ok((reader, writer)) => inner.activate(reader, writer, ConnectionState::Starting).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                info!(connection = %inner.id, "started");
                Ok(())
            }
            Err(err) => {
                let mut state = inner.state.lock();
                if *state == ConnectionState::Starting {
                    *state = ConnectionState::Stopped;
                }
                warn!(connection = %inner.id, error = %err, "start failed");
                Err(err)
            }
        }
    }

    /// Stop a running connection. A no-op when it is not running.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        let reconnecting = *inner.state.lock() == ConnectionState::Reconnecting;
        inner.reconnect_abort.lock().cancel();
        // An aborted reconnect loop leaves the state to this call, so from
        // here on only disposal may interrupt it.
        let _guard = if reconnecting {
            inner.lock_lifecycle(&CancellationToken::new()).await?
        } else {
            inner.lock_lifecycle(cancel).await?
        };

        {
            let mut state = inner.state.lock();
            state.ensure_live()?;
            match *state {
                ConnectionState::Created | ConnectionState::Stopped => return Ok(()),
                ConnectionState::Started | ConnectionState::Reconnecting => {
                    *state = ConnectionState::Stopping;
                }
                other => {
                    return Err(ConnectionError::InvalidState {
                        operation: "stop",
                        state: other,
                    })
                }
            }
        }

        inner.teardown(|| ConnectionError::Closed(None)).await;
        {
            let mut state = inner.state.lock();
            if *state == ConnectionState::Stopping {
                *state = ConnectionState::Stopped;
            }
        }
        info!(connection = %inner.id, "stopped");
        inner.notify_closed(None).await;
        Ok(())
    }

    /// Tear everything down. Idempotent; later calls return `Ok` at once.
    ///
    /// Pending invocations fail with [`ConnectionError::Disposed`]. If the
    /// connection was running, `closed` fires once the teardown is done.
    pub async fn dispose(&self) -> Result<()> {
        let inner = &self.inner;
        let was_running = {
            let mut state = inner.state.lock();
            if state.is_disposed() {
                return Ok(());
            }
            let previous = std::mem::replace(&mut *state, ConnectionState::Disposing);
            matches!(
                previous,
                ConnectionState::Starting | ConnectionState::Started | ConnectionState::Reconnecting
            )
        };
        inner.disposed.cancel();
        inner.reconnect_abort.lock().cancel();

        let _guard = inner.lifecycle.lock().await;
        inner.teardown(|| ConnectionError::Disposed).await;
        inner.subscriptions.lock().clear();
        *inner.state.lock() = ConnectionState::Disposed;
        info!(connection = %inner.id, "disposed");

        if was_running {
            inner.notify_closed(None).await;
        }
        Ok(())
    }

    /// Invoke a hub method and wait for its completion.
    ///
    /// `arguments` is a MessagePack array. Returns the raw MessagePack result,
    /// or `None` for a method without a return value. Cancelling stops the
    /// wait; the hub is not told.
    pub async fn invoke(
        &self,
        target: &str,
        arguments: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>> {
        let inner = &self.inner;
        inner.state.lock().ensure_started("invoke")?;

        let invocation_id = inner.invocation_ids.next();
        let completion = inner.pending.lock().insert(invocation_id.clone());
        let message = InvocationMessage::new(target, arguments).with_invocation_id(&invocation_id);

        if let Err(err) = inner.write(&message.into(), cancel).await {
            inner.pending.lock().remove(&invocation_id);
            return Err(err);
        }
        trace!(connection = %inner.id, target, invocation_id, "invocation sent");

        tokio::select! {
            _ = cancel.cancelled() => {
                inner.pending.lock().remove(&invocation_id);
                debug!(connection = %inner.id, target, invocation_id, "invocation canceled");
                Err(ConnectionError::Canceled)
            }
            result = completion => {
                result.unwrap_or(Err(ConnectionError::Closed(None)))
            }
        }
    }

    /// Invoke a hub method without waiting for a result.
    pub async fn send(
        &self,
        target: &str,
        arguments: Bytes,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let inner = &self.inner;
        inner.state.lock().ensure_started("send")?;
        inner
            .write(&InvocationMessage::new(target, arguments).into(), cancel)
            .await?;
        trace!(connection = %inner.id, target, "send complete");
        Ok(())
    }

    /// Register `handler` for invocations of `method` from the hub.
    pub fn on(&self, method: &str, handler: Arc<dyn Handler>) -> Result<Subscription> {
        self.inner.state.lock().ensure_started("subscribe")?;
        let subscription = self.inner.subscriptions.lock().add(method, handler);
        debug!(connection = %self.inner.id, method, "handler registered");
        Ok(subscription)
    }

    /// Remove every handler for `method`, returning how many were removed.
    pub fn remove(&self, method: &str) -> Result<usize> {
        self.inner.state.lock().ensure_live()?;
        Ok(self.inner.subscriptions.lock().remove_all(method))
    }

    /// Remove a single registration.
    pub fn remove_subscription(&self, subscription: &Subscription) -> Result<bool> {
        self.inner.state.lock().ensure_live()?;
        Ok(self.inner.subscriptions.lock().remove(subscription))
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("endpoint", &self.inner.connector.describe())
            .finish()
    }
}

impl Inner {
    async fn lock_lifecycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = self.disposed.cancelled() => Err(ConnectionError::Disposed),
            _ = cancel.cancelled() => Err(ConnectionError::Canceled),
            guard = self.lifecycle.lock() => Ok(guard),
        }
    }

    /// Connect and handshake. Nothing is installed yet.
    async fn open_transport(&self, cancel: &CancellationToken) -> Result<(Reader, Writer)> {
        let open = async {
            let stream = self.connector.connect().await?;
            debug!(
                connection = %self.id,
                transport = stream.transport_name(),
                peer = stream.peer(),
                "transport connected"
            );
            let (read, write) = tokio::io::split(stream);
            let mut reader = FrameReader::with_config(read, self.config.frame.clone());
            let mut writer = FrameWriter::with_config(write, self.config.frame.clone());
            handshake_client(&mut reader, &mut writer, &self.config.handshake).await?;
            Ok((reader, writer))
        };

        tokio::select! {
            biased;
            _ = self.disposed.cancelled() => Err(ConnectionError::Disposed),
            _ = cancel.cancelled() => Err(ConnectionError::Canceled),
            result = open => result,
        }
    }

    /// Install a freshly opened transport and enter `Started`, provided the
    /// state is still `from`.
    async fn activate(
        self: &Arc<Self>,
        reader: Reader,
        writer: Writer,
        from: ConnectionState,
    ) -> Result<()> {
        *self.writer.lock().await = Some(writer);
        let session = Session {
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
            shutdown: CancellationToken::new(),
        };

        let installed = {
            let mut state = self.state.lock();
            if *state == from {
                *state = ConnectionState::Started;
                *self.session.lock() = Some(session.clone());
                Ok(())
            } else {
                state.ensure_live().and(Err(ConnectionError::Canceled))
            }
        };
        if let Err(err) = installed {
            self.writer.lock().await.take();
            return Err(err);
        }

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(self).read_loop(session.clone(), reader, dispatch_tx));
        tokio::spawn(Arc::clone(self).dispatch_loop(session.shutdown.clone(), dispatch_rx));
        tokio::spawn(Arc::clone(self).keep_alive_loop(session.shutdown));
        Ok(())
    }

    async fn write(&self, message: &HubMessage, cancel: &CancellationToken) -> Result<()> {
        let mut guard = tokio::select! {
            biased;
            _ = self.disposed.cancelled() => return Err(ConnectionError::Disposed),
            _ = cancel.cancelled() => return Err(ConnectionError::Canceled),
            guard = self.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(ConnectionError::Closed(None))?;
        writer.write_message(message).await?;
        Ok(())
    }

    /// Drop the current session and fail pending invocations.
    async fn teardown(&self, failure: impl Fn() -> ConnectionError) {
        if let Some(session) = self.session.lock().take() {
            session.shutdown.cancel();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(err) = writer.shutdown().await {
                trace!(connection = %self.id, error = %err, "transport shutdown failed");
            }
        }
        let failed = self.pending.lock().fail_all(failure);
        if failed > 0 {
            debug!(connection = %self.id, failed, "failed pending invocations");
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        session: Session,
        mut reader: Reader,
        dispatch: mpsc::UnboundedSender<InvocationMessage>,
    ) {
        let server_timeout = self.config.server_timeout;
        let loss = loop {
            let next = tokio::select! {
                _ = session.shutdown.cancelled() => return,
                next = tokio::time::timeout(server_timeout, reader.read_message()) => next,
            };

            let message = match next {
                Ok(Ok(message)) => message,
                Ok(Err(FrameError::ConnectionClosed)) => {
                    break Loss {
                        error: None,
                        allow_reconnect: true,
                    }
                }
                Ok(Err(err)) => {
                    break Loss {
                        error: Some(err.to_string()),
                        allow_reconnect: true,
                    }
                }
                Err(_elapsed) => {
                    break Loss {
                        error: Some(SERVER_TIMEOUT_MESSAGE.to_string()),
                        allow_reconnect: true,
                    }
                }
            };

            match message {
                HubMessage::Invocation(invocation) => {
                    if dispatch.send(invocation).is_err() {
                        return;
                    }
                }
                HubMessage::Completion(completion) => {
                    let invocation_id = completion.invocation_id.clone();
                    if !self.pending.lock().complete(completion) {
                        debug!(connection = %self.id, invocation_id, "completion for unknown invocation");
                    }
                }
                HubMessage::Ping => trace!(connection = %self.id, "ping"),
                HubMessage::CancelInvocation(cancel) => {
                    debug!(connection = %self.id, invocation_id = cancel.invocation_id, "ignoring cancel invocation");
                }
                HubMessage::Close(close) => {
                    debug!(
                        connection = %self.id,
                        error = close.error.as_deref().unwrap_or(""),
                        allow_reconnect = close.allow_reconnect,
                        "server closed the connection"
                    );
                    break Loss {
                        error: close.error,
                        allow_reconnect: close.allow_reconnect,
                    };
                }
            }
        };

        self.connection_lost(session.generation, loss).await;
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        shutdown: CancellationToken,
        mut invocations: mpsc::UnboundedReceiver<InvocationMessage>,
    ) {
        loop {
            let invocation = tokio::select! {
                _ = shutdown.cancelled() => return,
                next = invocations.recv() => match next {
                    Some(invocation) => invocation,
                    None => return,
                },
            };

            let registrations = self.subscriptions.lock().handlers(&invocation.target);
            if registrations.is_empty() {
                warn!(connection = %self.id, target = %invocation.target, "no handler registered");
                continue;
            }

            for (id, _) in registrations {
                // Registrations removed while an earlier handler held its ack
                // are skipped.
                let Some(handler) = self.subscriptions.lock().current(&invocation.target, id)
                else {
                    trace!(connection = %self.id, target = %invocation.target, "handler removed before dispatch");
                    continue;
                };
                let ack = handler.invoke(invocation.arguments.clone());
                let outcome = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    outcome = ack.wait() => outcome,
                };
                if let Err(reason) = outcome {
                    let err = ConnectionError::Dispatch {
                        target: invocation.target.clone(),
                        reason,
                    };
                    warn!(connection = %self.id, error = %err, "subscription dispatch failed");
                }
            }
        }
    }

    async fn keep_alive_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let interval = self.config.keep_alive_interval;
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.write(&HubMessage::Ping, &shutdown).await {
                debug!(connection = %self.id, error = %err, "keepalive stopped");
                return;
            }
        }
    }

    async fn connection_lost(self: Arc<Self>, generation: u64, loss: Loss) {
        let reconnect = {
            let mut state = self.state.lock();
            let current = self.session.lock().as_ref().map(|s| s.generation);
            if *state != ConnectionState::Started || current != Some(generation) {
                return;
            }
            let policy_enabled = self.reconnect_policy.lock().is_enabled();
            if loss.allow_reconnect && policy_enabled {
                *state = ConnectionState::Reconnecting;
                let abort = CancellationToken::new();
                *self.reconnect_abort.lock() = abort.clone();
                Some(abort)
            } else {
                *state = ConnectionState::Stopped;
                None
            }
        };

        let error = loss.error;
        warn!(
            connection = %self.id,
            error = error.as_deref().unwrap_or("connection closed"),
            reconnecting = reconnect.is_some(),
            "connection lost"
        );
        let closed_with = error.clone();
        self.teardown(move || ConnectionError::Closed(closed_with.clone()))
            .await;

        match reconnect {
            Some(abort) => self.reconnect(error, abort).await,
            None => self.notify_closed(error.as_deref()).await,
        }
    }

    /// Boxed to break the type cycle through the session tasks.
    fn reconnect(
        self: Arc<Self>,
        error: Option<String>,
        abort: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self.reconnect_attempts(error, abort))
    }

    async fn reconnect_attempts(self: Arc<Self>, error: Option<String>, abort: CancellationToken) {
        if let Err(reason) = self.events.reconnecting(error.as_deref()).wait().await {
            warn!(connection = %self.id, reason, "reconnecting handler failed");
        }

        let policy = self.reconnect_policy.lock().clone();
        let mut last_error = error;
        for (attempt, delay) in policy.delays().iter().copied().enumerate() {
            tokio::select! {
                _ = abort.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let Ok(guard) = self.lock_lifecycle(&abort).await else {
                return;
            };
            if *self.state.lock() != ConnectionState::Reconnecting {
                return;
            }

            info!(connection = %self.id, attempt = attempt + 1, "reconnect attempt");
            let result = match self.open_transport(&abort).await {
                Ok((reader, writer)) => {
                    self.activate(reader, writer, ConnectionState::Reconnecting)
                        .await
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(()) => {
                    drop(guard);
                    info!(connection = %self.id, attempt = attempt + 1, "reconnected");
                    if let Err(reason) = self.events.reconnected().wait().await {
                        warn!(connection = %self.id, reason, "reconnected handler failed");
                    }
                    return;
                }
                Err(ConnectionError::Canceled | ConnectionError::Disposed) => return,
                Err(err) => {
                    warn!(connection = %self.id, attempt = attempt + 1, error = %err, "reconnect attempt failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Reconnecting {
                return;
            }
            *state = ConnectionState::Stopped;
        }
        warn!(connection = %self.id, attempts = policy.delays().len(), "reconnect attempts exhausted");
        self.notify_closed(last_error.as_deref()).await;
    }

    async fn notify_closed(&self, error: Option<&str>) {
        if let Err(reason) = self.events.closed(error).wait().await {
            warn!(connection = %self.id, reason, "closed handler failed");
        }
    }
}
