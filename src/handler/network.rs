//! The connection state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinError;

use crate::decode::DecodePipeline;
use crate::error::{ConfigurationError, Error};
use crate::handler::context::HandlerContext;
use crate::handler::dispatcher::ConnectionDispatcher;
use crate::handler::heartbeat;
use crate::handler::state::{ConnectAttempt, State, StateData, StateKind};
use crate::net::{Connection, ConnectionId, IncomingPacket, InboundSink, OutgoingPacket, PacketListeners, ServerAddress};
use crate::observability::metrics;
use crate::pipeline::ExceptionCollector;
use crate::sso::LoginOutcome;

/// Owns at most one connection and moves it through its lifecycle.
///
/// ```text
/// Initialized ─resume─→ Connecting ─ok─→ Loading ─→ Ok
///                          │                 │      │
///                        fail            lost (disconnect, heartbeat,
///                          ↓                   forced offline)
///                        Closed ←─close─  ConnectionLost ─resume─→ Connecting
/// ```
///
/// Cloning yields another handle onto the same handler.
#[derive(Clone)]
pub struct NetworkHandler {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    context: HandlerContext,
    state: ArcSwap<State>,
    transitions: Mutex<()>,
    next_id: AtomicU64,
    kinds: watch::Sender<StateKind>,
    packets: broadcast::Sender<IncomingPacket>,
}

impl NetworkHandler {
    pub fn new(context: HandlerContext) -> Self {
        let (kinds, _) = watch::channel(StateKind::Initialized);
        let (packets, _) = broadcast::channel(context.decode.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                context,
                state: ArcSwap::from_pointee(State::new(0, StateData::Initialized)),
                transitions: Mutex::new(()),
                next_id: AtomicU64::new(1),
                kinds,
                packets,
            }),
        }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.inner.context
    }

    /// The current state. Never stale: reads the single installed state.
    pub fn state(&self) -> StateKind {
        self.inner.state.load().kind()
    }

    /// Full view of the current state.
    pub fn current(&self) -> Arc<State> {
        self.inner.state.load_full()
    }

    /// Why the handler is `ConnectionLost` or `Closed`, if it is.
    pub fn last_failure(&self) -> Option<Error> {
        self.inner.state.load().cause().cloned()
    }

    /// Failures the current connection's login recovered from: superseded
    /// fast logins and rejected credentials that a later attempt fixed.
    /// Empty unless the handler is `Ok`.
    pub fn recovered_failures(&self) -> Vec<Error> {
        self.inner.state.load().recovered().to_vec()
    }

    pub fn state_changes(&self) -> watch::Receiver<StateKind> {
        self.inner.kinds.subscribe()
    }

    /// Every packet decoded from now on, across reconnects.
    pub fn subscribe_packets(&self) -> broadcast::Receiver<IncomingPacket> {
        self.inner.packets.subscribe()
    }

    /// Bring the handler to `Ok`.
    ///
    /// Concurrent callers share one connect attempt. Fails with the terminal
    /// cause once the handler is `Closed`.
    pub async fn resume_connection(&self) -> Result<(), Error> {
        loop {
            let state = self.inner.state.load_full();
            let kind = state.kind();
            self.inner.context.observer.before_state_resume(kind);

            let step = self.inner.resume_from(&state).await;

            let result = step.as_ref().map(|_| ()).map_err(Clone::clone);
            self.inner.context.observer.after_state_resume(kind, &result);
            match step {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(error) => return Err(error),
            }
        }
    }

    /// Send `packet` on the live connection.
    ///
    /// While `Connecting` this waits for the attempt and retries once.
    pub async fn send_packet(&self, packet: &OutgoingPacket) -> Result<(), Error> {
        let connection = self.inner.live_connection().await?;
        connection.send(packet).await?;
        Ok(())
    }

    /// Send `packet` and wait for the response with the same command and
    /// sequence, resending up to `attempts` times.
    ///
    /// On failure the last timeout is returned with the earlier ones
    /// suppressed.
    pub async fn send_and_expect(
        &self,
        packet: &OutgoingPacket,
        timeout: Duration,
        attempts: u32,
    ) -> Result<IncomingPacket, Error> {
        let connection = self.inner.live_connection().await?;
        let mut listener = connection.listen(&packet.command, packet.sequence);
        let mut timeouts = ExceptionCollector::new();
        let mut attempt = 1;

        loop {
            connection.send(packet).await?;
            match tokio::time::timeout(timeout, listener.recv()).await {
                Ok(response) => return response,
                Err(_) => {
                    let error = Error::Timeout {
                        command: packet.command.clone(),
                        sequence: packet.sequence,
                        timeout,
                    };
                    if attempt >= attempts {
                        return Err(Error::from_collected(timeouts.collect_get(error)));
                    }
                    tracing::debug!(command = %packet.command, sequence = packet.sequence, attempt, "No response, resending");
                    timeouts.collect(error);
                    attempt += 1;
                }
            }
        }
    }

    /// Move to `Closed` and release the connection. Idempotent; returns the
    /// terminal cause, which is the first caller's.
    ///
    /// A connect attempt still in `Connecting` or `Loading` is aborted, so
    /// its waiters fail with `Cancelled`.
    pub fn close(&self, cause: Option<Error>) -> Option<Error> {
        let closed = self
            .inner
            .transition(|_, _| Some(StateData::Closed { cause }));

        match closed {
            Some((previous, current)) => {
                if let Some(attempt) = previous.attempt() {
                    attempt.abort();
                }
                match current.cause() {
                    Some(cause) => tracing::info!(cause = %cause, "Network handler closed"),
                    None => tracing::info!("Network handler closed"),
                }
                current.cause().cloned()
            }
            None => self.last_failure(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StateKind::Closed
    }
}

impl std::fmt::Debug for NetworkHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHandler")
            .field("state", &*self.inner.state.load())
            .finish()
    }
}

impl Inner {
    /// Install the state built by `build`, unless the handler is `Closed` or
    /// `build` declines by returning `None`. Returns the replaced and the
    /// installed state.
    pub(crate) fn transition<F>(&self, build: F) -> Option<(Arc<State>, Arc<State>)>
    where
        F: FnOnce(&State, u64) -> Option<StateData>,
    {
        let _guard = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.state.load_full();
        if previous.kind() == StateKind::Closed {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let next = Arc::new(State::new(id, build(&previous, id)?));
        self.state.store(Arc::clone(&next));
        previous.release(&next);

        let (from, to) = (previous.kind(), next.kind());
        self.kinds.send_replace(to);
        metrics::record_state_transition(from, to);
        self.context.observer.state_changed(from, to);
        Some((previous, next))
    }

    /// Transition only if state `expected` is still installed.
    fn transition_if<F>(&self, expected: u64, build: F) -> Option<Arc<State>>
    where
        F: FnOnce(&State) -> StateData,
    {
        self.transition(|current, _| (current.id() == expected).then(|| build(current)))
            .map(|(_, next)| next)
    }

    /// One dispatch of `resume_connection`; `Ok(true)` once `Ok` is reached.
    async fn resume_from(self: &Arc<Self>, state: &State) -> Result<bool, Error> {
        match state.data() {
            StateData::Initialized | StateData::ConnectionLost { .. } => match self.begin_connecting(state.id()) {
                Some(attempt) => attempt.await.map(|()| true),
                None => Ok(false),
            },
            StateData::Connecting { attempt, .. } => attempt.clone().await.map(|()| true),
            StateData::Loading { .. } => {
                let mut kinds = self.kinds.subscribe();
                kinds
                    .wait_for(|kind| *kind != StateKind::Loading)
                    .await
                    .map_err(|_| Error::Closed(None))?;
                Ok(false)
            }
            StateData::Ok { .. } => Ok(true),
            StateData::Closed { cause } => Err(cause.clone().unwrap_or(Error::Closed(None))),
        }
    }

    async fn live_connection(self: &Arc<Self>) -> Result<Arc<Connection>, Error> {
        let mut waited = false;
        loop {
            let state = self.state.load_full();
            match state.data() {
                StateData::Initialized => return Err(Error::NotConnected),
                StateData::Connecting { attempt, .. } if !waited => {
                    attempt.clone().await?;
                    waited = true;
                }
                StateData::Connecting { .. } => return Err(Error::NotConnected),
                StateData::Loading { connection, .. } | StateData::Ok { connection, .. } => {
                    return Ok(Arc::clone(connection));
                }
                StateData::ConnectionLost { cause, .. } => {
                    return Err(Error::ConnectionLost(Box::new(cause.clone())));
                }
                StateData::Closed { cause } => return Err(Error::Closed(cause.clone().map(Box::new))),
            }
        }
    }

    /// Replace state `expected` with a fresh `Connecting` and start its
    /// attempt.
    fn begin_connecting(self: &Arc<Self>, expected: u64) -> Option<ConnectAttempt> {
        let (_, next) = self.transition(|current, id| {
            if current.id() != expected {
                return None;
            }
            let previous = current.cause().cloned();
            let task = tokio::spawn(Arc::clone(self).connect(id, previous));
            let abort = Arc::new(task.abort_handle());
            let attempt = task
                .map(|joined| joined.unwrap_or_else(|e| Err(join_failure(e))))
                .boxed()
                .shared();
            Some(StateData::Connecting { attempt, abort })
        })?;

        match next.data() {
            StateData::Connecting { attempt, .. } => Some(attempt.clone()),
            _ => None,
        }
    }

    /// Body of the connect attempt installed as state `connecting_id`.
    async fn connect(self: Arc<Self>, connecting_id: u64, previous: Option<Error>) -> Result<(), Error> {
        let mut failures = ExceptionCollector::seeded(previous);
        // the state this attempt installed last; only that one may be closed
        let mut installed = connecting_id;
        match self.establish(&mut installed).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let cause = Error::from_collected(failures.collect_get(error));
                tracing::warn!(error = %cause, "Connect attempt failed");
                let closed = self.transition_if(installed, |_| StateData::Closed {
                    cause: Some(cause.clone()),
                });
                match closed {
                    Some(_) => Err(cause),
                    None => Err(self.superseded()),
                }
            }
        }
    }

    async fn establish(self: &Arc<Self>, installed: &mut u64) -> Result<(), Error> {
        let connection = self.open_connection().await?;
        let LoginOutcome { session, recovered } = self.context.sso.login(&connection, &self.context.budget).await?;

        let expected = *installed;
        let (_, loading) = self
            .transition(|current, _| match current.data() {
                StateData::Connecting { abort, .. } if current.id() == expected => Some(StateData::Loading {
                    connection: Arc::clone(&connection),
                    abort: Arc::clone(abort),
                }),
                _ => None,
            })
            .ok_or_else(|| self.superseded())?;
        *installed = loading.id();

        if let Some(initializer) = &self.context.initializer {
            initializer.initialize(&connection, &session).await?;
        }

        self.transition_if(*installed, |_| StateData::Ok {
            heartbeat: heartbeat::spawn(
                Arc::downgrade(self),
                &connection,
                Arc::clone(&self.context.protocol),
                Arc::clone(&self.context.sequences),
                &self.context.heartbeat,
            ),
            connection: Arc::clone(&connection),
            recovered,
        })
        .ok_or_else(|| self.superseded())?;

        self.context.budget.reset();
        tracing::info!(
            connection_id = %connection.id(),
            address = %connection.address(),
            account = %session.account,
            "Network handler online"
        );
        Ok(())
    }

    /// Try each server of the current round once.
    async fn open_connection(self: &Arc<Self>) -> Result<Arc<Connection>, Error> {
        let mut failures = ExceptionCollector::new();
        while let Some(address) = self.context.servers.poll_current() {
            match self.connect_to(&address).await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    tracing::warn!(address = %address, error = %error, "Server unreachable");
                    failures.collect(error);
                }
            }
        }
        self.context.servers.refresh();

        match failures.throw_last() {
            Some(collected) => Err(Error::from_collected(collected)),
            None => Err(ConfigurationError::Invalid("no server addresses".into()).into()),
        }
    }

    async fn connect_to(self: &Arc<Self>, address: &ServerAddress) -> Result<Arc<Connection>, Error> {
        let id = ConnectionId::new();
        let secret = Arc::new(ArcSwapOption::empty());
        let listeners = Arc::new(PacketListeners::new());

        let dispatcher = ConnectionDispatcher::new(
            Arc::downgrade(self),
            id,
            Arc::clone(&listeners),
            self.packets.clone(),
            Arc::clone(&self.context.protocol),
        );
        let pipeline = DecodePipeline::spawn(
            self.context.decode.queue_capacity,
            Arc::clone(&self.context.codec),
            Arc::clone(&secret),
            Arc::new(dispatcher),
        );

        let handler = Arc::downgrade(self);
        let sink = InboundSink::new(pipeline.sender(), move |error| {
            if let Some(handler) = handler.upgrade() {
                handler.connection_lost(id, Error::Transport(error));
            }
        });

        let channel = self.context.transport.connect(address, sink).await?;
        tracing::info!(connection_id = %id, address = %address, "Connected");

        Ok(Arc::new(Connection::new(
            id,
            address.clone(),
            channel,
            pipeline,
            listeners,
            secret,
        )))
    }

    /// `Loading`/`Ok` on `connection` → `ConnectionLost(cause)`. Reports
    /// for any other connection are stale and ignored.
    pub(crate) fn connection_lost(&self, connection: ConnectionId, cause: Error) {
        let lost = self.transition(|current, _| match current.data() {
            StateData::Loading { connection: live, .. } | StateData::Ok { connection: live, .. }
                if live.id() == connection =>
            {
                Some(StateData::ConnectionLost {
                    cause: cause.clone(),
                    connection: Arc::clone(live),
                })
            }
            _ => None,
        });

        match lost {
            Some((_, current)) => {
                tracing::warn!(connection_id = %connection, cause = %cause, "Connection lost");
                if let Some(live) = current.connection() {
                    live.close_channel();
                }
            }
            None => {
                tracing::debug!(connection_id = %connection, cause = %cause, "Ignoring loss of stale connection");
            }
        }
    }

    /// What a connect attempt reports after another transition replaced it.
    fn superseded(&self) -> Error {
        let state = self.state.load();
        match state.data() {
            StateData::Closed { cause: Some(cause) } => cause.clone(),
            StateData::ConnectionLost { cause, .. } => Error::ConnectionLost(Box::new(cause.clone())),
            _ => Error::Cancelled("connect attempt superseded".into()),
        }
    }
}

fn join_failure(error: JoinError) -> Error {
    if error.is_cancelled() {
        Error::Cancelled("network handler closed".into())
    } else {
        Error::Cancelled(format!("connect attempt panicked: {error}"))
    }
}
