//! The server engine: lifecycle owner for every runtime component.
//!
//! `Engine` wires together the UDP listener thread, the session tracker and
//! its periodic sweep, the command dispatcher pool, and the mDNS advertiser,
//! and tears them down again in a bounded amount of time.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
//!                │            │
//!                └── Failed ◄─┘  (unrecoverable socket fault)
//! ```
//!
//! Everything observable about a running engine flows out of one
//! [`StatusEvent`] channel: state changes, session lifecycle, malformed
//! traffic, dropped or failed commands.  The binary pumps these into logs;
//! a future UI would pump them into a view.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::{Instant, SystemTime};

use buttonbox_core::{ServerIdentity, PROTOCOL_VERSION};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::dispatch_commands::{CommandDispatcher, InputExecutor};
use crate::application::track_sessions::{SessionEvent, SessionTracker};
use crate::infrastructure::network::advertiser::{
    AdvertiserState, MdnsBackend, ServiceAdvertiser,
};
use crate::infrastructure::network::transport::{
    bind_command_socket, start_packet_listener, ListenerContext, TransportError, TransportEvent,
};
use crate::infrastructure::storage::config::AppConfig;

/// Interval between session liveness sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the status event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Error type for engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` was called while the engine was already running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// The listener could not be brought up.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Coarse engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The listener hit an unrecoverable socket fault.  `stop` followed by
    /// `start` resets the engine.
    Failed,
}

/// A timestamped, leveled notification from the engine.
#[derive(Debug)]
pub struct StatusEvent {
    pub at: SystemTime,
    pub level: tracing::Level,
    pub body: EngineEvent,
}

impl StatusEvent {
    fn new(body: EngineEvent) -> Self {
        Self {
            at: SystemTime::now(),
            level: body.level(),
            body,
        }
    }
}

/// Everything the engine reports to its supervisor.
#[derive(Debug)]
pub enum EngineEvent {
    StateChanged {
        from: EngineState,
        to: EngineState,
    },
    Session(SessionEvent),
    MalformedPacket {
        src: SocketAddr,
        reason: String,
    },
    /// A fresh command was dropped because the dispatch queue was full.  Its
    /// sequence was rolled back out of the seen window, so the client's
    /// retransmission will be executed.
    CommandDropped {
        client_id: String,
        sequence: u64,
    },
    ExecutionFailed {
        client_id: String,
        sequence: u64,
        kind: &'static str,
        error: String,
    },
    AdvertiserChanged {
        state: AdvertiserState,
    },
    TransportFault {
        detail: String,
    },
}

impl EngineEvent {
    /// Severity the presentation layer should report this event at.
    fn level(&self) -> tracing::Level {
        match self {
            EngineEvent::Session(SessionEvent::WentStale { .. })
            | EngineEvent::MalformedPacket { .. }
            | EngineEvent::CommandDropped { .. } => tracing::Level::WARN,
            EngineEvent::AdvertiserChanged {
                state: AdvertiserState::Failed,
            } => tracing::Level::WARN,
            EngineEvent::ExecutionFailed { .. } | EngineEvent::TransportFault { .. } => {
                tracing::Level::ERROR
            }
            EngineEvent::StateChanged {
                to: EngineState::Failed,
                ..
            } => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

/// Owns every runtime component and the transitions between them.
pub struct Engine {
    config: AppConfig,
    server_id: Uuid,
    executor: Arc<dyn InputExecutor>,
    advertiser: ServiceAdvertiser,
    state: Arc<Mutex<EngineState>>,
    events: mpsc::Sender<StatusEvent>,

    // Populated while running.
    running: Option<Arc<AtomicBool>>,
    listener: Option<std::thread::JoinHandle<()>>,
    dispatcher: Option<CommandDispatcher>,
    sessions: Option<Arc<Mutex<SessionTracker>>>,
    identity: Option<ServerIdentity>,
    local_addr: Option<SocketAddr>,
    pumps: Vec<tokio::task::JoinHandle<()>>,
}

impl Engine {
    /// Creates a stopped engine.
    ///
    /// Returns the engine and the receiving end of its status event channel.
    /// The `server_id` is generated once here and survives restarts, so
    /// clients recognise the same server across rebinds.
    pub fn new(
        config: AppConfig,
        executor: Arc<dyn InputExecutor>,
        mdns_backend: Box<dyn MdnsBackend>,
    ) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = Self {
            config,
            server_id: Uuid::new_v4(),
            executor,
            advertiser: ServiceAdvertiser::new(mdns_backend),
            state: Arc::new(Mutex::new(EngineState::Stopped)),
            events,
            running: None,
            listener: None,
            dispatcher: None,
            sessions: None,
            identity: None,
            local_addr: None,
            pumps: Vec::new(),
        };
        (engine, events_rx)
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    /// Address the listener is bound to while running.  Useful when the
    /// configured port is `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Stable identifier advertised to clients.
    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    /// Binds the socket and brings up every component.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] on a double start and
    /// [`EngineError::Transport`] when the socket cannot be bound; in the
    /// latter case the engine stays `Stopped` and `start` can be retried.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if self.listener.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        self.set_state(EngineState::Starting);

        let socket = match bind_command_socket(
            &self.config.network.bind_address,
            self.config.network.port,
        ) {
            Ok(socket) => socket,
            Err(e) => {
                self.set_state(EngineState::Stopped);
                return Err(e.into());
            }
        };
        let local_addr = match socket.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                self.set_state(EngineState::Stopped);
                return Err(TransportError::Spawn(source).into());
            }
        };

        let identity = ServerIdentity {
            name: self.config.server.instance_name.clone(),
            port: local_addr.port(),
            protocol: PROTOCOL_VERSION,
            server_id: self.server_id,
        };

        let sessions = Arc::new(Mutex::new(SessionTracker::new(
            self.config.engine.stale_threshold(),
            self.config.engine.expiry_threshold(),
            buttonbox_core::protocol::window::DEFAULT_WINDOW_CAPACITY,
        )));

        let (dispatcher, failure_rx) = CommandDispatcher::new(
            self.config.engine.worker_pool_size,
            Arc::clone(&self.executor),
        );

        let running = Arc::new(AtomicBool::new(true));
        let context = ListenerContext {
            sessions: Arc::clone(&sessions),
            dispatch: dispatcher.handle(),
            identity: identity.clone(),
            ack_immediate: self.config.engine.ack_immediate,
        };
        let (transport_rx, listener) = match start_packet_listener(
            socket,
            context,
            Arc::clone(&running),
        ) {
            Ok(pair) => pair,
            Err(e) => {
                dispatcher.shutdown(Duration::from_millis(0)).await;
                self.set_state(EngineState::Stopped);
                return Err(e.into());
            }
        };

        self.pumps.push(spawn_transport_pump(
            transport_rx,
            self.events.clone(),
            Arc::clone(&self.state),
            Arc::clone(&running),
        ));
        self.pumps
            .push(spawn_failure_pump(failure_rx, self.events.clone()));
        self.pumps.push(spawn_sweep_task(
            Arc::clone(&sessions),
            self.events.clone(),
        ));

        if self.config.network.discovery_enabled {
            self.advertise(&identity);
        }

        self.running = Some(running);
        self.listener = Some(listener);
        self.dispatcher = Some(dispatcher);
        self.sessions = Some(sessions);
        self.identity = Some(identity);
        self.local_addr = Some(local_addr);

        self.set_state(EngineState::Running);
        info!("engine running on {local_addr}");
        Ok(())
    }

    /// Tears everything down.  Idempotent; completes within roughly the
    /// listener read timeout plus the configured shutdown grace.
    pub async fn stop(&mut self) {
        if self.listener.is_none() {
            self.set_state(EngineState::Stopped);
            return;
        }
        self.set_state(EngineState::Stopping);

        if self.advertiser.unregister().is_ok() {
            self.emit(EngineEvent::AdvertiserChanged {
                state: self.advertiser.state(),
            });
        }

        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Relaxed);
        }

        if let Some(listener) = self.listener.take() {
            let joined = tokio::task::spawn_blocking(move || listener.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("listener thread did not join cleanly");
            }
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown(self.config.engine.shutdown_grace()).await;
        }

        for pump in self.pumps.drain(..) {
            pump.abort();
        }

        self.sessions = None;
        self.identity = None;
        self.local_addr = None;

        self.set_state(EngineState::Stopped);
        info!("engine stopped");
    }

    /// Applies a new configuration, restarting only when the socket binding
    /// changed.
    ///
    /// - Port or bind address change: full stop/start cycle.
    /// - Liveness thresholds: applied in place, effective on the next sweep.
    /// - Discovery toggle or instance rename: advertiser updated in place.
    /// - Worker pool size and ACK ordering: recorded now, effective on the
    ///   next start.
    pub async fn apply_config(&mut self, new: AppConfig) -> Result<(), EngineError> {
        if self.listener.is_none() {
            self.config = new;
            return Ok(());
        }

        let rebind_needed = new.network.port != self.config.network.port
            || new.network.bind_address != self.config.network.bind_address;

        if rebind_needed {
            info!(
                "socket binding changed to {}:{}, restarting engine",
                new.network.bind_address, new.network.port
            );
            self.stop().await;
            self.config = new;
            return self.start().await;
        }

        if new.engine.worker_pool_size != self.config.engine.worker_pool_size {
            info!("worker pool size change takes effect on next start");
        }
        if new.engine.ack_immediate != self.config.engine.ack_immediate {
            info!("ack ordering change takes effect on next start");
        }

        if let Some(sessions) = &self.sessions {
            lock(sessions).set_thresholds(
                new.engine.stale_threshold(),
                new.engine.expiry_threshold(),
            );
        }

        if let Some(mut identity) = self.identity.clone() {
            identity.name = new.server.instance_name.clone();
            self.identity = Some(identity.clone());
            if new.network.discovery_enabled {
                self.advertise(&identity);
            } else if self.advertiser.unregister().is_ok() {
                self.emit(EngineEvent::AdvertiserChanged {
                    state: self.advertiser.state(),
                });
            }
        }

        self.config = new;
        Ok(())
    }

    /// Registers the mDNS record, reporting the in-flight and final states
    /// as events.  Advertisement failures never fail the engine.
    fn advertise(&mut self, identity: &ServerIdentity) {
        self.emit(EngineEvent::AdvertiserChanged {
            state: AdvertiserState::Registering,
        });
        if let Err(e) = self.advertiser.register(identity) {
            warn!("continuing without mDNS advertisement: {e}");
        }
        self.emit(EngineEvent::AdvertiserChanged {
            state: self.advertiser.state(),
        });
    }

    fn set_state(&self, to: EngineState) {
        let from = {
            let mut state = lock(&self.state);
            let from = *state;
            *state = to;
            from
        };
        if from != to {
            debug!("engine state {from:?} -> {to:?}");
            self.emit(EngineEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.events.try_send(StatusEvent::new(event)) {
            debug!("status event dropped: {e}");
        }
    }
}

/// Forwards listener notifications onto the status channel and flips the
/// engine to `Failed` on a fatal socket fault.
fn spawn_transport_pump(
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    events: mpsc::Sender<StatusEvent>,
    state: Arc<Mutex<EngineState>>,
    running: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = transport_rx.recv().await {
            let mapped = match event {
                TransportEvent::Malformed { src, reason } => {
                    Some(EngineEvent::MalformedPacket { src, reason })
                }
                TransportEvent::Session(session_event) => {
                    Some(EngineEvent::Session(session_event))
                }
                TransportEvent::QueueFull {
                    client_id,
                    sequence,
                } => Some(EngineEvent::CommandDropped {
                    client_id,
                    sequence,
                }),
                TransportEvent::Fatal { detail } => {
                    running.store(false, Ordering::Relaxed);
                    let from = {
                        let mut state = lock(&state);
                        let from = *state;
                        *state = EngineState::Failed;
                        from
                    };
                    let _ = events
                        .send(StatusEvent::new(EngineEvent::StateChanged {
                            from,
                            to: EngineState::Failed,
                        }))
                        .await;
                    Some(EngineEvent::TransportFault { detail })
                }
                TransportEvent::Stopped => None,
            };
            if let Some(mapped) = mapped {
                if events.send(StatusEvent::new(mapped)).await.is_err() {
                    break;
                }
            }
        }
    })
}

fn spawn_failure_pump(
    mut failure_rx: mpsc::Receiver<crate::application::dispatch_commands::DispatchFailure>,
    events: mpsc::Sender<StatusEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failure) = failure_rx.recv().await {
            let event = EngineEvent::ExecutionFailed {
                client_id: failure.client_id,
                sequence: failure.sequence,
                kind: failure.kind,
                error: failure.error.to_string(),
            };
            if events.send(StatusEvent::new(event)).await.is_err() {
                break;
            }
        }
    })
}

/// Runs the session liveness sweep on a fixed interval.
fn spawn_sweep_task(
    sessions: Arc<Mutex<SessionTracker>>,
    events: mpsc::Sender<StatusEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let transitions = lock(&sessions).sweep(Instant::now());
            for transition in transitions {
                if events
                    .send(StatusEvent::new(EngineEvent::Session(transition)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
