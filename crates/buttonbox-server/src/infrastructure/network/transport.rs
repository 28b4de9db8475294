//! UDP packet listener: the single socket all client traffic arrives on.
//!
//! The listener runs as a blocking loop on a dedicated thread to avoid
//! blocking the Tokio runtime with synchronous socket I/O.  All replies
//! (ACK, PONG, DISCOVER_RESPONSE) are sent from this same thread on the same
//! socket, so clients always see responses from the port they targeted.
//!
//! # Read timeout
//!
//! The socket is configured with a 500 ms read timeout.  `recv_from` blocks
//! for at most that long before returning a timeout error; on each timeout
//! the loop checks the `running` flag, which bounds shutdown latency.
//!
//! # Packet routing
//!
//! | Incoming            | Action                                              |
//! |---------------------|-----------------------------------------------------|
//! | `CMD` (fresh)       | queue for execution, reply `ACK`                    |
//! | `CMD` (duplicate)   | reply `ACK` only                                    |
//! | `PING`              | reply `PONG` echoing the sequence                   |
//! | `DISCOVER_REQUEST`  | reply `DISCOVER_RESPONSE` with the server identity  |
//! | `ACK` / `PONG`      | refresh the session, nothing else                   |
//! | malformed bytes     | drop silently on the wire, report an event          |
//!
//! Every valid packet refreshes the sender's session regardless of type.
//!
//! When the dispatch queue is full the fresh command is dropped, but its
//! sequence is rolled back out of the session's seen window (and, under
//! deferred acknowledgement, the ACK is withheld), so the client's
//! retransmission runs like a fresh command once capacity frees up.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::time::{Duration, Instant};

use buttonbox_core::{decode_packet, encode_packet, Packet, ServerIdentity, MAX_DATAGRAM_SIZE};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::dispatch_commands::DispatchedCommand;
use crate::application::track_sessions::{CommandDisposition, SessionEvent, SessionTracker};

/// Non-timeout receive errors tolerated before the socket is rebound.
const REBIND_AFTER_ERRORS: u32 = 5;

/// Rebind attempts before the listener gives up and reports a fatal fault.
const REBIND_ATTEMPTS: u32 = 3;

/// Error type for listener startup.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The UDP socket could not be bound.
    #[error("failed to bind command socket on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener thread could not be spawned.
    #[error("failed to spawn listener thread: {0}")]
    Spawn(std::io::Error),
}

/// Out-of-band notifications produced by the listener thread.
#[derive(Debug)]
pub enum TransportEvent {
    /// A datagram failed to decode and was dropped.
    Malformed { src: SocketAddr, reason: String },
    /// A session lifecycle transition caused by an incoming packet.
    Session(SessionEvent),
    /// A fresh command could not be queued because the dispatch pool was
    /// full.  Its sequence was rolled back so the retransmission is fresh.
    QueueFull { client_id: String, sequence: u64 },
    /// The socket failed repeatedly and could not be rebound.  The listener
    /// has stopped.
    Fatal { detail: String },
    /// The listener exited its loop (stop flag or fatal fault).
    Stopped,
}

/// Static inputs for the listener thread.
pub struct ListenerContext {
    pub sessions: Arc<Mutex<SessionTracker>>,
    pub dispatch: mpsc::Sender<DispatchedCommand>,
    pub identity: ServerIdentity,
    /// When `true`, CMD packets are acknowledged before being queued.
    pub ack_immediate: bool,
}

/// Binds the command socket and configures its read timeout.
pub fn bind_command_socket(bind_address: &str, port: u16) -> Result<UdpSocket, TransportError> {
    let addr = format!("{bind_address}:{port}");
    let socket = UdpSocket::bind(&addr).map_err(|source| TransportError::BindFailed {
        addr: addr.clone(),
        source,
    })?;
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .map_err(|source| TransportError::BindFailed { addr, source })?;
    Ok(socket)
}

/// Spawns the listener thread on an already-bound socket.
///
/// Returns a receiver of [`TransportEvent`]s and the thread's join handle.
/// The thread exits when `running` is cleared or after an unrecoverable
/// socket fault.
pub fn start_packet_listener(
    socket: UdpSocket,
    context: ListenerContext,
    running: Arc<AtomicBool>,
) -> Result<(mpsc::Receiver<TransportEvent>, std::thread::JoinHandle<()>), TransportError> {
    let local = socket.local_addr().map_err(TransportError::Spawn)?;
    let (tx, rx) = mpsc::channel(64);

    let handle = std::thread::Builder::new()
        .name("buttonbox-listener".to_string())
        .spawn(move || {
            listener_loop(socket, context, tx, running);
        })
        .map_err(TransportError::Spawn)?;

    info!("command listener on UDP {local}");
    Ok((rx, handle))
}

/// The main receive loop executed on the listener thread.
fn listener_loop(
    mut socket: UdpSocket,
    context: ListenerContext,
    events: mpsc::Sender<TransportEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut consecutive_errors: u32 = 0;

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => {
                consecutive_errors = 0;
                pair
            }
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                consecutive_errors += 1;
                error!("listener recv error ({consecutive_errors} consecutive): {e}");
                if consecutive_errors >= REBIND_AFTER_ERRORS {
                    let addr = match socket.local_addr() {
                        Ok(addr) => addr,
                        Err(addr_err) => {
                            emit(
                                &events,
                                TransportEvent::Fatal {
                                    detail: format!(
                                        "cannot determine local address for rebind: {addr_err}"
                                    ),
                                },
                            );
                            break;
                        }
                    };
                    match rebind(socket, addr) {
                        Some(fresh) => {
                            socket = fresh;
                            consecutive_errors = 0;
                        }
                        None => {
                            emit(
                                &events,
                                TransportEvent::Fatal {
                                    detail: format!("socket unrecoverable after rebinds: {e}"),
                                },
                            );
                            break;
                        }
                    }
                }
                continue;
            }
        };

        handle_datagram(&socket, &buf[..len], src, &context, &events);
    }

    emit(&events, TransportEvent::Stopped);
    info!("command listener stopped");
}

/// Decodes one datagram and routes it.
fn handle_datagram(
    socket: &UdpSocket,
    datagram: &[u8],
    src: SocketAddr,
    context: &ListenerContext,
    events: &mpsc::Sender<TransportEvent>,
) {
    let packet = match decode_packet(datagram) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("malformed datagram from {src}: {e}");
            emit(
                events,
                TransportEvent::Malformed {
                    src,
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    let now = Instant::now();
    match packet {
        Packet::Cmd {
            client_id,
            sequence,
            command,
        } => {
            let (disposition, session_event) =
                lock_sessions(&context.sessions).record_command(&client_id, src, sequence, now);
            forward_session_event(events, session_event);

            let ack = Packet::Ack {
                client_id: client_id.clone(),
                sequence,
            };

            match disposition {
                CommandDisposition::Duplicate => {
                    debug!(client_id = %client_id, sequence, "duplicate command, re-acknowledging");
                    send_packet(socket, &ack, src);
                }
                CommandDisposition::Fresh => {
                    if context.ack_immediate {
                        send_packet(socket, &ack, src);
                    }
                    let queued = context
                        .dispatch
                        .try_send(DispatchedCommand {
                            client_id: client_id.clone(),
                            sequence,
                            command,
                        })
                        .is_ok();
                    if queued {
                        if !context.ack_immediate {
                            send_packet(socket, &ack, src);
                        }
                    } else {
                        // Roll the sequence back out of the seen window so
                        // the retransmission is classified fresh.  Under
                        // deferred acknowledgement the ACK is withheld too,
                        // which is what triggers that retransmission.
                        lock_sessions(&context.sessions).forget_command(&client_id, sequence);
                        warn!(client_id = %client_id, sequence, "dispatch queue full, command dropped");
                        emit(events, TransportEvent::QueueFull { client_id, sequence });
                    }
                }
            }
        }

        Packet::Ping {
            client_id,
            sequence,
        } => {
            let session_event = lock_sessions(&context.sessions).touch(&client_id, src, now);
            forward_session_event(events, session_event);
            send_packet(socket, &Packet::Pong { client_id, sequence }, src);
        }

        Packet::DiscoverRequest { client_id } => {
            debug!(client_id = %client_id, "discovery probe from {src}");
            let session_event = lock_sessions(&context.sessions).touch(&client_id, src, now);
            forward_session_event(events, session_event);
            send_packet(
                socket,
                &Packet::DiscoverResponse {
                    client_id,
                    server: context.identity.clone(),
                },
                src,
            );
        }

        Packet::Ack {
            client_id,
            sequence,
        } => {
            // Answers a server-initiated packet, if any; otherwise just a
            // liveness signal.
            let mut sessions = lock_sessions(&context.sessions);
            let session_event = sessions.touch(&client_id, src, now);
            sessions.clear_pending_ack(&client_id, sequence);
            drop(sessions);
            forward_session_event(events, session_event);
        }

        Packet::Pong {
            client_id,
            sequence,
        } => {
            let mut sessions = lock_sessions(&context.sessions);
            let session_event = sessions.touch(&client_id, src, now);
            if let Some(sequence) = sequence {
                sessions.clear_pending_ack(&client_id, sequence);
            }
            drop(sessions);
            forward_session_event(events, session_event);
        }

        Packet::DiscoverResponse { .. } => {
            debug!("ignoring DISCOVER_RESPONSE from {src}");
        }
    }
}

/// Encodes and sends a reply; send failures are logged, never fatal.
fn send_packet(socket: &UdpSocket, packet: &Packet, dest: SocketAddr) {
    match encode_packet(packet) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, dest) {
                warn!("failed to send {} to {dest}: {e}", packet.packet_type());
            }
        }
        Err(e) => error!("failed to encode {}: {e}", packet.packet_type()),
    }
}

/// Drops the faulted socket and attempts to bind a replacement on the same
/// local address with backoff.  The old socket must be closed before the
/// bind, otherwise the address is still in use.
fn rebind(faulted: UdpSocket, addr: SocketAddr) -> Option<UdpSocket> {
    drop(faulted);
    for attempt in 1..=REBIND_ATTEMPTS {
        std::thread::sleep(Duration::from_millis(250 * attempt as u64));
        match UdpSocket::bind(addr) {
            Ok(fresh) => {
                if fresh
                    .set_read_timeout(Some(Duration::from_millis(500)))
                    .is_err()
                {
                    continue;
                }
                warn!("rebound command socket on {addr} (attempt {attempt})");
                return Some(fresh);
            }
            Err(e) => {
                error!("rebind attempt {attempt}/{REBIND_ATTEMPTS} on {addr} failed: {e}");
            }
        }
    }
    None
}

fn forward_session_event(events: &mpsc::Sender<TransportEvent>, event: Option<SessionEvent>) {
    if let Some(event) = event {
        emit(events, TransportEvent::Session(event));
    }
}

/// Best-effort event delivery; the listener never blocks on a slow consumer.
fn emit(events: &mpsc::Sender<TransportEvent>, event: TransportEvent) {
    if let Err(e) = events.try_send(event) {
        debug!("transport event dropped: {e}");
    }
}

fn lock_sessions(sessions: &Arc<Mutex<SessionTracker>>) -> MutexGuard<'_, SessionTracker> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
