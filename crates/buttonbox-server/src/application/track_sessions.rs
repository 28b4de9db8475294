//! TrackSessionsUseCase: per-client session registry and liveness tracking.
//!
//! The `SessionTracker` is the server's in-memory database of every client
//! that has sent it a packet.  Each entry tracks:
//!
//! - The client's last known source address and last-seen timestamp.
//! - Its liveness status, driven by heartbeat ages.
//! - A bounded window of recently seen command sequence numbers, used to
//!   suppress re-execution of retransmitted commands.
//!
//! # Session lifecycle
//!
//! ```text
//! (first packet)  ──►  Connected  ──►  Stale  ──►  Expired (entry removed)
//!                          ▲             │
//!                          └─────────────┘  any packet revives
//! ```
//!
//! - `Connected`: a packet arrived within the stale threshold.
//! - `Stale`: no packet for longer than the stale threshold.  The session is
//!   kept; commands from it still execute.
//! - `Expired`: no packet for longer than the expiry threshold.  The entry is
//!   removed, which also discards its sequence window.  A later packet from
//!   the same client starts a fresh session.
//!
//! Status only moves forward during a sweep.  Receiving a packet is the only
//! thing that moves a session back to `Connected`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use buttonbox_core::SequenceWindow;

/// Liveness status of a tracked client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// A packet arrived recently; the client is considered live.
    Connected,
    /// The client has gone quiet but may still return.
    Stale,
    /// The client has been quiet past the expiry threshold.  Sessions in this
    /// status are removed by the sweep that produced it.
    Expired,
}

/// A lifecycle transition observed by the tracker, reported so the engine can
/// surface it as a status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// First packet ever seen from this client id.
    Connected { client_id: String },
    /// A packet arrived from a session previously marked `Stale`.
    Revived { client_id: String },
    /// A sweep found the session past the stale threshold.
    WentStale { client_id: String },
    /// A sweep found the session past the expiry threshold and removed it.
    Expired { client_id: String },
}

/// Bookkeeping for a packet the server sent and expects an answer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    pub sent_at: Instant,
    pub attempts: u32,
}

/// Runtime state for a single client session.
#[derive(Debug)]
pub struct ClientSession {
    /// Source address of the most recent packet.  Clients can roam between
    /// addresses (Wi-Fi reconnects); the latest one always wins.
    pub addr: SocketAddr,
    /// When the most recent packet arrived.
    pub last_seen_at: Instant,
    /// Current liveness status.
    pub status: SessionStatus,
    /// Recently seen command sequence numbers for duplicate suppression.
    pub seen: SequenceWindow,
    /// Outstanding server-initiated packets keyed by sequence.  Empty unless
    /// the engine sends its own heartbeats; inbound ACK/PONG clear entries.
    pub pending_acks: HashMap<u64, PendingAck>,
}

/// Whether an incoming command is new or a retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDisposition {
    /// First time this (client, sequence) pair has been seen.  Execute it.
    Fresh,
    /// Already seen.  Acknowledge again but do not re-execute.
    Duplicate,
}

/// In-memory registry of all live client sessions.
///
/// The tracker is shared between the packet receive thread and the periodic
/// sweep task behind a `Mutex`; every method takes `&mut self` and the caller
/// holds the lock only for the duration of the call.
///
/// Timestamps are injected (`now: Instant`) rather than read internally so
/// tests can drive the lifecycle without sleeping.
pub struct SessionTracker {
    sessions: HashMap<String, ClientSession>,
    stale_after: Duration,
    expire_after: Duration,
    window_capacity: usize,
}

impl SessionTracker {
    pub fn new(stale_after: Duration, expire_after: Duration, window_capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            stale_after,
            expire_after,
            window_capacity,
        }
    }

    /// Records packet arrival from `client_id`, creating the session on first
    /// contact and reviving it if it had gone stale.
    ///
    /// Returns the lifecycle transition this packet caused, if any.
    pub fn touch(
        &mut self,
        client_id: &str,
        addr: SocketAddr,
        now: Instant,
    ) -> Option<SessionEvent> {
        match self.sessions.get_mut(client_id) {
            Some(session) => {
                session.addr = addr;
                session.last_seen_at = now;
                if session.status == SessionStatus::Stale {
                    session.status = SessionStatus::Connected;
                    Some(SessionEvent::Revived {
                        client_id: client_id.to_string(),
                    })
                } else {
                    None
                }
            }
            None => {
                self.sessions.insert(
                    client_id.to_string(),
                    ClientSession {
                        addr,
                        last_seen_at: now,
                        status: SessionStatus::Connected,
                        seen: SequenceWindow::new(self.window_capacity),
                        pending_acks: HashMap::new(),
                    },
                );
                Some(SessionEvent::Connected {
                    client_id: client_id.to_string(),
                })
            }
        }
    }

    /// Records an incoming command and classifies it as fresh or duplicate.
    ///
    /// Also touches the session, so the returned event (if any) must be
    /// surfaced just like one from [`SessionTracker::touch`].
    pub fn record_command(
        &mut self,
        client_id: &str,
        addr: SocketAddr,
        sequence: u64,
        now: Instant,
    ) -> (CommandDisposition, Option<SessionEvent>) {
        let event = self.touch(client_id, addr, now);
        // touch guarantees the entry exists.
        let session = match self.sessions.get_mut(client_id) {
            Some(s) => s,
            None => {
                return (CommandDisposition::Fresh, event);
            }
        };
        if session.seen.insert(sequence) {
            (CommandDisposition::Fresh, event)
        } else {
            (CommandDisposition::Duplicate, event)
        }
    }

    /// Advances session statuses based on packet age and removes expired
    /// sessions.  Intended to run on a periodic timer.
    ///
    /// Returns every transition made, in no particular order.
    pub fn sweep(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let mut expired = Vec::new();

        for (client_id, session) in &mut self.sessions {
            let age = now.saturating_duration_since(session.last_seen_at);
            match session.status {
                SessionStatus::Connected if age >= self.expire_after => {
                    // Skipping Stale is possible when sweeps are delayed.
                    expired.push(client_id.clone());
                }
                SessionStatus::Connected if age >= self.stale_after => {
                    session.status = SessionStatus::Stale;
                    events.push(SessionEvent::WentStale {
                        client_id: client_id.clone(),
                    });
                }
                SessionStatus::Stale if age >= self.expire_after => {
                    expired.push(client_id.clone());
                }
                _ => {}
            }
        }

        for client_id in expired {
            self.sessions.remove(&client_id);
            events.push(SessionEvent::Expired { client_id });
        }

        events
    }

    /// Removes `sequence` from the client's seen window so a later
    /// retransmission is classified fresh again.  Used when a recorded
    /// command could not be handed off for execution.
    pub fn forget_command(&mut self, client_id: &str, sequence: u64) -> bool {
        self.sessions
            .get_mut(client_id)
            .map(|session| session.seen.remove(sequence))
            .unwrap_or(false)
    }

    /// Returns whether `sequence` has already been seen from `client_id`,
    /// without touching the session.
    pub fn was_seen(&self, client_id: &str, sequence: u64) -> bool {
        self.sessions
            .get(client_id)
            .map(|session| session.seen.contains(sequence))
            .unwrap_or(false)
    }

    /// Records a server-initiated packet awaiting an answer.  Re-recording
    /// the same sequence counts another attempt.
    pub fn note_pending_ack(&mut self, client_id: &str, sequence: u64, now: Instant) {
        if let Some(session) = self.sessions.get_mut(client_id) {
            session
                .pending_acks
                .entry(sequence)
                .and_modify(|pending| {
                    pending.sent_at = now;
                    pending.attempts += 1;
                })
                .or_insert(PendingAck {
                    sent_at: now,
                    attempts: 1,
                });
        }
    }

    /// Clears the pending-ack entry matched by an inbound ACK or PONG.
    /// Returns whether an entry existed.
    pub fn clear_pending_ack(&mut self, client_id: &str, sequence: u64) -> bool {
        self.sessions
            .get_mut(client_id)
            .map(|session| session.pending_acks.remove(&sequence).is_some())
            .unwrap_or(false)
    }

    /// Replaces the liveness thresholds.  Takes effect on the next sweep;
    /// existing sessions are not re-evaluated immediately.
    pub fn set_thresholds(&mut self, stale_after: Duration, expire_after: Duration) {
        self.stale_after = stale_after;
        self.expire_after = expire_after;
    }

    /// Returns the session for `client_id`, if one is tracked.
    pub fn get(&self, client_id: &str) -> Option<&ClientSession> {
        self.sessions.get(client_id)
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.168.1.50:40000".parse().unwrap()
    }

    fn tracker() -> SessionTracker {
        SessionTracker::new(Duration::from_secs(15), Duration::from_secs(60), 128)
    }

    #[test]
    fn test_first_packet_creates_connected_session() {
        // Arrange
        let mut tracker = tracker();
        let now = Instant::now();

        // Act
        let event = tracker.touch("tablet-1", addr(), now);

        // Assert
        assert_eq!(
            event,
            Some(SessionEvent::Connected {
                client_id: "tablet-1".to_string()
            })
        );
        assert_eq!(tracker.get("tablet-1").unwrap().status, SessionStatus::Connected);
    }

    #[test]
    fn test_repeat_packet_from_connected_session_emits_no_event() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.touch("tablet-1", addr(), now);

        let event = tracker.touch("tablet-1", addr(), now + Duration::from_secs(1));
        assert_eq!(event, None);
    }

    #[test]
    fn test_touch_updates_roaming_address() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.touch("tablet-1", addr(), now);

        let new_addr: SocketAddr = "192.168.1.99:40001".parse().unwrap();
        tracker.touch("tablet-1", new_addr, now + Duration::from_secs(1));

        assert_eq!(tracker.get("tablet-1").unwrap().addr, new_addr);
    }

    #[test]
    fn test_fresh_command_then_duplicate() {
        // Arrange
        let mut tracker = tracker();
        let now = Instant::now();

        // Act
        let (first, _) = tracker.record_command("tablet-1", addr(), 7, now);
        let (second, _) = tracker.record_command("tablet-1", addr(), 7, now);

        // Assert
        assert_eq!(first, CommandDisposition::Fresh);
        assert_eq!(second, CommandDisposition::Duplicate);
    }

    #[test]
    fn test_sequence_windows_are_per_client() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.record_command("tablet-1", addr(), 7, now);
        let (disposition, _) = tracker.record_command("tablet-2", addr(), 7, now);

        assert_eq!(disposition, CommandDisposition::Fresh);
    }

    #[test]
    fn test_sweep_marks_quiet_session_stale() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.touch("tablet-1", addr(), start);

        let events = tracker.sweep(start + Duration::from_secs(16));

        assert_eq!(
            events,
            vec![SessionEvent::WentStale {
                client_id: "tablet-1".to_string()
            }]
        );
        assert_eq!(tracker.get("tablet-1").unwrap().status, SessionStatus::Stale);
    }

    #[test]
    fn test_sweep_never_moves_status_backwards() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.touch("tablet-1", addr(), start);
        tracker.sweep(start + Duration::from_secs(16));

        // A second sweep at the same age must not re-announce staleness.
        let events = tracker.sweep(start + Duration::from_secs(17));
        assert!(events.is_empty());
    }

    #[test]
    fn test_packet_revives_stale_session() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.touch("tablet-1", addr(), start);
        tracker.sweep(start + Duration::from_secs(16));

        let event = tracker.touch("tablet-1", addr(), start + Duration::from_secs(17));

        assert_eq!(
            event,
            Some(SessionEvent::Revived {
                client_id: "tablet-1".to_string()
            })
        );
        assert_eq!(tracker.get("tablet-1").unwrap().status, SessionStatus::Connected);
    }

    #[test]
    fn test_sweep_expires_and_removes_long_quiet_session() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.touch("tablet-1", addr(), start);
        tracker.sweep(start + Duration::from_secs(16));

        let events = tracker.sweep(start + Duration::from_secs(61));

        assert_eq!(
            events,
            vec![SessionEvent::Expired {
                client_id: "tablet-1".to_string()
            }]
        );
        assert!(tracker.get("tablet-1").is_none());
    }

    #[test]
    fn test_delayed_sweep_expires_connected_session_directly() {
        // If no sweep ran between the stale and expiry thresholds, the
        // session goes straight from Connected to removed.
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.touch("tablet-1", addr(), start);

        let events = tracker.sweep(start + Duration::from_secs(120));

        assert_eq!(
            events,
            vec![SessionEvent::Expired {
                client_id: "tablet-1".to_string()
            }]
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_expired_client_restarts_with_fresh_sequence_window() {
        // After expiry the old window is gone, so an old sequence number is
        // treated as fresh again.  Clients are expected to restart their
        // counters when they reconnect.
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.record_command("tablet-1", addr(), 7, start);
        tracker.sweep(start + Duration::from_secs(120));

        let (disposition, event) =
            tracker.record_command("tablet-1", addr(), 7, start + Duration::from_secs(121));

        assert_eq!(disposition, CommandDisposition::Fresh);
        assert_eq!(
            event,
            Some(SessionEvent::Connected {
                client_id: "tablet-1".to_string()
            })
        );
    }

    #[test]
    fn test_forgotten_command_is_fresh_on_retransmission() {
        // Arrange
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.record_command("tablet-1", addr(), 7, now);

        // Act
        assert!(tracker.forget_command("tablet-1", 7));
        let (disposition, _) = tracker.record_command("tablet-1", addr(), 7, now);

        // Assert
        assert_eq!(disposition, CommandDisposition::Fresh);
        assert!(!tracker.forget_command("unknown", 7));
    }

    #[test]
    fn test_was_seen_reflects_recorded_commands_only() {
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.record_command("tablet-1", addr(), 7, now);

        assert!(tracker.was_seen("tablet-1", 7));
        assert!(!tracker.was_seen("tablet-1", 8));
        assert!(!tracker.was_seen("unknown", 7));
    }

    #[test]
    fn test_pending_ack_is_counted_and_cleared() {
        // Arrange
        let mut tracker = tracker();
        let now = Instant::now();
        tracker.touch("tablet-1", addr(), now);

        // Act: two sends of the same sequence, then the answer arrives.
        tracker.note_pending_ack("tablet-1", 3, now);
        tracker.note_pending_ack("tablet-1", 3, now + Duration::from_secs(1));

        // Assert
        let pending = tracker.get("tablet-1").unwrap().pending_acks[&3];
        assert_eq!(pending.attempts, 2);
        assert!(tracker.clear_pending_ack("tablet-1", 3));
        assert!(!tracker.clear_pending_ack("tablet-1", 3));
    }

    #[test]
    fn test_set_thresholds_applies_on_next_sweep() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.touch("tablet-1", addr(), start);

        tracker.set_thresholds(Duration::from_secs(1), Duration::from_secs(2));
        let events = tracker.sweep(start + Duration::from_secs(3));

        assert_eq!(
            events,
            vec![SessionEvent::Expired {
                client_id: "tablet-1".to_string()
            }]
        );
    }
}
