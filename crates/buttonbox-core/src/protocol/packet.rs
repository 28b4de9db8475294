//! All ButtonBox protocol packet and command payload types.
//!
//! The wire unit is a single UDP datagram holding one JSON envelope:
//!
//! ```json
//! { "type": "CMD", "clientId": "c1", "sequence": 5, "payload": { ... } }
//! ```
//!
//! `sequence` is required for CMD and ACK, echoed on PONG when the PING
//! carried one, and absent otherwise. `payload` carries a command schema for
//! CMD and the server identity for DISCOVER_RESPONSE; no other type has one.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version, advertised in discovery metadata.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default UDP port for commands, health checks, and the discovery fallback.
pub const DEFAULT_COMMAND_PORT: u16 = 5005;

/// Maximum accepted datagram size in bytes.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// DNS-SD service type under which a running server advertises itself.
pub const SERVICE_TYPE: &str = "_buttonbox._udp.local.";

// ── Packet type codes ─────────────────────────────────────────────────────────

/// All packet types defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Client-to-server instruction requesting an input action.
    Cmd,
    /// Server-to-client acknowledgment that a CMD was *received*.
    Ack,
    /// Client-initiated liveness probe.
    Ping,
    /// Server reply to a PING.
    Pong,
    /// Client broadcast asking any server to identify itself.
    DiscoverRequest,
    /// Server reply carrying its identity and listening port.
    DiscoverResponse,
}

impl PacketType {
    /// The string used for this type in the wire envelope.
    pub fn wire_name(self) -> &'static str {
        match self {
            PacketType::Cmd => "CMD",
            PacketType::Ack => "ACK",
            PacketType::Ping => "PING",
            PacketType::Pong => "PONG",
            PacketType::DiscoverRequest => "DISCOVER_REQUEST",
            PacketType::DiscoverResponse => "DISCOVER_RESPONSE",
        }
    }

    /// Parses a wire-envelope type string.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "CMD" => Some(PacketType::Cmd),
            "ACK" => Some(PacketType::Ack),
            "PING" => Some(PacketType::Ping),
            "PONG" => Some(PacketType::Pong),
            "DISCOVER_REQUEST" => Some(PacketType::DiscoverRequest),
            "DISCOVER_RESPONSE" => Some(PacketType::DiscoverResponse),
            _ => None,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ── Command payload schemas ───────────────────────────────────────────────────

/// How long a key or mouse button is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressKind {
    /// Press and release immediately.
    Tap,
    /// Hold for `durationMs`, then release.
    Hold,
}

/// Press specification attached to key and mouse-button commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressSpec {
    #[serde(rename = "type")]
    pub kind: PressKind,
    /// Hold duration in milliseconds; ignored for taps.
    #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Default for PressSpec {
    fn default() -> Self {
        Self {
            kind: PressKind::Tap,
            duration_ms: None,
        }
    }
}

impl PressSpec {
    /// Returns the hold duration, or `None` for taps and non-positive holds.
    ///
    /// A hold with a missing or zero duration degrades to a tap rather than
    /// being rejected, matching the tolerant behavior clients rely on.
    pub fn hold_millis(&self) -> Option<u64> {
        match (self.kind, self.duration_ms) {
            (PressKind::Hold, Some(ms)) if ms > 0 => Some(ms),
            _ => None,
        }
    }
}

/// Mouse button identifier used by `mouse_event` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Scroll direction used by `mouse_scroll` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Which end of a drag the captured pointer position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CapturePurpose {
    /// Drag source.
    Src,
    /// Drag destination.
    Des,
}

/// Start/stop control for the repeated drag-and-drop loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoopAction {
    Start,
    Stop,
}

fn default_clicks() -> u32 {
    1
}

/// Decoded CMD payload, discriminated by the `"type"` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Simulate a keyboard key press, optionally with held modifiers.
    KeyEvent {
        key: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        modifiers: Vec<String>,
        #[serde(rename = "pressType", default)]
        press: PressSpec,
    },
    /// Simulate a mouse button press, optionally with held modifiers.
    MouseEvent {
        button: MouseButton,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        modifiers: Vec<String>,
        #[serde(rename = "pressType", default)]
        press: PressSpec,
    },
    /// Simulate mouse wheel movement.
    MouseScroll {
        direction: ScrollDirection,
        #[serde(default = "default_clicks")]
        clicks: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        modifiers: Vec<String>,
    },
    /// One-shot side action: open a URL in the PC's default browser.
    OpenBrowser { url: String },
    /// Record the current pointer position as a drag endpoint.
    CapturePointer { purpose: CapturePurpose },
    /// Start or stop the repeated drag-and-drop loop.
    DragLoop { action: LoopAction },
}

impl Command {
    /// Short human-readable kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::KeyEvent { .. } => "key_event",
            Command::MouseEvent { .. } => "mouse_event",
            Command::MouseScroll { .. } => "mouse_scroll",
            Command::OpenBrowser { .. } => "open_browser",
            Command::CapturePointer { .. } => "capture_pointer",
            Command::DragLoop { .. } => "drag_loop",
        }
    }
}

// ── Server identity ───────────────────────────────────────────────────────────

/// Identity a server reports in DISCOVER_RESPONSE packets and as TXT
/// metadata on its mDNS registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Human-readable instance name.
    pub name: String,
    /// UDP port the server is listening on.
    pub port: u16,
    /// Protocol version; always [`PROTOCOL_VERSION`] for this build.
    pub protocol: u8,
    /// Random per-run id so clients can fold duplicate responses.
    #[serde(rename = "serverId")]
    pub server_id: Uuid,
}

// ── Top-level packet enum ─────────────────────────────────────────────────────

/// One fully-decoded wire packet.
///
/// Invariant: a value of this type is always completely populated for its
/// variant; the codec never yields a partially-filled packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Cmd {
        client_id: String,
        sequence: u64,
        command: Command,
    },
    Ack {
        client_id: String,
        sequence: u64,
    },
    Ping {
        client_id: String,
        sequence: Option<u64>,
    },
    Pong {
        client_id: String,
        sequence: Option<u64>,
    },
    DiscoverRequest {
        client_id: String,
    },
    DiscoverResponse {
        client_id: String,
        server: ServerIdentity,
    },
}

impl Packet {
    /// Returns the [`PacketType`] discriminant for this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Cmd { .. } => PacketType::Cmd,
            Packet::Ack { .. } => PacketType::Ack,
            Packet::Ping { .. } => PacketType::Ping,
            Packet::Pong { .. } => PacketType::Pong,
            Packet::DiscoverRequest { .. } => PacketType::DiscoverRequest,
            Packet::DiscoverResponse { .. } => PacketType::DiscoverResponse,
        }
    }

    /// The logical client this packet belongs to.
    pub fn client_id(&self) -> &str {
        match self {
            Packet::Cmd { client_id, .. }
            | Packet::Ack { client_id, .. }
            | Packet::Ping { client_id, .. }
            | Packet::Pong { client_id, .. }
            | Packet::DiscoverRequest { client_id }
            | Packet::DiscoverResponse { client_id, .. } => client_id,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_wire_names_round_trip() {
        for ty in [
            PacketType::Cmd,
            PacketType::Ack,
            PacketType::Ping,
            PacketType::Pong,
            PacketType::DiscoverRequest,
            PacketType::DiscoverResponse,
        ] {
            assert_eq!(PacketType::from_wire_name(ty.wire_name()), Some(ty));
        }
    }

    #[test]
    fn test_packet_type_rejects_unknown_name() {
        assert_eq!(PacketType::from_wire_name("MACRO_COMMAND"), None);
        assert_eq!(PacketType::from_wire_name(""), None);
    }

    #[test]
    fn test_press_spec_default_is_tap() {
        let press = PressSpec::default();
        assert_eq!(press.kind, PressKind::Tap);
        assert_eq!(press.hold_millis(), None);
    }

    #[test]
    fn test_hold_with_zero_duration_degrades_to_tap() {
        let press = PressSpec {
            kind: PressKind::Hold,
            duration_ms: Some(0),
        };
        assert_eq!(press.hold_millis(), None);
    }

    #[test]
    fn test_hold_with_positive_duration() {
        let press = PressSpec {
            kind: PressKind::Hold,
            duration_ms: Some(350),
        };
        assert_eq!(press.hold_millis(), Some(350));
    }

    #[test]
    fn test_command_deserializes_client_key_event_shape() {
        // The exact JSON shape clients have always sent.
        let json = r#"{
            "type": "key_event",
            "key": "f5",
            "modifiers": ["ctrl", "shift"],
            "pressType": { "type": "hold", "durationMs": 250 }
        }"#;
        let cmd: Command = serde_json::from_str(json).expect("deserialize");
        match cmd {
            Command::KeyEvent {
                key,
                modifiers,
                press,
            } => {
                assert_eq!(key, "f5");
                assert_eq!(modifiers, vec!["ctrl", "shift"]);
                assert_eq!(press.hold_millis(), Some(250));
            }
            other => panic!("expected KeyEvent, got {other:?}"),
        }
    }

    #[test]
    fn test_command_defaults_for_omitted_fields() {
        let cmd: Command = serde_json::from_str(r#"{"type":"key_event","key":"a"}"#).unwrap();
        match cmd {
            Command::KeyEvent {
                modifiers, press, ..
            } => {
                assert!(modifiers.is_empty());
                assert_eq!(press.kind, PressKind::Tap);
            }
            other => panic!("expected KeyEvent, got {other:?}"),
        }

        let cmd: Command =
            serde_json::from_str(r#"{"type":"mouse_scroll","direction":"UP"}"#).unwrap();
        match cmd {
            Command::MouseScroll { clicks, .. } => assert_eq!(clicks, 1),
            other => panic!("expected MouseScroll, got {other:?}"),
        }
    }

    #[test]
    fn test_command_rejects_unknown_kind() {
        let result: Result<Command, _> =
            serde_json::from_str(r#"{"type":"reboot_machine"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_identity_uses_camel_case_id_field() {
        let identity = ServerIdentity {
            name: "office-pc".to_string(),
            port: 5005,
            protocol: PROTOCOL_VERSION,
            server_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&identity).unwrap();
        assert!(json.contains("\"serverId\""));
        assert!(!json.contains("server_id"));
    }
}
