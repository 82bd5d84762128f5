//! Protocol Messages
//!
//! Wire format for peer-to-peer session traffic. Every frame is a JSON
//! envelope `{ "type": ..., "senderId": ..., ...payload }`; type tags are
//! snake_case, payload fields camelCase. The host relays envelopes
//! unchanged, preserving the original sender id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::board::{BoardConfig, BoardSnapshot, CellPos};

// =============================================================================
// PARTICIPANTS
// =============================================================================

/// Opaque, session-unique participant identifier.
///
/// Assigned by the transport once per process; the host's id doubles as the
/// session id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Session role. Exactly one host per session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Relay and authority; id doubles as session id.
    Host,
    /// Connected only to the host.
    #[default]
    Guest,
}

/// Locally chosen presentation data, supplied by the embedding layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    /// Name shown to other participants.
    pub display_name: String,
    /// Color used to attribute this participant's moves.
    pub color_tag: String,
}

impl PlayerProfile {
    /// Create a profile.
    pub fn new(display_name: impl Into<String>, color_tag: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            color_tag: color_tag.into(),
        }
    }
}

/// One roster entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Session-unique id.
    pub id: ParticipantId,
    /// Name shown to other participants.
    pub display_name: String,
    /// Color used to attribute this participant's moves.
    pub color_tag: String,
    /// Host or guest.
    pub role: Role,
}

impl Participant {
    /// Build a roster entry from an id, profile and role.
    pub fn new(id: ParticipantId, profile: &PlayerProfile, role: Role) -> Self {
        Self {
            id,
            display_name: profile.display_name.clone(),
            color_tag: profile.color_tag.clone(),
            role,
        }
    }
}

// =============================================================================
// SESSION MESSAGES
// =============================================================================

/// Session-level messages handled by the coordinator itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    /// Self-description exchanged when a link opens.
    PlayerInfo(Participant),

    /// Host-originated full roster snapshot.
    #[serde(alias = "peer_list")]
    PlayersList {
        /// Every participant the host currently knows.
        players: Vec<Participant>,
    },

    /// A newcomer joined (sent to previously-connected guests).
    PeerJoined {
        /// The newcomer's roster entry.
        player: Participant,
    },

    /// A participant's link closed.
    PeerLeft {
        /// Who left.
        id: ParticipantId,
    },

    /// Chat line. Pass-through: the core relays it uninterpreted.
    ChatMessage {
        /// Chat text.
        text: String,
    },

    /// Liveness probe. Never relayed.
    Heartbeat {
        /// Sender clock, epoch milliseconds. Echoed back verbatim.
        timestamp: u64,
    },

    /// Probe echo. Never relayed.
    HeartbeatAck {
        /// The probe's original timestamp.
        timestamp: u64,
    },

    /// Host switched the active game module.
    GameSwitch {
        /// Module id, e.g. `"minesweeper"`.
        game: String,
    },
}

// =============================================================================
// GAME MESSAGES
// =============================================================================

/// Minesweeper module messages.
///
/// Type tags carry the module id as a prefix so the coordinator can route
/// frames to the registered module without inspecting payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameMessage {
    /// Host announces a fresh board. Guests allocate an empty matching
    /// board without hazard knowledge.
    #[serde(rename = "minesweeper_reset")]
    Reset(BoardConfig),

    /// Host announces the decided mine set plus the triggering cell.
    /// Strictly precedes any reveal for the instance.
    #[serde(rename = "minesweeper_mines")]
    Mines(MinefieldNotice),

    /// A participant clicked a cell. `flag` absent means reveal; present
    /// means set the flag to the carried state.
    #[serde(rename = "minesweeper_cell_click")]
    CellClick(CellClick),

    /// The first reveal happened; the instance is running.
    #[serde(rename = "minesweeper_game_started")]
    GameStarted,

    /// Host clock for the running instance.
    #[serde(rename = "minesweeper_timer")]
    Timer {
        /// Elapsed seconds as counted by the host.
        seconds: u32,
    },

    /// Host-computed terminal outcome. Guests adopt it verbatim.
    #[serde(rename = "minesweeper_game_over")]
    GameOver {
        /// True when every safe cell was revealed.
        won: bool,
        /// Final elapsed seconds.
        seconds: u32,
    },

    /// Full instance snapshot for a late joiner.
    #[serde(rename = "minesweeper_state", alias = "minesweeper_board_state")]
    State(BoardSnapshot),
}

impl GameMessage {
    /// The module this message belongs to.
    pub fn module_id(&self) -> &'static str {
        "minesweeper"
    }
}

/// Payload of [`GameMessage::Mines`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinefieldNotice {
    /// The fixed mine set.
    pub positions: Vec<CellPos>,
    /// The first-clicked cell; its reveal rides this message so the
    /// originating guest (excluded from the relay) still applies it.
    pub origin: CellPos,
}

/// Payload of [`GameMessage::CellClick`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellClick {
    /// Zero-based row.
    pub row: u16,
    /// Zero-based column.
    pub col: u16,
    /// Desired flag state; `None` is a reveal. Carrying the state rather
    /// than a toggle keeps duplicate delivery idempotent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
}

impl CellClick {
    /// Clicked cell coordinate.
    pub fn pos(&self) -> CellPos {
        CellPos::new(self.row, self.col)
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Either kind of message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// Coordinator-level traffic.
    Session(SessionMessage),
    /// Module traffic, routed by type-tag prefix.
    Game(GameMessage),
}

/// One wire frame. Stateless, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating participant. Preserved unchanged across relays.
    #[serde(rename = "senderId")]
    pub sender_id: ParticipantId,
    /// The message itself, flattened next to the sender id.
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    /// Wrap a session message.
    pub fn session(sender_id: ParticipantId, message: SessionMessage) -> Self {
        Self {
            sender_id,
            body: Body::Session(message),
        }
    }

    /// Wrap a game message.
    pub fn game(sender_id: ParticipantId, message: GameMessage) -> Self {
        Self {
            sender_id,
            body: Body::Game(message),
        }
    }

    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON frame.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
