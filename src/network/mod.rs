//! Network Layer
//!
//! Session coordination over direct point-to-point links. Everything here
//! is **non-deterministic** plumbing - the board itself lives in `game/`
//! and behaves identically on every participant.

pub mod heartbeat;
pub mod minesweeper;
pub mod module;
pub mod protocol;
pub mod registry;
pub mod roster;
pub mod session;
pub mod transport;
pub mod ws;

pub use heartbeat::HeartbeatMonitor;
pub use minesweeper::Minesweeper;
pub use module::{GameContext, GameModule, ModuleRegistry};
pub use protocol::{
    Envelope, GameMessage, Participant, ParticipantId, PlayerProfile, Role, SessionMessage,
};
pub use registry::{Link, LinkId, LinkRegistry, LinkState};
pub use roster::Roster;
pub use session::{
    ConnectionStatus, CoordinatorConfig, RevealedCell, SessionCoordinator, SessionError,
    SessionEvent, SessionHandle,
};
pub use transport::{LinkEvent, LinkHandle, MemoryHub, MemoryTransport, Transport, TransportError};
pub use ws::WsTransport;
