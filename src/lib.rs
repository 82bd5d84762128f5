//! # Minelink
//!
//! Peer-to-peer session coordination for cooperative minesweeper: a small
//! group of participants shares one live board over direct links, with one
//! participant acting as relay and authority.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MINELINK                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Deterministic board logic                 │
//! │  ├── board.rs    - Mine placement, flood fill, snapshots     │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  network/        - Coordination (non-deterministic)          │
//! │  ├── transport.rs- Transport seam + in-memory links          │
//! │  ├── ws.rs       - WebSocket transport                       │
//! │  ├── registry.rs - Peer link registry                        │
//! │  ├── heartbeat.rs- Liveness probes, RTT smoothing            │
//! │  ├── roster.rs   - Participant metadata sync                 │
//! │  ├── protocol.rs - Wire envelopes and message types          │
//! │  ├── module.rs   - Game module capability interface          │
//! │  ├── minesweeper.rs - The minesweeper state synchronizer     │
//! │  └── session.rs  - The session coordinator actor             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! One participant hosts; its id doubles as the session id. Guests connect
//! only to the host (star topology) and the host relays, never echoing a
//! message back to its originator. State that must be decided exactly once
//! (mine placement, the terminal outcome) is decided by the host and
//! broadcast; per-link FIFO ordering guarantees the mine set reaches every
//! guest before any reveal that depends on it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::board::{Board, BoardConfig, BoardSnapshot, CellPos, GamePhase};
pub use network::protocol::{Participant, ParticipantId, PlayerProfile, Role};
pub use network::session::{
    ConnectionStatus, CoordinatorConfig, SessionCoordinator, SessionError, SessionEvent,
    SessionHandle,
};
pub use network::transport::{MemoryHub, MemoryTransport, Transport};
pub use network::ws::WsTransport;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
