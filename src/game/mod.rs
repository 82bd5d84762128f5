//! Game Logic Module
//!
//! Deterministic minesweeper board code. Everything here produces identical
//! results on host and guests given the same mine set; all networking runs
//! through `network/`.
//!
//! ## Module Structure
//!
//! - `board`: Board state, mine placement, flood fill, snapshots
//! - `rng`: Seeded PRNG and field-seed derivation

pub mod board;
pub mod rng;

// Re-export key types
pub use board::{Board, BoardConfig, BoardSnapshot, CellPos, GamePhase, RevealOutcome};
pub use rng::{derive_field_seed, FieldRng};
