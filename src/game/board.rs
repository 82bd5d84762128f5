//! Board State
//!
//! Shared minesweeper board state, identical on every participant once the
//! mine set is known. Uses BTreeSet for deterministic iteration order, so a
//! flood fill produces the same cell sequence on host and guests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::game::rng::FieldRng;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Board configuration, broadcast on every reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
    /// Number of mines to place.
    pub mines: u16,
}

impl BoardConfig {
    /// Classic 9x9 board with 10 mines.
    pub const BEGINNER: BoardConfig = BoardConfig {
        width: 9,
        height: 9,
        mines: 10,
    };

    /// Largest accepted board edge.
    pub const MAX_EDGE: u16 = 64;

    /// Total cell count.
    pub fn cell_count(&self) -> u32 {
        self.width as u32 * self.height as u32
    }

    /// Check dimensions and mine count against sane bounds.
    ///
    /// The first move excludes a 3x3 neighborhood, so at least 9 cells
    /// must stay mine-free.
    pub fn is_valid(&self) -> bool {
        (2..=Self::MAX_EDGE).contains(&self.width)
            && (2..=Self::MAX_EDGE).contains(&self.height)
            && self.mines >= 1
            && (self.mines as u32) + 9 <= self.cell_count()
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self::BEGINNER
    }
}

// =============================================================================
// CELLS AND PHASE
// =============================================================================

/// Cell coordinate. Row-major `Ord` keeps BTree iteration deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellPos {
    /// Zero-based row.
    pub row: u16,
    /// Zero-based column.
    pub col: u16,
}

impl CellPos {
    /// Create a cell coordinate.
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    /// Whether `other` is this cell or one of its 8 neighbors.
    pub fn touches(&self, other: CellPos) -> bool {
        (self.row as i32 - other.row as i32).abs() <= 1
            && (self.col as i32 - other.col as i32).abs() <= 1
    }
}

/// Lifecycle of one game instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Board allocated, no reveal yet, mines undecided.
    Pending,
    /// First reveal happened, mines fixed, timer running.
    Running,
    /// All safe cells revealed.
    Won,
    /// A mine was revealed.
    Lost,
}

impl GamePhase {
    /// Won or lost.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GamePhase::Won | GamePhase::Lost)
    }
}

/// Result of applying a reveal to the board.
#[derive(Clone, Debug, Default)]
pub struct RevealOutcome {
    /// Cells newly revealed by this operation, in flood-fill order.
    pub newly_revealed: Vec<CellPos>,
    /// Whether the revealed cell was a mine.
    pub hit_mine: bool,
}

impl RevealOutcome {
    /// True when the reveal changed nothing.
    pub fn is_noop(&self) -> bool {
        self.newly_revealed.is_empty() && !self.hit_mine
    }
}

// =============================================================================
// BOARD
// =============================================================================

/// Full serialization of one game instance, sent to late joiners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    /// Board configuration.
    pub config: BoardConfig,
    /// Mine positions, absent while undecided.
    pub mines: Option<Vec<CellPos>>,
    /// Revealed cells.
    pub revealed: Vec<CellPos>,
    /// Flagged cells.
    pub flagged: Vec<CellPos>,
    /// Elapsed seconds announced by the host.
    pub elapsed_seconds: u32,
    /// Current phase.
    pub phase: GamePhase,
}

/// The shared puzzle board.
///
/// Mine positions are decided exactly once per instance (host-side) and
/// withheld until then; reveal and flag application are idempotent.
#[derive(Clone, Debug)]
pub struct Board {
    config: BoardConfig,
    mines: Option<BTreeSet<CellPos>>,
    revealed: BTreeSet<CellPos>,
    flagged: BTreeSet<CellPos>,
    /// Elapsed seconds, advanced by the host and adopted by guests.
    pub elapsed_seconds: u32,
    /// Current phase. Terminal transitions are host decisions.
    pub phase: GamePhase,
}

impl Board {
    /// Allocate an empty pending board. Mines stay undecided.
    pub fn new(config: BoardConfig) -> Self {
        Self {
            config,
            mines: None,
            revealed: BTreeSet::new(),
            flagged: BTreeSet::new(),
            elapsed_seconds: 0,
            phase: GamePhase::Pending,
        }
    }

    /// Board configuration.
    pub fn config(&self) -> BoardConfig {
        self.config
    }

    /// Whether the coordinate lies on this board.
    pub fn contains(&self, pos: CellPos) -> bool {
        pos.row < self.config.height && pos.col < self.config.width
    }

    /// Whether the mine set has been decided.
    pub fn mines_decided(&self) -> bool {
        self.mines.is_some()
    }

    /// The decided mine set, if any.
    pub fn mines(&self) -> Option<&BTreeSet<CellPos>> {
        self.mines.as_ref()
    }

    /// Revealed cells.
    pub fn revealed(&self) -> &BTreeSet<CellPos> {
        &self.revealed
    }

    /// Flagged cells.
    pub fn flagged(&self) -> &BTreeSet<CellPos> {
        &self.flagged
    }

    /// Decide the mine set from a seed, excluding `safe` and its 8
    /// neighbors. No-op if mines were already decided (decided exactly once).
    ///
    /// Deterministic: the same seed and safe cell always produce the same
    /// field.
    pub fn place_mines(&mut self, seed: u64, safe: CellPos) -> &BTreeSet<CellPos> {
        if self.mines.is_none() {
            let mut candidates: Vec<CellPos> = (0..self.config.height)
                .flat_map(|row| (0..self.config.width).map(move |col| CellPos::new(row, col)))
                .filter(|pos| !safe.touches(*pos))
                .collect();

            let mut rng = FieldRng::new(seed);
            rng.shuffle(&mut candidates);

            let count = (self.config.mines as usize).min(candidates.len());
            self.mines = Some(candidates.into_iter().take(count).collect());
        }
        self.mines.as_ref().unwrap()
    }

    /// Adopt a mine set announced by the host. Out-of-range positions are
    /// discarded. No-op if mines were already decided.
    pub fn adopt_mines(&mut self, positions: &[CellPos]) {
        if self.mines.is_none() {
            self.mines = Some(
                positions
                    .iter()
                    .copied()
                    .filter(|pos| {
                        pos.row < self.config.height && pos.col < self.config.width
                    })
                    .collect(),
            );
        }
    }

    /// In-bounds neighbors of a cell.
    pub fn neighbors(&self, pos: CellPos) -> Vec<CellPos> {
        let mut out = Vec::with_capacity(8);
        for dr in -1i32..=1 {
            for dc in -1i32..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let row = pos.row as i32 + dr;
                let col = pos.col as i32 + dc;
                if row >= 0
                    && col >= 0
                    && (row as u16) < self.config.height
                    && (col as u16) < self.config.width
                {
                    out.push(CellPos::new(row as u16, col as u16));
                }
            }
        }
        out
    }

    /// Number of mines adjacent to a cell. Zero while mines are undecided.
    pub fn adjacent_mines(&self, pos: CellPos) -> u8 {
        match &self.mines {
            Some(mines) => self
                .neighbors(pos)
                .into_iter()
                .filter(|n| mines.contains(n))
                .count() as u8,
            None => 0,
        }
    }

    /// Reveal a cell, flood-filling zero-adjacency regions.
    ///
    /// Idempotent: re-revealing, revealing a flagged cell, or revealing out
    /// of range is a no-op. Requires a decided mine set; callers gate on
    /// [`Board::mines_decided`] and buffer otherwise.
    pub fn reveal(&mut self, pos: CellPos) -> RevealOutcome {
        let mut outcome = RevealOutcome::default();

        if !self.contains(pos) || self.revealed.contains(&pos) || self.flagged.contains(&pos) {
            return outcome;
        }
        let mines = match &self.mines {
            Some(mines) => mines.clone(),
            None => return outcome,
        };

        if mines.contains(&pos) {
            self.revealed.insert(pos);
            outcome.newly_revealed.push(pos);
            outcome.hit_mine = true;
            return outcome;
        }

        // BFS in fixed neighbor order keeps the fill deterministic.
        let mut queue = std::collections::VecDeque::from([pos]);
        while let Some(cell) = queue.pop_front() {
            if self.revealed.contains(&cell) || self.flagged.contains(&cell) {
                continue;
            }
            self.revealed.insert(cell);
            outcome.newly_revealed.push(cell);

            if self.adjacent_mines(cell) == 0 {
                for neighbor in self.neighbors(cell) {
                    if !self.revealed.contains(&neighbor) && !mines.contains(&neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        outcome
    }

    /// Set or clear a flag. Idempotent: the wire carries the desired state,
    /// not a toggle. Returns whether the board changed.
    pub fn set_flag(&mut self, pos: CellPos, on: bool) -> bool {
        if !self.contains(pos) || self.revealed.contains(&pos) {
            return false;
        }
        if on {
            self.flagged.insert(pos)
        } else {
            self.flagged.remove(&pos)
        }
    }

    /// All non-mine cells revealed.
    pub fn is_cleared(&self) -> bool {
        match &self.mines {
            Some(mines) => {
                self.revealed.len() as u32 == self.config.cell_count() - mines.len() as u32
            }
            None => false,
        }
    }

    /// Serialize the full instance for a late joiner.
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            config: self.config,
            mines: self
                .mines
                .as_ref()
                .map(|mines| mines.iter().copied().collect()),
            revealed: self.revealed.iter().copied().collect(),
            flagged: self.flagged.iter().copied().collect(),
            elapsed_seconds: self.elapsed_seconds,
            phase: self.phase,
        }
    }

    /// Reconstruct a board from a host snapshot.
    pub fn from_snapshot(snapshot: &BoardSnapshot) -> Self {
        let mut board = Board::new(snapshot.config);
        if let Some(mines) = &snapshot.mines {
            board.adopt_mines(mines);
        }
        board.revealed = snapshot
            .revealed
            .iter()
            .copied()
            .filter(|pos| board.contains(*pos))
            .collect();
        board.flagged = snapshot
            .flagged
            .iter()
            .copied()
            .filter(|pos| board.contains(*pos))
            .collect();
        board.elapsed_seconds = snapshot.elapsed_seconds;
        board.phase = snapshot.phase;
        board
    }
}

// =============================================================================
// TESTS
// =============================================================================
