//! Minesweeper State Synchronizer
//!
//! The one registered game module. The host is the single decision-maker
//! for state that must be fixed exactly once: the mine set (decided on the
//! first reveal and broadcast before that reveal propagates) and the
//! terminal outcome (broadcast with the final elapsed time and adopted
//! verbatim by guests).

use tracing::{debug, info};

use crate::game::board::{Board, BoardConfig, BoardSnapshot, CellPos, GamePhase, RevealOutcome};
use crate::game::rng::derive_field_seed;
use crate::network::module::{GameContext, GameModule};
use crate::network::protocol::{
    CellClick, GameMessage, MinefieldNotice, ParticipantId,
};
use crate::network::session::{RevealedCell, SessionError, SessionEvent};

/// Module id; prefix of every minesweeper wire tag.
pub const MODULE_ID: &str = "minesweeper";

/// Cooperative minesweeper over a host-relayed session.
pub struct Minesweeper {
    board: Board,
    /// Bumped on every reset so consecutive fields in one session differ.
    game_nonce: u32,
    /// Local clicks made while the mine set was still undecided, applied
    /// once the host's `minesweeper_mines` arrives.
    pending_clicks: Vec<CellPos>,
}

impl Minesweeper {
    /// Create the module with a default pending board.
    pub fn new() -> Self {
        Self {
            board: Board::new(BoardConfig::default()),
            game_nonce: 0,
            pending_clicks: Vec::new(),
        }
    }

    fn cell_click(pos: CellPos, flag: Option<bool>) -> GameMessage {
        GameMessage::CellClick(CellClick {
            row: pos.row,
            col: pos.col,
            flag,
        })
    }

    /// Apply a reveal and surface the delta with adjacency counts.
    fn apply_reveal(&mut self, ctx: &mut GameContext, pos: CellPos) -> RevealOutcome {
        let outcome = self.board.reveal(pos);
        if !outcome.newly_revealed.is_empty() {
            let cells = outcome
                .newly_revealed
                .iter()
                .map(|pos| RevealedCell {
                    pos: *pos,
                    adjacent: self.board.adjacent_mines(*pos),
                    mine: self
                        .board
                        .mines()
                        .map(|mines| mines.contains(pos))
                        .unwrap_or(false),
                })
                .collect();
            ctx.emit(SessionEvent::CellsRevealed { cells });
        }
        outcome
    }

    /// Host path for a reveal click, local or relayed.
    fn host_click(&mut self, ctx: &mut GameContext, sender: &ParticipantId, pos: CellPos) {
        if self.board.phase.is_terminal() || !self.board.contains(pos) {
            return;
        }

        if !self.board.mines_decided() {
            // First move: fix the field and announce it before the reveal
            // goes anywhere. Per-link FIFO keeps that order on the wire.
            let entropy = chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default() as u64;
            let seed = derive_field_seed(ctx.session_id.as_str(), self.game_nonce, entropy);
            let positions: Vec<CellPos> =
                self.board.place_mines(seed, pos).iter().copied().collect();
            info!(
                seed = %hex::encode(seed.to_le_bytes()),
                mines = positions.len(),
                "minefield decided"
            );

            self.board.phase = GamePhase::Running;
            ctx.broadcast(GameMessage::Mines(MinefieldNotice {
                positions,
                origin: pos,
            }));
            ctx.broadcast(GameMessage::GameStarted);
            ctx.emit(SessionEvent::GameStarted);
        }

        // Everyone but the originator gets the click; the originator either
        // applied it locally already or reveals the origin carried by the
        // mines notice.
        ctx.relay(sender.clone(), Self::cell_click(pos, None));

        let outcome = self.apply_reveal(ctx, pos);
        if outcome.hit_mine {
            self.finish(ctx, false);
        } else if self.board.is_cleared() {
            self.finish(ctx, true);
        }
    }

    /// Host-only terminal verdict.
    fn finish(&mut self, ctx: &mut GameContext, won: bool) {
        self.board.phase = if won { GamePhase::Won } else { GamePhase::Lost };
        let seconds = self.board.elapsed_seconds;
        ctx.broadcast(GameMessage::GameOver { won, seconds });
        ctx.emit(SessionEvent::GameOver { won, seconds });
        info!(won, seconds, "game over");
    }

    /// Guest path for a reveal click, local or relayed by the host.
    fn guest_click(&mut self, ctx: &mut GameContext, sender: &ParticipantId, pos: CellPos) {
        if self.board.phase.is_terminal() || !self.board.contains(pos) {
            return;
        }

        if ctx.is_local(sender) {
            // Upstream first; the host decides placement and ordering.
            ctx.broadcast(Self::cell_click(pos, None));
            if self.board.mines_decided() {
                self.apply_reveal(ctx, pos);
            } else if !self.pending_clicks.contains(&pos) {
                self.pending_clicks.push(pos);
            }
        } else if self.board.mines_decided() {
            self.apply_reveal(ctx, pos);
        } else {
            // The host sends the mines notice before relaying any click, so
            // an undecided board here is protocol skew. Drop the click; the
            // snapshot path repairs a genuinely out-of-sync board.
            debug!(row = pos.row, col = pos.col, "click before minefield, dropped");
        }
    }

    /// Flag changes carry the desired state, so duplicates converge.
    fn handle_flag(
        &mut self,
        ctx: &mut GameContext,
        sender: &ParticipantId,
        pos: CellPos,
        flagged: bool,
    ) {
        if self.board.phase.is_terminal() {
            return;
        }
        if self.board.set_flag(pos, flagged) {
            ctx.emit(SessionEvent::FlagChanged { pos, flagged });
        }
        if ctx.is_host() {
            ctx.relay(sender.clone(), Self::cell_click(pos, Some(flagged)));
        } else if ctx.is_local(sender) {
            ctx.broadcast(Self::cell_click(pos, Some(flagged)));
        }
    }

    /// Guest adopts the host's mine set, reveals the triggering cell and
    /// drains clicks buffered before the field existed.
    fn adopt_mines(&mut self, ctx: &mut GameContext, notice: &MinefieldNotice) {
        if self.board.mines_decided() {
            return;
        }
        self.board.adopt_mines(&notice.positions);
        if self.board.phase == GamePhase::Pending {
            self.board.phase = GamePhase::Running;
            ctx.emit(SessionEvent::GameStarted);
        }

        self.apply_reveal(ctx, notice.origin);
        for pos in std::mem::take(&mut self.pending_clicks) {
            self.apply_reveal(ctx, pos);
        }
    }
}

impl Default for Minesweeper {
    fn default() -> Self {
        Self::new()
    }
}

impl GameModule for Minesweeper {
    fn id(&self) -> &'static str {
        MODULE_ID
    }

    fn init(&mut self, _ctx: &mut GameContext) {
        self.board = Board::new(BoardConfig::default());
        self.game_nonce = 0;
        self.pending_clicks.clear();
    }

    fn reset(&mut self, ctx: &mut GameContext, config: BoardConfig) -> Result<(), SessionError> {
        if !ctx.is_host() {
            return Err(SessionError::NotAuthorized);
        }
        if !config.is_valid() {
            return Err(SessionError::InvalidConfig);
        }

        self.game_nonce = self.game_nonce.wrapping_add(1);
        self.board = Board::new(config);
        self.pending_clicks.clear();
        ctx.broadcast(GameMessage::Reset(config));
        ctx.emit(SessionEvent::GameReset(config));
        info!(
            width = config.width,
            height = config.height,
            mines = config.mines,
            "board reset"
        );
        Ok(())
    }

    fn handle_message(
        &mut self,
        ctx: &mut GameContext,
        sender: &ParticipantId,
        message: &GameMessage,
    ) {
        match message {
            GameMessage::Reset(config) => {
                // Resets originate from the host alone; anything else is a
                // guest overstepping and is discarded.
                if ctx.is_host() || !ctx.is_from_host(sender) {
                    debug!(%sender, "discarding reset from non-host");
                    return;
                }
                if !config.is_valid() {
                    debug!("discarding reset with invalid config");
                    return;
                }
                self.board = Board::new(*config);
                self.pending_clicks.clear();
                ctx.emit(SessionEvent::GameReset(*config));
            }

            GameMessage::Mines(notice) => {
                if ctx.is_host() || !ctx.is_from_host(sender) {
                    return;
                }
                self.adopt_mines(ctx, notice);
            }

            GameMessage::CellClick(click) => {
                let pos = click.pos();
                match click.flag {
                    Some(flagged) => self.handle_flag(ctx, sender, pos, flagged),
                    None if ctx.is_host() => self.host_click(ctx, sender, pos),
                    None => self.guest_click(ctx, sender, pos),
                }
            }

            GameMessage::GameStarted => {
                if !ctx.is_host()
                    && ctx.is_from_host(sender)
                    && self.board.phase == GamePhase::Pending
                {
                    self.board.phase = GamePhase::Running;
                    ctx.emit(SessionEvent::GameStarted);
                }
            }

            GameMessage::Timer { seconds } => {
                if !ctx.is_host()
                    && ctx.is_from_host(sender)
                    && self.board.phase == GamePhase::Running
                {
                    self.board.elapsed_seconds = *seconds;
                    ctx.emit(SessionEvent::TimerUpdated(*seconds));
                }
            }

            GameMessage::GameOver { won, seconds } => {
                // The announced outcome is adopted verbatim; recomputing it
                // locally could disagree under message-ordering skew.
                if !ctx.is_host()
                    && ctx.is_from_host(sender)
                    && !self.board.phase.is_terminal()
                {
                    self.board.phase = if *won { GamePhase::Won } else { GamePhase::Lost };
                    self.board.elapsed_seconds = *seconds;
                    ctx.emit(SessionEvent::GameOver {
                        won: *won,
                        seconds: *seconds,
                    });
                }
            }

            GameMessage::State(snapshot) => {
                if !ctx.is_host() && ctx.is_from_host(sender) {
                    if !snapshot.config.is_valid() {
                        debug!("discarding snapshot with invalid config");
                        return;
                    }
                    self.board = Board::from_snapshot(snapshot);
                    self.pending_clicks.clear();
                    ctx.emit(SessionEvent::BoardSynced(snapshot.clone()));
                }
            }
        }
    }

    fn send_state(&mut self, ctx: &mut GameContext, to: &ParticipantId) {
        if ctx.is_host() {
            ctx.send_to(to.clone(), GameMessage::State(self.board.snapshot()));
        }
    }

    fn tick(&mut self, ctx: &mut GameContext) {
        if ctx.is_host() && self.board.phase == GamePhase::Running {
            self.board.elapsed_seconds += 1;
            let seconds = self.board.elapsed_seconds;
            ctx.broadcast(GameMessage::Timer { seconds });
            ctx.emit(SessionEvent::TimerUpdated(seconds));
        }
    }

    fn snapshot(&self) -> BoardSnapshot {
        self.board.snapshot()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::module::Outgoing;
    use crate::network::protocol::Role;

    fn host_ctx() -> GameContext {
        let host = ParticipantId::from("host");
        GameContext::new(host.clone(), Role::Host, host)
    }

    fn guest_ctx() -> GameContext {
        GameContext::new(
            ParticipantId::from("guest-a"),
            Role::Guest,
            ParticipantId::from("host"),
        )
    }

    fn reveal_click(row: u16, col: u16) -> GameMessage {
        Minesweeper::cell_click(CellPos::new(row, col), None)
    }

    #[test]
    fn test_guest_reset_rejected_locally() {
        let mut game = Minesweeper::new();
        let mut ctx = guest_ctx();

        let result = game.reset(&mut ctx, BoardConfig::BEGINNER);
        assert!(matches!(result, Err(SessionError::NotAuthorized)));

        // Rejected locally: nothing went out.
        let (outgoing, events) = ctx.finish();
        assert!(outgoing.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn test_host_reset_broadcasts_config() {
        let mut game = Minesweeper::new();
        let mut ctx = host_ctx();

        game.reset(&mut ctx, BoardConfig::BEGINNER).unwrap();
        let (outgoing, events) = ctx.finish();

        assert!(matches!(
            outgoing.as_slice(),
            [Outgoing::Broadcast(GameMessage::Reset(_))]
        ));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::GameReset(config)] if *config == BoardConfig::BEGINNER
        ));
        assert_eq!(game.snapshot().phase, GamePhase::Pending);
    }

    #[test]
    fn test_invalid_reset_config_rejected() {
        let mut game = Minesweeper::new();
        let mut ctx = host_ctx();
        let result = game.reset(
            &mut ctx,
            BoardConfig {
                width: 3,
                height: 3,
                mines: 5,
            },
        );
        assert!(matches!(result, Err(SessionError::InvalidConfig)));
    }

    #[test]
    fn test_host_first_click_announces_mines_before_relaying() {
        let mut game = Minesweeper::new();
        let guest = ParticipantId::from("guest-a");

        let mut ctx = host_ctx();
        game.handle_message(&mut ctx, &guest, &reveal_click(0, 0));
        let (outgoing, _events) = ctx.finish();

        // Strict order: mines, started, then the relayed click.
        assert!(matches!(
            outgoing.as_slice(),
            [
                Outgoing::Broadcast(GameMessage::Mines(_)),
                Outgoing::Broadcast(GameMessage::GameStarted),
                Outgoing::Relay {
                    message: GameMessage::CellClick(_),
                    ..
                },
            ]
        ));
        if let Outgoing::Broadcast(GameMessage::Mines(notice)) = &outgoing[0] {
            let origin = CellPos::new(0, 0);
            assert_eq!(notice.origin, origin);
            assert_eq!(notice.positions.len(), 10);
            for mine in &notice.positions {
                assert!(!origin.touches(*mine));
            }
        }
        if let Outgoing::Relay { from, .. } = &outgoing[2] {
            assert_eq!(from, &guest);
        }

        let snapshot = game.snapshot();
        assert_eq!(snapshot.phase, GamePhase::Running);
        assert!(snapshot.revealed.contains(&CellPos::new(0, 0)));
    }

    #[test]
    fn test_guest_buffers_local_click_until_mines_arrive() {
        let mut game = Minesweeper::new();
        let local = ParticipantId::from("guest-a");
        let host = ParticipantId::from("host");

        // Local click before the field exists: sent upstream, not applied.
        let mut ctx = guest_ctx();
        game.handle_message(&mut ctx, &local, &reveal_click(0, 0));
        let (outgoing, events) = ctx.finish();
        assert!(matches!(
            outgoing.as_slice(),
            [Outgoing::Broadcast(GameMessage::CellClick(_))]
        ));
        assert!(events.is_empty());
        assert!(game.snapshot().revealed.is_empty());

        // Host's mines notice arrives: the origin reveal and the buffered
        // click both apply, with the exact field the host decided.
        let mut field = Board::new(BoardConfig::BEGINNER);
        let positions: Vec<CellPos> = field
            .place_mines(1234, CellPos::new(0, 0))
            .iter()
            .copied()
            .collect();

        let mut ctx = guest_ctx();
        game.handle_message(
            &mut ctx,
            &host,
            &GameMessage::Mines(MinefieldNotice {
                positions: positions.clone(),
                origin: CellPos::new(0, 0),
            }),
        );
        let (_outgoing, events) = ctx.finish();

        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::GameStarted)));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::CellsRevealed { .. })));

        let snapshot = game.snapshot();
        assert_eq!(snapshot.phase, GamePhase::Running);
        assert!(snapshot.revealed.contains(&CellPos::new(0, 0)));

        // Identical flood fill on both sides.
        field.reveal(CellPos::new(0, 0));
        assert_eq!(
            snapshot.revealed,
            field.revealed().iter().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_host_ignores_mines_from_guest() {
        let mut game = Minesweeper::new();
        let mut ctx = host_ctx();
        game.handle_message(
            &mut ctx,
            &ParticipantId::from("guest-a"),
            &GameMessage::Mines(MinefieldNotice {
                positions: vec![CellPos::new(1, 1)],
                origin: CellPos::new(0, 0),
            }),
        );
        assert!(game.snapshot().mines.is_none());
    }

    #[test]
    fn test_guest_adopts_outcome_verbatim() {
        let mut game = Minesweeper::new();
        let host = ParticipantId::from("host");

        let mut ctx = guest_ctx();
        game.handle_message(
            &mut ctx,
            &host,
            &GameMessage::GameOver {
                won: true,
                seconds: 99,
            },
        );
        let (_, events) = ctx.finish();

        assert!(matches!(
            events.as_slice(),
            [SessionEvent::GameOver { won: true, seconds: 99 }]
        ));
        let snapshot = game.snapshot();
        assert_eq!(snapshot.phase, GamePhase::Won);
        assert_eq!(snapshot.elapsed_seconds, 99);
    }

    #[test]
    fn test_host_judges_loss_and_broadcasts() {
        let mut game = Minesweeper::new();
        let host = ParticipantId::from("host");

        // First click fixes the field.
        let mut ctx = host_ctx();
        game.handle_message(&mut ctx, &host, &reveal_click(4, 4));
        drop(ctx.finish());

        // Click a known mine.
        let mine = game.snapshot().mines.unwrap()[0];
        let mut ctx = host_ctx();
        game.handle_message(&mut ctx, &host, &reveal_click(mine.row, mine.col));
        let (outgoing, events) = ctx.finish();

        assert!(outgoing.iter().any(|o| matches!(
            o,
            Outgoing::Broadcast(GameMessage::GameOver { won: false, .. })
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::GameOver { won: false, .. })));
        assert_eq!(game.snapshot().phase, GamePhase::Lost);
    }

    #[test]
    fn test_flag_applies_and_relays() {
        let mut game = Minesweeper::new();
        let guest = ParticipantId::from("guest-a");
        let pos = CellPos::new(2, 3);

        let mut ctx = host_ctx();
        game.handle_message(&mut ctx, &guest, &Minesweeper::cell_click(pos, Some(true)));
        let (outgoing, events) = ctx.finish();

        assert!(matches!(
            events.as_slice(),
            [SessionEvent::FlagChanged { flagged: true, .. }]
        ));
        assert!(matches!(
            outgoing.as_slice(),
            [Outgoing::Relay { from, message: GameMessage::CellClick(c) }]
                if from == &guest && c.flag == Some(true)
        ));
        assert!(game.snapshot().flagged.contains(&pos));

        // Duplicate delivery converges: no second event.
        let mut ctx = host_ctx();
        game.handle_message(&mut ctx, &guest, &Minesweeper::cell_click(pos, Some(true)));
        let (_, events) = ctx.finish();
        assert!(events.is_empty());
    }

    #[test]
    fn test_tick_advances_clock_only_while_running() {
        let mut game = Minesweeper::new();

        // Pending: no clock.
        let mut ctx = host_ctx();
        game.tick(&mut ctx);
        let (outgoing, _) = ctx.finish();
        assert!(outgoing.is_empty());

        // Start the game, then tick.
        let host = ParticipantId::from("host");
        let mut ctx = host_ctx();
        game.handle_message(&mut ctx, &host, &reveal_click(4, 4));
        drop(ctx.finish());

        let mut ctx = host_ctx();
        game.tick(&mut ctx);
        let (outgoing, events) = ctx.finish();
        assert!(matches!(
            outgoing.as_slice(),
            [Outgoing::Broadcast(GameMessage::Timer { seconds: 1 })]
        ));
        assert!(matches!(events.as_slice(), [SessionEvent::TimerUpdated(1)]));
    }

    #[test]
    fn test_late_join_snapshot_after_roster() {
        let mut game = Minesweeper::new();
        let newcomer = ParticipantId::from("guest-b");

        let mut ctx = host_ctx();
        game.send_state(&mut ctx, &newcomer);
        let (outgoing, _) = ctx.finish();

        assert!(matches!(
            outgoing.as_slice(),
            [Outgoing::Send { to, message: GameMessage::State(snapshot) }]
                if to == &newcomer && snapshot.phase == GamePhase::Pending
        ));
    }
}
