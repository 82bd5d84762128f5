//! Session Coordinator
//!
//! The core of the crate: one coordinator actor per participant owns
//! membership, role assignment, the join/leave protocol, relay/broadcast
//! policy and reconnection policy. All state is owned by the actor task and
//! mutated only from its event loop, so concurrent local and remote
//! operations serialize without locks.
//!
//! Topology is a star: the host holds one link per guest, a guest holds
//! exactly one link to the host. `broadcast_or_send` dispatches on role and
//! the host never relays a message back to its originator, so every
//! reachable participant receives each message at most once.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::game::board::{BoardConfig, BoardSnapshot, CellPos};
use crate::network::heartbeat::{now_ms, HeartbeatMonitor};
use crate::network::minesweeper::Minesweeper;
use crate::network::module::{GameContext, ModuleRegistry, Outgoing};
use crate::network::protocol::{
    Body, CellClick, Envelope, GameMessage, Participant, ParticipantId, PlayerProfile, Role,
    SessionMessage,
};
use crate::network::registry::{LinkId, LinkRegistry, LinkState};
use crate::network::roster::Roster;
use crate::network::transport::{LinkEvent, LinkHandle, Transport, TransportError};

// =============================================================================
// PUBLIC SURFACE
// =============================================================================

/// Connection status surfaced to the embedding layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No session.
    Disconnected,
    /// Join in progress (bounded-retry connect).
    Connecting,
    /// Session established.
    Connected,
    /// The session ended abnormally (connect exhausted, host link lost).
    Error,
}

/// One revealed cell, with the adjacency count a renderer needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevealedCell {
    /// Cell coordinate.
    pub pos: CellPos,
    /// Adjacent mine count.
    pub adjacent: u8,
    /// Whether the cell itself is a mine (the fatal reveal).
    pub mine: bool,
}

/// Observable outcomes, delivered as a stream to the embedding layer.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Connection status transition.
    StatusChanged(ConnectionStatus),
    /// Full roster after any membership change.
    RosterChanged(Vec<Participant>),
    /// A participant joined.
    PeerJoined(Participant),
    /// A participant left or was dropped.
    PeerLeft(ParticipantId),
    /// A chat line arrived (pass-through, uninterpreted).
    Chat {
        /// Original sender.
        from: ParticipantId,
        /// Chat text.
        text: String,
    },
    /// Smoothed round-trip estimate changed; `None` means unknown.
    LatencyUpdated {
        /// The probed peer.
        peer: ParticipantId,
        /// Smoothed RTT in milliseconds.
        rtt_ms: Option<u32>,
    },
    /// The active game module changed.
    GameSwitched(String),
    /// A fresh board was allocated.
    GameReset(BoardConfig),
    /// The first reveal happened; the instance is running.
    GameStarted,
    /// Cells were revealed.
    CellsRevealed {
        /// Newly revealed cells in flood-fill order.
        cells: Vec<RevealedCell>,
    },
    /// A flag was set or cleared.
    FlagChanged {
        /// Cell coordinate.
        pos: CellPos,
        /// New flag state.
        flagged: bool,
    },
    /// The host clock advanced.
    TimerUpdated(u32),
    /// The host announced the terminal outcome.
    GameOver {
        /// True when every safe cell was revealed.
        won: bool,
        /// Final elapsed seconds.
        seconds: u32,
    },
    /// A full board snapshot was adopted (late join).
    BoardSynced(BoardSnapshot),
}

/// Session-level errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Joining one's own id.
    #[error("cannot join a session hosted by this participant")]
    InvalidTarget,

    /// The bounded-retry connect policy was exhausted.
    #[error("target unreachable after {0} connect attempts")]
    TargetUnreachable(u32),

    /// Transport init failure; fatal until re-initialized.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A guest attempted a host-only action. Rejected locally, no network
    /// round-trip.
    #[error("host-only action")]
    NotAuthorized,

    /// `create_session`/`join_session` while a session is active;
    /// idempotent only after an explicit leave.
    #[error("already in a session")]
    AlreadyInSession,

    /// The operation needs an active session.
    #[error("not in a session")]
    NotInSession,

    /// Switch to a module missing from the registry: a configuration
    /// error, not a runtime branch.
    #[error("unknown game module: {0}")]
    UnknownGame(String),

    /// Board configuration outside sane bounds.
    #[error("invalid board configuration")]
    InvalidConfig,

    /// The coordinator task is gone.
    #[error("session coordinator has shut down")]
    Closed,
}

/// Coordinator tuning. Defaults follow the protocol's nominal values;
/// tests shrink the retry backoff and the probe interval.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Probe period for the heartbeat monitor.
    pub heartbeat_interval: Duration,
    /// How long a probe may stay unanswered before latency reads unknown.
    pub heartbeat_timeout: Duration,
    /// Sliding-window length for RTT smoothing.
    pub rtt_window: usize,
    /// Connect attempts before a join reports unreachable.
    pub connect_attempts: u32,
    /// Fixed backoff between connect attempts.
    pub connect_backoff: Duration,
    /// Host game-clock period.
    pub timer_period: Duration,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            rtt_window: 3,
            connect_attempts: 3,
            connect_backoff: Duration::from_secs(1),
            timer_period: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

// =============================================================================
// COMMANDS AND HANDLE
// =============================================================================

enum Command {
    Create {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Join {
        target: ParticipantId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    ConnectOutcome {
        target: ParticipantId,
        outcome: Result<LinkHandle, SessionError>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    Chat {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SwitchGame {
        game: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    ResetGame {
        config: BoardConfig,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Click {
        pos: CellPos,
        flag: Option<bool>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Roster {
        reply: oneshot::Sender<Vec<Participant>>,
    },
    Board {
        reply: oneshot::Sender<BoardSnapshot>,
    },
    Latencies {
        reply: oneshot::Sender<BTreeMap<ParticipantId, Option<u32>>>,
    },
}

/// Cheap, cloneable handle to a coordinator actor. Every method is a
/// command processed on the actor's event loop, in submission order.
#[derive(Clone)]
pub struct SessionHandle {
    local_id: ParticipantId,
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// The locally assigned participant id (the session id when hosting).
    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Host a new session under the local id. Idempotent only after an
    /// explicit leave.
    pub async fn create_session(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Create { reply }).await?
    }

    /// Join the session advertised under `target`, with bounded-retry
    /// connect attempts. Resolves once the link opens or the policy is
    /// exhausted.
    pub async fn join_session(&self, target: ParticipantId) -> Result<(), SessionError> {
        self.request(|reply| Command::Join { target, reply })
            .await?
    }

    /// Close all links, clear the roster and cancel timers. Idempotent
    /// no-op outside a session.
    pub async fn leave_session(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    /// Send a chat line to every other participant.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| Command::Chat { text, reply }).await?
    }

    /// Host-only: switch the active game module and announce it.
    pub async fn switch_game(&self, game: impl Into<String>) -> Result<(), SessionError> {
        let game = game.into();
        self.request(|reply| Command::SwitchGame { game, reply })
            .await?
    }

    /// Host-only: allocate a fresh board and broadcast its configuration.
    pub async fn reset_game(&self, config: BoardConfig) -> Result<(), SessionError> {
        self.request(|reply| Command::ResetGame { config, reply })
            .await?
    }

    /// Reveal a cell on the shared board.
    pub async fn click_cell(&self, row: u16, col: u16) -> Result<(), SessionError> {
        self.request(|reply| Command::Click {
            pos: CellPos::new(row, col),
            flag: None,
            reply,
        })
        .await?
    }

    /// Set or clear a flag on the shared board.
    pub async fn flag_cell(&self, row: u16, col: u16, flagged: bool) -> Result<(), SessionError> {
        self.request(|reply| Command::Click {
            pos: CellPos::new(row, col),
            flag: Some(flagged),
            reply,
        })
        .await?
    }

    /// The current roster (empty outside a session).
    pub async fn roster(&self) -> Result<Vec<Participant>, SessionError> {
        self.request(|reply| Command::Roster { reply }).await
    }

    /// The active module's board state.
    pub async fn board(&self) -> Result<BoardSnapshot, SessionError> {
        self.request(|reply| Command::Board { reply }).await
    }

    /// Smoothed per-peer round-trip estimates.
    pub async fn latencies(
        &self,
    ) -> Result<BTreeMap<ParticipantId, Option<u32>>, SessionError> {
        self.request(|reply| Command::Latencies { reply }).await
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

struct ActiveSession {
    session_id: ParticipantId,
    role: Role,
    roster: Roster,
}

/// The per-participant coordinator actor.
pub struct SessionCoordinator<T: Transport> {
    transport: std::sync::Arc<T>,
    config: CoordinatorConfig,
    profile: PlayerProfile,
    local_id: ParticipantId,
    session: Option<ActiveSession>,
    links: LinkRegistry,
    heartbeat: HeartbeatMonitor,
    games: ModuleRegistry,
    events: mpsc::Sender<SessionEvent>,
    commands: mpsc::Receiver<Command>,
    commands_tx: mpsc::Sender<Command>,
    link_events_rx: mpsc::Receiver<(LinkId, LinkEvent)>,
    link_events_tx: mpsc::Sender<(LinkId, LinkEvent)>,
    incoming: Option<mpsc::Receiver<LinkHandle>>,
    connect_task: Option<JoinHandle<()>>,
}

impl<T: Transport> SessionCoordinator<T> {
    /// Spawn a coordinator onto the runtime. Returns the command handle and
    /// the observable event stream. The minesweeper module is registered at
    /// startup.
    pub fn spawn(
        transport: T,
        profile: PlayerProfile,
        config: CoordinatorConfig,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let local_id = transport.local_id().clone();
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (link_events_tx, link_events_rx) = mpsc::channel(256);

        let coordinator = SessionCoordinator {
            transport: std::sync::Arc::new(transport),
            heartbeat: HeartbeatMonitor::new(
                config.heartbeat_timeout.as_millis() as u64,
                config.rtt_window,
            ),
            config,
            profile,
            local_id: local_id.clone(),
            session: None,
            links: LinkRegistry::new(),
            games: ModuleRegistry::new(Box::new(Minesweeper::new())),
            events: events_tx,
            commands: commands_rx,
            commands_tx: commands_tx.clone(),
            link_events_rx,
            link_events_tx,
            incoming: None,
            connect_task: None,
        };
        tokio::spawn(coordinator.run());

        (
            SessionHandle {
                local_id,
                commands: commands_tx,
            },
            events_rx,
        )
    }

    async fn run(mut self) {
        // Inbound links are refused while not hosting by dropping them;
        // connect-only transports simply have no inbound stream.
        self.incoming = match self.transport.listen().await {
            Ok(rx) => Some(rx),
            Err(e) => {
                debug!("transport accepts no inbound links: {}", e);
                None
            }
        };

        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut game_clock = interval(self.config.timer_period);
        game_clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some((link, event)) = self.link_events_rx.recv() => {
                    self.handle_link_event(link, event).await;
                }
                incoming = recv_incoming(&mut self.incoming) => match incoming {
                    Some(handle) => self.handle_incoming(handle).await,
                    None => self.incoming = None,
                },
                _ = heartbeat.tick() => self.heartbeat_tick().await,
                _ = game_clock.tick() => self.game_clock_tick().await,
            }
        }
        info!("session coordinator stopped");
    }

    // -------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create { reply } => {
                let _ = reply.send(self.create_session().await);
            }
            Command::Join { target, reply } => self.start_join(target, reply).await,
            Command::ConnectOutcome {
                target,
                outcome,
                reply,
            } => self.finish_join(target, outcome, reply).await,
            Command::Leave { reply } => {
                self.teardown(ConnectionStatus::Disconnected).await;
                let _ = reply.send(());
            }
            Command::Chat { text, reply } => {
                let _ = reply.send(self.send_chat(text).await);
            }
            Command::SwitchGame { game, reply } => {
                let _ = reply.send(self.switch_game(game).await);
            }
            Command::ResetGame { config, reply } => {
                let _ = reply.send(self.reset_game(config).await);
            }
            Command::Click { pos, flag, reply } => {
                let _ = reply.send(self.local_click(pos, flag).await);
            }
            Command::Roster { reply } => {
                let roster = self
                    .session
                    .as_ref()
                    .map(|s| s.roster.snapshot())
                    .unwrap_or_default();
                let _ = reply.send(roster);
            }
            Command::Board { reply } => {
                let _ = reply.send(self.games.active_mut().snapshot());
            }
            Command::Latencies { reply } => {
                let latencies = self
                    .links
                    .open_links()
                    .filter_map(|link| link.remote.clone().map(|peer| (peer, link.rtt_ms)))
                    .collect();
                let _ = reply.send(latencies);
            }
        }
    }

    async fn create_session(&mut self) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Err(SessionError::AlreadyInSession);
        }

        let mut roster = Roster::new();
        roster.upsert(Participant::new(
            self.local_id.clone(),
            &self.profile,
            Role::Host,
        ));
        self.session = Some(ActiveSession {
            session_id: self.local_id.clone(),
            role: Role::Host,
            roster,
        });
        self.init_active_module().await;

        info!(session = %self.local_id, "hosting session");
        self.emit(SessionEvent::StatusChanged(ConnectionStatus::Connected))
            .await;
        self.emit_roster().await;
        Ok(())
    }

    async fn start_join(
        &mut self,
        target: ParticipantId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    ) {
        if self.session.is_some() {
            let _ = reply.send(Err(SessionError::AlreadyInSession));
            return;
        }
        if target == self.local_id {
            let _ = reply.send(Err(SessionError::InvalidTarget));
            return;
        }

        self.emit(SessionEvent::StatusChanged(ConnectionStatus::Connecting))
            .await;

        let transport = self.transport.clone();
        let commands = self.commands_tx.clone();
        let attempts = self.config.connect_attempts.max(1);
        let backoff = self.config.connect_backoff;

        // The retry loop runs off the event loop; leaving aborts it.
        self.connect_task = Some(tokio::spawn(async move {
            let mut last_error: Option<TransportError> = None;
            for attempt in 1..=attempts {
                match transport.connect(&target).await {
                    Ok(handle) => {
                        let _ = commands
                            .send(Command::ConnectOutcome {
                                target,
                                outcome: Ok(handle),
                                reply,
                            })
                            .await;
                        return;
                    }
                    Err(e) => {
                        debug!(attempt, "connect attempt failed: {}", e);
                        last_error = Some(e);
                        if attempt < attempts {
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
            let outcome = Err(match last_error {
                Some(TransportError::Unavailable(message)) => {
                    SessionError::TransportUnavailable(message)
                }
                _ => SessionError::TargetUnreachable(attempts),
            });
            let _ = commands
                .send(Command::ConnectOutcome {
                    target,
                    outcome,
                    reply,
                })
                .await;
        }));
    }

    async fn finish_join(
        &mut self,
        target: ParticipantId,
        outcome: Result<LinkHandle, SessionError>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    ) {
        self.connect_task = None;

        if self.session.is_some() {
            // A session appeared while the connect was in flight; refuse
            // the surplus link by dropping it.
            let _ = reply.send(Err(SessionError::AlreadyInSession));
            return;
        }

        match outcome {
            Ok(handle) => {
                let mut roster = Roster::new();
                let me = Participant::new(self.local_id.clone(), &self.profile, Role::Guest);
                roster.upsert(me.clone());
                self.session = Some(ActiveSession {
                    session_id: target.clone(),
                    role: Role::Guest,
                    roster,
                });

                let link = self.register_link(handle);
                self.init_active_module().await;

                // Self-description opens the roster exchange; the host's
                // snapshot follows it.
                let envelope =
                    Envelope::session(self.local_id.clone(), SessionMessage::PlayerInfo(me));
                self.send_on_link(link, &envelope).await;

                info!(session = %target, "joined session");
                self.emit(SessionEvent::StatusChanged(ConnectionStatus::Connected))
                    .await;
                self.emit_roster().await;
                let _ = reply.send(Ok(()));
            }
            Err(error) => {
                warn!(session = %target, "join failed: {}", error);
                self.emit(SessionEvent::StatusChanged(ConnectionStatus::Error))
                    .await;
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn send_chat(&mut self, text: String) -> Result<(), SessionError> {
        if self.session.is_none() {
            return Err(SessionError::NotInSession);
        }
        let envelope = Envelope::session(
            self.local_id.clone(),
            SessionMessage::ChatMessage { text },
        );
        self.send_envelope(&envelope, None).await;
        Ok(())
    }

    async fn switch_game(&mut self, game: String) -> Result<(), SessionError> {
        let role = self
            .session
            .as_ref()
            .map(|s| s.role)
            .ok_or(SessionError::NotInSession)?;
        if role != Role::Host {
            return Err(SessionError::NotAuthorized);
        }

        self.games.switch(&game)?;
        let envelope = Envelope::session(
            self.local_id.clone(),
            SessionMessage::GameSwitch { game: game.clone() },
        );
        self.send_envelope(&envelope, None).await;
        self.emit(SessionEvent::GameSwitched(game)).await;
        Ok(())
    }

    async fn reset_game(&mut self, config: BoardConfig) -> Result<(), SessionError> {
        let mut ctx = self.game_context().ok_or(SessionError::NotInSession)?;
        let result = self.games.active_mut().reset(&mut ctx, config);
        self.flush_context(ctx).await;
        result
    }

    async fn local_click(
        &mut self,
        pos: CellPos,
        flag: Option<bool>,
    ) -> Result<(), SessionError> {
        let mut ctx = self.game_context().ok_or(SessionError::NotInSession)?;
        let message = GameMessage::CellClick(CellClick {
            row: pos.row,
            col: pos.col,
            flag,
        });
        let local = self.local_id.clone();
        self.games
            .active_mut()
            .handle_message(&mut ctx, &local, &message);
        self.flush_context(ctx).await;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------

    fn register_link(&mut self, handle: LinkHandle) -> LinkId {
        let LinkHandle {
            remote,
            tx,
            events,
        } = handle;
        let id = self.links.insert(remote, tx);
        let forward = self.link_events_tx.clone();
        let pump = tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.recv().await {
                if forward.send((id, event)).await.is_err() {
                    return;
                }
            }
        });
        self.links.set_pump(id, pump);
        id
    }

    async fn handle_incoming(&mut self, handle: LinkHandle) {
        let hosting = matches!(&self.session, Some(s) if s.role == Role::Host);
        if !hosting {
            // Refuse by dropping the handle, which closes the link.
            debug!("refusing inbound link while not hosting");
            return;
        }

        let id = self.register_link(handle);
        // Open the self-description exchange. The roster snapshot waits for
        // the guest's own player_info, so the newcomer can resolve which
        // entry is itself.
        let info = SessionMessage::PlayerInfo(Participant::new(
            self.local_id.clone(),
            &self.profile,
            Role::Host,
        ));
        let envelope = Envelope::session(self.local_id.clone(), info);
        self.send_on_link(id, &envelope).await;
    }

    async fn handle_link_event(&mut self, link: LinkId, event: LinkEvent) {
        match event {
            LinkEvent::Data(text) => self.handle_frame(link, text).await,
            LinkEvent::Closed => {
                self.links.set_state(link, LinkState::Closed);
                self.handle_link_loss(link).await;
            }
            LinkEvent::Error(reason) => {
                // Errored is treated like closed for roster purposes.
                warn!(%reason, "link errored");
                self.links.set_state(link, LinkState::Errored);
                self.handle_link_loss(link).await;
            }
        }
    }

    async fn handle_link_loss(&mut self, link: LinkId) {
        let removed = self.links.remove(link);
        self.heartbeat.forget(link);

        let role = match &self.session {
            Some(session) => session.role,
            None => return,
        };

        match role {
            Role::Host => {
                // One guest dropped; the session continues for the rest.
                let peer = removed.as_ref().and_then(|link| link.remote.clone());
                let Some(peer) = peer else { return };
                let known = self
                    .session
                    .as_mut()
                    .map(|s| s.roster.remove(&peer).is_some())
                    .unwrap_or(false);
                if known {
                    info!(%peer, "guest disconnected");
                    let envelope = Envelope::session(
                        self.local_id.clone(),
                        SessionMessage::PeerLeft { id: peer.clone() },
                    );
                    self.send_envelope(&envelope, None).await;
                    self.emit(SessionEvent::PeerLeft(peer)).await;
                    self.emit_roster().await;
                }
            }
            Role::Guest => {
                // Loss of the host ends the shared session by design; no
                // leader election.
                warn!("link to host lost, session over");
                self.teardown(ConnectionStatus::Error).await;
            }
        }
    }

    // -------------------------------------------------------------------
    // Inbound frames
    // -------------------------------------------------------------------

    async fn handle_frame(&mut self, link: LinkId, text: String) {
        if self.session.is_none() {
            return;
        }
        match Envelope::from_json(&text) {
            Ok(envelope) => self.process_envelope(link, envelope, &text).await,
            Err(_) => {
                // Unrecognized but well-formed types belong to collaborators
                // this participant does not run: the host forwards them
                // unchanged, a guest drops them. Anything else is a protocol
                // violation - logged, never surfaced.
                let typed = serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .map(|value| value.get("type").is_some())
                    .unwrap_or(false);
                let hosting = matches!(&self.session, Some(s) if s.role == Role::Host);
                if typed && hosting {
                    debug!("relaying unrecognized frame");
                    self.relay_raw(&text, link).await;
                } else {
                    debug!("ignoring malformed frame");
                }
            }
        }
    }

    async fn process_envelope(&mut self, link: LinkId, envelope: Envelope, raw: &str) {
        let sender = envelope.sender_id;
        match envelope.body {
            Body::Session(message) => {
                self.process_session_message(link, sender, message, raw).await;
            }
            Body::Game(message) => {
                let Some(session) = &self.session else { return };
                let mut ctx = GameContext::new(
                    self.local_id.clone(),
                    session.role,
                    session.session_id.clone(),
                );
                match self.games.for_message(&message) {
                    Some(module) => module.handle_message(&mut ctx, &sender, &message),
                    None => {
                        warn!(
                            module = message.module_id(),
                            "message for unregistered game module"
                        );
                        return;
                    }
                }
                self.flush_context(ctx).await;
            }
        }
    }

    async fn process_session_message(
        &mut self,
        link: LinkId,
        sender: ParticipantId,
        message: SessionMessage,
        raw: &str,
    ) {
        let (role, session_id) = match &self.session {
            Some(session) => (session.role, session.session_id.clone()),
            None => return,
        };

        match message {
            SessionMessage::PlayerInfo(participant) => match role {
                Role::Host => {
                    // Newcomer identified: bind the link, extend the roster,
                    // then snapshot to the newcomer and notify the others.
                    self.links.bind_remote(link, participant.id.clone());
                    let mut entry = participant;
                    entry.role = Role::Guest;

                    let (is_new, players) = match self.session.as_mut() {
                        Some(session) => {
                            let is_new = session.roster.upsert(entry.clone());
                            (is_new, session.roster.snapshot())
                        }
                        None => return,
                    };

                    let snapshot = Envelope::session(
                        self.local_id.clone(),
                        SessionMessage::PlayersList { players },
                    );
                    self.send_on_link(link, &snapshot).await;

                    if is_new {
                        let joined = Envelope::session(
                            self.local_id.clone(),
                            SessionMessage::PeerJoined {
                                player: entry.clone(),
                            },
                        );
                        self.send_envelope(&joined, Some(link)).await;

                        info!(peer = %entry.id, name = %entry.display_name, "guest joined");
                        self.emit(SessionEvent::PeerJoined(entry.clone())).await;
                        self.emit_roster().await;
                    }

                    // Late-join game snapshot, strictly after the roster
                    // snapshot on the same link. A repeated player_info acts
                    // as a resync request and gets a fresh snapshot too.
                    if let Some(mut ctx) = self.game_context() {
                        self.games.active_mut().send_state(&mut ctx, &entry.id);
                        self.flush_context(ctx).await;
                    }
                }
                Role::Guest => {
                    // The host introduced itself.
                    self.links.bind_remote(link, participant.id.clone());
                    if let Some(session) = self.session.as_mut() {
                        session.roster.upsert(participant);
                    }
                    self.emit_roster().await;
                }
            },

            SessionMessage::PlayersList { players } => {
                if role == Role::Host {
                    debug!("discarding roster snapshot sent to the host");
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.roster.replace_with(players, &self.local_id);
                }
                self.emit_roster().await;
            }

            SessionMessage::PeerJoined { player } => {
                if role == Role::Host {
                    return;
                }
                let added = self
                    .session
                    .as_mut()
                    .map(|s| s.roster.upsert(player.clone()))
                    .unwrap_or(false);
                if added {
                    self.emit(SessionEvent::PeerJoined(player)).await;
                    self.emit_roster().await;
                }
            }

            SessionMessage::PeerLeft { id } => {
                if role == Role::Host {
                    return;
                }
                let removed = self
                    .session
                    .as_mut()
                    .map(|s| s.roster.remove(&id).is_some())
                    .unwrap_or(false);
                if removed {
                    self.emit(SessionEvent::PeerLeft(id)).await;
                    self.emit_roster().await;
                }
            }

            SessionMessage::ChatMessage { text } => {
                // Pass-through: relay first (host), then surface.
                if role == Role::Host {
                    self.relay_raw(raw, link).await;
                }
                self.emit(SessionEvent::Chat { from: sender, text }).await;
            }

            SessionMessage::Heartbeat { timestamp } => {
                // Echo on the same link. Never relayed, never a roster
                // change.
                let ack = Envelope::session(
                    self.local_id.clone(),
                    SessionMessage::HeartbeatAck { timestamp },
                );
                self.send_on_link(link, &ack).await;
            }

            SessionMessage::HeartbeatAck { timestamp } => {
                let rtt = self.heartbeat.on_ack(link, timestamp, now_ms());
                let peer = match self.links.get_mut(link) {
                    Some(link) => {
                        link.rtt_ms = Some(rtt);
                        link.remote.clone()
                    }
                    None => None,
                };
                if let Some(peer) = peer {
                    self.emit(SessionEvent::LatencyUpdated {
                        peer,
                        rtt_ms: Some(rtt),
                    })
                    .await;
                }
            }

            SessionMessage::GameSwitch { game } => {
                if role == Role::Host || sender != session_id {
                    debug!(%sender, "discarding game switch from non-host");
                    return;
                }
                match self.games.switch(&game) {
                    Ok(()) => self.emit(SessionEvent::GameSwitched(game)).await,
                    Err(e) => warn!("game switch rejected: {}", e),
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------

    /// Role-dispatching send used by every higher layer: the host fans out
    /// to all open links (minus the excluded one), a guest sends on its
    /// single host link.
    async fn send_envelope(&self, envelope: &Envelope, exclude: Option<LinkId>) {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("failed to serialize envelope: {}", e);
                return;
            }
        };
        let role = match &self.session {
            Some(session) => session.role,
            None => return,
        };
        match role {
            Role::Host => {
                for link in self.links.open_links() {
                    if Some(link.id) == exclude {
                        continue;
                    }
                    let _ = link.tx.send(text.clone()).await;
                }
            }
            Role::Guest => {
                if let Some(link) = self.links.open_links().next() {
                    let _ = link.tx.send(text).await;
                }
            }
        }
    }

    /// Forward a raw frame unchanged to every open link except its origin.
    async fn relay_raw(&self, raw: &str, origin: LinkId) {
        for link in self.links.open_links() {
            if link.id == origin {
                continue;
            }
            let _ = link.tx.send(raw.to_string()).await;
        }
    }

    async fn send_on_link(&self, link: LinkId, envelope: &Envelope) {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("failed to serialize envelope: {}", e);
                return;
            }
        };
        if let Some(link) = self.links.get(link) {
            let _ = link.tx.send(text).await;
        }
    }

    // -------------------------------------------------------------------
    // Game module plumbing
    // -------------------------------------------------------------------

    fn game_context(&self) -> Option<GameContext> {
        self.session.as_ref().map(|session| {
            GameContext::new(
                self.local_id.clone(),
                session.role,
                session.session_id.clone(),
            )
        })
    }

    async fn init_active_module(&mut self) {
        if let Some(mut ctx) = self.game_context() {
            self.games.active_mut().init(&mut ctx);
            self.flush_context(ctx).await;
        }
    }

    async fn flush_context(&mut self, ctx: GameContext) {
        let (outgoing, events) = ctx.finish();
        for item in outgoing {
            match item {
                Outgoing::Broadcast(message) => {
                    let envelope = Envelope::game(self.local_id.clone(), message);
                    self.send_envelope(&envelope, None).await;
                }
                Outgoing::Relay { from, message } => {
                    // Preserve the original sender; skip its link so the
                    // originator never sees its own message twice.
                    let exclude = self.links.by_remote(&from).map(|link| link.id);
                    let envelope = Envelope::game(from, message);
                    self.send_envelope(&envelope, exclude).await;
                }
                Outgoing::Send { to, message } => {
                    let Some(link) = self.links.by_remote(&to).map(|link| link.id) else {
                        continue;
                    };
                    let envelope = Envelope::game(self.local_id.clone(), message);
                    self.send_on_link(link, &envelope).await;
                }
            }
        }
        for event in events {
            self.emit(event).await;
        }
    }

    // -------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------

    async fn heartbeat_tick(&mut self) {
        if self.session.is_none() {
            return;
        }
        let now = now_ms();

        // Expired probes mark latency unknown; the link itself stays open
        // until the transport says otherwise.
        for link in self.heartbeat.timed_out(now) {
            let peer = match self.links.get_mut(link) {
                Some(link) => {
                    link.rtt_ms = None;
                    link.remote.clone()
                }
                None => None,
            };
            if let Some(peer) = peer {
                self.emit(SessionEvent::LatencyUpdated { peer, rtt_ms: None })
                    .await;
            }
        }

        for link in self.links.open_ids() {
            let timestamp = self.heartbeat.probe(link, now);
            let probe = Envelope::session(
                self.local_id.clone(),
                SessionMessage::Heartbeat { timestamp },
            );
            self.send_on_link(link, &probe).await;
        }
    }

    async fn game_clock_tick(&mut self) {
        let hosting = matches!(&self.session, Some(s) if s.role == Role::Host);
        if !hosting {
            return;
        }
        if let Some(mut ctx) = self.game_context() {
            self.games.active_mut().tick(&mut ctx);
            self.flush_context(ctx).await;
        }
    }

    // -------------------------------------------------------------------
    // Teardown and events
    // -------------------------------------------------------------------

    async fn teardown(&mut self, status: ConnectionStatus) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if self.session.is_none() {
            return;
        }
        // Dropping the links closes every remote end and cancels the pumps.
        self.links.clear();
        self.heartbeat.clear();
        self.session = None;
        info!("left session");
        self.emit(SessionEvent::StatusChanged(status)).await;
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }

    async fn emit_roster(&self) {
        let roster = self
            .session
            .as_ref()
            .map(|s| s.roster.snapshot())
            .unwrap_or_default();
        self.emit(SessionEvent::RosterChanged(roster)).await;
    }
}

async fn recv_incoming(
    incoming: &mut Option<mpsc::Receiver<LinkHandle>>,
) -> Option<LinkHandle> {
    match incoming {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::GamePhase;
    use crate::network::transport::{MemoryHub, MemoryTransport};
    use tokio::time::timeout;

    fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            connect_backoff: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn spawn_peer(
        hub: &MemoryHub,
        name: &str,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        SessionCoordinator::<MemoryTransport>::spawn(
            hub.endpoint(),
            PlayerProfile::new(name, "#336699"),
            test_config(),
        )
    }

    async fn expect_event<F>(
        events: &mut mpsc::Receiver<SessionEvent>,
        description: &str,
        mut predicate: F,
    ) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event stream ended");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", description))
    }

    async fn no_more_chat(events: &mut mpsc::Receiver<SessionEvent>) {
        let extra = timeout(Duration::from_millis(100), async {
            loop {
                match events.recv().await {
                    Some(SessionEvent::Chat { .. }) => return true,
                    Some(_) => continue,
                    None => return false,
                }
            }
        })
        .await;
        assert!(extra.is_err(), "received an unexpected duplicate chat");
    }

    #[tokio::test]
    async fn test_join_rosters_converge() {
        let hub = MemoryHub::new();
        let (host, mut host_events) = spawn_peer(&hub, "Host");
        let (guest, mut guest_events) = spawn_peer(&hub, "Guest");

        host.create_session().await.unwrap();
        guest.join_session(host.local_id().clone()).await.unwrap();

        expect_event(&mut host_events, "peer joined", |e| {
            matches!(e, SessionEvent::PeerJoined(p) if &p.id == guest.local_id())
        })
        .await;
        expect_event(&mut guest_events, "roster with both peers", |e| {
            matches!(e, SessionEvent::RosterChanged(r) if r.len() == 2)
        })
        .await;

        let host_roster = host.roster().await.unwrap();
        let guest_roster = guest.roster().await.unwrap();
        assert_eq!(host_roster.len(), 2);
        assert_eq!(guest_roster.len(), 2);

        // Exactly one host, and its id is the session id.
        let hosts: Vec<_> = guest_roster
            .iter()
            .filter(|p| p.role == Role::Host)
            .collect();
        assert_eq!(hosts.len(), 1);
        assert_eq!(&hosts[0].id, host.local_id());
    }

    #[tokio::test]
    async fn test_join_own_id_is_invalid_target() {
        let hub = MemoryHub::new();
        let (host, _events) = spawn_peer(&hub, "Host");
        host.create_session().await.unwrap();

        let result = host.join_session(host.local_id().clone()).await;
        // In a session already, but self-join is checked on a fresh peer too.
        assert!(matches!(result, Err(SessionError::AlreadyInSession)));

        let (loner, _events) = spawn_peer(&hub, "Loner");
        let result = loner.join_session(loner.local_id().clone()).await;
        assert!(matches!(result, Err(SessionError::InvalidTarget)));
    }

    #[tokio::test]
    async fn test_join_unreachable_after_bounded_retries() {
        let hub = MemoryHub::new();
        let (guest, mut events) = spawn_peer(&hub, "Guest");

        let result = guest.join_session(ParticipantId::from("no-such-room")).await;
        assert!(matches!(
            result,
            Err(SessionError::TargetUnreachable(attempts)) if attempts == 3
        ));
        expect_event(&mut events, "error status", |e| {
            matches!(e, SessionEvent::StatusChanged(ConnectionStatus::Error))
        })
        .await;

        // The failed join leaves no session behind.
        assert!(guest.roster().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_is_idempotent_only_after_leave() {
        let hub = MemoryHub::new();
        let (host, _events) = spawn_peer(&hub, "Host");

        host.create_session().await.unwrap();
        assert!(matches!(
            host.create_session().await,
            Err(SessionError::AlreadyInSession)
        ));

        host.leave_session().await.unwrap();
        host.create_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let hub = MemoryHub::new();
        let (peer, _events) = spawn_peer(&hub, "Peer");

        peer.leave_session().await.unwrap();
        peer.leave_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_scenario_a_late_joiner_gets_pending_snapshot() {
        let hub = MemoryHub::new();
        let (host, _host_events) = spawn_peer(&hub, "Host");
        host.create_session().await.unwrap();
        host.reset_game(BoardConfig::BEGINNER).await.unwrap();

        let (guest, mut guest_events) = spawn_peer(&hub, "Guest");
        guest.join_session(host.local_id().clone()).await.unwrap();

        let event = expect_event(&mut guest_events, "board snapshot", |e| {
            matches!(e, SessionEvent::BoardSynced(_))
        })
        .await;
        if let SessionEvent::BoardSynced(snapshot) = event {
            assert_eq!(snapshot.config, BoardConfig::BEGINNER);
            assert!(snapshot.revealed.is_empty());
            assert_eq!(snapshot.phase, GamePhase::Pending);
            assert_eq!(snapshot.mines, None);
        }
    }

    #[tokio::test]
    async fn test_scenario_b_first_move_race_safety() {
        let hub = MemoryHub::new();
        let (host, _host_events) = spawn_peer(&hub, "Host");
        let (guest, mut guest_events) = spawn_peer(&hub, "Guest");

        host.create_session().await.unwrap();
        guest.join_session(host.local_id().clone()).await.unwrap();

        // Guest clicks before any hazard exists.
        guest.click_cell(0, 0).await.unwrap();

        expect_event(&mut guest_events, "reveal after mines arrive", |e| {
            matches!(e, SessionEvent::CellsRevealed { .. })
        })
        .await;

        let host_board = host.board().await.unwrap();
        let guest_board = guest.board().await.unwrap();

        // Host placed the full count, avoiding the click and its neighbors.
        let mines = host_board.mines.clone().expect("host decided mines");
        assert_eq!(mines.len(), 10);
        let origin = CellPos::new(0, 0);
        for mine in &mines {
            assert!(!origin.touches(*mine));
        }

        // Both sides hold the same field and the same flood-fill result.
        assert_eq!(host_board.mines, guest_board.mines);
        assert_eq!(host_board.revealed, guest_board.revealed);
        assert!(host_board.revealed.contains(&origin));
        assert_eq!(host_board.phase, GamePhase::Running);
        assert_eq!(guest_board.phase, GamePhase::Running);
    }

    #[tokio::test]
    async fn test_scenario_c_guest_drop_updates_everyone() {
        let hub = MemoryHub::new();
        let (host, mut host_events) = spawn_peer(&hub, "Host");
        let (guest_a, mut a_events) = spawn_peer(&hub, "A");
        let (guest_b, _b_events) = spawn_peer(&hub, "B");

        host.create_session().await.unwrap();
        guest_a.join_session(host.local_id().clone()).await.unwrap();
        guest_b.join_session(host.local_id().clone()).await.unwrap();

        expect_event(&mut a_events, "roster with three peers", |e| {
            matches!(e, SessionEvent::RosterChanged(r) if r.len() == 3)
        })
        .await;
        assert_eq!(host.roster().await.unwrap().len(), 3);

        // B's link closes mid-session.
        guest_b.leave_session().await.unwrap();

        expect_event(&mut host_events, "host sees B leave", |e| {
            matches!(e, SessionEvent::PeerLeft(id) if id == guest_b.local_id())
        })
        .await;
        expect_event(&mut a_events, "remaining guest sees peer_left", |e| {
            matches!(e, SessionEvent::PeerLeft(id) if id == guest_b.local_id())
        })
        .await;

        // Host roster equals open links plus itself.
        assert_eq!(host.roster().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scenario_d_chat_relayed_exactly_once() {
        let hub = MemoryHub::new();
        let (host, mut host_events) = spawn_peer(&hub, "Host");
        let (guest_a, mut a_events) = spawn_peer(&hub, "A");
        let (guest_b, mut b_events) = spawn_peer(&hub, "B");

        host.create_session().await.unwrap();
        guest_a.join_session(host.local_id().clone()).await.unwrap();
        guest_b.join_session(host.local_id().clone()).await.unwrap();

        // Two guests chat concurrently.
        let (ra, rb) = tokio::join!(guest_a.send_chat("from A"), guest_b.send_chat("from B"));
        ra.unwrap();
        rb.unwrap();

        // The host hears both.
        expect_event(&mut host_events, "chat from A", |e| {
            matches!(e, SessionEvent::Chat { text, .. } if text == "from A")
        })
        .await;
        expect_event(&mut host_events, "chat from B", |e| {
            matches!(e, SessionEvent::Chat { text, .. } if text == "from B")
        })
        .await;

        // Each guest hears the other exactly once, never its own echo.
        let event = expect_event(&mut a_events, "chat relayed to A", |e| {
            matches!(e, SessionEvent::Chat { .. })
        })
        .await;
        if let SessionEvent::Chat { from, text } = event {
            assert_eq!(&from, guest_b.local_id());
            assert_eq!(text, "from B");
        }
        no_more_chat(&mut a_events).await;

        let event = expect_event(&mut b_events, "chat relayed to B", |e| {
            matches!(e, SessionEvent::Chat { .. })
        })
        .await;
        if let SessionEvent::Chat { from, text } = event {
            assert_eq!(&from, guest_a.local_id());
            assert_eq!(text, "from A");
        }
        no_more_chat(&mut b_events).await;
    }

    #[tokio::test]
    async fn test_guest_reset_rejected_without_round_trip() {
        let hub = MemoryHub::new();
        let (host, _host_events) = spawn_peer(&hub, "Host");
        let (guest, _guest_events) = spawn_peer(&hub, "Guest");

        host.create_session().await.unwrap();
        guest.join_session(host.local_id().clone()).await.unwrap();

        let result = guest.reset_game(BoardConfig::BEGINNER).await;
        assert!(matches!(result, Err(SessionError::NotAuthorized)));
    }

    #[tokio::test]
    async fn test_reset_propagates_to_guests() {
        let hub = MemoryHub::new();
        let (host, _host_events) = spawn_peer(&hub, "Host");
        let (guest, mut guest_events) = spawn_peer(&hub, "Guest");

        host.create_session().await.unwrap();
        guest.join_session(host.local_id().clone()).await.unwrap();

        let config = BoardConfig {
            width: 16,
            height: 16,
            mines: 40,
        };
        host.reset_game(config).await.unwrap();

        expect_event(&mut guest_events, "game reset", |e| {
            matches!(e, SessionEvent::GameReset(c) if *c == config)
        })
        .await;

        let board = guest.board().await.unwrap();
        assert_eq!(board.config, config);
        assert_eq!(board.phase, GamePhase::Pending);
        assert_eq!(board.mines, None);
    }

    #[tokio::test]
    async fn test_host_leave_ends_session_for_guest() {
        let hub = MemoryHub::new();
        let (host, _host_events) = spawn_peer(&hub, "Host");
        let (guest, mut guest_events) = spawn_peer(&hub, "Guest");

        host.create_session().await.unwrap();
        guest.join_session(host.local_id().clone()).await.unwrap();

        host.leave_session().await.unwrap();

        expect_event(&mut guest_events, "session over", |e| {
            matches!(e, SessionEvent::StatusChanged(ConnectionStatus::Error))
        })
        .await;
        assert!(guest.roster().await.unwrap().is_empty());
        assert!(matches!(
            guest.send_chat("anyone?").await,
            Err(SessionError::NotInSession)
        ));
    }

    #[tokio::test]
    async fn test_switch_game_validates_registry() {
        let hub = MemoryHub::new();
        let (host, _events) = spawn_peer(&hub, "Host");
        host.create_session().await.unwrap();

        host.switch_game("minesweeper").await.unwrap();
        assert!(matches!(
            host.switch_game("tictactoe").await,
            Err(SessionError::UnknownGame(_))
        ));
    }

    #[tokio::test]
    async fn test_flags_propagate_and_converge() {
        let hub = MemoryHub::new();
        let (host, mut host_events) = spawn_peer(&hub, "Host");
        let (guest, _guest_events) = spawn_peer(&hub, "Guest");

        host.create_session().await.unwrap();
        guest.join_session(host.local_id().clone()).await.unwrap();

        guest.flag_cell(3, 3, true).await.unwrap();
        expect_event(&mut host_events, "flag set", |e| {
            matches!(
                e,
                SessionEvent::FlagChanged {
                    pos,
                    flagged: true
                } if *pos == CellPos::new(3, 3)
            )
        })
        .await;
        assert!(host
            .board()
            .await
            .unwrap()
            .flagged
            .contains(&CellPos::new(3, 3)));

        guest.flag_cell(3, 3, false).await.unwrap();
        expect_event(&mut host_events, "flag cleared", |e| {
            matches!(e, SessionEvent::FlagChanged { flagged: false, .. })
        })
        .await;
        assert!(host.board().await.unwrap().flagged.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_reports_latency() {
        let hub = MemoryHub::new();
        let config = CoordinatorConfig {
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(100),
            connect_backoff: Duration::from_millis(10),
            ..Default::default()
        };
        let (host, mut host_events) = SessionCoordinator::<MemoryTransport>::spawn(
            hub.endpoint(),
            PlayerProfile::new("Host", "#336699"),
            config.clone(),
        );
        let (guest, _guest_events) = SessionCoordinator::<MemoryTransport>::spawn(
            hub.endpoint(),
            PlayerProfile::new("Guest", "#993366"),
            config,
        );

        host.create_session().await.unwrap();
        guest.join_session(host.local_id().clone()).await.unwrap();

        let event = expect_event(&mut host_events, "latency update", |e| {
            matches!(e, SessionEvent::LatencyUpdated { rtt_ms: Some(_), .. })
        })
        .await;
        if let SessionEvent::LatencyUpdated { peer, .. } = event {
            assert_eq!(&peer, guest.local_id());
        }

        let latencies = host.latencies().await.unwrap();
        assert!(latencies.contains_key(guest.local_id()));
    }
}
