//! Game Module Interface
//!
//! The coordinator and a game implementation meet at an explicit
//! capability interface, registered in a lookup table at startup. Absence
//! of a module is a configuration error, not a runtime branch.

use std::collections::BTreeMap;

use crate::game::board::{BoardConfig, BoardSnapshot};
use crate::network::protocol::{GameMessage, ParticipantId, Role};
use crate::network::session::{SessionError, SessionEvent};

/// A message a module wants delivered, in emit order. Per-link FIFO then
/// preserves that order on the wire, which is what the hazards-before-
/// reveal guarantee rests on.
#[derive(Debug)]
pub enum Outgoing {
    /// To every reachable participant: all open links for a host, the host
    /// link for a guest. Sender id is the local participant.
    Broadcast(GameMessage),
    /// Host-only relay: to every open link except the originator's,
    /// preserving the original sender id. `from == local` behaves like a
    /// broadcast (the local participant has no link).
    Relay {
        /// The original sender, kept on the envelope.
        from: ParticipantId,
        /// The message to forward.
        message: GameMessage,
    },
    /// To a single participant. Sender id is the local participant.
    Send {
        /// Destination.
        to: ParticipantId,
        /// The message.
        message: GameMessage,
    },
}

/// Collects a module call's side effects; the coordinator drains them
/// afterwards, so modules never touch links or the event channel directly.
#[derive(Debug)]
pub struct GameContext {
    /// The local participant.
    pub local_id: ParticipantId,
    /// Local role.
    pub role: Role,
    /// The session id, which is the host's id.
    pub session_id: ParticipantId,
    outgoing: Vec<Outgoing>,
    events: Vec<SessionEvent>,
}

impl GameContext {
    /// Build a context for one module call.
    pub fn new(local_id: ParticipantId, role: Role, session_id: ParticipantId) -> Self {
        Self {
            local_id,
            role,
            session_id,
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Whether the local participant is the host.
    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Whether `sender` is the session's authority.
    pub fn is_from_host(&self, sender: &ParticipantId) -> bool {
        sender == &self.session_id
    }

    /// Whether `sender` is the local participant.
    pub fn is_local(&self, sender: &ParticipantId) -> bool {
        sender == &self.local_id
    }

    /// Queue a broadcast (role-dispatched by the coordinator).
    pub fn broadcast(&mut self, message: GameMessage) {
        self.outgoing.push(Outgoing::Broadcast(message));
    }

    /// Queue a host relay excluding the originator.
    pub fn relay(&mut self, from: ParticipantId, message: GameMessage) {
        self.outgoing.push(Outgoing::Relay { from, message });
    }

    /// Queue a message to one participant.
    pub fn send_to(&mut self, to: ParticipantId, message: GameMessage) {
        self.outgoing.push(Outgoing::Send { to, message });
    }

    /// Surface an observable outcome to the embedding layer.
    pub fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    /// Take the collected side effects.
    pub fn finish(self) -> (Vec<Outgoing>, Vec<SessionEvent>) {
        (self.outgoing, self.events)
    }
}

/// Capability interface between the coordinator and a game implementation.
pub trait GameModule: Send + Sync {
    /// Stable module id; also the type-tag prefix of its wire messages.
    fn id(&self) -> &'static str;

    /// A session began (created or joined): start from a fresh default
    /// instance.
    fn init(&mut self, ctx: &mut GameContext);

    /// Local reset request. Host-only; a guest is rejected locally with
    /// [`SessionError::NotAuthorized`], no network round-trip.
    fn reset(&mut self, ctx: &mut GameContext, config: BoardConfig) -> Result<(), SessionError>;

    /// One inbound or locally originated message. `sender == ctx.local_id`
    /// marks local intent (a click made on this participant's board).
    fn handle_message(&mut self, ctx: &mut GameContext, sender: &ParticipantId, message: &GameMessage);

    /// Host-side: bring a late joiner to parity. Sent after the roster
    /// snapshot.
    fn send_state(&mut self, ctx: &mut GameContext, to: &ParticipantId);

    /// Host-side 1 Hz clock while a session is active.
    fn tick(&mut self, ctx: &mut GameContext);

    /// Current instance state, for local queries.
    fn snapshot(&self) -> BoardSnapshot;
}

/// Lookup table of registered game modules.
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, Box<dyn GameModule>>,
    active: &'static str,
}

impl ModuleRegistry {
    /// Build a registry around one initial module; it becomes active.
    pub fn new(initial: Box<dyn GameModule>) -> Self {
        let active = initial.id();
        let mut modules = BTreeMap::new();
        modules.insert(active, initial);
        Self { modules, active }
    }

    /// Register a further module.
    pub fn register(&mut self, module: Box<dyn GameModule>) {
        self.modules.insert(module.id(), module);
    }

    /// The active module id.
    pub fn active_id(&self) -> &'static str {
        self.active
    }

    /// Switch the active module. Unknown ids are a configuration error.
    pub fn switch(&mut self, id: &str) -> Result<(), SessionError> {
        match self.modules.get_key_value(id) {
            Some((key, _)) => {
                self.active = *key;
                Ok(())
            }
            None => Err(SessionError::UnknownGame(id.to_string())),
        }
    }

    /// The active module.
    pub fn active_mut(&mut self) -> &mut dyn GameModule {
        self.modules
            .get_mut(self.active)
            .expect("active module is always registered")
            .as_mut()
    }

    /// The module a message belongs to, if registered.
    pub fn for_message(&mut self, message: &GameMessage) -> Option<&mut Box<dyn GameModule>> {
        self.modules.get_mut(message.module_id())
    }
}

// =============================================================================
// TESTS
// =============================================================================
