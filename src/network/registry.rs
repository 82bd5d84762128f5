//! Peer Link Registry
//!
//! Owns the set of open links for the local participant and maps them to
//! participant identifiers. Inbound links start unidentified and are bound
//! to an id by the `player_info` exchange.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::network::protocol::ParticipantId;

/// Locally unique link identifier.
pub type LinkId = u64;

/// Link lifecycle. A registry entry exists only once the link is open;
/// the connecting stage lives in the coordinator's bounded-retry task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Delivering frames.
    Open,
    /// Remote end closed the link.
    Closed,
    /// Transport reported a failure. Treated like closed for the roster.
    Errored,
}

/// One registered link.
#[derive(Debug)]
pub struct Link {
    /// Registry id.
    pub id: LinkId,
    /// Remote participant, once identified.
    pub remote: Option<ParticipantId>,
    /// Current state.
    pub state: LinkState,
    /// Outbound frames.
    pub tx: mpsc::Sender<String>,
    /// Smoothed round-trip estimate; `None` until the first ack, and reset
    /// to `None` when probes go unanswered.
    pub rtt_ms: Option<u32>,
    pump: Option<JoinHandle<()>>,
}

impl Link {
    /// Whether frames can still be sent.
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // Stop forwarding events for links torn down by an explicit leave.
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// The local participant's open links.
///
/// Star topology: a guest registry holds exactly one link (to the host), a
/// host registry holds one per guest.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: BTreeMap<LinkId, Link>,
    next_id: LinkId,
}

impl LinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open link and hand out its id.
    pub fn insert(&mut self, remote: Option<ParticipantId>, tx: mpsc::Sender<String>) -> LinkId {
        let id = self.next_id;
        self.next_id += 1;
        self.links.insert(
            id,
            Link {
                id,
                remote,
                state: LinkState::Open,
                tx,
                rtt_ms: None,
                pump: None,
            },
        );
        id
    }

    /// Attach the event pump task so removal can cancel it.
    pub fn set_pump(&mut self, id: LinkId, pump: JoinHandle<()>) {
        if let Some(link) = self.links.get_mut(&id) {
            link.pump = Some(pump);
        }
    }

    /// Bind an inbound link to the participant it belongs to.
    pub fn bind_remote(&mut self, id: LinkId, remote: ParticipantId) {
        if let Some(link) = self.links.get_mut(&id) {
            link.remote = Some(remote);
        }
    }

    /// Record a terminal state. A closed or errored link no longer counts
    /// as open, so sends stop even before the entry is removed.
    pub fn set_state(&mut self, id: LinkId, state: LinkState) {
        if let Some(link) = self.links.get_mut(&id) {
            link.state = state;
        }
    }

    /// Look up a link.
    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    /// Look up a link mutably.
    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(&id)
    }

    /// Find the link bound to a participant.
    pub fn by_remote(&self, remote: &ParticipantId) -> Option<&Link> {
        self.links
            .values()
            .find(|link| link.remote.as_ref() == Some(remote))
    }

    /// Remove a link, cancelling its pump.
    pub fn remove(&mut self, id: LinkId) -> Option<Link> {
        self.links.remove(&id)
    }

    /// Open links in id order.
    pub fn open_links(&self) -> impl Iterator<Item = &Link> {
        self.links.values().filter(|link| link.is_open())
    }

    /// Open link ids, for probe scheduling.
    pub fn open_ids(&self) -> Vec<LinkId> {
        self.open_links().map(|link| link.id).collect()
    }

    /// Number of open links.
    pub fn open_count(&self) -> usize {
        self.open_links().count()
    }

    /// Drop every link (cancelling pumps and closing remote ends).
    pub fn clear(&mut self) {
        self.links.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
