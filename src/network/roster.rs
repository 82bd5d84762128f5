//! Roster Synchronizer
//!
//! Participant metadata, kept eventually consistent via host-originated
//! snapshots: the host mutates its roster directly and broadcasts
//! `players_list` / `peer_joined` / `peer_left`; guests apply what the host
//! announces.

use std::collections::BTreeMap;

use crate::network::protocol::{Participant, ParticipantId};

/// The local view of the session's participants.
#[derive(Debug, Default)]
pub struct Roster {
    participants: BTreeMap<ParticipantId, Participant>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an entry. Returns true if the participant was new.
    pub fn upsert(&mut self, participant: Participant) -> bool {
        self.participants
            .insert(participant.id.clone(), participant)
            .is_none()
    }

    /// Remove an entry.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Look up an entry.
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Whether the participant is known.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    /// Participant count, including self.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Drop every entry (session teardown).
    pub fn clear(&mut self) {
        self.participants.clear();
    }

    /// All entries in id order, as broadcast in snapshots.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }

    /// Replace the map wholesale from a host snapshot, preserving the local
    /// entry: a stale copy of ourselves in the snapshot must not overwrite
    /// what we know locally.
    pub fn replace_with(&mut self, players: Vec<Participant>, local: &ParticipantId) {
        let own = self.participants.remove(local);
        self.participants.clear();
        for player in players {
            if &player.id != local {
                self.participants.insert(player.id.clone(), player);
            }
        }
        if let Some(own) = own {
            self.participants.insert(local.clone(), own);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{PlayerProfile, Role};

    fn participant(id: &str, name: &str, role: Role) -> Participant {
        Participant::new(
            ParticipantId::from(id),
            &PlayerProfile::new(name, "#abcdef"),
            role,
        )
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut roster = Roster::new();
        assert!(roster.upsert(participant("h", "Host", Role::Host)));
        assert!(!roster.upsert(participant("h", "Host renamed", Role::Host)));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get(&"h".into()).unwrap().display_name, "Host renamed");

        assert!(roster.remove(&"h".into()).is_some());
        assert!(roster.is_empty());
    }

    #[test]
    fn test_replace_preserves_local_entry() {
        let local = ParticipantId::from("me");
        let mut roster = Roster::new();
        roster.upsert(participant("me", "My real name", Role::Guest));

        // Host snapshot carries a stale copy of us plus two others.
        roster.replace_with(
            vec![
                participant("h", "Host", Role::Host),
                participant("me", "stale", Role::Guest),
                participant("g2", "Other", Role::Guest),
            ],
            &local,
        );

        assert_eq!(roster.len(), 3);
        assert_eq!(roster.get(&local).unwrap().display_name, "My real name");
        assert!(roster.contains(&"h".into()));
        assert!(roster.contains(&"g2".into()));
    }

    #[test]
    fn test_replace_drops_entries_missing_from_snapshot() {
        let local = ParticipantId::from("me");
        let mut roster = Roster::new();
        roster.upsert(participant("me", "Me", Role::Guest));
        roster.upsert(participant("gone", "Gone", Role::Guest));

        roster.replace_with(vec![participant("h", "Host", Role::Host)], &local);

        assert!(!roster.contains(&"gone".into()));
        assert!(roster.contains(&local));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_snapshot_is_id_ordered() {
        let mut roster = Roster::new();
        roster.upsert(participant("b", "B", Role::Guest));
        roster.upsert(participant("a", "A", Role::Host));

        let ids: Vec<String> = roster
            .snapshot()
            .iter()
            .map(|p| p.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
