use rendezvous_protocol::{PeerId, RoomId};
use std::collections::{HashMap, HashSet};

/// Room id -> member peer ids. A room is present only while it has members.
///
/// Only the registry holds one, so membership always moves together with `Peer::rooms`.
#[derive(Debug, Default)]
pub(crate) struct RoomIndex {
    rooms: HashMap<RoomId, HashSet<PeerId>>,
}

impl RoomIndex {
    /// Add a peer to a room, creating the room if absent, returning the members after insertion.
    pub fn insert(&mut self, room: &RoomId, peer_id: &PeerId) -> Vec<PeerId> {
        let members = self.rooms.entry(room.clone()).or_default();
        members.insert(peer_id.clone());
        members.iter().cloned().collect()
    }

    /// Remove a peer from a room, dropping the room once it is empty.
    pub fn remove(&mut self, room: &RoomId, peer_id: &PeerId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(peer_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    pub fn members(&self, room: &RoomId) -> Option<Vec<PeerId>> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&RoomId, &HashSet<PeerId>)> {
        self.rooms.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_creates_room_and_lists_members() {
        let mut index = RoomIndex::default();
        let room = RoomId::from("r1");

        assert_eq!(index.insert(&room, &"aaa".into()), vec![PeerId::from("aaa")]);

        let mut members = index.insert(&room, &"bbb".into());
        members.sort();
        assert_eq!(members, vec![PeerId::from("aaa"), PeerId::from("bbb")]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn emptied_room_is_dropped() {
        let mut index = RoomIndex::default();
        let room = RoomId::from("r1");
        index.insert(&room, &"aaa".into());
        index.insert(&room, &"bbb".into());

        index.remove(&room, &"aaa".into());
        assert_eq!(index.members(&room), Some(vec![PeerId::from("bbb")]));

        index.remove(&room, &"bbb".into());
        assert_eq!(index.members(&room), None);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn removing_from_unknown_room_is_noop() {
        let mut index = RoomIndex::default();
        index.remove(&"nowhere".into(), &"aaa".into());
        assert_eq!(index.len(), 0);
    }
}
