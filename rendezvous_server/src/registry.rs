use crate::{
    error::{DisconnectReason, SignalingError},
    rooms::RoomIndex,
};
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use rand::{distr::Alphanumeric, Rng};
use rendezvous_protocol::{is_valid_id, PeerEvent, PeerId, RoomId};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{sync::mpsc::UnboundedSender, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Length of server generated peer ids.
pub const PEER_ID_LENGTH: usize = 16;

/// Write half of a peer's websocket, drained by its sender task.
pub(crate) type PeerSender = UnboundedSender<Result<Message, axum::Error>>;

#[derive(Debug)]
struct Peer {
    sender: PeerSender,
    rooms: HashSet<RoomId>,
    last_liveness: Instant,
    /// Wakes the peer's read loop once it has been torn down.
    kick: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryState {
    peers: HashMap<PeerId, Peer>,
    rooms: RoomIndex,
}

/// Result of a successful join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The peer was added; holds the room's members including the joiner.
    Joined(Vec<PeerId>),
    /// The peer was already a member, nothing changed and nothing was sent.
    AlreadyMember,
}

/// Owner of every connected peer and every room.
///
/// All membership changes and all writes to peer sockets happen while holding the one
/// lock inside, so a peer's outbound frames are queued in the order the registry saw
/// the events that produced them.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl PeerRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly upgraded connection and send it its `init` event.
    pub(crate) fn connect(&self, sender: PeerSender, kick: CancellationToken) -> PeerId {
        let mut state = self.lock();
        let peer_id = loop {
            let candidate = random_peer_id();
            if !state.peers.contains_key(&candidate) {
                break candidate;
            }
        };
        state.peers.insert(
            peer_id.clone(),
            Peer {
                sender,
                rooms: HashSet::new(),
                last_liveness: Instant::now(),
                kick,
            },
        );

        let event = PeerEvent::Init {
            your_peer_id: peer_id.clone(),
        };
        if let Err(e) = state.send(&peer_id, Message::text(event.to_string())) {
            error!("error sending init to {peer_id}: {e:?}");
        }
        info!("{peer_id} connected, {} peers online", state.peers.len());
        peer_id
    }

    /// Record inbound traffic from a peer. Returns false if the peer is no longer registered.
    pub fn touch(&self, peer_id: &PeerId) -> bool {
        match self.lock().peers.get_mut(peer_id) {
            Some(peer) => {
                peer.last_liveness = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Add a peer to a room and send the room's full member list to every member.
    pub fn join(&self, peer_id: &PeerId, room: RoomId) -> Result<JoinOutcome, SignalingError> {
        if !is_valid_id(room.as_str()) || !is_valid_id(peer_id.as_str()) {
            return Err(SignalingError::InvalidIds);
        }

        let mut state = self.lock();
        let peer = state
            .peers
            .get_mut(peer_id)
            .ok_or(SignalingError::UnknownPeer)?;
        if !peer.rooms.insert(room.clone()) {
            return Ok(JoinOutcome::AlreadyMember);
        }
        let members = state.rooms.insert(&room, peer_id);

        let event = Message::text(
            PeerEvent::Joined {
                other_peer_ids: members.clone(),
            }
            .to_string(),
        );
        for member in &members {
            if let Err(e) = state.send(member, event.clone()) {
                error!("error sending joined to {member}: {e:?}");
            }
        }
        info!("{peer_id} joined {room}, members: {members:?}");
        Ok(JoinOutcome::Joined(members))
    }

    /// Forward a frame verbatim to the receiver.
    pub fn relay(&self, receiver: &PeerId, frame: &str) -> Result<(), SignalingError> {
        self.lock()
            .send(receiver, Message::text(frame.to_owned()))
    }

    /// Tear a peer down: close its socket, leave all its rooms, forget it.
    ///
    /// Returns false if the peer was already gone, in which case nothing happens.
    pub fn disconnect(&self, peer_id: &PeerId, reason: DisconnectReason) -> bool {
        self.lock().remove(peer_id, &reason)
    }

    /// Disconnect every peer silent for longer than `window`, returning their ids.
    pub fn sweep(&self, now: Instant, window: Duration) -> Vec<PeerId> {
        let mut state = self.lock();
        let stale: Vec<PeerId> = state
            .peers
            .iter()
            .filter(|(_, peer)| now.saturating_duration_since(peer.last_liveness) > window)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();

        let reason = DisconnectReason::Inactive(window);
        for peer_id in &stale {
            state.remove(peer_id, &reason);
        }
        stale
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.lock().peers.contains_key(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    /// Members of a room, or `None` if the room does not exist.
    pub fn room_members(&self, room: &RoomId) -> Option<Vec<PeerId>> {
        self.lock().rooms.members(room)
    }

    /// Rooms a peer has joined, or `None` if the peer is not registered.
    pub fn rooms_of(&self, peer_id: &PeerId) -> Option<Vec<RoomId>> {
        self.lock()
            .peers
            .get(peer_id)
            .map(|peer| peer.rooms.iter().cloned().collect())
    }
}

impl RegistryState {
    /// Queue a message on a peer's socket without blocking.
    fn send(&self, peer_id: &PeerId, message: Message) -> Result<(), SignalingError> {
        let peer = self.peers.get(peer_id).ok_or(SignalingError::UnknownPeer)?;
        peer.sender.send(Ok(message)).map_err(SignalingError::from)
    }

    fn remove(&mut self, peer_id: &PeerId, reason: &DisconnectReason) -> bool {
        let Some(peer) = self.peers.remove(peer_id) else {
            return false;
        };
        info!("disconnecting {peer_id}: {reason}");

        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static(""),
        }));
        if let Err(e) = peer.sender.send(Ok(close)) {
            warn!("error sending close to {peer_id}: {e:?}");
        }

        for room in &peer.rooms {
            self.rooms.remove(room, peer_id);
        }
        peer.kick.cancel();
        true
    }
}

fn random_peer_id() -> PeerId {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(PEER_ID_LENGTH)
        .map(char::from)
        .collect::<String>()
        .into()
}
