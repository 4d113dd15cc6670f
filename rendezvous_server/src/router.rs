use crate::{
    error::{DisconnectReason, SignalingError},
    registry::{JoinOutcome, PeerRegistry, PeerSender},
};
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, StreamExt};
use rendezvous_protocol::{PeerId, PeerRequest};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Spawn the task owning a socket's write half; everything queued on the returned
/// sender is written in order.
fn spawn_sender_task(sender: SplitSink<WebSocket, Message>) -> PeerSender {
    let (client_sender, receiver) = mpsc::unbounded_channel();
    tokio::task::spawn(UnboundedReceiverStream::new(receiver).forward(sender));
    client_sender
}

/// One of these runs for every upgraded websocket, until the peer is torn down.
pub(crate) async fn run_peer(ws: WebSocket, registry: PeerRegistry, shutdown: CancellationToken) {
    let (ws_sender, mut ws_receiver) = ws.split();
    let sender = spawn_sender_task(ws_sender);
    let kick = shutdown.child_token();
    let peer_id = registry.connect(sender, kick.clone());

    let reason = loop {
        let frame = tokio::select! {
            // Either the server is stopping, or the registry already removed us and
            // the disconnect below is a no-op.
            _ = kick.cancelled() => break DisconnectReason::Shutdown,
            frame = ws_receiver.next() => frame,
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                // Most likely a ConnectionReset or similar.
                warn!("Unrecoverable error with {peer_id}: {e:?}");
                break DisconnectReason::SocketDisconnected;
            }
            None => break DisconnectReason::SocketDisconnected,
        };

        if !registry.touch(&peer_id) {
            break DisconnectReason::SocketDisconnected;
        }

        let text = match &message {
            Message::Text(text) => text.as_str(),
            Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => break DisconnectReason::InvalidFormat,
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                info!("Connection closed by {peer_id}");
                break DisconnectReason::SocketDisconnected;
            }
        };

        if let Err(reason) = handle_frame(&registry, &peer_id, text) {
            break reason;
        }
    };

    registry.disconnect(&peer_id, reason);
}

/// Decode and act on one data frame from `peer_id`.
///
/// An `Err` means the peer broke the protocol and must be disconnected for that reason.
pub(crate) fn handle_frame(
    registry: &PeerRegistry,
    peer_id: &PeerId,
    frame: &str,
) -> Result<(), DisconnectReason> {
    let request = PeerRequest::decode(frame)?;
    debug!("{peer_id} <- {request:?}");

    match request {
        PeerRequest::Join { room } => {
            if registry.join(peer_id, room)? == JoinOutcome::AlreadyMember {
                debug!("{peer_id} is already a member, ignoring join");
            }
        }
        PeerRequest::Signal { sender, receiver } => {
            if sender != *peer_id {
                return Err(DisconnectReason::SpoofedSender);
            }
            match registry.relay(&receiver, frame) {
                Ok(()) => debug!("{peer_id} -> {receiver}: signal"),
                Err(SignalingError::UnknownPeer) => {
                    warn!("peer not found ({receiver}), ignoring signal")
                }
                Err(e) => error!("error relaying signal to {receiver}: {e:?}"),
            }
        }
        PeerRequest::Ping => {
            // Liveness was already refreshed when the frame arrived.
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_protocol::PeerEvent;
    use std::str::FromStr;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    type Inbox = UnboundedReceiver<Result<Message, axum::Error>>;

    fn connect(registry: &PeerRegistry) -> (PeerId, Inbox) {
        let (sender, mut receiver) = unbounded_channel();
        let peer_id = registry.connect(sender, CancellationToken::new());
        // Drop the init event.
        receiver.try_recv().expect("init").expect("ok init");
        (peer_id, receiver)
    }

    fn texts(inbox: &mut Inbox) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(Ok(message)) = inbox.try_recv() {
            if let Message::Text(text) = message {
                texts.push(text.as_str().to_string());
            }
        }
        texts
    }

    fn signal(sender: &PeerId, receiver: &PeerId) -> String {
        format!(
            r#"{{"type":"signal","senderPeerId":"{sender}","receiverPeerId":"{receiver}","data":{{"sdp":"v=0\r\n"}}}}"#
        )
    }

    #[test]
    fn join_then_signal_reaches_receiver_verbatim() {
        let registry = PeerRegistry::default();
        let (a, mut a_inbox) = connect(&registry);
        let (b, mut b_inbox) = connect(&registry);

        handle_frame(&registry, &a, r#"{"type":"join","room":"room-1"}"#).unwrap();
        handle_frame(&registry, &b, r#"{"type":"join","room":"room-1"}"#).unwrap();
        assert_eq!(texts(&mut a_inbox).len(), 2);
        let b_events = texts(&mut b_inbox);
        assert_eq!(b_events.len(), 1);
        match PeerEvent::from_str(&b_events[0]).unwrap() {
            PeerEvent::Joined { other_peer_ids } => {
                assert!(other_peer_ids.contains(&a));
                assert!(other_peer_ids.contains(&b));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let frame = signal(&a, &b);
        handle_frame(&registry, &a, &frame).unwrap();
        assert_eq!(texts(&mut b_inbox), vec![frame]);
    }

    #[test]
    fn spoofed_sender_is_rejected_and_not_relayed() {
        let registry = PeerRegistry::default();
        let (a, _a_inbox) = connect(&registry);
        let (b, mut b_inbox) = connect(&registry);

        assert_eq!(
            handle_frame(&registry, &a, &signal(&b, &a)),
            Err(DisconnectReason::SpoofedSender)
        );
        assert_eq!(
            handle_frame(&registry, &a, r#"{"type":"signal","receiverPeerId":"x"}"#),
            Err(DisconnectReason::SpoofedSender)
        );
        assert!(texts(&mut b_inbox).is_empty());
    }

    #[test]
    fn keys_are_matched_without_case() {
        let registry = PeerRegistry::default();
        let (a, _a_inbox) = connect(&registry);
        let (b, mut b_inbox) = connect(&registry);

        let frame =
            format!(r#"{{"type":"signal","senderPeerID":"{a}","receiverPeerID":"{b}","data":"x"}}"#);
        assert_eq!(handle_frame(&registry, &a, &frame), Ok(()));
        assert_eq!(texts(&mut b_inbox), vec![frame]);

        assert_eq!(handle_frame(&registry, &a, r#"{"Type":"ping"}"#), Ok(()));
        assert!(registry.contains(&a));
    }

    #[test]
    fn null_frames_are_unknown_types() {
        let registry = PeerRegistry::default();
        let (a, _inbox) = connect(&registry);

        assert_eq!(
            handle_frame(&registry, &a, "null"),
            Err(DisconnectReason::UnknownType(String::new()))
        );
        assert_eq!(
            handle_frame(&registry, &a, r#"{"type":null}"#),
            Err(DisconnectReason::UnknownType(String::new()))
        );
    }

    #[test]
    fn signal_to_missing_peer_is_dropped_quietly() {
        let registry = PeerRegistry::default();
        let (a, mut a_inbox) = connect(&registry);

        assert_eq!(
            handle_frame(&registry, &a, &signal(&a, &"nobody-here".into())),
            Ok(())
        );
        assert!(texts(&mut a_inbox).is_empty());
        assert!(registry.contains(&a));
    }

    #[test]
    fn protocol_violations_map_to_reasons() {
        let registry = PeerRegistry::default();
        let (a, _inbox) = connect(&registry);

        assert_eq!(
            handle_frame(&registry, &a, "not json"),
            Err(DisconnectReason::InvalidFormat)
        );
        assert_eq!(
            handle_frame(&registry, &a, r#"{"type":"leave"}"#),
            Err(DisconnectReason::UnknownType("leave".to_string()))
        );
        assert_eq!(
            handle_frame(&registry, &a, r#"{"type":"join","room":"r"}"#),
            Err(DisconnectReason::InvalidIds)
        );
        assert_eq!(
            handle_frame(&registry, &a, r#"{"type":"join"}"#),
            Err(DisconnectReason::InvalidIds)
        );
    }

    #[test]
    fn ping_and_repeat_join_send_nothing() {
        let registry = PeerRegistry::default();
        let (a, mut inbox) = connect(&registry);

        handle_frame(&registry, &a, r#"{"type":"ping"}"#).unwrap();
        assert!(texts(&mut inbox).is_empty());

        handle_frame(&registry, &a, r#"{"type":"join","room":"room-1"}"#).unwrap();
        assert_eq!(texts(&mut inbox).len(), 1);
        handle_frame(&registry, &a, r#"{"type":"join","room":"room-1"}"#).unwrap();
        assert!(texts(&mut inbox).is_empty());
    }

    #[test]
    fn join_after_eviction_ends_the_loop() {
        let registry = PeerRegistry::default();
        let (a, _inbox) = connect(&registry);
        registry.disconnect(&a, DisconnectReason::SocketDisconnected);

        assert_eq!(
            handle_frame(&registry, &a, r#"{"type":"join","room":"room-1"}"#),
            Err(DisconnectReason::SocketDisconnected)
        );
        assert_eq!(registry.room_count(), 0);
    }
}
