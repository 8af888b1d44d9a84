//! Routes inbound signaling messages to the negotiator or the peer directory
//! and relays accepted ones to the other peers.

use std::sync::Arc;

use chrono::Utc;

use super::directory::PeerDirectory;
use super::message::{PeerMetadata, SignalKind, SignalMessage};
use super::registry::ConnectionRegistry;
use crate::sdp::SdpNegotiator;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Relayed to this many peers.
    Relayed(usize),
    /// Metadata stored; nothing is sent.
    Stored,
    /// Undecodable, invalid or refused by the negotiator.
    Rejected,
    /// Unknown message type.
    Ignored,
}

pub struct SignalingMediator {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<PeerDirectory>,
    negotiator: Arc<SdpNegotiator>,
}

impl SignalingMediator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<PeerDirectory>,
        negotiator: Arc<SdpNegotiator>,
    ) -> Self {
        Self {
            registry,
            directory,
            negotiator,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Handle one text frame from `client_id`. Never fails: every problem is
    /// logged and reported as `Rejected` so the connection loop keeps going.
    pub fn handle_text(&self, client_id: &str, text: &str) -> Outcome {
        let mut msg = match SignalMessage::decode(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Dropping undecodable message from {}: {}", client_id, e);
                return Outcome::Rejected;
            }
        };
        msg.client_id = Some(client_id.to_string());
        msg.stamp(Utc::now());

        match msg.signal_kind() {
            SignalKind::Metadata => self.handle_metadata(client_id, &msg),
            SignalKind::Offer => {
                let accepted = msg
                    .sdp
                    .as_deref()
                    .and_then(|sdp| self.negotiator.process_offer(sdp))
                    .is_some();
                self.relay_if(accepted, client_id, &msg)
            }
            SignalKind::Answer => {
                let accepted = msg
                    .sdp
                    .as_deref()
                    .and_then(|sdp| self.negotiator.process_answer(sdp))
                    .is_some();
                self.relay_if(accepted, client_id, &msg)
            }
            SignalKind::Candidate => {
                self.negotiator
                    .process_candidate(msg.sdp.as_deref().unwrap_or_default());
                self.relay_if(true, client_id, &msg)
            }
            SignalKind::Unknown => {
                tracing::warn!("Unknown message type '{}' from {}", msg.kind, client_id);
                Outcome::Ignored
            }
        }
    }

    /// Forget a disconnected client.
    pub fn disconnect(&self, client_id: &str) {
        self.registry.remove(client_id);
        self.directory.remove(client_id);
    }

    fn handle_metadata(&self, client_id: &str, msg: &SignalMessage) -> Outcome {
        let Some(payload) = msg.payload.as_deref() else {
            tracing::error!("Metadata from {} has no payload", client_id);
            return Outcome::Rejected;
        };
        match serde_json::from_str::<PeerMetadata>(payload) {
            Ok(mut metadata) => {
                metadata.client_id = client_id.to_string();
                self.directory.update(metadata);
                Outcome::Stored
            }
            Err(e) => {
                tracing::error!("Invalid metadata from {}: {}", client_id, e);
                Outcome::Rejected
            }
        }
    }

    fn relay_if(&self, accepted: bool, client_id: &str, msg: &SignalMessage) -> Outcome {
        if !accepted {
            tracing::error!("Dropping {} from {}", msg.kind, client_id);
            return Outcome::Rejected;
        }
        match msg.encode() {
            Ok(json) => Outcome::Relayed(self.registry.broadcast_except(client_id, &json)),
            Err(e) => {
                tracing::error!("Failed to encode {} from {}: {}", msg.kind, client_id, e);
                Outcome::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::fixtures::SECURE_AUDIO;
    use crate::signaling::message::PeerStatus;
    use crate::signaling::registry::Outbound;
    use crate::telemetry::TracingMetrics;

    fn mediator() -> SignalingMediator {
        SignalingMediator::new(
            Arc::new(ConnectionRegistry::new(16)),
            Arc::new(PeerDirectory::new(Arc::new(TracingMetrics))),
            Arc::new(SdpNegotiator::new(Arc::new(TracingMetrics))),
        )
    }

    fn text(out: Outbound) -> String {
        match out {
            Outbound::Text(t) => t,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_valid_offer_is_relayed_to_others() {
        let mediator = mediator();
        let (alice, mut alice_rx) = mediator.registry().register();
        let (_bob, mut bob_rx) = mediator.registry().register();

        let frame = SignalMessage::new(SignalKind::Offer)
            .with_sdp(SECURE_AUDIO)
            .encode()
            .unwrap();
        assert_eq!(mediator.handle_text(&alice, &frame), Outcome::Relayed(1));

        let relayed = SignalMessage::decode(&text(bob_rx.recv().await.unwrap())).unwrap();
        assert_eq!(relayed.signal_kind(), SignalKind::Offer);
        assert_eq!(relayed.client_id.as_deref(), Some(alice.as_str()));
        assert_eq!(relayed.sdp.as_deref(), Some(SECURE_AUDIO));
        assert!(relayed.timestamp.is_some());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_offer_is_not_relayed() {
        let mediator = mediator();
        let (alice, _alice_rx) = mediator.registry().register();
        let (_bob, mut bob_rx) = mediator.registry().register();

        let insecure = SECURE_AUDIO.replace("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:abc\r\n", "");
        let frame = SignalMessage::new(SignalKind::Answer)
            .with_sdp(insecure)
            .encode()
            .unwrap();
        assert_eq!(mediator.handle_text(&alice, &frame), Outcome::Rejected);

        let no_sdp = r#"{"type":"offer"}"#;
        assert_eq!(mediator.handle_text(&alice, no_sdp), Outcome::Rejected);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_candidates_relay_unchanged() {
        let mediator = mediator();
        let (alice, _a) = mediator.registry().register();
        let (_bob, mut bob_rx) = mediator.registry().register();

        let frame = r#"{"type":"candidate","sdp":"candidate:1 1 udp 2122260223 192.168.1.100 54609 typ host"}"#;
        assert_eq!(mediator.handle_text(&alice, frame), Outcome::Relayed(1));
        let relayed = SignalMessage::decode(&text(bob_rx.recv().await.unwrap())).unwrap();
        assert_eq!(
            relayed.sdp.as_deref(),
            Some("candidate:1 1 udp 2122260223 192.168.1.100 54609 typ host")
        );
    }

    #[tokio::test]
    async fn test_metadata_is_stored_not_relayed() {
        let mediator = mediator();
        let (alice, _a) = mediator.registry().register();
        let (_bob, mut bob_rx) = mediator.registry().register();

        let frame = SignalMessage::new(SignalKind::Metadata)
            .with_payload(r#"{"clientId":"spoofed","username":"alice","status":"online"}"#)
            .encode()
            .unwrap();
        assert_eq!(mediator.handle_text(&alice, &frame), Outcome::Stored);
        assert!(bob_rx.try_recv().is_err());

        let stored = mediator.directory().get(&alice).unwrap();
        assert_eq!(stored.client_id, alice);
        assert_eq!(stored.status, PeerStatus::Online);
        assert!(mediator.directory().get("spoofed").is_none());

        mediator.disconnect(&alice);
        assert!(mediator.directory().get(&alice).is_none());
        assert!(!mediator.registry().contains(&alice));
    }

    #[tokio::test]
    async fn test_bad_input_does_not_poison_the_loop() {
        let mediator = mediator();
        let (alice, _a) = mediator.registry().register();
        let (_bob, mut bob_rx) = mediator.registry().register();

        assert_eq!(mediator.handle_text(&alice, "not json"), Outcome::Rejected);
        assert_eq!(
            mediator.handle_text(&alice, r#"{"type":"media"}"#),
            Outcome::Ignored
        );
        assert_eq!(
            mediator
                .handle_text(&alice, r#"{"type":"metadata","payload":"[1,2"}"#),
            Outcome::Rejected
        );

        let frame = r#"{"type":"candidate","sdp":"candidate:x"}"#;
        assert_eq!(mediator.handle_text(&alice, frame), Outcome::Relayed(1));
        assert!(bob_rx.recv().await.is_some());
    }
}
