//! Signaling wire format and peer metadata.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// JSON envelope exchanged with clients.
///
/// `{"type":"offer","sdp":"...","clientId":"...","payload":"...","timestamp":"..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// JSON document carried as a string (metadata messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SignalMessage {
    pub fn new(kind: SignalKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            sdp: None,
            client_id: None,
            payload: None,
            timestamp: None,
        }
    }

    pub fn with_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.sdp = Some(sdp.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn signal_kind(&self) -> SignalKind {
        SignalKind::parse(&self.kind)
    }

    /// Fill in a server timestamp unless the sender supplied one.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
    }
}

/// Message discriminator, decoded once from the wire `type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Metadata,
    Unknown,
}

impl SignalKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "offer" => SignalKind::Offer,
            "answer" => SignalKind::Answer,
            "candidate" => SignalKind::Candidate,
            "metadata" => SignalKind::Metadata,
            _ => SignalKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Metadata => "metadata",
            SignalKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaType {
    Audio,
    Video,
    Screen,
    DataChannel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerStatus {
    #[default]
    Offline,
    Online,
    Busy,
    Away,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub supported_codecs: Vec<String>,
    pub supported_protocols: Vec<String>,
    /// Bits per second.
    pub max_bandwidth: u64,
    pub supports_encryption: bool,
}

/// What a client announces about itself in a `metadata` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMetadata {
    /// Always overwritten with the connection's id.
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub supported_media_types: BTreeSet<MediaType>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub status: PeerStatus,
    #[serde(skip, default = "Utc::now")]
    pub last_active: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_message() {
        let msg = SignalMessage::decode(r#"{"type":"offer","sdp":"v=0","clientId":"abc"}"#).unwrap();
        assert_eq!(msg.signal_kind(), SignalKind::Offer);
        assert_eq!(msg.sdp.as_deref(), Some("v=0"));
        assert_eq!(msg.client_id.as_deref(), Some("abc"));
        assert_eq!(msg.payload, None);

        let odd = SignalMessage::decode(r#"{"type":"media"}"#).unwrap();
        assert_eq!(odd.signal_kind(), SignalKind::Unknown);
        assert!(SignalMessage::decode(r#"{"sdp":"v=0"}"#).is_err());
    }

    #[test]
    fn test_encode_skips_absent_fields() {
        let mut msg = SignalMessage::new(SignalKind::Candidate).with_sdp("candidate:1 1 udp 1 1.2.3.4 5 typ host");
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"type":"candidate","sdp":"candidate:1 1 udp 1 1.2.3.4 5 typ host"}"#
        );

        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        msg.stamp(now);
        assert_eq!(msg.timestamp.as_deref(), Some("2024-05-01T10:00:00.000Z"));
        msg.stamp(Utc::now());
        assert_eq!(msg.timestamp.as_deref(), Some("2024-05-01T10:00:00.000Z"));
    }

    #[test]
    fn test_peer_metadata_payload() {
        let payload = r#"{
            "username": "ayse",
            "supportedMediaTypes": ["audio", "dataChannel"],
            "capabilities": {"supportedCodecs": ["opus"], "maxBandwidth": 2000000, "supportsEncryption": true},
            "status": "online"
        }"#;
        let meta: PeerMetadata = serde_json::from_str(payload).unwrap();
        assert_eq!(meta.username, "ayse");
        assert!(meta.supported_media_types.contains(&MediaType::DataChannel));
        assert_eq!(meta.capabilities.max_bandwidth, 2_000_000);
        assert!(meta.capabilities.supported_protocols.is_empty());
        assert_eq!(meta.status, PeerStatus::Online);

        let bare: PeerMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.status, PeerStatus::Offline);
    }
}
