//! Minimal TURN Allocate client (RFC 5766) for relayed candidates.
//!
//! Only the Allocate round trip is implemented: no refresh, permissions or
//! channel binding. Credentials, when configured, are applied as a
//! short-term MESSAGE-INTEGRITY; a server demanding the long-term
//! realm/nonce dance answers 401 and the allocation is reported as failed.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::config::TurnServerConfig;
use crate::error::{RtcError, RtcResult};
use crate::stun::codec::{self, ATTR_USERNAME, ATTR_XOR_MAPPED_ADDRESS};

/// TURN message types (RFC 5766).
const ALLOCATE_REQUEST: u16 = 0x0003;
const ALLOCATE_RESPONSE: u16 = 0x0103;
const ALLOCATE_ERROR_RESPONSE: u16 = 0x0113;

/// TURN attribute types.
const ATTR_LIFETIME: u16 = 0x000D;
const ATTR_XOR_RELAYED_ADDRESS: u16 = 0x0016;
const ATTR_REQUESTED_TRANSPORT: u16 = 0x0019;

/// Transport protocol number for UDP.
const TRANSPORT_UDP: u8 = 17;

/// A granted relay.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnAllocation {
    pub relayed: SocketAddr,
    /// Our reflexive address as seen by the TURN server.
    pub mapped: Option<SocketAddr>,
    pub lifetime_secs: Option<u32>,
    /// Local socket the allocation was made from.
    pub local: SocketAddr,
}

pub struct TurnClient {
    timeout: Duration,
}

impl TurnClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send one Allocate request and read the relayed address.
    pub async fn allocate(&self, server: &TurnServerConfig) -> RtcResult<TurnAllocation> {
        let target = tokio::net::lookup_host((server.host.as_str(), server.port))
            .await
            .map_err(|e| RtcError::ConnectionFailure(format!("resolve {}: {}", server.host, e)))?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| {
                RtcError::ConnectionFailure(format!("no IPv4 address for {}", server.host))
            })?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let txn_id = codec::generate_transaction_id();
        let request = build_allocate_request(&txn_id, server)?;

        tracing::debug!("TURN Allocate to {} ({} bytes)", target, request.len());
        socket.send_to(&request, target).await?;

        let mut buf = [0u8; 1024];
        let (len, _from) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| {
                RtcError::ConnectionFailure(format!("TURN allocate to {} timed out", target))
            })??;

        let msg = codec::decode_response(&buf[..len], &txn_id)?;
        match msg.msg_type {
            ALLOCATE_RESPONSE => {}
            ALLOCATE_ERROR_RESPONSE => {
                let (code, reason) = msg.error_code().unwrap_or((0, "unspecified".to_string()));
                return Err(RtcError::ProtocolViolation(format!(
                    "TURN allocate rejected: {} {}",
                    code, reason
                )));
            }
            other => {
                return Err(RtcError::ProtocolViolation(format!(
                    "unexpected TURN message type 0x{:04x}",
                    other
                )))
            }
        }

        if let Some(password) = &server.password {
            if !msg.verify_integrity(password.as_bytes()) {
                tracing::warn!("TURN response from {} failed integrity check", target);
            }
        }

        let relayed = msg.xor_attr(&[ATTR_XOR_RELAYED_ADDRESS])?.ok_or_else(|| {
            RtcError::ProtocolViolation("TURN response has no XOR-RELAYED-ADDRESS".to_string())
        })?;
        let lifetime_secs = msg
            .attribute(ATTR_LIFETIME)
            .filter(|v| v.len() == 4)
            .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]));

        Ok(TurnAllocation {
            relayed,
            mapped: msg.xor_attr(&[ATTR_XOR_MAPPED_ADDRESS])?,
            lifetime_secs,
            local: socket.local_addr()?,
        })
    }
}

fn build_allocate_request(
    txn_id: &codec::TransactionId,
    server: &TurnServerConfig,
) -> RtcResult<Vec<u8>> {
    let mut buf = codec::start_message(ALLOCATE_REQUEST, txn_id);
    codec::append_attr(&mut buf, ATTR_REQUESTED_TRANSPORT, &[TRANSPORT_UDP, 0, 0, 0]);
    if let (Some(user), Some(password)) = (&server.username, &server.password) {
        codec::append_attr(&mut buf, ATTR_USERNAME, user.as_bytes());
        codec::append_message_integrity(&mut buf, password.as_bytes())?;
    }
    codec::append_fingerprint(&mut buf);
    Ok(buf)
}
