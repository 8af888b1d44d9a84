//! STUN wire format (RFC 5389 with the RFC 5780 NAT-behaviour attributes).
//!
//! Only what a Binding client needs: request encoding with an optional
//! CHANGE-REQUEST, response decoding with ordered validation, and the
//! FINGERPRINT / MESSAGE-INTEGRITY helpers shared with the TURN stub.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{RtcError, RtcResult};

type HmacSha1 = Hmac<Sha1>;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// STUN magic cookie (RFC 5389).
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// STUN message types.
pub const BINDING_REQUEST: u16 = 0x0001;
pub const BINDING_RESPONSE: u16 = 0x0101;
pub const BINDING_ERROR_RESPONSE: u16 = 0x0111;

/// STUN attribute types.
pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
pub const ATTR_MAPPED_ADDRESS_ALT: u16 = 0x8001;
pub const ATTR_CHANGE_REQUEST: u16 = 0x0003;
pub const ATTR_USERNAME: u16 = 0x0006;
pub const ATTR_MESSAGE_INTEGRITY: u16 = 0x0008;
pub const ATTR_ERROR_CODE: u16 = 0x0009;
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
pub const ATTR_XOR_MAPPED_ADDRESS_ALT: u16 = 0x8020;
pub const ATTR_SOFTWARE: u16 = 0x8022;
pub const ATTR_ALTERNATE_SERVER: u16 = 0x8023;
pub const ATTR_FINGERPRINT: u16 = 0x8028;
pub const ATTR_RESPONSE_ORIGIN: u16 = 0x802B;
pub const ATTR_OTHER_ADDRESS: u16 = 0x802C;

/// CHANGE-REQUEST flag bits.
pub const CHANGE_IP: u32 = 0x04;
pub const CHANGE_PORT: u32 = 0x02;

/// STUN header size (type + length + magic + transaction ID).
pub const STUN_HEADER_SIZE: usize = 20;

/// Largest response accepted (RFC 5389 section 7.1 path MTU guidance).
pub const MAX_MESSAGE_SIZE: usize = 548;

/// FINGERPRINT XOR constant per RFC 5389.
const FINGERPRINT_XOR: u32 = 0x5354554e;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

pub type TransactionId = [u8; 12];

// ---------------------------------------------------------------------------
// CRC-32 (IEEE 802.3) for the FINGERPRINT attribute
// ---------------------------------------------------------------------------

/// CRC-32 lookup table (IEEE polynomial 0xEDB88320, reflected).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[idx];
    }
    crc ^ 0xFFFFFFFF
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Generate a random 12-byte STUN transaction ID.
pub fn generate_transaction_id() -> TransactionId {
    let id = uuid::Uuid::new_v4();
    let mut txn = [0u8; 12];
    txn.copy_from_slice(&id.as_bytes()[..12]);
    txn
}

/// Start a message: header with a zero length placeholder.
pub fn start_message(msg_type: u16, transaction_id: &TransactionId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&msg_type.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(transaction_id);
    buf
}

/// Append an attribute (handles 4-byte padding) and fix up the header length.
pub fn append_attr(buf: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    buf.extend_from_slice(&attr_type.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
    let pad = (4 - (value.len() % 4)) % 4;
    buf.extend(std::iter::repeat(0u8).take(pad));
    let len = buf.len() - STUN_HEADER_SIZE;
    set_length(buf, len);
}

fn set_length(buf: &mut [u8], len: usize) {
    buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
}

/// Append MESSAGE-INTEGRITY (HMAC-SHA1 keyed with `key`) over the message so far.
pub fn append_message_integrity(buf: &mut Vec<u8>, key: &[u8]) -> RtcResult<()> {
    // The length must already cover the 24-byte attribute when the HMAC is computed.
    let len = buf.len() - STUN_HEADER_SIZE + 24;
    set_length(buf, len);
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| RtcError::InvalidArgument(format!("integrity key: {}", e)))?;
    mac.update(buf);
    let digest = mac.finalize().into_bytes();
    append_attr(buf, ATTR_MESSAGE_INTEGRITY, &digest[..20]);
    Ok(())
}

/// Append FINGERPRINT over the message so far.
pub fn append_fingerprint(buf: &mut Vec<u8>) {
    let len = buf.len() - STUN_HEADER_SIZE + 8;
    set_length(buf, len);
    let fingerprint = crc32(buf) ^ FINGERPRINT_XOR;
    append_attr(buf, ATTR_FINGERPRINT, &fingerprint.to_be_bytes());
}

/// Build a Binding Request, adding CHANGE-REQUEST when `change_flags` is set.
pub fn build_binding_request(transaction_id: &TransactionId, change_flags: Option<u32>) -> Vec<u8> {
    let mut buf = start_message(BINDING_REQUEST, transaction_id);
    if let Some(flags) = change_flags {
        append_attr(&mut buf, ATTR_CHANGE_REQUEST, &flags.to_be_bytes());
    }
    buf
}

/// Encode a SocketAddr as an XOR-MAPPED-ADDRESS style value (IPv4 only).
pub fn encode_xor_address(addr: SocketAddr) -> Vec<u8> {
    let mut val = vec![0, FAMILY_IPV4];
    let xport = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    val.extend_from_slice(&xport.to_be_bytes());
    let ip = match addr.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(ip) => ip.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    };
    let cookie = MAGIC_COOKIE.to_be_bytes();
    for (b, c) in ip.octets().iter().zip(cookie.iter()) {
        val.push(b ^ c);
    }
    val
}

/// Encode a SocketAddr as a plain MAPPED-ADDRESS / OTHER-ADDRESS value.
pub fn encode_plain_address(addr: SocketAddr) -> Vec<u8> {
    let mut val = vec![0, FAMILY_IPV4];
    val.extend_from_slice(&addr.port().to_be_bytes());
    if let IpAddr::V4(ip) = addr.ip() {
        val.extend_from_slice(&ip.octets());
    } else {
        val.extend_from_slice(&[0, 0, 0, 0]);
    }
    val
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StunAttribute {
    pub attr_type: u16,
    pub value: Vec<u8>,
}

/// A decoded STUN message.
#[derive(Debug, Clone)]
pub struct StunMessage {
    pub msg_type: u16,
    pub transaction_id: TransactionId,
    pub attributes: Vec<StunAttribute>,
    /// `None` when the message carries no FINGERPRINT.
    pub fingerprint_valid: Option<bool>,
    raw: Vec<u8>,
}

impl StunMessage {
    /// Decode a message without checking it against a pending transaction.
    pub fn decode(data: &[u8]) -> RtcResult<Self> {
        if data.len() < STUN_HEADER_SIZE || data.len() > MAX_MESSAGE_SIZE {
            return Err(RtcError::ProtocolViolation(format!(
                "malformed STUN message: invalid length {}",
                data.len()
            )));
        }
        check_cookie(data)?;

        let msg_type = u16::from_be_bytes([data[0], data[1]]);
        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&data[8..20]);

        let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let attrs_end = std::cmp::min(STUN_HEADER_SIZE + msg_len, data.len());

        let mut attributes = Vec::new();
        let mut fingerprint_valid = None;
        let mut pos = STUN_HEADER_SIZE;
        while pos + 4 <= attrs_end {
            let attr_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let attr_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            let attr_start = pos + 4;
            let attr_end = attr_start + attr_len;

            if attr_end > attrs_end {
                return Err(RtcError::ProtocolViolation(format!(
                    "malformed STUN message: attribute 0x{:04x} overruns message",
                    attr_type
                )));
            }

            let value = &data[attr_start..attr_end];
            if attr_type == ATTR_FINGERPRINT && attr_len == 4 {
                let received = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                fingerprint_valid = Some(crc32(&data[..pos]) ^ FINGERPRINT_XOR == received);
            }
            attributes.push(StunAttribute {
                attr_type,
                value: value.to_vec(),
            });

            pos = attr_start + ((attr_len + 3) & !3);
        }

        Ok(Self {
            msg_type,
            transaction_id,
            attributes,
            fingerprint_valid,
            raw: data.to_vec(),
        })
    }

    /// First attribute of the given type.
    pub fn attribute(&self, attr_type: u16) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == attr_type)
            .map(|a| a.value.as_slice())
    }

    /// The reflexive address, preferring XOR-MAPPED-ADDRESS over MAPPED-ADDRESS.
    pub fn mapped_address(&self) -> RtcResult<Option<SocketAddr>> {
        if let Some(v) = self.xor_attr(&[ATTR_XOR_MAPPED_ADDRESS, ATTR_XOR_MAPPED_ADDRESS_ALT])? {
            return Ok(Some(v));
        }
        self.plain_attr(&[ATTR_MAPPED_ADDRESS, ATTR_MAPPED_ADDRESS_ALT])
    }

    /// The alternate server advertised for NAT behaviour tests.
    pub fn other_address(&self) -> RtcResult<Option<SocketAddr>> {
        self.plain_attr(&[ATTR_OTHER_ADDRESS])
    }

    pub fn response_origin(&self) -> RtcResult<Option<SocketAddr>> {
        self.plain_attr(&[ATTR_RESPONSE_ORIGIN])
    }

    pub fn alternate_server(&self) -> RtcResult<Option<SocketAddr>> {
        self.plain_attr(&[ATTR_ALTERNATE_SERVER])
    }

    /// XOR-encoded address attribute of any of the given types.
    pub fn xor_attr(&self, types: &[u16]) -> RtcResult<Option<SocketAddr>> {
        match types.iter().find_map(|t| self.attribute(*t)) {
            Some(v) => decode_xor_address(v).map(Some),
            None => Ok(None),
        }
    }

    fn plain_attr(&self, types: &[u16]) -> RtcResult<Option<SocketAddr>> {
        match types.iter().find_map(|t| self.attribute(*t)) {
            Some(v) => decode_plain_address(v).map(Some),
            None => Ok(None),
        }
    }

    pub fn software(&self) -> Option<String> {
        self.attribute(ATTR_SOFTWARE)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// ERROR-CODE as `(code, reason)`.
    pub fn error_code(&self) -> Option<(u16, String)> {
        let v = self.attribute(ATTR_ERROR_CODE)?;
        if v.len() < 4 {
            return None;
        }
        let code = (v[2] & 0x07) as u16 * 100 + v[3] as u16;
        Some((code, String::from_utf8_lossy(&v[4..]).into_owned()))
    }

    /// Verify MESSAGE-INTEGRITY against `key`. False when the attribute is absent.
    pub fn verify_integrity(&self, key: &[u8]) -> bool {
        let data = &self.raw;
        let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let attrs_end = std::cmp::min(STUN_HEADER_SIZE + msg_len, data.len());

        let mut pos = STUN_HEADER_SIZE;
        while pos + 4 <= attrs_end {
            let attr_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let attr_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            let attr_start = pos + 4;

            if attr_type == ATTR_MESSAGE_INTEGRITY && attr_len == 20 {
                if attr_start + 20 > data.len() {
                    return false;
                }
                let received = &data[attr_start..attr_start + 20];

                // Length as it was when the sender computed the HMAC.
                let mut check_buf = data[..pos].to_vec();
                set_length(&mut check_buf, pos - STUN_HEADER_SIZE + 24);

                let Ok(mut mac) = HmacSha1::new_from_slice(key) else {
                    return false;
                };
                mac.update(&check_buf);
                return mac.verify_truncated_left(received).is_ok();
            }

            pos = attr_start + ((attr_len + 3) & !3);
        }

        false
    }
}

fn check_cookie(data: &[u8]) -> RtcResult<()> {
    let magic = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if magic != MAGIC_COOKIE {
        return Err(RtcError::ProtocolViolation(format!(
            "malformed STUN message: bad magic cookie 0x{:08x}",
            magic
        )));
    }
    Ok(())
}

/// Decode a response to the request carrying `expected`.
///
/// Validation order: length bounds, transaction ID, magic cookie.
pub fn decode_response(data: &[u8], expected: &TransactionId) -> RtcResult<StunMessage> {
    if data.len() < STUN_HEADER_SIZE || data.len() > MAX_MESSAGE_SIZE {
        return Err(RtcError::ProtocolViolation(format!(
            "malformed STUN response: invalid length {}",
            data.len()
        )));
    }
    if &data[8..20] != expected.as_slice() {
        return Err(RtcError::ProtocolViolation(
            "STUN transaction ID mismatch".to_string(),
        ));
    }
    check_cookie(data)?;
    StunMessage::decode(data)
}

/// Decode an XOR-MAPPED-ADDRESS style value. IPv6 is rejected.
fn decode_xor_address(value: &[u8]) -> RtcResult<SocketAddr> {
    let (family, port, octets) = split_address(value)?;
    let port = port ^ (MAGIC_COOKIE >> 16) as u16;
    match family {
        FAMILY_IPV4 => {
            let cookie = MAGIC_COOKIE.to_be_bytes();
            let ip = Ipv4Addr::new(
                octets[0] ^ cookie[0],
                octets[1] ^ cookie[1],
                octets[2] ^ cookie[2],
                octets[3] ^ cookie[3],
            );
            Ok(SocketAddr::new(IpAddr::V4(ip), port))
        }
        other => Err(unsupported_family(other)),
    }
}

/// Decode a MAPPED-ADDRESS style value. IPv6 is rejected.
fn decode_plain_address(value: &[u8]) -> RtcResult<SocketAddr> {
    let (family, port, octets) = split_address(value)?;
    match family {
        FAMILY_IPV4 => {
            let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
            Ok(SocketAddr::new(IpAddr::V4(ip), port))
        }
        other => Err(unsupported_family(other)),
    }
}

fn split_address(value: &[u8]) -> RtcResult<(u8, u16, [u8; 4])> {
    if value.len() < 4 {
        return Err(RtcError::ProtocolViolation(
            "address attribute too short".to_string(),
        ));
    }
    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]);
    if family != FAMILY_IPV4 {
        return Err(unsupported_family(family));
    }
    if value.len() < 8 {
        return Err(RtcError::ProtocolViolation(
            "IPv4 address attribute too short".to_string(),
        ));
    }
    Ok((family, port, [value[4], value[5], value[6], value[7]]))
}

fn unsupported_family(family: u8) -> RtcError {
    if family == FAMILY_IPV6 {
        RtcError::ProtocolViolation("IPv6 address family is not supported".to_string())
    } else {
        RtcError::ProtocolViolation(format!("unknown address family 0x{:02x}", family))
    }
}

/// Build a Binding success response. Used by the loopback responders in tests.
#[cfg(test)]
pub fn build_binding_response(
    transaction_id: &TransactionId,
    mapped: SocketAddr,
    other: Option<SocketAddr>,
) -> Vec<u8> {
    let mut buf = start_message(BINDING_RESPONSE, transaction_id);
    append_attr(&mut buf, ATTR_XOR_MAPPED_ADDRESS, &encode_xor_address(mapped));
    if let Some(other) = other {
        append_attr(&mut buf, ATTR_OTHER_ADDRESS, &encode_plain_address(other));
    }
    append_fingerprint(&mut buf);
    buf
}
