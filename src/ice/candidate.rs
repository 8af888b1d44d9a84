//! ICE candidate model and its SDP `candidate:` encoding.

use std::fmt;
use std::net::IpAddr;

use crate::error::{RtcError, RtcResult};

/// ICE candidate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "host" => Some(CandidateType::Host),
            "srflx" => Some(CandidateType::ServerReflexive),
            "prflx" => Some(CandidateType::PeerReflexive),
            "relay" => Some(CandidateType::Relay),
            _ => None,
        }
    }

    /// RFC 8445 recommended type preference.
    fn type_preference(&self) -> u32 {
        match self {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relay => 0,
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 6544 TCP candidate role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpType {
    Active,
    Passive,
    SimultaneousOpen,
}

impl TcpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TcpType::Active => "active",
            TcpType::Passive => "passive",
            TcpType::SimultaneousOpen => "so",
        }
    }
}

/// A gathered or parsed ICE candidate.
///
/// Treated as a value: re-scoring produces a new candidate via `with_priority`.
#[derive(Debug, Clone, PartialEq)]
pub struct IceCandidate {
    pub id: String,
    pub foundation: String,
    pub component: u16,
    pub transport: Transport,
    pub candidate_type: CandidateType,
    pub ip: String,
    pub port: u16,
    pub priority: i32,
    /// For srflx/relay: the base address.
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
    pub tcp_type: Option<TcpType>,
}

impl IceCandidate {
    /// A component-1 candidate with its foundation and RFC 8445 priority filled in.
    pub fn new(candidate_type: CandidateType, transport: Transport, ip: IpAddr, port: u16) -> Self {
        let component = 1;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            foundation: foundation_for(candidate_type, transport, &ip.to_string(), None),
            component,
            transport,
            candidate_type,
            ip: ip.to_string(),
            port,
            priority: compute_priority(candidate_type, 65535, component),
            related_address: None,
            related_port: None,
            tcp_type: None,
        }
    }

    pub fn with_related(mut self, addr: IpAddr, port: u16) -> Self {
        self.related_address = Some(addr.to_string());
        self.related_port = Some(port);
        self
    }

    /// Re-derive the foundation for a candidate learned from `server`, using
    /// the related (base) address when one is set.
    pub fn with_server(mut self, server: &str) -> Self {
        let base = self.related_address.clone().unwrap_or_else(|| self.ip.clone());
        self.foundation = foundation_for(self.candidate_type, self.transport, &base, Some(server));
        self
    }

    pub fn with_priority(&self, priority: i32) -> Self {
        Self {
            priority,
            ..self.clone()
        }
    }

    /// Pool key: `ip:port:type`.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.ip, self.port, self.candidate_type)
    }

    /// The value that follows `candidate:<foundation>` in SDP.
    pub fn sdp_value(&self) -> String {
        let mut value = format!(
            "{} {} {} {} {} typ {}",
            self.component, self.transport, self.priority, self.ip, self.port, self.candidate_type
        );
        if let (Some(ra), Some(rp)) = (&self.related_address, self.related_port) {
            value.push_str(&format!(" raddr {} rport {}", ra, rp));
        }
        if let Some(tcp) = self.tcp_type {
            value.push_str(&format!(" tcptype {}", tcp.as_str()));
        }
        value
    }

    /// Format as an SDP attribute body (without the `a=` prefix).
    pub fn to_sdp_line(&self) -> String {
        format!("candidate:{} {}", self.foundation, self.sdp_value())
    }

    /// Parse an `a=candidate:` / `candidate:` line.
    pub fn parse(line: &str) -> RtcResult<Self> {
        let line = line.trim();
        let content = line
            .strip_prefix("a=")
            .unwrap_or(line)
            .strip_prefix("candidate:")
            .ok_or_else(|| bad_candidate(line, "not a candidate line"))?;

        let parts: Vec<&str> = content.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(bad_candidate(line, "too few fields"));
        }

        let component: u16 = parts[1]
            .parse()
            .map_err(|_| bad_candidate(line, "bad component"))?;
        let transport = match parts[2].to_ascii_lowercase().as_str() {
            "udp" => Transport::Udp,
            "tcp" => Transport::Tcp,
            _ => return Err(bad_candidate(line, "unsupported transport")),
        };
        let priority: i64 = parts[3]
            .parse()
            .map_err(|_| bad_candidate(line, "bad priority"))?;
        let port: u16 = parts[5]
            .parse()
            .map_err(|_| bad_candidate(line, "bad port"))?;
        if parts[6] != "typ" {
            return Err(bad_candidate(line, "expected 'typ'"));
        }
        let candidate_type =
            CandidateType::parse(parts[7]).ok_or_else(|| bad_candidate(line, "unknown type"))?;

        let mut related_address = None;
        let mut related_port = None;
        let mut tcp_type = None;
        let mut i = 8;
        while i + 1 < parts.len() {
            match parts[i] {
                "raddr" => related_address = Some(parts[i + 1].to_string()),
                "rport" => {
                    related_port = Some(
                        parts[i + 1]
                            .parse()
                            .map_err(|_| bad_candidate(line, "bad rport"))?,
                    )
                }
                "tcptype" => {
                    tcp_type = match parts[i + 1] {
                        "active" => Some(TcpType::Active),
                        "passive" => Some(TcpType::Passive),
                        "so" => Some(TcpType::SimultaneousOpen),
                        _ => None,
                    }
                }
                _ => {}
            }
            i += 2;
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            foundation: parts[0].to_string(),
            component,
            transport,
            candidate_type,
            ip: parts[4].to_string(),
            port,
            // Remote peers may send the full u32 range.
            priority: priority.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            related_address,
            related_port,
            tcp_type,
        })
    }
}

fn bad_candidate(line: &str, why: &str) -> RtcError {
    RtcError::ProtocolViolation(format!("{}: {}", why, line))
}

/// Stable foundation (RFC 8445 section 5.1.1.3): FNV-1a over type, base
/// address, transport and the STUN/TURN server, prefixed by gathering source.
pub fn foundation_for(
    candidate_type: CandidateType,
    transport: Transport,
    base: &str,
    server: Option<&str>,
) -> String {
    let input = format!(
        "{}|{}|{}|{}",
        candidate_type,
        transport,
        base,
        server.unwrap_or_default()
    );
    let mut hash: u32 = 0x811c9dc5;
    for b in input.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    match candidate_type {
        CandidateType::Host | CandidateType::PeerReflexive => format!("{}", hash),
        CandidateType::ServerReflexive => format!("stun-{}", hash),
        CandidateType::Relay => format!("turn-{}", hash),
    }
}

/// Compute ICE candidate priority per RFC 8445 section 5.1.2.1.
pub fn compute_priority(ctype: CandidateType, local_preference: u16, component: u16) -> i32 {
    let value = (ctype.type_preference() << 24)
        | ((local_preference as u32) << 8)
        | (256 - component.min(256) as u32);
    value as i32
}
