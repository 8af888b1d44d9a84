//! Candidate sources: local interfaces, STUN servers and TURN relays.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;

use super::candidate::{CandidateType, IceCandidate, Transport};
use super::turn::TurnClient;
use crate::config::TurnServerConfig;
use crate::stun::{self, StunClient};

/// Ephemeral port range for host candidates.
const HOST_PORT_MIN: u16 = 10000;
const HOST_PORT_MAX: u16 = 60000;

/// A source of ICE candidates. Implementations may fail; the collector
/// isolates each provider's failure.
#[async_trait]
pub trait CandidateProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn get_candidates(&self) -> Result<Vec<IceCandidate>>;
}

// ---------------------------------------------------------------------------
// Host candidates
// ---------------------------------------------------------------------------

pub struct LocalProvider {
    interfaces: Vec<IpAddr>,
}

impl LocalProvider {
    /// Use `interfaces` when given, otherwise enumerate the machine's interfaces.
    pub fn new(interfaces: Vec<IpAddr>) -> Self {
        Self { interfaces }
    }

    fn addresses(&self) -> Vec<IpAddr> {
        if !self.interfaces.is_empty() {
            return self.interfaces.clone();
        }
        let detected = match if_addrs::get_if_addrs() {
            Ok(ifaces) => usable_addresses(ifaces.iter().map(|iface| iface.ip())),
            Err(e) => {
                tracing::warn!("Interface enumeration failed: {}", e);
                Vec::new()
            }
        };
        if !detected.is_empty() {
            return detected;
        }
        // No packets are sent; connecting a UDP socket only selects a route.
        let route_target: SocketAddr = ([8, 8, 8, 8], 80).into();
        usable_addresses(stun::client::route_local_ip(route_target))
    }
}

/// Non-loopback IPv4 addresses in first-seen order, without duplicates.
fn usable_addresses(ips: impl IntoIterator<Item = IpAddr>) -> Vec<IpAddr> {
    let mut out: Vec<IpAddr> = Vec::new();
    for ip in ips {
        if ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified() && !out.contains(&ip) {
            out.push(ip);
        }
    }
    out
}

#[async_trait]
impl CandidateProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_candidates(&self) -> Result<Vec<IceCandidate>> {
        let addresses = self.addresses();
        if addresses.is_empty() {
            bail!("no usable local interface address");
        }
        addresses
            .into_iter()
            .filter(|ip| ip.is_ipv4() && !ip.is_loopback())
            .map(|ip| {
                let port = random_port().context("Failed to pick a host port")?;
                Ok(IceCandidate::new(CandidateType::Host, Transport::Udp, ip, port))
            })
            .collect()
    }
}

fn random_port() -> Result<u16> {
    let mut bytes = [0u8; 2];
    getrandom::getrandom(&mut bytes)?;
    let span = (HOST_PORT_MAX - HOST_PORT_MIN) as u32 + 1;
    Ok(HOST_PORT_MIN + (u16::from_be_bytes(bytes) as u32 % span) as u16)
}

// ---------------------------------------------------------------------------
// Server-reflexive candidates
// ---------------------------------------------------------------------------

pub struct StunProvider {
    client: Arc<StunClient>,
    servers: Vec<String>,
}

impl StunProvider {
    pub fn new(client: Arc<StunClient>, servers: Vec<String>) -> Self {
        Self { client, servers }
    }
}

#[async_trait]
impl CandidateProvider for StunProvider {
    fn name(&self) -> &str {
        "stun"
    }

    /// One srflx candidate per server that answers.
    async fn get_candidates(&self) -> Result<Vec<IceCandidate>> {
        let lookups = self.servers.iter().map(|entry| async move {
            let (host, port) = stun::split_server(entry)
                .with_context(|| format!("Invalid STUN server entry '{}'", entry))?;
            let resp = self
                .client
                .get_public_address(host, port)
                .await
                .with_context(|| format!("STUN query to {} failed", entry))?;
            tracing::debug!("{} reports {} ({})", entry, resp.public_addr(), resp.nat_type);
            anyhow::Ok(
                IceCandidate::new(
                    CandidateType::ServerReflexive,
                    Transport::Udp,
                    resp.public_ip,
                    resp.public_port,
                )
                .with_related(resp.local_addr.ip(), resp.local_addr.port())
                .with_server(entry),
            )
        });

        let mut candidates = Vec::new();
        let mut last_error = None;
        for result in join_all(lookups).await {
            match result {
                Ok(c) => candidates.push(c),
                Err(e) => {
                    tracing::warn!("{:#}", e);
                    last_error = Some(e);
                }
            }
        }

        match (candidates.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(candidates),
        }
    }
}

// ---------------------------------------------------------------------------
// Relayed candidates
// ---------------------------------------------------------------------------

pub struct TurnProvider {
    client: TurnClient,
    servers: Vec<TurnServerConfig>,
}

impl TurnProvider {
    pub fn new(client: TurnClient, servers: Vec<TurnServerConfig>) -> Self {
        Self { client, servers }
    }
}

#[async_trait]
impl CandidateProvider for TurnProvider {
    fn name(&self) -> &str {
        "turn"
    }

    async fn get_candidates(&self) -> Result<Vec<IceCandidate>> {
        let allocations = join_all(self.servers.iter().map(|s| self.client.allocate(s))).await;

        let mut candidates = Vec::new();
        for (server, allocation) in self.servers.iter().zip(allocations) {
            match allocation {
                Ok(alloc) => {
                    let base = alloc.mapped.unwrap_or(alloc.local);
                    candidates.push(
                        IceCandidate::new(
                            CandidateType::Relay,
                            Transport::Udp,
                            alloc.relayed.ip(),
                            alloc.relayed.port(),
                        )
                        .with_related(base.ip(), base.port())
                        .with_server(&format!("{}:{}", server.host, server.port)),
                    );
                }
                Err(e) => {
                    tracing::warn!("TURN allocation on {}:{} failed: {}", server.host, server.port, e)
                }
            }
        }
        Ok(candidates)
    }
}
