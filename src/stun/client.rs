//! STUN Binding client with NAT-type discovery.
//!
//! Every exchange goes through the per-server rate limiter, the client-wide
//! in-flight cap and the socket pool, in that order. All three are owned by
//! the client instance.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::codec::{
    self, StunMessage, BINDING_ERROR_RESPONSE, BINDING_RESPONSE, CHANGE_IP, CHANGE_PORT,
};
use super::pool::{PooledSocket, SocketPool};
use super::throttle::RateLimiter;
use crate::config::StunConfig;
use crate::error::{RtcError, RtcResult};

/// Receive buffer size; larger than any acceptable response.
const RECV_BUFFER_SIZE: usize = 1024;

/// NAT classification derived from the discovery tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    Unknown,
    OpenInternet,
    FullConeNAT,
    RestrictedNAT,
    PortRestrictedNAT,
    SymmetricNAT,
    AddressRestrictedNAT,
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatType::Unknown => "unknown",
            NatType::OpenInternet => "open-internet",
            NatType::FullConeNAT => "full-cone",
            NatType::RestrictedNAT => "restricted",
            NatType::PortRestrictedNAT => "port-restricted",
            NatType::SymmetricNAT => "symmetric",
            NatType::AddressRestrictedNAT => "address-restricted",
        };
        f.write_str(s)
    }
}

/// Result of a successful `get_public_address`.
#[derive(Debug, Clone, PartialEq)]
pub struct StunResponse {
    pub public_ip: IpAddr,
    pub public_port: u16,
    pub nat_type: NatType,
    /// Local socket address the request was sent from.
    pub local_addr: SocketAddr,
    pub server_software: Option<String>,
}

impl StunResponse {
    pub fn public_addr(&self) -> SocketAddr {
        SocketAddr::new(self.public_ip, self.public_port)
    }
}

/// One request/response round trip.
struct Exchange {
    message: StunMessage,
    local: SocketAddr,
    target: SocketAddr,
}

pub struct StunClient {
    config: StunConfig,
    pool: SocketPool,
    limiter: RateLimiter,
    inflight: Arc<Semaphore>,
}

impl StunClient {
    pub fn new(config: StunConfig) -> Self {
        let pool = SocketPool::new(config.max_pool_size);
        let limiter = RateLimiter::new(config.rate_limit_per_window, config.rate_window());
        let inflight = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            pool,
            limiter,
            inflight,
        }
    }

    /// Discover the public address as seen by `server:port` and classify the NAT.
    pub async fn get_public_address(&self, server: &str, port: u32) -> RtcResult<StunResponse> {
        let server = server.trim();
        if server.is_empty() {
            return Err(RtcError::InvalidArgument(
                "STUN server address cannot be empty".to_string(),
            ));
        }
        if port == 0 || port > u16::MAX as u32 {
            return Err(RtcError::OutOfRange {
                name: "port",
                value: port as i64,
            });
        }
        let port = port as u16;

        let mut attempt = 0u32;
        loop {
            match self.resolve_public_address(server, port).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(
                        self.config
                            .retry_base_delay_ms
                            .saturating_mul(1u64 << attempt.min(16)),
                    );
                    tracing::warn!(
                        "STUN retry attempt {} of {} for {}:{} after {}ms: {}",
                        attempt,
                        self.config.max_retries,
                        server,
                        port,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like `get_public_address`, aborting with `Cancelled` as soon as `cancel` completes.
    ///
    /// Pooled sockets and in-flight permits are released on cancellation.
    pub async fn get_public_address_until<C>(
        &self,
        server: &str,
        port: u32,
        cancel: C,
    ) -> RtcResult<StunResponse>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!("STUN request cancelled for {}:{}", server, port);
                Err(RtcError::Cancelled)
            }
            result = self.get_public_address(server, port) => result,
        }
    }

    async fn resolve_public_address(&self, server: &str, port: u16) -> RtcResult<StunResponse> {
        let exchange = self.exchange(server, port, None).await?.ok_or_else(|| {
            RtcError::ConnectionFailure(format!(
                "no STUN response from {}:{} within {}ms",
                server, port, self.config.timeout_ms
            ))
        })?;

        let message = &exchange.message;
        if message.msg_type == BINDING_ERROR_RESPONSE {
            let (code, reason) = message
                .error_code()
                .unwrap_or((0, "unspecified".to_string()));
            return Err(RtcError::ProtocolViolation(format!(
                "STUN error response {}: {}",
                code, reason
            )));
        }
        if message.msg_type != BINDING_RESPONSE {
            return Err(RtcError::ProtocolViolation(format!(
                "unexpected STUN message type 0x{:04x}",
                message.msg_type
            )));
        }

        match message.fingerprint_valid {
            Some(true) => {}
            Some(false) => tracing::warn!("STUN fingerprint check failed for {}:{}", server, port),
            None => tracing::warn!("STUN response from {}:{} has no FINGERPRINT", server, port),
        }

        let mapped = message.mapped_address()?.ok_or_else(|| {
            RtcError::ProtocolViolation("STUN response carries no mapped address".to_string())
        })?;

        let nat_type = if is_unmapped(mapped, exchange.local, exchange.target) {
            NatType::OpenInternet
        } else {
            let other = match message.other_address() {
                Ok(other) => other,
                Err(e) => {
                    tracing::debug!("Ignoring unusable OTHER-ADDRESS: {}", e);
                    None
                }
            };
            self.determine_nat_type(server, port, other).await
        };

        tracing::debug!(
            "STUN {}:{} mapped {} (local {}), NAT {}",
            server,
            port,
            mapped,
            exchange.local,
            nat_type
        );

        Ok(StunResponse {
            public_ip: mapped.ip(),
            public_port: mapped.port(),
            nat_type,
            local_addr: exchange.local,
            server_software: message.software(),
        })
    }

    /// Run the RFC 3489-style behaviour tests. Never fails: any transport error
    /// collapses the result to `NatType::Unknown`.
    async fn determine_nat_type(
        &self,
        server: &str,
        port: u16,
        other: Option<SocketAddr>,
    ) -> NatType {
        match self.classify(server, port, other).await {
            Ok(nat_type) => nat_type,
            Err(e) => {
                tracing::error!("NAT type determination failed: {}", e);
                NatType::Unknown
            }
        }
    }

    async fn classify(
        &self,
        server: &str,
        port: u16,
        other: Option<SocketAddr>,
    ) -> RtcResult<NatType> {
        if self.answered(server, port, Some(CHANGE_IP | CHANGE_PORT)).await? {
            return Ok(NatType::FullConeNAT);
        }
        if self.answered(server, port, Some(CHANGE_PORT)).await? {
            return Ok(NatType::RestrictedNAT);
        }
        match other {
            Some(alt) => {
                let host = alt.ip().to_string();
                if self.answered(&host, alt.port(), None).await? {
                    Ok(NatType::PortRestrictedNAT)
                } else {
                    Ok(NatType::SymmetricNAT)
                }
            }
            None => Ok(NatType::AddressRestrictedNAT),
        }
    }

    /// True if a valid Binding success arrived before the timeout.
    async fn answered(&self, server: &str, port: u16, change: Option<u32>) -> RtcResult<bool> {
        match self.exchange(server, port, change).await? {
            Some(exchange) => Ok(exchange.message.msg_type == BINDING_RESPONSE),
            None => Ok(false),
        }
    }

    /// One Binding round trip. `Ok(None)` means the timeout elapsed.
    async fn exchange(
        &self,
        server: &str,
        port: u16,
        change: Option<u32>,
    ) -> RtcResult<Option<Exchange>> {
        self.limiter.check(&format!("{}:{}", server, port))?;

        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|_| RtcError::ConnectionFailure("STUN client shut down".to_string()))?;
        let mut socket = self.pool.acquire().await?;

        let outcome = tokio::time::timeout(
            self.config.timeout(),
            round_trip(&socket, server, port, change),
        )
        .await;

        // Until the round trip completes a late response may still arrive, so
        // the socket is only recycled on a finished exchange.
        match outcome {
            Ok(Ok(exchange)) => {
                socket.recycle();
                Ok(Some(exchange))
            }
            Ok(Err(e)) => {
                if !e.is_retryable() {
                    socket.recycle();
                }
                Err(e)
            }
            Err(_) => {
                tracing::debug!("STUN exchange with {}:{} timed out", server, port);
                Ok(None)
            }
        }
    }
}

async fn round_trip(
    socket: &PooledSocket<'_>,
    server: &str,
    port: u16,
    change: Option<u32>,
) -> RtcResult<Exchange> {
    let target = resolve(server, port).await?;
    let txn_id = codec::generate_transaction_id();
    let request = codec::build_binding_request(&txn_id, change);

    tracing::debug!(
        "STUN request to {} (change flags {:?})",
        target,
        change
    );
    socket.send_to(&request, target).await?;

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let (len, from) = socket.recv_from(&mut buf).await?;
    tracing::debug!("STUN response: {} bytes from {}", len, from);

    let message = codec::decode_response(&buf[..len], &txn_id)?;
    Ok(Exchange {
        message,
        local: socket.local_addr()?,
        target,
    })
}

/// Resolve to the first IPv4 address of `server`.
async fn resolve(server: &str, port: u16) -> RtcResult<SocketAddr> {
    let addrs = tokio::net::lookup_host((server, port))
        .await
        .map_err(|e| RtcError::ConnectionFailure(format!("resolve {}: {}", server, e)))?;
    addrs
        .into_iter()
        .find(|a| a.is_ipv4())
        .ok_or_else(|| RtcError::ConnectionFailure(format!("no IPv4 address for {}", server)))
}

/// The address on this host that routes toward `target`.
pub fn route_local_ip(target: SocketAddr) -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

/// True when the server saw us at our own local address.
fn is_unmapped(mapped: SocketAddr, local: SocketAddr, target: SocketAddr) -> bool {
    if mapped.port() != local.port() {
        return false;
    }
    if mapped.ip() == local.ip() {
        return true;
    }
    route_local_ip(target) == Some(mapped.ip())
}
