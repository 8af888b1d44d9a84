//! Network-condition and geo-location inputs for candidate scoring.
//!
//! Real measurement and geo-IP services live outside this crate; they plug in
//! through the two provider traits. The static implementations are used when
//! nothing better is configured.

use anyhow::Result;
use async_trait::async_trait;

use super::candidate::IceCandidate;

/// Mean Earth radius used by the haversine distance.
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkCondition {
    pub latency_ms: f64,
    pub bandwidth_bps: f64,
    pub packet_loss_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub city: String,
}

impl GeoLocation {
    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoLocation) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }
}

#[async_trait]
pub trait NetworkConditionProvider: Send + Sync {
    async fn current(&self) -> Result<NetworkCondition>;
    async fn test_to(&self, candidate: &IceCandidate) -> Result<NetworkCondition>;
}

#[async_trait]
pub trait GeoLocationProvider: Send + Sync {
    async fn current(&self) -> Result<GeoLocation>;
    async fn get_for(&self, candidate: &IceCandidate) -> Result<GeoLocation>;
}

/// Reports the same condition for every path.
pub struct StaticConditions(pub NetworkCondition);

impl Default for StaticConditions {
    fn default() -> Self {
        Self(NetworkCondition {
            latency_ms: 50.0,
            bandwidth_bps: 50_000_000.0,
            packet_loss_pct: 0.5,
        })
    }
}

#[async_trait]
impl NetworkConditionProvider for StaticConditions {
    async fn current(&self) -> Result<NetworkCondition> {
        Ok(self.0)
    }

    async fn test_to(&self, _candidate: &IceCandidate) -> Result<NetworkCondition> {
        Ok(self.0)
    }
}

/// Places this host and every candidate at one location.
pub struct StaticLocation(pub GeoLocation);

impl Default for StaticLocation {
    fn default() -> Self {
        Self(GeoLocation {
            latitude: 0.0,
            longitude: 0.0,
            country: "unknown".to_string(),
            city: "unknown".to_string(),
        })
    }
}

#[async_trait]
impl GeoLocationProvider for StaticLocation {
    async fn current(&self) -> Result<GeoLocation> {
        Ok(self.0.clone())
    }

    async fn get_for(&self, _candidate: &IceCandidate) -> Result<GeoLocation> {
        Ok(self.0.clone())
    }
}
