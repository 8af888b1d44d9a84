//! Candidate scoring from network conditions and geographic proximity.

use std::cmp::{Ordering, Reverse};
use std::sync::Arc;

use futures::future::join_all;

use super::candidate::{CandidateType, IceCandidate};
use super::conditions::{GeoLocationProvider, NetworkCondition, NetworkConditionProvider};
use crate::config::PrioritizationConfig;

/// How the pool orders candidates after scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    LowestLatency,
    HighestBandwidth,
    Balanced,
    GeoProximity,
}

/// A candidate with the measurements it was scored from.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: IceCandidate,
    pub condition: NetworkCondition,
    pub distance_km: f64,
    pub score: f64,
}

pub struct PrioritizationEngine {
    weights: PrioritizationConfig,
    network: Arc<dyn NetworkConditionProvider>,
    geo: Arc<dyn GeoLocationProvider>,
}

impl PrioritizationEngine {
    pub fn new(
        weights: PrioritizationConfig,
        network: Arc<dyn NetworkConditionProvider>,
        geo: Arc<dyn GeoLocationProvider>,
    ) -> Self {
        Self {
            weights,
            network,
            geo,
        }
    }

    /// Re-score and sort descending by priority (stable).
    ///
    /// Returns the input untouched if any measurement fails.
    pub async fn prioritize(&self, candidates: Vec<IceCandidate>) -> Vec<IceCandidate> {
        match self.evaluate(&candidates).await {
            Some(scored) => scored.into_iter().map(|s| s.candidate).collect(),
            None => candidates,
        }
    }

    /// Score every candidate. `None` if a dependency failed.
    ///
    /// The result is sorted by the new priority, highest first, with ties in
    /// discovery order.
    pub async fn evaluate(&self, candidates: &[IceCandidate]) -> Option<Vec<ScoredCandidate>> {
        let here = match self.geo.current().await {
            Ok(loc) => loc,
            Err(e) => {
                tracing::warn!("Geo-location unavailable, keeping candidate order: {:#}", e);
                return None;
            }
        };

        let measurements = join_all(candidates.iter().map(|c| async move {
            let condition = self.network.test_to(c).await?;
            let location = self.geo.get_for(c).await?;
            anyhow::Ok((condition, location))
        }))
        .await;

        let mut scored = Vec::with_capacity(candidates.len());
        for (candidate, measured) in candidates.iter().zip(measurements) {
            let (condition, location) = match measured {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(
                        "Scoring input unavailable for {}, keeping candidate order: {:#}",
                        candidate.key(),
                        e
                    );
                    return None;
                }
            };
            let distance_km = here.distance_km(&location);
            let score = self.final_priority(candidate.candidate_type, &condition, distance_km);
            scored.push(ScoredCandidate {
                candidate: candidate.with_priority(score.round() as i32),
                condition,
                distance_km,
                score,
            });
        }

        scored.sort_by_key(|s| Reverse(s.candidate.priority));
        Some(scored)
    }

    fn final_priority(
        &self,
        candidate_type: CandidateType,
        condition: &NetworkCondition,
        distance_km: f64,
    ) -> f64 {
        let network_score = latency_score(condition.latency_ms) * self.weights.latency_weight
            + bandwidth_score(condition.bandwidth_bps) * self.weights.bandwidth_weight
            + packet_loss_score(condition.packet_loss_pct) * self.weights.packet_loss_weight;
        let geo_score = distance_score(distance_km);

        base_priority(candidate_type)
            + network_score * self.weights.latency_weight
            + geo_score * self.weights.proximity_weight
    }
}

/// Fixed per-type base priority.
pub fn base_priority(candidate_type: CandidateType) -> f64 {
    match candidate_type {
        CandidateType::Host => 126.0,
        CandidateType::ServerReflexive => 100.0,
        CandidateType::PeerReflexive => 75.0,
        CandidateType::Relay => 50.0,
    }
}

fn latency_score(ms: f64) -> f64 {
    match ms {
        x if x < 50.0 => 100.0,
        x if x < 100.0 => 75.0,
        x if x < 200.0 => 50.0,
        _ => 25.0,
    }
}

fn bandwidth_score(bps: f64) -> f64 {
    match bps {
        x if x > 100_000_000.0 => 100.0,
        x if x > 50_000_000.0 => 75.0,
        x if x > 10_000_000.0 => 50.0,
        _ => 25.0,
    }
}

fn packet_loss_score(pct: f64) -> f64 {
    match pct {
        x if x < 0.1 => 100.0,
        x if x < 1.0 => 75.0,
        x if x < 3.0 => 50.0,
        _ => 25.0,
    }
}

fn distance_score(km: f64) -> f64 {
    match km {
        x if x < 50.0 => 100.0,
        x if x < 200.0 => 75.0,
        x if x < 500.0 => 50.0,
        _ => 25.0,
    }
}

/// Composite used by `Strategy::Balanced`.
fn balanced_score(s: &ScoredCandidate) -> f64 {
    let c = &s.condition;
    ((1.0 / (1.0 + c.latency_ms)) * 0.4
        + (c.bandwidth_bps / 10_000_000.0) * 0.3
        + (1.0 / (1.0 + c.packet_loss_pct)) * 0.2
        + (1.0 / (1.0 + s.distance_km)) * 0.1)
        * 100.0
}

/// Stable reorder by strategy.
pub fn order_by_strategy(scored: &mut [ScoredCandidate], strategy: Strategy) {
    let cmp = |a: f64, b: f64| a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    match strategy {
        Strategy::LowestLatency => {
            scored.sort_by(|a, b| cmp(a.condition.latency_ms, b.condition.latency_ms))
        }
        Strategy::HighestBandwidth => {
            scored.sort_by(|a, b| cmp(b.condition.bandwidth_bps, a.condition.bandwidth_bps))
        }
        Strategy::Balanced => scored.sort_by(|a, b| cmp(balanced_score(b), balanced_score(a))),
        Strategy::GeoProximity => scored.sort_by(|a, b| cmp(a.distance_km, b.distance_km)),
    }
}
