//! Stateful candidate store with lifecycle tracking and best-candidate selection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::candidate::{CandidateType, IceCandidate, Transport};
use super::collector::CandidateCollector;
use super::conditions::NetworkCondition;
use super::prioritize::{order_by_strategy, PrioritizationEngine, Strategy};
use crate::config::IceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateStatus {
    Discovered,
    Refreshed,
    Connected,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CandidateState {
    pub candidate: IceCandidate,
    pub status: CandidateStatus,
    /// Conditions measured on the last scoring pass, if scoring succeeded.
    pub condition: Option<NetworkCondition>,
    pub last_updated: Instant,
    pub updated_at: DateTime<Utc>,
}

/// Filters for `select_best`. `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub candidate_type: Option<CandidateType>,
    pub transport: Option<Transport>,
    pub min_bandwidth_bps: Option<u64>,
}

impl SelectionCriteria {
    fn matches(&self, state: &CandidateState) -> bool {
        if state.status == CandidateStatus::Failed {
            return false;
        }
        if let Some(t) = self.candidate_type {
            if state.candidate.candidate_type != t {
                return false;
            }
        }
        if let Some(t) = self.transport {
            if state.candidate.transport != t {
                return false;
            }
        }
        if let Some(min) = self.min_bandwidth_bps {
            match state.condition {
                Some(c) if c.bandwidth_bps >= min as f64 => {}
                _ => return false,
            }
        }
        true
    }
}

pub struct CandidatePool {
    collector: CandidateCollector,
    engine: PrioritizationEngine,
    max_candidates: usize,
    lifetime: Duration,
    default_min_bandwidth_bps: u64,
    entries: RwLock<HashMap<String, CandidateState>>,
}

impl CandidatePool {
    pub fn new(collector: CandidateCollector, engine: PrioritizationEngine, config: &IceConfig) -> Self {
        Self {
            collector,
            engine,
            max_candidates: config.max_candidates.max(1),
            lifetime: config.candidate_lifetime(),
            default_min_bandwidth_bps: config.default_min_bandwidth_bps,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Criteria requiring the configured default minimum bandwidth.
    pub fn default_criteria(&self) -> SelectionCriteria {
        SelectionCriteria {
            min_bandwidth_bps: Some(self.default_min_bandwidth_bps),
            ..Default::default()
        }
    }

    /// Gather, score and order candidates, then merge them into the pool.
    ///
    /// Returns the kept candidates in strategy order.
    pub async fn collect_and_prioritize(&self, strategy: Strategy) -> Vec<IceCandidate> {
        let evicted = self.evict_expired(Instant::now());
        if evicted > 0 {
            tracing::debug!("Evicted {} expired candidates", evicted);
        }

        let gathered = self.collector.collect().await;
        let ranked: Vec<(IceCandidate, Option<NetworkCondition>)> =
            match self.engine.evaluate(&gathered).await {
                Some(mut scored) => {
                    order_by_strategy(&mut scored, strategy);
                    scored
                        .into_iter()
                        .map(|s| (s.candidate, Some(s.condition)))
                        .collect()
                }
                None => gathered.into_iter().map(|c| (c, None)).collect(),
            };

        let kept: Vec<_> = ranked.into_iter().take(self.max_candidates).collect();

        let now = Instant::now();
        let stamp = Utc::now();
        let mut entries = self.entries.write();
        for (candidate, condition) in &kept {
            let key = candidate.key();
            match entries.get_mut(&key) {
                Some(state) => {
                    state.candidate = candidate.clone();
                    state.condition = *condition;
                    state.last_updated = now;
                    state.updated_at = stamp;
                    if state.status == CandidateStatus::Discovered {
                        state.status = CandidateStatus::Refreshed;
                    }
                }
                None => {
                    entries.insert(
                        key,
                        CandidateState {
                            candidate: candidate.clone(),
                            status: CandidateStatus::Discovered,
                            condition: *condition,
                            last_updated: now,
                            updated_at: stamp,
                        },
                    );
                }
            }
        }
        drop(entries);

        tracing::info!("Candidate pool refreshed: {} candidates ({:?})", kept.len(), strategy);
        kept.into_iter().map(|(c, _)| c).collect()
    }

    /// Highest-priority candidate matching `criteria`, collecting first if the pool is empty.
    pub async fn select_best(&self, criteria: &SelectionCriteria) -> Option<IceCandidate> {
        if self.entries.read().is_empty() {
            self.collect_and_prioritize(Strategy::Balanced).await;
        }

        let entries = self.entries.read();
        let mut matching: Vec<&CandidateState> =
            entries.values().filter(|s| criteria.matches(s)).collect();
        // Key order makes ties deterministic.
        matching.sort_by(|a, b| {
            b.candidate
                .priority
                .cmp(&a.candidate.priority)
                .then_with(|| a.candidate.key().cmp(&b.candidate.key()))
        });
        matching.first().map(|s| s.candidate.clone())
    }

    /// Record an externally observed outcome. Returns false for unknown keys.
    pub fn mark(&self, key: &str, status: CandidateStatus) -> bool {
        match self.entries.write().get_mut(key) {
            Some(state) => {
                state.status = status;
                state.last_updated = Instant::now();
                state.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<CandidateState> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn reset(&self) {
        self.entries.write().clear();
    }

    /// Drop Discovered/Refreshed entries not updated within the candidate lifetime.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, s| {
            matches!(s.status, CandidateStatus::Connected | CandidateStatus::Failed)
                || now.saturating_duration_since(s.last_updated) < self.lifetime
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrioritizationConfig;
    use crate::ice::collector::testing::FixedProvider;
    use crate::ice::conditions::{StaticConditions, StaticLocation};
    use crate::ice::prioritize::testing::{condition, location, TableProvider};
    use crate::ice::provider::CandidateProvider;
    use std::sync::Arc;

    fn cand(t: CandidateType, ip: &str) -> IceCandidate {
        IceCandidate::new(t, Transport::Udp, ip.parse().unwrap(), 7000)
    }

    fn static_engine() -> PrioritizationEngine {
        PrioritizationEngine::new(
            PrioritizationConfig::default(),
            Arc::new(StaticConditions::default()),
            Arc::new(StaticLocation::default()),
        )
    }

    fn pool_with(provider: Arc<FixedProvider>, engine: PrioritizationEngine, config: &IceConfig) -> CandidatePool {
        let collector = CandidateCollector::new(vec![provider as Arc<dyn CandidateProvider>]);
        CandidatePool::new(collector, engine, config)
    }

    fn three() -> Vec<IceCandidate> {
        vec![
            cand(CandidateType::Relay, "198.51.100.1"),
            cand(CandidateType::Host, "10.0.0.1"),
            cand(CandidateType::ServerReflexive, "203.0.113.1"),
        ]
    }

    #[tokio::test]
    async fn test_states_discovered_then_refreshed() {
        let provider = FixedProvider::new("fixed", Some(three()));
        let pool = pool_with(provider, static_engine(), &IceConfig::default());

        pool.collect_and_prioritize(Strategy::Balanced).await;
        assert_eq!(pool.len(), 3);
        assert!(pool
            .snapshot()
            .iter()
            .all(|s| s.status == CandidateStatus::Discovered));

        pool.collect_and_prioritize(Strategy::Balanced).await;
        assert_eq!(pool.len(), 3);
        assert!(pool
            .snapshot()
            .iter()
            .all(|s| s.status == CandidateStatus::Refreshed));
    }

    #[tokio::test]
    async fn test_select_best_collects_when_empty() {
        let provider = FixedProvider::new("fixed", Some(three()));
        let pool = pool_with(provider.clone(), static_engine(), &IceConfig::default());

        let best = pool.select_best(&SelectionCriteria::default()).await.unwrap();
        assert_eq!(best.candidate_type, CandidateType::Host);
        assert_eq!(provider.calls(), 1);

        // Pool is populated now; no second collection.
        pool.select_best(&SelectionCriteria::default()).await.unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_select_best_filters() {
        let provider = FixedProvider::new("fixed", Some(three()));
        let pool = pool_with(provider, static_engine(), &IceConfig::default());
        pool.collect_and_prioritize(Strategy::Balanced).await;

        let relay = pool
            .select_best(&SelectionCriteria {
                candidate_type: Some(CandidateType::Relay),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(relay.ip, "198.51.100.1");

        let tcp = pool
            .select_best(&SelectionCriteria {
                transport: Some(Transport::Tcp),
                ..Default::default()
            })
            .await;
        assert!(tcp.is_none());

        // Static conditions report 50 Mbps everywhere.
        assert!(pool.select_best(&pool.default_criteria()).await.is_some());
        let too_fast = SelectionCriteria {
            min_bandwidth_bps: Some(100_000_000),
            ..Default::default()
        };
        assert!(pool.select_best(&too_fast).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_candidates_not_selected() {
        let provider = FixedProvider::new("fixed", Some(three()));
        let pool = pool_with(provider, static_engine(), &IceConfig::default());
        pool.collect_and_prioritize(Strategy::Balanced).await;

        assert!(pool.mark("10.0.0.1:7000:host", CandidateStatus::Failed));
        assert!(!pool.mark("1.1.1.1:1:host", CandidateStatus::Failed));
        let best = pool.select_best(&SelectionCriteria::default()).await.unwrap();
        assert_eq!(best.candidate_type, CandidateType::ServerReflexive);
    }

    #[tokio::test]
    async fn test_max_candidates_and_strategy_order() {
        let mut provider = TableProvider {
            here: Some(location(41.0, 29.0)),
            ..Default::default()
        };
        provider
            .conditions
            .insert("198.51.100.1".into(), condition(10.0, 10_000_000.0, 0.0));
        provider
            .conditions
            .insert("10.0.0.1".into(), condition(120.0, 200_000_000.0, 0.0));
        provider
            .conditions
            .insert("203.0.113.1".into(), condition(60.0, 20_000_000.0, 0.0));
        for ip in ["198.51.100.1", "10.0.0.1", "203.0.113.1"] {
            provider.locations.insert(ip.into(), location(41.0, 29.0));
        }
        let provider = Arc::new(provider);
        let engine =
            PrioritizationEngine::new(PrioritizationConfig::default(), provider.clone(), provider);

        let config = IceConfig {
            max_candidates: 2,
            ..IceConfig::default()
        };
        let pool = pool_with(FixedProvider::new("fixed", Some(three())), engine, &config);
        let kept = pool.collect_and_prioritize(Strategy::LowestLatency).await;
        let ips: Vec<_> = kept.iter().map(|c| c.ip.as_str()).collect();
        assert_eq!(ips, vec!["198.51.100.1", "203.0.113.1"]);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_scoring_failure_keeps_discovery_order() {
        let engine = PrioritizationEngine::new(
            PrioritizationConfig::default(),
            Arc::new(TableProvider::default()),
            Arc::new(TableProvider::default()),
        );
        let pool = pool_with(
            FixedProvider::new("fixed", Some(three())),
            engine,
            &IceConfig::default(),
        );
        let kept = pool.collect_and_prioritize(Strategy::Balanced).await;
        let ips: Vec<_> = kept.iter().map(|c| c.ip.as_str()).collect();
        assert_eq!(ips, vec!["198.51.100.1", "10.0.0.1", "203.0.113.1"]);
        assert!(pool.snapshot().iter().all(|s| s.condition.is_none()));
    }

    #[tokio::test]
    async fn test_evict_expired_spares_connected() {
        let provider = FixedProvider::new("fixed", Some(three()));
        let config = IceConfig {
            candidate_lifetime_secs: 60,
            ..IceConfig::default()
        };
        let pool = pool_with(provider, static_engine(), &config);
        pool.collect_and_prioritize(Strategy::Balanced).await;
        pool.mark("10.0.0.1:7000:host", CandidateStatus::Connected);

        assert_eq!(pool.evict_expired(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(pool.evict_expired(later), 2);
        let left = pool.snapshot();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].status, CandidateStatus::Connected);

        pool.reset();
        assert_eq!(pool.len(), 0);
    }
}
