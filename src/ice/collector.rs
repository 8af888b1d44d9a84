//! Fan-out over all candidate providers.

use std::sync::Arc;

use futures::future::join_all;

use super::candidate::IceCandidate;
use super::provider::CandidateProvider;

pub struct CandidateCollector {
    providers: Vec<Arc<dyn CandidateProvider>>,
}

impl CandidateCollector {
    pub fn new(providers: Vec<Arc<dyn CandidateProvider>>) -> Self {
        Self { providers }
    }

    /// Query every provider concurrently and concatenate in provider order.
    /// A failing provider contributes nothing.
    pub async fn collect(&self) -> Vec<IceCandidate> {
        let results = join_all(self.providers.iter().map(|p| p.get_candidates())).await;

        let mut all = Vec::new();
        for (provider, result) in self.providers.iter().zip(results) {
            match result {
                Ok(candidates) => {
                    tracing::debug!("{} provider: {} candidates", provider.name(), candidates.len());
                    all.extend(candidates);
                }
                Err(e) => {
                    tracing::warn!("{} provider failed: {:#}", provider.name(), e);
                }
            }
        }
        all
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed list, or fails when `candidates` is `None`.
    pub struct FixedProvider {
        pub name: &'static str,
        pub candidates: Option<Vec<IceCandidate>>,
        pub calls: AtomicUsize,
    }

    impl FixedProvider {
        pub fn new(name: &'static str, candidates: Option<Vec<IceCandidate>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                candidates,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CandidateProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn get_candidates(&self) -> Result<Vec<IceCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.candidates {
                Some(c) => Ok(c.clone()),
                None => bail!("{} is down", self.name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedProvider;
    use super::*;
    use crate::ice::candidate::{CandidateType, Transport};

    fn host(ip: &str) -> IceCandidate {
        IceCandidate::new(CandidateType::Host, Transport::Udp, ip.parse().unwrap(), 9)
    }

    #[tokio::test]
    async fn test_concatenates_in_provider_order() {
        let collector = CandidateCollector::new(vec![
            FixedProvider::new("a", Some(vec![host("10.0.0.1"), host("10.0.0.2")]))
                as Arc<dyn CandidateProvider>,
            FixedProvider::new("b", Some(vec![host("10.0.0.3")])),
        ]);
        let ips: Vec<_> = collector.collect().await.into_iter().map(|c| c.ip).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn test_failing_provider_is_isolated() {
        let collector = CandidateCollector::new(vec![
            FixedProvider::new("broken", None) as Arc<dyn CandidateProvider>,
            FixedProvider::new("ok", Some(vec![host("10.0.0.9")])),
        ]);
        let out = collector.collect().await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ip, "10.0.0.9");
    }
}
