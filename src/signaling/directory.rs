//! Peer metadata store with status-change notifications.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::message::{MediaType, PeerMetadata, PeerStatus};
use crate::telemetry::{props, MetricsSink};

/// Capacity of the status-change channel. Slow subscribers see `Lagged`.
const STATUS_CHANNEL_CAPACITY: usize = 64;

pub struct PeerDirectory {
    peers: RwLock<HashMap<String, PeerMetadata>>,
    status_tx: broadcast::Sender<(String, PeerStatus)>,
    metrics: Arc<dyn MetricsSink>,
}

impl PeerDirectory {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            peers: RwLock::new(HashMap::new()),
            status_tx,
            metrics,
        }
    }

    /// `(client_id, status)` for every status change, including removal.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, PeerStatus)> {
        self.status_tx.subscribe()
    }

    /// Insert or replace a peer's record and stamp its activity time.
    pub fn update(&self, mut metadata: PeerMetadata) {
        metadata.last_active = Utc::now();
        let client_id = metadata.client_id.clone();
        let status = metadata.status;

        let previous = self.peers.write().insert(client_id.clone(), metadata);
        if previous.map(|p| p.status) != Some(status) {
            tracing::debug!("Peer {} is now {:?}", client_id, status);
            // No subscribers is fine.
            let _ = self.status_tx.send((client_id.clone(), status));
        }

        self.metrics.track_metric(
            "PeerMetadataUpdated",
            1.0,
            &props([("ClientId", client_id), ("Status", format!("{:?}", status))]),
        );
    }

    pub fn get(&self, client_id: &str) -> Option<PeerMetadata> {
        self.peers.read().get(client_id).cloned()
    }

    pub fn remove(&self, client_id: &str) -> Option<PeerMetadata> {
        let removed = self.peers.write().remove(client_id);
        if removed.is_some() {
            let _ = self
                .status_tx
                .send((client_id.to_string(), PeerStatus::Offline));
        }
        removed
    }

    /// Online peers that support `media_type` and can carry at least
    /// `min_bandwidth` bits per second. `None` filters are ignored.
    pub fn available_peers(
        &self,
        media_type: Option<MediaType>,
        min_bandwidth: Option<u64>,
    ) -> Vec<PeerMetadata> {
        let mut peers: Vec<PeerMetadata> = self
            .peers
            .read()
            .values()
            .filter(|p| p.status == PeerStatus::Online)
            .filter(|p| media_type.map_or(true, |m| p.supported_media_types.contains(&m)))
            .filter(|p| min_bandwidth.map_or(true, |b| p.capabilities.max_bandwidth >= b))
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        peers
    }
}
