//! Per-call-leg connection state and local/remote descriptions.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{RtcError, RtcResult};
use crate::ice::{CandidatePool, IceCandidate, Strategy};
use crate::sdp::{SdpNegotiator, SdpSessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

pub struct RtcPeerConnection {
    pool: Arc<CandidatePool>,
    negotiator: Arc<SdpNegotiator>,
    local: Option<SdpSessionDescription>,
    remote: Option<SdpSessionDescription>,
    state_tx: watch::Sender<ConnectionState>,
}

impl RtcPeerConnection {
    pub fn new(pool: Arc<CandidatePool>, negotiator: Arc<SdpNegotiator>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::New);
        Self {
            pool,
            negotiator,
            local: None,
            remote: None,
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn local_description(&self) -> Option<&SdpSessionDescription> {
        self.local.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SdpSessionDescription> {
        self.remote.as_ref()
    }

    pub async fn create_offer(&mut self) -> RtcResult<SdpSessionDescription> {
        self.ensure_open()?;
        let candidates = self.pool.collect_and_prioritize(Strategy::Balanced).await;
        let offer = self.negotiator.create_offer(&candidates);
        self.local = Some(offer.clone());
        self.set_state(ConnectionState::Connecting);
        Ok(offer)
    }

    /// Answer the current remote description.
    pub async fn create_answer(&mut self) -> RtcResult<SdpSessionDescription> {
        self.ensure_open()?;
        let result = match self.remote.clone() {
            Some(remote) => {
                let candidates = self.pool.collect_and_prioritize(Strategy::Balanced).await;
                self.negotiator.create_answer(&candidates, &remote)
            }
            None => Err(RtcError::InvalidArgument(
                "no remote description to answer".to_string(),
            )),
        };

        match result {
            Ok(answer) => {
                self.local = Some(answer.clone());
                self.set_state(ConnectionState::Connecting);
                Ok(answer)
            }
            Err(e) => {
                tracing::error!("Failed to create answer: {}", e);
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    pub fn set_local_description(&mut self, desc: SdpSessionDescription) -> RtcResult<()> {
        self.ensure_open()?;
        self.local = Some(desc);
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    pub fn set_remote_description(&mut self, desc: SdpSessionDescription) -> RtcResult<()> {
        self.ensure_open()?;
        self.remote = Some(desc);
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Merge a remote `candidate:` line into the local description.
    pub fn add_ice_candidate(&mut self, line: &str) -> RtcResult<()> {
        self.ensure_open()?;
        let (Some(local), Some(_)) = (&self.local, &self.remote) else {
            return Err(RtcError::InvalidArgument(
                "local and remote descriptions must be set first".to_string(),
            ));
        };
        let candidate = IceCandidate::parse(line)?;
        let updated = self.negotiator.add_ice_candidate(&candidate, local)?;
        tracing::debug!("Added remote candidate {}", candidate.key());
        self.local = Some(updated);
        Ok(())
    }

    pub fn mark_connected(&mut self) {
        if !self.state().is_terminal() {
            self.set_state(ConnectionState::Connected);
        }
    }

    pub fn mark_disconnected(&mut self) {
        if self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    pub fn close(&mut self) {
        if !self.state().is_terminal() {
            self.set_state(ConnectionState::Closed);
        }
    }

    fn ensure_open(&self) -> RtcResult<()> {
        match self.state() {
            s if s.is_terminal() => Err(RtcError::InvalidArgument(format!(
                "peer connection is {:?}",
                s
            ))),
            _ => Ok(()),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("Peer connection {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }
}
