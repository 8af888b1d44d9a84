//! ICE candidate gathering, scoring and pooling.

pub mod candidate;
pub mod collector;
pub mod conditions;
pub mod pool;
pub mod prioritize;
pub mod provider;
pub mod turn;

pub use candidate::{CandidateType, IceCandidate, Transport};
pub use collector::CandidateCollector;
pub use pool::{CandidatePool, CandidateStatus, SelectionCriteria};
pub use prioritize::{PrioritizationEngine, Strategy};
