//! SDP codec, validation and offer/answer negotiation.

pub mod generator;
pub mod model;
pub mod negotiator;
pub mod parser;
pub mod processor;
pub mod validator;

pub use generator::generate;
pub use model::{SdpSessionDescription, SdpType, SessionDescription};
pub use negotiator::SdpNegotiator;
pub use parser::parse;
pub use validator::{validate, ValidationResult};

#[cfg(test)]
pub(crate) mod fixtures {
    /// Minimal valid audio offer with an SDES crypto line.
    pub const SECURE_AUDIO: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0\r\na=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:abc\r\n";
}
