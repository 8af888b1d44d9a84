//! Offer/answer construction and processing of remote descriptions.

use std::sync::Arc;

use chrono::Utc;

use super::generator::generate;
use super::model::{
    MediaDescription, Origin, SdpSessionDescription, SdpType, SessionDescription, Timing,
};
use super::parser::parse;
use super::processor::{ProcessResult, SdpProcessor};
use super::validator::validate;
use crate::error::RtcResult;
use crate::ice::IceCandidate;
use crate::telemetry::{props, MetricsSink};

pub struct SdpNegotiator {
    processor: SdpProcessor,
    metrics: Arc<dyn MetricsSink>,
}

impl SdpNegotiator {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            processor: SdpProcessor::new(),
            metrics,
        }
    }

    pub fn processor(&self) -> &SdpProcessor {
        &self.processor
    }

    /// Bare offer: v/o/s/t plus one session-level `a=candidate:` per candidate.
    pub fn create_offer(&self, candidates: &[IceCandidate]) -> SdpSessionDescription {
        let session = skeleton(candidates);
        let offer = SdpSessionDescription::new(SdpType::Offer, generate(&session));
        self.metrics.track_metric(
            "SDPOfferCreated",
            1.0,
            &props([("Candidates", candidates.len().to_string())]),
        );
        offer
    }

    /// Answer mirroring the `m=` lines of `remote` with our candidates.
    ///
    /// Only type, port, protocol and formats are copied from each remote
    /// media block; its attributes are not.
    pub fn create_answer(
        &self,
        candidates: &[IceCandidate],
        remote: &SdpSessionDescription,
    ) -> RtcResult<SdpSessionDescription> {
        let remote_session = parse(&remote.sdp)?;

        let mut session = skeleton(candidates);
        session.media = remote_session
            .media
            .into_iter()
            .map(|m| MediaDescription {
                media_type: m.media_type,
                port: m.port,
                protocol: m.protocol,
                format_ids: m.format_ids,
                ..Default::default()
            })
            .collect();

        let answer = SdpSessionDescription::new(SdpType::Answer, generate(&session));
        self.metrics.track_metric(
            "SDPAnswerCreated",
            1.0,
            &props([("Candidates", candidates.len().to_string())]),
        );
        Ok(answer)
    }

    /// Merge `candidate` into every media block of `local` under
    /// `candidate:<foundation>` by reparsing and regenerating the SDP.
    pub fn add_ice_candidate(
        &self,
        candidate: &IceCandidate,
        local: &SdpSessionDescription,
    ) -> RtcResult<SdpSessionDescription> {
        let mut session = parse(&local.sdp)?;
        let key = format!("candidate:{}", candidate.foundation);
        let value = candidate.sdp_value();
        for media in &mut session.media {
            media.attributes.insert(key.clone(), value.clone());
        }
        Ok(SdpSessionDescription::new(local.kind, generate(&session)))
    }

    /// Parse, validate and process a remote offer.
    ///
    /// `None` means the offer was rejected; the reason is logged and reported
    /// to the metrics sink.
    pub fn process_offer(&self, sdp: &str) -> Option<ProcessResult> {
        self.process(SdpType::Offer, sdp)
    }

    pub fn process_answer(&self, sdp: &str) -> Option<ProcessResult> {
        self.process(SdpType::Answer, sdp)
    }

    /// Candidates are relayed unchanged; this only inspects them for the log.
    pub fn process_candidate(&self, candidate: &str) {
        match IceCandidate::parse(candidate) {
            Ok(c) => tracing::info!("Processing ICE candidate {} ({})", c.key(), c.candidate_type),
            Err(_) => tracing::info!("Processing ICE candidate: {}", candidate),
        }
    }

    fn process(&self, kind: SdpType, sdp: &str) -> Option<ProcessResult> {
        let session = match parse(sdp) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to parse remote {}: {}", kind, e);
                self.metrics.track_error(
                    "SDPProcessingFailed",
                    &e.to_string(),
                    &props([("SDP", sdp.to_string()), ("Errors", e.to_string())]),
                );
                return None;
            }
        };

        let validation = validate(&session);
        if !validation.is_valid() {
            let summary = validation.summary();
            tracing::warn!("Rejected remote {}: {}", kind, summary);
            self.metrics.track_error(
                "SDPValidationFailed",
                &summary,
                &props([("SDP", sdp.to_string()), ("Errors", summary.clone())]),
            );
            return None;
        }

        let result = self.processor.process_session(&session);
        if !result.success {
            let errors = result.errors.join(", ");
            tracing::warn!("Processing remote {} failed: {}", kind, errors);
            self.metrics.track_error(
                "SDPProcessingFailed",
                &errors,
                &props([("SDP", sdp.to_string()), ("Errors", errors.clone())]),
            );
            return None;
        }

        self.metrics
            .track_metric("SDPProcessed", 1.0, &props([("SDP", sdp.to_string())]));
        Some(result)
    }
}

fn skeleton(candidates: &[IceCandidate]) -> SessionDescription {
    SessionDescription {
        version: "0".to_string(),
        origin: Some(Origin {
            username: "-".to_string(),
            session_id: Utc::now().timestamp().to_string(),
            session_version: "1".to_string(),
            net_type: "IN".to_string(),
            addr_type: "IP4".to_string(),
            unicast_address: "0.0.0.0".to_string(),
        }),
        session_name: "-".to_string(),
        timing: Some(Timing { start: 0, stop: 0 }),
        candidates: candidates
            .iter()
            .map(|c| format!("{} {}", c.foundation, c.sdp_value()))
            .collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ice::{CandidateType, Transport};
    use crate::sdp::fixtures::SECURE_AUDIO;
    use crate::telemetry::testing::RecordingMetrics;

    fn negotiator() -> (SdpNegotiator, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::default());
        (SdpNegotiator::new(metrics.clone()), metrics)
    }

    fn host() -> IceCandidate {
        IceCandidate::new(CandidateType::Host, Transport::Udp, "192.168.1.10".parse().unwrap(), 50000)
    }

    fn srflx() -> IceCandidate {
        IceCandidate::new(
            CandidateType::ServerReflexive,
            Transport::Udp,
            "203.0.113.7".parse().unwrap(),
            61000,
        )
    }

    fn candidate_lines(sdp: &str) -> Vec<&str> {
        sdp.lines().filter(|l| l.starts_with("a=candidate:")).collect()
    }

    #[test]
    fn test_offer_has_one_line_per_candidate() {
        let (negotiator, metrics) = negotiator();
        let (h, s) = (host(), srflx());
        let offer = negotiator.create_offer(&[h.clone(), s.clone()]);

        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.starts_with("v=0\r\no=- "));
        assert!(offer.sdp.contains("\r\ns=-\r\nt=0 0\r\n"));
        let lines = candidate_lines(&offer.sdp);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(&h.foundation));
        assert!(lines[0].contains("192.168.1.10 50000 typ host"));
        assert!(lines[1].contains(&s.foundation));
        assert!(lines[1].contains("203.0.113.7 61000 typ srflx"));
        assert_eq!(metrics.metrics.lock()[0].0, "SDPOfferCreated");
    }

    #[test]
    fn test_offer_keeps_candidates_sharing_an_address() {
        let (negotiator, _) = negotiator();
        let ip = "192.168.1.10".parse().unwrap();
        let udp = IceCandidate::new(CandidateType::Host, Transport::Udp, ip, 50000);
        let tcp = IceCandidate::new(CandidateType::Host, Transport::Tcp, ip, 50001);
        // Same foundation on purpose: the offer must not collapse them.
        let twin = IceCandidate {
            port: 50002,
            ..udp.clone()
        };

        let offer = negotiator.create_offer(&[udp, tcp, twin]);
        let lines = candidate_lines(&offer.sdp);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("udp 2130706431 192.168.1.10 50000 typ host"));
        assert!(lines[1].contains("tcp 2130706431 192.168.1.10 50001 typ host"));
        assert!(lines[2].contains("192.168.1.10 50002 typ host"));

        let remote = SdpSessionDescription::new(SdpType::Offer, SECURE_AUDIO);
        let answer = negotiator.create_answer(&[host(), srflx(), host()], &remote).unwrap();
        assert_eq!(candidate_lines(&answer.sdp).len(), 3);
    }

    #[test]
    fn test_offer_candidates_parse_back() {
        let (negotiator, _) = negotiator();
        let h = host();
        let offer = negotiator.create_offer(&[h.clone()]);
        let line = candidate_lines(&offer.sdp)[0].trim_start_matches("a=");
        let parsed = IceCandidate::parse(line).unwrap();
        assert_eq!(parsed.ip, h.ip);
        assert_eq!(parsed.port, h.port);
        assert_eq!(parsed.priority, h.priority);
    }

    #[test]
    fn test_answer_copies_media_lines_only() {
        let (negotiator, _) = negotiator();
        let remote = SdpSessionDescription::new(SdpType::Offer, SECURE_AUDIO);
        let answer = negotiator.create_answer(&[host()], &remote).unwrap();

        assert_eq!(answer.kind, SdpType::Answer);
        assert!(answer.sdp.contains("m=audio 9 UDP/TLS/RTP/SAVPF 0\r\n"));
        assert!(!answer.sdp.contains("a=crypto"));
        assert_eq!(candidate_lines(&answer.sdp).len(), 1);

        let bad = SdpSessionDescription::new(SdpType::Offer, "o=broken");
        assert!(negotiator.create_answer(&[], &bad).is_err());
    }

    #[test]
    fn test_add_ice_candidate_touches_only_candidate_key() {
        let (negotiator, _) = negotiator();
        let local = SdpSessionDescription::new(SdpType::Offer, SECURE_AUDIO);
        let before = parse(SECURE_AUDIO).unwrap();

        let c = host();
        let updated = negotiator.add_ice_candidate(&c, &local).unwrap();
        assert_eq!(updated.kind, SdpType::Offer);

        let after = parse(&updated.sdp).unwrap();
        let attrs = &after.media[0].attributes;
        assert_eq!(attrs.len(), before.media[0].attributes.len() + 1);
        assert_eq!(
            attrs.get(&format!("candidate:{}", c.foundation)),
            Some(c.sdp_value().as_str())
        );
        for (k, v) in before.media[0].attributes.iter() {
            assert_eq!(attrs.get(k), Some(v));
        }
        assert_eq!(after.attributes, before.attributes);
    }

    #[test]
    fn test_process_offer_outcomes() {
        let (negotiator, metrics) = negotiator();

        assert!(negotiator.process_offer(SECURE_AUDIO).is_some());
        assert_eq!(metrics.metrics.lock().last().unwrap().0, "SDPProcessed");

        let insecure = SECURE_AUDIO.replace("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:abc\r\n", "");
        assert!(negotiator.process_answer(&insecure).is_none());
        assert_eq!(metrics.errors.lock().last().unwrap().0, "SDPValidationFailed");

        assert!(negotiator.process_offer("c=IN IP4").is_none());
        assert_eq!(metrics.errors.lock().last().unwrap().0, "SDPProcessingFailed");
    }

    #[test]
    fn test_own_offer_fails_validation() {
        // No media and no security attributes.
        let (negotiator, _) = negotiator();
        let offer = negotiator.create_offer(&[host()]);
        assert!(negotiator.process_offer(&offer.sdp).is_none());
    }
}
