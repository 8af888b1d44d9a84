//! Line-oriented SDP parser.

use super::model::{Attributes, ConnectionInfo, MediaDescription, Origin, SessionDescription, Timing};
use crate::error::{RtcError, RtcResult};

/// Parse SDP text into a session model.
///
/// Lines are `<type>=<value>`, split on the first `=`. Unknown line types
/// are skipped. Attribute and `c=` lines after an `m=` line belong to that
/// media block. Arity errors in `o=`, `c=`, `t=` or `m=` fail the parse.
pub fn parse(text: &str) -> RtcResult<SessionDescription> {
    let mut session = SessionDescription::default();

    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');
        let Some((kind, value)) = line.split_once('=') else {
            continue;
        };

        match kind {
            "v" => session.version = value.to_string(),
            "o" => session.origin = Some(parse_origin(value)?),
            "s" => session.session_name = value.to_string(),
            "c" => {
                let conn = parse_connection(value)?;
                match session.media.last_mut() {
                    Some(media) => media.connection = Some(conn),
                    None => session.connection = Some(conn),
                }
            }
            "t" => session.timing = Some(parse_timing(value)?),
            "m" => session.media.push(parse_media(value)?),
            "a" => match session.media.last_mut() {
                Some(media) => parse_attribute(value, &mut media.attributes),
                None => match value.strip_prefix("candidate:") {
                    Some(candidate) => session.candidates.push(candidate.to_string()),
                    None => parse_attribute(value, &mut session.attributes),
                },
            },
            _ => {}
        }
    }

    Ok(session)
}

fn violation(what: &str, value: &str) -> RtcError {
    RtcError::ProtocolViolation(format!("invalid {} line: '{}'", what, value))
}

fn parse_origin(value: &str) -> RtcResult<Origin> {
    let parts: Vec<&str> = value.split(' ').collect();
    let [username, session_id, session_version, net_type, addr_type, unicast_address] =
        parts.as_slice()
    else {
        return Err(violation("origin", value));
    };
    Ok(Origin {
        username: username.to_string(),
        session_id: session_id.to_string(),
        session_version: session_version.to_string(),
        net_type: net_type.to_string(),
        addr_type: addr_type.to_string(),
        unicast_address: unicast_address.to_string(),
    })
}

fn parse_connection(value: &str) -> RtcResult<ConnectionInfo> {
    let parts: Vec<&str> = value.split(' ').collect();
    let [net_type, addr_type, address] = parts.as_slice() else {
        return Err(violation("connection", value));
    };
    Ok(ConnectionInfo {
        net_type: net_type.to_string(),
        addr_type: addr_type.to_string(),
        address: address.to_string(),
    })
}

fn parse_timing(value: &str) -> RtcResult<Timing> {
    let parts: Vec<&str> = value.split(' ').collect();
    let [start, stop] = parts.as_slice() else {
        return Err(violation("time", value));
    };
    Ok(Timing {
        start: start.parse().map_err(|_| violation("time", value))?,
        stop: stop.parse().map_err(|_| violation("time", value))?,
    })
}

fn parse_media(value: &str) -> RtcResult<MediaDescription> {
    let parts: Vec<&str> = value.split(' ').filter(|p| !p.is_empty()).collect();
    if parts.len() < 4 {
        return Err(violation("media", value));
    }
    // `port/count` form: only the base port is kept.
    let port_str = parts[1].split('/').next().unwrap_or(parts[1]);
    let port = port_str.parse().map_err(|_| violation("media", value))?;

    Ok(MediaDescription {
        media_type: parts[0].to_string(),
        port,
        protocol: parts[2].to_string(),
        format_ids: parts[3..].iter().map(|s| s.to_string()).collect(),
        connection: None,
        attributes: Attributes::new(),
    })
}

/// Media-level `candidate` attributes are keyed by foundation so several can coexist.
fn parse_attribute(value: &str, attrs: &mut Attributes) {
    let (key, val) = value.split_once(':').unwrap_or((value, ""));
    if key == "candidate" {
        let (foundation, rest) = val.split_once(' ').unwrap_or((val, ""));
        attrs.insert(format!("candidate:{}", foundation), rest);
    } else {
        attrs.insert(key, val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::fixtures::SECURE_AUDIO;

    #[test]
    fn test_parse_secure_audio() {
        let session = parse(SECURE_AUDIO).unwrap();
        assert_eq!(session.version, "0");
        let origin = session.origin.as_ref().unwrap();
        assert_eq!(origin.session_id, "1");
        assert_eq!(origin.unicast_address, "0.0.0.0");
        assert_eq!(session.session_name, "-");
        assert_eq!(session.connection.as_ref().unwrap().address, "0.0.0.0");
        assert_eq!(session.timing, Some(Timing { start: 0, stop: 0 }));

        assert_eq!(session.media.len(), 1);
        let audio = &session.media[0];
        assert_eq!(audio.media_type, "audio");
        assert_eq!(audio.port, 9);
        assert_eq!(audio.protocol, "UDP/TLS/RTP/SAVPF");
        assert_eq!(audio.format_ids, vec!["0"]);
        assert_eq!(
            audio.attributes.get("crypto"),
            Some("1 AES_CM_128_HMAC_SHA1_80 inline:abc")
        );
        assert!(session.attributes.is_empty());
    }

    #[test]
    fn test_attribute_scoping_and_flags() {
        let text = "v=0\na=group:BUNDLE 0\nm=audio 9 RTP/AVP 0 8\na=sendrecv\nc=IN IP4 10.0.0.1\nm=video 9 RTP/AVP 96\na=rtpmap:96 VP8/90000\n";
        let session = parse(text).unwrap();
        assert_eq!(session.attributes.get("group"), Some("BUNDLE 0"));
        assert_eq!(session.media[0].attributes.get("sendrecv"), Some(""));
        assert_eq!(session.media[0].connection.as_ref().unwrap().address, "10.0.0.1");
        assert!(session.connection.is_none());
        assert_eq!(session.media[1].attributes.get("rtpmap"), Some("96 VP8/90000"));
        assert!(!session.media[1].attributes.contains_key("sendrecv"));
    }

    #[test]
    fn test_candidates_keyed_by_foundation() {
        let text = "v=0\nm=audio 9 RTP/AVP 0\na=candidate:abc 1 udp 2122 10.0.0.1 5000 typ host\na=candidate:def 1 udp 1686 203.0.113.5 6000 typ srflx\n";
        let session = parse(text).unwrap();
        let attrs = &session.media[0].attributes;
        assert_eq!(attrs.get("candidate:abc"), Some("1 udp 2122 10.0.0.1 5000 typ host"));
        assert_eq!(attrs.get("candidate:def"), Some("1 udp 1686 203.0.113.5 6000 typ srflx"));
    }

    #[test]
    fn test_session_candidates_keep_every_line() {
        let text = "v=0\na=candidate:f1 1 udp 2122 10.0.0.1 5000 typ host\na=candidate:f1 1 udp 2122 10.0.0.1 5002 typ host\na=ice-lite\n";
        let session = parse(text).unwrap();
        assert_eq!(
            session.candidates,
            vec![
                "f1 1 udp 2122 10.0.0.1 5000 typ host",
                "f1 1 udp 2122 10.0.0.1 5002 typ host"
            ]
        );
        assert_eq!(session.attributes.len(), 1);
    }

    #[test]
    fn test_arity_errors() {
        for bad in [
            "o=- 1 1 IN IP4",
            "c=IN IP4",
            "m=audio 9 RTP/AVP",
            "m=audio nine RTP/AVP 0",
            "t=0",
            "t=a b",
        ] {
            let err = parse(bad).unwrap_err();
            assert!(matches!(err, RtcError::ProtocolViolation(_)), "{}", bad);
        }
    }

    #[test]
    fn test_unknown_lines_ignored() {
        let session = parse("v=0\nb=AS:30\nz=whatever\nnot a line\n").unwrap();
        assert_eq!(session.version, "0");
        assert!(session.media.is_empty());
    }

    #[test]
    fn test_value_keeps_equals_signs() {
        let session = parse("m=video 9 RTP/AVP 96\na=fmtp:96 profile-level-id=42e01f;packetization-mode=1\n").unwrap();
        assert_eq!(
            session.media[0].attributes.get("fmtp"),
            Some("96 profile-level-id=42e01f;packetization-mode=1")
        );
    }
}
