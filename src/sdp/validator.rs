//! Structural and semantic checks on a parsed session.

use std::fmt;

use super::model::SessionDescription;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: &'static str,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All violations found, in check order. Valid only when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Comma-joined messages for logs and metrics.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn push(&mut self, field: &'static str, message: &'static str) {
        self.errors.push(ValidationError { field, message });
    }

    fn require(&mut self, value: &str, field: &'static str, message: &'static str) {
        if value.is_empty() {
            self.push(field, message);
        }
    }
}

/// Run every check; never stops at the first failure.
pub fn validate(session: &SessionDescription) -> ValidationResult {
    let mut result = ValidationResult::default();

    if session.version.is_empty() {
        result.push("Version", "Version is required");
    } else if session.version != "0" {
        result.push("Version", "Version must be 0");
    }

    match &session.origin {
        None => result.push("Origin", "Origin is required"),
        Some(o) => {
            result.require(&o.username, "Origin.Username", "Username is required");
            result.require(&o.session_id, "Origin.SessionId", "SessionId is required");
            result.require(&o.net_type, "Origin.NetworkType", "NetworkType is required");
            result.require(&o.addr_type, "Origin.AddressType", "AddressType is required");
            result.require(
                &o.unicast_address,
                "Origin.UnicastAddress",
                "UnicastAddress is required",
            );
        }
    }

    result.require(&session.session_name, "SessionName", "Session name is required");

    // A session-level c= may be replaced by one in every media block.
    let every_media_connected =
        !session.media.is_empty() && session.media.iter().all(|m| m.connection.is_some());
    let connections: Vec<_> = match &session.connection {
        Some(c) => vec![c],
        None if every_media_connected => {
            session.media.iter().filter_map(|m| m.connection.as_ref()).collect()
        }
        None => {
            result.push("Connection", "Connection is required");
            Vec::new()
        }
    };
    for c in connections {
        result.require(&c.net_type, "Connection.NetworkType", "NetworkType is required");
        result.require(&c.addr_type, "Connection.AddressType", "AddressType is required");
        result.require(&c.address, "Connection.Address", "Address is required");
    }

    if session.timing.is_none() {
        result.push("Time", "Time description is required");
    }

    if session.media.is_empty() {
        result.push("Media", "At least one media description is required");
    }
    for media in &session.media {
        result.require(&media.media_type, "Media.Type", "Media type is required");
        if media.port == 0 || media.port > 65535 {
            result.push("Media.Port", "Invalid port number");
        }
        result.require(&media.protocol, "Media.Protocol", "Protocol is required");
        if media.format_ids.is_empty() {
            result.push("Media.FormatIds", "At least one format ID is required");
        }
    }

    if let Some(b) = session.attributes.get("b") {
        if !matches!(b.parse::<i32>(), Ok(v) if v > 0) {
            result.push("Bandwidth", "Invalid bandwidth specification");
        }
    }

    let secured = session
        .media
        .iter()
        .any(|m| m.attributes.contains_key("crypto") || m.attributes.contains_key("fingerprint"));
    if !secured {
        result.push("Security", "No security attributes found");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::fixtures::SECURE_AUDIO;
    use crate::sdp::parser::parse;

    #[test]
    fn test_secure_audio_is_valid() {
        let result = validate(&parse(SECURE_AUDIO).unwrap());
        assert!(result.is_valid(), "{}", result.summary());
    }

    #[test]
    fn test_missing_crypto_fails_security() {
        let text = SECURE_AUDIO.replace("a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:abc\r\n", "");
        let result = validate(&parse(&text).unwrap());
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "Security");
        assert_eq!(result.errors[0].message, "No security attributes found");
    }

    #[test]
    fn test_fingerprint_counts_as_security() {
        let text = SECURE_AUDIO.replace(
            "a=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:abc",
            "a=fingerprint:sha-256 AA:BB",
        );
        assert!(validate(&parse(&text).unwrap()).is_valid());
    }

    #[test]
    fn test_accumulates_all_errors() {
        let result = validate(&SessionDescription::default());
        let fields: Vec<_> = result.errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["Version", "Origin", "SessionName", "Connection", "Time", "Media", "Security"]
        );
    }

    #[test]
    fn test_media_checks() {
        let text = "v=2\no=- 1 1 IN IP4 0.0.0.0\ns=-\nc=IN IP4 0.0.0.0\nt=0 0\na=b:0\nm=audio 70000 RTP/AVP 0\na=crypto:1 x inline:y\n";
        let result = validate(&parse(text).unwrap());
        assert!(result.has_field("Version"));
        assert!(result.has_field("Media.Port"));
        assert!(result.has_field("Bandwidth"));
        assert!(!result.has_field("Security"));
    }

    #[test]
    fn test_media_level_connections_suffice() {
        let text = "v=0\no=- 1 1 IN IP4 0.0.0.0\ns=-\nt=0 0\nm=audio 9 RTP/SAVPF 111\nc=IN IP4 0.0.0.0\na=fingerprint:sha-256 AA\nm=video 9 RTP/SAVPF 96\nc=IN IP4 0.0.0.0\n";
        assert!(validate(&parse(text).unwrap()).is_valid());

        let partial = text.trim_end_matches("c=IN IP4 0.0.0.0\n");
        assert!(validate(&parse(partial).unwrap()).has_field("Connection"));
    }
}
