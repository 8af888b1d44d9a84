//! Session-level processing of a validated description: connection
//! bookkeeping and per-media parameter extraction.

use std::collections::{BTreeMap, HashMap};

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

use super::model::{ConnectionInfo, MediaDescription, Origin, SessionDescription};
use super::validator;
use crate::error::{RtcError, RtcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    New,
    Initializing,
    Connected,
    Failed,
    Closed,
}

/// Tracks the connection status of sessions while the processor works on them.
#[derive(Default)]
pub struct ConnectionManager {
    sessions: Mutex<HashMap<String, ConnectionStatus>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&self, origin: &Origin) -> RtcResult<()> {
        if origin.session_id.is_empty() {
            return Err(RtcError::InvalidArgument("origin has no session id".to_string()));
        }
        self.sessions
            .lock()
            .insert(origin.session_id.clone(), ConnectionStatus::Initializing);
        Ok(())
    }

    /// Move an initialized session to `Connected`, or `Failed` when the
    /// connection line has no usable address.
    pub fn establish(&self, session_id: &str, conn: Option<&ConnectionInfo>) -> ConnectionStatus {
        let status = match conn {
            Some(c) if !c.address.is_empty() => ConnectionStatus::Connected,
            _ => ConnectionStatus::Failed,
        };
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(s) => *s = status,
            None => return ConnectionStatus::New,
        }
        status
    }

    pub fn close(&self, session_id: &str) {
        if let Some(s) = self.sessions.lock().get_mut(session_id) {
            *s = ConnectionStatus::Closed;
        }
    }

    /// Drop the session, returning the status it last held.
    pub fn release(&self, session_id: &str) -> ConnectionStatus {
        self.sessions
            .lock()
            .remove(session_id)
            .unwrap_or(ConnectionStatus::New)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn status(&self, session_id: &str) -> ConnectionStatus {
        self.sessions
            .lock()
            .get(session_id)
            .copied()
            .unwrap_or(ConnectionStatus::New)
    }
}

/// One `rtpmap` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct MediaProcessResult {
    pub media_type: String,
    pub port: u32,
    pub protocol: String,
    pub codecs: Vec<Codec>,
    pub parameters: BTreeMap<String, String>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub success: bool,
    pub session_id: String,
    pub connection_status: ConnectionStatus,
    pub media_results: Vec<MediaProcessResult>,
    pub metadata: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Default)]
pub struct SdpProcessor {
    connections: ConnectionManager,
}

impl SdpProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Validate, initialize the session, establish its connection and
    /// process each media block. Succeeds only if every block does.
    pub fn process_session(&self, session: &SessionDescription) -> ProcessResult {
        let mut result = ProcessResult {
            session_id: session
                .origin
                .as_ref()
                .map(|o| o.session_id.clone())
                .unwrap_or_default(),
            ..Default::default()
        };

        let validation = validator::validate(session);
        if !validation.is_valid() {
            result
                .errors
                .extend(validation.errors.iter().map(|e| e.message.to_string()));
            return result;
        }

        let initialized = session
            .origin
            .as_ref()
            .ok_or_else(|| RtcError::InvalidArgument("missing origin".to_string()))
            .and_then(|o| self.connections.initialize(o));
        if let Err(e) = initialized {
            tracing::error!("Session initialization failed: {}", e);
            result.errors.push("Session initialization failed".to_string());
            return result;
        }

        self.process_connected(session, &mut result);
        result.connection_status = self.connections.release(&result.session_id);
        result
    }

    fn process_connected(&self, session: &SessionDescription, result: &mut ProcessResult) {
        let conn = session
            .connection
            .as_ref()
            .or_else(|| session.media.iter().find_map(|m| m.connection.as_ref()));
        let status = self.connections.establish(&result.session_id, conn);
        if status != ConnectionStatus::Connected {
            result.errors.push(format!("Connection failed: {:?}", status));
            return;
        }

        for media in &session.media {
            let media_result = process_media(media);
            if media_result.success && media_result.codecs.is_empty() {
                result
                    .warnings
                    .push(format!("{} media declares no rtpmap", media.media_type));
            }
            if let Some(e) = &media_result.error {
                result.errors.push(format!("{}: {}", media.media_type, e));
            }
            result.media_results.push(media_result);
        }

        result.success = result.media_results.iter().all(|m| m.success);
        result.metadata.insert(
            "ProcessedAt".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
}

pub fn process_media(media: &MediaDescription) -> MediaProcessResult {
    let mut result = MediaProcessResult {
        media_type: media.media_type.clone(),
        port: media.port,
        protocol: media.protocol.clone(),
        ..Default::default()
    };

    for (key, value) in media.attributes.iter() {
        if let Err(e) = apply_attribute(key, value, &mut result) {
            tracing::error!("Error processing {} media: {}", media.media_type, e);
            result.error = Some(e.to_string());
            return result;
        }
    }

    result.success = true;
    result
}

fn apply_attribute(key: &str, value: &str, result: &mut MediaProcessResult) -> RtcResult<()> {
    match key.to_ascii_lowercase().as_str() {
        "rtpmap" => result.codecs.push(parse_rtpmap(value)?),
        "fmtp" => {
            for (k, v) in parse_fmtp(value) {
                result.parameters.insert(format!("fmtp_{}", k), v);
            }
        }
        "crypto" => {
            // `<tag> <suite> inline:<key>[|lifetime]`
            let mut parts = value.split_whitespace().skip(1);
            let suite = parts.next().unwrap_or_default();
            let key = parts.next().unwrap_or_default();
            result
                .parameters
                .insert("crypto_suite".to_string(), suite.to_string());
            result.parameters.insert(
                "crypto_key".to_string(),
                key.strip_prefix("inline:").unwrap_or(key).to_string(),
            );
        }
        _ => {
            result.parameters.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

/// `<pt> <name>/<clock>[/<channels>]`
pub fn parse_rtpmap(value: &str) -> RtcResult<Codec> {
    let bad = || RtcError::ProtocolViolation(format!("invalid rtpmap '{}'", value));

    let (pt, encoding) = value.split_once(' ').ok_or_else(bad)?;
    let mut fields = encoding.trim().split('/');
    let name = fields.next().filter(|n| !n.is_empty()).ok_or_else(bad)?;
    let clock_rate = fields
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or_else(bad)?;
    let channels = match fields.next() {
        Some(c) => Some(c.parse().map_err(|_| bad())?),
        None => None,
    };

    Ok(Codec {
        payload_type: pt.parse().map_err(|_| bad())?,
        name: name.to_string(),
        clock_rate,
        channels,
    })
}

/// `<pt> k=v;k=v`. Parameters without `=` are kept with an empty value.
fn parse_fmtp(value: &str) -> Vec<(String, String)> {
    let params = value.split_once(' ').map(|(_, p)| p).unwrap_or(value);
    params
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect()
}
