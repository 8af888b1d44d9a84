//! Session model to SDP text.

use super::model::{Attributes, ConnectionInfo, SessionDescription};

/// Render `session` as CRLF-terminated SDP.
///
/// Line order is v, o, s, c, t, session attributes, session candidates, then each media block
/// followed by its own `c=` and attributes. Absent optional lines are omitted.
pub fn generate(session: &SessionDescription) -> String {
    let mut out = String::new();

    line(&mut out, 'v', &session.version);
    if let Some(o) = &session.origin {
        line(
            &mut out,
            'o',
            &format!(
                "{} {} {} {} {} {}",
                o.username, o.session_id, o.session_version, o.net_type, o.addr_type, o.unicast_address
            ),
        );
    }
    line(&mut out, 's', &session.session_name);
    if let Some(c) = &session.connection {
        line(&mut out, 'c', &connection(c));
    }
    if let Some(t) = &session.timing {
        line(&mut out, 't', &format!("{} {}", t.start, t.stop));
    }
    attributes(&mut out, &session.attributes);
    for candidate in &session.candidates {
        line(&mut out, 'a', &format!("candidate:{}", candidate));
    }

    for media in &session.media {
        line(
            &mut out,
            'm',
            &format!(
                "{} {} {} {}",
                media.media_type,
                media.port,
                media.protocol,
                media.format_ids.join(" ")
            ),
        );
        if let Some(c) = &media.connection {
            line(&mut out, 'c', &connection(c));
        }
        attributes(&mut out, &media.attributes);
    }

    out
}

fn line(out: &mut String, kind: char, value: &str) {
    out.push(kind);
    out.push('=');
    out.push_str(value);
    out.push_str("\r\n");
}

fn connection(c: &ConnectionInfo) -> String {
    format!("{} {} {}", c.net_type, c.addr_type, c.address)
}

fn attributes(out: &mut String, attrs: &Attributes) {
    for (key, value) in attrs.iter() {
        if value.is_empty() {
            line(out, 'a', key);
        } else if key.starts_with("candidate:") {
            line(out, 'a', &format!("{} {}", key, value));
        } else {
            line(out, 'a', &format!("{}:{}", key, value));
        }
    }
}
