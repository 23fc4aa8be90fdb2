//! Request/response parsing and emission (§4.2).

use crate::error::SipParseError;
use crate::headers::{parse_cseq, parse_via, CSeq, HeaderMap, Via};
use crate::sdp::SessionDescription;

const REQUIRED_REQUEST_HEADERS: &[&str] = &["Via", "From", "To", "Call-ID", "CSeq"];

/// Either a request (method + request-URI) or a response (status + reason).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: String, uri: String },
    Response { status: u16, reason: String },
}

/// A parsed SIP message: start line, headers, and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    pub start_line: StartLine,
    pub headers: HeaderMap,
    pub body: String,
}

impl SipMessage {
    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get("Call-ID")
    }

    pub fn from_tag(&self) -> Option<String> {
        self.headers.get("From").and_then(crate::headers::extract_tag)
    }

    pub fn to_tag(&self) -> Option<String> {
        self.headers.get("To").and_then(crate::headers::extract_tag)
    }

    pub fn via(&self) -> Option<Via> {
        self.headers.get("Via").and_then(parse_via)
    }

    pub fn cseq(&self) -> Option<CSeq> {
        self.headers.get("CSeq").and_then(parse_cseq)
    }

    /// Parse the body as SDP if `Content-Type: application/sdp` is present.
    pub fn sdp(&self) -> Option<SessionDescription> {
        let ct = self.headers.get("Content-Type")?;
        if !ct.eq_ignore_ascii_case("application/sdp") {
            return None;
        }
        SessionDescription::parse(&self.body).ok()
    }

    /// Parse a raw UDP datagram into a [`SipMessage`].
    ///
    /// Content-Length mismatches are logged (by the caller, via the
    /// returned flag) and delivered anyway if headers suffice -- the
    /// "degraded mode" §4.2 describes. Missing required request headers
    /// make this return `Err`, and callers are expected to discard such
    /// messages silently per §4.2.
    pub fn parse(datagram: &[u8]) -> Result<Self, SipParseError> {
        if datagram.is_empty() {
            return Err(SipParseError::Empty);
        }
        let text = String::from_utf8_lossy(datagram);
        let mut lines = text.split("\r\n");

        let start = lines.next().ok_or(SipParseError::Empty)?;
        let start_line = parse_start_line(start)?;

        let mut headers = HeaderMap::new();
        let mut body_start = None;
        for (idx, line) in lines.clone().enumerate() {
            if line.is_empty() {
                body_start = Some(idx + 1);
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SipParseError::MalformedHeader(line.to_string()))?;
            headers.push(name.trim(), value.trim());
        }

        let body = match body_start {
            Some(n) => lines.skip(n).collect::<Vec<_>>().join("\r\n"),
            None => String::new(),
        };

        if start_line_is_request(&start_line) {
            for required in REQUIRED_REQUEST_HEADERS {
                if !headers.contains(required) {
                    return Err(SipParseError::MissingHeader(required));
                }
            }
        }

        if let Some(declared) = headers.get("Content-Length").and_then(|v| v.parse::<usize>().ok()) {
            let actual = body.as_bytes().len();
            if declared != actual {
                tracing::warn!(declared, actual, "Content-Length mismatch; delivering in degraded mode");
            }
        }

        Ok(SipMessage {
            start_line,
            headers,
            body,
        })
    }

    /// Serialize to the wire format: exact header names, CRLF endings, and
    /// an accurate Content-Length.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        match &self.start_line {
            StartLine::Request { method, uri } => {
                out.push_str(&format!("{method} {uri} SIP/2.0\r\n"));
            }
            StartLine::Response { status, reason } => {
                out.push_str(&format!("SIP/2.0 {status} {reason}\r\n"));
            }
        }
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("Content-Length") {
                continue; // recomputed below, always present and accurate
            }
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!("Content-Length: {}\r\n", self.body.as_bytes().len()));
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

fn start_line_is_request(start_line: &StartLine) -> bool {
    matches!(start_line, StartLine::Request { .. })
}

fn parse_start_line(line: &str) -> Result<StartLine, SipParseError> {
    if let Some(rest) = line.strip_prefix("SIP/2.0 ") {
        let mut parts = rest.splitn(2, ' ');
        let status: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SipParseError::MalformedStartLine(line.to_string()))?;
        let reason = parts.next().unwrap_or("").to_string();
        return Ok(StartLine::Response { status, reason });
    }

    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| SipParseError::MalformedStartLine(line.to_string()))?
        .to_string();
    let uri = parts
        .next()
        .ok_or_else(|| SipParseError::MalformedStartLine(line.to_string()))?
        .to_string();
    let version = parts.next();
    if version != Some("SIP/2.0") {
        return Err(SipParseError::MalformedStartLine(line.to_string()));
    }
    Ok(StartLine::Request { method, uri })
}

/// Build a response echoing Via, From, Call-ID, and CSeq from `request`,
/// per §4.2's emission rule. For 2xx responses the To header gets a
/// locally generated tag if one isn't already present.
pub fn build_response(request: &SipMessage, status: u16, reason: &str, local_to_tag: Option<&str>) -> SipMessage {
    let mut headers = HeaderMap::new();
    if let Some(via) = request.headers.get("Via") {
        headers.push("Via", via);
    }
    if let Some(from) = request.headers.get("From") {
        headers.push("From", from);
    }

    let to_value = request.headers.get("To").unwrap_or("").to_string();
    let to_has_tag = crate::headers::extract_tag(&to_value).is_some();
    let final_to = if (200..300).contains(&status) && !to_has_tag {
        if let Some(tag) = local_to_tag {
            format!("{to_value};tag={tag}")
        } else {
            to_value
        }
    } else {
        to_value
    };
    headers.push("To", final_to);

    if let Some(call_id) = request.headers.get("Call-ID") {
        headers.push("Call-ID", call_id);
    }
    if let Some(cseq) = request.headers.get("CSeq") {
        headers.push("CSeq", cseq);
    }

    SipMessage {
        start_line: StartLine::Response {
            status,
            reason: reason.to_string(),
        },
        headers,
        body: String::new(),
    }
}

/// Build an outbound BYE for a locally-initiated hangup (the AI's
/// `end_call` tool, §4.5): this process was the original INVITE's UAS, so
/// it now originates a request of its own in the same dialog. The Request-
/// URI and To header target the caller's original From identity; From
/// carries this side's tag, generated when the dialog was answered. `cseq`
/// is this side's next local CSeq for the dialog -- shared with any
/// re-INVITE this process also originates, since both are local-origin
/// requests whose CSeq must keep advancing together.
pub fn build_bye_request(original_invite: &SipMessage, local_contact: &str, local_to_tag: &str, cseq: u32) -> SipMessage {
    let mut headers = HeaderMap::new();
    headers.push("Via", format!("SIP/2.0/UDP {local_contact};branch={}", infra_common::ids::generate_branch()));

    let local_uri = original_invite.headers.get("To").and_then(crate::headers::extract_uri).unwrap_or_default();
    headers.push("From", format!("<{local_uri}>;tag={local_to_tag}"));

    let remote_from = original_invite.headers.get("From").unwrap_or("").to_string();
    let request_uri = crate::headers::extract_uri(&remote_from).unwrap_or_default();
    headers.push("To", remote_from);

    if let Some(call_id) = original_invite.headers.get("Call-ID") {
        headers.push("Call-ID", call_id);
    }
    headers.push("CSeq", format!("{cseq} BYE"));
    headers.push("Max-Forwards", "70");

    SipMessage {
        start_line: StartLine::Request {
            method: "BYE".to_string(),
            uri: request_uri,
        },
        headers,
        body: String::new(),
    }
}

/// Build an in-dialog re-INVITE to refresh the session timer (RFC 4028):
/// same shape as [`build_bye_request`] -- this process addresses the
/// caller's original From identity and carries its own tag -- but keeps
/// the dialog alive instead of ending it, and re-offers the same audio
/// media so the far end has nothing to renegotiate.
pub fn build_reinvite_request(
    original_invite: &SipMessage,
    local_contact: &str,
    local_to_tag: &str,
    cseq: u32,
    session_expires: u32,
    sdp_offer: &str,
) -> SipMessage {
    let mut headers = HeaderMap::new();
    headers.push("Via", format!("SIP/2.0/UDP {local_contact};branch={}", infra_common::ids::generate_branch()));

    let local_uri = original_invite.headers.get("To").and_then(crate::headers::extract_uri).unwrap_or_default();
    headers.push("From", format!("<{local_uri}>;tag={local_to_tag}"));

    let remote_from = original_invite.headers.get("From").unwrap_or("").to_string();
    let request_uri = crate::headers::extract_uri(&remote_from).unwrap_or_default();
    headers.push("To", remote_from);

    if let Some(call_id) = original_invite.headers.get("Call-ID") {
        headers.push("Call-ID", call_id);
    }
    headers.push("CSeq", format!("{cseq} INVITE"));
    headers.push("Max-Forwards", "70");
    headers.push("Session-Expires", session_expires.to_string());
    headers.push("Content-Type", "application/sdp");

    SipMessage {
        start_line: StartLine::Request {
            method: "INVITE".to_string(),
            uri: request_uri,
        },
        headers,
        body: sdp_offer.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invite() -> Vec<u8> {
        let raw = "INVITE sip:1000@203.0.113.9 SIP/2.0\r\n\
Via: SIP/2.0/UDP 198.51.100.7:5060;branch=z9hG4bK776asdhds\r\n\
From: \"PBX\" <sip:trunk@pbx.example>;tag=909090\r\n\
To: <sip:1000@203.0.113.9>\r\n\
Call-ID: abc123@pbx.example\r\n\
CSeq: 1 INVITE\r\n\
Content-Length: 0\r\n\
\r\n";
        raw.as_bytes().to_vec()
    }

    #[test]
    fn parses_required_headers_from_an_invite() {
        let msg = SipMessage::parse(&sample_invite()).unwrap();
        assert_eq!(msg.method(), Some("INVITE"));
        assert_eq!(msg.call_id(), Some("abc123@pbx.example"));
        assert_eq!(msg.from_tag().as_deref(), Some("909090"));
        assert_eq!(msg.cseq(), Some(CSeq { sequence: 1, method: "INVITE".to_string() }));
    }

    #[test]
    fn missing_required_header_is_malformed() {
        let raw = "INVITE sip:1000@host SIP/2.0\r\nCall-ID: x\r\n\r\n";
        let err = SipMessage::parse(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, SipParseError::MissingHeader(_)));
    }

    #[test]
    fn build_response_echoes_via_from_call_id_cseq_and_tags_to() {
        let request = SipMessage::parse(&sample_invite()).unwrap();
        let response = build_response(&request, 200, "OK", Some("abcd1234"));
        assert_eq!(response.headers.get("Via"), request.headers.get("Via"));
        assert_eq!(response.headers.get("Call-ID"), request.headers.get("Call-ID"));
        assert!(response.headers.get("To").unwrap().contains("tag=abcd1234"));
    }

    #[test]
    fn build_response_does_not_overwrite_an_existing_to_tag() {
        let raw = "BYE sip:1000@host SIP/2.0\r\n\
Via: SIP/2.0/UDP 198.51.100.7:5060;branch=z9hG4bK1\r\n\
From: <sip:trunk@pbx>;tag=909090\r\n\
To: <sip:1000@host>;tag=existing\r\n\
Call-ID: abc123@pbx\r\n\
CSeq: 2 BYE\r\n\
Content-Length: 0\r\n\
\r\n";
        let request = SipMessage::parse(raw.as_bytes()).unwrap();
        let response = build_response(&request, 200, "OK", Some("would-be-ignored"));
        assert_eq!(response.headers.get("To").unwrap(), "<sip:1000@host>;tag=existing");
    }

    #[test]
    fn to_bytes_emits_an_accurate_content_length() {
        let request = SipMessage::parse(&sample_invite()).unwrap();
        let response = build_response(&request, 200, "OK", Some("tag1"));
        let bytes = response.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn build_bye_request_targets_the_caller_and_carries_the_local_tag() {
        let request = SipMessage::parse(&sample_invite()).unwrap();
        let bye = build_bye_request(&request, "203.0.113.9:5060", "answer-tag", 1);
        assert_eq!(bye.method(), Some("BYE"));
        assert_eq!(bye.call_id(), request.call_id());
        assert_eq!(bye.from_tag().as_deref(), Some("answer-tag"));
        assert_eq!(bye.to_tag().as_deref(), Some("909090"));
        if let StartLine::Request { uri, .. } = &bye.start_line {
            assert_eq!(uri, "sip:trunk@pbx.example");
        } else {
            panic!("expected a request");
        }
    }

    #[test]
    fn build_reinvite_request_carries_session_expires_and_the_sdp_offer() {
        let request = SipMessage::parse(&sample_invite()).unwrap();
        let offer = SessionDescription::audio_answer("203.0.113.9", 40000, 0, "PCMU");
        let reinvite = build_reinvite_request(&request, "203.0.113.9:5060", "answer-tag", 2, 1800, &offer);
        assert_eq!(reinvite.method(), Some("INVITE"));
        assert_eq!(reinvite.call_id(), request.call_id());
        assert_eq!(reinvite.from_tag().as_deref(), Some("answer-tag"));
        assert_eq!(reinvite.headers.get("Session-Expires"), Some("1800"));
        assert_eq!(reinvite.headers.get("CSeq"), Some("2 INVITE"));
        assert_eq!(reinvite.body, offer);
    }

    #[test]
    fn parse_then_emit_then_parse_is_stable_on_required_fields() {
        let request = SipMessage::parse(&sample_invite()).unwrap();
        let response = build_response(&request, 180, "Ringing", Some("tag1"));
        let reparsed = SipMessage::parse(&response.to_bytes()).unwrap();
        assert_eq!(reparsed.status(), Some(180));
        assert_eq!(reparsed.call_id(), request.call_id());
        assert_eq!(reparsed.cseq(), request.cseq());
    }
}
