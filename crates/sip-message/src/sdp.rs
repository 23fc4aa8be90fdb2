//! Minimal SDP offer/answer parsing (RFC 4566 / RFC 3264): just enough of
//! the session description to negotiate a single audio media stream.

use crate::error::SipParseError;

/// One `a=rtpmap:<payload> <name>/<rate>` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
}

/// One `m=` media line plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media: String,
    pub port: u16,
    pub protocol: String,
    pub formats: Vec<u8>,
    pub rtpmaps: Vec<RtpMap>,
    pub fmtp: Vec<(u8, String)>,
}

impl MediaDescription {
    pub fn rtpmap_for(&self, payload_type: u8) -> Option<&RtpMap> {
        self.rtpmaps.iter().find(|m| m.payload_type == payload_type)
    }
}

/// A parsed SDP body: connection address and the media descriptions that
/// followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub origin: Option<String>,
    pub connection_address: Option<String>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn audio_media(&self) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media == "audio")
    }

    pub fn parse(body: &str) -> Result<Self, SipParseError> {
        let mut origin = None;
        let mut connection_address = None;
        let mut media: Vec<MediaDescription> = Vec::new();

        for raw_line in body.lines() {
            let line = raw_line.trim_end_matches('\r');
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }
            let (kind, value) = (line.as_bytes()[0], &line[2..]);
            match kind {
                b'o' => origin = Some(value.to_string()),
                b'c' => {
                    // c=<nettype> <addrtype> <address>
                    if let Some(addr) = value.split_whitespace().nth(2) {
                        connection_address = Some(addr.to_string());
                    }
                }
                b'm' => {
                    let mut parts = value.split_whitespace();
                    let media_type = parts
                        .next()
                        .ok_or_else(|| SipParseError::MalformedHeader(line.to_string()))?
                        .to_string();
                    let port: u16 = parts
                        .next()
                        .and_then(|p| p.parse().ok())
                        .ok_or_else(|| SipParseError::MalformedHeader(line.to_string()))?;
                    let protocol = parts
                        .next()
                        .ok_or_else(|| SipParseError::MalformedHeader(line.to_string()))?
                        .to_string();
                    let formats: Vec<u8> = parts.filter_map(|f| f.parse().ok()).collect();
                    media.push(MediaDescription {
                        media: media_type,
                        port,
                        protocol,
                        formats,
                        rtpmaps: Vec::new(),
                        fmtp: Vec::new(),
                    });
                }
                b'a' => {
                    let Some(current) = media.last_mut() else {
                        continue; // session-level attribute, not media-scoped
                    };
                    if let Some(rest) = value.strip_prefix("rtpmap:") {
                        if let Some(rtpmap) = parse_rtpmap(rest) {
                            current.rtpmaps.push(rtpmap);
                        }
                    } else if let Some(rest) = value.strip_prefix("fmtp:") {
                        if let Some((pt, params)) = rest.split_once(' ') {
                            if let Ok(pt) = pt.parse::<u8>() {
                                current.fmtp.push((pt, params.to_string()));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(SessionDescription {
            origin,
            connection_address,
            media,
        })
    }

    /// Render a minimal offer/answer body for a single PCMU/PCMA audio
    /// stream, matching the shape the parser above accepts.
    pub fn audio_answer(local_address: &str, local_port: u16, payload_type: u8, encoding_name: &str) -> String {
        format!(
            "v=0\r\n\
o=- 0 0 IN IP4 {local_address}\r\n\
s=-\r\n\
c=IN IP4 {local_address}\r\n\
t=0 0\r\n\
m=audio {local_port} RTP/AVP {payload_type}\r\n\
a=rtpmap:{payload_type} {encoding_name}/8000\r\n\
a=sendrecv\r\n"
        )
    }
}

fn parse_rtpmap(value: &str) -> Option<RtpMap> {
    let (pt, rest) = value.split_once(' ')?;
    let payload_type: u8 = pt.parse().ok()?;
    let mut fields = rest.split('/');
    let encoding_name = fields.next()?.to_string();
    let clock_rate: u32 = fields.next()?.parse().ok()?;
    Some(RtpMap {
        payload_type,
        encoding_name,
        clock_rate,
    })
}
