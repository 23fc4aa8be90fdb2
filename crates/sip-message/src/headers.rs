//! Case-insensitive, order-preserving header storage plus the typed
//! accessors §4.2 calls for (Call-ID, From/To tags, Via branch, CSeq,
//! WWW-Authenticate params, Session-Expires, Answer-Mode).

use std::fmt;

/// Headers as they appeared on the wire, in order, with case-insensitive
/// lookup. Order is preserved so re-emission is deterministic and
/// golden-testable -- a plain `Vec` mirrors how the upstream `sip-core`
/// keeps its header list rather than collapsing into a `HashMap`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in wire order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

/// Parsed `Via` header: transport/host:port plus the branch parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub sent_by: String,
    pub branch: Option<String>,
}

/// Parsed CSeq header: sequence number and method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub sequence: u32,
    pub method: String,
}

/// Parameters pulled out of a `WWW-Authenticate: Digest ...` challenge
/// (RFC 2617), quoted or unquoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub qop: Option<String>,
    pub algorithm: Option<String>,
    pub opaque: Option<String>,
}

/// Extract the value of `tag=` from a From/To header value. Matches the
/// spec's documented grammar (`tag=([^;\s,]+)`) without pulling in a regex
/// dependency -- the grammar is simple enough for a manual scan.
pub fn extract_tag(header_value: &str) -> Option<String> {
    extract_param(header_value, "tag")
}

/// Extract the bare SIP URI from a From/To header value, stripping any
/// display name and parameters: `"Alice" <sip:alice@x>;tag=1` -> `sip:alice@x`.
pub fn extract_uri(header_value: &str) -> Option<String> {
    let value = header_value.trim();
    if let Some(start) = value.find('<') {
        let end = value[start..].find('>')? + start;
        return Some(value[start + 1..end].to_string());
    }
    let bare = value.split(';').next()?.trim();
    if bare.is_empty() {
        None
    } else {
        Some(bare.to_string())
    }
}

/// Generic `;param=value` extraction terminated by `;`, whitespace, or `,`.
fn extract_param(header_value: &str, param: &str) -> Option<String> {
    let lower = header_value.to_ascii_lowercase();
    let needle = format!("{param}=");
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&needle) {
        let start = search_from + rel;
        // Require the match to be parameter-start (preceded by `;` or
        // string start) so we don't match inside another param's value.
        let preceded_ok = start == 0
            || matches!(header_value.as_bytes()[start - 1], b';' | b' ' | b'\t');
        if preceded_ok {
            let value_start = start + needle.len();
            let rest = &header_value[value_start..];
            let end = rest
                .find(|c: char| c == ';' || c == ',' || c.is_whitespace())
                .unwrap_or(rest.len());
            return Some(rest[..end].trim_matches('"').to_string());
        }
        search_from = start + needle.len();
    }
    None
}

/// Parse a `Via` header value, e.g.
/// `SIP/2.0/UDP 203.0.113.5:5060;branch=z9hG4bK776asdhds;rport`.
pub fn parse_via(value: &str) -> Option<Via> {
    let sent_by = value.split(';').next()?.split_whitespace().last()?.to_string();
    let branch = extract_param(value, "branch");
    Some(Via { sent_by, branch })
}

/// Parse a `CSeq` header value, e.g. `314159 INVITE`.
pub fn parse_cseq(value: &str) -> Option<CSeq> {
    let mut parts = value.split_whitespace();
    let sequence: u32 = parts.next()?.parse().ok()?;
    let method = parts.next()?.to_string();
    Some(CSeq { sequence, method })
}

/// Parse a `WWW-Authenticate: Digest ...` value into its named parameters.
pub fn parse_digest_challenge(value: &str) -> Option<DigestChallenge> {
    let rest = value.trim();
    let rest = rest.strip_prefix("Digest").unwrap_or(rest).trim();
    let mut challenge = DigestChallenge::default();
    for raw_param in split_params(rest) {
        let Some((key, val)) = raw_param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let val = val.trim().trim_matches('"').to_string();
        match key.as_str() {
            "realm" => challenge.realm = Some(val),
            "nonce" => challenge.nonce = Some(val),
            "qop" => challenge.qop = Some(val),
            "algorithm" => challenge.algorithm = Some(val),
            "opaque" => challenge.opaque = Some(val),
            _ => {}
        }
    }
    Some(challenge)
}

/// Split a comma-separated parameter list while respecting quoted commas
/// (a qop value like `"auth,auth-int"` must not be split in the middle).
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = value[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// True if `Answer-Mode` or `Priv-Answer-Mode` requests RFC 5373
/// auto-answer.
pub fn is_auto_answer(headers: &HeaderMap) -> bool {
    ["Answer-Mode", "Priv-Answer-Mode"]
        .iter()
        .filter_map(|name| headers.get(name))
        .any(|v| v.eq_ignore_ascii_case("Auto"))
}
