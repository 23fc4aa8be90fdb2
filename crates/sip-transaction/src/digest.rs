//! RFC 2617 digest authentication, kept as pure functions so the math is
//! testable independent of any transport or transaction state (§4.3).

use md5::Digest as _;

fn md5_hex(input: &str) -> String {
    let mut hasher = md5::Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// The eight fields RFC 2617 needs to compute a digest `response=` value.
#[derive(Debug, Clone)]
pub struct DigestInputs<'a> {
    pub username: &'a str,
    pub realm: &'a str,
    pub password: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub nonce: &'a str,
    pub qop: Option<&'a str>,
    pub nc: &'a str,
    pub cnonce: &'a str,
}

/// Compute the digest `response` value for an Authorization header.
///
/// When `qop` names "auth" (or a list containing it), response =
/// `MD5(HA1:nonce:nc:cnonce:auth:HA2)`; otherwise response =
/// `MD5(HA1:nonce:HA2)`.
pub fn compute_response(inputs: &DigestInputs<'_>) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", inputs.username, inputs.realm, inputs.password));
    let ha2 = md5_hex(&format!("{}:{}", inputs.method, inputs.uri));

    let has_auth_qop = inputs
        .qop
        .map(|q| q.split(',').any(|v| v.trim() == "auth"))
        .unwrap_or(false);

    if has_auth_qop {
        md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, inputs.nonce, inputs.nc, inputs.cnonce, ha2
        ))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, inputs.nonce, ha2))
    }
}

/// Render the `Authorization: Digest ...` header value.
#[allow(clippy::too_many_arguments)]
pub fn build_authorization_header(
    inputs: &DigestInputs<'_>,
    opaque: Option<&str>,
    algorithm: Option<&str>,
) -> String {
    let response = compute_response(inputs);
    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        inputs.username, inputs.realm, inputs.nonce, inputs.uri, response
    );
    if let Some(algorithm) = algorithm {
        header.push_str(&format!(", algorithm={algorithm}"));
    }
    if inputs.qop.map(|q| q.split(',').any(|v| v.trim() == "auth")).unwrap_or(false) {
        header.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", inputs.nc, inputs.cnonce));
    }
    if let Some(opaque) = opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_2617_worked_example_matches() {
        // The canonical example from RFC 2617 §3.5.
        let inputs = DigestInputs {
            username: "Mufasa",
            realm: "testrealm@host.com",
            password: "Circle Of Life",
            method: "GET",
            uri: "/dir/index.html",
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            qop: Some("auth"),
            nc: "00000001",
            cnonce: "0a4f113b",
        };
        assert_eq!(compute_response(&inputs), "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn register_digest_matches_ha1_nonce_ha2_construction() {
        // A REGISTER challenge with no qop: response = MD5(HA1:nonce:HA2).
        let inputs = DigestInputs {
            username: "30",
            realm: "asterisk",
            password: "Twist@2025",
            method: "REGISTER",
            uri: "sip:122.163.120.156",
            nonce: "1a2b3c",
            qop: None,
            nc: "00000001",
            cnonce: "deadbeef",
        };
        let ha1 = md5_hex("30:asterisk:Twist@2025");
        let ha2 = md5_hex("REGISTER:sip:122.163.120.156");
        let expected = md5_hex(&format!("{ha1}:1a2b3c:{ha2}"));
        assert_eq!(compute_response(&inputs), expected);
        assert_eq!(compute_response(&inputs).len(), 32);
    }

    #[test]
    fn without_qop_uses_the_three_part_hash() {
        let inputs = DigestInputs {
            username: "1000",
            realm: "asterisk",
            password: "secret",
            method: "REGISTER",
            uri: "sip:pbx.example",
            nonce: "1a2b3c",
            qop: None,
            nc: "00000001",
            cnonce: "deadbeef",
        };
        let with_qop = DigestInputs { qop: Some("auth"), ..inputs.clone() };
        assert_ne!(compute_response(&inputs), compute_response(&with_qop));
    }

    #[test]
    fn build_authorization_header_includes_qop_fields_only_when_present() {
        let inputs = DigestInputs {
            username: "1000",
            realm: "asterisk",
            password: "secret",
            method: "REGISTER",
            uri: "sip:pbx.example",
            nonce: "1a2b3c",
            qop: None,
            nc: "00000001",
            cnonce: "deadbeef",
        };
        let header = build_authorization_header(&inputs, None, None);
        assert!(!header.contains("qop="));

        let inputs = DigestInputs { qop: Some("auth"), ..inputs };
        let header = build_authorization_header(&inputs, Some("xyz"), Some("MD5"));
        assert!(header.contains("qop=auth"));
        assert!(header.contains("opaque=\"xyz\""));
        assert!(header.contains("algorithm=MD5"));
    }
}
