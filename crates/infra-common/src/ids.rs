//! Identifier generators shared by the SIP layers: Via branches, tags, and
//! Call-IDs all need to be unguessable and, for the branch, to carry the
//! RFC 3261 magic cookie.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// RFC 3261 magic cookie every branch parameter must begin with.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a fresh Via branch parameter, e.g. `z9hG4bK3f9a2c1e`.
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, random_alphanumeric(16))
}

/// Generate a fresh From/To tag.
pub fn generate_tag() -> String {
    random_alphanumeric(10)
}

/// Generate a fresh Call-ID, scoped with `@host` the way most SIP stacks do.
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", random_alphanumeric(24), host)
}

/// Generate a 16 hex-char client nonce (`cnonce`) for digest authentication.
pub fn generate_cnonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate a random 32-bit RTP SSRC.
pub fn generate_ssrc() -> u32 {
    rand::thread_rng().gen()
}

/// Generate a random 16-bit initial RTP sequence number.
pub fn generate_initial_sequence() -> u16 {
    rand::thread_rng().gen()
}

/// Generate a random 32-bit initial RTP timestamp.
pub fn generate_initial_timestamp() -> u32 {
    rand::thread_rng().gen()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_carries_the_magic_cookie() {
        assert!(generate_branch().starts_with(BRANCH_MAGIC_COOKIE));
    }

    #[test]
    fn cnonce_is_sixteen_hex_chars() {
        let cnonce = generate_cnonce();
        assert_eq!(cnonce.len(), 16);
        assert!(cnonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_not_trivially_repeated() {
        assert_ne!(generate_branch(), generate_branch());
        assert_ne!(generate_tag(), generate_tag());
        assert_ne!(generate_call_id("h"), generate_call_id("h"));
    }
}
