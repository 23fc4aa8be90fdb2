//! Codec negotiation against an SDP offer (§4.4 step 5).

use rtp_media::G711Variant;
use sip_message::MediaDescription;

/// Echo the first payload type in the offer that resolves to a locally
/// supported G.711 variant. An offer with no `m=audio` formats at all is
/// treated as malformed and defaulted to mu-law optimistically; an offer
/// that declares formats but none of them are G.711 has no common codec.
pub fn negotiate_codec(media: &MediaDescription) -> Option<G711Variant> {
    if media.formats.is_empty() {
        return Some(G711Variant::Pcmu);
    }
    for &pt in &media.formats {
        let Some(variant) = G711Variant::from_payload_type(pt) else { continue };
        if let Some(rtpmap) = media.rtpmap_for(pt) {
            if !rtpmap.encoding_name.eq_ignore_ascii_case(variant.rtpmap_name()) {
                continue;
            }
        }
        return Some(variant);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_message::RtpMap;

    fn media(formats: Vec<u8>, rtpmaps: Vec<RtpMap>) -> MediaDescription {
        MediaDescription {
            media: "audio".to_string(),
            port: 40000,
            protocol: "RTP/AVP".to_string(),
            formats,
            rtpmaps,
            fmtp: Vec::new(),
        }
    }

    #[test]
    fn picks_pcmu_when_it_is_first() {
        let m = media(vec![0, 8], vec![]);
        assert_eq!(negotiate_codec(&m), Some(G711Variant::Pcmu));
    }

    #[test]
    fn picks_pcma_when_pcmu_is_not_offered() {
        let m = media(vec![101, 8], vec![]);
        assert_eq!(negotiate_codec(&m), Some(G711Variant::Pcma));
    }

    #[test]
    fn refuses_when_no_common_codec() {
        let m = media(vec![18, 101], vec![]);
        assert_eq!(negotiate_codec(&m), None);
    }

    #[test]
    fn defaults_to_mu_law_for_an_empty_format_list() {
        let m = media(vec![], vec![]);
        assert_eq!(negotiate_codec(&m), Some(G711Variant::Pcmu));
    }
}
