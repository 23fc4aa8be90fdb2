//! RTP packet header build/parse (RFC 3550 §5.1), scoped to what this
//! bridge needs: fixed 12-byte header, no CSRC list of our own, and enough
//! CSRC/extension awareness to size incoming packets from a PBX correctly.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const RTP_HEADER_LEN: usize = 12;
pub const RTP_VERSION: u8 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtpParseError {
    #[error("packet too short: {0} bytes, need at least {RTP_HEADER_LEN}")]
    TooShort(usize),
    #[error("unsupported RTP version {0}, expected {RTP_VERSION}")]
    UnsupportedVersion(u8),
    #[error("packet too short for its csrc count/extension header")]
    TruncatedHeader,
}

/// A parsed RTP header plus a view of the payload that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Serialize to the wire format this bridge emits: version 2, no
    /// padding, no extension, no CSRC -- just the 12-byte fixed header.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.put_u8(0x80); // V=2, P=0, X=0, CC=0
        let marker_bit = if self.marker { 0x80 } else { 0x00 };
        buf.put_u8(marker_bit | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a received datagram. Rejects anything shorter than the fixed
    /// header or not RTP version 2; honors the CSRC count and extension bit
    /// to locate the payload start, per §4.1's parser contract.
    pub fn parse(data: &[u8]) -> Result<Self, RtpParseError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(RtpParseError::TooShort(data.len()));
        }

        let b0 = data[0];
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(RtpParseError::UnsupportedVersion(version));
        }
        let has_extension = (b0 & 0x10) != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = data[1];
        let marker = (b1 & 0x80) != 0;
        let payload_type = b1 & 0x7F;

        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if offset > data.len() {
            return Err(RtpParseError::TruncatedHeader);
        }

        if has_extension {
            if offset + 4 > data.len() {
                return Err(RtpParseError::TruncatedHeader);
            }
            let ext_len_words =
                u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_len_words * 4;
            if offset > data.len() {
                return Err(RtpParseError::TruncatedHeader);
            }
        }

        Ok(RtpPacket {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: Bytes::copy_from_slice(&data[offset..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> RtpPacket {
        RtpPacket {
            marker: true,
            payload_type: 0,
            sequence: 1000,
            timestamp: 160_000,
            ssrc: 0xDEADBEEF,
            payload: Bytes::from_static(&[0xAA; 160]),
        }
    }

    #[test]
    fn parse_rejects_short_packets() {
        let err = RtpPacket::parse(&[0u8; 11]).unwrap_err();
        assert_eq!(err, RtpParseError::TooShort(11));
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut bytes = sample_packet().to_bytes().to_vec();
        bytes[0] = 0x40; // version 1
        let err = RtpPacket::parse(&bytes).unwrap_err();
        assert_eq!(err, RtpParseError::UnsupportedVersion(1));
    }

    #[test]
    fn encode_then_parse_round_trips_every_field() {
        let packet = sample_packet();
        let parsed = RtpPacket::parse(&packet.to_bytes()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn header_is_exactly_twelve_bytes_for_a_plain_packet() {
        let packet = sample_packet();
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), RTP_HEADER_LEN + 160);
        assert_eq!(bytes[0], 0x80);
    }

    #[test]
    fn parse_honors_csrc_count_when_locating_payload() {
        let mut raw = vec![0x81u8, 0x00, 0x00, 0x01, 0, 0, 0, 160, 0, 0, 0, 1];
        raw.extend_from_slice(&[0u8; 4]); // one CSRC entry
        raw.extend_from_slice(&[0xBBu8; 4]); // payload
        let parsed = RtpPacket::parse(&raw).unwrap();
        assert_eq!(parsed.payload.as_ref(), &[0xBBu8; 4]);
    }
}
