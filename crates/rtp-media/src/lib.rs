//! Codec and RTP packetizer (component C1): G.711 mu-law/A-law transforms,
//! RTP header build/parse, and fixed 20ms send pacing with a 40ms
//! backpressure budget.

pub mod g711;
pub mod pacer;
pub mod packet;
pub mod stats;

pub use g711::G711Variant;
pub use packet::{RtpPacket, RtpParseError};
pub use pacer::{RtpPacer, RtpSink};
pub use stats::RtpReceiveStats;
