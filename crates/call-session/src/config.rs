//! Per-session tunables, including the two toggles resolving the Open
//! Questions around media-readiness and BYE handling.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// RFC 3261 transaction-timer-B equivalent: how long to wait for ACK
    /// after 200 OK before giving up on the dialog.
    pub ack_timer: Duration,
    /// How long to wait for an inbound RTP packet before proceeding
    /// optimistically on the assumption of asymmetric NAT.
    pub media_validation_timer: Duration,
    /// Require at least one inbound RTP packet before transitioning to
    /// MEDIA_READY, instead of proceeding optimistically on timer expiry.
    pub require_rtp_before_ai: bool,
    /// Disable the permissive BYE heuristic (welcome-message / in-progress
    /// / last-audio-activity grace periods) in favor of strict RFC
    /// acceptance (source address match or an explicit Reason header).
    pub strict_bye_handling: bool,
    /// Message sent to the AI session immediately after AI_ACTIVE.
    pub welcome_prompt: String,
    /// How long CONFIRMED must hold before a BYE from an unverified source
    /// is accepted anyway.
    pub bye_grace_period: Duration,
    /// How stale last-audio-activity must be before a BYE is honored when
    /// neither protective flag is set.
    pub bye_audio_silence_threshold: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timer: Duration::from_secs(32),
            media_validation_timer: Duration::from_secs(2),
            require_rtp_before_ai: false,
            strict_bye_handling: false,
            welcome_prompt: "Hello, how can I help you today?".to_string(),
            bye_grace_period: Duration::from_secs(3),
            bye_audio_silence_threshold: Duration::from_secs(30),
        }
    }
}
