//! The per-dialog state machine (§4.4). `Session::on_event` is a pure
//! function from (state, event) to (new state, actions) -- the same split
//! the registration engine keeps between protocol math and I/O. Callers
//! (the telephony-bridge binary) execute the returned [`Action`]s against
//! real sockets, timers, and the AI client.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rtp_media::G711Variant;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::state::SessionState;

pub const ACK_TIMER_NAME: &str = "ack_timer";
pub const RINGING_TIMER_NAME: &str = "ringing_timer";
pub const ANSWER_TIMER_NAME: &str = "answer_timer";
pub const MEDIA_VALIDATION_TIMER_NAME: &str = "media_validation_timer";
pub const SESSION_REFRESH_TIMER_NAME: &str = "session_refresh_timer";

#[derive(Debug, Clone)]
pub struct InviteInfo {
    pub cseq: u32,
    pub source_addr: SocketAddr,
    pub auto_answer: bool,
    pub codec: Option<G711Variant>,
    pub local_rtp_port: u16,
    pub session_expires: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum Event {
    Invite(InviteInfo),
    RetransmittedInvite { cseq: u32 },
    Ack,
    Cancel,
    Bye { source_addr: SocketAddr, reason: Option<String> },
    RingingTimerFired,
    AnswerTimerFired,
    AckTimerFired,
    MediaValidationTimerFired,
    RtpPacketArrived,
    RtpPacketSent,
    AiSessionUpdated,
    AiResponseDone,
    SessionRefreshTimerFired,
    LocalHangup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendTrying,
    SendRinging { to_tag: String },
    SendOk { codec: G711Variant, local_rtp_port: u16, to_tag: String },
    SendNotAcceptable,
    ResendLastProvisional,
    ArmTimer { name: String, delay: Duration },
    CancelTimer { name: String },
    StartMediaPacer,
    OpenAiSession,
    SendAiWelcome { prompt: String },
    SendBye200,
    SendBye,
    IgnoreBye,
    DeferBye,
    Send487ToInvite,
    SendCancel200,
    SendSessionRefresh,
    ScheduleSessionRefresh { delay: Duration },
    Teardown,
    EmitSessionRemoved,
}

pub struct Session {
    pub state: SessionState,
    config: SessionConfig,
    remote_cseq: Option<u32>,
    to_tag: Option<String>,
    caller_addr: Option<SocketAddr>,
    codec: Option<G711Variant>,
    local_rtp_port: u16,
    confirmed_at: Option<Instant>,
    welcome_message_active: bool,
    ai_response_in_progress: bool,
    pending_cleanup: bool,
    last_audio_activity: Option<Instant>,
    session_expires: Option<u32>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: SessionState::Idle,
            config,
            remote_cseq: None,
            to_tag: None,
            caller_addr: None,
            codec: None,
            local_rtp_port: 0,
            confirmed_at: None,
            welcome_message_active: false,
            ai_response_in_progress: false,
            pending_cleanup: false,
            last_audio_activity: None,
            session_expires: None,
        }
    }

    pub fn on_event(&mut self, event: Event, now: Instant) -> Vec<Action> {
        match event {
            Event::Invite(info) => self.on_invite(info),
            Event::RetransmittedInvite { cseq } => self.on_retransmitted_invite(cseq),
            Event::Ack => self.on_ack(now),
            Event::Cancel => self.on_cancel(),
            Event::Bye { source_addr, reason } => self.on_bye(source_addr, reason, now),
            Event::RingingTimerFired => self.on_ringing_timer(),
            Event::AnswerTimerFired => self.on_answer_timer(),
            Event::AckTimerFired => self.on_ack_timer(),
            Event::MediaValidationTimerFired => self.on_media_validation_timer(now),
            Event::RtpPacketArrived => self.on_rtp_packet(now),
            Event::RtpPacketSent => self.on_rtp_sent(now),
            Event::AiSessionUpdated => self.on_ai_session_updated(),
            Event::AiResponseDone => self.on_ai_response_done(),
            Event::SessionRefreshTimerFired => self.on_session_refresh_timer(),
            Event::LocalHangup => self.on_local_hangup(),
        }
    }

    /// The AI's `end_call` tool (§4.5): this process originates the BYE
    /// rather than waiting for one, since nothing else will end the call.
    fn on_local_hangup(&mut self) -> Vec<Action> {
        if self.state == SessionState::Terminated || self.state == SessionState::Idle {
            return Vec::new();
        }
        self.state = SessionState::Terminated;
        vec![Action::SendBye, Action::Teardown, Action::EmitSessionRemoved]
    }

    /// This side's tag, once a provisional or final response has assigned
    /// one -- needed to address a locally-originated BYE back to the caller.
    pub fn to_tag(&self) -> Option<&str> {
        self.to_tag.as_deref()
    }

    /// The negotiated codec, once an INVITE has been admitted -- needed to
    /// re-offer the same media in a session-refresh re-INVITE.
    pub fn codec(&self) -> Option<G711Variant> {
        self.codec
    }

    /// The local RTP port allocated for this dialog.
    pub fn local_rtp_port(&self) -> u16 {
        self.local_rtp_port
    }

    fn on_invite(&mut self, info: InviteInfo) -> Vec<Action> {
        if self.state != SessionState::Idle {
            // Existing dialog: a non-advancing CSeq is a retransmission.
            if let Some(remote) = self.remote_cseq {
                if info.cseq <= remote {
                    return vec![Action::ResendLastProvisional];
                }
            }
        }

        self.remote_cseq = Some(info.cseq);
        self.caller_addr = Some(info.source_addr);
        self.local_rtp_port = info.local_rtp_port;
        self.session_expires = info.session_expires;
        self.state = SessionState::Proceeding;

        let Some(codec) = info.codec else {
            self.state = SessionState::Terminated;
            return vec![Action::SendNotAcceptable, Action::EmitSessionRemoved];
        };
        self.codec = Some(codec);

        let ringing_delay = Duration::from_millis(100);
        let answer_delay = if info.auto_answer { Duration::from_millis(100) } else { Duration::from_secs(1) };

        let mut actions = vec![
            Action::SendTrying,
            Action::ArmTimer { name: RINGING_TIMER_NAME.to_string(), delay: ringing_delay },
            Action::ArmTimer { name: ANSWER_TIMER_NAME.to_string(), delay: answer_delay },
        ];

        if let Some(expires) = info.session_expires {
            let refresh_delay = Duration::from_secs(expires.saturating_sub(30) as u64);
            actions.push(Action::ScheduleSessionRefresh { delay: refresh_delay });
        }

        actions
    }

    fn on_retransmitted_invite(&mut self, cseq: u32) -> Vec<Action> {
        if self.remote_cseq.map(|c| cseq <= c).unwrap_or(false) {
            vec![Action::ResendLastProvisional]
        } else {
            Vec::new()
        }
    }

    fn on_ringing_timer(&mut self) -> Vec<Action> {
        if self.state != SessionState::Proceeding {
            return Vec::new();
        }
        let to_tag = infra_common::ids::generate_tag();
        self.to_tag = Some(to_tag.clone());
        vec![Action::SendRinging { to_tag }]
    }

    fn on_answer_timer(&mut self) -> Vec<Action> {
        if self.state != SessionState::Proceeding {
            return Vec::new();
        }
        let Some(codec) = self.codec else { return Vec::new() };
        let to_tag = self.to_tag.clone().unwrap_or_else(|| {
            let tag = infra_common::ids::generate_tag();
            self.to_tag = Some(tag.clone());
            tag
        });
        vec![
            Action::SendOk { codec, local_rtp_port: self.local_rtp_port, to_tag },
            Action::ArmTimer { name: ACK_TIMER_NAME.to_string(), delay: self.config.ack_timer },
        ]
    }

    fn on_ack(&mut self, now: Instant) -> Vec<Action> {
        if self.state != SessionState::Proceeding {
            return Vec::new();
        }
        self.state = SessionState::Confirmed;
        self.confirmed_at = Some(now);
        vec![
            Action::CancelTimer { name: ACK_TIMER_NAME.to_string() },
            Action::ArmTimer { name: MEDIA_VALIDATION_TIMER_NAME.to_string(), delay: self.config.media_validation_timer },
        ]
    }

    fn on_cancel(&mut self) -> Vec<Action> {
        self.state = SessionState::Terminated;
        vec![Action::SendCancel200, Action::Send487ToInvite, Action::EmitSessionRemoved]
    }

    fn on_media_validation_timer(&mut self, now: Instant) -> Vec<Action> {
        if self.state != SessionState::Confirmed {
            return Vec::new();
        }
        if self.config.require_rtp_before_ai {
            // Stay in CONFIRMED; only an actual RTP packet advances us.
            return Vec::new();
        }
        self.transition_to_media_ready(now)
    }

    fn on_rtp_packet(&mut self, now: Instant) -> Vec<Action> {
        self.last_audio_activity = Some(now);
        if self.state != SessionState::Confirmed {
            return Vec::new();
        }
        let mut actions = vec![Action::CancelTimer { name: MEDIA_VALIDATION_TIMER_NAME.to_string() }];
        actions.extend(self.transition_to_media_ready(now));
        actions
    }

    /// Outbound audio (the AI speaking) counts as activity too -- the BYE
    /// staleness fallback below must not tear down a call just because the
    /// caller itself has gone quiet while the AI is still talking.
    fn on_rtp_sent(&mut self, now: Instant) -> Vec<Action> {
        self.last_audio_activity = Some(now);
        Vec::new()
    }

    /// RFC 4028 session refresh: re-send the in-dialog INVITE at
    /// `session_expires - 30` and reschedule itself for the next cycle.
    /// No-op once the dialog is gone, or if no Session-Expires was ever
    /// negotiated.
    fn on_session_refresh_timer(&mut self) -> Vec<Action> {
        if matches!(self.state, SessionState::Idle | SessionState::Terminated) {
            return Vec::new();
        }
        let Some(expires) = self.session_expires else { return Vec::new() };
        let refresh_delay = Duration::from_secs(expires.saturating_sub(30) as u64);
        vec![Action::SendSessionRefresh, Action::ScheduleSessionRefresh { delay: refresh_delay }]
    }

    fn transition_to_media_ready(&mut self, now: Instant) -> Vec<Action> {
        self.state = SessionState::MediaReady;
        self.last_audio_activity.get_or_insert(now);
        vec![Action::StartMediaPacer, Action::OpenAiSession]
    }

    fn on_ai_session_updated(&mut self) -> Vec<Action> {
        if self.state != SessionState::MediaReady {
            return Vec::new();
        }
        self.state = SessionState::AiActive;
        self.welcome_message_active = true;
        vec![Action::SendAiWelcome { prompt: self.config.welcome_prompt.clone() }]
    }

    fn on_ai_response_done(&mut self) -> Vec<Action> {
        self.welcome_message_active = false;
        self.ai_response_in_progress = false;
        if self.pending_cleanup {
            self.pending_cleanup = false;
            self.state = SessionState::Terminated;
            return vec![Action::Teardown, Action::EmitSessionRemoved];
        }
        Vec::new()
    }

    /// §4.4's BYE disposition rules, the "critical defensive logic" that
    /// combats spurious BYEs from flaky PBX trunks.
    fn on_bye(&mut self, source_addr: SocketAddr, reason: Option<String>, now: Instant) -> Vec<Action> {
        let source_matches = self.caller_addr == Some(source_addr);
        let reason_says_hangup = reason
            .as_deref()
            .map(|r| {
                let lower = r.to_ascii_lowercase();
                lower.contains("user") || lower.contains("normal") || lower.contains("hangup")
            })
            .unwrap_or(false);
        let long_enough_confirmed = self
            .confirmed_at
            .map(|t| now.duration_since(t) > self.config.bye_grace_period)
            .unwrap_or(false);

        let legitimate = source_matches || reason_says_hangup || long_enough_confirmed;

        if legitimate || self.config.strict_bye_handling {
            if legitimate {
                return self.teardown_for_bye();
            }
            // strict mode with none of the legitimacy conditions met: reject
            // silently by ignoring, matching RFC intent of not tearing down
            // on an unauthenticated BYE.
            info!("strict BYE handling: rejecting BYE with no legitimacy signal");
            return vec![Action::IgnoreBye];
        }

        if self.welcome_message_active {
            return vec![Action::IgnoreBye];
        }
        if self.ai_response_in_progress {
            self.pending_cleanup = true;
            return vec![Action::DeferBye];
        }

        let audio_stale = self
            .last_audio_activity
            .map(|t| now.duration_since(t) > self.config.bye_audio_silence_threshold)
            .unwrap_or(true);
        if audio_stale {
            return self.teardown_for_bye();
        }

        warn!("ignoring BYE: no legitimacy signal and recent audio activity");
        vec![Action::IgnoreBye]
    }

    fn teardown_for_bye(&mut self) -> Vec<Action> {
        self.state = SessionState::Terminated;
        vec![Action::SendBye200, Action::Teardown, Action::EmitSessionRemoved]
    }

    pub fn mark_ai_response_in_progress(&mut self) {
        self.ai_response_in_progress = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)), port)
    }

    fn invite(auto_answer: bool) -> InviteInfo {
        InviteInfo {
            cseq: 1,
            source_addr: addr(5060),
            auto_answer,
            codec: Some(G711Variant::Pcmu),
            local_rtp_port: 40000,
            session_expires: None,
        }
    }

    #[test]
    fn invite_moves_idle_to_proceeding_and_sends_trying() {
        let mut session = Session::new(SessionConfig::default());
        let actions = session.on_event(Event::Invite(invite(false)), Instant::now());
        assert_eq!(session.state, SessionState::Proceeding);
        assert!(actions.contains(&Action::SendTrying));
    }

    #[test]
    fn invite_with_no_common_codec_is_refused_and_terminated() {
        let mut session = Session::new(SessionConfig::default());
        let mut info = invite(false);
        info.codec = None;
        let actions = session.on_event(Event::Invite(info), Instant::now());
        assert_eq!(session.state, SessionState::Terminated);
        assert!(actions.contains(&Action::SendNotAcceptable));
    }

    #[test]
    fn auto_answer_mode_uses_the_short_answer_delay() {
        let mut session = Session::new(SessionConfig::default());
        let actions = session.on_event(Event::Invite(invite(true)), Instant::now());
        let armed = actions.iter().find(|a| matches!(a, Action::ArmTimer { name, .. } if name == ANSWER_TIMER_NAME));
        assert_eq!(armed, Some(&Action::ArmTimer { name: ANSWER_TIMER_NAME.to_string(), delay: Duration::from_millis(100) }));
    }

    #[test]
    fn full_happy_path_reaches_ai_active() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::RingingTimerFired, now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        assert_eq!(session.state, SessionState::Confirmed);
        let actions = session.on_event(Event::RtpPacketArrived, now);
        assert_eq!(session.state, SessionState::MediaReady);
        assert!(actions.contains(&Action::OpenAiSession));
        let actions = session.on_event(Event::AiSessionUpdated, now);
        assert_eq!(session.state, SessionState::AiActive);
        assert!(matches!(actions[0], Action::SendAiWelcome { .. }));
    }

    #[test]
    fn media_validation_timer_proceeds_optimistically_without_rtp() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        let actions = session.on_event(Event::MediaValidationTimerFired, now);
        assert_eq!(session.state, SessionState::MediaReady);
        assert!(actions.contains(&Action::OpenAiSession));
    }

    #[test]
    fn require_rtp_before_ai_blocks_the_timer_path() {
        let mut config = SessionConfig::default();
        config.require_rtp_before_ai = true;
        let mut session = Session::new(config);
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        let actions = session.on_event(Event::MediaValidationTimerFired, now);
        assert_eq!(session.state, SessionState::Confirmed);
        assert!(actions.is_empty());
    }

    #[test]
    fn bye_from_caller_address_tears_down_immediately() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        let actions = session.on_event(Event::Bye { source_addr: addr(5060), reason: None }, now);
        assert_eq!(session.state, SessionState::Terminated);
        assert!(actions.contains(&Action::SendBye200));
        assert!(actions.contains(&Action::Teardown));
    }

    #[test]
    fn bye_during_welcome_message_is_ignored() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        session.on_event(Event::RtpPacketArrived, now);
        session.on_event(Event::AiSessionUpdated, now);
        assert!(session.welcome_message_active);

        let spoofed = addr(9999);
        let actions = session.on_event(Event::Bye { source_addr: spoofed, reason: None }, now);
        assert_eq!(actions, vec![Action::IgnoreBye]);
        assert_eq!(session.state, SessionState::AiActive);
    }

    #[test]
    fn bye_while_ai_response_in_progress_is_deferred_then_completes_on_response_done() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        session.on_event(Event::RtpPacketArrived, now);
        session.on_event(Event::AiSessionUpdated, now);
        session.on_event(Event::AiResponseDone, now); // clears welcome_message_active
        session.mark_ai_response_in_progress();

        let spoofed = addr(9999);
        let actions = session.on_event(Event::Bye { source_addr: spoofed, reason: None }, now);
        assert_eq!(actions, vec![Action::DeferBye]);
        assert_eq!(session.state, SessionState::AiActive);

        let actions = session.on_event(Event::AiResponseDone, now);
        assert_eq!(session.state, SessionState::Terminated);
        assert!(actions.contains(&Action::Teardown));
    }

    #[test]
    fn bye_with_reason_hangup_header_is_accepted_from_any_source() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        let spoofed = addr(9999);
        let actions = session.on_event(
            Event::Bye { source_addr: spoofed, reason: Some("Q.850;cause=16;text=\"Normal call clearing\"".to_string()) },
            now,
        );
        assert!(actions.contains(&Action::SendBye200));
        assert_eq!(session.state, SessionState::Terminated);
    }

    #[test]
    fn strict_bye_handling_rejects_unverified_bye_outright() {
        let mut config = SessionConfig::default();
        config.strict_bye_handling = true;
        let mut session = Session::new(config);
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        let spoofed = addr(9999);
        let actions = session.on_event(Event::Bye { source_addr: spoofed, reason: None }, now);
        assert_eq!(actions, vec![Action::IgnoreBye]);
        assert_eq!(session.state, SessionState::Confirmed);
    }

    #[test]
    fn cancel_sends_200_and_487_and_terminates() {
        let mut session = Session::new(SessionConfig::default());
        session.on_event(Event::Invite(invite(false)), Instant::now());
        let actions = session.on_event(Event::Cancel, Instant::now());
        assert_eq!(session.state, SessionState::Terminated);
        assert!(actions.contains(&Action::SendCancel200));
        assert!(actions.contains(&Action::Send487ToInvite));
    }

    #[test]
    fn local_hangup_sends_bye_and_tears_down_from_ai_active() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);
        session.on_event(Event::RtpPacketArrived, now);
        session.on_event(Event::AiSessionUpdated, now);
        assert_eq!(session.state, SessionState::AiActive);

        let actions = session.on_event(Event::LocalHangup, now);
        assert_eq!(session.state, SessionState::Terminated);
        assert!(actions.contains(&Action::SendBye));
        assert!(actions.contains(&Action::Teardown));
        assert!(actions.contains(&Action::EmitSessionRemoved));
    }

    #[test]
    fn local_hangup_before_a_dialog_exists_is_a_no_op() {
        let mut session = Session::new(SessionConfig::default());
        let actions = session.on_event(Event::LocalHangup, Instant::now());
        assert!(actions.is_empty());
        assert_eq!(session.state, SessionState::Idle);
    }

    #[test]
    fn session_refresh_timer_sends_a_reinvite_and_reschedules_at_expires_minus_30() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        let mut info = invite(false);
        info.session_expires = Some(1800);
        session.on_event(Event::Invite(info), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);

        let actions = session.on_event(Event::SessionRefreshTimerFired, now);
        assert!(actions.contains(&Action::SendSessionRefresh));
        assert!(actions.contains(&Action::ScheduleSessionRefresh { delay: Duration::from_secs(1770) }));
    }

    #[test]
    fn session_refresh_timer_is_a_no_op_without_a_negotiated_session_expires() {
        let mut session = Session::new(SessionConfig::default());
        let now = Instant::now();
        session.on_event(Event::Invite(invite(false)), now);
        session.on_event(Event::AnswerTimerFired, now);
        session.on_event(Event::Ack, now);

        let actions = session.on_event(Event::SessionRefreshTimerFired, now);
        assert!(actions.is_empty());
    }

    #[test]
    fn outbound_rtp_counts_as_audio_activity_for_the_bye_staleness_fallback() {
        let mut config = SessionConfig::default();
        config.bye_grace_period = Duration::from_secs(120);
        let mut session = Session::new(config);
        let start = Instant::now();
        session.on_event(Event::Invite(invite(false)), start);
        session.on_event(Event::AnswerTimerFired, start);
        session.on_event(Event::Ack, start);
        session.on_event(Event::RtpPacketArrived, start);
        session.on_event(Event::AiSessionUpdated, start);
        session.on_event(Event::AiResponseDone, start);

        // The caller has been silent the whole time, but the AI has kept
        // sending audio up until just before the BYE arrives.
        let later = start + Duration::from_secs(40);
        session.on_event(Event::RtpPacketSent, later);

        let spoofed = addr(9999);
        let actions = session.on_event(Event::Bye { source_addr: spoofed, reason: None }, later);
        assert_eq!(actions, vec![Action::IgnoreBye]);
        assert_eq!(session.state, SessionState::AiActive);
    }

    #[test]
    fn retransmitted_invite_with_non_advancing_cseq_resends_provisional() {
        let mut session = Session::new(SessionConfig::default());
        session.on_event(Event::Invite(invite(false)), Instant::now());
        let actions = session.on_event(Event::RetransmittedInvite { cseq: 1 }, Instant::now());
        assert_eq!(actions, vec![Action::ResendLastProvisional]);
    }
}
