//! Configuration surface (§6): environment variables, optionally
//! overridden by a TOML file, optionally overridden again by CLI flags.
//! Precedence is CLI > file > env > defaults, the same layering
//! `rvoip-sip-client`'s `Cli::load_config` applies.

use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::BridgeError;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub sip_server: String,
    pub sip_authorization_user: String,
    pub sip_password: String,
    pub sip_client_port: u16,
    pub rtp_port: Option<u16>,
    pub public_ip: IpAddr,
    pub ai_realtime_url: String,
    pub ai_api_key: String,
    pub ai_voice: String,
    pub ai_instructions: String,
    pub max_concurrent_calls: usize,
    pub skip_sip_registration: bool,
    pub session_expires_seconds: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sip_server: String::new(),
            sip_authorization_user: String::new(),
            sip_password: String::new(),
            sip_client_port: 5060,
            rtp_port: None,
            public_ip: IpAddr::from([0, 0, 0, 0]),
            ai_realtime_url: String::new(),
            ai_api_key: String::new(),
            ai_voice: "alloy".to_string(),
            ai_instructions: String::new(),
            max_concurrent_calls: 10,
            skip_sip_registration: false,
            session_expires_seconds: 1800,
        }
    }
}

impl BridgeConfig {
    pub fn session_expires(&self) -> Duration {
        Duration::from_secs(self.session_expires_seconds as u64)
    }

    fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("SIP_SERVER") {
            config.sip_server = v;
        }
        if let Ok(v) = std::env::var("SIP_AUTHORIZATION_USER") {
            config.sip_authorization_user = v;
        }
        if let Ok(v) = std::env::var("SIP_PASSWORD") {
            config.sip_password = v;
        }
        if let Ok(v) = std::env::var("SIP_CLIENT_PORT").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            config.sip_client_port = v;
        }
        if let Ok(v) = std::env::var("RTP_PORT").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            config.rtp_port = Some(v);
        }
        if let Ok(v) = std::env::var("PUBLIC_IP").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            config.public_ip = v;
        }
        if let Ok(v) = std::env::var("AI_REALTIME_URL") {
            config.ai_realtime_url = v;
        }
        if let Ok(v) = std::env::var("AI_API_KEY") {
            config.ai_api_key = v;
        }
        if let Ok(v) = std::env::var("AI_VOICE") {
            config.ai_voice = v;
        }
        if let Ok(v) = std::env::var("AI_INSTRUCTIONS") {
            config.ai_instructions = v;
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_CALLS").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            config.max_concurrent_calls = v;
        }
        if let Ok(v) = std::env::var("SKIP_SIP_REGISTRATION") {
            config.skip_sip_registration = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Ok(v) = std::env::var("SESSION_EXPIRES_SECONDS").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            config.session_expires_seconds = v;
        }
        config
    }

    fn merge_file(mut self, path: &str) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path).map_err(|source| BridgeError::ConfigFileRead {
            path: path.to_string(),
            source,
        })?;
        let file_config: PartialConfig = toml::from_str(&text).map_err(|source| BridgeError::ConfigFileParse {
            path: path.to_string(),
            source,
        })?;
        file_config.apply_to(&mut self);
        Ok(self)
    }

    /// Build the effective configuration: defaults, then env, then an
    /// optional file, then CLI overrides.
    pub fn load(file_path: Option<&str>, overrides: CliOverrides) -> Result<Self, BridgeError> {
        let mut config = Self::from_env();
        if let Some(path) = file_path {
            config = config.merge_file(path)?;
        }
        overrides.apply_to(&mut config);
        config.validate()
    }

    fn validate(self) -> Result<Self, BridgeError> {
        if self.sip_server.is_empty() && !self.skip_sip_registration {
            return Err(BridgeError::MissingRequiredConfig("SIP_SERVER"));
        }
        if self.ai_realtime_url.is_empty() {
            return Err(BridgeError::MissingRequiredConfig("AI_REALTIME_URL"));
        }
        Ok(self)
    }
}

/// Only the fields a TOML config file is allowed to set; unset fields leave
/// the env-derived value untouched.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    sip_server: Option<String>,
    sip_authorization_user: Option<String>,
    sip_password: Option<String>,
    sip_client_port: Option<u16>,
    rtp_port: Option<u16>,
    public_ip: Option<IpAddr>,
    ai_realtime_url: Option<String>,
    ai_api_key: Option<String>,
    ai_voice: Option<String>,
    ai_instructions: Option<String>,
    max_concurrent_calls: Option<usize>,
    skip_sip_registration: Option<bool>,
    session_expires_seconds: Option<u32>,
}

impl PartialConfig {
    fn apply_to(self, config: &mut BridgeConfig) {
        macro_rules! apply {
            ($field:ident) => {
                if let Some(value) = self.$field {
                    config.$field = value;
                }
            };
        }
        apply!(sip_server);
        apply!(sip_authorization_user);
        apply!(sip_password);
        apply!(sip_client_port);
        apply!(rtp_port);
        apply!(public_ip);
        apply!(ai_realtime_url);
        apply!(ai_api_key);
        apply!(ai_voice);
        apply!(ai_instructions);
        apply!(max_concurrent_calls);
        apply!(skip_sip_registration);
        apply!(session_expires_seconds);
    }
}

/// CLI-supplied overrides, the final and highest-precedence layer.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub sip_client_port: Option<u16>,
    pub skip_sip_registration: Option<bool>,
}

impl CliOverrides {
    fn apply_to(self, config: &mut BridgeConfig) {
        if let Some(port) = self.sip_client_port {
            config.sip_client_port = port;
        }
        if let Some(skip) = self.skip_sip_registration {
            config.skip_sip_registration = skip;
        }
    }
}
