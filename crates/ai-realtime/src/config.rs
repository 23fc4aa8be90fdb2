//! Session configuration sent via `session.update` on connect (§4.5).

#[derive(Debug, Clone)]
pub struct AudioFormat(pub &'static str);

impl AudioFormat {
    /// `g711_ulaw` avoids transcoding against the SIP leg.
    pub const G711_ULAW: AudioFormat = AudioFormat("g711_ulaw");
    /// Used when the far end negotiated wideband audio.
    pub const PCM16: AudioFormat = AudioFormat("pcm16");
}

#[derive(Debug, Clone)]
pub struct TurnDetectionConfig {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            prefix_padding_ms: 200,
            silence_duration_ms: 400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl FunctionTool {
    pub fn transfer_call() -> Self {
        Self {
            name: "transfer_call".to_string(),
            description: "Transfer the active call to another extension".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "extension": { "type": "string" } },
                "required": ["extension"],
            }),
        }
    }

    pub fn end_call() -> Self {
        Self {
            name: "end_call".to_string(),
            description: "End the active call".to_string(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiSessionConfig {
    pub url: String,
    pub api_key: String,
    pub voice: String,
    pub instructions: String,
    pub audio_format: AudioFormat,
    pub turn_detection: TurnDetectionConfig,
    pub tools: Vec<FunctionTool>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for AiSessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            voice: "alloy".to_string(),
            instructions: String::new(),
            audio_format: AudioFormat::G711_ULAW,
            turn_detection: TurnDetectionConfig::default(),
            tools: vec![FunctionTool::transfer_call(), FunctionTool::end_call()],
            temperature: 0.8,
            max_output_tokens: 4096,
        }
    }
}
