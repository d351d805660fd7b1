//! ElevenLabs speech generation provider
//!
//! Converts text to speech via the ElevenLabs text-to-speech API.
//! Speech synthesis is fast (~1-5s), so `start()` answers inline with the
//! audio bytes.

use crate::config::ForgeConfig;
use crate::context::RequestContext;
use crate::credential::CredentialPool;
use crate::http::HttpClient;
use crate::provider::*;
use mediaforge_core::{ForgeError, Result};

const NAME: &str = "elevenlabs";
const DEFAULT_ELEVENLABS_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
/// "Rachel", one of the premade voices available on every account
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
const MODELS: &[&str] = &["eleven_multilingual_v2", "eleven_turbo_v2_5", "eleven_flash_v2_5"];

/// ElevenLabs provider for text-to-speech
pub struct ElevenLabsProvider {
    descriptor: ProviderDescriptor,
    credentials: CredentialPool,
    api_url: String,
    default_model: String,
    http: HttpClient,
}

impl ElevenLabsProvider {
    /// Create a new ElevenLabsProvider from config
    pub fn from_config(config: &ForgeConfig) -> Result<Self> {
        let credentials = config.credential_pool(NAME);
        if credentials.is_empty() {
            return Err(ForgeError::Configuration(
                "ElevenLabs API key not configured. Set MEDIAFORGE_ELEVENLABS_API_KEY or add to .mediaforge/config.toml"
                    .to_string(),
            ));
        }

        let api_url = config
            .api_url(NAME)
            .unwrap_or(DEFAULT_ELEVENLABS_URL)
            .trim_end_matches('/')
            .to_string();
        let default_model = config.default_model(NAME).unwrap_or(DEFAULT_MODEL).to_string();

        Ok(Self {
            descriptor: ProviderDescriptor::new(NAME, vec![MediaCategory::Speech], MODELS),
            credentials,
            api_url,
            default_model,
            http: HttpClient::new(NAME),
        })
    }

    fn speech_url(&self, voice: &str) -> String {
        format!("{}/v1/text-to-speech/{}", self.api_url, voice)
    }
}

impl SyncProvider for ElevenLabsProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn start(
        &self,
        request: &GenerateRequest,
        ctx: &RequestContext,
        opts: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let voice = ctx.voice.as_deref().unwrap_or(DEFAULT_VOICE_ID);
        let model = ctx.model.as_deref().unwrap_or(&self.default_model);
        let key = self.credentials.get_next()?;

        let mut payload = serde_json::json!({
            "text": request.prompt,
            "model_id": model
        });
        opts.merge_into(&mut payload);

        let bytes = self.http.post_json_for_bytes(
            &self.speech_url(voice),
            &[("xi-api-key", key.as_str()), ("Accept", "audio/mpeg")],
            &payload,
            &ctx.cancel,
        )?;
        check_audio(bytes)
    }
}

/// Audio bodies never start with `{`; a JSON body means the API reported an error
fn check_audio(bytes: Vec<u8>) -> Result<GenerationResult> {
    if bytes.is_empty() {
        return Err(ForgeError::InvalidResponse {
            provider: NAME.to_string(),
            detail: "empty audio body".to_string(),
        });
    }
    if bytes.first() == Some(&b'{') {
        let body = String::from_utf8_lossy(&bytes);
        let message = parse_elevenlabs_error(&body)?;
        return Err(ForgeError::InvalidResponse {
            provider: NAME.to_string(),
            detail: message,
        });
    }
    Ok(GenerationResult::blob(NAME, bytes))
}

/// Extract the message from an ElevenLabs error body
pub fn parse_elevenlabs_error(json: &str) -> Result<String> {
    let response: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ForgeError::InvalidResponse {
            provider: NAME.to_string(),
            detail: format!("Invalid JSON: {}", e),
        })?;

    let message = response
        .get("detail")
        .and_then(|d| d.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| response.get("detail").and_then(|d| d.as_str()))
        .unwrap_or("Unknown error")
        .to_string();

    Ok(message)
}
