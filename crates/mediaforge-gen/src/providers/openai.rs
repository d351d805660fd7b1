//! OpenAI-compatible image generation provider
//!
//! The images endpoint answers inline, so this is a synchronous provider.
//! Results come back as `b64_json` or as a hosted `url` depending on the
//! model and requested response format.

use crate::config::ForgeConfig;
use crate::context::RequestContext;
use crate::credential::CredentialPool;
use crate::http::HttpClient;
use crate::provider::*;
use mediaforge_core::{ForgeError, Result};

const NAME: &str = "openai";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/images/generations";
const DEFAULT_MODEL: &str = "dall-e-3";
const DEFAULT_SIZE: u32 = 1024;
const MODELS: &[&str] = &["dall-e-3", "dall-e-2", "gpt-image-1"];

/// OpenAI provider for image generation
pub struct OpenAiProvider {
    descriptor: ProviderDescriptor,
    credentials: CredentialPool,
    api_url: String,
    default_model: String,
    http: HttpClient,
}

impl OpenAiProvider {
    /// Create a new OpenAiProvider from config
    pub fn from_config(config: &ForgeConfig) -> Result<Self> {
        let credentials = config.credential_pool(NAME);
        if credentials.is_empty() {
            return Err(ForgeError::Configuration(
                "OpenAI API key not configured. Set MEDIAFORGE_OPENAI_API_KEY or add to .mediaforge/config.toml"
                    .to_string(),
            ));
        }

        let api_url = config.api_url(NAME).unwrap_or(DEFAULT_OPENAI_URL).to_string();
        let default_model = config.default_model(NAME).unwrap_or(DEFAULT_MODEL).to_string();

        Ok(Self {
            descriptor: ProviderDescriptor::new(NAME, vec![MediaCategory::Image], MODELS),
            credentials,
            api_url,
            default_model,
            http: HttpClient::new(NAME),
        })
    }

    fn build_payload(model: &str, request: &GenerateRequest, opts: &GenerateOptions) -> serde_json::Value {
        let size = format!(
            "{}x{}",
            request.width.unwrap_or(DEFAULT_SIZE),
            request.height.unwrap_or(DEFAULT_SIZE)
        );
        let mut payload = serde_json::json!({
            "model": model,
            "prompt": request.prompt,
            "n": 1,
            "size": size
        });

        // gpt-image models always return base64 and reject response_format
        if model.starts_with("dall-e") {
            payload["response_format"] = serde_json::json!("b64_json");
        }
        opts.merge_into(&mut payload);
        payload
    }
}

impl SyncProvider for OpenAiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn start(
        &self,
        request: &GenerateRequest,
        ctx: &RequestContext,
        opts: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let model = ctx.model.as_deref().unwrap_or(&self.default_model);
        let key = self.credentials.get_next()?;
        let auth = format!("Bearer {}", key);
        let payload = Self::build_payload(model, request, opts);

        let response = self.http.post_json(
            &self.api_url,
            &[("Authorization", auth.as_str())],
            &payload,
            &ctx.cancel,
        )?;
        extract_image(&response)
    }
}

fn extract_image(response: &serde_json::Value) -> Result<GenerationResult> {
    let first = response
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first());

    if let Some(b64) = first.and_then(|i| i.get("b64_json")).and_then(|b| b.as_str()) {
        return Ok(GenerationResult::base64(NAME, b64));
    }
    if let Some(url) = first.and_then(|i| i.get("url")).and_then(|u| u.as_str()) {
        return Ok(GenerationResult::url(NAME, url));
    }

    let detail = response
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("No image in response");
    Err(ForgeError::InvalidResponse {
        provider: NAME.to_string(),
        detail: detail.to_string(),
    })
}

/// Parse an images endpoint response
pub fn parse_openai_response(json: &str) -> Result<GenerationResult> {
    let response: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ForgeError::InvalidResponse {
            provider: NAME.to_string(),
            detail: format!("Invalid JSON: {}", e),
        })?;
    extract_image(&response)
}
