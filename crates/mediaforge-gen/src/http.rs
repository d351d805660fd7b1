//! Blocking HTTP helpers shared by the network adapters
//!
//! Transport-level failures (timeouts, resets, 429/5xx) are retried inside a
//! single provider attempt with exponential backoff. Anything still failing
//! surfaces as a `ForgeError` for the orchestrator's retry and fallback logic.

use mediaforge_core::{ForgeError, Result};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::CancelToken;
use crate::retry::{ExponentialBackoffRetry, RetryPolicy};

pub const REQUEST_TIMEOUT_SECS: u64 = 60;
pub const MAX_ATTEMPTS: u32 = 3;

type Response = ureq::http::Response<ureq::Body>;

pub fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    config.into()
}

pub fn is_retryable_error(e: &ureq::Error) -> bool {
    match e {
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => true,
        ureq::Error::StatusCode(code) => matches!(code, 429 | 500 | 502 | 503 | 504),
        _ => false,
    }
}

/// Translate a transport error into the crate's error vocabulary
pub fn map_error(provider: &str, what: &str, e: ureq::Error) -> ForgeError {
    match e {
        ureq::Error::StatusCode(code @ (401 | 403)) => ForgeError::ProviderRejected {
            provider: provider.to_string(),
            reason: format!("{} refused credential (HTTP {})", what, code),
        },
        ureq::Error::StatusCode(code) if matches!(code, 429 | 500 | 502 | 503 | 504) => {
            ForgeError::TransientNetwork(format!("{} {}: HTTP {}", provider, what, code))
        }
        ureq::Error::StatusCode(code) => ForgeError::ProviderRejected {
            provider: provider.to_string(),
            reason: format!("{}: HTTP {}", what, code),
        },
        ureq::Error::BadUri(uri) => {
            ForgeError::Configuration(format!("{}: invalid endpoint '{}'", provider, uri))
        }
        other => ForgeError::TransientNetwork(format!("{} {}: {}", provider, what, other)),
    }
}

/// A provider-scoped blocking client
pub struct HttpClient {
    provider: String,
    agent: ureq::Agent,
    backoff: ExponentialBackoffRetry,
    max_attempts: u32,
}

impl HttpClient {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            agent: build_agent(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
            backoff: ExponentialBackoffRetry::default(),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoffRetry, max_attempts: u32) -> Self {
        self.backoff = backoff;
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        payload: &serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value> {
        let mut response = self.send("submit", cancel, |agent| {
            let mut req = agent.post(url);
            for (k, v) in headers {
                req = req.header(*k, *v);
            }
            req.header("Content-Type", "application/json").send_json(payload)
        })?;
        self.read_json(&mut response)
    }

    pub fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        cancel: &CancelToken,
    ) -> Result<serde_json::Value> {
        let mut response = self.send("status", cancel, |agent| {
            let mut req = agent.get(url);
            for (k, v) in headers {
                req = req.header(*k, *v);
            }
            req.call()
        })?;
        self.read_json(&mut response)
    }

    /// POST a JSON payload and return the raw response body
    pub fn post_json_for_bytes(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        payload: &serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        let response = self.send("submit", cancel, |agent| {
            let mut req = agent.post(url);
            for (k, v) in headers {
                req = req.header(*k, *v);
            }
            req.header("Content-Type", "application/json").send_json(payload)
        })?;
        self.read_bytes(response)
    }

    fn send<F>(&self, what: &str, cancel: &CancelToken, mut call: F) -> Result<Response>
    where
        F: FnMut(&ureq::Agent) -> std::result::Result<Response, ureq::Error>,
    {
        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            match call(&self.agent) {
                Ok(response) => {
                    debug!(provider = %self.provider, what, status = %response.status(), "http ok");
                    return Ok(response);
                }
                Err(e) => {
                    if attempt + 1 < self.max_attempts && is_retryable_error(&e) {
                        let delay = self.backoff.delay(attempt);
                        warn!(
                            provider = %self.provider,
                            what,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "transient http failure, backing off"
                        );
                        cancel.wait(delay)?;
                        attempt += 1;
                        continue;
                    }
                    return Err(map_error(&self.provider, what, e));
                }
            }
        }
    }

    fn read_json(&self, response: &mut Response) -> Result<serde_json::Value> {
        response
            .body_mut()
            .read_json::<serde_json::Value>()
            .map_err(|e| ForgeError::InvalidResponse {
                provider: self.provider.clone(),
                detail: format!("failed to parse JSON body: {}", e),
            })
    }

    fn read_bytes(&self, response: Response) -> Result<Vec<u8>> {
        let mut reader = response.into_body().into_reader();
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| ForgeError::TransientNetwork(format!("{}: failed to read body: {}", self.provider, e)))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_codes() {
        for code in [429u16, 500, 502, 503, 504] {
            assert!(is_retryable_error(&ureq::Error::StatusCode(code)), "{}", code);
        }
        for code in [400u16, 401, 403, 404, 422] {
            assert!(!is_retryable_error(&ureq::Error::StatusCode(code)), "{}", code);
        }
        assert!(is_retryable_error(&ureq::Error::ConnectionFailed));
        assert!(is_retryable_error(&ureq::Error::HostNotFound));
    }

    #[test]
    fn test_map_error_classification() {
        assert!(matches!(
            map_error("flux", "submit", ureq::Error::StatusCode(503)),
            ForgeError::TransientNetwork(_)
        ));
        match map_error("openai", "submit", ureq::Error::StatusCode(401)) {
            ForgeError::ProviderRejected { provider, reason } => {
                assert_eq!(provider, "openai");
                assert!(reason.contains("401"));
            }
            other => panic!("expected ProviderRejected, got {:?}", other),
        }
        assert!(matches!(
            map_error("flux", "submit", ureq::Error::StatusCode(422)),
            ForgeError::ProviderRejected { .. }
        ));
        assert!(matches!(
            map_error("flux", "status", ureq::Error::ConnectionFailed),
            ForgeError::TransientNetwork(_)
        ));
    }

    #[test]
    fn test_cancelled_token_skips_request() {
        let client = HttpClient::new("flux");
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut calls = 0;
        let result = client.send("submit", &cancel, |_| {
            calls += 1;
            Err(ureq::Error::ConnectionFailed)
        });
        assert!(matches!(result, Err(ForgeError::Cancelled(_))));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_transient_failure_is_retried_up_to_ceiling() {
        let client = HttpClient::new("flux")
            .with_backoff(ExponentialBackoffRetry::new(Duration::from_millis(1)), 3);
        let mut calls = 0;
        let result = client.send("submit", &CancelToken::new(), |_| {
            calls += 1;
            Err(ureq::Error::StatusCode(502))
        });
        assert!(matches!(result, Err(ForgeError::TransientNetwork(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let client = HttpClient::new("openai")
            .with_backoff(ExponentialBackoffRetry::new(Duration::from_millis(1)), 3);
        let mut calls = 0;
        let result = client.send("submit", &CancelToken::new(), |_| {
            calls += 1;
            Err(ureq::Error::StatusCode(400))
        });
        assert!(matches!(result, Err(ForgeError::ProviderRejected { .. })));
        assert_eq!(calls, 1);
    }
}
