//! Flux image generation provider (fal.ai queue API)
//!
//! Submitting returns a queue request id; the job is then polled on its
//! status endpoint and, once `COMPLETED`, the image URL is read from the
//! result endpoint. Each job keeps the credential slot it was submitted with.

use crate::config::ForgeConfig;
use crate::context::{CancelToken, RequestContext};
use crate::credential::CredentialPool;
use crate::http::HttpClient;
use crate::provider::*;
use mediaforge_core::{ForgeError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const NAME: &str = "flux";
const DEFAULT_QUEUE_URL: &str = "https://queue.fal.run";
const DEFAULT_MODEL: &str = "fal-ai/flux/dev";
const DEFAULT_SIZE: u32 = 1024;
const MODELS: &[&str] = &["fal-ai/flux/dev", "fal-ai/flux/schnell", "fal-ai/flux-pro"];

/// Queue state reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Queued,
    InProgress,
    Completed,
    Failed(String),
}

/// What the submit endpoint answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Queued {
        request_id: String,
        status_url: Option<String>,
        response_url: Option<String>,
    },
    Inline(String),
}

#[derive(Debug, Clone)]
struct PendingJob {
    slot: usize,
    status_url: String,
    response_url: String,
    cancel: CancelToken,
}

type JobTable = Arc<Mutex<HashMap<String, PendingJob>>>;

/// Flux provider for AI image generation via fal.ai
pub struct FluxProvider {
    descriptor: ProviderDescriptor,
    credentials: CredentialPool,
    queue_url: String,
    default_model: String,
    http: HttpClient,
    jobs: JobTable,
}

impl FluxProvider {
    /// Create a new FluxProvider from config
    pub fn from_config(config: &ForgeConfig) -> Result<Self> {
        let credentials = config.credential_pool(NAME);
        if credentials.is_empty() {
            return Err(ForgeError::Configuration(
                "Flux API key not configured. Set MEDIAFORGE_FLUX_API_KEY or add to .mediaforge/config.toml"
                    .to_string(),
            ));
        }

        let queue_url = config
            .api_url(NAME)
            .unwrap_or(DEFAULT_QUEUE_URL)
            .trim_end_matches('/')
            .to_string();
        let default_model = config.default_model(NAME).unwrap_or(DEFAULT_MODEL).to_string();

        Ok(Self {
            descriptor: ProviderDescriptor::new(NAME, vec![MediaCategory::Image], MODELS),
            credentials,
            queue_url,
            default_model,
            http: HttpClient::new(NAME),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn submit_url(&self, model: &str) -> String {
        format!("{}/{}", self.queue_url, model)
    }

    fn build_payload(request: &GenerateRequest, opts: &GenerateOptions) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "prompt": request.prompt,
            "image_size": {
                "width": request.width.unwrap_or(DEFAULT_SIZE),
                "height": request.height.unwrap_or(DEFAULT_SIZE)
            },
            "num_images": 1,
            "enable_safety_checker": true
        });

        if let Some(s) = request.seed {
            payload["seed"] = serde_json::json!(s);
        }
        opts.merge_into(&mut payload);
        payload
    }

    fn pending(&self, job: &JobId) -> Result<PendingJob> {
        self.jobs
            .lock()
            .get(job.as_str())
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(format!("flux job '{}'", job)))
    }

    fn forget(&self, job: &JobId) {
        self.jobs.lock().remove(job.as_str());
    }

    #[cfg(test)]
    fn job_table(&self) -> JobTable {
        Arc::clone(&self.jobs)
    }
}

impl JobProvider for FluxProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn start(
        &self,
        request: &GenerateRequest,
        ctx: &RequestContext,
        opts: &GenerateOptions,
    ) -> Result<StartOutcome> {
        let model = ctx.model.as_deref().unwrap_or(&self.default_model);
        let (slot, key) = self.credentials.next_slot()?;
        let auth = format!("Key {}", key);
        let url = self.submit_url(model);
        let payload = Self::build_payload(request, opts);

        let response = self
            .http
            .post_json(&url, &[("Authorization", auth.as_str())], &payload, &ctx.cancel)?;

        match classify_submission(&response)? {
            Submission::Inline(image_url) => Ok(StartOutcome::Ready(GenerationResult::url(NAME, image_url))),
            Submission::Queued {
                request_id,
                status_url,
                response_url,
            } => {
                let base = format!("{}/requests/{}", url, request_id);
                let pending = PendingJob {
                    slot,
                    status_url: status_url.unwrap_or_else(|| format!("{}/status", base)),
                    response_url: response_url.unwrap_or(base),
                    cancel: ctx.cancel.clone(),
                };
                debug!(job = %request_id, slot, "flux job queued");
                self.jobs.lock().insert(request_id.clone(), pending);
                Ok(StartOutcome::Job(JobId::new(request_id)))
            }
        }
    }

    fn status(&self, job: &JobId) -> Result<JobStatus> {
        let pending = self.pending(job)?;
        let key = self.credentials.slot(pending.slot)?;
        let auth = format!("Key {}", key);
        let headers = [("Authorization", auth.as_str())];

        let status = self.http.get_json(&pending.status_url, &headers, &pending.cancel)?;
        match parse_queue_state(&status)? {
            QueueState::Queued | QueueState::InProgress => Ok(JobStatus::Pending),
            QueueState::Failed(reason) => {
                self.forget(job);
                Ok(JobStatus::Failed { reason })
            }
            QueueState::Completed => {
                let result = self.http.get_json(&pending.response_url, &headers, &pending.cancel)?;
                self.forget(job);
                match extract_image_url(&result) {
                    Some(url) => Ok(JobStatus::Ready(GenerationResult::url(NAME, url))),
                    None => Ok(JobStatus::Failed {
                        reason: error_detail(&result)
                            .unwrap_or_else(|| "completed without an image".to_string()),
                    }),
                }
            }
        }
    }

    fn abandon(&self, job: &JobId) {
        if self.jobs.lock().remove(job.as_str()).is_some() {
            debug!(job = %job, "flux job abandoned");
        }
    }
}

fn extract_image_url(response: &serde_json::Value) -> Option<String> {
    response
        .get("images")
        .and_then(|imgs| imgs.as_array())
        .and_then(|arr| arr.first())
        .and_then(|img| img.get("url"))
        .and_then(|u| u.as_str())
        .map(|s| s.to_string())
}

fn error_detail(response: &serde_json::Value) -> Option<String> {
    let detail = response.get("error").or_else(|| response.get("detail"))?;
    match detail {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items
            .first()
            .and_then(|i| i.get("msg"))
            .and_then(|m| m.as_str())
            .map(|s| s.to_string()),
        other => Some(other.to_string()),
    }
}

fn classify_submission(response: &serde_json::Value) -> Result<Submission> {
    if let Some(url) = extract_image_url(response) {
        return Ok(Submission::Inline(url));
    }
    let request_id = response
        .get("request_id")
        .and_then(|r| r.as_str())
        .ok_or_else(|| ForgeError::InvalidResponse {
            provider: NAME.to_string(),
            detail: "No request_id in submit response".to_string(),
        })?;
    let field = |k: &str| response.get(k).and_then(|v| v.as_str()).map(|s| s.to_string());

    Ok(Submission::Queued {
        request_id: request_id.to_string(),
        status_url: field("status_url"),
        response_url: field("response_url"),
    })
}

fn parse_queue_state(response: &serde_json::Value) -> Result<QueueState> {
    let status = response
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| ForgeError::InvalidResponse {
            provider: NAME.to_string(),
            detail: "No status in queue response".to_string(),
        })?;

    Ok(match status {
        "IN_QUEUE" => QueueState::Queued,
        "IN_PROGRESS" => QueueState::InProgress,
        "COMPLETED" => match error_detail(response) {
            Some(reason) => QueueState::Failed(reason),
            None => QueueState::Completed,
        },
        other => QueueState::Failed(error_detail(response).unwrap_or_else(|| other.to_string())),
    })
}

fn parse_json(json: &str) -> Result<serde_json::Value> {
    serde_json::from_str(json).map_err(|e| ForgeError::InvalidResponse {
        provider: NAME.to_string(),
        detail: format!("Invalid JSON: {}", e),
    })
}

/// Parse a Flux result payload into its first image URL
pub fn parse_flux_response(json: &str) -> Result<String> {
    extract_image_url(&parse_json(json)?).ok_or_else(|| ForgeError::InvalidResponse {
        provider: NAME.to_string(),
        detail: "No image URL in response".to_string(),
    })
}

/// Parse a fal.ai submit response
pub fn parse_flux_submit(json: &str) -> Result<Submission> {
    classify_submission(&parse_json(json)?)
}

/// Parse a fal.ai status response
pub fn parse_flux_status(json: &str) -> Result<QueueState> {
    parse_queue_state(&parse_json(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Orchestrator;
    use crate::registry::ProviderRegistry;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};

    fn config_with_keys(keys: &str) -> ForgeConfig {
        ForgeConfig::from_toml(&format!("[providers.flux]\napi_key = \"{}\"\n", keys)).unwrap()
    }

    /// (method, path, authorization) for each request the queue saw
    type RequestLog = Arc<Mutex<Vec<(String, String, String)>>>;

    /// A local queue that numbers submissions `job-1`, `job-2`, ... and
    /// reports every job as `IN_QUEUE`
    fn pending_queue() -> (String, RequestLog) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);

        std::thread::spawn(move || {
            let mut submitted = 0u32;
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let Some((method, path, auth)) = read_request(&mut stream) else {
                    continue;
                };
                let body = if method == "POST" {
                    submitted += 1;
                    format!(r#"{{"request_id":"job-{}"}}"#, submitted)
                } else {
                    r#"{"status":"IN_QUEUE","queue_position":1}"#.to_string()
                };
                seen.lock().push((method, path, auth));
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });

        (url, log)
    }

    fn read_request(stream: &mut TcpStream) -> Option<(String, String, String)> {
        let mut reader = BufReader::new(stream.try_clone().ok()?);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).ok()?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();

        let mut auth = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).ok()?;
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "authorization" => auth = value.trim().to_string(),
                    "content-length" => content_length = value.trim().parse().unwrap_or(0),
                    _ => {}
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).ok()?;
        Some((method, path, auth))
    }

    fn queue_config(url: &str, keys: &str) -> ForgeConfig {
        ForgeConfig::from_toml(&format!(
            "[providers.flux]\napi_key = \"{}\"\napi_url = \"{}\"\n",
            keys, url
        ))
        .unwrap()
    }

    fn submit(provider: &FluxProvider) -> JobId {
        match provider
            .start(&GenerateRequest::image("x"), &RequestContext::fallback(), &GenerateOptions::default())
            .unwrap()
        {
            StartOutcome::Job(job) => job,
            StartOutcome::Ready(_) => panic!("expected a queued job"),
        }
    }

    #[test]
    fn test_parse_flux_response() {
        let json = r#"{
            "images": [
                {
                    "url": "https://example.com/generated.png",
                    "width": 1024,
                    "height": 1024,
                    "content_type": "image/jpeg"
                }
            ],
            "seed": 42,
            "has_nsfw_concepts": [false],
            "prompt": "a brick wall"
        }"#;

        let url = parse_flux_response(json).unwrap();
        assert_eq!(url, "https://example.com/generated.png");
    }

    #[test]
    fn test_parse_flux_response_invalid() {
        let json = r#"{"error": "something went wrong"}"#;
        assert!(matches!(
            parse_flux_response(json),
            Err(ForgeError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_parse_flux_submit_queued() {
        let json = r#"{
            "request_id": "764cabcf-b745-4b3e-ae38-1200304cf45b",
            "response_url": "https://queue.fal.run/fal-ai/flux/requests/764cabcf-b745-4b3e-ae38-1200304cf45b",
            "status_url": "https://queue.fal.run/fal-ai/flux/requests/764cabcf-b745-4b3e-ae38-1200304cf45b/status",
            "cancel_url": "https://queue.fal.run/fal-ai/flux/requests/764cabcf-b745-4b3e-ae38-1200304cf45b/cancel"
        }"#;

        match parse_flux_submit(json).unwrap() {
            Submission::Queued {
                request_id,
                status_url,
                response_url,
            } => {
                assert_eq!(request_id, "764cabcf-b745-4b3e-ae38-1200304cf45b");
                assert!(status_url.unwrap().ends_with("/status"));
                assert!(response_url.is_some());
            }
            other => panic!("expected queued submission, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_flux_submit_inline() {
        let json = r#"{"images":[{"url":"https://fal.media/files/x.png"}],"seed":7}"#;
        assert_eq!(
            parse_flux_submit(json).unwrap(),
            Submission::Inline("https://fal.media/files/x.png".to_string())
        );
    }

    #[test]
    fn test_parse_flux_submit_missing_id() {
        assert!(parse_flux_submit(r#"{"detail":"Unauthorized"}"#).is_err());
    }

    #[test]
    fn test_parse_flux_status_states() {
        assert_eq!(
            parse_flux_status(r#"{"status":"IN_QUEUE","queue_position":3}"#).unwrap(),
            QueueState::Queued
        );
        assert_eq!(
            parse_flux_status(r#"{"status":"IN_PROGRESS","logs":[]}"#).unwrap(),
            QueueState::InProgress
        );
        assert_eq!(
            parse_flux_status(r#"{"status":"COMPLETED"}"#).unwrap(),
            QueueState::Completed
        );
        assert_eq!(
            parse_flux_status(r#"{"status":"COMPLETED","error":"NSFW content detected"}"#).unwrap(),
            QueueState::Failed("NSFW content detected".to_string())
        );
        assert_eq!(
            parse_flux_status(r#"{"status":"CANCELLED"}"#).unwrap(),
            QueueState::Failed("CANCELLED".to_string())
        );
    }

    #[test]
    fn test_from_config_requires_key() {
        let result = FluxProvider::from_config(&ForgeConfig::default());
        assert!(matches!(result, Err(ForgeError::Configuration(_))));
    }

    #[test]
    fn test_descriptor_and_urls() {
        let provider = FluxProvider::from_config(&config_with_keys("k1,k2")).unwrap();
        let d = JobProvider::descriptor(&provider);
        assert!(d.supports(MediaCategory::Image));
        assert!(!d.supports(MediaCategory::Speech));
        assert!(d.accepts_model("fal-ai/flux/schnell"));
        assert!(!d.accepts_model("dall-e-3"));
        assert_eq!(
            provider.submit_url("fal-ai/flux/dev"),
            "https://queue.fal.run/fal-ai/flux/dev"
        );
    }

    #[test]
    fn test_status_of_unknown_job() {
        let provider = FluxProvider::from_config(&config_with_keys("k1")).unwrap();
        let result = provider.status(&JobId::new("never-submitted"));
        assert!(matches!(result, Err(ForgeError::NotFound(_))));
    }

    #[test]
    fn test_status_uses_the_submitting_credential() {
        let (url, log) = pending_queue();
        let provider = FluxProvider::from_config(&queue_config(&url, "k1,k2")).unwrap();

        let first = submit(&provider);
        let second = submit(&provider);
        assert_eq!(first.as_str(), "job-1");
        assert_eq!(second.as_str(), "job-2");

        assert!(matches!(provider.status(&second).unwrap(), JobStatus::Pending));
        assert!(matches!(provider.status(&first).unwrap(), JobStatus::Pending));
        assert!(matches!(provider.status(&second).unwrap(), JobStatus::Pending));

        let log = log.lock();
        let auth_for = |job: &str| -> Vec<&str> {
            log.iter()
                .filter(|(method, path, _)| method == "GET" && path.contains(job))
                .map(|(_, _, auth)| auth.as_str())
                .collect()
        };
        assert_eq!(auth_for("/requests/job-1/"), vec!["Key k1"]);
        assert_eq!(auth_for("/requests/job-2/"), vec!["Key k2", "Key k2"]);
    }

    #[test]
    fn test_timed_out_jobs_are_released() {
        let (url, log) = pending_queue();
        let provider = FluxProvider::from_config(&queue_config(&url, "k1")).unwrap();
        let jobs = provider.job_table();
        let orch = Orchestrator::new(
            ProviderRegistry::new().with(Provider::Asynchronous(Box::new(provider))),
        );

        let mut ctx = RequestContext::select("flux")
            .with_retries(3)
            .with_poll_interval_ms(1)
            .with_max_poll_iterations(2);
        let result = orch.generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default());

        assert!(matches!(result, Err(ForgeError::Timeout { .. })));
        let submits = log.lock().iter().filter(|(method, _, _)| method == "POST").count();
        assert_eq!(submits, 4);
        assert!(jobs.lock().is_empty());
    }

    #[test]
    fn test_abandon_unknown_job_is_noop() {
        let provider = FluxProvider::from_config(&config_with_keys("k1")).unwrap();
        provider.abandon(&JobId::new("never-submitted"));
        assert!(provider.job_table().lock().is_empty());
    }

    #[test]
    fn test_payload_merges_options() {
        let request = GenerateRequest::image("a lighthouse").with_size(512, 768).with_seed(9);
        let opts = GenerateOptions::default().with("guidance_scale", 4.5);
        let payload = FluxProvider::build_payload(&request, &opts);
        assert_eq!(payload["prompt"], "a lighthouse");
        assert_eq!(payload["image_size"]["width"], 512);
        assert_eq!(payload["image_size"]["height"], 768);
        assert_eq!(payload["seed"], 9);
        assert_eq!(payload["guidance_scale"], 4.5);
    }
}
