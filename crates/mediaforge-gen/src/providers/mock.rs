//! Mock provider for testing
//!
//! Generates placeholder PNGs (images) and silent WAVs (speech) without any
//! network calls. Start failures and job progress can be scripted, and every
//! `start`/`status` call is counted.

use crate::context::RequestContext;
use crate::provider::*;
use image::{ImageFormat, RgbaImage};
use mediaforge_core::{ForgeError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const DEFAULT_SIZE: u32 = 64;
const SAMPLE_RATE: u32 = 16_000;

/// Call counters shared between a mock and the test observing it
#[derive(Debug, Default)]
pub struct MockCalls {
    starts: AtomicU32,
    statuses: AtomicU32,
    abandoned: AtomicU32,
}

impl MockCalls {
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn statuses(&self) -> u32 {
        self.statuses.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> u32 {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// How a mock job progresses once started
#[derive(Debug, Clone)]
pub enum JobScript {
    /// `Ready` on the n-th status call, `Pending` before it
    ReadyAfter(u32),
    AlwaysPending,
    Reject(String),
}

/// A scriptable provider that produces placeholder media locally
pub struct MockProvider {
    descriptor: ProviderDescriptor,
    capability: Capability,
    /// Number of leading `start` calls that fail; `u32::MAX` fails forever
    start_failures: u32,
    script: JobScript,
    calls: Arc<MockCalls>,
    jobs: Mutex<HashMap<String, MockJob>>,
    next_job: AtomicU32,
}

struct MockJob {
    polls: u32,
    request: GenerateRequest,
}

impl MockProvider {
    fn new(name: &str, capability: Capability) -> Self {
        Self {
            descriptor: ProviderDescriptor::new(
                name,
                vec![MediaCategory::Image, MediaCategory::Speech],
                &[],
            ),
            capability,
            start_failures: 0,
            script: JobScript::ReadyAfter(1),
            calls: Arc::new(MockCalls::default()),
            jobs: Mutex::new(HashMap::new()),
            next_job: AtomicU32::new(0),
        }
    }

    /// Answers inline
    pub fn synchronous(name: &str) -> Self {
        Self::new(name, Capability::Synchronous)
    }

    /// Answers with a job, ready on the first poll unless scripted otherwise
    pub fn asynchronous(name: &str) -> Self {
        Self::new(name, Capability::Asynchronous)
    }

    pub fn failing_starts(mut self, count: u32) -> Self {
        self.start_failures = count;
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing_starts(u32::MAX)
    }

    pub fn ready_after_polls(mut self, polls: u32) -> Self {
        self.script = JobScript::ReadyAfter(polls.max(1));
        self
    }

    pub fn always_pending(mut self) -> Self {
        self.script = JobScript::AlwaysPending;
        self
    }

    pub fn rejecting(mut self, reason: &str) -> Self {
        self.script = JobScript::Reject(reason.to_string());
        self
    }

    pub fn with_media(mut self, media: Vec<MediaCategory>) -> Self {
        self.descriptor.media = media;
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.descriptor.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Arc<MockCalls> {
        Arc::clone(&self.calls)
    }

    pub fn into_provider(self) -> Provider {
        match self.capability {
            Capability::Synchronous => Provider::Synchronous(Box::new(self)),
            Capability::Asynchronous => Provider::Asynchronous(Box::new(self)),
        }
    }

    /// Count a start call and fail it if the script says so
    fn begin(&self) -> Result<()> {
        let n = self.calls.starts.fetch_add(1, Ordering::SeqCst);
        if n < self.start_failures {
            return Err(ForgeError::TransientNetwork(format!(
                "{}: simulated outage (start #{})",
                self.descriptor.name,
                n + 1
            )));
        }
        Ok(())
    }

    fn render(&self, request: &GenerateRequest) -> Result<GenerationResult> {
        let bytes = match request.media {
            MediaCategory::Image => solid_png(
                &request.prompt,
                request.width.unwrap_or(DEFAULT_SIZE),
                request.height.unwrap_or(DEFAULT_SIZE),
            )?,
            MediaCategory::Speech => silence_wav(&request.prompt),
        };
        Ok(GenerationResult::blob(&self.descriptor.name, bytes))
    }
}

impl SyncProvider for MockProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn start(
        &self,
        request: &GenerateRequest,
        _ctx: &RequestContext,
        _opts: &GenerateOptions,
    ) -> Result<GenerationResult> {
        self.begin()?;
        self.render(request)
    }
}

impl JobProvider for MockProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn start(
        &self,
        request: &GenerateRequest,
        _ctx: &RequestContext,
        _opts: &GenerateOptions,
    ) -> Result<StartOutcome> {
        self.begin()?;
        let id = format!(
            "{}-job-{}",
            self.descriptor.name,
            self.next_job.fetch_add(1, Ordering::SeqCst)
        );
        self.jobs.lock().insert(
            id.clone(),
            MockJob {
                polls: 0,
                request: request.clone(),
            },
        );
        Ok(StartOutcome::Job(JobId::new(id)))
    }

    fn status(&self, job: &JobId) -> Result<JobStatus> {
        self.calls.statuses.fetch_add(1, Ordering::SeqCst);

        let mut jobs = self.jobs.lock();
        let polls = {
            let entry = jobs.get_mut(job.as_str()).ok_or_else(|| ForgeError::InvalidResponse {
                provider: self.descriptor.name.clone(),
                detail: format!("unknown job {}", job),
            })?;
            entry.polls += 1;
            entry.polls
        };

        match &self.script {
            JobScript::ReadyAfter(n) if polls >= *n => {
                let finished = jobs.remove(job.as_str());
                match finished {
                    Some(finished) => Ok(JobStatus::Ready(self.render(&finished.request)?)),
                    None => Ok(JobStatus::Pending),
                }
            }
            JobScript::ReadyAfter(_) | JobScript::AlwaysPending => Ok(JobStatus::Pending),
            JobScript::Reject(reason) => {
                jobs.remove(job.as_str());
                Ok(JobStatus::Failed {
                    reason: reason.clone(),
                })
            }
        }
    }

    fn abandon(&self, job: &JobId) {
        self.calls.abandoned.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().remove(job.as_str());
    }
}

impl MockProvider {
    /// Jobs started but neither finished nor abandoned
    pub fn open_jobs(&self) -> usize {
        self.jobs.lock().len()
    }
}

/// Encode a solid-colour PNG whose colour is derived from the seed text
fn solid_png(seed: &str, width: u32, height: u32) -> Result<Vec<u8>> {
    let hash_val = seed
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let pixel = [
        ((hash_val >> 16) & 0xFF) as u8,
        ((hash_val >> 8) & 0xFF) as u8,
        (hash_val & 0xFF) as u8,
        255,
    ];

    let img = RgbaImage::from_pixel(width.max(1), height.max(1), image::Rgba(pixel));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).map_err(|e| ForgeError::InvalidResponse {
        provider: "mock".to_string(),
        detail: format!("failed to encode PNG: {}", e),
    })?;
    Ok(buf.into_inner())
}

/// Encode a mono 16-bit PCM WAV of silence, roughly as long as reading `text`
fn silence_wav(text: &str) -> Vec<u8> {
    let words = text.split_whitespace().count().max(1) as u32;
    // ~3 words per second, at least half a second
    let num_samples = (SAMPLE_RATE * words / 3).max(SAMPLE_RATE / 2);
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let block_align = num_channels * (bits_per_sample / 8);
    let byte_rate = SAMPLE_RATE * block_align as u32;
    let data_size = num_samples * block_align as u32;

    let mut out = Vec::with_capacity(44 + data_size as usize);
    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&num_channels.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    out.resize(44 + data_size as usize, 0);
    out
}
