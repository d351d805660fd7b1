//! Per-call configuration, trace data and cancellation

use mediaforge_core::{ForgeError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_MAX_POLL_ITERATIONS: u32 = 20;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Orchestration strategy for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Exactly one named provider, no fallback
    Select,
    /// Registered providers in priority order until one succeeds
    Fallback,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Select => write!(f, "select"),
            Mode::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Cancellation signal shared between a caller and an in-flight call.
///
/// Clones observe the same flag. An optional deadline makes the token
/// behave as cancelled once it passes.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Same flag, with a deadline added (or tightened)
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            state: Arc::clone(&self.state),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.lock();
        *cancelled = true;
        self.state.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// Fail with `Cancelled` if the token was cancelled or its deadline passed
    pub fn check(&self) -> Result<()> {
        if *self.state.cancelled.lock() {
            return Err(ForgeError::Cancelled("cancelled by caller".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ForgeError::Cancelled("deadline exceeded".to_string()));
            }
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation or deadline
    pub fn wait(&self, duration: Duration) -> Result<()> {
        self.check()?;

        let mut until = Instant::now() + duration;
        if let Some(deadline) = self.deadline {
            until = until.min(deadline);
        }

        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            if self.state.signal.wait_until(&mut cancelled, until).timed_out() {
                break;
            }
        }
        drop(cancelled);

        self.check()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &*self.state.cancelled.lock())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Configuration and trace data threaded through one `generate` call
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub mode: Mode,
    /// Provider to use in select mode
    pub provider_name: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub trace_id: String,
    /// Zero-based attempt counter of the provider currently being tried
    pub attempt: u32,
    /// Additional attempts allowed per provider after the first
    pub max_retries: u32,
    pub poll_interval_ms: u64,
    /// Ceiling on status polls per attempt
    pub max_poll_iterations: u32,
    pub cancel: CancelToken,
}

impl RequestContext {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            provider_name: None,
            model: None,
            voice: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
            attempt: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_iterations: DEFAULT_MAX_POLL_ITERATIONS,
            cancel: CancelToken::new(),
        }
    }

    /// Select mode targeting one provider
    pub fn select(provider: impl Into<String>) -> Self {
        let mut ctx = Self::new(Mode::Select);
        ctx.provider_name = Some(provider.into());
        ctx
    }

    pub fn fallback() -> Self {
        Self::new(Mode::Fallback)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_poll_iterations(mut self, iterations: u32) -> Self {
        self.max_poll_iterations = iterations;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Abandon the call once `timeout` has elapsed from now
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.cancel = self.cancel.with_deadline(Instant::now() + timeout);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
