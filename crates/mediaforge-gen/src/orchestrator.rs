//! Top-level generation entry point
//!
//! Select mode runs one named provider; fallback mode walks the registry in
//! priority order and stops at the first success. Every provider attempt is
//! wrapped in the retry executor, and job providers are polled to
//! completion inside each attempt. Providers are never tried in parallel.

use mediaforge_core::{AggregateFailure, ForgeError, Result};
use tracing::{debug, debug_span, info, info_span, warn};

use crate::context::{Mode, RequestContext};
use crate::poller::JobPoller;
use crate::provider::{GenerateOptions, GenerateRequest, GenerationResult, Provider, StartOutcome};
use crate::registry::ProviderRegistry;
use crate::retry::RetryExecutor;

pub struct Orchestrator {
    registry: ProviderRegistry,
    executor: RetryExecutor,
    default_provider: Option<String>,
}

impl Orchestrator {
    /// Orchestrator over an active registry, retrying without delay
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            executor: RetryExecutor::default(),
            default_provider: None,
        }
    }

    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Provider used in select mode when the context names none
    pub fn with_default_provider(mut self, name: Option<String>) -> Self {
        self.default_provider = name;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Generate media according to `ctx.mode`
    pub fn generate(
        &self,
        request: &GenerateRequest,
        ctx: &mut RequestContext,
        opts: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let span = info_span!("generate", trace_id = %ctx.trace_id, mode = %ctx.mode, media = %request.media);
        let _enter = span.enter();

        let result = match ctx.mode {
            Mode::Select => self.generate_select(request, ctx, opts),
            Mode::Fallback => self.generate_fallback(request, ctx, opts),
        };

        match &result {
            Ok(r) => info!(provider = %r.provider, kind = ?r.kind, digest = %r.digest(), "generation succeeded"),
            Err(e) => warn!(error = %e, "generation failed"),
        }
        result
    }

    fn generate_select(
        &self,
        request: &GenerateRequest,
        ctx: &mut RequestContext,
        opts: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let name = ctx
            .provider_name
            .clone()
            .or_else(|| self.default_provider.clone())
            .ok_or_else(|| ForgeError::NotFound("no provider named for select mode".to_string()))?;

        let provider = self
            .registry
            .get(&name)
            .ok_or_else(|| ForgeError::NotFound(name.clone()))?;

        check_eligible(provider, request, ctx)?;
        self.attempt_with_retries(provider, request, ctx, opts)
    }

    fn generate_fallback(
        &self,
        request: &GenerateRequest,
        ctx: &mut RequestContext,
        opts: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let mut failures = AggregateFailure::new();

        for provider in self.registry.iter() {
            if let Err(reason) = check_eligible(provider, request, ctx) {
                debug!(provider = %provider.name(), reason = %reason, "skipping ineligible provider");
                continue;
            }

            match self.attempt_with_retries(provider, request, ctx, opts) {
                Ok(result) => return Ok(result),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(provider = %provider.name(), error = %e, "provider exhausted, falling back");
                    failures.push(provider.name(), e);
                }
            }
        }

        Err(ForgeError::Aggregate(failures))
    }

    fn attempt_with_retries(
        &self,
        provider: &Provider,
        request: &GenerateRequest,
        ctx: &mut RequestContext,
        opts: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let retries = ctx.max_retries;
        self.executor
            .execute(ctx, retries, |ctx| run_attempt(provider, request, ctx, opts))
    }
}

/// One full attempt against one provider: start, then poll if it returned a job
pub fn run_attempt(
    provider: &Provider,
    request: &GenerateRequest,
    ctx: &RequestContext,
    opts: &GenerateOptions,
) -> Result<GenerationResult> {
    let span = debug_span!("attempt", provider = %provider.name(), attempt = ctx.attempt);
    let _enter = span.enter();

    match provider {
        Provider::Synchronous(p) => p.start(request, ctx, opts),
        Provider::Asynchronous(p) => match p.start(request, ctx, opts)? {
            StartOutcome::Ready(result) => Ok(result),
            StartOutcome::Job(job) => {
                debug!(job = %job, "job submitted, polling");
                let outcome = JobPoller::from_context(provider.name(), ctx)
                    .poll(&job, &ctx.cancel, |id| p.status(id));
                if let Err(e) = &outcome {
                    debug!(job = %job, error = %e, "abandoning job");
                    p.abandon(&job);
                }
                outcome
            }
        },
    }
}

/// Whether the provider can serve this request's media and model
fn check_eligible(provider: &Provider, request: &GenerateRequest, ctx: &RequestContext) -> Result<()> {
    let descriptor = provider.descriptor();
    if !descriptor.supports(request.media) {
        return Err(ForgeError::UnsupportedMedia {
            provider: descriptor.name.clone(),
            media: request.media.to_string(),
        });
    }
    if let Some(model) = ctx.model.as_deref() {
        if !descriptor.accepts_model(model) {
            return Err(ForgeError::UnsupportedModel {
                provider: descriptor.name.clone(),
                model: model.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MediaCategory;
    use crate::providers::mock::MockProvider;

    fn fast(ctx: RequestContext) -> RequestContext {
        ctx.with_poll_interval_ms(1)
    }

    #[test]
    fn test_select_unknown_provider() {
        let orch = Orchestrator::new(ProviderRegistry::new().with(MockProvider::synchronous("a").into_provider()));
        let mut ctx = RequestContext::select("missing");
        let result = orch.generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default());
        assert!(matches!(result, Err(ForgeError::NotFound(ref n)) if n == "missing"));
    }

    #[test]
    fn test_select_uses_default_provider() {
        let mock = MockProvider::synchronous("fallback-default");
        let calls = mock.calls();
        let orch = Orchestrator::new(ProviderRegistry::new().with(mock.into_provider()))
            .with_default_provider(Some("fallback-default".to_string()));

        let mut ctx = RequestContext::new(Mode::Select);
        let result = orch
            .generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default())
            .unwrap();
        assert_eq!(result.provider, "fallback-default");
        assert_eq!(calls.starts(), 1);
    }

    #[test]
    fn test_select_without_name_or_default() {
        let orch = Orchestrator::new(ProviderRegistry::new());
        let mut ctx = RequestContext::new(Mode::Select);
        let result = orch.generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default());
        assert!(matches!(result, Err(ForgeError::NotFound(_))));
    }

    #[test]
    fn test_select_has_no_fallback() {
        let a = MockProvider::synchronous("a").always_failing();
        let b = MockProvider::synchronous("b");
        let (a_calls, b_calls) = (a.calls(), b.calls());
        let orch = Orchestrator::new(
            ProviderRegistry::new().with(a.into_provider()).with(b.into_provider()),
        );

        let mut ctx = RequestContext::select("a").with_retries(2);
        let result = orch.generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default());
        assert!(matches!(result, Err(ForgeError::TransientNetwork(_))));
        assert_eq!(a_calls.starts(), 3);
        assert_eq!(b_calls.starts(), 0);
    }

    #[test]
    fn test_select_rejects_unsupported_media() {
        let image_only = MockProvider::synchronous("img").with_media(vec![MediaCategory::Image]);
        let calls = image_only.calls();
        let orch = Orchestrator::new(ProviderRegistry::new().with(image_only.into_provider()));

        let mut ctx = RequestContext::select("img");
        let result = orch.generate(&GenerateRequest::speech("hi"), &mut ctx, &GenerateOptions::default());
        assert!(matches!(result, Err(ForgeError::UnsupportedMedia { .. })));
        assert_eq!(calls.starts(), 0);
    }

    #[test]
    fn test_fallback_skips_providers_without_the_model() {
        let a = MockProvider::synchronous("a").with_models(&["dall-e-3"]);
        let b = MockProvider::synchronous("b").with_models(&["flux/dev"]);
        let a_calls = a.calls();
        let orch = Orchestrator::new(
            ProviderRegistry::new().with(a.into_provider()).with(b.into_provider()),
        );

        let mut ctx = RequestContext::fallback().with_model("flux/dev");
        let result = orch
            .generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default())
            .unwrap();
        assert_eq!(result.provider, "b");
        assert_eq!(a_calls.starts(), 0);
    }

    #[test]
    fn test_fallback_with_empty_registry() {
        let orch = Orchestrator::new(ProviderRegistry::new());
        let mut ctx = RequestContext::fallback();
        match orch.generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default()) {
            Err(ForgeError::Aggregate(agg)) => assert!(agg.is_empty()),
            other => panic!("expected Aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_stops_on_cancel() {
        let a = MockProvider::asynchronous("a").always_pending();
        let b = MockProvider::synchronous("b");
        let b_calls = b.calls();
        let orch = Orchestrator::new(
            ProviderRegistry::new().with(a.into_provider()).with(b.into_provider()),
        );

        let mut ctx = RequestContext::fallback()
            .with_poll_interval_ms(5)
            .with_max_poll_iterations(10_000)
            .with_deadline(std::time::Duration::from_millis(50));
        let result = orch.generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default());
        assert!(matches!(result, Err(ForgeError::Cancelled(_))));
        assert_eq!(b_calls.starts(), 0);
    }

    #[test]
    fn test_rejected_job_is_retried_from_start() {
        let a = MockProvider::asynchronous("a").rejecting("policy");
        let calls = a.calls();
        let orch = Orchestrator::new(ProviderRegistry::new().with(a.into_provider()));

        let mut ctx = fast(RequestContext::select("a").with_retries(1));
        let result = orch.generate(&GenerateRequest::image("x"), &mut ctx, &GenerateOptions::default());
        assert!(matches!(result, Err(ForgeError::ProviderRejected { .. })));
        assert_eq!(calls.starts(), 2);
        assert_eq!(calls.statuses(), 2);
    }
}
