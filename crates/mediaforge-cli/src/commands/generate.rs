//! `mediaforge generate`

use anyhow::{Context, Result};
use clap::Args;
use mediaforge_gen::providers::build_registry;
use mediaforge_gen::{
    ForgeConfig, GenerateOptions, GenerateRequest, GenerationResult, MediaCategory, MediaKind,
    Mode, Orchestrator,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Args)]
pub struct GenerateArgs {
    /// What to generate: image or speech
    pub media: MediaCategory,

    /// Image prompt, or the text to speak
    #[arg(long, short)]
    pub prompt: String,

    /// Provider to use (flux, openai, elevenlabs, mock)
    #[arg(long, conflicts_with = "fallback")]
    pub provider: Option<String>,

    /// Try every configured provider in priority order
    #[arg(long)]
    pub fallback: bool,

    /// Model name understood by the provider
    #[arg(long)]
    pub model: Option<String>,

    /// Voice id (speech only)
    #[arg(long)]
    pub voice: Option<String>,

    /// Extra attempts per provider after the first
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between job status checks
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Status checks before a job times out
    #[arg(long)]
    pub max_polls: Option<u32>,

    /// Give up after this many seconds overall
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Image width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Image height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,

    /// Provider-specific parameter as key=value (repeatable, value parsed as JSON when possible)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, serde_json::Value)>,

    /// Output file for image or audio bytes
    #[arg(long, short)]
    pub output: Option<String>,
}

fn parse_param(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", s));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn run(args: GenerateArgs, config: &ForgeConfig) -> Result<()> {
    let mode = if args.fallback { Mode::Fallback } else { Mode::Select };

    let mut ctx = config.request_context(mode);
    if let Some(p) = args.provider {
        ctx.provider_name = Some(p);
    }
    if let Some(m) = args.model {
        ctx = ctx.with_model(m);
    }
    if let Some(v) = args.voice {
        ctx = ctx.with_voice(v);
    }
    if let Some(r) = args.retries {
        ctx = ctx.with_retries(r);
    }
    if let Some(ms) = args.poll_interval_ms {
        ctx = ctx.with_poll_interval_ms(ms);
    }
    if let Some(n) = args.max_polls {
        ctx = ctx.with_max_poll_iterations(n);
    }
    if let Some(secs) = args.deadline_secs {
        ctx = ctx.with_deadline(Duration::from_secs(secs));
    }

    let mut request = match args.media {
        MediaCategory::Image => GenerateRequest::image(&args.prompt),
        MediaCategory::Speech => GenerateRequest::speech(&args.prompt),
    };
    request.width = args.width;
    request.height = args.height;
    request.seed = args.seed;

    let opts = args
        .params
        .into_iter()
        .fold(GenerateOptions::default(), |o, (k, v)| o.with(&k, v));

    let registry = build_registry(config);
    if registry.is_empty() {
        anyhow::bail!("No providers available. Run `mediaforge providers` to see why.");
    }
    let orchestrator = Orchestrator::new(registry)
        .with_executor(config.retry_executor())
        .with_default_provider(config.generation.default_provider.clone());

    match (&mode, ctx.provider_name.as_deref()) {
        (Mode::Select, Some(name)) => println!("Generating {} via {}...", request.media, name),
        _ => println!(
            "Generating {} with fallback across {}...",
            request.media,
            orchestrator.registry().names().join(", ")
        ),
    }

    let start = Instant::now();
    let result = orchestrator.generate(&request, &mut ctx, &opts)?;
    println!("  Provider: {}", result.provider);
    println!("  Trace: {}", ctx.trace_id);

    emit(&result, request.media, args.output)?;
    println!("  Done in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn emit(result: &GenerationResult, media: MediaCategory, output: Option<String>) -> Result<()> {
    if let Some(url) = result.as_url() {
        println!("  URL: {}", url);
        if output.is_some() {
            eprintln!("  Note: provider returned a URL, nothing written to --output");
        }
        return Ok(());
    }

    let bytes = result
        .bytes()?
        .context("result carried no inline media")?;
    let path = match output {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(format!(
            "{}-{}.{}",
            media,
            &result.digest().to_hex()[..12],
            sniff_extension(&bytes, media)
        )),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;

    let encoding = match result.kind {
        MediaKind::Base64 => " (decoded from base64)",
        _ => "",
    };
    println!("  Wrote: {} ({} bytes{})", path.display(), bytes.len(), encoding);
    println!("  Hash: {}", result.digest().to_prefixed_hex());
    Ok(())
}

/// File extension matching the payload's magic bytes
fn sniff_extension(bytes: &[u8], media: MediaCategory) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(&b"WEBP"[..]) {
        "webp"
    } else if bytes.starts_with(b"RIFF") {
        "wav"
    } else if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) {
        "mp3"
    } else {
        match media {
            MediaCategory::Image => "img",
            MediaCategory::Speech => "audio",
        }
    }
}
