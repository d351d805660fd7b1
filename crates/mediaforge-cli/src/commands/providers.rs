//! `mediaforge providers`

use anyhow::Result;
use mediaforge_gen::providers::build_registry;
use mediaforge_gen::ForgeConfig;

pub fn run(config: &ForgeConfig, format: &str) -> Result<()> {
    let registry = build_registry(config);

    match format {
        "json" => {
            let active: Vec<serde_json::Value> = registry
                .iter()
                .map(|p| {
                    let d = p.descriptor();
                    serde_json::json!({
                        "name": d.name,
                        "capability": p.capability().to_string(),
                        "media": d.media.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
                        "models": d.models,
                    })
                })
                .collect();
            let excluded: Vec<serde_json::Value> = registry
                .excluded()
                .iter()
                .map(|e| serde_json::json!({ "name": e.name, "reason": e.reason }))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "active": active,
                    "excluded": excluded,
                }))?
            );
        }
        "text" => {
            println!("{} active provider(s), in fallback order:\n", registry.len());
            for (i, p) in registry.iter().enumerate() {
                let d = p.descriptor();
                let media: Vec<String> = d.media.iter().map(|m| m.to_string()).collect();
                println!("  {}. {:<12} {:<13} {}", i + 1, d.name, p.capability().to_string(), media.join(", "));
                if !d.models.is_empty() {
                    println!("     models: {}", d.models.join(", "));
                }
            }
            if !registry.excluded().is_empty() {
                println!("\nUnavailable:");
                for e in registry.excluded() {
                    println!("  {:<12} {}", e.name, e.reason);
                }
            }
            if let Some(default) = config.generation.default_provider.as_deref() {
                println!("\nDefault provider: {}", default);
            }
        }
        other => anyhow::bail!("Unknown format '{}'. Use: text, json", other),
    }

    Ok(())
}
