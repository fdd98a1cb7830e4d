use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use matchcast::analytics::AnalyticsEngine;
use matchcast::seed;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let count = std::env::var("SEED_RESULTS")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(seed::DEFAULT_SEED_RESULTS)
        .clamp(1, 500);

    let engine = AnalyticsEngine::open_default()?;
    let report = seed::run(&engine, count)?;

    println!("Seed backfill complete");
    println!("Generated: {}", report.generated);
    println!("Accuracy: {:.1}%", report.accuracy);
    let factors = engine.get_calibration_factors();
    println!("Calibration factors ({} buckets):", factors.factors.len());
    for (bucket, correction) in &factors.factors {
        println!("  {bucket}: {correction:+.1}");
    }
    if report.insights.is_empty() {
        println!("Insights: none yet");
    } else {
        println!("Insights:");
        for line in &report.insights {
            println!("  - {line}");
        }
    }

    Ok(())
}
