use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use matchcast::analytics::{AnalyticsEngine, ServerPrediction};
use matchcast::record::{Prob3, ResultEntry, Winner};

/// A replayable case: the predictions the model made and the results that
/// later arrived. Runs against a throwaway in-memory engine so a backtest
/// never pollutes live analytics.
#[derive(Debug, serde::Deserialize)]
struct BacktestCase {
    predictions: Vec<CasePrediction>,
    results: Vec<ResultEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct CasePrediction {
    home: String,
    away: String,
    predicted: Winner,
    confidence: f64,
    #[serde(default)]
    probs: Option<Prob3>,
    #[serde(default)]
    home_position: Option<u32>,
    #[serde(default)]
    away_position: Option<u32>,
    #[serde(default)]
    method: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tests/fixtures/backtest_case.json"));

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("read backtest case {}", path.display()))?;
    let case: BacktestCase = serde_json::from_str(&raw).context("parse backtest case")?;

    let engine = AnalyticsEngine::in_memory()?;
    for p in &case.predictions {
        engine.record_prediction(&ServerPrediction {
            home_team: p.home.clone(),
            away_team: p.away.clone(),
            predicted: p.predicted,
            confidence: p.confidence,
            probs: p.probs,
            home_position: p.home_position,
            away_position: p.away_position,
            method: p.method.clone().unwrap_or_else(|| "backtest".to_string()),
        })?;
    }

    let summary = engine.import_results(&case.results)?;
    engine.update_calibration()?;
    let dashboard = engine.dashboard()?;

    println!("Backtest: {}", path.display());
    println!(
        "Results: {} imported, {} failed",
        summary.imported, summary.failed
    );
    println!(
        "Predictions: {} total, {} settled, {} correct",
        dashboard.total, dashboard.completed, dashboard.correct
    );
    println!(
        "Accuracy: {:.1}% (recent {:.1}%)  avg confidence {:.1}%",
        dashboard.accuracy, dashboard.recent_accuracy, dashboard.avg_confidence
    );
    println!(
        "Calibration: {:+.1}  health: {:?}  trend: {:?}",
        dashboard.overall_calibration, dashboard.health, dashboard.trend
    );

    println!("Buckets:");
    for b in engine.confidence_buckets()? {
        println!(
            "  {}: {}/{} = {:.1}% (error {:+.1})",
            b.bucket, b.correct, b.total, b.accuracy, b.calibration_error
        );
    }

    let insights = engine.insight_report()?;
    if insights.is_empty() {
        println!("Insights: none");
    } else {
        println!("Insights:");
        for line in insights {
            println!("  - {line}");
        }
    }

    Ok(())
}
