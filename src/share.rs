use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::record::PredictionRecord;

/// One delivery target in the share fallback chain. Platform share sheets and
/// real clipboards live in the embedder; the crate ships file and buffer
/// sinks.
pub trait ShareSink {
    fn name(&self) -> &'static str;
    fn deliver(&mut self, text: &str) -> anyhow::Result<()>;
}

/// Fixed-format text summary: prediction, expected score, market
/// recommendations, best bets, insight, and the outcome once resolved.
pub fn render_share_text(record: &PredictionRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", record.match_label);
    let _ = writeln!(
        out,
        "Prediction: {} ({:.0}% confidence)",
        record.winner.label(),
        record.confidence
    );
    if let Some(market) = record.market.as_ref() {
        let _ = writeln!(
            out,
            "Expected score: {:.1} - {:.1}",
            market.expected_home_goals, market.expected_away_goals
        );
        let _ = writeln!(out, "Over/Under: {}", market.over_under);
        let _ = writeln!(out, "BTTS: {}", market.both_teams_to_score);
        if !market.best_bets.is_empty() {
            let _ = writeln!(out, "Best bets: {}", market.best_bets.join(", "));
        }
    }
    if !record.summary.is_empty() {
        let _ = writeln!(out, "Insight: {}", record.summary);
    }
    if let Some(outcome) = record.outcome.as_ref() {
        let _ = writeln!(
            out,
            "Result: {} {}-{} ({})",
            outcome.actual_winner.label(),
            outcome.actual_home_goals,
            outcome.actual_away_goals,
            if outcome.was_correct { "hit" } else { "miss" }
        );
    }
    out
}

/// Walks the sink chain in order and stops at the first success. Every sink
/// failure is swallowed into the boolean; nothing here ever propagates.
pub fn share_record(record: &PredictionRecord, sinks: &mut [Box<dyn ShareSink>]) -> bool {
    let text = render_share_text(record);
    for sink in sinks.iter_mut() {
        match sink.deliver(&text) {
            Ok(()) => return true,
            Err(err) => {
                warn!(sink = sink.name(), %err, "share sink failed, falling back");
            }
        }
    }
    false
}

/// Manual-selection fallback: drops the text in a file the user can open and
/// copy from.
pub struct FileSink {
    pub path: PathBuf,
}

impl ShareSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn deliver(&mut self, text: &str) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// In-memory sink, used by tests and by embedders that surface the text
/// themselves.
#[derive(Default)]
pub struct BufferSink {
    pub delivered: Option<String>,
}

impl ShareSink for BufferSink {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn deliver(&mut self, text: &str) -> anyhow::Result<()> {
        self.delivered = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MarketAdvice, MatchOutcome, PredictionRecord, Winner, now_utc};

    struct FailingSink;

    impl ShareSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn deliver(&mut self, _text: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("unavailable"))
        }
    }

    fn record() -> PredictionRecord {
        PredictionRecord {
            id: 1,
            match_id: "m1".to_string(),
            match_label: "Arsenal vs Chelsea".to_string(),
            home_team: "Arsenal".to_string(),
            away_team: "Chelsea".to_string(),
            kickoff_utc: None,
            winner: Winner::Home,
            confidence: 68.0,
            accuracy_estimate: 60.0,
            summary: "Home side unbeaten in six".to_string(),
            key_factors: vec![],
            market: Some(MarketAdvice {
                expected_home_goals: 1.8,
                expected_away_goals: 0.9,
                over_under: "Over 2.5".to_string(),
                both_teams_to_score: "No".to_string(),
                best_bets: vec!["Home win".to_string()],
            }),
            probs: None,
            home_position: None,
            away_position: None,
            method: "form".to_string(),
            favorite: false,
            created_utc: now_utc(),
            outcome: Some(MatchOutcome {
                actual_winner: Winner::Home,
                actual_home_goals: 2,
                actual_away_goals: 0,
                was_correct: true,
            }),
        }
    }

    #[test]
    fn share_text_includes_prediction_market_and_outcome() {
        let text = render_share_text(&record());
        assert!(text.contains("Arsenal vs Chelsea"));
        assert!(text.contains("68% confidence"));
        assert!(text.contains("Over 2.5"));
        assert!(text.contains("Best bets: Home win"));
        assert!(text.contains("Result: home 2-0 (hit)"));
    }

    #[test]
    fn share_falls_through_to_the_next_sink() {
        let mut sinks: Vec<Box<dyn ShareSink>> =
            vec![Box::new(FailingSink), Box::new(BufferSink::default())];
        assert!(share_record(&record(), &mut sinks));
    }

    #[test]
    fn share_reports_false_when_every_sink_fails() {
        let mut sinks: Vec<Box<dyn ShareSink>> =
            vec![Box::new(FailingSink), Box::new(FailingSink)];
        assert!(!share_record(&record(), &mut sinks));
    }
}
