use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Home,
    Draw,
    Away,
}

impl Winner {
    pub fn label(self) -> &'static str {
        match self {
            Winner::Home => "home",
            Winner::Draw => "draw",
            Winner::Away => "away",
        }
    }

    pub fn parse(raw: &str) -> Option<Winner> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "home" | "h" | "1" => Some(Winner::Home),
            "draw" | "d" | "x" => Some(Winner::Draw),
            "away" | "a" | "2" => Some(Winner::Away),
            _ => None,
        }
    }
}

/// Home/draw/away percentages; the producer keeps them summing to ~100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketAdvice {
    pub expected_home_goals: f64,
    pub expected_away_goals: f64,
    pub over_under: String,
    pub both_teams_to_score: String,
    #[serde(default)]
    pub best_bets: Vec<String>,
}

/// Outcome fields land together at reconciliation time. `was_correct` is fixed
/// when the outcome is attached and never recomputed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub actual_winner: Winner,
    pub actual_home_goals: u8,
    pub actual_away_goals: u8,
    pub was_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: u64,
    pub match_id: String,
    pub match_label: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub kickoff_utc: Option<String>,
    pub winner: Winner,
    pub confidence: f64,
    #[serde(default)]
    pub accuracy_estimate: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_factors: Vec<String>,
    #[serde(default)]
    pub market: Option<MarketAdvice>,
    #[serde(default)]
    pub probs: Option<Prob3>,
    #[serde(default)]
    pub home_position: Option<u32>,
    #[serde(default)]
    pub away_position: Option<u32>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub favorite: bool,
    pub created_utc: String,
    #[serde(default)]
    pub outcome: Option<MatchOutcome>,
}

impl PredictionRecord {
    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }

    /// Attaches the real outcome. Returns false when an outcome is already
    /// present; reconciliation never runs twice for the same record.
    pub fn reconcile(&mut self, home_goals: u8, away_goals: u8) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        let actual = classify_outcome(home_goals, away_goals);
        self.outcome = Some(MatchOutcome {
            actual_winner: actual,
            actual_home_goals: home_goals,
            actual_away_goals: away_goals,
            was_correct: self.winner == actual,
        });
        true
    }

    pub fn was_correct(&self) -> Option<bool> {
        self.outcome.as_ref().map(|o| o.was_correct)
    }
}

/// Prediction-side input for a local save; id, timestamp, favorite flag and
/// outcome are ledger-assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrediction {
    pub match_id: String,
    pub match_label: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub kickoff_utc: Option<String>,
    pub winner: Winner,
    pub confidence: f64,
    #[serde(default)]
    pub accuracy_estimate: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_factors: Vec<String>,
    #[serde(default)]
    pub market: Option<MarketAdvice>,
    #[serde(default)]
    pub probs: Option<Prob3>,
    #[serde(default)]
    pub home_position: Option<u32>,
    #[serde(default)]
    pub away_position: Option<u32>,
    #[serde(default)]
    pub method: String,
}

/// Final-score input used by the local bulk reconciliation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeUpdate {
    pub match_id: String,
    pub home_goals: u8,
    pub away_goals: u8,
}

/// Winner-only result used by the server import path, keyed by match label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    #[serde(rename = "match")]
    pub match_label: String,
    pub actual: Winner,
}

pub fn classify_outcome(home_goals: u8, away_goals: u8) -> Winner {
    if home_goals > away_goals {
        Winner::Home
    } else if home_goals < away_goals {
        Winner::Away
    } else {
        Winner::Draw
    }
}

pub fn match_label(home_team: &str, away_team: &str) -> String {
    format!("{home_team} vs {away_team}")
}

pub fn now_utc() -> String {
    Utc::now().to_rfc3339()
}
