use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::{NewPrediction, OutcomeUpdate, PredictionRecord, Winner, now_utc};

pub const MAX_RECORDS: usize = 200;
const DEDUP_CONFIDENCE_WINDOW: f64 = 1.0;
const LAST_N_WINDOW: usize = 10;

const STORE_DIR: &str = "matchcast";
const PREDICTIONS_FILE: &str = "predictions.json";
const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreFile {
    version: u32,
    next_id: u64,
    records: Vec<PredictionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Saved(u64),
    /// Dedup hit. A distinct result, not a failure; callers branch on it.
    Duplicate,
}

impl SaveResult {
    pub fn is_duplicate(self) -> bool {
        matches!(self, SaveResult::Duplicate)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub favorites_only: bool,
    pub pending_only: bool,
    pub completed_only: bool,
    pub method: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreakKind {
    Win,
    Loss,
    None,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Streak {
    pub kind: StreakKind,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MethodStat {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub pending: usize,
    pub accuracy: f64,
    pub home_accuracy: f64,
    pub draw_accuracy: f64,
    pub away_accuracy: f64,
    pub avg_confidence: f64,
    pub avg_confidence_correct: f64,
    pub avg_confidence_incorrect: f64,
    pub last_10_accuracy: f64,
    pub method_accuracy: BTreeMap<String, MethodStat>,
    pub streak: Streak,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPayload {
    pub exported_utc: String,
    pub records: Vec<PredictionRecord>,
    pub stats: LedgerStats,
}

/// Device-scoped prediction history, most-recent-first. Owned by the client
/// feature layer; a single writer, so each read-modify-write below is atomic
/// from the caller's point of view.
pub struct LocalLedger {
    records: Vec<PredictionRecord>,
    next_id: u64,
    path: Option<PathBuf>,
}

impl LocalLedger {
    /// Loads from the default snapshot path; any load failure starts empty.
    pub fn open() -> Self {
        match default_store_path() {
            Some(path) => Self::with_path(path),
            None => Self::in_memory(),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        let store = load_store(&path).unwrap_or_default();
        let next_id = store
            .next_id
            .max(store.records.iter().map(|r| r.id + 1).max().unwrap_or(1));
        Self {
            records: store.records,
            next_id,
            path: Some(path),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
            path: None,
        }
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_duplicate(
        &self,
        match_id: &str,
        winner: Winner,
        confidence: f64,
    ) -> Option<&PredictionRecord> {
        self.records.iter().find(|r| {
            r.match_id == match_id
                && r.winner == winner
                && (r.confidence - confidence).abs() <= DEDUP_CONFIDENCE_WINDOW
        })
    }

    /// Inserts at the head and truncates to the newest `MAX_RECORDS`. The cap
    /// is a hard invariant of the store, not a tunable.
    pub fn save(&mut self, input: NewPrediction, skip_duplicate_check: bool) -> SaveResult {
        if !skip_duplicate_check
            && self
                .find_duplicate(&input.match_id, input.winner, input.confidence)
                .is_some()
        {
            return SaveResult::Duplicate;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(
            0,
            PredictionRecord {
                id,
                match_id: input.match_id,
                match_label: input.match_label,
                home_team: input.home_team,
                away_team: input.away_team,
                kickoff_utc: input.kickoff_utc,
                winner: input.winner,
                confidence: input.confidence,
                accuracy_estimate: input.accuracy_estimate,
                summary: input.summary,
                key_factors: input.key_factors,
                market: input.market,
                probs: input.probs,
                home_position: input.home_position,
                away_position: input.away_position,
                method: input.method,
                favorite: false,
                created_utc: now_utc(),
                outcome: None,
            },
        );
        self.records.truncate(MAX_RECORDS);
        self.persist();
        SaveResult::Saved(id)
    }

    /// Filters compose in a fixed order: favorites, pending, completed,
    /// method, then the count limit last.
    pub fn list(&self, filter: &ListFilter) -> Vec<&PredictionRecord> {
        let iter = self
            .records
            .iter()
            .filter(|r| !filter.favorites_only || r.favorite)
            .filter(|r| !filter.pending_only || r.is_pending())
            .filter(|r| !filter.completed_only || r.is_completed())
            .filter(|r| {
                filter
                    .method
                    .as_deref()
                    .is_none_or(|method| r.method == method)
            });
        match filter.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    pub fn get(&self, id: u64) -> Option<&PredictionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Absence is a no-op signal, not an error.
    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        let existed = self.records.len() != before;
        if existed {
            self.persist();
        }
        existed
    }

    pub fn toggle_favorite(&mut self, id: u64) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        record.favorite = !record.favorite;
        self.persist();
        true
    }

    /// Sets the outcome and the fixed correctness flag. Returns the updated
    /// record, or None when the id is unknown. A record that already holds an
    /// outcome is left untouched.
    pub fn record_outcome(
        &mut self,
        id: u64,
        home_goals: u8,
        away_goals: u8,
    ) -> Option<&PredictionRecord> {
        let idx = self.records.iter().position(|r| r.id == id)?;
        if self.records[idx].reconcile(home_goals, away_goals) {
            self.persist();
        }
        Some(&self.records[idx])
    }

    /// For each result, reconciles the first still-pending record for that
    /// match id; everything else is silently skipped. Returns the count
    /// reconciled.
    pub fn bulk_record_outcomes(&mut self, results: &[OutcomeUpdate]) -> usize {
        let mut reconciled = 0usize;
        for result in results {
            let Some(record) = self
                .records
                .iter_mut()
                .find(|r| r.match_id == result.match_id && r.is_pending())
            else {
                continue;
            };
            if record.reconcile(result.home_goals, result.away_goals) {
                reconciled += 1;
            }
        }
        if reconciled > 0 {
            self.persist();
        }
        reconciled
    }

    pub fn stats(&self) -> LedgerStats {
        let total = self.records.len();
        let mut correct = 0usize;
        let mut incorrect = 0usize;
        let mut conf_sum = 0.0f64;
        let mut conf_correct_sum = 0.0f64;
        let mut conf_incorrect_sum = 0.0f64;
        let mut per_winner: BTreeMap<&'static str, (usize, usize)> = BTreeMap::new();
        let mut per_method: BTreeMap<String, MethodStat> = BTreeMap::new();

        for r in &self.records {
            conf_sum += r.confidence;
            let Some(outcome) = r.outcome.as_ref() else {
                continue;
            };
            let winner_entry = per_winner.entry(r.winner.label()).or_default();
            winner_entry.0 += 1;
            let method_entry = per_method.entry(r.method.clone()).or_default();
            method_entry.total += 1;
            if outcome.was_correct {
                correct += 1;
                conf_correct_sum += r.confidence;
                winner_entry.1 += 1;
                method_entry.correct += 1;
            } else {
                incorrect += 1;
                conf_incorrect_sum += r.confidence;
            }
        }
        for stat in per_method.values_mut() {
            stat.accuracy = crate::calibrate::percent(stat.correct, stat.total);
        }

        let completed = correct + incorrect;
        let winner_accuracy = |label: &str| {
            per_winner
                .get(label)
                .map(|(t, c)| crate::calibrate::percent(*c, *t))
                .unwrap_or(0.0)
        };

        let last_n: Vec<bool> = self
            .records
            .iter()
            .filter_map(|r| r.was_correct())
            .take(LAST_N_WINDOW)
            .collect();
        let last_10_accuracy =
            crate::calibrate::percent(last_n.iter().filter(|c| **c).count(), last_n.len());

        LedgerStats {
            total,
            correct,
            incorrect,
            pending: total - completed,
            accuracy: crate::calibrate::percent(correct, completed),
            home_accuracy: winner_accuracy("home"),
            draw_accuracy: winner_accuracy("draw"),
            away_accuracy: winner_accuracy("away"),
            avg_confidence: mean(conf_sum, total),
            avg_confidence_correct: mean(conf_correct_sum, correct),
            avg_confidence_incorrect: mean(conf_incorrect_sum, incorrect),
            last_10_accuracy,
            method_accuracy: per_method,
            streak: self.current_streak(),
        }
    }

    /// Run of identical correctness values starting from the most recent
    /// completed record.
    fn current_streak(&self) -> Streak {
        let mut completed = self.records.iter().filter_map(|r| r.was_correct());
        let Some(first) = completed.next() else {
            return Streak {
                kind: StreakKind::None,
                count: 0,
            };
        };
        let count = 1 + completed.take_while(|c| *c == first).count();
        Streak {
            kind: if first { StreakKind::Win } else { StreakKind::Loss },
            count,
        }
    }

    pub fn export(&self) -> ExportPayload {
        ExportPayload {
            exported_utc: now_utc(),
            records: self.records.clone(),
            stats: self.stats(),
        }
    }

    /// Merges an exported payload: incoming ids that already exist locally are
    /// dropped (local copies win), the rest are prepended. The 200-record cap
    /// is not applied here; only future saves enforce it.
    pub fn import(&mut self, payload: ExportPayload) -> usize {
        let mut incoming: Vec<PredictionRecord> = payload
            .records
            .into_iter()
            .filter(|r| self.get(r.id).is_none())
            .collect();
        let merged = incoming.len();
        if merged > 0 {
            incoming.extend(self.records.drain(..));
            self.records = incoming;
            self.next_id = self
                .records
                .iter()
                .map(|r| r.id + 1)
                .max()
                .unwrap_or(1)
                .max(self.next_id);
            self.persist();
        }
        merged
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.persist();
    }

    /// Writes the full record array. A failed write degrades to false so a
    /// broken disk never crashes a user flow.
    fn persist(&self) -> bool {
        let Some(path) = self.path.as_ref() else {
            return true;
        };
        let store = StoreFile {
            version: STORE_VERSION,
            next_id: self.next_id,
            records: self.records.clone(),
        };
        match write_store(path, &store) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %path.display(), %err, "local ledger persist failed");
                false
            }
        }
    }
}

fn mean(sum: f64, n: usize) -> f64 {
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn load_store(path: &Path) -> Option<StoreFile> {
    let raw = fs::read_to_string(path).ok()?;
    let store = serde_json::from_str::<StoreFile>(&raw).ok()?;
    if store.version != STORE_VERSION {
        return None;
    }
    Some(store)
}

fn write_store(path: &Path, store: &StoreFile) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string(store)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn default_store_path() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("MATCHCAST_CACHE_DIR") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(PREDICTIONS_FILE));
        }
    }
    if let Ok(base) = std::env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(STORE_DIR).join(PREDICTIONS_FILE));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".cache")
            .join(STORE_DIR)
            .join(PREDICTIONS_FILE),
    )
}
