use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{info, warn};

use crate::calibrate::{
    self, BucketStat, CalibrationTable, CategoryStat, Sample, apply_calibration, bucket_label,
    display_confidence,
};
use crate::record::{PredictionRecord, Prob3, ResultEntry, Winner, match_label, now_utc};

const DB_DIR: &str = "matchcast";
const DB_FILE: &str = "analytics.sqlite";
const RECENT_WINDOW: usize = 10;

const HEALTHY_ACCURACY: f64 = 55.0;
const FAIR_ACCURACY: f64 = 45.0;

/// Prediction-time input, before calibration.
#[derive(Debug, Clone)]
pub struct ServerPrediction {
    pub home_team: String,
    pub away_team: String,
    pub predicted: Winner,
    pub confidence: f64,
    pub probs: Option<Prob3>,
    pub home_position: Option<u32>,
    pub away_position: Option<u32>,
    pub method: String,
}

/// What the applier hands back to the prediction flow. The adjusted
/// confidence is the one logged to the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct CalibratedPrediction {
    pub match_label: String,
    pub predicted: Winner,
    pub raw_confidence: f64,
    pub confidence: f64,
    pub display_confidence: f64,
    pub correction: f64,
}

#[derive(Debug, Clone)]
pub struct ServerRow {
    pub id: i64,
    pub match_label: String,
    pub home_team: String,
    pub away_team: String,
    pub predicted: Winner,
    pub confidence: f64,
    pub probs: Option<Prob3>,
    pub home_position: Option<u32>,
    pub away_position: Option<u32>,
    pub method: String,
    pub created_utc: String,
    pub source: String,
    pub actual: Option<Winner>,
    pub actual_home_goals: Option<u8>,
    pub actual_away_goals: Option<u8>,
    pub was_correct: Option<bool>,
}

impl ServerRow {
    pub fn is_pending(&self) -> bool {
        self.actual.is_none()
    }

    fn as_sample(&self) -> Option<Sample> {
        let correct = self.was_correct?;
        Some(Sample {
            confidence: self.confidence,
            predicted: self.predicted,
            correct,
            home_position: self.home_position,
            away_position: self.away_position,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total: usize,
    pub completed: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub avg_confidence: f64,
    /// Accuracy minus average confidence over completed rows; same sign
    /// convention as the per-bucket calibration error.
    pub overall_calibration: f64,
    pub recent_accuracy: f64,
    pub outcome_distribution: BTreeMap<String, usize>,
    pub bucket_histogram: BTreeMap<String, usize>,
    pub health: Health,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPrediction {
    pub id: i64,
    #[serde(rename = "match")]
    pub match_label: String,
    pub predicted: Winner,
    pub confidence: f64,
    pub timestamp: String,
    pub home_team: String,
    pub away_team: String,
}

/// Canonical server-side call log plus the calibration correction table.
///
/// Mutations take the connection mutex so concurrent reconciliations for the
/// same match label cannot race; the applier reads the correction table
/// through its own lock and never waits on ledger writes. Aggregates are
/// recomputed from the ledger on every call.
pub struct AnalyticsEngine {
    conn: Mutex<Connection>,
    calibration: RwLock<CalibrationTable>,
}

impl AnalyticsEngine {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open analytics db {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_default() -> Result<Self> {
        let path = default_db_path().context("unable to resolve analytics db path")?;
        Self::open(&path)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        let calibration = load_factors(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            calibration: RwLock::new(calibration),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a pending record. The server ledger is an authoritative call
    /// log; it does not deduplicate.
    pub fn record_prediction(&self, p: &ServerPrediction) -> Result<i64> {
        let label = match_label(&p.home_team, &p.away_team);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO predictions (
                match_label, home_team, away_team, predicted, confidence,
                prob_home, prob_draw, prob_away, home_position, away_position,
                method, created_utc, source
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'server')",
            params![
                label,
                p.home_team,
                p.away_team,
                p.predicted.label(),
                p.confidence,
                p.probs.map(|pr| pr.home),
                p.probs.map(|pr| pr.draw),
                p.probs.map(|pr| pr.away),
                p.home_position,
                p.away_position,
                p.method,
                now_utc(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(%label, predicted = p.predicted.label(), confidence = p.confidence, "prediction recorded");
        Ok(id)
    }

    /// Reconciles the oldest pending record for the match label. Returns
    /// false, not an error, when nothing pending matches.
    pub fn record_result(&self, label: &str, actual: Winner) -> Result<bool> {
        let conn = self.conn();
        record_result_inner(&conn, label, actual)
    }

    /// Bulk reconciliation; one bad entry never fails the batch.
    pub fn import_results(&self, results: &[ResultEntry]) -> Result<ImportSummary> {
        let conn = self.conn();
        let mut summary = ImportSummary::default();
        for entry in results {
            if record_result_inner(&conn, &entry.match_label, entry.actual)? {
                summary.imported += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }

    /// One-directional ingestion of local-ledger records. Idempotent merge
    /// keyed by (match label, predicted winner, confidence ± 1); the local
    /// store is authoritative for outcomes. Records with no outcome are
    /// skipped — they contribute nothing to server statistics.
    pub fn sync_user_results(&self, records: &[PredictionRecord]) -> Result<SyncSummary> {
        let conn = self.conn();
        let mut summary = SyncSummary::default();
        for record in records {
            let Some(outcome) = record.outcome.as_ref() else {
                summary.skipped += 1;
                continue;
            };

            let existing: Option<(i64, Option<String>)> = conn
                .query_row(
                    "SELECT id, actual FROM predictions
                     WHERE match_label = ?1 AND predicted = ?2
                       AND ABS(confidence - ?3) <= 1.0
                     ORDER BY id ASC LIMIT 1",
                    params![record.match_label, record.winner.label(), record.confidence],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((_, Some(_))) => summary.skipped += 1,
                Some((id, None)) => {
                    conn.execute(
                        "UPDATE predictions SET
                            actual = ?1, actual_home_goals = ?2,
                            actual_away_goals = ?3, was_correct = ?4
                         WHERE id = ?5",
                        params![
                            outcome.actual_winner.label(),
                            outcome.actual_home_goals,
                            outcome.actual_away_goals,
                            outcome.was_correct,
                            id,
                        ],
                    )?;
                    summary.synced += 1;
                }
                None => {
                    conn.execute(
                        "INSERT INTO predictions (
                            match_label, home_team, away_team, predicted, confidence,
                            prob_home, prob_draw, prob_away, home_position, away_position,
                            method, created_utc, source,
                            actual, actual_home_goals, actual_away_goals, was_correct
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'sync',
                                   ?13, ?14, ?15, ?16)",
                        params![
                            record.match_label,
                            record.home_team,
                            record.away_team,
                            record.winner.label(),
                            record.confidence,
                            record.probs.map(|p| p.home),
                            record.probs.map(|p| p.draw),
                            record.probs.map(|p| p.away),
                            record.home_position,
                            record.away_position,
                            record.method,
                            record.created_utc,
                            outcome.actual_winner.label(),
                            outcome.actual_home_goals,
                            outcome.actual_away_goals,
                            outcome.was_correct,
                        ],
                    )?;
                    summary.synced += 1;
                }
            }
        }
        info!(synced = summary.synced, skipped = summary.skipped, "user results synced");
        Ok(summary)
    }

    pub fn all_rows(&self) -> Result<Vec<ServerRow>> {
        load_rows(&self.conn())
    }

    fn completed_samples(&self) -> Result<Vec<Sample>> {
        Ok(load_rows(&self.conn())?
            .iter()
            .filter_map(ServerRow::as_sample)
            .collect())
    }

    pub fn confidence_buckets(&self) -> Result<Vec<BucketStat>> {
        Ok(calibrate::confidence_buckets(&self.completed_samples()?))
    }

    pub fn match_type_stats(&self) -> Result<Vec<CategoryStat>> {
        Ok(calibrate::match_type_stats(&self.completed_samples()?))
    }

    pub fn position_diff_stats(&self) -> Result<Vec<CategoryStat>> {
        Ok(calibrate::position_diff_stats(&self.completed_samples()?))
    }

    pub fn dashboard(&self) -> Result<Dashboard> {
        let rows = self.all_rows()?;
        let total = rows.len();
        let completed: Vec<&ServerRow> = rows.iter().filter(|r| r.was_correct.is_some()).collect();
        let correct = completed
            .iter()
            .filter(|r| r.was_correct == Some(true))
            .count();
        let accuracy = calibrate::percent(correct, completed.len());

        let avg_confidence = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|r| r.confidence).sum::<f64>() / total as f64
        };
        let completed_confidence = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|r| r.confidence).sum::<f64>() / completed.len() as f64
        };

        // Most recent completed first; rows come back in insertion order.
        let recent: Vec<bool> = completed
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .filter_map(|r| r.was_correct)
            .collect();
        let recent_accuracy =
            calibrate::percent(recent.iter().filter(|c| **c).count(), recent.len());

        let mut outcome_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut bucket_histogram: BTreeMap<String, usize> = BTreeMap::new();
        for row in &rows {
            *outcome_distribution
                .entry(row.predicted.label().to_string())
                .or_default() += 1;
            *bucket_histogram
                .entry(bucket_label(row.confidence))
                .or_default() += 1;
        }

        let health = if completed.is_empty() {
            Health::Fair
        } else if accuracy >= HEALTHY_ACCURACY {
            Health::Healthy
        } else if accuracy >= FAIR_ACCURACY {
            Health::Fair
        } else {
            Health::Poor
        };
        let trend = if recent_accuracy >= accuracy {
            Trend::Improving
        } else {
            Trend::Declining
        };

        Ok(Dashboard {
            total,
            completed: completed.len(),
            correct,
            accuracy,
            avg_confidence,
            overall_calibration: if completed.is_empty() {
                0.0
            } else {
                accuracy - completed_confidence
            },
            recent_accuracy,
            outcome_distribution,
            bucket_histogram,
            health,
            trend,
        })
    }

    pub fn pending_predictions(&self) -> Result<Vec<PendingPrediction>> {
        Ok(self
            .all_rows()?
            .into_iter()
            .filter(ServerRow::is_pending)
            .map(|r| PendingPrediction {
                id: r.id,
                match_label: r.match_label,
                predicted: r.predicted,
                confidence: r.confidence,
                timestamp: r.created_utc,
                home_team: r.home_team,
                away_team: r.away_team,
            })
            .collect())
    }

    pub fn get_calibration_factors(&self) -> CalibrationTable {
        self.calibration
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Operator override: replaces the table wholesale and persists it.
    /// The write lock is held across the sqlite save so the persisted and
    /// served tables always agree under concurrent overrides. Lock order is
    /// calibration then conn throughout.
    pub fn set_calibration_factors(&self, table: CalibrationTable) -> Result<()> {
        let mut current = self
            .calibration
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        save_factors(&self.conn(), &table)?;
        *current = table;
        Ok(())
    }

    /// Recomputes the correction table from current bucket statistics.
    pub fn update_calibration(&self) -> Result<CalibrationTable> {
        let table = calibrate::table_from_buckets(&self.confidence_buckets()?);
        self.set_calibration_factors(table.clone())?;
        info!(buckets = table.factors.len(), "calibration table updated");
        Ok(table)
    }

    /// The prediction-time contract: raw confidence goes through the applier
    /// and the adjusted prediction is unconditionally logged.
    pub fn calibrated_prediction(&self, raw: ServerPrediction) -> Result<CalibratedPrediction> {
        let table = self.get_calibration_factors();
        let adjusted = apply_calibration(raw.confidence, &table);
        let correction = adjusted - raw.confidence;
        let logged = ServerPrediction {
            confidence: adjusted,
            ..raw.clone()
        };
        self.record_prediction(&logged)?;
        Ok(CalibratedPrediction {
            match_label: match_label(&raw.home_team, &raw.away_team),
            predicted: raw.predicted,
            raw_confidence: raw.confidence,
            confidence: adjusted,
            display_confidence: display_confidence(adjusted),
            correction,
        })
    }

    /// Line-oriented dump of the full ledger for offline analysis.
    pub fn export_predictions(&self) -> Result<String> {
        let rows = self.all_rows()?;
        let mut out = String::from(
            "id,match,home_team,away_team,predicted,confidence,home_position,away_position,method,created_utc,actual,actual_score,was_correct\n",
        );
        for r in rows {
            let score = match (r.actual_home_goals, r.actual_away_goals) {
                (Some(h), Some(a)) => format!("{h}-{a}"),
                _ => String::new(),
            };
            out.push_str(&format!(
                "{},{},{},{},{},{:.1},{},{},{},{},{},{},{}\n",
                r.id,
                csv_field(&r.match_label),
                csv_field(&r.home_team),
                csv_field(&r.away_team),
                r.predicted.label(),
                r.confidence,
                r.home_position.map(|p| p.to_string()).unwrap_or_default(),
                r.away_position.map(|p| p.to_string()).unwrap_or_default(),
                csv_field(&r.method),
                r.created_utc,
                r.actual.map(|w| w.label().to_string()).unwrap_or_default(),
                score,
                r.was_correct.map(|c| c.to_string()).unwrap_or_default(),
            ));
        }
        Ok(out)
    }

    /// Empties the ledger. The calibration table persists until the next
    /// recalibration or explicit override.
    pub fn clear_history(&self) -> Result<()> {
        self.conn().execute("DELETE FROM predictions", [])?;
        info!("analytics history cleared");
        Ok(())
    }

    pub fn insight_report(&self) -> Result<Vec<String>> {
        let samples = self.completed_samples()?;
        Ok(calibrate::insights(
            &calibrate::confidence_buckets(&samples),
            &calibrate::match_type_stats(&samples),
            &calibrate::position_diff_stats(&samples),
        ))
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS predictions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_label TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            predicted TEXT NOT NULL,
            confidence REAL NOT NULL,
            prob_home REAL,
            prob_draw REAL,
            prob_away REAL,
            home_position INTEGER,
            away_position INTEGER,
            method TEXT NOT NULL DEFAULT '',
            created_utc TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'server',
            actual TEXT,
            actual_home_goals INTEGER,
            actual_away_goals INTEGER,
            was_correct INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_predictions_match ON predictions(match_label);
        CREATE TABLE IF NOT EXISTS calibration_factors (
            bucket TEXT PRIMARY KEY,
            correction REAL NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn record_result_inner(conn: &Connection, label: &str, actual: Winner) -> Result<bool> {
    let pending: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, predicted FROM predictions
             WHERE match_label = ?1 AND actual IS NULL
             ORDER BY id ASC LIMIT 1",
            params![label],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((id, predicted)) = pending else {
        warn!(%label, "result received for unknown or already-settled match");
        return Ok(false);
    };

    let was_correct = Winner::parse(&predicted) == Some(actual);
    conn.execute(
        "UPDATE predictions SET actual = ?1, was_correct = ?2 WHERE id = ?3",
        params![actual.label(), was_correct, id],
    )?;
    info!(%label, actual = actual.label(), was_correct, "result reconciled");
    Ok(true)
}

fn load_rows(conn: &Connection) -> Result<Vec<ServerRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, match_label, home_team, away_team, predicted, confidence,
                prob_home, prob_draw, prob_away, home_position, away_position,
                method, created_utc, source,
                actual, actual_home_goals, actual_away_goals, was_correct
         FROM predictions ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let predicted: String = row.get(4)?;
        let actual: Option<String> = row.get(14)?;
        let prob_home: Option<f64> = row.get(6)?;
        let prob_draw: Option<f64> = row.get(7)?;
        let prob_away: Option<f64> = row.get(8)?;
        Ok(ServerRow {
            id: row.get(0)?,
            match_label: row.get(1)?,
            home_team: row.get(2)?,
            away_team: row.get(3)?,
            predicted: Winner::parse(&predicted).unwrap_or(Winner::Draw),
            confidence: row.get(5)?,
            probs: match (prob_home, prob_draw, prob_away) {
                (Some(home), Some(draw), Some(away)) => Some(Prob3 { home, draw, away }),
                _ => None,
            },
            home_position: row.get(9)?,
            away_position: row.get(10)?,
            method: row.get(11)?,
            created_utc: row.get(12)?,
            source: row.get(13)?,
            actual: actual.and_then(|a| Winner::parse(&a)),
            actual_home_goals: row.get(15)?,
            actual_away_goals: row.get(16)?,
            was_correct: row.get(17)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn load_factors(conn: &Connection) -> Result<CalibrationTable> {
    let mut stmt = conn.prepare("SELECT bucket, correction FROM calibration_factors")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut table = CalibrationTable::default();
    for row in rows {
        let (bucket, correction) = row?;
        table.set(&bucket, correction);
    }
    Ok(table)
}

fn save_factors(conn: &Connection, table: &CalibrationTable) -> Result<()> {
    conn.execute("DELETE FROM calibration_factors", [])?;
    for (bucket, correction) in &table.factors {
        conn.execute(
            "INSERT INTO calibration_factors (bucket, correction) VALUES (?1, ?2)",
            params![bucket, correction],
        )?;
    }
    Ok(())
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MATCHCAST_DB") {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    if let Ok(base) = std::env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(DB_DIR).join(DB_FILE));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(DB_DIR).join(DB_FILE))
}
