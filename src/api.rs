use serde::Serialize;
use serde_json::Value;

use crate::analytics::{
    AnalyticsEngine, Dashboard, Health, ImportSummary, PendingPrediction, ServerRow, SyncSummary,
};
use crate::calibrate::{BucketStat, CalibrationTable, CategoryStat};
use crate::record::{PredictionRecord, ResultEntry, Winner};

const RECENT_PREDICTIONS: usize = 20;

/// Boundary errors map straight to HTTP statuses; nothing here is a panic or
/// an internal error type leaking out.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    InvalidBody(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::InvalidBody(_) => 400,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::NotFound(msg) | ApiError::InvalidBody(msg) | ApiError::Internal(msg) => msg,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status(), self.message())
    }
}

/// One variant per POST action. Bodies are validated into this union at the
/// boundary; branch order below reproduces the contract's
/// first-matching-branch-wins semantics.
#[derive(Debug)]
pub enum AnalyticsRequest {
    RecordResult { match_label: String, actual: Winner },
    ImportResults(Vec<ResultEntry>),
    Recalibrate,
    Sync(Vec<PredictionRecord>),
    SetFactors(CalibrationTable),
    Clear,
}

impl AnalyticsRequest {
    pub fn from_json(body: &Value) -> Result<Self, ApiError> {
        let obj = body
            .as_object()
            .ok_or_else(|| ApiError::InvalidBody("request body must be an object".to_string()))?;

        if let (Some(label), Some(actual)) = (obj.get("match"), obj.get("actual")) {
            let match_label = label
                .as_str()
                .ok_or_else(|| ApiError::InvalidBody("match must be a string".to_string()))?
                .to_string();
            let actual: Winner = serde_json::from_value(actual.clone())
                .map_err(|_| ApiError::InvalidBody("actual must be home/draw/away".to_string()))?;
            return Ok(AnalyticsRequest::RecordResult {
                match_label,
                actual,
            });
        }

        if let Some(results) = obj.get("results") {
            let results: Vec<ResultEntry> = serde_json::from_value(results.clone())
                .map_err(|err| ApiError::InvalidBody(format!("bad results array: {err}")))?;
            return Ok(AnalyticsRequest::ImportResults(results));
        }

        match obj.get("action").and_then(Value::as_str) {
            Some("recalibrate") => return Ok(AnalyticsRequest::Recalibrate),
            Some("sync") => {
                let records = obj.get("userPredictions").cloned().ok_or_else(|| {
                    ApiError::InvalidBody("sync requires userPredictions".to_string())
                })?;
                let records: Vec<PredictionRecord> = serde_json::from_value(records)
                    .map_err(|err| ApiError::InvalidBody(format!("bad userPredictions: {err}")))?;
                return Ok(AnalyticsRequest::Sync(records));
            }
            _ => {}
        }

        if let Some(factors) = obj.get("calibrationFactors") {
            let table: CalibrationTable = serde_json::from_value(factors.clone())
                .map_err(|err| ApiError::InvalidBody(format!("bad calibrationFactors: {err}")))?;
            return Ok(AnalyticsRequest::SetFactors(table));
        }

        if obj.get("action").and_then(Value::as_str) == Some("clear") {
            return Ok(AnalyticsRequest::Clear);
        }

        Err(ApiError::InvalidBody("unrecognized request body".to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AnalyticsResponse {
    ResultRecorded {
        recorded: bool,
        #[serde(rename = "match")]
        match_label: String,
    },
    Imported(ImportSummary),
    Recalibrated {
        #[serde(rename = "calibrationFactors")]
        factors: CalibrationTable,
    },
    Synced(SyncSummary),
    FactorsSet {
        #[serde(rename = "calibrationFactors")]
        factors: CalibrationTable,
    },
    Cleared {
        cleared: bool,
    },
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::Internal(err.to_string())
}

pub fn dispatch(
    engine: &AnalyticsEngine,
    request: AnalyticsRequest,
) -> Result<AnalyticsResponse, ApiError> {
    match request {
        AnalyticsRequest::RecordResult {
            match_label,
            actual,
        } => {
            let recorded = engine
                .record_result(&match_label, actual)
                .map_err(internal)?;
            if !recorded {
                return Err(ApiError::NotFound(format!(
                    "no pending prediction for {match_label}"
                )));
            }
            Ok(AnalyticsResponse::ResultRecorded {
                recorded,
                match_label,
            })
        }
        AnalyticsRequest::ImportResults(results) => Ok(AnalyticsResponse::Imported(
            engine.import_results(&results).map_err(internal)?,
        )),
        AnalyticsRequest::Recalibrate => Ok(AnalyticsResponse::Recalibrated {
            factors: engine.update_calibration().map_err(internal)?,
        }),
        AnalyticsRequest::Sync(records) => Ok(AnalyticsResponse::Synced(
            engine.sync_user_results(&records).map_err(internal)?,
        )),
        AnalyticsRequest::SetFactors(table) => {
            engine
                .set_calibration_factors(table.clone())
                .map_err(internal)?;
            Ok(AnalyticsResponse::FactorsSet { factors: table })
        }
        AnalyticsRequest::Clear => {
            engine.clear_history().map_err(internal)?;
            Ok(AnalyticsResponse::Cleared { cleared: true })
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecentPrediction {
    #[serde(rename = "match")]
    pub match_label: String,
    pub predicted: Winner,
    pub confidence: f64,
    pub timestamp: String,
    pub settled: bool,
}

/// The default GET payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPayload {
    pub overview: Dashboard,
    pub health: Health,
    pub confidence_buckets: Vec<BucketStat>,
    pub calibration_factors: CalibrationTable,
    pub match_type_stats: Vec<CategoryStat>,
    pub position_stats: Vec<CategoryStat>,
    pub recent_predictions: Vec<RecentPrediction>,
    pub pending_results: Vec<PendingPrediction>,
    pub insights: Vec<String>,
}

pub fn dashboard_payload(engine: &AnalyticsEngine) -> Result<DashboardPayload, ApiError> {
    let overview = engine.dashboard().map_err(internal)?;
    let health = overview.health;
    let rows = engine.all_rows().map_err(internal)?;
    let recent_predictions = rows
        .iter()
        .rev()
        .take(RECENT_PREDICTIONS)
        .map(|r: &ServerRow| RecentPrediction {
            match_label: r.match_label.clone(),
            predicted: r.predicted,
            confidence: r.confidence,
            timestamp: r.created_utc.clone(),
            settled: !r.is_pending(),
        })
        .collect();

    Ok(DashboardPayload {
        overview,
        health,
        confidence_buckets: engine.confidence_buckets().map_err(internal)?,
        calibration_factors: engine.get_calibration_factors(),
        match_type_stats: engine.match_type_stats().map_err(internal)?,
        position_stats: engine.position_diff_stats().map_err(internal)?,
        recent_predictions,
        pending_results: engine.pending_predictions().map_err(internal)?,
        insights: engine.insight_report().map_err(internal)?,
    })
}

/// GET with format=csv: the downloadable line-oriented export.
pub fn export_csv(engine: &AnalyticsEngine) -> Result<String, ApiError> {
    engine.export_predictions().map_err(internal)
}
