//! Prediction tracking, backtesting and confidence calibration for a
//! sports-match outcome predictor: a device-scoped prediction ledger, a
//! server-side analytics engine, and the correction loop that feeds bucketed
//! accuracy back into future confidence scores.

pub mod analytics;
pub mod api;
pub mod calibrate;
pub mod local_ledger;
pub mod record;
pub mod seed;
pub mod share;
