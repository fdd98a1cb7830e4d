use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::Winner;

pub const BUCKET_WIDTH: u32 = 10;
/// Corrections are clipped so one noisy bucket cannot swing future
/// confidences by more than this many points.
pub const MAX_CORRECTION: f64 = 15.0;
/// A bucket contributes a correction factor only once it has this many
/// completed samples.
pub const MIN_SAMPLES_FOR_FACTOR: usize = 3;

// Insight policy constants. These encode the operator's definition of
// "actionable" and are thresholds, not fitted values.
const INSIGHT_MIN_BUCKET_SAMPLES: usize = 5;
const OVERCONFIDENT_ERROR: f64 = 10.0;
const UNDERCONFIDENT_ERROR: f64 = -10.0;
const WELL_CALIBRATED_BAND: f64 = 5.0;
const UNDERDOG_MIN_SAMPLES: usize = 3;
const UNDERDOG_AVOID_ACCURACY: f64 = 30.0;
const UNDERDOG_VALUE_ACCURACY: f64 = 50.0;
const FAVORITE_MIN_SAMPLES: usize = 5;
const FAVORITE_RELIABLE_ACCURACY: f64 = 70.0;
const LARGE_FAV_RELIABLE_ACCURACY: f64 = 75.0;
const LARGE_FAV_WEAK_ACCURACY: f64 = 50.0;
const EVEN_MATCH_WEAK_ACCURACY: f64 = 40.0;
const EVEN_MATCH_STRONG_ACCURACY: f64 = 55.0;

// League-position gap boundaries for favorite/even classification.
const EVEN_GAP: i32 = 3;
const LARGE_GAP: i32 = 10;

/// Bucket label → additive correction in percentage points. The table starts
/// empty (zero correction everywhere) and is replaced wholesale by
/// recalibration or an operator override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationTable {
    pub factors: BTreeMap<String, f64>,
}

impl CalibrationTable {
    pub fn correction_for(&self, confidence: f64) -> f64 {
        self.factors
            .get(&bucket_label(confidence))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, bucket: &str, correction: f64) {
        self.factors.insert(
            bucket.to_string(),
            correction.clamp(-MAX_CORRECTION, MAX_CORRECTION),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

/// Floor to the nearest 10, with 100 folded into the top bucket.
pub fn bucket_start(confidence: f64) -> u32 {
    let clamped = confidence.clamp(0.0, 100.0);
    (((clamped / BUCKET_WIDTH as f64).floor() as u32) * BUCKET_WIDTH).min(90)
}

pub fn bucket_label(confidence: f64) -> String {
    let start = bucket_start(confidence);
    format!("{}-{}", start, start + BUCKET_WIDTH)
}

fn bucket_midpoint(start: u32) -> f64 {
    start as f64 + BUCKET_WIDTH as f64 / 2.0
}

/// The calibration applier. Pure: bucket lookup, additive correction, clamp
/// back into [0,100]. A bucket with no entry means zero correction.
pub fn apply_calibration(raw_confidence: f64, table: &CalibrationTable) -> f64 {
    (raw_confidence + table.correction_for(raw_confidence)).clamp(0.0, 100.0)
}

/// Presentation clamp applied after calibration and any other adjustments:
/// never show near-certainty or near-despair.
pub fn display_confidence(adjusted: f64) -> f64 {
    adjusted.clamp(35.0, 90.0)
}

/// One completed prediction, reduced to the fields the aggregators need.
/// Both ledgers map their records into this shape.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub confidence: f64,
    pub predicted: Winner,
    pub correct: bool,
    pub home_position: Option<u32>,
    pub away_position: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketStat {
    pub bucket: String,
    pub bucket_start: u32,
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub avg_confidence: f64,
    /// Accuracy minus the bucket midpoint, signed. Negative means the bucket
    /// delivered less accuracy than its nominal confidence claimed.
    pub calibration_error: f64,
}

pub fn confidence_buckets(samples: &[Sample]) -> Vec<BucketStat> {
    let mut totals: BTreeMap<u32, (usize, usize, f64)> = BTreeMap::new();
    for s in samples {
        let entry = totals.entry(bucket_start(s.confidence)).or_default();
        entry.0 += 1;
        if s.correct {
            entry.1 += 1;
        }
        entry.2 += s.confidence;
    }

    totals
        .into_iter()
        .map(|(start, (total, correct, conf_sum))| {
            let accuracy = percent(correct, total);
            BucketStat {
                bucket: format!("{}-{}", start, start + BUCKET_WIDTH),
                bucket_start: start,
                total,
                correct,
                accuracy,
                avg_confidence: conf_sum / total as f64,
                calibration_error: accuracy - bucket_midpoint(start),
            }
        })
        .collect()
}

/// Recomputes the correction table from bucket statistics: the signed
/// calibration error per bucket, clipped, for buckets with enough samples.
pub fn table_from_buckets(buckets: &[BucketStat]) -> CalibrationTable {
    let mut table = CalibrationTable::default();
    for b in buckets {
        if b.total >= MIN_SAMPLES_FOR_FACTOR {
            table.set(&b.bucket, b.calibration_error);
        }
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    HomeFavorite,
    AwayFavorite,
    UnderdogPick,
    EvenMatch,
}

impl MatchType {
    pub fn label(self) -> &'static str {
        match self {
            MatchType::HomeFavorite => "home_favorite",
            MatchType::AwayFavorite => "away_favorite",
            MatchType::UnderdogPick => "underdog_pick",
            MatchType::EvenMatch => "even_match",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionBand {
    LargeHomeFav,
    HomeFav,
    EvenMatch,
    AwayFav,
    LargeAwayFav,
}

impl PositionBand {
    pub fn label(self) -> &'static str {
        match self {
            PositionBand::LargeHomeFav => "large_home_fav",
            PositionBand::HomeFav => "home_fav",
            PositionBand::EvenMatch => "even_match",
            PositionBand::AwayFav => "away_fav",
            PositionBand::LargeAwayFav => "large_away_fav",
        }
    }
}

/// Position gap: positive when the home side sits higher in the table.
/// Lower position number = better standing.
pub fn position_gap(home_position: u32, away_position: u32) -> i32 {
    away_position as i32 - home_position as i32
}

/// Derived at aggregation time from the two league positions, never stored.
pub fn classify_match_type(
    home_position: u32,
    away_position: u32,
    predicted: Winner,
) -> MatchType {
    let gap = position_gap(home_position, away_position);
    if gap.abs() <= EVEN_GAP {
        return MatchType::EvenMatch;
    }
    let favorite = if gap > 0 { Winner::Home } else { Winner::Away };
    match predicted {
        Winner::Draw => {
            if gap > 0 {
                MatchType::HomeFavorite
            } else {
                MatchType::AwayFavorite
            }
        }
        w if w == favorite => {
            if gap > 0 {
                MatchType::HomeFavorite
            } else {
                MatchType::AwayFavorite
            }
        }
        _ => MatchType::UnderdogPick,
    }
}

pub fn classify_position_band(home_position: u32, away_position: u32) -> PositionBand {
    let gap = position_gap(home_position, away_position);
    if gap >= LARGE_GAP {
        PositionBand::LargeHomeFav
    } else if gap > EVEN_GAP {
        PositionBand::HomeFav
    } else if gap >= -EVEN_GAP {
        PositionBand::EvenMatch
    } else if gap > -LARGE_GAP {
        PositionBand::AwayFav
    } else {
        PositionBand::LargeAwayFav
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStat {
    pub category: String,
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

fn category_stats<K: Ord + Copy>(
    samples: &[Sample],
    classify: impl Fn(&Sample) -> Option<K>,
    label: impl Fn(K) -> &'static str,
) -> Vec<CategoryStat> {
    let mut totals: BTreeMap<K, (usize, usize)> = BTreeMap::new();
    for s in samples {
        let Some(key) = classify(s) else {
            continue;
        };
        let entry = totals.entry(key).or_default();
        entry.0 += 1;
        if s.correct {
            entry.1 += 1;
        }
    }
    totals
        .into_iter()
        .map(|(key, (total, correct))| CategoryStat {
            category: label(key).to_string(),
            total,
            correct,
            accuracy: percent(correct, total),
        })
        .collect()
}

pub fn match_type_stats(samples: &[Sample]) -> Vec<CategoryStat> {
    category_stats(
        samples,
        |s| {
            let (Some(home), Some(away)) = (s.home_position, s.away_position) else {
                return None;
            };
            Some(classify_match_type(home, away, s.predicted))
        },
        MatchType::label,
    )
}

pub fn position_diff_stats(samples: &[Sample]) -> Vec<CategoryStat> {
    category_stats(
        samples,
        |s| {
            let (Some(home), Some(away)) = (s.home_position, s.away_position) else {
                return None;
            };
            Some(classify_position_band(home, away))
        },
        PositionBand::label,
    )
}

/// Correct/total as a percentage, with the 0-not-NaN guard on empty input.
pub fn percent(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64 * 100.0
    }
}

/// Human-readable flags over the three aggregate views. Buckets below the
/// sample floor are not judged.
pub fn insights(
    buckets: &[BucketStat],
    match_types: &[CategoryStat],
    bands: &[CategoryStat],
) -> Vec<String> {
    let mut out = Vec::new();

    for b in buckets {
        if b.total < INSIGHT_MIN_BUCKET_SAMPLES {
            continue;
        }
        if b.calibration_error > OVERCONFIDENT_ERROR {
            out.push(format!(
                "Bucket {}: over-confident ({:.1}% accuracy vs {:.0} nominal, {} samples)",
                b.bucket,
                b.accuracy,
                bucket_midpoint(b.bucket_start),
                b.total
            ));
        } else if b.calibration_error < UNDERCONFIDENT_ERROR {
            out.push(format!(
                "Bucket {}: under-confident ({:.1}% accuracy vs {:.0} nominal, {} samples)",
                b.bucket,
                b.accuracy,
                bucket_midpoint(b.bucket_start),
                b.total
            ));
        } else if b.calibration_error.abs() <= WELL_CALIBRATED_BAND {
            out.push(format!(
                "Bucket {}: well-calibrated ({:.1}% accuracy, {} samples)",
                b.bucket, b.accuracy, b.total
            ));
        }
    }

    for c in match_types {
        match c.category.as_str() {
            "underdog_pick" if c.total >= UNDERDOG_MIN_SAMPLES => {
                if c.accuracy < UNDERDOG_AVOID_ACCURACY {
                    out.push(format!(
                        "Underdog picks: avoid ({:.1}% over {} picks)",
                        c.accuracy, c.total
                    ));
                } else if c.accuracy > UNDERDOG_VALUE_ACCURACY {
                    out.push(format!(
                        "Underdog picks: finding value ({:.1}% over {} picks)",
                        c.accuracy, c.total
                    ));
                }
            }
            "home_favorite"
                if c.total >= FAVORITE_MIN_SAMPLES
                    && c.accuracy > FAVORITE_RELIABLE_ACCURACY =>
            {
                out.push(format!(
                    "Home-favorite picks: reliable ({:.1}% over {} picks)",
                    c.accuracy, c.total
                ));
            }
            _ => {}
        }
    }

    for c in bands {
        if c.total < FAVORITE_MIN_SAMPLES {
            continue;
        }
        match c.category.as_str() {
            "large_home_fav" => {
                if c.accuracy > LARGE_FAV_RELIABLE_ACCURACY {
                    out.push(format!(
                        "Large home favorites: very reliable ({:.1}% over {})",
                        c.accuracy, c.total
                    ));
                } else if c.accuracy < LARGE_FAV_WEAK_ACCURACY {
                    out.push(format!(
                        "Large home favorites: underperforming ({:.1}% over {})",
                        c.accuracy, c.total
                    ));
                }
            }
            "even_match" => {
                if c.accuracy < EVEN_MATCH_WEAK_ACCURACY {
                    out.push(format!(
                        "Even matches: coin-flip territory ({:.1}% over {}), consider lower confidence",
                        c.accuracy, c.total
                    ));
                } else if c.accuracy > EVEN_MATCH_STRONG_ACCURACY {
                    out.push(format!(
                        "Even matches: strong edge ({:.1}% over {})",
                        c.accuracy, c.total
                    ));
                }
            }
            _ => {}
        }
    }

    out
}
