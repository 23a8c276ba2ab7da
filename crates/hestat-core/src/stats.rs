//! Pure statistics used by the analytics queries.

use serde::{Deserialize, Serialize};
use strum::Display;

// ─── Rounding and averages ───────────────────────────────────────────────────

/// Round half away from zero to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
  let factor = 10f64.powi(places);
  (value * factor).round() / factor
}

/// Simple (unweighted) mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
  if values.is_empty() {
    None
  } else {
    Some(values.iter().sum::<f64>() / values.len() as f64)
  }
}

// ─── Percentile and risk ─────────────────────────────────────────────────────

/// Midpoint percentile rank of `value` within `population`, in [0, 100].
///
/// Ties count half: `(below + 0.5 × equal) / n × 100`. `None` when the
/// population is empty.
pub fn percentile_rank(value: f64, population: &[f64]) -> Option<f64> {
  if population.is_empty() {
    return None;
  }
  let below = population.iter().filter(|v| **v < value).count() as f64;
  let equal = population.iter().filter(|v| **v == value).count() as f64;
  Some((below + 0.5 * equal) / population.len() as f64 * 100.0)
}

/// Attrition risk band derived from the percentile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum RiskLevel {
  Low,
  Medium,
  High,
  #[serde(rename = "Very High")]
  #[strum(to_string = "Very High")]
  VeryHigh,
}

impl RiskLevel {
  pub fn from_percentile(percentile: f64) -> Self {
    if percentile < 25.0 {
      Self::Low
    } else if percentile < 50.0 {
      Self::Medium
    } else if percentile < 75.0 {
      Self::High
    } else {
      Self::VeryHigh
    }
  }
}

// ─── Trend ───────────────────────────────────────────────────────────────────

/// Points used for the slope.
pub const TREND_WINDOW: usize = 5;
/// Points returned for display.
pub const TREND_DISPLAY: usize = 8;
/// Slopes within ±this many points per year count as stable.
pub const TREND_THRESHOLD: f64 = 0.3;

/// Ordinary least-squares slope of `ys` over `xs`.
///
/// `None` with fewer than two points or when every `x` is equal.
pub fn ols_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
  let n = xs.len().min(ys.len());
  if n < 2 {
    return None;
  }
  let (xs, ys) = (&xs[..n], &ys[..n]);
  let x_mean = xs.iter().sum::<f64>() / n as f64;
  let y_mean = ys.iter().sum::<f64>() / n as f64;
  let num: f64 = xs.iter().zip(ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
  let den: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
  if den == 0.0 { None } else { Some(num / den) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrendDirection {
  Improving,
  Stable,
  Worsening,
  Unknown,
}

impl TrendDirection {
  /// Classify an attrition slope. Falling attrition is an improvement.
  pub fn from_slope(slope: Option<f64>) -> Self {
    match slope {
      None => Self::Unknown,
      Some(s) if s < -TREND_THRESHOLD => Self::Improving,
      Some(s) if s > TREND_THRESHOLD => Self::Worsening,
      Some(_) => Self::Stable,
    }
  }
}

/// Slope and direction over the last [`TREND_WINDOW`] points of a series
/// sorted by ascending year.
pub fn trend(series: &[(i32, f64)]) -> (Option<f64>, TrendDirection) {
  let window = &series[series.len().saturating_sub(TREND_WINDOW)..];
  let xs: Vec<f64> = window.iter().map(|(y, _)| f64::from(*y)).collect();
  let ys: Vec<f64> = window.iter().map(|(_, r)| *r).collect();
  let slope = ols_slope(&xs, &ys);
  (slope, TrendDirection::from_slope(slope))
}

// ─── Field metrics ───────────────────────────────────────────────────────────

/// Institutions with fewer enrolled students in a field are not ranked.
pub const MIN_ENROLLED: i64 = 50;

/// Completions per hundred enrolled students; `None` when nobody is
/// enrolled.
pub fn graduation_ratio(completions: i64, enrolled: i64) -> Option<f64> {
  if enrolled <= 0 {
    None
  } else {
    Some(completions as f64 / enrolled as f64 * 100.0)
  }
}

/// `attrition × (1 − min(ratio, 100) / 100)`.
pub fn composite_risk(attrition: f64, graduation_ratio: f64) -> f64 {
  attrition * (1.0 - graduation_ratio.clamp(0.0, 100.0) / 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskTier {
  Low,
  Medium,
  High,
}

impl RiskTier {
  pub const LOW_MAX: f64 = 10.0;
  pub const MEDIUM_MAX: f64 = 18.0;

  pub fn from_score(score: f64) -> Self {
    if score < Self::LOW_MAX {
      Self::Low
    } else if score < Self::MEDIUM_MAX {
      Self::Medium
    } else {
      Self::High
    }
  }
}

// ─── Equity ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum SupportLabel {
  Strong,
  Mixed,
  Weak,
  #[serde(rename = "No Data")]
  #[strum(to_string = "No Data")]
  NoData,
}

impl SupportLabel {
  /// Label from the number of groups at or above the national average out
  /// of those with a comparable rate. Integer arithmetic keeps the 70 % and
  /// 40 % boundaries exact.
  pub fn from_counts(above: u32, total: u32) -> Self {
    if total == 0 {
      Self::NoData
    } else if above * 10 >= total * 7 {
      Self::Strong
    } else if above * 10 >= total * 4 {
      Self::Mixed
    } else {
      Self::Weak
    }
  }
}

// ─── Staff ratios ────────────────────────────────────────────────────────────

/// Academic ratios below this belong to specialist institutions and are
/// left out of national comparisons.
pub const MIN_STAFF_RATIO: f64 = 3.0;

/// A ratio trend needs at least this many years.
pub const STAFF_TREND_MIN_POINTS: usize = 3;

/// Teaching intensity from the academic-ratio percentile. Fewer students
/// per academic means more intensive teaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum TeachingIntensity {
  #[serde(rename = "Very High")]
  #[strum(to_string = "Very High")]
  VeryHigh,
  High,
  Moderate,
  Low,
}

impl TeachingIntensity {
  pub fn from_percentile(percentile: f64) -> Self {
    if percentile < 25.0 {
      Self::VeryHigh
    } else if percentile < 50.0 {
      Self::High
    } else if percentile < 75.0 {
      Self::Moderate
    } else {
      Self::Low
    }
  }
}

/// Direction of a student-staff ratio over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RatioDirection {
  Increasing,
  Stable,
  Decreasing,
}

/// Slope and direction of a ratio series sorted by ascending year. Short
/// series are stable with no slope.
pub fn ratio_trend(series: &[(i32, f64)]) -> (Option<f64>, RatioDirection) {
  if series.len() < STAFF_TREND_MIN_POINTS {
    return (None, RatioDirection::Stable);
  }
  let (slope, _) = trend(series);
  let direction = match slope {
    Some(s) if s > TREND_THRESHOLD => RatioDirection::Increasing,
    Some(s) if s < -TREND_THRESHOLD => RatioDirection::Decreasing,
    _ => RatioDirection::Stable,
  };
  (slope, direction)
}
