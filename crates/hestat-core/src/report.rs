//! Serializable analytics responses.
//!
//! Every metric that may be unavailable is an `Option` and serializes as
//! JSON `null`. Cross-institution comparisons are wrapped in
//! [`Comparison`] so that a population too small to rank against reports
//! `insufficient_data` instead of a misleading number.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
  fact::{EquityGroup, EquityMeasure, StaffRatioFact},
  field::FieldOfEducation,
  institution::{Institution, InstitutionId},
  stats::{
    self, RatioDirection, RiskLevel, RiskTier, SupportLabel, TeachingIntensity, TrendDirection,
  },
};

/// Minimum number of institutions a comparison needs.
pub const MIN_POPULATION: usize = 2;

// ─── Comparison ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Comparison<T> {
  Ranked(T),
  InsufficientData { available: usize },
}

impl<T> Comparison<T> {
  /// `Ranked(make())` when `available` meets [`MIN_POPULATION`].
  pub fn gate(available: usize, make: impl FnOnce() -> T) -> Self {
    if available < MIN_POPULATION {
      Self::InsufficientData { available }
    } else {
      Self::Ranked(make())
    }
  }

  pub fn ranked(&self) -> Option<&T> {
    match self {
      Self::Ranked(t) => Some(t),
      Self::InsufficientData { .. } => None,
    }
  }
}

// ─── Shared pieces ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
  pub id:    i64,
  pub field: FieldOfEducation,
  pub name:  String,
}

impl From<FieldOfEducation> for FieldSummary {
  fn from(field: FieldOfEducation) -> Self {
    Self { id: field.id(), field, name: field.to_string() }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct YearRate {
  pub rate: Option<f64>,
  pub year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearValue {
  pub year:  i32,
  pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearPoint {
  pub year: i32,
  pub rate: f64,
}

// ─── Institution report ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstitutionReport {
  pub institution:         Institution,
  pub field:               Option<FieldSummary>,
  pub completion:          CompletionProbability,
  pub attrition:           AttritionRisk,
  pub retention:           YearRate,
  pub success:             YearRate,
  pub trend:               AttritionTrend,
  pub completion_timeline: CompletionTimeline,
  pub field_context:       Option<FieldContext>,
  pub international:       Option<InternationalBlock>,
  pub course_level:        Option<CourseLevelReport>,
  pub staff_ratio:         Option<StaffRatio>,
}

/// Latest cohort completion percentages and the four-year breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionProbability {
  pub four_year_pct:          Option<f64>,
  pub six_year_pct:           Option<f64>,
  pub nine_year_pct:          Option<f64>,
  pub national_avg_four_year: Option<f64>,
  /// `"2015-2020"` style label of the four-year cohort.
  pub cohort_period:          Option<String>,
  pub still_enrolled_pct:     Option<f64>,
  pub dropped_out_pct:        Option<f64>,
  pub never_returned_pct:     Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttritionRisk {
  pub latest_rate:  Option<f64>,
  pub latest_year:  Option<i32>,
  pub national_avg: Option<f64>,
  /// Absent when the institution has no domestic attrition data at all.
  pub standing:     Option<Comparison<AttritionStanding>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttritionStanding {
  pub percentile: f64,
  pub risk_level: RiskLevel,
  pub population: usize,
}

impl AttritionStanding {
  /// Rank `rate` within the same-year population.
  pub fn compute(rate: f64, population: &[f64]) -> Comparison<Self> {
    Comparison::gate(population.len(), || {
      let percentile = stats::percentile_rank(rate, population).unwrap_or(50.0);
      let percentile = stats::round_to(percentile, 1);
      Self {
        percentile,
        risk_level: RiskLevel::from_percentile(percentile),
        population: population.len(),
      }
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttritionTrend {
  pub years:           Vec<i32>,
  pub attrition_rates: Vec<f64>,
  pub direction:       TrendDirection,
  pub slope:           Option<f64>,
}

impl AttritionTrend {
  /// Build from a series sorted by ascending year.
  pub fn from_series(series: &[(i32, f64)]) -> Self {
    let series = &series[series.len().saturating_sub(stats::TREND_DISPLAY)..];
    let (slope, direction) = stats::trend(series);
    Self {
      years: series.iter().map(|(y, _)| *y).collect(),
      attrition_rates: series.iter().map(|(_, r)| stats::round_to(*r, 2)).collect(),
      direction,
      slope: slope.map(|s| stats::round_to(s, 3)),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimelineEntry {
  pub pct:          Option<f64>,
  pub period:       Option<String>,
  pub national_avg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionTimeline {
  pub four_year: TimelineEntry,
  pub six_year:  TimelineEntry,
  pub nine_year: TimelineEntry,
}

// ── Field context ──

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldContext {
  pub year:              Option<i32>,
  pub enrolment:         Option<i64>,
  pub total_enrolment:   Option<i64>,
  pub field_share_pct:   Option<f64>,
  pub completions:       Option<i64>,
  pub total_completions: Option<i64>,
  pub completion_ratio:  Option<f64>,
  pub enrolment_trend:   Vec<YearValue>,
  pub completions_trend: Vec<YearValue>,
  pub ranking:           Option<Comparison<FieldRanking>>,
}

/// One eligible institution's enrolment and completions in a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldRow {
  pub id:        InstitutionId,
  pub name:      String,
  pub enrolled:  i64,
  pub graduates: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedInstitution {
  pub rank:      usize,
  pub id:        InstitutionId,
  pub name:      String,
  pub enrolled:  i64,
  pub graduates: i64,
  pub ratio:     f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankPosition {
  pub rank:  Option<usize>,
  pub of:    usize,
  pub ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldRanking {
  pub this_institution:   RankPosition,
  pub top_5:              Vec<RankedInstitution>,
  /// Empty unless more than five institutions are ranked.
  pub bottom_5:           Vec<RankedInstitution>,
  pub national_avg_ratio: f64,
}

impl FieldRanking {
  /// Rank `rows` by graduation ratio, highest first, ties by name. Rows
  /// below [`stats::MIN_ENROLLED`] are excluded before ranking.
  pub fn rank(rows: Vec<FieldRow>, subject: InstitutionId) -> Comparison<Self> {
    let mut ranked: Vec<RankedInstitution> = rows
      .into_iter()
      .filter(|r| r.enrolled >= stats::MIN_ENROLLED)
      .filter_map(|r| {
        let ratio = stats::graduation_ratio(r.graduates, r.enrolled)?;
        Some(RankedInstitution {
          rank: 0,
          id: r.id,
          name: r.name,
          enrolled: r.enrolled,
          graduates: r.graduates,
          ratio: stats::round_to(ratio, 1),
        })
      })
      .collect();

    Comparison::gate(ranked.len(), move || {
      ranked.sort_by(|a, b| b.ratio.total_cmp(&a.ratio).then_with(|| a.name.cmp(&b.name)));
      for (i, entry) in ranked.iter_mut().enumerate() {
        entry.rank = i + 1;
      }

      let ratios: Vec<f64> = ranked.iter().map(|r| r.ratio).collect();
      let national_avg_ratio = stats::round_to(stats::mean(&ratios).unwrap_or(0.0), 1);
      let this = ranked.iter().find(|r| r.id == subject);
      let this_institution = RankPosition {
        rank:  this.map(|r| r.rank),
        of:    ranked.len(),
        ratio: this.map(|r| r.ratio),
      };

      let top_5 = ranked.iter().take(5).cloned().collect();
      let bottom_5 = if ranked.len() > 5 {
        ranked[ranked.len() - 5..].to_vec()
      } else {
        Vec::new()
      };

      Self { this_institution, top_5, bottom_5, national_avg_ratio }
    })
  }
}

// ── International ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BenchmarkedRate {
  pub rate:         Option<f64>,
  pub year:         Option<i32>,
  pub national_avg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternationalBlock {
  pub attrition: BenchmarkedRate,
  pub retention: BenchmarkedRate,
  pub success:   BenchmarkedRate,
  /// Up to five most recent overseas attrition rates, oldest first.
  pub trend:     Vec<YearPoint>,
}

// ── Student-staff ratio ──

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StaffRatioPoint {
  pub year:         i32,
  pub academic:     f64,
  pub non_academic: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StaffStanding {
  pub percentile: f64,
  pub intensity:  TeachingIntensity,
  pub population: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffRatio {
  pub year:                      i32,
  pub academic_ratio:            f64,
  pub non_academic_ratio:        Option<f64>,
  pub eftsl:                     Option<f64>,
  pub academic_fte:              Option<f64>,
  pub non_academic_fte:          Option<f64>,
  pub national_avg_academic:     Option<f64>,
  pub national_avg_non_academic: Option<f64>,
  pub standing:                  Comparison<StaffStanding>,
  /// Every year with an academic ratio, oldest first.
  pub trend:                     Vec<StaffRatioPoint>,
  pub direction:                 RatioDirection,
  pub slope:                     Option<f64>,
}

impl StaffRatio {
  /// Build from the institution's rows (ascending year) and the
  /// `(academic, non-academic)` ratios of every institution in the latest
  /// year. Peers below [`stats::MIN_STAFF_RATIO`] are left out of the
  /// averages and the percentile.
  ///
  /// `None` when no row has an academic ratio.
  pub fn build(series: &[StaffRatioFact], peers: &[(f64, Option<f64>)]) -> Option<Self> {
    let rated: Vec<(&StaffRatioFact, f64)> = series
      .iter()
      .filter_map(|f| f.academic_ratio.map(|r| (f, r)))
      .collect();
    let &(latest, academic_ratio) = rated.last()?;

    let peers: Vec<(f64, Option<f64>)> = peers
      .iter()
      .copied()
      .filter(|(academic, _)| *academic >= stats::MIN_STAFF_RATIO)
      .collect();
    let academic: Vec<f64> = peers.iter().map(|(a, _)| *a).collect();
    let non_academic: Vec<f64> = peers.iter().filter_map(|(_, n)| *n).collect();
    let avg = |values: &[f64]| stats::mean(values).map(|m| stats::round_to(m, 1));

    let standing = Comparison::gate(academic.len(), || {
      let percentile = stats::percentile_rank(academic_ratio, &academic).unwrap_or(50.0);
      let percentile = stats::round_to(percentile, 1);
      StaffStanding {
        percentile,
        intensity: TeachingIntensity::from_percentile(percentile),
        population: academic.len(),
      }
    });

    let points: Vec<(i32, f64)> = rated.iter().map(|(f, r)| (f.year, *r)).collect();
    let (slope, direction) = stats::ratio_trend(&points);
    let round = |v: Option<f64>, places| v.map(|v| stats::round_to(v, places));

    Some(Self {
      year: latest.year,
      academic_ratio: stats::round_to(academic_ratio, 2),
      non_academic_ratio: round(latest.non_academic_ratio, 2),
      eftsl: round(latest.eftsl, 1),
      academic_fte: round(latest.academic_fte, 1),
      non_academic_fte: round(latest.non_academic_fte, 1),
      national_avg_academic: avg(&academic),
      national_avg_non_academic: avg(&non_academic),
      standing,
      trend: rated
        .iter()
        .map(|(f, r)| StaffRatioPoint {
          year:         f.year,
          academic:     stats::round_to(*r, 1),
          non_academic: round(f.non_academic_ratio, 1),
        })
        .collect(),
      direction,
      slope: slope.map(|s| stats::round_to(s, 3)),
    })
  }
}

// ── Course level mix ──

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelShares {
  pub pct_postgrad_research:   f64,
  pub pct_postgrad_coursework: f64,
  pub pct_bachelor:            f64,
  pub pct_sub_bachelor:        f64,
}

impl LevelShares {
  /// Shares of the four displayed levels, in the order postgraduate
  /// research, postgraduate coursework, bachelor, sub-bachelor. The
  /// denominator is their sum so the shares total 100.
  pub fn from_counts(counts: [i64; 4]) -> Option<Self> {
    let sum: i64 = counts.iter().sum();
    if sum <= 0 {
      return None;
    }
    let pct = |n: i64| stats::round_to(n as f64 / sum as f64 * 100.0, 1);
    Some(Self {
      pct_postgrad_research:   pct(counts[0]),
      pct_postgrad_coursework: pct(counts[1]),
      pct_bachelor:            pct(counts[2]),
      pct_sub_bachelor:        pct(counts[3]),
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelBreakdown {
  pub year:                i32,
  pub postgrad_research:   i64,
  pub postgrad_coursework: i64,
  pub bachelor:            i64,
  pub sub_bachelor:        i64,
  pub total:               i64,
  #[serde(flatten)]
  pub shares:              LevelShares,
}

impl LevelBreakdown {
  /// `None` when the published total is missing or zero.
  pub fn new(year: i32, counts: [Option<i64>; 4], total: Option<i64>) -> Option<Self> {
    let total = total.filter(|t| *t > 0)?;
    let [pr, pc, ba, sb] = counts.map(|c| c.unwrap_or(0));
    let shares = LevelShares::from_counts([pr, pc, ba, sb]).unwrap_or(LevelShares {
      pct_postgrad_research:   0.0,
      pct_postgrad_coursework: 0.0,
      pct_bachelor:            0.0,
      pct_sub_bachelor:        0.0,
    });
    Some(Self {
      year,
      postgrad_research: pr,
      postgrad_coursework: pc,
      bachelor: ba,
      sub_bachelor: sb,
      total,
      shares,
    })
  }
}

/// Completions per hundred enrolments at each level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelEfficiency {
  pub postgrad_research:   Option<f64>,
  pub postgrad_coursework: Option<f64>,
  pub bachelor:            Option<f64>,
  pub sub_bachelor:        Option<f64>,
  pub overall:             Option<f64>,
}

impl LevelEfficiency {
  pub fn between(enrolment: &LevelBreakdown, completion: &LevelBreakdown) -> Self {
    let eff = |c: i64, e: i64| stats::graduation_ratio(c, e).map(|r| stats::round_to(r, 1));
    Self {
      postgrad_research:   eff(completion.postgrad_research, enrolment.postgrad_research),
      postgrad_coursework: eff(completion.postgrad_coursework, enrolment.postgrad_coursework),
      bachelor:            eff(completion.bachelor, enrolment.bachelor),
      sub_bachelor:        eff(completion.sub_bachelor, enrolment.sub_bachelor),
      overall:             eff(completion.total, enrolment.total),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseLevelReport {
  pub enrolment:              Option<LevelBreakdown>,
  pub completion:             Option<LevelBreakdown>,
  pub national_avg_enrolment: Option<LevelShares>,
  pub efficiency:             Option<LevelEfficiency>,
}

// ─── Field heatmap ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldHeatmap {
  pub field:           FieldSummary,
  pub attrition_year:  Option<i32>,
  pub enrolment_year:  Option<i32>,
  pub heatmap:         Comparison<Heatmap>,
}

/// Attrition and graduation figures of one institution before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapInput {
  pub institution_id:   InstitutionId,
  pub institution_name: String,
  pub state:            Option<String>,
  pub attrition_rate:   f64,
  pub enrolled:         i64,
  pub completions:      i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapEntry {
  pub institution_id:   InstitutionId,
  pub institution_name: String,
  pub state:            Option<String>,
  pub attrition_rate:   f64,
  pub grad_ratio:       f64,
  pub composite_risk:   f64,
  pub risk_tier:        RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapSummary {
  pub num_institutions:       usize,
  pub avg_risk:               f64,
  pub min_risk:               f64,
  pub max_risk:               f64,
  pub best_institution_name:  String,
  pub worst_institution_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heatmap {
  /// Safest first.
  pub entries: Vec<HeatmapEntry>,
  pub summary: HeatmapSummary,
}

impl Heatmap {
  /// Score, filter and sort. Institutions below [`stats::MIN_ENROLLED`]
  /// are dropped.
  pub fn build(inputs: Vec<HeatmapInput>) -> Comparison<Self> {
    let mut entries: Vec<HeatmapEntry> = inputs
      .into_iter()
      .filter(|i| i.enrolled >= stats::MIN_ENROLLED)
      .map(|i| {
        let ratio = stats::graduation_ratio(i.completions, i.enrolled).unwrap_or(0.0);
        let grad_ratio = stats::round_to(ratio.min(100.0), 1);
        let composite = stats::round_to(stats::composite_risk(i.attrition_rate, grad_ratio), 2);
        HeatmapEntry {
          institution_id: i.institution_id,
          institution_name: i.institution_name,
          state: i.state,
          attrition_rate: stats::round_to(i.attrition_rate, 2),
          grad_ratio,
          composite_risk: composite,
          risk_tier: RiskTier::from_score(composite),
        }
      })
      .collect();

    entries.sort_by(|a, b| {
      a.composite_risk
        .total_cmp(&b.composite_risk)
        .then_with(|| a.institution_name.cmp(&b.institution_name))
    });

    let (Some(best), Some(worst)) = (entries.first(), entries.last()) else {
      return Comparison::InsufficientData { available: 0 };
    };
    let risks: Vec<f64> = entries.iter().map(|e| e.composite_risk).collect();
    let summary = HeatmapSummary {
      num_institutions:       entries.len(),
      avg_risk:               stats::round_to(stats::mean(&risks).unwrap_or(0.0), 2),
      min_risk:               risks.iter().copied().fold(f64::INFINITY, f64::min),
      max_risk:               risks.iter().copied().fold(f64::NEG_INFINITY, f64::max),
      best_institution_name:  best.institution_name.clone(),
      worst_institution_name: worst.institution_name.clone(),
    };

    Comparison::gate(entries.len(), || Self { entries, summary })
  }
}

// ─── Equity report ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GapRate {
  pub rate:         Option<f64>,
  pub national_avg: Option<f64>,
  /// Institution minus national average; positive is better.
  pub gap:          Option<f64>,
}

impl GapRate {
  pub fn new(rate: Option<f64>, national_avg: Option<f64>) -> Self {
    let rate = rate.map(|r| stats::round_to(r, 2));
    let national_avg = national_avg.map(|r| stats::round_to(r, 2));
    let gap = match (rate, national_avg) {
      (Some(r), Some(n)) => Some(stats::round_to(r - n, 2)),
      _ => None,
    };
    Self { rate, national_avg, gap }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EquityMeasures {
  pub retention:  GapRate,
  pub success:    GapRate,
  pub attainment: GapRate,
}

impl EquityMeasures {
  pub fn get_mut(&mut self, measure: EquityMeasure) -> &mut GapRate {
    match measure {
      EquityMeasure::Retention => &mut self.retention,
      EquityMeasure::Success => &mut self.success,
      EquityMeasure::Attainment => &mut self.attainment,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityTrendPoint {
  pub year:      i32,
  pub retention: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EquityGroupReport {
  pub label:    &'static str,
  #[serde(flatten)]
  pub measures: EquityMeasures,
  /// Up to five most recent retention rates, oldest first.
  pub trend:    Vec<EquityTrendPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SupportSummary {
  pub groups_above_avg: u32,
  pub groups_total:     u32,
  pub overall_label:    SupportLabel,
}

impl SupportSummary {
  /// Score the retention gaps of the scored groups. Groups without a gap
  /// do not count towards the total.
  pub fn from_retention_gaps(gaps: impl IntoIterator<Item = Option<f64>>) -> Self {
    let (above, total) = gaps
      .into_iter()
      .flatten()
      .fold((0u32, 0u32), |(a, t), gap| (a + u32::from(gap >= 0.0), t + 1));
    Self {
      groups_above_avg: above,
      groups_total:     total,
      overall_label:    SupportLabel::from_counts(above, total),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityReport {
  pub institution:     Institution,
  pub latest_year:     BTreeMap<EquityMeasure, i32>,
  pub groups:          BTreeMap<EquityGroup, EquityGroupReport>,
  pub all_domestic:    EquityMeasures,
  pub support_summary: SupportSummary,
}
