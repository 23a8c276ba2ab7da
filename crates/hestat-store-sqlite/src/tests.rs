//! Integration tests for `SqliteStore` against an in-memory database.

use hestat_core::{
  Error as CoreError,
  fact::{
    AttritionFact, CompletionFact, CompletionRateFact, CourseLevel, EnrolmentFact, EquityFact,
    EquityGroup, EquityMeasure, FactRow, RateMeasure, StaffRatioFact, StudentType,
  },
  field::FieldOfEducation,
  institution::{InstitutionId, NewInstitution},
  report::{Comparison, RankPosition},
  source::{Classification, Section, SourceFile, SupersedePolicy, Variant},
  stats::{RatioDirection, RiskLevel, RiskTier, SupportLabel, TeachingIntensity},
  store::StatsStore,
};
use hestat_sheets::{Cell, Sheet, Workbook};

use crate::{Error, LoadOptions, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn institution(s: &SqliteStore, code: &str, name: &str) -> InstitutionId {
  s.add_institution(NewInstitution {
    code:          code.into(),
    name:          name.into(),
    state:         Some("NSW".into()),
    provider_type: Some("Table A".into()),
  })
  .await
  .unwrap()
}

fn classification(section: Section, year: Option<i32>) -> Classification {
  Classification { section, year, variant: Variant::Consolidated }
}

fn attrition(id: InstitutionId, year: i32, student_type: StudentType, rate: f64) -> FactRow {
  FactRow::Attrition(AttritionFact {
    institution_id: id,
    year,
    student_type,
    measure: RateMeasure::Attrition,
    rate,
  })
}

fn enrolment(id: InstitutionId, field: FieldOfEducation, year: i32, headcount: i64) -> FactRow {
  FactRow::Enrolment(EnrolmentFact {
    institution_id: id,
    year,
    field,
    course_level: CourseLevel::All,
    student_type: StudentType::All,
    commencing: false,
    headcount: Some(headcount),
    eftsl: None,
  })
}

fn completion(id: InstitutionId, field: FieldOfEducation, year: i32, headcount: i64) -> FactRow {
  FactRow::Completion(CompletionFact {
    institution_id: id,
    year,
    field,
    course_level: CourseLevel::All,
    headcount,
  })
}

async fn load(
  s: &SqliteStore,
  name: &str,
  section: Section,
  year: Option<i32>,
  facts: Vec<FactRow>,
) {
  s.ingest_facts(
    facts,
    SourceFile::named(name),
    classification(section, year),
    SupersedePolicy::IngestionOrder,
  )
  .await
  .unwrap();
}

// ─── Workbook ingestion ──────────────────────────────────────────────────────

fn t(s: &str) -> Cell { Cell::text(s) }
fn n(v: f64) -> Cell { Cell::Number(v) }

fn two_sheet_workbook() -> Workbook {
  Workbook::from_sheets(vec![
    Sheet::new("15.1", vec![
      vec![t("Table 15.1: Attrition rate for domestic commencing bachelor students")],
      vec![t("State"), t("Institution"), n(2020.0)],
      vec![t("NSW"), t("University of Technology Sydney (3040)"), n(12.5)],
    ]),
    Sheet::new("15.2", vec![
      vec![t("Table 15.2: Attrition rate for overseas commencing bachelor students")],
      vec![t("State"), t("Institution"), n(2021.0)],
      vec![t("NSW"), t("UTS (3040)"), n(9.75)],
    ]),
  ])
}

#[tokio::test]
async fn workbook_spellings_resolve_to_one_institution() {
  let s = store().await;
  let report = s
    .ingest(
      two_sheet_workbook(),
      SourceFile::named("attrition_2022.xlsx"),
      classification(Section::AttritionRetention, Some(2022)),
      LoadOptions::default(),
    )
    .await
    .unwrap();
  assert_eq!(report.rows_written, 2);
  assert_eq!(report.sheets_parsed, 2);

  let all = s.list_institutions().await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].code.as_deref(), Some("3040"));
  assert_eq!(all[0].state.as_deref(), Some("NSW"));

  let by_name = s.find_institution("University of Technology Sydney".into()).await.unwrap();
  let by_short = s.find_institution("uts".into()).await.unwrap();
  let by_code = s.find_institution("3040".into()).await.unwrap();
  assert_eq!(by_name.as_ref().map(|i| i.id), Some(all[0].id));
  assert_eq!(by_short.as_ref().map(|i| i.id), Some(all[0].id));
  assert_eq!(by_code.map(|i| i.id), Some(all[0].id));

  let card = s.institution_report(all[0].id, None).await.unwrap().unwrap();
  assert_eq!(card.attrition.latest_year, Some(2020));
  assert_eq!(card.attrition.latest_rate, Some(12.5));
  let intl = card.international.expect("overseas data");
  assert_eq!(intl.attrition.year, Some(2021));
  assert_eq!(intl.attrition.rate, Some(9.75));
}

#[tokio::test]
async fn reingesting_a_workbook_is_idempotent() {
  let s = store().await;
  let c = classification(Section::AttritionRetention, Some(2022));
  let first = s
    .ingest(two_sheet_workbook(), SourceFile::named("a.xlsx"), c, LoadOptions::default())
    .await
    .unwrap();
  let second = s
    .ingest(two_sheet_workbook(), SourceFile::named("a.xlsx"), c, LoadOptions::default())
    .await
    .unwrap();
  assert_eq!(first.rows_written + first.rows_kept, second.rows_written + second.rows_kept);

  let all = s.list_institutions().await.unwrap();
  assert_eq!(all.len(), 1);
  let card = s.institution_report(all[0].id, None).await.unwrap().unwrap();
  assert_eq!(card.trend.years, [2020]);
  assert_eq!(s.ingestion_records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_file_leaves_no_trace() {
  let s = store().await;
  let good = institution(&s, "3001", "Good University").await;
  let err = s
    .ingest_facts(
      vec![
        attrition(good, 2022, StudentType::Domestic, 10.0),
        attrition(InstitutionId(999), 2022, StudentType::Domestic, 11.0),
      ],
      SourceFile::named("bad.xlsx"),
      classification(Section::AttritionRetention, Some(2023)),
      SupersedePolicy::IngestionOrder,
    )
    .await
    .unwrap_err();
  assert!(err.is_integrity_violation());

  let card = s.institution_report(good, None).await.unwrap().unwrap();
  assert_eq!(card.attrition.latest_rate, None);
  assert!(s.ingestion_record("bad.xlsx".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn ingestion_record_keeps_digest() {
  let s = store().await;
  let id = institution(&s, "3001", "Alpha University").await;
  let mut source = SourceFile::named("attrition_2023.xlsx");
  source.digest = Some("ab12".into());
  let report = s
    .ingest_facts(
      vec![attrition(id, 2022, StudentType::Domestic, 10.0)],
      source,
      classification(Section::AttritionRetention, Some(2023)),
      SupersedePolicy::IngestionOrder,
    )
    .await
    .unwrap();
  assert_eq!(report.rows_written, 1);

  let record = s.ingestion_record("attrition_2023.xlsx".into()).await.unwrap().unwrap();
  assert_eq!(record.digest.as_deref(), Some("ab12"));
  assert_eq!(record.row_count, 1);
  assert_eq!(record.section, Section::AttritionRetention);
  assert_eq!(record.data_year, Some(2023));
}

// ─── Supersede policies ──────────────────────────────────────────────────────

async fn load_two_releases(policy: SupersedePolicy) -> (SqliteStore, InstitutionId, u64) {
  let s = store().await;
  let id = institution(&s, "3001", "Alpha University").await;
  let release = |file: &str, year, rate| {
    s.ingest_facts(
      vec![attrition(id, 2021, StudentType::Domestic, rate)],
      SourceFile::named(file),
      classification(Section::AttritionRetention, Some(year)),
      policy,
    )
  };
  release("newer.xlsx", 2023, 10.0).await.unwrap();
  let older = release("older.xlsx", 2022, 20.0).await.unwrap();
  (s, id, older.rows_kept)
}

#[tokio::test]
async fn ingestion_order_lets_the_last_file_win() {
  let (s, id, kept) = load_two_releases(SupersedePolicy::IngestionOrder).await;
  assert_eq!(kept, 0);
  let card = s.institution_report(id, None).await.unwrap().unwrap();
  assert_eq!(card.attrition.latest_rate, Some(20.0));
}

#[tokio::test]
async fn publication_year_keeps_the_newer_release() {
  let (s, id, kept) = load_two_releases(SupersedePolicy::PublicationYear).await;
  assert_eq!(kept, 1);
  let card = s.institution_report(id, None).await.unwrap().unwrap();
  assert_eq!(card.attrition.latest_rate, Some(10.0));
}

// ─── Institutions and aliases ────────────────────────────────────────────────

#[tokio::test]
async fn alias_conflict_needs_override() {
  let s = store().await;
  let a = institution(&s, "3001", "Alpha University").await;
  let b = institution(&s, "3002", "Bravo University").await;
  s.register_alias("AU".into(), a, false).await.unwrap();

  let err = s.register_alias("au".into(), b, false).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Core(CoreError::AliasConflict { existing, .. }) if existing == a
  ));

  s.register_alias("AU".into(), b, true).await.unwrap();
  let found = s.find_institution("AU".into()).await.unwrap().unwrap();
  assert_eq!(found.id, b);
}

#[tokio::test]
async fn alias_for_unknown_institution_is_rejected() {
  let s = store().await;
  let err = s.register_alias("Ghost".into(), InstitutionId(42), false).await.unwrap_err();
  assert!(err.is_integrity_violation());
}

#[tokio::test]
async fn reissued_code_keeps_history_on_one_institution() {
  let s = store().await;
  let a = institution(&s, "3001", "Alpha University").await;
  let b = institution(&s, "3002", "Bravo University").await;
  load(&s, "f1.xlsx", Section::AttritionRetention, Some(2022), vec![attrition(
    a,
    2021,
    StudentType::Domestic,
    10.0,
  )])
  .await;

  s.reissue_code(a, "4001".into()).await.unwrap();
  let found = s.find_institution("4001".into()).await.unwrap().unwrap();
  assert_eq!(found.id, a);
  assert_eq!(found.name, "Alpha University");

  let err = s.reissue_code(b, "4001".into()).await.unwrap_err();
  assert!(err.is_integrity_violation());

  let card = s.institution_report(a, None).await.unwrap().unwrap();
  assert_eq!(card.attrition.latest_rate, Some(10.0));
}

#[tokio::test]
async fn missing_institution_has_no_report() {
  let s = store().await;
  assert!(s.institution_report(InstitutionId(7), None).await.unwrap().is_none());
  assert!(s.equity_report(InstitutionId(7)).await.unwrap().is_none());
  assert!(s.find_institution("nobody".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn fields_are_seeded() {
  let s = store().await;
  let fields = s.list_fields().await.unwrap();
  assert_eq!(fields.len(), 10);
  assert_eq!(fields[1].field, FieldOfEducation::InformationTechnology);
  assert_eq!(fields[1].name, "Information Technology");
}

// ─── Institution report ──────────────────────────────────────────────────────

#[tokio::test]
async fn attrition_standing_needs_a_population() {
  let s = store().await;
  let a = institution(&s, "3001", "Alpha University").await;
  load(&s, "f1.xlsx", Section::AttritionRetention, Some(2022), vec![attrition(
    a,
    2021,
    StudentType::Domestic,
    15.0,
  )])
  .await;

  let card = s.institution_report(a, None).await.unwrap().unwrap();
  assert_eq!(card.attrition.standing, Some(Comparison::InsufficientData { available: 1 }));
  assert_eq!(card.attrition.national_avg, Some(15.0));
  assert!(card.international.is_none());

  let b = institution(&s, "3002", "Bravo University").await;
  let c = institution(&s, "3003", "Charlie University").await;
  load(&s, "f2.xlsx", Section::AttritionRetention, Some(2022), vec![
    attrition(b, 2021, StudentType::Domestic, 5.0),
    attrition(c, 2021, StudentType::Domestic, 25.0),
  ])
  .await;

  let card = s.institution_report(a, None).await.unwrap().unwrap();
  let standing = card.attrition.standing.unwrap();
  let ranked = standing.ranked().expect("ranked");
  assert_eq!(ranked.percentile, 50.0);
  assert_eq!(ranked.risk_level, RiskLevel::High);
  assert_eq!(ranked.population, 3);
  assert_eq!(card.attrition.national_avg, Some(15.0));
}

#[tokio::test]
async fn completion_probability_uses_latest_cohorts() {
  let s = store().await;
  let a = institution(&s, "3001", "Alpha University").await;
  let b = institution(&s, "3002", "Bravo University").await;
  let cohort = |id, start, duration: u8, pct| {
    FactRow::CompletionRate(CompletionRateFact {
      institution_id:     id,
      cohort_start:       start,
      cohort_end:         start + i32::from(duration),
      duration_years:     duration,
      completed_pct:      Some(pct),
      still_enrolled_pct: Some(10.0),
      dropped_out_pct:    Some(15.0),
      never_returned_pct: Some(5.0),
    })
  };
  load(&s, "cohort.xlsx", Section::CompletionRates, Some(2023), vec![
    cohort(a, 2014, 4, 40.0),
    cohort(a, 2015, 4, 45.04),
    cohort(a, 2012, 6, 60.0),
    cohort(b, 2015, 4, 55.0),
  ])
  .await;

  let card = s.institution_report(a, None).await.unwrap().unwrap();
  assert_eq!(card.completion.four_year_pct, Some(45.0));
  assert_eq!(card.completion.cohort_period.as_deref(), Some("2015-2019"));
  assert_eq!(card.completion.national_avg_four_year, Some(50.0));
  assert_eq!(card.completion.six_year_pct, Some(60.0));
  assert_eq!(card.completion.nine_year_pct, None);
  assert_eq!(card.completion.dropped_out_pct, Some(15.0));
  assert_eq!(card.completion_timeline.six_year.period.as_deref(), Some("2012-2018"));
  assert_eq!(card.completion_timeline.nine_year.pct, None);
}

#[tokio::test]
async fn field_ranking_applies_enrolment_floor() {
  let s = store().await;
  let it = FieldOfEducation::InformationTechnology;
  let alpha = institution(&s, "3001", "Alpha").await;
  let bravo = institution(&s, "3002", "Bravo").await;
  let charlie = institution(&s, "3003", "Charlie").await;
  load(&s, "enrol.xlsx", Section::Enrolments, Some(2022), vec![
    enrolment(alpha, it, 2022, 49),
    enrolment(bravo, it, 2022, 50),
    enrolment(charlie, it, 2022, 100),
    enrolment(bravo, FieldOfEducation::Health, 2022, 150),
  ])
  .await;
  load(&s, "compl.xlsx", Section::Completions, Some(2022), vec![
    completion(alpha, it, 2022, 40),
    completion(bravo, it, 2022, 10),
    completion(charlie, it, 2022, 30),
  ])
  .await;

  let card = s.institution_report(bravo, Some(it)).await.unwrap().unwrap();
  let ctx = card.field_context.expect("field context");
  assert_eq!(ctx.year, Some(2022));
  assert_eq!(ctx.enrolment, Some(50));
  assert_eq!(ctx.total_enrolment, Some(200));
  assert_eq!(ctx.field_share_pct, Some(25.0));
  assert_eq!(ctx.completion_ratio, Some(20.0));

  let ranking = ctx.ranking.unwrap();
  let ranking = ranking.ranked().expect("ranked");
  assert_eq!(ranking.this_institution, RankPosition { rank: Some(2), of: 2, ratio: Some(20.0) });
  assert!(ranking.top_5.iter().all(|r| r.id != alpha));
  assert_eq!(ranking.national_avg_ratio, 25.0);
}

// ─── Heatmap ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn heatmap_scores_composite_risk() {
  let s = store().await;
  let it = FieldOfEducation::InformationTechnology;
  let alpha = institution(&s, "3001", "Alpha").await;
  let bravo = institution(&s, "3002", "Bravo").await;
  load(&s, "attr.xlsx", Section::AttritionRetention, Some(2023), vec![
    attrition(alpha, 2022, StudentType::All, 20.0),
    attrition(bravo, 2022, StudentType::All, 5.0),
  ])
  .await;
  load(&s, "enrol.xlsx", Section::Enrolments, Some(2023), vec![
    enrolment(alpha, it, 2023, 100),
    enrolment(bravo, it, 2023, 100),
  ])
  .await;
  load(&s, "compl.xlsx", Section::Completions, Some(2023), vec![
    completion(alpha, it, 2023, 30),
    completion(bravo, it, 2023, 50),
  ])
  .await;

  let heatmap = s.field_heatmap(it).await.unwrap();
  assert_eq!(heatmap.attrition_year, Some(2022));
  assert_eq!(heatmap.enrolment_year, Some(2023));
  let map = heatmap.heatmap.ranked().expect("ranked");
  assert_eq!(map.entries.len(), 2);
  assert_eq!(map.entries[0].institution_name, "Bravo");
  assert_eq!(map.entries[0].composite_risk, 2.5);
  assert_eq!(map.entries[0].risk_tier, RiskTier::Low);
  assert_eq!(map.entries[1].composite_risk, 14.0);
  assert_eq!(map.entries[1].risk_tier, RiskTier::Medium);
  assert_eq!(map.summary.worst_institution_name, "Alpha");
}

#[tokio::test]
async fn heatmap_without_data_is_insufficient() {
  let s = store().await;
  let heatmap = s.field_heatmap(FieldOfEducation::Health).await.unwrap();
  assert_eq!(heatmap.heatmap, Comparison::InsufficientData { available: 0 });

  let json = serde_json::to_value(&heatmap).unwrap();
  assert_eq!(json["attrition_year"], serde_json::Value::Null);
  assert_eq!(json["heatmap"]["status"], "insufficient_data");
  assert_eq!(json["field"]["name"], "Health");
}

// ─── Equity ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn equity_support_is_mixed_for_four_of_six() {
  let s = store().await;
  let a = institution(&s, "3001", "Alpha").await;
  let b = institution(&s, "3002", "Bravo").await;
  let retention = |id, group, rate| {
    FactRow::Equity(EquityFact {
      institution_id: id,
      year: 2022,
      measure: EquityMeasure::Retention,
      group,
      rate,
    })
  };
  let mut facts = Vec::new();
  for (i, group) in EquityGroup::SCORED.into_iter().enumerate() {
    let rate = if i < 4 { 80.0 } else { 60.0 };
    facts.push(retention(a, group, rate));
    facts.push(retention(b, group, 70.0));
  }
  facts.push(retention(a, EquityGroup::AllDomestic, 85.0));
  facts.push(retention(b, EquityGroup::AllDomestic, 75.0));
  load(&s, "equity.xlsx", Section::Equity, Some(2023), facts).await;

  let report = s.equity_report(a).await.unwrap().unwrap();
  assert_eq!(report.latest_year.get(&EquityMeasure::Retention), Some(&2022));
  assert_eq!(report.support_summary.groups_above_avg, 4);
  assert_eq!(report.support_summary.groups_total, 6);
  assert_eq!(report.support_summary.overall_label, SupportLabel::Mixed);
  assert_eq!(report.all_domestic.retention.gap, Some(5.0));

  let low_ses = &report.groups[&EquityGroup::LowSes];
  assert_eq!(low_ses.measures.retention.national_avg, Some(75.0));
  assert_eq!(low_ses.measures.success.rate, None);
  assert_eq!(low_ses.trend.len(), 1);
}

// ─── Student-staff ratio ─────────────────────────────────────────────────────

fn staff_ratio(id: InstitutionId, year: i32, academic: f64, non_academic: f64) -> FactRow {
  FactRow::StaffRatio(StaffRatioFact {
    institution_id:     id,
    year,
    academic_ratio:     Some(academic),
    non_academic_ratio: Some(non_academic),
    eftsl:              None,
    academic_fte:       None,
    non_academic_fte:   None,
  })
}

fn staff_workbook() -> Workbook {
  let years = || [n(2020.0), n(2021.0), n(2022.0)];
  let header = |blocks: usize| {
    let mut row = vec![t("State"), t("Code"), t("Institution")];
    for _ in 0..blocks {
      row.extend(years());
    }
    row
  };
  let ratios: Vec<Cell> = vec![t("NSW"), n(3005.0), t("Charles Sturt University")]
    .into_iter()
    .chain([n(20.1), n(21.0), n(22.5), n(14.0), t("np"), n(15.2)])
    .collect();
  let counts: Vec<Cell> = vec![t("NSW"), n(3005.0), t("Charles Sturt University")]
    .into_iter()
    .chain([n(20000.0), n(21000.0), n(22000.0)])
    .chain([n(1000.0), n(1050.0), n(980.0), n(1500.0), n(1520.0), n(1450.0)])
    .collect();
  Workbook::from_sheets(vec![
    Sheet::new("A2.1", vec![
      vec![t("Table A2.1: Student-staff ratios")],
      vec![t(""), t(""), t(""), t("Academic"), t(""), t(""), t("Non-academic")],
      header(2),
      ratios,
    ]),
    Sheet::new("A2.2", vec![
      vec![t("Table A2.2: Student load (EFTSL) and staff FTE")],
      vec![
        t(""),
        t(""),
        t(""),
        t("EFTSL"),
        t(""),
        t(""),
        t("Academic"),
        t(""),
        t(""),
        t("Non-academic"),
      ],
      header(3),
      counts,
    ]),
  ])
}

#[tokio::test]
async fn staff_ratio_merges_both_sheets_and_leaves_specialists_out() {
  let s = store().await;
  let report = s
    .ingest(
      staff_workbook(),
      SourceFile::named("2024 Staff A2 Student Staff Ratios_updated.xlsx"),
      classification(Section::StaffRatios, Some(2024)),
      LoadOptions::default(),
    )
    .await
    .unwrap();
  assert_eq!(report.rows_written, 6);
  assert_eq!(report.sheets_parsed, 2);

  let csu = s.find_institution("3005".into()).await.unwrap().expect("created from code");
  let peer = institution(&s, "3001", "Alpha University").await;
  let specialist = institution(&s, "3002", "Bravo College").await;
  load(&s, "peers.xlsx", Section::StaffRatios, Some(2024), vec![
    staff_ratio(peer, 2022, 12.5, 8.0),
    staff_ratio(specialist, 2022, 2.0, 1.0),
  ])
  .await;

  let card = s.institution_report(csu.id, None).await.unwrap().unwrap();
  let staff = card.staff_ratio.expect("staff ratio block");
  assert_eq!(staff.year, 2022);
  assert_eq!(staff.academic_ratio, 22.5);
  assert_eq!(staff.non_academic_ratio, Some(15.2));
  // A2.2 counts land on the A2.1 row of the same year.
  assert_eq!(staff.eftsl, Some(22000.0));
  assert_eq!(staff.academic_fte, Some(980.0));
  assert_eq!(staff.non_academic_fte, Some(1450.0));
  // Bravo College's 2.0 is below the specialist floor.
  assert_eq!(staff.national_avg_academic, Some(17.5));
  assert_eq!(staff.national_avg_non_academic, Some(11.6));
  let standing = staff.standing.ranked().expect("ranked");
  assert_eq!(standing.population, 2);
  assert_eq!(standing.percentile, 75.0);
  assert_eq!(standing.intensity, TeachingIntensity::Low);

  assert_eq!(staff.trend.len(), 3);
  assert_eq!(staff.trend[1].non_academic, None);
  assert_eq!(staff.direction, RatioDirection::Increasing);
  assert_eq!(staff.slope, Some(1.2));

  let alpha = s.institution_report(peer, None).await.unwrap().unwrap();
  let alpha_staff = alpha.staff_ratio.expect("staff ratio block");
  assert_eq!(alpha_staff.direction, RatioDirection::Stable);
  assert_eq!(alpha_staff.slope, None);
}

#[tokio::test]
async fn staff_ratio_absent_without_rows() {
  let s = store().await;
  let a = institution(&s, "3001", "Alpha University").await;
  let card = s.institution_report(a, None).await.unwrap().unwrap();
  assert!(card.staff_ratio.is_none());
}
