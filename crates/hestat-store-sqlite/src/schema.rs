//! SQL schema for the statistics store.
//!
//! Executed at connection startup. Every fact table carries a uniqueness
//! key over its full dimension tuple; the loader upserts against it.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS` / `OR IGNORE`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS institutions (
    id            INTEGER PRIMARY KEY,
    code          TEXT UNIQUE,
    name          TEXT NOT NULL,
    state         TEXT,
    provider_type TEXT
);

-- Grows monotonically; only an operator override re-points an alias.
CREATE TABLE IF NOT EXISTS institution_aliases (
    alias          TEXT PRIMARY KEY,
    institution_id INTEGER NOT NULL REFERENCES institutions(id)
);

CREATE TABLE IF NOT EXISTS fields_of_education (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

INSERT OR IGNORE INTO fields_of_education (id, name) VALUES
    (1,  'Natural and Physical Sciences'),
    (2,  'Information Technology'),
    (3,  'Engineering and Related Technologies'),
    (4,  'Architecture and Building'),
    (5,  'Agriculture, Environmental and Related Studies'),
    (6,  'Health'),
    (7,  'Education'),
    (8,  'Management and Commerce'),
    (9,  'Society and Culture'),
    (10, 'Creative Arts');

CREATE TABLE IF NOT EXISTS attrition_retention (
    institution_id INTEGER NOT NULL REFERENCES institutions(id),
    year           INTEGER NOT NULL,
    student_type   TEXT    NOT NULL,   -- 'domestic' | 'overseas' | 'all'
    measure        TEXT    NOT NULL,   -- 'attrition' | 'retention' | 'success'
    rate           REAL    NOT NULL,
    source_file    TEXT    NOT NULL,
    source_year    INTEGER,
    UNIQUE (institution_id, year, student_type, measure)
);

CREATE TABLE IF NOT EXISTS completion_rates (
    institution_id     INTEGER NOT NULL REFERENCES institutions(id),
    cohort_start       INTEGER NOT NULL,
    cohort_end         INTEGER NOT NULL,
    duration_years     INTEGER NOT NULL,   -- 4 | 6 | 9
    completed_pct      REAL,
    still_enrolled_pct REAL,
    dropped_out_pct    REAL,
    never_returned_pct REAL,
    source_file        TEXT    NOT NULL,
    source_year        INTEGER,
    UNIQUE (institution_id, cohort_start, duration_years)
);

CREATE TABLE IF NOT EXISTS enrolments (
    institution_id INTEGER NOT NULL REFERENCES institutions(id),
    year           INTEGER NOT NULL,
    field_id       INTEGER NOT NULL REFERENCES fields_of_education(id),
    course_level   TEXT    NOT NULL,
    student_type   TEXT    NOT NULL,
    commencing     INTEGER NOT NULL,   -- 0 | 1
    headcount      INTEGER,
    eftsl          REAL,
    source_file    TEXT    NOT NULL,
    source_year    INTEGER,
    UNIQUE (institution_id, year, field_id, course_level, student_type, commencing)
);

CREATE TABLE IF NOT EXISTS completions (
    institution_id INTEGER NOT NULL REFERENCES institutions(id),
    year           INTEGER NOT NULL,
    field_id       INTEGER NOT NULL REFERENCES fields_of_education(id),
    course_level   TEXT    NOT NULL,
    headcount      INTEGER NOT NULL,
    source_file    TEXT    NOT NULL,
    source_year    INTEGER,
    UNIQUE (institution_id, year, field_id, course_level)
);

CREATE TABLE IF NOT EXISTS course_level_mix (
    institution_id      INTEGER NOT NULL REFERENCES institutions(id),
    year                INTEGER NOT NULL,
    measure             TEXT    NOT NULL,   -- 'enrolment' | 'completion'
    postgrad_research   INTEGER,
    postgrad_coursework INTEGER,
    bachelor            INTEGER,
    sub_bachelor        INTEGER,
    total               INTEGER,
    source_file         TEXT    NOT NULL,
    source_year         INTEGER,
    UNIQUE (institution_id, year, measure)
);

CREATE TABLE IF NOT EXISTS equity_performance (
    institution_id INTEGER NOT NULL REFERENCES institutions(id),
    year           INTEGER NOT NULL,
    measure        TEXT    NOT NULL,   -- 'retention' | 'success' | 'attainment'
    equity_group   TEXT    NOT NULL,
    rate           REAL    NOT NULL,
    source_file    TEXT    NOT NULL,
    source_year    INTEGER,
    UNIQUE (institution_id, year, measure, equity_group)
);

-- A2.1 (ratios) and A2.2 (load and FTE) fill different columns of one row.
CREATE TABLE IF NOT EXISTS student_staff_ratios (
    institution_id     INTEGER NOT NULL REFERENCES institutions(id),
    year               INTEGER NOT NULL,
    academic_ratio     REAL,
    non_academic_ratio REAL,
    eftsl              REAL,
    academic_fte       REAL,
    non_academic_fte   REAL,
    source_file        TEXT    NOT NULL,
    source_year        INTEGER,
    UNIQUE (institution_id, year)
);

CREATE TABLE IF NOT EXISTS ingested_files (
    filename       TEXT PRIMARY KEY,
    file_path      TEXT,
    section        TEXT    NOT NULL,
    variant        TEXT    NOT NULL,
    data_year      INTEGER,
    row_count      INTEGER NOT NULL,
    content_sha256 TEXT,
    ingested_at    TEXT    NOT NULL   -- RFC 3339 UTC
);

CREATE INDEX IF NOT EXISTS aliases_institution_idx
    ON institution_aliases(institution_id);
CREATE INDEX IF NOT EXISTS attrition_inst_year_idx
    ON attrition_retention(institution_id, year);
CREATE INDEX IF NOT EXISTS attrition_year_idx
    ON attrition_retention(year, student_type, measure);
CREATE INDEX IF NOT EXISTS completion_inst_start_idx
    ON completion_rates(institution_id, cohort_start);
CREATE INDEX IF NOT EXISTS enrolments_inst_year_idx
    ON enrolments(institution_id, year);
CREATE INDEX IF NOT EXISTS enrolments_field_year_idx
    ON enrolments(field_id, year);
CREATE INDEX IF NOT EXISTS completions_inst_year_idx
    ON completions(institution_id, year);
CREATE INDEX IF NOT EXISTS completions_field_idx
    ON completions(field_id, year);
CREATE INDEX IF NOT EXISTS mix_inst_year_idx
    ON course_level_mix(institution_id, year);
CREATE INDEX IF NOT EXISTS equity_inst_year_idx
    ON equity_performance(institution_id, year);
CREATE INDEX IF NOT EXISTS staff_inst_year_idx
    ON student_staff_ratios(institution_id, year);
CREATE INDEX IF NOT EXISTS staff_year_idx
    ON student_staff_ratios(year);

PRAGMA user_version = 1;
";
