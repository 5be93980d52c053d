use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Fcar, Semester};
use crate::stats::{self, ImprovementAction};
use crate::store::{Catalog, FcarStore};

pub const REPORT_TYPES: [&str; 5] = [
    "Full Report",
    "Semester Report",
    "Course Report",
    "Outcome Report",
    "Trend Report",
];

/// Number of years offered for report selection, counting back from `now`.
pub const SELECTABLE_YEARS: i32 = 5;

/// Current year followed by the previous four, newest first.
pub fn available_years(now: DateTime<Utc>) -> Vec<i32> {
    (0..SELECTABLE_YEARS).map(|back| now.year() - back).collect()
}

static REPORT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `REP_<scope parts>_<token>`; the token mixes random hex with a process-wide
/// counter so two ids minted in one process never collide.
pub fn report_id(scope: &[&str]) -> String {
    let random = Uuid::new_v4().simple().to_string();
    let sequence = REPORT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut parts = vec!["REP"];
    parts.extend(scope.iter().copied().filter(|part| !part.is_empty()));
    format!("{}_{}{:04x}", parts.join("_"), &random[..6], sequence)
}

/// Current term under the fixed month policy.
pub fn current_term(now: DateTime<Utc>) -> (Semester, i32) {
    (Semester::for_month0(now.month0()), now.year())
}

/// Aggregate snapshot over a set of approved FCARs.
///
/// Statistics are derived from `fcars` on every call rather than stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    report_id: String,
    report_title: String,
    semester: Option<Semester>,
    year: Option<i32>,
    generated_at: DateTime<Utc>,
    #[serde(rename = "fcarList")]
    fcars: Vec<Fcar>,
    metadata: BTreeMap<String, Value>,
}

impl Report {
    fn new(report_id: String, report_title: impl Into<String>, fcars: Vec<Fcar>) -> Self {
        Self {
            report_id,
            report_title: report_title.into(),
            semester: None,
            year: None,
            generated_at: Utc::now(),
            fcars,
            metadata: BTreeMap::new(),
        }
    }

    fn scoped(mut self, semester: Option<Semester>, year: Option<i32>) -> Self {
        self.semester = semester;
        self.year = year;
        self
    }

    fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn with_counts(self) -> Self {
        let total = self.fcars.len();
        let course_count = self.fcars.iter().map(Fcar::course_code).collect::<HashSet<_>>().len();
        let instructor_count =
            self.fcars.iter().map(Fcar::instructor_id).collect::<HashSet<_>>().len();
        self.with_metadata("totalFCARs", total)
            .with_metadata("courseCount", course_count)
            .with_metadata("instructorCount", instructor_count)
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    pub fn report_title(&self) -> &str {
        &self.report_title
    }

    pub fn semester(&self) -> Option<Semester> {
        self.semester
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn fcars(&self) -> &[Fcar] {
        &self.fcars
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn fcar_count(&self) -> usize {
        self.fcars.len()
    }

    /// "Fall 2025", "2025", or "All periods" depending on how the report is scoped.
    pub fn scope_label(&self) -> String {
        match (self.semester, self.year) {
            (Some(semester), Some(year)) => format!("{semester} {year}"),
            (Some(semester), None) => semester.to_string(),
            (None, Some(year)) => year.to_string(),
            (None, None) => "All periods".to_string(),
        }
    }

    pub fn course_performance(&self) -> BTreeMap<String, f64> {
        stats::course_performance(&self.fcars)
    }

    pub fn outcome_statistics(&self) -> BTreeMap<String, f64> {
        stats::outcome_statistics(&self.fcars)
    }

    pub fn improvement_actions(&self) -> Vec<ImprovementAction> {
        stats::improvement_actions(&self.fcars)
    }

    pub fn fcars_by_course(&self) -> BTreeMap<String, Vec<Fcar>> {
        let mut grouped: BTreeMap<String, Vec<Fcar>> = BTreeMap::new();
        for fcar in &self.fcars {
            grouped.entry(fcar.course_code().to_string()).or_default().push(fcar.clone());
        }
        grouped
    }

    pub fn fcars_by_instructor(&self) -> BTreeMap<i64, Vec<Fcar>> {
        let mut grouped: BTreeMap<i64, Vec<Fcar>> = BTreeMap::new();
        for fcar in &self.fcars {
            grouped.entry(fcar.instructor_id()).or_default().push(fcar.clone());
        }
        grouped
    }
}

/// Builds the five report shapes from approved FCARs in the store.
pub struct ReportBuilder<'a, S> {
    store: &'a S,
}

impl<'a, S> ReportBuilder<'a, S>
where
    S: FcarStore + Catalog,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    async fn approved(&self) -> Result<Vec<Fcar>, StoreError> {
        Ok(self.store.find_all().await?.into_iter().filter(Fcar::is_approved).collect())
    }

    pub async fn full(&self, title: &str) -> Result<Report, StoreError> {
        tracing::info!(title, "generating full report");
        let fcars = self.approved().await?;
        let (semester, year) = current_term(Utc::now());

        Ok(Report::new(report_id(&[]), title, fcars)
            .scoped(Some(semester), Some(year))
            .with_counts())
    }

    pub async fn semester(
        &self,
        title: &str,
        semester: Semester,
        year: i32,
    ) -> Result<Report, StoreError> {
        tracing::info!(title, %semester, year, "generating semester report");
        let fcars: Vec<Fcar> = self
            .store
            .find_by_semester_and_year(semester, year)
            .await?
            .into_iter()
            .filter(|fcar| fcar.is_approved() && fcar.semester == semester && fcar.year == year)
            .collect();

        let year_label = year.to_string();
        Ok(Report::new(report_id(&[semester.as_str(), year_label.as_str()]), title, fcars)
            .scoped(Some(semester), Some(year))
            .with_counts())
    }

    /// One report per distinct course code among approved FCARs.
    pub async fn course_based(&self, title: &str) -> Result<BTreeMap<String, Report>, StoreError> {
        tracing::info!(title, "generating course-based reports");
        let mut by_course: BTreeMap<String, Vec<Fcar>> = BTreeMap::new();
        for fcar in self.approved().await? {
            by_course.entry(fcar.course_code().to_string()).or_default().push(fcar);
        }

        let mut reports = BTreeMap::new();
        for (course_code, fcars) in by_course {
            let mut report = Report::new(
                report_id(&[course_code.as_str()]),
                format!("{title} - {course_code}"),
                fcars,
            )
            .with_counts();

            if let Some(course) = self.store.find_course_by_code(&course_code).await? {
                report = report
                    .with_metadata("courseName", course.course_name)
                    .with_metadata("courseDescription", course.description)
                    .with_metadata("learningOutcomes", json!(course.learning_outcomes));
            }

            reports.insert(course_code, report);
        }

        Ok(reports)
    }

    /// Approved FCARs that assess at least one of `outcome_keys`.
    pub async fn outcome_focused(
        &self,
        title: &str,
        outcome_keys: &[String],
    ) -> Result<Report, StoreError> {
        tracing::info!(title, outcomes = ?outcome_keys, "generating outcome report");
        let fcars: Vec<Fcar> = self
            .approved()
            .await?
            .into_iter()
            .filter(|fcar| outcome_keys.iter().any(|key| fcar.student_outcomes.contains_key(key)))
            .collect();

        let mut descriptions: BTreeMap<String, String> = BTreeMap::new();
        for key in outcome_keys {
            let Ok(outcome_id) = key.trim().parse::<i64>() else {
                tracing::warn!(outcome_key = %key, "invalid outcome id");
                continue;
            };
            if let Some(outcome) = self.store.find_outcome_by_id(outcome_id).await? {
                descriptions.insert(key.clone(), outcome.description);
            }
        }

        let (semester, year) = current_term(Utc::now());
        Ok(Report::new(report_id(&["OUT"]), title, fcars)
            .scoped(Some(semester), Some(year))
            .with_counts()
            .with_metadata("outcomeDescriptions", json!(descriptions))
            .with_metadata("targetOutcomes", json!(outcome_keys)))
    }

    /// Approved FCARs with year in `start_year..=end_year`, with per-year
    /// outcome statistics under `yearlyOutcomeStatistics`.
    pub async fn trend(
        &self,
        title: &str,
        start_year: i32,
        end_year: i32,
    ) -> Result<Report, StoreError> {
        tracing::info!(title, start_year, end_year, "generating trend report");
        let fcars: Vec<Fcar> = self
            .approved()
            .await?
            .into_iter()
            .filter(|fcar| (start_year..=end_year).contains(&fcar.year))
            .collect();

        let yearly = stats::yearly_outcome_statistics(&fcars, start_year, end_year);
        let years_with_data: BTreeSet<i32> = yearly.keys().copied().collect();
        let (start_label, end_label) = (start_year.to_string(), end_year.to_string());

        let id = report_id(&["TREND", start_label.as_str(), end_label.as_str()]);
        Ok(Report::new(id, title, fcars)
            .with_counts()
            .with_metadata("startYear", start_year)
            .with_metadata("endYear", end_year)
            .with_metadata("yearsWithData", json!(years_with_data))
            .with_metadata("yearlyOutcomeStatistics", json!(yearly)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Course, FcarStatus, Outcome};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    async fn put(
        store: &MemoryStore,
        course: &str,
        instructor: i64,
        semester: Semester,
        year: i32,
        status: FcarStatus,
        outcomes: &[(&str, i32)],
    ) -> i64 {
        let mut fcar = Fcar::new(course, instructor, semester, year);
        fcar.status = status;
        for (key, level) in outcomes {
            fcar.student_outcomes.insert(key.to_string(), *level);
        }
        store.save(fcar).await.unwrap().id
    }

    #[tokio::test]
    async fn full_report_averages_approved_records() {
        let store = MemoryStore::new();
        put(&store, "CS101", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("1", 3)]).await;
        put(&store, "CS101", 2, Semester::Fall, 2025, FcarStatus::Approved, &[("1", 5)]).await;
        put(&store, "CS101", 2, Semester::Fall, 2025, FcarStatus::Submitted, &[("1", 1)]).await;

        let report = ReportBuilder::new(&store).full("All").await.unwrap();
        assert_eq!(report.fcar_count(), 2);
        assert!((report.course_performance()["CS101"] - 4.0).abs() < 0.001);
        assert!((report.outcome_statistics()["1"] - 4.0).abs() < 0.001);
        assert_eq!(report.metadata()["totalFCARs"], json!(2));
        assert_eq!(report.metadata()["courseCount"], json!(1));
        assert_eq!(report.metadata()["instructorCount"], json!(2));
        assert!(report.semester().is_some());
        assert!(report.report_id().starts_with("REP_"));
    }

    #[tokio::test]
    async fn semester_report_matches_manual_filter() {
        let store = MemoryStore::new();
        put(&store, "CS101", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("1", 3)]).await;
        put(&store, "CS201", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("2", 4)]).await;
        put(&store, "CS101", 1, Semester::Spring, 2025, FcarStatus::Approved, &[("1", 2)]).await;
        put(&store, "CS101", 1, Semester::Fall, 2024, FcarStatus::Approved, &[("1", 2)]).await;
        put(&store, "CS301", 1, Semester::Fall, 2025, FcarStatus::Draft, &[("1", 2)]).await;

        let report = ReportBuilder::new(&store)
            .semester("Fall", Semester::Fall, 2025)
            .await
            .unwrap();

        let expected: Vec<i64> = store
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|f| f.is_approved() && f.semester == Semester::Fall && f.year == 2025)
            .map(|f| f.id)
            .collect();
        let got: Vec<i64> = report
            .fcars()
            .iter()
            .filter(|f| f.semester == Semester::Fall && f.year == 2025)
            .map(|f| f.id)
            .collect();
        assert_eq!(got, expected);
        assert_eq!(report.fcar_count(), 2);
        assert_eq!(report.scope_label(), "Fall 2025");
        assert!(report.report_id().starts_with("REP_Fall_2025_"));
    }

    #[tokio::test]
    async fn course_reports_attach_catalog_metadata_when_known() {
        let store = MemoryStore::new();
        store
            .add_course(Course {
                course_code: "CS101".to_string(),
                course_name: "Intro to Programming".to_string(),
                description: "Fundamentals".to_string(),
                learning_outcomes: BTreeMap::from([(1, "Write programs".to_string())]),
            })
            .unwrap();
        put(&store, "CS101", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("1", 3)]).await;
        put(&store, "CS999", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("1", 4)]).await;
        put(&store, "CS555", 1, Semester::Fall, 2025, FcarStatus::Rejected, &[("1", 4)]).await;

        let reports = ReportBuilder::new(&store).course_based("Courses").await.unwrap();
        assert_eq!(reports.len(), 2);

        let known = &reports["CS101"];
        assert_eq!(known.report_title(), "Courses - CS101");
        assert_eq!(known.metadata()["courseName"], json!("Intro to Programming"));
        assert_eq!(known.metadata()["learningOutcomes"]["1"], json!("Write programs"));

        let unknown = &reports["CS999"];
        assert!(!unknown.metadata().contains_key("courseName"));
        assert!(!unknown.metadata().contains_key("learningOutcomes"));
        assert_eq!(unknown.metadata()["totalFCARs"], json!(1));
    }

    #[tokio::test]
    async fn outcome_report_without_matches_is_empty() {
        let store = MemoryStore::new();
        put(&store, "CS101", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("1", 3)]).await;

        let report = ReportBuilder::new(&store)
            .outcome_focused("Outcome 9", &["9".to_string()])
            .await
            .unwrap();
        assert!(report.fcars().is_empty());
        assert_eq!(report.metadata()["outcomeDescriptions"], json!({}));
    }

    #[tokio::test]
    async fn outcome_report_resolves_known_descriptions() {
        let store = MemoryStore::new();
        store
            .add_outcome(Outcome {
                id: 2,
                outcome_num: "2".to_string(),
                description: "Design solutions".to_string(),
            })
            .unwrap();
        put(&store, "CS101", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("1", 3)]).await;
        put(&store, "CS201", 1, Semester::Fall, 2025, FcarStatus::Approved, &[("2", 4)]).await;

        let keys = vec!["2".to_string(), "x".to_string(), "7".to_string()];
        let report = ReportBuilder::new(&store).outcome_focused("Design", &keys).await.unwrap();
        assert_eq!(report.fcar_count(), 1);
        assert_eq!(report.fcars()[0].course_code(), "CS201");
        assert_eq!(
            report.metadata()["outcomeDescriptions"],
            json!({ "2": "Design solutions" })
        );
        assert_eq!(report.metadata()["targetOutcomes"], json!(["2", "x", "7"]));
    }

    #[tokio::test]
    async fn trend_report_keeps_only_years_with_data() {
        let store = MemoryStore::new();
        put(&store, "CS101", 1, Semester::Fall, 2023, FcarStatus::Approved, &[("1", 3)]).await;
        put(&store, "CS101", 1, Semester::Spring, 2023, FcarStatus::Approved, &[("1", 5)]).await;
        put(&store, "CS101", 1, Semester::Fall, 2022, FcarStatus::Approved, &[("1", 1)]).await;

        let report = ReportBuilder::new(&store).trend("Trend", 2023, 2024).await.unwrap();
        assert_eq!(report.fcar_count(), 2);
        assert_eq!(report.semester(), None);
        assert_eq!(report.year(), None);

        let yearly = report.metadata()["yearlyOutcomeStatistics"].as_object().unwrap();
        assert_eq!(yearly.keys().cloned().collect::<Vec<_>>(), vec!["2023".to_string()]);
        assert_eq!(yearly["2023"]["1"], json!(4.0));
    }

    #[test]
    fn report_ids_are_unique_within_process() {
        let ids: HashSet<String> = (0..500).map(|_| report_id(&["OUT"])).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("REP_OUT_")));
    }

    #[test]
    fn catalogue_lists_shapes_and_recent_years() {
        assert_eq!(REPORT_TYPES.len(), 5);
        assert_eq!(REPORT_TYPES[4], "Trend Report");
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        assert_eq!(available_years(now), vec![2025, 2024, 2023, 2022, 2021]);
    }

    #[tokio::test]
    async fn report_groups_records_by_course_and_instructor() {
        let store = MemoryStore::new();
        let first = put(&store, "CS101", 1, Semester::Fall, 2025, FcarStatus::Approved, &[]).await;
        let second = put(&store, "CS201", 1, Semester::Fall, 2025, FcarStatus::Approved, &[]).await;
        let third = put(&store, "CS101", 2, Semester::Fall, 2025, FcarStatus::Approved, &[]).await;
        put(&store, "CS301", 3, Semester::Fall, 2025, FcarStatus::Draft, &[]).await;

        let report = ReportBuilder::new(&store).full("All").await.unwrap();

        let by_course = report.fcars_by_course();
        assert_eq!(by_course.keys().cloned().collect::<Vec<_>>(), vec!["CS101", "CS201"]);
        let cs101: Vec<i64> = by_course["CS101"].iter().map(|f| f.id).collect();
        assert_eq!(cs101, vec![first, third]);

        let by_instructor = report.fcars_by_instructor();
        assert_eq!(by_instructor.len(), 2);
        let taught_by_one: Vec<i64> = by_instructor[&1].iter().map(|f| f.id).collect();
        assert_eq!(taught_by_one, vec![first, second]);
        assert!(!by_instructor.contains_key(&3));
    }

    #[test]
    fn current_term_uses_month_policy() {
        let may = Utc.with_ymd_and_hms(2025, 5, 31, 12, 0, 0).unwrap();
        let june = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let september = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
        assert_eq!(current_term(may), (Semester::Spring, 2025));
        assert_eq!(current_term(june), (Semester::Summer, 2025));
        assert_eq!(current_term(september), (Semester::Fall, 2025));
    }
}
