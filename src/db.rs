use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{
    Course, Fcar, FcarStatus, Instructor, Outcome, Semester, MAX_ACHIEVEMENT_LEVEL,
    MIN_ACHIEVEMENT_LEVEL, UNSAVED_ID,
};
use crate::store::{Catalog, FcarStore, InstructorDirectory};

/// Moves the id sequence past rows that were written with caller-chosen ids.
const SYNC_FCAR_SEQUENCE: &str = "SELECT setval(pg_get_serial_sequence('fcar_reports.fcars', 'id'), \
     GREATEST((SELECT MAX(id) FROM fcar_reports.fcars), 1))";

const FCAR_COLUMNS: &str = "id, course_code, instructor_id, semester, year, outcome_id, \
     indicator_id, status, assessment_methods, student_outcomes, improvement_actions";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Record store backed by the `fcar_reports` Postgres schema.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_fcars(
        &self,
        filter: &str,
        bind: impl FnOnce(
            sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Fcar>, StoreError> {
        let query = format!("SELECT {FCAR_COLUMNS} FROM fcar_reports.fcars {filter} ORDER BY id");
        let rows = bind(sqlx::query(&query)).fetch_all(&self.pool).await?;
        rows.iter().map(fcar_from_row).collect()
    }
}

fn parse_column<T: std::str::FromStr>(field: &'static str, value: String) -> Result<T, StoreError> {
    value.parse::<T>().map_err(|_| StoreError::Corrupt { field, value })
}

fn fcar_from_row(row: &PgRow) -> Result<Fcar, StoreError> {
    let semester: Semester = parse_column("semester", row.try_get("semester")?)?;
    let status: FcarStatus = parse_column("status", row.try_get("status")?)?;

    let mut fcar = Fcar::new(
        row.try_get::<String, _>("course_code")?,
        row.try_get("instructor_id")?,
        semester,
        row.try_get("year")?,
    );
    fcar.id = row.try_get("id")?;
    fcar.outcome_id = row.try_get("outcome_id")?;
    fcar.indicator_id = row.try_get("indicator_id")?;
    fcar.status = status;
    fcar.assessment_methods =
        row.try_get::<Json<BTreeMap<String, String>>, _>("assessment_methods")?.0;
    fcar.student_outcomes = row.try_get::<Json<BTreeMap<String, i32>>, _>("student_outcomes")?.0;
    fcar.improvement_actions =
        row.try_get::<Json<BTreeMap<String, String>>, _>("improvement_actions")?.0;
    Ok(fcar)
}

#[async_trait]
impl FcarStore for PgStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Fcar>, StoreError> {
        let query = format!("SELECT {FCAR_COLUMNS} FROM fcar_reports.fcars WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(fcar_from_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Fcar>, StoreError> {
        self.fetch_fcars("", |query| query).await
    }

    async fn find_by_course_code(&self, course_code: &str) -> Result<Vec<Fcar>, StoreError> {
        self.fetch_fcars("WHERE course_code = $1", |query| query.bind(course_code.to_string()))
            .await
    }

    async fn find_by_instructor_id(&self, instructor_id: i64) -> Result<Vec<Fcar>, StoreError> {
        self.fetch_fcars("WHERE instructor_id = $1", |query| query.bind(instructor_id)).await
    }

    async fn find_by_semester_and_year(
        &self,
        semester: Semester,
        year: i32,
    ) -> Result<Vec<Fcar>, StoreError> {
        self.fetch_fcars("WHERE semester = $1 AND year = $2", |query| {
            query.bind(semester.as_str()).bind(year)
        })
        .await
    }

    async fn save(&self, mut fcar: Fcar) -> Result<Fcar, StoreError> {
        let id: i64 = if fcar.id == UNSAVED_ID {
            sqlx::query(
                r#"
                INSERT INTO fcar_reports.fcars
                (course_code, instructor_id, semester, year, outcome_id, indicator_id,
                 status, assessment_methods, student_outcomes, improvement_actions)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id
                "#,
            )
            .bind(fcar.course_code())
            .bind(fcar.instructor_id())
            .bind(fcar.semester.as_str())
            .bind(fcar.year)
            .bind(fcar.outcome_id)
            .bind(fcar.indicator_id)
            .bind(fcar.status.as_str())
            .bind(Json(&fcar.assessment_methods))
            .bind(Json(&fcar.student_outcomes))
            .bind(Json(&fcar.improvement_actions))
            .fetch_one(&self.pool)
            .await?
            .try_get("id")?
        } else {
            let id: i64 = sqlx::query(
                r#"
                INSERT INTO fcar_reports.fcars
                (id, course_code, instructor_id, semester, year, outcome_id, indicator_id,
                 status, assessment_methods, student_outcomes, improvement_actions)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO UPDATE
                SET semester = EXCLUDED.semester, year = EXCLUDED.year,
                    outcome_id = EXCLUDED.outcome_id, indicator_id = EXCLUDED.indicator_id,
                    status = EXCLUDED.status,
                    assessment_methods = EXCLUDED.assessment_methods,
                    student_outcomes = EXCLUDED.student_outcomes,
                    improvement_actions = EXCLUDED.improvement_actions,
                    updated_at = now()
                RETURNING id
                "#,
            )
            .bind(fcar.id)
            .bind(fcar.course_code())
            .bind(fcar.instructor_id())
            .bind(fcar.semester.as_str())
            .bind(fcar.year)
            .bind(fcar.outcome_id)
            .bind(fcar.indicator_id)
            .bind(fcar.status.as_str())
            .bind(Json(&fcar.assessment_methods))
            .bind(Json(&fcar.student_outcomes))
            .bind(Json(&fcar.improvement_actions))
            .fetch_one(&self.pool)
            .await?
            .try_get("id")?;
            sqlx::query(SYNC_FCAR_SEQUENCE).execute(&self.pool).await?;
            id
        };

        fcar.id = id;
        Ok(fcar)
    }

    async fn update(&self, fcar: &Fcar) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fcar_reports.fcars
            SET semester = $2, year = $3, outcome_id = $4, indicator_id = $5, status = $6,
                assessment_methods = $7, student_outcomes = $8, improvement_actions = $9,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(fcar.id)
        .bind(fcar.semester.as_str())
        .bind(fcar.year)
        .bind(fcar.outcome_id)
        .bind(fcar.indicator_id)
        .bind(fcar.status.as_str())
        .bind(Json(&fcar.assessment_methods))
        .bind(Json(&fcar.student_outcomes))
        .bind(Json(&fcar.improvement_actions))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM fcar_reports.fcars WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn find_course_by_code(&self, course_code: &str) -> Result<Option<Course>, StoreError> {
        let row = sqlx::query(
            "SELECT course_code, course_name, description, learning_outcomes \
             FROM fcar_reports.courses WHERE course_code = $1",
        )
        .bind(course_code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Course {
            course_code: row.try_get("course_code")?,
            course_name: row.try_get("course_name")?,
            description: row.try_get("description")?,
            learning_outcomes: row
                .try_get::<Json<BTreeMap<i64, String>>, _>("learning_outcomes")?
                .0,
        }))
    }

    async fn find_outcome_by_id(&self, id: i64) -> Result<Option<Outcome>, StoreError> {
        let row = sqlx::query(
            "SELECT id, outcome_num, description FROM fcar_reports.outcomes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Outcome {
            id: row.try_get("id")?,
            outcome_num: row.try_get("outcome_num")?,
            description: row.try_get("description")?,
        }))
    }
}

#[async_trait]
impl InstructorDirectory for PgStore {
    async fn find_instructor(&self, id: i64) -> Result<Option<Instructor>, StoreError> {
        let row = sqlx::query(
            "SELECT id, full_name, email, fcar_ids FROM fcar_reports.instructors WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Instructor {
            id: row.try_get("id")?,
            full_name: row.try_get("full_name")?,
            email: row.try_get("email")?,
            fcar_ids: row.try_get("fcar_ids")?,
        }))
    }

    async fn update_instructor(&self, instructor: &Instructor) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fcar_reports.instructors
            SET full_name = $2, email = $3, fcar_ids = $4
            WHERE id = $1
            "#,
        )
        .bind(instructor.id)
        .bind(&instructor.full_name)
        .bind(&instructor.email)
        .bind(&instructor.fcar_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn insert_keyed_fcar(pool: &PgPool, source_key: &str, fcar: &Fcar) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO fcar_reports.fcars
        (course_code, instructor_id, semester, year, outcome_id, indicator_id,
         status, assessment_methods, student_outcomes, improvement_actions, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(fcar.course_code())
    .bind(fcar.instructor_id())
    .bind(fcar.semester.as_str())
    .bind(fcar.year)
    .bind(fcar.outcome_id)
    .bind(fcar.indicator_id)
    .bind(fcar.status.as_str())
    .bind(Json(&fcar.assessment_methods))
    .bind(Json(&fcar.student_outcomes))
    .bind(Json(&fcar.improvement_actions))
    .bind(source_key)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        sqlx::query(
            r#"
            UPDATE fcar_reports.instructors
            SET fcar_ids = array_append(fcar_ids, f.id)
            FROM fcar_reports.fcars f
            WHERE f.source_key = $1 AND instructors.id = f.instructor_id
            "#,
        )
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let instructors = vec![
        (101_i64, "Avery Lee", "avery.lee@example.edu"),
        (102, "Jules Moreno", "jules.moreno@example.edu"),
        (103, "Kiara Patel", "kiara.patel@example.edu"),
    ];

    for (id, name, email) in instructors {
        sqlx::query(
            r#"
            INSERT INTO fcar_reports.instructors (id, full_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let courses = vec![
        (
            "CS101",
            "Introduction to Programming",
            "Problem solving with a high-level language",
            BTreeMap::from([(1_i64, "Write working programs".to_string())]),
        ),
        (
            "CS201",
            "Data Structures",
            "Lists, trees, graphs and their analysis",
            BTreeMap::from([
                (1, "Write working programs".to_string()),
                (2, "Analyze algorithm complexity".to_string()),
            ]),
        ),
        (
            "CS350",
            "Software Engineering",
            "Team-based design and delivery",
            BTreeMap::from([(3, "Communicate effectively".to_string())]),
        ),
    ];

    for (code, name, description, outcomes) in courses {
        sqlx::query(
            r#"
            INSERT INTO fcar_reports.courses (course_code, course_name, description, learning_outcomes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (course_code) DO UPDATE
            SET course_name = EXCLUDED.course_name,
                description = EXCLUDED.description,
                learning_outcomes = EXCLUDED.learning_outcomes
            "#,
        )
        .bind(code)
        .bind(name)
        .bind(description)
        .bind(Json(&outcomes))
        .execute(pool)
        .await?;
    }

    let outcomes = vec![
        (
            1_i64,
            "1",
            "Analyze a complex computing problem and apply principles to identify solutions",
        ),
        (2, "2", "Design, implement, and evaluate a computing-based solution"),
        (3, "3", "Communicate effectively in a variety of professional contexts"),
    ];

    for (id, num, description) in outcomes {
        sqlx::query(
            r#"
            INSERT INTO fcar_reports.outcomes (id, outcome_num, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET outcome_num = EXCLUDED.outcome_num, description = EXCLUDED.description
            "#,
        )
        .bind(id)
        .bind(num)
        .bind(description)
        .execute(pool)
        .await?;
    }

    let fcars = vec![
        (
            "seed-001",
            "CS101",
            101_i64,
            Semester::Fall,
            2024,
            FcarStatus::Approved,
            vec![("1", 3), ("2", 4)],
            Some("Add weekly lab quizzes"),
        ),
        (
            "seed-002",
            "CS201",
            102,
            Semester::Spring,
            2025,
            FcarStatus::Approved,
            vec![("1", 4), ("2", 2)],
            Some("Review recursion before trees"),
        ),
        (
            "seed-003",
            "CS350",
            103,
            Semester::Fall,
            2025,
            FcarStatus::Submitted,
            vec![("3", 5)],
            None,
        ),
        (
            "seed-004",
            "CS101",
            101,
            Semester::Fall,
            2025,
            FcarStatus::Approved,
            vec![("1", 4)],
            None,
        ),
    ];

    for (source_key, code, instructor_id, semester, year, status, levels, action) in fcars {
        let mut fcar = Fcar::new(code, instructor_id, semester, year);
        fcar.status = status;
        for (key, level) in levels {
            fcar.student_outcomes.insert(key.to_string(), level);
        }
        if let Some(action) = action {
            fcar.improvement_actions.insert("action1".to_string(), action.to_string());
        }
        insert_keyed_fcar(pool, source_key, &fcar)
            .await
            .with_context(|| format!("failed to seed {source_key}"))?;
    }

    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct ImportRow {
    source_key: String,
    course_code: String,
    instructor_id: i64,
    semester: String,
    year: i32,
    outcome_id: i64,
    indicator_id: i64,
    status: String,
    outcome_key: Option<String>,
    achievement_level: Option<i32>,
}

/// Merges CSV rows that share a source key into one FCAR, keeping file order.
fn group_import_rows(
    rows: impl IntoIterator<Item = ImportRow>,
) -> anyhow::Result<Vec<(String, Fcar)>> {
    let mut grouped: Vec<(String, Fcar)> = Vec::new();

    for row in rows {
        let position = match grouped.iter().position(|(key, _)| *key == row.source_key) {
            Some(position) => position,
            None => {
                let semester: Semester = row
                    .semester
                    .parse()
                    .with_context(|| format!("row {}: bad semester", row.source_key))?;
                let mut fcar = Fcar::new(&row.course_code, row.instructor_id, semester, row.year);
                fcar.outcome_id = row.outcome_id;
                fcar.indicator_id = row.indicator_id;
                fcar.status = row
                    .status
                    .parse()
                    .with_context(|| format!("row {}: bad status", row.source_key))?;
                grouped.push((row.source_key.clone(), fcar));
                grouped.len() - 1
            }
        };

        if let (Some(key), Some(level)) = (row.outcome_key, row.achievement_level) {
            anyhow::ensure!(
                (MIN_ACHIEVEMENT_LEVEL..=MAX_ACHIEVEMENT_LEVEL).contains(&level),
                "row {}: achievement level {level} for outcome {key} is outside {}..={}",
                row.source_key,
                MIN_ACHIEVEMENT_LEVEL,
                MAX_ACHIEVEMENT_LEVEL
            );
            grouped[position].1.student_outcomes.insert(key, level);
        }
    }

    Ok(grouped)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let rows = reader.deserialize::<ImportRow>().collect::<Result<Vec<_>, _>>()?;
    let mut inserted = 0usize;

    for (source_key, fcar) in group_import_rows(rows)? {
        if insert_keyed_fcar(pool, &source_key, &fcar).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
source_key,course_code,instructor_id,semester,year,outcome_id,indicator_id,status,outcome_key,achievement_level
f-1,CS101,101,Fall,2025,1,2,Approved,1,3
f-1,CS101,101,Fall,2025,1,2,Approved,2,5
f-2,CS201,102,spring,2024,2,1,Draft,,
";

    fn parse(input: &str) -> anyhow::Result<Vec<(String, Fcar)>> {
        let mut reader = csv::Reader::from_reader(input.as_bytes());
        let rows = reader.deserialize::<ImportRow>().collect::<Result<Vec<_>, _>>()?;
        group_import_rows(rows)
    }

    #[test]
    fn rows_sharing_a_key_merge_outcomes() {
        let grouped = parse(SAMPLE).unwrap();
        assert_eq!(grouped.len(), 2);

        let (key, first) = &grouped[0];
        assert_eq!(key, "f-1");
        assert_eq!(first.status, FcarStatus::Approved);
        assert_eq!(first.student_outcomes.len(), 2);
        assert_eq!(first.student_outcomes["2"], 5);
        assert!(!first.is_persisted());

        let (_, second) = &grouped[1];
        assert_eq!(second.semester, Semester::Spring);
        assert!(second.student_outcomes.is_empty());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let input = "\
source_key,course_code,instructor_id,semester,year,outcome_id,indicator_id,status,outcome_key,achievement_level
f-9,CS101,101,Fall,2025,1,2,Archived,1,3
";
        let err = parse(input).unwrap_err();
        assert!(err.to_string().contains("bad status"));
    }

    #[test]
    fn out_of_range_level_is_rejected() {
        let input = "\
source_key,course_code,instructor_id,semester,year,outcome_id,indicator_id,status,outcome_key,achievement_level
f-3,CS101,101,Fall,2025,1,2,Approved,1,9
f-3,CS101,101,Fall,2025,1,2,Approved,2,-4
";
        let err = parse(input).unwrap_err();
        assert!(err.to_string().contains("row f-3: achievement level 9"));

        let floor = "\
source_key,course_code,instructor_id,semester,year,outcome_id,indicator_id,status,outcome_key,achievement_level
f-4,CS101,101,Fall,2025,1,2,Approved,1,0
";
        assert!(parse(floor).is_err());
    }

    #[test]
    fn sequence_sync_targets_the_fcar_id_sequence() {
        let sequence = "pg_get_serial_sequence('fcar_reports.fcars', 'id')";
        assert!(SYNC_FCAR_SEQUENCE.contains(sequence));
        assert!(SYNC_FCAR_SEQUENCE.contains("MAX(id) FROM fcar_reports.fcars"));
    }

    #[test]
    fn corrupt_column_names_the_field() {
        let err = parse_column::<FcarStatus>("status", "Pending".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "stored status has unexpected value 'Pending'");
    }
}
