//! Approval workflow for FCAR records.
//!
//! Each operation loads the current record, checks the transition table and
//! writes the result back. There is no locking or version check around that
//! read-modify-write: two callers racing on the same id resolve to whatever the
//! store does, which for both bundled stores is last writer wins.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::models::{
    Fcar, FcarStatus, Semester, FEEDBACK_KEY, MAX_ACHIEVEMENT_LEVEL, MIN_ACHIEVEMENT_LEVEL,
};
use crate::store::{FcarStore, InstructorDirectory};

const DEFAULT_TARGET_GOAL: &str = "70";

/// Parses a caller-supplied id. Anything non-numeric is treated as not found.
pub fn parse_fcar_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

pub struct AssessmentLifecycle<'a, S> {
    store: &'a S,
}

impl<'a, S> AssessmentLifecycle<'a, S>
where
    S: FcarStore + InstructorDirectory,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Fcar>, StoreError> {
        self.store.find_by_id(id).await
    }

    pub async fn find_by_str(&self, raw_id: &str) -> Result<Option<Fcar>, StoreError> {
        match parse_fcar_id(raw_id) {
            Some(id) => self.store.find_by_id(id).await,
            None => {
                tracing::debug!(raw_id, "ignoring malformed fcar id");
                Ok(None)
            }
        }
    }

    pub async fn list_all(&self) -> Result<Vec<Fcar>, StoreError> {
        self.store.find_all().await
    }

    pub async fn list_for_course(&self, course_code: &str) -> Result<Vec<Fcar>, StoreError> {
        self.store.find_by_course_code(course_code).await
    }

    pub async fn list_for_instructor(&self, instructor_id: i64) -> Result<Vec<Fcar>, StoreError> {
        self.store.find_by_instructor_id(instructor_id).await
    }

    pub async fn list_for_semester(
        &self,
        semester: Semester,
        year: i32,
    ) -> Result<Vec<Fcar>, StoreError> {
        self.store.find_by_semester_and_year(semester, year).await
    }

    /// Creates a Draft FCAR owned by an existing instructor and records the new
    /// id on the instructor. Returns `None` when the instructor is unknown.
    pub async fn create(
        &self,
        course_code: &str,
        instructor_id: i64,
        semester: Semester,
        year: i32,
        outcome_id: i64,
        indicator_id: i64,
    ) -> Result<Option<Fcar>, StoreError> {
        let Some(mut instructor) = self.store.find_instructor(instructor_id).await? else {
            tracing::debug!(instructor_id, "cannot create fcar for unknown instructor");
            return Ok(None);
        };

        let mut fcar = Fcar::new(course_code, instructor_id, semester, year);
        fcar.outcome_id = outcome_id;
        fcar.indicator_id = indicator_id;
        fcar.assessment_methods = BTreeMap::from([
            ("outcomeId".to_string(), outcome_id.to_string()),
            ("indicatorId".to_string(), indicator_id.to_string()),
            ("targetGoal".to_string(), DEFAULT_TARGET_GOAL.to_string()),
        ]);

        let saved = self.store.save(fcar).await?;
        instructor.attach_fcar(saved.id);
        self.store.update_instructor(&instructor).await?;

        tracing::info!(fcar_id = saved.id, course_code, instructor_id, "created fcar");
        Ok(Some(saved))
    }

    pub async fn submit(&self, id: i64) -> Result<bool, StoreError> {
        self.transition(id, FcarStatus::Submitted, |_| {}).await
    }

    pub async fn approve(&self, id: i64) -> Result<bool, StoreError> {
        self.transition(id, FcarStatus::Approved, |_| {}).await
    }

    pub async fn reject(&self, id: i64, feedback: &str) -> Result<bool, StoreError> {
        self.transition(id, FcarStatus::Rejected, |fcar| {
            fcar.improvement_actions
                .insert(FEEDBACK_KEY.to_string(), feedback.to_string());
        })
        .await
    }

    pub async fn return_to_draft(&self, id: i64) -> Result<bool, StoreError> {
        self.transition(id, FcarStatus::Draft, |_| {}).await
    }

    /// Removes the record, detaching it from its instructor first when that
    /// instructor still exists.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let Some(fcar) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };

        if let Some(mut instructor) = self.store.find_instructor(fcar.instructor_id()).await? {
            if instructor.detach_fcar(id) {
                self.store.update_instructor(&instructor).await?;
            }
        }

        let deleted = self.store.delete(id).await?;
        if deleted {
            tracing::info!(fcar_id = id, "deleted fcar");
        }
        Ok(deleted)
    }

    pub async fn add_student_outcome(
        &self,
        id: i64,
        outcome_key: &str,
        achievement_level: i32,
    ) -> Result<bool, StoreError> {
        if !(MIN_ACHIEVEMENT_LEVEL..=MAX_ACHIEVEMENT_LEVEL).contains(&achievement_level) {
            tracing::debug!(fcar_id = id, achievement_level, "achievement level out of range");
            return Ok(false);
        }
        self.modify(id, |fcar| {
            fcar.student_outcomes.insert(outcome_key.to_string(), achievement_level);
        })
        .await
    }

    pub async fn add_assessment_method(
        &self,
        id: i64,
        method_key: &str,
        description: &str,
    ) -> Result<bool, StoreError> {
        self.modify(id, |fcar| {
            fcar.assessment_methods
                .insert(method_key.to_string(), description.to_string());
        })
        .await
    }

    pub async fn add_improvement_action(
        &self,
        id: i64,
        action_key: &str,
        description: &str,
    ) -> Result<bool, StoreError> {
        self.modify(id, |fcar| {
            fcar.improvement_actions
                .insert(action_key.to_string(), description.to_string());
        })
        .await
    }

    async fn transition(
        &self,
        id: i64,
        next: FcarStatus,
        apply: impl FnOnce(&mut Fcar),
    ) -> Result<bool, StoreError> {
        let Some(mut fcar) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };

        if !fcar.status.can_transition_to(next) {
            tracing::debug!(
                fcar_id = id,
                from = %fcar.status,
                to = %next,
                "refusing status transition"
            );
            return Ok(false);
        }

        fcar.status = next;
        apply(&mut fcar);
        self.store.update(&fcar).await
    }

    async fn modify(&self, id: i64, apply: impl FnOnce(&mut Fcar)) -> Result<bool, StoreError> {
        let Some(mut fcar) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };
        apply(&mut fcar);
        self.store.update(&fcar).await
    }
}
