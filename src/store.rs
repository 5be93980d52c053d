//! Read/write contract the lifecycle and report code consume, plus an
//! in-memory implementation.
//!
//! The traits are async because the production store sits on a database
//! driver. Callers await them one at a time; nothing here fans out.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Course, Fcar, Instructor, Outcome, Semester, UNSAVED_ID};

#[async_trait]
pub trait FcarStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Fcar>, StoreError>;
    async fn find_all(&self) -> Result<Vec<Fcar>, StoreError>;
    async fn find_by_course_code(&self, course_code: &str) -> Result<Vec<Fcar>, StoreError>;
    async fn find_by_instructor_id(&self, instructor_id: i64) -> Result<Vec<Fcar>, StoreError>;
    async fn find_by_semester_and_year(
        &self,
        semester: Semester,
        year: i32,
    ) -> Result<Vec<Fcar>, StoreError>;
    /// Persists the record, assigning an id when it still carries `UNSAVED_ID`.
    async fn save(&self, fcar: Fcar) -> Result<Fcar, StoreError>;
    /// Returns false when no record with the FCAR's id exists.
    async fn update(&self, fcar: &Fcar) -> Result<bool, StoreError>;
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn find_course_by_code(&self, course_code: &str) -> Result<Option<Course>, StoreError>;
    async fn find_outcome_by_id(&self, id: i64) -> Result<Option<Outcome>, StoreError>;
}

#[async_trait]
pub trait InstructorDirectory: Send + Sync {
    async fn find_instructor(&self, id: i64) -> Result<Option<Instructor>, StoreError>;
    async fn update_instructor(&self, instructor: &Instructor) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    fcars: BTreeMap<i64, Fcar>,
    last_id: i64,
    courses: HashMap<String, Course>,
    outcomes: HashMap<i64, Outcome>,
    instructors: HashMap<i64, Instructor>,
}

/// Mutex-guarded store; `find_*` results come back ordered by FCAR id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn add_course(&self, course: Course) -> Result<(), StoreError> {
        self.lock()?.courses.insert(course.course_code.clone(), course);
        Ok(())
    }

    pub fn add_outcome(&self, outcome: Outcome) -> Result<(), StoreError> {
        self.lock()?.outcomes.insert(outcome.id, outcome);
        Ok(())
    }

    pub fn add_instructor(&self, instructor: Instructor) -> Result<(), StoreError> {
        self.lock()?.instructors.insert(instructor.id, instructor);
        Ok(())
    }

    fn filtered(&self, keep: impl Fn(&Fcar) -> bool) -> Result<Vec<Fcar>, StoreError> {
        Ok(self.lock()?.fcars.values().filter(|fcar| keep(fcar)).cloned().collect())
    }
}

#[async_trait]
impl FcarStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Fcar>, StoreError> {
        Ok(self.lock()?.fcars.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Fcar>, StoreError> {
        self.filtered(|_| true)
    }

    async fn find_by_course_code(&self, course_code: &str) -> Result<Vec<Fcar>, StoreError> {
        self.filtered(|fcar| fcar.course_code() == course_code)
    }

    async fn find_by_instructor_id(&self, instructor_id: i64) -> Result<Vec<Fcar>, StoreError> {
        self.filtered(|fcar| fcar.instructor_id() == instructor_id)
    }

    async fn find_by_semester_and_year(
        &self,
        semester: Semester,
        year: i32,
    ) -> Result<Vec<Fcar>, StoreError> {
        self.filtered(|fcar| fcar.semester == semester && fcar.year == year)
    }

    async fn save(&self, mut fcar: Fcar) -> Result<Fcar, StoreError> {
        let mut state = self.lock()?;
        if fcar.id == UNSAVED_ID {
            state.last_id += 1;
            fcar.id = state.last_id;
        } else {
            state.last_id = state.last_id.max(fcar.id);
        }
        state.fcars.insert(fcar.id, fcar.clone());
        Ok(fcar)
    }

    async fn update(&self, fcar: &Fcar) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.fcars.get_mut(&fcar.id) {
            Some(existing) => {
                *existing = fcar.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.lock()?.fcars.remove(&id).is_some())
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn find_course_by_code(&self, course_code: &str) -> Result<Option<Course>, StoreError> {
        Ok(self.lock()?.courses.get(course_code).cloned())
    }

    async fn find_outcome_by_id(&self, id: i64) -> Result<Option<Outcome>, StoreError> {
        Ok(self.lock()?.outcomes.get(&id).cloned())
    }
}

#[async_trait]
impl InstructorDirectory for MemoryStore {
    async fn find_instructor(&self, id: i64) -> Result<Option<Instructor>, StoreError> {
        Ok(self.lock()?.instructors.get(&id).cloned())
    }

    async fn update_instructor(&self, instructor: &Instructor) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.instructors.get_mut(&instructor.id) {
            Some(existing) => {
                *existing = instructor.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_assigns_sequential_ids() {
        let store = MemoryStore::new();
        let first = store.save(Fcar::new("CS101", 1, Semester::Fall, 2025)).await.unwrap();
        let second = store.save(Fcar::new("CS102", 1, Semester::Fall, 2025)).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let mut explicit = Fcar::new("CS103", 2, Semester::Spring, 2024);
        explicit.id = 10;
        store.save(explicit).await.unwrap();
        let next = store.save(Fcar::new("CS104", 2, Semester::Spring, 2024)).await.unwrap();
        assert_eq!(next.id, 11);
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_rejected() {
        let store = MemoryStore::new();
        let mut fcar = Fcar::new("CS101", 1, Semester::Fall, 2025);
        fcar.id = 42;
        assert!(!store.update(&fcar).await.unwrap());
        assert!(!store.delete(42).await.unwrap());
    }

    #[tokio::test]
    async fn lookups_filter_by_field() {
        let store = MemoryStore::new();
        store.save(Fcar::new("CS101", 1, Semester::Fall, 2025)).await.unwrap();
        store.save(Fcar::new("CS101", 2, Semester::Spring, 2025)).await.unwrap();
        store.save(Fcar::new("CS201", 2, Semester::Fall, 2024)).await.unwrap();

        assert_eq!(store.find_by_course_code("CS101").await.unwrap().len(), 2);
        assert_eq!(store.find_by_instructor_id(2).await.unwrap().len(), 2);
        let fall_2025 = store.find_by_semester_and_year(Semester::Fall, 2025).await.unwrap();
        assert_eq!(fall_2025.len(), 1);
        assert_eq!(fall_2025[0].instructor_id(), 1);
        let ids: Vec<i64> = store.find_all().await.unwrap().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
