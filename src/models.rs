use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Id carried by an FCAR that has not been saved yet.
pub const UNSAVED_ID: i64 = 0;

/// Improvement-action key under which rejection feedback is stored.
pub const FEEDBACK_KEY: &str = "feedback";

pub const MIN_ACHIEVEMENT_LEVEL: i32 = 1;
pub const MAX_ACHIEVEMENT_LEVEL: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Semester {
    Spring,
    Summer,
    Fall,
}

impl Semester {
    pub const ALL: [Semester; 3] = [Semester::Fall, Semester::Spring, Semester::Summer];

    pub fn as_str(self) -> &'static str {
        match self {
            Semester::Spring => "Spring",
            Semester::Summer => "Summer",
            Semester::Fall => "Fall",
        }
    }

    /// Term policy for a zero-based month: 0-4 Spring, 5-7 Summer, 8-11 Fall.
    pub fn for_month0(month0: u32) -> Self {
        match month0 {
            0..=4 => Semester::Spring,
            5..=7 => Semester::Summer,
            _ => Semester::Fall,
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized value '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for Semester {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Semester::ALL
            .into_iter()
            .find(|semester| semester.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownVariant(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FcarStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl FcarStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FcarStatus::Draft => "Draft",
            FcarStatus::Submitted => "Submitted",
            FcarStatus::Approved => "Approved",
            FcarStatus::Rejected => "Rejected",
        }
    }

    /// Legal edges of the approval workflow. Approved has no outgoing edge.
    pub fn can_transition_to(self, next: FcarStatus) -> bool {
        matches!(
            (self, next),
            (FcarStatus::Draft, FcarStatus::Submitted)
                | (FcarStatus::Submitted, FcarStatus::Approved)
                | (FcarStatus::Submitted, FcarStatus::Rejected)
                | (FcarStatus::Submitted, FcarStatus::Draft)
                | (FcarStatus::Rejected, FcarStatus::Draft)
        )
    }
}

impl fmt::Display for FcarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FcarStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [
            FcarStatus::Draft,
            FcarStatus::Submitted,
            FcarStatus::Approved,
            FcarStatus::Rejected,
        ]
        .into_iter()
        .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
        .ok_or_else(|| UnknownVariant(value.to_string()))
    }
}

/// Faculty Course Assessment Record: one outcome/indicator assessment for one
/// course offering.
///
/// Course code and instructor are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fcar {
    pub id: i64,
    course_code: String,
    instructor_id: i64,
    pub semester: Semester,
    pub year: i32,
    pub outcome_id: i64,
    pub indicator_id: i64,
    pub status: FcarStatus,
    pub assessment_methods: BTreeMap<String, String>,
    pub student_outcomes: BTreeMap<String, i32>,
    pub improvement_actions: BTreeMap<String, String>,
}

impl Fcar {
    pub fn new(
        course_code: impl Into<String>,
        instructor_id: i64,
        semester: Semester,
        year: i32,
    ) -> Self {
        Self {
            id: UNSAVED_ID,
            course_code: course_code.into(),
            instructor_id,
            semester,
            year,
            outcome_id: 0,
            indicator_id: 0,
            status: FcarStatus::Draft,
            assessment_methods: BTreeMap::new(),
            student_outcomes: BTreeMap::new(),
            improvement_actions: BTreeMap::new(),
        }
    }

    pub fn course_code(&self) -> &str {
        &self.course_code
    }

    pub fn instructor_id(&self) -> i64 {
        self.instructor_id
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNSAVED_ID
    }

    pub fn is_approved(&self) -> bool {
        self.status == FcarStatus::Approved
    }

    /// "Fall 2025" style label used by action listings and exports.
    pub fn term_label(&self) -> String {
        format!("{} {}", self.semester, self.year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub course_code: String,
    pub course_name: String,
    pub description: String,
    pub learning_outcomes: BTreeMap<i64, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub id: i64,
    pub outcome_num: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instructor {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub fcar_ids: Vec<i64>,
}

impl Instructor {
    pub fn attach_fcar(&mut self, fcar_id: i64) {
        if !self.fcar_ids.contains(&fcar_id) {
            self.fcar_ids.push(fcar_id);
        }
    }

    pub fn detach_fcar(&mut self, fcar_id: i64) -> bool {
        let before = self.fcar_ids.len();
        self.fcar_ids.retain(|id| *id != fcar_id);
        self.fcar_ids.len() != before
    }
}
