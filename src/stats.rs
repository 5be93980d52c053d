use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::Fcar;

/// Keys that tag an action row and therefore never count as an action.
pub const RESERVED_ACTION_TAGS: [&str; 3] = ["courseCode", "fcarId", "semester"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementAction {
    pub course_code: String,
    pub fcar_id: i64,
    pub semester: String,
    pub action_key: String,
    pub description: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    total: i64,
    count: usize,
}

impl Tally {
    fn add(&mut self, level: i32) {
        self.total += i64::from(level);
        self.count += 1;
    }

    fn mean(self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.total as f64 / self.count as f64)
        }
    }
}

fn finish<K: Ord>(tallies: BTreeMap<K, Tally>) -> BTreeMap<K, f64> {
    tallies
        .into_iter()
        .filter_map(|(key, tally)| tally.mean().map(|mean| (key, mean)))
        .collect()
}

/// Mean achievement per course over every outcome entry of every FCAR in it.
pub fn course_performance(fcars: &[Fcar]) -> BTreeMap<String, f64> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for fcar in fcars {
        if fcar.student_outcomes.is_empty() {
            continue;
        }
        let tally = tallies.entry(fcar.course_code().to_string()).or_default();
        for level in fcar.student_outcomes.values() {
            tally.add(*level);
        }
    }

    finish(tallies)
}

/// Mean achievement per outcome key across all courses.
pub fn outcome_statistics(fcars: &[Fcar]) -> BTreeMap<String, f64> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for fcar in fcars {
        for (outcome_key, level) in &fcar.student_outcomes {
            tallies.entry(outcome_key.clone()).or_default().add(*level);
        }
    }

    finish(tallies)
}

/// Outcome statistics computed separately for each year in `start..=end`.
/// Years without FCARs are left out.
pub fn yearly_outcome_statistics(
    fcars: &[Fcar],
    start_year: i32,
    end_year: i32,
) -> BTreeMap<i32, BTreeMap<String, f64>> {
    let mut by_year: BTreeMap<i32, Vec<Fcar>> = BTreeMap::new();
    for fcar in fcars {
        if (start_year..=end_year).contains(&fcar.year) {
            by_year.entry(fcar.year).or_default().push(fcar.clone());
        }
    }

    by_year
        .into_iter()
        .map(|(year, year_fcars)| (year, outcome_statistics(&year_fcars)))
        .collect()
}

pub fn improvement_actions_for(fcar: &Fcar) -> Vec<ImprovementAction> {
    fcar.improvement_actions
        .iter()
        .filter(|(key, _)| !RESERVED_ACTION_TAGS.contains(&key.as_str()))
        .map(|(key, description)| ImprovementAction {
            course_code: fcar.course_code().to_string(),
            fcar_id: fcar.id,
            semester: fcar.term_label(),
            action_key: key.clone(),
            description: description.clone(),
        })
        .collect()
}

pub fn improvement_actions(fcars: &[Fcar]) -> Vec<ImprovementAction> {
    fcars.iter().flat_map(improvement_actions_for).collect()
}
