use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub const UNASSIGNED_SEMESTER: &str = "unassigned";

/// Scores at or above this count toward earned credits.
pub const PASS_SCORE: f64 = 4.0;

#[derive(Debug, Error, PartialEq)]
pub enum GradeError {
    #[error("credits must be a positive number")]
    BadCredits,
    #[error("score must be between 0 and 10")]
    BadScore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeEntry {
    pub semester: Option<String>,
    pub credits: f64,
    /// 10-point scale; `None` while the course is still in progress.
    pub score: Option<f64>,
}

pub fn validate_credits(v: f64) -> Result<f64, GradeError> {
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(GradeError::BadCredits)
    }
}

pub fn validate_score(v: f64) -> Result<f64, GradeError> {
    if v.is_finite() && (0.0..=10.0).contains(&v) {
        Ok(v)
    } else {
        Err(GradeError::BadScore)
    }
}

/// Letter grade and 4-point value for a 10-point score.
pub fn letter_for(score: f64) -> (&'static str, f64) {
    if score >= 8.5 {
        ("A", 4.0)
    } else if score >= 8.0 {
        ("B+", 3.5)
    } else if score >= 7.0 {
        ("B", 3.0)
    } else if score >= 6.5 {
        ("C+", 2.5)
    } else if score >= 5.5 {
        ("C", 2.0)
    } else if score >= 5.0 {
        ("D+", 1.5)
    } else if score >= 4.0 {
        ("D", 1.0)
    } else {
        ("F", 0.0)
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaAggregate {
    pub credits: f64,
    pub earned_credits: f64,
    pub gpa10: f64,
    pub gpa4: f64,
    pub courses: usize,
    pub in_progress: usize,
}

#[derive(Default)]
struct Acc {
    credits: f64,
    earned: f64,
    sum10: f64,
    sum4: f64,
    courses: usize,
    in_progress: usize,
}

impl Acc {
    fn add(&mut self, e: &GradeEntry) {
        let Some(score) = e.score else {
            self.in_progress += 1;
            return;
        };
        let (_, points) = letter_for(score);
        self.credits += e.credits;
        self.sum10 += score * e.credits;
        self.sum4 += points * e.credits;
        if score >= PASS_SCORE {
            self.earned += e.credits;
        }
        self.courses += 1;
    }

    fn finish(&self) -> GpaAggregate {
        let (gpa10, gpa4) = if self.credits > 0.0 {
            (
                round2(self.sum10 / self.credits),
                round2(self.sum4 / self.credits),
            )
        } else {
            (0.0, 0.0)
        };
        GpaAggregate {
            credits: self.credits,
            earned_credits: self.earned,
            gpa10,
            gpa4,
            courses: self.courses,
            in_progress: self.in_progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterGpa {
    pub semester: String,
    #[serde(flatten)]
    pub gpa: GpaAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaSummary {
    pub semesters: Vec<SemesterGpa>,
    pub cumulative: GpaAggregate,
    pub letter_counts: BTreeMap<String, usize>,
}

pub fn summarize(entries: &[GradeEntry]) -> GpaSummary {
    let mut by_semester: BTreeMap<String, Acc> = BTreeMap::new();
    let mut unassigned: Option<Acc> = None;
    let mut total = Acc::default();
    let mut letter_counts: BTreeMap<String, usize> = BTreeMap::new();

    for e in entries {
        let semester = e
            .semester
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match semester {
            Some(s) => by_semester.entry(s.to_string()).or_default().add(e),
            None => unassigned.get_or_insert_with(Acc::default).add(e),
        }
        total.add(e);
        if let Some(score) = e.score {
            *letter_counts
                .entry(letter_for(score).0.to_string())
                .or_insert(0) += 1;
        }
    }

    let mut semesters: Vec<SemesterGpa> = by_semester
        .iter()
        .map(|(s, acc)| SemesterGpa {
            semester: s.clone(),
            gpa: acc.finish(),
        })
        .collect();
    if let Some(acc) = unassigned {
        semesters.push(SemesterGpa {
            semester: UNASSIGNED_SEMESTER.to_string(),
            gpa: acc.finish(),
        });
    }

    GpaSummary {
        semesters,
        cumulative: total.finish(),
        letter_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(semester: Option<&str>, credits: f64, score: Option<f64>) -> GradeEntry {
        GradeEntry {
            semester: semester.map(str::to_string),
            credits,
            score,
        }
    }

    #[test]
    fn letter_boundaries() {
        assert_eq!(letter_for(10.0), ("A", 4.0));
        assert_eq!(letter_for(8.5), ("A", 4.0));
        assert_eq!(letter_for(8.49), ("B+", 3.5));
        assert_eq!(letter_for(7.0), ("B", 3.0));
        assert_eq!(letter_for(6.5), ("C+", 2.5));
        assert_eq!(letter_for(5.5), ("C", 2.0));
        assert_eq!(letter_for(5.0), ("D+", 1.5));
        assert_eq!(letter_for(4.0), ("D", 1.0));
        assert_eq!(letter_for(3.99), ("F", 0.0));
    }

    #[test]
    fn credit_weighted_gpa_excludes_in_progress() {
        let s = summarize(&[
            entry(Some("2025.1"), 3.0, Some(9.0)),
            entry(Some("2025.1"), 2.0, Some(6.0)),
            entry(Some("2025.2"), 4.0, None),
            entry(None, 1.0, Some(3.0)),
        ]);
        assert_eq!(s.semesters.len(), 3);
        assert_eq!(s.semesters[0].semester, "2025.1");
        // (9*3 + 6*2) / 5 = 7.8 ; (4*3 + 2*2) / 5 = 3.2
        assert_eq!(s.semesters[0].gpa.gpa10, 7.8);
        assert_eq!(s.semesters[0].gpa.gpa4, 3.2);
        assert_eq!(s.semesters[1].gpa.in_progress, 1);
        assert_eq!(s.semesters[1].gpa.gpa10, 0.0);
        assert_eq!(s.semesters[2].semester, UNASSIGNED_SEMESTER);

        assert_eq!(s.cumulative.credits, 6.0);
        assert_eq!(s.cumulative.earned_credits, 5.0);
        assert_eq!(s.cumulative.courses, 3);
        assert_eq!(s.cumulative.in_progress, 1);
        // (27 + 12 + 3) / 6 = 7.0
        assert_eq!(s.cumulative.gpa10, 7.0);
        assert_eq!(s.letter_counts.get("A"), Some(&1));
        assert_eq!(s.letter_counts.get("C"), Some(&1));
        assert_eq!(s.letter_counts.get("F"), Some(&1));
    }

    #[test]
    fn validation_bounds() {
        assert!(validate_credits(0.0).is_err());
        assert!(validate_credits(f64::NAN).is_err());
        assert_eq!(validate_credits(3.0), Ok(3.0));
        assert_eq!(validate_credits(120.0), Ok(120.0));
        assert!(validate_credits(f64::INFINITY).is_err());
        assert!(validate_score(10.5).is_err());
        assert!(validate_score(-0.1).is_err());
        assert_eq!(validate_score(0.0), Ok(0.0));
    }
}
