use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Assignment {
    pub id: i32,
    pub lesson_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub max_score: i32,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct AssignmentSubmission {
    pub id: i32,
    pub assignment_id: i32,
    pub student_id: i32,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub grade: Option<i32>,
    pub feedback: Option<String>,
    pub graded_by: Option<i32>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// A submission row always exists once the student has submitted; grading is
/// encoded by the presence of a grade.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Submitted,
    Graded,
}

impl AssignmentSubmission {
    pub fn state(&self) -> SubmissionState {
        if self.grade.is_some() {
            SubmissionState::Graded
        } else {
            SubmissionState::Submitted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn submission(grade: Option<i32>) -> AssignmentSubmission {
        AssignmentSubmission {
            id: 1,
            assignment_id: 1,
            student_id: 1,
            content: Some("answer".to_string()),
            file_url: None,
            submitted_at: Utc::now(),
            grade,
            feedback: None,
            graded_by: None,
            graded_at: None,
        }
    }

    #[test]
    fn ungraded_submission_is_submitted() {
        assert_eq!(submission(None).state(), SubmissionState::Submitted);
    }

    #[test]
    fn graded_submission_is_graded() {
        assert_eq!(submission(Some(85)).state(), SubmissionState::Graded);
    }

    #[test]
    fn zero_grade_still_counts_as_graded() {
        assert_eq!(submission(Some(0)).state(), SubmissionState::Graded);
    }
}
