use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "answer_choice", rename_all = "UPPERCASE")]
pub enum AnswerChoice {
    A,
    B,
    C,
    D,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Quiz {
    pub id: i32,
    pub lesson_id: i32,
    pub title: String,
    pub passing_score: i32,
    pub time_limit: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Full question row, including the correct answer. Only instructors and the
/// scoring path ever see this shape.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct QuizQuestion {
    pub id: i32,
    pub quiz_id: i32,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: AnswerChoice,
    pub points: i32,
    pub order_index: i32,
}

/// Student-facing question shape with the correct answer stripped.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct QuizQuestionPublic {
    pub id: i32,
    pub quiz_id: i32,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub points: i32,
    pub order_index: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct QuizAttempt {
    pub id: i32,
    pub enrollment_id: i32,
    pub quiz_id: i32,
    pub score: Option<i32>,
    pub total_points: Option<i32>,
    pub percentage: Option<f64>,
    pub passed: Option<bool>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    InProgress,
    Completed,
}

impl QuizAttempt {
    pub fn state(&self) -> AttemptState {
        if self.completed_at.is_some() {
            AttemptState::Completed
        } else {
            AttemptState::InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attempt(completed_at: Option<DateTime<Utc>>) -> QuizAttempt {
        QuizAttempt {
            id: 1,
            enrollment_id: 1,
            quiz_id: 1,
            score: None,
            total_points: None,
            percentage: None,
            passed: None,
            started_at: Utc::now(),
            completed_at,
        }
    }

    #[test]
    fn attempt_without_completion_timestamp_is_in_progress() {
        assert_eq!(attempt(None).state(), AttemptState::InProgress);
    }

    #[test]
    fn attempt_with_completion_timestamp_is_completed() {
        assert_eq!(attempt(Some(Utc::now())).state(), AttemptState::Completed);
    }
}
