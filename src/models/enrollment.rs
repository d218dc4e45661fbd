use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The relationship record binding one student to one course.
///
/// `progress` is a cached percentage recomputed from lesson_progress rows;
/// `completed_at` is monotonic and is never cleared once set.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Enrollment {
    pub id: i32,
    pub student_id: i32,
    pub course_id: i32,
    pub enrolled_at: DateTime<Utc>,
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct LessonProgress {
    pub id: i32,
    pub enrollment_id: i32,
    pub lesson_id: i32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}
