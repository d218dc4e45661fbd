use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};

use crate::error::CoreError;
use crate::models::enrollment::Enrollment;
use crate::users::{get_current_user_id, verify_token, Claims};
use crate::AppState;

#[derive(Serialize, FromRow)]
struct ProgressReport {
    enrollment_id: i32,
    course_id: i32,
    course_title: String,
    progress: i32,
    total_lessons: i64,
    completed_lessons: i64,
    completed_at: Option<DateTime<Utc>>,
    certificate_url: Option<String>,
}

/// Percentage of completed lessons, rounded half-up. An empty course reports 0.
pub fn progress_percent(completed_lessons: i64, total_lessons: i64) -> i32 {
    if total_lessons == 0 {
        return 0;
    }
    ((completed_lessons as f64 / total_lessons as f64) * 100.0).round() as i32
}

/// Recompute the cached progress percentage for an enrollment from its
/// lesson_progress rows, and stamp completed_at the first time every lesson
/// is done. Both fields are written in one UPDATE, so the completed_at rule
/// stays monotonic under concurrent recomputes: the CASE only fires while the
/// column is still NULL.
pub async fn recompute_progress<'e, E>(
    db: E,
    enrollment_id: i32,
) -> Result<(i32, Option<DateTime<Utc>>), CoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, (i32, Option<DateTime<Utc>>)>(
        "WITH totals AS (
             SELECT COUNT(*) AS total
             FROM lessons l
             JOIN sections s ON l.section_id = s.id
             JOIN enrollments e ON s.course_id = e.course_id
             WHERE e.id = $1
         ),
         done AS (
             SELECT COUNT(*) AS completed
             FROM lesson_progress lp
             WHERE lp.enrollment_id = $1 AND lp.completed = TRUE
         )
         UPDATE enrollments
         SET progress = CASE
                 WHEN (SELECT total FROM totals) = 0 THEN 0
                 ELSE ROUND((SELECT completed FROM done)::numeric
                            / (SELECT total FROM totals) * 100)::int
             END,
             completed_at = CASE
                 WHEN (SELECT total FROM totals) > 0
                      AND (SELECT completed FROM done) >= (SELECT total FROM totals)
                      AND completed_at IS NULL
                 THEN NOW()
                 ELSE completed_at
             END
         WHERE id = $1
         RETURNING progress, completed_at",
    )
    .bind(enrollment_id)
    .fetch_optional(db)
    .await?;

    row.ok_or(CoreError::NotFound("Enrollment not found"))
}

/// The enrollment's student, the course instructor, and admins may read
/// progress and completion state.
pub(crate) async fn verify_enrollment_access(
    db: &PgPool,
    claims: &Claims,
    current_user_id: i32,
    enrollment_id: i32,
) -> Result<Enrollment, HttpResponse> {
    let enrollment = match sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE id = $1",
    )
    .bind(enrollment_id)
    .fetch_optional(db)
    .await
    {
        Ok(Some(enrollment)) => enrollment,
        Ok(None) => {
            return Err(HttpResponse::NotFound().json(json!({
                "error": "Enrollment not found"
            })))
        }
        Err(e) => {
            log::error!("Failed to fetch enrollment: {}", e);
            return Err(HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            })));
        }
    };

    if claims.is_admin() || enrollment.student_id == current_user_id {
        return Ok(enrollment);
    }

    let is_course_instructor = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM courses WHERE id = $1 AND instructor_id = $2)",
    )
    .bind(enrollment.course_id)
    .bind(current_user_id)
    .fetch_one(db)
    .await;

    match is_course_instructor {
        Ok(true) => Ok(enrollment),
        _ => Err(HttpResponse::Forbidden().json(json!({
            "error": "Not authorized to access this enrollment"
        }))),
    }
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(get_enrollment_progress);
}

#[get("/api/enrollments/{enrollment_id}/progress")]
async fn get_enrollment_progress(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let enrollment_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) =
        verify_enrollment_access(&app_state.db, &claims, current_user_id, enrollment_id).await
    {
        return response;
    }

    let report = sqlx::query_as::<_, ProgressReport>(
        "SELECT e.id AS enrollment_id, e.course_id, c.title AS course_title,
                e.progress, e.completed_at, e.certificate_url,
                (SELECT COUNT(*)
                 FROM lessons l
                 JOIN sections s ON l.section_id = s.id
                 WHERE s.course_id = e.course_id) AS total_lessons,
                (SELECT COUNT(*)
                 FROM lesson_progress lp
                 WHERE lp.enrollment_id = e.id AND lp.completed = TRUE) AS completed_lessons
         FROM enrollments e
         JOIN courses c ON e.course_id = c.id
         WHERE e.id = $1",
    )
    .bind(enrollment_id)
    .fetch_optional(&app_state.db)
    .await;

    match report {
        Ok(Some(report)) => HttpResponse::Ok().json(report),
        Ok(None) => HttpResponse::NotFound().json(json!({
            "error": "Enrollment not found"
        })),
        Err(e) => {
            log::error!("Failed to fetch progress: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_course_reports_zero() {
        assert_eq!(progress_percent(0, 0), 0);
    }

    #[test]
    fn three_of_four_lessons_is_seventy_five() {
        assert_eq!(progress_percent(3, 4), 75);
    }

    #[test]
    fn all_lessons_done_is_one_hundred() {
        assert_eq!(progress_percent(4, 4), 100);
    }

    #[test]
    fn rounds_half_up() {
        // 1/8 = 12.5% -> 13
        assert_eq!(progress_percent(1, 8), 13);
        // 1/3 = 33.33% -> 33
        assert_eq!(progress_percent(1, 3), 33);
        // 2/3 = 66.67% -> 67
        assert_eq!(progress_percent(2, 3), 67);
    }

    #[test]
    fn no_completed_lessons_is_zero() {
        assert_eq!(progress_percent(0, 10), 0);
    }
}
