use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};

use crate::error::CoreError;
use crate::progress::verify_enrollment_access;
use crate::users::{get_current_user_id, verify_token};
use crate::AppState;

#[derive(FromRow)]
struct CompletionCounts {
    certificate_url: Option<String>,
    total_lessons: i64,
    completed_lessons: i64,
    total_quizzes: i64,
    passed_quizzes: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub completed: bool,
    pub total_lessons: i64,
    pub completed_lessons: i64,
    pub total_quizzes: i64,
    pub passed_quizzes: i64,
    pub has_certificate: bool,
    pub certificate_url: Option<String>,
    pub ready_for_certificate: bool,
}

impl CompletionReport {
    /// Completion rules: every lesson done (an empty course never counts as
    /// complete) and every quiz passed at least once. A course with zero
    /// quizzes never satisfies the quiz clause, so it can never certify;
    /// that matches the deployed behavior and is pinned by tests below.
    pub fn from_counts(
        total_lessons: i64,
        completed_lessons: i64,
        total_quizzes: i64,
        passed_quizzes: i64,
        certificate_url: Option<String>,
    ) -> Self {
        let all_lessons_completed = total_lessons > 0 && completed_lessons == total_lessons;
        let all_quizzes_passed = total_quizzes > 0 && passed_quizzes == total_quizzes;
        let completed = all_lessons_completed && all_quizzes_passed;
        let has_certificate = certificate_url.is_some();

        CompletionReport {
            completed,
            total_lessons,
            completed_lessons,
            total_quizzes,
            passed_quizzes,
            has_certificate,
            certificate_url,
            ready_for_certificate: completed && !has_certificate,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct CertificateData {
    pub certificate_id: String,
    pub certificate_url: String,
    pub student_name: String,
    pub course_title: String,
    pub instructor_name: String,
    pub completion_date: DateTime<Utc>,
    pub enrollment_date: DateTime<Utc>,
    pub average_quiz_score: Option<f64>,
}

pub struct IssueOutcome {
    pub issued: bool,
    pub report: CompletionReport,
    pub certificate: Option<CertificateData>,
}

#[derive(FromRow)]
struct EnrollmentDetails {
    student_name: String,
    course_title: String,
    instructor_name: String,
    enrolled_at: DateTime<Utc>,
}

/// Derive the completion status of an enrollment from durable facts. Counts
/// are over distinct lessons and quizzes, so repeated passed attempts never
/// inflate passed_quizzes.
pub async fn check_completion(
    db: &PgPool,
    enrollment_id: i32,
) -> Result<CompletionReport, CoreError> {
    let counts = sqlx::query_as::<_, CompletionCounts>(
        "SELECT e.certificate_url,
                COUNT(DISTINCT l.id) AS total_lessons,
                COUNT(DISTINCT l.id) FILTER (WHERE lp.completed) AS completed_lessons,
                COUNT(DISTINCT q.id) AS total_quizzes,
                COUNT(DISTINCT q.id) FILTER (WHERE qa.passed) AS passed_quizzes
         FROM enrollments e
         LEFT JOIN sections s ON s.course_id = e.course_id
         LEFT JOIN lessons l ON l.section_id = s.id
         LEFT JOIN lesson_progress lp
                ON lp.lesson_id = l.id AND lp.enrollment_id = e.id
         LEFT JOIN quizzes q ON q.lesson_id = l.id
         LEFT JOIN quiz_attempts qa
                ON qa.quiz_id = q.id AND qa.enrollment_id = e.id AND qa.passed = TRUE
         WHERE e.id = $1
         GROUP BY e.id, e.certificate_url",
    )
    .bind(enrollment_id)
    .fetch_optional(db)
    .await?
    .ok_or(CoreError::NotFound("Enrollment not found"))?;

    Ok(CompletionReport::from_counts(
        counts.total_lessons,
        counts.completed_lessons,
        counts.total_quizzes,
        counts.passed_quizzes,
        counts.certificate_url,
    ))
}

/// Issue a certificate if and only if the enrollment is complete and has no
/// certificate yet. The UPDATE is conditional on certificate_url still being
/// NULL, so of two concurrent issuers exactly one wins; the loser reports
/// not-ready. Calling this on an ineligible enrollment is an expected
/// outcome, not an error.
pub async fn auto_issue(db: &PgPool, enrollment_id: i32) -> Result<IssueOutcome, CoreError> {
    let report = check_completion(db, enrollment_id).await?;

    if !report.ready_for_certificate {
        return Ok(IssueOutcome {
            issued: false,
            report,
            certificate: None,
        });
    }

    let details = sqlx::query_as::<_, EnrollmentDetails>(
        "SELECT u.full_name AS student_name, c.title AS course_title,
                i.full_name AS instructor_name, e.enrolled_at
         FROM enrollments e
         JOIN users u ON e.student_id = u.id
         JOIN courses c ON e.course_id = c.id
         JOIN users i ON c.instructor_id = i.id
         WHERE e.id = $1",
    )
    .bind(enrollment_id)
    .fetch_optional(db)
    .await?
    .ok_or(CoreError::NotFound("Enrollment not found"))?;

    let average_quiz_score = sqlx::query_scalar::<_, Option<f64>>(
        "SELECT AVG(percentage)::float8 FROM quiz_attempts
         WHERE enrollment_id = $1 AND passed = TRUE",
    )
    .bind(enrollment_id)
    .fetch_one(db)
    .await?;

    let certificate_id = format!("CERT-{}-{}", enrollment_id, Utc::now().timestamp_millis());
    let certificate_url = format!("/certificates/{}.pdf", certificate_id);

    let completed_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        "UPDATE enrollments
         SET certificate_url = $2,
             progress = 100,
             completed_at = COALESCE(completed_at, NOW())
         WHERE id = $1 AND certificate_url IS NULL
         RETURNING completed_at",
    )
    .bind(enrollment_id)
    .bind(&certificate_url)
    .fetch_optional(db)
    .await?;

    let completed_at = match completed_at {
        Some(ts) => ts,
        None => {
            // Lost the race to a concurrent issuer; report the now-current
            // state without mutating anything.
            let report = check_completion(db, enrollment_id).await?;
            return Ok(IssueOutcome {
                issued: false,
                report,
                certificate: None,
            });
        }
    };

    info!(
        "Certificate {} issued for enrollment {}",
        certificate_id, enrollment_id
    );

    let report = check_completion(db, enrollment_id).await?;

    Ok(IssueOutcome {
        issued: true,
        report,
        certificate: Some(CertificateData {
            certificate_id,
            certificate_url,
            student_name: details.student_name,
            course_title: details.course_title,
            instructor_name: details.instructor_name,
            completion_date: completed_at,
            enrollment_date: details.enrolled_at,
            average_quiz_score,
        }),
    })
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(get_completion_status).service(issue_certificate);
}

#[get("/api/enrollments/{enrollment_id}/completion")]
async fn get_completion_status(
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

    match check_completion(&app_state.db, enrollment_id).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => e.to_response(),
    }
}

#[post("/api/enrollments/{enrollment_id}/certificate")]
async fn issue_certificate(
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

    let enrollment = match verify_enrollment_access(
        &app_state.db,
        &claims,
        current_user_id,
        enrollment_id,
    )
    .await
    {
        Ok(enrollment) => enrollment,
        Err(response) => return response,
    };

    if enrollment.student_id != current_user_id && !claims.is_admin() {
        return HttpResponse::Forbidden().json(json!({
            "error": "Only the enrolled student can request a certificate"
        }));
    }

    match auto_issue(&app_state.db, enrollment_id).await {
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "issued": outcome.issued,
            "completion": outcome.report,
            "certificate": outcome.certificate,
        })),
        Err(e) => e.to_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_course_with_all_quizzes_passed_is_ready() {
        let report = CompletionReport::from_counts(4, 4, 2, 2, None);
        assert!(report.completed);
        assert!(report.ready_for_certificate);
    }

    #[test]
    fn incomplete_lessons_block_completion() {
        let report = CompletionReport::from_counts(4, 3, 2, 2, None);
        assert!(!report.completed);
        assert!(!report.ready_for_certificate);
    }

    #[test]
    fn unpassed_quiz_blocks_completion() {
        let report = CompletionReport::from_counts(4, 4, 2, 1, None);
        assert!(!report.completed);
    }

    #[test]
    fn empty_course_is_never_complete() {
        let report = CompletionReport::from_counts(0, 0, 0, 0, None);
        assert!(!report.completed);
        assert!(!report.ready_for_certificate);
    }

    #[test]
    fn zero_quiz_course_never_certifies() {
        // Deliberately preserved behavior: all lessons done but no quizzes
        // still fails the quiz clause.
        let report = CompletionReport::from_counts(4, 4, 0, 0, None);
        assert!(!report.completed);
        assert!(!report.ready_for_certificate);
    }

    #[test]
    fn existing_certificate_makes_issuance_a_no_op() {
        let report =
            CompletionReport::from_counts(4, 4, 2, 2, Some("/certificates/CERT-1.pdf".into()));
        assert!(report.completed);
        assert!(report.has_certificate);
        assert!(!report.ready_for_certificate);
    }
}
