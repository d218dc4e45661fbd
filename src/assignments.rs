use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;

use crate::courses::{find_enrollment, verify_course_owner};
use crate::curriculum::lesson_course_id;
use crate::models::assignment::{Assignment, AssignmentSubmission};
use crate::users::{get_current_user_id, verify_token};
use crate::AppState;

#[derive(Deserialize)]
struct CreateAssignmentRequest {
    title: String,
    description: Option<String>,
    max_score: Option<i32>,
    due_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct UpdateAssignmentRequest {
    title: Option<String>,
    description: Option<String>,
    max_score: Option<i32>,
    due_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct SubmitAssignmentRequest {
    content: Option<String>,
    file_url: Option<String>,
}

#[derive(Deserialize)]
struct GradeSubmissionRequest {
    grade: i32,
    feedback: Option<String>,
}

#[derive(Serialize, FromRow)]
struct SubmissionWithStudent {
    id: i32,
    assignment_id: i32,
    student_id: i32,
    student_name: String,
    content: Option<String>,
    file_url: Option<String>,
    submitted_at: DateTime<Utc>,
    grade: Option<i32>,
    feedback: Option<String>,
    graded_by: Option<i32>,
    graded_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, FromRow)]
struct SubmissionStats {
    total_submissions: i64,
    graded_submissions: i64,
    average_grade: Option<f64>,
    highest_grade: Option<i32>,
    lowest_grade: Option<i32>,
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_assignment)
        .service(update_assignment)
        .service(get_assignment)
        .service(submit_assignment)
        .service(grade_submission);
}

#[post("/api/lessons/{lesson_id}/assignment")]
async fn create_assignment(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<CreateAssignmentRequest>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let course_id = match lesson_course_id(&app_state.db, lesson_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Lesson not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch lesson: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if let Err(response) =
        verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    let assignment = sqlx::query_as::<_, Assignment>(
        "INSERT INTO assignments (lesson_id, title, description, max_score, due_date)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(lesson_id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.max_score.unwrap_or(100))
    .bind(payload.due_date)
    .fetch_one(&app_state.db)
    .await;

    match assignment {
        Ok(assignment) => HttpResponse::Created().json(assignment),
        Err(e) => {
            error!("Failed to create assignment: {}", e);
            // One assignment per lesson, enforced by the unique key.
            HttpResponse::Conflict().json(json!({
                "error": "Lesson already has an assignment"
            }))
        }
    }
}

#[put("/api/assignments/{assignment_id}")]
async fn update_assignment(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<UpdateAssignmentRequest>,
) -> impl Responder {
    let assignment_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lesson_id = match sqlx::query_scalar::<_, i32>(
        "SELECT lesson_id FROM assignments WHERE id = $1",
    )
    .bind(assignment_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Assignment not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch assignment: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    let course_id = match lesson_course_id(&app_state.db, lesson_id).await {
        Ok(Some(id)) => id,
        _ => {
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    };

    if let Err(response) =
        verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    let assignment = sqlx::query_as::<_, Assignment>(
        "UPDATE assignments
         SET title = COALESCE($1, title),
             description = COALESCE($2, description),
             max_score = COALESCE($3, max_score),
             due_date = COALESCE($4, due_date)
         WHERE id = $5
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.max_score)
    .bind(payload.due_date)
    .bind(assignment_id)
    .fetch_one(&app_state.db)
    .await;

    match assignment {
        Ok(assignment) => HttpResponse::Ok().json(assignment),
        Err(e) => {
            error!("Failed to update assignment: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to update assignment"
            }))
        }
    }
}

#[get("/api/assignments/{assignment_id}")]
async fn get_assignment(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let assignment_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let assignment = match sqlx::query_as::<_, Assignment>(
        "SELECT * FROM assignments WHERE id = $1",
    )
    .bind(assignment_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(assignment)) => assignment,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Assignment not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch assignment: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if claims.is_instructor() || claims.is_admin() {
        let submissions = sqlx::query_as::<_, SubmissionWithStudent>(
            "SELECT asub.id, asub.assignment_id, asub.student_id,
                    u.full_name AS student_name, asub.content, asub.file_url,
                    asub.submitted_at, asub.grade, asub.feedback, asub.graded_by,
                    asub.graded_at
             FROM assignment_submissions asub
             JOIN users u ON asub.student_id = u.id
             WHERE asub.assignment_id = $1
             ORDER BY asub.submitted_at DESC",
        )
        .bind(assignment_id)
        .fetch_all(&app_state.db)
        .await;

        let stats = sqlx::query_as::<_, SubmissionStats>(
            "SELECT COUNT(*) AS total_submissions,
                    COUNT(*) FILTER (WHERE grade IS NOT NULL) AS graded_submissions,
                    AVG(grade)::float8 AS average_grade,
                    MAX(grade) AS highest_grade,
                    MIN(grade) AS lowest_grade
             FROM assignment_submissions
             WHERE assignment_id = $1",
        )
        .bind(assignment_id)
        .fetch_one(&app_state.db)
        .await;

        return match (submissions, stats) {
            (Ok(submissions), Ok(stats)) => HttpResponse::Ok().json(json!({
                "assignment": assignment,
                "submissions": submissions,
                "stats": stats,
            })),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to fetch submissions: {}", e);
                HttpResponse::InternalServerError().json(json!({
                    "error": "Database error"
                }))
            }
        };
    }

    // Students get the assignment plus their own submission, if any.
    let submission = sqlx::query_as::<_, AssignmentSubmission>(
        "SELECT * FROM assignment_submissions
         WHERE assignment_id = $1 AND student_id = $2",
    )
    .bind(assignment_id)
    .bind(current_user_id)
    .fetch_optional(&app_state.db)
    .await;

    match submission {
        Ok(submission) => {
            let state = submission.as_ref().map(|s| s.state());
            HttpResponse::Ok().json(json!({
                "assignment": assignment,
                "submission": submission,
                "submission_state": state,
            }))
        }
        Err(e) => {
            error!("Failed to fetch submission: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

/// Upsert keyed on (assignment_id, student_id): a resubmission replaces the
/// content and resets submitted_at. Any existing grade is left in place until
/// the instructor regrades.
#[post("/api/assignments/{assignment_id}/submit")]
async fn submit_assignment(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<SubmitAssignmentRequest>,
) -> impl Responder {
    let assignment_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lesson_id = match sqlx::query_scalar::<_, i32>(
        "SELECT lesson_id FROM assignments WHERE id = $1",
    )
    .bind(assignment_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Assignment not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch assignment: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    let course_id = match lesson_course_id(&app_state.db, lesson_id).await {
        Ok(Some(id)) => id,
        _ => {
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    };

    match find_enrollment(&app_state.db, current_user_id, course_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return HttpResponse::Forbidden().json(json!({
                "error": "Not enrolled in this course"
            }))
        }
        Err(e) => {
            error!("Failed to check enrollment: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    }

    let submission = sqlx::query_as::<_, AssignmentSubmission>(
        "INSERT INTO assignment_submissions (assignment_id, student_id, content, file_url, submitted_at)
         VALUES ($1, $2, $3, $4, NOW())
         ON CONFLICT (assignment_id, student_id)
         DO UPDATE SET content = EXCLUDED.content,
                       file_url = EXCLUDED.file_url,
                       submitted_at = NOW()
         RETURNING *",
    )
    .bind(assignment_id)
    .bind(current_user_id)
    .bind(&payload.content)
    .bind(&payload.file_url)
    .fetch_one(&app_state.db)
    .await;

    match submission {
        Ok(submission) => {
            let state = submission.state();
            HttpResponse::Created().json(json!({
                "message": "Assignment submitted successfully",
                "submission": submission,
                "state": state,
            }))
        }
        Err(e) => {
            error!("Failed to submit assignment: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to submit assignment"
            }))
        }
    }
}

#[put("/api/submissions/{submission_id}/grade")]
async fn grade_submission(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<GradeSubmissionRequest>,
) -> impl Responder {
    let submission_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    // Submission -> assignment -> lesson -> course, for the ownership check.
    let course_id = match sqlx::query_scalar::<_, i32>(
        "SELECT s.course_id
         FROM assignment_submissions asub
         JOIN assignments a ON asub.assignment_id = a.id
         JOIN lessons l ON a.lesson_id = l.id
         JOIN sections s ON l.section_id = s.id
         WHERE asub.id = $1",
    )
    .bind(submission_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Submission not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch submission: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if let Err(response) =
        verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    let submission = sqlx::query_as::<_, AssignmentSubmission>(
        "UPDATE assignment_submissions
         SET grade = $1, feedback = $2, graded_by = $3, graded_at = NOW()
         WHERE id = $4
         RETURNING *",
    )
    .bind(payload.grade)
    .bind(&payload.feedback)
    .bind(current_user_id)
    .bind(submission_id)
    .fetch_one(&app_state.db)
    .await;

    match submission {
        Ok(submission) => {
            let state = submission.state();
            HttpResponse::Ok().json(json!({
                "message": "Submission graded successfully",
                "submission": submission,
                "state": state,
            }))
        }
        Err(e) => {
            error!("Failed to grade submission: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to grade submission"
            }))
        }
    }
}
