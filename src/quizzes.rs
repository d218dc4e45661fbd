use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

use crate::certificates::auto_issue;
use crate::courses::find_enrollment;
use crate::curriculum::lesson_course_id;
use crate::error::CoreError;
use crate::models::quiz::{AnswerChoice, Quiz, QuizAttempt, QuizQuestion, QuizQuestionPublic};
use crate::progress::recompute_progress;
use crate::users::{get_current_user_id, verify_token};
use crate::{courses, AppState};

#[derive(Deserialize)]
struct QuestionInput {
    question: String,
    option_a: String,
    option_b: String,
    option_c: String,
    option_d: String,
    correct_answer: AnswerChoice,
    points: Option<i32>,
}

#[derive(Deserialize)]
struct CreateQuizRequest {
    title: String,
    passing_score: Option<i32>,
    time_limit: Option<i32>,
    questions: Option<Vec<QuestionInput>>,
}

#[derive(Deserialize)]
struct UpdateQuestionRequest {
    question: Option<String>,
    option_a: Option<String>,
    option_b: Option<String>,
    option_c: Option<String>,
    option_d: Option<String>,
    correct_answer: Option<AnswerChoice>,
    points: Option<i32>,
    order_index: Option<i32>,
}

#[derive(Deserialize)]
struct SubmitAttemptRequest {
    answers: HashMap<i32, AnswerChoice>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    course_id: Option<i32>,
}

#[derive(FromRow)]
struct AttemptWithQuiz {
    quiz_id: i32,
    lesson_id: i32,
    passing_score: i32,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, FromRow)]
struct AttemptStats {
    total_attempts: i64,
    best_score: Option<i32>,
    average_score: Option<f64>,
    best_percentage: Option<f64>,
    passed_attempts: i64,
}

#[derive(Serialize, FromRow)]
struct HistoryEntry {
    id: i32,
    quiz_id: i32,
    course_id: i32,
    score: Option<i32>,
    total_points: Option<i32>,
    percentage: Option<f64>,
    passed: Option<bool>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    quiz_title: String,
    lesson_title: String,
    course_title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    pub score: i32,
    pub total_points: i32,
    pub correct_count: i32,
    pub incorrect_count: i32,
    pub percentage: f64,
}

/// Score a full question set against the submitted answers. Unanswered
/// questions never match and count as incorrect. A quiz with zero total
/// points scores 0%.
pub fn score_answers(
    questions: &[QuizQuestion],
    answers: &HashMap<i32, AnswerChoice>,
) -> ScoreSummary {
    let mut score = 0;
    let mut total_points = 0;
    let mut correct_count = 0;
    let mut incorrect_count = 0;

    for question in questions {
        total_points += question.points;
        if answers.get(&question.id) == Some(&question.correct_answer) {
            score += question.points;
            correct_count += 1;
        } else {
            incorrect_count += 1;
        }
    }

    let percentage = if total_points == 0 {
        0.0
    } else {
        (score as f64 / total_points as f64) * 100.0
    };

    ScoreSummary {
        score,
        total_points,
        correct_count,
        incorrect_count,
        percentage,
    }
}

/// Pass/fail is fixed against the quiz's passing_score at scoring time; the
/// boundary is inclusive.
pub fn is_passing(percentage: f64, passing_score: i32) -> bool {
    percentage >= passing_score as f64
}

pub struct SubmittedAttempt {
    pub attempt: QuizAttempt,
    pub lesson_id: i32,
    pub correct_count: i32,
    pub incorrect_count: i32,
}

/// Score and finalize an attempt. The persisted scoring result is the primary
/// contract; callers chain completion/certificate side effects afterwards.
pub async fn submit_attempt(
    db: &PgPool,
    attempt_id: i32,
    answers: &HashMap<i32, AnswerChoice>,
) -> Result<SubmittedAttempt, CoreError> {
    let attempt = sqlx::query_as::<_, AttemptWithQuiz>(
        "SELECT qa.quiz_id, q.lesson_id, q.passing_score, qa.completed_at
         FROM quiz_attempts qa
         JOIN quizzes q ON qa.quiz_id = q.id
         WHERE qa.id = $1",
    )
    .bind(attempt_id)
    .fetch_optional(db)
    .await?
    .ok_or(CoreError::NotFound("Quiz attempt not found"))?;

    if attempt.completed_at.is_some() {
        return Err(CoreError::Conflict("Quiz attempt already submitted"));
    }

    let questions = sqlx::query_as::<_, QuizQuestion>(
        "SELECT * FROM quiz_questions WHERE quiz_id = $1 ORDER BY order_index",
    )
    .bind(attempt.quiz_id)
    .fetch_all(db)
    .await?;

    let summary = score_answers(&questions, answers);
    let passed = is_passing(summary.percentage, attempt.passing_score);

    let completed = sqlx::query_as::<_, QuizAttempt>(
        "UPDATE quiz_attempts
         SET score = $1, total_points = $2, percentage = $3, passed = $4,
             completed_at = NOW()
         WHERE id = $5
         RETURNING *",
    )
    .bind(summary.score)
    .bind(summary.total_points)
    .bind(summary.percentage)
    .bind(passed)
    .bind(attempt_id)
    .fetch_one(db)
    .await?;

    Ok(SubmittedAttempt {
        attempt: completed,
        lesson_id: attempt.lesson_id,
        correct_count: summary.correct_count,
        incorrect_count: summary.incorrect_count,
    })
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_quiz)
        .service(get_quiz)
        .service(update_quiz_question)
        .service(delete_quiz_question)
        .service(start_quiz_attempt)
        .service(submit_quiz_attempt)
        .service(get_attempt_results)
        .service(get_student_attempts)
        .service(get_attempt_stats)
        .service(get_quiz_history);
}

#[post("/api/lessons/{lesson_id}/quiz")]
async fn create_quiz(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<CreateQuizRequest>,
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
        courses::verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    // Quiz row plus its question set are inserted all-or-nothing.
    let mut tx = match app_state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Failed to start transaction: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    let quiz = match sqlx::query_as::<_, Quiz>(
        "INSERT INTO quizzes (lesson_id, title, passing_score, time_limit)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(lesson_id)
    .bind(&payload.title)
    .bind(payload.passing_score.unwrap_or(70))
    .bind(payload.time_limit)
    .fetch_one(&mut *tx)
    .await
    {
        Ok(quiz) => quiz,
        Err(e) => {
            error!("Failed to create quiz: {}", e);
            let _ = tx.rollback().await;
            // The unique key on lesson_id means one quiz per lesson.
            return HttpResponse::Conflict().json(json!({
                "error": "Lesson already has a quiz"
            }));
        }
    };

    let mut questions = Vec::new();
    if let Some(inputs) = &payload.questions {
        for (index, q) in inputs.iter().enumerate() {
            let inserted = sqlx::query_as::<_, QuizQuestion>(
                "INSERT INTO quiz_questions (quiz_id, question, option_a, option_b,
                                             option_c, option_d, correct_answer,
                                             points, order_index)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING *",
            )
            .bind(quiz.id)
            .bind(&q.question)
            .bind(&q.option_a)
            .bind(&q.option_b)
            .bind(&q.option_c)
            .bind(&q.option_d)
            .bind(q.correct_answer)
            .bind(q.points.unwrap_or(1))
            .bind(index as i32)
            .fetch_one(&mut *tx)
            .await;

            match inserted {
                Ok(question) => questions.push(question),
                Err(e) => {
                    error!("Failed to insert quiz question: {}", e);
                    let _ = tx.rollback().await;
                    return HttpResponse::InternalServerError().json(json!({
                        "error": "Failed to create quiz questions"
                    }));
                }
            }
        }
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit quiz creation: {}", e);
        return HttpResponse::InternalServerError().json(json!({
            "error": "Failed to create quiz"
        }));
    }

    HttpResponse::Created().json(json!({
        "quiz": quiz,
        "questions": questions,
    }))
}

#[get("/api/quizzes/{quiz_id}")]
async fn get_quiz(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let quiz_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let quiz = match sqlx::query_as::<_, Quiz>("SELECT * FROM quizzes WHERE id = $1")
        .bind(quiz_id)
        .fetch_optional(&app_state.db)
        .await
    {
        Ok(Some(quiz)) => quiz,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Quiz not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch quiz: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    let instructor_view = claims.is_admin() || claims.is_instructor();

    // Students never see correct answers; they do see their own attempt
    // history for this quiz.
    let mut previous_attempts: Vec<QuizAttempt> = Vec::new();
    if !instructor_view {
        let course_id = match lesson_course_id(&app_state.db, quiz.lesson_id).await {
            Ok(Some(id)) => id,
            _ => {
                return HttpResponse::InternalServerError().json(json!({
                    "error": "Database error"
                }))
            }
        };

        if let Ok(Some(enrollment)) =
            find_enrollment(&app_state.db, current_user_id, course_id).await
        {
            previous_attempts = sqlx::query_as::<_, QuizAttempt>(
                "SELECT * FROM quiz_attempts
                 WHERE quiz_id = $1 AND enrollment_id = $2
                 ORDER BY started_at DESC",
            )
            .bind(quiz_id)
            .bind(enrollment.id)
            .fetch_all(&app_state.db)
            .await
            .unwrap_or_default();
        }
    }

    if instructor_view {
        let questions = sqlx::query_as::<_, QuizQuestion>(
            "SELECT * FROM quiz_questions WHERE quiz_id = $1 ORDER BY order_index",
        )
        .bind(quiz_id)
        .fetch_all(&app_state.db)
        .await;

        match questions {
            Ok(questions) => HttpResponse::Ok().json(json!({
                "quiz": quiz,
                "questions": questions,
            })),
            Err(e) => {
                error!("Failed to fetch quiz questions: {}", e);
                HttpResponse::InternalServerError().json(json!({
                    "error": "Database error"
                }))
            }
        }
    } else {
        let questions = sqlx::query_as::<_, QuizQuestionPublic>(
            "SELECT id, quiz_id, question, option_a, option_b, option_c, option_d,
                    points, order_index
             FROM quiz_questions WHERE quiz_id = $1 ORDER BY order_index",
        )
        .bind(quiz_id)
        .fetch_all(&app_state.db)
        .await;

        match questions {
            Ok(questions) => HttpResponse::Ok().json(json!({
                "quiz": quiz,
                "questions": questions,
                "previous_attempts": previous_attempts,
            })),
            Err(e) => {
                error!("Failed to fetch quiz questions: {}", e);
                HttpResponse::InternalServerError().json(json!({
                    "error": "Database error"
                }))
            }
        }
    }
}

/// Course a quiz question belongs to, through its quiz and lesson. None when
/// the question does not exist.
async fn question_course_id(
    db: &PgPool,
    question_id: i32,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        "SELECT s.course_id
         FROM quiz_questions qq
         JOIN quizzes q ON qq.quiz_id = q.id
         JOIN lessons l ON q.lesson_id = l.id
         JOIN sections s ON l.section_id = s.id
         WHERE qq.id = $1",
    )
    .bind(question_id)
    .fetch_optional(db)
    .await
}

#[put("/api/quiz-questions/{question_id}")]
async fn update_quiz_question(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<UpdateQuestionRequest>,
) -> impl Responder {
    let question_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let course_id = match question_course_id(&app_state.db, question_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Quiz question not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch quiz question: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if let Err(response) =
        courses::verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    let question = sqlx::query_as::<_, QuizQuestion>(
        "UPDATE quiz_questions
         SET question = COALESCE($1, question),
             option_a = COALESCE($2, option_a),
             option_b = COALESCE($3, option_b),
             option_c = COALESCE($4, option_c),
             option_d = COALESCE($5, option_d),
             correct_answer = COALESCE($6, correct_answer),
             points = COALESCE($7, points),
             order_index = COALESCE($8, order_index)
         WHERE id = $9
         RETURNING *",
    )
    .bind(&payload.question)
    .bind(&payload.option_a)
    .bind(&payload.option_b)
    .bind(&payload.option_c)
    .bind(&payload.option_d)
    .bind(payload.correct_answer)
    .bind(payload.points)
    .bind(payload.order_index)
    .bind(question_id)
    .fetch_one(&app_state.db)
    .await;

    match question {
        Ok(question) => HttpResponse::Ok().json(question),
        Err(e) => {
            error!("Failed to update quiz question: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to update quiz question"
            }))
        }
    }
}

#[delete("/api/quiz-questions/{question_id}")]
async fn delete_quiz_question(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let question_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let course_id = match question_course_id(&app_state.db, question_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Quiz question not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch quiz question: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if let Err(response) =
        courses::verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    match sqlx::query("DELETE FROM quiz_questions WHERE id = $1")
        .bind(question_id)
        .execute(&app_state.db)
        .await
    {
        Ok(_) => HttpResponse::Ok().json(json!({ "message": "Quiz question deleted" })),
        Err(e) => {
            error!("Failed to delete quiz question: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to delete quiz question"
            }))
        }
    }
}

#[post("/api/quizzes/{quiz_id}/attempts")]
async fn start_quiz_attempt(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let quiz_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let lesson_id = match sqlx::query_scalar::<_, i32>(
        "SELECT lesson_id FROM quizzes WHERE id = $1",
    )
    .bind(quiz_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Quiz not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch quiz: {}", e);
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

    let enrollment = match find_enrollment(&app_state.db, current_user_id, course_id).await {
        Ok(Some(enrollment)) => enrollment,
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
    };

    // Re-attempts are allowed; every attempt is an independent row.
    let attempt = sqlx::query_as::<_, QuizAttempt>(
        "INSERT INTO quiz_attempts (enrollment_id, quiz_id) VALUES ($1, $2) RETURNING *",
    )
    .bind(enrollment.id)
    .bind(quiz_id)
    .fetch_one(&app_state.db)
    .await;

    match attempt {
        Ok(attempt) => HttpResponse::Created().json(json!({
            "message": "Quiz attempt started",
            "attempt": attempt,
        })),
        Err(e) => {
            error!("Failed to start quiz attempt: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to start quiz attempt"
            }))
        }
    }
}

#[post("/api/quiz-attempts/{attempt_id}/submit")]
async fn submit_quiz_attempt(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<SubmitAttemptRequest>,
) -> impl Responder {
    let attempt_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    // The attempt must belong to the caller's enrollment.
    let owner_id = match sqlx::query_scalar::<_, i32>(
        "SELECT e.student_id
         FROM quiz_attempts qa
         JOIN enrollments e ON qa.enrollment_id = e.id
         WHERE qa.id = $1",
    )
    .bind(attempt_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Quiz attempt not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch quiz attempt: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if owner_id != current_user_id && !claims.is_admin() {
        return HttpResponse::Forbidden().json(json!({
            "error": "Not authorized to submit this attempt"
        }));
    }

    let submitted = match submit_attempt(&app_state.db, attempt_id, &payload.answers).await {
        Ok(submitted) => submitted,
        Err(e) => return e.to_response(),
    };

    let passed = submitted.attempt.passed.unwrap_or(false);
    let enrollment_id = submitted.attempt.enrollment_id;

    // Scoring is persisted; everything below is best effort and must never
    // surface as a submission failure.
    let mut certificate = None;
    if passed {
        let chained: Result<(), CoreError> = async {
            sqlx::query(
                "INSERT INTO lesson_progress (enrollment_id, lesson_id, completed, completed_at)
                 VALUES ($1, $2, TRUE, NOW())
                 ON CONFLICT (enrollment_id, lesson_id)
                 DO UPDATE SET completed = TRUE,
                               completed_at = CASE
                                   WHEN lesson_progress.completed THEN lesson_progress.completed_at
                                   ELSE EXCLUDED.completed_at
                               END",
            )
            .bind(enrollment_id)
            .bind(submitted.lesson_id)
            .execute(&app_state.db)
            .await?;

            recompute_progress(&app_state.db, enrollment_id).await?;
            Ok(())
        }
        .await;

        if let Err(e) = chained {
            warn!(
                "Failed to mark quiz lesson complete for enrollment {}: {}",
                enrollment_id, e
            );
        }

        match auto_issue(&app_state.db, enrollment_id).await {
            Ok(outcome) => {
                if let Some(data) = outcome.certificate {
                    info!("Certificate issued for enrollment {}", enrollment_id);
                    certificate = Some(data);
                }
            }
            Err(e) => {
                warn!(
                    "Certificate issuance skipped for enrollment {}: {}",
                    enrollment_id, e
                );
            }
        }
    }

    let state = submitted.attempt.state();
    HttpResponse::Ok().json(json!({
        "message": "Quiz submitted successfully",
        "result": {
            "attempt": submitted.attempt,
            "state": state,
            "correct_answers": submitted.correct_count,
            "incorrect_answers": submitted.incorrect_count,
            "enrollment_id": enrollment_id,
        },
        "certificate_generated": certificate.is_some(),
        "certificate": certificate,
    }))
}

#[get("/api/quiz-attempts/{attempt_id}")]
async fn get_attempt_results(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let attempt_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let row = sqlx::query_as::<_, (i32,)>(
        "SELECT e.student_id
         FROM quiz_attempts qa
         JOIN enrollments e ON qa.enrollment_id = e.id
         WHERE qa.id = $1",
    )
    .bind(attempt_id)
    .fetch_optional(&app_state.db)
    .await;

    let student_id = match row {
        Ok(Some((id,))) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Quiz attempt not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch quiz attempt: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if student_id != current_user_id && !claims.is_admin() && !claims.is_instructor() {
        return HttpResponse::Forbidden().json(json!({
            "error": "Not authorized"
        }));
    }

    let attempt = sqlx::query_as::<_, QuizAttempt>(
        "SELECT * FROM quiz_attempts WHERE id = $1",
    )
    .bind(attempt_id)
    .fetch_one(&app_state.db)
    .await;

    match attempt {
        Ok(attempt) => {
            let state = attempt.state();
            HttpResponse::Ok().json(json!({ "attempt": attempt, "state": state }))
        }
        Err(e) => {
            error!("Failed to fetch quiz attempt: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

#[get("/api/enrollments/{enrollment_id}/quizzes/{quiz_id}/attempts")]
async fn get_student_attempts(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<(i32, i32)>,
) -> impl Responder {
    let (enrollment_id, quiz_id) = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = crate::progress::verify_enrollment_access(
        &app_state.db,
        &claims,
        current_user_id,
        enrollment_id,
    )
    .await
    {
        return response;
    }

    let attempts = sqlx::query_as::<_, QuizAttempt>(
        "SELECT * FROM quiz_attempts
         WHERE enrollment_id = $1 AND quiz_id = $2
         ORDER BY started_at DESC",
    )
    .bind(enrollment_id)
    .bind(quiz_id)
    .fetch_all(&app_state.db)
    .await;

    match attempts {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => {
            error!("Failed to fetch quiz attempts: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

#[get("/api/enrollments/{enrollment_id}/quizzes/{quiz_id}/stats")]
async fn get_attempt_stats(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<(i32, i32)>,
) -> impl Responder {
    let (enrollment_id, quiz_id) = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) = crate::progress::verify_enrollment_access(
        &app_state.db,
        &claims,
        current_user_id,
        enrollment_id,
    )
    .await
    {
        return response;
    }

    // In-progress attempts (completed_at IS NULL) are excluded from every
    // aggregate.
    let stats = sqlx::query_as::<_, AttemptStats>(
        "SELECT COUNT(*) AS total_attempts,
                MAX(score) AS best_score,
                AVG(score)::float8 AS average_score,
                MAX(percentage) AS best_percentage,
                COUNT(*) FILTER (WHERE passed = TRUE) AS passed_attempts
         FROM quiz_attempts
         WHERE enrollment_id = $1 AND quiz_id = $2 AND completed_at IS NOT NULL",
    )
    .bind(enrollment_id)
    .bind(quiz_id)
    .fetch_one(&app_state.db)
    .await;

    match stats {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Failed to fetch attempt stats: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

#[get("/api/my/quiz-history")]
async fn get_quiz_history(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let history = sqlx::query_as::<_, HistoryEntry>(
        "SELECT qa.id, qa.quiz_id, c.id AS course_id, qa.score, qa.total_points,
                qa.percentage, qa.passed, qa.started_at, qa.completed_at,
                q.title AS quiz_title, l.title AS lesson_title, c.title AS course_title
         FROM quiz_attempts qa
         JOIN quizzes q ON qa.quiz_id = q.id
         JOIN lessons l ON q.lesson_id = l.id
         JOIN sections s ON l.section_id = s.id
         JOIN courses c ON s.course_id = c.id
         JOIN enrollments e ON qa.enrollment_id = e.id
         WHERE e.student_id = $1 AND qa.completed_at IS NOT NULL
           AND ($2::int IS NULL OR c.id = $2)
         ORDER BY qa.started_at DESC",
    )
    .bind(current_user_id)
    .bind(query.course_id)
    .fetch_all(&app_state.db)
    .await;

    match history {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => {
            error!("Failed to fetch quiz history: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: i32, correct: AnswerChoice, points: i32) -> QuizQuestion {
        QuizQuestion {
            id,
            quiz_id: 1,
            question: format!("Question {}", id),
            option_a: "a".to_string(),
            option_b: "b".to_string(),
            option_c: "c".to_string(),
            option_d: "d".to_string(),
            correct_answer: correct,
            points,
            order_index: id,
        }
    }

    #[test]
    fn all_correct_answers_score_full_points() {
        let questions = vec![
            question(1, AnswerChoice::A, 1),
            question(2, AnswerChoice::C, 1),
        ];
        let answers = HashMap::from([(1, AnswerChoice::A), (2, AnswerChoice::C)]);

        let summary = score_answers(&questions, &answers);
        assert_eq!(summary.score, 2);
        assert_eq!(summary.total_points, 2);
        assert_eq!(summary.correct_count, 2);
        assert_eq!(summary.incorrect_count, 0);
        assert_eq!(summary.percentage, 100.0);
        assert!(is_passing(summary.percentage, 70));
    }

    #[test]
    fn one_of_two_correct_is_fifty_percent_and_fails_seventy() {
        let questions = vec![
            question(1, AnswerChoice::A, 1),
            question(2, AnswerChoice::C, 1),
        ];
        let answers = HashMap::from([(1, AnswerChoice::A), (2, AnswerChoice::B)]);

        let summary = score_answers(&questions, &answers);
        assert_eq!(summary.score, 1);
        assert_eq!(summary.percentage, 50.0);
        assert!(!is_passing(summary.percentage, 70));
    }

    #[test]
    fn unanswered_questions_count_as_incorrect() {
        let questions = vec![
            question(1, AnswerChoice::A, 1),
            question(2, AnswerChoice::B, 1),
            question(3, AnswerChoice::C, 1),
        ];
        let answers = HashMap::from([(1, AnswerChoice::A)]);

        let summary = score_answers(&questions, &answers);
        assert_eq!(summary.correct_count, 1);
        assert_eq!(summary.incorrect_count, 2);
        assert_eq!(summary.total_points, 3);
    }

    #[test]
    fn question_points_weight_the_score() {
        let questions = vec![
            question(1, AnswerChoice::A, 3),
            question(2, AnswerChoice::B, 1),
        ];
        let answers = HashMap::from([(1, AnswerChoice::A), (2, AnswerChoice::D)]);

        let summary = score_answers(&questions, &answers);
        assert_eq!(summary.score, 3);
        assert_eq!(summary.total_points, 4);
        assert_eq!(summary.percentage, 75.0);
    }

    #[test]
    fn empty_question_set_scores_zero_percent() {
        let summary = score_answers(&[], &HashMap::new());
        assert_eq!(summary.total_points, 0);
        assert_eq!(summary.percentage, 0.0);
    }

    #[test]
    fn scoring_is_deterministic_for_fixed_inputs() {
        let questions = vec![
            question(1, AnswerChoice::A, 2),
            question(2, AnswerChoice::D, 2),
        ];
        let answers = HashMap::from([(1, AnswerChoice::A), (2, AnswerChoice::C)]);

        let first = score_answers(&questions, &answers);
        let second = score_answers(&questions, &answers);
        assert_eq!(first, second);
    }

    #[test]
    fn percentage_equal_to_passing_score_passes() {
        // The boundary is >=, not >.
        assert!(is_passing(70.0, 70));
        assert!(!is_passing(69.9, 70));
    }
}
