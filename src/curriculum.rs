use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};

use crate::courses::{find_enrollment, verify_course_owner};
use crate::models::curriculum::{ContentType, Lesson, Section};
use crate::models::enrollment::LessonProgress;
use crate::progress::recompute_progress;
use crate::users::{get_current_user_id, verify_token};
use crate::AppState;

#[derive(Deserialize)]
struct CreateSectionRequest {
    title: String,
    description: Option<String>,
    order_index: i32,
}

#[derive(Deserialize)]
struct UpdateSectionRequest {
    title: Option<String>,
    description: Option<String>,
    order_index: Option<i32>,
}

#[derive(Deserialize)]
struct ReorderSectionsRequest {
    section_ids: Vec<i32>,
}

#[derive(Deserialize)]
struct CreateLessonRequest {
    title: String,
    content_type: ContentType,
    video_url: Option<String>,
    text_content: Option<String>,
    duration: Option<i32>,
    order_index: i32,
    is_preview: Option<bool>,
}

#[derive(Deserialize)]
struct UpdateLessonRequest {
    title: Option<String>,
    video_url: Option<String>,
    text_content: Option<String>,
    duration: Option<i32>,
    order_index: Option<i32>,
    is_preview: Option<bool>,
}

#[derive(Serialize, FromRow)]
struct LessonDetail {
    id: i32,
    section_id: i32,
    title: String,
    content_type: ContentType,
    video_url: Option<String>,
    text_content: Option<String>,
    duration: Option<i32>,
    order_index: i32,
    is_preview: bool,
    created_at: DateTime<Utc>,
    quiz_id: Option<i32>,
    assignment_id: Option<i32>,
}

/// Course a lesson belongs to, via its section. None when the lesson does
/// not exist.
pub(crate) async fn lesson_course_id(
    db: &PgPool,
    lesson_id: i32,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        "SELECT s.course_id
         FROM lessons l
         JOIN sections s ON l.section_id = s.id
         WHERE l.id = $1",
    )
    .bind(lesson_id)
    .fetch_optional(db)
    .await
}

pub(crate) async fn section_course_id(
    db: &PgPool,
    section_id: i32,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT course_id FROM sections WHERE id = $1")
        .bind(section_id)
        .fetch_optional(db)
        .await
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_section)
        .service(update_section)
        .service(delete_section)
        .service(reorder_sections)
        .service(create_lesson)
        .service(get_lesson)
        .service(update_lesson)
        .service(delete_lesson)
        .service(mark_lesson_complete);
}

#[post("/api/courses/{course_id}/sections")]
async fn create_section(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<CreateSectionRequest>,
) -> impl Responder {
    let course_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) =
        verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    let section = sqlx::query_as::<_, Section>(
        "INSERT INTO sections (course_id, title, description, order_index)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(course_id)
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.order_index)
    .fetch_one(&app_state.db)
    .await;

    match section {
        Ok(section) => HttpResponse::Created().json(section),
        Err(e) => {
            error!("Failed to create section: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to create section"
            }))
        }
    }
}

#[put("/api/sections/{section_id}")]
async fn update_section(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<UpdateSectionRequest>,
) -> impl Responder {
    let section_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let course_id = match section_course_id(&app_state.db, section_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Section not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch section: {}", e);
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

    let section = sqlx::query_as::<_, Section>(
        "UPDATE sections
         SET title = COALESCE($1, title),
             description = COALESCE($2, description),
             order_index = COALESCE($3, order_index)
         WHERE id = $4
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.order_index)
    .bind(section_id)
    .fetch_one(&app_state.db)
    .await;

    match section {
        Ok(section) => HttpResponse::Ok().json(section),
        Err(e) => {
            error!("Failed to update section: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to update section"
            }))
        }
    }
}

#[delete("/api/sections/{section_id}")]
async fn delete_section(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let section_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let course_id = match section_course_id(&app_state.db, section_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Section not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch section: {}", e);
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

    match sqlx::query("DELETE FROM sections WHERE id = $1")
        .bind(section_id)
        .execute(&app_state.db)
        .await
    {
        Ok(_) => HttpResponse::Ok().json(json!({ "message": "Section deleted" })),
        Err(e) => {
            error!("Failed to delete section: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to delete section"
            }))
        }
    }
}

/// Rewrites order_index for every listed section in one transaction so a
/// partial reorder is never observable.
#[put("/api/courses/{course_id}/sections/order")]
async fn reorder_sections(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<ReorderSectionsRequest>,
) -> impl Responder {
    let course_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if let Err(response) =
        verify_course_owner(&app_state.db, &claims, current_user_id, course_id).await
    {
        return response;
    }

    if payload.section_ids.is_empty() {
        return HttpResponse::BadRequest().json(json!({
            "error": "Section order cannot be empty"
        }));
    }

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sections WHERE course_id = $1 AND id = ANY($2)",
    )
    .bind(course_id)
    .bind(&payload.section_ids)
    .fetch_one(&app_state.db)
    .await;

    let count = match count {
        Ok(count) => count,
        Err(e) => {
            error!("Failed to validate section order: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if count as usize != payload.section_ids.len() {
        return HttpResponse::BadRequest().json(json!({
            "error": "Section order includes invalid items"
        }));
    }

    let mut tx = match app_state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Failed to start transaction: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    for (index, section_id) in payload.section_ids.iter().enumerate() {
        let result = sqlx::query(
            "UPDATE sections SET order_index = $1 WHERE id = $2 AND course_id = $3",
        )
        .bind(index as i32)
        .bind(section_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            error!("Failed to update section order: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(json!({
                "error": "Failed to update section order"
            }));
        }
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit section order update: {}", e);
        return HttpResponse::InternalServerError().json(json!({
            "error": "Failed to update section order"
        }));
    }

    HttpResponse::Ok().json(json!({ "status": "updated" }))
}

#[post("/api/sections/{section_id}/lessons")]
async fn create_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<CreateLessonRequest>,
) -> impl Responder {
    let section_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let course_id = match section_course_id(&app_state.db, section_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Section not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch section: {}", e);
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

    let lesson = sqlx::query_as::<_, Lesson>(
        "INSERT INTO lessons (section_id, title, content_type, video_url, text_content,
                              duration, order_index, is_preview)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(section_id)
    .bind(&payload.title)
    .bind(payload.content_type)
    .bind(&payload.video_url)
    .bind(&payload.text_content)
    .bind(payload.duration)
    .bind(payload.order_index)
    .bind(payload.is_preview.unwrap_or(false))
    .fetch_one(&app_state.db)
    .await;

    match lesson {
        Ok(lesson) => HttpResponse::Created().json(lesson),
        Err(e) => {
            error!("Failed to create lesson: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to create lesson"
            }))
        }
    }
}

#[get("/api/lessons/{lesson_id}")]
async fn get_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let lesson_id = path.into_inner();

    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let lesson = sqlx::query_as::<_, LessonDetail>(
        "SELECT l.*, q.id AS quiz_id, a.id AS assignment_id
         FROM lessons l
         LEFT JOIN quizzes q ON l.id = q.lesson_id
         LEFT JOIN assignments a ON l.id = a.lesson_id
         WHERE l.id = $1",
    )
    .bind(lesson_id)
    .fetch_optional(&app_state.db)
    .await;

    match lesson {
        Ok(Some(lesson)) => HttpResponse::Ok().json(lesson),
        Ok(None) => HttpResponse::NotFound().json(json!({
            "error": "Lesson not found"
        })),
        Err(e) => {
            error!("Failed to fetch lesson: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

#[put("/api/lessons/{lesson_id}")]
async fn update_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<UpdateLessonRequest>,
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

    let lesson = sqlx::query_as::<_, Lesson>(
        "UPDATE lessons
         SET title = COALESCE($1, title),
             video_url = COALESCE($2, video_url),
             text_content = COALESCE($3, text_content),
             duration = COALESCE($4, duration),
             order_index = COALESCE($5, order_index),
             is_preview = COALESCE($6, is_preview)
         WHERE id = $7
         RETURNING *",
    )
    .bind(&payload.title)
    .bind(&payload.video_url)
    .bind(&payload.text_content)
    .bind(payload.duration)
    .bind(payload.order_index)
    .bind(payload.is_preview)
    .bind(lesson_id)
    .fetch_one(&app_state.db)
    .await;

    match lesson {
        Ok(lesson) => HttpResponse::Ok().json(lesson),
        Err(e) => {
            error!("Failed to update lesson: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to update lesson"
            }))
        }
    }
}

#[delete("/api/lessons/{lesson_id}")]
async fn delete_lesson(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
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

    match sqlx::query("DELETE FROM lessons WHERE id = $1")
        .bind(lesson_id)
        .execute(&app_state.db)
        .await
    {
        Ok(_) => HttpResponse::Ok().json(json!({ "message": "Lesson deleted" })),
        Err(e) => {
            error!("Failed to delete lesson: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to delete lesson"
            }))
        }
    }
}

/// Records a lesson completion fact and recomputes the enrollment's progress
/// in the same transaction. Re-marking an already completed lesson keeps the
/// original completed_at and does not change any count.
#[post("/api/lessons/{lesson_id}/complete")]
async fn mark_lesson_complete(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
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

    let mut tx = match app_state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Failed to start transaction: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    // Idempotent upsert: a row that is already completed keeps its original
    // completed_at.
    let record = sqlx::query_as::<_, LessonProgress>(
        "INSERT INTO lesson_progress (enrollment_id, lesson_id, completed, completed_at)
         VALUES ($1, $2, TRUE, NOW())
         ON CONFLICT (enrollment_id, lesson_id)
         DO UPDATE SET completed = TRUE,
                       completed_at = CASE
                           WHEN lesson_progress.completed THEN lesson_progress.completed_at
                           ELSE EXCLUDED.completed_at
                       END
         RETURNING *",
    )
    .bind(enrollment.id)
    .bind(lesson_id)
    .fetch_one(&mut *tx)
    .await;

    let record = match record {
        Ok(record) => record,
        Err(e) => {
            error!("Failed to record lesson completion: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(json!({
                "error": "Failed to mark lesson complete"
            }));
        }
    };

    let (progress, completed_at) = match recompute_progress(&mut *tx, enrollment.id).await {
        Ok(pair) => pair,
        Err(e) => {
            let _ = tx.rollback().await;
            return e.to_response();
        }
    };

    if let Err(e) = tx.commit().await {
        error!("Failed to commit lesson completion: {}", e);
        return HttpResponse::InternalServerError().json(json!({
            "error": "Failed to mark lesson complete"
        }));
    }

    HttpResponse::Ok().json(json!({
        "message": "Lesson marked as complete",
        "lesson_progress": record,
        "enrollment_id": enrollment.id,
        "progress": progress,
        "completed_at": completed_at,
    }))
}
