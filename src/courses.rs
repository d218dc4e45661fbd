use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};

use crate::models::course::{Course, CourseStatus};
use crate::models::enrollment::Enrollment;
use crate::users::{get_current_user_id, verify_token, Claims};
use crate::AppState;

#[derive(Deserialize)]
struct CreateCourseRequest {
    title: String,
    description: Option<String>,
    price_cents: Option<i64>,
}

#[derive(Deserialize)]
struct UpdateCourseStatusRequest {
    status: CourseStatus,
}

#[derive(Serialize, FromRow)]
struct CourseWithInstructor {
    id: i32,
    instructor_id: i32,
    instructor_name: String,
    title: String,
    slug: String,
    description: Option<String>,
    price_cents: i64,
    status: CourseStatus,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, FromRow)]
struct EnrolledCourse {
    course_id: i32,
    title: String,
    instructor_name: String,
    enrollment_id: i32,
    enrolled_at: DateTime<Utc>,
    progress: i32,
    completed_at: Option<DateTime<Utc>>,
    certificate_url: Option<String>,
}

/// Lowercase the title, keep alphanumerics, collapse everything else into
/// single hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = true;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    slug
}

pub fn make_unique_slug(slug: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("{}-{}", slug, suffix)
}

pub(crate) async fn find_enrollment(
    db: &PgPool,
    student_id: i32,
    course_id: i32,
) -> Result<Option<Enrollment>, sqlx::Error> {
    sqlx::query_as::<_, Enrollment>(
        "SELECT * FROM enrollments WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(db)
    .await
}

/// Course mutation requires the owning instructor or an admin.
pub(crate) async fn verify_course_owner(
    db: &PgPool,
    claims: &Claims,
    current_user_id: i32,
    course_id: i32,
) -> Result<(), HttpResponse> {
    let instructor_id = match sqlx::query_scalar::<_, i32>(
        "SELECT instructor_id FROM courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(db)
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return Err(HttpResponse::NotFound().json(json!({
                "error": "Course not found"
            })))
        }
        Err(e) => {
            error!("Failed to fetch course owner: {}", e);
            return Err(HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            })));
        }
    };

    if claims.is_admin() || instructor_id == current_user_id {
        Ok(())
    } else {
        Err(HttpResponse::Forbidden().json(json!({
            "error": "Not authorized"
        })))
    }
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_course)
        .service(get_course)
        .service(update_course_status)
        .service(enroll_in_course)
        .service(list_my_courses);
}

#[post("/api/courses")]
async fn create_course(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    payload: web::Json<CreateCourseRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    if !claims.is_instructor() && !claims.is_admin() {
        return HttpResponse::Forbidden().json(json!({
            "error": "Instructor access required"
        }));
    }

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    if payload.title.trim().is_empty() {
        return HttpResponse::BadRequest().json(json!({
            "error": "Course title cannot be empty"
        }));
    }

    let mut slug = slugify(&payload.title);
    let slug_taken = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM courses WHERE slug = $1)",
    )
    .bind(&slug)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(taken) => taken,
        Err(e) => {
            error!("Failed to check slug: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if slug_taken {
        slug = make_unique_slug(&slug);
    }

    let course = sqlx::query_as::<_, Course>(
        "INSERT INTO courses (instructor_id, title, slug, description, price_cents)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(current_user_id)
    .bind(&payload.title)
    .bind(&slug)
    .bind(&payload.description)
    .bind(payload.price_cents.unwrap_or(0))
    .fetch_one(&app_state.db)
    .await;

    match course {
        Ok(course) => HttpResponse::Created().json(course),
        Err(e) => {
            error!("Failed to create course: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to create course"
            }))
        }
    }
}

#[get("/api/courses/{course_id}")]
async fn get_course(app_state: web::Data<AppState>, path: web::Path<i32>) -> impl Responder {
    let course_id = path.into_inner();

    let course = sqlx::query_as::<_, CourseWithInstructor>(
        "SELECT c.id, c.instructor_id, u.full_name AS instructor_name, c.title, c.slug,
                c.description, c.price_cents, c.status, c.created_at
         FROM courses c
         JOIN users u ON c.instructor_id = u.id
         WHERE c.id = $1",
    )
    .bind(course_id)
    .fetch_optional(&app_state.db)
    .await;

    match course {
        Ok(Some(course)) => HttpResponse::Ok().json(course),
        Ok(None) => HttpResponse::NotFound().json(json!({
            "error": "Course not found"
        })),
        Err(e) => {
            error!("Failed to fetch course: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }))
        }
    }
}

#[put("/api/courses/{course_id}/status")]
async fn update_course_status(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<UpdateCourseStatusRequest>,
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

    let course = sqlx::query_as::<_, Course>(
        "UPDATE courses SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(payload.status.clone())
    .bind(course_id)
    .fetch_one(&app_state.db)
    .await;

    match course {
        Ok(course) => HttpResponse::Ok().json(course),
        Err(e) => {
            error!("Failed to update course status: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to update course"
            }))
        }
    }
}

#[post("/api/courses/{course_id}/enroll")]
async fn enroll_in_course(
    req: HttpRequest,
    app_state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let course_id = path.into_inner();

    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    if !claims.is_student() {
        return HttpResponse::Forbidden().json(json!({
            "error": "Student access required"
        }));
    }

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let status = match sqlx::query_scalar::<_, CourseStatus>(
        "SELECT status FROM courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(status)) => status,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({
                "error": "Course not found"
            }))
        }
        Err(e) => {
            error!("Failed to fetch course: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    };

    if status != CourseStatus::Published {
        return HttpResponse::BadRequest().json(json!({
            "error": "Course is not open for enrollment"
        }));
    }

    match find_enrollment(&app_state.db, current_user_id, course_id).await {
        Ok(Some(_)) => {
            return HttpResponse::Conflict().json(json!({
                "error": "Already enrolled in this course"
            }))
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to check enrollment: {}", e);
            return HttpResponse::InternalServerError().json(json!({
                "error": "Database error"
            }));
        }
    }

    let enrollment = sqlx::query_as::<_, Enrollment>(
        "INSERT INTO enrollments (student_id, course_id) VALUES ($1, $2) RETURNING *",
    )
    .bind(current_user_id)
    .bind(course_id)
    .fetch_one(&app_state.db)
    .await;

    match enrollment {
        Ok(enrollment) => HttpResponse::Created().json(enrollment),
        Err(e) => {
            error!("Failed to create enrollment: {}", e);
            // The unique key on (student_id, course_id) can still fire under
            // concurrent enroll requests.
            HttpResponse::Conflict().json(json!({
                "error": "Already enrolled in this course"
            }))
        }
    }
}

#[get("/api/my/courses")]
async fn list_my_courses(req: HttpRequest, app_state: web::Data<AppState>) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let current_user_id = match get_current_user_id(&claims, &app_state.db).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let courses = sqlx::query_as::<_, EnrolledCourse>(
        "SELECT c.id AS course_id, c.title, u.full_name AS instructor_name,
                e.id AS enrollment_id, e.enrolled_at, e.progress, e.completed_at,
                e.certificate_url
         FROM enrollments e
         JOIN courses c ON e.course_id = c.id
         JOIN users u ON c.instructor_id = u.id
         WHERE e.student_id = $1
         ORDER BY e.enrolled_at DESC",
    )
    .bind(current_user_id)
    .fetch_all(&app_state.db)
    .await;

    match courses {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => {
            error!("Failed to fetch enrolled courses: {}", e);
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
    fn slugify_lowercases_and_hyphenates() {
        assert_eq!(slugify("Intro to Rust"), "intro-to-rust");
    }

    #[test]
    fn slugify_collapses_punctuation_runs() {
        assert_eq!(slugify("C++ & Systems -- Part 2!"), "c-systems-part-2");
    }

    #[test]
    fn slugify_trims_trailing_separators() {
        assert_eq!(slugify("  Databases!!! "), "databases");
    }

    #[test]
    fn unique_slug_keeps_base_as_prefix() {
        let unique = make_unique_slug("intro-to-rust");
        assert!(unique.starts_with("intro-to-rust-"));
        let suffix = &unique["intro-to-rust-".len()..];
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
