use actix_web::HttpResponse;
use log::error;
use serde_json::json;
use std::fmt;

/// Error taxonomy for the progress/assessment engine. NotFound and Forbidden
/// must reach the caller as the matching HTTP status; Conflict covers the
/// rare uniqueness violations the upserts do not absorb.
#[derive(Debug)]
pub enum CoreError {
    NotFound(&'static str),
    Forbidden(&'static str),
    Conflict(&'static str),
    Database(sqlx::Error),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotFound(msg) => write!(f, "not found: {}", msg),
            CoreError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            CoreError::Conflict(msg) => write!(f, "conflict: {}", msg),
            CoreError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Database(e)
    }
}

impl CoreError {
    pub fn to_response(&self) -> HttpResponse {
        match self {
            CoreError::NotFound(msg) => HttpResponse::NotFound().json(json!({ "error": msg })),
            CoreError::Forbidden(msg) => HttpResponse::Forbidden().json(json!({ "error": msg })),
            CoreError::Conflict(msg) => HttpResponse::Conflict().json(json!({ "error": msg })),
            CoreError::Database(e) => {
                error!("Database error: {}", e);
                HttpResponse::InternalServerError().json(json!({ "error": "Database error" }))
            }
        }
    }
}
