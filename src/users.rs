use actix_web::{HttpRequest, HttpResponse};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;

use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // email
    pub exp: usize,         // expiration time
    pub roles: Vec<String>, // user roles
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }

    pub fn is_instructor(&self) -> bool {
        self.roles.iter().any(|r| r == "instructor")
    }

    pub fn is_student(&self) -> bool {
        self.roles.iter().any(|r| r == "student")
    }
}

/// Extract and validate JWT token from request.
/// Returns Claims if valid, or an error HttpResponse.
pub fn verify_token(req: &HttpRequest, app_state: &AppState) -> Result<Claims, HttpResponse> {
    let auth_header = req.headers().get("Authorization");

    let token = match auth_header {
        Some(header) => {
            let header_str = header.to_str().unwrap_or("");
            if header_str.starts_with("Bearer ") {
                &header_str[7..]
            } else {
                return Err(HttpResponse::Unauthorized().json(json!({
                    "error": "Invalid authorization header"
                })));
            }
        }
        None => {
            return Err(HttpResponse::Unauthorized().json(json!({
                "error": "Missing authorization header"
            })));
        }
    };

    let claims = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(app_state.jwt_secret.as_ref()),
        &Validation::default(),
    ) {
        Ok(data) => data.claims,
        Err(_) => {
            return Err(HttpResponse::Unauthorized().json(json!({
                "error": "Invalid token"
            })));
        }
    };

    Ok(claims)
}

/// Resolve the authenticated user's id from the token subject.
pub async fn get_current_user_id(claims: &Claims, db: &PgPool) -> Result<i32, HttpResponse> {
    let user_id = sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE email = $1")
        .bind(&claims.sub)
        .fetch_optional(db)
        .await;

    match user_id {
        Ok(Some(id)) => Ok(id),
        _ => Err(HttpResponse::Unauthorized().json(json!({
            "error": "User not found"
        }))),
    }
}
