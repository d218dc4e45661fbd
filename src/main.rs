use actix_web::{web, HttpServer};
use learnhub_backend::{create_app, init_db, AppState};
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables from .env if present
    dotenv::dotenv().ok();

    // Get configuration from environment - fail if not set
    let database_url = env::var("DATABASE_URL").map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "DATABASE_URL environment variable is required",
        )
    })?;

    let jwt_secret = env::var("JWT_SECRET").map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "JWT_SECRET environment variable is required",
        )
    })?;

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    // Initialize database
    let db_pool = init_db(&database_url).await.map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to initialize database: {}", e),
        )
    })?;

    log::info!("Database initialized successfully");

    let app_state = web::Data::new(AppState {
        db: db_pool,
        jwt_secret,
    });

    log::info!("Starting server on {}", bind_addr);

    HttpServer::new(move || create_app(app_state.clone()))
        .bind(bind_addr)?
        .run()
        .await
}
