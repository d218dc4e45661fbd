pub mod assignments;
pub mod certificates;
pub mod courses;
pub mod curriculum;
pub mod error;
pub mod models;
pub mod progress;
pub mod quizzes;
pub mod users;

use actix_cors::Cors;
use actix_web::{middleware, web, App};
use sqlx::postgres::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jwt_secret: String,
}

pub fn create_app(
    app_state: web::Data<AppState>,
) -> App<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(app_state)
        .app_data(web::PayloadConfig::new(1024 * 1024)) // 1MB max payload
        .wrap(
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600),
        )
        .wrap(middleware::Logger::default())
        .configure(courses::init_routes)
        .configure(curriculum::init_routes)
        .configure(progress::init_routes)
        .configure(quizzes::init_routes)
        .configure(certificates::init_routes)
        .configure(assignments::init_routes)
}

pub async fn init_db(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPool::connect(database_url).await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
