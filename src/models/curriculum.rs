use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "lesson_content_type", rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Text,
    Quiz,
    Assignment,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Section {
    pub id: i32,
    pub course_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct Lesson {
    pub id: i32,
    pub section_id: i32,
    pub title: String,
    pub content_type: ContentType,
    pub video_url: Option<String>,
    pub text_content: Option<String>,
    pub duration: Option<i32>,
    pub order_index: i32,
    pub is_preview: bool,
    pub created_at: DateTime<Utc>,
}
