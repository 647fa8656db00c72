use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Health {
    pub up: bool,
}

pub async fn health_handler() -> Json<Health> {
    Json(Health { up: true })
}
