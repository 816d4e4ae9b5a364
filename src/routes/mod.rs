use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod company_routes;
pub mod consultation_routes;
pub mod directory_routes;
pub mod home_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", company_routes::router())
        .nest("/api/v1", directory_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", consultation_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}
