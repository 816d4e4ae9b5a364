// src/routes/directory_routes.rs
//
// Read-only directory the scheduling UI books against: patients, dentists
// and the procedure catalog of the caller's tenant.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, ProcedureRow},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(list_patients))
        .route("/dentists", get(list_dentists))
        .route("/procedures", get(list_procedures))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub patient_id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PatientQuery {
    /// Optional name search, case-insensitive substring.
    pub q: Option<String>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<PatientQuery>,
) -> Result<Json<Vec<PatientRow>>, ApiError> {
    let pattern = query
        .q
        .as_deref()
        .map(|s| format!("%{}%", s.trim()))
        .filter(|s| s.len() > 2);

    let rows: Vec<PatientRow> = sqlx::query_as(
        r#"
        SELECT patient_id, full_name, phone, email
        FROM patient
        WHERE company_id = $1
          AND is_active = true
          AND ($2::text IS NULL OR full_name ILIKE $2)
        ORDER BY full_name ASC
        "#,
    )
    .bind(auth.company_id)
    .bind(pattern)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DentistRow {
    pub user_id: Uuid,
    pub display_name: String,
}

pub async fn list_dentists(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<DentistRow>>, ApiError> {
    // roles: 3 = dentist
    let rows: Vec<DentistRow> = sqlx::query_as(
        r#"
        SELECT user_id, display_name
        FROM app_user
        WHERE company_id = $1
          AND roles = 3
          AND is_active = true
        ORDER BY display_name ASC
        "#,
    )
    .bind(auth.company_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

pub async fn list_procedures(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<ProcedureRow>>, ApiError> {
    let rows: Vec<ProcedureRow> = sqlx::query_as(
        r#"
        SELECT
          procedure_id, company_id, name, duration_min, price_cents,
          is_active, created_at, updated_at
        FROM procedure_catalog
        WHERE company_id = $1 AND is_active = true
        ORDER BY name ASC
        "#,
    )
    .bind(auth.company_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}
