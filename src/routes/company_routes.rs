// src/routes/company_routes.rs

use axum::{
    Json, Router,
    extract::State,
    routing::{get, patch},
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, CompanyRow},
    store,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/company", get(get_company))
        .route("/company", patch(update_company))
}

pub async fn get_company(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<CompanyRow>, ApiError> {
    let company = store::load_company(&state.db, auth.company_id).await?;
    Ok(Json(company))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: Option<String>,
    pub utc_offset_minutes: Option<i32>,
}

fn ensure_admin_or_manager(auth: &AuthContext) -> Result<(), ApiError> {
    // roles: 1 admin, 2 manager
    if auth.role == 1 || auth.role == 2 {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager can update company settings".into(),
        ))
    }
}

pub async fn update_company(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateCompanyRequest>,
) -> Result<Json<CompanyRow>, ApiError> {
    ensure_admin_or_manager(&auth)?;

    let name = req.name.as_deref().map(str::trim);
    if let Some(n) = name {
        if n.is_empty() {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "name must not be empty".into(),
            ));
        }
        if n.len() > 128 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "name is too long (max 128)".into(),
            ));
        }
    }
    if let Some(offset) = req.utc_offset_minutes {
        // UTC-14..UTC+14 covers every civil zone
        if !(-840..=840).contains(&offset) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "utc_offset_minutes must be between -840 and 840".into(),
            ));
        }
    }

    let company: CompanyRow = sqlx::query_as(
        r#"
        UPDATE company
        SET
          name = COALESCE($2, name),
          utc_offset_minutes = COALESCE($3, utc_offset_minutes)
        WHERE company_id = $1
        RETURNING company_id, name, utc_offset_minutes
        "#,
    )
    .bind(auth.company_id)
    .bind(name)
    .bind(req.utc_offset_minutes)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "company not found".into()))?;

    Ok(Json(company))
}
