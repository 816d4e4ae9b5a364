use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};

use crate::{
    auth::{generate_access_token, hash_access_token, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{role_to_string, *},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

async fn load_company_profile(
    state: &AppState,
    company_id: uuid::Uuid,
) -> Result<CompanyProfile, ApiError> {
    let row: Option<CompanyRow> = sqlx::query_as(
        r#"
        SELECT company_id, name, utc_offset_minutes
        FROM company
        WHERE company_id = $1
        "#,
    )
    .bind(company_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err(ApiError::Internal("user company is missing".into()));
    };

    Ok(CompanyProfile {
        company_id: row.company_id,
        name: row.name,
        utc_offset_minutes: row.utc_offset_minutes,
    })
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "username and password are required".into(),
        ));
    }

    // 1) Load app_user
    let user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, company_id, username, display_name, password_hash, roles, is_active
        FROM app_user
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }

    // 2) Verify password
    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    // 3) Mint opaque session token; only its hash is stored
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    sqlx::query(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user.user_id)
    .bind(&token_hash)
    .bind(expires_at)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let company = load_company_profile(&state, user.company_id).await?;

    Ok(Json(LoginResponse {
        data: LoginResponseData {
            access_token,
            expires_at,
            user: UserProfile {
                user_id: user.user_id,
                username: user.username,
                display_name: user.display_name,
                roles: vec![role_to_string(user.roles)],
            },
            company,
        },
    }))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<MeResponse>, ApiError> {
    #[derive(sqlx::FromRow)]
    struct MeRow {
        user_id: uuid::Uuid,
        username: String,
        display_name: String,
        roles: i16,
        expires_at: chrono::DateTime<Utc>,
    }

    let row: MeRow = sqlx::query_as(
        r#"
        SELECT u.user_id, u.username, u.display_name, u.roles, st.expires_at
        FROM app_user u
        JOIN session_token st ON st.user_id = u.user_id
        WHERE st.session_token_id = $1
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    let company = load_company_profile(&state, auth.company_id).await?;

    Ok(Json(MeResponse {
        data: MeResponseData {
            user: UserProfile {
                user_id: row.user_id,
                username: row.username,
                display_name: row.display_name,
                roles: vec![role_to_string(row.roles)],
            },
            company,
            session: SessionInfo {
                session_token_id: auth.session_token_id,
                expires_at: row.expires_at,
            },
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}
