// src/routes/consultation_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, ConsultationProcedureRow, SchedulingStatus},
    notify::notify_best_effort,
    scheduling::conflict::effective_duration,
    scheduling::fanout::{self, FanOutItem, SkippedItem},
    scheduling::status,
    store,
};

fn is_admin(auth: &AuthContext) -> bool {
    auth.role == 1
}
fn is_manager(auth: &AuthContext) -> bool {
    auth.role == 2
}
fn is_dentist(auth: &AuthContext) -> bool {
    auth.role == 3
}
fn is_receptionist(auth: &AuthContext) -> bool {
    auth.role == 4
}

/// Consultations are clinical records: the managing roles handle them, and
/// dentists handle their own.
fn ensure_clinical(auth: &AuthContext, dentist_user_id: Uuid) -> Result<(), ApiError> {
    if is_admin(auth) || is_manager(auth) || is_receptionist(auth) {
        return Ok(());
    }
    if is_dentist(auth) && dentist_user_id == auth.user_id {
        return Ok(());
    }
    Err(ApiError::Forbidden(
        "FORBIDDEN",
        "You cannot manage consultations for another dentist".into(),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/consultations", get(list_consultations).post(create_consultation))
        .route(
            "/consultations/{consultation_id}",
            get(get_consultation).put(update_consultation),
        )
}

/* ============================================================
   Response DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct PersonBrief {
    pub id: Uuid,
    pub display: String,
}

#[derive(Debug, Serialize)]
pub struct ProcedureSnapshotDto {
    pub position: i32,
    pub procedure_id: Uuid,
    pub display_name: String,
    pub duration_min: i32,
}

#[derive(Debug, Serialize)]
pub struct ConsultationDto {
    pub consultation_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub status: SchedulingStatus,
    pub available_actions: Vec<&'static str>,
    pub appointment_id: Option<Uuid>,
    pub clinical_notes: Option<String>,
    pub observations: Option<String>,
    pub patient: PersonBrief,
    pub dentist: PersonBrief,
    pub procedures: Vec<ProcedureSnapshotDto>,
}

/// Outcome of the fan-out booking a consultation triggers.
#[derive(Debug, Serialize)]
pub struct FanOutOutcomeDto {
    pub booked: Vec<FanOutBookedDto>,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Serialize)]
pub struct FanOutBookedDto {
    pub appointment_id: Uuid,
    pub display_name: String,
    pub scheduled_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct CreateConsultationResponse {
    pub consultation: ConsultationDto,
    pub fan_out: FanOutOutcomeDto,
}

#[derive(Debug, sqlx::FromRow)]
struct ConsultationJoinRow {
    consultation_id: Uuid,
    scheduled_at: NaiveDateTime,
    status: SchedulingStatus,
    appointment_id: Option<Uuid>,
    clinical_notes: Option<String>,
    observations: Option<String>,
    patient_id: Uuid,
    patient_name: String,
    dentist_id: Uuid,
    dentist_name: String,
}

const CONSULTATION_JOIN_SELECT: &str = r#"
    SELECT
      c.consultation_id,
      c.scheduled_at,
      c.status,
      c.appointment_id,
      c.clinical_notes,
      c.observations,

      pt.patient_id,
      pt.full_name AS patient_name,

      d.user_id AS dentist_id,
      d.display_name AS dentist_name

    FROM consultation c
    JOIN patient pt ON pt.patient_id = c.patient_id
    JOIN app_user d ON d.user_id = c.dentist_user_id
"#;

async fn load_snapshot(
    db: &sqlx::PgPool,
    consultation_id: Uuid,
) -> Result<Vec<ProcedureSnapshotDto>, ApiError> {
    let rows: Vec<ConsultationProcedureRow> = sqlx::query_as(
        r#"
        SELECT consultation_id, position, procedure_id, display_name, duration_min
        FROM consultation_procedure
        WHERE consultation_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(consultation_id)
    .fetch_all(db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(rows
        .into_iter()
        .map(|r| ProcedureSnapshotDto {
            position: r.position,
            procedure_id: r.procedure_id,
            display_name: r.display_name,
            duration_min: r.duration_min,
        })
        .collect())
}

fn row_to_dto(r: ConsultationJoinRow, procedures: Vec<ProcedureSnapshotDto>) -> ConsultationDto {
    ConsultationDto {
        consultation_id: r.consultation_id,
        scheduled_at: r.scheduled_at,
        status: r.status,
        available_actions: status::available_actions(r.status),
        appointment_id: r.appointment_id,
        clinical_notes: r.clinical_notes,
        observations: r.observations,
        patient: PersonBrief {
            id: r.patient_id,
            display: r.patient_name,
        },
        dentist: PersonBrief {
            id: r.dentist_id,
            display: r.dentist_name,
        },
        procedures,
    }
}

async fn load_consultation_dto(
    state: &AppState,
    company_id: Uuid,
    consultation_id: Uuid,
) -> Result<ConsultationDto, ApiError> {
    let sql = format!(
        r#"{CONSULTATION_JOIN_SELECT}
        WHERE c.company_id = $1 AND c.consultation_id = $2
        "#
    );

    let row: Option<ConsultationJoinRow> = sqlx::query_as(&sql)
        .bind(company_id)
        .bind(consultation_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound("NOT_FOUND", "consultation not found".into()));
    };

    let procedures = load_snapshot(&state.db, consultation_id).await?;
    Ok(row_to_dto(row, procedures))
}

/* ============================================================
   GET /consultations
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub patient_id: Option<Uuid>,
    pub dentist_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

pub async fn list_consultations(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<ConsultationDto>>>, ApiError> {
    if auth.role == 0 {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "You do not have permission to list consultations".into(),
        ));
    }

    // Dentists see their own consultations only.
    let dentist_filter = if is_dentist(&auth) {
        Some(auth.user_id)
    } else {
        q.dentist_id
    };

    let range_start = q.start_date.map(|d| d.and_hms_opt(0, 0, 0).unwrap());
    let range_end = q
        .end_date
        .map(|d| (d + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap());

    let sql = format!(
        r#"{CONSULTATION_JOIN_SELECT}
        WHERE c.company_id = $1
          AND ($2::uuid IS NULL OR c.patient_id = $2)
          AND ($3::uuid IS NULL OR c.dentist_user_id = $3)
          AND ($4::timestamp IS NULL OR c.scheduled_at >= $4)
          AND ($5::timestamp IS NULL OR c.scheduled_at < $5)
        ORDER BY c.scheduled_at DESC
        "#
    );

    let rows: Vec<ConsultationJoinRow> = sqlx::query_as(&sql)
        .bind(auth.company_id)
        .bind(q.patient_id)
        .bind(dentist_filter)
        .bind(range_start)
        .bind(range_end)
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let procedures = load_snapshot(&state.db, row.consultation_id).await?;
        out.push(row_to_dto(row, procedures));
    }

    Ok(Json(ApiOk { data: out }))
}

/* ============================================================
   GET /consultations/{id}
   ============================================================ */

pub async fn get_consultation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(consultation_id): Path<Uuid>,
) -> Result<Json<ApiOk<ConsultationDto>>, ApiError> {
    let dto = load_consultation_dto(&state, auth.company_id, consultation_id).await?;

    if is_dentist(&auth) && dto.dentist.id != auth.user_id {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Dentists can only view their own consultations".into(),
        ));
    }

    Ok(Json(ApiOk { data: dto }))
}

/* ============================================================
   POST /consultations (create + fan-out booking)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateConsultationRequest {
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    /// Resolved against the tenant catalog and snapshotted at creation.
    pub procedure_ids: Vec<Uuid>,
    pub clinical_notes: Option<String>,
    pub observations: Option<String>,
}

pub async fn create_consultation(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateConsultationRequest>,
) -> Result<Json<ApiOk<CreateConsultationResponse>>, ApiError> {
    ensure_clinical(&auth, req.dentist_id)?;

    let company = store::load_company(&state.db, auth.company_id).await?;
    fanout::validate_lead_time(req.scheduled_at, company.local_now())?;

    store::ensure_patient(&state.db, auth.company_id, req.patient_id).await?;
    store::ensure_dentist(&state.db, auth.company_id, req.dentist_id).await?;

    let procedures =
        store::resolve_procedures(&state.db, auth.company_id, &req.procedure_ids).await?;
    let items: Vec<FanOutItem> = procedures
        .iter()
        .map(|p| FanOutItem {
            procedure_id: p.procedure_id,
            display_name: p.name.clone(),
            duration_min: effective_duration(p.duration_min),
        })
        .collect();

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    store::lock_dentist_schedule(&mut *tx, auth.company_id, req.dentist_id).await?;
    let bookings =
        store::load_dentist_bookings(&mut *tx, auth.company_id, req.dentist_id).await?;

    // The consultation is persisted first; conflicting sub-appointments are
    // skipped without rolling it back.
    let consultation_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO consultation (
          company_id,
          patient_id,
          dentist_user_id,
          scheduled_at,
          status,
          clinical_notes,
          observations
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING consultation_id
        "#,
    )
    .bind(auth.company_id)
    .bind(req.patient_id)
    .bind(req.dentist_id)
    .bind(req.scheduled_at)
    .bind(SchedulingStatus::Agendado)
    .bind(&req.clinical_notes)
    .bind(&req.observations)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("CONSULTATION_CREATE_FAILED", format!("{e}")))?;

    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO consultation_procedure (
              consultation_id, position, procedure_id, display_name, duration_min
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(consultation_id)
        .bind(position as i32)
        .bind(item.procedure_id)
        .bind(&item.display_name)
        .bind(item.duration_min as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    }

    let plan = fanout::plan_fan_out(consultation_id, req.scheduled_at, &items, &bookings);

    let mut booked = Vec::with_capacity(plan.booked.len());
    for planned in &plan.booked {
        let appointment_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO appointment (
              company_id,
              patient_id,
              dentist_user_id,
              procedure_id,
              scheduled_at,
              status,
              notes,
              consultation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING appointment_id
            "#,
        )
        .bind(auth.company_id)
        .bind(req.patient_id)
        .bind(req.dentist_id)
        .bind(planned.procedure_id)
        .bind(planned.scheduled_at)
        .bind(SchedulingStatus::Agendado)
        .bind(&planned.note)
        .bind(consultation_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

        booked.push(FanOutBookedDto {
            appointment_id,
            display_name: planned.display_name.clone(),
            scheduled_at: planned.scheduled_at,
        });
    }

    // Single backlink: only the first synthesized appointment is linked, so
    // consultation-side status changes target exactly one appointment.
    if let Some(first) = booked.first() {
        sqlx::query(
            r#"
            UPDATE consultation
            SET appointment_id = $1
            WHERE consultation_id = $2
            "#,
        )
        .bind(first.appointment_id)
        .bind(consultation_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    for b in &booked {
        notify_best_effort(
            &state,
            auth.company_id,
            req.patient_id,
            b.appointment_id,
            format!(
                "Sua consulta de {} está agendada para {}.",
                b.display_name,
                b.scheduled_at.format("%d/%m/%Y %H:%M")
            ),
        );
    }

    let consultation = load_consultation_dto(&state, auth.company_id, consultation_id).await?;
    Ok(Json(ApiOk {
        data: CreateConsultationResponse {
            consultation,
            fan_out: FanOutOutcomeDto {
                booked,
                skipped: plan.skipped,
            },
        },
    }))
}

/* ============================================================
   PUT /consultations/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateConsultationRequest {
    pub status: Option<SchedulingStatus>,
    pub clinical_notes: Option<Option<String>>,
    pub observations: Option<Option<String>>,
}

pub async fn update_consultation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(consultation_id): Path<Uuid>,
    Json(req): Json<UpdateConsultationRequest>,
) -> Result<Json<ApiOk<ConsultationDto>>, ApiError> {
    let current: Option<crate::models::ConsultationRow> = sqlx::query_as(
        r#"
        SELECT
          consultation_id, company_id, patient_id, dentist_user_id, appointment_id,
          scheduled_at, status, clinical_notes, observations, created_at, updated_at
        FROM consultation
        WHERE company_id = $1 AND consultation_id = $2
        "#,
    )
    .bind(auth.company_id)
    .bind(consultation_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(current) = current else {
        return Err(ApiError::NotFound("NOT_FOUND", "consultation not found".into()));
    };

    ensure_clinical(&auth, current.dentist_user_id)?;

    if let Some(new_status) = req.status {
        // Re-sending the current status is a no-op, not a transition.
        if new_status != current.status {
            status::validate_transition(current.status, new_status)?;
        }
    }

    sqlx::query(
        r#"
        UPDATE consultation
        SET
          status         = COALESCE($3, status),
          clinical_notes = COALESCE($4, clinical_notes),
          observations   = COALESCE($5, observations),
          updated_at     = now()
        WHERE company_id = $1 AND consultation_id = $2
        "#,
    )
    .bind(auth.company_id)
    .bind(consultation_id)
    .bind(req.status)
    .bind(req.clinical_notes.unwrap_or(None))
    .bind(req.observations.unwrap_or(None))
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("CONSULTATION_UPDATE_FAILED", format!("{e}")))?;

    if let Some(new_status) = req.status {
        if new_status != current.status {
            if let Some(appointment_id) = current.appointment_id {
                sync_linked_appointment(&state, auth.company_id, appointment_id, new_status).await;
            }
        }
    }

    let dto = load_consultation_dto(&state, auth.company_id, consultation_id).await?;
    Ok(Json(ApiOk { data: dto }))
}

/// Mirror a consultation status change onto its explicitly linked
/// appointment - that one and no other, so same-day appointments of the
/// same patient/dentist are never mass-updated. Best-effort.
async fn sync_linked_appointment(
    state: &AppState,
    company_id: Uuid,
    appointment_id: Uuid,
    new_status: SchedulingStatus,
) {
    let res = sqlx::query(
        r#"
        UPDATE appointment
        SET status = $1, updated_at = now()
        WHERE company_id = $2 AND appointment_id = $3
        "#,
    )
    .bind(new_status)
    .bind(company_id)
    .bind(appointment_id)
    .execute(&state.db)
    .await;

    if let Err(e) = res {
        warn!(
            appointment_id = %appointment_id,
            "appointment status sync failed (ignored): {e}"
        );
    }
}
