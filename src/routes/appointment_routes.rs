// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::{ApiError, SchedulingError},
    middleware::auth_context::AuthContext,
    models::{AppState, SchedulingStatus},
    notify::notify_best_effort,
    scheduling::{conflict, slots, status},
    store,
};

/*
Roles (app_user.roles):
0 patient
1 admin
2 manager
3 dentist
4 receptionist
*/

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

fn can_manage_schedule(auth: &AuthContext) -> bool {
    is_admin(auth) || is_manager(auth) || is_receptionist(auth)
}

fn ensure_manage(auth: &AuthContext) -> Result<(), ApiError> {
    if can_manage_schedule(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin/manager/receptionist can manage the schedule".into(),
        ))
    }
}

/// Dentists may only look at their own calendar; managing roles may pick any
/// dentist (or none, for the whole clinic in list views).
fn resolve_dentist_scope(
    auth: &AuthContext,
    requested: Option<Uuid>,
) -> Result<Option<Uuid>, ApiError> {
    if can_manage_schedule(auth) {
        return Ok(requested);
    }
    if is_dentist(auth) {
        return match requested {
            None => Ok(Some(auth.user_id)),
            Some(id) if id == auth.user_id => Ok(Some(id)),
            Some(_) => Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Dentists can only view their own schedule".into(),
            )),
        };
    }
    Err(ApiError::Forbidden(
        "FORBIDDEN",
        "You do not have permission to view the schedule".into(),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/check-availability", post(check_availability))
        .route("/appointments/cleanup_cancelled", post(cleanup_cancelled))
        .route("/appointments/grid", get(day_grid))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).put(update_appointment),
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
pub struct ProcedureBrief {
    pub id: Uuid,
    pub name: String,
    pub duration_min: i64,
    pub price_cents: i32,
}

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub slot_span: i64,
    pub status: SchedulingStatus,
    pub available_actions: Vec<&'static str>,
    pub notes: Option<String>,
    pub consultation_id: Option<Uuid>,
    pub patient: PersonBrief,
    pub dentist: PersonBrief,
    pub procedure: ProcedureBrief,
}

#[derive(Debug, sqlx::FromRow)]
struct AppointmentJoinRow {
    appointment_id: Uuid,
    scheduled_at: NaiveDateTime,
    status: SchedulingStatus,
    notes: Option<String>,
    consultation_id: Option<Uuid>,
    patient_id: Uuid,
    patient_name: String,
    dentist_id: Uuid,
    dentist_name: String,
    procedure_id: Uuid,
    procedure_name: String,
    duration_min: Option<i32>,
    price_cents: i32,
}

const APPOINTMENT_JOIN_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.scheduled_at,
      a.status,
      a.notes,
      a.consultation_id,

      pt.patient_id,
      pt.full_name AS patient_name,

      d.user_id AS dentist_id,
      d.display_name AS dentist_name,

      pc.procedure_id,
      pc.name AS procedure_name,
      pc.duration_min,
      pc.price_cents

    FROM appointment a
    JOIN patient pt ON pt.patient_id = a.patient_id
    JOIN app_user d ON d.user_id = a.dentist_user_id
    JOIN procedure_catalog pc ON pc.procedure_id = a.procedure_id
"#;

fn row_to_dto(r: AppointmentJoinRow) -> AppointmentDto {
    let duration = conflict::effective_duration(r.duration_min);
    AppointmentDto {
        appointment_id: r.appointment_id,
        scheduled_at: r.scheduled_at,
        ends_at: r.scheduled_at + Duration::minutes(duration),
        slot_span: slots::slot_span(duration),
        status: r.status,
        available_actions: status::available_actions(r.status),
        notes: r.notes,
        consultation_id: r.consultation_id,
        patient: PersonBrief {
            id: r.patient_id,
            display: r.patient_name,
        },
        dentist: PersonBrief {
            id: r.dentist_id,
            display: r.dentist_name,
        },
        procedure: ProcedureBrief {
            id: r.procedure_id,
            name: r.procedure_name,
            duration_min: duration,
            price_cents: r.price_cents,
        },
    }
}

/* ============================================================
   GET /appointments
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub dentist_id: Option<Uuid>,
    pub include_cancelled: Option<bool>,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDto>>>, ApiError> {
    let (range_start, range_end) = match (q.date, q.start_date, q.end_date) {
        (Some(d), _, _) => (d, d),
        (None, Some(s), Some(e)) => (s, e),
        _ => {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "date or start_date/end_date is required".into(),
            ));
        }
    };
    if range_end < range_start {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "end_date must not be before start_date".into(),
        ));
    }

    let dentist_id = resolve_dentist_scope(&auth, q.dentist_id)?;
    let include_cancelled = q.include_cancelled.unwrap_or(false);

    // Range is inclusive on civil dates: [start 00:00, end+1d 00:00)
    let start_ts = range_start.and_hms_opt(0, 0, 0).unwrap();
    let end_ts = (range_end + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap();

    let sql = format!(
        r#"{APPOINTMENT_JOIN_SELECT}
        WHERE a.company_id = $1
          AND a.scheduled_at >= $2
          AND a.scheduled_at <  $3
          AND ($4::uuid IS NULL OR a.dentist_user_id = $4)
          AND ($5 OR a.status <> $6)
        ORDER BY a.scheduled_at ASC
        "#
    );

    let rows: Vec<AppointmentJoinRow> = sqlx::query_as(&sql)
        .bind(auth.company_id)
        .bind(start_ts)
        .bind(end_ts)
        .bind(dentist_id)
        .bind(include_cancelled)
        .bind(SchedulingStatus::Cancelado)
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: rows.into_iter().map(row_to_dto).collect(),
    }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let sql = format!(
        r#"{APPOINTMENT_JOIN_SELECT}
        WHERE a.company_id = $1 AND a.appointment_id = $2
        "#
    );

    let row: Option<AppointmentJoinRow> = sqlx::query_as(&sql)
        .bind(auth.company_id)
        .bind(appointment_id)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(row) = row else {
        return Err(ApiError::NotFound("NOT_FOUND", "appointment not found".into()));
    };

    if is_dentist(&auth) && row.dentist_id != auth.user_id {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Dentists can only view their own appointments".into(),
        ));
    }

    Ok(Json(ApiOk { data: row_to_dto(row) }))
}

/* ============================================================
   POST /appointments (create)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub procedure_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub notes: Option<String>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_manage(&auth)?;

    store::ensure_patient(&state.db, auth.company_id, req.patient_id).await?;
    store::ensure_dentist(&state.db, auth.company_id, req.dentist_id).await?;
    let procedure = store::load_procedure(&state.db, auth.company_id, req.procedure_id).await?;
    let duration = conflict::effective_duration(procedure.duration_min);

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Serialize concurrent bookings for this dentist, then check-then-write
    // inside the same transaction.
    store::lock_dentist_schedule(&mut *tx, auth.company_id, req.dentist_id).await?;
    let bookings = store::load_dentist_bookings(&mut *tx, auth.company_id, req.dentist_id).await?;

    if let Some(hit) = conflict::find_conflict(req.scheduled_at, duration, &bookings, None) {
        return Err(SchedulingError::Conflict {
            procedure: hit.procedure_name.clone(),
            start: hit.start,
            end: hit.end(),
        }
        .into());
    }

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment (
          company_id,
          patient_id,
          dentist_user_id,
          procedure_id,
          scheduled_at,
          status,
          notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING appointment_id
        "#,
    )
    .bind(auth.company_id)
    .bind(req.patient_id)
    .bind(req.dentist_id)
    .bind(req.procedure_id)
    .bind(req.scheduled_at)
    .bind(SchedulingStatus::Agendado)
    .bind(req.notes)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_CREATE_FAILED", format!("{e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    notify_best_effort(
        &state,
        auth.company_id,
        req.patient_id,
        appointment_id,
        format!(
            "Sua consulta de {} está agendada para {}.",
            procedure.name,
            req.scheduled_at.format("%d/%m/%Y %H:%M")
        ),
    );

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/* ============================================================
   PUT /appointments/{id}
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub scheduled_at: Option<NaiveDateTime>,
    pub dentist_id: Option<Uuid>,
    pub procedure_id: Option<Uuid>,
    pub status: Option<SchedulingStatus>,
    pub notes: Option<Option<String>>,
}

impl UpdateAppointmentRequest {
    fn is_status_only(&self) -> bool {
        self.scheduled_at.is_none()
            && self.dentist_id.is_none()
            && self.procedure_id.is_none()
            && self.notes.is_none()
    }
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let current: Option<crate::models::AppointmentRow> = sqlx::query_as(
        r#"
        SELECT
          appointment_id, company_id, patient_id, dentist_user_id, procedure_id,
          scheduled_at, status, notes, consultation_id, created_at, updated_at
        FROM appointment
        WHERE company_id = $1 AND appointment_id = $2
        "#,
    )
    .bind(auth.company_id)
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let Some(current) = current else {
        return Err(ApiError::NotFound("NOT_FOUND", "appointment not found".into()));
    };

    // Managing roles may change anything; the owning dentist may move the
    // workflow along (start / complete / cancel) but not reschedule.
    if !can_manage_schedule(&auth) {
        let dentist_owns = is_dentist(&auth) && current.dentist_user_id == auth.user_id;
        if !(dentist_owns && req.is_status_only()) {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Only admin/manager/receptionist can reschedule appointments".into(),
            ));
        }
    }

    if let Some(new_status) = req.status {
        // Re-sending the current status is a no-op, not a transition.
        if new_status != current.status {
            status::validate_transition(current.status, new_status)?;
        }
    }

    let new_dentist = req.dentist_id.unwrap_or(current.dentist_user_id);
    let new_procedure_id = req.procedure_id.unwrap_or(current.procedure_id);
    let new_start = req.scheduled_at.unwrap_or(current.scheduled_at);
    let rescheduling = new_dentist != current.dentist_user_id
        || new_procedure_id != current.procedure_id
        || new_start != current.scheduled_at;

    if new_dentist != current.dentist_user_id {
        store::ensure_dentist(&state.db, auth.company_id, new_dentist).await?;
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if rescheduling {
        let procedure = store::load_procedure(&mut *tx, auth.company_id, new_procedure_id).await?;
        let duration = conflict::effective_duration(procedure.duration_min);

        store::lock_dentist_schedule(&mut *tx, auth.company_id, new_dentist).await?;
        let bookings =
            store::load_dentist_bookings(&mut *tx, auth.company_id, new_dentist).await?;

        if let Some(hit) =
            conflict::find_conflict(new_start, duration, &bookings, Some(appointment_id))
        {
            return Err(SchedulingError::Conflict {
                procedure: hit.procedure_name.clone(),
                start: hit.start,
                end: hit.end(),
            }
            .into());
        }
    }

    sqlx::query(
        r#"
        UPDATE appointment
        SET
          scheduled_at    = COALESCE($3, scheduled_at),
          dentist_user_id = COALESCE($4, dentist_user_id),
          procedure_id    = COALESCE($5, procedure_id),
          status          = COALESCE($6, status),
          notes           = COALESCE($7, notes),
          updated_at      = now()
        WHERE company_id = $1 AND appointment_id = $2
        "#,
    )
    .bind(auth.company_id)
    .bind(appointment_id)
    .bind(req.scheduled_at)
    .bind(req.dentist_id)
    .bind(req.procedure_id)
    .bind(req.status)
    .bind(req.notes.unwrap_or(None))
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if let Some(new_status) = req.status {
        if new_status != current.status {
            sync_consultations_to_appointment(&state, &current, new_start, new_status).await;
        }
    }

    get_appointment(State(state), auth, Path(appointment_id)).await
}

/// Propagate an appointment status change to its consultations: the one
/// explicitly linked via appointment_id, plus unlinked ones of the same
/// patient/dentist/civil date. Best-effort: a failure here is logged and
/// never rolls back the appointment update that triggered it.
async fn sync_consultations_to_appointment(
    state: &AppState,
    appointment: &crate::models::AppointmentRow,
    scheduled_at: NaiveDateTime,
    new_status: SchedulingStatus,
) {
    let res = sqlx::query(
        r#"
        UPDATE consultation
        SET status = $1, updated_at = now()
        WHERE company_id = $2
          AND (
            appointment_id = $3
            OR (
              appointment_id IS NULL
              AND patient_id = $4
              AND dentist_user_id = $5
              AND scheduled_at::date = $6
            )
          )
        "#,
    )
    .bind(new_status)
    .bind(appointment.company_id)
    .bind(appointment.appointment_id)
    .bind(appointment.patient_id)
    .bind(appointment.dentist_user_id)
    .bind(scheduled_at.date())
    .execute(&state.db)
    .await;

    match res {
        Ok(done) => {
            if done.rows_affected() > 0 {
                tracing::info!(
                    appointment_id = %appointment.appointment_id,
                    consultations = done.rows_affected(),
                    "propagated status {new_status} to linked consultations"
                );
            }
        }
        Err(e) => {
            warn!(
                appointment_id = %appointment.appointment_id,
                "consultation status sync failed (ignored): {e}"
            );
        }
    }
}

/* ============================================================
   POST /appointments/check-availability
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CheckAvailabilityRequest {
    pub dentist_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub procedure_id: Uuid,
    pub exclude_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
    pub conflicting_appointment: Option<ConflictBrief>,
}

#[derive(Debug, Serialize)]
pub struct ConflictBrief {
    pub appointment_id: Uuid,
    pub procedure_name: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}

pub async fn check_availability(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CheckAvailabilityRequest>,
) -> Result<Json<ApiOk<AvailabilityResponse>>, ApiError> {
    let procedure = store::load_procedure(&state.db, auth.company_id, req.procedure_id).await?;
    let duration = conflict::effective_duration(procedure.duration_min);

    // Pure read; no lock. The authoritative check re-runs under the
    // advisory lock when the booking is actually written.
    let bookings =
        store::load_dentist_bookings(&state.db, auth.company_id, req.dentist_id).await?;
    let hit = conflict::find_conflict(req.scheduled_at, duration, &bookings, req.exclude_id);

    Ok(Json(ApiOk {
        data: AvailabilityResponse {
            available: hit.is_none(),
            conflicting_appointment: hit.map(|b| ConflictBrief {
                appointment_id: b.appointment_id,
                procedure_name: b.procedure_name.clone(),
                starts_at: b.start,
                ends_at: b.end(),
            }),
        },
    }))
}

/* ============================================================
   GET /appointments/grid  (slot states for one dentist-day)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct GridQuery {
    pub date: NaiveDate,
    pub dentist_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct GridSlotDto {
    pub time: NaiveDateTime,
    pub state: &'static str,
    pub appointment_id: Option<Uuid>,
}

pub async fn day_grid(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<GridQuery>,
) -> Result<Json<ApiOk<Vec<GridSlotDto>>>, ApiError> {
    let Some(dentist_id) = resolve_dentist_scope(&auth, q.dentist_id)? else {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "dentist_id is required".into(),
        ));
    };

    let bookings = store::load_dentist_bookings(&state.db, auth.company_id, dentist_id).await?;

    let grid = slots::day_slots(q.date)
        .into_iter()
        .map(|slot| {
            if let Some(b) = bookings.iter().find(|b| slots::is_starting_slot(b.start, slot)) {
                GridSlotDto {
                    time: slot,
                    state: "starting",
                    appointment_id: Some(b.appointment_id),
                }
            } else if let Some(b) = bookings
                .iter()
                .find(|b| slots::is_continuation_slot(b.start, b.duration_min, slot))
            {
                GridSlotDto {
                    time: slot,
                    state: "continuation",
                    appointment_id: Some(b.appointment_id),
                }
            } else {
                GridSlotDto {
                    time: slot,
                    state: "free",
                    appointment_id: None,
                }
            }
        })
        .collect();

    Ok(Json(ApiOk { data: grid }))
}

/* ============================================================
   POST /appointments/cleanup_cancelled  (admin bulk hard-delete)
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

pub async fn cleanup_cancelled(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<CleanupResponse>>, ApiError> {
    if !is_admin(&auth) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only admin can purge cancelled appointments".into(),
        ));
    }

    let done = sqlx::query(
        r#"
        DELETE FROM appointment
        WHERE company_id = $1 AND status = $2
        "#,
    )
    .bind(auth.company_id)
    .bind(SchedulingStatus::Cancelado)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ApiOk {
        data: CleanupResponse {
            deleted: done.rows_affected(),
        },
    }))
}
