// src/store.rs
//
// Tenant-scoped reads shared by the scheduling handlers. Everything here
// takes company_id; handlers never query appointments without it.

use sha2::{Digest, Sha256};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{CompanyRow, ProcedureRow, SchedulingStatus};
use crate::scheduling::conflict::{BookedInterval, effective_duration};

fn db_err(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("db error: {e}"))
}

pub async fn load_company<'e>(
    ex: impl PgExecutor<'e>,
    company_id: Uuid,
) -> Result<CompanyRow, ApiError> {
    sqlx::query_as::<_, CompanyRow>(
        r#"
        SELECT company_id, name, utc_offset_minutes
        FROM company
        WHERE company_id = $1
        "#,
    )
    .bind(company_id)
    .fetch_optional(ex)
    .await
    .map_err(db_err)?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "company not found".into()))
}

#[derive(Debug, sqlx::FromRow)]
struct BookingJoinRow {
    appointment_id: Uuid,
    scheduled_at: chrono::NaiveDateTime,
    procedure_name: String,
    duration_min: Option<i32>,
}

/// All non-cancelled bookings of a dentist with procedure durations joined,
/// ready for the conflict detector.
pub async fn load_dentist_bookings<'e>(
    ex: impl PgExecutor<'e>,
    company_id: Uuid,
    dentist_user_id: Uuid,
) -> Result<Vec<BookedInterval>, ApiError> {
    let rows: Vec<BookingJoinRow> = sqlx::query_as(
        r#"
        SELECT
          a.appointment_id,
          a.scheduled_at,
          p.name AS procedure_name,
          p.duration_min
        FROM appointment a
        JOIN procedure_catalog p ON p.procedure_id = a.procedure_id
        WHERE a.company_id = $1
          AND a.dentist_user_id = $2
          AND a.status <> $3
        ORDER BY a.scheduled_at ASC
        "#,
    )
    .bind(company_id)
    .bind(dentist_user_id)
    .bind(SchedulingStatus::Cancelado)
    .fetch_all(ex)
    .await
    .map_err(db_err)?;

    Ok(rows
        .into_iter()
        .map(|r| BookedInterval {
            appointment_id: r.appointment_id,
            procedure_name: r.procedure_name,
            start: r.scheduled_at,
            duration_min: effective_duration(r.duration_min),
        })
        .collect())
}

pub async fn load_procedure<'e>(
    ex: impl PgExecutor<'e>,
    company_id: Uuid,
    procedure_id: Uuid,
) -> Result<ProcedureRow, ApiError> {
    sqlx::query_as::<_, ProcedureRow>(
        r#"
        SELECT
          procedure_id, company_id, name, duration_min, price_cents,
          is_active, created_at, updated_at
        FROM procedure_catalog
        WHERE company_id = $1 AND procedure_id = $2
        "#,
    )
    .bind(company_id)
    .bind(procedure_id)
    .fetch_optional(ex)
    .await
    .map_err(db_err)?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "procedure not found".into()))
}

/// Resolve a posted id list against the tenant catalog, preserving request
/// order. Unknown ids are a validation error, listed in the message.
pub async fn resolve_procedures<'e>(
    ex: impl PgExecutor<'e>,
    company_id: Uuid,
    procedure_ids: &[Uuid],
) -> Result<Vec<ProcedureRow>, ApiError> {
    let rows: Vec<ProcedureRow> = sqlx::query_as(
        r#"
        SELECT
          procedure_id, company_id, name, duration_min, price_cents,
          is_active, created_at, updated_at
        FROM procedure_catalog
        WHERE company_id = $1 AND procedure_id = ANY($2)
        "#,
    )
    .bind(company_id)
    .bind(procedure_ids)
    .fetch_all(ex)
    .await
    .map_err(db_err)?;

    let mut ordered = Vec::with_capacity(procedure_ids.len());
    let mut missing = Vec::new();
    for id in procedure_ids {
        match rows.iter().find(|r| r.procedure_id == *id) {
            Some(r) => ordered.push(r.clone()),
            None => missing.push(id.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("unknown procedure ids: {}", missing.join(", ")),
        ));
    }
    Ok(ordered)
}

pub async fn ensure_patient<'e>(
    ex: impl PgExecutor<'e>,
    company_id: Uuid,
    patient_id: Uuid,
) -> Result<(), ApiError> {
    let found: Option<i32> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM patient
        WHERE company_id = $1 AND patient_id = $2 AND is_active = true
        "#,
    )
    .bind(company_id)
    .bind(patient_id)
    .fetch_optional(ex)
    .await
    .map_err(db_err)?;

    found
        .map(|_| ())
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "patient not found".into()))
}

pub async fn ensure_dentist<'e>(
    ex: impl PgExecutor<'e>,
    company_id: Uuid,
    dentist_user_id: Uuid,
) -> Result<(), ApiError> {
    // roles: 3 = dentist
    let found: Option<i32> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM app_user
        WHERE company_id = $1 AND user_id = $2 AND roles = 3 AND is_active = true
        "#,
    )
    .bind(company_id)
    .bind(dentist_user_id)
    .fetch_optional(ex)
    .await
    .map_err(db_err)?;

    found
        .map(|_| ())
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "dentist not found".into()))
}

/// Stable advisory-lock key for one dentist's calendar within one tenant.
pub fn dentist_lock_key(company_id: Uuid, dentist_user_id: Uuid) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(company_id.as_bytes());
    hasher.update(dentist_user_id.as_bytes());
    let digest = hasher.finalize();
    i64::from_be_bytes(digest[..8].try_into().expect("sha256 digest is 32 bytes"))
}

/// Serialize read-check-write booking sequences per (company, dentist).
/// Transaction-scoped: released automatically at commit/rollback.
pub async fn lock_dentist_schedule<'e>(
    ex: impl PgExecutor<'e>,
    company_id: Uuid,
    dentist_user_id: Uuid,
) -> Result<(), ApiError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(dentist_lock_key(company_id, dentist_user_id))
        .execute(ex)
        .await
        .map_err(db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_and_pairwise_distinct() {
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let d1 = Uuid::new_v4();
        let d2 = Uuid::new_v4();

        assert_eq!(dentist_lock_key(c1, d1), dentist_lock_key(c1, d1));
        assert_ne!(dentist_lock_key(c1, d1), dentist_lock_key(c1, d2));
        assert_ne!(dentist_lock_key(c1, d1), dentist_lock_key(c2, d1));
    }
}
