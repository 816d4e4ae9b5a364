use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::notify::BookingNotifier;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub notifier: Arc<dyn BookingNotifier>,
}

/* -------------------------
   Scheduling status
--------------------------*/

/// Shared four-state workflow for appointments and consultations.
/// Stored as smallint; wire values are the snake_case names below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStatus {
    Agendado = 0,
    EmAtendimento = 1,
    Concluido = 2,
    Cancelado = 3,
}

impl fmt::Display for SchedulingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStatus::Agendado => write!(f, "agendado"),
            SchedulingStatus::EmAtendimento => write!(f, "em_atendimento"),
            SchedulingStatus::Concluido => write!(f, "concluido"),
            SchedulingStatus::Cancelado => write!(f, "cancelado"),
        }
    }
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub company: CompanyProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub company: CompanyProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    /// Single role stored as smallint in DB; returned as an array
    /// so the frontend contract can grow to multiple roles later.
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CompanyProfile {
    pub company_id: Uuid,
    pub name: String,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CompanyRow {
    pub company_id: Uuid,
    pub name: String,
    /// Canonical zone of the tenant, as a fixed offset from UTC. All civil
    /// timestamps of this company are interpreted against it.
    pub utc_offset_minutes: i32,
}

impl CompanyRow {
    /// Wall-clock "now" for this tenant.
    pub fn local_now(&self) -> NaiveDateTime {
        (Utc::now() + Duration::minutes(self.utc_offset_minutes as i64)).naive_utc()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcedureRow {
    pub procedure_id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub duration_min: Option<i32>,
    pub price_cents: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub company_id: Uuid,
    pub patient_id: Uuid,
    pub dentist_user_id: Uuid,
    pub procedure_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub status: SchedulingStatus,
    pub notes: Option<String>,
    pub consultation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConsultationRow {
    pub consultation_id: Uuid,
    pub company_id: Uuid,
    pub patient_id: Uuid,
    pub dentist_user_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub scheduled_at: NaiveDateTime,
    pub status: SchedulingStatus,
    pub clinical_notes: Option<String>,
    pub observations: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Procedure list snapshot taken when the consultation was recorded.
/// Renaming or retiring a catalog procedure never rewrites history.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConsultationProcedureRow {
    pub consultation_id: Uuid,
    pub position: i32,
    pub procedure_id: Uuid,
    pub display_name: String,
    pub duration_min: i32,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping:
/// 0 Patient, 1 Admin, 2 Manager, 3 Dentist, 4 Receptionist
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "patient",
        1 => "admin",
        2 => "manager",
        3 => "dentist",
        4 => "receptionist",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_status_wire_names() {
        use serde_json::json;

        assert_eq!(serde_json::to_value(SchedulingStatus::Agendado).unwrap(), json!("agendado"));
        assert_eq!(
            serde_json::to_value(SchedulingStatus::EmAtendimento).unwrap(),
            json!("em_atendimento")
        );
        assert_eq!(serde_json::to_value(SchedulingStatus::Concluido).unwrap(), json!("concluido"));
        assert_eq!(serde_json::to_value(SchedulingStatus::Cancelado).unwrap(), json!("cancelado"));

        let parsed: SchedulingStatus = serde_json::from_value(json!("em_atendimento")).unwrap();
        assert_eq!(parsed, SchedulingStatus::EmAtendimento);
    }

    #[test]
    fn test_scheduling_timestamps_stay_civil_on_the_wire() {
        // Civil datetimes serialize without a UTC offset.
        let t = NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(serde_json::to_value(t).unwrap(), serde_json::json!("2026-03-10T14:30:00"));
    }

    #[test]
    fn test_company_local_now_applies_offset() {
        let sp = CompanyRow {
            company_id: Uuid::new_v4(),
            name: "Clínica Sorriso".to_string(),
            utc_offset_minutes: -180, // América/São_Paulo without DST
        };
        let utc = CompanyRow {
            company_id: Uuid::new_v4(),
            name: "UTC".to_string(),
            utc_offset_minutes: 0,
        };
        let diff = utc.local_now() - sp.local_now();
        // Both calls read the clock, so allow a little slack around 180min.
        assert!(diff >= Duration::minutes(179) && diff <= Duration::minutes(181));
    }
}
