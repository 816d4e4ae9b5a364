// src/notify.rs
//
// Best-effort patient notifications. Bookings write a row into the
// outbound_message outbox; an external sender drains it. A failure here is
// logged and swallowed - it must never fail the booking that triggered it.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::models::AppState;

#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn booking_confirmed(
        &self,
        company_id: Uuid,
        patient_id: Uuid,
        appointment_id: Uuid,
        body: String,
    ) -> anyhow::Result<()>;
}

pub struct OutboxNotifier {
    db: PgPool,
}

impl OutboxNotifier {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BookingNotifier for OutboxNotifier {
    async fn booking_confirmed(
        &self,
        company_id: Uuid,
        patient_id: Uuid,
        appointment_id: Uuid,
        body: String,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbound_message (company_id, patient_id, appointment_id, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(company_id)
        .bind(patient_id)
        .bind(appointment_id)
        .bind(&body)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// Used when NOTIFICATIONS_ENABLED=false.
pub struct NoopNotifier;

#[async_trait]
impl BookingNotifier for NoopNotifier {
    async fn booking_confirmed(
        &self,
        _company_id: Uuid,
        _patient_id: Uuid,
        _appointment_id: Uuid,
        _body: String,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fire-and-forget: spawned off the request so a slow or failing outbox
/// write cannot delay or fail the response.
pub fn notify_best_effort(
    state: &AppState,
    company_id: Uuid,
    patient_id: Uuid,
    appointment_id: Uuid,
    body: String,
) {
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier
            .booking_confirmed(company_id, patient_id, appointment_id, body)
            .await
        {
            warn!(appointment_id = %appointment_id, "booking notification failed (ignored): {e}");
        }
    });
}
