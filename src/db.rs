// src/db.rs

use sqlx::postgres::{PgPool, PgPoolOptions};

pub async fn connect_pg(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
