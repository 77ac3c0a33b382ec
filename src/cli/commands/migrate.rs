use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use crate::cli::output::output_success;
use crate::cli::OutputFormat;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn handle(pool: &PgPool, output_format: &OutputFormat) -> anyhow::Result<()> {
    MIGRATOR.run(pool).await?;

    let latest = MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0);
    info!(latest, "migrations applied");

    output_success(
        output_format,
        &format!("schema is at migration {}", latest),
        Some(json!({ "version": latest })),
    )
}
