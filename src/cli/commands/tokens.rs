use chrono::Utc;
use clap::Subcommand;
use serde_json::json;

use crate::cli::output::output_success;
use crate::cli::OutputFormat;
use crate::database::Stores;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Delete every token whose expiry has passed")]
    PurgeExpired,
}

pub async fn handle(cmd: TokenCommands, stores: &Stores, output_format: &OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::PurgeExpired => {
            let removed = stores.tokens.delete_expired(Utc::now()).await?;
            tracing::info!(removed, "expired tokens purged");
            output_success(
                output_format,
                &format!("removed {} expired tokens", removed),
                Some(json!({ "removed": removed })),
            )
        }
    }
}
