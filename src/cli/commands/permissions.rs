use clap::Subcommand;
use serde_json::json;

use crate::cli::output::{output_list, output_success};
use crate::cli::OutputFormat;
use crate::database::{Stores, StoreError};

#[derive(Subcommand)]
pub enum PermissionCommands {
    #[command(about = "Grant permission codes to a user")]
    Grant {
        /// Email of the account
        email: String,
        /// Codes such as movies:read or movies:write
        #[arg(required = true)]
        codes: Vec<String>,
    },

    #[command(about = "List the permission codes a user holds")]
    List {
        /// Email of the account
        email: String,
    },
}

pub async fn handle(cmd: PermissionCommands, stores: &Stores, output_format: &OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PermissionCommands::Grant { email, codes } => {
            let user = lookup(stores, &email).await?;
            stores.permissions.add_for_user(user.id, &codes).await?;
            tracing::info!(user_id = user.id, ?codes, "permissions granted");
            output_success(
                output_format,
                &format!("granted {} to {}", codes.join(", "), user.email),
                Some(json!({ "user_id": user.id, "granted": codes })),
            )
        }
        PermissionCommands::List { email } => {
            let user = lookup(stores, &email).await?;
            let granted = stores.permissions.get_all_for_user(user.id).await?;
            let codes: Vec<String> = granted.codes().into_iter().map(str::to_string).collect();
            output_list(output_format, "permissions", &codes, "no permissions granted")
        }
    }
}

async fn lookup(stores: &Stores, email: &str) -> anyhow::Result<crate::database::models::User> {
    match stores.users.get_by_email(email).await {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound) => anyhow::bail!("no user with email '{}'", email),
        Err(err) => Err(err.into()),
    }
}
