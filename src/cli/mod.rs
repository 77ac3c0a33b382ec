pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, Environment};
use crate::database::{self, Stores};

#[derive(Parser)]
#[command(name = "greenlight-admin")]
#[command(about = "Greenlight administration: migrations, permission grants, token housekeeping")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long = "db-dsn", global = true, help = "PostgreSQL DSN (defaults to GREENLIGHT_DB_DSN)")]
    pub db_dsn: Option<String>,

    #[arg(long, global = true, help = "Environment (development|staging|production)")]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply pending database migrations")]
    Migrate,

    #[command(about = "Inspect and grant user permissions")]
    Permissions {
        #[command(subcommand)]
        cmd: commands::permissions::PermissionCommands,
    },

    #[command(about = "Token housekeeping")]
    Tokens {
        #[command(subcommand)]
        cmd: commands::tokens::TokenCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

impl Cli {
    fn config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match self.env.as_deref() {
            Some(name) => {
                let environment = Environment::parse(name)
                    .ok_or_else(|| anyhow::anyhow!("unknown environment '{}'", name))?;
                AppConfig::for_environment(environment).with_env_overrides()
            }
            None => AppConfig::from_env(),
        };
        if let Some(dsn) = &self.db_dsn {
            config.database.dsn = Some(dsn.clone());
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = cli.config()?;

    let pool = database::connect(&config.database).await?;
    let stores = Stores::postgres(pool.clone(), config.database.query_timeout());

    let result = match cli.command {
        Commands::Migrate => commands::migrate::handle(&pool, &output_format).await,
        Commands::Permissions { cmd } => commands::permissions::handle(cmd, &stores, &output_format).await,
        Commands::Tokens { cmd } => commands::tokens::handle(cmd, &stores, &output_format).await,
    };

    pool.close().await;
    result
}
