use clap::Args;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub limiter: LimiterConfig,
    pub tokens: TokenConfig,
    pub security: SecurityConfig,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "production" | "prod" => Some(Environment::Production),
            "staging" | "stage" => Some(Environment::Staging),
            "development" | "dev" => Some(Environment::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL DSN. When absent the server runs on the in-memory store.
    pub dsn: Option<String>,
    pub max_open_conns: u32,
    pub max_idle_time_secs: u64,
    pub query_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }
}

/// Whether buckets are kept per client or shared by every caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimiterScope {
    PerClient,
    Global,
}

impl LimiterScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "per_client" | "per-client" | "client" => Some(LimiterScope::PerClient),
            "global" => Some(LimiterScope::Global),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub rps: f64,
    pub burst: u32,
    pub enabled: bool,
    pub scope: LimiterScope,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl LimiterConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub authentication_ttl_hours: i64,
    pub activation_ttl_hours: i64,
}

impl TokenConfig {
    pub fn authentication_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.authentication_ttl_hours)
    }

    pub fn activation_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.activation_ttl_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub cors_origins: Vec<String>,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = env::var("APP_ENV")
            .ok()
            .and_then(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        // Set defaults based on environment, then override with specific env vars
        Self::for_environment(environment).with_env_overrides()
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }

        // Database overrides
        if let Ok(v) = env::var("GREENLIGHT_DB_DSN") {
            if !v.trim().is_empty() {
                self.database.dsn = Some(v);
            }
        }
        if let Ok(v) = env::var("DATABASE_MAX_OPEN_CONNS") {
            self.database.max_open_conns = v.parse().unwrap_or(self.database.max_open_conns);
        }
        if let Ok(v) = env::var("DATABASE_MAX_IDLE_TIME_SECS") {
            self.database.max_idle_time_secs = v.parse().unwrap_or(self.database.max_idle_time_secs);
        }
        if let Ok(v) = env::var("DATABASE_QUERY_TIMEOUT_MS") {
            self.database.query_timeout_ms = v.parse().unwrap_or(self.database.query_timeout_ms);
        }

        // Limiter overrides
        if let Ok(v) = env::var("LIMITER_RPS") {
            self.limiter.rps = v.parse().unwrap_or(self.limiter.rps);
        }
        if let Ok(v) = env::var("LIMITER_BURST") {
            self.limiter.burst = v.parse().unwrap_or(self.limiter.burst);
        }
        if let Ok(v) = env::var("LIMITER_ENABLED") {
            self.limiter.enabled = v.parse().unwrap_or(self.limiter.enabled);
        }
        if let Ok(v) = env::var("LIMITER_SCOPE") {
            self.limiter.scope = LimiterScope::parse(&v).unwrap_or(self.limiter.scope);
        }

        // Token overrides
        if let Ok(v) = env::var("TOKEN_AUTHENTICATION_TTL_HOURS") {
            self.tokens.authentication_ttl_hours = v.parse().unwrap_or(self.tokens.authentication_ttl_hours);
        }
        if let Ok(v) = env::var("TOKEN_ACTIVATION_TTL_HOURS") {
            self.tokens.activation_ttl_hours = v.parse().unwrap_or(self.tokens.activation_ttl_hours);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = env::var("SECURITY_BCRYPT_COST") {
            self.security.bcrypt_cost = v.parse().unwrap_or(self.security.bcrypt_cost);
        }

        // Logging and metrics
        if let Ok(v) = env::var("LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" | "text" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = env::var("METRICS_ENABLED") {
            self.metrics.enabled = v.parse().unwrap_or(self.metrics.enabled);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig { port: 4000 },
            database: DatabaseConfig {
                dsn: None,
                max_open_conns: 25,
                max_idle_time_secs: 15 * 60,
                query_timeout_ms: 3_000,
            },
            limiter: LimiterConfig {
                rps: 2.0,
                burst: 4,
                enabled: true,
                scope: LimiterScope::PerClient,
                idle_ttl_secs: 3 * 60,
                sweep_interval_secs: 60,
            },
            tokens: TokenConfig {
                authentication_ttl_hours: 24,
                activation_ttl_hours: 72,
            },
            security: SecurityConfig {
                cors_origins: vec!["*".to_string()],
                bcrypt_cost: 12,
            },
            log: LogConfig {
                format: LogFormat::Pretty,
                level: "debug".to_string(),
            },
            metrics: MetricsConfig { enabled: true },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.security.cors_origins = vec!["https://staging.example.com".to_string()];
        config.log = LogConfig {
            format: LogFormat::Json,
            level: "info".to_string(),
        };
        config
    }

    fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.database.max_open_conns = 50;
        config.limiter.rps = 10.0;
        config.limiter.burst = 20;
        config.security.cors_origins = vec!["https://app.example.com".to_string()];
        config.log = LogConfig {
            format: LogFormat::Json,
            level: "info".to_string(),
        };
        config
    }
}

/// Command-line overrides applied on top of the environment-derived config.
#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    #[arg(long, help = "API server port")]
    pub port: Option<u16>,

    #[arg(long, help = "Environment (development|staging|production)")]
    pub env: Option<String>,

    #[arg(long = "db-dsn", help = "PostgreSQL DSN")]
    pub db_dsn: Option<String>,

    #[arg(long = "db-max-open-conns", help = "PostgreSQL max open connections")]
    pub db_max_open_conns: Option<u32>,

    #[arg(long = "limiter-rps", help = "Rate limiter maximum requests per second")]
    pub limiter_rps: Option<f64>,

    #[arg(long = "limiter-burst", help = "Rate limiter maximum burst")]
    pub limiter_burst: Option<u32>,

    #[arg(long = "limiter-enabled", help = "Enable rate limiter")]
    pub limiter_enabled: Option<bool>,

    #[arg(long = "limiter-scope", help = "Rate limiter scope (per_client|global)")]
    pub limiter_scope: Option<String>,
}

impl ServerArgs {
    /// Resolve the final configuration: preset, then env vars, then flags.
    pub fn resolve(self) -> anyhow::Result<AppConfig> {
        let mut config = match self.env.as_deref() {
            Some(name) => {
                let environment = Environment::parse(name)
                    .ok_or_else(|| anyhow::anyhow!("unknown environment '{}'", name))?;
                AppConfig::for_environment(environment).with_env_overrides()
            }
            None => AppConfig::from_env(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dsn) = self.db_dsn {
            config.database.dsn = Some(dsn);
        }
        if let Some(conns) = self.db_max_open_conns {
            config.database.max_open_conns = conns;
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.rps = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
        if let Some(scope) = self.limiter_scope {
            config.limiter.scope = LimiterScope::parse(&scope)
                .ok_or_else(|| anyhow::anyhow!("unknown limiter scope '{}'", scope))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.limiter.rps, 2.0);
        assert_eq!(config.limiter.burst, 4);
        assert!(config.limiter.enabled);
        assert_eq!(config.limiter.scope, LimiterScope::PerClient);
        assert_eq!(config.database.query_timeout(), Duration::from_secs(3));
        assert_eq!(config.tokens.authentication_ttl(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.limiter.enabled);
    }

    #[test]
    fn flags_override_preset() {
        let args = ServerArgs {
            env: Some("staging".to_string()),
            port: Some(8080),
            limiter_rps: Some(5.0),
            limiter_enabled: Some(false),
            limiter_scope: Some("global".to_string()),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limiter.rps, 5.0);
        assert!(!config.limiter.enabled);
        assert_eq!(config.limiter.scope, LimiterScope::Global);
    }

    #[test]
    fn rejects_unknown_limiter_scope() {
        let args = ServerArgs {
            env: Some("development".to_string()),
            limiter_scope: Some("per-region".to_string()),
            ..Default::default()
        };
        assert!(args.resolve().is_err());
    }
}
