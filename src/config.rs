use std::env;
use chrono::Duration;

use crate::error::AppError;

pub const DEFAULT_CLUSTER: &str = "https://binance-monitor-adx.japaneast.kusto.windows.net";
pub const DEFAULT_DATABASE: &str = "market_data";
pub const DEFAULT_TABLE: &str = "tick_data";
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub app_env: AppEnv,
    pub kusto_cluster: String,
    pub kusto_database: String,
    pub kusto_table: String,
    pub kusto_timeout: Duration,
    pub default_symbol: String,
    pub max_hours: i64,
    pub azure: AzureCredentials,
}

// `client_id` alone selects a user-assigned managed identity
#[derive(Debug, Clone, Default)]
pub struct AzureCredentials {
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

impl AppEnv {
    pub fn default_log_level(&self) -> &'static str {
        match self {
            AppEnv::Development => "debug",
            AppEnv::Production | AppEnv::Test => "info",
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server config
        let port = var("PORT")
            .unwrap_or_else(|| "5000".into())
            .parse::<u16>()
            .map_err(|_| AppError::ConfigError("Invalid PORT".into()))?;

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".into());

        let app_env_str = var("APP_ENV").unwrap_or_else(|| "development".into());
        let app_env = match app_env_str.to_lowercase().as_str() {
            "production" => AppEnv::Production,
            "test" => AppEnv::Test,
            _ => AppEnv::Development,
        };

        // Kusto config
        let kusto_cluster = var("KUSTO_CLUSTER")
            .unwrap_or_else(|| DEFAULT_CLUSTER.into())
            .trim_end_matches('/')
            .to_string();
        if !kusto_cluster.starts_with("https://") && !kusto_cluster.starts_with("http://") {
            return Err(AppError::ConfigError("KUSTO_CLUSTER must be an http(s) URL".into()));
        }

        let kusto_database = var("KUSTO_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.into());

        let kusto_table = var("KUSTO_TABLE").unwrap_or_else(|| DEFAULT_TABLE.into());
        if !is_identifier(&kusto_table) {
            return Err(AppError::ConfigError(format!(
                "KUSTO_TABLE is not a plain identifier: {}",
                kusto_table
            )));
        }

        let kusto_timeout_str = var("KUSTO_TIMEOUT").unwrap_or_else(|| "30s".into());
        let kusto_timeout = parse_duration(&kusto_timeout_str)
            .map_err(|_| AppError::ConfigError("Invalid KUSTO_TIMEOUT format".into()))?;

        // Dashboard defaults
        let default_symbol = var("DEFAULT_SYMBOL").unwrap_or_else(|| DEFAULT_SYMBOL.into());

        let max_hours = var("MAX_HOURS")
            .unwrap_or_else(|| "168".into())
            .parse::<i64>()
            .ok()
            .filter(|h| *h >= 1)
            .ok_or_else(|| AppError::ConfigError("Invalid MAX_HOURS".into()))?;

        let azure = AzureCredentials {
            client_id: var("AZURE_CLIENT_ID").filter(|v| !v.is_empty()),
            tenant_id: var("AZURE_TENANT_ID").filter(|v| !v.is_empty()),
            client_secret: var("AZURE_CLIENT_SECRET").filter(|v| !v.is_empty()),
        };

        Ok(Self {
            port,
            host,
            app_env,
            kusto_cluster,
            kusto_database,
            kusto_table,
            kusto_timeout,
            default_symbol,
            max_hours,
            azure,
        })
    }

    // Host may be a name, an IPv4 or a bare IPv6 address
    pub fn bind_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_duration(duration_str: &str) -> Result<Duration, &'static str> {
    let duration_str = duration_str.trim();

    if duration_str.is_empty() {
        return Err("Duration string is empty");
    }

    // Extract the number and unit parts
    let len = duration_str.len();
    let (num_part, unit_part) = duration_str.split_at(
        duration_str
            .chars()
            .position(|c| !c.is_ascii_digit())
            .unwrap_or(len)
    );

    let num = num_part.parse::<i64>().map_err(|_| "Invalid number")?;

    match unit_part {
        "s" => Ok(Duration::seconds(num)),
        "m" => Ok(Duration::minutes(num)),
        "h" => Ok(Duration::hours(num)),
        "d" => Ok(Duration::days(num)),
        _ => Err("Unknown time unit, use s, m, h, or d"),
    }
}
