use std::env;
use std::net::SocketAddr;
use thiserror::Error;

use crate::attendance::AttendanceLayout;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/rollcall";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{name} must be set when SMTP_HOST is set")]
    Missing { name: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local store; everything is lost on restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Connection used only to provision attendance tables.
    pub admin_database_url: String,
    pub max_connections: u32,
    pub storage_backend: StorageBackend,
    pub attendance_layout: AttendanceLayout,
    pub bind_addr: SocketAddr,
    /// Base of links sent to registrants, without a trailing slash.
    pub public_base_url: String,
    pub cors_allowed_origins: String,
    /// Mail goes to the log when unset.
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let admin_database_url = var("ADMIN_DATABASE_URL").unwrap_or_else(|| database_url.clone());

        let max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => parse_number("DATABASE_MAX_CONNECTIONS", &raw)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let storage_backend = match var("STORAGE_BACKEND").as_deref().map(str::trim) {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    reason: format!("expected 'postgres' or 'memory', got '{other}'"),
                })
            }
        };

        let attendance_layout = match var("ATTENDANCE_LAYOUT") {
            Some(raw) => raw.parse::<AttendanceLayout>().map_err(|reason| ConfigError::Invalid {
                name: "ATTENDANCE_LAYOUT",
                reason,
            })?,
            None => AttendanceLayout::default(),
        };

        let bind_raw = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_raw.trim().parse().map_err(|e| ConfigError::Invalid {
            name: "BIND_ADDR",
            reason: format!("{e}"),
        })?;

        let public_base_url = var("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", bind_addr.port()))
            .trim_end_matches('/')
            .to_string();

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| cors::DEFAULT_ALLOWED_ORIGINS.to_string());

        let smtp = match var("SMTP_HOST") {
            None => None,
            Some(host) => {
                let required = |name: &'static str| var(name).ok_or(ConfigError::Missing { name });
                let port = match var("SMTP_PORT") {
                    Some(raw) => parse_number("SMTP_PORT", &raw)?,
                    None => DEFAULT_SMTP_PORT,
                };
                let from_email = required("MAIL_FROM")?;
                Some(SmtpConfig {
                    host,
                    port,
                    username: required("SMTP_USERNAME")?,
                    password: required("SMTP_PASSWORD")?,
                    from_name: var("MAIL_FROM_NAME")
                        .unwrap_or_else(|| "Event Check-in".to_string()),
                    from_email,
                })
            }
        };

        Ok(Self {
            database_url,
            admin_database_url,
            max_connections,
            storage_backend,
            attendance_layout,
            bind_addr,
            public_base_url,
            cors_allowed_origins,
            smtp,
        })
    }
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.admin_database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.storage_backend, StorageBackend::Postgres);
        assert_eq!(config.attendance_layout, AttendanceLayout::Partitioned);
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.public_base_url, "http://localhost:3001");
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_admin_url_is_separate_when_given() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://app@db/rollcall"),
            ("ADMIN_DATABASE_URL", "postgres://owner@db/rollcall"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "postgres://app@db/rollcall");
        assert_eq!(config.admin_database_url, "postgres://owner@db/rollcall");
    }

    #[test]
    fn test_public_base_url_drops_trailing_slash() {
        let config = config_from(&[("PUBLIC_BASE_URL", "https://checkin.example.edu/")]).unwrap();
        assert_eq!(config.public_base_url, "https://checkin.example.edu");
    }

    #[test]
    fn test_invalid_values_are_reported_by_name() {
        let err = config_from(&[("STORAGE_BACKEND", "redis")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STORAGE_BACKEND", .. }));

        let err = config_from(&[("DATABASE_MAX_CONNECTIONS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DATABASE_MAX_CONNECTIONS", .. }));

        let err = config_from(&[("ATTENDANCE_LAYOUT", "sharded")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ATTENDANCE_LAYOUT", .. }));
    }

    #[test]
    fn test_smtp_requires_credentials() {
        let err = config_from(&[("SMTP_HOST", "smtp.example.edu")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));

        let config = config_from(&[
            ("SMTP_HOST", "smtp.example.edu"),
            ("SMTP_USERNAME", "mailer"),
            ("SMTP_PASSWORD", "secret"),
            ("MAIL_FROM", "events@example.edu"),
        ])
        .unwrap();
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from_email, "events@example.edu");
    }
}
