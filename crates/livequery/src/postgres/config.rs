//! PostgreSQL connection configuration.

use serde::Deserialize;

use crate::error::BackendError;

/// Connection settings, typically deserialized from a YAML watch file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    /// Reported in `pg_stat_activity.application_name`.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_port() -> u16 {
    5432
}

fn default_application_name() -> String {
    "livequery".to_string()
}

impl ConnectionConfig {
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidInput`] when a required field is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.host.is_empty() {
            return Err(BackendError::invalid_input("host must not be empty"));
        }
        if self.user.is_empty() {
            return Err(BackendError::invalid_input("user must not be empty"));
        }
        if self.database.is_empty() {
            return Err(BackendError::invalid_input("database must not be empty"));
        }
        if self.port == 0 {
            return Err(BackendError::invalid_input("port must be non-zero"));
        }
        Ok(())
    }

    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} application_name={}",
            self.host, self.port, self.user, self.password, self.database, self.application_name
        )
    }

    pub(crate) fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host);
        pg.port(self.port);
        pg.user(&self.user);
        if !self.password.is_empty() {
            pg.password(&self.password);
        }
        pg.dbname(&self.database);
        pg.application_name(&self.application_name);
        pg
    }
}
