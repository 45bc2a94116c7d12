use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio_postgres::{config::SslMode as TokioPgSslMode, Config as TokioPgConnectOptions};

use crate::shared::ValidationError;
use crate::SerializableSecretString;

/// Configuration for connecting to a Postgres database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name of the Postgres database to connect to.
    pub name: String,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user. This field is sensitive and redacted in debug output.
    #[serde(default)]
    pub password: Option<SerializableSecretString>,
    /// TLS configuration for secure connections.
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_port() -> u16 {
    5432
}

impl PgConnectionConfig {
    /// Validates the connection settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

/// TLS settings for secure Postgres connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    /// Whether TLS is enabled for the connection.
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Validates the [`TlsConfig`].
    ///
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled but no certificates are provided.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts the implementation into crate specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Creates connection options for connecting to the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn with_db(&self) -> TokioPgConnectOptions {
        // Certificates are handed to the rustls connector separately; only the mode is set here.
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Disable
        };

        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .dbname(&self.name)
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_without_certificates_is_rejected() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        };

        assert!(matches!(
            tls.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
        assert!(TlsConfig::default().validate().is_ok());
    }

    #[test]
    fn connect_options_carry_database_and_mode() {
        let config = PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5433,
            name: "warehouse".to_string(),
            username: "loader".to_string(),
            password: Some("secret".to_string().into()),
            tls: TlsConfig::default(),
        };

        let options: TokioPgConnectOptions = config.with_db();
        assert_eq!(options.get_dbname(), Some("warehouse"));
        assert_eq!(options.get_user(), Some("loader"));
        assert_eq!(options.get_ports(), &[5433]);
        assert_eq!(options.get_ssl_mode(), TokioPgSslMode::Disable);
        assert_eq!(options.get_password(), Some("secret".as_bytes()));
    }
}
