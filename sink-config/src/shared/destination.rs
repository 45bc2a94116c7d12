use serde::{Deserialize, Serialize};

use crate::shared::{PgConnectionConfig, ValidationError};

/// Configuration for the supported destinations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// In-memory destination, used for dry runs and tests.
    #[default]
    Memory,
    /// PostgreSQL destination.
    Postgres(PgConnectionConfig),
}

impl DestinationConfig {
    /// Validates the destination settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            DestinationConfig::Memory => Ok(()),
            DestinationConfig::Postgres(connection) => connection.validate(),
        }
    }
}
