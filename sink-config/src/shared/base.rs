use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Batch size cannot be zero.
    #[error("`batch_size` cannot be zero")]
    BatchSizeZero,
    /// Maximum parallel loads cannot be zero.
    #[error("`max_parallel_loads` cannot be zero")]
    MaxParallelLoadsZero,
    /// Load retry must allow at least one attempt.
    #[error("`load_retry.max_attempts` cannot be zero")]
    MaxAttemptsZero,
    /// Backoff factor must not shrink the delay.
    #[error("`load_retry.backoff_factor` must be at least 1.0, got {0}")]
    InvalidBackoffFactor(f32),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}
