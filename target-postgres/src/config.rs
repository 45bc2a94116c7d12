use std::path::Path;

use sink_config::load_config;
use sink_config::shared::TargetConfig;

/// Loads the [`TargetConfig`] and validates it.
pub fn load_target_config(path: Option<&Path>) -> anyhow::Result<TargetConfig> {
    let config = load_config::<TargetConfig>(path)?;
    config.validate()?;

    Ok(config)
}
