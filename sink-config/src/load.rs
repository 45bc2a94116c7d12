use std::path::Path;

use serde::de::DeserializeOwned;

use crate::environment::Environment;

/// Directory containing configuration files relative to application root.
const CONFIGURATION_DIR: &str = "configuration";

/// Base configuration file loaded for all environments.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
///
/// Example: `APP_DESTINATION__POSTGRES__HOST` sets the `destination.postgres.host` field.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
const LIST_SEPARATOR: &str = ",";

/// Trait defining the list of keys that should be parsed as lists in a given [`Config`]
/// implementation.
pub trait Config {
    /// Slice containing all the keys that should be parsed as lists when loading the configuration.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads configuration from a file and environment variables.
///
/// When `path` is given, that single file is loaded; its format (JSON or YAML) is inferred
/// from the extension. Otherwise the configuration is layered from
/// `configuration/base.yaml` and `configuration/{environment}.yaml`, both optional.
/// Environment variables prefixed with `APP` are applied last in both cases.
///
/// Nested keys use double underscores: `APP_LOAD_RETRY__MAX_ATTEMPTS` → `load_retry.max_attempts`
/// and lists are separated by `,`.
pub fn load_config<T>(path: Option<&Path>) -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let mut builder = config::Config::builder();

    match path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        None => {
            let base_path = std::env::current_dir()
                .map_err(|err| config::ConfigError::Foreign(Box::new(err)))?;
            let configuration_directory = base_path.join(CONFIGURATION_DIR);

            let environment = Environment::load()
                .map_err(|err| config::ConfigError::Foreign(Box::new(err)))?;
            let environment_filename = format!("{environment}.yaml");

            builder = builder
                .add_source(
                    config::File::from(configuration_directory.join(BASE_CONFIG_FILE))
                        .required(false),
                )
                .add_source(
                    config::File::from(configuration_directory.join(environment_filename))
                        .required(false),
                );
        }
    }

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = builder.add_source(environment_source).build()?;

    settings.try_deserialize::<T>()
}
