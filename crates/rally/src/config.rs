//! Configuration loading for the `rally` binary.
//!
//! Files and `RALLY_*` environment variables are handled by
//! [`ConfigLoader`]; command-line flags are applied last and win over both.

use rally_kernel::{ConfigError, ConfigLoader, SystemConfig};
use toml::Value;
use tracing::debug;

use crate::cli::ServeArgs;

/// Loads the configuration selected by `args` and applies its overrides.
pub fn load(args: &ServeArgs) -> Result<SystemConfig, ConfigError> {
    let loader = ConfigLoader::new(&args.config_dir).with_environment(args.environment.clone());
    debug!("Loading configuration from {:?}", loader.files());
    let mut config = loader.load()?;
    apply_cli_overrides(&mut config, args);
    Ok(config)
}

pub fn apply_cli_overrides(config: &mut SystemConfig, args: &ServeArgs) {
    if let Some(level) = &args.log_level {
        config.set("logger.level", Value::String(level.clone()));
    }
    if args.json_logs {
        config.set("logger.format", Value::String("json".to_string()));
    }
    if let Some(listen) = &args.listen {
        config.set("http.listen", Value::String(listen.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(dir: &TempDir) -> ServeArgs {
        ServeArgs {
            config_dir: dir.path().to_path_buf(),
            ..ServeArgs::default()
        }
    }

    #[test]
    fn test_missing_directory_gives_empty_config() {
        let dir = TempDir::new().unwrap();
        let args = ServeArgs {
            config_dir: dir.path().join("nope"),
            ..ServeArgs::default()
        };
        let config = load(&args).unwrap();
        assert!(config.get("http").is_none());
    }

    #[test]
    fn test_environment_file_layers_over_default() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[http]\nlisten = \"127.0.0.1:8080\"\nprefix = \"/api\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "[http]\nlisten = \"0.0.0.0:80\"\n",
        )
        .unwrap();

        let args = ServeArgs {
            environment: Some("staging".to_string()),
            ..args(&dir)
        };
        let config = load(&args).unwrap();
        assert_eq!(config.get_str("http.listen"), Some("0.0.0.0:80"));
        assert_eq!(config.get_str("http.prefix"), Some("/api"));
    }

    #[test]
    fn test_cli_flags_win() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[logger]\nlevel = \"info\"\n[http]\nlisten = \"127.0.0.1:8080\"\n",
        )
        .unwrap();

        let args = ServeArgs {
            log_level: Some("trace".to_string()),
            json_logs: true,
            listen: Some("0.0.0.0:9999".to_string()),
            ..args(&dir)
        };
        let config = load(&args).unwrap();
        assert_eq!(config.get_str("logger.level"), Some("trace"));
        assert_eq!(config.get_str("logger.format"), Some("json"));
        assert_eq!(config.get_str("http.listen"), Some("0.0.0.0:9999"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("custom.toml"), "[http\n").unwrap();
        assert!(matches!(load(&args(&dir)), Err(ConfigError::Parse { .. })));
    }
}
