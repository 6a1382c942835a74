//! Configuration loading from `~/.nexum/config.toml` with defaults.

use nexum_types::ControllerConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load controller configuration from a TOML file, with defaults.
pub fn load_controller_config(path: Option<&Path>) -> ControllerConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<ControllerConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    ControllerConfig::default()
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".nexum").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("nexum.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            listen_addr = "0.0.0.0:4040"
            secret = "hunter2"
            encrypt = false
            session_ttl_secs = 900
            "#
        )
        .unwrap();

        let config = load_controller_config(Some(file.path()));
        assert_eq!(config.listen_addr.port(), 4040);
        assert_eq!(config.secret, "hunter2");
        assert!(!config.encrypt);
        assert_eq!(config.session_ttl_secs, Some(900));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_controller_config(Some(Path::new("/nonexistent/nexum.toml")));
        assert!(config.secret.is_empty());
        assert!(config.encrypt);
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = 12").unwrap();

        let config = load_controller_config(Some(file.path()));
        assert!(config.encrypt);
    }
}
