//! Loading and writing `config.toml`.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Default location: `<config_dir>/gameshelf/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("gameshelf").join(CONFIG_FILE_NAME))
}

/// Loads the config at `path`. A missing file yields defaults; an unreadable
/// or unparsable one is warned about and also yields defaults.
pub fn load_config_file(path: &Path) -> Config {
    let config_content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("No config at {}. Using defaults.", path.display());
            return Config::default();
        }
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            return Config::default();
        }
    };

    match toml::from_str::<Config>(&config_content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            Config::default()
        }
    }
}

pub fn persist_config_file(config: &Config, path: &Path) -> Result<()> {
    let config_text = toml::to_string(config).map_err(|err| {
        PipelineError::Configuration(format!(
            "failed to serialize config for {}: {err}",
            path.display()
        ))
    })?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    std::fs::write(path, config_text).map_err(|err| PipelineError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::{load_config_file, persist_config_file};
    use crate::config::Config;
    use crate::test_support::scratch_dir;

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let dir = scratch_dir("config_missing");
        let config = load_config_file(&dir.join("config.toml"));
        assert_eq!(config, Config::default());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unparsable_config_file_yields_defaults() {
        let dir = scratch_dir("config_garbage");
        let path = dir.join("config.toml");
        std::fs::write(&path, "[batch\noutput_dir = ").expect("fixture should be writable");
        assert_eq!(load_config_file(&path), Config::default());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_persisted_config_loads_back() {
        let dir = scratch_dir("config_persist");
        let path = dir.join("nested").join("config.toml");
        let mut config = Config::default();
        config.batch.auto_select = true;
        config.viewer.first_port = 9100;

        persist_config_file(&config, &path).expect("config should persist");
        assert_eq!(load_config_file(&path), config);
        let _ = std::fs::remove_dir_all(dir);
    }
}
